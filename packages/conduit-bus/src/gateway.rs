//! Request/reply facade over the channel layer.
//!
//! By default every request gets its own temporary [`ReplyChannel`],
//! registered for the duration of the call. A gateway configured with a
//! shared reply channel instead tags each request with a unique
//! `correlationId` and matches replies arriving on that channel, so they may
//! come back in any order.

use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::{Message, MessageBuilder, Value};
use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::channel::{
    ChannelRef, ChannelRegistry, MessageChannel, MessageConsumer, ReplyChannel,
    SubscribableChannel,
};
use crate::config::GatewayConfig;
use crate::error::DispatchError;

type PendingReplies = Arc<DashMap<String, oneshot::Sender<Message>>>;

struct SharedReply {
    channel: Arc<dyn SubscribableChannel>,
    correlator_id: String,
    pending: PendingReplies,
}

pub struct MessagingGateway {
    request_channel: Arc<dyn MessageChannel>,
    channels: Arc<ChannelRegistry>,
    config: GatewayConfig,
    shared: Option<SharedReply>,
}

impl MessagingGateway {
    pub fn new(request_channel: Arc<dyn MessageChannel>, channels: Arc<ChannelRegistry>) -> Self {
        Self {
            request_channel,
            channels,
            config: GatewayConfig::default(),
            shared: None,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Routes all replies through the registered publish-subscribe channel
    /// `name`. Every gateway sharing the channel sees every reply and keeps
    /// only the ones it is waiting for.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Internal`] if no publish-subscribe channel has
    /// that name, or if the channel applies sequence headers (which replace
    /// the `correlationId`). A point-to-point channel would hand each reply to
    /// only one of the gateways sharing it.
    pub fn with_shared_reply_channel(mut self, name: &str) -> Result<Self, DispatchError> {
        let channel: Arc<dyn SubscribableChannel> = match self.channels.get(name) {
            Some(ChannelRef::PublishSubscribe(channel)) if !channel.options().apply_sequence => {
                channel as Arc<dyn SubscribableChannel>
            }
            _ => {
                return Err(DispatchError::Internal(anyhow::anyhow!(
                    "reply channel '{name}' is not a registered publish-subscribe channel \
                     without sequence headers"
                )))
            }
        };
        let pending = PendingReplies::default();
        let correlator_id = format!("gateway-correlator:{}", uuid::Uuid::new_v4());
        channel.subscribe(Arc::new(ReplyCorrelator {
            id: correlator_id.clone(),
            pending: Arc::clone(&pending),
        }));
        self.shared = Some(SharedReply {
            channel,
            correlator_id,
            pending,
        });
        Ok(self)
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Requests awaiting a reply on the shared reply channel.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.as_ref().map_or(0, |s| s.pending.len())
    }

    /// Sends `payload` and waits for the reply.
    ///
    /// # Errors
    ///
    /// Send failures are returned as-is; a rejected send is
    /// [`DispatchError::SendTimeout`]; no reply within the reply timeout is
    /// [`DispatchError::GatewayTimeout`].
    pub async fn request(&self, payload: impl Into<Value>) -> Result<Message, DispatchError> {
        self.request_with(MessageBuilder::with_payload(payload)).await
    }

    /// Like [`request`](Self::request), with caller-supplied headers.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn request_with(&self, builder: MessageBuilder) -> Result<Message, DispatchError> {
        match &self.shared {
            None => {
                let (reply_channel, rx) = ReplyChannel::new();
                // Deregisters on every exit path, including cancellation.
                let guard = self.channels.register_temporary(reply_channel);
                let request = builder.reply_channel(guard.name()).build();
                self.send_request(request).await?;
                self.await_reply(rx).await
            }
            Some(shared) => {
                let correlation_id = uuid::Uuid::new_v4().to_string();
                let (tx, rx) = oneshot::channel();
                shared.pending.insert(correlation_id.clone(), tx);
                let _pending = PendingGuard {
                    pending: Arc::clone(&shared.pending),
                    correlation_id: correlation_id.clone(),
                };
                let request = builder
                    .correlation_id(correlation_id)
                    .reply_channel(shared.channel.name())
                    .build();
                self.send_request(request).await?;
                self.await_reply(rx).await
            }
        }
    }

    /// Sends `payload` without waiting for, or routing, any reply.
    ///
    /// # Errors
    ///
    /// Send failures are returned as-is; a rejected send is
    /// [`DispatchError::SendTimeout`].
    pub async fn send(&self, payload: impl Into<Value>) -> Result<(), DispatchError> {
        self.send_with(MessageBuilder::with_payload(payload)).await
    }

    /// Like [`send`](Self::send), with caller-supplied headers.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn send_with(&self, builder: MessageBuilder) -> Result<(), DispatchError> {
        self.send_request(builder.build()).await
    }

    async fn send_request(&self, request: Message) -> Result<(), DispatchError> {
        tracing::debug!(
            channel = %self.request_channel.name(),
            message_id = request.id(),
            "gateway sending request"
        );
        if self
            .request_channel
            .send(request, self.config.send_timeout)
            .await?
        {
            Ok(())
        } else {
            Err(DispatchError::SendTimeout {
                channel: self.request_channel.name().to_string(),
            })
        }
    }

    async fn await_reply(&self, rx: oneshot::Receiver<Message>) -> Result<Message, DispatchError> {
        match tokio::time::timeout(self.config.reply_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // Either the wait expired or the reply slot was abandoned.
            Ok(Err(_)) | Err(_) => Err(DispatchError::GatewayTimeout {
                timeout_ms: u64::try_from(self.config.reply_timeout.as_millis())
                    .unwrap_or(u64::MAX),
            }),
        }
    }
}

impl Drop for MessagingGateway {
    fn drop(&mut self) {
        if let Some(shared) = &self.shared {
            shared.channel.unsubscribe(&shared.correlator_id);
        }
    }
}

/// Removes a pending correlation entry when the request finishes or is dropped.
struct PendingGuard {
    pending: PendingReplies,
    correlation_id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.remove(&self.correlation_id);
    }
}

/// Completes pending requests from replies on the shared reply channel.
struct ReplyCorrelator {
    id: String,
    pending: PendingReplies,
}

#[async_trait]
impl MessageConsumer for ReplyCorrelator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn on_message(&self, message: Message) -> Result<(), DispatchError> {
        let waiting = message
            .headers()
            .correlation_id()
            .and_then(|id| self.pending.remove(id))
            .map(|(_, tx)| tx);
        match waiting {
            Some(tx) => {
                if let Err(reply) = tx.send(message) {
                    tracing::warn!(message_id = reply.id(), "requester gave up before reply arrived");
                }
            }
            // Late, or addressed to another gateway on the same channel.
            None => tracing::debug!(
                correlator = %self.id,
                message_id = message.id(),
                correlation_id = ?message.headers().correlation_id(),
                "dropping late or unknown reply"
            ),
        }
        Ok(())
    }
}
