//! Consumer endpoints: bind an input channel to a handler and route replies.
//!
//! An endpoint subscribes to a subscribable input or runs a [`poller`] task on
//! a pollable one. Each message goes through the handler pipeline; a reply
//! is sent to the output channel when configured, otherwise to the channel
//! named by the message's `replyChannel` header, otherwise dropped.

pub mod lifecycle;
mod poller;

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use conduit_core::{Message, Value};
use tower::ServiceExt;

use crate::channel::{
    ChannelRef, ChannelRegistry, MessageChannel, MessageConsumer, PollableChannel,
    SubscribableChannel,
};
use crate::config::{EndpointConfig, StopPolicy};
use crate::error::DispatchError;
use crate::handler::middleware::{build_handler_pipeline, HandlerPipeline};
use crate::handler::Handler;
use crate::registry::{ManagedComponent, OperationSignature, ParamType};

pub use lifecycle::{InFlightGuard, LifecycleController, LifecycleState};

use poller::Poller;

// ---------------------------------------------------------------------------
// InputChannel
// ---------------------------------------------------------------------------

/// The channel an endpoint consumes from.
#[derive(Clone)]
pub enum InputChannel {
    Subscribable(Arc<dyn SubscribableChannel>),
    Pollable(Arc<dyn PollableChannel>),
}

impl InputChannel {
    /// Picks the consuming side of a registered channel. Reply channels
    /// cannot be consumed from.
    #[must_use]
    pub fn from_ref(channel: &ChannelRef) -> Option<Self> {
        channel
            .as_subscribable()
            .map(InputChannel::Subscribable)
            .or_else(|| channel.as_pollable().map(InputChannel::Pollable))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            InputChannel::Subscribable(c) => c.name(),
            InputChannel::Pollable(c) => c.name(),
        }
    }
}

impl std::fmt::Debug for InputChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            InputChannel::Subscribable(_) => "Subscribable",
            InputChannel::Pollable(_) => "Pollable",
        };
        f.debug_tuple(kind).field(&self.name()).finish()
    }
}

tokio::task_local! {
    /// Ids of the endpoints whose handlers are running on this task, outermost first.
    static ACTIVE_ENDPOINTS: Vec<String>;
}

/// Invocations of endpoint `id` the current task is inside of.
fn own_invocations(id: &str) -> u64 {
    ACTIVE_ENDPOINTS
        .try_with(|active| active.iter().filter(|a| a.as_str() == id).count())
        .map_or(0, |n| u64::try_from(n).unwrap_or(u64::MAX))
}

// ---------------------------------------------------------------------------
// EndpointBuilder
// ---------------------------------------------------------------------------

pub struct EndpointBuilder {
    id: String,
    input: InputChannel,
    handler: Handler,
    output: Option<Arc<dyn MessageChannel>>,
    channels: Option<Arc<ChannelRegistry>>,
    config: EndpointConfig,
}

impl EndpointBuilder {
    /// Channel that receives every reply, regardless of `replyChannel` headers.
    #[must_use]
    pub fn output(mut self, channel: Arc<dyn MessageChannel>) -> Self {
        self.output = Some(channel);
        self
    }

    /// Registry used to resolve `replyChannel` headers.
    #[must_use]
    pub fn channels(mut self, channels: Arc<ChannelRegistry>) -> Self {
        self.channels = Some(channels);
        self
    }

    #[must_use]
    pub fn config(mut self, config: EndpointConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the endpoint in the `Stopped` state.
    #[must_use]
    pub fn build(self) -> Arc<ConsumerEndpoint> {
        let handler = Arc::new(self.handler);
        let pipeline = build_handler_pipeline(&self.id, Arc::clone(&handler), &self.config);
        Arc::new_cyclic(|self_ref| ConsumerEndpoint {
            id: self.id,
            input: self.input,
            output: self.output,
            channels: self.channels,
            handler,
            pipeline: parking_lot::Mutex::new(pipeline),
            config: self.config,
            lifecycle: LifecycleController::new(),
            poller: parking_lot::Mutex::new(None),
            self_ref: self_ref.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// ConsumerEndpoint
// ---------------------------------------------------------------------------

pub struct ConsumerEndpoint {
    id: String,
    input: InputChannel,
    output: Option<Arc<dyn MessageChannel>>,
    channels: Option<Arc<ChannelRegistry>>,
    handler: Arc<Handler>,
    pipeline: parking_lot::Mutex<HandlerPipeline>,
    config: EndpointConfig,
    lifecycle: LifecycleController,
    poller: parking_lot::Mutex<Option<Poller>>,
    self_ref: Weak<ConsumerEndpoint>,
}

impl ConsumerEndpoint {
    pub fn builder(id: impl Into<String>, input: InputChannel, handler: Handler) -> EndpointBuilder {
        EndpointBuilder {
            id: id.into(),
            input,
            handler,
            output: None,
            channels: None,
            config: EndpointConfig::default(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    #[must_use]
    pub fn input(&self) -> &InputChannel {
        &self.input
    }

    #[must_use]
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    #[must_use]
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.lifecycle.in_flight_count()
    }

    /// Starts consuming from the input channel. Starting a running endpoint
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Internal`] when a pollable input is started
    /// outside a tokio runtime.
    pub async fn start(&self) -> Result<(), DispatchError> {
        let _transition = self.lifecycle.lock_transitions().await;
        if self.lifecycle.state() == LifecycleState::Running {
            return Ok(());
        }
        self.lifecycle.set_state(LifecycleState::Starting);

        match &self.input {
            InputChannel::Subscribable(channel) => {
                channel.subscribe(Arc::new(EndpointSubscriber {
                    id: self.id.clone(),
                    order: self.config.order,
                    endpoint: self.self_ref.clone(),
                }));
            }
            InputChannel::Pollable(channel) => {
                let poller = Poller::spawn(
                    self.self_ref.clone(),
                    self.id.clone(),
                    Arc::clone(channel),
                    self.config.poll_interval,
                );
                match poller {
                    Ok(poller) => *self.poller.lock() = Some(poller),
                    Err(err) => {
                        self.lifecycle.set_state(LifecycleState::Stopped);
                        return Err(err);
                    }
                }
            }
        }

        self.lifecycle.set_state(LifecycleState::Running);
        tracing::info!(endpoint = %self.id, input = %self.input.name(), "endpoint started");
        Ok(())
    }

    /// Stops consuming according to the configured [`StopPolicy`]. Stopping
    /// a stopped endpoint is a no-op.
    pub async fn stop(&self) {
        let _transition = self.lifecycle.lock_transitions().await;
        if self.lifecycle.state() == LifecycleState::Stopped {
            return;
        }
        self.lifecycle.set_state(LifecycleState::Stopping);

        if let InputChannel::Subscribable(channel) = &self.input {
            channel.unsubscribe(&self.id);
        }
        let poller = self.poller.lock().take();

        // A handler of this endpoint may be stopping it (control bus
        // `@self.stop()`); those invocations cannot finish before we return.
        let own = own_invocations(&self.id);
        let drained = match self.config.stop_policy {
            StopPolicy::Drain { timeout } => {
                let deadline = tokio::time::Instant::now() + timeout;
                let poller_done = match poller {
                    Some(poller) if own == 0 => poller.stop(Some(timeout)).await,
                    Some(poller) => poller.stop(None).await,
                    None => true,
                };
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                poller_done && self.lifecycle.wait_for_drain(own, remaining).await
            }
            StopPolicy::Immediate => {
                if let Some(poller) = poller {
                    poller.stop(None).await;
                }
                true
            }
        };

        if !drained {
            tracing::warn!(
                endpoint = %self.id,
                in_flight = self.lifecycle.in_flight_count(),
                "stop timed out with invocations still in flight"
            );
        }
        self.lifecycle.set_state(LifecycleState::Stopped);
        tracing::info!(endpoint = %self.id, "endpoint stopped");
    }

    /// Handles a message pushed by a subscribable input.
    async fn dispatch(&self, message: Message) -> Result<(), DispatchError> {
        let _in_flight = self.lifecycle.in_flight_guard();
        let state = self.lifecycle.state();
        if state != LifecycleState::Running {
            return Err(DispatchError::NotActive {
                endpoint: self.id.clone(),
                state,
            });
        }
        self.process(message).await
    }

    /// Handles a message taken by the poller. The poller only runs while the
    /// endpoint is started, so no state check is needed.
    async fn dispatch_polled(&self, message: Message) -> Result<(), DispatchError> {
        let _in_flight = self.lifecycle.in_flight_guard();
        self.process(message).await
    }

    async fn process(&self, message: Message) -> Result<(), DispatchError> {
        tracing::debug!(endpoint = %self.id, message_id = message.id(), "handling message");
        let pipeline = self.pipeline.lock().clone();
        let mut active = ACTIVE_ENDPOINTS.try_with(Clone::clone).unwrap_or_default();
        active.push(self.id.clone());
        ACTIVE_ENDPOINTS
            .scope(active, async move {
                match pipeline.oneshot(message).await? {
                    Some(reply) => self.route_reply(reply).await,
                    None => Ok(()),
                }
            })
            .await
    }

    async fn route_reply(&self, reply: Message) -> Result<(), DispatchError> {
        let destination = if let Some(output) = &self.output {
            Arc::clone(output)
        } else if let Some(name) = reply.headers().reply_channel() {
            self.channels
                .as_ref()
                .and_then(|channels| channels.resolve(name))
                .ok_or_else(|| {
                    DispatchError::undeliverable(name, reply.id(), "reply channel is not registered")
                })?
        } else {
            tracing::debug!(endpoint = %self.id, message_id = reply.id(), "no reply destination, discarding reply");
            return Ok(());
        };

        let channel_name = destination.name().to_string();
        tracing::debug!(
            endpoint = %self.id,
            channel = %channel_name,
            message_id = reply.id(),
            "sending reply"
        );
        if destination.send(reply, self.config.send_timeout).await? {
            Ok(())
        } else {
            Err(DispatchError::SendTimeout {
                channel: channel_name,
            })
        }
    }
}

impl std::fmt::Debug for ConsumerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerEndpoint")
            .field("id", &self.id)
            .field("input", &self.input)
            .field("handler", &self.handler)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ManagedComponent for ConsumerEndpoint {
    fn name(&self) -> &str {
        &self.id
    }

    fn operations(&self) -> Vec<OperationSignature> {
        vec![OperationSignature::new("state", Vec::<ParamType>::new())]
    }

    async fn invoke(&self, operation: &str, _args: Vec<Value>) -> anyhow::Result<Option<Value>> {
        match operation {
            "state" => Ok(Some(Value::from(self.state().as_str()))),
            other => anyhow::bail!("endpoint '{}' has no operation '{other}'", self.id),
        }
    }

    async fn start(&self) -> anyhow::Result<()> {
        ConsumerEndpoint::start(self).await.map_err(anyhow::Error::from)
    }

    async fn stop(&self) -> anyhow::Result<()> {
        ConsumerEndpoint::stop(self).await;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }
}

// ---------------------------------------------------------------------------
// EndpointSubscriber
// ---------------------------------------------------------------------------

/// Subscription handle; holds the endpoint weakly so channels never keep
/// endpoints alive.
struct EndpointSubscriber {
    id: String,
    order: i32,
    endpoint: Weak<ConsumerEndpoint>,
}

#[async_trait]
impl MessageConsumer for EndpointSubscriber {
    fn id(&self) -> &str {
        &self.id
    }

    fn order(&self) -> i32 {
        self.order
    }

    async fn on_message(&self, message: Message) -> Result<(), DispatchError> {
        match self.endpoint.upgrade() {
            Some(endpoint) => endpoint.dispatch(message).await,
            None => Err(DispatchError::NotActive {
                endpoint: self.id.clone(),
                state: LifecycleState::Stopped,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
