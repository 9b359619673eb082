//! Point-to-point channel that hands each message to exactly one subscriber
//! on the sender's task.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::Message;

use super::subscribers::SubscriberList;
use super::{
    record_send, with_dispatch_depth, MessageChannel, MessageConsumer, SubscribableChannel,
    Timeout, DEFAULT_MAX_DISPATCH_DEPTH,
};
use crate::error::DispatchError;

/// Round-robins messages across its subscribers.
///
/// A subscriber that reports [`DispatchError::NotActive`] is skipped and the
/// next one is tried; any other failure is returned to the sender.
pub struct DirectChannel {
    name: String,
    subscribers: SubscriberList,
    next: AtomicUsize,
    max_dispatch_depth: usize,
}

impl DirectChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscribers: SubscriberList::default(),
            next: AtomicUsize::new(0),
            max_dispatch_depth: DEFAULT_MAX_DISPATCH_DEPTH,
        }
    }

    #[must_use]
    pub fn with_max_dispatch_depth(mut self, depth: usize) -> Self {
        self.max_dispatch_depth = depth;
        self
    }

    async fn dispatch(
        &self,
        message: Message,
        subscribers: Vec<Arc<dyn MessageConsumer>>,
    ) -> Result<bool, DispatchError> {
        let start = self.next.fetch_add(1, Ordering::Relaxed) % subscribers.len();
        for offset in 0..subscribers.len() {
            let subscriber = &subscribers[(start + offset) % subscribers.len()];
            match subscriber.on_message(message.clone()).await {
                Ok(()) => return Ok(true),
                Err(DispatchError::NotActive { endpoint, .. }) => {
                    tracing::debug!(channel = %self.name, %endpoint, "subscriber inactive, failing over");
                }
                Err(err) => return Err(err),
            }
        }
        Err(DispatchError::undeliverable(
            &self.name,
            message.id(),
            "no running subscriber",
        ))
    }
}

#[async_trait]
impl MessageChannel for DirectChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: Message, _timeout: Timeout) -> Result<bool, DispatchError> {
        let subscribers = self.subscribers.snapshot();
        let outcome = if subscribers.is_empty() {
            Err(DispatchError::undeliverable(
                &self.name,
                message.id(),
                "channel has no subscribers",
            ))
        } else {
            with_dispatch_depth(
                &self.name,
                self.max_dispatch_depth,
                self.dispatch(message, subscribers),
            )
            .await
        };
        record_send(&self.name, &outcome);
        outcome
    }
}

impl SubscribableChannel for DirectChannel {
    fn subscribe(&self, consumer: Arc<dyn MessageConsumer>) -> bool {
        self.subscribers.add(consumer)
    }

    fn unsubscribe(&self, consumer_id: &str) -> bool {
        self.subscribers.remove(consumer_id)
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
