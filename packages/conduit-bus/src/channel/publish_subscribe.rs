//! Publish-subscribe channel with synchronous, ordered fan-out.
//!
//! `send` invokes every current subscriber on the sender's task in ascending
//! `order`. The sender is blocked for the combined duration of all
//! subscribers, so slow subscribers apply backpressure to producers.

use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::{Message, MessageBuilder};
use serde::Deserialize;

use super::subscribers::SubscriberList;
use super::{
    record_send, with_dispatch_depth, MessageChannel, MessageConsumer, SubscribableChannel,
    Timeout, DEFAULT_MAX_DISPATCH_DEPTH,
};
use crate::error::DispatchError;

/// Behaviour of a fan-out when a subscriber fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FanOutPolicy {
    /// Deliver to the remaining subscribers, then report the first failure
    /// wrapped in [`DispatchError::PartialDelivery`].
    #[default]
    ContinueOnError,
    /// Stop at the first failure and return it unchanged.
    FailFast,
}

#[derive(Debug, Clone)]
pub struct PublishSubscribeOptions {
    pub fan_out: FanOutPolicy,
    /// Stamp each subscriber's copy with correlation and sequence headers.
    pub apply_sequence: bool,
    pub max_dispatch_depth: usize,
}

impl Default for PublishSubscribeOptions {
    fn default() -> Self {
        Self {
            fan_out: FanOutPolicy::default(),
            apply_sequence: false,
            max_dispatch_depth: DEFAULT_MAX_DISPATCH_DEPTH,
        }
    }
}

pub struct PublishSubscribeChannel {
    name: String,
    subscribers: SubscriberList,
    options: PublishSubscribeOptions,
}

impl PublishSubscribeChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_options(name, PublishSubscribeOptions::default())
    }

    pub fn with_options(name: impl Into<String>, options: PublishSubscribeOptions) -> Self {
        Self {
            name: name.into(),
            subscribers: SubscriberList::default(),
            options,
        }
    }

    #[must_use]
    pub fn options(&self) -> &PublishSubscribeOptions {
        &self.options
    }

    #[allow(clippy::cast_possible_wrap)]
    fn copy_for(&self, message: &Message, index: usize, size: usize) -> Message {
        if !self.options.apply_sequence {
            return message.clone();
        }
        MessageBuilder::from_message(message)
            .correlation_id(message.id())
            .sequence(index as i64 + 1, size as i64)
            .build()
    }

    async fn fan_out(
        &self,
        message: Message,
        subscribers: Vec<Arc<dyn MessageConsumer>>,
    ) -> Result<bool, DispatchError> {
        let attempted = subscribers.len();
        let mut first_error = None;
        let mut failed = 0;

        for (index, subscriber) in subscribers.iter().enumerate() {
            let copy = self.copy_for(&message, index, attempted);
            if let Err(err) = subscriber.on_message(copy).await {
                match self.options.fan_out {
                    FanOutPolicy::FailFast => return Err(err),
                    FanOutPolicy::ContinueOnError => {
                        tracing::warn!(
                            channel = %self.name,
                            subscriber = subscriber.id(),
                            error = %err,
                            "subscriber failed, continuing fan-out"
                        );
                        failed += 1;
                        first_error.get_or_insert(err);
                    }
                }
            }
        }

        match first_error {
            None => Ok(true),
            Some(first) => Err(DispatchError::PartialDelivery {
                channel: self.name.clone(),
                failed,
                attempted,
                first: Box::new(first),
            }),
        }
    }
}

#[async_trait]
impl MessageChannel for PublishSubscribeChannel {
    fn name(&self) -> &str {
        &self.name
    }

    /// Delivers synchronously; `timeout` does not apply since nothing is buffered.
    async fn send(&self, message: Message, _timeout: Timeout) -> Result<bool, DispatchError> {
        let subscribers = self.subscribers.snapshot();
        let outcome = if subscribers.is_empty() {
            Err(DispatchError::undeliverable(
                &self.name,
                message.id(),
                "channel has no subscribers",
            ))
        } else {
            tracing::debug!(
                channel = %self.name,
                message_id = message.id(),
                subscribers = subscribers.len(),
                "publishing message"
            );
            with_dispatch_depth(
                &self.name,
                self.options.max_dispatch_depth,
                self.fan_out(message, subscribers),
            )
            .await
        };
        record_send(&self.name, &outcome);
        outcome
    }
}

impl SubscribableChannel for PublishSubscribeChannel {
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
