//! Message channels: named conduits between producers and consumers.
//!
//! - [`QueueChannel`]: point-to-point, bounded FIFO buffer, pollable
//! - [`PublishSubscribeChannel`]: synchronous fan-out to every subscriber
//! - [`DirectChannel`]: synchronous hand-off to exactly one subscriber
//! - [`ReplyChannel`]: single-use anonymous channel backing a gateway request
//!
//! Synchronous channels dispatch on the sender's task. Re-entrant dispatch
//! (a subscriber sending back into a synchronous channel) is tracked with a
//! task-local depth counter and fails with [`DispatchError::CyclicDispatch`]
//! once it passes the configured maximum.

pub mod direct;
pub mod publish_subscribe;
pub mod queue;
pub mod registry;
pub mod reply;
mod subscribers;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conduit_core::Message;

use crate::error::DispatchError;

pub use direct::DirectChannel;
pub use publish_subscribe::{FanOutPolicy, PublishSubscribeChannel, PublishSubscribeOptions};
pub use queue::{OverflowPolicy, QueueChannel};
pub use registry::{ChannelRegistry, TemporaryChannelGuard};
pub use reply::ReplyChannel;

// ---------------------------------------------------------------------------
// Timeout
// ---------------------------------------------------------------------------

/// How long a send or receive may wait.
///
/// The three states are kept distinct rather than folded into one integer:
/// a zero wait and an unbounded wait behave very differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Do not wait; fail fast if the operation cannot complete now.
    Immediate,
    /// Wait at most the given duration.
    After(Duration),
    /// Wait until the operation completes.
    Indefinite,
}

impl Timeout {
    /// Converts a configuration value: zero is `Immediate`, positive is
    /// `After`, negative is `Indefinite`.
    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        match u64::try_from(millis) {
            Ok(0) => Timeout::Immediate,
            Ok(ms) => Timeout::After(Duration::from_millis(ms)),
            Err(_) => Timeout::Indefinite,
        }
    }
}

// ---------------------------------------------------------------------------
// Channel traits
// ---------------------------------------------------------------------------

/// A channel that accepts messages.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Sends a message.
    ///
    /// Returns `Ok(true)` once the message is delivered or enqueued and
    /// `Ok(false)` if it was rejected or the timeout elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Undeliverable`] when there is no consumer to
    /// deliver to, and propagates handler failures of synchronous channels.
    async fn send(&self, message: Message, timeout: Timeout) -> Result<bool, DispatchError>;
}

/// A buffered channel consumers pull messages from.
#[async_trait]
pub trait PollableChannel: MessageChannel {
    /// Takes the next message, waiting up to `timeout` for one to arrive.
    async fn receive(&self, timeout: Timeout) -> Option<Message>;
}

/// A channel that pushes messages to registered consumers.
pub trait SubscribableChannel: MessageChannel {
    /// Adds a consumer. Returns `false` if a consumer with the same id is
    /// already subscribed.
    fn subscribe(&self, consumer: Arc<dyn MessageConsumer>) -> bool;

    /// Removes the consumer with the given id. Returns `false` if absent.
    fn unsubscribe(&self, consumer_id: &str) -> bool;

    fn subscriber_count(&self) -> usize;
}

/// Receiving side of a subscribable channel.
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    /// Identity used for unsubscription and de-duplication.
    fn id(&self) -> &str;

    /// Position among subscribers of the same channel; lower runs first.
    fn order(&self) -> i32 {
        0
    }

    /// Handles one message on the sender's task.
    async fn on_message(&self, message: Message) -> Result<(), DispatchError>;
}

// ---------------------------------------------------------------------------
// ChannelRef
// ---------------------------------------------------------------------------

/// Typed handle to a concrete channel, as stored in a [`ChannelRegistry`].
#[derive(Clone)]
pub enum ChannelRef {
    Queue(Arc<QueueChannel>),
    PublishSubscribe(Arc<PublishSubscribeChannel>),
    Direct(Arc<DirectChannel>),
    Reply(Arc<ReplyChannel>),
}

impl ChannelRef {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            ChannelRef::Queue(c) => c.name(),
            ChannelRef::PublishSubscribe(c) => c.name(),
            ChannelRef::Direct(c) => c.name(),
            ChannelRef::Reply(c) => c.name(),
        }
    }

    /// Returns the sending side of the channel.
    #[must_use]
    pub fn as_channel(&self) -> Arc<dyn MessageChannel> {
        match self {
            ChannelRef::Queue(c) => c.clone(),
            ChannelRef::PublishSubscribe(c) => c.clone(),
            ChannelRef::Direct(c) => c.clone(),
            ChannelRef::Reply(c) => c.clone(),
        }
    }

    #[must_use]
    pub fn as_pollable(&self) -> Option<Arc<dyn PollableChannel>> {
        match self {
            ChannelRef::Queue(c) => Some(c.clone()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_subscribable(&self) -> Option<Arc<dyn SubscribableChannel>> {
        match self {
            ChannelRef::PublishSubscribe(c) => Some(c.clone()),
            ChannelRef::Direct(c) => Some(c.clone()),
            _ => None,
        }
    }
}

impl std::fmt::Debug for ChannelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            ChannelRef::Queue(_) => "Queue",
            ChannelRef::PublishSubscribe(_) => "PublishSubscribe",
            ChannelRef::Direct(_) => "Direct",
            ChannelRef::Reply(_) => "Reply",
        };
        f.debug_struct("ChannelRef")
            .field("kind", &kind)
            .field("name", &self.name())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Dispatch depth tracking
// ---------------------------------------------------------------------------

/// Default maximum synchronous dispatch depth.
pub const DEFAULT_MAX_DISPATCH_DEPTH: usize = 32;

tokio::task_local! {
    static DISPATCH_DEPTH: usize;
}

/// Current synchronous dispatch depth of the running task (0 outside any dispatch).
#[must_use]
pub fn current_dispatch_depth() -> usize {
    DISPATCH_DEPTH.try_with(|depth| *depth).unwrap_or(0)
}

/// Runs `dispatch` one level deeper, failing with `CyclicDispatch` instead
/// when the task is already `max_depth` levels deep.
pub(crate) async fn with_dispatch_depth<T, F>(
    channel: &str,
    max_depth: usize,
    dispatch: F,
) -> Result<T, DispatchError>
where
    F: Future<Output = Result<T, DispatchError>>,
{
    let depth = current_dispatch_depth();
    if depth >= max_depth {
        tracing::warn!(channel, depth, "maximum dispatch depth reached");
        return Err(DispatchError::CyclicDispatch {
            channel: channel.to_string(),
            depth,
        });
    }
    DISPATCH_DEPTH.scope(depth + 1, dispatch).await
}

pub(crate) fn record_send(channel: &str, outcome: &Result<bool, DispatchError>) {
    let name = if matches!(outcome, Ok(true)) {
        "conduit_channel_sent_total"
    } else {
        "conduit_channel_send_failed_total"
    };
    metrics::counter!(name, "channel" => channel.to_string()).increment(1);
}
