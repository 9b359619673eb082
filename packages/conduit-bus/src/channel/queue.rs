//! Point-to-point channel backed by a bounded FIFO buffer.
//!
//! Each message is taken by exactly one receiver. Concurrent receivers
//! compete for messages through an async mutex around the queue's receiving
//! end, so a message is never observed twice.

use async_trait::async_trait;
use conduit_core::Message;
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};

use super::{record_send, MessageChannel, PollableChannel, Timeout};
use crate::error::DispatchError;

/// What a full queue does with a new message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Wait for space, up to the send timeout.
    #[default]
    Block,
    /// Reject immediately regardless of the send timeout.
    Reject,
}

/// Bounded, pollable point-to-point channel.
#[derive(Debug)]
pub struct QueueChannel {
    name: String,
    tx: mpsc::Sender<Message>,
    rx: Mutex<mpsc::Receiver<Message>>,
    overflow: OverflowPolicy,
}

impl QueueChannel {
    /// Creates a queue holding at most `capacity` messages.
    ///
    /// A capacity of zero is raised to one; configuration validation rejects
    /// zero before it gets here.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            name: name.into(),
            tx,
            rx: Mutex::new(rx),
            overflow: OverflowPolicy::Block,
        }
    }

    #[must_use]
    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    /// Maximum number of buffered messages.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Number of messages currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and returns every buffered message.
    pub async fn clear(&self) -> Vec<Message> {
        let mut rx = self.rx.lock().await;
        let mut drained = Vec::new();
        while let Ok(message) = rx.try_recv() {
            drained.push(message);
        }
        drained
    }

    fn try_enqueue(&self, message: Message) -> bool {
        self.tx.try_send(message).is_ok()
    }
}

#[async_trait]
impl MessageChannel for QueueChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: Message, timeout: Timeout) -> Result<bool, DispatchError> {
        let message_id = message.id().to_string();
        // The receiving end lives as long as the channel, so send errors
        // can only be "full" or "timed out".
        let accepted = match (self.overflow, timeout) {
            (OverflowPolicy::Reject, _) | (_, Timeout::Immediate) => self.try_enqueue(message),
            (OverflowPolicy::Block, Timeout::After(duration)) => {
                matches!(
                    tokio::time::timeout(duration, self.tx.send(message)).await,
                    Ok(Ok(()))
                )
            }
            (OverflowPolicy::Block, Timeout::Indefinite) => self.tx.send(message).await.is_ok(),
        };
        if accepted {
            tracing::debug!(channel = %self.name, message_id = %message_id, "message enqueued");
        } else {
            tracing::debug!(channel = %self.name, message_id = %message_id, "queue full, message rejected");
        }
        let outcome = Ok(accepted);
        record_send(&self.name, &outcome);
        outcome
    }
}

#[async_trait]
impl PollableChannel for QueueChannel {
    async fn receive(&self, timeout: Timeout) -> Option<Message> {
        match timeout {
            Timeout::Immediate => {
                let mut rx = self.rx.try_lock().ok()?;
                rx.try_recv().ok()
            }
            Timeout::After(duration) => tokio::time::timeout(duration, async {
                self.rx.lock().await.recv().await
            })
            .await
            .ok()
            .flatten(),
            Timeout::Indefinite => self.rx.lock().await.recv().await,
        }
    }
}
