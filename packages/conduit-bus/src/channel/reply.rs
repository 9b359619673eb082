//! Single-use anonymous channel carrying one reply back to a waiting gateway.

use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::Message;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::{MessageChannel, Timeout};
use crate::error::DispatchError;

/// Prefix of every generated reply channel name.
pub const REPLY_CHANNEL_PREFIX: &str = "reply:";

/// Accepts the first message sent to it and hands it to the paired receiver.
///
/// Later sends are refused with `Ok(false)`, as are sends after the receiver
/// was dropped (the requester gave up waiting).
#[derive(Debug)]
pub struct ReplyChannel {
    name: String,
    slot: Mutex<Option<oneshot::Sender<Message>>>,
}

impl ReplyChannel {
    /// Creates a uniquely named reply channel and the receiver for its reply.
    #[must_use]
    pub fn new() -> (Arc<Self>, oneshot::Receiver<Message>) {
        let (tx, rx) = oneshot::channel();
        let channel = Arc::new(Self {
            name: format!("{REPLY_CHANNEL_PREFIX}{}", uuid::Uuid::new_v4()),
            slot: Mutex::new(Some(tx)),
        });
        (channel, rx)
    }

    /// Whether the reply has already been delivered or abandoned.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.slot
            .lock()
            .as_ref()
            .map_or(true, oneshot::Sender::is_closed)
    }
}

#[async_trait]
impl MessageChannel for ReplyChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: Message, _timeout: Timeout) -> Result<bool, DispatchError> {
        let Some(tx) = self.slot.lock().take() else {
            tracing::warn!(channel = %self.name, message_id = message.id(), "late reply discarded");
            return Ok(false);
        };
        let message_id = message.id().to_string();
        if tx.send(message).is_err() {
            tracing::debug!(channel = %self.name, message_id = %message_id, "requester no longer waiting");
            return Ok(false);
        }
        Ok(true)
    }
}
