//! Background task feeding a pollable input channel into an endpoint.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::ConsumerEndpoint;
use crate::channel::{PollableChannel, Timeout};
use crate::error::DispatchError;

/// Receives from a queue channel in a loop and dispatches each message.
///
/// The loop checks for shutdown before every receive, so a message that was
/// already taken from the queue is always handled.
pub(crate) struct Poller {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Poller {
    /// Spawns the polling task on the current runtime.
    pub(crate) fn spawn(
        endpoint: Weak<ConsumerEndpoint>,
        endpoint_id: String,
        channel: Arc<dyn PollableChannel>,
        poll_interval: Duration,
    ) -> Result<Self, DispatchError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            DispatchError::Internal(anyhow::anyhow!(
                "endpoint '{endpoint_id}' must be started inside a tokio runtime: {e}"
            ))
        })?;
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = runtime.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    received = channel.receive(Timeout::After(poll_interval)) => {
                        let Some(message) = received else { continue };
                        let Some(endpoint) = endpoint.upgrade() else { break };
                        let message_id = message.id().to_string();
                        if let Err(err) = endpoint.dispatch_polled(message).await {
                            tracing::warn!(
                                endpoint = %endpoint_id,
                                message_id = %message_id,
                                error = %err,
                                "failed to handle polled message"
                            );
                        }
                    }
                }
            }
            tracing::debug!(endpoint = %endpoint_id, "poller exited");
        });

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Signals the task to exit. With `wait`, waits up to that long for the
    /// message in hand to finish; otherwise returns immediately.
    ///
    /// Returns `false` if the task was still running when the wait expired.
    pub(crate) async fn stop(mut self, wait: Option<Duration>) -> bool {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let Some(handle) = self.handle.take() else {
            return true;
        };
        match wait {
            Some(timeout) => tokio::time::timeout(timeout, handle).await.is_ok(),
            None => true,
        }
    }
}
