//! Error taxonomy for the dispatch core.

use crate::endpoint::LifecycleState;

/// Errors surfaced by channels, endpoints, handlers and gateways.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No subscriber or destination could accept the message.
    #[error("message {message_id} undeliverable on channel '{channel}': {reason}")]
    Undeliverable {
        channel: String,
        message_id: String,
        reason: String,
    },
    /// The handler could not be resolved or its arguments could not be bound.
    #[error("cannot invoke '{target}.{operation}': {reason}")]
    Invocation {
        target: String,
        operation: String,
        reason: String,
    },
    /// The invoked operation itself failed. The original error is preserved as the source.
    #[error("operation '{target}.{operation}' failed: {source}")]
    TargetInvocation {
        target: String,
        operation: String,
        #[source]
        source: anyhow::Error,
    },
    /// A control expression failed to parse or resolve.
    #[error("failed to evaluate control expression '{expression}': {reason}")]
    Evaluation { expression: String, reason: String },
    #[error("no reply received within {timeout_ms}ms")]
    GatewayTimeout { timeout_ms: u64 },
    #[error("endpoint '{endpoint}' is not running (state: {state:?})")]
    NotActive {
        endpoint: String,
        state: LifecycleState,
    },
    /// Synchronous dispatch re-entered itself beyond the configured depth.
    #[error("dispatch depth {depth} exceeded on channel '{channel}'; wiring is likely cyclic")]
    CyclicDispatch { channel: String, depth: usize },
    /// Continue-on-error fan-out finished with at least one failed subscriber.
    #[error("{failed} of {attempted} subscribers of '{channel}' failed; first: {first}")]
    PartialDelivery {
        channel: String,
        failed: usize,
        attempted: usize,
        #[source]
        first: Box<DispatchError>,
    },
    #[error("send to channel '{channel}' timed out or was rejected")]
    SendTimeout { channel: String },
    #[error("handler of '{endpoint}' did not complete within {timeout_ms}ms")]
    HandlerTimeout { endpoint: String, timeout_ms: u64 },
    #[error("endpoint '{endpoint}' is overloaded")]
    Overloaded { endpoint: String },
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl DispatchError {
    /// Unwraps nested [`DispatchError::PartialDelivery`] layers down to the first
    /// underlying failure.
    #[must_use]
    pub fn root(&self) -> &DispatchError {
        match self {
            DispatchError::PartialDelivery { first, .. } => first.root(),
            other => other,
        }
    }

    pub(crate) fn undeliverable(
        channel: &str,
        message_id: &str,
        reason: impl Into<String>,
    ) -> Self {
        DispatchError::Undeliverable {
            channel: channel.to_string(),
            message_id: message_id.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_unwraps_partial_delivery_chain() {
        let inner = DispatchError::CyclicDispatch {
            channel: "loop".to_string(),
            depth: 8,
        };
        let wrapped = DispatchError::PartialDelivery {
            channel: "outer".to_string(),
            failed: 1,
            attempted: 2,
            first: Box::new(DispatchError::PartialDelivery {
                channel: "inner".to_string(),
                failed: 1,
                attempted: 1,
                first: Box::new(inner),
            }),
        };
        assert!(matches!(
            wrapped.root(),
            DispatchError::CyclicDispatch { depth: 8, .. }
        ));
    }

    #[test]
    fn target_invocation_preserves_source() {
        let err = DispatchError::TargetInvocation {
            target: "bean".to_string(),
            operation: "run".to_string(),
            source: anyhow::anyhow!("disk full"),
        };
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "disk full");
    }
}
