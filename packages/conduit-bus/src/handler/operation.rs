//! Handler that invokes one named operation on one managed component.

use std::sync::Arc;

use conduit_core::{Message, Value};

use crate::error::DispatchError;
use crate::registry::{find_operation, invoke_operation, BeanResolver, ManagedComponent, OperationSignature};

/// Where an operation argument comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentSource {
    Payload,
    /// Value of the named header; a missing header fails the invocation.
    Header(String),
    Literal(Value),
}

/// Invokes `target.operation(...)` for every message.
///
/// Target and operation are resolved once, at construction. Without
/// explicit argument sources the payload is bound by the operation's arity:
/// no arguments, the payload itself, or the elements of an array payload.
#[derive(Clone)]
pub struct OperationInvoker {
    target_name: String,
    target: Arc<dyn ManagedComponent>,
    operation: OperationSignature,
    arguments: Option<Vec<ArgumentSource>>,
}

impl OperationInvoker {
    /// Resolves the target component and operation.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Invocation`] if the component or the
    /// operation does not exist.
    pub fn new(
        resolver: &dyn BeanResolver,
        target: &str,
        operation: &str,
    ) -> Result<Self, DispatchError> {
        let invocation_error = |reason: String| DispatchError::Invocation {
            target: target.to_string(),
            operation: operation.to_string(),
            reason,
        };
        let component = resolver
            .resolve(target)
            .map_err(|e| invocation_error(e.to_string()))?;
        let signature = find_operation(component.as_ref(), operation)
            .ok_or_else(|| invocation_error(format!("'{target}' has no operation '{operation}'")))?;
        Ok(Self {
            target_name: target.to_string(),
            target: component,
            operation: signature,
            arguments: None,
        })
    }

    /// Binds arguments from explicit sources instead of the payload.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Invocation`] if the number of sources does
    /// not match the operation's arity.
    pub fn with_arguments(mut self, arguments: Vec<ArgumentSource>) -> Result<Self, DispatchError> {
        if arguments.len() != self.operation.arity() {
            return Err(self.invocation_error(format!(
                "{} argument source(s) configured for {}",
                arguments.len(),
                self.operation
            )));
        }
        self.arguments = Some(arguments);
        Ok(self)
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target_name
    }

    #[must_use]
    pub fn operation(&self) -> &OperationSignature {
        &self.operation
    }

    /// Invokes the operation with arguments taken from `message`.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Invocation`] when arguments cannot be bound,
    /// [`DispatchError::TargetInvocation`] when the operation itself fails.
    pub async fn process(&self, message: &Message) -> Result<Option<Value>, DispatchError> {
        let args = self.collect_arguments(message)?;
        let args = self
            .operation
            .bind(args)
            .map_err(|e| self.invocation_error(e.to_string()))?;

        tracing::debug!(
            target_component = %self.target_name,
            operation = %self.operation.name,
            message_id = message.id(),
            "invoking operation"
        );

        invoke_operation(self.target.as_ref(), &self.operation.name, args)
            .await
            .map_err(|source| DispatchError::TargetInvocation {
                target: self.target_name.clone(),
                operation: self.operation.name.clone(),
                source,
            })
    }

    fn collect_arguments(&self, message: &Message) -> Result<Vec<Value>, DispatchError> {
        match &self.arguments {
            Some(sources) => sources
                .iter()
                .map(|source| match source {
                    ArgumentSource::Payload => Ok(message.payload().clone()),
                    ArgumentSource::Literal(value) => Ok(value.clone()),
                    ArgumentSource::Header(name) => {
                        message.headers().get(name).cloned().ok_or_else(|| {
                            self.invocation_error(format!("message has no header '{name}'"))
                        })
                    }
                })
                .collect(),
            None => Ok(match (self.operation.arity(), message.payload()) {
                (0, _) => Vec::new(),
                (1, payload) => vec![payload.clone()],
                (_, Value::Array(items)) => items.clone(),
                (_, payload) => vec![payload.clone()],
            }),
        }
    }

    fn invocation_error(&self, reason: String) -> DispatchError {
        DispatchError::Invocation {
            target: self.target_name.clone(),
            operation: self.operation.name.clone(),
            reason,
        }
    }
}

impl std::fmt::Debug for OperationInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationInvoker")
            .field("target", &self.target_name)
            .field("operation", &self.operation)
            .field("arguments", &self.arguments)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use async_trait::async_trait;
    use conduit_core::{MessageBuilder, ValueKind};
    use parking_lot::Mutex;

    use super::*;
    use crate::registry::{ComponentRegistry, ParamType};

    #[derive(Default)]
    struct Ledger {
        entries: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl ManagedComponent for Ledger {
        fn name(&self) -> &str {
            "ledger"
        }

        fn operations(&self) -> Vec<OperationSignature> {
            vec![
                OperationSignature::new("record", [ParamType::Kind(ValueKind::String)]),
                OperationSignature::new(
                    "transfer",
                    [
                        ParamType::Kind(ValueKind::String),
                        ParamType::Kind(ValueKind::Int),
                    ],
                ),
                OperationSignature::new("count", Vec::<ParamType>::new()),
                OperationSignature::new("explode", [ParamType::Any]),
            ]
        }

        async fn invoke(&self, operation: &str, args: Vec<Value>) -> anyhow::Result<Option<Value>> {
            match operation {
                "record" | "transfer" => {
                    self.entries.lock().push(Value::Array(args));
                    Ok(None)
                }
                "count" => Ok(Some(Value::Int(self.entries.lock().len() as i64))),
                "explode" => Err(anyhow::anyhow!("ledger is sealed")),
                other => anyhow::bail!("unknown operation {other}"),
            }
        }
    }

    fn setup() -> (ComponentRegistry, Arc<Ledger>) {
        let registry = ComponentRegistry::new();
        let ledger = registry.register(Ledger::default()).unwrap();
        (registry, ledger)
    }

    #[tokio::test]
    async fn single_parameter_binds_payload_with_coercion() {
        let (registry, ledger) = setup();
        let invoker = OperationInvoker::new(&registry, "ledger", "record").unwrap();

        let result = invoker.process(&Message::new(42)).await.unwrap();

        assert!(result.is_none());
        assert_eq!(
            *ledger.entries.lock(),
            vec![Value::Array(vec![Value::from("42")])]
        );
    }

    #[tokio::test]
    async fn zero_arity_ignores_payload() {
        let (registry, _ledger) = setup();
        let invoker = OperationInvoker::new(&registry, "ledger", "count").unwrap();
        let result = invoker.process(&Message::new("ignored")).await.unwrap();
        assert_eq!(result, Some(Value::Int(0)));
    }

    #[tokio::test]
    async fn array_payload_spreads_over_parameters() {
        let (registry, ledger) = setup();
        let invoker = OperationInvoker::new(&registry, "ledger", "transfer").unwrap();
        let payload = Value::Array(vec![Value::from("alice"), Value::from("15")]);

        invoker.process(&Message::new(payload)).await.unwrap();

        assert_eq!(
            *ledger.entries.lock(),
            vec![Value::Array(vec![Value::from("alice"), Value::Int(15)])]
        );
    }

    #[tokio::test]
    async fn explicit_sources_read_headers_and_literals() {
        let (registry, ledger) = setup();
        let invoker = OperationInvoker::new(&registry, "ledger", "transfer")
            .unwrap()
            .with_arguments(vec![
                ArgumentSource::Header("account".to_string()),
                ArgumentSource::Literal(Value::Int(7)),
            ])
            .unwrap();
        let message = MessageBuilder::with_payload("unused")
            .header("account", "bob")
            .build();

        invoker.process(&message).await.unwrap();

        assert_eq!(
            *ledger.entries.lock(),
            vec![Value::Array(vec![Value::from("bob"), Value::Int(7)])]
        );
    }

    #[tokio::test]
    async fn missing_header_is_invocation_error() {
        let (registry, _ledger) = setup();
        let invoker = OperationInvoker::new(&registry, "ledger", "record")
            .unwrap()
            .with_arguments(vec![ArgumentSource::Header("absent".to_string())])
            .unwrap();
        let err = invoker.process(&Message::new(1)).await.unwrap_err();
        assert!(matches!(err, DispatchError::Invocation { ref reason, .. } if reason.contains("absent")));
    }

    #[test]
    fn wrong_source_count_is_rejected() {
        let (registry, _ledger) = setup();
        let err = OperationInvoker::new(&registry, "ledger", "transfer")
            .unwrap()
            .with_arguments(vec![ArgumentSource::Payload])
            .unwrap_err();
        assert!(matches!(err, DispatchError::Invocation { .. }));
    }

    #[test]
    fn unknown_target_or_operation_fails_at_construction() {
        let (registry, _ledger) = setup();
        assert!(matches!(
            OperationInvoker::new(&registry, "vault", "record"),
            Err(DispatchError::Invocation { ref target, .. }) if target == "vault"
        ));
        assert!(matches!(
            OperationInvoker::new(&registry, "ledger", "burn"),
            Err(DispatchError::Invocation { ref operation, .. }) if operation == "burn"
        ));
    }

    #[tokio::test]
    async fn coercion_failure_is_invocation_error() {
        let (registry, _ledger) = setup();
        let invoker = OperationInvoker::new(&registry, "ledger", "transfer").unwrap();
        let payload = Value::Array(vec![Value::from("alice"), Value::from("lots")]);
        let err = invoker.process(&Message::new(payload)).await.unwrap_err();
        assert!(matches!(err, DispatchError::Invocation { .. }));
    }

    #[tokio::test]
    async fn operation_failure_keeps_original_error() {
        let (registry, _ledger) = setup();
        let invoker = OperationInvoker::new(&registry, "ledger", "explode").unwrap();
        let err = invoker.process(&Message::new(1)).await.unwrap_err();

        assert!(matches!(err, DispatchError::TargetInvocation { .. }));
        assert_eq!(err.source().unwrap().to_string(), "ledger is sealed");
    }

    #[tokio::test]
    async fn lifecycle_operations_are_invocable() {
        let (registry, _ledger) = setup();
        let invoker = OperationInvoker::new(&registry, "ledger", "isRunning").unwrap();
        let result = invoker.process(&Message::new(Value::Null)).await.unwrap();
        assert_eq!(result, Some(Value::Bool(true)));
    }
}
