//! Control bus handler: evaluates management expressions carried in message
//! payloads, e.g. `@worker.stop()` or `@cache.resize(512)`.

use std::sync::Arc;

use conduit_core::{ControlExpression, Message, Value};

use crate::error::DispatchError;
use crate::registry::{find_operation, invoke_operation, BeanResolver};

#[derive(Clone)]
pub struct ControlBusProcessor {
    resolver: Arc<dyn BeanResolver>,
}

impl ControlBusProcessor {
    #[must_use]
    pub fn new(resolver: Arc<dyn BeanResolver>) -> Self {
        Self { resolver }
    }

    /// Parses the payload as an expression and invokes it.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Evaluation`] for a non-string payload, a syntax
    /// error, an unknown component or operation, or arguments that do not
    /// fit the operation. [`DispatchError::TargetInvocation`] when the
    /// operation itself fails.
    pub async fn process(&self, message: &Message) -> Result<Option<Value>, DispatchError> {
        let Some(source) = message.payload().as_str() else {
            return Err(DispatchError::Evaluation {
                expression: message.payload().to_string(),
                reason: format!(
                    "payload must be a string expression, got {}",
                    message.payload().kind()
                ),
            });
        };
        let evaluation_error = |reason: String| DispatchError::Evaluation {
            expression: source.to_string(),
            reason,
        };

        let expression = ControlExpression::parse(source).map_err(|e| evaluation_error(e.to_string()))?;
        let component = self
            .resolver
            .resolve(&expression.target)
            .map_err(|e| evaluation_error(e.to_string()))?;
        let operation = find_operation(component.as_ref(), &expression.operation).ok_or_else(|| {
            evaluation_error(format!(
                "'{}' has no invocable operation '{}'",
                expression.target, expression.operation
            ))
        })?;
        let args = operation
            .bind(expression.arguments)
            .map_err(|e| evaluation_error(format!("{operation}: {e}")))?;

        tracing::info!(
            target_component = %expression.target,
            operation = %expression.operation,
            message_id = message.id(),
            "evaluating control expression"
        );

        invoke_operation(component.as_ref(), &operation.name, args)
            .await
            .map_err(|source| DispatchError::TargetInvocation {
                target: expression.target,
                operation: operation.name,
                source,
            })
    }
}

impl std::fmt::Debug for ControlBusProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlBusProcessor").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use conduit_core::ValueKind;
    use parking_lot::Mutex;

    use super::*;
    use crate::registry::{ComponentRegistry, ManagedComponent, OperationSignature, ParamType};

    struct Cache {
        running: AtomicBool,
        capacity: Mutex<i64>,
    }

    #[async_trait]
    impl ManagedComponent for Cache {
        fn name(&self) -> &str {
            "cache"
        }

        fn operations(&self) -> Vec<OperationSignature> {
            vec![
                OperationSignature::new("resize", [ParamType::Kind(ValueKind::Int)]),
                OperationSignature::new("label", [ParamType::Kind(ValueKind::String), ParamType::Any]),
                OperationSignature::new("corrupt", Vec::<ParamType>::new()),
            ]
        }

        async fn invoke(&self, operation: &str, args: Vec<Value>) -> anyhow::Result<Option<Value>> {
            match operation {
                "resize" => {
                    let size = args[0].as_i64().unwrap_or_default();
                    *self.capacity.lock() = size;
                    Ok(Some(Value::Int(size)))
                }
                "label" => Ok(Some(Value::Array(args))),
                "corrupt" => anyhow::bail!("checksum mismatch"),
                other => anyhow::bail!("unknown operation {other}"),
            }
        }

        async fn start(&self) -> anyhow::Result<()> {
            self.running.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            self.running.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }
    }

    fn setup() -> (ControlBusProcessor, Arc<Cache>) {
        let registry = Arc::new(ComponentRegistry::new());
        let cache = registry
            .register(Cache {
                running: AtomicBool::new(true),
                capacity: Mutex::new(0),
            })
            .unwrap();
        (ControlBusProcessor::new(registry), cache)
    }

    async fn eval(processor: &ControlBusProcessor, expr: &str) -> Result<Option<Value>, DispatchError> {
        processor.process(&Message::new(expr)).await
    }

    #[tokio::test]
    async fn lifecycle_expressions_drive_component() {
        let (processor, cache) = setup();

        assert_eq!(eval(&processor, "@cache.stop()").await.unwrap(), None);
        assert!(!cache.is_running());
        assert_eq!(
            eval(&processor, "@cache.isRunning()").await.unwrap(),
            Some(Value::Bool(false))
        );
        eval(&processor, "cache.start()").await.unwrap();
        assert!(cache.is_running());
    }

    #[tokio::test]
    async fn declared_operation_with_coerced_argument() {
        let (processor, cache) = setup();
        let result = eval(&processor, "@cache.resize('256')").await.unwrap();
        assert_eq!(result, Some(Value::Int(256)));
        assert_eq!(*cache.capacity.lock(), 256);
    }

    #[tokio::test]
    async fn mixed_literal_arguments() {
        let (processor, _cache) = setup();
        let result = eval(&processor, r#"@cache.label("a, b", null)"#).await.unwrap();
        assert_eq!(
            result,
            Some(Value::Array(vec![Value::from("a, b"), Value::Null]))
        );
    }

    #[tokio::test]
    async fn evaluation_failures() {
        let (processor, _cache) = setup();
        for expr in [
            "not an expression",
            "@ghost.stop()",
            "@cache.explode()",
            "@cache.resize()",
            "@cache.resize('big')",
            "@cache.stop(1)",
        ] {
            let err = eval(&processor, expr).await.unwrap_err();
            assert!(
                matches!(err, DispatchError::Evaluation { .. }),
                "{expr}: unexpected {err}"
            );
        }
    }

    #[tokio::test]
    async fn non_string_payload_is_evaluation_error() {
        let (processor, _cache) = setup();
        let err = processor.process(&Message::new(5)).await.unwrap_err();
        assert!(matches!(err, DispatchError::Evaluation { ref reason, .. } if reason.contains("int")));
    }

    #[tokio::test]
    async fn operation_failure_is_target_invocation() {
        let (processor, _cache) = setup();
        let err = eval(&processor, "@cache.corrupt()").await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::TargetInvocation { ref target, ref operation, .. }
                if target == "cache" && operation == "corrupt"
        ));
    }
}
