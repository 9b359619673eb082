//! Message handlers: what an endpoint does with each message it consumes.
//!
//! - [`OperationInvoker`]: calls a fixed operation on a managed component
//! - [`ControlBusProcessor`]: evaluates `@component.operation(...)` expressions
//! - any [`MessageProcessor`] supplied by the application
//!
//! Handlers run inside the tower stack built by
//! [`middleware::build_handler_pipeline`].

pub mod control_bus;
pub mod middleware;
pub mod operation;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use conduit_core::{Message, MessageBuilder, Value};
use tower::Service;

use crate::error::DispatchError;

pub use control_bus::ControlBusProcessor;
pub use operation::{ArgumentSource, OperationInvoker};

// ---------------------------------------------------------------------------
// MessageProcessor
// ---------------------------------------------------------------------------

/// Turns a request message into an optional reply payload.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// `Ok(None)` means the request produces no reply.
    async fn process(&self, message: &Message) -> Result<Option<Value>, DispatchError>;
}

struct FnProcessor<F>(F);

#[async_trait]
impl<F, Fut> MessageProcessor for FnProcessor<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Value>, DispatchError>> + Send + 'static,
{
    async fn process(&self, message: &Message) -> Result<Option<Value>, DispatchError> {
        (self.0)(message.clone()).await
    }
}

/// Wraps an async closure as a [`MessageProcessor`].
pub fn processor_fn<F, Fut>(f: F) -> Arc<dyn MessageProcessor>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Value>, DispatchError>> + Send + 'static,
{
    Arc::new(FnProcessor(f))
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// The handler bound to an endpoint.
#[derive(Clone)]
pub enum Handler {
    Operation(OperationInvoker),
    ControlBus(ControlBusProcessor),
    Custom(Arc<dyn MessageProcessor>),
}

impl Handler {
    /// Processes `request` and wraps any result in a reply message carrying
    /// the request's non-reserved headers.
    ///
    /// # Errors
    ///
    /// Propagates the variant's failure.
    pub async fn handle(&self, request: &Message) -> Result<Option<Message>, DispatchError> {
        let result = match self {
            Handler::Operation(invoker) => invoker.process(request).await?,
            Handler::ControlBus(processor) => processor.process(request).await?,
            Handler::Custom(processor) => processor.process(request).await?,
        };
        Ok(result.map(|payload| {
            MessageBuilder::with_payload(payload)
                .copy_headers(request.headers())
                .build()
        }))
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Handler::Operation(_) => "operation",
            Handler::ControlBus(_) => "control-bus",
            Handler::Custom(_) => "custom",
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Handler").field(&self.kind()).finish()
    }
}

// ---------------------------------------------------------------------------
// HandlerService
// ---------------------------------------------------------------------------

/// Innermost service of the handler pipeline.
#[derive(Debug, Clone)]
pub struct HandlerService {
    handler: Arc<Handler>,
}

impl HandlerService {
    #[must_use]
    pub fn new(handler: Arc<Handler>) -> Self {
        Self { handler }
    }
}

impl Service<Message> for HandlerService {
    type Response = Option<Message>;
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<Option<Message>, DispatchError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, message: Message) -> Self::Future {
        let handler = Arc::clone(&self.handler);
        Box::pin(async move { handler.handle(&message).await })
    }
}

#[cfg(test)]
mod tests {
    use tower::ServiceExt;

    use super::*;

    #[tokio::test]
    async fn reply_copies_request_headers() {
        let handler = Handler::Custom(processor_fn(|m: Message| async move {
            Ok(Some(Value::String(format!("echo {}", m.payload()))))
        }));
        let request = MessageBuilder::with_payload("hi")
            .correlation_id("c-9")
            .reply_channel("replies")
            .header("tenant", "acme")
            .build();

        let reply = handler.handle(&request).await.unwrap().unwrap();

        assert_eq!(reply.payload(), &Value::from("echo \"hi\""));
        assert_eq!(reply.headers().correlation_id(), Some("c-9"));
        assert_eq!(reply.headers().reply_channel(), Some("replies"));
        assert_eq!(reply.headers().get_str("tenant"), Some("acme"));
        assert_ne!(reply.id(), request.id());
    }

    #[tokio::test]
    async fn no_result_means_no_reply() {
        let handler = Handler::Custom(processor_fn(|_m: Message| async { Ok(None) }));
        assert!(handler.handle(&Message::new(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn handler_service_delegates() {
        let handler = Arc::new(Handler::Custom(processor_fn(|m: Message| async move {
            Ok(Some(m.into_payload()))
        })));
        let reply = HandlerService::new(handler)
            .oneshot(Message::new(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.payload(), &Value::Int(5));
    }

    #[tokio::test]
    async fn custom_failure_propagates() {
        let handler = Handler::Custom(processor_fn(|_m: Message| async {
            Err(DispatchError::Internal(anyhow::anyhow!("boom")))
        }));
        let err = handler.handle(&Message::new(1)).await.unwrap_err();
        assert!(matches!(err, DispatchError::Internal(_)));
    }
}
