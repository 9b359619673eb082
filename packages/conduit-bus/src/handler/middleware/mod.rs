//! Tower middleware layers for the handler pipeline.
//!
//! - [`timeout`]: per-invocation deadline
//! - [`metrics`]: invocation timing via `tracing` spans and `metrics` counters
//! - [`load_shed`]: semaphore-based concurrency limiting
//! - [`pipeline`]: composes all layers around a [`Handler`](super::Handler)

pub mod load_shed;
pub mod metrics;
pub mod pipeline;
pub mod timeout;

pub use load_shed::LoadShedLayer;
pub use metrics::MetricsLayer;
pub use pipeline::{build_handler_pipeline, HandlerPipeline};
pub use timeout::TimeoutLayer;

#[cfg(test)]
pub(crate) mod test_support {
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use conduit_core::Message;
    use tower::Service;

    use crate::error::DispatchError;

    /// Echoes the request back after a delay.
    #[derive(Clone)]
    pub(crate) struct SlowService {
        pub(crate) delay_ms: u64,
    }

    impl Service<Message> for SlowService {
        type Response = Option<Message>;
        type Error = DispatchError;
        type Future = Pin<Box<dyn Future<Output = Result<Option<Message>, DispatchError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, message: Message) -> Self::Future {
            let delay = self.delay_ms;
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(Some(message))
            })
        }
    }
}
