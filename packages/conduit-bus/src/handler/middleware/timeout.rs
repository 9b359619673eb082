//! Per-invocation deadline for handlers.
//!
//! An invocation running past the endpoint's `handler_timeout` fails with
//! `DispatchError::HandlerTimeout`.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use conduit_core::Message;
use tower::{Layer, Service};

use crate::error::DispatchError;

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer enforcing an optional deadline; `None` passes calls through.
#[derive(Debug, Clone)]
pub struct TimeoutLayer {
    endpoint: String,
    timeout: Option<Duration>,
}

impl TimeoutLayer {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
        }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            endpoint: self.endpoint.clone(),
            timeout: self.timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
    endpoint: String,
    timeout: Option<Duration>,
}

impl<S> Service<Message> for TimeoutService<S>
where
    S: Service<Message, Response = Option<Message>, Error = DispatchError> + Send,
    S::Future: Send + 'static,
{
    type Response = Option<Message>;
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<Option<Message>, DispatchError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, message: Message) -> Self::Future {
        let fut = self.inner.call(message);
        let Some(duration) = self.timeout else {
            return Box::pin(fut);
        };
        let endpoint = self.endpoint.clone();
        Box::pin(async move {
            match tokio::time::timeout(duration, fut).await {
                Ok(result) => result,
                Err(_elapsed) => Err(DispatchError::HandlerTimeout {
                    endpoint,
                    timeout_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                }),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
