//! Load-shedding middleware for handlers.
//!
//! Rejects invocations with `DispatchError::Overloaded` once the endpoint's
//! `max_concurrent` invocations are already running.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use conduit_core::Message;
use tokio::sync::Semaphore;
use tower::{Layer, Service};

use crate::error::DispatchError;

// ---------------------------------------------------------------------------
// LoadShedLayer
// ---------------------------------------------------------------------------

/// Tower layer limiting concurrent invocations via a semaphore.
///
/// Excess invocations are rejected immediately rather than queued. A limit
/// of `None` disables shedding.
#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    endpoint: String,
    semaphore: Option<Arc<Semaphore>>,
}

impl LoadShedLayer {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, max_concurrent: Option<u32>) -> Self {
        Self {
            endpoint: endpoint.into(),
            semaphore: max_concurrent.map(|max| Arc::new(Semaphore::new(max as usize))),
        }
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            endpoint: self.endpoint.clone(),
            semaphore: self.semaphore.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// LoadShedService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    endpoint: String,
    semaphore: Option<Arc<Semaphore>>,
}

impl<S> Service<Message> for LoadShedService<S>
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
        let Some(semaphore) = &self.semaphore else {
            return Box::pin(self.inner.call(message));
        };
        let Ok(permit) = semaphore.clone().try_acquire_owned() else {
            tracing::warn!(endpoint = %self.endpoint, message_id = message.id(), "shedding invocation");
            let endpoint = self.endpoint.clone();
            return Box::pin(async move { Err(DispatchError::Overloaded { endpoint }) });
        };

        let fut = self.inner.call(message);
        Box::pin(async move {
            let result = fut.await;
            drop(permit);
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
