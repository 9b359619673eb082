//! Instrumentation middleware for handlers.
//!
//! Each invocation runs inside an `invocation` span that records its
//! duration and outcome, and feeds the `metrics` facade:
//! `conduit_handler_invocations_total{endpoint, outcome}` and
//! `conduit_handler_duration_seconds{endpoint}`.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use conduit_core::Message;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::error::DispatchError;

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsLayer {
    endpoint: String,
}

impl MetricsLayer {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            endpoint: self.endpoint.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
    endpoint: String,
}

fn outcome_label(result: &Result<Option<Message>, DispatchError>) -> &'static str {
    match result {
        Ok(Some(_)) => "reply",
        Ok(None) => "no_reply",
        Err(_) => "error",
    }
}

impl<S> Service<Message> for MetricsService<S>
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
        let span = info_span!(
            "invocation",
            endpoint = %self.endpoint,
            message_id = message.id(),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );
        let endpoint = self.endpoint.clone();
        let fut = self.inner.call(message);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();
                let outcome = outcome_label(&result);

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                metrics::counter!(
                    "conduit_handler_invocations_total",
                    "endpoint" => endpoint.clone(),
                    "outcome" => outcome
                )
                .increment(1);
                metrics::histogram!("conduit_handler_duration_seconds", "endpoint" => endpoint)
                    .record(elapsed.as_secs_f64());

                match &result {
                    Ok(_) => tracing::debug!(duration_ms, outcome, "invocation complete"),
                    Err(err) => tracing::debug!(duration_ms, error = %err, "invocation failed"),
                }

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
