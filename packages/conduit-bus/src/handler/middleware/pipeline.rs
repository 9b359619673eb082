//! Pipeline composition: wraps a handler in the middleware stack.

use std::sync::Arc;

use conduit_core::Message;
use tower::util::BoxCloneService;
use tower::ServiceBuilder;

use super::load_shed::LoadShedLayer;
use super::metrics::MetricsLayer;
use super::timeout::TimeoutLayer;
use crate::config::EndpointConfig;
use crate::error::DispatchError;
use crate::handler::{Handler, HandlerService};

/// Type-erased handler pipeline owned by an endpoint.
pub type HandlerPipeline = BoxCloneService<Message, Option<Message>, DispatchError>;

/// Builds the handler pipeline for one endpoint.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` -- reject when overloaded, before doing any work
/// 2. `TimeoutLayer` -- enforce the per-invocation deadline
/// 3. `MetricsLayer` -- record timing and outcome closest to the handler
#[must_use]
pub fn build_handler_pipeline(
    endpoint_id: &str,
    handler: Arc<Handler>,
    config: &EndpointConfig,
) -> HandlerPipeline {
    let service = ServiceBuilder::new()
        .layer(LoadShedLayer::new(endpoint_id, config.max_concurrent))
        .layer(TimeoutLayer::new(endpoint_id, config.handler_timeout))
        .layer(MetricsLayer::new(endpoint_id))
        .service(HandlerService::new(handler));
    BoxCloneService::new(service)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
