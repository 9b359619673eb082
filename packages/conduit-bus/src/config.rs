use std::time::Duration;

use serde::Deserialize;

use crate::channel::Timeout;

/// Bus-wide defaults applied when wiring channels, endpoints and gateways.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Maximum synchronous dispatch depth before a send fails as cyclic.
    pub max_dispatch_depth: usize,
    /// Send timeout for endpoint replies when none is configured.
    /// Negative waits indefinitely, zero fails fast.
    pub default_send_timeout_ms: i64,
    /// How long gateways wait for a reply.
    pub default_reply_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_dispatch_depth: 32,
            default_send_timeout_ms: 1_000,
            default_reply_timeout_ms: 5_000,
        }
    }
}

/// What an endpoint does with in-flight invocations when stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopPolicy {
    /// Wait for in-flight invocations to finish, up to `timeout`.
    Drain { timeout: Duration },
    /// Stop accepting messages and return without waiting.
    Immediate,
}

/// Per-endpoint configuration.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Timeout used when sending replies to the output channel.
    pub send_timeout: Timeout,
    /// Invocation order among subscribers of the same channel (ascending).
    pub order: i32,
    pub stop_policy: StopPolicy,
    /// Deadline for a single handler invocation. `None` disables it.
    pub handler_timeout: Option<Duration>,
    /// Maximum concurrent handler invocations before rejecting with
    /// `Overloaded`. `None` disables the limit.
    pub max_concurrent: Option<u32>,
    /// Wait applied to each receive when polling a queue channel input.
    pub poll_interval: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            send_timeout: Timeout::from_millis(BusConfig::default().default_send_timeout_ms),
            order: 0,
            stop_policy: StopPolicy::Drain {
                timeout: Duration::from_secs(5),
            },
            handler_timeout: None,
            max_concurrent: None,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Per-gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Timeout applied when sending the request.
    pub send_timeout: Timeout,
    /// How long `request` waits for the reply.
    pub reply_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let bus = BusConfig::default();
        Self {
            send_timeout: Timeout::from_millis(bus.default_send_timeout_ms),
            reply_timeout: Duration::from_millis(bus.default_reply_timeout_ms),
        }
    }
}
