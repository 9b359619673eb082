//! Declarative bus wiring.
//!
//! A [`BusDefinition`] (usually JSON) names the channels, control buses and
//! operation invokers of a bus. [`Wiring::build`] validates it against the
//! component registry and produces a stopped [`MessageBus`].
//!
//! ```json
//! {
//!   "bus": { "default_send_timeout_ms": 500 },
//!   "channels": [
//!     { "name": "control", "kind": "direct" },
//!     { "name": "jobs", "kind": "queue", "capacity": 64, "overflow": "reject" },
//!     { "name": "events", "kind": "publish-subscribe", "fan_out": "fail-fast" }
//!   ],
//!   "control_buses": [
//!     { "id": "controlBus", "input_channel": "control", "order": 1 }
//!   ],
//!   "operation_invokers": [
//!     {
//!       "id": "recorder",
//!       "input_channel": "events",
//!       "target": "ledger",
//!       "operation": "record",
//!       "arguments": [{ "source": "header", "name": "account" }, { "source": "payload" }]
//!     }
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::channel::{
    ChannelRef, ChannelRegistry, DirectChannel, FanOutPolicy, MessageChannel, OverflowPolicy,
    PublishSubscribeChannel, PublishSubscribeOptions, QueueChannel, Timeout,
};
use crate::config::{BusConfig, EndpointConfig, GatewayConfig, StopPolicy};
use crate::endpoint::{ConsumerEndpoint, InputChannel};
use crate::error::DispatchError;
use crate::gateway::MessagingGateway;
use crate::handler::{ArgumentSource, ControlBusProcessor, Handler, OperationInvoker};
use crate::registry::{BeanResolver, ComponentRegistry, RegistryError};

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BusDefinition {
    pub bus: BusConfig,
    pub channels: Vec<ChannelDefinition>,
    pub control_buses: Vec<ControlBusDefinition>,
    pub operation_invokers: Vec<OperationInvokerDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelDefinition {
    pub name: String,
    #[serde(flatten)]
    pub kind: ChannelKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ChannelKind {
    Queue {
        capacity: usize,
        #[serde(default)]
        overflow: OverflowPolicy,
    },
    PublishSubscribe {
        #[serde(default)]
        fan_out: FanOutPolicy,
        #[serde(default)]
        apply_sequence: bool,
    },
    Direct,
}

/// Options shared by every endpoint definition. Unset values fall back to
/// the bus defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EndpointOptions {
    pub send_timeout_ms: Option<i64>,
    pub order: Option<i32>,
    pub handler_timeout_ms: Option<u64>,
    pub max_concurrent: Option<u32>,
    pub stop_policy: Option<StopPolicyDefinition>,
}

/// `{ "policy": "drain", "timeout_ms": 2000 }` or `{ "policy": "immediate" }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum StopPolicyDefinition {
    Drain { timeout_ms: u64 },
    Immediate,
}

impl From<StopPolicyDefinition> for StopPolicy {
    fn from(definition: StopPolicyDefinition) -> Self {
        match definition {
            StopPolicyDefinition::Drain { timeout_ms } => StopPolicy::Drain {
                timeout: Duration::from_millis(timeout_ms),
            },
            StopPolicyDefinition::Immediate => StopPolicy::Immediate,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlBusDefinition {
    pub id: String,
    pub input_channel: String,
    #[serde(default)]
    pub output_channel: Option<String>,
    /// Name of a resolver passed to [`Wiring::with_bean_resolver`]; the
    /// component registry when unset.
    #[serde(default)]
    pub bean_resolver: Option<String>,
    #[serde(flatten)]
    pub options: EndpointOptions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperationInvokerDefinition {
    pub id: String,
    pub input_channel: String,
    #[serde(default)]
    pub output_channel: Option<String>,
    pub target: String,
    pub operation: String,
    #[serde(default)]
    pub arguments: Option<Vec<ArgumentDefinition>>,
    #[serde(flatten)]
    pub options: EndpointOptions,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "source", rename_all = "kebab-case")]
pub enum ArgumentDefinition {
    Payload,
    Header { name: String },
    Literal { value: serde_json::Value },
}

impl From<ArgumentDefinition> for ArgumentSource {
    fn from(definition: ArgumentDefinition) -> Self {
        match definition {
            ArgumentDefinition::Payload => ArgumentSource::Payload,
            ArgumentDefinition::Header { name } => ArgumentSource::Header(name),
            ArgumentDefinition::Literal { value } => ArgumentSource::Literal(value.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// WiringError
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum WiringError {
    #[error("cannot read wiring file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid wiring definition: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("channel '{name}' is defined more than once")]
    DuplicateChannel { name: String },
    #[error("channel '{name}' is invalid: {reason}")]
    InvalidChannel { name: String, reason: String },
    #[error("'{owner}' refers to unknown channel '{channel}'")]
    UnknownChannel { owner: String, channel: String },
    #[error("endpoint '{endpoint}' is invalid: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("endpoint '{endpoint}' cannot consume from channel '{channel}'")]
    NotConsumable { endpoint: String, channel: String },
    #[error("control bus '{endpoint}' refers to unknown bean resolver '{resolver}'")]
    UnknownBeanResolver { endpoint: String, resolver: String },
    #[error("endpoint '{endpoint}' cannot be wired: {source}")]
    Handler {
        endpoint: String,
        #[source]
        source: DispatchError,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Builds a [`MessageBus`] from a definition and the application's components.
pub struct Wiring {
    definition: BusDefinition,
    components: Arc<ComponentRegistry>,
    resolvers: HashMap<String, Arc<dyn BeanResolver>>,
}

impl Wiring {
    #[must_use]
    pub fn new(definition: BusDefinition) -> Self {
        Self {
            definition,
            components: Arc::new(ComponentRegistry::new()),
            resolvers: HashMap::new(),
        }
    }

    /// # Errors
    ///
    /// Returns [`WiringError::Parse`] for malformed JSON.
    pub fn from_json(json: &str) -> Result<Self, WiringError> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    /// # Errors
    ///
    /// Returns [`WiringError::Io`] if the file cannot be read and
    /// [`WiringError::Parse`] for malformed JSON.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, WiringError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| WiringError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Uses an existing component registry. Operation invoker targets must be
    /// registered in it before [`build`](Self::build).
    #[must_use]
    pub fn with_components(mut self, components: Arc<ComponentRegistry>) -> Self {
        self.components = components;
        self
    }

    /// Makes a resolver available to control buses under `name`.
    #[must_use]
    pub fn with_bean_resolver(mut self, name: impl Into<String>, resolver: Arc<dyn BeanResolver>) -> Self {
        self.resolvers.insert(name.into(), resolver);
        self
    }

    #[must_use]
    pub fn definition(&self) -> &BusDefinition {
        &self.definition
    }

    /// Validates the definition and builds the bus. Endpoints are registered
    /// as components (by id) and left stopped.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn build(self) -> Result<MessageBus, WiringError> {
        let bus = self.definition.bus.clone();
        let channels = Arc::new(ChannelRegistry::new());
        for definition in &self.definition.channels {
            let channel = build_channel(definition, &bus)?;
            if !channels.register(channel) {
                return Err(WiringError::DuplicateChannel {
                    name: definition.name.clone(),
                });
            }
        }

        let mut endpoints = Vec::new();

        for definition in &self.definition.control_buses {
            let resolver: Arc<dyn BeanResolver> = match &definition.bean_resolver {
                Some(name) => self.resolvers.get(name).cloned().ok_or_else(|| {
                    WiringError::UnknownBeanResolver {
                        endpoint: definition.id.clone(),
                        resolver: name.clone(),
                    }
                })?,
                None => Arc::clone(&self.components) as Arc<dyn BeanResolver>,
            };
            let handler = Handler::ControlBus(ControlBusProcessor::new(resolver));
            let endpoint = self.build_endpoint(
                &channels,
                &bus,
                EndpointParts {
                    id: &definition.id,
                    input: &definition.input_channel,
                    output: definition.output_channel.as_deref(),
                    options: &definition.options,
                },
                handler,
            )?;
            endpoints.push(endpoint);
        }

        for definition in &self.definition.operation_invokers {
            let handler_error = |source| WiringError::Handler {
                endpoint: definition.id.clone(),
                source,
            };
            let mut invoker = OperationInvoker::new(
                self.components.as_ref(),
                &definition.target,
                &definition.operation,
            )
            .map_err(handler_error)?;
            if let Some(arguments) = &definition.arguments {
                invoker = invoker
                    .with_arguments(arguments.iter().cloned().map(ArgumentSource::from).collect())
                    .map_err(handler_error)?;
            }
            let endpoint = self.build_endpoint(
                &channels,
                &bus,
                EndpointParts {
                    id: &definition.id,
                    input: &definition.input_channel,
                    output: definition.output_channel.as_deref(),
                    options: &definition.options,
                },
                Handler::Operation(invoker),
            )?;
            endpoints.push(endpoint);
        }

        tracing::debug!(
            channels = channels.len(),
            endpoints = endpoints.len(),
            "bus wired"
        );

        Ok(MessageBus {
            config: bus,
            channels,
            components: self.components,
            endpoints,
        })
    }

    fn build_endpoint(
        &self,
        channels: &Arc<ChannelRegistry>,
        bus: &BusConfig,
        parts: EndpointParts<'_>,
        handler: Handler,
    ) -> Result<Arc<ConsumerEndpoint>, WiringError> {
        let unknown = |channel: &str| WiringError::UnknownChannel {
            owner: parts.id.to_string(),
            channel: channel.to_string(),
        };
        let input_ref = channels.get(parts.input).ok_or_else(|| unknown(parts.input))?;
        let input = InputChannel::from_ref(&input_ref).ok_or_else(|| WiringError::NotConsumable {
            endpoint: parts.id.to_string(),
            channel: parts.input.to_string(),
        })?;

        let mut builder = ConsumerEndpoint::builder(parts.id, input, handler)
            .channels(Arc::clone(channels))
            .config(endpoint_config(parts.id, parts.options, bus)?);
        if let Some(output) = parts.output {
            builder = builder.output(channels.resolve(output).ok_or_else(|| unknown(output))?);
        }
        let endpoint = builder.build();
        self.components.register_arc(Arc::clone(&endpoint))?;
        Ok(endpoint)
    }
}

struct EndpointParts<'a> {
    id: &'a str,
    input: &'a str,
    output: Option<&'a str>,
    options: &'a EndpointOptions,
}

fn build_channel(definition: &ChannelDefinition, bus: &BusConfig) -> Result<ChannelRef, WiringError> {
    let name = definition.name.clone();
    if name.trim().is_empty() {
        return Err(WiringError::InvalidChannel {
            name,
            reason: "name must not be empty".to_string(),
        });
    }
    let channel = match definition.kind {
        ChannelKind::Queue { capacity: 0, .. } => {
            return Err(WiringError::InvalidChannel {
                name,
                reason: "queue capacity must be at least 1".to_string(),
            });
        }
        ChannelKind::Queue { capacity, overflow } => {
            ChannelRef::Queue(Arc::new(QueueChannel::new(name, capacity).with_overflow(overflow)))
        }
        ChannelKind::PublishSubscribe {
            fan_out,
            apply_sequence,
        } => ChannelRef::PublishSubscribe(Arc::new(PublishSubscribeChannel::with_options(
            name,
            PublishSubscribeOptions {
                fan_out,
                apply_sequence,
                max_dispatch_depth: bus.max_dispatch_depth,
            },
        ))),
        ChannelKind::Direct => ChannelRef::Direct(Arc::new(
            DirectChannel::new(name).with_max_dispatch_depth(bus.max_dispatch_depth),
        )),
    };
    Ok(channel)
}

fn endpoint_config(
    endpoint: &str,
    options: &EndpointOptions,
    bus: &BusConfig,
) -> Result<EndpointConfig, WiringError> {
    let invalid = |reason: &str| WiringError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    };
    if options.max_concurrent == Some(0) {
        return Err(invalid("max_concurrent must be at least 1"));
    }
    if options.handler_timeout_ms == Some(0) {
        return Err(invalid("handler_timeout_ms must be at least 1"));
    }
    let defaults = EndpointConfig::default();
    Ok(EndpointConfig {
        send_timeout: Timeout::from_millis(options.send_timeout_ms.unwrap_or(bus.default_send_timeout_ms)),
        order: options.order.unwrap_or_default(),
        stop_policy: options.stop_policy.map_or(defaults.stop_policy, StopPolicy::from),
        handler_timeout: options.handler_timeout_ms.map(Duration::from_millis),
        max_concurrent: options.max_concurrent,
        ..defaults
    })
}

// ---------------------------------------------------------------------------
// MessageBus
// ---------------------------------------------------------------------------

/// A wired set of channels and endpoints.
pub struct MessageBus {
    config: BusConfig,
    channels: Arc<ChannelRegistry>,
    components: Arc<ComponentRegistry>,
    endpoints: Vec<Arc<ConsumerEndpoint>>,
}

impl MessageBus {
    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    #[must_use]
    pub fn channels(&self) -> &Arc<ChannelRegistry> {
        &self.channels
    }

    #[must_use]
    pub fn components(&self) -> &Arc<ComponentRegistry> {
        &self.components
    }

    #[must_use]
    pub fn channel(&self, name: &str) -> Option<Arc<dyn MessageChannel>> {
        self.channels.resolve(name)
    }

    #[must_use]
    pub fn endpoint(&self, id: &str) -> Option<Arc<ConsumerEndpoint>> {
        self.endpoints.iter().find(|e| e.id() == id).cloned()
    }

    #[must_use]
    pub fn endpoints(&self) -> &[Arc<ConsumerEndpoint>] {
        &self.endpoints
    }

    /// Starts every endpoint in definition order.
    ///
    /// # Errors
    ///
    /// Returns the first endpoint that fails to start.
    pub async fn start(&self) -> Result<(), DispatchError> {
        for endpoint in &self.endpoints {
            endpoint.start().await?;
        }
        tracing::info!(endpoints = self.endpoints.len(), "bus started");
        Ok(())
    }

    /// Stops every endpoint in reverse definition order.
    pub async fn stop(&self) {
        for endpoint in self.endpoints.iter().rev() {
            endpoint.stop().await;
        }
        tracing::info!("bus stopped");
    }

    /// Creates a gateway sending to `request_channel`, using the bus timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`WiringError::UnknownChannel`] if the channel is not registered.
    pub fn gateway(&self, request_channel: &str) -> Result<MessagingGateway, WiringError> {
        let channel = self
            .channels
            .resolve(request_channel)
            .ok_or_else(|| WiringError::UnknownChannel {
                owner: "gateway".to_string(),
                channel: request_channel.to_string(),
            })?;
        let config = GatewayConfig {
            send_timeout: Timeout::from_millis(self.config.default_send_timeout_ms),
            reply_timeout: Duration::from_millis(self.config.default_reply_timeout_ms),
        };
        Ok(MessagingGateway::new(channel, Arc::clone(&self.channels)).with_config(config))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use conduit_core::{Value, ValueKind};

    use super::*;
    use crate::endpoint::LifecycleState;
    use crate::registry::{ManagedComponent, OperationSignature, ParamType};

    struct Counter;

    #[async_trait]
    impl ManagedComponent for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn operations(&self) -> Vec<OperationSignature> {
            vec![OperationSignature::new("add", [ParamType::Kind(ValueKind::Int), ParamType::Kind(ValueKind::Int)])]
        }

        async fn invoke(&self, _operation: &str, args: Vec<Value>) -> anyhow::Result<Option<Value>> {
            let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
            Ok(Some(Value::Int(sum)))
        }
    }

    fn components() -> Arc<ComponentRegistry> {
        let registry = Arc::new(ComponentRegistry::new());
        registry.register(Counter).unwrap();
        registry
    }

    const FULL: &str = r#"{
        "bus": { "default_send_timeout_ms": 250, "default_reply_timeout_ms": 1000 },
        "channels": [
            { "name": "control", "kind": "direct" },
            { "name": "sums", "kind": "queue", "capacity": 8, "overflow": "reject" },
            { "name": "events", "kind": "publish-subscribe", "fan_out": "fail-fast", "apply_sequence": true }
        ],
        "control_buses": [
            { "id": "controlBus", "input_channel": "control", "order": 3 }
        ],
        "operation_invokers": [
            {
                "id": "adder",
                "input_channel": "events",
                "output_channel": "sums",
                "target": "counter",
                "operation": "add",
                "arguments": [
                    { "source": "payload" },
                    { "source": "literal", "value": 100 }
                ],
                "send_timeout_ms": 0
            }
        ]
    }"#;

    #[test]
    fn parses_full_definition() {
        let wiring = Wiring::from_json(FULL).unwrap();
        let definition = wiring.definition();
        assert_eq!(definition.bus.default_send_timeout_ms, 250);
        assert_eq!(definition.bus.max_dispatch_depth, 32);
        assert_eq!(definition.channels.len(), 3);
        assert_eq!(
            definition.channels[1].kind,
            ChannelKind::Queue {
                capacity: 8,
                overflow: OverflowPolicy::Reject
            }
        );
        assert_eq!(
            definition.channels[2].kind,
            ChannelKind::PublishSubscribe {
                fan_out: FanOutPolicy::FailFast,
                apply_sequence: true
            }
        );
        assert_eq!(definition.control_buses[0].options.order, Some(3));
        assert_eq!(
            definition.operation_invokers[0].arguments.as_ref().unwrap()[1],
            ArgumentDefinition::Literal {
                value: serde_json::json!(100)
            }
        );
    }

    #[tokio::test]
    async fn builds_and_runs_full_definition() {
        let bus = Wiring::from_json(FULL)
            .unwrap()
            .with_components(components())
            .build()
            .unwrap();

        let adder = bus.endpoint("adder").unwrap();
        assert_eq!(adder.config().send_timeout, Timeout::Immediate);
        assert_eq!(bus.endpoint("controlBus").unwrap().config().send_timeout, Timeout::After(Duration::from_millis(250)));
        assert!(bus.components().resolve("adder").is_ok());

        bus.start().await.unwrap();
        assert_eq!(adder.state(), LifecycleState::Running);

        bus.channel("events")
            .unwrap()
            .send(conduit_core::Message::new(5), Timeout::Immediate)
            .await
            .unwrap();
        let ChannelRef::Queue(sums) = bus.channels().get("sums").unwrap() else {
            panic!("sums should be a queue");
        };
        let reply = crate::channel::PollableChannel::receive(sums.as_ref(), Timeout::Immediate)
            .await
            .unwrap();
        assert_eq!(reply.payload(), &Value::Int(105));

        bus.stop().await;
        assert_eq!(adder.state(), LifecycleState::Stopped);
    }

    fn build_err(json: &str) -> WiringError {
        match Wiring::from_json(json).unwrap().with_components(components()).build() {
            Ok(_) => panic!("expected wiring to fail"),
            Err(err) => err,
        }
    }

    #[test]
    fn duplicate_channel_is_rejected() {
        let err = build_err(
            r#"{ "channels": [ { "name": "a", "kind": "direct" }, { "name": "a", "kind": "direct" } ] }"#,
        );
        assert!(matches!(err, WiringError::DuplicateChannel { ref name } if name == "a"));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = build_err(r#"{ "channels": [ { "name": "q", "kind": "queue", "capacity": 0 } ] }"#);
        assert!(matches!(err, WiringError::InvalidChannel { ref name, .. } if name == "q"));
    }

    #[test]
    fn unknown_input_channel_is_rejected() {
        let err = build_err(r#"{ "control_buses": [ { "id": "cb", "input_channel": "nowhere" } ] }"#);
        assert!(matches!(err, WiringError::UnknownChannel { ref channel, .. } if channel == "nowhere"));
    }

    #[test]
    fn unknown_output_channel_is_rejected() {
        let err = build_err(
            r#"{
                "channels": [ { "name": "in", "kind": "direct" } ],
                "control_buses": [ { "id": "cb", "input_channel": "in", "output_channel": "out" } ]
            }"#,
        );
        assert!(matches!(err, WiringError::UnknownChannel { ref channel, .. } if channel == "out"));
    }

    #[test]
    fn unknown_bean_resolver_is_rejected() {
        let err = build_err(
            r#"{
                "channels": [ { "name": "in", "kind": "direct" } ],
                "control_buses": [ { "id": "cb", "input_channel": "in", "bean_resolver": "jndi" } ]
            }"#,
        );
        assert!(matches!(err, WiringError::UnknownBeanResolver { ref resolver, .. } if resolver == "jndi"));
    }

    #[test]
    fn named_bean_resolver_is_used() {
        let bus = Wiring::from_json(
            r#"{
                "channels": [ { "name": "in", "kind": "direct" } ],
                "control_buses": [ { "id": "cb", "input_channel": "in", "bean_resolver": "custom" } ]
            }"#,
        )
        .unwrap()
        .with_bean_resolver("custom", components())
        .build()
        .unwrap();
        assert!(matches!(bus.endpoint("cb").unwrap().handler(), Handler::ControlBus(_)));
    }

    #[test]
    fn unknown_invoker_target_is_rejected() {
        let err = build_err(
            r#"{
                "channels": [ { "name": "in", "kind": "direct" } ],
                "operation_invokers": [ { "id": "inv", "input_channel": "in", "target": "ghost", "operation": "run" } ]
            }"#,
        );
        assert!(matches!(
            err,
            WiringError::Handler { ref endpoint, source: DispatchError::Invocation { .. } } if endpoint == "inv"
        ));
    }

    #[test]
    fn duplicate_endpoint_id_is_rejected() {
        let err = build_err(
            r#"{
                "channels": [ { "name": "in", "kind": "direct" } ],
                "control_buses": [
                    { "id": "cb", "input_channel": "in" },
                    { "id": "cb", "input_channel": "in" }
                ]
            }"#,
        );
        assert!(matches!(err, WiringError::Registry(RegistryError::Duplicate { .. })));
    }

    #[test]
    fn zero_concurrency_limit_is_rejected() {
        let err = build_err(
            r#"{
                "channels": [ { "name": "in", "kind": "direct" } ],
                "control_buses": [ { "id": "cb", "input_channel": "in", "max_concurrent": 0 } ]
            }"#,
        );
        assert!(matches!(err, WiringError::InvalidEndpoint { ref endpoint, .. } if endpoint == "cb"));
    }

    #[test]
    fn stop_policy_is_configurable() {
        let bus = Wiring::from_json(
            r#"{
                "channels": [ { "name": "a", "kind": "direct" }, { "name": "b", "kind": "direct" } ],
                "control_buses": [
                    { "id": "quick", "input_channel": "a", "stop_policy": { "policy": "immediate" } },
                    { "id": "patient", "input_channel": "b",
                      "stop_policy": { "policy": "drain", "timeout_ms": 250 }, "max_concurrent": 2 }
                ]
            }"#,
        )
        .unwrap()
        .build()
        .unwrap();
        assert_eq!(bus.endpoint("quick").unwrap().config().stop_policy, StopPolicy::Immediate);
        let patient = bus.endpoint("patient").unwrap();
        assert_eq!(
            patient.config().stop_policy,
            StopPolicy::Drain {
                timeout: Duration::from_millis(250)
            }
        );
        assert_eq!(patient.config().max_concurrent, Some(2));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        assert!(matches!(Wiring::from_json("{ not json"), Err(WiringError::Parse(_))));
        assert!(matches!(
            Wiring::from_json(r#"{ "channels": [ { "name": "x", "kind": "teleport" } ] }"#),
            Err(WiringError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            Wiring::from_path("/definitely/not/here.json"),
            Err(WiringError::Io { .. })
        ));
    }

    #[test]
    fn gateway_requires_known_channel() {
        let bus = Wiring::new(BusDefinition::default()).build().unwrap();
        assert!(matches!(bus.gateway("nope"), Err(WiringError::UnknownChannel { .. })));
    }
}
