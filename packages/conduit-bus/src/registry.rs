use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::{ConversionError, Value, ValueKind};
use dashmap::DashMap;
use parking_lot::RwLock;

// ---------------------------------------------------------------------------
// Operation signatures
// ---------------------------------------------------------------------------

/// Lifecycle operations every component exposes without declaring them.
pub const LIFECYCLE_OPERATIONS: [&str; 3] = ["start", "stop", "isRunning"];

/// Declared type of an operation parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// Accepts any value unchanged.
    Any,
    /// Coerces the argument to the given kind.
    Kind(ValueKind),
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Any => f.write_str("any"),
            ParamType::Kind(kind) => write!(f, "{kind}"),
        }
    }
}

/// Errors binding arguments to an operation's parameters.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("expected {expected} argument(s), got {actual}")]
    Arity { expected: usize, actual: usize },
    #[error("argument {index}: {source}")]
    Conversion {
        index: usize,
        #[source]
        source: ConversionError,
    },
}

/// Name and parameter types of an invocable operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSignature {
    pub name: String,
    pub params: Vec<ParamType>,
}

impl OperationSignature {
    pub fn new(name: impl Into<String>, params: impl Into<Vec<ParamType>>) -> Self {
        Self {
            name: name.into(),
            params: params.into(),
        }
    }

    #[must_use]
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Checks the argument count and coerces each argument to its declared type.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::Arity`] on a count mismatch and
    /// [`BindError::Conversion`] when an argument cannot be coerced.
    pub fn bind(&self, args: Vec<Value>) -> Result<Vec<Value>, BindError> {
        if args.len() != self.params.len() {
            return Err(BindError::Arity {
                expected: self.params.len(),
                actual: args.len(),
            });
        }
        args.into_iter()
            .zip(&self.params)
            .enumerate()
            .map(|(index, (arg, param))| match param {
                ParamType::Any => Ok(arg),
                ParamType::Kind(kind) => arg
                    .coerce(*kind)
                    .map_err(|source| BindError::Conversion { index, source }),
            })
            .collect()
    }
}

impl fmt::Display for OperationSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str(")")
    }
}

// ---------------------------------------------------------------------------
// ManagedComponent trait
// ---------------------------------------------------------------------------

/// A named component whose operations can be invoked by handlers and the
/// control bus.
///
/// Only operations listed by [`operations`](Self::operations) and the
/// lifecycle operations (`start`, `stop`, `isRunning`) are invocable.
#[async_trait]
pub trait ManagedComponent: Send + Sync + Any {
    fn name(&self) -> &str;

    /// Declared operations, excluding the lifecycle ones.
    fn operations(&self) -> Vec<OperationSignature> {
        Vec::new()
    }

    /// Invokes a declared operation with already-bound arguments.
    ///
    /// `Ok(None)` means the operation produces no result.
    async fn invoke(&self, operation: &str, _args: Vec<Value>) -> anyhow::Result<Option<Value>> {
        anyhow::bail!("operation '{operation}' is not implemented by '{}'", self.name())
    }

    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn is_running(&self) -> bool {
        true
    }
}

/// Finds an invocable operation by name, including the lifecycle operations.
#[must_use]
pub fn find_operation(component: &dyn ManagedComponent, name: &str) -> Option<OperationSignature> {
    if LIFECYCLE_OPERATIONS.contains(&name) {
        return Some(OperationSignature::new(name, Vec::<ParamType>::new()));
    }
    component.operations().into_iter().find(|op| op.name == name)
}

/// Invokes an operation found with [`find_operation`], routing lifecycle
/// operations to the component's lifecycle methods.
///
/// # Errors
///
/// Propagates the component's failure unchanged.
pub async fn invoke_operation(
    component: &dyn ManagedComponent,
    operation: &str,
    args: Vec<Value>,
) -> anyhow::Result<Option<Value>> {
    match operation {
        "start" => component.start().await.map(|()| None),
        "stop" => component.stop().await.map(|()| None),
        "isRunning" => Ok(Some(Value::Bool(component.is_running()))),
        _ => component.invoke(operation, args).await,
    }
}

// ---------------------------------------------------------------------------
// BeanResolver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("no component named '{name}'")]
    NotFound { name: String },
    #[error("a component named '{name}' is already registered")]
    Duplicate { name: String },
}

/// Resolves component names for the control bus.
pub trait BeanResolver: Send + Sync {
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] when no component has that name.
    fn resolve(&self, name: &str) -> Result<Arc<dyn ManagedComponent>, RegistryError>;
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Registry of managed components, owned by whoever wires the bus.
///
/// Lookup is by name (`resolve`) or by concrete type (`get::<T>`; the most
/// recently registered instance wins). Components are started in
/// registration order and stopped in reverse order.
pub struct ComponentRegistry {
    by_name: DashMap<String, Arc<dyn ManagedComponent>>,
    by_type: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    order: RwLock<Vec<String>>,
}

impl ComponentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            by_type: DashMap::new(),
            order: RwLock::new(Vec::new()),
        }
    }

    /// Registers a component and returns a typed handle to it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if the name is taken.
    pub fn register<T: ManagedComponent>(&self, component: T) -> Result<Arc<T>, RegistryError> {
        let component = Arc::new(component);
        self.register_arc(component.clone())?;
        Ok(component)
    }

    /// Registers an already shared component.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if the name is taken.
    pub fn register_arc<T: ManagedComponent>(&self, component: Arc<T>) -> Result<(), RegistryError> {
        let name = component.name().to_string();
        match self.by_name.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(RegistryError::Duplicate { name });
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(component.clone());
            }
        }
        self.by_type.insert(TypeId::of::<T>(), component);
        self.order.write().push(name.clone());
        tracing::debug!(component = %name, "component registered");
        Ok(())
    }

    /// Retrieves a component by its concrete type.
    #[must_use]
    pub fn get<T: ManagedComponent>(&self) -> Option<Arc<T>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value().clone().downcast::<T>().ok())
    }

    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn ManagedComponent>> {
        self.by_name.get(name).map(|entry| entry.value().clone())
    }

    /// Component names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.order.read().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Starts all components in registration order.
    ///
    /// # Errors
    ///
    /// Returns the first component failure; later components are not started.
    pub async fn start_all(&self) -> anyhow::Result<()> {
        let order = self.order.read().clone();
        for name in &order {
            if let Some(component) = self.get_by_name(name) {
                component.start().await?;
            }
        }
        Ok(())
    }

    /// Stops all components in reverse registration order.
    ///
    /// # Errors
    ///
    /// Returns the first component failure; earlier components are not stopped.
    pub async fn stop_all(&self) -> anyhow::Result<()> {
        let order = self.order.read().clone();
        for name in order.iter().rev() {
            if let Some(component) = self.get_by_name(name) {
                component.stop().await?;
            }
        }
        Ok(())
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BeanResolver for ComponentRegistry {
    fn resolve(&self, name: &str) -> Result<Arc<dyn ManagedComponent>, RegistryError> {
        self.get_by_name(name).ok_or_else(|| RegistryError::NotFound {
            name: name.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    struct Lamp {
        lamp_name: &'static str,
        on: AtomicBool,
        log: Arc<parking_lot::Mutex<Vec<String>>>,
    }

    impl Lamp {
        fn new(name: &'static str, log: Arc<parking_lot::Mutex<Vec<String>>>) -> Self {
            Self {
                lamp_name: name,
                on: AtomicBool::new(false),
                log,
            }
        }
    }

    #[async_trait]
    impl ManagedComponent for Lamp {
        fn name(&self) -> &str {
            self.lamp_name
        }

        fn operations(&self) -> Vec<OperationSignature> {
            vec![OperationSignature::new(
                "dim",
                [ParamType::Kind(ValueKind::Int)],
            )]
        }

        async fn invoke(&self, operation: &str, args: Vec<Value>) -> anyhow::Result<Option<Value>> {
            match operation {
                "dim" => Ok(args.into_iter().next()),
                _ => anyhow::bail!("unknown operation {operation}"),
            }
        }

        async fn start(&self) -> anyhow::Result<()> {
            self.on.store(true, Ordering::SeqCst);
            self.log.lock().push(format!("start:{}", self.lamp_name));
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            self.on.store(false, Ordering::SeqCst);
            self.log.lock().push(format!("stop:{}", self.lamp_name));
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.on.load(Ordering::SeqCst)
        }
    }

    struct Plain;

    #[async_trait]
    impl ManagedComponent for Plain {
        fn name(&self) -> &str {
            "plain"
        }
    }

    fn log() -> Arc<parking_lot::Mutex<Vec<String>>> {
        Arc::new(parking_lot::Mutex::new(Vec::new()))
    }

    #[test]
    fn register_and_resolve_by_name_and_type() {
        let registry = ComponentRegistry::new();
        registry.register(Lamp::new("hall", log())).unwrap();
        registry.register(Plain).unwrap();

        assert_eq!(registry.resolve("hall").unwrap().name(), "hall");
        assert!(registry.get::<Plain>().is_some());
        assert_eq!(registry.names(), vec!["hall", "plain"]);
    }

    #[test]
    fn resolve_missing_is_not_found() {
        let registry = ComponentRegistry::new();
        assert_eq!(
            registry.resolve("ghost").err(),
            Some(RegistryError::NotFound {
                name: "ghost".to_string()
            })
        );
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let registry = ComponentRegistry::new();
        registry.register(Lamp::new("hall", log())).unwrap();
        let err = registry.register(Lamp::new("hall", log())).err().unwrap();
        assert_eq!(
            err,
            RegistryError::Duplicate {
                name: "hall".to_string()
            }
        );
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn start_in_order_stop_in_reverse() {
        let log = log();
        let registry = ComponentRegistry::new();
        registry.register(Lamp::new("a", log.clone())).unwrap();
        registry.register(Lamp::new("b", log.clone())).unwrap();

        registry.start_all().await.unwrap();
        registry.stop_all().await.unwrap();

        assert_eq!(*log.lock(), vec!["start:a", "start:b", "stop:b", "stop:a"]);
    }

    #[tokio::test]
    async fn lifecycle_operations_are_always_invocable() {
        let lamp = Lamp::new("hall", log());
        assert!(find_operation(&lamp, "isRunning").is_some());
        assert!(find_operation(&lamp, "dim").is_some());
        assert!(find_operation(&lamp, "explode").is_none());

        invoke_operation(&lamp, "start", vec![]).await.unwrap();
        let running = invoke_operation(&lamp, "isRunning", vec![]).await.unwrap();
        assert_eq!(running, Some(Value::Bool(true)));
    }

    #[tokio::test]
    async fn undeclared_invoke_fails() {
        let err = invoke_operation(&Plain, "anything", vec![]).await.unwrap_err();
        assert!(err.to_string().contains("not implemented"));
    }

    #[test]
    fn bind_coerces_and_checks_arity() {
        let op = OperationSignature::new("dim", [ParamType::Kind(ValueKind::Int)]);
        assert_eq!(op.bind(vec![Value::from("7")]).unwrap(), vec![Value::Int(7)]);
        assert!(matches!(
            op.bind(vec![]),
            Err(BindError::Arity {
                expected: 1,
                actual: 0
            })
        ));
        assert!(matches!(
            op.bind(vec![Value::from("seven")]),
            Err(BindError::Conversion { index: 0, .. })
        ));
        assert_eq!(op.to_string(), "dim(int)");
    }
}
