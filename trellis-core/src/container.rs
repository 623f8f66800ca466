// Dependency injection container

use crate::Error;
use crate::logging::{debug, trace};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::ThreadId;

/// A resolved object, type-erased
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Factory invoked with the resolving container and any explicit parameters
pub type FactoryFn = Arc<dyn Fn(&Container, &Parameters) -> Result<Instance, Error> + Send + Sync>;

/// How an abstract is turned into an instance
#[derive(Clone)]
pub enum Concrete {
    /// Build by calling a factory
    Factory(FactoryFn),
    /// Resolve another abstract (e.g. interface -> implementation type)
    Alias(String),
    /// A pre-built instance shared by every scope
    Instance(Instance),
}

impl Concrete {
    /// Wrap a typed factory
    pub fn factory<T, F>(factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Container, &Parameters) -> Result<T, Error> + Send + Sync + 'static,
    {
        Concrete::Factory(Arc::new(move |container, parameters| {
            factory(container, parameters).map(|value| Arc::new(value) as Instance)
        }))
    }

    pub fn alias(target: impl Into<String>) -> Self {
        Concrete::Alias(target.into())
    }

    pub fn value<T: Send + Sync + 'static>(value: T) -> Self {
        Concrete::Instance(Arc::new(value))
    }
}

impl std::fmt::Debug for Concrete {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Concrete::Factory(_) => f.write_str("Factory"),
            Concrete::Alias(target) => write!(f, "Alias({})", target),
            Concrete::Instance(_) => f.write_str("Instance"),
        }
    }
}

/// A registered construction strategy
#[derive(Clone, Debug)]
pub struct Binding {
    pub concrete: Concrete,
    pub shared: bool,
}

// ========== Constructor descriptions ==========

/// Kind of a constructor or action parameter
#[derive(Clone, Debug, PartialEq)]
pub enum ParameterKind {
    /// Another container abstract
    Service(String),
    /// A primitive value (route segment, config scalar, explicit parameter)
    Value,
}

/// One declared parameter of a constructor or controller action
#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub kind: ParameterKind,
    pub default: Option<Value>,
    pub optional: bool,
}

impl Parameter {
    /// A parameter satisfied by resolving `abstract_id`
    pub fn service(name: impl Into<String>, abstract_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParameterKind::Service(abstract_id.into()),
            default: None,
            optional: false,
        }
    }

    /// A parameter satisfied by resolving the type `T`
    pub fn service_of<T: ?Sized + 'static>(name: impl Into<String>) -> Self {
        Self::service(name, std::any::type_name::<T>())
    }

    /// A primitive parameter
    pub fn value(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParameterKind::Value,
            default: None,
            optional: false,
        }
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// A type the container can build without an explicit binding.
///
/// `parameters` plays the role of the constructor signature; `construct`
/// receives every parameter the container could supply.
pub trait Injectable: Send + Sync + Sized + 'static {
    fn parameters() -> Vec<Parameter> {
        Vec::new()
    }

    fn construct(arguments: &Arguments) -> Result<Self, Error>;
}

/// Constructor signature plus builder for one injectable type
#[derive(Clone)]
pub struct Constructor {
    pub type_name: &'static str,
    pub parameters: Vec<Parameter>,
    build: fn(&Arguments) -> Result<Instance, Error>,
}

fn build_instance<T: Injectable>(arguments: &Arguments) -> Result<Instance, Error> {
    T::construct(arguments).map(|value| Arc::new(value) as Instance)
}

impl Constructor {
    pub fn of<T: Injectable>() -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            parameters: T::parameters(),
            build: build_instance::<T>,
        }
    }
}

/// Compile-time registration of an injectable type, see [`injectable!`](crate::injectable)
pub struct Autowired {
    type_name: fn() -> &'static str,
    constructor: fn() -> Constructor,
}

impl Autowired {
    pub const fn new<T: Injectable>() -> Self {
        Self {
            type_name: std::any::type_name::<T>,
            constructor: Constructor::of::<T>,
        }
    }
}

inventory::collect!(Autowired);

/// Make a type resolvable by its type name without registering it at runtime
///
/// ```ignore
/// trellis_core::injectable!(UserRepository);
/// ```
#[macro_export]
macro_rules! injectable {
    ($ty:ty) => {
        $crate::inventory::submit! {
            $crate::container::Autowired::new::<$ty>()
        }
    };
}

// ========== Parameters and arguments ==========

/// A single supplied parameter
#[derive(Clone)]
pub enum Argument {
    Value(Value),
    Instance(Instance),
}

impl std::fmt::Debug for Argument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Argument::Value(value) => write!(f, "Value({})", value),
            Argument::Instance(_) => f.write_str("Instance"),
        }
    }
}

/// Explicit parameters passed to `make_with`, keyed by parameter name
#[derive(Clone, Debug, Default)]
pub struct Parameters {
    values: HashMap<String, Argument>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), Argument::Value(value.into()));
        self
    }

    pub fn with_instance<T: Send + Sync + 'static>(mut self, name: impl Into<String>, value: T) -> Self {
        self.values
            .insert(name.into(), Argument::Instance(Arc::new(value)));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, argument: Argument) {
        self.values.insert(name.into(), argument);
    }

    pub fn get(&self, name: &str) -> Option<&Argument> {
        self.values.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Arguments handed to [`Injectable::construct`] and controller actions
#[derive(Debug)]
pub struct Arguments {
    declaring: String,
    values: HashMap<String, Argument>,
}

impl Arguments {
    pub fn new(declaring: impl Into<String>) -> Self {
        Self {
            declaring: declaring.into(),
            values: HashMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, argument: Argument) -> Self {
        self.values.insert(name.into(), argument);
        self
    }

    /// Type (or `Controller@action`) the arguments were resolved for
    pub fn declaring(&self) -> &str {
        &self.declaring
    }

    pub fn has(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    fn missing(&self, name: &str) -> Error {
        Error::UnresolvableDependency {
            parameter: name.to_string(),
            declaring: self.declaring.clone(),
        }
    }

    /// A resolved service, downcast to `T`
    pub fn service<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, Error> {
        match self.values.get(name) {
            Some(Argument::Instance(instance)) => instance.clone().downcast::<T>().map_err(|_| {
                Error::BindingResolution(format!(
                    "Parameter [{}] of {} is not a {}",
                    name,
                    self.declaring,
                    std::any::type_name::<T>()
                ))
            }),
            Some(Argument::Value(_)) => Err(Error::BindingResolution(format!(
                "Parameter [{}] of {} holds a value, not a service",
                name, self.declaring
            ))),
            None => Err(self.missing(name)),
        }
    }

    pub fn optional_service<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.service(name).ok()
    }

    /// A primitive value; strings such as route segments are also read as JSON
    /// literals so `"42"` yields a number.
    pub fn value<T: DeserializeOwned>(&self, name: &str) -> Result<T, Error> {
        match self.values.get(name) {
            Some(Argument::Value(value)) => {
                serde_json::from_value::<T>(value.clone()).or_else(|first| match value {
                    Value::String(raw) => serde_json::from_str::<T>(raw).map_err(|_| first),
                    _ => Err(first),
                })
                .map_err(|e| {
                    Error::Deserialization(format!(
                        "parameter [{}] of {}: {}",
                        name, self.declaring, e
                    ))
                })
            }
            Some(Argument::Instance(_)) => Err(Error::Deserialization(format!(
                "parameter [{}] of {} holds a service, not a value",
                name, self.declaring
            ))),
            None => Err(self.missing(name)),
        }
    }

    pub fn optional_value<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, Error> {
        if self.has(name) {
            self.value(name).map(Some)
        } else {
            Ok(None)
        }
    }
}

// ========== Container ==========

#[derive(Default)]
struct Registry {
    bindings: HashMap<String, Binding>,
    constructors: HashMap<String, Constructor>,
}

/// Per-scope state: lazily cached shared instances and in-progress builds
#[derive(Default)]
struct Scope {
    instances: Mutex<HashMap<String, Instance>>,
    building: Mutex<HashMap<ThreadId, Vec<String>>>,
}

/// Pops the abstract off the resolving thread's build stack
struct BuildGuard<'a> {
    scope: &'a Scope,
    thread: ThreadId,
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        let mut building = self.scope.building.lock();
        if let Some(stack) = building.get_mut(&self.thread) {
            stack.pop();
            if stack.is_empty() {
                building.remove(&self.thread);
            }
        }
    }
}

/// The dependency injection container.
///
/// Clones share bindings and the same instance scope. [`Container::scoped`]
/// shares bindings but starts an empty scope, which is how the kernel keeps
/// shared instances from leaking between requests.
#[derive(Clone)]
pub struct Container {
    registry: Arc<RwLock<Registry>>,
    scope: Arc<Scope>,
}

impl Container {
    pub fn new() -> Self {
        debug!("Creating new DI container");
        Self {
            registry: Arc::new(RwLock::new(Registry::default())),
            scope: Arc::new(Scope::default()),
        }
    }

    /// A container with the same bindings and a fresh shared-instance cache
    pub fn scoped(&self) -> Self {
        trace!("Opening new container scope");
        Self {
            registry: self.registry.clone(),
            scope: Arc::new(Scope::default()),
        }
    }

    /// Register or overwrite a binding
    pub fn bind(&self, abstract_id: impl Into<String>, concrete: Concrete, shared: bool) {
        let abstract_id = abstract_id.into();
        debug!(abstract_id = %abstract_id, shared, concrete = ?concrete, "Binding registered");
        self.scope.instances.lock().remove(&abstract_id);
        self.registry
            .write()
            .bindings
            .insert(abstract_id, Binding { concrete, shared });
    }

    /// Register a shared binding
    pub fn singleton(&self, abstract_id: impl Into<String>, concrete: Concrete) {
        self.bind(abstract_id, concrete, true);
    }

    /// Register a pre-built instance visible from every scope
    pub fn instance<T: Send + Sync + 'static>(&self, abstract_id: impl Into<String>, value: T) {
        self.bind(abstract_id, Concrete::value(value), true);
    }

    /// Cache an instance in this scope only; other scopes never see it
    pub fn scoped_instance<T: Send + Sync + 'static>(&self, abstract_id: impl Into<String>, value: T) {
        self.scope
            .instances
            .lock()
            .insert(abstract_id.into(), Arc::new(value));
    }

    /// Resolve `alias_id` by resolving `target`
    pub fn alias(&self, alias_id: impl Into<String>, target: impl Into<String>) {
        self.bind(alias_id, Concrete::alias(target), false);
    }

    /// Make `T` autowirable under its type name
    pub fn autowire<T: Injectable>(&self) {
        let constructor = Constructor::of::<T>();
        debug!(type_name = constructor.type_name, "Constructor registered");
        self.registry
            .write()
            .constructors
            .insert(constructor.type_name.to_string(), constructor);
    }

    /// Autowire `T` and share the built instance within each scope
    pub fn singleton_type<T: Injectable>(&self) {
        self.autowire::<T>();
        let id = std::any::type_name::<T>();
        self.singleton(
            id,
            Concrete::Factory(Arc::new(move |container, parameters| {
                container.build(id, parameters)
            })),
        );
    }

    /// Whether an explicit binding exists
    pub fn bound(&self, abstract_id: &str) -> bool {
        self.registry.read().bindings.contains_key(abstract_id)
    }

    /// Whether `make` could produce something for `abstract_id`
    pub fn has(&self, abstract_id: &str) -> bool {
        self.scope.instances.lock().contains_key(abstract_id)
            || self.bound(abstract_id)
            || self.constructor(abstract_id).is_some()
    }

    pub fn make(&self, abstract_id: &str) -> Result<Instance, Error> {
        self.make_with(abstract_id, &Parameters::default())
    }

    /// Resolve an abstract, building it when no shared instance is cached.
    ///
    /// Explicit parameters always force a fresh build and are never cached.
    pub fn make_with(&self, abstract_id: &str, parameters: &Parameters) -> Result<Instance, Error> {
        if parameters.is_empty() {
            if let Some(instance) = self.scope.instances.lock().get(abstract_id) {
                trace!(abstract_id, "Resolved cached instance");
                return Ok(instance.clone());
            }
        }

        let binding = self.registry.read().bindings.get(abstract_id).cloned();
        if let Some(Binding {
            concrete: Concrete::Instance(instance),
            ..
        }) = &binding
        {
            return Ok(instance.clone());
        }

        let _guard = self.enter(abstract_id)?;
        trace!(abstract_id, "Resolving");

        let (instance, shared) = match binding {
            Some(Binding {
                concrete: Concrete::Factory(factory),
                shared,
            }) => (factory(self, parameters)?, shared),
            Some(Binding {
                concrete: Concrete::Alias(target),
                shared,
            }) => (self.make_with(&target, parameters)?, shared),
            Some(Binding {
                concrete: Concrete::Instance(instance),
                ..
            }) => (instance, true),
            None => (self.build(abstract_id, parameters)?, false),
        };

        if shared && parameters.is_empty() {
            let mut instances = self.scope.instances.lock();
            let cached = instances
                .entry(abstract_id.to_string())
                .or_insert(instance)
                .clone();
            debug!(abstract_id, "Shared instance cached");
            return Ok(cached);
        }

        Ok(instance)
    }

    /// Resolve and downcast
    pub fn make_as<T: Send + Sync + 'static>(&self, abstract_id: &str) -> Result<Arc<T>, Error> {
        self.make(abstract_id)?.downcast::<T>().map_err(|_| {
            Error::BindingResolution(format!(
                "[{}] did not resolve to {}",
                abstract_id,
                std::any::type_name::<T>()
            ))
        })
    }

    /// Resolve a type registered under its own type name
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, Error> {
        self.make_as::<T>(std::any::type_name::<T>())
    }

    /// Autowire `abstract_id` from its constructor signature, ignoring bindings
    pub fn build(&self, abstract_id: &str, parameters: &Parameters) -> Result<Instance, Error> {
        let constructor = self.constructor(abstract_id).ok_or_else(|| {
            Error::BindingResolution(format!(
                "Target [{}] is not instantiable or does not exist",
                abstract_id
            ))
        })?;

        let arguments =
            self.resolve_arguments(constructor.type_name, &constructor.parameters, parameters)?;
        (constructor.build)(&arguments)
    }

    /// Supply every declared parameter: explicit parameters win, services are
    /// resolved, primitives fall back to their defaults.
    pub fn resolve_arguments(
        &self,
        declaring: &str,
        declared: &[Parameter],
        parameters: &Parameters,
    ) -> Result<Arguments, Error> {
        let mut arguments = Arguments::new(declaring);

        for parameter in declared {
            if let Some(argument) = parameters.get(&parameter.name) {
                arguments
                    .values
                    .insert(parameter.name.clone(), argument.clone());
                continue;
            }

            let unresolvable = || Error::UnresolvableDependency {
                parameter: parameter.name.clone(),
                declaring: declaring.to_string(),
            };

            match &parameter.kind {
                ParameterKind::Service(dependency) => {
                    if self.has(dependency) {
                        let instance = self.make(dependency)?;
                        arguments
                            .values
                            .insert(parameter.name.clone(), Argument::Instance(instance));
                    } else if !parameter.optional {
                        return Err(unresolvable());
                    }
                }
                ParameterKind::Value => match &parameter.default {
                    Some(default) => {
                        arguments
                            .values
                            .insert(parameter.name.clone(), Argument::Value(default.clone()));
                    }
                    None if parameter.optional => {}
                    None => return Err(unresolvable()),
                },
            }
        }

        Ok(arguments)
    }

    /// Drop one cached shared instance from this scope
    pub fn forget_instance(&self, abstract_id: &str) {
        self.scope.instances.lock().remove(abstract_id);
    }

    /// Drop every lazily cached shared instance from this scope
    pub fn forget_scoped_instances(&self) {
        let mut instances = self.scope.instances.lock();
        let count = instances.len();
        instances.clear();
        debug!(instance_count = count, "Cleared scoped instances");
    }

    /// Remove all bindings, constructors and cached instances
    pub fn flush(&self) {
        let mut registry = self.registry.write();
        registry.bindings.clear();
        registry.constructors.clear();
        drop(registry);
        self.forget_scoped_instances();
    }

    fn constructor(&self, abstract_id: &str) -> Option<Constructor> {
        if let Some(constructor) = self.registry.read().constructors.get(abstract_id) {
            return Some(constructor.clone());
        }
        inventory::iter::<Autowired>
            .into_iter()
            .find(|entry| (entry.type_name)() == abstract_id)
            .map(|entry| (entry.constructor)())
    }

    fn enter(&self, abstract_id: &str) -> Result<BuildGuard<'_>, Error> {
        let thread = std::thread::current().id();
        let mut building = self.scope.building.lock();
        let stack = building.entry(thread).or_default();

        if let Some(position) = stack.iter().position(|id| id == abstract_id) {
            let mut chain = stack[position..].to_vec();
            chain.push(abstract_id.to_string());
            if stack.is_empty() {
                building.remove(&thread);
            }
            return Err(Error::CircularDependency(chain));
        }

        stack.push(abstract_id.to_string());
        Ok(BuildGuard {
            scope: &self.scope,
            thread,
        })
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}
