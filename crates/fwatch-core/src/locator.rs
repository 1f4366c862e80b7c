#![forbid(unsafe_code)]

//! The resolver contract consumed by the watch runtime, plus a minimal scoped
//! [`Registry`] that satisfies it.
//!
//! The runtime only ever *reads* from a [`Locator`]: it resolves services and
//! pushes/pops nested scopes. Registration is the host's business. The
//! trait is object safe so a [`BindingState`] can hold an injected
//! `Rc<dyn Locator>` and tests can swap in doubles; [`LocatorExt`] layers the
//! typed sugar on top.
//!
//! # Scope semantics of [`Registry`]
//!
//! 1. Scopes form a stack above a permanent base scope.
//! 2. Lookups search from the innermost scope outward.
//! 3. Registrations go into the innermost scope.
//! 4. Popping a scope also pops every scope pushed after it; teardown
//!    callbacks run innermost first, after the registry borrow is released.
//!
//! [`BindingState`]: https://docs.rs/fwatch-runtime

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::eventual::Eventual;
use crate::scheduler::Scheduler;

// ---------------------------------------------------------------------------
// Keys, params, errors
// ---------------------------------------------------------------------------

/// Lookup key: a type plus an optional instance name.
#[derive(Clone, Debug)]
pub struct ServiceKey {
    type_id: TypeId,
    type_name: &'static str,
    instance_name: Option<String>,
}

impl ServiceKey {
    /// Key for `T` with an optional instance name.
    #[must_use]
    pub fn of<T: Any>(instance_name: Option<&str>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            instance_name: instance_name.map(str::to_owned),
        }
    }

    /// Rust type name of the service.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Instance name, if any.
    #[must_use]
    pub fn instance_name(&self) -> Option<&str> {
        self.instance_name.as_deref()
    }
}

impl PartialEq for ServiceKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.instance_name == other.instance_name
    }
}

impl Eq for ServiceKey {}

impl std::hash::Hash for ServiceKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.instance_name.hash(state);
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance_name {
            Some(name) => write!(f, "{}#{name}", self.type_name),
            None => f.write_str(self.type_name),
        }
    }
}

/// Up to two factory parameters, type-erased.
#[derive(Clone, Copy, Default)]
pub struct Params<'a> {
    pub first: Option<&'a dyn Any>,
    pub second: Option<&'a dyn Any>,
}

impl Params<'_> {
    /// No parameters.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }
}

impl fmt::Debug for Params<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Params")
            .field("first", &self.first.is_some())
            .field("second", &self.second.is_some())
            .finish()
    }
}

/// Handle to a pushed scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScopeHandle(u64);

impl ScopeHandle {
    /// Raw id, for logging.
    #[inline]
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

/// Resolution failures. These propagate unchanged through the runtime.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    #[error("no provider registered for {type_name}{}", instance_suffix(.instance_name))]
    NotRegistered {
        type_name: &'static str,
        instance_name: Option<String>,
    },

    #[error("provider for {type_name} produced a value of a different type")]
    TypeMismatch { type_name: &'static str },

    #[error("scope {0:?} is not on the scope stack")]
    UnknownScope(ScopeHandle),

    #[error("provider failed: {0}")]
    Failed(String),
}

fn instance_suffix(name: &Option<String>) -> String {
    name.as_ref()
        .map(|n| format!(" (instance '{n}')"))
        .unwrap_or_default()
}

impl ResolutionError {
    fn not_registered(key: &ServiceKey) -> Self {
        Self::NotRegistered {
            type_name: key.type_name,
            instance_name: key.instance_name.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Locator
// ---------------------------------------------------------------------------

/// Type-erased resolver capability.
pub trait Locator {
    /// Resolve the service behind `key`, passing `params` to factories.
    ///
    /// # Errors
    ///
    /// [`ResolutionError`] if nothing is registered or the provider fails.
    fn resolve_any(&self, key: &ServiceKey, params: Params<'_>)
    -> Result<Rc<dyn Any>, ResolutionError>;

    /// Resolve asynchronously. Synchronous providers settle immediately.
    fn resolve_any_async(&self, key: &ServiceKey) -> Eventual<Rc<dyn Any>, ResolutionError>;

    /// Open a nested scope. `teardown` runs when it is popped.
    fn push_scope(&self, name: Option<&str>, teardown: Option<Box<dyn FnOnce()>>) -> ScopeHandle;

    /// Close `handle` and every scope opened after it.
    ///
    /// # Errors
    ///
    /// [`ResolutionError::UnknownScope`] if the scope was already popped.
    fn pop_scope(&self, handle: ScopeHandle) -> Result<(), ResolutionError>;
}

/// Typed sugar over [`Locator`].
pub trait LocatorExt: Locator {
    /// Resolve `T`.
    ///
    /// # Errors
    ///
    /// Propagates [`ResolutionError`].
    fn resolve<T: Any>(&self, instance_name: Option<&str>) -> Result<Rc<T>, ResolutionError> {
        self.resolve_with::<T, (), ()>(instance_name, None, None)
    }

    /// Resolve `T`, passing up to two factory parameters.
    ///
    /// # Errors
    ///
    /// Propagates [`ResolutionError`].
    fn resolve_with<T: Any, P1: Any, P2: Any>(
        &self,
        instance_name: Option<&str>,
        first: Option<&P1>,
        second: Option<&P2>,
    ) -> Result<Rc<T>, ResolutionError> {
        let key = ServiceKey::of::<T>(instance_name);
        let params = Params {
            first: first.map(|p| p as &dyn Any),
            second: second.map(|p| p as &dyn Any),
        };
        let erased = self.resolve_any(&key, params)?;
        downcast_service::<T>(erased, &key)
    }

    /// Resolve `T` asynchronously.
    fn resolve_async<T: Any>(
        &self,
        instance_name: Option<&str>,
    ) -> Eventual<Rc<T>, ResolutionError> {
        let key = ServiceKey::of::<T>(instance_name);
        let erased = self.resolve_any_async(&key);
        erased.try_map(move |value| downcast_service::<T>(value, &key))
    }
}

impl<L: Locator + ?Sized> LocatorExt for L {}

fn downcast_service<T: Any>(
    value: Rc<dyn Any>,
    key: &ServiceKey,
) -> Result<Rc<T>, ResolutionError> {
    value.downcast::<T>().map_err(|_| ResolutionError::TypeMismatch {
        type_name: key.type_name,
    })
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

type FactoryFn = Rc<dyn Fn(Params<'_>) -> Result<Rc<dyn Any>, ResolutionError>>;

#[derive(Clone)]
enum Provider {
    Singleton(Rc<dyn Any>),
    Factory(FactoryFn),
    Async(Eventual<Rc<dyn Any>, ResolutionError>),
}

struct Scope {
    handle: ScopeHandle,
    name: Option<String>,
    providers: HashMap<ServiceKey, Provider>,
    teardown: Option<Box<dyn FnOnce()>>,
}

impl Scope {
    fn new(handle: ScopeHandle, name: Option<&str>, teardown: Option<Box<dyn FnOnce()>>) -> Self {
        Self {
            handle,
            name: name.map(str::to_owned),
            providers: HashMap::new(),
            teardown,
        }
    }
}

struct RegistryInner {
    scopes: Vec<Scope>,
    next_scope: u64,
}

/// Minimal scoped service registry implementing [`Locator`].
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct Registry {
    inner: Rc<RefCell<RegistryInner>>,
    scheduler: Rc<dyn Scheduler>,
}

impl Registry {
    /// Create a registry whose async resolutions settle through `scheduler`.
    #[must_use]
    pub fn new(scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(RegistryInner {
                scopes: vec![Scope::new(ScopeHandle(0), Some("base"), None)],
                next_scope: 1,
            })),
            scheduler,
        }
    }

    /// Register a shared instance of `T`.
    pub fn register_singleton<T: Any>(&self, value: T) -> Rc<T> {
        self.register_singleton_named(None, value)
    }

    /// Register a shared instance of `T` under `instance_name`.
    pub fn register_singleton_named<T: Any>(&self, instance_name: Option<&str>, value: T) -> Rc<T> {
        let value = Rc::new(value);
        let erased: Rc<dyn Any> = Rc::clone(&value) as Rc<dyn Any>;
        self.insert(ServiceKey::of::<T>(instance_name), Provider::Singleton(erased));
        value
    }

    /// Register a factory producing a fresh `T` on every resolution.
    pub fn register_factory<T: Any>(&self, factory: impl Fn() -> T + 'static) {
        self.insert(
            ServiceKey::of::<T>(None),
            Provider::Factory(Rc::new(move |_| Ok(Rc::new(factory()) as Rc<dyn Any>))),
        );
    }

    /// Register a factory that receives up to two typed parameters.
    pub fn register_factory_param<T: Any, P1: Any, P2: Any>(
        &self,
        instance_name: Option<&str>,
        factory: impl Fn(Option<&P1>, Option<&P2>) -> T + 'static,
    ) {
        self.insert(
            ServiceKey::of::<T>(instance_name),
            Provider::Factory(Rc::new(move |params: Params<'_>| {
                let first = params.first.and_then(|p| p.downcast_ref::<P1>());
                let second = params.second.and_then(|p| p.downcast_ref::<P2>());
                Ok(Rc::new(factory(first, second)) as Rc<dyn Any>)
            })),
        );
    }

    /// Register a singleton that becomes available when `pending` settles.
    pub fn register_async_singleton<T: Any>(
        &self,
        instance_name: Option<&str>,
        pending: Eventual<Rc<T>, ResolutionError>,
    ) {
        let erased = pending.map(|value| value as Rc<dyn Any>);
        self.insert(ServiceKey::of::<T>(instance_name), Provider::Async(erased));
    }

    /// Whether `T` is resolvable from the current scope stack.
    #[must_use]
    pub fn is_registered<T: Any>(&self, instance_name: Option<&str>) -> bool {
        self.find(&ServiceKey::of::<T>(instance_name)).is_some()
    }

    /// Number of scopes above the base scope.
    #[must_use]
    pub fn scope_depth(&self) -> usize {
        self.inner.borrow().scopes.len() - 1
    }

    /// Name of the innermost scope.
    #[must_use]
    pub fn current_scope_name(&self) -> Option<String> {
        self.inner
            .borrow()
            .scopes
            .last()
            .and_then(|scope| scope.name.clone())
    }

    fn insert(&self, key: ServiceKey, provider: Provider) {
        let mut inner = self.inner.borrow_mut();
        if let Some(scope) = inner.scopes.last_mut() {
            tracing::trace!(service = %key, scope = scope.handle.id(), "registering provider");
            scope.providers.insert(key, provider);
        }
    }

    fn find(&self, key: &ServiceKey) -> Option<Provider> {
        self.inner
            .borrow()
            .scopes
            .iter()
            .rev()
            .find_map(|scope| scope.providers.get(key).cloned())
    }
}

impl Locator for Registry {
    fn resolve_any(
        &self,
        key: &ServiceKey,
        params: Params<'_>,
    ) -> Result<Rc<dyn Any>, ResolutionError> {
        match self.find(key) {
            Some(Provider::Singleton(value)) => Ok(value),
            Some(Provider::Factory(factory)) => factory(params),
            Some(Provider::Async(pending)) => match pending.peek() {
                Some(outcome) => outcome,
                None => Err(ResolutionError::Failed(format!(
                    "{key} is still initialising; resolve it asynchronously"
                ))),
            },
            None => Err(ResolutionError::not_registered(key)),
        }
    }

    fn resolve_any_async(&self, key: &ServiceKey) -> Eventual<Rc<dyn Any>, ResolutionError> {
        match self.find(key) {
            Some(Provider::Async(pending)) => pending,
            Some(_) => match self.resolve_any(key, Params::none()) {
                Ok(value) => Eventual::ready(value, Rc::clone(&self.scheduler)),
                Err(err) => Eventual::failed(err, Rc::clone(&self.scheduler)),
            },
            None => Eventual::failed(
                ResolutionError::not_registered(key),
                Rc::clone(&self.scheduler),
            ),
        }
    }

    fn push_scope(&self, name: Option<&str>, teardown: Option<Box<dyn FnOnce()>>) -> ScopeHandle {
        let mut inner = self.inner.borrow_mut();
        let handle = ScopeHandle(inner.next_scope);
        inner.next_scope += 1;
        inner.scopes.push(Scope::new(handle, name, teardown));
        tracing::debug!(scope = handle.id(), name = ?name, "pushed scope");
        handle
    }

    fn pop_scope(&self, handle: ScopeHandle) -> Result<(), ResolutionError> {
        let popped: Vec<Scope> = {
            let mut inner = self.inner.borrow_mut();
            let position = inner
                .scopes
                .iter()
                .position(|scope| scope.handle == handle)
                .filter(|&pos| pos > 0)
                .ok_or(ResolutionError::UnknownScope(handle))?;
            inner.scopes.split_off(position)
        };
        for mut scope in popped.into_iter().rev() {
            tracing::debug!(scope = scope.handle.id(), name = ?scope.name, "popping scope");
            if let Some(teardown) = scope.teardown.take() {
                teardown();
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Registry")
            .field("scopes", &inner.scopes.len())
            .field(
                "providers",
                &inner.scopes.iter().map(|s| s.providers.len()).sum::<usize>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::EventLoop;
    use std::cell::Cell;

    fn registry() -> (EventLoop, Registry) {
        let lp = EventLoop::new();
        let reg = Registry::new(lp.scheduler());
        (lp, reg)
    }

    #[test]
    fn singleton_resolves_same_instance() {
        let (_lp, reg) = registry();
        let stored = reg.register_singleton(String::from("svc"));
        let a = reg.resolve::<String>(None).expect("registered");
        let b = reg.resolve::<String>(None).expect("registered");
        assert!(Rc::ptr_eq(&a, &b));
        assert!(Rc::ptr_eq(&a, &stored));
    }

    #[test]
    fn named_instances_are_distinct() {
        let (_lp, reg) = registry();
        reg.register_singleton_named(Some("a"), 1_u32);
        reg.register_singleton_named(Some("b"), 2_u32);
        assert_eq!(*reg.resolve::<u32>(Some("a")).unwrap(), 1);
        assert_eq!(*reg.resolve::<u32>(Some("b")).unwrap(), 2);
        assert!(matches!(
            reg.resolve::<u32>(None),
            Err(ResolutionError::NotRegistered { .. })
        ));
    }

    #[test]
    fn missing_service_reports_name() {
        let (_lp, reg) = registry();
        let err = reg.resolve::<u8>(Some("x")).unwrap_err();
        assert_eq!(err.to_string(), "no provider registered for u8 (instance 'x')");
    }

    #[test]
    fn factory_params_reach_the_factory() {
        let (_lp, reg) = registry();
        reg.register_factory_param::<String, u32, &'static str>(None, |n, s| {
            format!("{}-{}", n.copied().unwrap_or(0), s.copied().unwrap_or("none"))
        });
        let got = reg
            .resolve_with::<String, u32, &'static str>(None, Some(&7), Some(&"x"))
            .unwrap();
        assert_eq!(*got, "7-x");
        let defaulted = reg.resolve::<String>(None).unwrap();
        assert_eq!(*defaulted, "0-none");
    }

    #[test]
    fn factory_produces_fresh_instances() {
        let (_lp, reg) = registry();
        reg.register_factory(|| vec![1_u8]);
        let a = reg.resolve::<Vec<u8>>(None).unwrap();
        let b = reg.resolve::<Vec<u8>>(None).unwrap();
        assert!(!Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn scopes_shadow_and_pop_with_teardown() {
        let (_lp, reg) = registry();
        reg.register_singleton(1_i32);
        let torn = Rc::new(Cell::new(0));
        let t = Rc::clone(&torn);
        let handle = reg.push_scope(Some("inner"), Some(Box::new(move || t.set(t.get() + 1))));
        reg.register_singleton(2_i32);
        assert_eq!(*reg.resolve::<i32>(None).unwrap(), 2);
        assert_eq!(reg.current_scope_name().as_deref(), Some("inner"));

        reg.pop_scope(handle).unwrap();
        assert_eq!(*reg.resolve::<i32>(None).unwrap(), 1);
        assert_eq!(torn.get(), 1);
        assert_eq!(
            reg.pop_scope(handle),
            Err(ResolutionError::UnknownScope(handle))
        );
    }

    #[test]
    fn popping_outer_scope_pops_inner_first() {
        let (_lp, reg) = registry();
        let order = Rc::new(RefCell::new(Vec::new()));
        let o1 = Rc::clone(&order);
        let outer = reg.push_scope(
            Some("outer"),
            Some(Box::new(move || o1.borrow_mut().push("outer"))),
        );
        let o2 = Rc::clone(&order);
        reg.push_scope(Some("inner"), Some(Box::new(move || o2.borrow_mut().push("inner"))));
        assert_eq!(reg.scope_depth(), 2);

        reg.pop_scope(outer).unwrap();
        assert_eq!(*order.borrow(), vec!["inner", "outer"]);
        assert_eq!(reg.scope_depth(), 0);
    }

    #[test]
    fn base_scope_cannot_be_popped() {
        let (_lp, reg) = registry();
        assert!(reg.pop_scope(ScopeHandle(0)).is_err());
    }

    #[test]
    fn async_resolution_settles_later() {
        let (lp, reg) = registry();
        let (pending, completer) = Eventual::<Rc<u64>, ResolutionError>::pending(lp.scheduler());
        reg.register_async_singleton::<u64>(None, pending);
        reg.register_singleton(String::from("sync"));

        let slow = reg.resolve_async::<u64>(None);
        let fast = reg.resolve_async::<String>(None);
        let missing = reg.resolve_async::<bool>(None);

        completer.complete(Ok(Rc::new(42)));
        lp.run_until_idle();
        assert_eq!(slow.peek().map(|r| r.map(|v| *v)), Some(Ok(42)));
        assert_eq!(fast.peek().map(|r| r.map(|v| (*v).clone())), Some(Ok("sync".to_string())));
        assert!(matches!(missing.peek(), Some(Err(ResolutionError::NotRegistered { .. }))));
        assert_eq!(*reg.resolve::<u64>(None).unwrap(), 42);
    }
}
