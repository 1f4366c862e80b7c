#![forbid(unsafe_code)]

//! Listener-based notification primitives.
//!
//! - [`Notifier`]: a value-less change notifier that user models embed and
//!   fire from their setters.
//! - [`Observable<T>`]: a shared, version-tracked value holder.
//! - [`Subscription`]: RAII guard that unregisters its callback on drop.
//! - [`Listenable`] / [`ValueListenable`]: the contract the watch runtime
//!   consumes. Anything that can hand out a [`Subscription`] and report a
//!   stable [`ObjectKey`] can be watched.
//!
//! # Architecture
//!
//! Both primitives use `Rc<RefCell<..>>` for single-threaded shared ownership.
//! Subscribers are stored as `Weak` function pointers; the strong half lives in
//! the [`Subscription`]. Dead entries are pruned lazily during notification.
//!
//! # Invariants
//!
//! 1. Cloned handles share state and report the same [`ObjectKey`].
//! 2. Subscribers are notified in registration order.
//! 3. Setting an [`Observable`] to a value equal to the current one is a
//!    no-op (no version bump, no notifications).
//! 4. Dropping a [`Subscription`] removes the callback before the next
//!    notification cycle. A callback already collected for the running cycle
//!    may still fire; callers that need a hard cut-off must check their own
//!    liveness token.
//! 5. Callbacks may subscribe, unsubscribe or mutate the source re-entrantly:
//!    the subscriber list is snapshotted before any callback runs.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

// ---------------------------------------------------------------------------
// ObjectKey
// ---------------------------------------------------------------------------

/// Identity of an observed object.
///
/// Two keys are equal exactly when they were taken from the same shared
/// allocation. Keys are only meaningful while that allocation is alive, so
/// holders that compare keys across time must also keep the object alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey(usize);

impl ObjectKey {
    /// Key of the allocation behind `rc`.
    #[must_use]
    pub fn of<T: ?Sized>(rc: &Rc<T>) -> Self {
        Self(Rc::as_ptr(rc).cast::<()>() as usize)
    }

    /// Raw address value, for logging.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> usize {
        self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj@{:#x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// RAII guard for a registered callback.
///
/// Holds the only strong reference to the callback; the source keeps a weak
/// one. Dropping the guard (or calling [`cancel`](Self::cancel)) therefore
/// unregisters synchronously.
#[must_use = "dropping a Subscription unregisters its callback immediately"]
pub struct Subscription {
    guard: Option<Box<dyn Any>>,
}

impl Subscription {
    /// Wrap the strong half of a callback registration.
    ///
    /// Custom [`Listenable`] implementations that are not built on
    /// [`Notifier`] use this to hand out their own guards.
    pub fn from_guard(guard: impl Any) -> Self {
        Self {
            guard: Some(Box::new(guard)),
        }
    }

    /// A subscription that holds nothing.
    pub fn inert() -> Self {
        Self { guard: None }
    }

    /// Unregister now. Calling this more than once is harmless.
    pub fn cancel(&mut self) {
        self.guard = None;
    }

    /// Whether the callback is still registered through this guard.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.guard.is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Listenable contracts
// ---------------------------------------------------------------------------

/// Something that fires change notifications to registered callbacks.
pub trait Listenable {
    /// Stable identity of the underlying shared object.
    fn identity(&self) -> ObjectKey;

    /// Register `callback`; it stays registered while the returned guard lives.
    fn listen(&self, callback: Rc<dyn Fn()>) -> Subscription;
}

/// A [`Listenable`] that also exposes a current value.
pub trait ValueListenable<T>: Listenable {
    /// Current value.
    fn value(&self) -> T;
}

impl<L: Listenable + ?Sized> Listenable for Rc<L> {
    fn identity(&self) -> ObjectKey {
        (**self).identity()
    }

    fn listen(&self, callback: Rc<dyn Fn()>) -> Subscription {
        (**self).listen(callback)
    }
}

impl<T, L: ValueListenable<T> + ?Sized> ValueListenable<T> for Rc<L> {
    fn value(&self) -> T {
        (**self).value()
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

type Listeners = Vec<Weak<dyn Fn()>>;

/// A value-less change notifier.
///
/// Embed one in a model, call [`notify`](Self::notify) after mutating, and
/// delegate [`Listenable`] to it.
///
/// ```
/// use fwatch_core::observable::{Listenable, Notifier};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let notifier = Notifier::new();
/// let hits = Rc::new(Cell::new(0));
/// let h = Rc::clone(&hits);
/// let _sub = notifier.listen(Rc::new(move || h.set(h.get() + 1)));
/// notifier.notify();
/// assert_eq!(hits.get(), 1);
/// ```
#[derive(Clone, Default)]
pub struct Notifier {
    listeners: Rc<RefCell<Listeners>>,
}

impl Notifier {
    /// Create a notifier with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire every live listener in registration order.
    pub fn notify(&self) {
        let live: Vec<Rc<dyn Fn()>> = {
            let mut listeners = self.listeners.borrow_mut();
            listeners.retain(|weak| weak.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for callback in live {
            callback();
        }
    }

    /// Number of registered listeners whose guard is still alive.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners
            .borrow()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

impl Listenable for Notifier {
    fn identity(&self) -> ObjectKey {
        ObjectKey::of(&self.listeners)
    }

    fn listen(&self, callback: Rc<dyn Fn()>) -> Subscription {
        self.listeners.borrow_mut().push(Rc::downgrade(&callback));
        Subscription::from_guard(callback)
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Observable<T>
// ---------------------------------------------------------------------------

struct ObservableInner<T> {
    value: T,
    version: u64,
    subscribers: Vec<Weak<dyn Fn(&T)>>,
}

/// A shared, version-tracked value with change notification.
///
/// Cloning an `Observable` creates a new handle to the **same** value.
pub struct Observable<T> {
    inner: Rc<RefCell<ObservableInner<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Observable")
            .field("value", &inner.value)
            .field("version", &inner.version)
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    /// Create an observable holding `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ObservableInner {
                value,
                version: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.borrow().value.clone()
    }

    /// Borrow the current value without cloning.
    ///
    /// # Panics
    ///
    /// Panics if `f` calls [`set`](Self::set) on the same observable.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.borrow().value)
    }

    /// Replace the value, notifying subscribers if it changed.
    pub fn set(&self, value: T) {
        let snapshot = {
            let mut inner = self.inner.borrow_mut();
            if inner.value == value {
                return;
            }
            inner.value = value;
            inner.version += 1;
            inner.value.clone()
        };
        self.notify_with(&snapshot);
    }

    /// Mutate the value in place, notifying subscribers if it changed.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut next = self.get();
        f(&mut next);
        self.set(next);
    }

    /// Register a callback that receives each new value.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let callback: Rc<dyn Fn(&T)> = Rc::new(callback);
        self.inner
            .borrow_mut()
            .subscribers
            .push(Rc::downgrade(&callback));
        Subscription::from_guard(callback)
    }

    /// Number of mutations that changed the value.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .borrow()
            .subscribers
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    fn notify_with(&self, value: &T) {
        let live: Vec<Rc<dyn Fn(&T)>> = {
            let mut inner = self.inner.borrow_mut();
            inner.subscribers.retain(|weak| weak.strong_count() > 0);
            inner.subscribers.iter().filter_map(Weak::upgrade).collect()
        };
        for callback in live {
            callback(value);
        }
    }
}

impl<T: Clone + PartialEq + 'static> Listenable for Observable<T> {
    fn identity(&self) -> ObjectKey {
        ObjectKey::of(&self.inner)
    }

    fn listen(&self, callback: Rc<dyn Fn()>) -> Subscription {
        self.subscribe(move |_| callback())
    }
}

impl<T: Clone + PartialEq + 'static> ValueListenable<T> for Observable<T> {
    fn value(&self) -> T {
        self.get()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
