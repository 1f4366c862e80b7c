#![forbid(unsafe_code)]

//! Watch entries: one node per declaration-site call.
//!
//! An entry is a tagged variant. Its [`EntryKind`] fixes how it was
//! subscribed; its [`Teardown`] fixes how it is torn down (unregister a
//! listener, cancel a stream subscription, or just invalidate a pending
//! eventual). Teardown is dispatched on that tag instead of a stored
//! self-referencing closure, so ownership stays acyclic:
//!
//! ```text
//! WatchEntry ──► EntryControl ──► Teardown ──► Subscription ──► callback
//!                     ▲                                            │
//!                     └──────────────── Weak ──────────────────────┘
//! ```
//!
//! # Invariants
//!
//! 1. At most one live callback per entry is registered with its source.
//! 2. [`EntryControl::dispose`] tears down exactly once; later calls are
//!    no-ops.
//! 3. Every callback checks liveness through its `Weak<EntryControl>` before
//!    touching cached state or requesting a rebuild, so deliveries that were
//!    already queued when the entry died are inert.

use std::any::{Any, type_name};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use fwatch_core::{AsyncSnapshot, ObjectKey, StreamSubscription, Subscription};

// ---------------------------------------------------------------------------
// EntryKind
// ---------------------------------------------------------------------------

/// What a declaration-site call registered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Rebuild on every notification of a listenable.
    Listenable,
    /// Rebuild when a selected value of a listenable changes.
    Selector,
    /// Rebuild on every stream event.
    Stream,
    /// Rebuild when an eventual settles.
    Future,
    /// Side-effect handler on a listenable.
    ListenableHandler,
    /// Side-effect handler on a stream.
    StreamHandler,
    /// Side-effect handler on an eventual.
    FutureHandler,
    /// `call_once` / `create_once` bookkeeping.
    Once,
    /// `on_dispose` callback.
    Dispose,
}

impl EntryKind {
    /// Handlers may target an object that is also watched or handled elsewhere.
    #[must_use]
    pub const fn is_handler(self) -> bool {
        matches!(
            self,
            Self::ListenableHandler | Self::StreamHandler | Self::FutureHandler
        )
    }

    /// Entries that request rebuilds and take part in the duplicate guard.
    #[must_use]
    pub const fn is_watching(self) -> bool {
        matches!(
            self,
            Self::Listenable | Self::Selector | Self::Stream | Self::Future
        )
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Listenable => "listenable watch",
            Self::Selector => "selector watch",
            Self::Stream => "stream watch",
            Self::Future => "future watch",
            Self::ListenableHandler => "listenable handler",
            Self::StreamHandler => "stream handler",
            Self::FutureHandler => "future handler",
            Self::Once => "once",
            Self::Dispose => "dispose callback",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Teardown and liveness
// ---------------------------------------------------------------------------

/// How an entry releases its source.
pub(crate) enum Teardown {
    /// Drop the listener registration.
    Listener(Subscription),
    /// Cancel the stream subscription, suppressing queued deliveries.
    Stream(StreamSubscription),
    /// Eventual callbacks cannot be unregistered; liveness alone guards them.
    Future,
    /// User-supplied dispose callback.
    Callback(Box<dyn FnOnce()>),
}

impl Teardown {
    fn run(self) {
        match self {
            Self::Listener(mut sub) => sub.cancel(),
            Self::Stream(mut sub) => sub.cancel(),
            Self::Future => {}
            Self::Callback(callback) => callback(),
        }
    }
}

/// Liveness token plus the teardown it guards.
pub(crate) struct EntryControl {
    alive: Cell<bool>,
    teardown: RefCell<Option<Teardown>>,
}

impl EntryControl {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            alive: Cell::new(true),
            teardown: RefCell::new(None),
        })
    }

    pub(crate) fn arm(&self, teardown: Teardown) {
        *self.teardown.borrow_mut() = Some(teardown);
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.get()
    }

    /// Returns `true` only for the call that actually tore down.
    pub(crate) fn dispose(&self) -> bool {
        if !self.alive.replace(false) {
            return false;
        }
        let teardown = self.teardown.borrow_mut().take();
        if let Some(teardown) = teardown {
            teardown.run();
        }
        true
    }
}

/// Whether the entry behind `control` is still the live owner of its source.
pub(crate) fn is_live(control: &Weak<EntryControl>) -> bool {
    control.upgrade().is_some_and(|c| c.is_alive())
}

/// Self-cancel capability handed to handlers.
///
/// Cancelling from inside the handler's own invocation is allowed; the
/// handler will not be invoked again.
#[derive(Clone)]
pub struct HandlerCancel {
    control: Weak<EntryControl>,
}

impl HandlerCancel {
    pub(crate) fn new(control: &Rc<EntryControl>) -> Self {
        Self {
            control: Rc::downgrade(control),
        }
    }

    /// Tear the handler down.
    pub fn cancel(&self) {
        if let Some(control) = self.control.upgrade() {
            if control.dispose() {
                tracing::debug!("handler cancelled itself");
            }
        }
    }

    /// Whether the handler has been torn down (by itself or by its owner).
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        !is_live(&self.control)
    }
}

impl fmt::Debug for HandlerCancel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerCancel")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Typed slots
// ---------------------------------------------------------------------------

/// Cached last value (selector watches).
pub(crate) struct ValueSlot<R> {
    value: RefCell<R>,
}

impl<R: Clone> ValueSlot<R> {
    pub(crate) fn new(value: R) -> Self {
        Self {
            value: RefCell::new(value),
        }
    }

    pub(crate) fn get(&self) -> R {
        self.value.borrow().clone()
    }

    pub(crate) fn replace(&self, value: R) -> R {
        self.value.replace(value)
    }
}

/// Latest snapshot of a stream or eventual.
pub(crate) struct SnapshotSlot<T, E> {
    snapshot: RefCell<AsyncSnapshot<T, E>>,
}

impl<T: Clone, E: Clone> SnapshotSlot<T, E> {
    pub(crate) fn new(snapshot: AsyncSnapshot<T, E>) -> Self {
        Self {
            snapshot: RefCell::new(snapshot),
        }
    }

    pub(crate) fn get(&self) -> AsyncSnapshot<T, E> {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn set(&self, snapshot: AsyncSnapshot<T, E>) {
        *self.snapshot.borrow_mut() = snapshot;
    }

    pub(crate) fn carried_value(&self) -> Option<T> {
        self.snapshot.borrow().value().cloned()
    }
}

/// Value created by `create_once`.
pub(crate) struct OnceSlot<T> {
    pub(crate) value: Rc<T>,
}

/// Carries only a type, so positional checks can catch type drift.
pub(crate) struct TypeMarker<L>(PhantomData<L>);

impl<L> TypeMarker<L> {
    pub(crate) fn new() -> Self {
        Self(PhantomData)
    }
}

// ---------------------------------------------------------------------------
// WatchEntry
// ---------------------------------------------------------------------------

/// One subscription owned by a watch list.
pub struct WatchEntry {
    kind: EntryKind,
    observed: Option<ObjectKey>,
    keep_alive: Option<Box<dyn Any>>,
    has_selector: bool,
    slot: Rc<dyn Any>,
    slot_type: &'static str,
    control: Rc<EntryControl>,
}

impl WatchEntry {
    pub(crate) fn new<S: Any>(kind: EntryKind, slot: Rc<S>, control: Rc<EntryControl>) -> Self {
        Self {
            kind,
            observed: None,
            keep_alive: None,
            has_selector: false,
            slot,
            slot_type: type_name::<S>(),
            control,
        }
    }

    /// Record the observed object. `handle` is kept alive so the identity key
    /// cannot be reused by another allocation while the entry exists.
    pub(crate) fn observing(mut self, key: ObjectKey, handle: impl Any) -> Self {
        self.observed = Some(key);
        self.keep_alive = Some(Box::new(handle));
        self
    }

    pub(crate) fn with_selector(mut self) -> Self {
        self.has_selector = true;
        self
    }

    #[must_use]
    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// Identity of the observed object, if any.
    #[must_use]
    pub fn observed(&self) -> Option<ObjectKey> {
        self.observed
    }

    #[must_use]
    pub fn has_selector(&self) -> bool {
        self.has_selector
    }

    /// Whether the entry still owns a live subscription.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.control.is_alive()
    }

    /// Type name of the entry's cached-state slot.
    #[must_use]
    pub fn slot_type(&self) -> &'static str {
        self.slot_type
    }

    pub(crate) fn slot<S: Any>(&self) -> Option<Rc<S>> {
        Rc::clone(&self.slot).downcast::<S>().ok()
    }

    /// Tear down. Returns `true` if this call did the work.
    pub fn dispose(&mut self) -> bool {
        let torn = self.control.dispose();
        if torn {
            tracing::debug!(kind = %self.kind, observed = ?self.observed, "entry torn down");
        }
        torn
    }
}

impl Drop for WatchEntry {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for WatchEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchEntry")
            .field("kind", &self.kind)
            .field("observed", &self.observed)
            .field("has_selector", &self.has_selector)
            .field("pins_observed", &self.keep_alive.is_some())
            .field("alive", &self.is_alive())
            .field("slot_type", &self.slot_type)
            .finish()
    }
}
