#![forbid(unsafe_code)]

//! Per-component binding state: the declaration-site operations.
//!
//! A [`BindingState`] owns one [`WatchList`]. Every declaration-site call
//! (`watch`, `watch_property`, `watch_stream`, `register_handler`, ...)
//! consumes the slot under the cursor and then does one of three things:
//!
//! | Slot under cursor | Observed identity | Action |
//! |-------------------|-------------------|--------|
//! | none (exhausted) | - | subscribe, append |
//! | same kind and type | equal | reuse, no new subscription |
//! | same kind and type | different | tear old down, subscribe, replace in place |
//! | other kind or type | - | `PositionalMismatch`, or replace if checks are off |
//!
//! # Invariants
//!
//! 1. One live subscription per declared watch. A swap tears the old entry
//!    down before the new one subscribes.
//! 2. The duplicate-watch guard runs before any subscription side effect and
//!    compares only against slots already declared this pass, so an object
//!    may move to an earlier slot between passes. Handlers are exempt.
//! 3. Asynchronous callbacks check their entry's liveness before touching
//!    cached state or requesting a rebuild.
//! 4. The host is held weakly. A dropped host turns rebuild requests into
//!    no-ops.
//! 5. [`BindingState::dispose`] is idempotent and also runs on drop.
//!
//! # Failure Modes
//!
//! | Failure | Surfaced as |
//! |---------|-------------|
//! | Same object watched twice | [`WatchError::DuplicateWatch`] |
//! | Declarations reordered | [`WatchError::PositionalMismatch`] (checks on) |
//! | Pass declared fewer slots | warning, or [`WatchError::PassShrank`] (strict) |
//! | Used after dispose | [`WatchError::Unmounted`] |
//! | Resolver failure | [`WatchError::Resolution`], unchanged |
//! | Stream or eventual error | `AsyncSnapshot::Error`, or `on_error` |

use std::any::{Any, type_name};
use std::fmt;
use std::rc::{Rc, Weak};

use fwatch_core::{
    AsyncSnapshot, EventStream, Eventual, Listenable, Locator, LocatorExt, ObjectKey,
    ResolutionError, ScopeHandle, StreamEvent, ValueListenable,
};

use crate::config::WatchConfig;
use crate::entry::{
    EntryControl, EntryKind, HandlerCancel, OnceSlot, SnapshotSlot, Teardown, TypeMarker,
    ValueSlot, WatchEntry, is_live,
};
use crate::error::{Result, WatchError};
use crate::list::{PassReport, WatchList};

// ---------------------------------------------------------------------------
// Host seam and options
// ---------------------------------------------------------------------------

/// The single outbound call into the host framework.
pub trait RebuildHost {
    /// Schedule a re-render of the component. Called from notification
    /// callbacks, never from inside a declaration-site call's own bookkeeping.
    fn request_rebuild(&self);
}

/// Seeding rules for stream and eventual watches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncOptions<T> {
    /// Seed of the pending snapshot before the first event.
    pub initial: Option<T>,
    /// On a swap, seed from the previous snapshot's value instead of
    /// `initial` (when the previous snapshot has one).
    pub preserve_state: bool,
}

impl<T> Default for AsyncOptions<T> {
    fn default() -> Self {
        Self {
            initial: None,
            preserve_state: true,
        }
    }
}

impl<T> AsyncOptions<T> {
    #[must_use]
    pub fn with_initial(mut self, initial: T) -> Self {
        self.initial = Some(initial);
        self
    }

    #[must_use]
    pub fn with_preserve_state(mut self, preserve: bool) -> Self {
        self.preserve_state = preserve;
        self
    }
}

/// Error callback for stream handlers.
pub type ErrorHandler<E> = Rc<dyn Fn(&E, &HandlerCancel)>;

/// Options for [`BindingState::register_stream_handler`].
pub struct StreamHandlerOptions<T, E> {
    pub initial: Option<T>,
    /// Invoke the handler with `Pending(initial)` at registration.
    pub execute_immediately: bool,
    /// Receives stream errors instead of the handler.
    pub on_error: Option<ErrorHandler<E>>,
}

impl<T, E> Default for StreamHandlerOptions<T, E> {
    fn default() -> Self {
        Self {
            initial: None,
            execute_immediately: false,
            on_error: None,
        }
    }
}

impl<T, E> StreamHandlerOptions<T, E> {
    #[must_use]
    pub fn with_initial(mut self, initial: T) -> Self {
        self.initial = Some(initial);
        self
    }

    #[must_use]
    pub fn execute_immediately(mut self) -> Self {
        self.execute_immediately = true;
        self
    }

    #[must_use]
    pub fn on_error(mut self, on_error: impl Fn(&E, &HandlerCancel) + 'static) -> Self {
        self.on_error = Some(Rc::new(on_error));
        self
    }
}

impl<T: fmt::Debug, E> fmt::Debug for StreamHandlerOptions<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandlerOptions")
            .field("initial", &self.initial)
            .field("execute_immediately", &self.execute_immediately)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Options for [`BindingState::register_future_handler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FutureHandlerOptions<T> {
    pub initial: Option<T>,
    /// Invoke the handler with `Pending(initial)` at registration.
    pub execute_immediately: bool,
}

impl<T> Default for FutureHandlerOptions<T> {
    fn default() -> Self {
        Self {
            initial: None,
            execute_immediately: false,
        }
    }
}

impl<T> FutureHandlerOptions<T> {
    #[must_use]
    pub fn with_initial(mut self, initial: T) -> Self {
        self.initial = Some(initial);
        self
    }

    #[must_use]
    pub fn execute_immediately(mut self) -> Self {
        self.execute_immediately = true;
        self
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

/// Weak route back to the host, shared by every callback of one state.
#[derive(Clone)]
struct Rebuilder {
    host: Weak<dyn RebuildHost>,
    trace: bool,
}

impl Rebuilder {
    fn request(&self, cause: EntryKind) {
        match self.host.upgrade() {
            Some(host) => {
                if self.trace {
                    tracing::debug!(%cause, "rebuild requested");
                }
                host.request_rebuild();
            }
            None => tracing::trace!(%cause, "host dropped; rebuild request ignored"),
        }
    }
}

/// Outcome of consuming the slot under the cursor.
enum Placement {
    Reuse(usize),
    /// Subscribe fresh; `Some(slot)` replaces that slot, `None` appends.
    Fresh(Option<usize>),
}

// Marker types that give the value-less entries a distinct slot type.
struct CallOnce;
struct OnDispose;

// ---------------------------------------------------------------------------
// BindingState
// ---------------------------------------------------------------------------

/// Watch bookkeeping for one live component instance.
pub struct BindingState {
    list: WatchList,
    locator: Rc<dyn Locator>,
    rebuilder: Rebuilder,
    config: WatchConfig,
    scope: Option<ScopeHandle>,
    scope_pushed: bool,
    in_pass: bool,
    disposed: bool,
}

impl BindingState {
    #[must_use]
    pub fn new(
        locator: Rc<dyn Locator>,
        host: Weak<dyn RebuildHost>,
        config: WatchConfig,
    ) -> Self {
        Self {
            list: WatchList::new(),
            locator,
            rebuilder: Rebuilder {
                host,
                trace: config.trace_rebuilds,
            },
            config,
            scope: None,
            scope_pushed: false,
            in_pass: false,
            disposed: false,
        }
    }

    // -- pass boundaries ----------------------------------------------------

    /// Reset the cursor to the head of the list.
    ///
    /// # Errors
    ///
    /// [`WatchError::Unmounted`] after [`dispose`](Self::dispose).
    pub fn begin_pass(&mut self) -> Result<u64> {
        self.ensure_active()?;
        if self.in_pass {
            tracing::warn!("pass started before the previous one finished");
        }
        self.in_pass = true;
        let pass = self.list.begin_pass();
        tracing::trace!(pass, entries = self.list.len(), "watch pass started");
        Ok(pass)
    }

    /// Close the pass and report what it did.
    ///
    /// # Errors
    ///
    /// [`WatchError::PassShrank`] in strict mode when entries were left
    /// unvisited, [`WatchError::Unmounted`] after dispose.
    pub fn finish_pass(&mut self) -> Result<PassReport> {
        self.ensure_active()?;
        self.in_pass = false;
        let report = self.list.finish_pass();
        tracing::trace!(%report, "watch pass finished");
        if report.unvisited > 0 {
            if self.config.strict_pass_length {
                return Err(WatchError::PassShrank {
                    declared: report.declared(),
                    held: self.list.len(),
                });
            }
            tracing::warn!(
                unvisited = report.unvisited,
                held = self.list.len(),
                "pass declared fewer watches than the list holds; check for conditional watches"
            );
        }
        Ok(report)
    }

    /// Close a pass whose body failed, without the length check.
    pub fn abandon_pass(&mut self) {
        if !self.in_pass {
            return;
        }
        self.in_pass = false;
        let report = self.list.finish_pass();
        tracing::trace!(%report, "watch pass abandoned");
    }

    /// Whether a pass is open.
    #[must_use]
    pub fn in_pass(&self) -> bool {
        self.in_pass
    }

    /// Tear down every entry but keep the state usable. The next pass
    /// repopulates the list from scratch. The pushed scope survives.
    pub fn clear(&mut self) {
        let torn = self.list.clear();
        if torn > 0 {
            tracing::debug!(torn, "binding state cleared");
        }
    }

    /// Tear down every entry and pop the pushed scope. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.in_pass = false;
        let torn = self.list.clear();
        if let Some(handle) = self.scope.take() {
            if let Err(err) = self.locator.pop_scope(handle) {
                tracing::warn!(error = %err, scope = ?handle, "failed to pop component scope");
            }
        }
        tracing::debug!(torn, "binding state disposed");
    }

    // -- listenables --------------------------------------------------------

    /// Rebuild on every notification of `target`. Returns `target`.
    ///
    /// # Errors
    ///
    /// [`WatchError::DuplicateWatch`] if `target` is already watched without a
    /// selector, positional errors, or [`WatchError::Unmounted`].
    pub fn watch<L>(&mut self, target: &L) -> Result<L>
    where
        L: Listenable + Clone + 'static,
    {
        let key = target.identity();
        let kind = EntryKind::Listenable;
        let slot = match self.locate::<TypeMarker<L>>(kind, Some(key))? {
            Placement::Reuse(_) => return Ok(target.clone()),
            Placement::Fresh(slot) => slot,
        };
        self.guard_duplicate(key, slot, |existing| !existing.has_selector())?;
        self.retire(slot);

        let control = EntryControl::new();
        let live = Rc::downgrade(&control);
        let rebuilder = self.rebuilder.clone();
        let subscription = target.listen(Rc::new(move || {
            if is_live(&live) {
                rebuilder.request(kind);
            }
        }));
        control.arm(Teardown::Listener(subscription));
        let entry = WatchEntry::new(kind, Rc::new(TypeMarker::<L>::new()), control)
            .observing(key, target.clone());
        self.install(slot, entry);
        Ok(target.clone())
    }

    /// Resolve `T` and [`watch`](Self::watch) it.
    ///
    /// # Errors
    ///
    /// Resolution errors unchanged, plus everything `watch` returns.
    pub fn watch_it<T>(&mut self, instance_name: Option<&str>) -> Result<Rc<T>>
    where
        T: Listenable + 'static,
    {
        let target = self.resolve::<T>(instance_name)?;
        self.watch(&target)
    }

    /// Resolve `T`, select a listenable from it, watch that and return its
    /// current value.
    ///
    /// # Errors
    ///
    /// Resolution errors unchanged, plus everything `watch` returns.
    pub fn watch_value<T, L, R>(
        &mut self,
        select: impl FnOnce(&T) -> L,
        instance_name: Option<&str>,
    ) -> Result<R>
    where
        T: 'static,
        L: ValueListenable<R> + Clone + 'static,
    {
        let parent = self.resolve::<T>(instance_name)?;
        let target = select(&parent);
        self.watch(&target)?;
        Ok(target.value())
    }

    /// Rebuild only when `select(target)` changes (by `PartialEq`). Returns the
    /// cached selected value.
    ///
    /// The selector is captured the first time the slot is created; later
    /// passes that match the same `target` keep using it.
    ///
    /// # Errors
    ///
    /// [`WatchError::DuplicateWatch`] if another selector watch of `target`
    /// currently selects an equal value, positional errors, or
    /// [`WatchError::Unmounted`].
    pub fn watch_property<L, R>(
        &mut self,
        target: &L,
        select: impl Fn(&L) -> R + 'static,
    ) -> Result<R>
    where
        L: Listenable + Clone + 'static,
        R: Clone + PartialEq + 'static,
    {
        let key = target.identity();
        let kind = EntryKind::Selector;
        let slot = match self.locate::<ValueSlot<R>>(kind, Some(key))? {
            Placement::Reuse(slot) => {
                let cached = self
                    .list
                    .entry(slot)
                    .and_then(WatchEntry::slot::<ValueSlot<R>>)
                    .map(|cache| cache.get());
                return Ok(cached.unwrap_or_else(|| select(target)));
            }
            Placement::Fresh(slot) => slot,
        };
        let selected = select(target);
        self.guard_duplicate(key, slot, |existing| {
            existing.has_selector()
                && existing
                    .slot::<ValueSlot<R>>()
                    .is_some_and(|cache| cache.get() == selected)
        })?;
        self.retire(slot);

        let cache = Rc::new(ValueSlot::new(selected.clone()));
        let control = EntryControl::new();
        let live = Rc::downgrade(&control);
        let rebuilder = self.rebuilder.clone();
        let source = target.clone();
        let callback_cache = Rc::clone(&cache);
        let subscription = target.listen(Rc::new(move || {
            if !is_live(&live) {
                return;
            }
            let fresh = select(&source);
            let previous = callback_cache.replace(fresh.clone());
            if previous != fresh {
                rebuilder.request(kind);
            }
        }));
        control.arm(Teardown::Listener(subscription));
        let entry = WatchEntry::new(kind, cache, control)
            .observing(key, target.clone())
            .with_selector();
        self.install(slot, entry);
        Ok(selected)
    }

    /// Resolve `T` and [`watch_property`](Self::watch_property) it.
    ///
    /// # Errors
    ///
    /// Resolution errors unchanged, plus everything `watch_property` returns.
    pub fn watch_property_value<T, R>(
        &mut self,
        select: impl Fn(&T) -> R + 'static,
        instance_name: Option<&str>,
    ) -> Result<R>
    where
        T: Listenable + 'static,
        R: Clone + PartialEq + 'static,
    {
        let parent = self.resolve::<T>(instance_name)?;
        self.watch_property(&parent, move |parent: &Rc<T>| select(parent))
    }

    // -- streams and eventuals ----------------------------------------------

    /// Rebuild on every data or error event of `stream`. Returns the latest
    /// snapshot.
    ///
    /// # Errors
    ///
    /// [`WatchError::DuplicateWatch`], positional errors, or
    /// [`WatchError::Unmounted`].
    pub fn watch_stream<T, E>(
        &mut self,
        stream: &EventStream<T, E>,
        options: AsyncOptions<T>,
    ) -> Result<AsyncSnapshot<T, E>>
    where
        T: Clone + 'static,
        E: Clone + 'static,
    {
        let key = stream.identity();
        let kind = EntryKind::Stream;
        let slot = match self.locate::<SnapshotSlot<T, E>>(kind, Some(key))? {
            Placement::Reuse(slot) => return Ok(self.snapshot_at(slot, options.initial)),
            Placement::Fresh(slot) => slot,
        };
        self.guard_duplicate(key, slot, |existing| !existing.has_selector())?;
        let seed = self.seed_for::<T, E>(slot, options);
        self.retire(slot);

        let cache = Rc::new(SnapshotSlot::new(AsyncSnapshot::pending(seed)));
        let control = EntryControl::new();
        let live = Rc::downgrade(&control);
        let rebuilder = self.rebuilder.clone();
        let callback_cache = Rc::clone(&cache);
        let subscription = stream.listen(move |event| {
            if !is_live(&live) {
                tracing::trace!("stale stream event ignored");
                return;
            }
            match event {
                StreamEvent::Data(value) => callback_cache.set(AsyncSnapshot::Data(value)),
                StreamEvent::Error(error) => callback_cache.set(AsyncSnapshot::Error(error)),
                StreamEvent::Done => return,
            }
            rebuilder.request(kind);
        });
        control.arm(Teardown::Stream(subscription));
        let snapshot = cache.get();
        let entry = WatchEntry::new(kind, cache, control).observing(key, stream.clone());
        self.install(slot, entry);
        Ok(snapshot)
    }

    /// Resolve `S`, select a stream from it and [`watch_stream`](Self::watch_stream) it.
    ///
    /// # Errors
    ///
    /// Resolution errors unchanged, plus everything `watch_stream` returns.
    pub fn watch_stream_of<S, T, E>(
        &mut self,
        select: impl FnOnce(&S) -> EventStream<T, E>,
        instance_name: Option<&str>,
        options: AsyncOptions<T>,
    ) -> Result<AsyncSnapshot<T, E>>
    where
        S: 'static,
        T: Clone + 'static,
        E: Clone + 'static,
    {
        let parent = self.resolve::<S>(instance_name)?;
        let stream = select(&parent);
        self.watch_stream(&stream, options)
    }

    /// Rebuild once when `eventual` settles, unless the slot was swapped or
    /// torn down first. Returns the latest snapshot; a fresh watch is always
    /// pending, even for an eventual that has already settled.
    ///
    /// An eventual cannot drop a registered waiter, so a torn-down watch
    /// leaves a small inert callback behind until the eventual settles. The
    /// callback holds the snapshot cache and the host only weakly.
    ///
    /// # Errors
    ///
    /// [`WatchError::DuplicateWatch`], positional errors, or
    /// [`WatchError::Unmounted`].
    pub fn watch_future<T, E>(
        &mut self,
        eventual: &Eventual<T, E>,
        options: AsyncOptions<T>,
    ) -> Result<AsyncSnapshot<T, E>>
    where
        T: Clone + 'static,
        E: Clone + 'static,
    {
        let key = eventual.identity();
        let kind = EntryKind::Future;
        let slot = match self.locate::<SnapshotSlot<T, E>>(kind, Some(key))? {
            Placement::Reuse(slot) => return Ok(self.snapshot_at(slot, options.initial)),
            Placement::Fresh(slot) => slot,
        };
        self.guard_duplicate(key, slot, |existing| !existing.has_selector())?;
        let seed = self.seed_for::<T, E>(slot, options);
        self.retire(slot);

        let cache = Rc::new(SnapshotSlot::new(AsyncSnapshot::pending(seed)));
        let control = EntryControl::new();
        let live = Rc::downgrade(&control);
        let rebuilder = self.rebuilder.clone();
        let weak_cache = Rc::downgrade(&cache);
        eventual.then(move |outcome| {
            let cache = weak_cache.upgrade().filter(|_| is_live(&live));
            let Some(cache) = cache else {
                tracing::trace!("stale completion ignored");
                return;
            };
            cache.set(AsyncSnapshot::from_result(outcome));
            rebuilder.request(kind);
        });
        control.arm(Teardown::Future);
        let snapshot = cache.get();
        let entry = WatchEntry::new(kind, cache, control).observing(key, eventual.clone());
        self.install(slot, entry);
        Ok(snapshot)
    }

    /// Resolve `S`, select an eventual from it and [`watch_future`](Self::watch_future) it.
    ///
    /// # Errors
    ///
    /// Resolution errors unchanged, plus everything `watch_future` returns.
    pub fn watch_future_of<S, T, E>(
        &mut self,
        select: impl FnOnce(&S) -> Eventual<T, E>,
        instance_name: Option<&str>,
        options: AsyncOptions<T>,
    ) -> Result<AsyncSnapshot<T, E>>
    where
        S: 'static,
        T: Clone + 'static,
        E: Clone + 'static,
    {
        let parent = self.resolve::<S>(instance_name)?;
        let eventual = select(&parent);
        self.watch_future(&eventual, options)
    }

    // -- handlers -----------------------------------------------------------

    /// Call `handler` with the new value on every notification of `target`.
    /// Never requests a rebuild.
    ///
    /// # Errors
    ///
    /// Positional errors or [`WatchError::Unmounted`].
    pub fn register_handler<L, R>(
        &mut self,
        target: &L,
        handler: impl Fn(R, &HandlerCancel) + 'static,
        execute_immediately: bool,
    ) -> Result<()>
    where
        L: ValueListenable<R> + Clone + 'static,
        R: 'static,
    {
        let key = target.identity();
        let kind = EntryKind::ListenableHandler;
        let slot = match self.locate::<TypeMarker<(L, R)>>(kind, Some(key))? {
            Placement::Reuse(_) => return Ok(()),
            Placement::Fresh(slot) => slot,
        };
        self.retire(slot);

        let handler: Rc<dyn Fn(R, &HandlerCancel)> = Rc::new(handler);
        let control = EntryControl::new();
        let cancel = HandlerCancel::new(&control);
        let live = Rc::downgrade(&control);
        let source = target.clone();
        let callback = Rc::clone(&handler);
        let callback_cancel = cancel.clone();
        let subscription = target.listen(Rc::new(move || {
            if is_live(&live) {
                callback(source.value(), &callback_cancel);
            }
        }));
        control.arm(Teardown::Listener(subscription));
        let entry = WatchEntry::new(kind, Rc::new(TypeMarker::<(L, R)>::new()), control)
            .observing(key, target.clone());
        self.install(slot, entry);
        if execute_immediately && !cancel.is_cancelled() {
            handler(target.value(), &cancel);
        }
        Ok(())
    }

    /// Call `handler` with a snapshot for every data event of `stream`.
    /// Errors go to `options.on_error` when set, otherwise to `handler` as
    /// `AsyncSnapshot::Error`.
    ///
    /// # Errors
    ///
    /// Positional errors or [`WatchError::Unmounted`].
    pub fn register_stream_handler<T, E>(
        &mut self,
        stream: &EventStream<T, E>,
        handler: impl Fn(AsyncSnapshot<T, E>, &HandlerCancel) + 'static,
        options: StreamHandlerOptions<T, E>,
    ) -> Result<()>
    where
        T: Clone + 'static,
        E: Clone + 'static,
    {
        let key = stream.identity();
        let kind = EntryKind::StreamHandler;
        let slot = match self.locate::<TypeMarker<EventStream<T, E>>>(kind, Some(key))? {
            Placement::Reuse(_) => return Ok(()),
            Placement::Fresh(slot) => slot,
        };
        self.retire(slot);

        let handler: Rc<dyn Fn(AsyncSnapshot<T, E>, &HandlerCancel)> = Rc::new(handler);
        let control = EntryControl::new();
        let cancel = HandlerCancel::new(&control);
        let live = Rc::downgrade(&control);
        let callback = Rc::clone(&handler);
        let callback_cancel = cancel.clone();
        let on_error = options.on_error;
        let subscription = stream.listen(move |event| {
            if !is_live(&live) {
                tracing::trace!("stale stream event ignored");
                return;
            }
            match event {
                StreamEvent::Data(value) => callback(AsyncSnapshot::Data(value), &callback_cancel),
                StreamEvent::Error(error) => match &on_error {
                    Some(on_error) => on_error(&error, &callback_cancel),
                    None => callback(AsyncSnapshot::Error(error), &callback_cancel),
                },
                StreamEvent::Done => {}
            }
        });
        control.arm(Teardown::Stream(subscription));
        let entry = WatchEntry::new(kind, Rc::new(TypeMarker::<EventStream<T, E>>::new()), control)
            .observing(key, stream.clone());
        self.install(slot, entry);
        if options.execute_immediately && !cancel.is_cancelled() {
            handler(AsyncSnapshot::pending(options.initial), &cancel);
        }
        Ok(())
    }

    /// Call `handler` once when `eventual` settles, unless the slot was
    /// swapped or torn down first.
    ///
    /// # Errors
    ///
    /// Positional errors or [`WatchError::Unmounted`].
    pub fn register_future_handler<T, E>(
        &mut self,
        eventual: &Eventual<T, E>,
        handler: impl Fn(AsyncSnapshot<T, E>, &HandlerCancel) + 'static,
        options: FutureHandlerOptions<T>,
    ) -> Result<()>
    where
        T: Clone + 'static,
        E: Clone + 'static,
    {
        let key = eventual.identity();
        let kind = EntryKind::FutureHandler;
        let slot = match self.locate::<TypeMarker<Eventual<T, E>>>(kind, Some(key))? {
            Placement::Reuse(_) => return Ok(()),
            Placement::Fresh(slot) => slot,
        };
        self.retire(slot);

        let handler: Rc<dyn Fn(AsyncSnapshot<T, E>, &HandlerCancel)> = Rc::new(handler);
        let control = EntryControl::new();
        let cancel = HandlerCancel::new(&control);
        let live = Rc::downgrade(&control);
        let callback = Rc::downgrade(&handler);
        let callback_cancel = cancel.clone();
        eventual.then(move |outcome| {
            let callback = callback.upgrade().filter(|_| is_live(&live));
            let Some(callback) = callback else {
                tracing::trace!("stale completion ignored");
                return;
            };
            callback(AsyncSnapshot::from_result(outcome), &callback_cancel);
        });
        control.arm(Teardown::Future);
        let marker = Rc::new(TypeMarker::<Eventual<T, E>>::new());
        let entry = WatchEntry::new(kind, marker, control)
            .observing(key, (eventual.clone(), Rc::clone(&handler)));
        self.install(slot, entry);
        if options.execute_immediately && !cancel.is_cancelled() {
            handler(AsyncSnapshot::pending(options.initial), &cancel);
        }
        Ok(())
    }

    // -- one-shot bookkeeping -----------------------------------------------

    /// Open a nested resolution scope and run `init` inside it, once per
    /// component lifetime. `teardown` runs when the scope is popped at
    /// dispose. Not positional: later calls are no-ops.
    ///
    /// # Errors
    ///
    /// [`WatchError::Unmounted`].
    pub fn push_scope(
        &mut self,
        init: impl FnOnce(&dyn Locator),
        teardown: Option<Box<dyn FnOnce()>>,
    ) -> Result<()> {
        self.ensure_active()?;
        if self.scope_pushed {
            return Ok(());
        }
        self.scope_pushed = true;
        let handle = self.locator.push_scope(None, teardown);
        tracing::debug!(scope = ?handle, "component scope pushed");
        self.scope = Some(handle);
        init(self.locator.as_ref());
        Ok(())
    }

    /// Run `init` the first time this slot is declared; run `dispose` when
    /// the slot is torn down.
    ///
    /// # Errors
    ///
    /// Positional errors or [`WatchError::Unmounted`].
    pub fn call_once(
        &mut self,
        init: impl FnOnce(),
        dispose: Option<Box<dyn FnOnce()>>,
    ) -> Result<()> {
        let slot = match self.locate::<TypeMarker<CallOnce>>(EntryKind::Once, None)? {
            Placement::Reuse(_) => return Ok(()),
            Placement::Fresh(slot) => slot,
        };
        self.retire(slot);
        init();
        let control = EntryControl::new();
        if let Some(dispose) = dispose {
            control.arm(Teardown::Callback(dispose));
        }
        let marker = Rc::new(TypeMarker::<CallOnce>::new());
        let entry = WatchEntry::new(EntryKind::Once, marker, control);
        self.install(slot, entry);
        Ok(())
    }

    /// Create a value the first time this slot is declared and return the
    /// same value on every later pass. `dispose` receives it at teardown.
    ///
    /// # Errors
    ///
    /// Positional errors or [`WatchError::Unmounted`].
    pub fn create_once<T: 'static>(
        &mut self,
        factory: impl FnOnce() -> T,
        dispose: Option<Box<dyn FnOnce(&T)>>,
    ) -> Result<Rc<T>> {
        let slot = match self.locate::<OnceSlot<T>>(EntryKind::Once, None)? {
            Placement::Reuse(slot) => {
                let held = self.list.entry(slot).and_then(WatchEntry::slot::<OnceSlot<T>>);
                if let Some(once) = held {
                    return Ok(Rc::clone(&once.value));
                }
                Some(slot)
            }
            Placement::Fresh(slot) => slot,
        };
        self.retire(slot);
        let value = Rc::new(factory());
        let control = EntryControl::new();
        if let Some(dispose) = dispose {
            let held = Rc::clone(&value);
            control.arm(Teardown::Callback(Box::new(move || dispose(&held))));
        }
        let once = Rc::new(OnceSlot {
            value: Rc::clone(&value),
        });
        self.install(slot, WatchEntry::new(EntryKind::Once, once, control));
        Ok(value)
    }

    /// Run `callback` when this slot is torn down (clear or dispose). Only
    /// the first declaration's callback is kept.
    ///
    /// # Errors
    ///
    /// Positional errors or [`WatchError::Unmounted`].
    pub fn on_dispose(&mut self, callback: impl FnOnce() + 'static) -> Result<()> {
        let slot = match self.locate::<TypeMarker<OnDispose>>(EntryKind::Dispose, None)? {
            Placement::Reuse(_) => return Ok(()),
            Placement::Fresh(slot) => slot,
        };
        self.retire(slot);
        let control = EntryControl::new();
        control.arm(Teardown::Callback(Box::new(callback)));
        let entry = WatchEntry::new(
            EntryKind::Dispose,
            Rc::new(TypeMarker::<OnDispose>::new()),
            control,
        );
        self.install(slot, entry);
        Ok(())
    }

    // -- resolver pass-through ----------------------------------------------

    /// Plain lookup. Not positional.
    ///
    /// # Errors
    ///
    /// [`WatchError::Resolution`] with the resolver's error unchanged.
    pub fn resolve<T: Any>(&self, instance_name: Option<&str>) -> Result<Rc<T>> {
        Ok(self.locator.resolve::<T>(instance_name)?)
    }

    /// Asynchronous lookup, suitable for [`watch_future`](Self::watch_future).
    #[must_use]
    pub fn resolve_async<T: Any>(
        &self,
        instance_name: Option<&str>,
    ) -> Eventual<Rc<T>, ResolutionError> {
        self.locator.resolve_async::<T>(instance_name)
    }

    #[must_use]
    pub fn locator(&self) -> &Rc<dyn Locator> {
        &self.locator
    }

    // -- introspection ------------------------------------------------------

    #[must_use]
    pub fn list(&self) -> &WatchList {
        &self.list
    }

    #[must_use]
    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    #[must_use]
    pub fn scope_pushed(&self) -> bool {
        self.scope_pushed
    }

    // -- reconciliation helpers ---------------------------------------------

    fn ensure_active(&self) -> Result<()> {
        if self.disposed {
            Err(WatchError::Unmounted)
        } else {
            Ok(())
        }
    }

    fn locate<S: Any>(&mut self, kind: EntryKind, key: Option<ObjectKey>) -> Result<Placement> {
        self.ensure_active()?;
        let Some(slot) = self.list.next_slot() else {
            return Ok(Placement::Fresh(None));
        };
        let Some(entry) = self.list.entry(slot) else {
            return Ok(Placement::Fresh(None));
        };
        if entry.kind() != kind || entry.slot::<S>().is_none() {
            let err = WatchError::mismatch(
                slot,
                kind,
                type_name::<S>(),
                entry.kind(),
                entry.slot_type(),
            );
            if self.config.check_positional {
                return Err(err);
            }
            tracing::warn!(
                slot,
                error = %err,
                "replacing entry that does not match its declaration"
            );
            return Ok(Placement::Fresh(Some(slot)));
        }
        if entry.observed() == key {
            self.list.record_match();
            Ok(Placement::Reuse(slot))
        } else {
            Ok(Placement::Fresh(Some(slot)))
        }
    }

    fn guard_duplicate(
        &self,
        key: ObjectKey,
        current: Option<usize>,
        same_selection: impl Fn(&WatchEntry) -> bool,
    ) -> Result<()> {
        match self.list.find_watching(key, current, same_selection) {
            Some(existing) => Err(WatchError::DuplicateWatch {
                object: key.to_string(),
                existing,
            }),
            None => Ok(()),
        }
    }

    fn seed_for<T: Clone + 'static, E: Clone + 'static>(
        &self,
        slot: Option<usize>,
        options: AsyncOptions<T>,
    ) -> Option<T> {
        let carried = if options.preserve_state {
            slot.and_then(|slot| self.list.entry(slot))
                .and_then(WatchEntry::slot::<SnapshotSlot<T, E>>)
                .and_then(|cache| cache.carried_value())
        } else {
            None
        };
        carried.or(options.initial)
    }

    fn snapshot_at<T: Clone + 'static, E: Clone + 'static>(
        &self,
        slot: usize,
        initial: Option<T>,
    ) -> AsyncSnapshot<T, E> {
        self.list
            .entry(slot)
            .and_then(WatchEntry::slot::<SnapshotSlot<T, E>>)
            .map_or_else(|| AsyncSnapshot::pending(initial), |cache| cache.get())
    }

    fn retire(&mut self, slot: Option<usize>) {
        if let Some(slot) = slot {
            self.list.dispose_at(slot);
        }
    }

    fn install(&mut self, slot: Option<usize>, entry: WatchEntry) -> usize {
        let kind = entry.kind();
        let observed = entry.observed();
        match slot {
            Some(slot) => {
                self.list.replace(slot, entry);
                tracing::debug!(slot, %kind, ?observed, "entry replaced");
                slot
            }
            None => {
                let slot = self.list.append(entry);
                tracing::debug!(slot, %kind, ?observed, "entry created");
                slot
            }
        }
    }
}

impl Drop for BindingState {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for BindingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingState")
            .field("list", &self.list)
            .field("config", &self.config)
            .field("scope", &self.scope)
            .field("in_pass", &self.in_pass)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}
