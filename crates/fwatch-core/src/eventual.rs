#![forbid(unsafe_code)]

//! Single-completion, future-like values.
//!
//! An [`Eventual<T, E>`] settles once, with `Ok(T)` or `Err(E)`. Callbacks
//! registered with [`then`](Eventual::then) always run later through the
//! scheduler, even when the eventual has already settled. There is no way to
//! unregister a callback: consumers that can be superseded must guard their
//! callbacks with their own liveness check.
//!
//! [`Eventual::spawn_local`] bridges an ordinary Rust `Future` driven by a
//! `futures` local executor.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures::executor::LocalSpawner;
use futures::task::{LocalSpawnExt, SpawnError};

use crate::observable::ObjectKey;
use crate::scheduler::Scheduler;

type Waiter<T, E> = Box<dyn FnOnce(Result<T, E>)>;

struct EventualShared<T, E> {
    outcome: Option<Result<T, E>>,
    waiters: Vec<Waiter<T, E>>,
}

/// A value that becomes available once. Clones share the same outcome.
pub struct Eventual<T, E> {
    shared: Rc<RefCell<EventualShared<T, E>>>,
    scheduler: Rc<dyn Scheduler>,
}

impl<T, E> Clone for Eventual<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
            scheduler: Rc::clone(&self.scheduler),
        }
    }
}

impl<T, E> fmt::Debug for Eventual<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.shared.borrow();
        f.debug_struct("Eventual")
            .field("complete", &shared.outcome.is_some())
            .field("waiters", &shared.waiters.len())
            .finish()
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Eventual<T, E> {
    /// An unsettled eventual and the completer that settles it.
    #[must_use]
    pub fn pending(scheduler: Rc<dyn Scheduler>) -> (Self, Completer<T, E>) {
        let eventual = Self {
            shared: Rc::new(RefCell::new(EventualShared {
                outcome: None,
                waiters: Vec::new(),
            })),
            scheduler,
        };
        let completer = Completer {
            eventual: eventual.clone(),
        };
        (eventual, completer)
    }

    /// An eventual that has already succeeded.
    #[must_use]
    pub fn ready(value: T, scheduler: Rc<dyn Scheduler>) -> Self {
        let (eventual, completer) = Self::pending(scheduler);
        completer.complete(Ok(value));
        eventual
    }

    /// An eventual that has already failed.
    #[must_use]
    pub fn failed(error: E, scheduler: Rc<dyn Scheduler>) -> Self {
        let (eventual, completer) = Self::pending(scheduler);
        completer.complete(Err(error));
        eventual
    }

    /// Drive `future` on a local executor and settle with its output.
    ///
    /// # Errors
    ///
    /// Returns the spawner's error if the executor has shut down.
    pub fn spawn_local<F>(spawner: &LocalSpawner, future: F) -> Result<Self, SpawnError>
    where
        F: Future<Output = Result<T, E>> + 'static,
    {
        let (eventual, completer) = Self::pending(Rc::new(spawner.clone()));
        spawner.spawn_local(async move {
            let outcome = future.await;
            completer.complete(outcome);
        })?;
        Ok(eventual)
    }

    /// Stable identity of this eventual.
    #[must_use]
    pub fn identity(&self) -> ObjectKey {
        ObjectKey::of(&self.shared)
    }

    /// Run `callback` with the outcome, later, through the scheduler.
    pub fn then(&self, callback: impl FnOnce(Result<T, E>) + 'static) {
        let settled = self.shared.borrow().outcome.clone();
        match settled {
            Some(outcome) => self
                .scheduler
                .schedule(Box::new(move || callback(outcome))),
            None => self.shared.borrow_mut().waiters.push(Box::new(callback)),
        }
    }

    /// Derive a new eventual from this one's success value.
    #[must_use]
    pub fn try_map<U: Clone + 'static>(
        &self,
        f: impl FnOnce(T) -> Result<U, E> + 'static,
    ) -> Eventual<U, E> {
        let (mapped, completer) = Eventual::pending(Rc::clone(&self.scheduler));
        self.then(move |outcome| {
            completer.complete(outcome.and_then(f));
        });
        mapped
    }

    /// Infallible variant of [`try_map`](Self::try_map).
    #[must_use]
    pub fn map<U: Clone + 'static>(&self, f: impl FnOnce(T) -> U + 'static) -> Eventual<U, E> {
        self.try_map(move |value| Ok(f(value)))
    }

    /// Whether the eventual has settled.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.shared.borrow().outcome.is_some()
    }

    /// The outcome, if settled.
    #[must_use]
    pub fn peek(&self) -> Option<Result<T, E>> {
        self.shared.borrow().outcome.clone()
    }
}

// ---------------------------------------------------------------------------
// Completer
// ---------------------------------------------------------------------------

/// Settles an [`Eventual`]. Only the first completion counts.
pub struct Completer<T, E> {
    eventual: Eventual<T, E>,
}

impl<T: Clone + 'static, E: Clone + 'static> Completer<T, E> {
    /// Settle with `outcome`. Returns `false` if already settled.
    pub fn complete(&self, outcome: Result<T, E>) -> bool {
        let waiters = {
            let mut shared = self.eventual.shared.borrow_mut();
            if shared.outcome.is_some() {
                return false;
            }
            shared.outcome = Some(outcome.clone());
            std::mem::take(&mut shared.waiters)
        };
        for waiter in waiters {
            let outcome = outcome.clone();
            self.eventual
                .scheduler
                .schedule(Box::new(move || waiter(outcome)));
        }
        true
    }

    /// Whether the eventual has settled.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.eventual.is_complete()
    }

    /// The eventual this completer settles.
    #[must_use]
    pub fn eventual(&self) -> Eventual<T, E> {
        self.eventual.clone()
    }
}

impl<T, E> fmt::Debug for Completer<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("eventual", &self.eventual)
            .finish()
    }
}
