#![forbid(unsafe_code)]

//! The host event-loop seam.
//!
//! Asynchronous sources ([`EventStream`](crate::stream::EventStream),
//! [`Eventual`](crate::eventual::Eventual)) never call their listeners inline:
//! every delivery is handed to a [`Scheduler`] and runs later, as an
//! independent callback. This keeps render passes free of async re-entrancy.
//!
//! [`EventLoop`] is the deterministic FIFO implementation used by tests and by
//! hosts that drive their own frame loop. Hosts running a `futures` local
//! executor can pass its [`LocalSpawner`] directly.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use futures::executor::LocalSpawner;
use futures::task::LocalSpawnExt;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Accepts tasks to run later on the host's single logical thread.
pub trait Scheduler {
    /// Queue `task`. It must not run before this call returns.
    fn schedule(&self, task: Task);
}

impl<S: Scheduler + ?Sized> Scheduler for Rc<S> {
    fn schedule(&self, task: Task) {
        (**self).schedule(task);
    }
}

impl Scheduler for LocalSpawner {
    fn schedule(&self, task: Task) {
        if let Err(err) = self.spawn_local(async move { task() }) {
            tracing::warn!(error = %err, "local executor is gone; dropping scheduled task");
        }
    }
}

// ---------------------------------------------------------------------------
// EventLoop
// ---------------------------------------------------------------------------

/// Deterministic FIFO task queue.
///
/// Tasks queued while the loop is draining run in the same drain, after
/// everything queued before them.
///
/// # Invariants
///
/// 1. Tasks run in exactly the order they were scheduled.
/// 2. No task runs inside [`schedule`](Scheduler::schedule).
/// 3. The queue is never borrowed while a task runs, so tasks may schedule
///    more work.
#[derive(Clone, Default)]
pub struct EventLoop {
    queue: Rc<RefCell<VecDeque<Task>>>,
}

impl EventLoop {
    /// Create an empty loop.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared scheduler handle for sources that need to own one.
    #[must_use]
    pub fn scheduler(&self) -> Rc<dyn Scheduler> {
        Rc::new(self.clone())
    }

    /// Run the oldest queued task. Returns `false` when the queue was empty.
    pub fn run_one(&self) -> bool {
        let next = self.queue.borrow_mut().pop_front();
        match next {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run tasks until the queue is empty. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}

impl Scheduler for EventLoop {
    fn schedule(&self, task: Task) {
        self.queue.borrow_mut().push_back(task);
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::LocalPool;

    #[test]
    fn runs_in_fifo_order() {
        let lp = EventLoop::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..4 {
            let l = Rc::clone(&log);
            lp.schedule(Box::new(move || l.borrow_mut().push(i)));
        }
        assert_eq!(lp.pending(), 4);
        assert!(log.borrow().is_empty());
        assert_eq!(lp.run_until_idle(), 4);
        assert_eq!(*log.borrow(), vec![0, 1, 2, 3]);
        assert!(lp.is_idle());
    }

    #[test]
    fn tasks_may_schedule_more_work() {
        let lp = EventLoop::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let inner_lp = lp.clone();
        let l = Rc::clone(&log);
        lp.schedule(Box::new(move || {
            l.borrow_mut().push("outer");
            let l2 = Rc::clone(&l);
            inner_lp.schedule(Box::new(move || l2.borrow_mut().push("inner")));
        }));
        assert_eq!(lp.run_until_idle(), 2);
        assert_eq!(*log.borrow(), vec!["outer", "inner"]);
    }

    #[test]
    fn local_spawner_runs_tasks_on_pool() {
        let mut pool = LocalPool::new();
        let spawner = pool.spawner();
        let hit = Rc::new(RefCell::new(false));
        let h = Rc::clone(&hit);
        spawner.schedule(Box::new(move || *h.borrow_mut() = true));
        assert!(!*hit.borrow());
        pool.run_until_stalled();
        assert!(*hit.borrow());
    }
}
