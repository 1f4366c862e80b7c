#![forbid(unsafe_code)]

//! Broadcast push streams with asynchronous delivery.
//!
//! A [`StreamController`] owns the producing side; any number of
//! [`EventStream`] handles can be cloned from it and listened to. Every event
//! is delivered through the controller's [`Scheduler`], never inline.
//!
//! # Invariants
//!
//! 1. Each listener sees events in the order they were added.
//! 2. Cancelling a [`StreamSubscription`] suppresses every delivery that has
//!    not run yet, including ones already queued on the scheduler.
//! 3. After [`close`](StreamController::close) no further data or error
//!    events are accepted; late listeners receive a single `Done`.
//!
//! # Failure Modes
//!
//! - `add` after `close`: ignored (returns `false`).
//! - Scheduler dropped its queue: pending deliveries are lost silently.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::observable::ObjectKey;
use crate::scheduler::Scheduler;

/// One event delivered to a stream listener.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent<T, E> {
    /// A value was emitted.
    Data(T),
    /// An error was emitted. The stream stays open.
    Error(E),
    /// The stream closed.
    Done,
}

struct Listener<T, E> {
    id: u64,
    active: Cell<bool>,
    callback: Box<dyn Fn(StreamEvent<T, E>)>,
}

impl<T, E> Listener<T, E> {
    fn deliver(&self, event: StreamEvent<T, E>) {
        if self.active.get() {
            (self.callback)(event);
        }
    }
}

struct StreamShared<T, E> {
    listeners: Vec<Rc<Listener<T, E>>>,
    next_id: u64,
    closed: bool,
}

// ---------------------------------------------------------------------------
// EventStream
// ---------------------------------------------------------------------------

/// Listening side of a broadcast stream. Clones share the same stream.
pub struct EventStream<T, E> {
    shared: Rc<RefCell<StreamShared<T, E>>>,
    scheduler: Rc<dyn Scheduler>,
}

impl<T, E> Clone for EventStream<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
            scheduler: Rc::clone(&self.scheduler),
        }
    }
}

impl<T, E> fmt::Debug for EventStream<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.shared.borrow();
        f.debug_struct("EventStream")
            .field("listeners", &shared.listeners.len())
            .field("closed", &shared.closed)
            .finish()
    }
}

impl<T: Clone + 'static, E: Clone + 'static> EventStream<T, E> {
    /// Stable identity of this stream.
    #[must_use]
    pub fn identity(&self) -> ObjectKey {
        ObjectKey::of(&self.shared)
    }

    /// Start listening. Events arrive later, through the scheduler.
    pub fn listen(&self, callback: impl Fn(StreamEvent<T, E>) + 'static) -> StreamSubscription {
        let (listener, closed) = {
            let mut shared = self.shared.borrow_mut();
            let id = shared.next_id;
            shared.next_id += 1;
            let listener = Rc::new(Listener {
                id,
                active: Cell::new(true),
                callback: Box::new(callback),
            });
            if !shared.closed {
                shared.listeners.push(Rc::clone(&listener));
            }
            (listener, shared.closed)
        };

        if closed {
            let late = Rc::clone(&listener);
            self.scheduler
                .schedule(Box::new(move || late.deliver(StreamEvent::Done)));
        }

        let weak_shared: Weak<RefCell<StreamShared<T, E>>> = Rc::downgrade(&self.shared);
        let id = listener.id;
        StreamSubscription {
            cancel: Some(Box::new(move || {
                listener.active.set(false);
                if let Some(shared) = weak_shared.upgrade() {
                    shared.borrow_mut().listeners.retain(|l| l.id != id);
                }
            })),
        }
    }

    /// Number of active listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.shared.borrow().listeners.len()
    }

    /// Whether the producing side has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.borrow().closed
    }

    fn dispatch(&self, make: impl Fn() -> StreamEvent<T, E>) {
        let targets: Vec<Rc<Listener<T, E>>> = self
            .shared
            .borrow()
            .listeners
            .iter()
            .filter(|l| l.active.get())
            .cloned()
            .collect();
        for listener in targets {
            let event = make();
            self.scheduler
                .schedule(Box::new(move || listener.deliver(event)));
        }
    }
}

// ---------------------------------------------------------------------------
// StreamSubscription
// ---------------------------------------------------------------------------

/// Cancellation handle for a stream listener. Dropping it cancels.
#[must_use = "dropping a StreamSubscription cancels it immediately"]
pub struct StreamSubscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl StreamSubscription {
    /// Cancel now. Safe to call from inside the listener itself.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Whether this handle still owns a live listener.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }
}

impl Drop for StreamSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for StreamSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSubscription")
            .field("active", &self.is_active())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// StreamController
// ---------------------------------------------------------------------------

/// Producing side of a broadcast stream.
pub struct StreamController<T, E> {
    stream: EventStream<T, E>,
}

impl<T: Clone + 'static, E: Clone + 'static> StreamController<T, E> {
    /// Create an open stream that delivers through `scheduler`.
    #[must_use]
    pub fn new(scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            stream: EventStream {
                shared: Rc::new(RefCell::new(StreamShared {
                    listeners: Vec::new(),
                    next_id: 0,
                    closed: false,
                })),
                scheduler,
            },
        }
    }

    /// A listening handle for this stream.
    #[must_use]
    pub fn stream(&self) -> EventStream<T, E> {
        self.stream.clone()
    }

    /// Emit a value. Returns `false` if the stream is closed.
    pub fn add(&self, value: T) -> bool {
        if self.stream.is_closed() {
            return false;
        }
        self.stream.dispatch(|| StreamEvent::Data(value.clone()));
        true
    }

    /// Emit an error. Returns `false` if the stream is closed.
    pub fn add_error(&self, error: E) -> bool {
        if self.stream.is_closed() {
            return false;
        }
        self.stream.dispatch(|| StreamEvent::Error(error.clone()));
        true
    }

    /// Close the stream, delivering `Done` to current listeners.
    pub fn close(&self) {
        if self.stream.is_closed() {
            return;
        }
        self.stream.shared.borrow_mut().closed = true;
        self.stream.dispatch(|| StreamEvent::Done);
        self.stream.shared.borrow_mut().listeners.clear();
    }

    /// Whether anyone is listening.
    #[must_use]
    pub fn has_listener(&self) -> bool {
        self.stream.listener_count() > 0
    }
}

impl<T, E> fmt::Debug for StreamController<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamController")
            .field("stream", &self.stream)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::EventLoop;

    type Log = Rc<RefCell<Vec<StreamEvent<i32, String>>>>;

    fn recorder(log: &Log) -> impl Fn(StreamEvent<i32, String>) + 'static {
        let log = Rc::clone(log);
        move |event| log.borrow_mut().push(event)
    }

    #[test]
    fn delivery_is_deferred_and_ordered() {
        let lp = EventLoop::new();
        let ctl = StreamController::<i32, String>::new(lp.scheduler());
        let log: Log = Rc::default();
        let _sub = ctl.stream().listen(recorder(&log));

        ctl.add(1);
        ctl.add_error("bad".into());
        ctl.add(2);
        assert!(log.borrow().is_empty());

        lp.run_until_idle();
        assert_eq!(
            *log.borrow(),
            vec![
                StreamEvent::Data(1),
                StreamEvent::Error("bad".into()),
                StreamEvent::Data(2)
            ]
        );
    }

    #[test]
    fn cancel_suppresses_queued_events() {
        let lp = EventLoop::new();
        let ctl = StreamController::<i32, String>::new(lp.scheduler());
        let log: Log = Rc::default();
        let mut sub = ctl.stream().listen(recorder(&log));

        ctl.add(1);
        sub.cancel();
        lp.run_until_idle();
        assert!(log.borrow().is_empty());
        assert!(!ctl.has_listener());
    }

    #[test]
    fn drop_cancels() {
        let lp = EventLoop::new();
        let ctl = StreamController::<i32, String>::new(lp.scheduler());
        let log: Log = Rc::default();
        drop(ctl.stream().listen(recorder(&log)));
        ctl.add(5);
        lp.run_until_idle();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn close_delivers_done_and_rejects_further_events() {
        let lp = EventLoop::new();
        let ctl = StreamController::<i32, String>::new(lp.scheduler());
        let log: Log = Rc::default();
        let _sub = ctl.stream().listen(recorder(&log));

        ctl.close();
        assert!(!ctl.add(9));
        lp.run_until_idle();
        assert_eq!(*log.borrow(), vec![StreamEvent::Done]);

        let late: Log = Rc::default();
        let _late_sub = ctl.stream().listen(recorder(&late));
        lp.run_until_idle();
        assert_eq!(*late.borrow(), vec![StreamEvent::Done]);
    }

    #[test]
    fn broadcast_to_every_listener() {
        let lp = EventLoop::new();
        let ctl = StreamController::<i32, String>::new(lp.scheduler());
        let a: Log = Rc::default();
        let b: Log = Rc::default();
        let _sa = ctl.stream().listen(recorder(&a));
        let _sb = ctl.stream().listen(recorder(&b));
        ctl.add(3);
        lp.run_until_idle();
        assert_eq!(*a.borrow(), vec![StreamEvent::Data(3)]);
        assert_eq!(*b.borrow(), vec![StreamEvent::Data(3)]);
    }

    #[test]
    fn clones_share_identity() {
        let lp = EventLoop::new();
        let ctl = StreamController::<i32, String>::new(lp.scheduler());
        let other = StreamController::<i32, String>::new(lp.scheduler());
        assert_eq!(ctl.stream().identity(), ctl.stream().identity());
        assert_ne!(ctl.stream().identity(), other.stream().identity());
    }
}
