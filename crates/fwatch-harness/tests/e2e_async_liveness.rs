#![forbid(unsafe_code)]

//! Stale asynchronous deliveries must be inert once their entry is gone.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use fwatch_core::{AsyncSnapshot, Eventual, Observable, StreamController};
use fwatch_harness::{Harness, assert_pass};
use fwatch_runtime::{AsyncOptions, FutureHandlerOptions, StreamHandlerOptions};
use futures::executor::LocalPool;

type Snap = AsyncSnapshot<i32, String>;

#[test]
fn future_completing_after_unmount_is_ignored() {
    let mut harness = Harness::new(|_| Ok(Snap::pending(None)));
    let (eventual, completer) = Eventual::<i32, String>::pending(harness.events().scheduler());
    let watched = eventual.clone();
    harness.set_body(move |state| state.watch_future(&watched, AsyncOptions::default()));
    harness.mount().unwrap();

    harness.unmount();
    completer.complete(Ok(5));
    assert_eq!(harness.pump().unwrap(), 0);
    assert_eq!(harness.rebuild_requests(), 0);
    assert_eq!(harness.output(), Some(&Snap::Pending(None)));
}

#[test]
fn completion_queued_before_swap_is_dropped() {
    let mut harness = Harness::new(|_| Ok(Snap::pending(None)));
    let scheduler = harness.events().scheduler();
    let (old, old_done) = Eventual::<i32, String>::pending(Rc::clone(&scheduler));
    let (new, _new_done) = Eventual::<i32, String>::pending(scheduler);
    let use_new = Rc::new(Cell::new(false));
    let flag = Rc::clone(&use_new);
    harness.set_body(move |state| {
        let target = if flag.get() { &new } else { &old };
        state.watch_future(target, AsyncOptions::default().with_initial(0))
    });
    harness.mount().unwrap();

    // Completion is queued on the loop, then the slot swaps before it runs.
    old_done.complete(Ok(1));
    use_new.set(true);
    harness.render().unwrap();
    assert_pass!(harness, replaced = 1);

    assert_eq!(harness.pump().unwrap(), 0);
    assert_eq!(harness.rebuild_requests(), 0);
    assert_eq!(harness.output(), Some(&Snap::Pending(Some(0))));
}

#[test]
fn stream_events_queued_before_swap_are_dropped() {
    let mut harness = Harness::new(|_| Ok(Snap::pending(None)));
    let scheduler = harness.events().scheduler();
    let a = StreamController::<i32, String>::new(Rc::clone(&scheduler));
    let b = StreamController::<i32, String>::new(scheduler);
    let use_b = Rc::new(Cell::new(false));
    let (sa, sb, flag) = (a.stream(), b.stream(), Rc::clone(&use_b));
    harness.set_body(move |state| {
        let stream = if flag.get() { &sb } else { &sa };
        state.watch_stream(stream, AsyncOptions::default())
    });
    harness.mount().unwrap();

    a.add(1);
    a.add(2);
    use_b.set(true);
    harness.render().unwrap();
    assert_eq!(harness.pump().unwrap(), 0);

    b.add(3);
    assert_eq!(harness.pump().unwrap(), 1);
    assert_eq!(harness.output(), Some(&Snap::Data(3)));
}

#[test]
fn future_driven_by_a_local_executor() {
    let mut pool = LocalPool::new();
    let spawner = pool.spawner();
    let (open, gate) = futures::channel::oneshot::channel::<i32>();
    let eventual = Eventual::<i32, String>::spawn_local(&spawner, async move {
        gate.await.map_err(|_| "cancelled".to_owned())
    })
    .unwrap();

    let mut harness =
        Harness::new(move |state| state.watch_future(&eventual, AsyncOptions::default()));
    assert!(harness.mount().unwrap().is_pending());

    pool.run_until_stalled();
    assert_eq!(harness.rebuild_requests(), 0);

    open.send(11).unwrap();
    pool.run_until_stalled();
    assert_eq!(harness.rebuild_requests(), 1);
    harness.pump().unwrap();
    assert_eq!(harness.output(), Some(&Snap::Data(11)));
}

#[test]
fn stream_handler_routes_errors_and_fires_immediately() {
    let mut harness = Harness::new(|_| Ok(()));
    let ctl = StreamController::<i32, String>::new(harness.events().scheduler());
    let seen = Rc::new(RefCell::new(Vec::<Snap>::new()));
    let errors = Rc::new(RefCell::new(Vec::<String>::new()));
    let (stream, s, e) = (ctl.stream(), Rc::clone(&seen), Rc::clone(&errors));
    harness.set_body(move |state| {
        let s = Rc::clone(&s);
        let e = Rc::clone(&e);
        let options = StreamHandlerOptions::default()
            .with_initial(-1)
            .execute_immediately()
            .on_error(move |err: &String, _| e.borrow_mut().push(err.clone()));
        state.register_stream_handler(&stream, move |snap, _| s.borrow_mut().push(snap), options)
    });
    harness.mount().unwrap();
    harness.render().unwrap();

    ctl.add(1);
    ctl.add_error("bad".into());
    ctl.add(2);
    harness.pump().unwrap();

    assert_eq!(
        *seen.borrow(),
        vec![Snap::Pending(Some(-1)), Snap::Data(1), Snap::Data(2)]
    );
    assert_eq!(*errors.borrow(), vec!["bad".to_owned()]);
    assert_eq!(harness.rebuild_requests(), 0);
}

#[test]
fn stream_handler_cancelling_itself_stops_delivery() {
    let mut harness = Harness::new(|_| Ok(()));
    let ctl = StreamController::<i32, String>::new(harness.events().scheduler());
    let seen = Rc::new(RefCell::new(Vec::new()));
    let (stream, s) = (ctl.stream(), Rc::clone(&seen));
    harness.set_body(move |state| {
        let s = Rc::clone(&s);
        state.register_stream_handler(
            &stream,
            move |snap: Snap, cancel| {
                s.borrow_mut().push(snap);
                cancel.cancel();
            },
            StreamHandlerOptions::default(),
        )
    });
    harness.mount().unwrap();

    ctl.add(1);
    ctl.add(2);
    harness.pump().unwrap();
    assert_eq!(*seen.borrow(), vec![Snap::Data(1)]);
    assert!(!ctl.has_listener());
}

#[test]
fn future_handler_fires_once_unless_superseded() {
    let mut harness = Harness::new(|_| Ok(()));
    let scheduler = harness.events().scheduler();
    let (first, first_done) = Eventual::<i32, String>::pending(Rc::clone(&scheduler));
    let (second, second_done) = Eventual::<i32, String>::pending(scheduler);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let use_second = Rc::new(Cell::new(false));
    let (s, flag) = (Rc::clone(&seen), Rc::clone(&use_second));
    harness.set_body(move |state| {
        let s = Rc::clone(&s);
        let target = if flag.get() { &second } else { &first };
        state.register_future_handler(
            target,
            move |snap: Snap, _| s.borrow_mut().push(snap),
            FutureHandlerOptions::default(),
        )
    });
    harness.mount().unwrap();
    use_second.set(true);
    harness.render().unwrap();

    first_done.complete(Ok(1));
    second_done.complete(Err("late".into()));
    harness.pump().unwrap();
    assert_eq!(*seen.borrow(), vec![Snap::Error("late".into())]);
}

#[test]
fn selector_callbacks_stop_after_clear() {
    let counter = Observable::new(0);
    let watched = counter.clone();
    let mut harness = Harness::new(move |state| state.watch_property(&watched, |c| c.get() / 10));
    harness.mount().unwrap();
    counter.set(10);
    assert_eq!(harness.rebuild_requests(), 1);

    harness.update_without_render(true);
    counter.set(20);
    assert_eq!(harness.rebuild_requests(), 1);
    assert_eq!(counter.subscriber_count(), 0);
}
