#![forbid(unsafe_code)]

//! End-to-end scenarios: components driven through the harness host.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use fwatch_core::{
    AsyncSnapshot, Eventual, LocatorExt, Notifier, Observable, ResolutionError, StreamController,
};
use fwatch_harness::{Harness, assert_pass, init_test_tracing};
use fwatch_runtime::{AsyncOptions, WatchConfig, WatchError};

#[derive(Clone, Debug, PartialEq)]
struct Profile {
    name: String,
    visits: u32,
}

struct Session {
    user: Observable<String>,
    online: Observable<bool>,
}

// ============================================================================
// Listenables
// ============================================================================

#[test]
fn counter_increments_request_three_rebuilds() {
    init_test_tracing();
    let mut harness = Harness::new(|state| Ok(state.watch_it::<Observable<i32>>(None)?.get()));
    let counter = harness.registry().register_singleton(Observable::new(0));
    assert_eq!(*harness.mount().unwrap(), 0);

    for n in 1..=3 {
        counter.set(n);
    }
    assert_eq!(harness.rebuild_requests(), 3);
    harness.pump().unwrap();
    assert_eq!(harness.output(), Some(&3));
    assert_eq!(counter.subscriber_count(), 1);
}

#[test]
fn selector_only_rebuilds_for_its_field() {
    let mut harness = Harness::new(|state| {
        state.watch_property_value(|p: &Observable<Profile>| p.get().name, None)
    });
    let profile = harness.registry().register_singleton(Observable::new(Profile {
        name: "ada".into(),
        visits: 0,
    }));
    harness.mount().unwrap();

    profile.update(|p| p.visits += 1);
    assert_eq!(harness.rebuild_requests(), 0);

    profile.update(|p| p.name = "grace".into());
    assert_eq!(harness.rebuild_requests(), 1);
    harness.pump().unwrap();
    assert_eq!(harness.output().map(String::as_str), Some("grace"));
    assert_pass!(harness, matched = 1, appended = 0, replaced = 0);
}

#[test]
fn watch_value_tracks_a_field_listenable() {
    let mut harness = Harness::new(|state| {
        let user: String = state.watch_value(|s: &Session| s.user.clone(), None)?;
        let online: bool = state.watch_value(|s: &Session| s.online.clone(), None)?;
        Ok(format!("{user}:{online}"))
    });
    let session = harness.registry().register_singleton(Session {
        user: Observable::new("ada".to_owned()),
        online: Observable::new(false),
    });
    assert_eq!(harness.mount().unwrap(), "ada:false");

    session.online.set(true);
    harness.pump().unwrap();
    assert_eq!(harness.output().map(String::as_str), Some("ada:true"));
    assert_eq!(harness.rebuild_requests(), 1);
}

#[test]
fn same_object_twice_is_a_contract_violation() {
    let notifier = Notifier::new();
    let watched = notifier.clone();
    let mut harness = Harness::new(move |state| {
        state.watch(&watched)?;
        state.watch(&watched)?;
        Ok(())
    });
    let err = harness.mount().unwrap_err();
    assert!(matches!(err, WatchError::DuplicateWatch { existing: 0, .. }));
    assert_eq!(notifier.listener_count(), 1);
}

#[test]
fn sliding_window_moves_objects_between_slots() {
    let pool: Vec<Notifier> = (0..3).map(|_| Notifier::new()).collect();
    let start = Rc::new(Cell::new(0_usize));
    let (watched, offset) = (pool.clone(), Rc::clone(&start));
    let mut harness = Harness::new(move |state| {
        let i = offset.get();
        state.watch(&watched[i])?;
        state.watch(&watched[i + 1])?;
        Ok(())
    });
    harness.mount().unwrap();

    start.set(1);
    harness.render().unwrap();
    assert_pass!(harness, replaced = 2);
    let listeners: Vec<usize> = pool.iter().map(Notifier::listener_count).collect();
    assert_eq!(listeners, vec![0, 1, 1]);

    pool[0].notify();
    pool[2].notify();
    assert_eq!(harness.rebuild_requests(), 1);
}

#[test]
fn handlers_may_share_an_object() {
    let counter = Observable::new(0);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let (c, s) = (counter.clone(), Rc::clone(&seen));
    let mut harness = Harness::new(move |state| {
        let first = Rc::clone(&s);
        state.register_handler(&c, move |v: i32, _| first.borrow_mut().push(("a", v)), false)?;
        let second = Rc::clone(&s);
        state.register_handler(&c, move |v: i32, _| second.borrow_mut().push(("b", v)), false)?;
        Ok(())
    });
    harness.mount().unwrap();
    counter.set(4);
    harness.pump().unwrap();

    assert_eq!(*seen.borrow(), vec![("a", 4), ("b", 4)]);
    assert_eq!(harness.rebuild_requests(), 0);
    assert_eq!(counter.subscriber_count(), 2);
}

// ============================================================================
// Streams and eventuals
// ============================================================================

#[test]
fn stream_swap_before_first_event_seeds_by_preserve_flag() {
    for preserve in [true, false] {
        let mut harness = Harness::new(|_| Ok(AsyncSnapshot::<String, String>::pending(None)));
        let scheduler = harness.events().scheduler();
        let a = StreamController::<String, String>::new(Rc::clone(&scheduler));
        let b = StreamController::<String, String>::new(scheduler);
        let use_b = Rc::new(Cell::new(false));

        let (sa, sb, flag) = (a.stream(), b.stream(), Rc::clone(&use_b));
        harness.set_body(move |state| {
            if flag.get() {
                let opts = AsyncOptions::default()
                    .with_initial("fresh".to_owned())
                    .with_preserve_state(preserve);
                state.watch_stream(&sb, opts)
            } else {
                state.watch_stream(&sa, AsyncOptions::default().with_initial("x".to_owned()))
            }
        });
        harness.mount().unwrap();
        use_b.set(true);
        let snap = harness.render().unwrap().clone();

        let seed = if preserve { "x" } else { "fresh" };
        assert_eq!(snap, AsyncSnapshot::Pending(Some(seed.to_owned())));
        assert!(!a.has_listener());
        assert!(b.has_listener());
        assert_pass!(harness, replaced = 1);
    }
}

#[test]
fn stream_data_then_error_then_done() {
    let mut harness = Harness::new(|_| Ok(AsyncSnapshot::<u32, String>::pending(None)));
    let ctl = StreamController::<u32, String>::new(harness.events().scheduler());
    let stream = ctl.stream();
    harness.set_body(move |state| state.watch_stream(&stream, AsyncOptions::default()));
    assert!(harness.mount().unwrap().is_pending());

    ctl.add(7);
    harness.pump().unwrap();
    assert_eq!(harness.output(), Some(&AsyncSnapshot::Data(7)));

    ctl.add_error("lost".into());
    harness.pump().unwrap();
    assert_eq!(harness.output(), Some(&AsyncSnapshot::Error("lost".into())));

    let before = harness.rebuild_requests();
    ctl.close();
    harness.pump().unwrap();
    assert_eq!(harness.rebuild_requests(), before);
}

#[test]
fn future_resolves_into_snapshot() {
    let mut harness = Harness::new(|_| Ok(AsyncSnapshot::<i32, String>::pending(None)));
    let (eventual, completer) = Eventual::<i32, String>::pending(harness.events().scheduler());
    let watched = eventual.clone();
    harness.set_body(move |state| {
        state.watch_future(&watched, AsyncOptions::default().with_initial(-1))
    });
    assert_eq!(harness.mount().unwrap(), &AsyncSnapshot::Pending(Some(-1)));

    completer.complete(Ok(42));
    assert_eq!(harness.pump().unwrap(), 1);
    assert_eq!(harness.output(), Some(&AsyncSnapshot::Data(42)));
    assert!(harness.output().is_some_and(AsyncSnapshot::has_data));
}

#[test]
fn async_resolution_feeds_a_future_watch() {
    let mut harness = Harness::new(|state| {
        // Resolve once; a fresh eventual every pass would swap the watch each time.
        let locator = Rc::clone(state.locator());
        let pending =
            state.create_once(move || locator.resolve_async::<String>(Some("greeting")), None)?;
        let snap = state.watch_future(&pending, AsyncOptions::default())?;
        Ok(snap.value().map(|s| s.to_string()))
    });
    let (eventual, completer) =
        Eventual::<Rc<String>, ResolutionError>::pending(harness.events().scheduler());
    harness
        .registry()
        .register_async_singleton(Some("greeting"), eventual);
    assert_eq!(harness.mount().unwrap(), &None);

    completer.complete(Ok(Rc::new("hello".to_owned())));
    harness.pump().unwrap();
    assert_eq!(harness.output(), Some(&Some("hello".to_owned())));
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn unmount_cancels_everything_once() {
    let notifier = Notifier::new();
    let counter = Observable::new(0);
    let disposed = Rc::new(Cell::new(0));
    let (n, c, d) = (notifier.clone(), counter.clone(), Rc::clone(&disposed));
    let mut harness = Harness::new(move |state| {
        state.watch(&n)?;
        state.watch_property(&c, |c| c.get() % 2)?;
        state.register_handler(&c, |_: i32, _| {}, false)?;
        let d = Rc::clone(&d);
        state.on_dispose(move || d.set(d.get() + 1))?;
        Ok(())
    });
    harness.mount().unwrap();
    harness.render().unwrap();
    assert_eq!(harness.state().list().len(), 4);

    harness.unmount();
    harness.unmount();
    assert_eq!(disposed.get(), 1);
    assert_eq!(notifier.listener_count(), 0);
    assert_eq!(counter.subscriber_count(), 0);
    assert_eq!(harness.render().unwrap_err(), WatchError::Unmounted);
}

#[test]
fn update_without_render_drops_bindings() {
    let notifier = Notifier::new();
    let watched = notifier.clone();
    let mut harness = Harness::new(move |state| state.watch(&watched).map(drop));
    harness.mount().unwrap();

    harness.update_without_render(true);
    notifier.notify();
    assert_eq!(harness.rebuild_requests(), 0);
    assert_eq!(notifier.listener_count(), 0);

    harness.render().unwrap();
    assert_pass!(harness, appended = 1);
    notifier.notify();
    assert_eq!(harness.rebuild_requests(), 1);
}

#[test]
fn update_without_identity_change_keeps_bindings() {
    let notifier = Notifier::new();
    let watched = notifier.clone();
    let mut harness = Harness::new(move |state| state.watch(&watched).map(drop));
    harness.mount().unwrap();
    harness.update(false).unwrap();
    assert_pass!(harness, matched = 1, appended = 0);
    assert_eq!(notifier.listener_count(), 1);
}

#[test]
fn conditional_declaration_is_caught() {
    let notifier = Notifier::new();
    let counter = Observable::new(0);
    let (n, c) = (notifier.clone(), counter.clone());
    let mut harness = Harness::new(move |state| {
        state.watch(&n)?;
        state.watch(&c)?;
        Ok(())
    });
    harness.mount().unwrap();

    let c = counter.clone();
    harness.set_body(move |state| {
        state.watch(&c)?;
        Ok(())
    });
    let err = harness.render().unwrap_err();
    assert!(matches!(err, WatchError::PositionalMismatch { slot: 0, .. }));
    assert!(err.is_contract_violation());
}

#[test]
fn shrinking_pass_fails_in_strict_mode() {
    let a = Notifier::new();
    let b = Notifier::new();
    let (wa, wb) = (a.clone(), b.clone());
    let config = WatchConfig::default().with_strict_pass_length(true);
    let mut harness = Harness::with_config(config, move |state| {
        state.watch(&wa)?;
        state.watch(&wb)?;
        Ok(())
    });
    harness.mount().unwrap();

    let wa = a.clone();
    harness.set_body(move |state| state.watch(&wa).map(drop));
    assert_eq!(
        harness.render().unwrap_err(),
        WatchError::PassShrank { declared: 1, held: 2 }
    );
}

#[test]
fn push_scope_registers_services_for_the_component_lifetime() {
    let mut harness = Harness::new(|_| Ok(String::new()));
    let registry = Rc::clone(harness.registry());
    let scoped = Rc::clone(&registry);
    harness.set_body(move |state| {
        let registry = Rc::clone(&scoped);
        state.push_scope(
            move |_| {
                registry.register_singleton(String::from("scoped"));
            },
            None,
        )?;
        Ok(state.resolve::<String>(None)?.to_string())
    });
    assert_eq!(harness.mount().unwrap(), "scoped");
    harness.render().unwrap();
    assert_eq!(registry.scope_depth(), 1);

    harness.unmount();
    assert_eq!(registry.scope_depth(), 0);
    assert!(!registry.is_registered::<String>(None));
}
