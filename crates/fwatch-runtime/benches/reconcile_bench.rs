//! Benchmarks for the reconciliation hot path.
//!
//! Run with: `cargo bench --package fwatch-runtime --bench reconcile_bench`
//!
//! # Performance Baselines
//!
//! - Steady-state passes where every declaration matches its slot
//! - Passes that swap every observed object (teardown + resubscribe)
//! - Selector watches re-evaluated on notification

use std::cell::Cell;
use std::hint::black_box;
use std::rc::{Rc, Weak};

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use fwatch_core::{EventLoop, Locator, Notifier, Observable, Registry};
use fwatch_runtime::{BindingState, RebuildHost, WatchConfig};

// ============================================================================
// Fixtures
// ============================================================================

#[derive(Default)]
struct CountingHost(Cell<u64>);

impl RebuildHost for CountingHost {
    fn request_rebuild(&self) {
        self.0.set(self.0.get() + 1);
    }
}

fn fresh_state(host: &Rc<CountingHost>) -> BindingState {
    let events = EventLoop::new();
    let locator: Rc<dyn Locator> = Rc::new(Registry::new(events.scheduler()));
    let weak: Weak<dyn RebuildHost> = Rc::downgrade(host) as Weak<dyn RebuildHost>;
    BindingState::new(locator, weak, WatchConfig::default().with_check_positional(true))
}

fn pass(state: &mut BindingState, notifiers: &[Notifier]) {
    state.begin_pass().ok();
    for notifier in notifiers {
        state.watch(notifier).ok();
    }
    state.finish_pass().ok();
}

// ============================================================================
// Benchmarks
// ============================================================================

fn bench_steady_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("steady_pass");

    for size in [1, 16, 128] {
        let host = Rc::new(CountingHost::default());
        let mut state = fresh_state(&host);
        let notifiers: Vec<Notifier> = (0..size).map(|_| Notifier::new()).collect();
        pass(&mut state, &notifiers);

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("watch", size), &notifiers, |b, notifiers| {
            b.iter(|| pass(&mut state, black_box(notifiers)));
        });
    }

    group.finish();
}

fn bench_swap_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("swap_pass");

    for size in [1, 16, 128] {
        let host = Rc::new(CountingHost::default());
        let mut state = fresh_state(&host);
        let left: Vec<Notifier> = (0..size).map(|_| Notifier::new()).collect();
        let right: Vec<Notifier> = (0..size).map(|_| Notifier::new()).collect();
        pass(&mut state, &left);

        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(BenchmarkId::new("watch", size), |b| {
            let mut flip = false;
            b.iter(|| {
                flip = !flip;
                let side = if flip { &right } else { &left };
                pass(&mut state, black_box(side));
            });
        });
    }

    group.finish();
}

fn bench_selector_notify(c: &mut Criterion) {
    let mut group = c.benchmark_group("selector_notify");
    let host = Rc::new(CountingHost::default());
    let mut state = fresh_state(&host);
    let pair = Observable::new((0_u64, 0_u64));
    state.begin_pass().ok();
    state.watch_property(&pair, |p| p.get().0).ok();
    state.finish_pass().ok();

    // Irrelevant field: selector runs, no rebuild.
    group.bench_function("unchanged_selection", |b| {
        b.iter(|| pair.update(|p| p.1 = p.1.wrapping_add(1)));
    });
    // Relevant field: selector runs, rebuild requested.
    group.bench_function("changed_selection", |b| {
        b.iter(|| pair.update(|p| p.0 = p.0.wrapping_add(1)));
    });

    group.finish();
    black_box(host.0.get());
}

criterion_group!(benches, bench_steady_pass, bench_swap_pass, bench_selector_notify);

criterion_main!(benches);
