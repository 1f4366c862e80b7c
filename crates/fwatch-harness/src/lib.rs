#![forbid(unsafe_code)]

//! Deterministic test host for fwatch components.
//!
//! [`Harness`] plays the host framework: it owns an [`EventLoop`], a
//! [`Registry`], a [`RebuildCounter`] and one [`LifecycleAdapter`], and
//! re-renders the component body whenever a rebuild was requested.
//!
//! ```
//! use fwatch_core::Observable;
//! use fwatch_harness::Harness;
//!
//! let counter = Observable::new(0);
//! let watched = counter.clone();
//! let mut harness = Harness::new(move |state| Ok(state.watch(&watched)?.get()));
//! assert_eq!(*harness.mount().unwrap(), 0);
//!
//! counter.set(3);
//! assert_eq!(harness.pump().unwrap(), 1);
//! assert_eq!(harness.output(), Some(&3));
//! ```
//!
//! # Logging
//!
//! Call [`init_test_tracing`] at the top of a test to see the runtime's
//! `tracing` output. `RUST_LOG` overrides the default `fwatch=debug` filter.

pub mod strategies;

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Once;

use fwatch_core::{EventLoop, Locator, Registry};
use fwatch_runtime::{BindingState, LifecycleAdapter, PassReport, RebuildHost, Result, WatchConfig};

/// Upper bound on re-renders per [`Harness::pump`], so a component that
/// requests a rebuild on every render cannot hang a test.
pub const MAX_PUMP_RENDERS: usize = 1_000;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

static TRACING: Once = Once::new();

/// Install a test-writer `tracing` subscriber once per process.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("fwatch=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

// ---------------------------------------------------------------------------
// RebuildCounter
// ---------------------------------------------------------------------------

/// Host that counts rebuild requests and remembers whether one is pending.
#[derive(Debug, Default)]
pub struct RebuildCounter {
    requests: Cell<u64>,
    dirty: Cell<bool>,
}

impl RebuildCounter {
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Total requests so far.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.requests.get()
    }

    /// Whether a rebuild is pending.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    /// Consume the pending flag.
    pub fn take_dirty(&self) -> bool {
        self.dirty.replace(false)
    }

    /// Zero the counter and the pending flag.
    pub fn reset(&self) {
        self.requests.set(0);
        self.dirty.set(false);
    }
}

impl RebuildHost for RebuildCounter {
    fn request_rebuild(&self) {
        self.requests.set(self.requests.get() + 1);
        self.dirty.set(true);
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

type Body<O> = Box<dyn FnMut(&mut BindingState) -> Result<O>>;

/// Drives one component through mount, renders, updates and unmount.
pub struct Harness<O> {
    events: EventLoop,
    registry: Rc<Registry>,
    host: Rc<RebuildCounter>,
    adapter: LifecycleAdapter,
    body: Body<O>,
    output: Option<O>,
    renders: u64,
}

impl<O: 'static> Harness<O> {
    /// Harness with a fresh event loop and registry and positional checks on.
    pub fn new(body: impl FnMut(&mut BindingState) -> Result<O> + 'static) -> Self {
        Self::with_config(WatchConfig::default().with_check_positional(true), body)
    }

    pub fn with_config(
        config: WatchConfig,
        body: impl FnMut(&mut BindingState) -> Result<O> + 'static,
    ) -> Self {
        let events = EventLoop::new();
        let registry = Rc::new(Registry::new(events.scheduler()));
        Self::with_parts(events, registry, config, body)
    }

    /// Harness over an existing event loop and registry, so several
    /// components can share them.
    pub fn with_parts(
        events: EventLoop,
        registry: Rc<Registry>,
        config: WatchConfig,
        body: impl FnMut(&mut BindingState) -> Result<O> + 'static,
    ) -> Self {
        let host = RebuildCounter::new();
        let locator: Rc<dyn Locator> = registry.clone();
        let adapter = LifecycleAdapter::new(locator, &host, config);
        Self {
            events,
            registry,
            host,
            adapter,
            body: Box::new(body),
            output: None,
            renders: 0,
        }
    }

    /// Mount and run the first render.
    ///
    /// # Errors
    ///
    /// Whatever the first render returns.
    pub fn mount(&mut self) -> Result<&O> {
        self.adapter.on_mount();
        self.render()
    }

    /// Render once, regardless of pending rebuilds.
    ///
    /// # Errors
    ///
    /// Whatever the body or the end-of-pass check returns.
    pub fn render(&mut self) -> Result<&O> {
        self.host.take_dirty();
        self.renders += 1;
        let body = &mut self.body;
        let output = self.adapter.render(|state| body(state))?;
        Ok(self.output.insert(output))
    }

    /// Drain the event loop and re-render while rebuilds are pending.
    /// Returns the number of re-renders.
    ///
    /// # Errors
    ///
    /// The first failing render.
    pub fn pump(&mut self) -> Result<usize> {
        let mut rendered = 0;
        loop {
            self.events.run_until_idle();
            if !self.host.take_dirty() || rendered >= MAX_PUMP_RENDERS {
                break;
            }
            self.render()?;
            rendered += 1;
        }
        if rendered >= MAX_PUMP_RENDERS {
            tracing::warn!(rendered, "pump stopped at the re-render limit");
        }
        Ok(rendered)
    }

    /// Signal a widget update, then render.
    ///
    /// # Errors
    ///
    /// Whatever the render returns.
    pub fn update(&mut self, identity_changed: bool) -> Result<&O> {
        self.adapter.on_after_update(identity_changed);
        self.render()
    }

    /// Signal a widget update but skip the render that would normally follow.
    pub fn update_without_render(&mut self, identity_changed: bool) {
        self.adapter.on_after_update(identity_changed);
    }

    pub fn unmount(&mut self) {
        self.adapter.on_unmount();
    }

    /// Swap the component body, e.g. to simulate a conditional declaration.
    pub fn set_body(&mut self, body: impl FnMut(&mut BindingState) -> Result<O> + 'static) {
        self.body = Box::new(body);
    }
}

impl<O> Harness<O> {
    /// Output of the last successful render.
    #[must_use]
    pub fn output(&self) -> Option<&O> {
        self.output.as_ref()
    }

    /// Renders attempted so far.
    #[must_use]
    pub fn renders(&self) -> u64 {
        self.renders
    }

    /// Rebuild requests received so far.
    #[must_use]
    pub fn rebuild_requests(&self) -> u64 {
        self.host.count()
    }

    #[must_use]
    pub fn last_report(&self) -> Option<PassReport> {
        self.adapter.last_report()
    }

    #[must_use]
    pub fn events(&self) -> &EventLoop {
        &self.events
    }

    #[must_use]
    pub fn registry(&self) -> &Rc<Registry> {
        &self.registry
    }

    #[must_use]
    pub fn host(&self) -> &Rc<RebuildCounter> {
        &self.host
    }

    #[must_use]
    pub fn state(&self) -> &BindingState {
        self.adapter.state()
    }

    #[must_use]
    pub fn adapter(&self) -> &LifecycleAdapter {
        &self.adapter
    }
}

/// Assert the fields of the last pass report.
///
/// ```ignore
/// assert_pass!(harness, matched = 2, appended = 0);
/// ```
#[macro_export]
macro_rules! assert_pass {
    ($harness:expr, $($field:ident = $value:expr),+ $(,)?) => {{
        let report = $harness
            .last_report()
            .expect("no completed pass to inspect");
        $(
            assert_eq!(
                report.$field, $value,
                "pass report field `{}` (report: {})",
                stringify!($field), report
            );
        )+
    }};
}
