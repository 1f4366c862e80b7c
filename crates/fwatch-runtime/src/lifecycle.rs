#![forbid(unsafe_code)]

//! Glue between a host framework's element lifecycle and [`BindingState`].
//!
//! | Host event | Adapter call | Effect |
//! |------------|--------------|--------|
//! | element constructed | [`LifecycleAdapter::new`] | state created |
//! | mounted | [`on_mount`](LifecycleAdapter::on_mount) | bookkeeping only |
//! | before build | [`on_before_render`](LifecycleAdapter::on_before_render) | cursor reset |
//! | build | [`render`](LifecycleAdapter::render) | reset, body, end-of-pass check |
//! | widget updated | [`on_after_update`](LifecycleAdapter::on_after_update) | clear when identity changed |
//! | unmounted | [`on_unmount`](LifecycleAdapter::on_unmount) | full dispose |
//!
//! If the host signals an update and then skips the next build, the cleared
//! bindings stay gone until a later build re-declares them.

use std::rc::{Rc, Weak};

use fwatch_core::Locator;

use crate::config::WatchConfig;
use crate::error::{Result, WatchError};
use crate::list::PassReport;
use crate::state::{BindingState, RebuildHost};

/// Owns one component's [`BindingState`] and drives it from host events.
#[derive(Debug)]
pub struct LifecycleAdapter {
    state: BindingState,
    mounted: bool,
    last_report: Option<PassReport>,
}

impl LifecycleAdapter {
    /// Create the binding state for a freshly constructed element.
    #[must_use]
    pub fn new<H: RebuildHost + 'static>(
        locator: Rc<dyn Locator>,
        host: &Rc<H>,
        config: WatchConfig,
    ) -> Self {
        let host: Weak<dyn RebuildHost> = Rc::downgrade(host) as Weak<dyn RebuildHost>;
        Self::with_weak_host(locator, host, config)
    }

    /// Like [`new`](Self::new) for hosts that are already type-erased.
    #[must_use]
    pub fn with_weak_host(
        locator: Rc<dyn Locator>,
        host: Weak<dyn RebuildHost>,
        config: WatchConfig,
    ) -> Self {
        Self {
            state: BindingState::new(locator, host, config),
            mounted: false,
            last_report: None,
        }
    }

    pub fn on_mount(&mut self) {
        self.mounted = true;
        tracing::debug!("component mounted");
    }

    /// Reset the cursor ahead of a build the host drives itself.
    ///
    /// # Errors
    ///
    /// [`WatchError::Unmounted`] after unmount.
    pub fn on_before_render(&mut self) -> Result<u64> {
        self.state.begin_pass()
    }

    /// Close a pass opened with [`on_before_render`](Self::on_before_render).
    ///
    /// # Errors
    ///
    /// [`WatchError::PassShrank`] in strict mode.
    pub fn on_after_render(&mut self) -> Result<PassReport> {
        let report = self.state.finish_pass().inspect_err(report_error)?;
        self.last_report = Some(report);
        Ok(report)
    }

    /// Run one build: reset the cursor, run `body`, check the pass.
    ///
    /// # Errors
    ///
    /// Whatever `body` returns, [`WatchError::PassShrank`] in strict mode, or
    /// [`WatchError::Unmounted`] after unmount. Contract violations are
    /// logged at error level before being returned.
    pub fn render<R>(&mut self, body: impl FnOnce(&mut BindingState) -> Result<R>) -> Result<R> {
        if self.state.is_disposed() {
            let err = WatchError::Unmounted;
            report_error(&err);
            return Err(err);
        }
        let span = tracing::debug_span!(
            "watch_pass",
            pass = self.state.list().passes() + 1,
            entries = self.state.list().len()
        );
        let _guard = span.enter();

        self.state.begin_pass()?;
        let output = match body(&mut self.state) {
            Ok(output) => output,
            Err(err) => {
                report_error(&err);
                self.state.abandon_pass();
                return Err(err);
            }
        };
        self.on_after_render()?;
        Ok(output)
    }

    /// The host replaced the widget configuration. When the component's
    /// identity changed, every binding is torn down and re-declared by the
    /// next build.
    pub fn on_after_update(&mut self, identity_changed: bool) {
        if identity_changed {
            tracing::debug!("component identity changed; clearing bindings");
            self.state.clear();
        }
    }

    /// Tear everything down. Idempotent.
    pub fn on_unmount(&mut self) {
        self.mounted = false;
        self.state.dispose();
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Report of the most recent completed pass.
    #[must_use]
    pub fn last_report(&self) -> Option<PassReport> {
        self.last_report
    }

    #[must_use]
    pub fn state(&self) -> &BindingState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut BindingState {
        &mut self.state
    }
}

fn report_error(err: &WatchError) {
    if err.is_contract_violation() || matches!(err, WatchError::Unmounted) {
        tracing::error!(error = %err, "watch contract violated");
    } else {
        tracing::warn!(error = %err, "render failed");
    }
}
