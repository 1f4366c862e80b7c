#![forbid(unsafe_code)]

//! Per-component watch runtime for fwatch.
//!
//! A component declares, during each render pass, which listenables,
//! streams and eventuals it depends on. The runtime keeps exactly one live
//! subscription per declaration and requests a rebuild from the host when a
//! dependency changes.
//!
//! Declarations are matched to last pass's subscriptions by **position**, so
//! they must run in the same order on every pass: no conditional or looped
//! watch calls.
//!
//! # Example
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! use fwatch_core::{EventLoop, Locator, Observable, Registry};
//! use fwatch_runtime::{LifecycleAdapter, RebuildHost, WatchConfig};
//!
//! #[derive(Default)]
//! struct Host(Cell<u32>);
//! impl RebuildHost for Host {
//!     fn request_rebuild(&self) {
//!         self.0.set(self.0.get() + 1);
//!     }
//! }
//!
//! let events = EventLoop::new();
//! let locator: Rc<dyn Locator> = Rc::new(Registry::new(events.scheduler()));
//! let host = Rc::new(Host::default());
//! let counter = Observable::new(0);
//!
//! let mut component = LifecycleAdapter::new(locator, &host, WatchConfig::default());
//! component.on_mount();
//! let shown = component.render(|state| Ok(state.watch(&counter)?.get())).unwrap();
//! assert_eq!(shown, 0);
//!
//! counter.set(1);
//! assert_eq!(host.0.get(), 1);
//! component.on_unmount();
//! ```
//!
//! # Modules
//!
//! - [`entry`]: tagged watch entries and their teardown.
//! - [`list`]: the ordered list and the reconciliation cursor.
//! - [`state`]: declaration-site operations.
//! - [`lifecycle`]: host lifecycle glue.
//! - [`config`]: runtime knobs.
//! - [`error`]: error taxonomy.

pub mod config;
pub mod entry;
pub mod error;
pub mod lifecycle;
pub mod list;
pub mod state;

pub use config::WatchConfig;
#[cfg(feature = "policy-config")]
pub use config::ConfigError;
pub use entry::{EntryKind, HandlerCancel, WatchEntry};
pub use error::{Result, WatchError};
pub use lifecycle::LifecycleAdapter;
pub use list::{PassReport, ReconciliationCursor, WatchList};
pub use state::{
    AsyncOptions, BindingState, ErrorHandler, FutureHandlerOptions, RebuildHost,
    StreamHandlerOptions,
};
