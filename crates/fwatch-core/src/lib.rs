#![forbid(unsafe_code)]

//! Core primitives for fwatch.
//!
//! The watch runtime (`fwatch-runtime`) consumes three kinds of notification
//! source and one resolver capability, all defined here:
//!
//! - [`observable`]: synchronous, multi-fire listenables ([`Notifier`],
//!   [`Observable`]) behind the [`Listenable`] contract.
//! - [`stream`]: asynchronous, multi-fire broadcast streams that can error.
//! - [`eventual`]: asynchronous, single-fire values that can error.
//! - [`locator`]: the object-safe resolver contract and a minimal scoped
//!   [`Registry`].
//!
//! Asynchronous deliveries go through a [`Scheduler`], the seam to the host's
//! event loop. Everything is single-threaded (`Rc`, not `Arc`).

pub mod eventual;
pub mod locator;
pub mod observable;
pub mod scheduler;
pub mod snapshot;
pub mod stream;

pub use eventual::{Completer, Eventual};
pub use locator::{
    Locator, LocatorExt, Params, Registry, ResolutionError, ScopeHandle, ServiceKey,
};
pub use observable::{Listenable, Notifier, ObjectKey, Observable, Subscription, ValueListenable};
pub use scheduler::{EventLoop, Scheduler, Task};
pub use snapshot::AsyncSnapshot;
pub use stream::{EventStream, StreamController, StreamEvent, StreamSubscription};
