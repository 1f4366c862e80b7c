#![forbid(unsafe_code)]

//! fwatch public facade crate.
//!
//! Re-exports the notification primitives from `fwatch-core` and, with the
//! default `runtime` feature, the per-component watch runtime. Most users
//! only need `use fwatch::prelude::*;`.

pub use fwatch_core as core;
#[cfg(feature = "runtime")]
pub use fwatch_runtime as runtime;

pub mod prelude {
    pub use fwatch_core as core;
    #[cfg(feature = "runtime")]
    pub use fwatch_runtime as runtime;

    pub use fwatch_core::{
        AsyncSnapshot, Completer, EventLoop, EventStream, Eventual, Listenable, Locator,
        LocatorExt, Notifier, Observable, Registry, ResolutionError, Scheduler, StreamController,
        StreamEvent, ValueListenable,
    };

    #[cfg(feature = "runtime")]
    pub use fwatch_runtime::{
        AsyncOptions, BindingState, FutureHandlerOptions, HandlerCancel, LifecycleAdapter,
        RebuildHost, StreamHandlerOptions, WatchConfig, WatchError,
    };
}

#[cfg(all(test, feature = "runtime"))]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::prelude::*;

    struct Host(Cell<u32>);

    impl RebuildHost for Host {
        fn request_rebuild(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn prelude_is_enough_to_drive_a_component() {
        let events = EventLoop::new();
        let locator: Rc<dyn Locator> = Rc::new(Registry::new(events.scheduler()));
        let host = Rc::new(Host(Cell::new(0)));
        let flag = Observable::new(false);

        let mut component = LifecycleAdapter::new(locator, &host, WatchConfig::default());
        component.on_mount();
        let shown = component
            .render(|state| Ok(state.watch(&flag)?.get()))
            .unwrap();
        assert!(!shown);

        flag.set(true);
        assert_eq!(host.0.get(), 1);
        component.on_unmount();
        assert_eq!(flag.subscriber_count(), 0);
    }
}
