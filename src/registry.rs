//! Shared activity/inactivity event registers.
//!
//! Listening to high-frequency events such as `mousemove` is comparatively
//! expensive, so a single pair of environment handlers records the latest
//! active-type and idle-type signal for every tracker that shares the
//! registry. Handlers are installed when the first tracker acquires the
//! registry and removed when the last one releases it.

use crate::config::EventSet;
use crate::environment::{default_window, Environment, EventHandler, WindowEvent};
use crate::types::Signal;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

thread_local! {
    static DEFAULT_REGISTRY: Rc<SharedRegistry> = SharedRegistry::new();

    /// Registries handed out by `for_environment`, keyed by environment.
    static ENVIRONMENT_REGISTRIES: RefCell<Vec<(Weak<dyn Environment>, Weak<SharedRegistry>)>> =
        const { RefCell::new(Vec::new()) };
}

#[derive(Debug, Default)]
struct Signals {
    last_active: Option<Signal>,
    last_idle: Option<Signal>,
}

/// Environment-side state that exists only while the registry is in use.
struct Installation {
    env: Rc<dyn Environment>,
    active_events: EventSet,
    idle_events: EventSet,
    on_active: EventHandler,
    on_idle: EventHandler,
}

pub struct SharedRegistry {
    signals: Rc<RefCell<Signals>>,
    ref_count: Cell<usize>,
    installation: RefCell<Option<Installation>>,
}

impl SharedRegistry {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            signals: Rc::new(RefCell::new(Signals::default())),
            ref_count: Cell::new(0),
            installation: RefCell::new(None),
        })
    }

    /// The registry shared by trackers on this thread's default window.
    pub fn thread_default() -> Rc<Self> {
        DEFAULT_REGISTRY.with(Rc::clone)
    }

    /// The registry shared by trackers on `env` that were not given one.
    ///
    /// Lives as long as some tracker holds it; the default window always
    /// maps to [`thread_default`](Self::thread_default).
    pub fn for_environment(env: &Rc<dyn Environment>) -> Rc<Self> {
        if std::ptr::addr_eq(Rc::as_ptr(env), Rc::as_ptr(&default_window())) {
            return Self::thread_default();
        }

        ENVIRONMENT_REGISTRIES.with(|entries| {
            let mut entries = entries.borrow_mut();
            entries.retain(|(env, registry)| env.strong_count() > 0 && registry.strong_count() > 0);

            let existing = entries
                .iter()
                .find(|(known, _)| std::ptr::addr_eq(known.as_ptr(), Rc::as_ptr(env)))
                .and_then(|(_, registry)| registry.upgrade());
            if let Some(registry) = existing {
                return registry;
            }

            let registry = Self::new();
            entries.push((Rc::downgrade(env), Rc::downgrade(&registry)));
            tracing::trace!(environments = entries.len(), "Environment registry created");
            registry
        })
    }

    /// Most recent active-type signal, if any was observed.
    pub fn last_active(&self) -> Option<Signal> {
        self.signals.borrow().last_active.clone()
    }

    /// Most recent idle-type signal, if any was observed.
    pub fn last_idle(&self) -> Option<Signal> {
        self.signals.borrow().last_idle.clone()
    }

    /// Number of trackers currently attached through this registry.
    pub fn reference_count(&self) -> usize {
        self.ref_count.get()
    }

    pub fn is_installed(&self) -> bool {
        self.installation.borrow().is_some()
    }

    /// Increments the reference count, installing the environment handlers
    /// on the first reference.
    ///
    /// The event sets of the first acquirer are the ones installed; later
    /// trackers share them until the registry is released completely.
    pub fn acquire(&self, env: &Rc<dyn Environment>, active_events: &EventSet, idle_events: &EventSet) {
        let count = self.ref_count.get() + 1;
        self.ref_count.set(count);
        if count > 1 {
            tracing::trace!(ref_count = count, "Shared registry referenced");
            return;
        }

        let signals = Rc::clone(&self.signals);
        let on_active: EventHandler = Rc::new(move |event: &WindowEvent| {
            signals.borrow_mut().last_active = Some(Signal {
                event_type: event.event_type.clone(),
                timestamp: event.timestamp,
            });
        });

        let signals = Rc::clone(&self.signals);
        let on_idle: EventHandler = Rc::new(move |event: &WindowEvent| {
            signals.borrow_mut().last_idle = Some(Signal {
                event_type: event.event_type.clone(),
                timestamp: event.timestamp,
            });
        });

        for event_type in active_events.iter() {
            env.register(event_type, Rc::clone(&on_active));
        }
        for event_type in idle_events.iter() {
            env.register(event_type, Rc::clone(&on_idle));
        }

        tracing::debug!(
            active = active_events.len(),
            idle = idle_events.len(),
            "Shared event registers installed"
        );

        *self.installation.borrow_mut() = Some(Installation {
            env: Rc::clone(env),
            active_events: active_events.clone(),
            idle_events: idle_events.clone(),
            on_active,
            on_idle,
        });
    }

    /// Decrements the reference count, removing the environment handlers
    /// when it reaches zero. Releasing an unreferenced registry is a no-op.
    pub fn release(&self) {
        let count = self.ref_count.get();
        if count == 0 {
            return;
        }
        self.ref_count.set(count - 1);
        if count > 1 {
            tracing::trace!(ref_count = count - 1, "Shared registry released");
            return;
        }

        let Some(installation) = self.installation.borrow_mut().take() else {
            return;
        };
        for event_type in installation.active_events.iter() {
            installation.env.unregister(event_type, &installation.on_active);
        }
        for event_type in installation.idle_events.iter() {
            installation.env.unregister(event_type, &installation.on_idle);
        }

        tracing::debug!("Shared event registers removed");
    }
}

impl fmt::Debug for SharedRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedRegistry")
            .field("signals", &self.signals.borrow())
            .field("ref_count", &self.ref_count.get())
            .field("installed", &self.is_installed())
            .finish()
    }
}
