//! Lazily-created shared tracker.
//!
//! [`TrackerHolder`] owns at most one default tracker for an environment. The
//! first [`get_or_init`](TrackerHolder::get_or_init) call decides its config;
//! later calls return the same tracker and ignore their config. The
//! module-level [`idle`] functions use a per-thread holder bound to the
//! default window.

use crate::config::Config;
use crate::environment::{default_window, Environment};
use crate::registry::SharedRegistry;
use crate::tracker::Tracker;
use once_cell::unsync::OnceCell;
use std::cell::RefCell;
use std::rc::Rc;

pub struct TrackerHolder {
    env: Rc<dyn Environment>,
    registry: Rc<SharedRegistry>,
    instance: OnceCell<Tracker>,
}

impl TrackerHolder {
    pub fn new(env: Rc<dyn Environment>, registry: Rc<SharedRegistry>) -> Self {
        Self {
            env,
            registry,
            instance: OnceCell::new(),
        }
    }

    /// Holder for this thread's default window and registry.
    pub fn for_default_window() -> Self {
        Self::new(default_window(), SharedRegistry::thread_default())
    }

    /// Returns the shared tracker, creating it with `config` (or defaults)
    /// on first use.
    pub fn get_or_init(&self, config: Option<Config>) -> Tracker {
        self.instance
            .get_or_init(|| {
                tracing::debug!("Creating shared tracker");
                self.build(config.unwrap_or_default())
            })
            .clone()
    }

    /// Returns the shared tracker if it has been created.
    pub fn get(&self) -> Option<Tracker> {
        self.instance.get().cloned()
    }

    /// Creates an independent tracker that shares this holder's environment
    /// and registry but is not stored.
    pub fn new_instance(&self, config: Config) -> Tracker {
        self.build(config)
    }

    /// Forgets the shared tracker, detaching it. Returns it if it existed.
    pub fn reset(&mut self) -> Option<Tracker> {
        let previous = self.instance.take();
        if let Some(tracker) = &previous {
            tracker.detach();
            tracing::debug!("Shared tracker reset");
        }
        previous
    }

    fn build(&self, config: Config) -> Tracker {
        Tracker::builder()
            .config(config)
            .window(Rc::clone(&self.env))
            .registry(Rc::clone(&self.registry))
            .build()
    }
}

thread_local! {
    static DEFAULT_HOLDER: RefCell<TrackerHolder> = RefCell::new(TrackerHolder::for_default_window());
}

/// Returns this thread's shared tracker, creating it with `config` on the
/// first call.
pub fn idle(config: Option<Config>) -> Tracker {
    DEFAULT_HOLDER.with(|holder| holder.borrow().get_or_init(config))
}

/// Creates a fresh tracker on this thread's default window.
pub fn idle_new_instance(config: Config) -> Tracker {
    DEFAULT_HOLDER.with(|holder| holder.borrow().new_instance(config))
}

/// Detaches and forgets this thread's shared tracker.
pub fn reset_default_tracker() -> Option<Tracker> {
    DEFAULT_HOLDER.with(|holder| holder.borrow_mut().reset())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::environment::Window;
    use crate::types::ActivityState;

    fn holder() -> (TrackerHolder, Rc<Window>) {
        let window = Rc::new(Window::new(Rc::new(ManualClock::new(1_000))));
        (TrackerHolder::new(window.clone(), SharedRegistry::new()), window)
    }

    #[test]
    fn test_get_or_init_returns_same_tracker() {
        let (holder, _window) = holder();
        assert!(holder.get().is_none());

        let first = holder.get_or_init(Some(Config {
            idle_timeout: 10,
            ..Config::default()
        }));
        let second = holder.get_or_init(Some(Config {
            idle_timeout: 99,
            ..Config::default()
        }));

        assert!(first.ptr_eq(&second));
        assert_eq!(second.config().idle_timeout, 10);
    }

    #[test]
    fn test_new_instance_is_independent_but_shares_registry() {
        let (holder, _window) = holder();
        let shared = holder.get_or_init(None);
        let fresh = holder.new_instance(Config::default());

        assert!(!shared.ptr_eq(&fresh));
        assert!(Rc::ptr_eq(shared.registry(), fresh.registry()));
        assert_eq!(shared.registry().reference_count(), 2);
    }

    #[test]
    fn test_reset_detaches_and_allows_recreation() {
        let (mut holder, window) = holder();
        let first = holder.get_or_init(None);
        assert_eq!(window.timer_count(), 1);

        let previous = holder.reset().unwrap();
        assert!(previous.ptr_eq(&first));
        assert!(!first.is_attached());
        assert_eq!(window.timer_count(), 0);

        let second = holder.get_or_init(None);
        assert!(!second.ptr_eq(&first));
        assert_eq!(second.state(), ActivityState::Active);
    }

    #[test]
    fn test_thread_default_accessor() {
        let tracker = idle(Some(Config {
            poll_timeout: 50,
            ..Config::default()
        }));
        assert!(tracker.ptr_eq(&idle(None)));
        assert!(!tracker.ptr_eq(&idle_new_instance(Config::default())));

        let reset = reset_default_tracker().unwrap();
        assert!(reset.ptr_eq(&tracker));
        assert!(!tracker.is_attached());
    }
}
