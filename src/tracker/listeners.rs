//! Per-tracker state listeners and how notifications reach them.

use crate::environment::{Environment, EventHandler, WindowEvent};
use crate::logging::DebugLog;
use crate::types::{ActivityState, StateChange};
use serde::Deserialize;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

/// Callback invoked when a tracker enters a state. Identity is the `Rc`
/// allocation, which is what [`Tracker::off`](super::Tracker::off) matches.
pub type StateListener = Rc<dyn Fn(&StateChange)>;

/// Ordered listener lists keyed by state.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    listeners: HashMap<ActivityState, Vec<StateListener>>,
}

impl ListenerRegistry {
    /// Appends `listener`. Registering the same handle twice keeps both.
    pub fn add(&mut self, state: ActivityState, listener: StateListener) {
        self.listeners.entry(state).or_default().push(listener);
    }

    /// Removes every occurrence of `listener`, or the whole list for `state`
    /// when `listener` is `None`. Returns how many were removed.
    pub fn remove(&mut self, state: ActivityState, listener: Option<&StateListener>) -> usize {
        let Some(list) = self.listeners.get_mut(&state) else {
            return 0;
        };

        let before = list.len();
        match listener {
            Some(target) => list.retain(|l| !Rc::ptr_eq(l, target)),
            None => list.clear(),
        }
        let removed = before - list.len();

        if list.is_empty() {
            self.listeners.remove(&state);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    /// Snapshot of the listeners for `state`, in registration order.
    pub fn listeners_for(&self, state: ActivityState) -> Vec<StateListener> {
        self.listeners.get(&state).cloned().unwrap_or_default()
    }

    pub fn count(&self, state: ActivityState) -> usize {
        self.listeners.get(&state).map_or(0, Vec::len)
    }

    pub fn total(&self) -> usize {
        self.listeners.values().map(Vec::len).sum()
    }
}

/// Where state change notifications go.
pub trait NotificationSink {
    /// Delivers `change`. `listeners` are the tracker's local listeners for
    /// the state being entered.
    fn deliver(&self, change: &StateChange, listeners: &[StateListener], log: &DebugLog);

    /// Called when a listener is added through the tracker.
    fn subscribe(&self, _state: ActivityState, _listener: &StateListener, _log: &DebugLog) {}

    /// Called when listeners are removed through the tracker. `None` removes
    /// every listener for `state`.
    fn unsubscribe(&self, _state: ActivityState, _listener: Option<&StateListener>) {}

    /// Called when the tracker drops all of its listeners.
    fn unsubscribe_all(&self) {}
}

/// Invokes local listeners in registration order, isolating panics.
#[derive(Debug, Default)]
pub struct LocalListeners;

impl NotificationSink for LocalListeners {
    fn deliver(&self, change: &StateChange, listeners: &[StateListener], log: &DebugLog) {
        for listener in listeners {
            invoke_isolated("state listener", log, || listener(change));
        }
    }
}

/// A tracker listener bridged onto the environment bus.
struct ProxyAdapter {
    state: ActivityState,
    listener: StateListener,
    handler: EventHandler,
}

/// Forwards notifications to the environment bus as custom events named
/// after the entered state.
///
/// Listeners added through the tracker are registered on the environment
/// for those events rather than called directly. Their registrations are
/// removed on unsubscribe and when the proxy is dropped.
pub struct EnvironmentProxy {
    env: Rc<dyn Environment>,
    adapters: RefCell<Vec<ProxyAdapter>>,
}

impl EnvironmentProxy {
    pub fn new(env: Rc<dyn Environment>) -> Self {
        Self {
            env,
            adapters: RefCell::new(Vec::new()),
        }
    }

    fn remove_where(&self, selected: impl Fn(&ProxyAdapter) -> bool) {
        let removed: Vec<ProxyAdapter> = {
            let mut adapters = self.adapters.borrow_mut();
            let (removed, kept): (Vec<_>, Vec<_>) = adapters.drain(..).partition(|a| selected(a));
            *adapters = kept;
            removed
        };
        for adapter in &removed {
            self.env.unregister(adapter.state.as_str(), &adapter.handler);
        }
    }
}

impl NotificationSink for EnvironmentProxy {
    fn deliver(&self, change: &StateChange, _listeners: &[StateListener], log: &DebugLog) {
        match serde_json::to_value(change) {
            Ok(detail) => self.env.dispatch_custom_event(change.state.as_str(), detail),
            Err(e) => {
                tracing::warn!(?e, state = %change.state, "Failed to serialize state change");
                log.log(format_args!("failed to proxy {} event: {}", change.state, e));
            }
        }
    }

    fn subscribe(&self, state: ActivityState, listener: &StateListener, log: &DebugLog) {
        let callback = Rc::clone(listener);
        let log = log.clone();
        let handler: EventHandler = Rc::new(move |event: &WindowEvent| {
            // Native events that share the name carry no payload
            let Some(detail) = &event.detail else {
                return;
            };
            match StateChange::deserialize(detail) {
                Ok(change) => {
                    invoke_isolated("state listener", &log, || callback(&change));
                }
                Err(e) => tracing::warn!(?e, event_type = %event.event_type, "Ignoring malformed proxied event"),
            }
        });

        self.env.register(state.as_str(), Rc::clone(&handler));
        self.adapters.borrow_mut().push(ProxyAdapter {
            state,
            listener: Rc::clone(listener),
            handler,
        });
    }

    fn unsubscribe(&self, state: ActivityState, listener: Option<&StateListener>) {
        self.remove_where(|a| a.state == state && listener.is_none_or(|l| Rc::ptr_eq(&a.listener, l)));
    }

    fn unsubscribe_all(&self) {
        self.remove_where(|_| true);
    }
}

impl Drop for EnvironmentProxy {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}

/// Runs a user callback, containing any panic so later callbacks still run.
///
/// Returns `false` if the callback panicked.
pub(crate) fn invoke_isolated(kind: &str, log: &DebugLog, callback: impl FnOnce()) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(()) => true,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!(kind, %message, "Callback panicked");
            log.log(format_args!("{} panicked: {}", kind, message));
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
