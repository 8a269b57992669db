//! The environment a tracker attaches to.
//!
//! An environment provides an event bus (listeners keyed by event type plus
//! custom event dispatch) and a recurring timer facility. Trackers only talk
//! to it through the [`Environment`] trait; [`Window`] is the in-process
//! implementation shipped with the crate.

pub mod window;

pub use window::*;

use crate::clock::Timestamp;
use std::fmt;
use std::rc::Rc;

/// An event delivered by the environment to registered handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowEvent {
    /// Event type, e.g. "keydown" or "blur".
    pub event_type: String,

    /// When the environment observed the event.
    pub timestamp: Timestamp,

    /// Payload of custom events (`None` for native input events).
    pub detail: Option<serde_json::Value>,
}

/// Handler for environment events. Identity is the `Rc` allocation, so the
/// same handle must be passed to [`Environment::unregister`].
pub type EventHandler = Rc<dyn Fn(&WindowEvent)>;

/// Callback run by a recurring timer.
pub type TimerCallback = Rc<dyn Fn()>;

/// Opaque handle to a scheduled recurring timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(pub(crate) u64);

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// What the tracker requires from its surroundings.
pub trait Environment {
    /// Current time according to the environment's clock.
    fn now(&self) -> Timestamp;

    /// Adds `handler` to the listeners of `event_type`.
    fn register(&self, event_type: &str, handler: EventHandler);

    /// Removes every registration of `handler` for `event_type`.
    fn unregister(&self, event_type: &str, handler: &EventHandler);

    /// Delivers a custom event carrying `detail` to the listeners of `name`.
    fn dispatch_custom_event(&self, name: &str, detail: serde_json::Value);

    /// Runs `callback` every `interval_ms` until cancelled.
    fn schedule_recurring(&self, interval_ms: u64, callback: TimerCallback) -> TimerHandle;

    /// Stops a recurring timer. Unknown handles are ignored.
    fn cancel(&self, handle: TimerHandle);
}
