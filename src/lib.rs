//! idlewatch - active/idle user state tracking.
//!
//! A [`Tracker`] watches an [`Environment`] for input events, decides whether
//! the user is active or idle, notifies listeners on transitions and runs
//! periodic callbacks whose cadence depends on the current state.
//!
//! # Example
//! ```no_run
//! use idlewatch::{ActivityState, Config, StateChange, Tracker, Window};
//! use std::rc::Rc;
//!
//! let window = Rc::new(Window::system());
//! let tracker = Tracker::new(Config { idle_timeout: 30_000, ..Config::default() }, window.clone());
//! tracker.on(
//!     ActivityState::Idle,
//!     Rc::new(|change: &StateChange| println!("idle after {}ms", change.time_since_transition)),
//! );
//!
//! window.emit("keydown");
//! ```

pub mod clock;
pub mod config;
pub mod environment;
pub mod holder;
pub mod logging;
pub mod registry;
pub mod tracker;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::{Config, ConfigError, EventSet};
pub use environment::{default_window, Environment, EventHandler, InputSender, TimerHandle, Window, WindowEvent};
pub use holder::{idle, idle_new_instance, reset_default_tracker, TrackerHolder};
pub use logging::LogSink;
pub use registry::SharedRegistry;
pub use tracker::{ClearTarget, IntervalCallback, IntervalId, StateListener, Tracker, TrackerBuilder};
pub use types::{ActivityState, IntervalTick, Reason, Signal, StateChange, TrackerSnapshot};
