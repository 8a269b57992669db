//! Data types shared across the tracker.
//!
//! Defines the two activity states, the diagnostic reason for the last
//! evaluation, and the payloads handed to state listeners and interval
//! callbacks.

use crate::clock::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two states a tracker can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityState {
    Active,
    Idle,
}

impl ActivityState {
    /// Name used for custom events on the environment bus.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityState::Active => "active",
            ActivityState::Idle => "idle",
        }
    }
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the last evaluation chose its target state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reason {
    /// Last activity is older than the idle timeout.
    Timeout,
    /// Activity is the most recent signal and still within the timeout.
    Activity,
    /// Inactivity is the most recent (or only) signal.
    Inactivity,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Reason::Timeout => "timeout",
            Reason::Activity => "activity",
            Reason::Inactivity => "inactivity",
        })
    }
}

/// The most recent environment event recorded for one event category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    /// Event type that produced the signal (e.g. "mousemove").
    pub event_type: String,

    /// When the event was observed.
    pub timestamp: Timestamp,
}

/// Payload delivered to state listeners on a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    /// The state being entered.
    pub state: ActivityState,

    /// The state being left.
    pub previous_state: ActivityState,

    /// When the state being left was entered. 0 if there was no earlier
    /// transition.
    pub last_transition_time: Timestamp,

    /// How long the state being left lasted, or 0 if unknown.
    pub time_since_transition: i64,
}

/// Payload delivered to interval callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalTick {
    /// The period that elapsed (active or idle period, depending on state).
    pub interval: u64,

    /// When the callback last fired (or was registered).
    pub last_fired: Timestamp,

    /// State the tracker is in.
    pub state: ActivityState,

    /// Milliseconds since `last_fired`.
    pub elapsed: i64,
}

/// Serializable view of a tracker's diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSnapshot {
    pub state: ActivityState,
    pub previous_state: ActivityState,
    pub last_activity: Timestamp,
    pub last_inactivity: Timestamp,
    pub last_transition_time: Timestamp,
    pub last_source: Option<String>,
    pub last_reason: Option<Reason>,
    pub attached: bool,
    pub listener_count: usize,
    pub interval_count: usize,
}
