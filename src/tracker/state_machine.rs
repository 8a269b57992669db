//! Timestamp bookkeeping and the active/idle decision.

use crate::clock::Timestamp;
use crate::types::{ActivityState, Reason, Signal, StateChange, TrackerSnapshot};

/// Environment event that marks the user as inactive when received directly.
pub const BLUR_EVENT: &str = "blur";

/// Environment event that marks the user as active when received directly.
pub const FOCUS_EVENT: &str = "focus";

/// Source recorded when a poll tick found no newer shared signal.
pub const POLL_SOURCE: &str = "poll";

#[derive(Debug, Clone)]
pub(crate) struct StateMachine {
    pub last_activity: Timestamp,
    pub last_inactivity: Timestamp,
    pub state: ActivityState,
    pub previous_state: ActivityState,
    pub last_transition_time: Timestamp,
    pub last_source: Option<String>,
    pub last_reason: Option<Reason>,
}

impl StateMachine {
    /// Seeds activity at `now` so a new tracker starts active.
    pub fn new(now: Timestamp) -> Self {
        Self {
            last_activity: now,
            last_inactivity: 0,
            state: ActivityState::Active,
            previous_state: ActivityState::Active,
            last_transition_time: 0,
            last_source: None,
            last_reason: None,
        }
    }

    /// Records a focus/blur style event received directly by this tracker.
    pub fn record_direct(&mut self, event_type: &str, now: Timestamp) {
        self.last_source = Some(event_type.to_string());
        if event_type == BLUR_EVENT {
            self.last_inactivity = now;
        } else {
            self.last_activity = now;
        }
    }

    /// Adopts a shared signal that is newer than what this tracker has seen.
    ///
    /// An active signal wins only if no idle signal is at least as recent, and
    /// vice versa. When neither applies the source becomes [`POLL_SOURCE`].
    pub fn reconcile(&mut self, active: Option<&Signal>, idle: Option<&Signal>) {
        if let Some(a) = active {
            if a.timestamp > self.last_activity && idle.is_none_or(|i| i.timestamp < a.timestamp) {
                self.last_activity = a.timestamp;
                self.last_source = Some(a.event_type.clone());
                return;
            }
        }

        if let Some(i) = idle {
            if i.timestamp > self.last_inactivity && active.is_none_or(|a| a.timestamp < i.timestamp) {
                self.last_inactivity = i.timestamp;
                self.last_source = Some(i.event_type.clone());
                return;
            }
        }

        self.last_source = Some(POLL_SOURCE.to_string());
    }

    /// Decides the target state and applies it.
    ///
    /// Returns the notification payload when the state actually changed. The
    /// payload describes the state being left, so it is built before the
    /// transition bookkeeping is updated.
    pub fn evaluate(&mut self, now: Timestamp, idle_timeout: u64) -> Option<StateChange> {
        let (reason, target) = if self.last_activity > self.last_inactivity {
            // A deadline past the representable range never arrives
            let timed_out = self
                .last_activity
                .checked_add_unsigned(idle_timeout)
                .is_some_and(|deadline| deadline < now);
            if timed_out {
                (Reason::Timeout, ActivityState::Idle)
            } else {
                (Reason::Activity, ActivityState::Active)
            }
        } else {
            (Reason::Inactivity, ActivityState::Idle)
        };
        self.last_reason = Some(reason);

        if target == self.state {
            return None;
        }

        let change = StateChange {
            state: target,
            previous_state: self.state,
            last_transition_time: self.last_transition_time,
            time_since_transition: if self.last_transition_time == 0 {
                0
            } else {
                now - self.last_transition_time
            },
        };

        self.previous_state = self.state;
        self.state = target;
        self.last_transition_time = now;

        Some(change)
    }

    pub fn snapshot(&self, attached: bool, listener_count: usize, interval_count: usize) -> TrackerSnapshot {
        TrackerSnapshot {
            state: self.state,
            previous_state: self.previous_state,
            last_activity: self.last_activity,
            last_inactivity: self.last_inactivity,
            last_transition_time: self.last_transition_time,
            last_source: self.last_source.clone(),
            last_reason: self.last_reason,
            attached,
            listener_count,
            interval_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(event_type: &str, timestamp: Timestamp) -> Signal {
        Signal {
            event_type: event_type.to_string(),
            timestamp,
        }
    }

    #[test]
    fn test_new_machine_is_active() {
        let mut machine = StateMachine::new(1_000);
        assert_eq!(machine.state, ActivityState::Active);
        assert_eq!(machine.evaluate(1_000, 10), None);
        assert_eq!(machine.last_reason, Some(Reason::Activity));
    }

    #[test]
    fn test_timeout_is_strictly_after_threshold() {
        let mut machine = StateMachine::new(1_000);

        assert_eq!(machine.evaluate(1_010, 10), None);
        let change = machine.evaluate(1_011, 10).unwrap();

        assert_eq!(change.state, ActivityState::Idle);
        assert_eq!(change.previous_state, ActivityState::Active);
        assert_eq!(change.last_transition_time, 0);
        assert_eq!(change.time_since_transition, 0);
        assert_eq!(machine.last_reason, Some(Reason::Timeout));
        assert_eq!(machine.last_transition_time, 1_011);
    }

    #[test]
    fn test_repeated_evaluation_reports_one_change() {
        let mut machine = StateMachine::new(0);
        machine.last_activity = 100;

        assert!(machine.evaluate(500, 10).is_some());
        assert!(machine.evaluate(505, 10).is_none());
        assert!(machine.evaluate(900, 10).is_none());
        assert_eq!(machine.state, ActivityState::Idle);
    }

    #[test]
    fn test_blur_goes_idle_by_inactivity() {
        let mut machine = StateMachine::new(1_000);
        machine.record_direct(BLUR_EVENT, 1_005);

        let change = machine.evaluate(1_005, 60_000).unwrap();
        assert_eq!(change.state, ActivityState::Idle);
        assert_eq!(machine.last_reason, Some(Reason::Inactivity));
        assert_eq!(machine.last_source.as_deref(), Some("blur"));

        machine.record_direct(FOCUS_EVENT, 1_500);
        let change = machine.evaluate(1_500, 60_000).unwrap();
        assert_eq!(change.state, ActivityState::Active);
        assert_eq!(change.last_transition_time, 1_005);
        assert_eq!(change.time_since_transition, 495);
    }

    #[test]
    fn test_reconcile_adopts_newer_active_signal() {
        let mut machine = StateMachine::new(1_000);
        machine.reconcile(Some(&signal("keydown", 1_200)), Some(&signal("blur", 1_100)));

        assert_eq!(machine.last_activity, 1_200);
        assert_eq!(machine.last_source.as_deref(), Some("keydown"));
    }

    #[test]
    fn test_reconcile_prefers_newer_idle_signal() {
        let mut machine = StateMachine::new(1_000);
        machine.reconcile(Some(&signal("keydown", 1_200)), Some(&signal("blur", 1_300)));

        assert_eq!(machine.last_activity, 1_000);
        assert_eq!(machine.last_inactivity, 1_300);
        assert_eq!(machine.last_source.as_deref(), Some("blur"));
    }

    #[test]
    fn test_reconcile_with_stale_signals_is_poll() {
        let mut machine = StateMachine::new(1_000);
        machine.last_inactivity = 900;
        machine.reconcile(Some(&signal("mousemove", 800)), Some(&signal("blur", 900)));

        assert_eq!(machine.last_activity, 1_000);
        assert_eq!(machine.last_inactivity, 900);
        assert_eq!(machine.last_source.as_deref(), Some(POLL_SOURCE));

        machine.reconcile(None, None);
        assert_eq!(machine.last_source.as_deref(), Some(POLL_SOURCE));
    }

    #[test]
    fn test_reconcile_equal_timestamps_adopt_neither() {
        let mut machine = StateMachine::new(1_000);
        machine.reconcile(Some(&signal("keydown", 1_500)), Some(&signal("blur", 1_500)));

        assert_eq!(machine.last_activity, 1_000);
        assert_eq!(machine.last_inactivity, 0);
        assert_eq!(machine.last_source.as_deref(), Some(POLL_SOURCE));
    }

    #[test]
    fn test_huge_idle_timeout_never_times_out() {
        for idle_timeout in [u64::MAX, i64::MAX as u64] {
            let mut machine = StateMachine::new(1_700_000_000_000);

            assert_eq!(machine.evaluate(1_700_000_000_005, idle_timeout), None);
            assert_eq!(machine.evaluate(i64::MAX, idle_timeout), None);
            assert_eq!(machine.state, ActivityState::Active);
            assert_eq!(machine.last_reason, Some(Reason::Activity));
        }
    }
}
