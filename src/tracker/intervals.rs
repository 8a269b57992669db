//! State-aware periodic callbacks driven by the poll loop.

use crate::clock::Timestamp;
use crate::types::{ActivityState, IntervalTick};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Callback run by an interval. Identity is the `Rc` allocation.
pub type IntervalCallback = Rc<dyn Fn(&IntervalTick)>;

/// Handle returned by [`Tracker::set_interval`](super::Tracker::set_interval).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IntervalId(u64);

impl fmt::Display for IntervalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "interval#{}", self.0)
    }
}

/// Selects intervals to clear: one handle, or every interval sharing a
/// callback.
pub enum ClearTarget<'a> {
    Id(IntervalId),
    Callback(&'a IntervalCallback),
}

impl From<IntervalId> for ClearTarget<'_> {
    fn from(id: IntervalId) -> Self {
        ClearTarget::Id(id)
    }
}

impl<'a> From<&'a IntervalCallback> for ClearTarget<'a> {
    fn from(callback: &'a IntervalCallback) -> Self {
        ClearTarget::Callback(callback)
    }
}

struct IntervalRecord {
    callback: IntervalCallback,
    active_period: Option<u64>,
    idle_period: Option<u64>,
    last_fired: Timestamp,
}

impl IntervalRecord {
    fn period_for(&self, state: ActivityState) -> Option<u64> {
        match state {
            ActivityState::Active => self.active_period,
            ActivityState::Idle => self.idle_period,
        }
    }

    fn is_due(&self, state: ActivityState, now: Timestamp) -> bool {
        self.period_for(state)
            .and_then(|period| self.last_fired.checked_add_unsigned(period))
            .is_some_and(|due| due <= now)
    }
}

/// A callback that is due, with the payload it should receive.
pub(crate) struct DueInterval {
    pub id: IntervalId,
    pub callback: IntervalCallback,
    pub tick: IntervalTick,
}

#[derive(Default)]
pub(crate) struct IntervalScheduler {
    records: BTreeMap<IntervalId, IntervalRecord>,
    next_id: u64,
}

impl IntervalScheduler {
    /// Registers a callback. Absent or zero periods never fire.
    pub fn insert(
        &mut self,
        callback: IntervalCallback,
        active_period: Option<u64>,
        idle_period: Option<u64>,
        now: Timestamp,
    ) -> IntervalId {
        let id = IntervalId(self.next_id);
        self.next_id += 1;
        self.records.insert(
            id,
            IntervalRecord {
                callback,
                active_period: active_period.filter(|p| *p > 0),
                idle_period: idle_period.filter(|p| *p > 0),
                last_fired: now,
            },
        );
        id
    }

    /// Removes the selected intervals. Returns how many were removed.
    pub fn remove(&mut self, target: ClearTarget<'_>) -> usize {
        match target {
            ClearTarget::Id(id) => usize::from(self.records.remove(&id).is_some()),
            ClearTarget::Callback(callback) => {
                let before = self.records.len();
                self.records
                    .retain(|_, record| !Rc::ptr_eq(&record.callback, callback));
                before - self.records.len()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Intervals due in `state` at `now`, in registration order.
    ///
    /// Nothing is marked as fired; call [`fire`](Self::fire) for each one
    /// actually run.
    pub fn due_ids(&self, state: ActivityState, now: Timestamp) -> Vec<IntervalId> {
        self.records
            .iter()
            .filter(|(_, record)| record.is_due(state, now))
            .map(|(&id, _)| id)
            .collect()
    }

    /// Marks `id` as fired at `now` and returns its callback and payload.
    ///
    /// Returns `None` if it was cleared or is no longer due. Each interval
    /// fires at most once per call regardless of how many periods have
    /// elapsed.
    pub fn fire(&mut self, id: IntervalId, state: ActivityState, now: Timestamp) -> Option<DueInterval> {
        let record = self.records.get_mut(&id)?;
        if !record.is_due(state, now) {
            return None;
        }
        let period = record.period_for(state)?;

        let due = DueInterval {
            id,
            callback: Rc::clone(&record.callback),
            tick: IntervalTick {
                interval: period,
                last_fired: record.last_fired,
                state,
                elapsed: now - record.last_fired,
            },
        };
        record.last_fired = now;
        Some(due)
    }
}
