//! Millisecond time sources.
//!
//! All tracker timestamps are milliseconds since the Unix epoch. The system
//! clock reads wall time through chrono; the manual clock only moves when told
//! to, which makes poll timing fully deterministic in tests.

use chrono::Utc;
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// A source of timestamps that can also wait for a future instant.
pub trait Clock {
    /// Returns the current time.
    fn now(&self) -> Timestamp;

    /// Blocks (or jumps) until `deadline` has been reached.
    ///
    /// Returns immediately if the deadline is already in the past.
    fn sleep_until(&self, deadline: Timestamp);
}

/// Wall-clock time backed by `chrono::Utc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now().timestamp_millis()
    }

    fn sleep_until(&self, deadline: Timestamp) {
        let remaining = deadline - self.now();
        if remaining > 0 {
            std::thread::sleep(Duration::from_millis(remaining as u64));
        }
    }
}

/// A clock that only advances when slept on or set explicitly.
///
/// Clones share the same underlying time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<Timestamp>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    /// Moves the clock forward by `ms` without running any timers.
    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get().saturating_add_unsigned(ms));
    }

    /// Sets the clock to `ts`. Time never moves backwards.
    pub fn set(&self, ts: Timestamp) {
        if ts > self.now.get() {
            self.now.set(ts);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.get()
    }

    fn sleep_until(&self, deadline: Timestamp) {
        self.set(deadline);
    }
}
