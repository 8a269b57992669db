//! In-process event bus and cooperative timer loop.
//!
//! `Window` runs everything on the thread that owns it. Handlers and timer
//! callbacks are invoked without any internal borrow held, so they may
//! freely register, unregister, schedule or cancel while running.
//!
//! Time comes from a [`Clock`]. With a [`SystemClock`] the loop is driven by
//! [`Window::run`]; with a [`ManualClock`](crate::clock::ManualClock) tests
//! step it deterministically through [`Window::advance`].

use super::{Environment, EventHandler, TimerCallback, TimerHandle, WindowEvent};
use crate::clock::{Clock, SystemClock, Timestamp};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

/// Longest the real-time loop sleeps before checking for input and shutdown.
const MAX_WAIT_MS: i64 = 50;

/// Thread-safe handle for queueing event types into a [`Window`].
pub type InputSender = Sender<String>;

thread_local! {
    static DEFAULT_WINDOW: Rc<Window> = Rc::new(Window::system());
}

/// This thread's default window, created on first use on wall-clock time.
pub fn default_window() -> Rc<Window> {
    DEFAULT_WINDOW.with(Rc::clone)
}

struct Timer {
    interval: u64,
    next_due: Timestamp,
    callback: TimerCallback,
}

pub struct Window {
    clock: Rc<dyn Clock>,
    listeners: RefCell<HashMap<String, Vec<EventHandler>>>,
    timers: RefCell<BTreeMap<TimerHandle, Timer>>,
    next_timer_id: Cell<u64>,
    input_tx: Sender<String>,
    input_rx: Receiver<String>,
}

impl Window {
    /// Creates a window driven by `clock`.
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        let (input_tx, input_rx) = mpsc::channel();
        Self {
            clock,
            listeners: RefCell::new(HashMap::new()),
            timers: RefCell::new(BTreeMap::new()),
            next_timer_id: Cell::new(0),
            input_tx,
            input_rx,
        }
    }

    /// Creates a window on wall-clock time.
    pub fn system() -> Self {
        Self::new(Rc::new(SystemClock))
    }

    /// Dispatches a native input event of `event_type`, stamped with the
    /// current time.
    pub fn emit(&self, event_type: &str) {
        self.dispatch(WindowEvent {
            event_type: event_type.to_string(),
            timestamp: self.clock.now(),
            detail: None,
        });
    }

    fn dispatch(&self, event: WindowEvent) {
        let handlers = self
            .listeners
            .borrow()
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();

        tracing::trace!(
            event_type = %event.event_type,
            handlers = handlers.len(),
            "Dispatching event"
        );

        for handler in handlers {
            handler(&event);
        }
    }

    /// Number of handlers registered for `event_type`.
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.listeners
            .borrow()
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// Number of handlers registered across all event types.
    pub fn total_listener_count(&self) -> usize {
        self.listeners.borrow().values().map(Vec::len).sum()
    }

    /// Number of live recurring timers.
    pub fn timer_count(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Returns a sender other threads can use to queue input events.
    ///
    /// Queued events are dispatched on this window's thread the next time
    /// the loop drains its input.
    pub fn input_sender(&self) -> InputSender {
        self.input_tx.clone()
    }

    /// Dispatches every queued input event. Returns how many were handled.
    pub fn drain_input(&self) -> usize {
        let mut handled = 0;
        while let Ok(event_type) = self.input_rx.try_recv() {
            self.emit(event_type.trim());
            handled += 1;
        }
        handled
    }

    /// Earliest due time of any live timer.
    pub fn next_due(&self) -> Option<Timestamp> {
        self.timers.borrow().values().map(|t| t.next_due).min()
    }

    /// Fires the earliest timer due at or before `limit`, if any.
    fn fire_next(&self, limit: Timestamp) -> bool {
        let callback = {
            let mut timers = self.timers.borrow_mut();
            let Some((&handle, due)) = timers
                .iter()
                .filter(|(_, t)| t.next_due <= limit)
                .min_by_key(|(handle, t)| (t.next_due, **handle))
                .map(|(handle, t)| (handle, t.next_due))
            else {
                return false;
            };

            let now = self.clock.now();
            let Some(timer) = timers.get_mut(&handle) else {
                return false;
            };
            let mut next = due.saturating_add_unsigned(timer.interval);
            if next <= now {
                // Fell behind; skip missed runs rather than bursting
                next = now.saturating_add_unsigned(timer.interval);
            }
            timer.next_due = next;
            Rc::clone(&timer.callback)
        };

        callback();
        true
    }

    /// Runs every timer that is due now. Returns how many callbacks ran.
    pub fn run_due_timers(&self) -> usize {
        let mut fired = 0;
        while self.fire_next(self.clock.now()) {
            fired += 1;
        }
        fired
    }

    /// Moves time forward by `ms`, firing each timer at its due instant.
    ///
    /// Queued input is dispatched first. Intended for manual clocks; with a
    /// system clock this sleeps for the whole span.
    pub fn advance(&self, ms: u64) {
        self.drain_input();
        let target = self.clock.now().saturating_add_unsigned(ms);

        while let Some(due) = self.next_due().filter(|due| *due <= target) {
            self.clock.sleep_until(due);
            self.fire_next(due.max(self.clock.now()));
        }

        self.clock.sleep_until(target);
    }

    /// Runs the real-time loop until `shutdown` is set.
    pub fn run(&self, shutdown: &AtomicBool) {
        tracing::debug!("Window loop starting");

        while !shutdown.load(Ordering::SeqCst) {
            self.drain_input();
            self.run_due_timers();

            let now = self.clock.now();
            let wake = self
                .next_due()
                .map_or(now + MAX_WAIT_MS, |due| due.min(now + MAX_WAIT_MS));
            self.clock.sleep_until(wake);
        }

        tracing::debug!("Window loop exited");
    }
}

impl Environment for Window {
    fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn register(&self, event_type: &str, handler: EventHandler) {
        self.listeners
            .borrow_mut()
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
    }

    fn unregister(&self, event_type: &str, handler: &EventHandler) {
        let mut listeners = self.listeners.borrow_mut();
        if let Some(handlers) = listeners.get_mut(event_type) {
            handlers.retain(|h| !Rc::ptr_eq(h, handler));
            if handlers.is_empty() {
                listeners.remove(event_type);
            }
        }
    }

    fn dispatch_custom_event(&self, name: &str, detail: serde_json::Value) {
        self.dispatch(WindowEvent {
            event_type: name.to_string(),
            timestamp: self.clock.now(),
            detail: Some(detail),
        });
    }

    fn schedule_recurring(&self, interval_ms: u64, callback: TimerCallback) -> TimerHandle {
        let interval = interval_ms.max(1);
        let id = self.next_timer_id.get();
        self.next_timer_id.set(id + 1);
        let handle = TimerHandle(id);

        self.timers.borrow_mut().insert(
            handle,
            Timer {
                interval,
                next_due: self.clock.now().saturating_add_unsigned(interval),
                callback,
            },
        );

        tracing::trace!(%handle, interval_ms = interval, "Timer scheduled");
        handle
    }

    fn cancel(&self, handle: TimerHandle) {
        if self.timers.borrow_mut().remove(&handle).is_some() {
            tracing::trace!(%handle, "Timer cancelled");
        }
    }
}

impl std::fmt::Debug for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Window")
            .field("now", &self.clock.now())
            .field("listeners", &self.total_listener_count())
            .field("timers", &self.timer_count())
            .finish()
    }
}
