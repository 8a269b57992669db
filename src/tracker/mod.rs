//! The active/idle tracker.
//!
//! A [`Tracker`] owns its timestamps, listeners and intervals. While attached
//! it listens for focus/blur on its environment, references the shared event
//! registry and runs a recurring poll that:
//! 1. Adopts newer signals from the shared registry
//! 2. Re-evaluates the active/idle state, notifying listeners on change
//! 3. Runs any state-aware intervals that are due
//!
//! `Tracker` is a cheap handle; clones refer to the same tracker. Dropping
//! the last handle of an attached tracker releases its environment resources.

pub mod intervals;
pub mod listeners;
pub mod state_machine;


pub use intervals::{ClearTarget, IntervalCallback, IntervalId};
pub use listeners::{EnvironmentProxy, LocalListeners, NotificationSink, StateListener};
pub use state_machine::{BLUR_EVENT, FOCUS_EVENT, POLL_SOURCE};

use crate::clock::Timestamp;
use crate::config::Config;
use crate::environment::{default_window, Environment, EventHandler, TimerHandle, WindowEvent};
use crate::logging::{DebugLog, LogSink};
use crate::registry::SharedRegistry;
use crate::types::{ActivityState, Reason, StateChange, TrackerSnapshot};
use intervals::IntervalScheduler;
use listeners::{invoke_isolated, ListenerRegistry};
use state_machine::StateMachine;
use std::cell::RefCell;
use std::rc::Rc;

/// Environment resources held while attached.
enum Attachment {
    Detached,
    Attached {
        direct_handler: EventHandler,
        poll: TimerHandle,
    },
}

struct Inner {
    config: Config,
    env: Rc<dyn Environment>,
    registry: Rc<SharedRegistry>,
    sink: Box<dyn NotificationSink>,
    log: DebugLog,
    machine: RefCell<StateMachine>,
    listeners: RefCell<ListenerRegistry>,
    intervals: RefCell<IntervalScheduler>,
    attachment: RefCell<Attachment>,
}

impl Inner {
    fn release_environment(&self, direct_handler: &EventHandler, poll: TimerHandle) {
        self.env.unregister(FOCUS_EVENT, direct_handler);
        self.env.unregister(BLUR_EVENT, direct_handler);
        self.registry.release();
        self.env.cancel(poll);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let attachment = std::mem::replace(self.attachment.get_mut(), Attachment::Detached);
        if let Attachment::Attached {
            direct_handler,
            poll,
        } = attachment
        {
            tracing::debug!("Attached tracker dropped, releasing environment");
            self.release_environment(&direct_handler, poll);
        }
    }
}

/// Builds a [`Tracker`] and attaches it.
pub struct TrackerBuilder {
    config: Config,
    window: Option<Rc<dyn Environment>>,
    registry: Option<Rc<SharedRegistry>>,
    log: Option<LogSink>,
}

impl TrackerBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Environment to attach to. Without one the thread's default window
    /// and its default shared registry are used.
    pub fn window(mut self, window: Rc<dyn Environment>) -> Self {
        self.window = Some(window);
        self
    }

    /// Shared registry to join. Without one, trackers on the same window
    /// share that window's default registry.
    pub fn registry(mut self, registry: Rc<SharedRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Debug sink used when `config.debug` is set.
    pub fn log(mut self, sink: LogSink) -> Self {
        self.log = Some(sink);
        self
    }

    pub fn build(self) -> Tracker {
        let config = self.config.normalized();
        let (env, registry) = match (self.window, self.registry) {
            (Some(env), Some(registry)) => (env, registry),
            (Some(env), None) => {
                let registry = SharedRegistry::for_environment(&env);
                (env, registry)
            }
            (None, registry) => {
                let env: Rc<dyn Environment> = default_window();
                (env, registry.unwrap_or_else(SharedRegistry::thread_default))
            }
        };

        let sink: Box<dyn NotificationSink> = if config.proxy_to_window {
            Box::new(EnvironmentProxy::new(Rc::clone(&env)))
        } else {
            Box::new(LocalListeners)
        };

        tracing::debug!(
            idle_timeout_ms = config.idle_timeout,
            poll_timeout_ms = config.poll_timeout,
            proxy = config.proxy_to_window,
            "Tracker created"
        );

        let now = env.now();
        let tracker = Tracker {
            inner: Rc::new(Inner {
                log: DebugLog::new(config.debug, self.log),
                config,
                env,
                registry,
                sink,
                machine: RefCell::new(StateMachine::new(now)),
                listeners: RefCell::new(ListenerRegistry::default()),
                intervals: RefCell::new(IntervalScheduler::default()),
                attachment: RefCell::new(Attachment::Detached),
            }),
        };
        tracker.attach();
        tracker
    }
}

#[derive(Clone)]
pub struct Tracker {
    inner: Rc<Inner>,
}

impl Tracker {
    pub fn builder() -> TrackerBuilder {
        TrackerBuilder {
            config: Config::default(),
            window: None,
            registry: None,
            log: None,
        }
    }

    /// Creates and attaches a tracker on `window`, sharing the window's
    /// default registry with other trackers built this way.
    pub fn new(config: Config, window: Rc<dyn Environment>) -> Self {
        Self::builder().config(config).window(window).build()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Installs the focus/blur listener, references the shared registry and
    /// starts polling. Does nothing if already attached.
    pub fn attach(&self) -> &Self {
        if self.is_attached() {
            return self;
        }
        let inner = &self.inner;

        let weak = Rc::downgrade(inner);
        let direct_handler: EventHandler = Rc::new(move |event: &WindowEvent| {
            if let Some(inner) = weak.upgrade() {
                Tracker { inner }.handle_direct_event(event);
            }
        });
        inner.env.register(FOCUS_EVENT, Rc::clone(&direct_handler));
        inner.env.register(BLUR_EVENT, Rc::clone(&direct_handler));

        inner
            .registry
            .acquire(&inner.env, &inner.config.active_events, &inner.config.idle_events);

        let weak = Rc::downgrade(inner);
        let poll = inner.env.schedule_recurring(
            inner.config.poll_timeout,
            Rc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Tracker { inner }.poll();
                }
            }),
        );

        *inner.attachment.borrow_mut() = Attachment::Attached {
            direct_handler,
            poll,
        };

        tracing::debug!(%poll, "Tracker attached");
        self
    }

    /// Reverses [`attach`](Self::attach) and removes all state listeners.
    /// Intervals are kept and resume on the next attach. Does nothing if
    /// already detached.
    pub fn detach(&self) -> &Self {
        let attachment = self.inner.attachment.replace(Attachment::Detached);
        let Attachment::Attached {
            direct_handler,
            poll,
        } = attachment
        else {
            return self;
        };

        self.inner.release_environment(&direct_handler, poll);
        self.inner.listeners.borrow_mut().clear();
        self.inner.sink.unsubscribe_all();

        tracing::debug!(%poll, "Tracker detached");
        self
    }

    pub fn is_attached(&self) -> bool {
        matches!(*self.inner.attachment.borrow(), Attachment::Attached { .. })
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    /// Registers `listener` for transitions into `state`.
    ///
    /// In proxy mode the listener is subscribed to the environment's custom
    /// event for `state`, so it also hears other proxying trackers there.
    pub fn on(&self, state: ActivityState, listener: StateListener) -> &Self {
        self.inner.sink.subscribe(state, &listener, &self.inner.log);
        self.inner.listeners.borrow_mut().add(state, listener);
        self
    }

    /// Removes every registration of `listener` for `state`, or all
    /// listeners for `state` when `listener` is `None`.
    pub fn off(&self, state: ActivityState, listener: Option<&StateListener>) -> &Self {
        self.inner.listeners.borrow_mut().remove(state, listener);
        self.inner.sink.unsubscribe(state, listener);
        self
    }

    /// Notifies `change.state` listeners through the configured sink.
    fn trigger(&self, change: &StateChange) {
        let listeners = self.inner.listeners.borrow().listeners_for(change.state);
        self.inner.sink.deliver(change, &listeners, &self.inner.log);
    }

    // ========================================================================
    // Intervals
    // ========================================================================

    /// Runs `callback` every `active_period` ms while active and every
    /// `idle_period` ms while idle. A `None` period never fires in that state.
    pub fn set_interval(
        &self,
        callback: IntervalCallback,
        active_period: Option<u64>,
        idle_period: Option<u64>,
    ) -> IntervalId {
        let now = self.inner.env.now();
        let id = self
            .inner
            .intervals
            .borrow_mut()
            .insert(callback, active_period, idle_period, now);
        tracing::trace!(%id, ?active_period, ?idle_period, "Interval registered");
        id
    }

    /// Clears an interval by handle, or every interval registered with the
    /// given callback.
    pub fn clear_interval<'a>(&self, target: impl Into<ClearTarget<'a>>) -> &Self {
        let removed = self.inner.intervals.borrow_mut().remove(target.into());
        tracing::trace!(removed, "Intervals cleared");
        self
    }

    fn run_intervals(&self, now: Timestamp) {
        let state = self.state();
        let due = self.inner.intervals.borrow().due_ids(state, now);

        for id in due {
            if !self.is_attached() {
                break;
            }
            // An earlier callback in this tick may have cleared it
            let Some(interval) = self.inner.intervals.borrow_mut().fire(id, state, now) else {
                continue;
            };
            self.inner.log.log(format_args!(
                "{} fired after {}ms ({})",
                interval.id, interval.tick.elapsed, state
            ));
            invoke_isolated("interval callback", &self.inner.log, || {
                (interval.callback)(&interval.tick)
            });
        }
    }

    // ========================================================================
    // Event handling and polling
    // ========================================================================

    fn handle_direct_event(&self, event: &WindowEvent) {
        let now = self.inner.env.now();
        let (activity, inactivity) = {
            let mut machine = self.inner.machine.borrow_mut();
            machine.record_direct(&event.event_type, now);
            (machine.last_activity, machine.last_inactivity)
        };
        self.inner
            .log
            .log(format_args!("{} {} {}", event.event_type, activity, inactivity));
        self.check(now);
    }

    fn poll(&self) {
        self.inner.log.log(format_args!("poll start"));
        let now = self.inner.env.now();

        let active = self.inner.registry.last_active();
        let idle = self.inner.registry.last_idle();
        self.inner
            .machine
            .borrow_mut()
            .reconcile(active.as_ref(), idle.as_ref());

        self.check(now);
        // A state listener may have detached us
        if !self.is_attached() {
            return;
        }
        self.run_intervals(now);

        tracing::trace!(state = %self.state(), source = ?self.last_source(), "Poll complete");
    }

    fn check(&self, now: Timestamp) {
        let change = self
            .inner
            .machine
            .borrow_mut()
            .evaluate(now, self.inner.config.idle_timeout);
        let Some(change) = change else {
            return;
        };

        let (source, reason) = {
            let machine = self.inner.machine.borrow();
            (machine.last_source.clone(), machine.last_reason)
        };
        let source = source.unwrap_or_default();
        let reason = reason.map(|r| r.to_string()).unwrap_or_default();

        tracing::debug!(
            from = %change.previous_state,
            to = %change.state,
            source = %source,
            reason = %reason,
            "State changed"
        );
        self.inner.log.log(format_args!(
            "{} -> {} ( {} ) ( {} )",
            change.previous_state, change.state, source, reason
        ));

        self.trigger(&change);
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> ActivityState {
        self.inner.machine.borrow().state
    }

    pub fn previous_state(&self) -> ActivityState {
        self.inner.machine.borrow().previous_state
    }

    pub fn last_activity(&self) -> Timestamp {
        self.inner.machine.borrow().last_activity
    }

    pub fn last_inactivity(&self) -> Timestamp {
        self.inner.machine.borrow().last_inactivity
    }

    pub fn last_transition_time(&self) -> Timestamp {
        self.inner.machine.borrow().last_transition_time
    }

    pub fn last_source(&self) -> Option<String> {
        self.inner.machine.borrow().last_source.clone()
    }

    pub fn last_reason(&self) -> Option<Reason> {
        self.inner.machine.borrow().last_reason
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn registry(&self) -> &Rc<SharedRegistry> {
        &self.inner.registry
    }

    pub fn listener_count(&self, state: ActivityState) -> usize {
        self.inner.listeners.borrow().count(state)
    }

    pub fn interval_count(&self) -> usize {
        self.inner.intervals.borrow().len()
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let attached = self.is_attached();
        let listeners = self.inner.listeners.borrow().total();
        let intervals = self.interval_count();
        self.inner
            .machine
            .borrow()
            .snapshot(attached, listeners, intervals)
    }

    /// Whether both handles refer to the same tracker.
    pub fn ptr_eq(&self, other: &Tracker) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("state", &self.state())
            .field("attached", &self.is_attached())
            .field("config", &self.inner.config)
            .finish()
    }
}
