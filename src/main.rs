//! idlewatch - interactive active/idle monitor.
//!
//! Runs the default tracker against a real-time window. Each line read from
//! stdin is dispatched as an environment event (e.g. `keydown`, `blur`),
//! transitions are logged, and a JSON status snapshot is printed on a
//! state-dependent interval until Ctrl+C.

use idlewatch::{
    default_window, idle, ActivityState, Config, IntervalId, IntervalTick, StateChange, Tracker,
};
use std::io::BufRead;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Status cadence while active.
const ACTIVE_STATUS_MS: u64 = 10_000;

/// Status cadence while idle.
const IDLE_STATUS_MS: u64 = 60_000;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("idlewatch=info")),
        )
        .init();

    let config = load_config()?;
    tracing::info!(
        idle_timeout_ms = config.idle_timeout,
        poll_timeout_ms = config.poll_timeout,
        "Starting idlewatch"
    );

    let window = default_window();
    let tracker = idle(Some(config));
    let status = install_reporting(&tracker);

    // Shutdown signal
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_ctrlc = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received");
        shutdown_ctrlc.store(true, Ordering::SeqCst);
    })?;

    spawn_stdin_reader(window.input_sender(), Arc::clone(&shutdown));

    println!("Type an event name per line (keydown, mousemove, blur, focus, ...). Ctrl+C to quit.");
    window.run(&shutdown);

    tracker.detach();
    tracker.clear_interval(status);
    print_summary(&tracker);
    Ok(())
}

/// Uses `IDLEWATCH_CONFIG` if set, else the default path if it exists, else
/// built-in defaults.
fn load_config() -> Result<Config, idlewatch::ConfigError> {
    if let Ok(path) = std::env::var("IDLEWATCH_CONFIG") {
        return Config::load(Path::new(&path));
    }

    let path = Config::default_path();
    if path.exists() {
        Config::load(&path)
    } else {
        tracing::debug!(path = ?path, "No config file, using defaults");
        Ok(Config::default())
    }
}

fn install_reporting(tracker: &Tracker) -> IntervalId {
    let report: idlewatch::StateListener = Rc::new(|change: &StateChange| {
        tracing::info!(
            from = %change.previous_state,
            to = %change.state,
            previous_duration_ms = change.time_since_transition,
            "User is now {}",
            change.state
        );
    });
    tracker
        .on(ActivityState::Active, Rc::clone(&report))
        .on(ActivityState::Idle, report);

    let status_tracker = tracker.clone();
    tracker.set_interval(
        Rc::new(move |tick: &IntervalTick| {
            match serde_json::to_string(&status_tracker.snapshot()) {
                Ok(json) => println!("{}", json),
                Err(e) => tracing::warn!(?e, "Failed to serialize status"),
            }
            tracing::trace!(elapsed_ms = tick.elapsed, "Status printed");
        }),
        Some(ACTIVE_STATUS_MS),
        Some(IDLE_STATUS_MS),
    )
}

/// Forwards stdin lines to the window until EOF or shutdown.
fn spawn_stdin_reader(sender: idlewatch::InputSender, shutdown: Arc<AtomicBool>) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            let Ok(line) = line else {
                break;
            };
            let event = line.trim();
            if event.is_empty() {
                continue;
            }
            if sender.send(event.to_string()).is_err() {
                break;
            }
        }
        tracing::debug!("Stdin reader finished");
    });
}

fn print_summary(tracker: &Tracker) {
    let snapshot = tracker.snapshot();
    println!();
    println!("Final state:      {}", snapshot.state);
    println!("Previous state:   {}", snapshot.previous_state);
    println!("Last activity:    {}", format_ts(snapshot.last_activity));
    println!("Last transition:  {}", format_ts(snapshot.last_transition_time));
    if let Some(reason) = snapshot.last_reason {
        println!("Last reason:      {}", reason);
    }
}

fn format_ts(ts: idlewatch::Timestamp) -> String {
    if ts == 0 {
        return "never".to_string();
    }
    chrono::DateTime::from_timestamp_millis(ts)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}
