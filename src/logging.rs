//! Per-tracker debug sink.
//!
//! Library diagnostics always go through `tracing`. When a tracker is built
//! with `debug` enabled it additionally writes human-readable lines to a
//! debug sink: the caller's `log` function if one was given, otherwise an
//! info-level tracing event under the `idlewatch::debug` target.

use std::fmt;
use std::rc::Rc;

/// A user-supplied function receiving debug lines.
pub type LogSink = Rc<dyn Fn(&str)>;

#[derive(Clone, Default)]
pub struct DebugLog {
    sink: Option<LogSink>,
}

impl DebugLog {
    pub fn new(enabled: bool, sink: Option<LogSink>) -> Self {
        if !enabled {
            return Self { sink: None };
        }
        let sink = sink.unwrap_or_else(|| {
            Rc::new(|line: &str| tracing::info!(target: "idlewatch::debug", "{}", line))
        });
        Self { sink: Some(sink) }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Formats and emits a line if debugging is enabled.
    pub fn log(&self, args: fmt::Arguments<'_>) {
        if let Some(sink) = &self.sink {
            sink(&args.to_string());
        }
    }
}

impl fmt::Debug for DebugLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugLog")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
