//! Tracker configuration.
//!
//! Options use the same camelCase keys as the browser plugin they mirror
//! (`idleTimeout`, `pollTimeout`, ...) and also accept snake_case. Event sets
//! may be written either as a space-separated string or as a list.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default events that mark the user as active.
pub const DEFAULT_ACTIVE_EVENTS: &str = "focus scroll keydown mousedown mousemove";

/// Default events that mark the user as inactive.
pub const DEFAULT_IDLE_EVENTS: &str = "blur";

/// Default milliseconds of inactivity before the tracker turns idle.
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 60_000;

/// Default milliseconds between poll ticks.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 2_000;

/// Poll period used when a configured value is unusable.
pub const FALLBACK_POLL_TIMEOUT_MS: u64 = 1_000;

/// Largest timeout representable as a millisecond offset. Anything above is
/// clamped, and a timeout this large never elapses in practice.
pub const MAX_TIMEOUT_MS: u64 = i64::MAX as u64;

/// Errors from loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// An ordered, duplicate-free set of environment event types.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "EventSetRepr", into = "Vec<String>")]
pub struct EventSet(Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum EventSetRepr {
    Spaced(String),
    List(Vec<String>),
}

impl From<EventSetRepr> for EventSet {
    fn from(repr: EventSetRepr) -> Self {
        match repr {
            EventSetRepr::Spaced(s) => EventSet::parse(&s),
            EventSetRepr::List(items) => items.into_iter().collect(),
        }
    }
}

impl From<EventSet> for Vec<String> {
    fn from(set: EventSet) -> Self {
        set.0
    }
}

impl<S: Into<String>> FromIterator<S> for EventSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut events: Vec<String> = Vec::new();
        for event in iter {
            let event = event.into();
            let event = event.trim();
            if !event.is_empty() && !events.iter().any(|e| e == event) {
                events.push(event.to_string());
            }
        }
        EventSet(events)
    }
}

impl EventSet {
    /// Parses a whitespace-separated list such as `"focus keydown"`.
    pub fn parse(spaced: &str) -> Self {
        spaced.split_whitespace().collect()
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.0.iter().any(|e| e == event_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Recognized tracker options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Environment events that indicate activity.
    #[serde(alias = "active_events")]
    pub active_events: EventSet,

    /// Environment events that indicate inactivity.
    #[serde(alias = "idle_events")]
    pub idle_events: EventSet,

    /// Milliseconds of inactivity before considering the user idle.
    #[serde(alias = "idle_timeout")]
    pub idle_timeout: u64,

    /// Milliseconds between checks of the event registers and intervals.
    #[serde(alias = "poll_timeout")]
    pub poll_timeout: u64,

    /// Sends diagnostic lines to the debug sink.
    pub debug: bool,

    /// Dispatches state changes as custom events on the environment instead
    /// of invoking local listeners.
    #[serde(alias = "proxy_to_window")]
    pub proxy_to_window: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            active_events: EventSet::parse(DEFAULT_ACTIVE_EVENTS),
            idle_events: EventSet::parse(DEFAULT_IDLE_EVENTS),
            idle_timeout: DEFAULT_IDLE_TIMEOUT_MS,
            poll_timeout: DEFAULT_POLL_TIMEOUT_MS,
            debug: false,
            proxy_to_window: false,
        }
    }
}

impl Config {
    /// Parses a JSON document. Missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str::<Config>(json)?.normalized())
    }

    /// Loads and normalizes a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = ?path, "Loaded tracker config");
        Self::from_json_str(&contents)
    }

    /// Returns `<config dir>/idlewatch/config.json`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("idlewatch")
            .join("config.json")
    }

    /// Replaces unusable values with safe defaults instead of failing.
    pub fn normalized(mut self) -> Self {
        if self.poll_timeout == 0 {
            tracing::warn!(
                fallback_ms = FALLBACK_POLL_TIMEOUT_MS,
                "pollTimeout must be positive, using fallback"
            );
            self.poll_timeout = FALLBACK_POLL_TIMEOUT_MS;
        }
        if self.poll_timeout > MAX_TIMEOUT_MS {
            tracing::warn!(poll_timeout_ms = self.poll_timeout, "pollTimeout too large, clamping");
            self.poll_timeout = MAX_TIMEOUT_MS;
        }
        if self.idle_timeout > MAX_TIMEOUT_MS {
            tracing::debug!(idle_timeout_ms = self.idle_timeout, "idleTimeout clamped, tracker never times out");
            self.idle_timeout = MAX_TIMEOUT_MS;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.idle_timeout, 60_000);
        assert_eq!(config.poll_timeout, 2_000);
        assert!(config.active_events.contains("mousemove"));
        assert!(config.idle_events.contains("blur"));
        assert!(!config.debug);
        assert!(!config.proxy_to_window);
    }

    #[test]
    fn test_event_set_accepts_string_or_list() {
        let config =
            Config::from_json_str(r#"{"activeEvents": "keydown  scroll keydown", "idleEvents": ["blur", "visibilityhidden"]}"#)
                .unwrap();

        assert_eq!(config.active_events.iter().collect::<Vec<_>>(), vec!["keydown", "scroll"]);
        assert_eq!(config.idle_events.len(), 2);
        assert!(config.idle_events.contains("visibilityhidden"));
    }

    #[test]
    fn test_snake_case_aliases() {
        let config = Config::from_json_str(r#"{"idle_timeout": 10, "poll_timeout": 5}"#).unwrap();
        assert_eq!(config.idle_timeout, 10);
        assert_eq!(config.poll_timeout, 5);
    }

    #[test]
    fn test_zero_poll_timeout_is_normalized() {
        let config = Config::from_json_str(r#"{"pollTimeout": 0}"#).unwrap();
        assert_eq!(config.poll_timeout, FALLBACK_POLL_TIMEOUT_MS);
    }

    #[test]
    fn test_huge_timeouts_are_clamped() {
        let json = format!(r#"{{"idleTimeout": {}, "pollTimeout": {}}}"#, u64::MAX, u64::MAX);
        let config = Config::from_json_str(&json).unwrap();
        assert_eq!(config.idle_timeout, MAX_TIMEOUT_MS);
        assert_eq!(config.poll_timeout, MAX_TIMEOUT_MS);

        let config = Config::from_json_str(r#"{"idleTimeout": 5000}"#).unwrap();
        assert_eq!(config.idle_timeout, 5_000);
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let err = Config::from_json_str(r#"{"idleTimeout": "soon"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"idleTimeout": 1500, "debug": true}}"#).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.idle_timeout, 1_500);
        assert!(config.debug);
        assert_eq!(config.poll_timeout, DEFAULT_POLL_TIMEOUT_MS);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_serialization_round_trips_event_lists() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(json["idleEvents"], serde_json::json!(["blur"]));
        assert_eq!(json["pollTimeout"], 2000);
    }
}
