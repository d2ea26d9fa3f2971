//! Watchdog configuration

use std::time::Duration;

use serde::Deserialize;

/// Tick intervals for the thread and subprocess watchdogs
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Interval between thread registry scans
    #[serde(deserialize_with = "crate::config::secs::deserialize")]
    pub thread_interval: Duration,

    /// Interval between subprocess liveness checks
    #[serde(deserialize_with = "crate::config::secs::deserialize")]
    pub subprocess_interval: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            thread_interval: Duration::from_secs(5),
            subprocess_interval: Duration::from_secs(5),
        }
    }
}

impl WatchdogConfig {
    /// Set the thread watchdog interval
    pub fn thread_interval(mut self, interval: Duration) -> Self {
        self.thread_interval = interval;
        self
    }

    /// Set the subprocess watchdog interval
    pub fn subprocess_interval(mut self, interval: Duration) -> Self {
        self.subprocess_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WatchdogConfig::default();
        assert_eq!(config.thread_interval, Duration::from_secs(5));
        assert_eq!(config.subprocess_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_fractional_seconds() {
        let config: WatchdogConfig =
            serde_json::from_str(r#"{ "thread_interval": 0.25 }"#).unwrap();
        assert_eq!(config.thread_interval, Duration::from_millis(250));
        assert_eq!(config.subprocess_interval, Duration::from_secs(5));
    }
}
