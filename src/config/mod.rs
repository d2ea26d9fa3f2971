//! NVR configuration
//!
//! The whole configuration is one JSON document. Every section has a
//! `Default`, so a file only needs the cameras and whatever it overrides.
//!
//! ```json
//! {
//!   "logging": { "level": "debug" },
//!   "watchdog": { "thread_interval": 5, "subprocess_interval": 2.5 },
//!   "recorder": { "folder": "/recordings", "retain": 7 },
//!   "database": { "type": "sqlite", "path": "/config/nvr.db" },
//!   "post_processors": { "log": { "labels": ["person"] } },
//!   "cameras": [
//!     { "name": "front_door", "host": "192.168.1.20", "path": "/stream" }
//!   ]
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::bus::BusConfig;
use crate::db::DatabaseConfig;
use crate::janitor::RecorderConfig;
use crate::watchdog::WatchdogConfig;

pub mod camera;

pub use camera::{CameraConfig, StreamFormat};

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        /// Path that was read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid configuration JSON
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    /// The configuration is well-formed but not usable
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

/// Shutdown settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long to wait for each unit to return after a stop request
    #[serde(deserialize_with = "secs::deserialize")]
    pub join_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(10),
        }
    }
}

/// Object detection settings shared by all cameras
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ObjectDetectionConfig {
    pub enabled: bool,

    /// Minimum time between two detector runs on the same camera
    #[serde(deserialize_with = "secs::deserialize")]
    pub interval: Duration,

    /// Labels to report; empty reports every label
    pub labels: Vec<String>,
}

impl Default for ObjectDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(1),
            labels: vec!["person".into()],
        }
    }
}

/// Message broker settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessagingConfig {
    pub broker: String,

    #[serde(default = "default_broker_port")]
    pub port: u16,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_client_id")]
    pub topic_prefix: String,
}

fn default_broker_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "nvr".into()
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NvrConfig {
    pub logging: LoggingConfig,
    pub watchdog: WatchdogConfig,
    pub bus: BusConfig,
    pub recorder: RecorderConfig,
    pub database: DatabaseConfig,
    pub shutdown: ShutdownConfig,
    pub object_detection: ObjectDetectionConfig,
    /// Post-processor type name to its free-form settings
    pub post_processors: BTreeMap<String, serde_json::Value>,
    /// Broker connection; messaging is disabled when absent
    pub messaging: Option<MessagingConfig>,
    pub cameras: Vec<CameraConfig>,
}

impl NvrConfig {
    /// Read, parse and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        let config = Self::from_json(&text)?;

        tracing::debug!(
            path = %path.display(),
            cameras = config.cameras.len(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Parse and validate a configuration document
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: NvrConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watchdog.thread_interval.is_zero() || self.watchdog.subprocess_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "watchdog intervals must be greater than zero".into(),
            ));
        }
        if self.bus.subscriber_capacity == 0 {
            return Err(ConfigError::Invalid(
                "bus subscriber capacity must be greater than zero".into(),
            ));
        }

        let mut names = HashSet::new();
        for camera in &self.cameras {
            if camera.name.trim().is_empty() {
                return Err(ConfigError::Invalid("camera name must not be empty".into()));
            }
            if !names.insert(camera.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate camera name: {}",
                    camera.name
                )));
            }
        }

        Ok(())
    }

    /// Add a camera
    pub fn camera(mut self, camera: CameraConfig) -> Self {
        self.cameras.push(camera);
        self
    }
}

/// Durations written as (fractional) seconds
pub(crate) mod secs {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};

    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|_| D::Error::custom(format!("invalid duration: {secs} seconds")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::OverflowPolicy;

    #[test]
    fn test_minimal_config() {
        let config = NvrConfig::from_json(r#"{ "cameras": [{ "name": "a", "host": "h" }] }"#)
            .unwrap();

        assert_eq!(config.cameras.len(), 1);
        assert_eq!(config.watchdog, WatchdogConfig::default());
        assert_eq!(config.shutdown.join_timeout, Duration::from_secs(10));
        assert_eq!(config.recorder.cleanup_interval, Duration::from_secs(3600));
        assert!(config.messaging.is_none());
        assert_eq!(config.database, DatabaseConfig::default());
    }

    #[test]
    fn test_full_config() {
        let config = NvrConfig::from_json(
            r#"{
                "logging": { "level": "debug" },
                "watchdog": { "thread_interval": 1, "subprocess_interval": 0.5 },
                "bus": { "subscriber_capacity": 4, "overflow": "drop_newest" },
                "recorder": { "folder": "/tmp/rec", "retain": 3, "cleanup_interval": 600 },
                "database": { "type": "memory" },
                "shutdown": { "join_timeout": 2.5 },
                "object_detection": { "enabled": false },
                "post_processors": { "log": { "labels": ["car"] } },
                "messaging": { "broker": "mqtt.local" },
                "cameras": []
            }"#,
        )
        .unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.watchdog.subprocess_interval, Duration::from_millis(500));
        assert_eq!(config.bus.overflow, OverflowPolicy::DropNewest);
        assert_eq!(config.recorder.retain, 3);
        assert_eq!(config.database, DatabaseConfig::Memory);
        assert_eq!(config.shutdown.join_timeout, Duration::from_millis(2500));
        assert!(!config.object_detection.enabled);
        assert!(config.post_processors.contains_key("log"));
        assert_eq!(config.messaging.unwrap().port, 1883);
    }

    #[test]
    fn test_rejects_duplicate_camera_names() {
        let result = NvrConfig::from_json(
            r#"{ "cameras": [{ "name": "a", "host": "h" }, { "name": "a", "host": "g" }] }"#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("duplicate")));
    }

    #[test]
    fn test_rejects_empty_name_and_zero_values() {
        assert!(matches!(
            NvrConfig::from_json(r#"{ "cameras": [{ "name": " ", "host": "h" }] }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            NvrConfig::from_json(r#"{ "watchdog": { "thread_interval": 0 } }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            NvrConfig::from_json(r#"{ "bus": { "subscriber_capacity": 0 } }"#),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_negative_duration() {
        assert!(matches!(
            NvrConfig::from_json(r#"{ "shutdown": { "join_timeout": -1 } }"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "cameras": [{ "name": "a", "host": "h" }] }"#).unwrap();

        assert_eq!(NvrConfig::load(&path).unwrap().cameras[0].name, "a");
        assert!(matches!(
            NvrConfig::load(dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));
    }
}
