//! Persisted record types

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::config::CameraConfig;

/// A configured camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Camera {
    /// Row id, assigned on insert
    pub id: Option<i64>,
    /// Unique camera name
    pub name: String,
    /// Stream format (`rtsp`, `rtmp`, `http`)
    pub stream_format: String,
    /// Stream host
    pub host: String,
    /// Stream port
    pub port: u16,
    /// Stream path
    pub path: String,
    /// Frame width, if known
    pub width: Option<u32>,
    /// Frame height, if known
    pub height: Option<u32>,
    /// Frame rate, if known
    pub fps: Option<u32>,
}

impl Camera {
    /// Camera row for a configured camera, not yet inserted
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            id: None,
            name: config.name.clone(),
            stream_format: config.stream_format.scheme().to_owned(),
            host: config.host.clone(),
            port: config.port,
            path: config.path.clone(),
            width: config.width,
            height: config.height,
            fps: config.fps,
        }
    }
}

/// A stored recording artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recording {
    /// Row id, assigned on insert
    pub id: Option<i64>,
    /// Camera the recording belongs to
    pub camera_id: i64,
    /// When the recording started
    pub start: DateTime<Utc>,
    /// Location of the artifact on disk
    pub path: PathBuf,
}

/// A motion event inside a recording
///
/// Offsets are relative to the recording start, formatted `HH:MM:SS.ffff`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionEvent {
    /// Row id, assigned on insert
    pub id: Option<i64>,
    /// Recording the event belongs to
    pub recording_id: i64,
    /// Offset of the event start
    pub timestamp_start: String,
    /// Offset of the event end
    pub timestamp_end: String,
}

/// Start and end of one motion segment, in wall clock time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Format an offset as `HH:MM:SS.ffff` (ten-thousandths of a second)
///
/// Negative offsets are clamped to zero.
pub fn format_offset(offset: chrono::Duration) -> String {
    let micros = offset.num_microseconds().unwrap_or(i64::MAX).max(0);
    let total_secs = micros / 1_000_000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    let fraction = (micros % 1_000_000) / 100;

    format!("{hours:02}:{minutes:02}:{seconds:02}.{fraction:04}")
}
