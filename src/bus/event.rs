//! Events published by camera pipelines

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::pipeline::Detection;

/// A decoded video frame
#[derive(Debug, Clone)]
pub struct FrameEvent {
    /// Camera the frame came from
    pub camera: String,
    /// Frame number since the decoder was (re)started
    pub sequence: u64,
    /// Wall clock time the frame was read
    pub captured_at: DateTime<Utc>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Packed RGB24 pixels (zero-copy shared between subscribers)
    pub data: Bytes,
}

/// Camera status transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraStatus {
    /// Decoder is producing frames
    Online,
    /// Decoder exited; a replacement is being spawned
    Reconnecting,
    /// Pipeline stopped
    Offline,
}

/// Event carried on the bus
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// Decoded frame
    Frame(FrameEvent),
    /// Detections for a frame
    Detections {
        /// Camera name
        camera: String,
        /// Frame the detections belong to
        sequence: u64,
        /// Detected objects
        detections: Vec<Detection>,
    },
    /// Camera status change
    Status {
        /// Camera name
        camera: String,
        /// New status
        status: CameraStatus,
    },
}

impl BusEvent {
    /// Camera the event refers to
    pub fn camera(&self) -> &str {
        match self {
            BusEvent::Frame(frame) => &frame.camera,
            BusEvent::Detections { camera, .. } | BusEvent::Status { camera, .. } => camera,
        }
    }
}
