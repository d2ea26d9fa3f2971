//! Detection capabilities
//!
//! Built-in detectors and post-processors. Real object detection backends
//! plug in through [`Detector`]; the crate ships a frame-difference motion
//! detector and a detector that never reports anything.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use super::error::SetupError;
use crate::bus::FrameEvent;

/// A detected object, with a box relative to the frame size (0.0 to 1.0)
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// Detection capability shared by every camera pipeline
pub trait Detector: Send + Sync {
    /// Detector name used in logs
    fn name(&self) -> &str;

    /// Run detection on a frame
    fn detect(&self, frame: &FrameEvent) -> Vec<Detection>;
}

/// Consumer of detection results
pub trait PostProcessor: Send + Sync {
    /// Post-processor type name
    fn kind(&self) -> &str;

    /// Handle the detections of one frame
    fn process(&self, camera: &str, detections: &[Detection]);
}

/// Detector that never detects anything
#[derive(Debug, Default)]
pub struct NullDetector;

impl Detector for NullDetector {
    fn name(&self) -> &str {
        "null"
    }

    fn detect(&self, _frame: &FrameEvent) -> Vec<Detection> {
        Vec::new()
    }
}

/// Frame-difference motion detector
///
/// Compares every `stride`-th byte of a frame with the previous frame of the
/// same camera and reports a full-frame `motion` detection when the share of
/// changed samples exceeds `threshold`.
pub struct MotionDetector {
    threshold: f32,
    stride: usize,
    previous: Mutex<HashMap<String, Bytes>>,
}

impl MotionDetector {
    /// Create a detector reporting motion above `threshold` (0.0 to 1.0)
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            stride: 16,
            previous: Mutex::new(HashMap::new()),
        }
    }

    fn changed_share(previous: &[u8], current: &[u8], stride: usize) -> f32 {
        let mut samples = 0u32;
        let mut changed = 0u32;
        for (a, b) in previous.iter().zip(current).step_by(stride) {
            samples += 1;
            if a.abs_diff(*b) > 25 {
                changed += 1;
            }
        }
        if samples == 0 {
            0.0
        } else {
            changed as f32 / samples as f32
        }
    }
}

impl Detector for MotionDetector {
    fn name(&self) -> &str {
        "motion"
    }

    fn detect(&self, frame: &FrameEvent) -> Vec<Detection> {
        let previous = self
            .previous
            .lock()
            .insert(frame.camera.clone(), frame.data.clone());

        let Some(previous) = previous else {
            return Vec::new();
        };
        if previous.len() != frame.data.len() {
            return Vec::new();
        }

        let share = Self::changed_share(&previous, &frame.data, self.stride);
        if share < self.threshold {
            return Vec::new();
        }

        vec![Detection {
            label: "motion".into(),
            confidence: share,
            x1: 0.0,
            y1: 0.0,
            x2: 1.0,
            y2: 1.0,
        }]
    }
}

/// Post-processor writing detections to the log
#[derive(Debug, Default)]
pub struct LogPostProcessor {
    labels: Vec<String>,
}

impl LogPostProcessor {
    /// Build from settings: `{ "labels": ["person", ...] }` (optional)
    pub fn from_settings(settings: &serde_json::Value) -> Result<Self, SetupError> {
        let labels = match settings.get("labels") {
            None | Some(serde_json::Value::Null) => Vec::new(),
            Some(labels) => serde_json::from_value(labels.clone()).map_err(|e| {
                SetupError::PostProcessor {
                    kind: "log".into(),
                    reason: e.to_string(),
                }
            })?,
        };
        Ok(Self { labels })
    }
}

impl PostProcessor for LogPostProcessor {
    fn kind(&self) -> &str {
        "log"
    }

    fn process(&self, camera: &str, detections: &[Detection]) {
        for detection in detections {
            if !self.labels.is_empty() && !self.labels.contains(&detection.label) {
                continue;
            }
            tracing::info!(
                camera = %camera,
                label = %detection.label,
                confidence = detection.confidence,
                "Object detected"
            );
        }
    }
}

/// Build one of the built-in post-processors by type name
pub fn builtin_post_processor(
    kind: &str,
    settings: &serde_json::Value,
) -> Result<Arc<dyn PostProcessor>, SetupError> {
    match kind {
        "log" => Ok(Arc::new(LogPostProcessor::from_settings(settings)?)),
        other => Err(SetupError::PostProcessor {
            kind: other.to_owned(),
            reason: "unknown post processor type".into(),
        }),
    }
}
