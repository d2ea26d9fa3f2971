//! Camera pipelines and their capabilities
//!
//! A pipeline turns one camera's stream into frames and detections on the
//! event bus. How pipelines, detectors and post-processors are built is left
//! to a [`CapabilityProvider`]; the orchestrator only sequences the calls
//! and registers the results as units.

use std::path::PathBuf;
use std::sync::Arc;

use crate::bus::{BusEvent, EventBus};
use crate::config::{CameraConfig, ObjectDetectionConfig};
use crate::registry::Stoppable;
use crate::watchdog::SubprocessWatchDog;

pub mod camera;
pub mod detect;
pub mod error;
pub mod ffmpeg;

pub use camera::FfmpegPipeline;
pub use detect::{
    builtin_post_processor, Detection, Detector, LogPostProcessor, MotionDetector, NullDetector,
    PostProcessor,
};
pub use error::SetupError;
pub use ffmpeg::StreamInfo;

/// Share of changed samples the built-in motion detector reports on
const MOTION_THRESHOLD: f32 = 0.05;

/// Everything a pipeline needs from the rest of the system
#[derive(Clone)]
pub struct PipelineContext {
    pub bus: EventBus<BusEvent>,
    pub subprocess_watchdog: Arc<SubprocessWatchDog>,
    pub detector: Arc<dyn Detector>,
    pub post_processors: Arc<Vec<Arc<dyn PostProcessor>>>,
    pub object_detection: ObjectDetectionConfig,
}

/// Factory for detectors, post-processors and camera pipelines
pub trait CapabilityProvider: Send + Sync {
    /// Build the detector shared by all cameras
    fn detector(&self, config: &ObjectDetectionConfig) -> Result<Arc<dyn Detector>, SetupError>;

    /// Build a post-processor from its type name and settings
    fn post_processor(
        &self,
        kind: &str,
        settings: &serde_json::Value,
    ) -> Result<Arc<dyn PostProcessor>, SetupError> {
        builtin_post_processor(kind, settings)
    }

    /// Build the pipeline body for one camera
    ///
    /// Called concurrently for different cameras.
    fn build_pipeline(
        &self,
        camera: &CameraConfig,
        context: &PipelineContext,
    ) -> Result<Arc<dyn Stoppable>, SetupError>;
}

/// Capabilities backed by the ffmpeg and ffprobe executables
#[derive(Debug, Clone)]
pub struct FfmpegCapabilities {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for FfmpegCapabilities {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl FfmpegCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific ffmpeg executable
    pub fn ffmpeg(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg = path.into();
        self
    }

    /// Use a specific ffprobe executable
    pub fn ffprobe(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffprobe = path.into();
        self
    }
}

impl CapabilityProvider for FfmpegCapabilities {
    fn detector(&self, config: &ObjectDetectionConfig) -> Result<Arc<dyn Detector>, SetupError> {
        if config.enabled {
            Ok(Arc::new(MotionDetector::new(MOTION_THRESHOLD)))
        } else {
            Ok(Arc::new(NullDetector))
        }
    }

    fn build_pipeline(
        &self,
        camera: &CameraConfig,
        context: &PipelineContext,
    ) -> Result<Arc<dyn Stoppable>, SetupError> {
        let info = ffmpeg::probe(&self.ffprobe, camera)?;
        let pipeline: Arc<dyn Stoppable> =
            FfmpegPipeline::new(camera.clone(), info, &self.ffmpeg, context.clone());
        Ok(pipeline)
    }
}
