//! ffmpeg-backed camera pipeline
//!
//! Each pipeline runs as a `camera-pipeline` unit. Its body spawns the
//! decoder, hands the child to the subprocess watchdog, and reads raw frames
//! from the decoder's stdout until it is stopped.
//!
//! When the decoder exits, the subprocess watchdog calls
//! [`ProcessOwner::on_process_exit`] and the pipeline either spawns a
//! replacement (whose stdout is passed to the reading thread over a channel)
//! or gives up. A decoder that dies before producing a single frame is
//! treated as misconfigured: the body returns and the thread watchdog
//! restarts the whole pipeline.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, ChildStdout, ExitStatus};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use super::error::SetupError;
use super::ffmpeg::{decoder_command, StreamInfo};
use super::PipelineContext;
use crate::bus::{topic, BusEvent, CameraStatus, FrameEvent};
use crate::config::CameraConfig;
use crate::registry::{Runnable, Stoppable};
use crate::watchdog::{ExitDecision, ProcessHandle, ProcessOwner};

/// Poll interval while waiting for a replacement decoder
const REPLACEMENT_POLL: Duration = Duration::from_millis(100);

/// Per-camera decode pipeline
pub struct FfmpegPipeline {
    camera: CameraConfig,
    info: StreamInfo,
    ffmpeg: PathBuf,
    context: PipelineContext,
    me: Weak<FfmpegPipeline>,
    /// Number of the current (or last) execution of the body
    execution: AtomicU64,
    /// Execution a stop was requested for
    stopped_execution: AtomicU64,
    /// Set by the recovery hook when it gives up on the decoder
    failed: AtomicBool,
    frames_since_spawn: AtomicU64,
    process: Mutex<Option<ProcessHandle>>,
    replacements: (Sender<ChildStdout>, Receiver<ChildStdout>),
}

impl FfmpegPipeline {
    /// Create a pipeline for a probed camera
    pub fn new(
        camera: CameraConfig,
        info: StreamInfo,
        ffmpeg: impl Into<PathBuf>,
        context: PipelineContext,
    ) -> Arc<Self> {
        let ffmpeg = ffmpeg.into();
        Arc::new_cyclic(|me| Self {
            camera,
            info,
            ffmpeg,
            context,
            me: me.clone(),
            execution: AtomicU64::new(0),
            stopped_execution: AtomicU64::new(0),
            failed: AtomicBool::new(false),
            frames_since_spawn: AtomicU64::new(0),
            process: Mutex::new(None),
            replacements: crossbeam_channel::unbounded(),
        })
    }

    /// Camera name
    pub fn name(&self) -> &str {
        &self.camera.name
    }

    /// Stream properties the pipeline decodes at
    pub fn stream_info(&self) -> StreamInfo {
        self.info
    }

    /// Whether the current execution has been asked to stop
    fn is_stopping(&self) -> bool {
        let execution = self.execution.load(Ordering::SeqCst);
        execution != 0 && self.stopped_execution.load(Ordering::SeqCst) == execution
    }

    fn spawn_decoder(&self) -> Result<Child, SetupError> {
        let child = decoder_command(&self.ffmpeg, &self.camera, &self.info)
            .spawn()
            .map_err(|source| SetupError::Spawn {
                camera: self.camera.name.clone(),
                program: self.ffmpeg.display().to_string(),
                source,
            })?;
        self.frames_since_spawn.store(0, Ordering::SeqCst);

        tracing::debug!(camera = %self.camera.name, pid = child.id(), "Decoder spawned");
        Ok(child)
    }

    fn publish_status(&self, status: CameraStatus) {
        self.context.bus.publish(
            &topic::camera_status(&self.camera.name),
            BusEvent::Status {
                camera: self.camera.name.clone(),
                status,
            },
        );
    }

    /// Wait for the recovery hook to hand over a replacement decoder
    fn await_replacement(&self) -> Option<ChildStdout> {
        let deadline = Instant::now() + self.camera.frame_timeout;
        loop {
            if self.is_stopping() || self.failed.load(Ordering::SeqCst) {
                return None;
            }
            match self.replacements.1.recv_timeout(REPLACEMENT_POLL) {
                Ok(stdout) => return Some(stdout),
                Err(RecvTimeoutError::Timeout) if Instant::now() < deadline => {}
                Err(_) => {
                    tracing::error!(
                        camera = %self.camera.name,
                        timeout_s = self.camera.frame_timeout.as_secs_f64(),
                        "No replacement decoder in time"
                    );
                    return None;
                }
            }
        }
    }

    fn read_frames(&self, mut stdout: ChildStdout) {
        let mut buffer = vec![0u8; self.info.frame_size()];
        let mut sequence = 0u64;
        let mut last_detection: Option<Instant> = None;
        let frame_topic = topic::camera_frame(&self.camera.name);
        let detections_topic = topic::camera_detections(&self.camera.name);

        loop {
            if self.is_stopping() {
                return;
            }

            if stdout.read_exact(&mut buffer).is_err() {
                if self.is_stopping() {
                    return;
                }
                tracing::warn!(camera = %self.camera.name, "Decoder output ended");
                self.publish_status(CameraStatus::Reconnecting);
                match self.await_replacement() {
                    Some(next) => {
                        stdout = next;
                        continue;
                    }
                    None => return,
                }
            }

            if self.frames_since_spawn.fetch_add(1, Ordering::SeqCst) == 0 {
                self.publish_status(CameraStatus::Online);
            }
            sequence += 1;

            let frame = FrameEvent {
                camera: self.camera.name.clone(),
                sequence,
                captured_at: Utc::now(),
                width: self.info.width,
                height: self.info.height,
                data: Bytes::copy_from_slice(&buffer),
            };

            let detect = self.context.object_detection.enabled
                && last_detection
                    .map_or(true, |at| at.elapsed() >= self.context.object_detection.interval);
            if detect {
                last_detection = Some(Instant::now());
                self.detect(&frame, &detections_topic);
            }

            self.context
                .bus
                .publish(&frame_topic, BusEvent::Frame(frame));
        }
    }

    fn detect(&self, frame: &FrameEvent, detections_topic: &str) {
        let labels = &self.context.object_detection.labels;
        let detections: Vec<_> = self
            .context
            .detector
            .detect(frame)
            .into_iter()
            .filter(|d| labels.is_empty() || labels.contains(&d.label))
            .collect();

        if detections.is_empty() {
            return;
        }

        for post_processor in self.context.post_processors.iter() {
            post_processor.process(&self.camera.name, &detections);
        }

        self.context.bus.publish(
            detections_topic,
            BusEvent::Detections {
                camera: self.camera.name.clone(),
                sequence: frame.sequence,
                detections,
            },
        );
    }

    fn release_process(&self) {
        if let Some(handle) = self.process.lock().take() {
            self.context.subprocess_watchdog.release(&handle);
            if let Err(e) = handle.kill() {
                tracing::warn!(camera = %self.camera.name, error = %e, "Failed to kill decoder");
            }
        }
    }
}

impl Runnable for FfmpegPipeline {
    fn run(&self) {
        // A stop aimed at an earlier execution does not carry over
        self.execution.fetch_add(1, Ordering::SeqCst);
        self.failed.store(false, Ordering::SeqCst);
        while self.replacements.1.try_recv().is_ok() {}

        let mut child = match self.spawn_decoder() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(camera = %self.camera.name, error = %e, "Failed to start decoder");
                return;
            }
        };
        let Some(stdout) = child.stdout.take() else {
            tracing::error!(camera = %self.camera.name, "Decoder has no stdout");
            let _ = child.kill();
            let _ = child.wait();
            return;
        };

        let owner: Weak<dyn ProcessOwner> = self.me.clone();
        let handle = self
            .context
            .subprocess_watchdog
            .supervise(self.camera.name.clone(), child, owner);
        *self.process.lock() = Some(handle);

        tracing::info!(
            camera = %self.camera.name,
            width = self.info.width,
            height = self.info.height,
            fps = self.info.fps,
            "Camera pipeline running"
        );

        self.read_frames(stdout);

        self.release_process();
        self.publish_status(CameraStatus::Offline);
    }
}

impl Stoppable for FfmpegPipeline {
    fn stop(&self) {
        self.stopped_execution
            .store(self.execution.load(Ordering::SeqCst), Ordering::SeqCst);

        // Killing the decoder unblocks the reading thread
        if let Some(handle) = self.process.lock().as_ref() {
            if let Err(e) = handle.kill() {
                tracing::warn!(camera = %self.camera.name, error = %e, "Failed to kill decoder");
            }
        }
    }
}

impl ProcessOwner for FfmpegPipeline {
    fn on_process_exit(&self, name: &str, status: ExitStatus) -> ExitDecision {
        if self.is_stopping() {
            return ExitDecision::Release;
        }

        if self.frames_since_spawn.load(Ordering::SeqCst) == 0 {
            tracing::error!(
                camera = %name,
                %status,
                "Decoder exited before producing a frame, restarting pipeline"
            );
            self.failed.store(true, Ordering::SeqCst);
            return ExitDecision::Release;
        }

        // The reading thread already let go of this decoder
        if self.process.lock().is_none() {
            return ExitDecision::Release;
        }

        match self.spawn_decoder() {
            Ok(mut child) => {
                let handed_over = child
                    .stdout
                    .take()
                    .map(|stdout| self.replacements.0.send(stdout).is_ok());
                if handed_over == Some(true) {
                    return ExitDecision::Replace(child);
                }
                tracing::error!(camera = %name, "Replacement decoder has no usable stdout");
                let _ = child.kill();
                let _ = child.wait();
                self.failed.store(true, Ordering::SeqCst);
                ExitDecision::Release
            }
            Err(e) => {
                tracing::error!(camera = %name, error = %e, "Failed to respawn decoder");
                self.failed.store(true, Ordering::SeqCst);
                ExitDecision::Release
            }
        }
    }
}
