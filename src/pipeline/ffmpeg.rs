//! ffmpeg and ffprobe command handling

use std::path::Path;
use std::process::{Command, Stdio};

use serde::Deserialize;

use super::error::SetupError;
use crate::config::{CameraConfig, StreamFormat};

/// Decoded stream properties
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl StreamInfo {
    /// Size of one RGB24 frame in bytes
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    avg_frame_rate: Option<String>,
    #[serde(default)]
    r_frame_rate: Option<String>,
}

/// Parse an ffprobe rate such as `30000/1001` into whole frames per second
fn parse_rate(rate: &str) -> Option<u32> {
    let (num, den) = match rate.split_once('/') {
        Some((num, den)) => (num.trim().parse::<f64>().ok()?, den.trim().parse::<f64>().ok()?),
        None => (rate.trim().parse::<f64>().ok()?, 1.0),
    };
    if den == 0.0 || num <= 0.0 {
        return None;
    }
    Some((num / den).round() as u32)
}

/// Parse `ffprobe -print_format json -show_streams` output
pub fn parse_probe_output(output: &[u8]) -> Result<StreamInfo, String> {
    let output: ProbeOutput = serde_json::from_slice(output).map_err(|e| e.to_string())?;

    let stream = output
        .streams
        .into_iter()
        .find(|stream| stream.codec_type.as_deref().unwrap_or("video") == "video")
        .ok_or_else(|| "no video stream found".to_owned())?;

    let width = stream.width.ok_or("stream has no width")?;
    let height = stream.height.ok_or("stream has no height")?;
    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
        .ok_or("stream has no frame rate")?;

    Ok(StreamInfo { width, height, fps })
}

/// Determine the stream properties of a camera
///
/// Configured width, height and fps take precedence; ffprobe only runs when
/// at least one of them is missing.
pub fn probe(ffprobe: &Path, camera: &CameraConfig) -> Result<StreamInfo, SetupError> {
    if let (Some(width), Some(height), Some(fps)) = (camera.width, camera.height, camera.fps) {
        return Ok(StreamInfo { width, height, fps });
    }

    tracing::debug!(camera = %camera.name, url = %camera.redacted_url(), "Probing stream");

    let mut command = Command::new(ffprobe);
    command
        .args(["-hide_banner", "-loglevel", "error"])
        .args(["-print_format", "json", "-show_streams", "-select_streams", "v:0"]);
    if camera.stream_format == StreamFormat::Rtsp {
        command.args(["-rtsp_transport", "tcp"]);
    }
    let output = command
        .arg(camera.url())
        .stdin(Stdio::null())
        .output()
        .map_err(|source| SetupError::Spawn {
            camera: camera.name.clone(),
            program: ffprobe.display().to_string(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SetupError::Probe {
            camera: camera.name.clone(),
            reason: format!("ffprobe exited with {}: {}", output.status, stderr.trim()),
        });
    }

    let probed = parse_probe_output(&output.stdout).map_err(|reason| SetupError::Probe {
        camera: camera.name.clone(),
        reason,
    })?;

    Ok(StreamInfo {
        width: camera.width.unwrap_or(probed.width),
        height: camera.height.unwrap_or(probed.height),
        fps: camera.fps.unwrap_or(probed.fps),
    })
}

/// Build the decoder command emitting raw RGB24 frames on stdout
pub fn decoder_command(ffmpeg: &Path, camera: &CameraConfig, info: &StreamInfo) -> Command {
    let mut command = Command::new(ffmpeg);
    command
        .args(&camera.global_args)
        .args(&camera.hwaccel_args)
        .args(&camera.input_args);

    if camera.stream_format == StreamFormat::Rtsp {
        command.args(["-rtsp_transport", "tcp"]);
    }
    if let Some(codec) = &camera.codec {
        command.arg("-c:v").arg(codec);
    }

    command.arg("-i").arg(camera.url());

    let mut filters = camera.filter_args.clone();
    filters.push(format!("fps={}", info.fps));
    filters.push(format!("scale={}:{}", info.width, info.height));
    command
        .arg("-vf")
        .arg(filters.join(","))
        .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"]);

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());

    command
}
