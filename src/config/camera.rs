//! Camera configuration

use std::time::Duration;

use serde::Deserialize;

/// Stream protocol of a camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    #[default]
    Rtsp,
    Rtmp,
    Http,
}

impl StreamFormat {
    /// URL scheme for the format
    pub fn scheme(&self) -> &'static str {
        match self {
            StreamFormat::Rtsp => "rtsp",
            StreamFormat::Rtmp => "rtmp",
            StreamFormat::Http => "http",
        }
    }
}

/// Settings for one camera
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CameraConfig {
    /// Unique camera name; also the pipeline unit's name
    pub name: String,

    #[serde(default)]
    pub stream_format: StreamFormat,

    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub path: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Frame width; probed when absent
    #[serde(default)]
    pub width: Option<u32>,

    /// Frame height; probed when absent
    #[serde(default)]
    pub height: Option<u32>,

    /// Frame rate; probed when absent
    #[serde(default)]
    pub fps: Option<u32>,

    /// Arguments placed before every other decoder argument
    #[serde(default = "default_global_args")]
    pub global_args: Vec<String>,

    /// Arguments placed right before the input
    #[serde(default)]
    pub input_args: Vec<String>,

    /// Hardware acceleration arguments
    #[serde(default)]
    pub hwaccel_args: Vec<String>,

    /// Input codec override
    #[serde(default)]
    pub codec: Option<String>,

    /// Video filters applied before frames are emitted
    #[serde(default)]
    pub filter_args: Vec<String>,

    /// How long a pipeline waits for a replacement decoder
    #[serde(
        default = "default_frame_timeout",
        deserialize_with = "crate::config::secs::deserialize"
    )]
    pub frame_timeout: Duration,
}

fn default_port() -> u16 {
    554
}

fn default_global_args() -> Vec<String> {
    vec!["-hide_banner".into(), "-loglevel".into(), "error".into()]
}

fn default_frame_timeout() -> Duration {
    Duration::from_secs(60)
}

impl CameraConfig {
    /// Create a camera config with defaults for everything but name and host
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stream_format: StreamFormat::default(),
            host: host.into(),
            port: default_port(),
            path: String::new(),
            username: None,
            password: None,
            width: None,
            height: None,
            fps: None,
            global_args: default_global_args(),
            input_args: Vec::new(),
            hwaccel_args: Vec::new(),
            codec: None,
            filter_args: Vec::new(),
            frame_timeout: default_frame_timeout(),
        }
    }

    /// Set a fixed resolution and frame rate, which skips probing
    pub fn resolution(mut self, width: u32, height: u32, fps: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self.fps = Some(fps);
        self
    }

    /// Stream URL including credentials
    pub fn url(&self) -> String {
        let credentials = match (&self.username, &self.password) {
            (Some(user), Some(password)) => format!("{user}:{password}@"),
            (Some(user), None) => format!("{user}@"),
            _ => String::new(),
        };
        format!(
            "{}://{}{}:{}{}",
            self.stream_format.scheme(),
            credentials,
            self.host,
            self.port,
            self.path
        )
    }

    /// Stream URL safe for logs
    pub fn redacted_url(&self) -> String {
        let user = self
            .username
            .as_deref()
            .map(|user| format!("{user}:***@"))
            .unwrap_or_default();
        format!(
            "{}://{}{}:{}{}",
            self.stream_format.scheme(),
            user,
            self.host,
            self.port,
            self.path
        )
    }
}
