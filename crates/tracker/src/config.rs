use anyhow::{Context, bail};
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub use common::Environment;

pub const DEFAULT_MAX_DIMENSION: u32 = 416;
pub const DEFAULT_JPEG_QUALITY: f32 = 0.5;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1;
pub const DEFAULT_DISPLAY_FPS: u32 = 60;

/// Policy constants of the capture/analysis pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Longest side of the frame sent for analysis, in pixels.
    pub max_dimension: u32,
    /// Lossy encoding quality in (0, 1].
    pub quality: f32,
    /// Upper bound on concurrently outstanding analysis requests.
    pub max_in_flight: usize,
    /// Display refresh rate driving both loops.
    pub display_fps: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            quality: DEFAULT_JPEG_QUALITY,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            display_fps: DEFAULT_DISPLAY_FPS,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_dimension == 0 {
            bail!("MAX_DIMENSION must be at least 1");
        }
        if !(self.quality > 0.0 && self.quality <= 1.0) {
            bail!("JPEG_QUALITY must be in (0, 1], got {}", self.quality);
        }
        if self.max_in_flight == 0 {
            bail!("MAX_IN_FLIGHT must be at least 1");
        }
        if self.display_fps == 0 {
            bail!("DISPLAY_FPS must be at least 1");
        }
        Ok(())
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.display_fps.max(1)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureBackendKind {
    Synthetic,
    V4l2,
}

impl FromStr for CaptureBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "synthetic" | "test" => Ok(Self::Synthetic),
            "v4l2" | "camera" => Ok(Self::V4l2),
            other => Err(format!(
                "{} is not a supported capture backend. Use either `v4l2` or `synthetic`.",
                other
            )),
        }
    }
}

impl CaptureBackendKind {
    fn default_for_build() -> Self {
        if cfg!(feature = "v4l2") {
            Self::V4l2
        } else {
            Self::Synthetic
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub environment: Environment,
    pub otel_endpoint: Option<String>,
    pub analysis_url: String,
    pub analysis_timeout: Option<Duration>,
    pub pipeline: PipelineConfig,
    pub capture_backend: CaptureBackendKind,
    pub device_id: u32,
    pub viewer_addr: String,
    pub viewer_fps: u32,
    pub auto_start: bool,
}

impl TrackerConfig {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = Environment::from_env();

        let otel_endpoint = env::var("OTEL_ENDPOINT").ok().filter(|s| !s.is_empty());

        let analysis_url = env::var("ANALYSIS_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8080/process_frame".to_string());

        let analysis_timeout = env::var("ANALYSIS_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis);

        let pipeline = PipelineConfig {
            max_dimension: parse_or("MAX_DIMENSION", DEFAULT_MAX_DIMENSION),
            quality: parse_or("JPEG_QUALITY", DEFAULT_JPEG_QUALITY),
            max_in_flight: parse_or("MAX_IN_FLIGHT", DEFAULT_MAX_IN_FLIGHT),
            display_fps: parse_or("DISPLAY_FPS", DEFAULT_DISPLAY_FPS),
        };
        pipeline.validate()?;

        let capture_backend = match env::var("CAPTURE_BACKEND") {
            Ok(value) => value
                .parse()
                .map_err(anyhow::Error::msg)
                .context("invalid CAPTURE_BACKEND")?,
            Err(_) => CaptureBackendKind::default_for_build(),
        };

        let device_id = parse_or("DEVICE_ID", 0);

        let viewer_addr = env::var("VIEWER_ADDR").unwrap_or_else(|_| "0.0.0.0:8090".to_string());

        let viewer_fps = parse_or("VIEWER_FPS", 15u32).max(1);

        let auto_start = env::var("AUTO_START")
            .ok()
            .and_then(|s| parse_bool(&s))
            .unwrap_or(true);

        Ok(Self {
            environment,
            otel_endpoint,
            analysis_url,
            analysis_timeout,
            pipeline,
            capture_backend,
            device_id,
            viewer_addr,
            viewer_fps,
            auto_start,
        })
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
