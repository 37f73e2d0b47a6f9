use std::path::PathBuf;
use std::time::Duration;

use garde::Validate;
use serde::Deserialize;

/// What the pipeline does when inference fails for a single frame.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FrameFailurePolicy {
    /// Log, count the frame as failed and keep going.
    #[default]
    Skip,
    /// Fail the whole job.
    Abort,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8000")
    #[serde(default = "default_bind_addr")]
    #[garde(length(min = 1))]
    pub bind_addr: String,

    /// Frontend origin allowed by CORS
    #[serde(default = "default_cors_origin")]
    #[garde(length(min = 1))]
    pub cors_origin: String,

    /// Largest accepted request body in bytes
    #[serde(default = "default_max_upload_bytes")]
    #[garde(range(min = 1))]
    pub max_upload_bytes: usize,

    /// Base URL of the hosted inference API
    #[serde(default = "default_inference_api_url")]
    #[garde(length(min = 1))]
    pub inference_api_url: String,

    /// Hosted inference API key
    #[garde(length(min = 1))]
    pub inference_api_key: String,

    /// Model identifier, e.g. "project/3"
    #[garde(length(min = 1))]
    pub inference_model_id: String,

    /// Per-request timeout; unset means requests may wait indefinitely.
    #[serde(default)]
    #[garde(skip)]
    pub inference_timeout_secs: Option<u64>,

    /// Frames scored concurrently. Stay at 1 unless the API quota allows more.
    #[serde(default = "default_inference_concurrency")]
    #[garde(range(min = 1, max = 64))]
    pub inference_concurrency: usize,

    #[serde(default = "default_confidence_threshold")]
    #[garde(range(min = 0.0, max = 1.0))]
    pub confidence_threshold: f64,

    /// Upper bound on frames sampled per video
    #[serde(default = "default_frame_budget")]
    #[garde(range(min = 1))]
    pub frame_budget: u64,

    #[serde(default)]
    #[garde(skip)]
    pub frame_failure_policy: FrameFailurePolicy,

    /// How long a finished job stays readable
    #[serde(default = "default_grace_period_secs")]
    #[garde(skip)]
    pub grace_period_secs: u64,

    /// Progress stream poll interval
    #[serde(default = "default_poll_interval_ms")]
    #[garde(range(min = 10))]
    pub poll_interval_ms: u64,

    #[serde(default = "default_sweep_interval_secs")]
    #[garde(range(min = 1))]
    pub sweep_interval_secs: u64,

    /// Parent directory for uploads and extracted frames
    #[serde(default)]
    #[garde(skip)]
    pub scratch_dir: Option<PathBuf>,

    #[serde(default = "default_ffmpeg_bin")]
    #[garde(length(min = 1))]
    pub ffmpeg_bin: String,

    #[serde(default = "default_ffprobe_bin")]
    #[garde(length(min = 1))]
    pub ffprobe_bin: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

fn default_max_upload_bytes() -> usize {
    512 * 1024 * 1024
}

fn default_inference_api_url() -> String {
    "https://detect.roboflow.com".to_string()
}

fn default_inference_concurrency() -> usize {
    1
}

fn default_confidence_threshold() -> f64 {
    0.5
}

fn default_frame_budget() -> u64 {
    300
}

fn default_grace_period_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_ffmpeg_bin() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_bin() -> String {
    "ffprobe".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn inference_timeout(&self) -> Option<Duration> {
        self.inference_timeout_secs.map(Duration::from_secs)
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] garde::Report),
}
