//! Frame sampling on top of the `ffprobe` / `ffmpeg` binaries.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;

use crate::models::video::VideoMetadata;

/// File extension of materialized frames.
pub const FRAME_EXTENSION: &str = "jpg";

/// Which frames of a video get materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingPlan {
    pub stride: u64,
    pub budget: u64,
}

impl SamplingPlan {
    /// `stride = max(1, total / budget)`; unknown or zero totals sample every frame.
    pub fn new(total_frames: Option<u64>, budget: u64) -> Self {
        let budget = budget.max(1);
        let stride = match total_frames {
            Some(total) if total > 0 => (total / budget).max(1),
            _ => 1,
        };
        Self { stride, budget }
    }

    /// Source frame indices this plan selects from a video of `total_frames`.
    pub fn indices(&self, total_frames: u64) -> impl Iterator<Item = u64> {
        (0..total_frames)
            .step_by(self.stride as usize)
            .take(self.budget as usize)
    }
}

/// Output path for the `index`-th sampled frame.
pub fn frame_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("frame_{index:06}.{FRAME_EXTENSION}"))
}

/// Video decoding capability used by the pipeline.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    async fn probe(&self, video: &Path) -> Result<VideoMetadata, SamplerError>;

    /// Write the frames selected by `plan` into `out_dir`, in order, and return
    /// their paths. The running count of written frames is sent on `progress`.
    async fn extract(
        &self,
        video: &Path,
        out_dir: &Path,
        plan: SamplingPlan,
        progress: UnboundedSender<u64>,
    ) -> Result<Vec<PathBuf>, SamplerError>;

    async fn health_check(&self) -> Result<(), SamplerError>;
}

/// [`FrameExtractor`] that shells out to `ffprobe` and `ffmpeg`.
pub struct FfmpegExtractor {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegExtractor {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }
}

#[async_trait]
impl FrameExtractor for FfmpegExtractor {
    async fn probe(&self, video: &Path) -> Result<VideoMetadata, SamplerError> {
        if !video.exists() {
            return Err(SamplerError::VideoNotFound(video.display().to_string()));
        }

        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
                "-select_streams",
                "v:0",
            ])
            .arg(video)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(SamplerError::Spawn)?;

        if !output.status.success() {
            return Err(SamplerError::ExecutionFailed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        let probe: ProbeOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| SamplerError::Parse(e.to_string()))?;
        let file_size = tokio::fs::metadata(video).await?.len();
        probe.into_metadata(file_size)
    }

    async fn extract(
        &self,
        video: &Path,
        out_dir: &Path,
        plan: SamplingPlan,
        progress: UnboundedSender<u64>,
    ) -> Result<Vec<PathBuf>, SamplerError> {
        let pattern = out_dir.join(format!("frame_%06d.{FRAME_EXTENSION}"));

        let mut child = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-nostats", "-loglevel", "error", "-y", "-i"])
            .arg(video)
            .arg("-vf")
            .arg(format!("select='not(mod(n\\,{}))'", plan.stride))
            .args(["-vsync", "vfr", "-frames:v"])
            .arg(plan.budget.to_string())
            .args(["-start_number", "0", "-progress", "pipe:1"])
            .arg(&pattern)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(SamplerError::Spawn)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SamplerError::Parse("ffmpeg stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| SamplerError::Parse("ffmpeg stderr not captured".to_string()))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            if let Some(written) = parse_progress_frame(&line) {
                // Receiver gone means nobody is watching; keep extracting.
                let _ = progress.send(written);
            }
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();
        if !status.success() {
            return Err(SamplerError::ExecutionFailed {
                exit_code: status.code(),
                stderr,
            });
        }

        let frames = collect_frames(out_dir).await?;
        if frames.is_empty() {
            return Err(SamplerError::NoFrames);
        }
        let _ = progress.send(frames.len() as u64);
        Ok(frames)
    }

    async fn health_check(&self) -> Result<(), SamplerError> {
        let status = Command::new(&self.ffprobe)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(SamplerError::Spawn)?;
        if status.success() {
            Ok(())
        } else {
            Err(SamplerError::ExecutionFailed {
                exit_code: status.code(),
                stderr: String::new(),
            })
        }
    }
}

/// Frame images in `dir`, sorted by name (and so by sample index).
pub async fn collect_frames(dir: &Path) -> Result<Vec<PathBuf>, SamplerError> {
    let mut frames = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(FRAME_EXTENSION) {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}

/// `frame=N` lines of ffmpeg's `-progress` output.
fn parse_progress_frame(line: &str) -> Option<u64> {
    line.trim().strip_prefix("frame=")?.trim().parse().ok()
}

/// Parse an ffprobe rate such as "30/1" or "24000/1001".
fn parse_rate(rate: &str) -> Option<f64> {
    let (num, den) = match rate.split_once('/') {
        Some((n, d)) => (n.trim().parse::<f64>().ok()?, d.trim().parse::<f64>().ok()?),
        None => (rate.trim().parse::<f64>().ok()?, 1.0),
    };
    if den == 0.0 {
        return None;
    }
    let value = num / den;
    (value.is_finite() && value > 0.0).then_some(value)
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

impl ProbeOutput {
    fn into_metadata(self, file_size_bytes: u64) -> Result<VideoMetadata, SamplerError> {
        let stream = self
            .streams
            .into_iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
            .ok_or(SamplerError::NoVideoStream)?;

        let fps = stream
            .avg_frame_rate
            .as_deref()
            .and_then(parse_rate)
            .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
            .unwrap_or(0.0);

        let duration_secs = stream
            .duration
            .as_deref()
            .or(self.format.as_ref().and_then(|f| f.duration.as_deref()))
            .and_then(|d| d.trim().parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d >= 0.0)
            .unwrap_or(0.0);

        let total_frames = stream
            .nb_frames
            .as_deref()
            .and_then(|n| n.trim().parse::<u64>().ok())
            .filter(|n| *n > 0)
            .or_else(|| {
                let estimate = (duration_secs * fps).round();
                (estimate >= 1.0).then_some(estimate as u64)
            });

        Ok(VideoMetadata {
            width: stream.width.unwrap_or(0),
            height: stream.height.unwrap_or(0),
            fps,
            total_frames,
            duration_secs,
            file_size_bytes,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    #[error("video tool could not be started: {0}")]
    Spawn(std::io::Error),

    #[error("video tool failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse video tool output: {0}")]
    Parse(String),

    #[error("video file not found: {0}")]
    VideoNotFound(String),

    #[error("no video stream in file")]
    NoVideoStream,

    #[error("no frames could be extracted from the video")]
    NoFrames,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
