use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Properties of an uploaded video, probed once before sampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// `None` when the container reports no usable frame count.
    pub total_frames: Option<u64>,
    pub duration_secs: f64,
    pub file_size_bytes: u64,
}

/// Human-facing video description attached to a finished job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSummary {
    pub filename: String,
    pub resolution: String,
    pub fps: f64,
    pub frames: u64,
    pub duration: String,
    pub file_size_mb: f64,
    /// Confident detections per class over the scored frames.
    #[serde(default)]
    pub detections: BTreeMap<String, u64>,
}

impl VideoMetadata {
    pub fn summary(&self, filename: &str) -> VideoSummary {
        VideoSummary {
            filename: filename.to_string(),
            resolution: format!("{}x{}", self.width, self.height),
            fps: round2(self.fps),
            frames: self.total_frames.unwrap_or(0),
            duration: format_duration(self.duration_secs),
            file_size_mb: round2(self.file_size_bytes as f64 / (1024.0 * 1024.0)),
            detections: BTreeMap::new(),
        }
    }
}

/// Whole seconds as `H:MM:SS`.
pub fn format_duration(secs: f64) -> String {
    let total = if secs.is_finite() && secs > 0.0 { secs as u64 } else { 0 };
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
