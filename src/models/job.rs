use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::video::VideoSummary;

/// Status of a prediction job as seen by progress readers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Complete,
    Error,
    NotFound,
}

impl JobStatus {
    /// `complete` and `error` are final; nothing but expiry follows them.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Error)
    }
}

/// Snapshot of one job, pushed to progress listeners.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobState {
    pub prediction_id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<JobResult>,
    pub updated_at: DateTime<Utc>,
}

impl JobState {
    pub fn processing(prediction_id: Uuid, progress: u8, message: impl Into<String>) -> Self {
        Self {
            prediction_id,
            status: JobStatus::Processing,
            progress: progress.min(100),
            message: message.into(),
            result: None,
            updated_at: Utc::now(),
        }
    }

    pub fn complete(prediction_id: Uuid, result: JobResult) -> Self {
        Self {
            prediction_id,
            status: JobStatus::Complete,
            progress: 100,
            message: "Processing complete".to_string(),
            result: Some(result),
            updated_at: Utc::now(),
        }
    }

    pub fn error(prediction_id: Uuid, progress: u8, message: impl Into<String>) -> Self {
        Self {
            prediction_id,
            status: JobStatus::Error,
            progress: progress.min(100),
            message: message.into(),
            result: None,
            updated_at: Utc::now(),
        }
    }

    /// Sentinel returned for ids the tracker does not know (or no longer knows).
    pub fn not_found(prediction_id: Uuid) -> Self {
        Self {
            prediction_id,
            status: JobStatus::NotFound,
            progress: 0,
            message: "Prediction not found".to_string(),
            result: None,
            updated_at: Utc::now(),
        }
    }
}

/// Terminal payload of a successfully scored video.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobResult {
    pub score: f64,
    pub prediction: String,
    pub frames_sampled: usize,
    pub frames_scored: usize,
    pub frames_without_predictions: usize,
    pub frames_failed: usize,
    pub info: VideoSummary,
}
