use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Response after submitting a video for scoring.
#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub prediction_id: Uuid,
    pub message: String,
}
