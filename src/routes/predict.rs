use axum::extract::{Multipart, State};
use axum::Json;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::prediction::PredictResponse;
use crate::services::orchestrator::{video_extension, PipelineError};
use crate::services::sampler::SamplerError;

/// Multipart field carrying the video.
const FILE_FIELD: &str = "file";

/// POST /predict: Upload a video and start scoring it in the background.
pub async fn submit_prediction(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<PredictResponse>, ApiError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed upload: {e}")))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("Upload is missing a filename".to_string()))?;

        // Reject before anything touches disk.
        let extension = video_extension(&filename)
            .ok_or_else(|| ApiError::BadRequest("Only video files are supported".to_string()))?;

        let mut writer = state.orchestrator.begin_upload(extension)?;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Upload interrupted: {e}")))?
        {
            writer.write(&chunk).await.map_err(PipelineError::Scratch)?;
        }
        let video = writer.finish().await.map_err(PipelineError::Scratch)?;

        // Dropping `video` on the error paths deletes the upload.
        let metadata = match state.orchestrator.open(&video).await {
            Ok(metadata) => metadata,
            Err(e @ SamplerError::Spawn(_)) => return Err(PipelineError::Probe(e).into()),
            Err(e) => {
                tracing::warn!(filename = %filename, error = %e, "Rejected unreadable upload");
                return Err(ApiError::BadRequest("Could not open video file".to_string()));
            }
        };

        let prediction_id = state.orchestrator.submit(&filename, video, metadata).await?;

        return Ok(Json(PredictResponse {
            prediction_id,
            message: "Video uploaded, processing started".to_string(),
        }));
    }

    Err(ApiError::BadRequest(format!(
        "No video file in upload (expected field '{FILE_FIELD}')"
    )))
}
