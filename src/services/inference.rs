use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;

use crate::models::frame::FrameRecord;

/// Scores a single sampled frame.
///
/// `Ok(None)` means the model returned no predictions; the frame is skipped
/// rather than counted as a zero.
#[async_trait]
pub trait FrameScorer: Send + Sync {
    async fn score(&self, frame: &Path) -> Result<Option<FrameRecord>, InferenceError>;
}

/// Client for a hosted object-detection model (Roboflow-style REST API).
pub struct HostedInferenceClient {
    http: Client,
    api_url: String,
    api_key: String,
    model_id: String,
    confidence_threshold: f64,
}

#[derive(Debug, Deserialize)]
pub struct InferenceResponse {
    #[serde(default)]
    pub predictions: Vec<Prediction>,
    pub image: ImageSize,
}

#[derive(Debug, Deserialize)]
pub struct Prediction {
    pub confidence: f64,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    pub width: Option<f64>,
    pub height: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ImageSize {
    pub width: f64,
    pub height: f64,
}

impl HostedInferenceClient {
    pub fn new(
        api_url: &str,
        api_key: &str,
        model_id: &str,
        confidence_threshold: f64,
        timeout: Option<Duration>,
    ) -> Result<Self, InferenceError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(InferenceError::Http)?;

        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model_id: model_id.trim_matches('/').to_string(),
            confidence_threshold,
        })
    }

    /// Send an encoded image to the hosted model and return its raw response.
    pub async fn infer(&self, image_bytes: &[u8]) -> Result<InferenceResponse, InferenceError> {
        let url = format!("{}/{}", self.api_url, self.model_id);
        let body = base64::engine::general_purpose::STANDARD.encode(image_bytes);

        let response = self
            .http
            .post(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(body)
            .send()
            .await
            .map_err(InferenceError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response.json().await.map_err(InferenceError::Http)
    }
}

#[async_trait]
impl FrameScorer for HostedInferenceClient {
    async fn score(&self, frame: &Path) -> Result<Option<FrameRecord>, InferenceError> {
        let image_bytes = tokio::fs::read(frame).await?;
        let response = self.infer(&image_bytes).await?;
        Ok(to_frame_record(&response, self.confidence_threshold))
    }
}

/// Reduce a model response to a [`FrameRecord`] built from its most confident
/// prediction. Box size comes from `width`/`height`, or `x`/`y` for models
/// that only report those. Every prediction above `threshold` contributes its
/// class to `detected_classes`.
pub fn to_frame_record(response: &InferenceResponse, threshold: f64) -> Option<FrameRecord> {
    let top = response
        .predictions
        .iter()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))?;

    Some(FrameRecord {
        has_detection: u8::from(top.confidence > threshold),
        box_width: top.width.unwrap_or(top.x),
        box_height: top.height.unwrap_or(top.y),
        image_width: response.image.width,
        image_height: response.image.height,
        detected_classes: response
            .predictions
            .iter()
            .filter(|p| p.confidence > threshold)
            .filter_map(|p| p.class.clone())
            .collect(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Inference request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Inference API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to read frame image: {0}")]
    Io(#[from] std::io::Error),
}
