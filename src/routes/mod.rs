use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

pub mod health;
pub mod metrics;
pub mod predict;
pub mod progress;

/// Build the HTTP API.
pub fn router(
    state: AppState,
    prometheus: Arc<PrometheusHandle>,
    cors_origin: HeaderValue,
    max_upload_bytes: usize,
) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(cors_origin)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/predict", post(predict::submit_prediction))
        .route("/progress/{prediction_id}", get(progress::stream_progress))
        .route("/progress/{prediction_id}/status", get(progress::get_progress))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(prometheus),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Uploads are bounded by the layer below, not axum's 2 MB default.
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
}
