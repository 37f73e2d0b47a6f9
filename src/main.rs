use std::sync::Arc;

use axum::http::HeaderValue;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

use frame_score::app_state::AppState;
use frame_score::config::AppConfig;
use frame_score::routes;
use frame_score::services::{
    inference::HostedInferenceClient,
    orchestrator::{JobOrchestrator, PipelineSettings},
    progress::{self, ProgressTracker},
    sampler::FfmpegExtractor,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    tracing::info!("Initializing frame-score server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("predict_jobs_total", "Total prediction jobs submitted");
    metrics::describe_counter!("predict_jobs_completed", "Total prediction jobs completed");
    metrics::describe_counter!("predict_jobs_failed", "Total prediction jobs that failed");
    metrics::describe_counter!(
        "predict_frames_skipped_total",
        "Frames skipped after an inference failure"
    );
    metrics::describe_histogram!(
        "predict_processing_seconds",
        "Time to process a prediction job"
    );
    metrics::describe_gauge!("predict_jobs_tracked", "Jobs currently held by the progress tracker");

    // Initialize hosted inference client
    tracing::info!(
        api_url = %config.inference_api_url,
        model_id = %config.inference_model_id,
        "Initializing hosted inference client"
    );
    let scorer = HostedInferenceClient::new(
        &config.inference_api_url,
        &config.inference_api_key,
        &config.inference_model_id,
        config.confidence_threshold,
        config.inference_timeout(),
    )
    .expect("Failed to initialize inference client");

    let extractor = FfmpegExtractor::new(&config.ffmpeg_bin, &config.ffprobe_bin);

    let tracker = Arc::new(ProgressTracker::new(config.grace_period()));
    progress::spawn_sweeper(Arc::clone(&tracker), config.sweep_interval());

    let orchestrator = JobOrchestrator::new(
        tracker,
        Arc::new(extractor),
        Arc::new(scorer),
        PipelineSettings::from(&config),
    );

    // Create shared application state
    let state = AppState::new(orchestrator, config.poll_interval());

    let cors_origin =
        HeaderValue::from_str(&config.cors_origin).expect("CORS_ORIGIN is not a valid header value");
    let app = routes::router(
        state,
        prometheus_handle,
        cors_origin,
        config.max_upload_bytes,
    );

    tracing::info!("Starting frame-score on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
