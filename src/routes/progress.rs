use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::{self, Stream};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::{JobState, JobStatus};
use crate::services::progress::ProgressTracker;

struct Poll {
    tracker: Arc<ProgressTracker>,
    id: Uuid,
    interval: Duration,
    first: bool,
    finished: bool,
}

/// GET /progress/{prediction_id}: Server-sent stream of job states.
///
/// Emits one `progress` event per poll tick and closes after the first
/// terminal or `not_found` state.
pub async fn stream_progress(
    State(state): State<AppState>,
    Path(prediction_id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::debug!(prediction_id = %prediction_id, "Progress stream opened");

    let poll = Poll {
        tracker: state.tracker,
        id: prediction_id,
        interval: state.poll_interval,
        first: true,
        finished: false,
    };

    let events = stream::unfold(poll, |mut poll| async move {
        if poll.finished {
            return None;
        }
        if !poll.first {
            tokio::time::sleep(poll.interval).await;
        }
        poll.first = false;

        let job = poll.tracker.read(poll.id).await;
        poll.finished = job.status.is_terminal() || job.status == JobStatus::NotFound;

        Some((Ok(progress_event(&job)), poll))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

fn progress_event(job: &JobState) -> Event {
    Event::default()
        .event("progress")
        .json_data(job)
        .unwrap_or_else(|e| {
            tracing::error!(prediction_id = %job.prediction_id, error = %e, "Failed to encode job state");
            Event::default().event("error").data(e.to_string())
        })
}

/// GET /progress/{prediction_id}/status: Current job state as JSON.
pub async fn get_progress(
    State(state): State<AppState>,
    Path(prediction_id): Path<Uuid>,
) -> (StatusCode, Json<JobState>) {
    let job = state.tracker.read(prediction_id).await;
    let status = if job.status == JobStatus::NotFound {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::OK
    };
    (status, Json(job))
}
