use std::sync::Arc;
use std::time::Duration;

use crate::services::{orchestrator::JobOrchestrator, progress::ProgressTracker};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<JobOrchestrator>,
    pub tracker: Arc<ProgressTracker>,
    /// Interval between progress stream polls.
    pub poll_interval: Duration,
}

impl AppState {
    pub fn new(orchestrator: JobOrchestrator, poll_interval: Duration) -> Self {
        let tracker = Arc::clone(orchestrator.tracker());
        Self {
            orchestrator: Arc::new(orchestrator),
            tracker,
            poll_interval,
        }
    }
}
