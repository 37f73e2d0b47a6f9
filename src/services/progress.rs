use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use uuid::Uuid;

use crate::models::job::{JobState, JobStatus};

struct Entry {
    state: JobState,
    /// Set once the job reaches a terminal state.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Process-wide job status store.
///
/// Each job is written by the single task that runs it and read by any number
/// of progress listeners. Finished jobs stay readable for the grace period and
/// are then dropped, either lazily on read or by [`ProgressTracker::sweep`].
pub struct ProgressTracker {
    entries: RwLock<HashMap<Uuid, Entry>>,
    grace_period: Duration,
}

impl ProgressTracker {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            grace_period,
        }
    }

    /// Register a fresh job at 0%.
    pub async fn create(&self, id: Uuid) -> JobState {
        let state = JobState::processing(id, 0, "Video received, queued for processing");
        self.entries.write().await.insert(
            id,
            Entry {
                state: state.clone(),
                expires_at: None,
            },
        );
        state
    }

    /// Replace the stored state for `id`.
    ///
    /// Writes are rejected for unknown ids and for jobs that already reached a
    /// terminal state. A terminal write starts the grace-period clock.
    pub async fn update(&self, state: JobState) -> Result<(), ProgressError> {
        let id = state.prediction_id;
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&id).ok_or(ProgressError::UnknownJob(id))?;

        if entry.state.status.is_terminal() {
            return Err(ProgressError::Terminal {
                id,
                status: entry.state.status,
            });
        }
        if state.status == JobStatus::NotFound {
            return Err(ProgressError::InvalidStatus(id));
        }

        entry.expires_at = state
            .status
            .is_terminal()
            .then(|| Instant::now() + self.grace_period);
        entry.state = state;
        Ok(())
    }

    /// Current state, or the `not_found` sentinel for unknown or expired ids.
    pub async fn read(&self, id: Uuid) -> JobState {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(&id) {
                None => return JobState::not_found(id),
                Some(entry) if !entry.is_expired(now) => return entry.state.clone(),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().await;
        if entries.get(&id).is_some_and(|e| e.is_expired(now)) {
            entries.remove(&id);
            tracing::debug!(prediction_id = %id, "Expired job removed on read");
        }
        JobState::not_found(id)
    }

    /// Drop an entry regardless of its state.
    pub async fn expire(&self, id: Uuid) -> bool {
        self.entries.write().await.remove(&id).is_some()
    }

    /// Remove every entry whose grace period has elapsed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Run [`ProgressTracker::sweep`] on a fixed interval for the life of the process.
pub fn spawn_sweeper(tracker: Arc<ProgressTracker>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = tracker.sweep().await;
            if removed > 0 {
                tracing::debug!(removed, "Swept expired jobs");
            }
            metrics::gauge!("predict_jobs_tracked").set(tracker.len().await as f64);
        }
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("Job {0} is not tracked")]
    UnknownJob(Uuid),

    #[error("Job {id} already finished with status {status}")]
    Terminal { id: Uuid, status: JobStatus },

    #[error("Job {0} cannot be stored as not_found")]
    InvalidStatus(Uuid),
}
