//! Runs one prediction job: probe → sample → score → aggregate.
//!
//! The upload is probed before a job exists, so unreadable videos never get
//! one. Submission returns as soon as the job is registered; the pipeline
//! itself runs on a spawned task that owns the job's scratch resources and is
//! the only writer of its progress entry.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::{AppConfig, FrameFailurePolicy};
use crate::models::frame::FrameRecord;
use crate::models::job::{JobResult, JobState};
use crate::models::video::VideoMetadata;
use crate::services::aggregate::{aggregate_score, count_detections, detection_summary};
use crate::services::inference::{FrameScorer, InferenceError};
use crate::services::progress::ProgressTracker;
use crate::services::sampler::{FrameExtractor, SamplerError, SamplingPlan};
use crate::services::scratch::{JobScratch, ScratchVideo, UploadWriter};

/// Video container extensions accepted for upload.
pub const ALLOWED_EXTENSIONS: &[&str] = &[".mp4", ".avi", ".mov", ".mkv", ".webm"];

// Progress milestones (percent).
const PROBED: u8 = 5;
const SAMPLING_START: u8 = 10;
const SAMPLING_END: u8 = 40;
const SCORING_END: u8 = 90;
const AGGREGATING: u8 = 95;

/// Report sampling progress every this many written frames.
const SAMPLING_REPORT_EVERY: u64 = 20;
/// Report scoring progress every this many scored frames.
const SCORING_REPORT_EVERY: usize = 5;

/// Lower-cased extension of `filename` (with the dot) if it is an accepted
/// video type.
pub fn video_extension(filename: &str) -> Option<&'static str> {
    let ext = Path::new(filename).extension()?.to_str()?.to_ascii_lowercase();
    ALLOWED_EXTENSIONS
        .iter()
        .copied()
        .find(|allowed| &allowed[1..] == ext.as_str())
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub frame_budget: u64,
    pub frame_failure_policy: FrameFailurePolicy,
    pub inference_concurrency: usize,
    pub scratch_root: PathBuf,
}

impl From<&AppConfig> for PipelineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            frame_budget: config.frame_budget,
            frame_failure_policy: config.frame_failure_policy,
            inference_concurrency: config.inference_concurrency,
            scratch_root: config.scratch_root(),
        }
    }
}

pub struct JobOrchestrator {
    tracker: Arc<ProgressTracker>,
    extractor: Arc<dyn FrameExtractor>,
    scorer: Arc<dyn FrameScorer>,
    settings: PipelineSettings,
}

impl JobOrchestrator {
    pub fn new(
        tracker: Arc<ProgressTracker>,
        extractor: Arc<dyn FrameExtractor>,
        scorer: Arc<dyn FrameScorer>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            tracker,
            extractor,
            scorer,
            settings,
        }
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    pub fn extractor(&self) -> &Arc<dyn FrameExtractor> {
        &self.extractor
    }

    /// Open a scratch file for an upload with an accepted `extension`.
    pub fn begin_upload(&self, extension: &str) -> Result<UploadWriter, PipelineError> {
        UploadWriter::create(&self.settings.scratch_root, extension).map_err(PipelineError::Scratch)
    }

    /// Probe a finished upload. An error means the file is not a readable video
    /// (or the video tooling is unavailable, see [`SamplerError::Spawn`]).
    pub async fn open(&self, video: &ScratchVideo) -> Result<VideoMetadata, SamplerError> {
        let mut metadata = self.extractor.probe(video.path()).await?;
        metadata.file_size_bytes = video.size_bytes();
        Ok(metadata)
    }

    /// Register a job for a probed `video` and start processing it in the
    /// background.
    pub async fn submit(
        self: &Arc<Self>,
        filename: &str,
        video: ScratchVideo,
        metadata: VideoMetadata,
    ) -> Result<Uuid, PipelineError> {
        let scratch =
            JobScratch::new(&self.settings.scratch_root, video).map_err(PipelineError::Scratch)?;
        let id = Uuid::new_v4();
        self.tracker.create(id).await;

        metrics::counter!("predict_jobs_total").increment(1);
        tracing::info!(
            prediction_id = %id,
            filename = %filename,
            size_bytes = scratch.video_size(),
            "Prediction job submitted"
        );

        let orchestrator = Arc::clone(self);
        let filename = filename.to_string();
        tokio::spawn(async move { orchestrator.run(id, filename, metadata, scratch).await });

        Ok(id)
    }

    async fn run(
        self: Arc<Self>,
        id: Uuid,
        filename: String,
        metadata: VideoMetadata,
        scratch: JobScratch,
    ) {
        let started = Instant::now();
        let mut reporter = Reporter::new(&self.tracker, id);

        let outcome = AssertUnwindSafe(self.process(&filename, metadata, &scratch, &mut reporter))
            .catch_unwind()
            .await
            .unwrap_or(Err(PipelineError::Panicked));

        // Scratch goes away before the terminal state becomes visible.
        scratch.close(id);

        let elapsed = started.elapsed();
        metrics::histogram!("predict_processing_seconds").record(elapsed.as_secs_f64());

        let terminal = match outcome {
            Ok(result) => {
                metrics::counter!("predict_jobs_completed").increment(1);
                tracing::info!(
                    prediction_id = %id,
                    score = result.score,
                    frames_scored = result.frames_scored,
                    frames_failed = result.frames_failed,
                    duration_ms = elapsed.as_millis() as u64,
                    "Prediction job complete"
                );
                JobState::complete(id, result)
            }
            Err(e) => {
                metrics::counter!("predict_jobs_failed").increment(1);
                tracing::error!(prediction_id = %id, error = %e, "Prediction job failed");
                JobState::error(id, reporter.last, e.to_string())
            }
        };

        if let Err(e) = self.tracker.update(terminal).await {
            tracing::warn!(prediction_id = %id, error = %e, "Could not record final job state");
        }
    }

    async fn process(
        &self,
        filename: &str,
        metadata: VideoMetadata,
        scratch: &JobScratch,
        reporter: &mut Reporter<'_>,
    ) -> Result<JobResult, PipelineError> {
        let id = reporter.id;

        // Phase 1: metadata, probed at upload time
        reporter.report(PROBED, "Video information extracted").await;
        tracing::debug!(prediction_id = %id, ?metadata, "Video probed");

        // Phase 2: sampling
        let plan = SamplingPlan::new(metadata.total_frames, self.settings.frame_budget);
        let expected = metadata
            .total_frames
            .map(|total| plan.indices(total).count() as u64)
            .filter(|n| *n > 0)
            .unwrap_or(plan.budget);
        reporter.report(SAMPLING_START, "Extracting frames").await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let extract = self
            .extractor
            .extract(scratch.video_path(), scratch.frames_dir(), plan, tx);
        let watch = async {
            let mut last_reported = 0;
            while let Some(written) = rx.recv().await {
                if written >= last_reported + SAMPLING_REPORT_EVERY {
                    last_reported = written;
                    let pct = band(SAMPLING_START, SAMPLING_END, written, expected);
                    reporter
                        .report(pct, format!("Extracted {written} frames"))
                        .await;
                }
            }
        };
        let (frames, ()) = tokio::join!(extract, watch);
        let frames = frames.map_err(PipelineError::Sampling)?;
        let sampled = frames.len();
        reporter
            .report(SAMPLING_END, format!("Extracted {sampled} frames"))
            .await;
        tracing::info!(prediction_id = %id, stride = plan.stride, frames = sampled, "Frames sampled");

        // Phase 3: inference
        let mut records: Vec<FrameRecord> = Vec::with_capacity(sampled);
        let mut without_predictions = 0usize;
        let mut failed = 0usize;
        let mut done = 0usize;

        let mut outcomes = futures::stream::iter(frames.into_iter().enumerate())
            .map(|(index, path)| {
                let scorer = Arc::clone(&self.scorer);
                async move { (index, scorer.score(&path).await) }
            })
            .buffered(self.settings.inference_concurrency.max(1));

        while let Some((index, outcome)) = outcomes.next().await {
            match outcome {
                Ok(Some(record)) => records.push(record),
                Ok(None) => without_predictions += 1,
                Err(e) => match self.settings.frame_failure_policy {
                    FrameFailurePolicy::Skip => {
                        failed += 1;
                        metrics::counter!("predict_frames_skipped_total").increment(1);
                        tracing::warn!(prediction_id = %id, frame = index, error = %e, "Frame inference failed, skipping");
                    }
                    FrameFailurePolicy::Abort => {
                        return Err(PipelineError::Inference {
                            frame: index,
                            source: e,
                        });
                    }
                },
            }

            done += 1;
            if done % SCORING_REPORT_EVERY == 0 || done == sampled {
                let pct = band(SAMPLING_END, SCORING_END, done as u64, sampled as u64);
                reporter
                    .report(pct, format!("Analyzed {done} of {sampled} frames"))
                    .await;
            }
        }
        drop(outcomes);

        if sampled > 0 && failed == sampled {
            return Err(PipelineError::AllFramesFailed(sampled));
        }

        // Phase 4: aggregation
        reporter.report(AGGREGATING, "Calculating score").await;
        let score = aggregate_score(&records);
        let detections = count_detections(&records);
        let prediction = detection_summary(&detections);

        let mut info = metadata.summary(filename);
        info.detections = detections;

        Ok(JobResult {
            score,
            prediction,
            frames_sampled: sampled,
            frames_scored: records.len(),
            frames_without_predictions: without_predictions,
            frames_failed: failed,
            info,
        })
    }
}

/// Writes non-decreasing progress for one job.
struct Reporter<'a> {
    tracker: &'a ProgressTracker,
    id: Uuid,
    last: u8,
}

impl<'a> Reporter<'a> {
    fn new(tracker: &'a ProgressTracker, id: Uuid) -> Self {
        Self {
            tracker,
            id,
            last: 0,
        }
    }

    async fn report(&mut self, progress: u8, message: impl Into<String>) {
        self.last = self.last.max(progress.min(100));
        let state = JobState::processing(self.id, self.last, message);
        if let Err(e) = self.tracker.update(state).await {
            tracing::warn!(prediction_id = %self.id, error = %e, "Progress update rejected");
        }
    }
}

/// Map `done / total` onto the `[start, end]` percent band.
fn band(start: u8, end: u8, done: u64, total: u64) -> u8 {
    if total == 0 {
        return end;
    }
    let span = u64::from(end - start);
    let offset = (span * done.min(total)) / total;
    start + offset as u8
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Video tooling unavailable: {0}")]
    Probe(SamplerError),

    #[error("Frame extraction failed: {0}")]
    Sampling(SamplerError),

    #[error("Inference failed on frame {frame}: {source}")]
    Inference {
        frame: usize,
        #[source]
        source: InferenceError,
    },

    #[error("Inference failed for all {0} sampled frames")]
    AllFramesFailed(usize),

    #[error("Scratch storage error: {0}")]
    Scratch(std::io::Error),

    #[error("Processing task panicked")]
    Panicked,
}
