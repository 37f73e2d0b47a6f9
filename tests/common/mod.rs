//! Shared fixtures for pipeline and HTTP tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use frame_score::config::FrameFailurePolicy;
use frame_score::models::frame::FrameRecord;
use frame_score::models::job::JobState;
use frame_score::models::video::VideoMetadata;
use frame_score::services::inference::{FrameScorer, InferenceError};
use frame_score::services::orchestrator::{video_extension, JobOrchestrator, PipelineSettings};
use frame_score::services::progress::ProgressTracker;
use frame_score::services::scratch::ScratchVideo;
use frame_score::services::sampler::{
    collect_frames, frame_path, FrameExtractor, SamplerError, SamplingPlan,
};

/// Outcome scripted for one frame index.
pub type ScoreFn = dyn Fn(usize) -> Result<Option<FrameRecord>, InferenceError> + Send + Sync;

/// Extractor that pretends the video has `total_frames` frames and writes a
/// small file per sampled frame.
pub struct FakeExtractor {
    pub total_frames: u64,
    pub fail_probe: bool,
    /// Video path and frames directory seen by the last `extract` call.
    pub seen: Mutex<Option<(PathBuf, PathBuf)>>,
    pub probed: Mutex<Option<PathBuf>>,
}

impl FakeExtractor {
    pub fn new(total_frames: u64) -> Self {
        Self {
            total_frames,
            fail_probe: false,
            seen: Mutex::new(None),
            probed: Mutex::new(None),
        }
    }

    pub fn failing_probe() -> Self {
        Self {
            fail_probe: true,
            ..Self::new(0)
        }
    }
}

#[async_trait]
impl FrameExtractor for FakeExtractor {
    async fn probe(&self, video: &Path) -> Result<VideoMetadata, SamplerError> {
        *self.probed.lock().unwrap() = Some(video.to_path_buf());
        if self.fail_probe {
            return Err(SamplerError::NoVideoStream);
        }
        Ok(VideoMetadata {
            width: 640,
            height: 480,
            fps: 30.0,
            total_frames: Some(self.total_frames),
            duration_secs: self.total_frames as f64 / 30.0,
            file_size_bytes: 0,
        })
    }

    async fn extract(
        &self,
        video: &Path,
        out_dir: &Path,
        plan: SamplingPlan,
        progress: UnboundedSender<u64>,
    ) -> Result<Vec<PathBuf>, SamplerError> {
        *self.seen.lock().unwrap() = Some((video.to_path_buf(), out_dir.to_path_buf()));
        for (seq, _source_index) in plan.indices(self.total_frames).enumerate() {
            tokio::fs::write(frame_path(out_dir, seq as u64), seq.to_string()).await?;
            let _ = progress.send(seq as u64 + 1);
            tokio::task::yield_now().await;
        }
        collect_frames(out_dir).await
    }

    async fn health_check(&self) -> Result<(), SamplerError> {
        Ok(())
    }
}

/// Scorer whose per-frame outcome is decided by a closure over the frame's
/// sequential index (read back from the file the fake extractor wrote).
pub struct FakeScorer {
    outcome: Box<ScoreFn>,
    pub calls: Mutex<Vec<usize>>,
}

impl FakeScorer {
    pub fn new(
        outcome: impl Fn(usize) -> Result<Option<FrameRecord>, InferenceError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            outcome: Box::new(outcome),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every frame gets a confident detection covering a quarter of the image.
    pub fn quarter_area() -> Self {
        Self::new(|_| Ok(Some(record(1, 50.0, 50.0, 100.0, 100.0))))
    }

    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FrameScorer for FakeScorer {
    async fn score(&self, frame: &Path) -> Result<Option<FrameRecord>, InferenceError> {
        let index: usize = tokio::fs::read_to_string(frame)
            .await?
            .trim()
            .parse()
            .expect("fake frame holds its index");
        self.calls.lock().unwrap().push(index);
        tokio::task::yield_now().await;
        (self.outcome)(index)
    }
}

pub fn record(has: u8, w: f64, h: f64, tw: f64, th: f64) -> FrameRecord {
    FrameRecord {
        has_detection: has,
        box_width: w,
        box_height: h,
        image_width: tw,
        image_height: th,
        detected_classes: Vec::new(),
    }
}

/// Confident detection covering a quarter of the image, with `classes` seen
/// above the threshold.
pub fn classified(classes: &[&str]) -> FrameRecord {
    FrameRecord {
        detected_classes: classes.iter().map(|c| c.to_string()).collect(),
        ..record(1, 50.0, 50.0, 100.0, 100.0)
    }
}

pub fn service_error() -> InferenceError {
    InferenceError::Status {
        status: 503,
        body: "model unavailable".to_string(),
    }
}

pub fn settings(root: &Path, policy: FrameFailurePolicy) -> PipelineSettings {
    PipelineSettings {
        frame_budget: 300,
        frame_failure_policy: policy,
        inference_concurrency: 1,
        scratch_root: root.to_path_buf(),
    }
}

pub fn orchestrator(
    extractor: Arc<FakeExtractor>,
    scorer: Arc<FakeScorer>,
    settings: PipelineSettings,
) -> Arc<JobOrchestrator> {
    let tracker = Arc::new(ProgressTracker::new(Duration::from_secs(60)));
    Arc::new(JobOrchestrator::new(tracker, extractor, scorer, settings))
}

/// Stream `bytes` into a finished scratch upload.
pub async fn upload(
    orchestrator: &Arc<JobOrchestrator>,
    filename: &str,
    bytes: &[u8],
) -> ScratchVideo {
    let extension = video_extension(filename).expect("test uploads use accepted extensions");
    let mut writer = orchestrator.begin_upload(extension).unwrap();
    writer.write(bytes).await.unwrap();
    writer.finish().await.unwrap()
}

/// Upload, probe and submit a job.
pub async fn submit_video(
    orchestrator: &Arc<JobOrchestrator>,
    filename: &str,
    bytes: &[u8],
) -> Uuid {
    let video = upload(orchestrator, filename, bytes).await;
    let metadata = orchestrator.open(&video).await.unwrap();
    orchestrator.submit(filename, video, metadata).await.unwrap()
}

/// Poll the tracker until the job is terminal, returning every distinct state
/// observed along the way (terminal state last).
pub async fn wait_for_terminal(tracker: &ProgressTracker, id: Uuid) -> Vec<JobState> {
    let poll = async {
        let mut seen: Vec<JobState> = Vec::new();
        loop {
            let state = tracker.read(id).await;
            let terminal = state.status.is_terminal();
            if seen.last() != Some(&state) {
                seen.push(state);
            }
            if terminal {
                return seen;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), poll)
        .await
        .expect("job did not finish in time")
}

/// Entries directly under `dir`.
pub fn entries(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect()
}
