//! Background pipeline behaviour with fake video and inference backends.

mod common;

use std::sync::Arc;

use common::*;
use frame_score::config::FrameFailurePolicy;
use frame_score::models::job::JobStatus;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_job_completes_with_score_and_video_info() {
    let root = tempfile::tempdir().unwrap();
    let extractor = Arc::new(FakeExtractor::new(900));
    let scorer = Arc::new(FakeScorer::new(|index| {
        Ok(Some(if index % 2 == 0 {
            record(1, 50.0, 50.0, 100.0, 100.0)
        } else {
            record(0, 80.0, 80.0, 100.0, 100.0)
        }))
    }));
    let orchestrator = orchestrator(
        extractor.clone(),
        scorer.clone(),
        settings(root.path(), FrameFailurePolicy::Skip),
    );

    let id = submit_video(&orchestrator, "clip.mp4", b"not really a video").await;
    let states = wait_for_terminal(orchestrator.tracker(), id).await;
    let last = states.last().unwrap();

    assert_eq!(last.status, JobStatus::Complete);
    assert_eq!(last.progress, 100);
    let result = last.result.as_ref().expect("complete job carries a result");

    // 900 frames at a budget of 300 → 300 samples, half with a 0.25 detection.
    assert_eq!(result.frames_sampled, 300);
    assert_eq!(result.frames_scored, 300);
    assert_eq!(result.frames_failed, 0);
    assert!((result.score - 0.125).abs() < 1e-9);
    assert_eq!(result.info.filename, "clip.mp4");
    assert_eq!(result.info.resolution, "640x480");
    assert_eq!(result.info.duration, "0:00:30");
    assert_eq!(scorer.calls(), (0..300).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_progress_never_decreases() {
    let root = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(
        Arc::new(FakeExtractor::new(120)),
        Arc::new(FakeScorer::quarter_area()),
        settings(root.path(), FrameFailurePolicy::Skip),
    );

    let id = submit_video(&orchestrator, "clip.webm", b"bytes").await;
    let states = wait_for_terminal(orchestrator.tracker(), id).await;

    let (terminal, processing) = states.split_last().unwrap();
    assert!(processing.iter().all(|s| s.status == JobStatus::Processing));
    for pair in processing.windows(2) {
        assert!(
            pair[0].progress <= pair[1].progress,
            "progress went from {} to {}",
            pair[0].progress,
            pair[1].progress
        );
    }
    assert_eq!(terminal.status, JobStatus::Complete);

    // Terminal states cannot be overwritten.
    let again = orchestrator
        .tracker()
        .update(frame_score::models::job::JobState::processing(id, 10, "late"))
        .await;
    tokio_test::assert_err!(again);
    assert_eq!(orchestrator.tracker().read(id).await.status, JobStatus::Complete);
}

#[tokio::test]
async fn test_inference_failure_aborts_and_cleans_up() {
    let root = tempfile::tempdir().unwrap();
    let extractor = Arc::new(FakeExtractor::new(5));
    let scorer = Arc::new(FakeScorer::new(|index| {
        if index == 2 {
            Err(service_error())
        } else {
            Ok(Some(record(1, 10.0, 10.0, 100.0, 100.0)))
        }
    }));
    let orchestrator = orchestrator(
        extractor.clone(),
        scorer.clone(),
        settings(root.path(), FrameFailurePolicy::Abort),
    );

    let id = submit_video(&orchestrator, "clip.mp4", b"bytes").await;
    let states = wait_for_terminal(orchestrator.tracker(), id).await;
    let last = states.last().unwrap();

    assert_eq!(last.status, JobStatus::Error);
    assert!(last.message.contains("frame 2"), "message: {}", last.message);
    assert!(last.result.is_none());
    assert_eq!(scorer.calls(), vec![0, 1, 2]);

    let (video, frames) = extractor.seen.lock().unwrap().clone().unwrap();
    assert!(!video.exists(), "scratch video should be deleted");
    assert!(!frames.exists(), "scratch frame directory should be deleted");
    assert!(entries(root.path()).is_empty());
}

#[tokio::test]
async fn test_inference_failure_skipped_by_default() {
    let root = tempfile::tempdir().unwrap();
    let extractor = Arc::new(FakeExtractor::new(5));
    let scorer = Arc::new(FakeScorer::new(|index| {
        if index == 2 {
            Err(service_error())
        } else {
            Ok(Some(record(1, 50.0, 50.0, 100.0, 100.0)))
        }
    }));
    let orchestrator = orchestrator(
        extractor.clone(),
        scorer,
        settings(root.path(), FrameFailurePolicy::Skip),
    );

    let id = submit_video(&orchestrator, "clip.mp4", b"bytes").await;
    let last = wait_for_terminal(orchestrator.tracker(), id).await.pop().unwrap();

    assert_eq!(last.status, JobStatus::Complete);
    let result = last.result.unwrap();
    assert_eq!(result.frames_sampled, 5);
    assert_eq!(result.frames_scored, 4);
    assert_eq!(result.frames_failed, 1);
    assert!((result.score - 0.25).abs() < 1e-9);
    assert!(entries(root.path()).is_empty());
}

#[tokio::test]
async fn test_frames_without_predictions_are_left_out_of_the_mean() {
    let root = tempfile::tempdir().unwrap();
    let scorer = Arc::new(FakeScorer::new(|index| match index {
        0 => Ok(Some(record(1, 50.0, 50.0, 100.0, 100.0))),
        1 => Ok(Some(record(0, 80.0, 80.0, 100.0, 100.0))),
        2 => Ok(Some(record(1, 20.0, 10.0, 200.0, 100.0))),
        _ => Ok(None),
    }));
    let orchestrator = orchestrator(
        Arc::new(FakeExtractor::new(6)),
        scorer,
        settings(root.path(), FrameFailurePolicy::Skip),
    );

    let id = submit_video(&orchestrator, "clip.mkv", b"bytes").await;
    let result = wait_for_terminal(orchestrator.tracker(), id)
        .await
        .pop()
        .unwrap()
        .result
        .unwrap();

    assert_eq!(result.frames_scored, 3);
    assert_eq!(result.frames_without_predictions, 3);
    assert!((result.score - 0.26 / 3.0).abs() < 1e-12);
}

#[tokio::test]
async fn test_no_predictions_anywhere_scores_zero() {
    let root = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(
        Arc::new(FakeExtractor::new(4)),
        Arc::new(FakeScorer::new(|_| Ok(None))),
        settings(root.path(), FrameFailurePolicy::Skip),
    );

    let id = submit_video(&orchestrator, "clip.avi", b"bytes").await;
    let last = wait_for_terminal(orchestrator.tracker(), id).await.pop().unwrap();

    assert_eq!(last.status, JobStatus::Complete);
    let result = last.result.unwrap();
    assert_eq!(result.score, 0.0);
    assert_eq!(result.prediction, "No objects detected");
    assert!(result.info.detections.is_empty());
}

#[tokio::test]
async fn test_confident_detections_are_counted_per_class() {
    let root = tempfile::tempdir().unwrap();
    let scorer = Arc::new(FakeScorer::new(|index| match index {
        0 => Ok(Some(classified(&["person", "car"]))),
        1 => Ok(Some(classified(&["person"]))),
        2 => Ok(Some(classified(&[]))),
        3 => Ok(None),
        _ => Ok(Some(classified(&["person", "dog"]))),
    }));
    let orchestrator = orchestrator(
        Arc::new(FakeExtractor::new(5)),
        scorer,
        settings(root.path(), FrameFailurePolicy::Skip),
    );

    let id = submit_video(&orchestrator, "clip.mp4", b"bytes").await;
    let result = wait_for_terminal(orchestrator.tracker(), id)
        .await
        .pop()
        .unwrap()
        .result
        .unwrap();

    let detections = &result.info.detections;
    assert_eq!(detections.len(), 3);
    assert_eq!(detections["person"], 3);
    assert_eq!(detections["car"], 1);
    assert_eq!(detections["dog"], 1);
    assert_eq!(result.prediction, "Objects detected: person: 3, car: 1, dog: 1");
    assert_eq!(result.frames_scored, 4);
}

#[tokio::test]
async fn test_every_frame_failing_is_an_error() {
    let root = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(
        Arc::new(FakeExtractor::new(3)),
        Arc::new(FakeScorer::new(|_| Err(service_error()))),
        settings(root.path(), FrameFailurePolicy::Skip),
    );

    let id = submit_video(&orchestrator, "clip.mov", b"bytes").await;
    let last = wait_for_terminal(orchestrator.tracker(), id).await.pop().unwrap();

    assert_eq!(last.status, JobStatus::Error);
    assert!(last.message.contains("all 3"), "message: {}", last.message);
    assert!(entries(root.path()).is_empty());
}

#[tokio::test]
async fn test_unreadable_video_is_rejected_before_any_job() {
    let root = tempfile::tempdir().unwrap();
    let extractor = Arc::new(FakeExtractor::failing_probe());
    let orchestrator = orchestrator(
        extractor.clone(),
        Arc::new(FakeScorer::quarter_area()),
        settings(root.path(), FrameFailurePolicy::Skip),
    );

    let video = upload(&orchestrator, "clip.mp4", b"garbage").await;
    tokio_test::assert_err!(orchestrator.open(&video).await);
    drop(video);

    let probed = extractor.probed.lock().unwrap().clone().unwrap();
    assert!(!probed.exists());
    assert!(entries(root.path()).is_empty());
    assert!(orchestrator.tracker().is_empty().await);
}

#[tokio::test]
async fn test_open_records_upload_size() {
    let root = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(
        Arc::new(FakeExtractor::new(30)),
        Arc::new(FakeScorer::quarter_area()),
        settings(root.path(), FrameFailurePolicy::Skip),
    );

    let video = upload(&orchestrator, "clip.mp4", &[0u8; 2048]).await;
    let metadata = orchestrator.open(&video).await.unwrap();
    assert_eq!(metadata.file_size_bytes, 2048);
    assert_eq!(metadata.total_frames, Some(30));
}

#[tokio::test]
async fn test_panicking_scorer_reports_error() {
    let root = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(
        Arc::new(FakeExtractor::new(3)),
        Arc::new(FakeScorer::new(|_| panic!("scorer exploded"))),
        settings(root.path(), FrameFailurePolicy::Skip),
    );

    let id = submit_video(&orchestrator, "clip.mp4", b"bytes").await;
    let last = wait_for_terminal(orchestrator.tracker(), id).await.pop().unwrap();

    assert_eq!(last.status, JobStatus::Error);
    assert_eq!(last.message, "Processing task panicked");
    assert!(entries(root.path()).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_jobs_do_not_interfere() {
    let root = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(
        Arc::new(FakeExtractor::new(40)),
        Arc::new(FakeScorer::quarter_area()),
        settings(root.path(), FrameFailurePolicy::Skip),
    );

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(submit_video(&orchestrator, "clip.mp4", b"bytes").await);
    }

    for id in ids {
        let last = wait_for_terminal(orchestrator.tracker(), id).await.pop().unwrap();
        assert_eq!(last.prediction_id, id);
        assert_eq!(last.status, JobStatus::Complete);
        assert_eq!(last.result.unwrap().frames_sampled, 40);
    }
    assert_eq!(orchestrator.tracker().len().await, 4);
    assert!(entries(root.path()).is_empty());
}

#[tokio::test]
async fn test_bounded_fan_out_keeps_frame_order() {
    let root = tempfile::tempdir().unwrap();
    let scorer = Arc::new(FakeScorer::quarter_area());
    let mut pipeline = settings(root.path(), FrameFailurePolicy::Skip);
    pipeline.inference_concurrency = 4;
    let orchestrator = orchestrator(Arc::new(FakeExtractor::new(30)), scorer.clone(), pipeline);

    let id = submit_video(&orchestrator, "clip.mp4", b"bytes").await;
    let last = wait_for_terminal(orchestrator.tracker(), id).await.pop().unwrap();

    assert_eq!(last.status, JobStatus::Complete);
    let mut calls = scorer.calls();
    calls.sort_unstable();
    assert_eq!(calls, (0..30).collect::<Vec<_>>());
}
