//! Pipeline behavior tests: ordering, termination triggers and sink isolation

mod harness;

use harness::{CapturingRecorder, ClosingDisplay, FailingDisplay, PendingSource, QueueSource};
use srs_player::pipeline::{FramePipeline, PipelineEnd};
use srs_player::shutdown::ExitReason;
use srs_player::ShutdownCoordinator;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test]
async fn test_samples_reach_recorder_in_presentation_order() {
    let recorder = CapturingRecorder::default();
    let written = recorder.written_pts.clone();

    let coordinator = ShutdownCoordinator::new();
    let mut pipeline =
        FramePipeline::new(coordinator, None, None, Some(Box::new(recorder.clone())));
    let mut source = QueueSource::new(&[0, 33, 66, 100]);

    let end = pipeline.run(&mut source).await;
    assert_eq!(end, PipelineEnd::EndOfStream);

    let pts: Vec<Duration> = written.lock().unwrap().clone();
    assert_eq!(
        pts,
        vec![
            Duration::from_millis(0),
            Duration::from_millis(33),
            Duration::from_millis(66),
            Duration::from_millis(100),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_exit_request_interrupts_inflight_pull() {
    let coordinator = ShutdownCoordinator::new();
    let mut pipeline = FramePipeline::new(coordinator.clone(), None, None, None);
    let mut source = PendingSource;

    let trigger = coordinator.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.request_exit(ExitReason::Interrupted);
    });

    let start = Instant::now();
    let end = pipeline.run(&mut source).await;

    assert_eq!(end, PipelineEnd::ExitRequested);
    assert!(
        start.elapsed() <= Duration::from_millis(250),
        "exit latency was {:?}",
        start.elapsed()
    );
    assert_eq!(coordinator.reason(), Some(ExitReason::Interrupted));
}

#[tokio::test(start_paused = true)]
async fn test_zero_timeout_never_self_terminates() {
    let coordinator = ShutdownCoordinator::new();
    // timeout 0 maps to no deadline at all
    let mut pipeline = FramePipeline::new(coordinator.clone(), None, None, None);
    let mut source = PendingSource;

    let trigger = coordinator.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        trigger.request_exit(ExitReason::Interrupted);
    });

    let start = Instant::now();
    pipeline.run(&mut source).await;

    // Still running a full hour in; only the external trigger ended it.
    assert!(start.elapsed() >= Duration::from_secs(3600));
    assert_eq!(coordinator.reason(), Some(ExitReason::Interrupted));
}

#[tokio::test(start_paused = true)]
async fn test_five_second_timeout_fires_on_time() {
    let coordinator = ShutdownCoordinator::new();
    let mut pipeline =
        FramePipeline::new(coordinator.clone(), Some(Duration::from_secs(5)), None, None);
    let mut source = PendingSource;

    let start = Instant::now();
    let end = pipeline.run(&mut source).await;

    assert_eq!(end, PipelineEnd::ExitRequested);
    assert_eq!(coordinator.reason(), Some(ExitReason::TimeoutExpired));
    let elapsed = start.elapsed();
    assert!(
        elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6),
        "timeout fired after {elapsed:?}"
    );
}

#[tokio::test]
async fn test_failing_display_does_not_stop_recording() {
    let recorder = CapturingRecorder::default();
    let written = recorder.written_pts.clone();
    let finalized = recorder.finalized.clone();

    let coordinator = ShutdownCoordinator::new();
    let mut pipeline = FramePipeline::new(
        coordinator,
        None,
        Some(Box::new(FailingDisplay)),
        Some(Box::new(recorder.clone())),
    );
    let mut source = QueueSource::new(&[0, 33, 66, 100]);

    pipeline.run(&mut source).await;
    assert_eq!(written.lock().unwrap().len(), 4);

    // Teardown still finalizes the recording.
    let (_, recorder) = pipeline.into_sinks();
    recorder.unwrap().finalize().unwrap();
    assert_eq!(finalized.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_window_close_sets_exit_reason() {
    let coordinator = ShutdownCoordinator::new();
    let mut pipeline = FramePipeline::new(
        coordinator.clone(),
        None,
        Some(Box::new(ClosingDisplay::new(2))),
        None,
    );
    let mut source = PendingSource;

    let end = pipeline.run(&mut source).await;
    assert_eq!(end, PipelineEnd::ExitRequested);
    assert_eq!(coordinator.reason(), Some(ExitReason::WindowClosed));
}
