//! Tests for the worker watchdog
//!
//! The callback must run exactly once when the worker stops, never after a
//! successful cancel, and at most once when cancel and termination race.

use monitor_core::builder::BuilderRegistry;
use monitor_core::config::{DataSource, SessionConfig};
use monitor_core::processor::ProcessorChain;
use monitor_core::session::{
    EventProcessingPipeline, PauseController, PipelineHandle, WatchdogMonitor,
};
use monitor_core::source::{MemorySource, RecordFeeder};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn start_pipeline() -> (RecordFeeder, PipelineHandle) {
    let config = SessionConfig::new(
        DataSource::LcioFile {
            path: PathBuf::from("recon.slcio"),
        },
        "HPS-EngRun2015-Nominal-v3",
    );
    let (feeder, source) = MemorySource::channel();
    let builder = BuilderRegistry::with_defaults().create(&config).unwrap();
    let pipeline = EventProcessingPipeline::new(
        Box::new(source),
        builder,
        ProcessorChain::new(),
        Arc::new(PauseController::new(false)),
        &config,
    );
    (feeder, pipeline.start().unwrap())
}

fn counting_callback() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    (calls, move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_fires_once_on_worker_exit() {
    let (feeder, pipeline) = start_pipeline();
    let (calls, callback) = counting_callback();
    let watchdog = WatchdogMonitor::start(pipeline.completion(), callback);

    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!watchdog.has_fired());

    feeder.push("e1");
    feeder.finish();
    assert!(pipeline.wait_finished(Duration::from_secs(5)).await);
    settle().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(watchdog.has_fired());
    assert!(!watchdog.cancel().await);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancel_prevents_callback() {
    let (feeder, pipeline) = start_pipeline();
    let (calls, callback) = counting_callback();
    let watchdog = WatchdogMonitor::start(pipeline.completion(), callback);

    assert!(watchdog.cancel().await);

    feeder.finish();
    assert!(pipeline.wait_finished(Duration::from_secs(5)).await);
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancel_racing_termination_runs_callback_at_most_once() {
    for _ in 0..50 {
        let (feeder, pipeline) = start_pipeline();
        let (calls, callback) = counting_callback();
        let watchdog = WatchdogMonitor::start(pipeline.completion(), callback);

        feeder.finish();
        let prevented = watchdog.cancel().await;

        assert!(pipeline.wait_finished(Duration::from_secs(5)).await);
        settle().await;
        let expected = if prevented { 0 } else { 1 };
        assert_eq!(calls.load(Ordering::SeqCst), expected);
    }
}

#[tokio::test]
async fn test_fires_for_already_finished_worker() {
    let (feeder, pipeline) = start_pipeline();
    feeder.finish();
    assert!(pipeline.wait_finished(Duration::from_secs(5)).await);

    let (calls, callback) = counting_callback();
    let _watchdog = WatchdogMonitor::start(pipeline.completion(), callback);
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
