//! Integration tests for batching and export.

use std::time::Duration;

use pipeline::config::PipelineConfig;
use pipeline::models::Event;

use super::common::{exported_names, keep_all_config, started_pipeline};

fn batching_config() -> PipelineConfig {
    PipelineConfig {
        max_batch_size: 10,
        max_queue_size: 50,
        auto_flush_threshold: 0.5,
        budget_per_minute: 10_000,
        ..keep_all_config()
    }
}

#[tokio::test(start_paused = true)]
async fn test_batches_respect_size_and_preserve_order() {
    let (telemetry, sink) = started_pipeline(batching_config());

    for i in 0..37 {
        telemetry.submit(Event::new(format!("e{i:02}"))).unwrap();
    }
    tokio::time::sleep(Duration::from_secs(6)).await;

    let batches = sink.batches();
    assert!(!batches.is_empty());
    assert!(batches.iter().all(|batch| batch.len() <= 10));

    let expected: Vec<String> = (0..37).map(|i| format!("e{i:02}")).collect();
    assert_eq!(exported_names(&sink), expected);
}

#[tokio::test(start_paused = true)]
async fn test_exported_plus_dropped_equals_kept() {
    let (telemetry, sink) = started_pipeline(batching_config());
    sink.fail_next(3);

    // Enough events in one burst to overflow the 50-slot queue before the
    // worker gets to run.
    for i in 0..120 {
        telemetry.submit(Event::new(format!("burst.{i}"))).unwrap();
    }
    tokio::time::sleep(Duration::from_secs(30)).await;
    let report = telemetry.shutdown().await;

    let stats = telemetry.stats();
    assert_eq!(stats.sampling.kept, 120);
    assert_eq!(stats.export.overflow_dropped, 70);
    assert_eq!(stats.export.batches_failed, 1);
    assert_eq!(
        stats.export.events_exported + stats.export.events_failed + stats.export.overflow_dropped,
        stats.sampling.kept
    );
    assert_eq!(report.events_failed, 0);
    assert_eq!(sink.exported_event_count() as u64, stats.export.events_exported);
}

#[tokio::test(start_paused = true)]
async fn test_slow_sink_does_not_block_producers() {
    let sink = std::sync::Arc::new(
        pipeline::export::InMemorySink::new().with_latency(Duration::from_secs(10)),
    );
    let telemetry = pipeline::TelemetryPipeline::new(batching_config(), sink.clone()).unwrap();
    telemetry.start();

    let started = tokio::time::Instant::now();
    for i in 0..200 {
        telemetry.submit(Event::new(format!("e{i}"))).unwrap();
        telemetry
            .submit_high_priority(Event::new(format!("p{i}")))
            .unwrap();
    }
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert!(telemetry.stats().normal_queued <= 50);
    assert!(telemetry.stats().priority_queued <= 50);
}

#[tokio::test(start_paused = true)]
async fn test_priority_events_export_individually_in_order() {
    let (telemetry, sink) = started_pipeline(PipelineConfig::default());

    for name in ["alert.1", "alert.2", "alert.3"] {
        telemetry.submit_high_priority(Event::new(name)).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(1)).await;

    let names: Vec<String> = sink.single_events().into_iter().map(|e| e.name).collect();
    assert_eq!(names, ["alert.1", "alert.2", "alert.3"]);
    assert_eq!(sink.batch_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_flushes_remaining_events_once() {
    let (telemetry, sink) = started_pipeline(batching_config());

    for i in 0..4 {
        telemetry.submit(Event::new(format!("tail.{i}"))).unwrap();
    }
    telemetry
        .submit_high_priority(Event::new("last.words"))
        .unwrap();

    let report = telemetry.shutdown().await;
    assert_eq!(report.events_exported + report.priority_exported, 5);
    assert_eq!(sink.exported_event_count(), 4);

    // Nothing further reaches the sink after shutdown.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(sink.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_retry_backoff_keeps_accounting() {
    let (telemetry, sink) = started_pipeline(PipelineConfig {
        max_batch_size: 2,
        ..batching_config()
    });
    sink.fail_next(1);

    telemetry.submit(Event::new("first")).unwrap();
    telemetry.submit(Event::new("second")).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.attempts(), 1);

    let report = telemetry.shutdown().await;
    assert_eq!(report.events_exported, 2);

    let stats = telemetry.stats();
    assert_eq!(stats.sampling.kept, 2);
    assert_eq!(
        stats.export.events_exported + stats.export.events_failed + stats.export.overflow_dropped,
        stats.sampling.kept
    );
    assert_eq!(exported_names(&sink), ["first", "second"]);
}
