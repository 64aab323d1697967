//! Integration tests for request correlation.

use std::time::Duration;

use pipeline::config::PipelineConfig;
use pipeline::correlation::CorrelationError;
use pipeline::models::{Event, RequestContext, RequestStatus, SignalKind};

use super::common::started_pipeline;

#[tokio::test(start_paused = true)]
async fn test_request_stats_by_kind_and_retention() {
    let (telemetry, _) = started_pipeline(PipelineConfig::default());
    telemetry
        .request_start(RequestContext::with_correlation_id("checkout-1").with_metadata("route", "/checkout"))
        .unwrap();

    for kind in [
        SignalKind::Span,
        SignalKind::Span,
        SignalKind::Metric,
        SignalKind::Log,
        SignalKind::Log,
        SignalKind::Log,
    ] {
        telemetry
            .submit(Event::new("step").with_kind(kind).with_correlation_id("checkout-1"))
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(telemetry.request_end("checkout-1"));

    let stats = telemetry.get_stats("checkout-1").unwrap();
    assert_eq!(stats.span_count, 2);
    assert_eq!(stats.metric_count, 1);
    assert_eq!(stats.log_count, 3);
    assert_eq!(stats.duration_ms, 800);
    assert_eq!(stats.status, RequestStatus::Completed);

    tokio::time::sleep(Duration::from_secs(59)).await;
    assert!(telemetry.get_stats("checkout-1").is_some());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(telemetry.get_stats("checkout-1").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_periodic_purge_drops_expired_stats() {
    let (telemetry, _) = started_pipeline(PipelineConfig::default());
    telemetry
        .request_start(RequestContext::with_correlation_id("r"))
        .unwrap();
    telemetry.request_end("r");
    assert_eq!(telemetry.stats().retained_requests, 1);

    tokio::time::sleep(Duration::from_secs(125)).await;
    assert_eq!(telemetry.stats().retained_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_capacity_evicts_oldest_live_request() {
    let (telemetry, _) = started_pipeline(PipelineConfig {
        max_concurrent_requests: 3,
        ..PipelineConfig::default()
    });

    for i in 0..4 {
        telemetry
            .request_start(RequestContext::with_correlation_id(format!("req-{i}")))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(telemetry.stats().live_requests, 3);
    assert_eq!(
        telemetry.get_stats("req-0").unwrap().status,
        RequestStatus::Evicted
    );
    assert!(!telemetry.add_event("req-0", &Event::new("late")));
    assert!(telemetry.add_event("req-3", &Event::new("fresh")));
}

#[tokio::test(start_paused = true)]
async fn test_request_times_out_and_stream_closes() {
    let (telemetry, _) = started_pipeline(PipelineConfig {
        request_timeout_ms: 2_000,
        ..PipelineConfig::default()
    });
    let mut handle = telemetry
        .request_start(RequestContext::with_correlation_id("stuck"))
        .unwrap();

    telemetry.add_event("stuck", &Event::new("waiting").with_kind(SignalKind::Log));
    assert_eq!(handle.events.recv().await.unwrap().name, "waiting");

    tokio::time::sleep(Duration::from_millis(2_100)).await;
    assert_eq!(
        telemetry.get_stats("stuck").unwrap().status,
        RequestStatus::TimedOut
    );
    assert!(handle.events.recv().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_live_id_rejected() {
    let (telemetry, _) = started_pipeline(PipelineConfig::default());
    telemetry
        .request_start(RequestContext::with_correlation_id("dup"))
        .unwrap();

    let err = telemetry
        .request_start(RequestContext::with_correlation_id("dup"))
        .unwrap_err();
    assert_eq!(err, CorrelationError::AlreadyActive("dup".to_string()));

    telemetry.request_end("dup");
    assert!(telemetry
        .request_start(RequestContext::with_correlation_id("dup"))
        .is_ok());
}
