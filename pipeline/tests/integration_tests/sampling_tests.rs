//! Integration tests for sampling through the pipeline.

use std::time::Duration;

use pipeline::config::PipelineConfig;
use pipeline::models::Event;
use pipeline::sampling::{compute_rate, SamplingReason};

use super::common::{keep_all_config, started_pipeline};

#[tokio::test(start_paused = true)]
async fn test_adaptive_keeps_never_exceed_budget_per_window() {
    let (telemetry, _) = started_pipeline(PipelineConfig {
        budget_per_minute: 25,
        ..keep_all_config()
    });

    for window in 0..3 {
        let adaptive = (0..100)
            .map(|i| telemetry.submit(Event::new(format!("op.{}", i % 7))).unwrap())
            .filter(|decision| decision.reason == SamplingReason::Adaptive)
            .count();
        assert_eq!(adaptive, 25, "window {window}");
        assert_eq!(telemetry.stats().budget_remaining, 0);

        tokio::time::sleep(Duration::from_secs(61)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_error_events_kept_with_exhausted_budget() {
    let (telemetry, sink) = started_pipeline(PipelineConfig {
        budget_per_minute: 0,
        ..PipelineConfig::default()
    });

    for i in 0..10 {
        let decision = telemetry
            .submit(Event::new("payment.charge").with_attribute("error", i % 2 == 0))
            .unwrap();
        assert_eq!(decision.kept, i % 2 == 0);
    }
    let stats = telemetry.stats();
    assert_eq!(stats.sampling.error_or_critical, 5);
    assert_eq!(stats.sampling.budget_exceeded, 5);

    let report = telemetry.shutdown().await;
    assert_eq!(report.events_exported, 5);
    assert_eq!(sink.exported_event_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_always_keep_rules_do_not_spend_budget() {
    let (telemetry, _) = started_pipeline(PipelineConfig {
        budget_per_minute: 3,
        ..keep_all_config()
    });

    telemetry
        .submit(Event::new("a").with_attribute("criticality", "critical"))
        .unwrap();
    telemetry
        .submit(Event::new("b").with_attribute("duration.ms", 1_001))
        .unwrap();
    telemetry
        .submit(Event::new("c").with_attribute("important", true))
        .unwrap();

    assert_eq!(telemetry.stats().budget_remaining, 3);
}

#[tokio::test(start_paused = true)]
async fn test_adaptive_rate_falls_as_operation_gets_busier() {
    let (telemetry, _) = started_pipeline(PipelineConfig {
        budget_per_minute: 0,
        ..PipelineConfig::default()
    });

    let mut previous = telemetry.adaptive_rate("search");
    for _ in 0..5 {
        for _ in 0..50 {
            telemetry.submit(Event::new("search")).unwrap();
        }
        let rate = telemetry.adaptive_rate("search");
        assert!(rate <= previous);
        previous = rate;
    }
    assert!(previous < telemetry.adaptive_rate("rarely.called"));
}

#[test]
fn test_rate_stays_within_bounds() {
    for frequency in [0.0, 3.0, 1e3, 1e9] {
        for multiplier in [0.0, 0.2, 1.0, 10.0] {
            let rate = compute_rate(0.5, frequency, multiplier, 0.05, 0.9);
            assert!((0.05..=0.9).contains(&rate));
        }
    }
}
