//! Latency collection, aggregation and CSV export.

use std::sync::Arc;

use orbitguard_core::clock::ManualClock;
use orbitguard_core::latency::LatencyCollector;
use orbitguard_core::{
    Clock, DecisionLoop, LatencyStage, OrbitGuardConfig, RuntimeContext, TelemetryTrigger,
};

fn populated() -> LatencyCollector {
    let mut c = LatencyCollector::new();
    for i in 1..=20 {
        let ms = f64::from(i) * 10.0;
        c.record_fault_detection("sat-1", f64::from(i), ms);
        c.record_agent_decision(if i % 2 == 0 { "sat-1" } else { "sat-2" }, f64::from(i), ms / 2.0);
    }
    c.record_recovery_action("sat-2", 21.0, 75.0);
    c
}

#[test]
fn test_stage_percentiles() {
    let c = populated();
    let stats = c.stats();
    let detection = &stats[&LatencyStage::FaultDetection];
    assert_eq!(detection.count, 20);
    assert_eq!(detection.p50_ms, 110.0);
    assert_eq!(detection.p95_ms, 200.0);
    assert_eq!(detection.p99_ms, Some(200.0));
    assert_eq!(detection.min_ms, Some(10.0));
    assert_eq!(detection.max_ms, 200.0);
    assert!((detection.mean_ms - 105.0).abs() < 1e-9);
}

#[test]
fn test_per_source_breakdown_omits_tail_fields() {
    let c = populated();
    let by_source = c.stats_by_source();
    assert_eq!(by_source.len(), 2);

    let sat2 = &by_source["sat-2"];
    assert_eq!(sat2[&LatencyStage::AgentDecision].count, 10);
    assert_eq!(sat2[&LatencyStage::RecoveryAction].count, 1);
    assert!(sat2[&LatencyStage::AgentDecision].p99_ms.is_none());
    assert!(!by_source["sat-1"].contains_key(&LatencyStage::RecoveryAction));
}

#[test]
fn test_invalid_samples_are_dropped() {
    let mut c = LatencyCollector::new();
    c.record_fault_detection("", 1.0, 5.0);
    c.record_fault_detection("sat-1", 1.0, -5.0);
    c.record_fault_detection("sat-1", 1.0, f64::NAN);
    c.record_fault_detection("sat-1", f64::INFINITY, 5.0);
    assert!(c.is_empty());
    assert!(c.stats().is_empty());
}

#[test]
fn test_summary_counts_types() {
    let summary = populated().summary();
    assert_eq!(summary.total_measurements, 41);
    assert_eq!(summary.measurement_types[&LatencyStage::FaultDetection], 20);
    assert_eq!(summary.measurement_types[&LatencyStage::RecoveryAction], 1);

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["measurement_types"]["agent_decision"], 20);
}

#[test]
fn test_csv_export() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("latency.csv");
    let c = populated();
    assert_eq!(c.export_csv(&path).unwrap(), 41);

    let mut reader = csv::Reader::from_path(&path).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(
        headers.iter().collect::<Vec<_>>(),
        ["timestamp", "metric_type", "source_id", "duration_ms", "scenario_time_s"]
    );
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 41);
    assert_eq!(&rows[40][1], "recovery_action");
    assert_eq!(&rows[40][2], "sat-2");
}

#[test]
fn test_reset() {
    let mut c = populated();
    c.reset();
    assert_eq!(c.len(), 0);
}

#[tokio::test]
async fn test_long_run_keeps_latency_window() {
    let mut config = OrbitGuardConfig::default();
    config.cycle.latency_window = 6;
    let clock = ManualClock::at_epoch();
    let ctx = RuntimeContext::builder(config)
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap();
    ctx.init().unwrap();
    let mut looper = DecisionLoop::new(ctx.clone());

    for _ in 0..20 {
        clock.advance_secs(200);
        let trigger = TelemetryTrigger::new(clock.now(), 0.9, "thermal_warning", vec![0.5; 16]);
        looper.tick(trigger).await;
    }

    let latency = ctx.latency().lock();
    assert_eq!(latency.len(), 6);
    assert_eq!(latency.window(), 6);
    assert!(latency.dropped() >= 34);
}
