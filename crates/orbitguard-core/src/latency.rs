//! Per-stage latency measurements for the control loop.
//!
//! Three stages are tracked per source: detection (trigger timestamp to
//! cycle start), decision (recall plus reasoning plus validation) and
//! recovery action (dispatch). Bad inputs are logged and dropped; recording
//! never fails. The collector keeps a sliding window of the most recent
//! samples so a long-running loop holds bounded memory.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyStage {
    FaultDetection,
    AgentDecision,
    RecoveryAction,
}

impl LatencyStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FaultDetection => "fault_detection",
            Self::AgentDecision => "agent_decision",
            Self::RecoveryAction => "recovery_action",
        }
    }
}

impl std::fmt::Display for LatencyStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyMeasurement {
    pub timestamp: DateTime<Utc>,
    pub metric_type: LatencyStage,
    pub source_id: String,
    pub duration_ms: f64,
    /// Seconds since the start of the run or scenario.
    pub scenario_time_s: f64,
}

/// Aggregate over one stage. `p99_ms`/`min_ms` are omitted in per-source
/// breakdowns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub count: usize,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p99_ms: Option<f64>,
    pub max_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_ms: Option<f64>,
}

impl LatencyStats {
    fn from_samples(samples: &[f64], full: bool) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);
        let count = sorted.len();
        // Nearest-rank on the floor index.
        let pick = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];
        Some(Self {
            count,
            mean_ms: sorted.iter().sum::<f64>() / count as f64,
            p50_ms: sorted[count / 2],
            p95_ms: pick(0.95),
            p99_ms: full.then(|| pick(0.99)),
            max_ms: sorted[count - 1],
            min_ms: full.then(|| sorted[0]),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub total_measurements: usize,
    pub measurement_types: BTreeMap<LatencyStage, usize>,
    pub stats: BTreeMap<LatencyStage, LatencyStats>,
    pub stats_by_source: BTreeMap<String, BTreeMap<LatencyStage, LatencyStats>>,
}

/// Samples kept when no window is configured.
pub const DEFAULT_LATENCY_WINDOW: usize = 10_000;

#[derive(Debug)]
pub struct LatencyCollector {
    measurements: VecDeque<LatencyMeasurement>,
    window: usize,
    dropped: u64,
}

impl Default for LatencyCollector {
    fn default() -> Self {
        Self::with_window(DEFAULT_LATENCY_WINDOW)
    }
}

impl LatencyCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `window` samples (at least one).
    pub fn with_window(window: usize) -> Self {
        Self {
            measurements: VecDeque::new(),
            window: window.max(1),
            dropped: 0,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Samples pushed out of the window since the last reset.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn record(
        &mut self,
        stage: LatencyStage,
        source_id: &str,
        scenario_time_s: f64,
        duration_ms: f64,
    ) {
        if source_id.trim().is_empty() {
            tracing::warn!(stage = %stage, "latency sample dropped: empty source id");
            return;
        }
        if !(scenario_time_s.is_finite() && scenario_time_s >= 0.0) {
            tracing::warn!(stage = %stage, scenario_time_s, "latency sample dropped: invalid scenario time");
            return;
        }
        if !(duration_ms.is_finite() && duration_ms >= 0.0) {
            tracing::warn!(stage = %stage, duration_ms, "latency sample dropped: invalid duration");
            return;
        }
        if self.measurements.len() >= self.window {
            self.measurements.pop_front();
            self.dropped += 1;
        }
        self.measurements.push_back(LatencyMeasurement {
            timestamp: Utc::now(),
            metric_type: stage,
            source_id: source_id.to_string(),
            duration_ms,
            scenario_time_s,
        });
        tracing::trace!(stage = %stage, source_id = %source_id, duration_ms, "latency recorded");
    }

    pub fn record_fault_detection(&mut self, source_id: &str, scenario_time_s: f64, ms: f64) {
        self.record(LatencyStage::FaultDetection, source_id, scenario_time_s, ms);
    }

    pub fn record_agent_decision(&mut self, source_id: &str, scenario_time_s: f64, ms: f64) {
        self.record(LatencyStage::AgentDecision, source_id, scenario_time_s, ms);
    }

    pub fn record_recovery_action(&mut self, source_id: &str, scenario_time_s: f64, ms: f64) {
        self.record(LatencyStage::RecoveryAction, source_id, scenario_time_s, ms);
    }

    /// Oldest first.
    pub fn measurements(&self) -> &VecDeque<LatencyMeasurement> {
        &self.measurements
    }

    pub fn stats(&self) -> BTreeMap<LatencyStage, LatencyStats> {
        let mut by_stage: BTreeMap<LatencyStage, Vec<f64>> = BTreeMap::new();
        for m in &self.measurements {
            by_stage.entry(m.metric_type).or_default().push(m.duration_ms);
        }
        by_stage
            .into_iter()
            .filter_map(|(stage, samples)| {
                LatencyStats::from_samples(&samples, true).map(|s| (stage, s))
            })
            .collect()
    }

    pub fn stats_by_source(&self) -> BTreeMap<String, BTreeMap<LatencyStage, LatencyStats>> {
        let mut grouped: BTreeMap<&str, BTreeMap<LatencyStage, Vec<f64>>> = BTreeMap::new();
        for m in &self.measurements {
            grouped
                .entry(m.source_id.as_str())
                .or_default()
                .entry(m.metric_type)
                .or_default()
                .push(m.duration_ms);
        }
        grouped
            .into_iter()
            .map(|(source, stages)| {
                let stats = stages
                    .into_iter()
                    .filter_map(|(stage, samples)| {
                        LatencyStats::from_samples(&samples, false).map(|s| (stage, s))
                    })
                    .collect();
                (source.to_string(), stats)
            })
            .collect()
    }

    pub fn summary(&self) -> LatencySummary {
        let mut measurement_types = BTreeMap::new();
        for m in &self.measurements {
            *measurement_types.entry(m.metric_type).or_insert(0) += 1;
        }
        LatencySummary {
            total_measurements: self.measurements.len(),
            measurement_types,
            stats: self.stats(),
            stats_by_source: self.stats_by_source(),
        }
    }

    /// Write raw measurements as CSV with a header row.
    pub fn export_csv(&self, path: impl AsRef<Path>) -> Result<usize, csv::Error> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(true)
            .from_path(path.as_ref())?;
        writer.write_record([
            "timestamp",
            "metric_type",
            "source_id",
            "duration_ms",
            "scenario_time_s",
        ])?;
        for m in &self.measurements {
            writer.write_record([
                m.timestamp.to_rfc3339(),
                m.metric_type.to_string(),
                m.source_id.clone(),
                m.duration_ms.to_string(),
                m.scenario_time_s.to_string(),
            ])?;
        }
        writer.flush()?;
        Ok(self.measurements.len())
    }

    pub fn reset(&mut self) {
        self.measurements.clear();
        self.dropped = 0;
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_invalid_samples_are_dropped() {
        let mut c = LatencyCollector::new();
        c.record_fault_detection("", 1.0, 5.0);
        c.record_fault_detection("SAT1", -1.0, 5.0);
        c.record_fault_detection("SAT1", 1.0, -5.0);
        c.record_fault_detection("SAT1", 1.0, f64::NAN);
        assert!(c.is_empty());
        c.record_fault_detection("SAT1", 1.0, 5.0);
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_stats_percentiles() {
        let mut c = LatencyCollector::new();
        for ms in 1..=100 {
            c.record_agent_decision("SAT1", 0.0, ms as f64);
        }
        let stats = c.stats();
        let s = &stats[&LatencyStage::AgentDecision];
        assert_eq!(s.count, 100);
        assert_relative_eq!(s.mean_ms, 50.5);
        assert_eq!(s.p50_ms, 51.0);
        assert_eq!(s.p95_ms, 96.0);
        assert_eq!(s.p99_ms, Some(100.0));
        assert_eq!(s.min_ms, Some(1.0));
        assert_eq!(s.max_ms, 100.0);
    }

    #[test]
    fn test_stats_by_source_omits_tail_fields() {
        let mut c = LatencyCollector::new();
        c.record_recovery_action("SAT1", 0.0, 10.0);
        c.record_recovery_action("SAT2", 0.0, 30.0);
        c.record_recovery_action("SAT2", 0.1, 50.0);
        let by_source = c.stats_by_source();
        let sat2 = &by_source["SAT2"][&LatencyStage::RecoveryAction];
        assert_eq!(sat2.count, 2);
        assert_eq!(sat2.p50_ms, 50.0);
        assert!(sat2.p99_ms.is_none());
        assert!(sat2.min_ms.is_none());
    }

    #[test]
    fn test_window_drops_oldest() {
        let mut c = LatencyCollector::with_window(3);
        for ms in 1..=5 {
            c.record_agent_decision("SAT1", ms as f64, ms as f64);
        }
        assert_eq!(c.len(), 3);
        assert_eq!(c.dropped(), 2);
        let kept: Vec<f64> = c.measurements().iter().map(|m| m.duration_ms).collect();
        assert_eq!(kept, vec![3.0, 4.0, 5.0]);
        assert_eq!(c.stats()[&LatencyStage::AgentDecision].min_ms, Some(3.0));
    }

    #[test]
    fn test_summary_and_reset() {
        let mut c = LatencyCollector::new();
        c.record_fault_detection("SAT1", 0.0, 1.0);
        c.record_agent_decision("SAT1", 0.0, 2.0);
        c.record_agent_decision("SAT1", 0.0, 3.0);
        let summary = c.summary();
        assert_eq!(summary.total_measurements, 3);
        assert_eq!(summary.measurement_types[&LatencyStage::AgentDecision], 2);
        c.reset();
        assert!(c.stats().is_empty());
    }

    #[test]
    fn test_export_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latency.csv");
        let mut c = LatencyCollector::new();
        c.record_fault_detection("SAT1", 0.5, 12.5);
        c.record_recovery_action("SAT2", 1.0, 40.0);
        assert_eq!(c.export_csv(&path).unwrap(), 2);

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "timestamp,metric_type,source_id,duration_ms,scenario_time_s"
        );
        assert!(lines.next().unwrap().contains(",fault_detection,SAT1,12.5,0.5"));
        assert_eq!(lines.count(), 1);
    }
}
