//! Structured observability hooks for the control loop.
//!
//! This module provides:
//! - A cycle-scoped tracing span via `cycle_span`
//! - Emission functions for cycle, store, reasoning and dispatch events
//!
//! Routine events go out at `info!`, anomalies of the loop itself at `warn!`.
//! For JSON output, start the binaries with `--json`.

use tracing::{info, warn};

/// Span covering one tick; attach it with `tracing::Instrument` so it
/// follows the cycle across await points.
///
/// # Example
///
/// ```ignore
/// loop.run_cycle(&trigger).instrument(cycle_span(42, "thermal_warning")).await;
/// // every event logged inside the tick carries tick=42
/// ```
pub fn cycle_span(tick: u64, anomaly_type: &str) -> tracing::Span {
    tracing::info_span!("orbitguard.cycle", tick = tick, anomaly_type = %anomaly_type)
}

/// Emit event: a cycle passed the detect threshold.
pub fn emit_cycle_started(tick: u64, anomaly_type: &str, anomaly_score: f64) {
    info!(
        event = "cycle.started",
        tick = tick,
        anomaly_type = %anomaly_type,
        anomaly_score = anomaly_score,
    );
}

/// Emit event: a cycle returned to idle.
pub fn emit_cycle_finished(tick: u64, outcome: &str, elapsed_ms: u64) {
    info!(
        event = "cycle.finished",
        tick = tick,
        outcome = %outcome,
        elapsed_ms = elapsed_ms,
    );
}

/// Emit event: trigger below threshold, fast path back to idle.
pub fn emit_trigger_ignored(anomaly_score: f64, threshold: f64) {
    tracing::debug!(
        event = "cycle.trigger_ignored",
        anomaly_score = anomaly_score,
        threshold = threshold,
    );
}

/// Emit event: trigger rejected by the store (warning level).
pub fn emit_trigger_invalid(anomaly_type: &str, error: &dyn std::fmt::Display) {
    warn!(event = "cycle.trigger_invalid", anomaly_type = %anomaly_type, error = %error);
}

/// Emit event: one event evicted from the store.
pub fn emit_event_evicted(event_id: &str, anomaly_type: &str, resonance: f64) {
    info!(
        event = "store.evicted",
        event_id = %event_id,
        anomaly_type = %anomaly_type,
        resonance = resonance,
    );
}

/// Emit event: eviction could not restore capacity because every resident is pinned.
pub fn emit_over_capacity_unresolved(size: usize, max_capacity: usize) {
    warn!(
        event = "store.over_capacity_unresolved",
        size = size,
        max_capacity = max_capacity,
    );
}

/// Emit event: the reasoner failed or timed out and fallback was used.
pub fn emit_fallback(decision_id: &str, action_type: &str, reason: &dyn std::fmt::Display) {
    warn!(
        event = "reasoning.fallback",
        decision_id = %decision_id,
        action_type = %action_type,
        reason = %reason,
    );
}

/// Emit event: reasoning degraded after consecutive failures.
pub fn emit_reasoning_degraded(consecutive_failures: u32) {
    warn!(
        event = "reasoning.degraded",
        consecutive_failures = consecutive_failures,
    );
}

/// Emit event: a reasoner retry succeeded and cleared degraded mode.
pub fn emit_reasoning_recovered() {
    info!(event = "reasoning.recovered");
}

/// Emit event: dispatch finished with the given outcome label.
pub fn emit_dispatch(decision_id: &str, action_type: &str, outcome: &str) {
    info!(
        event = "action.dispatched",
        decision_id = %decision_id,
        action_type = %action_type,
        outcome = %outcome,
    );
}

/// Emit event: a decision reached a terminal status and was sealed.
pub fn emit_decision_sealed(decision_id: &str, status: &str, digest: &str) {
    info!(
        event = "decision.sealed",
        decision_id = %decision_id,
        status = %status,
        digest = %digest,
    );
}

/// Emit event: a tick exceeded its latency budget (warning level).
pub fn emit_budget_overrun(tick: u64, elapsed_ms: u64, budget_ms: u64) {
    warn!(
        event = "cycle.budget_overrun",
        tick = tick,
        elapsed_ms = elapsed_ms,
        budget_ms = budget_ms,
    );
}

/// Emit event: a fault inside the cycle was absorbed (warning level).
pub fn emit_cycle_fault(tick: u64, error: &dyn std::fmt::Display) {
    warn!(event = "cycle.fault", tick = tick, error = %error);
}
