//! Atomic counters for the control loop.
//!
//! Counters are incremented silently at the call site. Call
//! [`LoopMetrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at shutdown or every N ticks).
//! One instance lives on the runtime context; there is no global.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Atomic counters. No allocation or locking on the hot path.
#[derive(Debug, Default)]
pub struct LoopMetrics {
    ticks: AtomicU64,
    ignored_triggers: AtomicU64,
    invalid_triggers: AtomicU64,
    decisions: AtomicU64,
    fallbacks: AtomicU64,
    rejections: AtomicU64,
    completions: AtomicU64,
    dispatch_failures: AtomicU64,
    evictions: AtomicU64,
    cycle_faults: AtomicU64,
    budget_overruns: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub ignored_triggers: u64,
    pub invalid_triggers: u64,
    pub decisions: u64,
    pub fallbacks: u64,
    pub rejections: u64,
    pub completions: u64,
    pub dispatch_failures: u64,
    pub evictions: u64,
    pub cycle_faults: u64,
    pub budget_overruns: u64,
}

fn bump(counter: &AtomicU64, by: u64, name: &'static str) {
    counter.fetch_add(by, Ordering::Relaxed);
    tracing::trace!(metric = name, "counter incremented");
}

impl LoopMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_ticks(&self) {
        bump(&self.ticks, 1, "ticks");
    }

    pub fn inc_ignored_triggers(&self) {
        bump(&self.ignored_triggers, 1, "ignored_triggers");
    }

    pub fn inc_invalid_triggers(&self) {
        bump(&self.invalid_triggers, 1, "invalid_triggers");
    }

    pub fn inc_decisions(&self) {
        bump(&self.decisions, 1, "decisions");
    }

    pub fn inc_fallbacks(&self) {
        bump(&self.fallbacks, 1, "fallbacks");
    }

    pub fn inc_rejections(&self) {
        bump(&self.rejections, 1, "rejections");
    }

    pub fn inc_completions(&self) {
        bump(&self.completions, 1, "completions");
    }

    pub fn inc_dispatch_failures(&self) {
        bump(&self.dispatch_failures, 1, "dispatch_failures");
    }

    pub fn add_evictions(&self, n: usize) {
        if n > 0 {
            bump(&self.evictions, n as u64, "evictions");
        }
    }

    pub fn inc_cycle_faults(&self) {
        bump(&self.cycle_faults, 1, "cycle_faults");
    }

    pub fn inc_budget_overruns(&self) {
        bump(&self.budget_overruns, 1, "budget_overruns");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            ticks: load(&self.ticks),
            ignored_triggers: load(&self.ignored_triggers),
            invalid_triggers: load(&self.invalid_triggers),
            decisions: load(&self.decisions),
            fallbacks: load(&self.fallbacks),
            rejections: load(&self.rejections),
            completions: load(&self.completions),
            dispatch_failures: load(&self.dispatch_failures),
            evictions: load(&self.evictions),
            cycle_faults: load(&self.cycle_faults),
            budget_overruns: load(&self.budget_overruns),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            ticks = s.ticks,
            ignored_triggers = s.ignored_triggers,
            invalid_triggers = s.invalid_triggers,
            decisions = s.decisions,
            fallbacks = s.fallbacks,
            rejections = s.rejections,
            completions = s.completions,
            dispatch_failures = s.dispatch_failures,
            evictions = s.evictions,
            cycle_faults = s.cycle_faults,
            budget_overruns = s.budget_overruns,
        );
    }

    pub fn reset(&self) {
        for c in [
            &self.ticks,
            &self.ignored_triggers,
            &self.invalid_triggers,
            &self.decisions,
            &self.fallbacks,
            &self.rejections,
            &self.completions,
            &self.dispatch_failures,
            &self.evictions,
            &self.cycle_faults,
            &self.budget_overruns,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}
