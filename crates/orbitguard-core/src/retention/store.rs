//! Capacity-bounded adaptive event store.
//!
//! Events live in a flat arena (`Vec<Event>`) addressed through an
//! id-to-slot map, with a [`SimilarityIndex`] row per slot. Removal swaps
//! the last slot into the hole in both structures. Decay and resonance are
//! computed when read; nothing is rescored in the background. An event
//! decays from the most recent occurrence of its type, so a recurring type
//! keeps its older events fresh.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use super::error::{StoreError, StoreResult};
use super::eviction::EvictionQueue;
use super::index::SimilarityIndex;
use super::policy::RetentionPolicy;
use super::recurrence::{RecurrenceTracker, ResonanceParams};
use crate::clock::{seconds_between, Clock};
use crate::config::StoreConfig;
use crate::domain::{DecisionId, Event, EventId, PinState};
use crate::obs;

/// One recall hit: a copy of the event plus the scores that ranked it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecalledEvent {
    pub event: Event,
    pub similarity: f64,
    pub resonance: f64,
    pub score: f64,
}

/// Result of an eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionReport {
    pub evicted: Vec<EventId>,
    /// Still above capacity because every remaining event is pinned.
    pub over_capacity: bool,
    /// Events whose resonance was computed to choose the victims.
    #[serde(default)]
    pub scored: usize,
}

/// Aggregate learning feedback for one anomaly type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSummary {
    pub anomaly_type: String,
    pub events_with_feedback: usize,
    pub observations: u64,
    pub mean_effectiveness: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub event: Event,
    pub resonance: f64,
    pub pinned: bool,
}

/// Read-only view of the store for external inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub taken_at: DateTime<Utc>,
    pub max_capacity: usize,
    pub pinned_count: usize,
    pub events: Vec<SnapshotEntry>,
}

impl StoreSnapshot {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Time-decayed, resonance-weighted event store.
pub struct AdaptiveStore {
    max_capacity: usize,
    params: ResonanceParams,
    policy: RetentionPolicy,
    clock: Arc<dyn Clock>,
    events: Vec<Event>,
    slots: HashMap<EventId, usize>,
    index: SimilarityIndex,
    recurrence: RecurrenceTracker,
    queue: EvictionQueue,
}

impl std::fmt::Debug for AdaptiveStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveStore")
            .field("len", &self.events.len())
            .field("max_capacity", &self.max_capacity)
            .field("dim", &self.index.dim())
            .finish()
    }
}

impl AdaptiveStore {
    pub fn new(config: &StoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_capacity: config.max_capacity,
            params: ResonanceParams::from(config),
            policy: RetentionPolicy::from(config),
            clock,
            events: Vec::new(),
            slots: HashMap::new(),
            index: SimilarityIndex::new(config.embedding_dim),
            recurrence: RecurrenceTracker::new(config.recurrence_window_seconds),
            queue: EvictionQueue::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    pub fn embedding_dim(&self) -> usize {
        self.index.dim()
    }

    pub fn get(&self, id: &EventId) -> Option<&Event> {
        self.slots.get(id).map(|slot| &self.events[*slot])
    }

    pub fn contains(&self, id: &EventId) -> bool {
        self.slots.contains_key(id)
    }

    /// Events currently protected from eviction.
    pub fn pinned_count(&self) -> usize {
        let now = self.clock.now();
        self.events.iter().filter(|e| e.is_pinned(now)).count()
    }

    /// Same-type occurrences inside the recurrence window right now.
    pub fn window_count(&self, anomaly_type: &str) -> u32 {
        self.recurrence.window_count(anomaly_type, self.clock.now())
    }

    /// Current resonance of a resident event.
    pub fn resonance(&self, id: &EventId) -> StoreResult<f64> {
        let event = self.get(id).ok_or(StoreError::EventNotFound(*id))?;
        Ok(score_event(&self.recurrence, &self.params, event, self.clock.now()))
    }

    /// Insert an event and evict down to capacity. Returns the new id.
    pub fn insert(
        &mut self,
        embedding: Vec<f32>,
        anomaly_type: impl Into<String>,
        base_severity: f64,
    ) -> StoreResult<EventId> {
        self.insert_with_report(embedding, anomaly_type, base_severity)
            .map(|(id, _)| id)
    }

    /// Like [`insert`](Self::insert), also returning what eviction did.
    pub fn insert_with_report(
        &mut self,
        embedding: Vec<f32>,
        anomaly_type: impl Into<String>,
        base_severity: f64,
    ) -> StoreResult<(EventId, EvictionReport)> {
        self.check_embedding(&embedding)?;
        if !(base_severity.is_finite() && (0.0..=1.0).contains(&base_severity)) {
            return Err(StoreError::InvalidSeverity(base_severity));
        }

        let now = self.clock.now();
        let anomaly_type = anomaly_type.into();
        let mut event = Event::new(now, embedding, anomaly_type, base_severity);

        for rid in self.recurrence.residents(&event.anomaly_type) {
            if let Some(&slot) = self.slots.get(rid) {
                let resident = &mut self.events[slot];
                resident.recurrence_count = resident.recurrence_count.saturating_add(1);
            }
        }
        event.recurrence_count = self.recurrence.record(&event.anomaly_type, event.id, now);
        event.pinned_until = self
            .policy
            .pin_for(&event.anomaly_type, base_severity, now);
        event.last_resonance = self.params.resonance(base_severity, event.recurrence_count, 0.0);

        let id = event.id;
        self.queue.track(&event, now);
        self.index.push(&event.embedding);
        self.slots.insert(id, self.events.len());
        self.events.push(event);

        let report = self.evict_if_over_capacity();
        Ok((id, report))
    }

    /// Remove the lowest-resonance unpinned events until the store fits.
    ///
    /// Ties go to the older insertion, then the smaller id. When only pinned
    /// events remain the store is left over capacity and the report says so.
    /// Each removal scores one candidate per anomaly type, never the whole
    /// store.
    pub fn evict_if_over_capacity(&mut self) -> EvictionReport {
        let mut report = EvictionReport::default();
        if self.events.len() <= self.max_capacity {
            return report;
        }

        let now = self.clock.now();
        let mut scored = Vec::new();
        {
            let (events, slots) = (&self.events, &self.slots);
            self.queue
                .release_expired(now, |id| slots.get(id).map(|slot| &events[*slot]));
        }

        while self.events.len() > self.max_capacity {
            let victim = {
                let (events, slots) = (&self.events, &self.slots);
                let (recurrence, params) = (&self.recurrence, &self.params);
                self.queue.lowest(
                    now,
                    |id| slots.get(id).map(|slot| &events[*slot]),
                    |anomaly_type, c| {
                        resonance_at(recurrence, params, anomaly_type, c.severity, c.inserted, now)
                    },
                    &mut scored,
                )
            };
            let Some(victim) = victim else {
                break;
            };
            self.queue.pop(&victim.anomaly_type);
            let id = victim.candidate.id;
            if let Some(evicted) = self.remove(&id, now) {
                obs::emit_event_evicted(&id.to_string(), &evicted.anomaly_type, victim.resonance);
                report.evicted.push(id);
            }
        }

        report.scored = scored.len();
        for (id, resonance) in scored {
            if let Some(&slot) = self.slots.get(&id) {
                self.events[slot].last_resonance = resonance;
            }
        }

        if self.events.len() > self.max_capacity {
            report.over_capacity = true;
            obs::emit_over_capacity_unresolved(self.events.len(), self.max_capacity);
        }
        report
    }

    /// Up to `k` events ranked by `similarity * resonance`, most relevant first.
    pub fn recall(&self, query: &[f32], k: usize) -> StoreResult<Vec<RecalledEvent>> {
        self.recall_excluding(query, k, None)
    }

    /// Recall that skips `exclude` (typically the event that triggered it).
    pub fn recall_excluding(
        &self,
        query: &[f32],
        k: usize,
        exclude: Option<EventId>,
    ) -> StoreResult<Vec<RecalledEvent>> {
        self.check_embedding(query)?;
        if k == 0 || self.events.is_empty() {
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        let unit_query = SimilarityIndex::normalize(query);

        let mut scored: Vec<(usize, f64, f64, f64)> = Vec::with_capacity(self.events.len());
        for (slot, event) in self.events.iter().enumerate() {
            if Some(event.id) == exclude {
                continue;
            }
            let resonance = score_event(&self.recurrence, &self.params, event, now);
            let similarity = self.index.similarity(slot, &unit_query);
            scored.push((slot, similarity, resonance, similarity * resonance));
        }

        scored.sort_by(|a, b| {
            let (ea, eb) = (&self.events[a.0], &self.events[b.0]);
            b.3.total_cmp(&a.3)
                .then_with(|| eb.insertion_time.cmp(&ea.insertion_time))
                .then_with(|| ea.id.cmp(&eb.id))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(slot, similarity, resonance, score)| RecalledEvent {
                event: self.events[slot].clone(),
                similarity,
                resonance,
                score,
            })
            .collect())
    }

    /// Attach effectiveness feedback to an event.
    pub fn record_outcome(&mut self, id: EventId, effectiveness: f64) -> StoreResult<()> {
        self.record_decision_outcome(id, effectiveness, None)
    }

    /// Attach feedback produced by a specific decision.
    pub fn record_decision_outcome(
        &mut self,
        id: EventId,
        effectiveness: f64,
        decision_id: Option<DecisionId>,
    ) -> StoreResult<()> {
        let now = self.clock.now();
        let slot = *self.slots.get(&id).ok_or(StoreError::EventNotFound(id))?;
        let effectiveness = if effectiveness.is_finite() {
            effectiveness.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.events[slot]
            .feedback
            .observe(effectiveness, decision_id, now);
        Ok(())
    }

    /// Lengthen an event's pin. Never shortens one, never unpins a permanent one.
    pub fn extend_pin(&mut self, id: EventId, until: DateTime<Utc>) -> StoreResult<PinState> {
        let slot = *self.slots.get(&id).ok_or(StoreError::EventNotFound(id))?;
        let event = &mut self.events[slot];
        event.pinned_until = match event.pinned_until {
            PinState::Permanent => PinState::Permanent,
            PinState::Until(current) if current >= until => PinState::Until(current),
            _ => PinState::Until(until),
        };
        Ok(event.pinned_until)
    }

    /// Feedback aggregated over resident events of one type.
    pub fn outcome_summary(&self, anomaly_type: &str) -> Option<OutcomeSummary> {
        let mut events_with_feedback = 0usize;
        let mut observations = 0u64;
        let mut weighted = 0.0;
        for event in self
            .events
            .iter()
            .filter(|e| e.anomaly_type == anomaly_type && e.feedback.count > 0)
        {
            events_with_feedback += 1;
            observations += u64::from(event.feedback.count);
            weighted += event.feedback.mean_effectiveness * f64::from(event.feedback.count);
        }
        if observations == 0 {
            return None;
        }
        Some(OutcomeSummary {
            anomaly_type: anomaly_type.to_string(),
            events_with_feedback,
            observations,
            mean_effectiveness: weighted / observations as f64,
        })
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let now = self.clock.now();
        let events: Vec<SnapshotEntry> = self
            .events
            .iter()
            .map(|event| SnapshotEntry {
                resonance: score_event(&self.recurrence, &self.params, event, now),
                pinned: event.is_pinned(now),
                event: event.clone(),
            })
            .collect();
        StoreSnapshot {
            taken_at: now,
            max_capacity: self.max_capacity,
            pinned_count: events.iter().filter(|e| e.pinned).count(),
            events,
        }
    }

    fn check_embedding(&self, embedding: &[f32]) -> StoreResult<()> {
        if embedding.len() != self.index.dim() {
            return Err(StoreError::Shape {
                expected: self.index.dim(),
                actual: embedding.len(),
            });
        }
        if let Some(position) = embedding.iter().position(|x| !x.is_finite()) {
            return Err(StoreError::NonFiniteEmbedding { position });
        }
        Ok(())
    }

    fn remove(&mut self, id: &EventId, now: DateTime<Utc>) -> Option<Event> {
        let slot = self.slots.remove(id)?;
        let event = self.events.swap_remove(slot);
        self.index.swap_remove(slot);
        if let Some(moved) = self.events.get(slot) {
            self.slots.insert(moved.id, slot);
        }
        self.recurrence.forget(&event.anomaly_type, id, now);
        Some(event)
    }
}

fn score_event(
    recurrence: &RecurrenceTracker,
    params: &ResonanceParams,
    event: &Event,
    now: DateTime<Utc>,
) -> f64 {
    resonance_at(
        recurrence,
        params,
        &event.anomaly_type,
        event.base_severity,
        event.insertion_time,
        now,
    )
}

/// Resonance decayed from the latest occurrence of the type. An event is
/// never older than its own insertion.
fn resonance_at(
    recurrence: &RecurrenceTracker,
    params: &ResonanceParams,
    anomaly_type: &str,
    base_severity: f64,
    insertion_time: DateTime<Utc>,
    now: DateTime<Utc>,
) -> f64 {
    let last = recurrence
        .last_occurrence(anomaly_type)
        .map_or(insertion_time, |seen| seen.max(insertion_time));
    let n = recurrence.window_count(anomaly_type, now);
    params.resonance(base_severity, n, seconds_between(last, now))
}

/// Shared handle: the decision loop writes, inspectors read snapshots.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<RwLock<AdaptiveStore>>,
}

impl StoreHandle {
    pub fn new(store: AdaptiveStore) -> Self {
        Self {
            inner: Arc::new(RwLock::new(store)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, AdaptiveStore> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, AdaptiveStore> {
        self.inner.write()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.inner.read().snapshot()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StoreHandle").field(&*self.inner.read()).finish()
    }
}
