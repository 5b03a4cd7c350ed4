//! Eviction candidates ordered without rescoring the whole store.
//!
//! All resident events of one type share the type's amplification and its
//! decay since the last occurrence, so inside a type resonance orders by
//! severity alone. Unpinned events wait in a per-type min-heap keyed by
//! `(severity, insertion_time, id)`; events under a timed pin wait in an
//! expiry queue and move to their type heap once the pin lapses. Picking a
//! victim scores one head per type.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use chrono::{DateTime, Utc};

use crate::domain::{Event, EventId, PinState};

#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate {
    pub severity: f64,
    pub inserted: DateTime<Utc>,
    pub id: EventId,
}

impl Candidate {
    fn of(event: &Event) -> Self {
        Self {
            severity: event.base_severity,
            inserted: event.insertion_time,
            id: event.id,
        }
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.severity
            .total_cmp(&other.severity)
            .then_with(|| self.inserted.cmp(&other.inserted))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// A scored head: the cheapest event of its type right now.
#[derive(Debug, Clone)]
pub(crate) struct Victim {
    pub anomaly_type: String,
    pub candidate: Candidate,
    pub resonance: f64,
}

#[derive(Debug, Default)]
pub(crate) struct EvictionQueue {
    by_type: HashMap<String, BinaryHeap<Reverse<Candidate>>>,
    pinned: BinaryHeap<Reverse<(DateTime<Utc>, EventId)>>,
}

impl EvictionQueue {
    /// Queue a resident event according to its pin at `now`. Permanent
    /// events are never queued.
    pub fn track(&mut self, event: &Event, now: DateTime<Utc>) {
        match event.pinned_until {
            PinState::Permanent => {}
            PinState::Until(until) if now <= until => {
                self.pinned.push(Reverse((until, event.id)));
            }
            _ => self
                .by_type
                .entry(event.anomaly_type.clone())
                .or_default()
                .push(Reverse(Candidate::of(event))),
        }
    }

    /// Move events whose pin lapsed before `now` into their type heap.
    /// Extended pins are queued again under their new expiry.
    pub fn release_expired<'a, F>(&mut self, now: DateTime<Utc>, lookup: F)
    where
        F: Fn(&EventId) -> Option<&'a Event>,
    {
        while let Some(Reverse((until, id))) = self.pinned.peek().copied() {
            if now <= until {
                break;
            }
            self.pinned.pop();
            if let Some(event) = lookup(&id) {
                self.track(event, now);
            }
        }
    }

    /// Lowest-resonance evictable event. `score(anomaly_type, candidate)`
    /// is called once per type head and every call is pushed to `scored`.
    pub fn lowest<'a, F, S>(
        &mut self,
        now: DateTime<Utc>,
        lookup: F,
        score: S,
        scored: &mut Vec<(EventId, f64)>,
    ) -> Option<Victim>
    where
        F: Fn(&EventId) -> Option<&'a Event>,
        S: Fn(&str, &Candidate) -> f64,
    {
        let mut best: Option<Victim> = None;
        for (anomaly_type, heap) in self.by_type.iter_mut() {
            // Drop heads that left the store or were pinned after queueing.
            while let Some(Reverse(head)) = heap.peek().copied() {
                match lookup(&head.id) {
                    None => {
                        heap.pop();
                    }
                    Some(event) if event.is_pinned(now) => {
                        heap.pop();
                        if let PinState::Until(until) = event.pinned_until {
                            self.pinned.push(Reverse((until, head.id)));
                        }
                    }
                    Some(_) => break,
                }
            }
            let Some(Reverse(head)) = heap.peek().copied() else {
                continue;
            };

            let resonance = score(anomaly_type, &head);
            scored.push((head.id, resonance));
            let lower = match &best {
                None => true,
                Some(b) => resonance
                    .total_cmp(&b.resonance)
                    .then_with(|| head.inserted.cmp(&b.candidate.inserted))
                    .then_with(|| head.id.cmp(&b.candidate.id))
                    .is_lt(),
            };
            if lower {
                best = Some(Victim {
                    anomaly_type: anomaly_type.clone(),
                    candidate: head,
                    resonance,
                });
            }
        }
        self.by_type.retain(|_, heap| !heap.is_empty());
        best
    }

    /// Remove the head of `anomaly_type`'s heap after it was chosen.
    pub fn pop(&mut self, anomaly_type: &str) -> Option<Candidate> {
        let heap = self.by_type.get_mut(anomaly_type)?;
        let head = heap.pop().map(|Reverse(c)| c);
        if heap.is_empty() {
            self.by_type.remove(anomaly_type);
        }
        head
    }

    /// Events waiting in type heaps, stale entries included.
    pub fn queued(&self) -> usize {
        self.by_type.values().map(BinaryHeap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn event(anomaly_type: &str, severity: f64, pin: PinState) -> Event {
        let mut e = Event::new(
            DateTime::<Utc>::UNIX_EPOCH,
            vec![1.0, 0.0],
            anomaly_type.to_string(),
            severity,
        );
        e.pinned_until = pin;
        e
    }

    #[test]
    fn test_head_is_lowest_severity_per_type() {
        let now = DateTime::<Utc>::UNIX_EPOCH;
        let events = [
            event("power_dip", 0.4, PinState::Unpinned),
            event("power_dip", 0.2, PinState::Unpinned),
            event("thermal_warning", 0.3, PinState::Unpinned),
        ];
        let mut q = EvictionQueue::default();
        for e in &events {
            q.track(e, now);
        }
        let lookup = |id: &EventId| events.iter().find(|e| e.id == *id);

        let mut scored = Vec::new();
        let victim = q
            .lowest(now, lookup, |_, c| c.severity, &mut scored)
            .unwrap();
        assert_eq!(victim.candidate.id, events[1].id);
        assert_eq!(scored.len(), 2);

        // Amplification on power_dip flips the choice.
        scored.clear();
        let victim = q
            .lowest(
                now,
                lookup,
                |ty, c| if ty == "power_dip" { c.severity * 4.0 } else { c.severity },
                &mut scored,
            )
            .unwrap();
        assert_eq!(victim.candidate.id, events[2].id);
    }

    #[test]
    fn test_pins_release_after_expiry() {
        let t0 = DateTime::<Utc>::UNIX_EPOCH;
        let until = t0 + Duration::hours(1);
        let events = [
            event("power_dip", 0.9, PinState::Until(until)),
            event("hull_breach", 0.1, PinState::Permanent),
        ];
        let mut q = EvictionQueue::default();
        for e in &events {
            q.track(e, t0);
        }
        let lookup = |id: &EventId| events.iter().find(|e| e.id == *id);
        let mut scored = Vec::new();

        q.release_expired(until, lookup);
        assert!(q.lowest(until, lookup, |_, c| c.severity, &mut scored).is_none());

        let later = until + Duration::seconds(1);
        q.release_expired(later, lookup);
        let victim = q.lowest(later, lookup, |_, c| c.severity, &mut scored).unwrap();
        assert_eq!(victim.candidate.id, events[0].id);
        assert_eq!(q.pop("power_dip").map(|c| c.id), Some(events[0].id));
        assert_eq!(q.queued(), 0);
    }
}
