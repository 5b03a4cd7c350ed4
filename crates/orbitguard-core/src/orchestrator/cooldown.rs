//! Per-action-type cooldown bookkeeping.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

/// Cooldown state of one action type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionCooldown {
    pub last_dispatch_time: DateTime<Utc>,
    pub cooldown_period: Duration,
}

impl ActionCooldown {
    /// Time left before the next dispatch is allowed; `None` once `now`
    /// reaches `last_dispatch_time + cooldown_period`.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let ready_at = self.last_dispatch_time + self.cooldown_period;
        (now < ready_at).then(|| ready_at - now)
    }
}

#[derive(Debug, Default)]
pub struct CooldownTracker {
    entries: HashMap<String, ActionCooldown>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remaining(&self, action_type: &str, now: DateTime<Utc>) -> Option<Duration> {
        self.entries.get(action_type)?.remaining(now)
    }

    /// Start a cooldown window at `at`.
    pub fn record(&mut self, action_type: &str, cooldown_period: Duration, at: DateTime<Utc>) {
        self.entries.insert(
            action_type.to_string(),
            ActionCooldown {
                last_dispatch_time: at,
                cooldown_period,
            },
        );
    }

    pub fn get(&self, action_type: &str) -> Option<&ActionCooldown> {
        self.entries.get(action_type)
    }
}
