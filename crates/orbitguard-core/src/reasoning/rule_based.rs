//! Table-driven reasoner.
//!
//! Looks the trigger's anomaly type up in a ranked candidate table. The
//! first candidate is chosen, the rest become alternatives. Confidence
//! starts from a configured base and is scaled by how well past responses
//! to recalled events of the same type worked.

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{Reasoner, ReasoningError, ReasoningRequest, ReasoningResponse, ReasoningResult};
use crate::config::ReasoningConfig;
use crate::domain::Action;

pub struct RuleBasedReasoner {
    rules: BTreeMap<String, Vec<String>>,
    base_confidence: f64,
}

impl RuleBasedReasoner {
    pub fn new(rules: BTreeMap<String, Vec<String>>, base_confidence: f64) -> Self {
        Self {
            rules,
            base_confidence,
        }
    }

    pub fn from_config(config: &ReasoningConfig) -> Self {
        Self::new(config.rules.clone(), config.rule_confidence)
    }

    /// Mean effectiveness observed on recalled events of `anomaly_type`,
    /// weighted by observation count.
    fn historical_effectiveness(request: &ReasoningRequest) -> Option<(f64, u32)> {
        let mut observations = 0u32;
        let mut weighted = 0.0;
        for hit in request
            .recalled_events
            .iter()
            .filter(|h| h.event.anomaly_type == request.trigger.anomaly_type)
        {
            let fb = &hit.event.feedback;
            observations = observations.saturating_add(fb.count);
            weighted += fb.mean_effectiveness * f64::from(fb.count);
        }
        (observations > 0).then(|| (weighted / f64::from(observations), observations))
    }
}

#[async_trait]
impl Reasoner for RuleBasedReasoner {
    fn name(&self) -> &str {
        "rule_based"
    }

    async fn reason(&self, request: &ReasoningRequest) -> ReasoningResult<ReasoningResponse> {
        let anomaly_type = &request.trigger.anomaly_type;
        let candidates = self
            .rules
            .get(anomaly_type)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ReasoningError::NoRule {
                anomaly_type: anomaly_type.clone(),
            })?;

        let action = Action::new(candidates[0].as_str());
        let alternatives = candidates[1..].iter().map(|a| Action::new(a.as_str())).collect();

        let (confidence, explanation) = match Self::historical_effectiveness(request) {
            Some((mean, n)) => (
                (self.base_confidence * (0.5 + 0.5 * mean)).clamp(0.0, 1.0),
                format!(
                    "rule for {anomaly_type}; {n} past outcomes on similar events averaged {mean:.2} effectiveness"
                ),
            ),
            None => (
                self.base_confidence,
                format!(
                    "rule for {anomaly_type}; {} similar events recalled, no outcome history",
                    request.recalled_events.len()
                ),
            ),
        };

        Ok(ReasoningResponse {
            action,
            confidence,
            alternatives,
            explanation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Event, TelemetryTrigger};
    use crate::retention::RecalledEvent;
    use approx::assert_relative_eq;
    use chrono::Utc;

    fn reasoner() -> RuleBasedReasoner {
        RuleBasedReasoner::from_config(&ReasoningConfig::default())
    }

    fn recalled(anomaly_type: &str, effectiveness: &[f64]) -> RecalledEvent {
        let mut event = Event::new(Utc::now(), vec![1.0], anomaly_type.into(), 0.5);
        for e in effectiveness {
            event.feedback.observe(*e, None, Utc::now());
        }
        RecalledEvent {
            event,
            similarity: 1.0,
            resonance: 0.5,
            score: 0.5,
        }
    }

    fn request(anomaly_type: &str, recalled_events: Vec<RecalledEvent>) -> ReasoningRequest {
        ReasoningRequest {
            trigger: TelemetryTrigger::new(Utc::now(), 0.9, anomaly_type, vec![1.0]),
            recalled_events,
        }
    }

    #[tokio::test]
    async fn test_picks_first_candidate() {
        let resp = reasoner()
            .reason(&request("thermal_warning", vec![]))
            .await
            .unwrap();
        assert_eq!(resp.action.action_type, "enable_thermal_control");
        assert_eq!(resp.alternatives, vec![Action::new("throttle_payload")]);
        assert_relative_eq!(resp.confidence, 0.7);
    }

    #[tokio::test]
    async fn test_unknown_type_has_no_rule() {
        let err = reasoner()
            .reason(&request("solar_flare", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, ReasoningError::NoRule { .. }));
    }

    #[tokio::test]
    async fn test_history_scales_confidence() {
        let history = vec![
            recalled("power_dip", &[0.0, 0.0]),
            recalled("thermal_warning", &[1.0]),
        ];
        let resp = reasoner()
            .reason(&request("power_dip", history))
            .await
            .unwrap();
        // Only same-type history counts: mean 0.0 halves the base.
        assert_relative_eq!(resp.confidence, 0.35);
        assert!(resp.explanation.contains("2 past outcomes"));
    }
}
