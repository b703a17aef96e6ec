//! Threshold evaluation.
//!
//! Every reading is judged on its own. There is no hysteresis here: keeping
//! repeated triggers from starting repeated episodes is the controller's job.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::error::Error;
use crate::policy::{Severity, ThresholdPolicy};
use crate::reading::SensorReading;

/// Why a decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// The reading crossed the configured bound.
    Crossed,
    /// The reading stayed on the safe side of the bound.
    WithinBounds,
    /// No policy exists for the reading's sensor.
    Unconfigured,
}

/// Outcome of evaluating one reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub trigger: bool,
    pub reading: SensorReading,
    pub severity: Severity,
    pub reason: DecisionReason,
}

/// Evaluate a reading against an optional policy.
pub fn evaluate(reading: SensorReading, policy: Option<&ThresholdPolicy>) -> Decision {
    match policy {
        None => Decision {
            trigger: false,
            reading,
            severity: Severity::Info,
            reason: DecisionReason::Unconfigured,
        },
        Some(policy) if policy.is_crossed_by(reading.value) => Decision {
            trigger: true,
            reading,
            severity: policy.severity,
            reason: DecisionReason::Crossed,
        },
        Some(_) => Decision {
            trigger: false,
            reading,
            severity: Severity::Info,
            reason: DecisionReason::WithinBounds,
        },
    }
}

/// Policy table keyed by sensor name, read-only after construction.
#[derive(Debug, Clone, Default)]
pub struct ThresholdEvaluator {
    policies: HashMap<String, ThresholdPolicy>,
}

impl ThresholdEvaluator {
    pub fn new(policies: impl IntoIterator<Item = ThresholdPolicy>) -> Self {
        Self {
            policies: policies
                .into_iter()
                .map(|p| (p.sensor_name.clone(), p))
                .collect(),
        }
    }

    pub fn policy(&self, sensor_name: &str) -> Option<&ThresholdPolicy> {
        self.policies.get(sensor_name)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn evaluate(&self, reading: SensorReading) -> Decision {
        let policy = self.policies.get(&reading.sensor_name);
        let decision = evaluate(reading, policy);
        if decision.reason == DecisionReason::Unconfigured {
            debug!(
                device = %decision.reading.device_name,
                "{}",
                Error::UnconfiguredSensor(decision.reading.sensor_name.clone())
            );
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Comparator;
    use chrono::Utc;

    fn reading(sensor: &str, value: f64) -> SensorReading {
        SensorReading::new("blood-glucose-monitor", sensor, value, Utc::now())
    }

    #[test]
    fn test_high_glucose_triggers_critical() {
        let evaluator = ThresholdEvaluator::new([ThresholdPolicy::new("Uint16", Comparator::Gt, 120.0)]);

        let decision = evaluator.evaluate(reading("Uint16", 130.0));
        assert!(decision.trigger);
        assert_eq!(decision.severity, Severity::Critical);
        assert_eq!(decision.reason, DecisionReason::Crossed);
    }

    #[test]
    fn test_normal_glucose_does_not_trigger() {
        let evaluator = ThresholdEvaluator::new([ThresholdPolicy::new("Uint16", Comparator::Gt, 120.0)]);

        let decision = evaluator.evaluate(reading("Uint16", 90.0));
        assert!(!decision.trigger);
        assert_eq!(decision.severity, Severity::Info);
        assert_eq!(decision.reason, DecisionReason::WithinBounds);

        // Exactly on the bound does not cross a strict comparator
        assert!(!evaluator.evaluate(reading("Uint16", 120.0)).trigger);
    }

    #[test]
    fn test_unconfigured_sensor() {
        let evaluator = ThresholdEvaluator::new([ThresholdPolicy::new("Uint16", Comparator::Gt, 120.0)]);

        let decision = evaluator.evaluate(reading("Float32", 500.0));
        assert!(!decision.trigger);
        assert_eq!(decision.reason, DecisionReason::Unconfigured);
    }

    #[test]
    fn test_low_bound_policy_with_warning() {
        let policy = ThresholdPolicy::new("Uint16", Comparator::Le, 70.0).with_severity(Severity::Warning);
        let decision = evaluate(reading("Uint16", 65.0), Some(&policy));
        assert!(decision.trigger);
        assert_eq!(decision.severity, Severity::Warning);
    }

    #[test]
    fn test_evaluation_is_independent_per_reading() {
        let evaluator = ThresholdEvaluator::new([ThresholdPolicy::new("Uint16", Comparator::Gt, 120.0)]);
        let values = [130.0, 90.0, 131.0, 121.0, 50.0];
        let triggers: Vec<bool> = values
            .iter()
            .map(|v| evaluator.evaluate(reading("Uint16", *v)).trigger)
            .collect();
        assert_eq!(triggers, vec![true, false, true, true, false]);
    }
}
