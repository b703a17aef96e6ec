//! Threshold policies.

use serde::{Deserialize, Serialize};

/// Comparison applied between a reading value and the configured bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparator {
    /// `value > bound`
    #[serde(alias = ">")]
    Gt,
    /// `value >= bound`
    #[serde(alias = ">=")]
    Ge,
    /// `value < bound`
    #[serde(alias = "<")]
    Lt,
    /// `value <= bound`
    #[serde(alias = "<=")]
    Le,
}

impl Comparator {
    /// Evaluate the comparison. Exact, no tolerance.
    pub fn evaluate(&self, value: f64, bound: f64) -> bool {
        match self {
            Self::Gt => value > bound,
            Self::Ge => value >= bound,
            Self::Lt => value < bound,
            Self::Le => value <= bound,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }
}

impl std::fmt::Display for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity attached to a decision and the alert it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    #[serde(alias = "INFO")]
    Info,
    #[serde(alias = "WARNING", alias = "warn")]
    Warning,
    #[serde(alias = "CRITICAL")]
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intervention threshold for one sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdPolicy {
    /// Sensor the policy applies to
    pub sensor_name: String,
    /// Bound the value is compared against
    pub upper_bound: f64,
    /// Comparison direction
    pub comparator: Comparator,
    /// Severity reported when the policy triggers
    #[serde(default = "default_trigger_severity")]
    pub severity: Severity,
}

fn default_trigger_severity() -> Severity {
    Severity::Critical
}

impl ThresholdPolicy {
    pub fn new(sensor_name: impl Into<String>, comparator: Comparator, upper_bound: f64) -> Self {
        Self {
            sensor_name: sensor_name.into(),
            upper_bound,
            comparator,
            severity: Severity::Critical,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Whether `value` crosses this threshold.
    pub fn is_crossed_by(&self, value: f64) -> bool {
        self.comparator.evaluate(value, self.upper_bound)
    }
}
