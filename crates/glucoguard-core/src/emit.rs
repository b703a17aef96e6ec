//! Alert and telemetry emission.
//!
//! Delivery is advisory. A failed POST is logged and counted but never
//! fails the actuation path that produced the record.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::command::DispatchOutcome;
use crate::error::{Error, Result};
use crate::evaluator::Decision;
use crate::policy::Severity;
use crate::stats::ControllerStats;

/// Notification lifecycle status as understood by the notification service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertStatus {
    #[default]
    New,
    Processed,
    Escalated,
}

/// Alert about a triggered episode. Write-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub episode_id: String,
    pub sender: String,
    pub category: String,
    pub severity: Severity,
    pub content: String,
    pub labels: BTreeSet<String>,
    pub status: AlertStatus,
    pub description: String,
    /// Actuator the episode targets
    pub device: String,
    /// Reading that triggered the episode
    pub reading_device: String,
    pub sensor: String,
    pub value: f64,
    /// Result of the ON command
    pub outcome: DispatchOutcome,
    pub created_at: DateTime<Utc>,
}

/// Which side of an episode a telemetry record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryPhase {
    On,
    Off,
}

/// Live telemetry record for an actuator state change. Write-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub asset_id: String,
    pub device_name: String,
    pub value: f64,
    pub sensor_name: String,
    pub phase: TelemetryPhase,
    pub episode_id: String,
    pub outcome: DispatchOutcome,
    pub recorded_at: DateTime<Utc>,
}

/// Static parts of every alert, taken from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertTemplate {
    pub sender: String,
    pub category: String,
    pub labels: BTreeSet<String>,
    pub description: String,
    /// Content prefix; the reading value is appended
    pub content_prefix: String,
}

impl Default for AlertTemplate {
    fn default() -> Self {
        Self {
            sender: "Glucose-Monitor-Device".to_string(),
            category: "ALERT".to_string(),
            labels: ["glucose", "alert"].iter().map(|s| s.to_string()).collect(),
            description: "High Glucose Level Alert".to_string(),
            content_prefix: "Glucose level - ".to_string(),
        }
    }
}

impl AlertTemplate {
    /// Build the alert for a triggering decision.
    pub fn render(
        &self,
        episode_id: &str,
        device: &str,
        decision: &Decision,
        outcome: DispatchOutcome,
        created_at: DateTime<Utc>,
    ) -> AlertRecord {
        let mut labels = self.labels.clone();
        if !outcome.is_success() {
            labels.insert("actuation-failed".to_string());
        }
        AlertRecord {
            episode_id: episode_id.to_string(),
            sender: self.sender.clone(),
            category: self.category.clone(),
            severity: decision.severity,
            content: format!("{}{}", self.content_prefix, format_value(decision.reading.value)),
            labels,
            status: AlertStatus::New,
            description: self.description.clone(),
            device: device.to_string(),
            reading_device: decision.reading.device_name.clone(),
            sensor: decision.reading.sensor_name.clone(),
            value: decision.reading.value,
            outcome,
            created_at,
        }
    }
}

/// Integral values print without a fractional part (`130`, not `130.0`).
pub fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Destination for alert notifications.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send_alert(&self, record: &AlertRecord) -> Result<()>;
}

/// Destination for telemetry records.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    fn name(&self) -> &str;

    async fn send_telemetry(&self, record: &TelemetryRecord) -> Result<()>;
}

/// Ships alerts and telemetry with per-sink deadlines.
#[derive(Clone)]
pub struct Emitter {
    alerts: Arc<dyn AlertSink>,
    telemetry: Arc<dyn TelemetrySink>,
    alert_timeout: Duration,
    telemetry_timeout: Duration,
    stats: Arc<ControllerStats>,
}

impl Emitter {
    pub fn new(
        alerts: Arc<dyn AlertSink>,
        telemetry: Arc<dyn TelemetrySink>,
        stats: Arc<ControllerStats>,
    ) -> Self {
        Self {
            alerts,
            telemetry,
            alert_timeout: Duration::from_secs(5),
            telemetry_timeout: Duration::from_secs(5),
            stats,
        }
    }

    pub fn with_timeouts(mut self, alert_timeout: Duration, telemetry_timeout: Duration) -> Self {
        self.alert_timeout = alert_timeout;
        self.telemetry_timeout = telemetry_timeout;
        self
    }

    /// Deliver an alert. Errors are returned for inspection only.
    pub async fn emit_alert(&self, record: &AlertRecord) -> Result<()> {
        let sink = self.alerts.name().to_string();
        let result = match tokio::time::timeout(self.alert_timeout, self.alerts.send_alert(record)).await {
            Ok(result) => result,
            Err(_) => Err(Error::emit_failed(&sink, "timed out")),
        };

        match &result {
            Ok(()) => {
                self.stats.alerts_sent.incr();
                debug!(sink = %sink, episode_id = %record.episode_id, "Alert delivered");
            }
            Err(e) => {
                self.stats.alerts_failed.incr();
                warn!(sink = %sink, episode_id = %record.episode_id, error = %e, "Alert delivery failed");
            }
        }
        result
    }

    /// Deliver a telemetry record. Errors are returned for inspection only.
    pub async fn emit_telemetry(&self, record: &TelemetryRecord) -> Result<()> {
        let sink = self.telemetry.name().to_string();
        let result = match tokio::time::timeout(
            self.telemetry_timeout,
            self.telemetry.send_telemetry(record),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::emit_failed(&sink, "timed out")),
        };

        match &result {
            Ok(()) => {
                self.stats.telemetry_sent.incr();
                debug!(
                    sink = %sink,
                    episode_id = %record.episode_id,
                    phase = ?record.phase,
                    "Telemetry delivered"
                );
            }
            Err(e) => {
                self.stats.telemetry_failed.incr();
                warn!(sink = %sink, episode_id = %record.episode_id, error = %e, "Telemetry delivery failed");
            }
        }
        result
    }
}
