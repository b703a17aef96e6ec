//! Console channel.

use async_trait::async_trait;
use tracing::{info, warn};

use glucoguard_core::{AlertRecord, AlertSink, TelemetryRecord, TelemetrySink};

/// Logs alerts and telemetry instead of posting them.
#[derive(Debug, Clone)]
pub struct ConsoleChannel {
    name: String,
}

impl ConsoleChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl AlertSink for ConsoleChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_alert(&self, record: &AlertRecord) -> glucoguard_core::Result<()> {
        if record.outcome.is_success() {
            info!(
                channel = %self.name,
                severity = %record.severity,
                device = %record.device,
                episode_id = %record.episode_id,
                "{}", record.content
            );
        } else {
            warn!(
                channel = %self.name,
                severity = %record.severity,
                device = %record.device,
                episode_id = %record.episode_id,
                outcome = record.outcome.as_str(),
                "{}", record.content
            );
        }
        Ok(())
    }
}

#[async_trait]
impl TelemetrySink for ConsoleChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_telemetry(&self, record: &TelemetryRecord) -> glucoguard_core::Result<()> {
        info!(
            channel = %self.name,
            asset_id = %record.asset_id,
            sensor = %record.sensor_name,
            value = record.value,
            phase = ?record.phase,
            "Telemetry"
        );
        Ok(())
    }
}
