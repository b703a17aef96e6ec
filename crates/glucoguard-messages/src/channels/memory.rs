//! Memory channel (for testing and dry runs).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use glucoguard_core::{AlertRecord, AlertSink, TelemetryRecord, TelemetrySink};

/// In-memory channel that keeps every record it receives.
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    name: String,
    alerts: Arc<Mutex<Vec<AlertRecord>>>,
    telemetry: Arc<Mutex<Vec<TelemetryRecord>>>,
}

impl MemoryChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alerts: Arc::new(Mutex::new(Vec::new())),
            telemetry: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn alerts(&self) -> Vec<AlertRecord> {
        self.alerts.lock().await.clone()
    }

    pub async fn telemetry(&self) -> Vec<TelemetryRecord> {
        self.telemetry.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.alerts.lock().await.clear();
        self.telemetry.lock().await.clear();
    }
}

#[async_trait]
impl AlertSink for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_alert(&self, record: &AlertRecord) -> glucoguard_core::Result<()> {
        self.alerts.lock().await.push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl TelemetrySink for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_telemetry(&self, record: &TelemetryRecord) -> glucoguard_core::Result<()> {
        self.telemetry.lock().await.push(record.clone());
        Ok(())
    }
}
