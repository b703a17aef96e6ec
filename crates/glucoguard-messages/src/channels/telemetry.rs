//! Telemetry store channel.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tracing::debug;

use glucoguard_core::{TelemetryRecord, TelemetrySink};

use crate::{Error, Result};

/// Posts telemetry records as JSON to a fixed endpoint.
#[derive(Debug, Clone)]
pub struct HttpTelemetryChannel {
    name: String,
    endpoint: Url,
    client: reqwest::Client,
}

impl HttpTelemetryChannel {
    pub fn new(name: impl Into<String>, endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::InvalidConfiguration(format!("telemetry URL {}: {}", endpoint, e)))?;
        Ok(Self {
            name: name.into(),
            endpoint,
            client: super::http_client(timeout)?,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub async fn post(&self, record: &TelemetryRecord) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(record)
            .send()
            .await
            .map_err(|e| Error::SendFailed(format!("Telemetry request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::SendFailed(format!(
                "Telemetry store returned error: {}",
                response.status()
            )));
        }

        debug!(channel = %self.name, asset_id = %record.asset_id, phase = ?record.phase, "Telemetry accepted");
        Ok(())
    }
}

#[async_trait]
impl TelemetrySink for HttpTelemetryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_telemetry(&self, record: &TelemetryRecord) -> glucoguard_core::Result<()> {
        self.post(record).await.map_err(|e| e.into_core(&self.name))
    }
}
