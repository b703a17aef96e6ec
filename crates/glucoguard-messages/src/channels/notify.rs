//! Notification service channel.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tracing::debug;

use glucoguard_core::{AlertRecord, AlertSink};

use crate::notification::{AddNotificationRequest, BaseResponse, NOTIFICATION_PATH};
use crate::{Error, Result};

/// Posts alerts to the notification service.
#[derive(Debug, Clone)]
pub struct NotificationChannel {
    name: String,
    endpoint: Url,
    client: reqwest::Client,
}

impl NotificationChannel {
    /// `service_url` is the service root; the notification path is appended.
    pub fn new(name: impl Into<String>, service_url: &str, timeout: Duration) -> Result<Self> {
        let raw = format!("{}{}", service_url.trim_end_matches('/'), NOTIFICATION_PATH);
        let endpoint = Url::parse(&raw)
            .map_err(|e| Error::InvalidConfiguration(format!("notification URL {}: {}", raw, e)))?;

        Ok(Self {
            name: name.into(),
            endpoint,
            client: super::http_client(timeout)?,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Post one alert and check the per-request status the service reports.
    pub async fn post(&self, record: &AlertRecord) -> Result<()> {
        let request = AddNotificationRequest::from_alert(record);
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&[&request])
            .send()
            .await
            .map_err(|e| Error::SendFailed(format!("Notification request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::SendFailed(format!("Notification response unreadable: {}", e)))?;

        if !status.is_success() {
            return Err(Error::SendFailed(format!(
                "Notification service returned {}: {}",
                status, text
            )));
        }

        // Multi-status bodies carry a code per request.
        if let Ok(results) = serde_json::from_str::<Vec<BaseResponse>>(&text) {
            if let Some(failed) = results.iter().find(|r| r.status_code >= 400) {
                return Err(Error::SendFailed(format!(
                    "Notification rejected with {}: {}",
                    failed.status_code, failed.message
                )));
            }
        }

        debug!(
            channel = %self.name,
            request_id = %request.request_id,
            "Notification accepted"
        );
        Ok(())
    }
}

#[async_trait]
impl AlertSink for NotificationChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_alert(&self, record: &AlertRecord) -> glucoguard_core::Result<()> {
        self.post(record).await.map_err(|e| e.into_core(&self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint() {
        let channel =
            NotificationChannel::new("notifications", "http://edgex-support-notifications:59860/", Duration::from_secs(5))
                .unwrap();
        assert_eq!(
            channel.endpoint().as_str(),
            "http://edgex-support-notifications:59860/api/v3/notification"
        );
    }

    #[test]
    fn test_invalid_url() {
        assert!(NotificationChannel::new("notifications", "not a url", Duration::from_secs(5)).is_err());
    }
}
