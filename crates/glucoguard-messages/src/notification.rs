//! Notification service wire format.
//!
//! Alerts are posted as a JSON array of add-notification requests, each
//! wrapping one notification.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use glucoguard_core::{AlertRecord, Severity};

/// API version stamped on every request.
pub const API_VERSION: &str = "v3";

/// Path of the notification endpoint, relative to the service URL.
pub const NOTIFICATION_PATH: &str = "/api/v3/notification";

/// Notification severity as the service spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationSeverity {
    Minor,
    Normal,
    Critical,
}

impl From<Severity> for NotificationSeverity {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Info => Self::Minor,
            Severity::Warning => Self::Normal,
            Severity::Critical => Self::Critical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub sender: String,
    pub category: String,
    pub severity: NotificationSeverity,
    pub content: String,
    pub content_type: String,
    pub labels: Vec<String>,
    pub status: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddNotificationRequest {
    pub api_version: String,
    pub request_id: String,
    pub notification: Notification,
}

impl AddNotificationRequest {
    /// Build the request for an alert. The request id is fresh per call.
    pub fn from_alert(alert: &AlertRecord) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            request_id: Uuid::new_v4().to_string(),
            notification: Notification {
                sender: alert.sender.clone(),
                category: alert.category.clone(),
                severity: alert.severity.into(),
                content: alert.content.clone(),
                content_type: "json".to_string(),
                labels: alert.labels.iter().cloned().collect(),
                status: serde_json::to_value(alert.status)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_else(|| "NEW".to_string()),
                description: alert.description.clone(),
            },
        }
    }
}

/// Per-request entry of a multi-status response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseResponse {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub message: String,
    pub status_code: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use glucoguard_core::{AlertStatus, DispatchOutcome};

    fn alert(severity: Severity) -> AlertRecord {
        AlertRecord {
            episode_id: "ep-1".to_string(),
            sender: "Glucose-Monitor-Device".to_string(),
            category: "ALERT".to_string(),
            severity,
            content: "Glucose level - 130".to_string(),
            labels: ["glucose", "alert"].iter().map(|s| s.to_string()).collect(),
            status: AlertStatus::New,
            description: "High Glucose Level Alert".to_string(),
            device: "insulin-injector".to_string(),
            reading_device: "blood-glucose-monitor".to_string(),
            sensor: "Uint16".to_string(),
            value: 130.0,
            outcome: DispatchOutcome::Succeeded { attempts: 1 },
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_wire_shape() {
        let request = AddNotificationRequest::from_alert(&alert(Severity::Critical));
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["apiVersion"], "v3");
        assert!(!json["requestId"].as_str().unwrap().is_empty());

        let notification = &json["notification"];
        assert_eq!(notification["sender"], "Glucose-Monitor-Device");
        assert_eq!(notification["category"], "ALERT");
        assert_eq!(notification["severity"], "CRITICAL");
        assert_eq!(notification["content"], "Glucose level - 130");
        assert_eq!(notification["contentType"], "json");
        assert_eq!(notification["labels"], serde_json::json!(["alert", "glucose"]));
        assert_eq!(notification["status"], "NEW");
        assert_eq!(notification["description"], "High Glucose Level Alert");
    }

    #[test]
    fn test_severity_mapping() {
        assert_eq!(
            NotificationSeverity::from(Severity::Info),
            NotificationSeverity::Minor
        );
        assert_eq!(
            NotificationSeverity::from(Severity::Warning),
            NotificationSeverity::Normal
        );
    }
}
