//! Channel tests against in-process notification and telemetry services.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use tokio::sync::Mutex;

use glucoguard_core::{
    AlertRecord, AlertSink, AlertStatus, DispatchOutcome, Severity, TelemetryPhase,
    TelemetryRecord, TelemetrySink,
};
use glucoguard_messages::{ConsoleChannel, HttpTelemetryChannel, MemoryChannel, NotificationChannel};

#[derive(Clone, Default)]
struct Received {
    notifications: Arc<Mutex<Vec<serde_json::Value>>>,
    telemetry: Arc<Mutex<Vec<serde_json::Value>>>,
}

async fn add_notification(
    State(received): State<Received>,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    let request_id = body[0]["requestId"].clone();
    let rejected = body[0]["notification"]["sender"] == "unknown";
    received.notifications.lock().await.push(body);

    let (status_code, message) = if rejected { (400, "invalid sender") } else { (201, "") };
    (
        StatusCode::MULTI_STATUS,
        Json(serde_json::json!([{
            "apiVersion": "v3",
            "requestId": request_id,
            "message": message,
            "statusCode": status_code,
        }])),
    )
}

async fn add_telemetry(State(received): State<Received>, Json(body): Json<serde_json::Value>) -> StatusCode {
    received.telemetry.lock().await.push(body);
    StatusCode::ACCEPTED
}

async fn broken() -> StatusCode {
    StatusCode::SERVICE_UNAVAILABLE
}

async fn start_services() -> (String, Received) {
    let received = Received::default();
    let app = Router::new()
        .route("/api/v3/notification", post(add_notification))
        .route("/telemetry", post(add_telemetry))
        .route("/broken/api/v3/notification", post(broken))
        .with_state(received.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), received)
}

fn alert(sender: &str) -> AlertRecord {
    AlertRecord {
        episode_id: "ep-1".to_string(),
        sender: sender.to_string(),
        category: "ALERT".to_string(),
        severity: Severity::Critical,
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

fn telemetry(phase: TelemetryPhase, value: f64) -> TelemetryRecord {
    TelemetryRecord {
        asset_id: "insulin-injector".to_string(),
        device_name: "insulin-injector".to_string(),
        value,
        sensor_name: "Bool".to_string(),
        phase,
        episode_id: "ep-1".to_string(),
        outcome: DispatchOutcome::Succeeded { attempts: 1 },
        recorded_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_notification_posted_in_service_format() {
    let (base_url, received) = start_services().await;
    let channel = NotificationChannel::new("notifications", &base_url, Duration::from_secs(2)).unwrap();

    channel.send_alert(&alert("Glucose-Monitor-Device")).await.unwrap();

    let bodies = received.notifications.lock().await.clone();
    assert_eq!(bodies.len(), 1);
    let request = &bodies[0][0];
    assert_eq!(request["apiVersion"], "v3");
    assert_eq!(request["notification"]["severity"], "CRITICAL");
    assert_eq!(request["notification"]["content"], "Glucose level - 130");
    assert_eq!(request["notification"]["status"], "NEW");
}

#[tokio::test]
async fn test_notification_rejected_in_multi_status() {
    let (base_url, _received) = start_services().await;
    let channel = NotificationChannel::new("notifications", &base_url, Duration::from_secs(2)).unwrap();

    let err = channel.send_alert(&alert("unknown")).await.unwrap_err();
    assert!(err.to_string().contains("invalid sender"));
}

#[tokio::test]
async fn test_notification_service_error() {
    let (base_url, _received) = start_services().await;
    let channel =
        NotificationChannel::new("notifications", &format!("{}/broken", base_url), Duration::from_secs(2))
            .unwrap();

    let err = channel.send_alert(&alert("Glucose-Monitor-Device")).await.unwrap_err();
    assert!(err.to_string().contains("503"));
}

#[tokio::test]
async fn test_telemetry_posted_as_json() {
    let (base_url, received) = start_services().await;
    let channel =
        HttpTelemetryChannel::new("telemetry", &format!("{}/telemetry", base_url), Duration::from_secs(2))
            .unwrap();

    channel.send_telemetry(&telemetry(TelemetryPhase::On, 1.0)).await.unwrap();
    channel.send_telemetry(&telemetry(TelemetryPhase::Off, 0.0)).await.unwrap();

    let bodies = received.telemetry.lock().await.clone();
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[0]["assetId"], "insulin-injector");
    assert_eq!(bodies[0]["deviceName"], "insulin-injector");
    assert_eq!(bodies[0]["sensorName"], "Bool");
    assert_eq!(bodies[0]["value"], 1.0);
    assert_eq!(bodies[1]["value"], 0.0);
}

#[tokio::test]
async fn test_unreachable_telemetry_store() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let channel =
        HttpTelemetryChannel::new("telemetry", &format!("http://{}/telemetry", addr), Duration::from_secs(2))
            .unwrap();
    let err = channel
        .send_telemetry(&telemetry(TelemetryPhase::On, 1.0))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("telemetry"));
}

#[tokio::test]
async fn test_memory_channel() {
    let channel = MemoryChannel::new("memory");
    channel.send_alert(&alert("Glucose-Monitor-Device")).await.unwrap();
    channel.send_telemetry(&telemetry(TelemetryPhase::On, 1.0)).await.unwrap();

    assert_eq!(channel.alerts().await.len(), 1);
    assert_eq!(channel.telemetry().await.len(), 1);

    channel.clear().await;
    assert!(channel.alerts().await.is_empty());

    // Clones share storage, so the copy handed to an emitter is observable
    let shared = channel.clone();
    shared.send_alert(&alert("Glucose-Monitor-Device")).await.unwrap();
    assert_eq!(channel.alerts().await.len(), 1);
}

#[tokio::test]
async fn test_console_channel() {
    let channel = ConsoleChannel::new("console");
    assert!(channel.send_alert(&alert("Glucose-Monitor-Device")).await.is_ok());
    assert!(channel.send_telemetry(&telemetry(TelemetryPhase::Off, 0.0)).await.is_ok());
}
