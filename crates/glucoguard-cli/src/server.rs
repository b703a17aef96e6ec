//! Status HTTP routes.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;

use glucoguard_core::{ActuationEpisode, EpisodeController, Ingress, StatsSnapshot};

const SERVICE_NAME: &str = "glucoguard";

#[derive(Clone)]
pub struct ServerState {
    pub controller: EpisodeController,
    pub ingress: Arc<Ingress>,
    pub started_at: i64,
}

impl ServerState {
    pub fn new(controller: EpisodeController, ingress: Arc<Ingress>) -> Self {
        Self {
            controller,
            ingress,
            started_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Controller status response.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub status: String,
    pub service: String,
    pub version: &'static str,
    pub uptime: u64,
    pub accepting: bool,
    pub ingress_open: bool,
    pub pending_tasks: usize,
    pub stats: StatsSnapshot,
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/api/v3/ping", get(ping_handler))
        .route("/api/v3/status", get(status_handler))
        .route("/api/v3/episodes", get(episodes_handler))
        .with_state(state)
}

pub async fn ping_handler() -> Json<serde_json::Value> {
    Json(json!({
        "apiVersion": "v3",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "serviceName": SERVICE_NAME,
    }))
}

pub async fn status_handler(State(state): State<ServerState>) -> Json<ControllerStatus> {
    let uptime = chrono::Utc::now().timestamp() - state.started_at;
    let accepting = state.controller.is_accepting();

    Json(ControllerStatus {
        status: if accepting { "running" } else { "stopping" }.to_string(),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION"),
        uptime: uptime.max(0) as u64,
        accepting,
        ingress_open: state.ingress.is_open(),
        pending_tasks: state.controller.pending_tasks(),
        stats: state.controller.stats().snapshot(),
    })
}

/// Episodes currently in flight, one per actuator.
pub async fn episodes_handler(State(state): State<ServerState>) -> Json<Vec<ActuationEpisode>> {
    Json(state.controller.registry().list())
}
