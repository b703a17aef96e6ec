//! Evaluation worker.
//!
//! Drains the ingress channel in arrival order, evaluates each reading and
//! hands triggering decisions to the controller. Actuation runs on its own
//! task so a slow gateway never stalls evaluation.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::controller::EpisodeController;
use crate::evaluator::{DecisionReason, ThresholdEvaluator};
use crate::reading::SensorReading;

/// Spawn the worker. It exits once the ingress side is closed and the
/// channel is drained.
pub fn spawn_evaluation_worker(
    mut rx: mpsc::Receiver<SensorReading>,
    evaluator: Arc<ThresholdEvaluator>,
    controller: EpisodeController,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(policies = evaluator.len(), "Evaluation worker started");
        while let Some(reading) = rx.recv().await {
            let decision = evaluator.evaluate(reading);
            match decision.reason {
                DecisionReason::Unconfigured => controller.stats().unconfigured_sensors.incr(),
                DecisionReason::WithinBounds => {
                    debug!(
                        device = %decision.reading.device_name,
                        value = decision.reading.value,
                        "Reading within bounds"
                    );
                }
                DecisionReason::Crossed => controller.spawn_decision(decision),
            }
        }
        info!("Evaluation worker stopped");
    })
}
