//! Service wiring.
//!
//! Builds the controller and its adapters from configuration, and tears
//! them down in order: ingress first, then the transport, the evaluation
//! worker and finally the controller's pending cooldowns.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use glucoguard_commands::{timed_gateway, GatewayConfig};
use glucoguard_core::{
    spawn_evaluation_worker, AlertSink, Clock, ControllerConfig, ControllerStats, Emitter,
    EpisodeController, Ingress, ShutdownReport, TelemetrySink, TokioClock,
};
use glucoguard_devices::MqttTransport;
use glucoguard_messages::{ConsoleChannel, HttpTelemetryChannel, NotificationChannel};

/// How long the transport gets to disconnect on shutdown.
const TRANSPORT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// A running controller with its adapters.
pub struct Service {
    pub controller: EpisodeController,
    pub ingress: Arc<Ingress>,
    pub stats: Arc<ControllerStats>,
    transport: MqttTransport,
    worker: JoinHandle<()>,
}

impl Service {
    /// Wire everything up and start the transport.
    pub fn start(config: &ControllerConfig) -> Result<Self> {
        let stats = Arc::new(ControllerStats::new());
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());

        let dispatcher = timed_gateway(&GatewayConfig::new(
            &config.dispatch.base_url,
            config.dispatch.timeout(),
        ))
        .context("Failed to create command gateway client")?;

        let emitter = Emitter::new(alert_sink(config)?, telemetry_sink(config)?, stats.clone())
            .with_timeouts(config.notifications.timeout(), config.telemetry.timeout());

        let mut builder = EpisodeController::builder()
            .dispatcher(Arc::new(dispatcher))
            .emitter(emitter)
            .clock(clock.clone())
            .stats(stats.clone())
            .settings(config.settings());
        for (sensor, plan) in config.plans() {
            builder = builder.plan(sensor, plan);
        }
        let controller = builder.build()?;

        let (ingress, rx) = Ingress::new(
            config.ingress.bindings.clone(),
            config.ingress.channel_capacity,
            stats.clone(),
            clock,
        );
        let ingress = Arc::new(ingress);
        let worker = spawn_evaluation_worker(rx, Arc::new(config.evaluator()), controller.clone());

        let transport = MqttTransport::new(config.mqtt.clone(), ingress.clone());
        transport.start().context("Failed to start MQTT transport")?;

        info!(
            rules = config.rules.len(),
            bindings = config.ingress.bindings.len(),
            overlap_policy = ?config.controller.overlap_policy,
            "Controller started"
        );

        Ok(Self {
            controller,
            ingress,
            stats,
            transport,
            worker,
        })
    }

    /// Stop accepting readings and give pending episodes `grace` to finish.
    pub async fn shutdown(self, grace: Duration) -> ShutdownReport {
        self.ingress.close();

        if let Err(e) = self.transport.stop(TRANSPORT_STOP_TIMEOUT).await {
            warn!(error = %e, "MQTT transport did not stop cleanly");
        }
        if let Err(e) = self.worker.await {
            warn!(error = %e, "Evaluation worker ended abnormally");
        }

        let report = self.controller.shutdown(grace).await;
        info!(stats = ?self.stats.snapshot(), "Final counters");
        report
    }
}

fn alert_sink(config: &ControllerConfig) -> Result<Arc<dyn AlertSink>> {
    if config.notifications.url.trim().is_empty() {
        warn!("No notification URL configured, alerts are logged only");
        return Ok(Arc::new(ConsoleChannel::new("console")));
    }
    let channel = NotificationChannel::new(
        "notifications",
        &config.notifications.url,
        config.notifications.timeout(),
    )?;
    Ok(Arc::new(channel))
}

fn telemetry_sink(config: &ControllerConfig) -> Result<Arc<dyn TelemetrySink>> {
    if config.telemetry.url.trim().is_empty() {
        warn!("No telemetry URL configured, telemetry is logged only");
        return Ok(Arc::new(ConsoleChannel::new("console")));
    }
    let channel = HttpTelemetryChannel::new(
        "telemetry",
        &config.telemetry.url,
        config.telemetry.timeout(),
    )?;
    Ok(Arc::new(channel))
}
