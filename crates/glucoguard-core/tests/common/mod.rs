//! Common test utilities for controller tests.
//!
//! Fakes record every call so tests can assert on exact command sequences.
//! All harnesses expect a paused tokio runtime.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use glucoguard_core::{
    ActuationPlan, AlertRecord, AlertSink, Clock, CommandDispatcher, CommandFailure,
    CommandResponse, CommandSpec, ControllerSettings, ControllerStats, Decision, Emitter,
    EpisodeController, Error, Result, SensorReading, TelemetryRecord, TelemetrySink,
    ThresholdEvaluator, ThresholdPolicy, TimedDispatcher, TokioClock,
};

pub const MONITOR: &str = "blood-glucose-monitor";
pub const INJECTOR: &str = "insulin-injector";
pub const SENSOR: &str = "Uint16";
pub const COOLDOWN: Duration = Duration::from_secs(60);
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
pub const EMIT_TIMEOUT: Duration = Duration::from_secs(3);

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
}

/// One issued command.
#[derive(Debug, Clone)]
pub struct IssuedCommand {
    pub device: String,
    pub spec: CommandSpec,
    pub at: tokio::time::Instant,
}

impl IssuedCommand {
    pub fn bool_value(&self) -> Option<&str> {
        self.spec.parameters.get("Bool").map(String::as_str)
    }
}

/// Dispatcher that records calls and can hang or fail on demand.
#[derive(Default)]
pub struct RecordingDispatcher {
    calls: Mutex<Vec<IssuedCommand>>,
    hang_next_on: AtomicBool,
    off_failures: AtomicU32,
}

impl RecordingDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next ON command never answer.
    pub fn hang_next_on(&self) {
        self.hang_next_on.store(true, Ordering::SeqCst);
    }

    /// Reject the next `n` OFF commands.
    pub fn fail_off(&self, n: u32) {
        self.off_failures.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<IssuedCommand> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, device: &str, value: &str) -> Vec<IssuedCommand> {
        self.calls()
            .into_iter()
            .filter(|c| c.device == device && c.bool_value() == Some(value))
            .collect()
    }

    pub fn on_count(&self, device: &str) -> usize {
        self.calls_to(device, "true").len()
    }

    pub fn off_count(&self, device: &str) -> usize {
        self.calls_to(device, "false").len()
    }
}

#[async_trait]
impl CommandDispatcher for RecordingDispatcher {
    async fn issue(&self, device: &str, command: &CommandSpec) -> Result<CommandResponse> {
        self.calls.lock().push(IssuedCommand {
            device: device.to_string(),
            spec: command.clone(),
            at: tokio::time::Instant::now(),
        });

        match command.parameters.get("Bool").map(String::as_str) {
            Some("true") if self.hang_next_on.swap(false, Ordering::SeqCst) => {
                std::future::pending::<()>().await;
                Ok(CommandResponse::ok())
            }
            Some("false") => {
                let left = self.off_failures.load(Ordering::SeqCst);
                if left > 0 {
                    self.off_failures.store(left - 1, Ordering::SeqCst);
                    return Err(Error::command_failed(
                        device,
                        &command.command_name,
                        CommandFailure::Rejected {
                            status: 503,
                            body: "device busy".to_string(),
                        },
                    ));
                }
                Ok(CommandResponse::ok())
            }
            _ => Ok(CommandResponse::ok()),
        }
    }

    async fn query(&self, _device: &str, _command_name: &str) -> Result<CommandResponse> {
        Ok(CommandResponse::with_body(200, serde_json::json!({ "value": "91" })))
    }
}

/// Alert and telemetry sink that keeps what it receives.
#[derive(Default)]
pub struct RecordingSink {
    alerts: Mutex<Vec<AlertRecord>>,
    telemetry: Mutex<Vec<TelemetryRecord>>,
    failing: AtomicBool,
    hang_alerts: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make every alert delivery wait forever.
    pub fn hang_alerts(&self) {
        self.hang_alerts.store(true, Ordering::SeqCst);
    }

    pub fn alerts(&self) -> Vec<AlertRecord> {
        self.alerts.lock().clone()
    }

    pub fn telemetry(&self) -> Vec<TelemetryRecord> {
        self.telemetry.lock().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send_alert(&self, record: &AlertRecord) -> Result<()> {
        if self.hang_alerts.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::emit_failed("recording", "connection refused"));
        }
        self.alerts.lock().push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl TelemetrySink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send_telemetry(&self, record: &TelemetryRecord) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::emit_failed("recording", "connection refused"));
        }
        self.telemetry.lock().push(record.clone());
        Ok(())
    }
}

/// A wired controller plus handles on its fakes.
pub struct Harness {
    pub controller: EpisodeController,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub sink: Arc<RecordingSink>,
    pub stats: Arc<ControllerStats>,
    pub clock: Arc<TokioClock>,
    pub evaluator: ThresholdEvaluator,
}

impl Harness {
    pub fn new(settings: ControllerSettings) -> Self {
        Self::with_plans(
            settings,
            vec![(SENSOR, ActuationPlan::boolean_actuator(INJECTOR, COOLDOWN))],
        )
    }

    pub fn with_plans(settings: ControllerSettings, plans: Vec<(&str, ActuationPlan)>) -> Self {
        let dispatcher = RecordingDispatcher::new();
        let sink = RecordingSink::new();
        let stats = Arc::new(ControllerStats::new());
        let clock = Arc::new(TokioClock::anchored_at(epoch()));

        let evaluator = ThresholdEvaluator::new(
            plans
                .iter()
                .map(|(sensor, _)| ThresholdPolicy::new(*sensor, glucoguard_core::Comparator::Gt, 120.0)),
        );

        let timed: Arc<dyn CommandDispatcher> =
            Arc::new(TimedDispatcher::new(dispatcher.clone(), COMMAND_TIMEOUT));
        let emitter = Emitter::new(sink.clone(), sink.clone(), stats.clone())
            .with_timeouts(EMIT_TIMEOUT, EMIT_TIMEOUT);

        let mut builder = EpisodeController::builder()
            .dispatcher(timed)
            .emitter(emitter)
            .clock(clock.clone())
            .stats(stats.clone())
            .settings(settings);
        for (sensor, plan) in plans {
            builder = builder.plan(sensor, plan);
        }

        Self {
            controller: builder.build().unwrap(),
            dispatcher,
            sink,
            stats,
            clock,
            evaluator,
        }
    }

    /// Evaluate a reading from the glucose monitor.
    pub fn decide(&self, value: f64) -> Decision {
        self.decide_for(SENSOR, value)
    }

    pub fn decide_for(&self, sensor: &str, value: f64) -> Decision {
        self.evaluator
            .evaluate(SensorReading::new(MONITOR, sensor, value, self.clock.now()))
    }
}

/// Advance paused time, letting every due timer run.
pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
}
