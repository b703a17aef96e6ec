//! Closed-loop actuation core.
//!
//! Provides:
//! - Reading ingress with bounded, non-blocking hand-off
//! - Pure threshold evaluation
//! - The actuation episode state machine and its per-device registry
//! - Ports for command dispatch, alert and telemetry delivery
//! - Configuration loading and validation

pub mod clock;
pub mod command;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod emit;
pub mod episode;
pub mod error;
pub mod evaluator;
pub mod ingress;
pub mod policy;
pub mod reading;
pub mod registry;
pub mod stats;
pub mod tasks;
pub mod worker;

// Re-exports
pub use clock::{Clock, TokioClock};

pub use command::{CommandResponse, CommandSpec, DeviceCommand, DispatchOutcome, RetryPolicy};

pub use config::ControllerConfig;

pub use controller::{
    ControllerSettings, EpisodeController, EpisodeControllerBuilder, OverlapPolicy,
    ShutdownPolicy, ShutdownReport, TriggerOutcome,
};

pub use dispatch::{CommandDispatcher, TimedDispatcher};

pub use emit::{
    AlertRecord, AlertSink, AlertStatus, AlertTemplate, Emitter, TelemetryPhase, TelemetryRecord,
    TelemetrySink,
};

pub use episode::{ActuationEpisode, ActuationPlan, EpisodeState, TelemetryMapping};

pub use error::{CommandFailure, Error, Result};

pub use evaluator::{Decision, DecisionReason, ThresholdEvaluator};

pub use ingress::{Admission, Ingress, TopicBinding};

pub use policy::{Comparator, Severity, ThresholdPolicy};

pub use reading::SensorReading;

pub use registry::{Claim, EpisodeRegistry};

pub use stats::{ControllerStats, StatsSnapshot};

pub use worker::spawn_evaluation_worker;
