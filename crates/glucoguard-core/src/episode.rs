//! Actuation episodes.
//!
//! An episode is one actuate-then-compensate cycle for a device:
//! `Idle -> Active -> Compensating -> Idle`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::command::{CommandSpec, DeviceCommand};

/// Episode state for one device. `Idle` is never stored in the registry;
/// an absent entry means idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeState {
    Idle,
    Active,
    Compensating,
}

impl EpisodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Compensating => "compensating",
        }
    }

    /// Whether an episode in this state blocks a new one.
    pub fn is_in_flight(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

impl std::fmt::Display for EpisodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How actuator state changes are reported to the telemetry store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryMapping {
    /// Asset identifier; defaults to the actuator device name
    #[serde(default)]
    pub asset_id: Option<String>,
    /// Resource name reported for the actuator
    #[serde(default = "default_telemetry_sensor")]
    pub sensor_name: String,
    /// Value reported when the actuator is switched on
    #[serde(default = "default_on_value")]
    pub on_value: f64,
    /// Value reported when the actuator is reset
    #[serde(default)]
    pub off_value: f64,
}

fn default_telemetry_sensor() -> String {
    "Bool".to_string()
}

fn default_on_value() -> f64 {
    1.0
}

impl Default for TelemetryMapping {
    fn default() -> Self {
        Self {
            asset_id: None,
            sensor_name: default_telemetry_sensor(),
            on_value: default_on_value(),
            off_value: 0.0,
        }
    }
}

/// What to do when a sensor's threshold is crossed.
#[derive(Debug, Clone, PartialEq)]
pub struct ActuationPlan {
    /// Actuator device the episode is keyed by
    pub device: String,
    pub on_command: CommandSpec,
    pub off_command: CommandSpec,
    pub cooldown: Duration,
    /// Best-effort commands sent to other devices after the ON command
    pub follow_up: Vec<DeviceCommand>,
    pub telemetry: TelemetryMapping,
}

impl ActuationPlan {
    /// The insulin injector plan: `WriteBoolValue` true, then false after
    /// the cooldown.
    pub fn boolean_actuator(device: impl Into<String>, cooldown: Duration) -> Self {
        Self {
            device: device.into(),
            on_command: CommandSpec::write_bool("WriteBoolValue", "Bool", true),
            off_command: CommandSpec::write_bool("WriteBoolValue", "Bool", false),
            cooldown,
            follow_up: Vec::new(),
            telemetry: TelemetryMapping::default(),
        }
    }

    pub fn with_follow_up(mut self, command: DeviceCommand) -> Self {
        self.follow_up.push(command);
        self
    }

    pub fn asset_id(&self) -> &str {
        self.telemetry.asset_id.as_deref().unwrap_or(&self.device)
    }
}

/// Authoritative record of an in-flight episode, owned by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuationEpisode {
    pub id: String,
    pub device: String,
    pub on_command: CommandSpec,
    pub off_command: CommandSpec,
    #[serde(with = "duration_secs")]
    pub cooldown: Duration,
    /// Start of the current cooldown window; moved forward on restart
    pub started_at: DateTime<Utc>,
    pub state: EpisodeState,
    /// Sensor and value that opened the episode
    pub trigger_sensor: String,
    pub trigger_value: f64,
}

impl ActuationEpisode {
    pub fn new(plan: &ActuationPlan, started_at: DateTime<Utc>, trigger_sensor: &str, trigger_value: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            device: plan.device.clone(),
            on_command: plan.on_command.clone(),
            off_command: plan.off_command.clone(),
            cooldown: plan.cooldown,
            started_at,
            state: EpisodeState::Active,
            trigger_sensor: trigger_sensor.to_string(),
            trigger_value,
        }
    }

    /// When the compensating command is due.
    pub fn deadline(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.cooldown)
            .ok()
            .and_then(|cooldown| self.started_at.checked_add_signed(cooldown))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Time left until the deadline, zero if already due.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.deadline() - now).to_std().unwrap_or(Duration::ZERO)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
