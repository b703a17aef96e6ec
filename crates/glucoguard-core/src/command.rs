//! Command data structures.
//!
//! Defines the actuation commands sent to remote devices and the outcome of
//! sending them.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CommandFailure;

/// A named command with string parameters, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Command name on the device (e.g. `WriteBoolValue`)
    #[serde(rename = "command")]
    pub command_name: String,
    /// Resource values written by the command
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(command_name: impl Into<String>) -> Self {
        Self {
            command_name: command_name.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Add a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Write a boolean resource with randomization pinned off.
    pub fn write_bool(command_name: impl Into<String>, resource: &str, value: bool) -> Self {
        Self::new(command_name)
            .with_param(resource, value.to_string())
            .with_param(format!("EnableRandomization_{}", resource), "false")
    }
}

/// A command addressed to a specific device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCommand {
    pub device: String,
    #[serde(flatten)]
    pub spec: CommandSpec,
}

impl DeviceCommand {
    pub fn new(device: impl Into<String>, spec: CommandSpec) -> Self {
        Self {
            device: device.into(),
            spec,
        }
    }
}

/// Opaque gateway response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// HTTP-style status code reported by the gateway
    pub status: u16,
    /// Response body, parsed as JSON when possible
    pub body: serde_json::Value,
}

impl CommandResponse {
    pub fn ok() -> Self {
        Self {
            status: 200,
            body: serde_json::Value::Null,
        }
    }

    pub fn with_body(status: u16, body: serde_json::Value) -> Self {
        Self { status, body }
    }
}

/// Outcome of dispatching a command, as recorded on alerts and telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Gateway accepted the command.
    Succeeded { attempts: u32 },
    /// Every attempt failed; `reason` describes the last failure.
    Failed { attempts: u32, reason: String },
    /// The command was not sent (e.g. shutdown before the cooldown fired).
    NotSent,
}

impl DispatchOutcome {
    pub fn failed(attempts: u32, failure: &CommandFailure) -> Self {
        Self::Failed {
            attempts,
            reason: failure.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
            Self::NotSent => "not_sent",
        }
    }
}

/// Bounded retry budget for a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds
    pub backoff_ms: u64,
    /// Multiplier applied to the delay for each further retry
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff_ms: 2000,
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay to wait before `attempt` (1-based; attempt 1 has no delay).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = self.backoff_multiplier.max(1.0).powi(attempt.saturating_sub(2) as i32);
        Duration::from_millis((self.backoff_ms as f64 * factor) as u64)
    }
}
