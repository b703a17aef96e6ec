//! Error types for the controller core.

use thiserror::Error;

/// Result type for controller operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a remote command did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandFailure {
    /// The call exceeded its deadline.
    Timeout,
    /// The request never reached the gateway or the connection broke.
    Transport(String),
    /// The gateway answered with a non-success status.
    Rejected { status: u16, body: String },
}

impl std::fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out"),
            Self::Transport(reason) => write!(f, "transport error: {}", reason),
            Self::Rejected { status, body } if body.is_empty() => {
                write!(f, "rejected with status {}", status)
            }
            Self::Rejected { status, body } => {
                write!(f, "rejected with status {}: {}", status, body)
            }
        }
    }
}

/// Errors that can occur in the controller core.
///
/// Apart from `Configuration`, none of these is fatal: every runtime path
/// logs, counts and continues.
#[derive(Debug, Error)]
pub enum Error {
    /// Reading payload could not be turned into a numeric value.
    #[error("Parse error on topic {topic}: {reason}")]
    Parse { topic: String, reason: String },

    /// No threshold policy exists for the sensor.
    #[error("Unconfigured sensor: {0}")]
    UnconfiguredSensor(String),

    /// Remote actuation or query failed.
    #[error("Command {command} on {device} failed: {failure}")]
    CommandFailed {
        device: String,
        command: String,
        failure: CommandFailure,
    },

    /// Alert or telemetry delivery failed.
    #[error("Emit to {sink} failed: {reason}")]
    EmitFailed { sink: String, reason: String },

    /// An episode is already in flight for the device.
    #[error("Episode already in flight for {0}")]
    RegistryConflict(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The controller has begun shutting down.
    #[error("Controller is shutting down")]
    ShuttingDown,
}

impl Error {
    /// Build a `CommandFailed` error.
    pub fn command_failed(
        device: impl Into<String>,
        command: impl Into<String>,
        failure: CommandFailure,
    ) -> Self {
        Self::CommandFailed {
            device: device.into(),
            command: command.into(),
            failure,
        }
    }

    /// Build an `EmitFailed` error.
    pub fn emit_failed(sink: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EmitFailed {
            sink: sink.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error stems from a call that ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::CommandFailed {
                failure: CommandFailure::Timeout,
                ..
            }
        )
    }
}
