//! Gateway client errors.

use glucoguard_core::CommandFailure;

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Command gateway error types.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Invalid gateway URL: {0}")]
    InvalidUrl(String),

    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Timeout waiting for response")]
    Timeout,

    #[error("Gateway returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl GatewayError {
    /// Convert into the controller's failure classification.
    pub fn into_failure(self) -> CommandFailure {
        match self {
            Self::Timeout => CommandFailure::Timeout,
            Self::Rejected { status, body } => CommandFailure::Rejected { status, body },
            Self::Transport(reason) => CommandFailure::Transport(reason),
            Self::InvalidUrl(reason) => CommandFailure::Transport(reason),
        }
    }

    /// Convert into a controller error for `command` on `device`.
    pub fn into_core(self, device: &str, command: &str) -> glucoguard_core::Error {
        glucoguard_core::Error::command_failed(device, command, self.into_failure())
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(e.to_string())
        }
    }
}
