//! Error types for the message system.

use thiserror::Error;

/// Result type for message operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when delivering alerts or telemetry.
#[derive(Debug, Error)]
pub enum Error {
    /// Send operation failed.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl Error {
    /// Convert into the controller's emit failure for `sink`.
    pub fn into_core(self, sink: &str) -> glucoguard_core::Error {
        glucoguard_core::Error::emit_failed(sink, self.to_string())
    }
}
