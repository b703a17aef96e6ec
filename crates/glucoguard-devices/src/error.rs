//! Transport errors.

use thiserror::Error;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, DeviceError>;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transport already running")]
    AlreadyRunning,

    #[error("Connection error: {0}")]
    Connection(String),
}
