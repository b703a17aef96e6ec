//! Command gateway client.
//!
//! Provides the HTTP implementation of the controller's command dispatch
//! port: set commands for actuation and get commands for queries.

pub mod error;
pub mod gateway;

use std::time::Duration;

use glucoguard_core::TimedDispatcher;

// Re-exports
pub use error::{GatewayError, Result};
pub use gateway::{GatewayConfig, HttpCommandGateway};

/// Gateway client wrapped with a hard per-call deadline.
pub fn timed_gateway(config: &GatewayConfig) -> Result<TimedDispatcher<HttpCommandGateway>> {
    let gateway = HttpCommandGateway::new(config)?;
    Ok(TimedDispatcher::new(
        gateway,
        Duration::from_millis(config.timeout_ms),
    ))
}
