//! Delivery channels for alerts and telemetry.
//!
//! Every channel implements the controller's `AlertSink` and/or
//! `TelemetrySink` ports.

pub mod console;
pub mod memory;

#[cfg(feature = "webhook")]
pub mod notify;

#[cfg(feature = "webhook")]
pub mod telemetry;

pub use console::ConsoleChannel;
pub use memory::MemoryChannel;

#[cfg(feature = "webhook")]
pub use notify::NotificationChannel;

#[cfg(feature = "webhook")]
pub use telemetry::HttpTelemetryChannel;

#[cfg(feature = "webhook")]
pub(crate) fn http_client(timeout: std::time::Duration) -> crate::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| crate::Error::InvalidConfiguration(format!("HTTP client: {}", e)))
}
