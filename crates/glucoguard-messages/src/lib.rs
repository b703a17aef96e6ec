//! Alert and telemetry delivery.
//!
//! ## Features
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `webhook` | yes | HTTP notification and telemetry channels |
//!
//! Channels: notification service, telemetry store, console, memory.

pub mod channels;
pub mod error;
pub mod notification;

pub use channels::{ConsoleChannel, MemoryChannel};

#[cfg(feature = "webhook")]
pub use channels::{HttpTelemetryChannel, NotificationChannel};

pub use error::{Error, Result};
pub use notification::{AddNotificationRequest, Notification, NotificationSeverity};
