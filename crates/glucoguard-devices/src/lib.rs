//! Reading transports.
//!
//! Subscribes to the message bus and feeds raw `(topic, payload)` pairs to
//! controller ingress.

pub mod error;
pub mod mqtt;

pub use error::{DeviceError, Result};
pub use mqtt::{handle_event, mqtt_options, qos_from_level, MqttTransport};
