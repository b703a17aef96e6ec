//! Sensor readings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single normalized measurement, immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Device that reported the value (e.g. `blood-glucose-monitor`)
    pub device_name: String,
    /// Resource/sensor name on that device (e.g. `Uint16`)
    pub sensor_name: String,
    /// Measured value
    pub value: f64,
    /// When the reading was observed by ingress
    pub observed_at: DateTime<Utc>,
}

impl SensorReading {
    pub fn new(
        device_name: impl Into<String>,
        sensor_name: impl Into<String>,
        value: f64,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            device_name: device_name.into(),
            sensor_name: sensor_name.into(),
            value,
            observed_at,
        }
    }
}

/// Parse a raw bus payload from `topic` into a numeric reading value.
///
/// Accepts a UTF-8 numeric string (`"130"`, `" 98.5\n"`) or a bare JSON
/// number. Non-finite values are rejected.
pub fn parse_value(topic: &str, payload: &[u8]) -> Result<f64> {
    parse_number(payload).map_err(|reason| Error::Parse {
        topic: topic.to_string(),
        reason,
    })
}

fn parse_number(payload: &[u8]) -> std::result::Result<f64, String> {
    let text = std::str::from_utf8(payload).map_err(|e| format!("payload is not UTF-8: {}", e))?;
    let text = text.trim();
    if text.is_empty() {
        return Err("empty payload".to_string());
    }

    let value = match text.parse::<f64>() {
        Ok(v) => v,
        Err(_) => match serde_json::from_str::<serde_json::Value>(text) {
            Ok(serde_json::Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| format!("number out of range: {}", text))?,
            Ok(serde_json::Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("not a number: {:?}", s))?,
            _ => return Err(format!("not a number: {:?}", truncate(text, 32))),
        },
    };

    if !value.is_finite() {
        return Err(format!("non-finite value: {}", text));
    }
    Ok(value)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
