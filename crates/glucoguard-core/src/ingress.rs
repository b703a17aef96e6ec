//! Reading ingress.
//!
//! Normalizes `(topic, payload)` pairs from the message bus into
//! [`SensorReading`]s and hands them to the evaluation worker through a
//! bounded channel. Ingress never blocks the transport: when the channel
//! is full the newest reading is dropped and counted.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::clock::Clock;
use crate::reading::{parse_value, SensorReading};
use crate::stats::ControllerStats;

/// Default capacity of the ingress channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Maps a bus topic filter to the device and sensor its payloads describe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicBinding {
    /// Topic filter; `+` matches one level, a trailing `#` matches the rest
    pub topic: String,
    pub device: String,
    pub sensor: String,
}

impl TopicBinding {
    pub fn new(topic: impl Into<String>, device: impl Into<String>, sensor: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            device: device.into(),
            sensor: sensor.into(),
        }
    }

    pub fn matches(&self, topic: &str) -> bool {
        topic_matches(&self.topic, topic)
    }
}

/// MQTT-style topic filter matching.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// What ingress did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Reading queued for evaluation.
    Accepted,
    /// Payload was not a number.
    ParseFailed,
    /// No binding matches the topic.
    Unroutable,
    /// Channel full; the reading was dropped.
    Backpressure,
    /// Ingress is closed.
    Rejected,
}

/// Entry point for raw bus messages.
pub struct Ingress {
    bindings: Vec<TopicBinding>,
    tx: Mutex<Option<mpsc::Sender<SensorReading>>>,
    stats: Arc<ControllerStats>,
    clock: Arc<dyn Clock>,
}

impl Ingress {
    /// Create ingress and the receiving end for the evaluation worker.
    pub fn new(
        bindings: Vec<TopicBinding>,
        capacity: usize,
        stats: Arc<ControllerStats>,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::Receiver<SensorReading>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                bindings,
                tx: Mutex::new(Some(tx)),
                stats,
                clock,
            },
            rx,
        )
    }

    pub fn bindings(&self) -> &[TopicBinding] {
        &self.bindings
    }

    /// Distinct topic filters to subscribe to.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.bindings.iter().map(|b| b.topic.clone()).collect();
        topics.sort();
        topics.dedup();
        topics
    }

    pub fn is_open(&self) -> bool {
        self.tx.lock().is_some()
    }

    /// Stop accepting readings. Readings already queued are still delivered.
    pub fn close(&self) {
        if self.tx.lock().take().is_some() {
            debug!("Ingress closed");
        }
    }

    /// Normalize one bus message and queue it. Never blocks.
    pub fn submit(&self, topic: &str, payload: &[u8]) -> Admission {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            self.stats.rejected_after_shutdown.incr();
            trace!(topic, "Reading rejected, ingress closed");
            return Admission::Rejected;
        };

        let Some(binding) = self.bindings.iter().find(|b| b.matches(topic)) else {
            self.stats.unroutable_topics.incr();
            debug!(topic, "No binding for topic");
            return Admission::Unroutable;
        };

        let value = match parse_value(topic, payload) {
            Ok(value) => value,
            Err(e) => {
                self.stats.parse_errors.incr();
                warn!(device = %binding.device, "Dropping reading: {}", e);
                return Admission::ParseFailed;
            }
        };

        let reading = SensorReading::new(&binding.device, &binding.sensor, value, self.clock.now());
        match tx.try_send(reading) {
            Ok(()) => {
                self.stats.readings_accepted.incr();
                trace!(topic, device = %binding.device, value, "Reading queued");
                Admission::Accepted
            }
            Err(mpsc::error::TrySendError::Full(reading)) => {
                self.stats.backpressure_drops.incr();
                warn!(
                    device = %reading.device_name,
                    value = reading.value,
                    "Ingress channel full, dropping newest reading"
                );
                Admission::Backpressure
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.rejected_after_shutdown.incr();
                Admission::Rejected
            }
        }
    }
}
