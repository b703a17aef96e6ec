//! Controller counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Monotonic event counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters shared by ingress, controller and emitter.
#[derive(Debug, Default)]
pub struct ControllerStats {
    pub readings_accepted: Counter,
    pub parse_errors: Counter,
    pub unroutable_topics: Counter,
    pub backpressure_drops: Counter,
    pub rejected_after_shutdown: Counter,
    pub unconfigured_sensors: Counter,
    pub triggers: Counter,
    pub suppressed_triggers: Counter,
    pub episodes_started: Counter,
    pub episodes_restarted: Counter,
    pub episodes_completed: Counter,
    pub commands_sent: Counter,
    pub commands_failed: Counter,
    pub off_retries: Counter,
    pub alerts_sent: Counter,
    pub alerts_failed: Counter,
    pub telemetry_sent: Counter,
    pub telemetry_failed: Counter,
    pub incomplete_episodes: Counter,
}

impl ControllerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            readings_accepted: self.readings_accepted.get(),
            parse_errors: self.parse_errors.get(),
            unroutable_topics: self.unroutable_topics.get(),
            backpressure_drops: self.backpressure_drops.get(),
            rejected_after_shutdown: self.rejected_after_shutdown.get(),
            unconfigured_sensors: self.unconfigured_sensors.get(),
            triggers: self.triggers.get(),
            suppressed_triggers: self.suppressed_triggers.get(),
            episodes_started: self.episodes_started.get(),
            episodes_restarted: self.episodes_restarted.get(),
            episodes_completed: self.episodes_completed.get(),
            commands_sent: self.commands_sent.get(),
            commands_failed: self.commands_failed.get(),
            off_retries: self.off_retries.get(),
            alerts_sent: self.alerts_sent.get(),
            alerts_failed: self.alerts_failed.get(),
            telemetry_sent: self.telemetry_sent.get(),
            telemetry_failed: self.telemetry_failed.get(),
            incomplete_episodes: self.incomplete_episodes.get(),
        }
    }
}

/// Point-in-time copy of [`ControllerStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub readings_accepted: u64,
    pub parse_errors: u64,
    pub unroutable_topics: u64,
    pub backpressure_drops: u64,
    pub rejected_after_shutdown: u64,
    pub unconfigured_sensors: u64,
    pub triggers: u64,
    pub suppressed_triggers: u64,
    pub episodes_started: u64,
    pub episodes_restarted: u64,
    pub episodes_completed: u64,
    pub commands_sent: u64,
    pub commands_failed: u64,
    pub off_retries: u64,
    pub alerts_sent: u64,
    pub alerts_failed: u64,
    pub telemetry_sent: u64,
    pub telemetry_failed: u64,
    pub incomplete_episodes: u64,
}
