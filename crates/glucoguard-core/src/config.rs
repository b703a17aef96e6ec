//! Controller configuration.
//!
//! One TOML file describes bindings, rules and endpoints. Every section has
//! defaults, so an empty file yields the stock glucose/insulin setup.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::command::{CommandSpec, DeviceCommand, RetryPolicy};
use crate::controller::{ControllerSettings, OverlapPolicy, ShutdownPolicy};
use crate::emit::AlertTemplate;
use crate::episode::{ActuationPlan, TelemetryMapping};
use crate::error::{Error, Result};
use crate::evaluator::ThresholdEvaluator;
use crate::ingress::{TopicBinding, DEFAULT_CHANNEL_CAPACITY};
use crate::policy::{Comparator, Severity, ThresholdPolicy};

/// Endpoint defaults.
pub mod endpoints {
    pub const MQTT_HOST: &str = "localhost";
    pub const MQTT_PORT: u16 = 1883;
    pub const COMMAND_GATEWAY: &str = "http://localhost:59882";
    pub const NOTIFICATIONS: &str = "http://localhost:59860";
    pub const TELEMETRY: &str = "http://localhost:59880/api/v3/telemetry";
    pub const SERVER_BIND: &str = "127.0.0.1:59780";
}

/// Environment variables that override file settings.
pub mod env_vars {
    pub const MQTT_HOST: &str = "GLUCOGUARD_MQTT_HOST";
    pub const DISPATCH_URL: &str = "GLUCOGUARD_DISPATCH_URL";
    pub const NOTIFICATIONS_URL: &str = "GLUCOGUARD_NOTIFICATIONS_URL";
    pub const TELEMETRY_URL: &str = "GLUCOGUARD_TELEMETRY_URL";
}

/// Upper bound on OFF command attempts, so a stuck actuator cannot hold a
/// cooldown task indefinitely.
pub const MAX_OFF_ATTEMPTS: u32 = 5;

/// Root of the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub ingress: IngressConfig,
    pub mqtt: MqttConfig,
    pub rules: Vec<RuleConfig>,
    pub dispatch: DispatchConfig,
    pub notifications: NotificationsConfig,
    pub telemetry: TelemetryConfig,
    pub controller: ControllerSection,
    pub server: ServerConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            ingress: IngressConfig::default(),
            mqtt: MqttConfig::default(),
            rules: vec![RuleConfig::default()],
            dispatch: DispatchConfig::default(),
            notifications: NotificationsConfig::default(),
            telemetry: TelemetryConfig::default(),
            controller: ControllerSection::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    pub channel_capacity: usize,
    pub bindings: Vec<TopicBinding>,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            bindings: vec![TopicBinding::new("high-glucose", "blood-glucose-monitor", "Uint16")],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    /// 0, 1 or 2
    pub qos: u8,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: endpoints::MQTT_HOST.to_string(),
            port: endpoints::MQTT_PORT,
            client_id: "glucoguard".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 30,
            qos: 1,
        }
    }
}

/// One threshold and the actuation it drives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub sensor: String,
    #[serde(default = "default_comparator")]
    pub comparator: Comparator,
    pub bound: f64,
    #[serde(default = "default_rule_severity")]
    pub severity: Severity,
    pub actuator: String,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_on_command")]
    pub on: CommandSpec,
    #[serde(default = "default_off_command")]
    pub off: CommandSpec,
    #[serde(default)]
    pub follow_up: Vec<DeviceCommand>,
    #[serde(default)]
    pub telemetry: TelemetryMapping,
}

fn default_comparator() -> Comparator {
    Comparator::Gt
}

fn default_rule_severity() -> Severity {
    Severity::Critical
}

fn default_cooldown_secs() -> u64 {
    60
}

fn default_on_command() -> CommandSpec {
    CommandSpec::write_bool("WriteBoolValue", "Bool", true)
}

fn default_off_command() -> CommandSpec {
    CommandSpec::write_bool("WriteBoolValue", "Bool", false)
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            sensor: "Uint16".to_string(),
            comparator: default_comparator(),
            bound: 120.0,
            severity: default_rule_severity(),
            actuator: "insulin-injector".to_string(),
            cooldown_secs: default_cooldown_secs(),
            on: default_on_command(),
            off: default_off_command(),
            follow_up: vec![DeviceCommand::new(
                "blood-glucose-monitor",
                CommandSpec::new("WriteUint16Value")
                    .with_param("Uint16", "91")
                    .with_param("EnableRandomization_Uint16", "false"),
            )],
            telemetry: TelemetryMapping::default(),
        }
    }
}

impl RuleConfig {
    pub fn policy(&self) -> ThresholdPolicy {
        ThresholdPolicy::new(&self.sensor, self.comparator, self.bound).with_severity(self.severity)
    }

    pub fn plan(&self) -> ActuationPlan {
        ActuationPlan {
            device: self.actuator.clone(),
            on_command: self.on.clone(),
            off_command: self.off.clone(),
            cooldown: Duration::from_secs(self.cooldown_secs),
            follow_up: self.follow_up.clone(),
            telemetry: self.telemetry.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Command gateway base URL
    pub base_url: String,
    pub timeout_ms: u64,
    pub off_retry: RetryPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            base_url: endpoints::COMMAND_GATEWAY.to_string(),
            timeout_ms: 5000,
            off_retry: RetryPolicy::default(),
        }
    }
}

impl DispatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Notification service base URL
    pub url: String,
    pub timeout_ms: u64,
    #[serde(flatten)]
    pub alert: AlertTemplate,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            url: endpoints::NOTIFICATIONS.to_string(),
            timeout_ms: 5000,
            alert: AlertTemplate::default(),
        }
    }
}

impl NotificationsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Full endpoint records are POSTed to
    pub url: String,
    pub timeout_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            url: endpoints::TELEMETRY.to_string(),
            timeout_ms: 5000,
        }
    }
}

impl TelemetryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSection {
    pub overlap_policy: OverlapPolicy,
    pub shutdown_grace_secs: u64,
    pub shutdown_policy: ShutdownPolicy,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            overlap_policy: OverlapPolicy::default(),
            shutdown_grace_secs: 90,
            shutdown_policy: ShutdownPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: endpoints::SERVER_BIND.to_string(),
        }
    }
}

impl ControllerConfig {
    /// Parse TOML text. Does not validate.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Read, parse, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Configuration(format!("cannot read {}: {}", path.display(), e)))?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env_overrides();
        config.validate()?;
        info!(path = %path.display(), rules = config.rules.len(), "Configuration loaded");
        Ok(config)
    }

    /// Apply `GLUCOGUARD_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(host) = lookup(env_vars::MQTT_HOST) {
            self.mqtt.host = host;
        }
        if let Some(url) = lookup(env_vars::DISPATCH_URL) {
            self.dispatch.base_url = url;
        }
        if let Some(url) = lookup(env_vars::NOTIFICATIONS_URL) {
            self.notifications.url = url;
        }
        if let Some(url) = lookup(env_vars::TELEMETRY_URL) {
            self.telemetry.url = url;
        }
    }

    /// Reject configurations the controller cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.rules.is_empty() {
            return invalid("at least one [[rules]] entry is required");
        }
        if self.ingress.channel_capacity == 0 {
            return invalid("ingress.channel_capacity must be greater than zero");
        }
        if self.mqtt.qos > 2 {
            return invalid(format!("mqtt.qos must be 0, 1 or 2, got {}", self.mqtt.qos));
        }
        if self.dispatch.timeout_ms == 0 {
            return invalid("dispatch.timeout_ms must be greater than zero");
        }
        let off_attempts = self.dispatch.off_retry.max_attempts;
        if off_attempts == 0 || off_attempts > MAX_OFF_ATTEMPTS {
            return invalid(format!(
                "dispatch.off_retry.max_attempts must be between 1 and {}, got {}",
                MAX_OFF_ATTEMPTS, off_attempts
            ));
        }

        let mut sensors = HashSet::new();
        for rule in &self.rules {
            if rule.sensor.trim().is_empty() {
                return invalid("rule sensor must not be empty");
            }
            if !sensors.insert(rule.sensor.as_str()) {
                return invalid(format!("duplicate rule for sensor {}", rule.sensor));
            }
            if !rule.bound.is_finite() {
                return invalid(format!("rule {} has a non-finite bound", rule.sensor));
            }
            if rule.cooldown_secs == 0 {
                return invalid(format!("rule {} must have a non-zero cooldown", rule.sensor));
            }
            if rule.actuator.trim().is_empty() {
                return invalid(format!("rule {} has no actuator", rule.sensor));
            }
            let commands = [&rule.on, &rule.off]
                .into_iter()
                .chain(rule.follow_up.iter().map(|f| &f.spec));
            for command in commands {
                if command.command_name.trim().is_empty() {
                    return invalid(format!("rule {} has a command without a name", rule.sensor));
                }
            }
            if rule.follow_up.iter().any(|f| f.device.trim().is_empty()) {
                return invalid(format!("rule {} has a follow-up without a device", rule.sensor));
            }
        }

        for binding in &self.ingress.bindings {
            if binding.topic.is_empty() {
                return invalid("ingress binding topic must not be empty");
            }
            if !sensors.contains(binding.sensor.as_str()) {
                warn!(
                    topic = %binding.topic,
                    sensor = %binding.sensor,
                    "Binding references a sensor without a rule; its readings will be ignored"
                );
            }
        }
        Ok(())
    }

    pub fn evaluator(&self) -> ThresholdEvaluator {
        ThresholdEvaluator::new(self.rules.iter().map(RuleConfig::policy))
    }

    /// Actuation plans keyed by the sensor that triggers them.
    pub fn plans(&self) -> Vec<(String, ActuationPlan)> {
        self.rules.iter().map(|r| (r.sensor.clone(), r.plan())).collect()
    }

    pub fn settings(&self) -> ControllerSettings {
        ControllerSettings {
            overlap_policy: self.controller.overlap_policy,
            shutdown_policy: self.controller.shutdown_policy,
            off_retry: self.dispatch.off_retry.clone(),
            alert: self.notifications.alert.clone(),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.controller.shutdown_grace_secs)
    }
}

fn invalid<T>(reason: impl Into<String>) -> Result<T> {
    Err(Error::Configuration(reason.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_file_yields_stock_setup() {
        let config = ControllerConfig::from_toml_str("").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.rules.len(), 1);

        let rule = &config.rules[0];
        assert_eq!(rule.sensor, "Uint16");
        assert_eq!(rule.comparator, Comparator::Gt);
        assert_eq!(rule.bound, 120.0);
        assert_eq!(rule.actuator, "insulin-injector");
        assert_eq!(rule.cooldown_secs, 60);
        assert_eq!(rule.follow_up[0].device, "blood-glucose-monitor");
        assert_eq!(rule.follow_up[0].spec.parameters["Uint16"], "91");

        assert_eq!(config.ingress.bindings[0].topic, "high-glucose");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.server.bind, "127.0.0.1:59780");
        assert_eq!(config.controller.overlap_policy, OverlapPolicy::Suppress);
    }

    #[test]
    fn test_parse_full_file() {
        let text = r#"
            [ingress]
            channel_capacity = 16

            [[ingress.bindings]]
            topic = "sensors/+/glucose"
            device = "monitor"
            sensor = "Glucose"

            [[rules]]
            sensor = "Glucose"
            comparator = ">="
            bound = 180
            severity = "warning"
            actuator = "pump"
            cooldown_secs = 30
            on = { command = "Start", parameters = { Rate = "2" } }
            off = { command = "Stop" }

            [dispatch]
            base_url = "http://gateway:59882"
            timeout_ms = 1500
            off_retry = { max_attempts = 3, backoff_ms = 500 }

            [notifications]
            url = "http://notify:59860"
            sender = "Pump-Controller"

            [controller]
            overlap_policy = "restart"
            shutdown_policy = "compensate_immediately"
            shutdown_grace_secs = 5
        "#;

        let config = ControllerConfig::from_toml_str(text).unwrap();
        config.validate().unwrap();

        let rule = &config.rules[0];
        assert_eq!(rule.comparator, Comparator::Ge);
        assert_eq!(rule.severity, Severity::Warning);
        assert_eq!(rule.on.parameters["Rate"], "2");
        assert!(rule.off.parameters.is_empty());
        assert!(rule.follow_up.is_empty());

        assert_eq!(config.dispatch.timeout(), Duration::from_millis(1500));
        assert_eq!(config.dispatch.off_retry.max_attempts, 3);
        assert_eq!(config.notifications.alert.sender, "Pump-Controller");
        assert_eq!(config.notifications.alert.category, "ALERT");

        let settings = config.settings();
        assert_eq!(settings.overlap_policy, OverlapPolicy::Restart);
        assert_eq!(settings.shutdown_policy, ShutdownPolicy::CompensateImmediately);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));

        let evaluator = config.evaluator();
        assert!(evaluator.policy("Glucose").is_some());
        let plans = config.plans();
        assert_eq!(plans[0].0, "Glucose");
        assert_eq!(plans[0].1.cooldown, Duration::from_secs(30));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = ControllerConfig::default();
        config.rules.clear();
        assert!(config.validate().is_err());

        let mut config = ControllerConfig::default();
        config.rules.push(RuleConfig::default());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));

        let mut config = ControllerConfig::default();
        config.rules[0].cooldown_secs = 0;
        assert!(config.validate().is_err());

        let mut config = ControllerConfig::default();
        config.rules[0].bound = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = ControllerConfig::default();
        config.rules[0].off.command_name = String::new();
        assert!(config.validate().is_err());

        let mut config = ControllerConfig::default();
        config.ingress.channel_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_off_retry_budget_is_bounded() {
        let mut config = ControllerConfig::default();
        config.dispatch.off_retry.max_attempts = MAX_OFF_ATTEMPTS;
        assert!(config.validate().is_ok());

        config.dispatch.off_retry.max_attempts = MAX_OFF_ATTEMPTS + 1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_attempts"));

        config.dispatch.off_retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let config = ControllerConfig::from_toml_str("[dispatch.off_retry]\nmax_attempts = 1000\nbackoff_ms = 10\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_sensor_binding_is_allowed() {
        let mut config = ControllerConfig::default();
        config
            .ingress
            .bindings
            .push(TopicBinding::new("heart", "monitor", "HeartRate"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (env_vars::MQTT_HOST, "broker"),
            (env_vars::DISPATCH_URL, "http://core-command:59882"),
            (env_vars::TELEMETRY_URL, "  "),
        ]
        .into_iter()
        .collect();

        let mut config = ControllerConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.mqtt.host, "broker");
        assert_eq!(config.dispatch.base_url, "http://core-command:59882");
        assert_eq!(config.notifications.url, endpoints::NOTIFICATIONS);
        assert_eq!(config.telemetry.url, endpoints::TELEMETRY);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("glucoguard.toml");
        std::fs::write(&path, "[server]\nbind = \"0.0.0.0:8080\"\n").unwrap();

        let config = ControllerConfig::load(&path).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8080");

        assert!(ControllerConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
