//! MQTT reading transport.
//!
//! Connects to the broker, subscribes to every ingress binding topic and
//! hands each publish to [`Ingress::submit`]. Subscriptions are renewed on
//! every connection acknowledgement, so a broker restart does not silently
//! stop the feed.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rumqttc::{AsyncClient, ClientError, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeFilter};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use glucoguard_core::config::MqttConfig;
use glucoguard_core::{Admission, Ingress};

use crate::error::{DeviceError, Result};

/// Consecutive poll errors before the reconnect delay is lengthened.
const MAX_ERRORS: u32 = 5;
const RETRY_DELAY: Duration = Duration::from_secs(1);
const LONG_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Request channel capacity between client and event loop.
const CLIENT_CAPACITY: usize = 10;

pub fn qos_from_level(level: u8) -> Result<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(DeviceError::Configuration(format!("invalid QoS level {}", other))),
    }
}

/// Broker options for a config. An empty client id gets a random suffix.
pub fn mqtt_options(config: &MqttConfig) -> Result<MqttOptions> {
    if config.host.trim().is_empty() {
        return Err(DeviceError::Configuration("MQTT host must not be empty".to_string()));
    }
    let client_id = if config.client_id.trim().is_empty() {
        format!("glucoguard-{}", Uuid::new_v4())
    } else {
        config.client_id.clone()
    };

    let mut options = MqttOptions::new(client_id, &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
    if let (Some(user), Some(pass)) = (&config.username, &config.password) {
        options.set_credentials(user, pass);
    }
    Ok(options)
}

struct Running {
    client: AsyncClient,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Feeds broker publishes into controller ingress.
pub struct MqttTransport {
    config: MqttConfig,
    ingress: Arc<Ingress>,
    running: Mutex<Option<Running>>,
}

impl MqttTransport {
    pub fn new(config: MqttConfig, ingress: Arc<Ingress>) -> Self {
        Self {
            config,
            ingress,
            running: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .map(|r| !r.task.is_finished())
            .unwrap_or(false)
    }

    /// Connect and start delivering readings.
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(DeviceError::AlreadyRunning);
        }

        let options = mqtt_options(&self.config)?;
        let qos = qos_from_level(self.config.qos)?;
        let topics = self.ingress.topics();
        if topics.is_empty() {
            return Err(DeviceError::Configuration("no topics to subscribe to".to_string()));
        }

        let (client, eventloop) = AsyncClient::new(options, CLIENT_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);

        info!(
            broker = %format!("{}:{}", self.config.host, self.config.port),
            topics = ?topics,
            "Starting MQTT transport"
        );

        let task = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            topics,
            qos,
            self.ingress.clone(),
            stop_rx,
        ));

        *running = Some(Running {
            client,
            stop_tx,
            task,
        });
        Ok(())
    }

    /// Disconnect and wait up to `timeout` for the event loop to finish.
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        let Some(running) = self.running.lock().take() else {
            return Ok(());
        };

        running.stop_tx.send_replace(true);
        if let Err(e) = running.client.try_disconnect() {
            debug!(error = %e, "MQTT disconnect request not queued");
        }

        let mut task = running.task;
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(_) => {
                info!("MQTT transport stopped");
                Ok(())
            }
            Err(_) => {
                task.abort();
                Err(DeviceError::Connection("event loop did not stop in time".to_string()))
            }
        }
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topics: Vec<String>,
    qos: QoS,
    ingress: Arc<Ingress>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut error_count = 0u32;

    loop {
        let polled = tokio::select! {
            polled = eventloop.poll() => polled,
            _ = stop_rx.changed() => break,
        };
        if *stop_rx.borrow() {
            break;
        }

        match polled {
            Ok(event) => {
                error_count = 0;
                if is_connack(&event) {
                    info!(topics = topics.len(), "MQTT connected, subscribing");
                    if let Err(e) = subscribe_all(&client, &topics, qos) {
                        error!(topics = ?topics, error = %e, "Failed to subscribe");
                    }
                }
                handle_event(&event, &ingress);
            }
            Err(e) => {
                error_count += 1;
                let delay = if error_count >= MAX_ERRORS {
                    error!(errors = error_count, error = %e, "MQTT connection keeps failing");
                    LONG_RETRY_DELAY
                } else {
                    warn!(attempt = error_count, max = MAX_ERRORS, error = %e, "MQTT connection error");
                    RETRY_DELAY
                };
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = stop_rx.changed() => break,
                }
            }
        }
    }

    debug!("MQTT event loop finished");
}

/// Queue one SUBSCRIBE carrying every topic, so the request channel
/// capacity never limits how many bindings are served.
fn subscribe_all(client: &AsyncClient, topics: &[String], qos: QoS) -> std::result::Result<(), ClientError> {
    client.try_subscribe_many(topics.iter().map(|topic| SubscribeFilter::new(topic.clone(), qos)))
}

fn is_connack(event: &Event) -> bool {
    matches!(event, Event::Incoming(Packet::ConnAck(_)))
}

/// Submit an incoming publish to ingress. Other events are ignored.
pub fn handle_event(event: &Event, ingress: &Ingress) -> Option<Admission> {
    match event {
        Event::Incoming(Packet::Publish(publish)) => {
            let admission = ingress.submit(&publish.topic, &publish.payload);
            if admission != Admission::Accepted {
                debug!(topic = %publish.topic, ?admission, "Publish not admitted");
            }
            Some(admission)
        }
        _ => None,
    }
}
