//! Actuation episode controller.
//!
//! Turns triggering decisions into episodes: issue the ON command, arm a
//! one-shot cooldown, then issue the compensating OFF command and return
//! the device to idle. Alerts and telemetry go out whatever the command
//! outcome.
//!
//! ```text
//! trigger ──► claim ──────► ON ──► arm cooldown ──► alert + ON telemetry
//!                │                      │
//!           in flight?             deadline reached
//!                │                      ▼
//!         suppress / restart     Compensating ──► OFF (bounded retry)
//!                                       ▼
//!                                clear ──► OFF telemetry
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, TokioClock};
use crate::command::{CommandSpec, DispatchOutcome, RetryPolicy};
use crate::dispatch::CommandDispatcher;
use crate::emit::{AlertTemplate, Emitter, TelemetryPhase, TelemetryRecord};
use crate::episode::{ActuationEpisode, ActuationPlan, EpisodeState};
use crate::error::{Error, Result};
use crate::evaluator::Decision;
use crate::registry::{Claim, CooldownCheck, EpisodeRegistry};
use crate::stats::ControllerStats;
use crate::tasks::TaskTracker;

/// What to do with a trigger for a device whose episode is still active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Drop the trigger and count it.
    #[default]
    Suppress,
    /// Re-issue the ON command and restart the cooldown from now.
    Restart,
}

/// How pending cooldowns behave once shutdown begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Let timers fire at their deadline if it falls inside the grace period.
    #[default]
    WaitForCooldown,
    /// Fire every pending timer at once.
    CompensateImmediately,
}

/// Controller behavior knobs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerSettings {
    pub overlap_policy: OverlapPolicy,
    pub shutdown_policy: ShutdownPolicy,
    /// Retry budget for the compensating command
    pub off_retry: RetryPolicy,
    pub alert: AlertTemplate,
}

/// What the controller did with a decision.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    /// Decision did not trigger.
    Ignored,
    /// Controller is shutting down.
    Rejected,
    /// Triggering sensor has no actuation plan.
    Unplanned,
    /// A new episode was started.
    Started {
        episode_id: String,
        on_outcome: DispatchOutcome,
    },
    /// An active episode's cooldown was restarted.
    Restarted {
        episode_id: String,
        on_outcome: DispatchOutcome,
    },
    /// An episode was already in flight; nothing was sent.
    Suppressed { state: EpisodeState },
}

/// Result of [`EpisodeController::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShutdownReport {
    /// Timer tasks that finished inside the grace period
    pub completed_tasks: usize,
    /// Timer tasks aborted when the grace period ran out
    pub aborted_tasks: usize,
    /// Episodes still registered (OFF never confirmed)
    pub incomplete: Vec<ActuationEpisode>,
}

struct Inner {
    plans: HashMap<String, Arc<ActuationPlan>>,
    registry: Arc<EpisodeRegistry>,
    dispatcher: Arc<dyn CommandDispatcher>,
    emitter: Emitter,
    clock: Arc<dyn Clock>,
    stats: Arc<ControllerStats>,
    settings: ControllerSettings,
    tasks: TaskTracker,
    accepting: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

/// Builder for [`EpisodeController`].
pub struct EpisodeControllerBuilder {
    plans: HashMap<String, Arc<ActuationPlan>>,
    registry: Option<Arc<EpisodeRegistry>>,
    dispatcher: Option<Arc<dyn CommandDispatcher>>,
    emitter: Option<Emitter>,
    clock: Option<Arc<dyn Clock>>,
    stats: Option<Arc<ControllerStats>>,
    settings: ControllerSettings,
}

impl EpisodeControllerBuilder {
    /// Actuate `plan` when `sensor_name` crosses its threshold.
    pub fn plan(mut self, sensor_name: impl Into<String>, plan: ActuationPlan) -> Self {
        self.plans.insert(sensor_name.into(), Arc::new(plan));
        self
    }

    pub fn registry(mut self, registry: Arc<EpisodeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<dyn CommandDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn emitter(mut self, emitter: Emitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn stats(mut self, stats: Arc<ControllerStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn settings(mut self, settings: ControllerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Result<EpisodeController> {
        let dispatcher = self
            .dispatcher
            .ok_or_else(|| Error::Configuration("controller requires a command dispatcher".to_string()))?;
        let emitter = self
            .emitter
            .ok_or_else(|| Error::Configuration("controller requires an emitter".to_string()))?;
        if self.plans.is_empty() {
            return Err(Error::Configuration(
                "controller requires at least one actuation plan".to_string(),
            ));
        }

        let (shutdown_tx, _) = watch::channel(false);
        Ok(EpisodeController {
            inner: Arc::new(Inner {
                plans: self.plans,
                registry: self.registry.unwrap_or_default(),
                dispatcher,
                emitter,
                clock: self.clock.unwrap_or_else(|| Arc::new(TokioClock::new())),
                stats: self.stats.unwrap_or_default(),
                settings: self.settings,
                tasks: TaskTracker::new(),
                accepting: AtomicBool::new(true),
                shutdown_tx,
            }),
        })
    }
}

/// Drives actuation episodes. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct EpisodeController {
    inner: Arc<Inner>,
}

impl EpisodeController {
    pub fn builder() -> EpisodeControllerBuilder {
        EpisodeControllerBuilder {
            plans: HashMap::new(),
            registry: None,
            dispatcher: None,
            emitter: None,
            clock: None,
            stats: None,
            settings: ControllerSettings::default(),
        }
    }

    pub fn registry(&self) -> &Arc<EpisodeRegistry> {
        &self.inner.registry
    }

    pub fn stats(&self) -> &Arc<ControllerStats> {
        &self.inner.stats
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.inner.settings
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    /// Number of cooldown timers and trigger tasks still running.
    pub fn pending_tasks(&self) -> usize {
        self.inner.tasks.pending()
    }

    /// Handle a decision on a background task, off the caller's path.
    pub fn spawn_decision(&self, decision: Decision) {
        let controller = self.clone();
        self.inner.tasks.spawn(async move {
            controller.handle_decision(decision).await;
        });
    }

    /// Handle one decision to completion of its ON phase.
    pub async fn handle_decision(&self, decision: Decision) -> TriggerOutcome {
        if !decision.trigger {
            return TriggerOutcome::Ignored;
        }
        if !self.is_accepting() {
            debug!(sensor = %decision.reading.sensor_name, "{}", Error::ShuttingDown);
            return TriggerOutcome::Rejected;
        }

        let inner = &self.inner;
        inner.stats.triggers.incr();

        let Some(plan) = inner.plans.get(&decision.reading.sensor_name).cloned() else {
            warn!(
                sensor = %decision.reading.sensor_name,
                "Trigger for sensor without an actuation plan"
            );
            return TriggerOutcome::Unplanned;
        };

        let now = inner.clock.now();
        let episode = ActuationEpisode::new(
            &plan,
            now,
            &decision.reading.sensor_name,
            decision.reading.value,
        );

        let restart = inner.settings.overlap_policy == OverlapPolicy::Restart;
        match inner.registry.claim(episode.clone(), restart) {
            Claim::Started => {
                inner.stats.episodes_started.incr();
                info!(
                    device = %plan.device,
                    episode_id = %episode.id,
                    value = decision.reading.value,
                    cooldown_secs = plan.cooldown.as_secs_f64(),
                    "Starting actuation episode"
                );

                let on_outcome = self.send_once(&plan.device, &plan.on_command).await;
                self.arm_cooldown(plan.clone(), episode.id.clone());
                self.send_follow_ups(&plan).await;
                self.announce(&plan, &episode, &decision, on_outcome.clone()).await;

                TriggerOutcome::Started {
                    episode_id: episode.id,
                    on_outcome,
                }
            }
            Claim::Restarted(restarted) => {
                inner.stats.episodes_restarted.incr();
                info!(
                    device = %plan.device,
                    episode_id = %restarted.id,
                    value = decision.reading.value,
                    "Restarting cooldown of active episode"
                );

                let on_outcome = self.send_once(&plan.device, &plan.on_command).await;
                self.announce(&plan, &restarted, &decision, on_outcome.clone()).await;

                TriggerOutcome::Restarted {
                    episode_id: restarted.id,
                    on_outcome,
                }
            }
            Claim::Refused(state) => {
                inner.stats.suppressed_triggers.incr();
                info!(
                    state = %state,
                    value = decision.reading.value,
                    "Trigger suppressed: {}",
                    Error::RegistryConflict(plan.device.clone())
                );
                TriggerOutcome::Suppressed { state }
            }
        }
    }

    /// Stop accepting triggers and give pending timers `grace` to finish.
    ///
    /// Never waits longer than `grace`. Episodes whose OFF command was not
    /// confirmed by then are logged, counted and returned as incomplete.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        let inner = &self.inner;
        inner.accepting.store(false, Ordering::SeqCst);
        inner.shutdown_tx.send_replace(true);
        info!(
            grace_secs = grace.as_secs_f64(),
            pending = inner.tasks.pending(),
            policy = ?inner.settings.shutdown_policy,
            "Controller shutting down"
        );

        let deadline = tokio::time::Instant::now() + grace;
        let mut report = ShutdownReport::default();

        // Tasks spawned by in-flight triggers may appear after the first drain.
        loop {
            let handles = inner.tasks.drain();
            if handles.is_empty() {
                break;
            }
            for mut handle in handles {
                match tokio::time::timeout_at(deadline, &mut handle).await {
                    Ok(_) => report.completed_tasks += 1,
                    Err(_) => {
                        handle.abort();
                        report.aborted_tasks += 1;
                    }
                }
            }
        }

        report.incomplete = inner.registry.list();
        for episode in &report.incomplete {
            inner.stats.incomplete_episodes.incr();
            error!(
                device = %episode.device,
                episode_id = %episode.id,
                state = %episode.state,
                deadline = %episode.deadline(),
                "Episode incomplete at shutdown: compensating command not confirmed"
            );
        }

        info!(
            completed = report.completed_tasks,
            aborted = report.aborted_tasks,
            incomplete = report.incomplete.len(),
            "Controller stopped"
        );
        report
    }

    async fn send_once(&self, device: &str, command: &CommandSpec) -> DispatchOutcome {
        match self.inner.dispatcher.issue(device, command).await {
            Ok(_) => {
                self.inner.stats.commands_sent.incr();
                debug!(device, command = %command.command_name, "Command accepted");
                DispatchOutcome::Succeeded { attempts: 1 }
            }
            Err(e) => {
                self.inner.stats.commands_failed.incr();
                warn!(device, command = %command.command_name, error = %e, "Command failed");
                DispatchOutcome::Failed {
                    attempts: 1,
                    reason: failure_reason(&e),
                }
            }
        }
    }

    async fn send_follow_ups(&self, plan: &ActuationPlan) {
        for follow_up in &plan.follow_up {
            if let DispatchOutcome::Failed { reason, .. } =
                self.send_once(&follow_up.device, &follow_up.spec).await
            {
                warn!(
                    device = %follow_up.device,
                    command = %follow_up.spec.command_name,
                    reason = %reason,
                    "Follow-up command failed"
                );
            }
        }
    }

    /// Alert and ON telemetry for a started or restarted episode.
    async fn announce(
        &self,
        plan: &ActuationPlan,
        episode: &ActuationEpisode,
        decision: &Decision,
        on_outcome: DispatchOutcome,
    ) {
        let inner = &self.inner;
        let now = inner.clock.now();
        let alert = inner
            .settings
            .alert
            .render(&episode.id, &plan.device, decision, on_outcome.clone(), now);
        let telemetry = telemetry_record(plan, episode, TelemetryPhase::On, on_outcome, now);

        // Outcomes are already logged and counted by the emitter.
        let _ = tokio::join!(
            inner.emitter.emit_alert(&alert),
            inner.emitter.emit_telemetry(&telemetry)
        );
    }

    fn arm_cooldown(&self, plan: Arc<ActuationPlan>, episode_id: String) {
        let controller = self.clone();
        self.inner.tasks.spawn(async move {
            controller.run_cooldown(plan, episode_id).await;
        });
    }

    async fn run_cooldown(&self, plan: Arc<ActuationPlan>, episode_id: String) {
        let inner = &self.inner;
        let mut shutdown_rx = inner.shutdown_tx.subscribe();
        let compensate_early = inner.settings.shutdown_policy == ShutdownPolicy::CompensateImmediately;

        let episode = loop {
            match inner
                .registry
                .compensate_if_due(&plan.device, &episode_id, inner.clock.now())
            {
                CooldownCheck::Due(episode) => break episode,
                CooldownCheck::Gone => {
                    debug!(device = %plan.device, episode_id = %episode_id, "Cooldown timer found no active episode");
                    return;
                }
                CooldownCheck::Pending(remaining) => {
                    debug!(
                        device = %plan.device,
                        episode_id = %episode_id,
                        remaining_secs = remaining.as_secs_f64(),
                        "Cooldown armed"
                    );
                    tokio::select! {
                        _ = inner.clock.sleep(remaining) => {}
                        _ = shutdown_requested(&mut shutdown_rx), if compensate_early => {
                            match inner.registry.compensate_now(&plan.device, &episode_id) {
                                Some(episode) => {
                                    info!(device = %plan.device, episode_id = %episode_id, "Compensating early for shutdown");
                                    break episode;
                                }
                                None => return,
                            }
                        }
                    }
                }
            }
        };

        self.compensate(&plan, episode).await;
    }

    /// Issue the OFF command with bounded retry, then return the device to idle.
    async fn compensate(&self, plan: &ActuationPlan, episode: ActuationEpisode) {
        let inner = &self.inner;
        let retry = &inner.settings.off_retry;
        let max_attempts = retry.max_attempts.max(1);
        info!(device = %plan.device, episode_id = %episode.id, "Cooldown elapsed, sending compensating command");

        let mut attempt = 1;
        let off_outcome = loop {
            match inner.dispatcher.issue(&plan.device, &episode.off_command).await {
                Ok(_) => {
                    inner.stats.commands_sent.incr();
                    break DispatchOutcome::Succeeded { attempts: attempt };
                }
                Err(e) => {
                    inner.stats.commands_failed.incr();
                    if attempt >= max_attempts {
                        error!(
                            device = %plan.device,
                            episode_id = %episode.id,
                            attempts = attempt,
                            error = %e,
                            "Compensating command failed, retry budget exhausted"
                        );
                        break DispatchOutcome::Failed {
                            attempts: attempt,
                            reason: failure_reason(&e),
                        };
                    }
                    attempt += 1;
                    let delay = retry.delay_before(attempt);
                    inner.stats.off_retries.incr();
                    warn!(
                        device = %plan.device,
                        episode_id = %episode.id,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Compensating command failed, retrying"
                    );
                    inner.clock.sleep(delay).await;
                }
            }
        };

        inner.registry.clear(&plan.device, &episode.id);
        inner.stats.episodes_completed.incr();
        info!(
            device = %plan.device,
            episode_id = %episode.id,
            outcome = off_outcome.as_str(),
            "Actuation episode finished"
        );

        let record = telemetry_record(
            plan,
            &episode,
            TelemetryPhase::Off,
            off_outcome,
            inner.clock.now(),
        );
        let _ = inner.emitter.emit_telemetry(&record).await;
    }
}

fn telemetry_record(
    plan: &ActuationPlan,
    episode: &ActuationEpisode,
    phase: TelemetryPhase,
    outcome: DispatchOutcome,
    now: chrono::DateTime<chrono::Utc>,
) -> TelemetryRecord {
    let value = match phase {
        TelemetryPhase::On => plan.telemetry.on_value,
        TelemetryPhase::Off => plan.telemetry.off_value,
    };
    TelemetryRecord {
        asset_id: plan.asset_id().to_string(),
        device_name: plan.device.clone(),
        value,
        sensor_name: plan.telemetry.sensor_name.clone(),
        phase,
        episode_id: episode.id.clone(),
        outcome,
        recorded_at: now,
    }
}

fn failure_reason(error: &Error) -> String {
    match error {
        Error::CommandFailed { failure, .. } => failure.to_string(),
        other => other.to_string(),
    }
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
