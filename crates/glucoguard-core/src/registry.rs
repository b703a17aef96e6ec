//! Episode registry.
//!
//! The only shared mutable structure in the controller. Holds at most one
//! in-flight episode per device. Every operation is atomic per device key;
//! keys live in independently locked shards, so operations on unrelated
//! devices do not wait on each other.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::episode::{ActuationEpisode, EpisodeState};

/// Result of asking the registry whether an episode's cooldown has elapsed.
#[derive(Debug, Clone, PartialEq)]
pub enum CooldownCheck {
    /// Deadline reached; the episode is now `Compensating`.
    Due(ActuationEpisode),
    /// Deadline not reached yet (the cooldown may have been restarted).
    Pending(Duration),
    /// The episode is no longer registered or is already compensating.
    Gone,
}

/// Result of [`EpisodeRegistry::claim`].
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// The device was idle; the episode is now `Active`.
    Started,
    /// The active episode's cooldown window now starts at the new time.
    Restarted(ActuationEpisode),
    /// An episode is in flight; carries its state at the time of refusal.
    Refused(EpisodeState),
}

/// Table of in-flight episodes keyed by device.
#[derive(Debug, Default)]
pub struct EpisodeRegistry {
    episodes: DashMap<String, ActuationEpisode>,
}

impl EpisodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `episode` if its device is idle.
    ///
    /// Returns `false` and leaves the registry untouched when the device
    /// already has an `Active` or `Compensating` episode.
    pub fn try_start(&self, episode: ActuationEpisode) -> bool {
        self.claim(episode, false) == Claim::Started
    }

    /// Register `episode`, or with `restart` move the cooldown window of an
    /// `Active` episode to `episode.started_at`.
    ///
    /// Decided under one entry lock, so a refusal reports the state that
    /// caused it.
    pub fn claim(&self, episode: ActuationEpisode, restart: bool) -> Claim {
        match self.episodes.entry(episode.device.clone()) {
            Entry::Occupied(mut slot) => {
                let current = slot.get_mut();
                if restart && current.state == EpisodeState::Active {
                    current.started_at = episode.started_at;
                    Claim::Restarted(current.clone())
                } else {
                    Claim::Refused(current.state)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(ActuationEpisode {
                    state: EpisodeState::Active,
                    ..episode
                });
                Claim::Started
            }
        }
    }

    /// Unconditionally move an `Active` episode to `Compensating`.
    pub fn mark_compensating(&self, device: &str) -> Option<ActuationEpisode> {
        let mut entry = self.episodes.get_mut(device)?;
        if entry.state != EpisodeState::Active {
            return None;
        }
        entry.state = EpisodeState::Compensating;
        Some(entry.clone())
    }

    /// Move episode `episode_id` to `Compensating` if its deadline has passed.
    pub fn compensate_if_due(&self, device: &str, episode_id: &str, now: DateTime<Utc>) -> CooldownCheck {
        let Some(mut entry) = self.episodes.get_mut(device) else {
            return CooldownCheck::Gone;
        };
        if entry.id != episode_id || entry.state != EpisodeState::Active {
            return CooldownCheck::Gone;
        }

        let remaining = entry.remaining(now);
        if remaining.is_zero() {
            entry.state = EpisodeState::Compensating;
            CooldownCheck::Due(entry.clone())
        } else {
            CooldownCheck::Pending(remaining)
        }
    }

    /// Move episode `episode_id` to `Compensating` regardless of its deadline.
    pub fn compensate_now(&self, device: &str, episode_id: &str) -> Option<ActuationEpisode> {
        let mut entry = self.episodes.get_mut(device)?;
        if entry.id != episode_id || entry.state != EpisodeState::Active {
            return None;
        }
        entry.state = EpisodeState::Compensating;
        Some(entry.clone())
    }

    /// Remove episode `episode_id`, returning the device to idle.
    ///
    /// A different episode registered under the same device is left alone.
    pub fn clear(&self, device: &str, episode_id: &str) -> Option<ActuationEpisode> {
        self.episodes
            .remove_if(device, |_, episode| episode.id == episode_id)
            .map(|(_, episode)| episode)
    }

    pub fn get(&self, device: &str) -> Option<ActuationEpisode> {
        self.episodes.get(device).map(|entry| entry.clone())
    }

    /// Current state for a device; `Idle` when nothing is registered.
    pub fn state(&self, device: &str) -> EpisodeState {
        self.episodes
            .get(device)
            .map(|entry| entry.state)
            .unwrap_or(EpisodeState::Idle)
    }

    pub fn list(&self) -> Vec<ActuationEpisode> {
        let mut episodes: Vec<_> = self.episodes.iter().map(|entry| entry.value().clone()).collect();
        episodes.sort_by(|a, b| a.device.cmp(&b.device));
        episodes
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }
}
