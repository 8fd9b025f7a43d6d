//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources like the persistence gateway, the chat backend and
//! the registry of games in progress.

use crate::config::Config;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::{sync::RwLock, task::JoinHandle, time::MissedTickBehavior};
use tonality_core::{
    chat::ChatBackend,
    dialogue::{Dialogue, DialogueSnapshot},
    persistence::PersistenceGateway,
};
use tracing::info;
use uuid::Uuid;

/// How long a finished game stays readable after it ends.
pub const FINISHED_GAME_RETENTION: TimeDelta = TimeDelta::minutes(5);
/// Games with no transcript activity for this long are dropped.
pub const IDLE_GAME_TTL: TimeDelta = TimeDelta::minutes(30);
/// Period of the background eviction sweep.
pub const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

/// The shared application state, created once at startup and passed to all handlers.
/// All fields are public to be accessible from other modules.
#[derive(Clone)]
pub struct AppState {
    pub games: Arc<RwLock<HashMap<Uuid, Arc<Dialogue>>>>,
    pub gateway: Arc<PersistenceGateway>,
    pub chat_backend: Arc<dyn ChatBackend>,
    pub system_prompt: Arc<String>,
    pub config: Arc<Config>,
}

/// Whether a game can be dropped from the registry at `now`.
///
/// A game with a turn in flight is never stale.
fn is_stale(snapshot: &DialogueSnapshot, now: DateTime<Utc>) -> bool {
    if snapshot.in_flight {
        return false;
    }
    let finished = snapshot
        .finished_at
        .is_some_and(|at| now >= at + FINISHED_GAME_RETENTION);
    let idle = snapshot
        .last_activity
        .is_some_and(|at| now >= at + IDLE_GAME_TTL);
    finished || idle
}

impl AppState {
    pub fn new(
        gateway: Arc<PersistenceGateway>,
        chat_backend: Arc<dyn ChatBackend>,
        system_prompt: Arc<String>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            games: Arc::new(RwLock::new(HashMap::new())),
            gateway,
            chat_backend,
            system_prompt,
            config,
        }
    }

    /// Creates a dialogue wired to the shared backend and gateway.
    pub fn new_dialogue(&self) -> Arc<Dialogue> {
        Arc::new(Dialogue::new(
            self.chat_backend.clone(),
            self.gateway.clone(),
            self.system_prompt.clone(),
        ))
    }

    pub async fn game(&self, id: Uuid) -> Option<Arc<Dialogue>> {
        self.games.read().await.get(&id).cloned()
    }

    /// Drops finished games past their retention and abandoned games past
    /// the idle TTL. Returns how many were removed.
    ///
    /// History writes of evicted games keep running on their own task.
    pub async fn evict_stale(&self, now: DateTime<Utc>) -> usize {
        let mut games = self.games.write().await;
        let mut stale = Vec::new();
        for (id, dialogue) in games.iter() {
            if is_stale(&dialogue.snapshot().await, now) {
                stale.push(*id);
            }
        }
        for id in &stale {
            games.remove(id);
        }
        if !stale.is_empty() {
            info!(evicted = stale.len(), remaining = games.len(), "Evicted stale games");
        }
        stale.len()
    }

    /// Runs `evict_stale` every `EVICTION_INTERVAL` until the task is aborted.
    pub fn spawn_eviction(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(EVICTION_INTERVAL);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                self.evict_stale(Utc::now()).await;
            }
        })
    }
}
