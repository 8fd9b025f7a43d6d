//! Session History Persistence
//!
//! Finished sessions are written to a primary store when one is configured
//! and to a local key-value store otherwise. Writes are best-effort: errors
//! are logged and swallowed so the game flow never waits on storage.

use crate::session::{GameResult, GameSession, Level};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Key under which the local store keeps the whole history.
pub const LOCAL_HISTORY_KEY: &str = "game_sessions";

/// A persisted session, as read back for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Option<i64>,
    pub player_name: String,
    pub level: Level,
    pub score: u32,
    pub result: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// A session about to be written. Ids and timestamps are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewSessionRecord {
    pub player_name: String,
    pub level: Level,
    pub score: u32,
    pub result: String,
}

impl NewSessionRecord {
    pub fn from_session(session: &GameSession, result: GameResult) -> Self {
        Self {
            player_name: session.player.name.clone(),
            level: session.player.level,
            score: session.score,
            result: result.label().to_string(),
        }
    }
}

/// Durable remote store for session records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    async fn insert(&self, record: &NewSessionRecord) -> Result<()>;

    /// Returns every record, newest first.
    async fn query_all(&self) -> Result<Vec<SessionRecord>>;
}

/// Text key-value storage scoped to a single namespace.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// A `KeyValueStore` keeping one file per key inside a namespace directory.
pub struct FileKeyValueStore {
    namespace: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(namespace: impl Into<PathBuf>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.namespace.join(format!("{key}.json"))
    }
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.namespace)
            .await
            .with_context(|| format!("Failed to create {}", self.namespace.display()))?;
        let path = self.path_for(key);
        tokio::fs::write(&path, value)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

/// An in-process `KeyValueStore`, lost when the process exits.
#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Where a `record` call ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Primary,
    Local,
    /// Both stores failed; the record is lost.
    Dropped,
}

/// Two-tier writer and reader of the session history.
pub struct PersistenceGateway {
    primary: Option<Arc<dyn PrimaryStore>>,
    local: Arc<dyn KeyValueStore>,
}

impl PersistenceGateway {
    /// Creates a gateway. `primary` is `None` when no remote store is configured.
    pub fn new(primary: Option<Arc<dyn PrimaryStore>>, local: Arc<dyn KeyValueStore>) -> Self {
        if primary.is_none() {
            warn!("No primary store configured; session history is kept locally.");
        }
        Self { primary, local }
    }

    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    /// Records a finished session. Never fails and never retries.
    pub async fn record(&self, record: NewSessionRecord) -> RecordOutcome {
        if let Some(primary) = &self.primary {
            match primary.insert(&record).await {
                Ok(()) => {
                    info!(player = %record.player_name, result = %record.result, "Session saved to primary store");
                    return RecordOutcome::Primary;
                }
                Err(e) => {
                    error!(error = ?e, "Failed to save session to primary store; using local store");
                }
            }
        }

        match self.append_local(record).await {
            Ok(id) => {
                info!(id, "Session saved to local store");
                RecordOutcome::Local
            }
            Err(e) => {
                error!(error = ?e, "Failed to save session to local store");
                RecordOutcome::Dropped
            }
        }
    }

    /// Returns the whole history, newest first, or an empty list when nothing
    /// can be read.
    ///
    /// Sessions that fell back to the local store while the primary was down
    /// are merged into the primary's results.
    pub async fn list_all(&self) -> Vec<SessionRecord> {
        let local = match self.read_local().await {
            Ok(mut history) => {
                history.reverse();
                history
            }
            Err(e) => {
                error!(error = ?e, "Failed to read sessions from local store");
                Vec::new()
            }
        };

        let Some(primary) = &self.primary else {
            return local;
        };
        match primary.query_all().await {
            Ok(mut records) if !local.is_empty() => {
                records.extend(local);
                records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                records
            }
            Ok(records) => records,
            Err(e) => {
                error!(error = ?e, "Failed to read sessions from primary store");
                local
            }
        }
    }

    async fn read_local(&self) -> Result<Vec<SessionRecord>> {
        match self.local.get(LOCAL_HISTORY_KEY).await? {
            Some(raw) => serde_json::from_str(&raw).context("Local session history is corrupt"),
            None => Ok(Vec::new()),
        }
    }

    async fn append_local(&self, record: NewSessionRecord) -> Result<i64> {
        let mut history = self.read_local().await?;
        let now = Utc::now();
        let id = history
            .iter()
            .filter_map(|r| r.id)
            .max()
            .map_or(now.timestamp_millis(), |last| {
                now.timestamp_millis().max(last + 1)
            });

        history.push(SessionRecord {
            id: Some(id),
            player_name: record.player_name,
            level: record.level,
            score: record.score,
            result: record.result,
            created_at: Some(now),
        });
        self.local
            .set(LOCAL_HISTORY_KEY, &serde_json::to_string(&history)?)
            .await?;
        Ok(id)
    }
}
