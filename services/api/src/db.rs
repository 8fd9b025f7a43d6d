//! Data Access Layer
//!
//! Postgres implementation of the primary session-history store, using
//! `sqlx` connection pooling and embedded migrations.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, postgres::PgPoolOptions};
use tonality_core::persistence::{NewSessionRecord, PrimaryStore, SessionRecord};

/// Row shape of the `game_sessions` table.
#[derive(FromRow, Debug)]
struct SessionRow {
    id: i64,
    player_name: String,
    level: String,
    score: i32,
    result: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for SessionRecord {
    type Error = anyhow::Error;

    fn try_from(row: SessionRow) -> Result<Self> {
        Ok(SessionRecord {
            id: Some(row.id),
            player_name: row.player_name,
            level: row.level.parse()?,
            score: u32::try_from(row.score).context("Negative score in game_sessions")?,
            result: row.result,
            created_at: Some(row.created_at),
        })
    }
}

/// A wrapper around the `PgPool` to provide a clear data access interface.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Creates a new `Db` instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates a pool that connects on first use, so an unreachable database
    /// surfaces as per-query errors instead of a startup failure.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .context("Invalid DATABASE_URL")?;
        Ok(Self::new(pool))
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl PrimaryStore for Db {
    async fn insert(&self, record: &NewSessionRecord) -> Result<()> {
        let score = i32::try_from(record.score).context("Score does not fit in game_sessions")?;
        sqlx::query(
            "INSERT INTO game_sessions (player_name, level, score, result) VALUES ($1, $2, $3, $4)",
        )
        .bind(&record.player_name)
        .bind(record.level.to_string())
        .bind(score)
        .bind(&record.result)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query_all(&self) -> Result<Vec<SessionRecord>> {
        let rows = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, player_name, level, score, result, created_at
            FROM game_sessions
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SessionRecord::try_from).collect()
    }
}
