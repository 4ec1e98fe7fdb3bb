// ABOUTME: Core database management with migration system for SQLite
// ABOUTME: Handles schema setup for sessions, responses, votes, ratings, and matchups
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

//! # Session Store
//!
//! Durable, transactional persistence for every council entity. SQLite with
//! WAL journaling and a single connection gives single-writer serializable
//! semantics per session; callers receive `NotFound`, `Conflict`, and
//! `Transient` error kinds and own their retry policy.

mod catalog;
mod ratings;
mod responses;
mod sessions;
mod votes;

pub use responses::NewResponse;
pub use sessions::NewSession;
pub use votes::NewVote;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::info;

use crate::errors::{AppError, AppResult};

/// Busy timeout applied to the SQLite connection
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Durable store for sessions, responses, votes, ratings, and matchups
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Open (creating if missing) the database and run migrations
    ///
    /// # Errors
    ///
    /// Returns `Transient` if the URL is malformed, the connection fails, or
    /// a migration statement fails.
    pub async fn new(database_url: &str) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AppError::transient(format!("invalid database url: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        // SQLite works best with a single writer; one connection also gives
        // serializable semantics without extra locking. min_connections keeps
        // the connection alive, which in-memory databases require.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;

        info!("database ready at {}", database_url);
        Ok(db)
    }

    /// Get a reference to the underlying pool for advanced operations
    #[must_use]
    pub const fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Close the pool, flushing the WAL
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run all schema migrations
    ///
    /// # Errors
    ///
    /// Returns `Transient` if any statement fails.
    pub async fn migrate(&self) -> AppResult<()> {
        self.migrate_models().await?;
        self.migrate_sessions().await?;
        self.migrate_responses().await?;
        self.migrate_votes().await?;
        self.migrate_ratings().await?;
        Ok(())
    }

    async fn migrate_models(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS models (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                provider TEXT NOT NULL DEFAULT 'unknown',
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn migrate_sessions(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                question TEXT NOT NULL,
                category_id INTEGER,
                mode TEXT NOT NULL CHECK (mode IN ('standard', 'debate', 'tournament')),
                status TEXT NOT NULL CHECK (status IN (
                    'pending', 'responding', 'voting', 'synthesizing',
                    'completed', 'failed', 'cancelled'
                )),
                config TEXT NOT NULL,
                chairperson_id TEXT,
                devil_advocate_id TEXT,
                mystery_judge_id TEXT,
                synthesis TEXT,
                minority_report TEXT,
                created_at DATETIME NOT NULL,
                completed_at DATETIME
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_created ON sessions(created_at)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn migrate_responses(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS responses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                model_id TEXT NOT NULL,
                round INTEGER NOT NULL,
                content TEXT NOT NULL,
                anonymous_label TEXT NOT NULL,
                response_time_ms INTEGER NOT NULL DEFAULT 0,
                token_count INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL,
                UNIQUE(session_id, model_id, round)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_responses_session ON responses(session_id)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn migrate_votes(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS votes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                voter_type TEXT NOT NULL CHECK (voter_type IN ('model', 'user')),
                voter_id TEXT NOT NULL,
                ranked_responses TEXT NOT NULL,
                weight REAL NOT NULL DEFAULT 1.0,
                created_at DATETIME NOT NULL,
                UNIQUE(session_id, voter_id)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_votes_session ON votes(session_id)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn migrate_ratings(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS model_ratings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                model_id TEXT NOT NULL,
                category_id INTEGER,
                rating INTEGER NOT NULL DEFAULT 1500,
                wins INTEGER NOT NULL DEFAULT 0,
                losses INTEGER NOT NULL DEFAULT 0,
                draws INTEGER NOT NULL DEFAULT 0,
                updated_at DATETIME NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        // SQLite treats NULLs as distinct in plain UNIQUE constraints; the
        // expression index enforces one row per (model, category) with the
        // global scope folded to -1.
        sqlx::query(
            r"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_model_ratings_scope
            ON model_ratings(model_id, IFNULL(category_id, -1))
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_model_ratings_model ON model_ratings(model_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS elo_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                model_id TEXT NOT NULL,
                category_id INTEGER,
                session_id TEXT REFERENCES sessions(id) ON DELETE SET NULL,
                old_rating INTEGER NOT NULL,
                new_rating INTEGER NOT NULL,
                change INTEGER NOT NULL,
                reason TEXT NOT NULL CHECK (reason IN ('win', 'loss', 'draw')),
                created_at DATETIME NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_elo_history_model ON elo_history(model_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_elo_history_created ON elo_history(created_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS matchups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                model_a_id TEXT NOT NULL,
                model_b_id TEXT NOT NULL,
                category_id INTEGER,
                model_a_wins INTEGER NOT NULL DEFAULT 0,
                model_b_wins INTEGER NOT NULL DEFAULT 0,
                draws INTEGER NOT NULL DEFAULT 0,
                updated_at DATETIME NOT NULL,
                CHECK (model_a_id < model_b_id)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_matchups_scope
            ON matchups(model_a_id, model_b_id, IFNULL(category_id, -1))
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_matchups_pair ON matchups(model_a_id, model_b_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
