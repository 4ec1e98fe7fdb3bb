// ABOUTME: Database operations for council session rows and the status state machine
// ABOUTME: Enforces allowed status transitions with conditional writes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use super::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{Session, SessionConfig, SessionMode, SessionStatus, SessionSummary};

/// Seed for a new session row; everything else starts NULL/pending
#[derive(Debug, Clone)]
pub struct NewSession {
    /// Session id chosen by admission
    pub id: Uuid,
    /// Owning user
    pub user_id: String,
    /// The question under deliberation
    pub question: String,
    /// Deliberation mode
    pub mode: SessionMode,
    /// Optional rating category
    pub category_id: Option<i64>,
    /// Assigned chairperson
    pub chairperson_id: Option<String>,
    /// Assigned devil's advocate
    pub devil_advocate_id: Option<String>,
    /// Assigned mystery judge
    pub mystery_judge_id: Option<String>,
    /// Frozen configuration snapshot
    pub config: SessionConfig,
}

impl Database {
    /// Atomically insert a session row with status `pending`
    ///
    /// # Errors
    ///
    /// Returns `Conflict` on a duplicate id, `Transient` on I/O faults.
    pub async fn create_session(&self, seed: &NewSession) -> AppResult<Uuid> {
        let config_json = serde_json::to_string(&seed.config)?;

        sqlx::query(
            r"
            INSERT INTO sessions (
                id, user_id, question, category_id, mode, status, config,
                chairperson_id, devil_advocate_id, mystery_judge_id, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(seed.id.to_string())
        .bind(&seed.user_id)
        .bind(&seed.question)
        .bind(seed.category_id)
        .bind(seed.mode.as_str())
        .bind(SessionStatus::Pending.as_str())
        .bind(config_json)
        .bind(&seed.chairperson_id)
        .bind(&seed.devil_advocate_id)
        .bind(&seed.mystery_judge_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(seed.id)
    }

    /// Load a session with its responses and votes joined in
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the session does not exist.
    pub async fn get_session(&self, session_id: Uuid) -> AppResult<Session> {
        let row = sqlx::query(
            r"
            SELECT id, user_id, question, category_id, mode, status, config,
                   chairperson_id, devil_advocate_id, mystery_judge_id,
                   synthesis, minority_report, created_at, completed_at
            FROM sessions WHERE id = ?
            ",
        )
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::not_found(format!("session {session_id}")))?;

        let mut session = parse_session_row(&row)?;
        session.responses = self.list_responses(session_id).await?;
        session.votes = self.list_votes(session_id).await?;
        Ok(session)
    }

    /// Current status of a session
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the session does not exist.
    pub async fn session_status(&self, session_id: Uuid) -> AppResult<SessionStatus> {
        let row = sqlx::query("SELECT status FROM sessions WHERE id = ?")
            .bind(session_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found(format!("session {session_id}")))?;

        let raw: String = row.get("status");
        SessionStatus::parse(&raw)
            .ok_or_else(|| AppError::transient(format!("corrupt session status: {raw}")))
    }

    /// Conditionally advance a session's status.
    ///
    /// The write succeeds only if the current status is an allowed preimage
    /// of `next` per the state machine.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the session does not exist, `Conflict` if the
    /// transition is not permitted from the current status.
    pub async fn update_session_status(
        &self,
        session_id: Uuid,
        next: SessionStatus,
    ) -> AppResult<()> {
        let preimages = SessionStatus::preimages(next);
        if preimages.is_empty() {
            return Err(AppError::conflict(format!(
                "no transition into {}",
                next.as_str()
            )));
        }

        let placeholders = vec!["?"; preimages.len()].join(", ");
        let sql = if next == SessionStatus::Completed {
            format!(
                "UPDATE sessions SET status = ?, completed_at = ? \
                 WHERE id = ? AND status IN ({placeholders})"
            )
        } else {
            format!("UPDATE sessions SET status = ? WHERE id = ? AND status IN ({placeholders})")
        };

        let mut query = sqlx::query(&sql).bind(next.as_str());
        if next == SessionStatus::Completed {
            query = query.bind(Utc::now());
        }
        query = query.bind(session_id.to_string());
        for status in preimages {
            query = query.bind(status.as_str());
        }

        let result = query.execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            let current = self.session_status(session_id).await?;
            return Err(AppError::conflict(format!(
                "illegal transition {} -> {}",
                current.as_str(),
                next.as_str()
            )));
        }
        Ok(())
    }

    /// Move a non-terminal session into `failed` or `cancelled`.
    ///
    /// Returns `true` if this call performed the transition, `false` if the
    /// session was already terminal. The boolean lets the caller publish the
    /// matching terminal event exactly once.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the session does not exist, `Conflict` if
    /// `terminal` is not `failed` or `cancelled`.
    pub async fn try_terminalize(
        &self,
        session_id: Uuid,
        terminal: SessionStatus,
    ) -> AppResult<bool> {
        if !matches!(terminal, SessionStatus::Failed | SessionStatus::Cancelled) {
            return Err(AppError::conflict(format!(
                "{} is not an abort status",
                terminal.as_str()
            )));
        }

        let result = sqlx::query(
            r"
            UPDATE sessions SET status = ?
            WHERE id = ? AND status IN ('pending', 'responding', 'voting', 'synthesizing')
            ",
        )
        .bind(terminal.as_str())
        .bind(session_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Distinguish a missing session from an already-terminal one.
            self.session_status(session_id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    /// One-shot synthesis write, legal only while the session is synthesizing
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the session does not exist, `Conflict` if it is
    /// not in the `synthesizing` status.
    pub async fn set_synthesis(
        &self,
        session_id: Uuid,
        synthesis: &str,
        minority_report: Option<&str>,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r"
            UPDATE sessions SET synthesis = ?, minority_report = ?
            WHERE id = ? AND status = 'synthesizing'
            ",
        )
        .bind(synthesis)
        .bind(minority_report)
        .bind(session_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.session_status(session_id).await?;
            return Err(AppError::conflict(format!(
                "synthesis write rejected while {}",
                current.as_str()
            )));
        }
        Ok(())
    }

    /// Newest-first session history for a user
    ///
    /// # Errors
    ///
    /// Returns `Transient` on I/O faults.
    pub async fn list_sessions(&self, user_id: &str, limit: i64) -> AppResult<Vec<SessionSummary>> {
        let limit = limit.clamp(1, 100);
        let rows = sqlx::query(
            r"
            SELECT s.id, s.question, s.mode, s.status, s.created_at, s.completed_at,
                   (SELECT COUNT(*) FROM responses r WHERE r.session_id = s.id) AS response_count
            FROM sessions s
            WHERE s.user_id = ?
            ORDER BY s.created_at DESC
            LIMIT ?
            ",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let mode: String = row.get("mode");
            let status: String = row.get("status");
            summaries.push(SessionSummary {
                id: Uuid::parse_str(&id)
                    .map_err(|e| AppError::transient(format!("corrupt session id: {e}")))?,
                question: row.get("question"),
                mode: SessionMode::parse(&mode)
                    .ok_or_else(|| AppError::transient(format!("corrupt mode: {mode}")))?,
                status: SessionStatus::parse(&status)
                    .ok_or_else(|| AppError::transient(format!("corrupt status: {status}")))?,
                response_count: row.get("response_count"),
                created_at: row.get("created_at"),
                completed_at: row.get("completed_at"),
            });
        }
        Ok(summaries)
    }
}

fn parse_session_row(row: &sqlx::sqlite::SqliteRow) -> AppResult<Session> {
    let id: String = row.get("id");
    let mode: String = row.get("mode");
    let status: String = row.get("status");
    let config_json: String = row.get("config");

    Ok(Session {
        id: Uuid::parse_str(&id)
            .map_err(|e| AppError::transient(format!("corrupt session id: {e}")))?,
        user_id: row.get("user_id"),
        question: row.get("question"),
        mode: SessionMode::parse(&mode)
            .ok_or_else(|| AppError::transient(format!("corrupt mode: {mode}")))?,
        status: SessionStatus::parse(&status)
            .ok_or_else(|| AppError::transient(format!("corrupt status: {status}")))?,
        category_id: row.get("category_id"),
        chairperson_id: row.get("chairperson_id"),
        devil_advocate_id: row.get("devil_advocate_id"),
        mystery_judge_id: row.get("mystery_judge_id"),
        synthesis: row.get("synthesis"),
        minority_report: row.get("minority_report"),
        config: serde_json::from_str(&config_json)?,
        responses: Vec::new(),
        votes: Vec::new(),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        completed_at: row.get("completed_at"),
    })
}
