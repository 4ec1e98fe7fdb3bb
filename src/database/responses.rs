// ABOUTME: Database operations for per-round model responses
// ABOUTME: Inserts are append-only with duplicate rejection on (session, model, round)
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

use std::collections::BTreeMap;

use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use super::Database;
use crate::errors::{AppError, AppResult};
use crate::models::SessionResponse;

/// A response ready to be persisted
#[derive(Debug, Clone)]
pub struct NewResponse {
    /// Owning session
    pub session_id: Uuid,
    /// Authoring model
    pub model_id: String,
    /// Round number (>= 1)
    pub round: u32,
    /// Response content, possibly a partial buffer on stream failure
    pub content: String,
    /// Stable per-session anonymous label
    pub anonymous_label: String,
    /// Wall-clock milliseconds from prompt to stream end
    pub response_time_ms: i64,
    /// Token count, reported or estimated
    pub token_count: i64,
}

impl Database {
    /// Append one response row; rejects duplicates
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if `(session_id, model_id, round)` already exists,
    /// `Transient` on I/O faults.
    pub async fn append_response(&self, response: &NewResponse) -> AppResult<i64> {
        let result = sqlx::query(
            r"
            INSERT INTO responses (
                session_id, model_id, round, content, anonymous_label,
                response_time_ms, token_count, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(response.session_id.to_string())
        .bind(&response.model_id)
        .bind(i64::from(response.round))
        .bind(&response.content)
        .bind(&response.anonymous_label)
        .bind(response.response_time_ms)
        .bind(response.token_count)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// All responses of a session, ordered by round then insertion
    ///
    /// # Errors
    ///
    /// Returns `Transient` on I/O faults.
    pub async fn list_responses(&self, session_id: Uuid) -> AppResult<Vec<SessionResponse>> {
        let rows = sqlx::query(
            r"
            SELECT id, session_id, model_id, round, content, anonymous_label,
                   response_time_ms, token_count, created_at
            FROM responses
            WHERE session_id = ?
            ORDER BY round, id
            ",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut responses = Vec::with_capacity(rows.len());
        for row in rows {
            let sid: String = row.get("session_id");
            let round: i64 = row.get("round");
            responses.push(SessionResponse {
                id: row.get("id"),
                session_id: Uuid::parse_str(&sid)
                    .map_err(|e| AppError::transient(format!("corrupt session id: {e}")))?,
                model_id: row.get("model_id"),
                round: u32::try_from(round)
                    .map_err(|_| AppError::transient(format!("corrupt round: {round}")))?,
                content: row.get("content"),
                anonymous_label: row.get("anonymous_label"),
                response_time_ms: row.get("response_time_ms"),
                token_count: row.get("token_count"),
                created_at: row.get("created_at"),
            });
        }
        Ok(responses)
    }

    /// The stable label assignment of a session: model id to anonymous label
    ///
    /// # Errors
    ///
    /// Returns `Transient` on I/O faults.
    pub async fn session_labels(&self, session_id: Uuid) -> AppResult<BTreeMap<String, String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT model_id, anonymous_label FROM responses WHERE session_id = ?",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("model_id"), row.get("anonymous_label")))
            .collect())
    }
}
