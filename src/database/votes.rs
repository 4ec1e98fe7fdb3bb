// ABOUTME: Database operations for ranked ballots
// ABOUTME: Ballots persist as JSON label arrays and are re-validated at load
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

use chrono::Utc;
use sqlx::Row;
use tracing::warn;
use uuid::Uuid;

use super::Database;
use crate::errors::{AppError, AppResult, ErrorCode};
use crate::models::{Vote, VoterType};

/// A ballot ready to be persisted
#[derive(Debug, Clone)]
pub struct NewVote {
    /// Owning session
    pub session_id: Uuid,
    /// Ballot origin
    pub voter_type: VoterType,
    /// Voter identifier (model id or user id)
    pub voter_id: String,
    /// Anonymous labels, best first, duplicate-free
    pub ranked_responses: Vec<String>,
    /// Ballot weight
    pub weight: f64,
}

impl Database {
    /// Append one ballot row
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if this voter already voted in the session,
    /// `Transient` on I/O faults.
    pub async fn append_vote(&self, vote: &NewVote) -> AppResult<i64> {
        let ranked_json = serde_json::to_string(&vote.ranked_responses)?;

        let result = sqlx::query(
            r"
            INSERT INTO votes (session_id, voter_type, voter_id, ranked_responses, weight, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(vote.session_id.to_string())
        .bind(vote.voter_type.as_str())
        .bind(&vote.voter_id)
        .bind(ranked_json)
        .bind(vote.weight)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Like [`Database::append_vote`] but swallows the duplicate-voter
    /// conflict, returning `None`. Used by tournament matches where a model
    /// judges several brackets but only its first ballot row is kept.
    ///
    /// # Errors
    ///
    /// Returns `Transient` on I/O faults.
    pub async fn append_vote_if_first(&self, vote: &NewVote) -> AppResult<Option<i64>> {
        match self.append_vote(vote).await {
            Ok(id) => Ok(Some(id)),
            Err(err) if err.code == ErrorCode::Conflict => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// All well-formed ballots of a session.
    ///
    /// A persisted ballot that fails to parse or contains duplicate labels is
    /// logged and discarded, never surfaced.
    ///
    /// # Errors
    ///
    /// Returns `Transient` on I/O faults.
    pub async fn list_votes(&self, session_id: Uuid) -> AppResult<Vec<Vote>> {
        let rows = sqlx::query(
            r"
            SELECT id, session_id, voter_type, voter_id, ranked_responses, weight, created_at
            FROM votes
            WHERE session_id = ?
            ORDER BY id
            ",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut votes = Vec::with_capacity(rows.len());
        for row in rows {
            let sid: String = row.get("session_id");
            let voter_type_raw: String = row.get("voter_type");
            let ranked_json: String = row.get("ranked_responses");
            let voter_id: String = row.get("voter_id");

            let Some(voter_type) = VoterType::parse(&voter_type_raw) else {
                warn!(voter_id, "discarding ballot with corrupt voter type");
                continue;
            };
            let Ok(ranked_responses) = serde_json::from_str::<Vec<String>>(&ranked_json) else {
                warn!(voter_id, "discarding malformed ballot");
                continue;
            };
            if has_duplicates(&ranked_responses) {
                warn!(voter_id, "discarding ballot with duplicate labels");
                continue;
            }

            votes.push(Vote {
                id: row.get("id"),
                session_id: Uuid::parse_str(&sid)
                    .map_err(|e| AppError::transient(format!("corrupt session id: {e}")))?,
                voter_type,
                voter_id,
                ranked_responses,
                weight: row.get("weight"),
                created_at: row.get("created_at"),
            });
        }
        Ok(votes)
    }
}

fn has_duplicates(labels: &[String]) -> bool {
    let mut seen = std::collections::BTreeSet::new();
    labels.iter().any(|label| !seen.insert(label.as_str()))
}
