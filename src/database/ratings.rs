// ABOUTME: Database operations for model ratings, rating history, and matchup counters
// ABOUTME: The rating update runs as a single commit-or-nothing transaction
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use sqlx::{Row, Sqlite, Transaction};
use uuid::Uuid;

use super::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{EloHistoryEntry, Matchup, ModelRating};
use crate::rating::{RatingChange, RatingSnapshot, RatingUpdate, INITIAL_RATING};

impl Database {
    /// Current rating snapshot for one model in a category scope, defaulting
    /// to the initial rating with zero games
    ///
    /// # Errors
    ///
    /// Returns `Transient` on I/O faults.
    pub async fn rating_snapshot(
        &self,
        model_id: &str,
        category_id: Option<i64>,
    ) -> AppResult<RatingSnapshot> {
        let row = sqlx::query(
            r"
            SELECT rating, wins, losses, draws
            FROM model_ratings
            WHERE model_id = ? AND category_id IS ?
            ",
        )
        .bind(model_id)
        .bind(category_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map_or_else(RatingSnapshot::default, |r| {
            let wins: i64 = r.get("wins");
            let losses: i64 = r.get("losses");
            let draws: i64 = r.get("draws");
            RatingSnapshot {
                rating: r.get("rating"),
                games_played: wins + losses + draws,
            }
        }))
    }

    /// Global ratings for a set of models, defaulting absentees to the
    /// initial rating. Used for the chairperson tiebreak.
    ///
    /// # Errors
    ///
    /// Returns `Transient` on I/O faults.
    pub async fn global_ratings(&self, model_ids: &[String]) -> AppResult<BTreeMap<String, i64>> {
        let mut ratings = BTreeMap::new();
        for model_id in model_ids {
            let snapshot = self.rating_snapshot(model_id, None).await?;
            ratings.insert(model_id.clone(), snapshot.rating);
        }
        Ok(ratings)
    }

    /// Apply a rating update as one transaction.
    ///
    /// Reads the current snapshot of every model named on any ballot, hands
    /// them to `compute`, then writes new ratings, appends history, and
    /// bumps matchup counters. Either every write commits or none does.
    ///
    /// # Errors
    ///
    /// Propagates the error from `compute` (rolling back), or `Transient` on
    /// I/O faults.
    pub async fn compute_rating_update<F>(
        &self,
        session_id: Uuid,
        category_id: Option<i64>,
        ballots: &BTreeMap<String, Vec<String>>,
        compute: F,
    ) -> AppResult<Vec<RatingChange>>
    where
        F: FnOnce(&BTreeMap<String, RatingSnapshot>) -> AppResult<RatingUpdate>,
    {
        let models: BTreeSet<&String> = ballots.values().flatten().collect();

        let mut tx = self.pool.begin().await?;

        let mut snapshots = BTreeMap::new();
        for model_id in &models {
            let snapshot = rating_snapshot_tx(&mut tx, model_id, category_id).await?;
            snapshots.insert((*model_id).clone(), snapshot);
        }

        let update = compute(&snapshots)?;
        let now = Utc::now();

        for change in &update.changes {
            let record = update
                .records
                .get(&change.model_id)
                .copied()
                .unwrap_or_default();

            // Absolute replacement of the stored rating by the computed one.
            let updated = sqlx::query(
                r"
                UPDATE model_ratings
                SET rating = ?, wins = wins + ?, losses = losses + ?, draws = draws + ?,
                    updated_at = ?
                WHERE model_id = ? AND category_id IS ?
                ",
            )
            .bind(change.new_rating)
            .bind(record.wins)
            .bind(record.losses)
            .bind(record.draws)
            .bind(now)
            .bind(&change.model_id)
            .bind(category_id)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 0 {
                sqlx::query(
                    r"
                    INSERT INTO model_ratings
                        (model_id, category_id, rating, wins, losses, draws, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    ",
                )
                .bind(&change.model_id)
                .bind(category_id)
                .bind(change.new_rating)
                .bind(record.wins)
                .bind(record.losses)
                .bind(record.draws)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }

            sqlx::query(
                r"
                INSERT INTO elo_history
                    (model_id, category_id, session_id, old_rating, new_rating, change, reason, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )
            .bind(&change.model_id)
            .bind(category_id)
            .bind(session_id.to_string())
            .bind(change.old_rating)
            .bind(change.new_rating)
            .bind(change.change)
            .bind(change.reason.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        for outcome in &update.pair_outcomes {
            let (a_wins, b_wins, draws) = match outcome.winner.as_deref() {
                Some(winner) if winner == outcome.model_a => (1, 0, 0),
                Some(_) => (0, 1, 0),
                None => (0, 0, 1),
            };

            let updated = sqlx::query(
                r"
                UPDATE matchups
                SET model_a_wins = model_a_wins + ?, model_b_wins = model_b_wins + ?,
                    draws = draws + ?, updated_at = ?
                WHERE model_a_id = ? AND model_b_id = ? AND category_id IS ?
                ",
            )
            .bind(a_wins)
            .bind(b_wins)
            .bind(draws)
            .bind(now)
            .bind(&outcome.model_a)
            .bind(&outcome.model_b)
            .bind(category_id)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 0 {
                sqlx::query(
                    r"
                    INSERT INTO matchups
                        (model_a_id, model_b_id, category_id, model_a_wins, model_b_wins, draws, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    ",
                )
                .bind(&outcome.model_a)
                .bind(&outcome.model_b)
                .bind(category_id)
                .bind(a_wins)
                .bind(b_wins)
                .bind(draws)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(update.changes)
    }

    /// Ratings in a category scope, strongest first
    ///
    /// # Errors
    ///
    /// Returns `Transient` on I/O faults.
    pub async fn list_ratings(&self, category_id: Option<i64>) -> AppResult<Vec<ModelRating>> {
        let rows = sqlx::query(
            r"
            SELECT model_id, category_id, rating, wins, losses, draws, updated_at
            FROM model_ratings
            WHERE category_id IS ?
            ORDER BY rating DESC, model_id
            ",
        )
        .bind(category_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ModelRating {
                model_id: row.get("model_id"),
                category_id: row.get("category_id"),
                rating: row.get("rating"),
                wins: row.get("wins"),
                losses: row.get("losses"),
                draws: row.get("draws"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    /// Recent rating history for a model, newest first
    ///
    /// # Errors
    ///
    /// Returns `Transient` on I/O faults.
    pub async fn rating_history(
        &self,
        model_id: &str,
        limit: i64,
    ) -> AppResult<Vec<EloHistoryEntry>> {
        let limit = limit.clamp(1, 500);
        let rows = sqlx::query(
            r"
            SELECT id, model_id, category_id, session_id, old_rating, new_rating,
                   change, reason, created_at
            FROM elo_history
            WHERE model_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            ",
        )
        .bind(model_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let session_id: Option<String> = row.get("session_id");
            let session_id = match session_id {
                Some(raw) => Some(
                    Uuid::parse_str(&raw)
                        .map_err(|e| AppError::transient(format!("corrupt session id: {e}")))?,
                ),
                None => None,
            };
            entries.push(EloHistoryEntry {
                id: row.get("id"),
                model_id: row.get("model_id"),
                category_id: row.get("category_id"),
                session_id,
                old_rating: row.get("old_rating"),
                new_rating: row.get("new_rating"),
                change: row.get("change"),
                reason: row.get("reason"),
                created_at: row.get("created_at"),
            });
        }
        Ok(entries)
    }

    /// Head-to-head record of a model pair in a category scope
    ///
    /// # Errors
    ///
    /// Returns `Transient` on I/O faults.
    pub async fn get_matchup(
        &self,
        model_a: &str,
        model_b: &str,
        category_id: Option<i64>,
    ) -> AppResult<Option<Matchup>> {
        let (first, second) = if model_a <= model_b {
            (model_a, model_b)
        } else {
            (model_b, model_a)
        };

        let row = sqlx::query(
            r"
            SELECT model_a_id, model_b_id, category_id, model_a_wins, model_b_wins,
                   draws, updated_at
            FROM matchups
            WHERE model_a_id = ? AND model_b_id = ? AND category_id IS ?
            ",
        )
        .bind(first)
        .bind(second)
        .bind(category_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Matchup {
            model_a_id: r.get("model_a_id"),
            model_b_id: r.get("model_b_id"),
            category_id: r.get("category_id"),
            model_a_wins: r.get("model_a_wins"),
            model_b_wins: r.get("model_b_wins"),
            draws: r.get("draws"),
            updated_at: r.get("updated_at"),
        }))
    }
}

async fn rating_snapshot_tx(
    tx: &mut Transaction<'_, Sqlite>,
    model_id: &str,
    category_id: Option<i64>,
) -> AppResult<RatingSnapshot> {
    let row = sqlx::query(
        r"
        SELECT rating, wins, losses, draws
        FROM model_ratings
        WHERE model_id = ? AND category_id IS ?
        ",
    )
    .bind(model_id)
    .bind(category_id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.map_or(
        RatingSnapshot {
            rating: INITIAL_RATING,
            games_played: 0,
        },
        |r| {
            let wins: i64 = r.get("wins");
            let losses: i64 = r.get("losses");
            let draws: i64 = r.get("draws");
            RatingSnapshot {
                rating: r.get("rating"),
                games_played: wins + losses + draws,
            }
        },
    ))
}
