// ABOUTME: Database operations for the model catalog
// ABOUTME: Models register at admission, deduplicated by id
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

use sqlx::Row;

use super::Database;
use crate::errors::AppResult;
use crate::models::ModelInfo;

impl Database {
    /// Insert a model into the catalog if it is not already known
    ///
    /// # Errors
    ///
    /// Returns `Transient` on I/O faults.
    pub async fn register_model(&self, model: &ModelInfo) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO models (id, display_name, provider)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            ",
        )
        .bind(&model.id)
        .bind(&model.display_name)
        .bind(&model.provider)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All catalogued models, ordered by id
    ///
    /// # Errors
    ///
    /// Returns `Transient` on I/O faults.
    pub async fn list_catalog(&self) -> AppResult<Vec<ModelInfo>> {
        let rows = sqlx::query("SELECT id, display_name, provider FROM models ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| ModelInfo {
                id: row.get("id"),
                display_name: row.get("display_name"),
                provider: row.get("provider"),
            })
            .collect())
    }
}
