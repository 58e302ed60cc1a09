//! Update-candidate recording and lifecycle.

use crate::error::DatabaseError;
use crate::types::{GameId, GameUpdate, NewGameUpdate, UpdateStatus};
use crate::{Error, Result};

use super::{Database, GameUpdateRow};

/// Column list shared by every update projection; no `SELECT *`
const UPDATE_COLUMNS: &str = "id, game_id, update_type, title, version, size, quality, \
     seeders, download_url, indexer, status, found_at";

impl Database {
    /// Batch-insert update candidates inside one transaction
    ///
    /// `INSERT OR IGNORE` backs the `(game_id, download_url)` and
    /// `(game_id, title)` dedup keys; rows already recorded are skipped.
    /// Returns the number of rows actually inserted.
    pub async fn insert_game_updates(&self, updates: &[NewGameUpdate]) -> Result<u64> {
        if updates.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        let mut inserted = 0u64;
        for update in updates {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO game_updates (
                    game_id, update_type, title, version, size,
                    quality, seeders, download_url, indexer, status, found_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?)
                "#,
            )
            .bind(update.game_id)
            .bind(update.update_type.as_str())
            .bind(&update.title)
            .bind(&update.version)
            .bind(update.size)
            .bind(update.quality.map(|q| q.as_str()))
            .bind(update.seeders)
            .bind(&update.download_url)
            .bind(&update.indexer)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to insert game update: {}",
                    e
                )))
            })?;

            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit game updates: {}",
                e
            )))
        })?;

        Ok(inserted)
    }

    /// Get an update candidate by ID
    pub async fn game_update(&self, id: i64) -> Result<Option<GameUpdate>> {
        let row = sqlx::query_as::<_, GameUpdateRow>(&format!(
            "SELECT {UPDATE_COLUMNS} FROM game_updates WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get game update: {}",
                e
            )))
        })?;

        Ok(row.map(GameUpdate::from))
    }

    /// All update candidates for a game, newest first
    pub async fn updates_for_game(&self, game_id: GameId) -> Result<Vec<GameUpdate>> {
        let rows = sqlx::query_as::<_, GameUpdateRow>(&format!(
            "SELECT {UPDATE_COLUMNS} FROM game_updates \
             WHERE game_id = ? ORDER BY found_at DESC, id DESC"
        ))
        .bind(game_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list updates for game: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(GameUpdate::from).collect())
    }

    /// All pending update candidates across the catalog, newest first
    pub async fn pending_updates(&self) -> Result<Vec<GameUpdate>> {
        let rows = sqlx::query_as::<_, GameUpdateRow>(&format!(
            "SELECT {UPDATE_COLUMNS} FROM game_updates \
             WHERE status = 'pending' ORDER BY found_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list pending updates: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(GameUpdate::from).collect())
    }

    /// Update an update candidate's lifecycle status
    pub async fn set_update_status(&self, id: i64, status: UpdateStatus) -> Result<()> {
        sqlx::query("UPDATE game_updates SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set update status: {}",
                    e
                )))
            })?;

        Ok(())
    }
}
