//! Game catalog CRUD and batch status operations.

use crate::error::DatabaseError;
use crate::types::{Game, GameId, GameStatus, NewGame, Quality};
use crate::{Error, Result};
use std::collections::HashMap;

use super::{Database, GameRow};

/// Column list shared by every game projection; no `SELECT *`
const GAME_COLUMNS: &str = "id, external_id, title, year, platform, cover_url, folder_path, \
     monitored, status, installed_version, installed_quality, update_policy, \
     update_available, last_update_check, latest_version, library_id, added_at";

impl Database {
    /// Insert a new game
    ///
    /// Fails with [`Error::Conflict`] when the external metadata id is
    /// already in the catalog.
    pub async fn insert_game(&self, game: &NewGame) -> Result<GameId> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO games (
                external_id, title, year, platform, cover_url,
                monitored, status, library_id, added_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(game.external_id)
        .bind(&game.title)
        .bind(game.year)
        .bind(&game.platform)
        .bind(&game.cover_url)
        .bind(game.monitored)
        .bind(game.status.as_str())
        .bind(game.library_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::Conflict(format!("game with external id {} already exists", game.external_id))
            }
            _ => Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert game: {}",
                e
            ))),
        })?;

        Ok(GameId(result.last_insert_rowid()))
    }

    /// Get a game by ID
    pub async fn game(&self, id: GameId) -> Result<Option<Game>> {
        let row = sqlx::query_as::<_, GameRow>(&format!(
            "SELECT {GAME_COLUMNS} FROM games WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get game: {}",
                e
            )))
        })?;

        Ok(row.map(Game::from))
    }

    /// Get a game by its external metadata id
    pub async fn game_by_external_id(&self, external_id: i64) -> Result<Option<Game>> {
        let row = sqlx::query_as::<_, GameRow>(&format!(
            "SELECT {GAME_COLUMNS} FROM games WHERE external_id = ?"
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get game by external id: {}",
                e
            )))
        })?;

        Ok(row.map(Game::from))
    }

    /// List all games, newest first
    pub async fn games(&self) -> Result<Vec<Game>> {
        let rows = sqlx::query_as::<_, GameRow>(&format!(
            "SELECT {GAME_COLUMNS} FROM games ORDER BY added_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list games: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(Game::from).collect())
    }

    /// List games with the given status
    pub async fn games_with_status(&self, status: GameStatus) -> Result<Vec<Game>> {
        let rows = sqlx::query_as::<_, GameRow>(&format!(
            "SELECT {GAME_COLUMNS} FROM games WHERE status = ? ORDER BY added_at ASC, id ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list games by status: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(Game::from).collect())
    }

    /// List monitored games with the given status
    pub async fn monitored_games_with_status(&self, status: GameStatus) -> Result<Vec<Game>> {
        let rows = sqlx::query_as::<_, GameRow>(&format!(
            "SELECT {GAME_COLUMNS} FROM games \
             WHERE monitored = 1 AND status = ? ORDER BY added_at ASC, id ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list monitored games: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(Game::from).collect())
    }

    /// Batch-fetch games by id into a map
    ///
    /// One `IN` query regardless of cohort size; absent ids are simply
    /// missing from the result map.
    pub async fn games_by_ids(&self, ids: &[GameId]) -> Result<HashMap<GameId, Game>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("SELECT {GAME_COLUMNS} FROM games WHERE id IN ({placeholders})");

        let mut query = sqlx::query_as::<_, GameRow>(&sql);
        for id in ids {
            query = query.bind(*id);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to batch-fetch games: {}",
                e
            )))
        })?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let game = Game::from(row);
                (game.id, game)
            })
            .collect())
    }

    /// Update one game's status
    pub async fn update_game_status(&self, id: GameId, status: GameStatus) -> Result<()> {
        sqlx::query("UPDATE games SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update game status: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Update many games' status in a single statement
    pub async fn batch_update_game_status(
        &self,
        ids: &[GameId],
        status: GameStatus,
    ) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("UPDATE games SET status = ? WHERE id IN ({placeholders})");

        let mut query = sqlx::query(&sql).bind(status.as_str());
        for id in ids {
            query = query.bind(*id);
        }

        let result = query.execute(&self.pool).await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to batch-update game status: {}",
                e
            )))
        })?;

        Ok(result.rows_affected())
    }

    /// Record the folder a game was organized into
    pub async fn set_game_folder(&self, id: GameId, folder_path: &str) -> Result<()> {
        sqlx::query("UPDATE games SET folder_path = ? WHERE id = ?")
            .bind(folder_path)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set game folder: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Record what is installed on disk after a completed transfer
    pub async fn set_game_installed(
        &self,
        id: GameId,
        version: Option<&str>,
        quality: Option<Quality>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE games SET installed_version = COALESCE(?, installed_version), \
             installed_quality = COALESCE(?, installed_quality) WHERE id = ?",
        )
        .bind(version)
        .bind(quality.map(|q| q.as_str()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to set installed info: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Flag that pending update candidates exist, optionally recording the
    /// newest version seen
    pub async fn mark_updates_available(
        &self,
        id: GameId,
        latest_version: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE games SET update_available = 1, \
             latest_version = COALESCE(?, latest_version) WHERE id = ?",
        )
        .bind(latest_version)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark updates available: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Stamp the time the update detector last examined a game
    pub async fn set_last_update_check(&self, id: GameId) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE games SET last_update_check = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set last update check: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Set how a game reacts to detected updates
    pub async fn set_game_update_policy(
        &self,
        id: GameId,
        policy: crate::types::UpdatePolicy,
    ) -> Result<()> {
        sqlx::query("UPDATE games SET update_policy = ? WHERE id = ?")
            .bind(policy.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set update policy: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Set whether a game is monitored
    pub async fn set_game_monitored(&self, id: GameId, monitored: bool) -> Result<()> {
        sqlx::query("UPDATE games SET monitored = ? WHERE id = ?")
            .bind(monitored)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set monitored flag: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Delete a game along with its releases; update candidates cascade
    ///
    /// Releases carry no enforced foreign key (a failed release must be
    /// able to outlive its game until the scheduler's reset pass), so they
    /// are removed explicitly here.
    pub async fn delete_game(&self, id: GameId) -> Result<bool> {
        sqlx::query("DELETE FROM releases WHERE game_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete game releases: {}",
                    e
                )))
            })?;

        let result = sqlx::query("DELETE FROM games WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete game: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }
}
