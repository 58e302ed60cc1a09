//! Grabbed-release lifecycle and download history.

use crate::error::DatabaseError;
use crate::types::{GameId, NewRelease, Release, ReleaseId, ReleaseStatus};
use crate::{Error, Result};

use super::{Database, ReleaseRow};

/// Column list shared by every release projection; no `SELECT *`
const RELEASE_COLUMNS: &str = "id, game_id, title, size, seeders, download_url, indexer, \
     quality, torrent_hash, status, grabbed_at";

impl Database {
    /// Insert a new release record
    pub async fn insert_release(&self, release: &NewRelease) -> Result<ReleaseId> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO releases (
                game_id, title, size, seeders, download_url,
                indexer, quality, status, grabbed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(release.game_id)
        .bind(&release.title)
        .bind(release.size)
        .bind(release.seeders)
        .bind(&release.download_url)
        .bind(&release.indexer)
        .bind(release.quality.map(|q| q.as_str()))
        .bind(release.status.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert release: {}",
                e
            )))
        })?;

        Ok(ReleaseId(result.last_insert_rowid()))
    }

    /// Get a release by ID
    pub async fn release(&self, id: ReleaseId) -> Result<Option<Release>> {
        let row = sqlx::query_as::<_, ReleaseRow>(&format!(
            "SELECT {RELEASE_COLUMNS} FROM releases WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get release: {}",
                e
            )))
        })?;

        Ok(row.map(Release::from))
    }

    /// Download history for a game, newest first
    pub async fn releases_for_game(&self, game_id: GameId) -> Result<Vec<Release>> {
        let rows = sqlx::query_as::<_, ReleaseRow>(&format!(
            "SELECT {RELEASE_COLUMNS} FROM releases \
             WHERE game_id = ? ORDER BY grabbed_at DESC, id DESC"
        ))
        .bind(game_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list releases for game: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(Release::from).collect())
    }

    /// List releases in any of the given statuses
    pub async fn releases_with_statuses(&self, statuses: &[ReleaseStatus]) -> Result<Vec<Release>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT {RELEASE_COLUMNS} FROM releases \
             WHERE status IN ({placeholders}) ORDER BY grabbed_at ASC, id ASC"
        );

        let mut query = sqlx::query_as::<_, ReleaseRow>(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }

        let rows = query.fetch_all(&self.pool).await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list releases by status: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(Release::from).collect())
    }

    /// The one non-terminal release for a game, when it exists
    pub async fn active_release_for_game(&self, game_id: GameId) -> Result<Option<Release>> {
        let row = sqlx::query_as::<_, ReleaseRow>(&format!(
            "SELECT {RELEASE_COLUMNS} FROM releases \
             WHERE game_id = ? AND status IN ('pending', 'downloading') \
             ORDER BY grabbed_at DESC LIMIT 1"
        ))
        .bind(game_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get active release: {}",
                e
            )))
        })?;

        Ok(row.map(Release::from))
    }

    /// Update a release's lifecycle status
    pub async fn update_release_status(&self, id: ReleaseId, status: ReleaseStatus) -> Result<()> {
        sqlx::query("UPDATE releases SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update release status: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Record the daemon torrent hash captured at grab time
    pub async fn set_release_torrent_hash(&self, id: ReleaseId, hash: &str) -> Result<()> {
        sqlx::query("UPDATE releases SET torrent_hash = ? WHERE id = ?")
            .bind(hash)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set torrent hash: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Delete many releases in a single statement
    pub async fn batch_delete_releases(&self, ids: &[ReleaseId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("DELETE FROM releases WHERE id IN ({placeholders})");

        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(*id);
        }

        let result = query.execute(&self.pool).await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to batch-delete releases: {}",
                e
            )))
        })?;

        Ok(result.rows_affected())
    }
}
