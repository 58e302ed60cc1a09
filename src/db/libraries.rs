//! Library roots and scanned folder records.

use crate::error::DatabaseError;
use crate::types::{GameId, Library, LibraryFile, NewLibrary, NewLibraryFile};
use crate::{Error, Result};

use super::{Database, LibraryFileRow, LibraryRow};

/// Column list shared by every library projection; no `SELECT *`
const LIBRARY_COLUMNS: &str = "id, name, path, platform, monitored, download_enabled, priority";

/// Column list shared by every library-file projection; no `SELECT *`
const LIBRARY_FILE_COLUMNS: &str = "id, folder_path, parsed_title, parsed_year, matched_game_id, \
     library_id, ignored, scanned_at";

impl Database {
    /// Insert a new library root
    pub async fn insert_library(&self, library: &NewLibrary) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO libraries (name, path, platform, monitored, download_enabled, priority)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&library.name)
        .bind(&library.path)
        .bind(&library.platform)
        .bind(library.monitored)
        .bind(library.download_enabled)
        .bind(library.priority)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert library: {}",
                e
            )))
        })?;

        Ok(result.last_insert_rowid())
    }

    /// Get a library by ID
    pub async fn library(&self, id: i64) -> Result<Option<Library>> {
        let row = sqlx::query_as::<_, LibraryRow>(&format!(
            "SELECT {LIBRARY_COLUMNS} FROM libraries WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get library: {}",
                e
            )))
        })?;

        Ok(row.map(Library::from))
    }

    /// All library roots, best pick first
    pub async fn libraries(&self) -> Result<Vec<Library>> {
        let rows = sqlx::query_as::<_, LibraryRow>(&format!(
            "SELECT {LIBRARY_COLUMNS} FROM libraries ORDER BY priority ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list libraries: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(Library::from).collect())
    }

    /// Delete a library root; scanned folder rows are detached, not removed
    pub async fn delete_library(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM libraries WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete library: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// Insert or refresh a scanned folder record
    ///
    /// Upsert keyed on the unique `folder_path`; a rescan refreshes the
    /// parse results and scan timestamp while preserving the ignored flag
    /// and any existing match.
    pub async fn upsert_library_file(&self, file: &NewLibraryFile) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO library_files (
                folder_path, parsed_title, parsed_year, library_id, scanned_at
            ) VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(folder_path) DO UPDATE SET
                parsed_title = excluded.parsed_title,
                parsed_year = excluded.parsed_year,
                library_id = excluded.library_id,
                scanned_at = excluded.scanned_at
            "#,
        )
        .bind(&file.folder_path)
        .bind(&file.parsed_title)
        .bind(file.parsed_year)
        .bind(file.library_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to upsert library file: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Scanned folder records, optionally restricted to one library
    pub async fn library_files(&self, library_id: Option<i64>) -> Result<Vec<LibraryFile>> {
        let rows = match library_id {
            Some(id) => {
                sqlx::query_as::<_, LibraryFileRow>(&format!(
                    "SELECT {LIBRARY_FILE_COLUMNS} FROM library_files \
                     WHERE library_id = ? ORDER BY folder_path ASC"
                ))
                .bind(id)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, LibraryFileRow>(&format!(
                    "SELECT {LIBRARY_FILE_COLUMNS} FROM library_files ORDER BY folder_path ASC"
                ))
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list library files: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(LibraryFile::from).collect())
    }

    /// Record which catalog game a scanned folder belongs to
    pub async fn set_library_file_match(&self, id: i64, game_id: GameId) -> Result<()> {
        sqlx::query("UPDATE library_files SET matched_game_id = ? WHERE id = ?")
            .bind(game_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set library file match: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Exclude or re-include a scanned folder from matching
    pub async fn set_library_file_ignored(&self, id: i64, ignored: bool) -> Result<()> {
        sqlx::query("UPDATE library_files SET ignored = ? WHERE id = ?")
            .bind(ignored)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set library file ignored flag: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Delete scanned folder rows whose folders vanished from disk
    pub async fn delete_library_files(&self, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("DELETE FROM library_files WHERE id IN ({placeholders})");

        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(*id);
        }

        let result = query.execute(&self.pool).await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to delete library files: {}",
                e
            )))
        })?;

        Ok(result.rows_affected())
    }
}
