//! Database lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::path::Path;

use super::Database;

impl Database {
    /// Create a new database connection
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: &Path) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Create an in-memory database, used by tests
    pub async fn in_memory() -> Result<Self> {
        use sqlx::sqlite::SqliteConnectOptions;
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse in-memory database options: {}",
                    e
                )))
            })?
            .foreign_keys(true);

        // A single connection keeps the in-memory database alive and shared
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to connect to in-memory database: {}",
                    e
                )))
            })?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create schema_version table: {}",
                e
            )))
        })?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?
                .flatten();

        let current_version = current_version.unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&mut conn).await?;
        }
        if current_version < 2 {
            Self::migrate_v2(&mut conn).await?;
        }

        Ok(())
    }

    async fn exec_migration(conn: &mut SqliteConnection, version: i64, sql: &str) -> Result<()> {
        sqlx::query("BEGIN").execute(&mut *conn).await.map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            if let Err(e) = sqlx::query(statement).execute(&mut *conn).await {
                sqlx::query("ROLLBACK").execute(&mut *conn).await.ok();
                return Err(Error::Database(DatabaseError::MigrationFailed(format!(
                    "Migration v{} failed: {}",
                    version, e
                ))));
            }
        }

        let now = chrono::Utc::now().timestamp();
        if let Err(e) = sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(now)
            .execute(&mut *conn)
            .await
        {
            sqlx::query("ROLLBACK").execute(&mut *conn).await.ok();
            return Err(Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to record migration v{}: {}",
                version, e
            ))));
        }

        sqlx::query("COMMIT").execute(&mut *conn).await.map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to commit migration v{}: {}",
                version, e
            )))
        })?;

        Ok(())
    }

    /// Migration v1: Create initial schema
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying database migration v1");

        Self::exec_migration(
            conn,
            1,
            r#"
            CREATE TABLE games (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                external_id INTEGER NOT NULL UNIQUE,
                title TEXT NOT NULL,
                year INTEGER,
                platform TEXT,
                cover_url TEXT,
                folder_path TEXT,
                monitored INTEGER NOT NULL DEFAULT 1,
                status TEXT NOT NULL DEFAULT 'wanted',
                installed_version TEXT,
                installed_quality TEXT,
                update_policy TEXT NOT NULL DEFAULT 'notify',
                update_available INTEGER NOT NULL DEFAULT 0,
                last_update_check INTEGER,
                latest_version TEXT,
                library_id INTEGER,
                added_at INTEGER NOT NULL
            );

            CREATE TABLE releases (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                game_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                size INTEGER NOT NULL DEFAULT 0,
                seeders INTEGER NOT NULL DEFAULT 0,
                download_url TEXT NOT NULL,
                indexer TEXT,
                quality TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                grabbed_at INTEGER NOT NULL
            );

            CREATE TABLE game_updates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                game_id INTEGER NOT NULL REFERENCES games(id) ON DELETE CASCADE,
                update_type TEXT NOT NULL,
                title TEXT NOT NULL,
                version TEXT,
                size INTEGER NOT NULL DEFAULT 0,
                quality TEXT,
                seeders INTEGER NOT NULL DEFAULT 0,
                download_url TEXT NOT NULL,
                indexer TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                found_at INTEGER NOT NULL,
                UNIQUE (game_id, download_url),
                UNIQUE (game_id, title)
            );

            CREATE TABLE libraries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                path TEXT NOT NULL,
                platform TEXT,
                monitored INTEGER NOT NULL DEFAULT 1,
                download_enabled INTEGER NOT NULL DEFAULT 1,
                priority INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE library_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                folder_path TEXT NOT NULL UNIQUE,
                parsed_title TEXT NOT NULL,
                parsed_year INTEGER,
                matched_game_id INTEGER REFERENCES games(id) ON DELETE SET NULL,
                library_id INTEGER REFERENCES libraries(id) ON DELETE SET NULL,
                ignored INTEGER NOT NULL DEFAULT 0,
                scanned_at INTEGER NOT NULL
            );

            CREATE TABLE settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE INDEX idx_games_status ON games(status);
            CREATE INDEX idx_releases_game_id ON releases(game_id);
            CREATE INDEX idx_game_updates_game_id ON game_updates(game_id)
            "#,
        )
        .await
    }

    /// Migration v2: torrent hash storage on releases
    ///
    /// Reconciliation by title prefix misassociates releases whose titles
    /// share a prefix; the stored hash is the authoritative join key.
    async fn migrate_v2(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying database migration v2");

        Self::exec_migration(
            conn,
            2,
            r#"
            ALTER TABLE releases ADD COLUMN torrent_hash TEXT;

            CREATE INDEX idx_releases_status ON releases(status)
            "#,
        )
        .await
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
