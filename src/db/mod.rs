//! Database layer for gamearr
//!
//! Handles SQLite persistence for games, releases, update candidates,
//! libraries, library files, and settings.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`games`] — Game catalog CRUD and batch status updates
//! - [`releases`] — Grabbed-release lifecycle and download history
//! - [`updates`] — Update-candidate recording and lifecycle
//! - [`libraries`] — Library roots and scanned folder records
//! - [`settings`] — Key/value settings rows

use crate::types::{
    Game, GameId, GameStatus, GameUpdate, Library, LibraryFile, Quality, Release, ReleaseId,
    ReleaseStatus, UpdatePolicy, UpdateStatus, UpdateType,
};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::FromRow;
use sqlx::sqlite::SqlitePool;

mod games;
mod libraries;
mod migrations;
mod releases;
mod settings;
mod updates;

/// Database handle for gamearr
pub struct Database {
    pool: SqlitePool,
}

/// Convert a persisted Unix timestamp to a UTC datetime
fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

/// Game record from database
#[derive(Debug, Clone, FromRow)]
struct GameRow {
    id: i64,
    external_id: i64,
    title: String,
    year: Option<i32>,
    platform: Option<String>,
    cover_url: Option<String>,
    folder_path: Option<String>,
    monitored: bool,
    status: String,
    installed_version: Option<String>,
    installed_quality: Option<String>,
    update_policy: String,
    update_available: bool,
    last_update_check: Option<i64>,
    latest_version: Option<String>,
    library_id: Option<i64>,
    added_at: i64,
}

impl From<GameRow> for Game {
    fn from(row: GameRow) -> Self {
        Game {
            id: GameId(row.id),
            external_id: row.external_id,
            title: row.title,
            year: row.year,
            platform: row.platform,
            cover_url: row.cover_url,
            folder_path: row.folder_path,
            monitored: row.monitored,
            status: GameStatus::parse(&row.status),
            installed_version: row.installed_version,
            installed_quality: row.installed_quality.as_deref().and_then(Quality::parse),
            update_policy: UpdatePolicy::parse(&row.update_policy),
            update_available: row.update_available,
            last_update_check: row.last_update_check.map(timestamp),
            latest_version: row.latest_version,
            library_id: row.library_id,
            added_at: timestamp(row.added_at),
        }
    }
}

/// Release record from database
#[derive(Debug, Clone, FromRow)]
struct ReleaseRow {
    id: i64,
    game_id: i64,
    title: String,
    size: i64,
    seeders: i64,
    download_url: String,
    indexer: Option<String>,
    quality: Option<String>,
    torrent_hash: Option<String>,
    status: String,
    grabbed_at: i64,
}

impl From<ReleaseRow> for Release {
    fn from(row: ReleaseRow) -> Self {
        Release {
            id: ReleaseId(row.id),
            game_id: GameId(row.game_id),
            title: row.title,
            size: row.size,
            seeders: row.seeders,
            download_url: row.download_url,
            indexer: row.indexer,
            quality: row.quality.as_deref().and_then(Quality::parse),
            torrent_hash: row.torrent_hash,
            status: ReleaseStatus::parse(&row.status),
            grabbed_at: timestamp(row.grabbed_at),
        }
    }
}

/// Update-candidate record from database
#[derive(Debug, Clone, FromRow)]
struct GameUpdateRow {
    id: i64,
    game_id: i64,
    update_type: String,
    title: String,
    version: Option<String>,
    size: i64,
    quality: Option<String>,
    seeders: i64,
    download_url: String,
    indexer: Option<String>,
    status: String,
    found_at: i64,
}

impl From<GameUpdateRow> for GameUpdate {
    fn from(row: GameUpdateRow) -> Self {
        GameUpdate {
            id: row.id,
            game_id: GameId(row.game_id),
            update_type: UpdateType::parse(&row.update_type).unwrap_or(UpdateType::BetterRelease),
            title: row.title,
            version: row.version,
            size: row.size,
            quality: row.quality.as_deref().and_then(Quality::parse),
            seeders: row.seeders,
            download_url: row.download_url,
            indexer: row.indexer,
            status: UpdateStatus::parse(&row.status),
            found_at: timestamp(row.found_at),
        }
    }
}

/// Library record from database
#[derive(Debug, Clone, FromRow)]
struct LibraryRow {
    id: i64,
    name: String,
    path: String,
    platform: Option<String>,
    monitored: bool,
    download_enabled: bool,
    priority: i64,
}

impl From<LibraryRow> for Library {
    fn from(row: LibraryRow) -> Self {
        Library {
            id: row.id,
            name: row.name,
            path: row.path,
            platform: row.platform,
            monitored: row.monitored,
            download_enabled: row.download_enabled,
            priority: row.priority,
        }
    }
}

/// Scanned-folder record from database
#[derive(Debug, Clone, FromRow)]
struct LibraryFileRow {
    id: i64,
    folder_path: String,
    parsed_title: String,
    parsed_year: Option<i32>,
    matched_game_id: Option<i64>,
    library_id: Option<i64>,
    ignored: bool,
    scanned_at: i64,
}

impl From<LibraryFileRow> for LibraryFile {
    fn from(row: LibraryFileRow) -> Self {
        LibraryFile {
            id: row.id,
            folder_path: row.folder_path,
            parsed_title: row.parsed_title,
            parsed_year: row.parsed_year,
            matched_game_id: row.matched_game_id.map(GameId),
            library_id: row.library_id,
            ignored: row.ignored,
            scanned_at: timestamp(row.scanned_at),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
