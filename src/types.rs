//! Core domain types for gamearr
//!
//! Identifiers, status enums, and the entity/wire shapes shared between the
//! repositories, integration clients, and background workers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a game
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(pub i64);

impl GameId {
    /// Create a new GameId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for GameId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<GameId> for i64 {
    fn from(id: GameId) -> Self {
        id.0
    }
}

impl PartialEq<i64> for GameId {
    fn eq(&self, other: &i64) -> bool {
        self.0 == *other
    }
}

impl std::fmt::Display for GameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for GameId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for GameId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for GameId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for GameId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Unique identifier for a grabbed release
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReleaseId(pub i64);

impl ReleaseId {
    /// Create a new ReleaseId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for ReleaseId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<ReleaseId> for i64 {
    fn from(id: ReleaseId) -> Self {
        id.0
    }
}

impl std::fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl sqlx::Type<sqlx::Sqlite> for ReleaseId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ReleaseId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ReleaseId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Acquisition status of a game
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    /// Monitored and eligible for automated searching and grabbing
    #[default]
    Wanted,
    /// A release has been grabbed and the transfer is in flight
    Downloading,
    /// The artifact is organized on local storage
    Downloaded,
}

impl GameStatus {
    /// String form persisted to the database
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::Wanted => "wanted",
            GameStatus::Downloading => "downloading",
            GameStatus::Downloaded => "downloaded",
        }
    }

    /// Parse from the persisted string form, defaulting to Wanted for
    /// unknown values
    pub fn parse(s: &str) -> Self {
        match s {
            "downloading" => GameStatus::Downloading,
            "downloaded" => GameStatus::Downloaded,
            _ => GameStatus::Wanted,
        }
    }
}

impl std::fmt::Display for GameStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a game reacts to detected successor releases
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePolicy {
    /// Record updates and surface them to the user
    #[default]
    Notify,
    /// Grab qualifying updates automatically
    Auto,
    /// Never check this game for updates
    Ignore,
}

impl UpdatePolicy {
    /// String form persisted to the database
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdatePolicy::Notify => "notify",
            UpdatePolicy::Auto => "auto",
            UpdatePolicy::Ignore => "ignore",
        }
    }

    /// Parse from the persisted string form, defaulting to Notify
    pub fn parse(s: &str) -> Self {
        match s {
            "auto" => UpdatePolicy::Auto,
            "ignore" => UpdatePolicy::Ignore,
            _ => UpdatePolicy::Notify,
        }
    }
}

/// Lifecycle status of a grabbed release
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseStatus {
    /// Row persisted, daemon add not yet confirmed
    #[default]
    Pending,
    /// Transfer in flight
    Downloading,
    /// Transfer reached 100%
    Completed,
    /// Transfer errored or the grab was rejected
    Failed,
}

impl ReleaseStatus {
    /// String form persisted to the database
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseStatus::Pending => "pending",
            ReleaseStatus::Downloading => "downloading",
            ReleaseStatus::Completed => "completed",
            ReleaseStatus::Failed => "failed",
        }
    }

    /// Parse from the persisted string form, defaulting to Pending
    pub fn parse(s: &str) -> Self {
        match s {
            "downloading" => ReleaseStatus::Downloading,
            "completed" => ReleaseStatus::Completed,
            "failed" => ReleaseStatus::Failed,
            _ => ReleaseStatus::Pending,
        }
    }

    /// True for Completed and Failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReleaseStatus::Completed | ReleaseStatus::Failed)
    }
}

/// What kind of successor a detected update represents
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    /// A newer version of the installed game
    Version,
    /// Additional content (DLC, expansion, edition upgrade)
    Dlc,
    /// Same content at a higher quality rank
    BetterRelease,
}

impl UpdateType {
    /// String form persisted to the database
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateType::Version => "version",
            UpdateType::Dlc => "dlc",
            UpdateType::BetterRelease => "better_release",
        }
    }

    /// Parse from the persisted string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "version" => Some(UpdateType::Version),
            "dlc" => Some(UpdateType::Dlc),
            "better_release" => Some(UpdateType::BetterRelease),
            _ => None,
        }
    }
}

/// Lifecycle status of a detected update candidate
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStatus {
    /// Recorded, awaiting a decision
    #[default]
    Pending,
    /// Dismissed by the user; never resurfaced
    Dismissed,
    /// Delegated to the download service
    Grabbed,
}

impl UpdateStatus {
    /// String form persisted to the database
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStatus::Pending => "pending",
            UpdateStatus::Dismissed => "dismissed",
            UpdateStatus::Grabbed => "grabbed",
        }
    }

    /// Parse from the persisted string form, defaulting to Pending
    pub fn parse(s: &str) -> Self {
        match s {
            "dismissed" => UpdateStatus::Dismissed,
            "grabbed" => UpdateStatus::Grabbed,
            _ => UpdateStatus::Pending,
        }
    }
}

/// Release quality tier, ordered from least to most desirable
///
/// The derived `Ord` is the rank order used by better-release detection:
/// `Scene < Repack < DrmFree < Gog`. An absent quality ranks below Scene.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Quality {
    /// Untouched scene release
    Scene,
    /// Compressed repack
    Repack,
    /// DRM-free build from an unspecified storefront
    DrmFree,
    /// GOG storefront build
    Gog,
}

impl Quality {
    /// Human-readable label, also the persisted form
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Scene => "Scene",
            Quality::Repack => "Repack",
            Quality::DrmFree => "DRM-Free",
            Quality::Gog => "GOG",
        }
    }

    /// Parse from the persisted label
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Scene" => Some(Quality::Scene),
            "Repack" => Some(Quality::Repack),
            "DRM-Free" => Some(Quality::DrmFree),
            "GOG" => Some(Quality::Gog),
            _ => None,
        }
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How confidently a release title was matched to a game title
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchConfidence {
    /// Disqualifies a release from auto-grab regardless of score
    Low,
    /// Default confidence
    Medium,
    /// Strong title evidence
    High,
}

/// Cadence of the whole-catalogue update sweep
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateSchedule {
    /// Every hour
    Hourly,
    /// Every 24 hours
    #[default]
    Daily,
    /// Every 7 days
    Weekly,
}

impl UpdateSchedule {
    /// The sweep period for this cadence
    pub fn period(&self) -> std::time::Duration {
        match self {
            UpdateSchedule::Hourly => std::time::Duration::from_secs(60 * 60),
            UpdateSchedule::Daily => std::time::Duration::from_secs(24 * 60 * 60),
            UpdateSchedule::Weekly => std::time::Duration::from_secs(7 * 24 * 60 * 60),
        }
    }

    /// Parse from the persisted string form, defaulting to Daily
    pub fn parse(s: &str) -> Self {
        match s {
            "hourly" => UpdateSchedule::Hourly,
            "weekly" => UpdateSchedule::Weekly,
            _ => UpdateSchedule::Daily,
        }
    }
}

/// A game in the catalog
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Game {
    /// Internal numeric id
    pub id: GameId,
    /// External metadata provider id
    pub external_id: i64,
    /// Display title
    pub title: String,
    /// Release year, when known
    pub year: Option<i32>,
    /// Platform label (e.g. "PC")
    pub platform: Option<String>,
    /// Cover image URL from the metadata provider
    pub cover_url: Option<String>,
    /// Folder the game is organized into, once downloaded
    pub folder_path: Option<String>,
    /// Whether automation may act on this game
    pub monitored: bool,
    /// Acquisition status
    pub status: GameStatus,
    /// Version currently on disk, when known
    pub installed_version: Option<String>,
    /// Quality of the installed release, when known
    pub installed_quality: Option<Quality>,
    /// How to react to detected updates
    pub update_policy: UpdatePolicy,
    /// Whether at least one pending update candidate exists
    pub update_available: bool,
    /// When the update detector last examined this game
    pub last_update_check: Option<DateTime<Utc>>,
    /// Newest version seen among detected updates
    pub latest_version: Option<String>,
    /// Library this game belongs to, when assigned
    pub library_id: Option<i64>,
    /// When the game was added to the catalog
    pub added_at: DateTime<Utc>,
}

/// New game to be inserted into the database
#[derive(Clone, Debug)]
pub struct NewGame {
    /// External metadata provider id
    pub external_id: i64,
    /// Display title
    pub title: String,
    /// Release year, when known
    pub year: Option<i32>,
    /// Platform label
    pub platform: Option<String>,
    /// Cover image URL
    pub cover_url: Option<String>,
    /// Whether automation may act on this game
    pub monitored: bool,
    /// Initial acquisition status
    pub status: GameStatus,
    /// Library assignment
    pub library_id: Option<i64>,
}

/// A grabbed release
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Release {
    /// Internal numeric id
    pub id: ReleaseId,
    /// Game this release was grabbed for
    pub game_id: GameId,
    /// Release title as reported by the indexer
    pub title: String,
    /// Size in bytes
    pub size: i64,
    /// Seeder count at grab time
    pub seeders: i64,
    /// Torrent or magnet URL handed to the daemon
    pub download_url: String,
    /// Indexer that surfaced this release
    pub indexer: Option<String>,
    /// Extracted quality tag, when present
    pub quality: Option<Quality>,
    /// Daemon torrent hash, captured at grab time when determinable
    pub torrent_hash: Option<String>,
    /// Lifecycle status
    pub status: ReleaseStatus,
    /// When the release was grabbed
    pub grabbed_at: DateTime<Utc>,
}

/// New release to be inserted into the database
#[derive(Clone, Debug)]
pub struct NewRelease {
    /// Game this release is grabbed for
    pub game_id: GameId,
    /// Release title
    pub title: String,
    /// Size in bytes
    pub size: i64,
    /// Seeder count
    pub seeders: i64,
    /// Torrent or magnet URL
    pub download_url: String,
    /// Indexer name
    pub indexer: Option<String>,
    /// Extracted quality tag
    pub quality: Option<Quality>,
    /// Initial lifecycle status
    pub status: ReleaseStatus,
}

/// A candidate successor release for a downloaded game
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameUpdate {
    /// Internal numeric id
    pub id: i64,
    /// Game this update targets
    pub game_id: GameId,
    /// What kind of successor this is
    pub update_type: UpdateType,
    /// Release title
    pub title: String,
    /// Parsed version, for version updates
    pub version: Option<String>,
    /// Size in bytes
    pub size: i64,
    /// Extracted quality tag
    pub quality: Option<Quality>,
    /// Seeder count
    pub seeders: i64,
    /// Torrent or magnet URL
    pub download_url: String,
    /// Indexer name
    pub indexer: Option<String>,
    /// Lifecycle status
    pub status: UpdateStatus,
    /// When the candidate was recorded
    pub found_at: DateTime<Utc>,
}

/// New update candidate to be inserted into the database
#[derive(Clone, Debug)]
pub struct NewGameUpdate {
    /// Game this update targets
    pub game_id: GameId,
    /// What kind of successor this is
    pub update_type: UpdateType,
    /// Release title
    pub title: String,
    /// Parsed version, for version updates
    pub version: Option<String>,
    /// Size in bytes
    pub size: i64,
    /// Extracted quality tag
    pub quality: Option<Quality>,
    /// Seeder count
    pub seeders: i64,
    /// Torrent or magnet URL
    pub download_url: String,
    /// Indexer name
    pub indexer: Option<String>,
}

/// A configured library root directory
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Library {
    /// Internal numeric id
    pub id: i64,
    /// Display name
    pub name: String,
    /// Root directory on disk
    pub path: String,
    /// Platform this library holds, when restricted
    pub platform: Option<String>,
    /// Whether the importer scans this root
    pub monitored: bool,
    /// Whether completed downloads may be organized into this root
    pub download_enabled: bool,
    /// Pick order when several libraries qualify (lower wins)
    pub priority: i64,
}

/// New library root to be inserted into the database
#[derive(Clone, Debug)]
pub struct NewLibrary {
    /// Display name
    pub name: String,
    /// Root directory on disk
    pub path: String,
    /// Platform this library holds, when restricted
    pub platform: Option<String>,
    /// Whether the importer scans this root
    pub monitored: bool,
    /// Whether completed downloads may be organized into this root
    pub download_enabled: bool,
    /// Pick order when several libraries qualify (lower wins)
    pub priority: i64,
}

/// A scanned library folder
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LibraryFile {
    /// Internal numeric id
    pub id: i64,
    /// Absolute folder path; unique per row
    pub folder_path: String,
    /// Title parsed from the folder name
    pub parsed_title: String,
    /// Year parsed from the folder name
    pub parsed_year: Option<i32>,
    /// Catalog game this folder was matched to
    pub matched_game_id: Option<GameId>,
    /// Library root the folder was found under
    pub library_id: Option<i64>,
    /// Excluded from matching by the user
    pub ignored: bool,
    /// When the folder was last seen by a scan
    pub scanned_at: DateTime<Utc>,
}

/// New or refreshed scan record for a library folder
#[derive(Clone, Debug)]
pub struct NewLibraryFile {
    /// Absolute folder path; unique per row
    pub folder_path: String,
    /// Title parsed from the folder name
    pub parsed_title: String,
    /// Year parsed from the folder name
    pub parsed_year: Option<i32>,
    /// Library root the folder was found under
    pub library_id: Option<i64>,
}

/// A release candidate surfaced by the indexer aggregator
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexerRelease {
    /// Globally unique item id per aggregator
    pub guid: String,
    /// Release title
    pub title: String,
    /// Size in bytes
    pub size: i64,
    /// Seeder count
    pub seeders: i64,
    /// When the release was published
    pub published_at: DateTime<Utc>,
    /// Torrent or magnet URL
    pub download_url: String,
    /// Indexer that surfaced this release
    pub indexer: Option<String>,
    /// Native aggregator category ids
    pub categories: Vec<i32>,
}

/// A release candidate scored against a specific game
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScoredRelease {
    /// The underlying candidate
    #[serde(flatten)]
    pub release: IndexerRelease,
    /// Extracted quality tag, when present
    pub quality: Option<Quality>,
    /// Deterministic score; higher is better
    pub score: i32,
    /// Title-match confidence
    pub confidence: MatchConfidence,
}

/// Canonical torrent shape reconciled from the daemon
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Torrent {
    /// Info hash
    pub hash: String,
    /// Display name
    pub name: String,
    /// Total size in bytes
    pub size: i64,
    /// Completion fraction in [0, 1]
    pub progress: f64,
    /// Download speed in bytes per second
    pub download_speed: i64,
    /// Upload speed in bytes per second
    pub upload_speed: i64,
    /// Estimated seconds to completion
    pub eta_secs: i64,
    /// Daemon state tag (only "error" is interpreted by the core)
    pub state: String,
    /// Daemon category
    pub category: String,
    /// Comma-separated daemon tags
    pub tags: String,
    /// Directory the payload is saved under
    pub save_path: String,
    /// Unix timestamp the torrent was added
    pub added_on: i64,
    /// Unix timestamp the torrent completed, when it has
    pub completion_on: Option<i64>,
}

/// Options for adding a torrent to the daemon
#[derive(Clone, Debug, Default)]
pub struct AddTorrentOptions {
    /// Category to file the torrent under
    pub category: Option<String>,
    /// Comma-separated tags
    pub tags: Option<String>,
    /// Add in the paused state
    pub paused: bool,
    /// Explicit save path; daemon default when absent
    pub save_path: Option<String>,
}

/// Result of delegating a release to the daemon
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrabResult {
    /// Persisted release row id; -1 in dry-run mode
    #[serde(rename = "releaseId")]
    pub release_id: i64,
    /// Daemon torrent hash, when it could be determined at grab time
    #[serde(rename = "torrentHash", skip_serializing_if = "Option::is_none")]
    pub torrent_hash: Option<String>,
}

/// Outcome of one whole-catalogue update sweep
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCheckSummary {
    /// Games examined
    pub checked: usize,
    /// Update candidates recorded
    #[serde(rename = "updatesFound")]
    pub updates_found: usize,
}
