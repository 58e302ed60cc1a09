//! Typed settings store with TTL cache
//!
//! Configuration lives in the `settings` table as raw strings or
//! JSON-encoded values. Reads are served from a process-local cache whose
//! entries expire after [`SettingsStore::DEFAULT_TTL`]; writes go through
//! immediately and invalidate the corresponding entry, so a read after a
//! write always observes the write regardless of TTL.
//!
//! A closed table maps selected keys to environment variables consulted
//! only on a database miss. [`SettingsStore::get_from_db`] deliberately
//! bypasses both cache and fallback; the setup-complete check must reflect
//! explicit user intent, not an inherited environment.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::scorer::AutoGrabThresholds;
use crate::types::UpdateSchedule;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Closed key ↔ env-var fallback table
const ENV_FALLBACKS: &[(&str, &str)] = &[
    ("prowlarr_url", "PROWLARR_URL"),
    ("prowlarr_api_key", "PROWLARR_API_KEY"),
    ("qbittorrent_host", "QBITTORRENT_HOST"),
    ("qbittorrent_username", "QBITTORRENT_USERNAME"),
    ("qbittorrent_password", "QBITTORRENT_PASSWORD"),
    ("igdb_client_id", "IGDB_CLIENT_ID"),
    ("igdb_client_secret", "IGDB_CLIENT_SECRET"),
];

/// Placeholder substituted for sensitive values in bulk reads
const REDACTED: &str = "********";

/// Settings writable through the bulk API
///
/// Anything outside this closed set is rejected with a validation error;
/// protected settings have their own dedicated write paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BulkWritableKey {
    /// Indexer aggregator base URL
    ProwlarrUrl,
    /// Indexer aggregator API key
    ProwlarrApiKey,
    /// Torrent daemon host (including scheme and port)
    QbittorrentHost,
    /// Torrent daemon username
    QbittorrentUsername,
    /// Torrent daemon password
    QbittorrentPassword,
    /// Category used when adding and filtering torrents
    QbittorrentCategory,
    /// Metadata provider client id
    IgdbClientId,
    /// Metadata provider client secret
    IgdbClientSecret,
    /// RSS synchronizer interval in minutes
    RssSyncInterval,
    /// Search scheduler interval in minutes
    SearchSchedulerInterval,
    /// Minimum score for automated grabs
    AutoGrabMinScore,
    /// Minimum seeders for automated grabs
    AutoGrabMinSeeders,
    /// Log-only mode for all side-effecting operations
    DryRun,
    /// Whether the update-check job runs at all
    UpdateCheckEnabled,
    /// Update-check cadence (hourly/daily/weekly)
    UpdateCheckSchedule,
    /// Legacy single library root
    LibraryPath,
    /// CSV of IPv4/CIDR entries trusted by the HTTP surface
    TrustedProxies,
}

impl BulkWritableKey {
    /// The persisted key string
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkWritableKey::ProwlarrUrl => "prowlarr_url",
            BulkWritableKey::ProwlarrApiKey => "prowlarr_api_key",
            BulkWritableKey::QbittorrentHost => "qbittorrent_host",
            BulkWritableKey::QbittorrentUsername => "qbittorrent_username",
            BulkWritableKey::QbittorrentPassword => "qbittorrent_password",
            BulkWritableKey::QbittorrentCategory => "qbittorrent_category",
            BulkWritableKey::IgdbClientId => "igdb_client_id",
            BulkWritableKey::IgdbClientSecret => "igdb_client_secret",
            BulkWritableKey::RssSyncInterval => "rss_sync_interval",
            BulkWritableKey::SearchSchedulerInterval => "search_scheduler_interval",
            BulkWritableKey::AutoGrabMinScore => "auto_grab_min_score",
            BulkWritableKey::AutoGrabMinSeeders => "auto_grab_min_seeders",
            BulkWritableKey::DryRun => "dry_run",
            BulkWritableKey::UpdateCheckEnabled => "update_check_enabled",
            BulkWritableKey::UpdateCheckSchedule => "update_check_schedule",
            BulkWritableKey::LibraryPath => "library_path",
            BulkWritableKey::TrustedProxies => "trusted_proxies",
        }
    }

    /// Parse a key string against the closed allowlist
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "prowlarr_url" => Some(BulkWritableKey::ProwlarrUrl),
            "prowlarr_api_key" => Some(BulkWritableKey::ProwlarrApiKey),
            "qbittorrent_host" => Some(BulkWritableKey::QbittorrentHost),
            "qbittorrent_username" => Some(BulkWritableKey::QbittorrentUsername),
            "qbittorrent_password" => Some(BulkWritableKey::QbittorrentPassword),
            "qbittorrent_category" => Some(BulkWritableKey::QbittorrentCategory),
            "igdb_client_id" => Some(BulkWritableKey::IgdbClientId),
            "igdb_client_secret" => Some(BulkWritableKey::IgdbClientSecret),
            "rss_sync_interval" => Some(BulkWritableKey::RssSyncInterval),
            "search_scheduler_interval" => Some(BulkWritableKey::SearchSchedulerInterval),
            "auto_grab_min_score" => Some(BulkWritableKey::AutoGrabMinScore),
            "auto_grab_min_seeders" => Some(BulkWritableKey::AutoGrabMinSeeders),
            "dry_run" => Some(BulkWritableKey::DryRun),
            "update_check_enabled" => Some(BulkWritableKey::UpdateCheckEnabled),
            "update_check_schedule" => Some(BulkWritableKey::UpdateCheckSchedule),
            "library_path" => Some(BulkWritableKey::LibraryPath),
            "trusted_proxies" => Some(BulkWritableKey::TrustedProxies),
            _ => None,
        }
    }
}

/// Settings writable only through dedicated endpoints, never the bulk API
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtectedKey {
    /// Whether authentication is enforced by the HTTP surface
    AuthEnabled,
    /// Hash of the HTTP surface API key
    ApiKeyHash,
    /// Marker that the setup wizard was skipped
    SetupSkipped,
    /// JSON integer array of indexer category ids
    ProwlarrCategories,
}

impl ProtectedKey {
    /// The persisted key string
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtectedKey::AuthEnabled => "auth_enabled",
            ProtectedKey::ApiKeyHash => "api_key_hash",
            ProtectedKey::SetupSkipped => "setup_skipped",
            ProtectedKey::ProwlarrCategories => "prowlarr_categories",
        }
    }

    /// Parse a key string against the protected set
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "auth_enabled" => Some(ProtectedKey::AuthEnabled),
            "api_key_hash" => Some(ProtectedKey::ApiKeyHash),
            "setup_skipped" => Some(ProtectedKey::SetupSkipped),
            "prowlarr_categories" => Some(ProtectedKey::ProwlarrCategories),
            _ => None,
        }
    }
}

/// True when a key's value must be redacted in bulk reads
pub fn is_sensitive_key(key: &str) -> bool {
    let k = key.to_ascii_lowercase();
    k.contains("password") || k.contains("secret") || k.contains("api_key")
}

#[derive(Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// Typed key/value configuration store backed by the database
pub struct SettingsStore {
    db: Arc<Database>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl SettingsStore {
    /// How long a cached read stays fresh
    pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

    /// Create a store with the default TTL
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_ttl(db, Self::DEFAULT_TTL)
    }

    /// Create a store with an explicit TTL (tests shrink it)
    pub fn with_ttl(db: Arc<Database>, ttl: Duration) -> Self {
        Self {
            db,
            cache: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Read a setting: cache, then database, then the env fallback table
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = cache.get(key) {
                if entry.expires_at > Instant::now() {
                    return Ok(Some(entry.value.clone()));
                }
            }
        }

        if let Some(value) = self.db.setting(key).await? {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            cache.insert(
                key.to_string(),
                CacheEntry {
                    value: value.clone(),
                    expires_at: Instant::now() + self.ttl,
                },
            );
            return Ok(Some(value));
        }

        // Fallback is consulted only on a miss, and never cached: the
        // environment stays authoritative until the key is written.
        if let Some((_, var)) = ENV_FALLBACKS.iter().find(|(k, _)| *k == key) {
            if let Ok(value) = std::env::var(var) {
                if !value.is_empty() {
                    return Ok(Some(value));
                }
            }
        }

        Ok(None)
    }

    /// Read a setting from the database only, bypassing cache and fallback
    pub async fn get_from_db(&self, key: &str) -> Result<Option<String>> {
        self.db.setting(key).await
    }

    /// Read and JSON-decode a setting
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(raw) => Ok(serde_json::from_str(&raw).ok()),
            None => Ok(None),
        }
    }

    /// Write a setting and invalidate its cache entry
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.db.set_setting(key, value).await?;
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.remove(key);
        Ok(())
    }

    /// JSON-encode and write a setting
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw).await
    }

    /// Delete a setting and invalidate its cache entry
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let deleted = self.db.delete_setting(key).await?;
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.remove(key);
        Ok(deleted)
    }

    /// All settings with sensitive values redacted
    pub async fn get_all_redacted(&self) -> Result<Vec<(String, String)>> {
        let rows = self.db.all_settings().await?;
        Ok(rows
            .into_iter()
            .map(|(key, value)| {
                if is_sensitive_key(&key) {
                    (key, REDACTED.to_string())
                } else {
                    (key, value)
                }
            })
            .collect())
    }

    /// Bulk write after validating every key against the allowlist
    ///
    /// Protected keys and unknown keys reject the whole batch before any
    /// write happens.
    pub async fn set_bulk(&self, entries: &[(String, String)]) -> Result<()> {
        for (key, _) in entries {
            if ProtectedKey::parse(key).is_some() {
                return Err(Error::Validation(format!(
                    "setting '{key}' may only be changed through its dedicated endpoint"
                )));
            }
            if BulkWritableKey::parse(key).is_none() {
                return Err(Error::Validation(format!(
                    "setting '{key}' is not writable through the bulk API"
                )));
            }
        }

        for (key, value) in entries {
            self.set(key, value).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Typed accessors with domain defaults
    // ------------------------------------------------------------------

    /// Indexer category filter; platform-specific default
    pub async fn indexer_categories(&self) -> Result<Vec<i32>> {
        Ok(self
            .get_json::<Vec<i32>>(ProtectedKey::ProwlarrCategories.as_str())
            .await?
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| vec![4000, 4050]))
    }

    /// Log-only mode; defaults to true so a fresh install never touches
    /// the daemon until someone explicitly flips it
    pub async fn dry_run(&self) -> Result<bool> {
        Ok(self
            .get_json::<bool>(BulkWritableKey::DryRun.as_str())
            .await?
            .unwrap_or(true))
    }

    /// Search scheduler interval in minutes, clamped to [5, 1440]
    pub async fn search_interval_minutes(&self) -> Result<u64> {
        Ok(self
            .get_json::<u64>(BulkWritableKey::SearchSchedulerInterval.as_str())
            .await?
            .unwrap_or(15)
            .clamp(5, 1440))
    }

    /// RSS synchronizer interval in minutes, clamped to [5, 1440]
    pub async fn rss_sync_interval_minutes(&self) -> Result<u64> {
        Ok(self
            .get_json::<u64>(BulkWritableKey::RssSyncInterval.as_str())
            .await?
            .unwrap_or(15)
            .clamp(5, 1440))
    }

    /// Minimum score for automated grabs, clamped to [0, 500]
    pub async fn auto_grab_min_score(&self) -> Result<i32> {
        Ok(self
            .get_json::<i32>(BulkWritableKey::AutoGrabMinScore.as_str())
            .await?
            .unwrap_or(100)
            .clamp(0, 500))
    }

    /// Minimum seeders for automated grabs, clamped to [0, 100]
    pub async fn auto_grab_min_seeders(&self) -> Result<i64> {
        Ok(self
            .get_json::<i64>(BulkWritableKey::AutoGrabMinSeeders.as_str())
            .await?
            .unwrap_or(5)
            .clamp(0, 100))
    }

    /// Both auto-grab thresholds in one read
    pub async fn auto_grab_thresholds(&self) -> Result<AutoGrabThresholds> {
        Ok(AutoGrabThresholds {
            min_score: self.auto_grab_min_score().await?,
            min_seeders: self.auto_grab_min_seeders().await?,
        })
    }

    /// Category used when adding torrents and filtering active downloads
    pub async fn torrent_category(&self) -> Result<String> {
        Ok(self
            .get(BulkWritableKey::QbittorrentCategory.as_str())
            .await?
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "gamearr".to_string()))
    }

    /// Whether the update-check job runs at all
    pub async fn update_check_enabled(&self) -> Result<bool> {
        Ok(self
            .get_json::<bool>(BulkWritableKey::UpdateCheckEnabled.as_str())
            .await?
            .unwrap_or(true))
    }

    /// Update-check cadence
    pub async fn update_check_schedule(&self) -> Result<UpdateSchedule> {
        Ok(self
            .get(BulkWritableKey::UpdateCheckSchedule.as_str())
            .await?
            .map(|s| UpdateSchedule::parse(s.trim_matches('"')))
            .unwrap_or_default())
    }

    /// Legacy single library root, used when no library rows exist
    pub async fn library_path(&self) -> Result<Option<String>> {
        self.get(BulkWritableKey::LibraryPath.as_str()).await
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SettingsStore {
        let db = Arc::new(Database::in_memory().await.unwrap());
        SettingsStore::new(db)
    }

    #[tokio::test]
    async fn write_invalidation_beats_ttl() {
        let store = store().await;
        store.set("dry_run", "true").await.unwrap();
        assert_eq!(store.get("dry_run").await.unwrap().as_deref(), Some("true"));

        // The cached entry is still fresh, but the write must win
        store.set("dry_run", "false").await.unwrap();
        assert_eq!(
            store.get("dry_run").await.unwrap().as_deref(),
            Some("false")
        );
    }

    #[tokio::test]
    async fn expired_entries_refetch_from_database() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let store = SettingsStore::with_ttl(db.clone(), Duration::from_millis(10));

        store.set("qbittorrent_category", "gamearr").await.unwrap();
        assert_eq!(
            store.get("qbittorrent_category").await.unwrap().as_deref(),
            Some("gamearr")
        );

        // Write behind the store's back; the stale cache serves until expiry
        db.set_setting("qbittorrent_category", "other").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(
            store.get("qbittorrent_category").await.unwrap().as_deref(),
            Some("other")
        );
    }

    #[tokio::test]
    async fn env_fallback_is_consulted_only_on_miss() {
        let store = store().await;
        std::env::set_var("PROWLARR_URL", "http://env-host:9696");

        assert_eq!(
            store.get("prowlarr_url").await.unwrap().as_deref(),
            Some("http://env-host:9696")
        );

        store.set("prowlarr_url", "http://db-host:9696").await.unwrap();
        assert_eq!(
            store.get("prowlarr_url").await.unwrap().as_deref(),
            Some("http://db-host:9696"),
            "a database value must shadow the environment"
        );

        std::env::remove_var("PROWLARR_URL");
    }

    #[tokio::test]
    async fn get_from_db_bypasses_env_fallback() {
        let store = store().await;
        std::env::set_var("QBITTORRENT_HOST", "http://env-host:8080");

        assert!(
            store.get_from_db("qbittorrent_host").await.unwrap().is_none(),
            "get_from_db must not consult the environment"
        );

        std::env::remove_var("QBITTORRENT_HOST");
    }

    #[tokio::test]
    async fn dry_run_defaults_to_true() {
        let store = store().await;
        assert!(store.dry_run().await.unwrap(), "dry_run must default on");

        store.set("dry_run", "false").await.unwrap();
        assert!(!store.dry_run().await.unwrap());
    }

    #[tokio::test]
    async fn intervals_are_clamped() {
        let store = store().await;
        assert_eq!(store.search_interval_minutes().await.unwrap(), 15);

        store.set("search_scheduler_interval", "1").await.unwrap();
        assert_eq!(store.search_interval_minutes().await.unwrap(), 5);

        store.set("search_scheduler_interval", "100000").await.unwrap();
        assert_eq!(store.search_interval_minutes().await.unwrap(), 1440);

        store.set("rss_sync_interval", "30").await.unwrap();
        assert_eq!(store.rss_sync_interval_minutes().await.unwrap(), 30);
    }

    #[tokio::test]
    async fn auto_grab_thresholds_have_defaults_and_clamps() {
        let store = store().await;
        let thresholds = store.auto_grab_thresholds().await.unwrap();
        assert_eq!(thresholds.min_score, 100);
        assert_eq!(thresholds.min_seeders, 5);

        store.set("auto_grab_min_score", "9000").await.unwrap();
        store.set("auto_grab_min_seeders", "-3").await.unwrap();
        assert_eq!(store.auto_grab_min_score().await.unwrap(), 500);
        assert_eq!(store.auto_grab_min_seeders().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn indexer_categories_default_to_pc_games() {
        let store = store().await;
        assert_eq!(store.indexer_categories().await.unwrap(), vec![4000, 4050]);

        store.set("prowlarr_categories", "[1000, 4050]").await.unwrap();
        assert_eq!(store.indexer_categories().await.unwrap(), vec![1000, 4050]);
    }

    #[tokio::test]
    async fn update_check_defaults() {
        let store = store().await;
        assert!(store.update_check_enabled().await.unwrap());
        assert_eq!(
            store.update_check_schedule().await.unwrap(),
            UpdateSchedule::Daily
        );

        store.set("update_check_schedule", "weekly").await.unwrap();
        assert_eq!(
            store.update_check_schedule().await.unwrap(),
            UpdateSchedule::Weekly
        );
    }

    #[tokio::test]
    async fn bulk_read_redacts_sensitive_keys() {
        let store = store().await;
        store.set("qbittorrent_password", "hunter2").await.unwrap();
        store.set("igdb_client_secret", "s3cret").await.unwrap();
        store.set("prowlarr_api_key", "abc123").await.unwrap();
        store.set("qbittorrent_host", "http://localhost:8080").await.unwrap();

        let all: HashMap<String, String> =
            store.get_all_redacted().await.unwrap().into_iter().collect();
        assert_eq!(all["qbittorrent_password"], REDACTED);
        assert_eq!(all["igdb_client_secret"], REDACTED);
        assert_eq!(all["prowlarr_api_key"], REDACTED);
        assert_eq!(all["qbittorrent_host"], "http://localhost:8080");
    }

    #[tokio::test]
    async fn bulk_write_rejects_protected_and_unknown_keys() {
        let store = store().await;

        let err = store
            .set_bulk(&[("api_key_hash".to_string(), "x".to_string())])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = store
            .set_bulk(&[("totally_unknown".to_string(), "x".to_string())])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        // A valid batch goes through
        store
            .set_bulk(&[
                ("dry_run".to_string(), "false".to_string()),
                ("auto_grab_min_score".to_string(), "150".to_string()),
            ])
            .await
            .unwrap();
        assert!(!store.dry_run().await.unwrap());
        assert_eq!(store.auto_grab_min_score().await.unwrap(), 150);
    }

    #[test]
    fn sensitive_key_detection() {
        assert!(is_sensitive_key("qbittorrent_password"));
        assert!(is_sensitive_key("igdb_client_secret"));
        assert!(is_sensitive_key("prowlarr_api_key"));
        assert!(!is_sensitive_key("qbittorrent_host"));
        assert!(!is_sensitive_key("dry_run"));
    }
}
