//! Indexer aggregator client (Prowlarr)
//!
//! Two operations against the aggregator's search API: category-filtered
//! free-text search and the global feed (an empty-query search ordered by
//! publication date). Every request acquires a token-bucket permit and is
//! retried with exponential backoff on transient failures.
//!
//! [`IndexerClient`] is the seam the workers depend on; tests substitute a
//! fake. [`ProwlarrClient`] is the production implementation, configured
//! lazily from the settings store so credential changes apply without a
//! restart.

use crate::error::{Error, Result};
use crate::rate_limit::RequestLimiter;
use crate::retry::{RetryConfig, with_backoff};
use crate::scorer::{rank_releases, score_release};
use crate::settings::SettingsStore;
use crate::types::{Game, IndexerRelease, ScoredRelease};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Contract the orchestration core consumes from the indexer aggregator
#[async_trait]
pub trait IndexerClient: Send + Sync {
    /// Whether credentials are present and operations may be attempted
    async fn is_configured(&self) -> bool;

    /// Category-filtered free-text search
    async fn search(
        &self,
        query: &str,
        categories: &[i32],
        limit: u32,
    ) -> Result<Vec<IndexerRelease>>;

    /// Global feed: newest releases across all indexers
    async fn rss_releases(&self, categories: &[i32], limit: u32) -> Result<Vec<IndexerRelease>>;
}

/// One release as the aggregator's search API reports it
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProwlarrRelease {
    guid: Option<String>,
    title: String,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    seeders: i64,
    publish_date: Option<DateTime<Utc>>,
    download_url: Option<String>,
    magnet_url: Option<String>,
    indexer: Option<String>,
    #[serde(default)]
    categories: Vec<ProwlarrCategory>,
}

#[derive(Debug, Deserialize)]
struct ProwlarrCategory {
    id: i32,
}

impl ProwlarrRelease {
    /// Canonicalize into the core shape; candidates without any download
    /// URL are unusable and dropped.
    fn into_release(self) -> Option<IndexerRelease> {
        let download_url = self.download_url.or(self.magnet_url)?;
        Some(IndexerRelease {
            guid: self.guid.unwrap_or_else(|| download_url.clone()),
            title: self.title,
            size: self.size,
            seeders: self.seeders,
            published_at: self.publish_date.unwrap_or_else(Utc::now),
            download_url,
            indexer: self.indexer,
            categories: self.categories.into_iter().map(|c| c.id).collect(),
        })
    }
}

/// Prowlarr API client
pub struct ProwlarrClient {
    http: reqwest::Client,
    settings: Arc<SettingsStore>,
    limiter: RequestLimiter,
    retry: RetryConfig,
}

impl ProwlarrClient {
    /// Create a client reading its endpoint and key from the settings store
    pub fn new(settings: Arc<SettingsStore>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("gamearr")
            .build()
            .map_err(Error::Network)?;

        Ok(Self {
            http,
            settings,
            limiter: RequestLimiter::default(),
            retry: RetryConfig::default(),
        })
    }

    /// Current endpoint and API key, when both are configured
    async fn credentials(&self) -> Result<Option<(String, String)>> {
        let url = self.settings.get("prowlarr_url").await?;
        let key = self.settings.get("prowlarr_api_key").await?;
        Ok(match (url, key) {
            (Some(url), Some(key)) if !url.is_empty() && !key.is_empty() => {
                Some((url.trim_end_matches('/').to_string(), key))
            }
            _ => None,
        })
    }

    /// Verify the aggregator answers with the configured credentials
    pub async fn test_connection(&self) -> Result<()> {
        let (base, key) = self
            .credentials()
            .await?
            .ok_or(Error::NotConfigured {
                service: "prowlarr",
            })?;

        let response = self
            .http
            .get(format!("{base}/api/v1/health"))
            .header("X-Api-Key", &key)
            .send()
            .await
            .map_err(Error::Network)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::prowlarr(format!(
                "health check failed: {}",
                response.status()
            )))
        }
    }

    /// One search request with rate limiting and retry
    async fn search_request(
        &self,
        query: &str,
        categories: &[i32],
        limit: u32,
    ) -> Result<Vec<IndexerRelease>> {
        let (base, key) = self
            .credentials()
            .await?
            .ok_or(Error::NotConfigured {
                service: "prowlarr",
            })?;

        let url = format!("{base}/api/v1/search");
        let mut params: Vec<(String, String)> = vec![
            ("query".to_string(), query.to_string()),
            ("limit".to_string(), limit.to_string()),
        ];
        for category in categories {
            params.push(("categories".to_string(), category.to_string()));
        }

        let releases = with_backoff(&self.retry, "prowlarr search", || {
            let http = self.http.clone();
            let url = url.clone();
            let key = key.clone();
            let params = params.clone();
            let limiter = self.limiter.clone();
            async move {
                limiter.acquire().await;

                let response = http
                    .get(&url)
                    .header("X-Api-Key", &key)
                    .query(&params)
                    .send()
                    .await
                    .map_err(Error::Network)?;

                let status = response.status();
                if !status.is_success() {
                    return Err(Error::prowlarr(format!("search failed: {status}")));
                }

                let raw: Vec<ProwlarrRelease> =
                    response.json().await.map_err(Error::Network)?;
                Ok(raw
                    .into_iter()
                    .filter_map(ProwlarrRelease::into_release)
                    .collect::<Vec<_>>())
            }
        })
        .await?;

        Ok(releases)
    }
}

#[async_trait]
impl IndexerClient for ProwlarrClient {
    async fn is_configured(&self) -> bool {
        matches!(self.credentials().await, Ok(Some(_)))
    }

    async fn search(
        &self,
        query: &str,
        categories: &[i32],
        limit: u32,
    ) -> Result<Vec<IndexerRelease>> {
        self.search_request(query, categories, limit).await
    }

    async fn rss_releases(&self, categories: &[i32], limit: u32) -> Result<Vec<IndexerRelease>> {
        let mut releases = self.search_request("", categories, limit).await?;
        releases.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        releases.truncate(limit as usize);
        Ok(releases)
    }
}

/// Game-centric search operations layered over the raw client
pub struct IndexerService {
    client: Arc<dyn IndexerClient>,
    settings: Arc<SettingsStore>,
}

impl IndexerService {
    /// Candidates fetched per game search
    const SEARCH_LIMIT: u32 = 50;

    /// Create the service over any indexer client
    pub fn new(client: Arc<dyn IndexerClient>, settings: Arc<SettingsStore>) -> Self {
        Self { client, settings }
    }

    /// Whether the underlying client is ready
    pub async fn is_configured(&self) -> bool {
        self.client.is_configured().await
    }

    /// Search for a game and return candidates scored and ranked for it
    pub async fn search_for_game(&self, game: &Game) -> Result<Vec<ScoredRelease>> {
        let categories = self.settings.indexer_categories().await?;
        let raw = self
            .client
            .search(&game.title, &categories, Self::SEARCH_LIMIT)
            .await?;

        let now = Utc::now();
        let scored = raw
            .iter()
            .map(|release| score_release(release, game, now))
            .collect();
        Ok(rank_releases(scored))
    }

    /// Pull the global feed with the configured category filter
    pub async fn rss_releases(&self, limit: u32) -> Result<Vec<IndexerRelease>> {
        let categories = self.settings.indexer_categories().await?;
        self.client.rss_releases(&categories, limit).await
    }
}
