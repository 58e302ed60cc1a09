//! Torrent daemon client (qBittorrent WebUI API v2)
//!
//! Session model: one SID cookie per process. The client authenticates
//! lazily on the first request and re-authenticates once when the daemon
//! answers 401/403. Torrent metadata is canonicalized into the core
//! [`Torrent`] shape; daemon-private state strings pass through untouched.
//!
//! Adding by URL: magnet URIs are handed to the daemon as form fields;
//! other URLs are downloaded by the client and uploaded as multipart
//! `.torrent` bytes, because the daemon may not be able to reach the
//! indexer's authenticated download links itself.

use crate::error::{Error, Result};
use crate::settings::SettingsStore;
use crate::types::{AddTorrentOptions, Torrent};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Contract the orchestration core consumes from the torrent daemon
#[async_trait]
pub trait TorrentClient: Send + Sync {
    /// Whether a daemon endpoint is configured
    async fn is_configured(&self) -> bool;

    /// Authenticate and report the daemon version
    async fn test_connection(&self) -> Result<String>;

    /// Add a torrent by magnet URI or `.torrent` URL
    async fn add_torrent(&self, url: &str, options: &AddTorrentOptions) -> Result<()>;

    /// List torrents, optionally filtered to one category
    async fn torrents(&self, category: Option<&str>) -> Result<Vec<Torrent>>;

    /// Fetch one torrent by hash
    async fn torrent(&self, hash: &str) -> Result<Option<Torrent>>;

    /// Pause the given torrents
    async fn pause(&self, hashes: &[String]) -> Result<()>;

    /// Resume the given torrents
    async fn resume(&self, hashes: &[String]) -> Result<()>;

    /// Delete the given torrents, optionally with their payload files
    async fn delete(&self, hashes: &[String], delete_files: bool) -> Result<()>;

    /// Names of the daemon's configured categories
    async fn categories(&self) -> Result<Vec<String>>;

    /// Append tags to the given torrents
    async fn add_tags(&self, hashes: &[String], tags: &str) -> Result<()>;

    /// Torrents whose save path starts with the given prefix,
    /// case-insensitive and tolerant to path-separator differences
    async fn find_torrents_by_path(&self, prefix: &str) -> Result<Vec<Torrent>>;
}

/// Extract the info hash from a magnet URI, when present
pub fn magnet_info_hash(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw).ok()?;
    if parsed.scheme() != "magnet" {
        return None;
    }
    for (key, value) in parsed.query_pairs() {
        if key == "xt" {
            if let Some(hash) = value.strip_prefix("urn:btih:") {
                if !hash.is_empty() {
                    return Some(hash.to_ascii_lowercase());
                }
            }
        }
    }
    None
}

/// One torrent as the daemon's info endpoint reports it
#[derive(Debug, Deserialize)]
struct QbitTorrent {
    hash: String,
    name: String,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    dlspeed: i64,
    #[serde(default)]
    upspeed: i64,
    #[serde(default)]
    eta: i64,
    #[serde(default)]
    state: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    tags: String,
    #[serde(default)]
    save_path: String,
    #[serde(default)]
    added_on: i64,
    #[serde(default)]
    completion_on: i64,
}

impl From<QbitTorrent> for Torrent {
    fn from(t: QbitTorrent) -> Self {
        Torrent {
            hash: t.hash,
            name: t.name,
            size: t.size,
            progress: t.progress.clamp(0.0, 1.0),
            download_speed: t.dlspeed,
            upload_speed: t.upspeed,
            eta_secs: t.eta,
            state: t.state,
            category: t.category,
            tags: t.tags,
            save_path: t.save_path,
            added_on: t.added_on,
            completion_on: (t.completion_on > 0).then_some(t.completion_on),
        }
    }
}

/// Normalize a path string for prefix comparison across OSes
fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").to_ascii_lowercase()
}

/// qBittorrent WebUI client
pub struct QbitClient {
    http: reqwest::Client,
    settings: Arc<SettingsStore>,
    /// Guards login so concurrent first requests authenticate once
    session: Mutex<bool>,
}

impl QbitClient {
    /// Create a client reading its endpoint and credentials from the
    /// settings store
    pub fn new(settings: Arc<SettingsStore>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("gamearr")
            .cookie_store(true)
            .build()
            .map_err(Error::Network)?;

        Ok(Self {
            http,
            settings,
            session: Mutex::new(false),
        })
    }

    /// Write daemon credentials and drop the current session
    pub async fn configure(&self, host: &str, username: &str, password: &str) -> Result<()> {
        self.settings.set("qbittorrent_host", host).await?;
        self.settings.set("qbittorrent_username", username).await?;
        self.settings.set("qbittorrent_password", password).await?;
        *self.session.lock().await = false;
        Ok(())
    }

    async fn host(&self) -> Result<Option<String>> {
        Ok(self
            .settings
            .get("qbittorrent_host")
            .await?
            .filter(|h| !h.is_empty())
            .map(|h| h.trim_end_matches('/').to_string()))
    }

    async fn require_host(&self) -> Result<String> {
        self.host().await?.ok_or(Error::NotConfigured {
            service: "qbittorrent",
        })
    }

    /// Authenticate against the daemon, storing the SID cookie in the jar
    async fn login(&self, base: &str) -> Result<()> {
        let username = self
            .settings
            .get("qbittorrent_username")
            .await?
            .unwrap_or_default();
        let password = self
            .settings
            .get("qbittorrent_password")
            .await?
            .unwrap_or_default();

        let response = self
            .http
            .post(format!("{base}/api/v2/auth/login"))
            .form(&[("username", username.as_str()), ("password", password.as_str())])
            .send()
            .await
            .map_err(Error::Network)?;

        let status = response.status();
        let body = response.text().await.map_err(Error::Network)?;
        if !status.is_success() || body.trim() != "Ok." {
            return Err(Error::qbittorrent(format!(
                "login failed: {}",
                if body.trim().is_empty() {
                    status.to_string()
                } else {
                    body.trim().to_string()
                }
            )));
        }

        Ok(())
    }

    /// Ensure a live session, authenticating at most once per caller wave
    async fn ensure_session(&self, base: &str) -> Result<()> {
        let mut authed = self.session.lock().await;
        if !*authed {
            self.login(base).await?;
            *authed = true;
        }
        Ok(())
    }

    /// Send a request, re-authenticating once if the session expired
    async fn send_authed<B>(&self, build: B) -> Result<reqwest::Response>
    where
        B: Fn(&reqwest::Client, &str) -> reqwest::RequestBuilder,
    {
        let base = self.require_host().await?;
        self.ensure_session(&base).await?;

        let response = build(&self.http, &base)
            .send()
            .await
            .map_err(Error::Network)?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            *self.session.lock().await = false;
            self.ensure_session(&base).await?;
            return build(&self.http, &base)
                .send()
                .await
                .map_err(Error::Network);
        }

        Ok(response)
    }

    /// Fetch `.torrent` bytes from an indexer download link
    async fn fetch_torrent_file(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.http.get(url).send().await.map_err(Error::Network)?;
        if !response.status().is_success() {
            return Err(Error::qbittorrent(format!(
                "failed to download torrent file: {}",
                response.status()
            )));
        }
        Ok(response.bytes().await.map_err(Error::Network)?.to_vec())
    }

    async fn post_hashes(&self, endpoint: &str, hashes: &[String], extra: &[(&str, String)]) -> Result<()> {
        if hashes.is_empty() {
            return Ok(());
        }

        let joined = hashes.join("|");
        let mut form: Vec<(String, String)> = vec![("hashes".to_string(), joined)];
        for (k, v) in extra {
            form.push((k.to_string(), v.clone()));
        }

        let path = endpoint.to_string();
        let response = self
            .send_authed(move |http, base| {
                http.post(format!("{base}/api/v2/torrents/{path}"))
                    .form(&form)
            })
            .await?;

        if !response.status().is_success() {
            return Err(Error::qbittorrent(format!(
                "{endpoint} failed: {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TorrentClient for QbitClient {
    async fn is_configured(&self) -> bool {
        matches!(self.host().await, Ok(Some(_)))
    }

    async fn test_connection(&self) -> Result<String> {
        let response = self
            .send_authed(|http, base| http.get(format!("{base}/api/v2/app/version")))
            .await?;

        if !response.status().is_success() {
            return Err(Error::qbittorrent(format!(
                "version check failed: {}",
                response.status()
            )));
        }
        Ok(response.text().await.map_err(Error::Network)?)
    }

    async fn add_torrent(&self, url: &str, options: &AddTorrentOptions) -> Result<()> {
        let is_magnet = url.starts_with("magnet:");
        let torrent_bytes = if is_magnet {
            None
        } else {
            Some(self.fetch_torrent_file(url).await?)
        };

        let url = url.to_string();
        let options = options.clone();
        let response = self
            .send_authed(move |http, base| {
                let mut form = reqwest::multipart::Form::new()
                    .text("paused", if options.paused { "true" } else { "false" });
                if let Some(category) = &options.category {
                    form = form.text("category", category.clone());
                }
                if let Some(tags) = &options.tags {
                    form = form.text("tags", tags.clone());
                }
                if let Some(save_path) = &options.save_path {
                    form = form.text("savepath", save_path.clone());
                }
                form = match &torrent_bytes {
                    Some(bytes) => form.part(
                        "torrents",
                        reqwest::multipart::Part::bytes(bytes.clone())
                            .file_name("release.torrent"),
                    ),
                    None => form.text("urls", url.clone()),
                };

                http.post(format!("{base}/api/v2/torrents/add"))
                    .multipart(form)
            })
            .await?;

        let status = response.status();
        let body = response.text().await.map_err(Error::Network)?;
        if !status.is_success() || body.trim() != "Ok." {
            return Err(Error::qbittorrent(format!(
                "add rejected: {}",
                if body.trim().is_empty() {
                    status.to_string()
                } else {
                    body.trim().to_string()
                }
            )));
        }

        Ok(())
    }

    async fn torrents(&self, category: Option<&str>) -> Result<Vec<Torrent>> {
        let category = category.map(str::to_string);
        let response = self
            .send_authed(move |http, base| {
                let mut request = http.get(format!("{base}/api/v2/torrents/info"));
                if let Some(category) = &category {
                    request = request.query(&[("category", category)]);
                }
                request
            })
            .await?;

        if !response.status().is_success() {
            return Err(Error::qbittorrent(format!(
                "torrent list failed: {}",
                response.status()
            )));
        }

        let raw: Vec<QbitTorrent> = response.json().await.map_err(Error::Network)?;
        Ok(raw.into_iter().map(Torrent::from).collect())
    }

    async fn torrent(&self, hash: &str) -> Result<Option<Torrent>> {
        let hash = hash.to_string();
        let response = self
            .send_authed(move |http, base| {
                http.get(format!("{base}/api/v2/torrents/info"))
                    .query(&[("hashes", &hash)])
            })
            .await?;

        if !response.status().is_success() {
            return Err(Error::qbittorrent(format!(
                "torrent lookup failed: {}",
                response.status()
            )));
        }

        let raw: Vec<QbitTorrent> = response.json().await.map_err(Error::Network)?;
        Ok(raw.into_iter().next().map(Torrent::from))
    }

    async fn pause(&self, hashes: &[String]) -> Result<()> {
        self.post_hashes("pause", hashes, &[]).await
    }

    async fn resume(&self, hashes: &[String]) -> Result<()> {
        self.post_hashes("resume", hashes, &[]).await
    }

    async fn delete(&self, hashes: &[String], delete_files: bool) -> Result<()> {
        self.post_hashes(
            "delete",
            hashes,
            &[("deleteFiles", delete_files.to_string())],
        )
        .await
    }

    async fn categories(&self) -> Result<Vec<String>> {
        let response = self
            .send_authed(|http, base| http.get(format!("{base}/api/v2/torrents/categories")))
            .await?;

        if !response.status().is_success() {
            return Err(Error::qbittorrent(format!(
                "category list failed: {}",
                response.status()
            )));
        }

        let raw: HashMap<String, serde_json::Value> =
            response.json().await.map_err(Error::Network)?;
        let mut names: Vec<String> = raw.into_keys().collect();
        names.sort();
        Ok(names)
    }

    async fn add_tags(&self, hashes: &[String], tags: &str) -> Result<()> {
        self.post_hashes("addTags", hashes, &[("tags", tags.to_string())])
            .await
    }

    async fn find_torrents_by_path(&self, prefix: &str) -> Result<Vec<Torrent>> {
        let normalized = normalize_path(prefix);
        let torrents = self.torrents(None).await?;
        Ok(torrents
            .into_iter()
            .filter(|t| normalize_path(&t.save_path).starts_with(&normalized))
            .collect())
    }
}
