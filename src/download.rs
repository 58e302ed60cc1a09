//! Download service: bridges scored candidates to the torrent daemon
//!
//! [`DownloadService::grab_release`] is the single write path from a
//! decision (a scored release) to an effect (a daemon add plus persisted
//! release row). [`DownloadService::sync_download_status`] is the
//! reconciliation loop the download monitor drives; it advances release
//! and game state from observed daemon state and fires the file organizer
//! on the completion edge.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::organizer::FileOrganizer;
use crate::qbittorrent::{TorrentClient, magnet_info_hash};
use crate::scorer::normalize_title;
use crate::settings::SettingsStore;
use crate::types::{
    AddTorrentOptions, GameId, GrabResult, NewRelease, Release, ReleaseStatus, ScoredRelease,
    Torrent,
};
use crate::versions::parse_version;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How many normalized characters of a title participate in the fallback
/// torrent-to-release association
const TITLE_PREFIX_LEN: usize = 20;

/// Outcome of one reconciliation pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Active releases examined
    pub examined: usize,
    /// Releases that reached completion this pass
    pub completed: usize,
    /// Releases that entered the failed state this pass
    pub failed: usize,
}

/// First [`TITLE_PREFIX_LEN`] characters of a normalized title
fn title_prefix(title: &str) -> String {
    normalize_title(title).chars().take(TITLE_PREFIX_LEN).collect()
}

/// Locate the daemon torrent backing a release: stored hash first, title
/// prefix as the fallback for releases grabbed before a hash was captured.
fn find_torrent_for_release<'a>(release: &Release, torrents: &'a [Torrent]) -> Option<&'a Torrent> {
    if let Some(hash) = &release.torrent_hash {
        if let Some(found) = torrents
            .iter()
            .find(|t| t.hash.eq_ignore_ascii_case(hash))
        {
            return Some(found);
        }
    }

    let prefix = title_prefix(&release.title);
    if prefix.is_empty() {
        return None;
    }
    torrents
        .iter()
        .find(|t| normalize_title(&t.name).starts_with(&prefix))
}

/// Bridges release decisions to the daemon and reconciles daemon state back
pub struct DownloadService {
    db: Arc<Database>,
    settings: Arc<SettingsStore>,
    torrent: Arc<dyn TorrentClient>,
    organizer: Arc<FileOrganizer>,
}

impl DownloadService {
    /// Create the service over its collaborators
    pub fn new(
        db: Arc<Database>,
        settings: Arc<SettingsStore>,
        torrent: Arc<dyn TorrentClient>,
        organizer: Arc<FileOrganizer>,
    ) -> Self {
        Self {
            db,
            settings,
            torrent,
            organizer,
        }
    }

    /// Delegate a scored release to the daemon
    ///
    /// In dry-run mode this logs the intended grab and returns a synthetic
    /// `release_id` of -1 without touching persistence or the daemon. On a
    /// daemon rejection the persisted release is marked failed and the
    /// error re-raised, so the scheduler's next tick can reset the game.
    pub async fn grab_release(
        &self,
        game_id: GameId,
        scored: &ScoredRelease,
    ) -> Result<GrabResult> {
        if !self.torrent.is_configured().await {
            return Err(Error::NotConfigured {
                service: "qbittorrent",
            });
        }

        let game = self
            .db
            .game(game_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("game {game_id}")))?;

        if self.settings.dry_run().await? {
            info!(
                game = %game.title,
                release = %scored.release.title,
                score = scored.score,
                url = %scored.release.download_url,
                "Dry run: would grab release"
            );
            return Ok(GrabResult {
                release_id: -1,
                torrent_hash: None,
            });
        }

        let category = self.settings.torrent_category().await?;
        let tags = format!("{category},game-{game_id}");

        let release_id = self
            .db
            .insert_release(&NewRelease {
                game_id,
                title: scored.release.title.clone(),
                size: scored.release.size,
                seeders: scored.release.seeders,
                download_url: scored.release.download_url.clone(),
                indexer: scored.release.indexer.clone(),
                quality: scored.quality,
                status: ReleaseStatus::Pending,
            })
            .await?;

        let options = AddTorrentOptions {
            category: Some(category.clone()),
            tags: Some(tags),
            paused: false,
            save_path: None,
        };

        match self
            .torrent
            .add_torrent(&scored.release.download_url, &options)
            .await
        {
            Ok(()) => {
                let torrent_hash = match magnet_info_hash(&scored.release.download_url) {
                    Some(hash) => Some(hash),
                    None => {
                        self.locate_added_torrent(&category, &scored.release.title)
                            .await
                    }
                };
                if let Some(hash) = &torrent_hash {
                    self.db.set_release_torrent_hash(release_id, hash).await?;
                }

                self.db
                    .update_release_status(release_id, ReleaseStatus::Downloading)
                    .await?;
                self.db
                    .update_game_status(game_id, crate::types::GameStatus::Downloading)
                    .await?;

                info!(
                    game = %game.title,
                    release = %scored.release.title,
                    score = scored.score,
                    "Grabbed release"
                );
                Ok(GrabResult {
                    release_id: release_id.get(),
                    torrent_hash,
                })
            }
            Err(e) => {
                self.db
                    .update_release_status(release_id, ReleaseStatus::Failed)
                    .await?;
                Err(e)
            }
        }
    }

    /// Best-effort hash capture for non-magnet grabs: look the torrent up
    /// by normalized title prefix in the category we just added it to.
    async fn locate_added_torrent(&self, category: &str, title: &str) -> Option<String> {
        let prefix = title_prefix(title);
        if prefix.is_empty() {
            return None;
        }
        match self.torrent.torrents(Some(category)).await {
            Ok(torrents) => torrents
                .iter()
                .find(|t| normalize_title(&t.name).starts_with(&prefix))
                .map(|t| t.hash.to_ascii_lowercase()),
            Err(e) => {
                debug!(error = %e, "Could not look up hash for added torrent");
                None
            }
        }
    }

    /// Daemon torrents in the configured category, excluding completed
    /// transfers unless asked for
    pub async fn get_active_downloads(&self, include_completed: bool) -> Result<Vec<Torrent>> {
        let category = self.settings.torrent_category().await?;
        let torrents = self.torrent.torrents(Some(&category)).await?;
        Ok(torrents
            .into_iter()
            .filter(|t| t.category == category)
            .filter(|t| include_completed || t.progress < 1.0)
            .collect())
    }

    /// Reconcile daemon state into release and game rows
    ///
    /// Completion edges mark the release completed, the game downloaded,
    /// and fire the organizer; an organizer failure is logged, never
    /// propagated, so reconciliation of the remaining releases continues.
    pub async fn sync_download_status(&self) -> Result<SyncSummary> {
        let active = self
            .db
            .releases_with_statuses(&[ReleaseStatus::Pending, ReleaseStatus::Downloading])
            .await?;
        if active.is_empty() {
            return Ok(SyncSummary::default());
        }

        let category = self.settings.torrent_category().await?;
        let torrents = self.torrent.torrents(Some(&category)).await?;

        let mut summary = SyncSummary {
            examined: active.len(),
            ..SyncSummary::default()
        };

        for release in active {
            let Some(torrent) = find_torrent_for_release(&release, &torrents) else {
                debug!(
                    release = %release.title,
                    "No daemon torrent found for active release yet"
                );
                continue;
            };

            if torrent.progress >= 1.0 {
                if release.status != ReleaseStatus::Completed {
                    self.db
                        .update_release_status(release.id, ReleaseStatus::Completed)
                        .await?;
                    summary.completed += 1;
                    self.finish_completed_release(&release, torrent).await?;
                }
            } else if torrent.state == "error" {
                self.db
                    .update_release_status(release.id, ReleaseStatus::Failed)
                    .await?;
                summary.failed += 1;
                warn!(
                    release = %release.title,
                    "Daemon reports torrent error, release marked failed"
                );
            } else if release.status == ReleaseStatus::Pending {
                self.db
                    .update_release_status(release.id, ReleaseStatus::Downloading)
                    .await?;
            }
        }

        Ok(summary)
    }

    /// Completion-edge bookkeeping: game status, installed info, organizer
    async fn finish_completed_release(&self, release: &Release, torrent: &Torrent) -> Result<()> {
        let Some(game) = self.db.game(release.game_id).await? else {
            warn!(
                game_id = %release.game_id,
                release = %release.title,
                "Completed release belongs to a deleted game"
            );
            return Ok(());
        };

        if game.status == crate::types::GameStatus::Downloaded {
            return Ok(());
        }

        self.db
            .update_game_status(game.id, crate::types::GameStatus::Downloaded)
            .await?;
        self.db
            .set_game_installed(
                game.id,
                parse_version(&release.title).as_deref(),
                release.quality,
            )
            .await?;

        let source = Path::new(&torrent.save_path).join(&torrent.name);
        if let Err(e) = self.organizer.organize_download(&game, &source).await {
            warn!(
                game = %game.title,
                error = %e,
                "Failed to organize completed download"
            );
        }

        Ok(())
    }

    /// Delete daemon torrents tagged for games that no longer exist
    pub async fn remove_orphaned_torrents(&self, delete_files: bool) -> Result<usize> {
        let torrents = self.torrent.torrents(None).await?;

        let mut tagged: Vec<(GameId, &Torrent)> = Vec::new();
        for torrent in &torrents {
            for tag in torrent.tags.split(',') {
                if let Some(id) = tag.trim().strip_prefix("game-") {
                    if let Ok(id) = id.parse::<i64>() {
                        tagged.push((GameId(id), torrent));
                    }
                }
            }
        }
        if tagged.is_empty() {
            return Ok(0);
        }

        let ids: Vec<GameId> = tagged.iter().map(|(id, _)| *id).collect();
        let existing = self.db.games_by_ids(&ids).await?;

        let orphaned: Vec<String> = tagged
            .iter()
            .filter(|(id, _)| !existing.contains_key(id))
            .map(|(_, t)| t.hash.clone())
            .collect();

        if orphaned.is_empty() {
            return Ok(0);
        }

        let count = orphaned.len();
        self.torrent.delete(&orphaned, delete_files).await?;
        info!(count, "Removed orphaned torrents");
        Ok(count)
    }

    /// Cancel an in-flight transfer via daemon delete
    ///
    /// The matching release (when one exists) is marked failed so the
    /// scheduler's next tick resets the game to wanted.
    pub async fn cancel_download(&self, hash: &str, delete_files: bool) -> Result<()> {
        self.torrent
            .delete(&[hash.to_string()], delete_files)
            .await?;

        let active = self
            .db
            .releases_with_statuses(&[ReleaseStatus::Pending, ReleaseStatus::Downloading])
            .await?;
        if let Some(release) = active
            .iter()
            .find(|r| r.torrent_hash.as_deref().is_some_and(|h| h.eq_ignore_ascii_case(hash)))
        {
            self.db
                .update_release_status(release.id, ReleaseStatus::Failed)
                .await?;
        }

        Ok(())
    }
}
