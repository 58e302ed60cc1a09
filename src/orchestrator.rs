//! Composition root: wires services together and owns the workers
//!
//! The [`Orchestrator`] builds every service over shared `Arc` handles and
//! exposes the on-demand operations an embedding application (or its HTTP
//! surface) calls into: manual sweeps, update lifecycle actions, and
//! graceful shutdown. Background workers run as tokio tasks cancelled
//! through one shared token; shutdown waits for in-flight ticks to finish.

use crate::db::Database;
use crate::download::DownloadService;
use crate::error::{Error, Result};
use crate::importer::LibraryImporter;
use crate::indexer::{IndexerService, ProwlarrClient};
use crate::organizer::FileOrganizer;
use crate::qbittorrent::{QbitClient, TorrentClient};
use crate::scorer::score_release;
use crate::settings::SettingsStore;
use crate::types::{GameId, GameUpdate, GrabResult, IndexerRelease, ScoredRelease, UpdateCheckSummary};
use crate::updates::UpdateDetector;
use crate::workers::{DownloadMonitor, RssSynchronizer, SearchScheduler, UpdateCheckJob};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The assembled orchestration core
pub struct Orchestrator {
    /// Persistence
    pub db: Arc<Database>,
    /// TTL-cached configuration
    pub settings: Arc<SettingsStore>,
    /// Game-centric indexer operations
    pub indexer: Arc<IndexerService>,
    /// Raw indexer client, for connection tests
    pub prowlarr: Arc<ProwlarrClient>,
    /// Torrent daemon client
    pub qbittorrent: Arc<QbitClient>,
    /// Grab and reconciliation service
    pub download: Arc<DownloadService>,
    /// Library organization of completed transfers
    pub organizer: Arc<FileOrganizer>,
    /// Update detection
    pub detector: Arc<UpdateDetector>,
    /// Library scanning and import matching
    pub importer: Arc<LibraryImporter>,

    search: Arc<SearchScheduler>,
    rss: Arc<RssSynchronizer>,
    monitor: Arc<DownloadMonitor>,
    update_job: Arc<UpdateCheckJob>,

    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Open (or create) the database at `db_path` and wire every service
    pub async fn new(db_path: &Path) -> Result<Self> {
        let db = Arc::new(Database::new(db_path).await?);
        Self::from_database(db)
    }

    /// Wire every service over an existing database handle
    pub fn from_database(db: Arc<Database>) -> Result<Self> {
        let settings = Arc::new(SettingsStore::new(db.clone()));
        let shutdown = CancellationToken::new();

        let prowlarr = Arc::new(ProwlarrClient::new(settings.clone())?);
        let indexer = Arc::new(IndexerService::new(prowlarr.clone(), settings.clone()));
        let qbittorrent = Arc::new(QbitClient::new(settings.clone())?);

        let organizer = Arc::new(FileOrganizer::new(db.clone(), settings.clone()));
        let download = Arc::new(DownloadService::new(
            db.clone(),
            settings.clone(),
            qbittorrent.clone(),
            organizer.clone(),
        ));
        let detector = Arc::new(UpdateDetector::new(db.clone(), indexer.clone()));
        let importer = Arc::new(LibraryImporter::new(db.clone()));

        let search = Arc::new(SearchScheduler::new(
            db.clone(),
            settings.clone(),
            indexer.clone(),
            download.clone(),
            shutdown.clone(),
        ));
        let rss = Arc::new(RssSynchronizer::new(
            db.clone(),
            settings.clone(),
            indexer.clone(),
            download.clone(),
            shutdown.clone(),
        ));
        let monitor = Arc::new(DownloadMonitor::new(download.clone(), shutdown.clone()));
        let update_job = Arc::new(UpdateCheckJob::new(
            db.clone(),
            settings.clone(),
            detector.clone(),
            shutdown.clone(),
        ));

        Ok(Self {
            db,
            settings,
            indexer,
            prowlarr,
            qbittorrent,
            download,
            organizer,
            detector,
            importer,
            search,
            rss,
            monitor,
            update_job,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the four periodic workers
    pub async fn start_workers(&self) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            warn!("Workers already started");
            return;
        }

        tasks.push(tokio::spawn(self.search.clone().run()));
        tasks.push(tokio::spawn(self.rss.clone().run()));
        tasks.push(tokio::spawn(self.monitor.clone().run()));
        tasks.push(tokio::spawn(self.update_job.clone().run()));
        info!("Background workers started");
    }

    /// Cancel the workers and wait for in-flight ticks to finish
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.shutdown.cancel();

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }
        self.db.close().await;
        info!("Shutdown complete");
    }

    /// Run a search sweep now (joins the worker's exclusion flag)
    pub async fn search_now(&self) {
        self.search.tick().await;
    }

    /// Pull the RSS feed now
    pub async fn rss_sync_now(&self) {
        self.rss.tick().await;
    }

    /// Reconcile daemon state now
    pub async fn sync_downloads_now(&self) {
        self.monitor.tick().await;
    }

    /// Run (or join) a whole-catalogue update sweep
    pub async fn run_update_check(&self) -> Result<UpdateCheckSummary> {
        self.update_job.run_sweep().await
    }

    /// Check one game for updates (coalesced per game)
    pub async fn check_game_for_updates(&self, game_id: GameId) -> Result<Vec<GameUpdate>> {
        self.detector.check_game_for_updates(game_id).await
    }

    /// Dismiss an update candidate
    pub async fn dismiss_update(&self, update_id: i64) -> Result<()> {
        self.detector.dismiss_update(update_id).await
    }

    /// Delete a game and clean up any daemon torrents it owned
    pub async fn delete_game(&self, game_id: GameId, delete_files: bool) -> Result<()> {
        if !self.db.delete_game(game_id).await? {
            return Err(Error::NotFound(format!("game {game_id}")));
        }
        // The game is gone; its tagged torrents are orphans now
        if self.qbittorrent.is_configured().await {
            if let Err(e) = self.download.remove_orphaned_torrents(delete_files).await {
                warn!(error = %e, "Could not clean up orphaned torrents");
            }
        }
        Ok(())
    }

    /// Grab a recorded update candidate through the download service
    pub async fn grab_update(&self, update_id: i64) -> Result<GrabResult> {
        let update = self
            .db
            .game_update(update_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("update {update_id}")))?;
        let game = self
            .db
            .game(update.game_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("game {}", update.game_id)))?;

        let release = IndexerRelease {
            guid: update.download_url.clone(),
            title: update.title.clone(),
            size: update.size,
            seeders: update.seeders,
            published_at: update.found_at,
            download_url: update.download_url.clone(),
            indexer: update.indexer.clone(),
            categories: Vec::new(),
        };
        let scored: ScoredRelease = score_release(&release, &game, Utc::now());

        let result = self.download.grab_release(game.id, &scored).await?;
        if result.release_id >= 0 {
            self.detector.mark_update_grabbed(update_id).await?;
        }
        Ok(result)
    }
}
