//! Search scheduler: periodic wanted-game sweeps and failed-download resets
//!
//! Per tick: reset the failed-download cohort (batch-correct, no per-row
//! queries), then search the indexer for every monitored wanted game and
//! grab the first candidate that passes the auto-grab gate, pacing
//! searches two seconds apart to avoid bursting the aggregator.

use crate::db::Database;
use crate::download::DownloadService;
use crate::error::Result;
use crate::indexer::IndexerService;
use crate::scorer::should_auto_grab;
use crate::settings::SettingsStore;
use crate::types::{GameId, GameStatus, ReleaseStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause between per-game searches within one tick
const INTER_GAME_DELAY: Duration = Duration::from_secs(2);

/// Periodic worker that turns wanted games into grabs
pub struct SearchScheduler {
    db: Arc<Database>,
    settings: Arc<SettingsStore>,
    indexer: Arc<IndexerService>,
    download: Arc<DownloadService>,
    is_running: AtomicBool,
    shutdown: CancellationToken,
}

impl SearchScheduler {
    /// Create the worker over its collaborators
    pub fn new(
        db: Arc<Database>,
        settings: Arc<SettingsStore>,
        indexer: Arc<IndexerService>,
        download: Arc<DownloadService>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            db,
            settings,
            indexer,
            download,
            is_running: AtomicBool::new(false),
            shutdown,
        }
    }

    /// Run until the shutdown token fires
    ///
    /// The interval is re-read from configuration after every tick; a
    /// changed value reschedules the next sleep immediately.
    pub async fn run(self: Arc<Self>) {
        info!("Search scheduler started");

        let mut interval_minutes = match self.settings.search_interval_minutes().await {
            Ok(minutes) => minutes,
            Err(e) => {
                warn!(error = %e, "Could not read search interval, using default");
                15
            }
        };

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sleep(Duration::from_secs(interval_minutes * 60)) => {}
            }

            self.tick().await;

            match self.settings.search_interval_minutes().await {
                Ok(configured) if configured != interval_minutes => {
                    info!(
                        from = interval_minutes,
                        to = configured,
                        "Search interval changed, rescheduling"
                    );
                    interval_minutes = configured;
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Could not re-read search interval"),
            }
        }

        info!("Search scheduler stopped");
    }

    /// One scheduler pass; concurrent invocations collapse to one
    pub async fn tick(&self) {
        if self
            .is_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Search tick already running, skipping");
            return;
        }

        if let Err(e) = self.run_tick().await {
            error!(error = %e, "Search scheduler tick failed");
        }

        self.is_running.store(false, Ordering::SeqCst);
    }

    async fn run_tick(&self) -> Result<()> {
        self.reset_failed_downloads().await?;

        if !self.indexer.is_configured().await {
            debug!("Indexer not configured, skipping search sweep");
            return Ok(());
        }

        let wanted = self
            .db
            .monitored_games_with_status(GameStatus::Wanted)
            .await?;
        if wanted.is_empty() {
            debug!("No wanted games to search for");
            return Ok(());
        }

        let thresholds = self.settings.auto_grab_thresholds().await?;
        let mut grabbed = 0usize;
        let mut failed = 0usize;

        for (index, game) in wanted.iter().enumerate() {
            if self.shutdown.is_cancelled() {
                break;
            }

            match self.indexer.search_for_game(game).await {
                Ok(candidates) => {
                    let best = candidates
                        .into_iter()
                        .find(|scored| should_auto_grab(scored, &thresholds));
                    if let Some(scored) = best {
                        match self.download.grab_release(game.id, &scored).await {
                            Ok(result) => {
                                grabbed += 1;
                                debug!(
                                    game = %game.title,
                                    release = %scored.release.title,
                                    release_id = result.release_id,
                                    "Auto-grabbed release"
                                );
                            }
                            Err(e) => {
                                failed += 1;
                                warn!(game = %game.title, error = %e, "Grab failed");
                            }
                        }
                    } else {
                        debug!(game = %game.title, "No candidate passed the auto-grab gate");
                    }
                }
                Err(e) => {
                    failed += 1;
                    warn!(game = %game.title, error = %e, "Search failed");
                }
            }

            if index + 1 < wanted.len() {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = sleep(INTER_GAME_DELAY) => {}
                }
            }
        }

        if grabbed > 0 || failed > 0 {
            info!(grabbed, failed, searched = wanted.len(), "Search sweep finished");
        }
        Ok(())
    }

    /// Batch-correct failed-download reset
    ///
    /// One batch fetch of the affected games, one batch status update for
    /// the games being re-armed, one batch delete of every failed release.
    async fn reset_failed_downloads(&self) -> Result<()> {
        let failed = self
            .db
            .releases_with_statuses(&[ReleaseStatus::Failed])
            .await?;
        if failed.is_empty() {
            return Ok(());
        }

        let mut game_ids: Vec<GameId> = failed.iter().map(|r| r.game_id).collect();
        game_ids.sort();
        game_ids.dedup();
        let games = self.db.games_by_ids(&game_ids).await?;

        let mut reset: Vec<GameId> = Vec::new();
        for release in &failed {
            match games.get(&release.game_id) {
                Some(game) if game.monitored && game.status == GameStatus::Downloading => {
                    reset.push(game.id);
                }
                Some(_) => {}
                None => {
                    warn!(
                        game_id = %release.game_id,
                        release = %release.title,
                        "Failed release references a deleted game, dropping it"
                    );
                }
            }
        }
        reset.sort();
        reset.dedup();

        self.db
            .batch_update_game_status(&reset, GameStatus::Wanted)
            .await?;
        let release_ids: Vec<_> = failed.iter().map(|r| r.id).collect();
        self.db.batch_delete_releases(&release_ids).await?;

        info!(
            reset = reset.len(),
            deleted = release_ids.len(),
            "Reset failed downloads to wanted"
        );
        Ok(())
    }
}
