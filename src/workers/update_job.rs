//! Update-check job: scheduled and on-demand whole-catalogue sweeps
//!
//! A sweep walks every downloaded game whose update policy is not Ignore
//! and runs the per-game update check with one second of pacing between
//! games. Exactly one sweep runs at a time: the scheduled tick and any
//! manual trigger join the same in-flight sweep through a [`SingleSlot`]
//! rather than starting a duplicate.
//!
//! The first check fires 60 seconds after launch so boot is never blocked
//! on indexer traffic; after that the cadence follows the configured
//! hourly/daily/weekly schedule.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::settings::SettingsStore;
use crate::single_flight::SingleSlot;
use crate::types::{GameStatus, UpdateCheckSummary, UpdatePolicy};
use crate::updates::UpdateDetector;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Delay before the first sweep after launch
const STARTUP_DELAY: Duration = Duration::from_secs(60);

/// Pause between per-game checks within one sweep
const INTER_GAME_DELAY: Duration = Duration::from_secs(1);

/// Periodic and on-demand update sweeps with single-flight coalescing
pub struct UpdateCheckJob {
    db: Arc<Database>,
    settings: Arc<SettingsStore>,
    detector: Arc<UpdateDetector>,
    sweep: SingleSlot<std::result::Result<UpdateCheckSummary, Arc<Error>>>,
    shutdown: CancellationToken,
}

impl UpdateCheckJob {
    /// Create the job over its collaborators
    pub fn new(
        db: Arc<Database>,
        settings: Arc<SettingsStore>,
        detector: Arc<UpdateDetector>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            db,
            settings,
            detector,
            sweep: SingleSlot::new(),
            shutdown,
        }
    }

    /// Run until the shutdown token fires
    pub async fn run(self: Arc<Self>) {
        info!("Update-check job started");

        tokio::select! {
            _ = self.shutdown.cancelled() => {
                info!("Update-check job stopped");
                return;
            }
            _ = sleep(STARTUP_DELAY) => {}
        }

        loop {
            match self.settings.update_check_enabled().await {
                Ok(true) => match self.run_sweep().await {
                    Ok(summary) => {
                        info!(
                            checked = summary.checked,
                            updates_found = summary.updates_found,
                            "Update sweep finished"
                        );
                    }
                    Err(e) => warn!(error = %e, "Update sweep failed"),
                },
                Ok(false) => debug!("Update checks disabled, skipping sweep"),
                Err(e) => warn!(error = %e, "Could not read update-check settings"),
            }

            let period = match self.settings.update_check_schedule().await {
                Ok(schedule) => schedule.period(),
                Err(e) => {
                    warn!(error = %e, "Could not read update-check schedule, using daily");
                    Duration::from_secs(24 * 60 * 60)
                }
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sleep(period) => {}
            }
        }

        info!("Update-check job stopped");
    }

    /// Run a sweep now, or join the sweep already in flight
    ///
    /// Manual triggers and scheduled ticks share the same entry point, so
    /// a sweep is never duplicated.
    pub async fn run_sweep(&self) -> Result<UpdateCheckSummary> {
        let db = self.db.clone();
        let detector = self.detector.clone();
        let shutdown = self.shutdown.clone();

        self.sweep
            .run(move || async move {
                sweep_catalogue(db, detector, shutdown)
                    .await
                    .map_err(Arc::new)
            })
            .await
            .map_err(Error::from)
    }

    /// True while a sweep is in flight
    pub async fn sweep_in_flight(&self) -> bool {
        self.sweep.in_flight().await
    }
}

/// The sweep body, run under the single-flight slot
async fn sweep_catalogue(
    db: Arc<Database>,
    detector: Arc<UpdateDetector>,
    shutdown: CancellationToken,
) -> Result<UpdateCheckSummary> {
    let downloaded = db.games_with_status(GameStatus::Downloaded).await?;
    let eligible: Vec<_> = downloaded
        .into_iter()
        .filter(|g| g.update_policy != UpdatePolicy::Ignore)
        .collect();

    let mut summary = UpdateCheckSummary::default();

    for (index, game) in eligible.iter().enumerate() {
        if shutdown.is_cancelled() {
            break;
        }

        summary.checked += 1;
        match detector.check_game_for_updates(game.id).await {
            Ok(updates) => {
                summary.updates_found += updates.len();
            }
            Err(e) => {
                warn!(game = %game.title, error = %e, "Update check failed");
            }
        }

        if index + 1 < eligible.len() {
            sleep(INTER_GAME_DELAY).await;
        }
    }

    Ok(summary)
}
