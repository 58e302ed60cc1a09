//! RSS synchronizer: matches the global feed against wanted games
//!
//! Pulls up to 100 items from the aggregator's feed each tick, skips
//! anything already processed this process lifetime (bounded GUID memory,
//! insertion-order eviction), and auto-grabs feed items that match a
//! wanted game strongly enough. A game grabbed during a tick leaves the
//! working set so later items in the same tick cannot grab it twice.

use crate::db::Database;
use crate::download::DownloadService;
use crate::error::Result;
use crate::indexer::IndexerService;
use crate::scorer::{find_best_match, should_auto_grab};
use crate::settings::SettingsStore;
use crate::types::GameStatus;
use chrono::Utc;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Feed items requested per tick
const FEED_LIMIT: u32 = 100;

/// Maximum remembered GUIDs
const MAX_PROCESSED_GUIDS: usize = 1000;

/// Bounded set of feed GUIDs already considered this process lifetime
///
/// Insertion order is authoritative for eviction: when the set is full,
/// the oldest inserted entries leave first, regardless of when they were
/// last observed in the feed.
pub struct ProcessedGuids {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl ProcessedGuids {
    /// Create a set with the given capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Record a GUID. Returns false when it was already present.
    pub fn insert(&mut self, guid: &str) -> bool {
        if self.seen.contains(guid) {
            return false;
        }
        self.seen.insert(guid.to_string());
        self.order.push_back(guid.to_string());

        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    /// Current number of remembered GUIDs
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// True when no GUIDs are remembered
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// True when the GUID has been processed and not yet evicted
    pub fn contains(&self, guid: &str) -> bool {
        self.seen.contains(guid)
    }
}

impl Default for ProcessedGuids {
    fn default() -> Self {
        Self::with_capacity(MAX_PROCESSED_GUIDS)
    }
}

/// Periodic puller of the aggregator's global feed
pub struct RssSynchronizer {
    db: Arc<Database>,
    settings: Arc<SettingsStore>,
    indexer: Arc<IndexerService>,
    download: Arc<DownloadService>,
    guids: Mutex<ProcessedGuids>,
    is_running: AtomicBool,
    shutdown: CancellationToken,
}

impl RssSynchronizer {
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
            guids: Mutex::new(ProcessedGuids::default()),
            is_running: AtomicBool::new(false),
            shutdown,
        }
    }

    /// Run until the shutdown token fires
    pub async fn run(self: Arc<Self>) {
        info!("RSS synchronizer started");

        let mut interval_minutes = match self.settings.rss_sync_interval_minutes().await {
            Ok(minutes) => minutes,
            Err(e) => {
                warn!(error = %e, "Could not read RSS interval, using default");
                15
            }
        };

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sleep(Duration::from_secs(interval_minutes * 60)) => {}
            }

            self.tick().await;

            match self.settings.rss_sync_interval_minutes().await {
                Ok(configured) if configured != interval_minutes => {
                    info!(
                        from = interval_minutes,
                        to = configured,
                        "RSS interval changed, rescheduling"
                    );
                    interval_minutes = configured;
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Could not re-read RSS interval"),
            }
        }

        info!("RSS synchronizer stopped");
    }

    /// One feed pass; concurrent invocations collapse to one
    pub async fn tick(&self) {
        if self
            .is_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("RSS tick already running, skipping");
            return;
        }

        if let Err(e) = self.run_tick().await {
            error!(error = %e, "RSS sync tick failed");
        }

        self.is_running.store(false, Ordering::SeqCst);
    }

    async fn run_tick(&self) -> Result<()> {
        if !self.indexer.is_configured().await {
            debug!("Indexer not configured, skipping RSS sync");
            return Ok(());
        }

        let mut wanted = self
            .db
            .monitored_games_with_status(GameStatus::Wanted)
            .await?;
        if wanted.is_empty() {
            debug!("No wanted games, skipping RSS sync");
            return Ok(());
        }

        let items = self.indexer.rss_releases(FEED_LIMIT).await?;
        if items.is_empty() {
            return Ok(());
        }

        let thresholds = self.settings.auto_grab_thresholds().await?;
        let now = Utc::now();
        let mut grabbed = 0usize;

        for item in items {
            // The guid is marked processed whether or not anything matches;
            // a feed item is only ever considered once.
            let fresh = {
                let mut guids = self.guids.lock().unwrap_or_else(|e| e.into_inner());
                guids.insert(&item.guid)
            };
            if !fresh {
                continue;
            }

            let Some((game, scored)) = find_best_match(&item, &wanted, now) else {
                continue;
            };
            if !should_auto_grab(&scored, &thresholds) {
                continue;
            }

            let game_id = game.id;
            let game_title = game.title.clone();
            match self.download.grab_release(game_id, &scored).await {
                Ok(result) => {
                    grabbed += 1;
                    info!(
                        game = %game_title,
                        release = %scored.release.title,
                        release_id = result.release_id,
                        "Grabbed release from RSS feed"
                    );
                    // The game is satisfied for this tick; later feed items
                    // must not grab it again. Remaining items still get
                    // their guids marked processed.
                    wanted.retain(|g| g.id != game_id);
                }
                Err(e) => {
                    warn!(game = %game_title, error = %e, "RSS grab failed");
                }
            }
        }

        if grabbed > 0 {
            info!(grabbed, "RSS sync finished");
        }
        Ok(())
    }

    /// Number of GUIDs currently remembered (bounded by capacity)
    pub fn processed_guid_count(&self) -> usize {
        self.guids.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
