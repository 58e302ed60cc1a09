//! # gamearr
//!
//! Automated game acquisition orchestrator library.
//!
//! Given a catalog of wanted games, gamearr periodically discovers release
//! candidates from a Prowlarr-compatible indexer aggregator, scores them
//! against per-game criteria, delegates the best candidate to qBittorrent,
//! tracks the transfer until the artifact is organized on local storage,
//! and watches downloaded titles for successor releases (new versions,
//! DLC, better repacks).
//!
//! ## Design Philosophy
//!
//! - **Library-first** - No CLI or HTTP surface, purely a Rust crate for
//!   embedding
//! - **Settings-driven** - Integrations read their configuration lazily
//!   from a TTL-cached store, so credential changes apply without restarts
//! - **Fail-quiet workers** - Background workers never let an error escape
//!   a tick; they log and try again next interval
//! - **Safe by default** - `dry_run` starts enabled; nothing touches the
//!   daemon until it is explicitly switched off
//!
//! ## Quick Start
//!
//! ```no_run
//! use gamearr::Orchestrator;
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = Orchestrator::new(Path::new("data/gamearr.db")).await?;
//!     orchestrator.start_workers().await;
//!
//!     // Run until SIGTERM/SIGINT, then shut down cleanly
//!     gamearr::run_with_shutdown(orchestrator).await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Database persistence layer
pub mod db;
/// Download service bridging decisions to the daemon
pub mod download;
/// Error types
pub mod error;
/// Library scanning and import matching
pub mod importer;
/// Indexer aggregator client
pub mod indexer;
/// Composition root and on-demand operations
pub mod orchestrator;
/// Library organization of completed transfers
pub mod organizer;
/// Torrent daemon client
pub mod qbittorrent;
/// Request rate limiting
pub mod rate_limit;
/// Backoff retry for integration calls
pub mod retry;
/// Release scoring and the auto-grab gate
pub mod scorer;
/// Typed settings store with TTL cache
pub mod settings;
/// Single-flight coalescing primitives
pub mod single_flight;
/// Core domain types
pub mod types;
/// Update detection for downloaded games
pub mod updates;
/// Version parsing and comparison
pub mod versions;
/// Long-lived periodic workers
pub mod workers;

// Re-export commonly used types
pub use db::Database;
pub use download::{DownloadService, SyncSummary};
pub use error::{DatabaseError, Error, Result, ToHttpStatus};
pub use importer::{DuplicateGroup, LibraryImporter, ParsedFolder};
pub use indexer::{IndexerClient, IndexerService, ProwlarrClient};
pub use orchestrator::Orchestrator;
pub use organizer::FileOrganizer;
pub use qbittorrent::{QbitClient, TorrentClient};
pub use scorer::{AutoGrabThresholds, score_release, should_auto_grab};
pub use settings::{BulkWritableKey, ProtectedKey, SettingsStore};
pub use types::{
    AddTorrentOptions, Game, GameId, GameStatus, GameUpdate, GrabResult, IndexerRelease, Library,
    LibraryFile, MatchConfidence, NewGame, Quality, Release, ReleaseId, ReleaseStatus,
    ScoredRelease, Torrent, UpdateCheckSummary, UpdatePolicy, UpdateSchedule, UpdateStatus,
    UpdateType,
};
pub use updates::UpdateDetector;
pub use workers::{DownloadMonitor, RssSynchronizer, SearchScheduler, UpdateCheckJob};

/// Run the orchestrator until a termination signal arrives, then shut down.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal
///   registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(orchestrator: Orchestrator) {
    wait_for_signal().await;
    orchestrator.shutdown().await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
