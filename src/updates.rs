//! Update detection for downloaded games
//!
//! For a downloaded game, a fresh indexer search is classified into
//! successor candidates: newer versions, DLC/expansions, and higher-quality
//! repacks of the same content. Candidates are deduplicated against
//! everything already recorded for the game (by download URL and by title)
//! and persisted for the user (or the auto policy) to act on.
//!
//! Concurrent checks for the same game coalesce onto one in-flight search
//! through a [`SingleFlight`] map: during the overlap exactly one upstream
//! indexer call happens and every caller receives its result.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::indexer::IndexerService;
use crate::single_flight::SingleFlight;
use crate::types::{
    Game, GameId, GameStatus, GameUpdate, NewGameUpdate, ScoredRelease, UpdateStatus, UpdateType,
};
use crate::versions::{compare_versions, is_newer_version, parse_version};
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

/// Title patterns that mark a release as additional content
const DLC_PATTERNS: &[&str] = &[
    r"(?i)\bDLC\b",
    r"(?i)\bExpansion\b",
    r"(?i)\bSeason Pass\b",
    r"(?i)\bGOTY\b",
    r"(?i)\b(?:Ultimate|Complete|Deluxe|Gold|Premium|Collector'?s|Definitive|Legendary)\s+Edition\b",
];

fn dlc_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        DLC_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

/// True when a release title reads as DLC for the given game: either a
/// known content keyword, or the game title followed by a connector and a
/// meaningful amount of extra content.
pub fn is_dlc_title(release_title: &str, game_title: &str) -> bool {
    if dlc_patterns().iter().any(|p| p.is_match(release_title)) {
        return true;
    }

    let lower = release_title.to_lowercase();
    let game_lower = game_title.to_lowercase();
    if game_lower.is_empty() {
        return false;
    }
    if let Some(idx) = lower.find(&game_lower) {
        let rest = &lower[idx + game_lower.len()..];
        for connector in [" - ", " + ", " and ", " with "] {
            if let Some(after) = rest.strip_prefix(connector) {
                if after.trim().len() > 5 {
                    return true;
                }
            }
        }
    }
    false
}

/// Classify one scored candidate against a downloaded game
///
/// Order matters: content additions win over version reads ("Game - DLC
/// v1.2" is DLC, not a version bump); a version that is not newer can
/// still qualify as a better release on quality rank.
pub fn classify_candidate(scored: &ScoredRelease, game: &Game) -> Option<NewGameUpdate> {
    let title = &scored.release.title;

    if is_dlc_title(title, &game.title) {
        return Some(new_update(scored, game.id, UpdateType::Dlc, None));
    }

    if let Some(version) = parse_version(title) {
        let newer = match &game.installed_version {
            None => true,
            Some(installed) => is_newer_version(&version, installed),
        };
        if newer {
            return Some(new_update(scored, game.id, UpdateType::Version, Some(version)));
        }
    }

    if scored.quality > game.installed_quality {
        return Some(new_update(scored, game.id, UpdateType::BetterRelease, None));
    }

    None
}

fn new_update(
    scored: &ScoredRelease,
    game_id: GameId,
    update_type: UpdateType,
    version: Option<String>,
) -> NewGameUpdate {
    NewGameUpdate {
        game_id,
        update_type,
        title: scored.release.title.clone(),
        version,
        size: scored.release.size,
        quality: scored.quality,
        seeders: scored.release.seeders,
        download_url: scored.release.download_url.clone(),
        indexer: scored.release.indexer.clone(),
    }
}

/// Finds successor releases for downloaded games
pub struct UpdateDetector {
    db: Arc<Database>,
    indexer: Arc<IndexerService>,
    inflight: SingleFlight<GameId, std::result::Result<Vec<GameUpdate>, Arc<Error>>>,
}

impl UpdateDetector {
    /// Create a detector over its collaborators
    pub fn new(db: Arc<Database>, indexer: Arc<IndexerService>) -> Self {
        Self {
            db,
            indexer,
            inflight: SingleFlight::new(),
        }
    }

    /// Check one game for successor releases
    ///
    /// Returns the update candidates newly recorded by this check. Games
    /// that are missing or not yet downloaded yield an empty list without
    /// touching the indexer. Concurrent calls for the same game share one
    /// underlying check.
    pub async fn check_game_for_updates(&self, game_id: GameId) -> Result<Vec<GameUpdate>> {
        let db = self.db.clone();
        let indexer = self.indexer.clone();

        self.inflight
            .run(game_id, move || async move {
                run_check(db, indexer, game_id).await.map_err(Arc::new)
            })
            .await
            .map_err(Error::from)
    }

    /// Dismiss an update candidate; dismissing twice is a no-op
    pub async fn dismiss_update(&self, update_id: i64) -> Result<()> {
        let update = self
            .db
            .game_update(update_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("update {update_id}")))?;

        if update.status == UpdateStatus::Dismissed {
            return Ok(());
        }
        self.db
            .set_update_status(update_id, UpdateStatus::Dismissed)
            .await
    }

    /// Mark an update candidate as delegated to the download service
    pub async fn mark_update_grabbed(&self, update_id: i64) -> Result<()> {
        self.db
            .set_update_status(update_id, UpdateStatus::Grabbed)
            .await
    }
}

/// The actual per-game check body, run under the single-flight gate
async fn run_check(
    db: Arc<Database>,
    indexer: Arc<IndexerService>,
    game_id: GameId,
) -> Result<Vec<GameUpdate>> {
    let Some(game) = db.game(game_id).await? else {
        return Ok(Vec::new());
    };
    if game.status != GameStatus::Downloaded {
        debug!(game = %game.title, status = %game.status, "Skipping update check, game not downloaded");
        return Ok(Vec::new());
    }

    let candidates = indexer.search_for_game(&game).await?;

    let existing = db.updates_for_game(game_id).await?;
    let mut seen_urls: HashSet<String> = existing
        .iter()
        .map(|u| u.download_url.clone())
        .collect();
    let mut seen_titles: HashSet<String> =
        existing.iter().map(|u| u.title.clone()).collect();

    let mut new_updates = Vec::new();
    for candidate in &candidates {
        // Candidates that barely resemble the game are noise, not updates
        if candidate.confidence == crate::types::MatchConfidence::Low {
            continue;
        }
        if seen_urls.contains(&candidate.release.download_url)
            || seen_titles.contains(&candidate.release.title)
        {
            continue;
        }
        if let Some(update) = classify_candidate(candidate, &game) {
            // Augment the dedup sets so intra-batch duplicates collapse too
            seen_urls.insert(update.download_url.clone());
            seen_titles.insert(update.title.clone());
            new_updates.push(update);
        }
    }

    let inserted = db.insert_game_updates(&new_updates).await?;

    if inserted > 0 {
        let latest_version = new_updates
            .iter()
            .filter(|u| u.update_type == UpdateType::Version)
            .filter_map(|u| u.version.as_deref())
            .max_by(|a, b| compare_versions(a, b))
            .map(str::to_string);

        db.mark_updates_available(game_id, latest_version.as_deref())
            .await?;
        info!(
            game = %game.title,
            count = inserted,
            "Recorded update candidates"
        );
    }

    db.set_last_update_check(game_id).await?;

    // Report exactly the rows this check created
    let new_urls: HashSet<&str> = new_updates.iter().map(|u| u.download_url.as_str()).collect();
    let all = db.updates_for_game(game_id).await?;
    Ok(all
        .into_iter()
        .filter(|u| new_urls.contains(u.download_url.as_str()))
        .collect())
}
