//! Deterministic release scoring and the auto-grab gate
//!
//! [`score_release`] is a pure function: the same `(release, game, now)`
//! inputs always produce the same [`ScoredRelease`]. The current time is an
//! explicit argument so the age penalty never depends on ambient state.

use crate::types::{Game, IndexerRelease, MatchConfidence, Quality, ScoredRelease};
use chrono::{DateTime, Duration, Utc};

/// One gigabyte, for the size sanity window
const GIGABYTE: f64 = 1_073_741_824.0;

/// Configured gate thresholds for automated grabs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AutoGrabThresholds {
    /// Minimum score a release must reach
    pub min_score: i32,
    /// Minimum seeder count a release must have
    pub min_seeders: i64,
}

/// Normalize a title for matching: lowercase, apostrophes stripped,
/// non-alphanumeric runs collapsed to single spaces.
pub fn normalize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut last_was_space = true;

    for c in title.chars() {
        if c == '\'' || c == '\u{2019}' {
            continue;
        }
        if c.is_alphanumeric() {
            for lower in c.to_lowercase() {
                out.push(lower);
            }
            last_was_space = false;
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }

    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Extract a quality tag by case-insensitive substring search, in priority
/// order. At most one tag is recorded.
pub fn extract_quality(title: &str) -> Option<Quality> {
    let lower = title.to_ascii_lowercase();
    if lower.contains("gog") {
        Some(Quality::Gog)
    } else if lower.contains("drm-free") || lower.contains("drm free") {
        Some(Quality::DrmFree)
    } else if lower.contains("repack") {
        Some(Quality::Repack)
    } else if lower.contains("scene") {
        Some(Quality::Scene)
    } else {
        None
    }
}

/// Score bonus carried by each quality tier
fn quality_bonus(quality: Quality) -> i32 {
    match quality {
        Quality::Gog => 50,
        Quality::DrmFree => 40,
        Quality::Repack => 20,
        Quality::Scene => 10,
    }
}

/// Score a release candidate against a game
///
/// Deterministic: base 100, title evidence, year bonus, quality bonus,
/// seeder and age adjustments, size sanity window, then a final confidence
/// promotion (score >= 150) or demotion (score < 80).
pub fn score_release(release: &IndexerRelease, game: &Game, now: DateTime<Utc>) -> ScoredRelease {
    let mut score = 100;
    let mut confidence = MatchConfidence::Medium;

    let game_title = normalize_title(&game.title);
    let release_title = normalize_title(&release.title);

    if !game_title.is_empty() && release_title.contains(&game_title) {
        score += 50;
        confidence = MatchConfidence::High;
    } else {
        let words: Vec<&str> = game_title
            .split(' ')
            .filter(|word| word.len() > 2)
            .collect();
        let hits = words
            .iter()
            .filter(|word| release_title.contains(*word))
            .count();
        let ratio = if words.is_empty() {
            0.0
        } else {
            hits as f64 / words.len() as f64
        };

        if ratio >= 0.8 {
            score += 30;
            confidence = MatchConfidence::High;
        } else if ratio >= 0.5 {
            score += 15;
        } else {
            score -= 60;
            confidence = MatchConfidence::Low;
        }
    }

    if let Some(year) = game.year {
        if release.title.contains(&year.to_string()) {
            score += 20;
        }
    }

    let quality = extract_quality(&release.title);
    if let Some(q) = quality {
        score += quality_bonus(q);
    }

    if release.seeders < 5 {
        score -= 30;
    } else if release.seeders >= 20 {
        score += 10;
    }

    if now.signed_duration_since(release.published_at) > Duration::days(2 * 365) {
        score -= 20;
    }

    let gigabytes = release.size as f64 / GIGABYTE;
    if gigabytes < 0.1 || gigabytes > 200.0 {
        score -= 50;
    }

    if score >= 150 {
        confidence = MatchConfidence::High;
    } else if score < 80 {
        confidence = MatchConfidence::Low;
    }

    ScoredRelease {
        release: release.clone(),
        quality,
        score,
        confidence,
    }
}

/// The auto-grab gate: score and seeders over their thresholds, and the
/// title match not Low confidence.
pub fn should_auto_grab(scored: &ScoredRelease, thresholds: &AutoGrabThresholds) -> bool {
    scored.score >= thresholds.min_score
        && scored.release.seeders >= thresholds.min_seeders
        && scored.confidence != MatchConfidence::Low
}

/// Rank scored releases: descending score, then descending seeders, then
/// newer publication date.
pub fn rank_releases(mut scored: Vec<ScoredRelease>) -> Vec<ScoredRelease> {
    scored.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| b.release.seeders.cmp(&a.release.seeders))
            .then_with(|| b.release.published_at.cmp(&a.release.published_at))
    });
    scored
}

/// Find the wanted game a release matches best: argmax score among
/// candidates whose match confidence is not Low.
pub fn find_best_match<'a>(
    release: &IndexerRelease,
    games: &'a [Game],
    now: DateTime<Utc>,
) -> Option<(&'a Game, ScoredRelease)> {
    games
        .iter()
        .map(|game| (game, score_release(release, game, now)))
        .filter(|(_, scored)| scored.confidence != MatchConfidence::Low)
        .max_by(|(_, a), (_, b)| {
            a.score
                .cmp(&b.score)
                .then_with(|| a.release.seeders.cmp(&b.release.seeders))
        })
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GameId, GameStatus, UpdatePolicy};

    fn game(title: &str, year: Option<i32>) -> Game {
        Game {
            id: GameId(1),
            external_id: 1,
            title: title.to_string(),
            year,
            platform: Some("PC".to_string()),
            cover_url: None,
            folder_path: None,
            monitored: true,
            status: GameStatus::Wanted,
            installed_version: None,
            installed_quality: None,
            update_policy: UpdatePolicy::Notify,
            update_available: false,
            last_update_check: None,
            latest_version: None,
            library_id: None,
            added_at: Utc::now(),
        }
    }

    fn release(title: &str, seeders: i64, size: i64, age_days: i64) -> IndexerRelease {
        IndexerRelease {
            guid: format!("guid-{title}"),
            title: title.to_string(),
            size,
            seeders,
            published_at: Utc::now() - Duration::days(age_days),
            download_url: "magnet:?xt=urn:btih:abc".to_string(),
            indexer: Some("TestIndexer".to_string()),
            categories: vec![4050],
        }
    }

    const EIGHT_GIB: i64 = 8 * 1024 * 1024 * 1024;

    #[test]
    fn normalization_strips_apostrophes_and_collapses_runs() {
        assert_eq!(normalize_title("Assassin's Creed: Unity!"), "assassins creed unity");
        assert_eq!(normalize_title("  Hades  "), "hades");
        assert_eq!(normalize_title("D.O.T.  --  Remastered"), "d o t remastered");
    }

    #[test]
    fn strong_title_match_with_gog_and_seeders_scores_210() {
        let g = game("Hades", Some(2020));
        let r = release("Hades v1.38.22 [GOG]", 42, EIGHT_GIB, 30);
        let scored = score_release(&r, &g, Utc::now());

        // 100 base + 50 substring + 50 GOG + 10 seeders
        assert_eq!(scored.score, 210);
        assert_eq!(scored.confidence, MatchConfidence::High);
        assert_eq!(scored.quality, Some(Quality::Gog));
    }

    #[test]
    fn year_in_release_title_adds_twenty() {
        let g = game("Hades", Some(2020));
        let r = release("Hades (2020) [GOG]", 42, EIGHT_GIB, 30);
        let scored = score_release(&r, &g, Utc::now());
        assert_eq!(scored.score, 230);
    }

    #[test]
    fn scoring_is_pure() {
        let g = game("Hades", Some(2020));
        let r = release("Hades v1.38.22 [GOG]", 42, EIGHT_GIB, 30);
        let now = Utc::now();

        let a = score_release(&r, &g, now);
        let b = score_release(&r, &g, now);
        assert_eq!(a.score, b.score);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.quality, b.quality);
        assert_eq!(a.release.guid, b.release.guid);
    }

    #[test]
    fn word_hit_ratio_tiers() {
        let g = game("The Witness Epic Puzzle Island", None);

        // All five words present but reordered, so the substring branch does
        // not fire; ratio 1.0 earns +30 and High confidence
        let all = release("Witness The Epic Island Puzzle Bundle", 10, EIGHT_GIB, 10);
        let scored = score_release(&all, &g, Utc::now());
        assert_eq!(scored.score, 130, "full hit ratio earns +30");
        assert_eq!(scored.confidence, MatchConfidence::High);

        // 3/5 words present -> ratio 0.6 -> +15
        let half = release("Witness Puzzle Island Collection", 10, EIGHT_GIB, 10);
        let scored = score_release(&half, &g, Utc::now());
        assert_eq!(scored.score, 115);

        // 0/5 words -> -60 and Low
        let none = release("Completely Unrelated Shooter", 10, EIGHT_GIB, 10);
        let scored = score_release(&none, &g, Utc::now());
        assert_eq!(scored.score, 40);
        assert_eq!(scored.confidence, MatchConfidence::Low);
    }

    #[test]
    fn low_seeders_penalized_and_final_demotion_applies() {
        let g = game("Hades", None);
        // substring +50, seeders 2 -> -30: 120, still >= 80 -> stays High
        let r = release("Hades", 2, EIGHT_GIB, 10);
        let scored = score_release(&r, &g, Utc::now());
        assert_eq!(scored.score, 120);
        assert_eq!(scored.confidence, MatchConfidence::High);

        // substring +50, seeders 2 -> -30, stale -20, tiny size -50: 50 -> Low
        let r = release("Hades", 2, 50 * 1024 * 1024, 800);
        let scored = score_release(&r, &g, Utc::now());
        assert_eq!(scored.score, 50);
        assert_eq!(scored.confidence, MatchConfidence::Low);
    }

    #[test]
    fn oversized_release_is_penalized() {
        let g = game("Hades", None);
        let r = release("Hades", 42, 250 * 1024 * 1024 * 1024, 10);
        let scored = score_release(&r, &g, Utc::now());
        // 100 + 50 + 10 - 50
        assert_eq!(scored.score, 110);
    }

    #[test]
    fn quality_extraction_respects_priority_order() {
        assert_eq!(extract_quality("Game [GOG] Repack"), Some(Quality::Gog));
        assert_eq!(extract_quality("Game DRM-Free Repack"), Some(Quality::DrmFree));
        assert_eq!(extract_quality("Game DRM Free"), Some(Quality::DrmFree));
        assert_eq!(extract_quality("Game FitGirl Repack"), Some(Quality::Repack));
        assert_eq!(extract_quality("Game Scene Rip"), Some(Quality::Scene));
        assert_eq!(extract_quality("Plain Game"), None);
    }

    #[test]
    fn auto_grab_gate_checks_score_seeders_and_confidence() {
        let thresholds = AutoGrabThresholds {
            min_score: 100,
            min_seeders: 5,
        };
        let g = game("Hades", Some(2020));

        let good = score_release(&release("Hades [GOG]", 42, EIGHT_GIB, 30), &g, Utc::now());
        assert!(should_auto_grab(&good, &thresholds));

        let few_seeders = score_release(&release("Hades [GOG]", 3, EIGHT_GIB, 30), &g, Utc::now());
        assert!(!should_auto_grab(&few_seeders, &thresholds));

        let unrelated = score_release(
            &release("Totally Different Title", 42, EIGHT_GIB, 30),
            &g,
            Utc::now(),
        );
        assert_eq!(unrelated.confidence, MatchConfidence::Low);
        assert!(!should_auto_grab(&unrelated, &thresholds));
    }

    #[test]
    fn auto_grab_gate_is_monotone_in_score_and_seeders() {
        let thresholds = AutoGrabThresholds {
            min_score: 100,
            min_seeders: 5,
        };
        let g = game("Hades", Some(2020));
        let base = score_release(&release("Hades [GOG]", 42, EIGHT_GIB, 30), &g, Utc::now());
        assert!(should_auto_grab(&base, &thresholds));

        // Lowering score cannot flip false -> true
        let mut lower_score = base.clone();
        lower_score.score -= 1;
        if !should_auto_grab(&lower_score, &thresholds) {
            let mut even_lower = lower_score.clone();
            even_lower.score -= 100;
            assert!(!should_auto_grab(&even_lower, &thresholds));
        }

        // Lowering seeders cannot flip false -> true
        let mut lower_seeders = base;
        lower_seeders.release.seeders = 4;
        assert!(!should_auto_grab(&lower_seeders, &thresholds));
        lower_seeders.release.seeders = 1;
        assert!(!should_auto_grab(&lower_seeders, &thresholds));
    }

    #[test]
    fn ranking_breaks_ties_on_seeders_then_recency() {
        let g = game("Hades", None);
        let now = Utc::now();

        // Seeder counts stay inside [5, 20) so every release scores 150 and
        // only the tie-breaks decide the order
        let older = score_release(&release("Hades", 10, EIGHT_GIB, 100), &g, now);
        let newer = score_release(&release("Hades", 10, EIGHT_GIB, 1), &g, now);
        let seeded = score_release(&release("Hades", 15, EIGHT_GIB, 100), &g, now);

        let ranked = rank_releases(vec![older.clone(), newer.clone(), seeded.clone()]);
        assert_eq!(ranked[0].release.seeders, 15, "seeders break score ties");
        assert_eq!(
            ranked[1].release.published_at, newer.release.published_at,
            "recency breaks seeder ties"
        );
    }

    #[test]
    fn best_match_skips_low_confidence_games() {
        let hades = game("Hades", Some(2020));
        let mut celeste = game("Celeste", Some(2018));
        celeste.id = GameId(2);
        let games = vec![hades, celeste];

        let r = release("Hades v1.38 [GOG]", 42, EIGHT_GIB, 30);
        let (matched, scored) = find_best_match(&r, &games, Utc::now()).expect("match exists");
        assert_eq!(matched.title, "Hades");
        assert_eq!(scored.confidence, MatchConfidence::High);

        let unrelated = release("Some Other Game Entirely", 42, EIGHT_GIB, 30);
        assert!(
            find_best_match(&unrelated, &games, Utc::now()).is_none(),
            "low-confidence candidates never match"
        );
    }
}
