//! Library scanning and import matching
//!
//! Walks configured library roots and records every game folder it finds.
//! A directory counts as a game folder when it directly contains at least
//! one regular file; directories holding only subdirectories are category
//! folders and are recursed into. Folder names are parsed back into titles
//! (release-group tags and version strings stripped, trailing year
//! extracted) and matched against the catalog.
//!
//! Rescanning is idempotent: records are upserted by folder path, and rows
//! whose folders vanished from disk are deleted.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::{Game, GameId, LibraryFile, NewLibraryFile};
use crate::versions::strip_version_patterns;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Release-group and packaging tags stripped from folder names, in order
const FOLDER_TAG_PATTERNS: &[&str] = &[
    r"(?i)-CODEX\b",
    r"(?i)-PLAZA\b",
    r"(?i)-SKIDROW\b",
    r"(?i)-RELOADED\b",
    r"(?i)-FitGirl\b",
    r"(?i)-DODI\b",
    r"(?i)-ElAmigos\b",
    r"(?i)-GOG\b",
    r"(?i)-DARKSiDERS\b",
    r"(?i)-EMPRESS\b",
    r"(?i)-Razor1911\b",
    r"(?i)-RUNE\b",
    r"(?i)-TiNYiSO\b",
    r"(?i)-HOODLUM\b",
    r"(?i)\[GOG\]",
    r"(?i)\[REPACK\]",
    r"(?i)\[MULTI\d+\]",
    r"(?i)\[R\.G\.[^\]]*\]",
];

fn tag_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        FOLDER_TAG_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

fn year_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\((\d{4})\)\s*$").ok())
        .as_ref()
}

/// A folder name parsed back into title and year
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedFolder {
    /// Cleaned title
    pub title: String,
    /// Trailing ` (YYYY)` year, when present
    pub year: Option<i32>,
}

/// Parse a library folder name: strip tags and versions, pull the year,
/// normalize separators.
pub fn parse_folder_name(name: &str) -> ParsedFolder {
    let mut working = name.to_string();

    for pattern in tag_patterns() {
        working = pattern.replace_all(&working, " ").into_owned();
    }

    working = strip_version_patterns(&working);

    let mut year = None;
    let trimmed = working.trim_end().to_string();
    if let Some(captures) = year_pattern().and_then(|p| p.captures(&trimmed)) {
        if let (Some(whole), Some(group)) = (captures.get(0), captures.get(1)) {
            year = group.as_str().parse::<i32>().ok();
            working = trimmed[..whole.start()].to_string();
        }
    }

    working = working.replace(['.', '_'], " ");
    let title = working.split_whitespace().collect::<Vec<_>>().join(" ");

    ParsedFolder {
        title: title.trim_matches(['-', ' ']).to_string(),
        year,
    }
}

/// One folder discovered by a filesystem walk
struct ScannedFolder {
    path: PathBuf,
    library_id: i64,
}

/// Walk one library root using the game-folder heuristic
fn walk_root(root: &Path, library_id: i64) -> Vec<ScannedFolder> {
    let mut found = Vec::new();
    let mut containers = vec![root.to_path_buf()];

    while let Some(container) = containers.pop() {
        let Ok(entries) = std::fs::read_dir(&container) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if dir_contains_file(&path) {
                found.push(ScannedFolder {
                    path,
                    library_id,
                });
            } else {
                containers.push(path);
            }
        }
    }

    found
}

/// True when the directory directly contains at least one regular file
fn dir_contains_file(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .any(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        })
        .unwrap_or(false)
}

/// A group of catalog games with suspiciously similar titles
#[derive(Clone, Debug)]
pub struct DuplicateGroup {
    /// The similar games, each with its on-disk folder size when known
    pub games: Vec<(Game, Option<u64>)>,
}

/// Title similarity at or above which two games count as duplicates
const DUPLICATE_SIMILARITY: f64 = 0.8;

/// Scans library roots and matches folders to catalog games
pub struct LibraryImporter {
    db: Arc<Database>,
}

impl LibraryImporter {
    /// Create an importer over the database
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Scanned folder records, served from cache when available
    ///
    /// Falls back to a filesystem walk only when nothing has been scanned
    /// yet (for the requested scope).
    pub async fn scan_library(&self, library_id: Option<i64>) -> Result<Vec<LibraryFile>> {
        let cached = self.db.library_files(library_id).await?;
        if !cached.is_empty() {
            debug!(rows = cached.len(), "Serving library scan from cache");
            return Ok(cached);
        }
        self.refresh_library_scan(library_id).await
    }

    /// Walk the filesystem, upsert folder records, drop vanished rows, and
    /// re-match folders to catalog games
    pub async fn refresh_library_scan(&self, library_id: Option<i64>) -> Result<Vec<LibraryFile>> {
        let libraries = match library_id {
            Some(id) => {
                let library = self
                    .db
                    .library(id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("library {id}")))?;
                vec![library]
            }
            None => self
                .db
                .libraries()
                .await?
                .into_iter()
                .filter(|l| l.monitored)
                .collect(),
        };

        let mut scanned: Vec<ScannedFolder> = Vec::new();
        for library in &libraries {
            let root = PathBuf::from(&library.path);
            if !root.is_dir() {
                warn!(library = %library.name, path = %library.path, "Library root is not a directory");
                continue;
            }
            let id = library.id;
            let mut found = tokio::task::spawn_blocking(move || walk_root(&root, id))
                .await
                .map_err(|e| Error::Other(format!("library walk task failed: {e}")))?;
            scanned.append(&mut found);
        }

        let mut found_paths: HashSet<String> = HashSet::new();
        for folder in &scanned {
            let folder_path = folder.path.to_string_lossy().to_string();
            let name = folder
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let parsed = parse_folder_name(&name);

            self.db
                .upsert_library_file(&NewLibraryFile {
                    folder_path: folder_path.clone(),
                    parsed_title: parsed.title,
                    parsed_year: parsed.year,
                    library_id: Some(folder.library_id),
                })
                .await?;
            found_paths.insert(folder_path);
        }

        // Rows whose folders vanished from disk are deleted
        let existing = self.db.library_files(library_id).await?;
        let stale: Vec<i64> = existing
            .iter()
            .filter(|f| !found_paths.contains(&f.folder_path))
            .map(|f| f.id)
            .collect();
        let deleted = self.db.delete_library_files(&stale).await?;

        self.match_library_files(library_id).await?;

        let rows = self.db.library_files(library_id).await?;
        info!(
            scanned = rows.len(),
            deleted,
            "Library scan finished"
        );
        Ok(rows)
    }

    /// Match scanned folders to catalog games by lowercase title, and by
    /// year when both sides have one
    pub async fn match_library_files(&self, library_id: Option<i64>) -> Result<usize> {
        let games = self.db.games().await?;
        let by_title: HashMap<String, &Game> = games
            .iter()
            .map(|g| (g.title.to_lowercase(), g))
            .collect();

        let files = self.db.library_files(library_id).await?;
        let mut matched = 0usize;

        for file in &files {
            if file.ignored {
                continue;
            }
            let Some(game) = by_title.get(&file.parsed_title.to_lowercase()) else {
                continue;
            };
            if let (Some(folder_year), Some(game_year)) = (file.parsed_year, game.year) {
                if folder_year != game_year {
                    continue;
                }
            }
            if file.matched_game_id != Some(game.id) {
                self.db.set_library_file_match(file.id, game.id).await?;
            }
            matched += 1;
        }

        Ok(matched)
    }

    /// Group catalog games whose titles are near-duplicates
    ///
    /// Folder sizes for every group member are computed concurrently so a
    /// large library does not serialize disk walks.
    pub async fn find_duplicate_games(&self) -> Result<Vec<DuplicateGroup>> {
        let games = self.db.games().await?;
        let titles: Vec<String> = games.iter().map(|g| g.title.to_lowercase()).collect();

        let mut grouped: Vec<Vec<usize>> = Vec::new();
        let mut visited = vec![false; games.len()];
        for i in 0..games.len() {
            if visited[i] {
                continue;
            }
            let mut group = vec![i];
            for j in (i + 1)..games.len() {
                if visited[j] {
                    continue;
                }
                if strsim::normalized_levenshtein(&titles[i], &titles[j])
                    >= DUPLICATE_SIMILARITY
                {
                    group.push(j);
                    visited[j] = true;
                }
            }
            if group.len() > 1 {
                grouped.push(group);
            }
        }

        let mut result = Vec::new();
        for group in grouped {
            let tasks: Vec<_> = group
                .iter()
                .map(|&index| {
                    let folder = games[index].folder_path.clone();
                    tokio::task::spawn_blocking(move || {
                        folder.map(|path| folder_size(Path::new(&path)))
                    })
                })
                .collect();

            let mut members = Vec::new();
            for (&index, task) in group.iter().zip(tasks) {
                let size = task
                    .await
                    .map_err(|e| Error::Other(format!("size task failed: {e}")))?;
                members.push((games[index].clone(), size));
            }
            result.push(DuplicateGroup { games: members });
        }

        Ok(result)
    }

    /// Explicitly import a scanned folder as a game's installation
    ///
    /// Marks the game downloaded with the folder recorded, the manual
    /// import path for titles that were already on disk.
    pub async fn import_match(&self, file_id: i64, game_id: GameId) -> Result<()> {
        let files = self.db.library_files(None).await?;
        let file = files
            .iter()
            .find(|f| f.id == file_id)
            .ok_or_else(|| Error::NotFound(format!("library file {file_id}")))?;

        let game = self
            .db
            .game(game_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("game {game_id}")))?;

        self.db.set_library_file_match(file_id, game_id).await?;
        self.db
            .update_game_status(game_id, crate::types::GameStatus::Downloaded)
            .await?;
        self.db.set_game_folder(game_id, &file.folder_path).await?;

        info!(game = %game.title, folder = %file.folder_path, "Imported existing folder");
        Ok(())
    }
}

/// Recursive byte size of a folder
fn folder_size(path: &Path) -> u64 {
    walkdir::WalkDir::new(path)
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GameStatus, NewGame, NewLibrary};

    #[test]
    fn folder_names_parse_to_titles_and_years() {
        assert_eq!(
            parse_folder_name("Hades (2020)"),
            ParsedFolder {
                title: "Hades".to_string(),
                year: Some(2020),
            }
        );
        assert_eq!(
            parse_folder_name("Hades.v1.38.22-CODEX"),
            ParsedFolder {
                title: "Hades".to_string(),
                year: None,
            }
        );
        assert_eq!(
            parse_folder_name("Stardew_Valley_[GOG]"),
            ParsedFolder {
                title: "Stardew Valley".to_string(),
                year: None,
            }
        );
        assert_eq!(
            parse_folder_name("The.Witcher.3.Wild.Hunt.(2015)"),
            ParsedFolder {
                title: "The Witcher 3 Wild Hunt".to_string(),
                year: Some(2015),
            }
        );
        assert_eq!(
            parse_folder_name("Cyberpunk 2077 [R.G. Mechanics]"),
            ParsedFolder {
                title: "Cyberpunk 2077".to_string(),
                year: None,
            }
        );
        assert_eq!(
            parse_folder_name("DOOM-FitGirl [MULTI5]"),
            ParsedFolder {
                title: "DOOM".to_string(),
                year: None,
            }
        );
    }

    async fn importer_with_root(root: &Path) -> (LibraryImporter, Arc<Database>, i64) {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let library_id = db
            .insert_library(&NewLibrary {
                name: "Main".to_string(),
                path: root.to_string_lossy().to_string(),
                platform: None,
                monitored: true,
                download_enabled: true,
                priority: 0,
            })
            .await
            .unwrap();
        (LibraryImporter::new(db.clone()), db, library_id)
    }

    async fn make_game_folder(path: &Path) {
        tokio::fs::create_dir_all(path).await.unwrap();
        tokio::fs::write(path.join("game.exe"), b"bin").await.unwrap();
    }

    #[tokio::test]
    async fn scan_descends_category_folders_and_stops_at_game_folders() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();

        make_game_folder(&root.join("Hades (2020)")).await;
        // A category folder: only subdirectories inside
        make_game_folder(&root.join("RPG/The Witcher 3 (2015)")).await;
        make_game_folder(&root.join("RPG/Nested/Disco Elysium")).await;
        // A loose file at the root is not a folder and is ignored
        tokio::fs::write(root.join("readme.txt"), b"hello").await.unwrap();

        let (importer, _db, lib_id) = importer_with_root(root).await;
        let rows = importer.refresh_library_scan(Some(lib_id)).await.unwrap();

        let mut titles: Vec<&str> = rows.iter().map(|r| r.parsed_title.as_str()).collect();
        titles.sort();
        assert_eq!(titles, vec!["Disco Elysium", "Hades", "The Witcher 3"]);
    }

    #[tokio::test]
    async fn rescanning_twice_yields_identical_rows() {
        let temp = tempfile::tempdir().unwrap();
        make_game_folder(&temp.path().join("Hades (2020)")).await;
        make_game_folder(&temp.path().join("Celeste")).await;

        let (importer, _db, lib_id) = importer_with_root(temp.path()).await;
        let first = importer.refresh_library_scan(Some(lib_id)).await.unwrap();
        let second = importer.refresh_library_scan(Some(lib_id)).await.unwrap();

        let paths = |rows: &[LibraryFile]| {
            let mut p: Vec<String> = rows.iter().map(|r| r.folder_path.clone()).collect();
            p.sort();
            p
        };
        assert_eq!(paths(&first), paths(&second));
        assert_eq!(first.len(), 2);
    }

    #[tokio::test]
    async fn vanished_folders_drop_their_rows() {
        let temp = tempfile::tempdir().unwrap();
        let doomed = temp.path().join("Short Lived");
        make_game_folder(&doomed).await;
        make_game_folder(&temp.path().join("Hades (2020)")).await;

        let (importer, _db, lib_id) = importer_with_root(temp.path()).await;
        assert_eq!(
            importer.refresh_library_scan(Some(lib_id)).await.unwrap().len(),
            2
        );

        tokio::fs::remove_dir_all(&doomed).await.unwrap();
        let rows = importer.refresh_library_scan(Some(lib_id)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].parsed_title, "Hades");
    }

    #[tokio::test]
    async fn scan_library_serves_cache_until_refresh() {
        let temp = tempfile::tempdir().unwrap();
        make_game_folder(&temp.path().join("Hades (2020)")).await;

        let (importer, _db, lib_id) = importer_with_root(temp.path()).await;
        importer.refresh_library_scan(Some(lib_id)).await.unwrap();

        // New folder appears on disk, but the cached rows are served
        make_game_folder(&temp.path().join("Celeste")).await;
        let cached = importer.scan_library(Some(lib_id)).await.unwrap();
        assert_eq!(cached.len(), 1);

        let refreshed = importer.refresh_library_scan(Some(lib_id)).await.unwrap();
        assert_eq!(refreshed.len(), 2);
    }

    #[tokio::test]
    async fn scanned_folders_match_catalog_games_by_title_and_year() {
        let temp = tempfile::tempdir().unwrap();
        make_game_folder(&temp.path().join("Hades (2020)")).await;
        make_game_folder(&temp.path().join("Celeste (1999)")).await;

        let (importer, db, lib_id) = importer_with_root(temp.path()).await;
        let hades = db
            .insert_game(&NewGame {
                external_id: 1,
                title: "Hades".to_string(),
                year: Some(2020),
                platform: None,
                cover_url: None,
                monitored: true,
                status: GameStatus::Wanted,
                library_id: None,
            })
            .await
            .unwrap();
        // Celeste's year disagrees with the folder, so it must not match
        db.insert_game(&NewGame {
            external_id: 2,
            title: "Celeste".to_string(),
            year: Some(2018),
            platform: None,
            cover_url: None,
            monitored: true,
            status: GameStatus::Wanted,
            library_id: None,
        })
        .await
        .unwrap();

        let rows = importer.refresh_library_scan(Some(lib_id)).await.unwrap();
        let hades_row = rows.iter().find(|r| r.parsed_title == "Hades").unwrap();
        let celeste_row = rows.iter().find(|r| r.parsed_title == "Celeste").unwrap();

        assert_eq!(hades_row.matched_game_id, Some(hades));
        assert_eq!(
            celeste_row.matched_game_id, None,
            "conflicting years block the match"
        );
    }

    #[tokio::test]
    async fn import_match_marks_game_downloaded_with_folder() {
        let temp = tempfile::tempdir().unwrap();
        make_game_folder(&temp.path().join("Hades (2020)")).await;

        let (importer, db, lib_id) = importer_with_root(temp.path()).await;
        let game_id = db
            .insert_game(&NewGame {
                external_id: 1,
                title: "Hades".to_string(),
                year: Some(2020),
                platform: None,
                cover_url: None,
                monitored: true,
                status: GameStatus::Wanted,
                library_id: None,
            })
            .await
            .unwrap();

        let rows = importer.refresh_library_scan(Some(lib_id)).await.unwrap();
        importer.import_match(rows[0].id, game_id).await.unwrap();

        let game = db.game(game_id).await.unwrap().unwrap();
        assert_eq!(game.status, GameStatus::Downloaded);
        assert_eq!(game.folder_path.as_deref(), Some(rows[0].folder_path.as_str()));
    }

    #[tokio::test]
    async fn near_duplicate_titles_group_together() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let importer = LibraryImporter::new(db.clone());

        for (i, title) in [
            "The Witcher 3 Wild Hunt",
            "The Witcher 3: Wild Hunt",
            "Celeste",
        ]
        .iter()
        .enumerate()
        {
            db.insert_game(&NewGame {
                external_id: i as i64 + 1,
                title: title.to_string(),
                year: None,
                platform: None,
                cover_url: None,
                monitored: true,
                status: GameStatus::Wanted,
                library_id: None,
            })
            .await
            .unwrap();
        }

        let groups = importer.find_duplicate_games().await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].games.len(), 2);
        assert!(
            groups[0]
                .games
                .iter()
                .all(|(g, _)| g.title.contains("Witcher")),
            "only the two Witcher titles group"
        );
    }
}
