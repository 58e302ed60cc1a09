//! Library organization of completed transfers
//!
//! Moves a finished download into the library tree under a deterministic
//! folder name (sanitized title plus optional year). Never runs while a
//! transfer is active; the download monitor triggers it on the completion
//! edge.
//!
//! Every externally supplied path is validated against the resolved
//! library root before anything moves; a violation raises
//! [`Error::PathTraversal`] and is never retried.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::settings::SettingsStore;
use crate::types::Game;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Size tolerance under which an existing target folder counts as the
/// already-organized copy of the source
const ALREADY_ORGANIZED_TOLERANCE: u64 = 1024 * 1024;

/// Characters stripped from folder names
const FORBIDDEN: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Build the library folder name for a game: sanitized title plus
/// ` (year)` when the year is known.
pub fn folder_name_for(title: &str, year: Option<i32>) -> String {
    let mut cleaned: String = title.chars().filter(|c| !FORBIDDEN.contains(c)).collect();
    cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    match year {
        Some(year) => format!("{cleaned} ({year})"),
        None => cleaned,
    }
}

/// Lexically normalize a path, resolving `.` and `..` components without
/// touching the filesystem (the target may not exist yet)
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Verify `candidate` stays under `base` after lexical normalization
fn ensure_within(base: &Path, candidate: &Path) -> Result<()> {
    let base = normalize_lexically(base);
    let candidate = normalize_lexically(candidate);
    if candidate.starts_with(&base) {
        Ok(())
    } else {
        Err(Error::PathTraversal {
            path: candidate,
        })
    }
}

/// Recursive byte size of a file or directory tree
async fn tree_size(path: PathBuf) -> Result<u64> {
    tokio::task::spawn_blocking(move || {
        let mut total = 0u64;
        if path.is_file() {
            return Ok(std::fs::metadata(&path)?.len());
        }
        for entry in walkdir::WalkDir::new(&path).into_iter().flatten() {
            if entry.file_type().is_file() {
                total += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
        Ok(total)
    })
    .await
    .map_err(|e| Error::Other(format!("size computation task failed: {e}")))?
}

/// Move one filesystem entry, falling back to copy+remove across devices
async fn move_entry(source: &Path, target: &Path) -> Result<()> {
    match tokio::fs::rename(source, target).await {
        Ok(()) => Ok(()),
        Err(_) => {
            // Cross-device move: copy then remove
            if source.is_dir() {
                copy_dir(source.to_path_buf(), target.to_path_buf()).await?;
                tokio::fs::remove_dir_all(source).await?;
            } else {
                tokio::fs::copy(source, target).await?;
                tokio::fs::remove_file(source).await?;
            }
            Ok(())
        }
    }
}

/// Recursive directory copy on the blocking pool
async fn copy_dir(source: PathBuf, target: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        std::fs::create_dir_all(&target)?;
        for entry in walkdir::WalkDir::new(&source).min_depth(1).into_iter().flatten() {
            let relative = entry
                .path()
                .strip_prefix(&source)
                .map_err(|e| Error::Other(format!("path prefix error: {e}")))?;
            let dest = target.join(relative);
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&dest)?;
            } else {
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(entry.path(), &dest)?;
            }
        }
        Ok(())
    })
    .await
    .map_err(|e| Error::Other(format!("copy task failed: {e}")))?
}

/// Moves completed downloads into the configured library tree
pub struct FileOrganizer {
    db: Arc<Database>,
    settings: Arc<SettingsStore>,
}

impl FileOrganizer {
    /// Create an organizer over the library configuration
    pub fn new(db: Arc<Database>, settings: Arc<SettingsStore>) -> Self {
        Self { db, settings }
    }

    /// Resolve the library root for a game: its explicit library, else the
    /// best-priority library, else the legacy `library_path` setting.
    async fn resolve_root(&self, game: &Game) -> Result<PathBuf> {
        if let Some(library_id) = game.library_id {
            if let Some(library) = self.db.library(library_id).await? {
                return Ok(PathBuf::from(library.path));
            }
        }

        let libraries = self.db.libraries().await?;
        if let Some(library) = libraries.into_iter().find(|l| l.download_enabled) {
            return Ok(PathBuf::from(library.path));
        }

        if let Some(path) = self.settings.library_path().await? {
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }

        Err(Error::Validation(
            "no library is configured to organize downloads into".to_string(),
        ))
    }

    /// Move a completed transfer into the library tree
    ///
    /// Returns the final target folder. If a folder with the right name
    /// already holds (within 1 MiB) the same bytes, the move is treated as
    /// already done; otherwise ` (n)` suffixes are tried until a free name
    /// is found.
    pub async fn organize_download(&self, game: &Game, source: &Path) -> Result<PathBuf> {
        let root = self.resolve_root(game).await?;

        if !source.exists() {
            return Err(Error::NotFound(format!(
                "download payload missing at {}",
                source.display()
            )));
        }

        let name = folder_name_for(&game.title, game.year);
        if name.is_empty() {
            return Err(Error::Validation(format!(
                "game title '{}' sanitizes to an empty folder name",
                game.title
            )));
        }

        let target = root.join(&name);
        ensure_within(&root, &target)?;

        let target = if target.exists() {
            let source_size = tree_size(source.to_path_buf()).await?;
            let target_size = tree_size(target.clone()).await?;
            if source_size.abs_diff(target_size) <= ALREADY_ORGANIZED_TOLERANCE {
                debug!(
                    game = %game.title,
                    target = %target.display(),
                    "Target already holds this download, nothing to move"
                );
                self.db
                    .set_game_folder(game.id, &target.to_string_lossy())
                    .await?;
                return Ok(target);
            }
            self.next_free_target(&root, &name)?
        } else {
            target
        };

        ensure_within(&root, &target)?;
        tokio::fs::create_dir_all(&target).await?;

        if source.is_dir() {
            let mut entries = tokio::fs::read_dir(source).await?;
            while let Some(entry) = entries.next_entry().await? {
                let dest = target.join(entry.file_name());
                move_entry(&entry.path(), &dest).await?;
            }
            tokio::fs::remove_dir(source).await?;
        } else {
            let file_name = source
                .file_name()
                .ok_or_else(|| Error::Validation("source has no file name".to_string()))?;
            move_entry(source, &target.join(file_name)).await?;
        }

        self.db
            .set_game_folder(game.id, &target.to_string_lossy())
            .await?;

        info!(
            game = %game.title,
            target = %target.display(),
            "Organized completed download into library"
        );
        Ok(target)
    }

    /// First free ` (n)` variant of the target name, against exact matches
    fn next_free_target(&self, root: &Path, name: &str) -> Result<PathBuf> {
        for n in 1..10_000u32 {
            let candidate = root.join(format!("{name} ({n})"));
            if !candidate.exists() {
                return Ok(candidate);
            }
        }
        Err(Error::Other(format!(
            "no free folder name found for '{name}'"
        )))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GameId, GameStatus, NewGame, NewLibrary, UpdatePolicy};
    use chrono::Utc;

    fn game(title: &str, year: Option<i32>, library_id: Option<i64>) -> Game {
        Game {
            id: GameId(1),
            external_id: 1,
            title: title.to_string(),
            year,
            platform: None,
            cover_url: None,
            folder_path: None,
            monitored: true,
            status: GameStatus::Downloading,
            installed_version: None,
            installed_quality: None,
            update_policy: UpdatePolicy::Notify,
            update_available: false,
            last_update_check: None,
            latest_version: None,
            library_id,
            added_at: Utc::now(),
        }
    }

    async fn organizer_with_library(root: &Path) -> (FileOrganizer, Arc<Database>, i64) {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let settings = Arc::new(SettingsStore::new(db.clone()));
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
        (FileOrganizer::new(db.clone(), settings), db, library_id)
    }

    #[test]
    fn folder_names_are_sanitized() {
        assert_eq!(
            folder_name_for("Portal 2: The Lab?", Some(2011)),
            "Portal 2 The Lab (2011)"
        );
        assert_eq!(folder_name_for("Hades", None), "Hades");
        assert_eq!(
            folder_name_for("A<B>C:D\"E/F\\G|H?I*J", None),
            "ABCDEFGHIJ"
        );
    }

    #[test]
    fn traversal_outside_the_root_is_rejected() {
        let err = ensure_within(Path::new("/library"), Path::new("/library/../etc")).unwrap_err();
        assert!(matches!(err, Error::PathTraversal { .. }));

        ensure_within(Path::new("/library"), Path::new("/library/Hades (2020)")).unwrap();
    }

    #[tokio::test]
    async fn directory_download_moves_into_named_folder() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("library");
        tokio::fs::create_dir_all(&root).await.unwrap();
        let (organizer, db, _lib) = organizer_with_library(&root).await;

        // Register the game so folder bookkeeping has a row to update
        let id = db
            .insert_game(&NewGame {
                external_id: 1,
                title: "Hades".to_string(),
                year: Some(2020),
                platform: None,
                cover_url: None,
                monitored: true,
                status: GameStatus::Downloading,
                library_id: None,
            })
            .await
            .unwrap();
        let mut g = game("Hades", Some(2020), None);
        g.id = id;

        let source = temp.path().join("downloads/hades-v1.38-gog");
        tokio::fs::create_dir_all(source.join("bin")).await.unwrap();
        tokio::fs::write(source.join("game.exe"), b"payload").await.unwrap();
        tokio::fs::write(source.join("bin/data.pak"), b"data").await.unwrap();

        let target = organizer.organize_download(&g, &source).await.unwrap();
        assert_eq!(target, root.join("Hades (2020)"));
        assert!(target.join("game.exe").exists());
        assert!(target.join("bin/data.pak").exists());
        assert!(!source.exists(), "source directory is removed after the move");

        let stored = db.game(id).await.unwrap().unwrap();
        assert_eq!(
            stored.folder_path.as_deref(),
            Some(target.to_string_lossy().as_ref())
        );
    }

    #[tokio::test]
    async fn single_file_download_moves_into_folder() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("library");
        tokio::fs::create_dir_all(&root).await.unwrap();
        let (organizer, _db, _lib) = organizer_with_library(&root).await;
        let g = game("Celeste", None, None);

        let source = temp.path().join("celeste.iso");
        tokio::fs::write(&source, b"iso-bytes").await.unwrap();

        let target = organizer.organize_download(&g, &source).await.unwrap();
        assert_eq!(target, root.join("Celeste"));
        assert!(target.join("celeste.iso").exists());
        assert!(!source.exists());
    }

    #[tokio::test]
    async fn matching_existing_target_counts_as_organized() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("library");
        let existing = root.join("Hades (2020)");
        tokio::fs::create_dir_all(&existing).await.unwrap();
        tokio::fs::write(existing.join("game.exe"), b"payload").await.unwrap();
        let (organizer, _db, _lib) = organizer_with_library(&root).await;
        let g = game("Hades", Some(2020), None);

        let source = temp.path().join("downloads/hades");
        tokio::fs::create_dir_all(&source).await.unwrap();
        tokio::fs::write(source.join("game.exe"), b"payload").await.unwrap();

        let target = organizer.organize_download(&g, &source).await.unwrap();
        assert_eq!(target, existing);
        assert!(
            source.exists(),
            "an already-organized download leaves the source untouched"
        );
    }

    #[tokio::test]
    async fn occupied_target_gets_numbered_suffix() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("library");
        let existing = root.join("Hades (2020)");
        tokio::fs::create_dir_all(&existing).await.unwrap();
        // Make the existing folder differ by far more than the tolerance
        tokio::fs::write(existing.join("other.bin"), vec![0u8; 4 * 1024 * 1024])
            .await
            .unwrap();
        let (organizer, _db, _lib) = organizer_with_library(&root).await;
        let g = game("Hades", Some(2020), None);

        let source = temp.path().join("downloads/hades");
        tokio::fs::create_dir_all(&source).await.unwrap();
        tokio::fs::write(source.join("game.exe"), b"payload").await.unwrap();

        let target = organizer.organize_download(&g, &source).await.unwrap();
        assert_eq!(target, root.join("Hades (2020) (1)"));
        assert!(target.join("game.exe").exists());
    }

    #[tokio::test]
    async fn no_library_configuration_is_a_validation_error() {
        let temp = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::in_memory().await.unwrap());
        let settings = Arc::new(SettingsStore::new(db.clone()));
        let organizer = FileOrganizer::new(db, settings);
        let g = game("Hades", None, None);

        let source = temp.path().join("hades");
        tokio::fs::create_dir_all(&source).await.unwrap();

        let err = organizer.organize_download(&g, &source).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn legacy_library_path_setting_is_a_fallback_root() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("legacy-library");
        tokio::fs::create_dir_all(&root).await.unwrap();

        let db = Arc::new(Database::in_memory().await.unwrap());
        let settings = Arc::new(SettingsStore::new(db.clone()));
        settings
            .set("library_path", &root.to_string_lossy())
            .await
            .unwrap();
        let organizer = FileOrganizer::new(db, settings);
        let g = game("Celeste", None, None);

        let source = temp.path().join("celeste");
        tokio::fs::create_dir_all(&source).await.unwrap();
        tokio::fs::write(source.join("game.bin"), b"x").await.unwrap();

        let target = organizer.organize_download(&g, &source).await.unwrap();
        assert_eq!(target, root.join("Celeste"));
    }
}
