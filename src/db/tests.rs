//! Database tests against in-memory SQLite.

use super::*;
use crate::types::{
    GameStatus, NewGame, NewGameUpdate, NewLibrary, NewLibraryFile, NewRelease, Quality,
    ReleaseStatus, UpdateStatus, UpdateType,
};

async fn test_db() -> Database {
    Database::in_memory().await.expect("in-memory database")
}

fn sample_game(external_id: i64, title: &str) -> NewGame {
    NewGame {
        external_id,
        title: title.to_string(),
        year: Some(2020),
        platform: Some("PC".to_string()),
        cover_url: None,
        monitored: true,
        status: GameStatus::Wanted,
        library_id: None,
    }
}

fn sample_release(game_id: GameId, title: &str) -> NewRelease {
    NewRelease {
        game_id,
        title: title.to_string(),
        size: 8 * 1024 * 1024 * 1024,
        seeders: 42,
        download_url: format!("magnet:?xt=urn:btih:{}", title.len()),
        indexer: Some("TestIndexer".to_string()),
        quality: Some(Quality::Gog),
        status: ReleaseStatus::Pending,
    }
}

#[tokio::test]
async fn game_round_trips_with_typed_fields() {
    let db = test_db().await;
    let id = db.insert_game(&sample_game(100, "Hades")).await.unwrap();

    let game = db.game(id).await.unwrap().expect("game exists");
    assert_eq!(game.title, "Hades");
    assert_eq!(game.year, Some(2020));
    assert_eq!(game.status, GameStatus::Wanted);
    assert!(game.monitored);
    assert!(game.installed_quality.is_none());
    assert!(!game.update_available);
}

#[tokio::test]
async fn duplicate_external_id_is_a_conflict() {
    let db = test_db().await;
    db.insert_game(&sample_game(7, "Celeste")).await.unwrap();

    let err = db.insert_game(&sample_game(7, "Celeste")).await.unwrap_err();
    assert!(
        matches!(err, crate::Error::Conflict(_)),
        "expected Conflict, got {err:?}"
    );
}

#[tokio::test]
async fn games_by_ids_returns_only_existing_games() {
    let db = test_db().await;
    let a = db.insert_game(&sample_game(1, "A")).await.unwrap();
    let b = db.insert_game(&sample_game(2, "B")).await.unwrap();
    let ghost = GameId(9999);

    let map = db.games_by_ids(&[a, b, ghost]).await.unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(map.get(&a).unwrap().title, "A");
    assert_eq!(map.get(&b).unwrap().title, "B");
    assert!(!map.contains_key(&ghost));
}

#[tokio::test]
async fn games_by_ids_with_empty_input_issues_no_query() {
    let db = test_db().await;
    let map = db.games_by_ids(&[]).await.unwrap();
    assert!(map.is_empty());
}

#[tokio::test]
async fn batch_update_game_status_updates_whole_cohort() {
    let db = test_db().await;
    let a = db.insert_game(&sample_game(1, "A")).await.unwrap();
    let b = db.insert_game(&sample_game(2, "B")).await.unwrap();
    db.update_game_status(a, GameStatus::Downloading)
        .await
        .unwrap();
    db.update_game_status(b, GameStatus::Downloading)
        .await
        .unwrap();

    let affected = db
        .batch_update_game_status(&[a, b], GameStatus::Wanted)
        .await
        .unwrap();
    assert_eq!(affected, 2);
    assert_eq!(db.game(a).await.unwrap().unwrap().status, GameStatus::Wanted);
    assert_eq!(db.game(b).await.unwrap().unwrap().status, GameStatus::Wanted);
}

#[tokio::test]
async fn monitored_filter_excludes_unmonitored_games() {
    let db = test_db().await;
    let a = db.insert_game(&sample_game(1, "A")).await.unwrap();
    let _b = db.insert_game(&sample_game(2, "B")).await.unwrap();
    db.set_game_monitored(a, false).await.unwrap();

    let wanted = db
        .monitored_games_with_status(GameStatus::Wanted)
        .await
        .unwrap();
    assert_eq!(wanted.len(), 1);
    assert_eq!(wanted[0].title, "B");
}

#[tokio::test]
async fn release_lifecycle_and_history() {
    let db = test_db().await;
    let game_id = db.insert_game(&sample_game(1, "Hades")).await.unwrap();

    let release_id = db
        .insert_release(&sample_release(game_id, "Hades v1.38 [GOG]"))
        .await
        .unwrap();

    let active = db
        .active_release_for_game(game_id)
        .await
        .unwrap()
        .expect("pending release is active");
    assert_eq!(active.id, release_id);
    assert_eq!(active.quality, Some(Quality::Gog));

    db.update_release_status(release_id, ReleaseStatus::Completed)
        .await
        .unwrap();
    assert!(
        db.active_release_for_game(game_id).await.unwrap().is_none(),
        "completed release is terminal"
    );

    let history = db.releases_for_game(game_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ReleaseStatus::Completed);
}

#[tokio::test]
async fn torrent_hash_is_persisted() {
    let db = test_db().await;
    let game_id = db.insert_game(&sample_game(1, "Hades")).await.unwrap();
    let release_id = db
        .insert_release(&sample_release(game_id, "Hades [GOG]"))
        .await
        .unwrap();

    db.set_release_torrent_hash(release_id, "abcdef0123456789")
        .await
        .unwrap();
    let release = db.release(release_id).await.unwrap().unwrap();
    assert_eq!(release.torrent_hash.as_deref(), Some("abcdef0123456789"));
}

#[tokio::test]
async fn batch_delete_releases_removes_cohort() {
    let db = test_db().await;
    let game_id = db.insert_game(&sample_game(1, "Hades")).await.unwrap();
    let r1 = db
        .insert_release(&sample_release(game_id, "Hades A"))
        .await
        .unwrap();
    let r2 = db
        .insert_release(&sample_release(game_id, "Hades B"))
        .await
        .unwrap();

    let deleted = db.batch_delete_releases(&[r1, r2]).await.unwrap();
    assert_eq!(deleted, 2);
    assert!(db.release(r1).await.unwrap().is_none());
    assert!(db.release(r2).await.unwrap().is_none());
}

#[tokio::test]
async fn releases_with_statuses_filters() {
    let db = test_db().await;
    let game_id = db.insert_game(&sample_game(1, "Hades")).await.unwrap();
    let r1 = db
        .insert_release(&sample_release(game_id, "Hades A"))
        .await
        .unwrap();
    let r2 = db
        .insert_release(&sample_release(game_id, "Hades B"))
        .await
        .unwrap();
    db.update_release_status(r2, ReleaseStatus::Failed)
        .await
        .unwrap();

    let failed = db
        .releases_with_statuses(&[ReleaseStatus::Failed])
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, r2);

    let active = db
        .releases_with_statuses(&[ReleaseStatus::Pending, ReleaseStatus::Downloading])
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, r1);
}

fn sample_update(game_id: GameId, title: &str, url: &str) -> NewGameUpdate {
    NewGameUpdate {
        game_id,
        update_type: UpdateType::Version,
        title: title.to_string(),
        version: Some("1.6.3".to_string()),
        size: 1024,
        quality: None,
        seeders: 10,
        download_url: url.to_string(),
        indexer: None,
    }
}

#[tokio::test]
async fn update_inserts_dedup_on_url_and_title() {
    let db = test_db().await;
    let game_id = db.insert_game(&sample_game(1, "Stardew Valley")).await.unwrap();

    let first = db
        .insert_game_updates(&[sample_update(game_id, "SV v1.6.3", "http://a")])
        .await
        .unwrap();
    assert_eq!(first, 1);

    // Same url, different title
    let dup_url = db
        .insert_game_updates(&[sample_update(game_id, "SV v1.6.3 repost", "http://a")])
        .await
        .unwrap();
    assert_eq!(dup_url, 0);

    // Same title, different url
    let dup_title = db
        .insert_game_updates(&[sample_update(game_id, "SV v1.6.3", "http://b")])
        .await
        .unwrap();
    assert_eq!(dup_title, 0);

    let updates = db.updates_for_game(game_id).await.unwrap();
    assert_eq!(updates.len(), 1);
}

#[tokio::test]
async fn dismissing_an_update_twice_is_a_noop() {
    let db = test_db().await;
    let game_id = db.insert_game(&sample_game(1, "Stardew Valley")).await.unwrap();
    db.insert_game_updates(&[sample_update(game_id, "SV v1.6.3", "http://a")])
        .await
        .unwrap();
    let update = db.updates_for_game(game_id).await.unwrap().remove(0);

    db.set_update_status(update.id, UpdateStatus::Dismissed)
        .await
        .unwrap();
    db.set_update_status(update.id, UpdateStatus::Dismissed)
        .await
        .unwrap();

    let after = db.game_update(update.id).await.unwrap().unwrap();
    assert_eq!(after.status, UpdateStatus::Dismissed);
}

#[tokio::test]
async fn mark_updates_available_and_last_check() {
    let db = test_db().await;
    let id = db.insert_game(&sample_game(1, "Stardew Valley")).await.unwrap();

    db.mark_updates_available(id, Some("1.6.3")).await.unwrap();
    db.set_last_update_check(id).await.unwrap();

    let game = db.game(id).await.unwrap().unwrap();
    assert!(game.update_available);
    assert_eq!(game.latest_version.as_deref(), Some("1.6.3"));
    assert!(game.last_update_check.is_some());
}

#[tokio::test]
async fn library_file_upsert_preserves_match_and_ignored() {
    let db = test_db().await;
    let game_id = db.insert_game(&sample_game(1, "Hades")).await.unwrap();
    let lib_id = db
        .insert_library(&NewLibrary {
            name: "Main".to_string(),
            path: "/games".to_string(),
            platform: None,
            monitored: true,
            download_enabled: true,
            priority: 0,
        })
        .await
        .unwrap();

    let file = NewLibraryFile {
        folder_path: "/games/Hades (2020)".to_string(),
        parsed_title: "Hades".to_string(),
        parsed_year: Some(2020),
        library_id: Some(lib_id),
    };
    db.upsert_library_file(&file).await.unwrap();

    let rows = db.library_files(Some(lib_id)).await.unwrap();
    assert_eq!(rows.len(), 1);
    db.set_library_file_match(rows[0].id, game_id).await.unwrap();
    db.set_library_file_ignored(rows[0].id, true).await.unwrap();

    // Rescan upserts the same folder
    db.upsert_library_file(&file).await.unwrap();
    let rows = db.library_files(Some(lib_id)).await.unwrap();
    assert_eq!(rows.len(), 1, "upsert must not duplicate the folder row");
    assert_eq!(rows[0].matched_game_id, Some(game_id));
    assert!(rows[0].ignored, "rescan must preserve the ignored flag");
}

#[tokio::test]
async fn vanished_library_files_are_deleted() {
    let db = test_db().await;
    db.upsert_library_file(&NewLibraryFile {
        folder_path: "/games/Gone".to_string(),
        parsed_title: "Gone".to_string(),
        parsed_year: None,
        library_id: None,
    })
    .await
    .unwrap();

    let rows = db.library_files(None).await.unwrap();
    let deleted = db
        .delete_library_files(&rows.iter().map(|r| r.id).collect::<Vec<_>>())
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert!(db.library_files(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn settings_upsert_and_delete() {
    let db = test_db().await;
    assert!(db.setting("dry_run").await.unwrap().is_none());

    db.set_setting("dry_run", "false").await.unwrap();
    assert_eq!(db.setting("dry_run").await.unwrap().as_deref(), Some("false"));

    db.set_setting("dry_run", "true").await.unwrap();
    assert_eq!(db.setting("dry_run").await.unwrap().as_deref(), Some("true"));

    assert!(db.delete_setting("dry_run").await.unwrap());
    assert!(db.setting("dry_run").await.unwrap().is_none());
    assert!(!db.delete_setting("dry_run").await.unwrap());
}

#[tokio::test]
async fn deleting_a_game_removes_releases_and_updates() {
    let db = test_db().await;
    let game_id = db.insert_game(&sample_game(1, "Hades")).await.unwrap();
    db.insert_release(&sample_release(game_id, "Hades [GOG]"))
        .await
        .unwrap();
    db.insert_game_updates(&[sample_update(game_id, "Hades v1.1", "http://u")])
        .await
        .unwrap();

    assert!(db.delete_game(game_id).await.unwrap());
    assert!(db.releases_for_game(game_id).await.unwrap().is_empty());
    assert!(db.updates_for_game(game_id).await.unwrap().is_empty());
}
