mod common;

use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;

use tsuzuki_core::models::{config_keys, TrackingRecord, WatchStatus, LOCAL_TRACKER};
use tsuzuki_sync::{reconcile, DbHandle, SyncError, Tracker, TrackerError};

use common::{at, entry, MockTracker};

const SVC: &str = "anilist";

fn setup() -> (DbHandle, CancellationToken) {
    (DbHandle::open_memory().unwrap(), CancellationToken::new())
}

#[tokio::test]
async fn test_pull_into_empty_store_adds_entry() {
    let (db, cancel) = setup();
    let tracker = MockTracker::new(SVC).with_entries(vec![entry("42", "Frieren", 5.0, at(0))]);

    let stats = tracker.sync_from_remote(&db, &cancel).await.unwrap();
    assert_eq!(stats.added, 1);
    assert_eq!(stats.errors, 0);

    let rows = db.tracking_for_tracker(SVC).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].external_id, "42");
    assert_eq!(rows[0].progress, 5.0);
    assert_eq!(rows[0].status, WatchStatus::Watching);
    assert_eq!(rows[0].last_updated, at(0));

    let anime = db.get_anime(rows[0].anime_id).await.unwrap().unwrap();
    assert_eq!(anime.title, "Frieren");
    assert_eq!(anime.total_episodes, Some(12));
    assert_eq!(db.search_anime("").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_newer_remote_overwrites_local() {
    let (db, cancel) = setup();
    let tracker = MockTracker::new(SVC).with_entries(vec![entry("42", "Frieren", 5.0, at(0))]);
    tracker.sync_from_remote(&db, &cancel).await.unwrap();

    let mut newer = entry("42", "Sousou no Frieren", 6.0, at(1));
    newer.status = WatchStatus::OnHold;
    newer.score = 9.0;
    tracker.set_entries(vec![newer]);

    let stats = tracker.sync_from_remote(&db, &cancel).await.unwrap();
    assert_eq!(stats.updated, 1);
    assert_eq!(stats.added, 0);

    let row = db.get_tracking_by_external_id(SVC, "42").await.unwrap().unwrap();
    assert_eq!(row.progress, 6.0);
    assert_eq!(row.last_updated, at(1));
    assert_eq!(row.status, WatchStatus::OnHold);
    assert_eq!(row.score, 9.0);

    let anime = db.get_anime(row.anime_id).await.unwrap().unwrap();
    assert_eq!(anime.title, "Sousou no Frieren");
    assert!(tracker.pushes().is_empty());
}

#[tokio::test]
async fn test_newer_remote_wins_even_with_lower_progress() {
    let (db, cancel) = setup();
    let tracker = MockTracker::new(SVC).with_entries(vec![entry("42", "Frieren", 9.0, at(0))]);
    tracker.sync_from_remote(&db, &cancel).await.unwrap();

    // Rewatch: the remote was reset after the local row was written.
    tracker.set_entries(vec![entry("42", "Frieren", 1.0, at(5))]);
    let stats = tracker.sync_from_remote(&db, &cancel).await.unwrap();

    assert_eq!(stats.updated, 1);
    let row = db.get_tracking_by_external_id(SVC, "42").await.unwrap().unwrap();
    assert_eq!(row.progress, 1.0);
    assert_eq!(row.last_updated, at(5));
}

#[tokio::test]
async fn test_newer_local_ahead_is_pushed_back() {
    let (db, cancel) = setup();
    let tracker = MockTracker::new(SVC).with_entries(vec![entry("42", "Frieren", 7.0, at(1))]);
    tracker.sync_from_remote(&db, &cancel).await.unwrap();

    tracker.set_entries(vec![entry("42", "Frieren", 6.0, at(0))]);
    let stats = tracker.sync_from_remote(&db, &cancel).await.unwrap();
    assert_eq!(stats.updated, 1);

    let pushes = tracker.pushes();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].0, "42");
    assert_eq!(pushes[0].1.episode, Some(7.0));
    assert_eq!(pushes[0].1.status, WatchStatus::Watching);

    let row = db.get_tracking_by_external_id(SVC, "42").await.unwrap().unwrap();
    assert_eq!(row.progress, 7.0);
    assert_eq!(row.last_updated, at(1));
}

#[tokio::test]
async fn test_newer_local_not_ahead_is_left_alone() {
    let (db, cancel) = setup();
    let tracker = MockTracker::new(SVC).with_entries(vec![entry("42", "Frieren", 5.0, at(1))]);
    tracker.sync_from_remote(&db, &cancel).await.unwrap();

    tracker.set_entries(vec![entry("42", "Frieren", 8.0, at(0))]);
    let stats = tracker.sync_from_remote(&db, &cancel).await.unwrap();

    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.changes(), 0);
    assert!(tracker.pushes().is_empty());
    let row = db.get_tracking_by_external_id(SVC, "42").await.unwrap().unwrap();
    assert_eq!(row.progress, 5.0);
}

/// Store `progress` on the tracker's row for "42" as a local edit made at `when`.
async fn edit_row(db: &DbHandle, progress: f64, when: chrono::DateTime<Utc>) {
    let row = db.get_tracking_by_external_id(SVC, "42").await.unwrap().unwrap();
    db.upsert_tracking(TrackingRecord {
        progress,
        last_updated: when,
        ..row
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_half_episode_is_not_pushed_to_whole_episode_tracker() {
    let (db, cancel) = setup();
    let tracker = MockTracker::new(SVC)
        .whole_episodes()
        .with_entries(vec![entry("42", "Frieren", 12.0, at(0))]);
    tracker.sync_from_remote(&db, &cancel).await.unwrap();
    edit_row(&db, 12.5, at(1)).await;

    for _ in 0..2 {
        let stats = tracker.sync_from_remote(&db, &cancel).await.unwrap();
        assert_eq!(stats.changes(), 0);
        assert_eq!(stats.skipped, 1);
    }
    assert!(tracker.pushes().is_empty());
    let row = db.get_tracking_by_external_id(SVC, "42").await.unwrap().unwrap();
    assert_eq!(row.progress, 12.5);

    // A whole episode ahead is still pushed.
    edit_row(&db, 13.5, at(2)).await;
    let stats = tracker.sync_from_remote(&db, &cancel).await.unwrap();
    assert_eq!(stats.updated, 1);
    assert_eq!(tracker.pushes().len(), 1);
}

#[tokio::test]
async fn test_newer_whole_episode_remote_keeps_local_half() {
    let (db, cancel) = setup();
    let tracker = MockTracker::new(SVC)
        .whole_episodes()
        .with_entries(vec![entry("42", "Frieren", 12.0, at(0))]);
    tracker.sync_from_remote(&db, &cancel).await.unwrap();
    edit_row(&db, 12.5, at(1)).await;

    // The service bumped its timestamp without moving past episode 12.
    tracker.set_entries(vec![entry("42", "Frieren", 12.0, at(2))]);
    let stats = tracker.sync_from_remote(&db, &cancel).await.unwrap();
    assert_eq!(stats.updated, 1);
    let row = db.get_tracking_by_external_id(SVC, "42").await.unwrap().unwrap();
    assert_eq!(row.progress, 12.5);
    assert_eq!(row.last_updated, at(2));

    let stats = tracker.sync_from_remote(&db, &cancel).await.unwrap();
    assert_eq!(stats.changes(), 0);

    tracker.set_entries(vec![entry("42", "Frieren", 13.0, at(3))]);
    tracker.sync_from_remote(&db, &cancel).await.unwrap();
    let row = db.get_tracking_by_external_id(SVC, "42").await.unwrap().unwrap();
    assert_eq!(row.progress, 13.0);
    assert!(tracker.pushes().is_empty());
}

#[tokio::test]
async fn test_entry_dropped_remotely_cascades_to_anime() {
    let (db, cancel) = setup();
    let tracker = MockTracker::new(SVC).with_entries(vec![
        entry("99", "Mushishi", 3.0, at(0)),
        entry("100", "Dungeon Meshi", 1.0, at(0)),
    ]);
    tracker.sync_from_remote(&db, &cancel).await.unwrap();
    let dropped = db.get_tracking_by_external_id(SVC, "99").await.unwrap().unwrap();

    tracker.set_entries(vec![entry("100", "Dungeon Meshi", 1.0, at(0))]);
    let stats = tracker.sync_from_remote(&db, &cancel).await.unwrap();

    assert_eq!(stats.deleted, 1);
    assert_eq!(stats.skipped, 1);
    assert!(db.get_tracking_by_external_id(SVC, "99").await.unwrap().is_none());
    assert!(db.get_anime(dropped.anime_id).await.unwrap().is_none());
    assert_eq!(db.search_anime("").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_anime_tracked_elsewhere_survives_deletion() {
    let (db, cancel) = setup();
    let tracker = MockTracker::new(SVC).with_entries(vec![entry("99", "Mushishi", 3.0, at(0))]);
    tracker.sync_from_remote(&db, &cancel).await.unwrap();
    let row = db.get_tracking_by_external_id(SVC, "99").await.unwrap().unwrap();
    db.upsert_tracking(TrackingRecord::new(row.anime_id, LOCAL_TRACKER, ""))
        .await
        .unwrap();

    tracker.set_entries(Vec::new());
    let stats = tracker.sync_from_remote(&db, &cancel).await.unwrap();

    assert_eq!(stats.deleted, 1);
    assert!(db.get_tracking(row.anime_id, SVC).await.unwrap().is_none());
    assert!(db.get_anime(row.anime_id).await.unwrap().is_some());
    assert_eq!(db.tracking_for_anime(row.anime_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_pull_is_idempotent() {
    let (db, cancel) = setup();
    let tracker = MockTracker::new(SVC).with_entries(vec![
        entry("1", "Mob Psycho 100", 12.0, at(0)),
        entry("2", "Ping Pong", 4.5, at(2)),
        entry("3", "Odd Taxi", 0.0, at(3)),
    ]);

    let first = tracker.sync_from_remote(&db, &cancel).await.unwrap();
    assert_eq!(first.added, 3);

    let second = tracker.sync_from_remote(&db, &cancel).await.unwrap();
    assert_eq!(second.added, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.deleted, 0);
    assert_eq!(second.skipped, 3);
    assert!(tracker.pushes().is_empty());
}

#[tokio::test]
async fn test_duplicate_remote_entries_yield_one_row() {
    let (db, cancel) = setup();
    let tracker = MockTracker::new(SVC).with_entries(vec![
        entry("42", "Frieren", 5.0, at(0)),
        entry("42", "Frieren", 5.0, at(0)),
    ]);

    let stats = tracker.sync_from_remote(&db, &cancel).await.unwrap();
    assert_eq!(stats.added, 1);
    assert_eq!(stats.skipped, 1);

    let rows = db.tracking_for_tracker(SVC).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(db.tracking_for_anime(rows[0].anime_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_items_do_not_stop_the_rest() {
    let (db, cancel) = setup();
    let tracker = MockTracker::new(SVC).with_entries(vec![
        entry("1", "A", 5.0, at(5)),
        entry("2", "B", 5.0, at(5)),
        entry("3", "C", 5.0, at(5)),
        entry("4", "D", 5.0, at(5)),
    ]);
    tracker.sync_from_remote(&db, &cancel).await.unwrap();

    // Every local row is now newer and further along than the remote.
    tracker.set_entries(vec![
        entry("1", "A", 2.0, at(0)),
        entry("2", "B", 2.0, at(0)),
        entry("3", "C", 2.0, at(0)),
        entry("4", "D", 2.0, at(0)),
    ]);
    tracker.fail_push_for("2");
    tracker.fail_push_for("3");

    let stats = tracker.sync_from_remote(&db, &cancel).await.unwrap();
    assert_eq!(tracker.pushes().len(), 4);
    assert_eq!(stats.errors, 2);
    assert_eq!(stats.updated, 2);
    assert_eq!(
        stats.details.iter().filter(|d| d.starts_with("Failed")).count(),
        2
    );
}

#[tokio::test]
async fn test_entry_without_external_id_is_rejected() {
    let (db, cancel) = setup();
    let tracker = MockTracker::new(SVC).with_entries(vec![
        entry("", "Nameless", 1.0, at(0)),
        entry("7", "Named", 1.0, at(0)),
    ]);

    let stats = tracker.sync_from_remote(&db, &cancel).await.unwrap();
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.added, 1);
    assert_eq!(db.search_anime("").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_list_failure_fails_the_pass_without_changes() {
    let (db, cancel) = setup();
    let tracker = MockTracker::new(SVC).with_entries(vec![entry("42", "Frieren", 5.0, at(0))]);
    tracker.sync_from_remote(&db, &cancel).await.unwrap();
    tracker.fail_list(true);

    let err = tracker.sync_from_remote(&db, &cancel).await.unwrap_err();
    assert!(matches!(
        err.error,
        SyncError::Tracker(TrackerError::RemoteApi { .. })
    ));
    assert_eq!(err.stats.changes(), 0);
    // An unreachable list must not be mistaken for an empty one.
    assert_eq!(db.tracking_for_tracker(SVC).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_closed_store_is_fatal() {
    let (db, cancel) = setup();
    let tracker = MockTracker::new(SVC).with_entries(vec![entry("42", "Frieren", 5.0, at(0))]);
    db.shutdown();

    let err = tracker.sync_from_remote(&db, &cancel).await.unwrap_err();
    assert!(err.error.is_fatal());
}

#[tokio::test]
async fn test_cancelled_pull_stops_early() {
    let (db, cancel) = setup();
    let tracker = MockTracker::new(SVC).with_entries(vec![entry("42", "Frieren", 5.0, at(0))]);
    cancel.cancel();

    let err = reconcile::pull(&tracker, &db, &cancel).await.unwrap_err();
    assert!(matches!(err.error, SyncError::Tracker(TrackerError::Cancelled)));
    assert!(db.tracking_for_tracker(SVC).await.unwrap().is_empty());
}

async fn seed_local_rows(db: &DbHandle) {
    let now = Utc::now();
    for (ext, title, updated) in [
        ("10", "Haikyuu", now - Duration::hours(2)),
        ("11", "Monster", now - Duration::minutes(1)),
    ] {
        let mut e = entry(ext, title, 3.0, updated);
        e.score = 8.0;
        db.add_tracked_anime(e.info.to_anime(), e.to_tracking(SVC))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_push_without_watermark_sends_everything_once() {
    let (db, cancel) = setup();
    let tracker = MockTracker::new(SVC);
    seed_local_rows(&db).await;
    let before = Utc::now();

    let stats = tracker.sync_to_remote(&db, &cancel).await.unwrap();
    assert_eq!(stats.updated, 2);
    let pushes = tracker.pushes();
    assert_eq!(pushes.len(), 2);
    assert_eq!(pushes[0].1.episode, Some(3.0));
    assert_eq!(pushes[0].1.score, Some(8.0));

    let watermark = db
        .get_config(&config_keys::last_sync(SVC))
        .await
        .unwrap()
        .unwrap();
    let watermark = chrono::DateTime::parse_from_rfc3339(&watermark)
        .unwrap()
        .with_timezone(&Utc);
    assert!(watermark >= before);

    let again = tracker.sync_to_remote(&db, &cancel).await.unwrap();
    assert_eq!(again.skipped, 2);
    assert_eq!(again.updated, 0);
    assert_eq!(tracker.pushes().len(), 2);
}

#[tokio::test]
async fn test_push_only_sends_rows_after_watermark() {
    let (db, cancel) = setup();
    let tracker = MockTracker::new(SVC);
    seed_local_rows(&db).await;
    let watermark = Utc::now() - Duration::minutes(30);
    db.set_config(&config_keys::last_sync(SVC), &watermark.to_rfc3339())
        .await
        .unwrap();

    let stats = tracker.sync_to_remote(&db, &cancel).await.unwrap();
    assert_eq!(stats.updated, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(tracker.pushes()[0].0, "11");
}

#[tokio::test]
async fn test_push_counts_failures_and_still_moves_watermark() {
    let (db, cancel) = setup();
    let tracker = MockTracker::new(SVC);
    seed_local_rows(&db).await;
    tracker.fail_push_for("10");

    let stats = tracker.sync_to_remote(&db, &cancel).await.unwrap();
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.updated, 1);
    assert!(db
        .get_config(&config_keys::last_sync(SVC))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_push_rejects_unreadable_watermark() {
    let (db, cancel) = setup();
    let tracker = MockTracker::new(SVC);
    seed_local_rows(&db).await;
    db.set_config(&config_keys::last_sync(SVC), "yesterday")
        .await
        .unwrap();

    let err = tracker.sync_to_remote(&db, &cancel).await.unwrap_err();
    assert!(matches!(err.error, SyncError::InvalidWatermark { .. }));
    assert!(tracker.pushes().is_empty());
}

#[tokio::test]
async fn test_cancelled_push_keeps_watermark() {
    let (db, cancel) = setup();
    let tracker = MockTracker::new(SVC);
    seed_local_rows(&db).await;
    cancel.cancel();

    let err = tracker.sync_to_remote(&db, &cancel).await.unwrap_err();
    assert!(matches!(err.error, SyncError::Tracker(TrackerError::Cancelled)));
    assert!(db
        .get_config(&config_keys::last_sync(SVC))
        .await
        .unwrap()
        .is_none());
}
