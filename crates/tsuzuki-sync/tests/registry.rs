mod common;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use tsuzuki_core::models::{config_keys, LOCAL_TRACKER};
use tsuzuki_sync::{
    DbHandle, LocalTracker, SyncDirection, SyncError, SyncStats, Tracker, TrackerError,
    TrackerRegistry,
};

use common::{at, entry, MockTracker};

fn registry_with(db: &DbHandle, trackers: &[Arc<MockTracker>]) -> TrackerRegistry {
    let mut registry = TrackerRegistry::new(db.clone());
    registry.register(Arc::new(LocalTracker::new(db.clone())));
    for tracker in trackers {
        registry.register(tracker.clone());
    }
    registry
}

#[tokio::test]
async fn test_active_tracker_defaults_to_local_and_persists() {
    let db = DbHandle::open_memory().unwrap();
    let registry = registry_with(&db, &[]);

    let active = registry.active_tracker().await.unwrap();
    assert_eq!(active.name(), LOCAL_TRACKER);
    assert_eq!(
        db.get_config(config_keys::ACTIVE_TRACKER).await.unwrap().as_deref(),
        Some(LOCAL_TRACKER)
    );
}

#[tokio::test]
async fn test_active_tracker_falls_back_when_unregistered() {
    let db = DbHandle::open_memory().unwrap();
    db.set_config(config_keys::ACTIVE_TRACKER, "kitsu").await.unwrap();
    let registry = registry_with(&db, &[]);

    assert_eq!(registry.active_tracker().await.unwrap().name(), LOCAL_TRACKER);
}

#[tokio::test]
async fn test_set_active_tracker_validates_name() {
    let db = DbHandle::open_memory().unwrap();
    let anilist = Arc::new(MockTracker::new("anilist"));
    let registry = registry_with(&db, &[anilist]);

    let err = registry.set_active_tracker("kitsu").await.unwrap_err();
    assert!(matches!(err, TrackerError::UnknownTracker(name) if name == "kitsu"));
    assert!(db
        .get_config(config_keys::ACTIVE_TRACKER)
        .await
        .unwrap()
        .is_none());

    registry.set_active_tracker("anilist").await.unwrap();
    assert_eq!(registry.active_tracker().await.unwrap().name(), "anilist");
    assert_eq!(registry.names(), vec!["anilist", LOCAL_TRACKER]);
}

#[tokio::test]
async fn test_sync_all_skips_unauthenticated_trackers() {
    let db = DbHandle::open_memory().unwrap();
    let anilist = Arc::new(
        MockTracker::new("anilist").with_entries(vec![entry("42", "Frieren", 5.0, at(0))]),
    );
    let mal = Arc::new(MockTracker::new("mal").with_entries(vec![entry("7", "Monster", 1.0, at(0))]));
    mal.set_authenticated(false);
    let registry = registry_with(&db, &[anilist.clone(), mal.clone()]);

    let report = registry
        .sync_all_from_remote(&CancellationToken::new())
        .await;

    assert_eq!(report.attempted, vec!["anilist"]);
    assert_eq!(report.unauthenticated, vec!["mal"]);
    assert_eq!(report.stats["anilist"].added, 1);
    assert!(!report.stats.contains_key("mal"));
    assert_eq!(mal.list_calls(), 0);
    assert!(report.into_result().is_ok());
}

#[tokio::test]
async fn test_all_unauthenticated_is_reported() {
    let db = DbHandle::open_memory().unwrap();
    let anilist = Arc::new(MockTracker::new("anilist"));
    anilist.set_authenticated(false);
    let registry = registry_with(&db, &[anilist]);

    let report = registry
        .sync_all(SyncDirection::Both, &CancellationToken::new())
        .await;
    assert!(matches!(
        report.into_result(),
        Err(SyncError::AllUnauthenticated)
    ));
}

#[tokio::test]
async fn test_local_only_registry_syncs_cleanly() {
    let db = DbHandle::open_memory().unwrap();
    let registry = registry_with(&db, &[]);

    let report = registry
        .sync_all(SyncDirection::Both, &CancellationToken::new())
        .await;
    assert!(report.attempted.is_empty());
    assert_eq!(report.total().changes(), 0);
    assert!(report.into_result().is_ok());
}

#[tokio::test]
async fn test_report_lists_every_registered_tracker() {
    let db = DbHandle::open_memory().unwrap();
    let anilist = Arc::new(
        MockTracker::new("anilist").with_entries(vec![entry("42", "Frieren", 5.0, at(0))]),
    );
    let registry = registry_with(&db, &[anilist]);

    let report = registry
        .sync_all(SyncDirection::Both, &CancellationToken::new())
        .await;

    assert_eq!(
        report.stats.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["anilist", LOCAL_TRACKER]
    );
    assert_eq!(report.stats[LOCAL_TRACKER], SyncStats::default());
    assert_eq!(report.attempted, vec!["anilist"]);
    assert!(report.into_result().is_ok());
}

#[tokio::test]
async fn test_one_failing_tracker_does_not_stop_others() {
    let db = DbHandle::open_memory().unwrap();
    let anilist = Arc::new(MockTracker::new("anilist"));
    anilist.fail_list(true);
    let mal = Arc::new(MockTracker::new("mal").with_entries(vec![entry("7", "Monster", 1.0, at(0))]));
    let registry = registry_with(&db, &[anilist, mal]);

    let report = registry
        .sync_all_from_remote(&CancellationToken::new())
        .await;

    assert!(report.failures.contains_key("anilist"));
    assert_eq!(report.stats["mal"].added, 1);
    assert_eq!(report.total().added, 1);
    match report.into_result() {
        Err(SyncError::TrackersFailed(names)) => assert_eq!(names, vec!["anilist"]),
        other => panic!("expected TrackersFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_both_directions_pull_then_push() {
    let db = DbHandle::open_memory().unwrap();
    let anilist = Arc::new(MockTracker::new("anilist").with_entries(vec![
        entry("1", "Ping Pong", 3.0, at(0)),
        entry("2", "Odd Taxi", 5.0, at(0)),
    ]));
    let registry = registry_with(&db, &[anilist.clone()]);
    let cancel = CancellationToken::new();

    let first = registry.sync_all(SyncDirection::Both, &cancel).await;
    assert_eq!(first.stats["anilist"].added, 2);
    // Nothing has been pushed yet, so every pulled row goes out once.
    assert_eq!(anilist.pushes().len(), 2);

    let second = registry.sync_all(SyncDirection::Both, &cancel).await;
    assert_eq!(second.total().changes(), 0);
    assert_eq!(anilist.pushes().len(), 2);
    assert!(second.into_result().is_ok());
}

#[tokio::test]
async fn test_sync_one_rejects_unknown_tracker() {
    let db = DbHandle::open_memory().unwrap();
    let registry = registry_with(&db, &[]);

    let err = registry
        .sync_one("kitsu", SyncDirection::Pull, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, TrackerError::UnknownTracker(_)));
}

#[tokio::test]
async fn test_closed_store_stops_the_fan_out() {
    let db = DbHandle::open_memory().unwrap();
    let anilist = Arc::new(MockTracker::new("anilist"));
    let mal = Arc::new(MockTracker::new("mal"));
    let registry = registry_with(&db, &[anilist.clone(), mal.clone()]);
    db.shutdown();

    let report = registry
        .sync_all(SyncDirection::Both, &CancellationToken::new())
        .await;

    assert_eq!(anilist.list_calls(), 1);
    assert_eq!(mal.list_calls(), 0);
    let err = report.into_result().unwrap_err();
    assert!(err.is_fatal());
}
