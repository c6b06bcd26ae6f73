//! Merge logic between the local store and one tracker.
//!
//! `pull` folds a remote snapshot into the store (last writer by timestamp
//! wins, locally-ahead progress is pushed back, entries the remote dropped
//! are removed). `push` sends rows changed since the tracker's watermark.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use tsuzuki_core::models::{config_keys, TrackingRecord};

use crate::db::DbHandle;
use crate::error::{PassError, SyncError, TrackerError};
use crate::stats::SyncStats;
use crate::tracker::{cancellable, StatusUpdate, Tracker, UserAnimeEntry};

/// What to do with a remote entry that already has a local row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Remote is strictly newer: overwrite the local row.
    Pull,
    /// Local is strictly newer and further along: send it to the remote.
    PushBack,
    /// Leave both sides alone.
    Skip,
}

/// Progress as a tracker can hold it. Whole-episode trackers drop the fraction.
pub fn comparable_progress(progress: f64, whole_episodes: bool) -> f64 {
    if whole_episodes {
        progress.floor()
    } else {
        progress
    }
}

/// Compare one local row against its remote counterpart.
///
/// A remote entry that is newer always wins, even with lower progress. A local
/// row that is newer but not ahead in progress is left diverged. For
/// whole-episode trackers "ahead" ignores the local fraction, since pushing
/// 12.5 would only send 12 again.
pub fn decide(local: &TrackingRecord, remote: &UserAnimeEntry, whole_episodes: bool) -> Decision {
    let local_progress = comparable_progress(local.progress, whole_episodes);
    if remote.last_updated > local.last_updated {
        Decision::Pull
    } else if local.last_updated > remote.last_updated && local_progress > remote.progress {
        Decision::PushBack
    } else {
        Decision::Skip
    }
}

/// Progress to store when pulling `remote` over `local`. A whole-episode
/// remote that matches the local row's episode keeps the local fraction.
pub fn pulled_progress(local: &TrackingRecord, remote: &UserAnimeEntry, whole_episodes: bool) -> f64 {
    if whole_episodes && remote.progress == local.progress.floor() {
        local.progress
    } else {
        remote.progress
    }
}

/// Reconcile `tracker`'s remote list into the store.
pub async fn pull<T: Tracker + ?Sized>(
    tracker: &T,
    db: &DbHandle,
    cancel: &CancellationToken,
) -> Result<SyncStats, PassError> {
    let name = tracker.name();
    let mut stats = SyncStats::default();

    tracing::info!(tracker = %name, "pull started");

    let whole = tracker.counts_whole_episodes();
    let remote = cancellable(cancel, tracker.get_user_anime_list(cancel))
        .await
        .map_err(|e| PassError::new(SyncStats::default(), e))?;
    let locals = db
        .tracking_for_tracker(name)
        .await
        .map_err(|e| PassError::new(SyncStats::default(), e))?;

    let local_index: BTreeMap<&str, &TrackingRecord> = locals
        .iter()
        .map(|r| (r.external_id.as_str(), r))
        .collect();
    let mut seen: HashSet<&str> = HashSet::new();

    for entry in &remote {
        if cancel.is_cancelled() {
            return Err(PassError::new(stats, TrackerError::Cancelled));
        }

        let ext = entry.external_id();
        if ext.is_empty() {
            stats.error(format!(
                "Ignored {} from {name}: missing external ID",
                entry.info.title
            ));
            continue;
        }
        if !seen.insert(ext) {
            stats.skipped(format!("Ignored duplicate entry {ext} from {name}"));
            continue;
        }

        let result = match local_index.get(ext) {
            None => add_entry(name, db, entry, &mut stats).await,
            Some(local) => match decide(local, entry, whole) {
                Decision::Pull => pull_entry(name, db, local, entry, whole, &mut stats).await,
                Decision::PushBack => push_back(tracker, local, entry, cancel, &mut stats).await,
                Decision::Skip => {
                    stats.skipped(format!("{} is up to date", entry.info.title));
                    Ok(())
                }
            },
        };
        record_failure(result, &mut stats, || {
            format!("Failed to reconcile {} ({ext})", entry.info.title)
        })?;
    }

    for local in &locals {
        if seen.contains(local.external_id.as_str()) {
            continue;
        }
        if cancel.is_cancelled() {
            return Err(PassError::new(stats, TrackerError::Cancelled));
        }

        let result = match db.delete_tracking_cascade(local.anime_id, name).await {
            Ok(outcome) => {
                let suffix = if outcome.anime_deleted {
                    " and its anime"
                } else {
                    ""
                };
                stats.deleted(format!(
                    "Removed {} tracking {}{suffix}: dropped remotely",
                    name, local.external_id
                ));
                Ok(())
            }
            Err(e) => Err(TrackerError::from(e)),
        };
        record_failure(result, &mut stats, || {
            format!("Failed to remove {name} tracking {}", local.external_id)
        })?;
    }

    tracing::info!(tracker = %name, stats = %stats, "pull finished");
    Ok(stats)
}

/// Push rows updated after `<tracker>_last_sync`, then move the watermark to now.
pub async fn push<T: Tracker + ?Sized>(
    tracker: &T,
    db: &DbHandle,
    cancel: &CancellationToken,
) -> Result<SyncStats, PassError> {
    let name = tracker.name();
    let key = config_keys::last_sync(name);
    let mut stats = SyncStats::default();

    tracing::info!(tracker = %name, "push started");

    let watermark = read_watermark(db, &key).await?;
    let records = db
        .tracking_for_tracker(name)
        .await
        .map_err(|e| PassError::new(SyncStats::default(), e))?;

    for record in &records {
        if cancel.is_cancelled() {
            return Err(PassError::new(stats, TrackerError::Cancelled));
        }

        if watermark.is_some_and(|w| record.last_updated <= w) {
            stats.skipped(format!(
                "{name} {} unchanged since last push",
                record.external_id
            ));
            continue;
        }
        if record.external_id.is_empty() {
            stats.error(format!(
                "Cannot push anime {} to {name}: missing external ID",
                record.anime_id
            ));
            continue;
        }

        let update = StatusUpdate::from_record(record);
        let result = cancellable(cancel, tracker.update_anime_status(&record.external_id, update))
            .await
            .map(|()| stats.updated(format!("Pushed {} to {name}", record.external_id)));
        record_failure(result, &mut stats, || {
            format!("Failed to push {} to {name}", record.external_id)
        })?;
    }

    if cancel.is_cancelled() {
        return Err(PassError::new(stats, TrackerError::Cancelled));
    }
    if let Err(e) = db.set_config(&key, &Utc::now().to_rfc3339()).await {
        return Err(PassError::new(stats, e));
    }

    tracing::info!(tracker = %name, stats = %stats, "push finished");
    Ok(stats)
}

async fn read_watermark(db: &DbHandle, key: &str) -> Result<Option<DateTime<Utc>>, PassError> {
    let value = db
        .get_config(key)
        .await
        .map_err(|e| PassError::new(SyncStats::default(), e))?;

    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| {
                PassError::from(SyncError::InvalidWatermark {
                    key: key.to_string(),
                    value: raw.to_string(),
                })
            }),
    }
}

async fn add_entry(
    tracker: &str,
    db: &DbHandle,
    entry: &UserAnimeEntry,
    stats: &mut SyncStats,
) -> Result<(), TrackerError> {
    db.add_tracked_anime(entry.info.to_anime(), entry.to_tracking(tracker))
        .await?;
    stats.added(format!("Added {} from {tracker}", entry.info.title));
    Ok(())
}

async fn pull_entry(
    tracker: &str,
    db: &DbHandle,
    local: &TrackingRecord,
    entry: &UserAnimeEntry,
    whole_episodes: bool,
    stats: &mut SyncStats,
) -> Result<(), TrackerError> {
    let anime = db.get_anime(local.anime_id).await?.map(|mut anime| {
        entry.info.apply_to(&mut anime);
        anime
    });

    let record = TrackingRecord {
        id: local.id,
        anime_id: local.anime_id,
        progress: pulled_progress(local, entry, whole_episodes),
        ..entry.to_tracking(tracker)
    };
    let progress = record.progress;
    db.update_tracked_anime(anime, record).await?;

    stats.updated(format!(
        "Updated {} from {tracker}: episode {} -> {progress}",
        entry.info.title, local.progress
    ));
    Ok(())
}

async fn push_back<T: Tracker + ?Sized>(
    tracker: &T,
    local: &TrackingRecord,
    entry: &UserAnimeEntry,
    cancel: &CancellationToken,
    stats: &mut SyncStats,
) -> Result<(), TrackerError> {
    let update = StatusUpdate::from_record(local);
    cancellable(cancel, tracker.update_anime_status(&local.external_id, update)).await?;
    stats.updated(format!(
        "Pushed {} to {}: episode {} -> {}",
        entry.info.title,
        tracker.name(),
        entry.progress,
        local.progress
    ));
    Ok(())
}

/// Record a per-item failure and keep going, unless the store is gone or the
/// pass was cancelled mid-call.
fn record_failure(
    result: Result<(), TrackerError>,
    stats: &mut SyncStats,
    context: impl FnOnce() -> String,
) -> Result<(), PassError> {
    match result {
        Ok(()) => Ok(()),
        Err(TrackerError::Cancelled) => Err(PassError::new(
            std::mem::take(stats),
            TrackerError::Cancelled,
        )),
        Err(e) if e.is_fatal() => {
            tracing::error!(error = %e, "store unreachable, aborting pass");
            Err(PassError::new(std::mem::take(stats), e))
        }
        Err(e) => {
            stats.error(format!("{}: {e}", context()));
            Ok(())
        }
    }
}
