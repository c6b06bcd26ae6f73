//! Periodic background reconciliation and push-on-demand.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use tsuzuki_core::config::SyncConfig;
use tsuzuki_core::models::{config_keys, TrackingRecord, WatchStatus, LOCAL_TRACKER};

use crate::db::DbHandle;
use crate::error::{PassError, SyncError, TrackerError};
use crate::registry::{SyncDirection, SyncReport, TrackerRegistry};
use crate::stats::SyncStats;
use crate::reconcile::comparable_progress;
use crate::tracker::{cancellable, StatusUpdate};

pub const DEFAULT_INTERVAL_MINS: u64 = 60;
pub const MIN_INTERVAL_MINS: u64 = 15;

/// Tick period from the raw `tracker_sync_interval` value.
///
/// Missing or unparsable values use the default; anything below the minimum
/// is raised to it.
pub fn effective_interval(raw: Option<&str>) -> Duration {
    let mins = raw
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_INTERVAL_MINS)
        .max(MIN_INTERVAL_MINS);
    Duration::from_secs(mins * 60)
}

/// Shared by the scheduler handle and its background loop.
#[derive(Clone)]
struct Worker {
    registry: Arc<TrackerRegistry>,
    config: SyncConfig,
}

impl Worker {
    fn db(&self) -> &DbHandle {
        self.registry.db()
    }

    async fn interval(&self) -> Duration {
        match self.db().get_config(config_keys::SYNC_INTERVAL).await {
            Ok(raw) => effective_interval(raw.as_deref()),
            Err(e) => {
                tracing::warn!(error = %e, "could not read sync interval, using default");
                effective_interval(None)
            }
        }
    }

    async fn auto_sync_enabled(&self) -> bool {
        match self.db().get_config(config_keys::AUTO_SYNC).await {
            Ok(value) => value.as_deref().map(str::trim) == Some("true"),
            Err(e) => {
                tracing::warn!(error = %e, "could not read auto sync flag");
                false
            }
        }
    }

    async fn run_once(&self, cancel: &CancellationToken) -> Option<SyncReport> {
        if !self.auto_sync_enabled().await {
            tracing::debug!("auto sync disabled, skipping tick");
            return None;
        }

        let deadline = self.config.pass_timeout();
        let pass = cancel.child_token();
        let sync = self.registry.sync_all(SyncDirection::Both, &pass);
        tokio::pin!(sync);

        let report = tokio::select! {
            report = &mut sync => report,
            _ = tokio::time::sleep(deadline) => {
                tracing::warn!(error = %SyncError::Timeout(deadline), "sync pass cut short");
                pass.cancel();
                // Every tracker call races the token, so this returns promptly.
                let mut report = sync.await;
                report.mark_timed_out(deadline);
                report
            }
        };

        tracing::info!(
            total = %report.total(),
            failed = report.failures.len(),
            unauthenticated = report.unauthenticated.len(),
            "scheduled sync finished"
        );
        Some(report)
    }

    async fn run_loop(self, cancel: CancellationToken) {
        let mut period = self.interval().await;
        let mut ticker = new_ticker(period);
        tracing::info!(interval_secs = period.as_secs(), "sync scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            self.run_once(&cancel).await;
            if cancel.is_cancelled() {
                break;
            }

            let next = self.interval().await;
            if next != period {
                tracing::info!(interval_secs = next.as_secs(), "sync interval changed");
                period = next;
                ticker = new_ticker(period);
            }
        }

        tracing::info!("sync scheduler stopped");
    }
}

/// First tick one period from now. Ticks that elapse during a pass are dropped.
fn new_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Cancellable periodic sync over a [`TrackerRegistry`].
pub struct SyncScheduler {
    worker: Worker,
    running: Mutex<Option<Running>>,
}

impl SyncScheduler {
    pub fn new(registry: Arc<TrackerRegistry>, config: SyncConfig) -> Self {
        Self {
            worker: Worker { registry, config },
            running: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<TrackerRegistry> {
        &self.worker.registry
    }

    /// Spawn the loop. Returns `false` if it is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            tracing::debug!("sync scheduler already running");
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(self.worker.clone().run_loop(cancel.clone()));
        *running = Some(Running { cancel, handle });
        true
    }

    /// Cancel the loop and wait for it to exit. A no-op when not running.
    pub async fn stop(&self) {
        let taken = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(Running { cancel, handle }) = taken else {
            return;
        };

        cancel.cancel();
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "sync scheduler task failed");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// One gated pass, exactly as a tick would run it.
    /// `None` when auto sync is off.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Option<SyncReport> {
        self.worker.run_once(cancel).await
    }

    /// Record that `episode` of `anime_id` was watched and push it to every
    /// authenticated remote that tracks the anime.
    ///
    /// Progress is only ever raised, locally and remotely. Bounded by the
    /// push deadline.
    pub async fn push_episode_progress(
        &self,
        anime_id: i64,
        episode: f64,
        cancel: &CancellationToken,
    ) -> Result<SyncStats, PassError> {
        let deadline = self.worker.config.push_timeout();
        let push = cancel.child_token();
        let work = self.push_progress(anime_id, episode, &push);
        tokio::pin!(work);

        tokio::select! {
            result = &mut work => result,
            _ = tokio::time::sleep(deadline) => {
                push.cancel();
                let stats = match work.await {
                    Ok(stats) | Err(PassError { stats, .. }) => stats,
                };
                Err(PassError::new(stats, SyncError::Timeout(deadline)))
            }
        }
    }

    async fn push_progress(
        &self,
        anime_id: i64,
        episode: f64,
        cancel: &CancellationToken,
    ) -> Result<SyncStats, PassError> {
        let registry = &self.worker.registry;
        let db = self.worker.db();
        let mut stats = SyncStats::default();

        if episode <= 0.0 || !episode.is_finite() {
            return Err(PassError::new(
                stats,
                TrackerError::Validation {
                    id: anime_id.to_string(),
                    reason: format!("invalid episode number {episode}"),
                },
            ));
        }

        let records = db
            .tracking_for_anime(anime_id)
            .await
            .map_err(|e| PassError::new(SyncStats::default(), e))?;

        let local = records.iter().find(|r| r.tracker == LOCAL_TRACKER);
        if local.map_or(true, |r| episode > r.progress) {
            if let Some(tracker) = registry.get(LOCAL_TRACKER) {
                let status = local.map_or(WatchStatus::Watching, |r| r.status);
                let result = tracker
                    .update_anime_status(
                        &anime_id.to_string(),
                        StatusUpdate::new(status, episode, 0.0),
                    )
                    .await;
                match result {
                    Ok(()) => {
                        stats.updated(format!("Local progress of anime {anime_id} -> {episode}"))
                    }
                    Err(e) if e.is_fatal() => return Err(PassError::new(stats, e)),
                    Err(e) => stats.error(format!("Failed to record local progress: {e}")),
                }
            }
        }

        for record in records.iter().filter(|r| r.tracker != LOCAL_TRACKER) {
            if cancel.is_cancelled() {
                return Err(PassError::new(stats, TrackerError::Cancelled));
            }
            let Some(tracker) = registry.get(&record.tracker) else {
                stats.skipped(format!("{} is not registered", record.tracker));
                continue;
            };
            if !tracker.is_authenticated().await {
                stats.skipped(format!("{} is not authenticated", record.tracker));
                continue;
            }
            let whole = tracker.counts_whole_episodes();
            if comparable_progress(episode, whole) <= comparable_progress(record.progress, whole) {
                stats.skipped(format!(
                    "{} already at episode {}",
                    record.tracker, record.progress
                ));
                continue;
            }

            let update = StatusUpdate::new(record.status, episode, 0.0);
            let result =
                cancellable(cancel, tracker.update_anime_status(&record.external_id, update)).await;
            if let Err(e) = result {
                if matches!(e, TrackerError::Cancelled) {
                    return Err(PassError::new(stats, e));
                }
                stats.error(format!(
                    "Failed to push episode {episode} to {}: {e}",
                    record.tracker
                ));
                continue;
            }

            let updated = TrackingRecord {
                progress: episode,
                last_updated: Utc::now(),
                ..record.clone()
            };
            if let Err(e) = db.upsert_tracking(updated).await {
                let e = TrackerError::from(e);
                if e.is_fatal() {
                    return Err(PassError::new(stats, e));
                }
                stats.error(format!("Pushed to {} but could not save: {e}", record.tracker));
                continue;
            }
            stats.updated(format!(
                "Pushed episode {episode} of {} to {}",
                record.external_id, record.tracker
            ));
        }

        tracing::info!(anime_id, episode, stats = %stats, "episode progress pushed");
        Ok(stats)
    }
}
