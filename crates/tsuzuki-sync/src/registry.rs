use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use tsuzuki_core::models::{config_keys, LOCAL_TRACKER};

use crate::db::DbHandle;
use crate::error::{PassError, SyncError, TrackerError};
use crate::stats::SyncStats;
use crate::tracker::Tracker;

/// Which halves of reconciliation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncDirection {
    Pull,
    Push,
    /// Pull then push, tracker by tracker.
    #[default]
    Both,
}

/// Per-tracker results of a fan-out over the registry.
#[derive(Debug, Default, Serialize)]
pub struct SyncReport {
    pub stats: BTreeMap<String, SyncStats>,
    #[serde(serialize_with = "serialize_failures")]
    pub failures: BTreeMap<String, SyncError>,
    /// Remote trackers skipped for lack of credentials.
    pub unauthenticated: Vec<String>,
    /// Remote trackers that were actually attempted.
    pub attempted: Vec<String>,
}

fn serialize_failures<S: serde::Serializer>(
    failures: &BTreeMap<String, SyncError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(failures.iter().map(|(k, v)| (k, v.to_string())))
}

impl SyncReport {
    /// Counters summed over every tracker.
    pub fn total(&self) -> SyncStats {
        let mut total = SyncStats::default();
        for stats in self.stats.values() {
            total.merge(stats.clone());
        }
        total
    }

    fn record(&mut self, tracker: &str, result: Result<SyncStats, PassError>) {
        let stats = match result {
            Ok(stats) => stats,
            Err(PassError { stats, error }) => {
                tracing::error!(tracker, error = %error, "sync pass failed");
                self.failures.insert(tracker.to_string(), error);
                stats
            }
        };
        self.stats.entry(tracker.to_string()).or_default().merge(stats);
    }

    fn has_fatal(&self) -> bool {
        self.failures.values().any(SyncError::is_fatal)
    }

    /// Report trackers cut off by a pass deadline as timed out rather than cancelled.
    pub(crate) fn mark_timed_out(&mut self, deadline: Duration) {
        for error in self.failures.values_mut() {
            if matches!(error, SyncError::Tracker(TrackerError::Cancelled)) {
                *error = SyncError::Timeout(deadline);
            }
        }
    }

    /// Turn the report into an error if anything failed.
    ///
    /// A fatal store failure wins, then "no remote could be attempted", then
    /// the list of failed trackers.
    pub fn into_result(mut self) -> Result<Self, SyncError> {
        let fatal = self
            .failures
            .iter()
            .find(|(_, e)| e.is_fatal())
            .map(|(name, _)| name.clone());
        if let Some(error) = fatal.and_then(|name| self.failures.remove(&name)) {
            return Err(error);
        }
        if self.attempted.is_empty() && !self.unauthenticated.is_empty() {
            return Err(SyncError::AllUnauthenticated);
        }
        if !self.failures.is_empty() {
            return Err(SyncError::TrackersFailed(
                self.failures.keys().cloned().collect(),
            ));
        }
        Ok(self)
    }
}

/// Named trackers plus the "active tracker" setting.
pub struct TrackerRegistry {
    db: DbHandle,
    trackers: BTreeMap<String, Arc<dyn Tracker>>,
}

impl TrackerRegistry {
    pub fn new(db: DbHandle) -> Self {
        Self {
            db,
            trackers: BTreeMap::new(),
        }
    }

    /// Add a tracker under its own name, replacing any previous one.
    pub fn register(&mut self, tracker: Arc<dyn Tracker>) -> Option<Arc<dyn Tracker>> {
        let name = tracker.name().to_string();
        tracing::debug!(tracker = %name, "tracker registered");
        self.trackers.insert(name, tracker)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tracker>> {
        self.trackers.get(name).cloned()
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.trackers.keys().map(String::as_str).collect()
    }

    pub fn db(&self) -> &DbHandle {
        &self.db
    }

    /// Tracker named by `active_tracker`, falling back to (and persisting) `local`.
    pub async fn active_tracker(&self) -> Result<Arc<dyn Tracker>, TrackerError> {
        let stored = self.db.get_config(config_keys::ACTIVE_TRACKER).await?;
        if let Some(tracker) = stored.as_deref().and_then(|name| self.get(name)) {
            return Ok(tracker);
        }
        if let Some(name) = stored.as_deref() {
            tracing::warn!(tracker = name, "active tracker is not registered, using local");
        }

        let local = self
            .get(LOCAL_TRACKER)
            .ok_or_else(|| TrackerError::UnknownTracker(LOCAL_TRACKER.to_string()))?;
        self.db
            .set_config(config_keys::ACTIVE_TRACKER, LOCAL_TRACKER)
            .await?;
        Ok(local)
    }

    pub async fn set_active_tracker(&self, name: &str) -> Result<(), TrackerError> {
        if !self.trackers.contains_key(name) {
            return Err(TrackerError::UnknownTracker(name.to_string()));
        }
        self.db.set_config(config_keys::ACTIVE_TRACKER, name).await?;
        tracing::info!(tracker = name, "active tracker changed");
        Ok(())
    }

    pub async fn sync_all_from_remote(&self, cancel: &CancellationToken) -> SyncReport {
        self.sync_all(SyncDirection::Pull, cancel).await
    }

    pub async fn sync_all_to_remote(&self, cancel: &CancellationToken) -> SyncReport {
        self.sync_all(SyncDirection::Push, cancel).await
    }

    /// Reconcile every registered tracker, one after another in name order.
    ///
    /// Unauthenticated trackers are skipped; a failing tracker does not stop
    /// the others. Only a lost store or cancellation ends the fan-out early.
    /// The local tracker's passes are no-ops but still get a stats entry.
    pub async fn sync_all(&self, direction: SyncDirection, cancel: &CancellationToken) -> SyncReport {
        self.sync_selected(self.trackers.values().cloned(), direction, cancel)
            .await
    }

    /// Reconcile a single tracker by name.
    pub async fn sync_one(
        &self,
        name: &str,
        direction: SyncDirection,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, TrackerError> {
        let tracker = self
            .get(name)
            .ok_or_else(|| TrackerError::UnknownTracker(name.to_string()))?;
        Ok(self
            .sync_selected(std::iter::once(tracker), direction, cancel)
            .await)
    }

    async fn sync_selected(
        &self,
        trackers: impl Iterator<Item = Arc<dyn Tracker>>,
        direction: SyncDirection,
        cancel: &CancellationToken,
    ) -> SyncReport {
        let mut report = SyncReport::default();

        for tracker in trackers {
            let name = tracker.name().to_string();
            if cancel.is_cancelled() {
                tracing::info!(tracker = %name, "sync cancelled before tracker");
                report
                    .failures
                    .insert(name, SyncError::Tracker(TrackerError::Cancelled));
                break;
            }
            if !tracker.is_local() {
                if !tracker.is_authenticated().await {
                    tracing::info!(tracker = %name, "skipping unauthenticated tracker");
                    report.unauthenticated.push(name);
                    continue;
                }
                report.attempted.push(name.clone());
            }

            if matches!(direction, SyncDirection::Pull | SyncDirection::Both) {
                let result = tracker.sync_from_remote(&self.db, cancel).await;
                report.record(&name, result);
            }
            if report.has_fatal() {
                break;
            }
            if matches!(direction, SyncDirection::Push | SyncDirection::Both)
                && !pull_blocked(&report, &name)
            {
                let result = tracker.sync_to_remote(&self.db, cancel).await;
                report.record(&name, result);
            }
            if report.has_fatal() {
                break;
            }
        }

        report
    }
}

/// A push right after a failed pull would only fail the same way.
fn pull_blocked(report: &SyncReport, name: &str) -> bool {
    report.failures.get(name).is_some_and(|e| {
        matches!(
            e,
            SyncError::Tracker(TrackerError::Authentication { .. } | TrackerError::Cancelled)
        )
    })
}
