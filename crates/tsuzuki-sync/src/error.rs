use std::fmt;
use std::time::Duration;

use thiserror::Error;

use tsuzuki_core::error::TsuzukiError;

use crate::stats::SyncStats;

/// Failure of a single tracker operation.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("{tracker}: not authenticated: {reason}")]
    Authentication { tracker: String, reason: String },

    #[error("{tracker}: remote API error: {message}")]
    RemoteApi { tracker: String, message: String },

    #[error("local store error: {0}")]
    LocalStore(#[from] TsuzukiError),

    #[error("invalid external ID {id:?}: {reason}")]
    Validation { id: String, reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("unknown tracker: {0}")]
    UnknownTracker(String),
}

impl TrackerError {
    /// The store is gone; nothing after this can be written.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::LocalStore(e) if e.is_unreachable())
    }
}

/// Pass-level failure: the pass could not be attempted or had to stop.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("watermark {key} holds an unreadable timestamp {value:?}")]
    InvalidWatermark { key: String, value: String },

    #[error("deadline of {0:?} exceeded")]
    Timeout(Duration),

    #[error("every remote tracker is unauthenticated")]
    AllUnauthenticated,

    #[error("sync failed for: {}", .0.join(", "))]
    TrackersFailed(Vec<String>),
}

impl SyncError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Tracker(e) if e.is_fatal())
    }
}

impl From<TsuzukiError> for SyncError {
    fn from(e: TsuzukiError) -> Self {
        Self::Tracker(TrackerError::LocalStore(e))
    }
}

/// A failed pass together with whatever it accomplished before failing.
#[derive(Debug)]
pub struct PassError {
    pub stats: SyncStats,
    pub error: SyncError,
}

impl PassError {
    pub fn new(stats: SyncStats, error: impl Into<SyncError>) -> Self {
        Self {
            stats,
            error: error.into(),
        }
    }
}

impl fmt::Display for PassError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.stats)
    }
}

impl std::error::Error for PassError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<SyncError> for PassError {
    fn from(error: SyncError) -> Self {
        Self::new(SyncStats::default(), error)
    }
}

impl From<TrackerError> for PassError {
    fn from(error: TrackerError) -> Self {
        Self::new(SyncStats::default(), error)
    }
}
