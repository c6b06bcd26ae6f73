//! Reconciliation between the local watch ledger and remote trackers.
//!
//! [`TrackerRegistry`] holds every [`Tracker`] by name, [`reconcile`] merges a
//! tracker's list with the store, and [`SyncScheduler`] runs that merge in the
//! background.

pub mod auth;
pub mod db;
pub mod error;
pub mod local;
pub mod reconcile;
pub mod registry;
pub mod remote;
pub mod scheduler;
pub mod stats;
pub mod tracker;

pub use db::DbHandle;
pub use error::{PassError, SyncError, TrackerError};
pub use local::LocalTracker;
pub use registry::{SyncDirection, SyncReport, TrackerRegistry};
pub use remote::{AniListTracker, MalTracker, RemoteTracker};
pub use scheduler::SyncScheduler;
pub use stats::SyncStats;
pub use tracker::{AnimeInfo, StatusUpdate, Tracker, UserAnimeEntry};
