mod anime;
mod progress;
mod tracking;

pub use anime::Anime;
pub use progress::EpisodeProgress;
pub use tracking::{TrackingRecord, WatchStatus, LOCAL_TRACKER};

/// Keys in the store's config table that the sync core reads and writes.
pub mod config_keys {
    pub const ACTIVE_TRACKER: &str = "active_tracker";
    pub const AUTO_SYNC: &str = "tracker_auto_sync";
    pub const SYNC_INTERVAL: &str = "tracker_sync_interval";

    /// Push-phase watermark key for a tracker, e.g. `anilist_last_sync`.
    pub fn last_sync(tracker: &str) -> String {
        format!("{tracker}_last_sync")
    }
}
