//! The capability every tracker variant provides to the sync engine.

use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use tsuzuki_core::models::{Anime, TrackingRecord, WatchStatus};

use crate::db::DbHandle;
use crate::error::{PassError, TrackerError};
use crate::reconcile;
use crate::stats::SyncStats;

/// Title metadata as one tracker reports it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnimeInfo {
    pub external_id: String,
    pub title: String,
    pub original_title: Option<String>,
    pub alternative_titles: Vec<String>,
    pub synopsis: Option<String>,
    pub total_episodes: Option<u32>,
    pub media_type: Option<String>,
    pub year: Option<u32>,
    pub season: Option<String>,
    pub airing_status: Option<String>,
    pub genres: Vec<String>,
    pub thumbnail_url: Option<String>,
}

impl AnimeInfo {
    /// A new, unsaved anime built from this metadata.
    pub fn to_anime(&self) -> Anime {
        let mut anime = Anime::default();
        self.apply_to(&mut anime);
        anime
    }

    /// Overwrite `anime` with every field this tracker actually knows.
    /// Fields the tracker left blank keep their stored value.
    pub fn apply_to(&self, anime: &mut Anime) {
        if !self.title.is_empty() {
            anime.title = self.title.clone();
        }
        if !self.alternative_titles.is_empty() {
            anime.alternative_titles = self.alternative_titles.clone();
        }
        if !self.genres.is_empty() {
            anime.genres = self.genres.clone();
        }
        merge_opt(&mut anime.original_title, &self.original_title);
        merge_opt(&mut anime.synopsis, &self.synopsis);
        merge_opt(&mut anime.total_episodes, &self.total_episodes);
        merge_opt(&mut anime.media_type, &self.media_type);
        merge_opt(&mut anime.year, &self.year);
        merge_opt(&mut anime.season, &self.season);
        merge_opt(&mut anime.airing_status, &self.airing_status);
        merge_opt(&mut anime.thumbnail_url, &self.thumbnail_url);
    }
}

fn merge_opt<T: Clone>(dst: &mut Option<T>, src: &Option<T>) {
    if src.is_some() {
        dst.clone_from(src);
    }
}

/// One entry of a tracker's list: metadata plus the user's watch state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserAnimeEntry {
    pub info: AnimeInfo,
    pub status: WatchStatus,
    /// 0–10, 0 when unscored.
    pub score: f32,
    pub progress: f64,
    pub last_updated: DateTime<Utc>,
}

impl UserAnimeEntry {
    pub fn external_id(&self) -> &str {
        &self.info.external_id
    }

    /// Tracking row mirroring this entry. `anime_id` is filled in by the store.
    pub fn to_tracking(&self, tracker: &str) -> TrackingRecord {
        TrackingRecord {
            status: self.status,
            score: self.score,
            progress: self.progress,
            total_episodes: self.info.total_episodes,
            last_updated: self.last_updated,
            ..TrackingRecord::new(0, tracker, self.info.external_id.clone())
        }
    }
}

/// Field set pushed to a tracker. `None` means "leave unchanged".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusUpdate {
    pub status: WatchStatus,
    pub episode: Option<f64>,
    pub score: Option<f32>,
}

impl StatusUpdate {
    /// Zero episode or score is treated as "not provided", never as a reset.
    pub fn new(status: WatchStatus, episode: f64, score: f32) -> Self {
        Self {
            status,
            episode: (episode > 0.0).then_some(episode),
            score: (score > 0.0).then_some(score),
        }
    }

    pub fn from_record(record: &TrackingRecord) -> Self {
        Self::new(record.status, record.progress, record.score)
    }
}

/// A watch-list service the ledger can reconcile against.
///
/// Implementations are shared as `Arc<dyn Tracker>`.
#[async_trait]
pub trait Tracker: Send + Sync {
    /// Stable lowercase key: `local`, `anilist`, `mal`.
    fn name(&self) -> &str;

    /// True for the tracker backed only by the local store.
    fn is_local(&self) -> bool {
        false
    }

    /// Whether this tracker drops fractional episodes, storing 12.5 as 12.
    fn counts_whole_episodes(&self) -> bool {
        false
    }

    /// Whether usable credentials are available. Performs no network I/O.
    async fn is_authenticated(&self) -> bool;

    /// Obtain credentials, interactively if needed. A no-op when already authenticated.
    async fn authenticate(&self, cancel: &CancellationToken) -> Result<(), TrackerError>;

    /// Forget stored credentials. A no-op for trackers that need none.
    async fn logout(&self) -> Result<(), TrackerError> {
        Ok(())
    }

    async fn search_anime(&self, query: &str, limit: u32) -> Result<Vec<AnimeInfo>, TrackerError>;

    async fn get_anime_details(&self, external_id: &str) -> Result<AnimeInfo, TrackerError>;

    /// Complete snapshot of the user's list on this tracker.
    async fn get_user_anime_list(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<UserAnimeEntry>, TrackerError>;

    async fn update_anime_status(
        &self,
        external_id: &str,
        update: StatusUpdate,
    ) -> Result<(), TrackerError>;

    /// Pull this tracker's list into the store.
    async fn sync_from_remote(
        &self,
        db: &DbHandle,
        cancel: &CancellationToken,
    ) -> Result<SyncStats, PassError> {
        reconcile::pull(self, db, cancel).await
    }

    /// Push rows changed since the last push to this tracker.
    async fn sync_to_remote(
        &self,
        db: &DbHandle,
        cancel: &CancellationToken,
    ) -> Result<SyncStats, PassError> {
        reconcile::push(self, db, cancel).await
    }
}

/// Await a tracker call, giving up with [`TrackerError::Cancelled`] as soon
/// as `cancel` fires.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = Result<T, TrackerError>>,
) -> Result<T, TrackerError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TrackerError::Cancelled),
        result = call => result,
    }
}
