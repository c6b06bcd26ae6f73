use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use tsuzuki_core::error::TsuzukiError;
use tsuzuki_core::models::{Anime, TrackingRecord, LOCAL_TRACKER};

use crate::db::DbHandle;
use crate::error::{PassError, TrackerError};
use crate::stats::SyncStats;
use crate::tracker::{AnimeInfo, StatusUpdate, Tracker, UserAnimeEntry};

/// Tracker backed only by the local store. Its external IDs are local anime IDs.
pub struct LocalTracker {
    db: DbHandle,
}

impl LocalTracker {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }
}

fn anime_id(external_id: &str) -> Result<i64, TrackerError> {
    match external_id.trim().parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(TrackerError::Validation {
            id: external_id.to_string(),
            reason: "expected a local anime ID".into(),
        }),
    }
}

fn to_info(anime: Anime) -> AnimeInfo {
    AnimeInfo {
        external_id: anime.id.to_string(),
        title: anime.title,
        original_title: anime.original_title,
        alternative_titles: anime.alternative_titles,
        synopsis: anime.synopsis,
        total_episodes: anime.total_episodes,
        media_type: anime.media_type,
        year: anime.year,
        season: anime.season,
        airing_status: anime.airing_status,
        genres: anime.genres,
        thumbnail_url: anime.thumbnail_url,
    }
}

#[async_trait]
impl Tracker for LocalTracker {
    fn name(&self) -> &str {
        LOCAL_TRACKER
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn is_authenticated(&self) -> bool {
        true
    }

    async fn authenticate(&self, _cancel: &CancellationToken) -> Result<(), TrackerError> {
        Ok(())
    }

    async fn search_anime(&self, query: &str, limit: u32) -> Result<Vec<AnimeInfo>, TrackerError> {
        let found = self.db.search_anime(query).await?;
        Ok(found
            .into_iter()
            .take(limit as usize)
            .map(to_info)
            .collect())
    }

    async fn get_anime_details(&self, external_id: &str) -> Result<AnimeInfo, TrackerError> {
        let id = anime_id(external_id)?;
        match self.db.get_anime(id).await? {
            Some(anime) => Ok(to_info(anime)),
            None => Err(TsuzukiError::NotFound(format!("anime {id}")).into()),
        }
    }

    async fn get_user_anime_list(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<Vec<UserAnimeEntry>, TrackerError> {
        let mut entries = Vec::new();
        for record in self.db.tracking_for_tracker(LOCAL_TRACKER).await? {
            let Some(anime) = self.db.get_anime(record.anime_id).await? else {
                continue;
            };
            entries.push(UserAnimeEntry {
                info: to_info(anime),
                status: record.status,
                score: record.score,
                progress: record.progress,
                last_updated: record.last_updated,
            });
        }
        Ok(entries)
    }

    /// Create the local row if it is missing, otherwise update status and any
    /// provided episode or score.
    async fn update_anime_status(
        &self,
        external_id: &str,
        update: StatusUpdate,
    ) -> Result<(), TrackerError> {
        let id = anime_id(external_id)?;
        if self.db.get_anime(id).await?.is_none() {
            return Err(TsuzukiError::NotFound(format!("anime {id}")).into());
        }

        let mut record = self
            .db
            .get_tracking(id, LOCAL_TRACKER)
            .await?
            .unwrap_or_else(|| TrackingRecord::new(id, LOCAL_TRACKER, ""));
        record.status = update.status;
        if let Some(episode) = update.episode {
            record.progress = episode;
        }
        if let Some(score) = update.score {
            record.score = score;
        }
        record.last_updated = Utc::now();

        self.db.upsert_tracking(record).await?;
        tracing::debug!(anime_id = id, status = %update.status, "local status updated");
        Ok(())
    }

    async fn sync_from_remote(
        &self,
        _db: &DbHandle,
        _cancel: &CancellationToken,
    ) -> Result<SyncStats, PassError> {
        Ok(SyncStats::default())
    }

    async fn sync_to_remote(
        &self,
        _db: &DbHandle,
        _cancel: &CancellationToken,
    ) -> Result<SyncStats, PassError> {
        Ok(SyncStats::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsuzuki_core::models::WatchStatus;

    async fn setup() -> (LocalTracker, DbHandle, i64) {
        let db = DbHandle::open_memory().unwrap();
        let id = db
            .insert_anime(Anime {
                title: "Dungeon Meshi".into(),
                total_episodes: Some(24),
                ..Default::default()
            })
            .await
            .unwrap();
        (LocalTracker::new(db.clone()), db, id)
    }

    #[tokio::test]
    async fn test_update_creates_then_keeps_unset_fields() {
        let (local, db, id) = setup().await;
        let ext = id.to_string();

        local
            .update_anime_status(&ext, StatusUpdate::new(WatchStatus::Watching, 3.0, 8.0))
            .await
            .unwrap();
        local
            .update_anime_status(&ext, StatusUpdate::new(WatchStatus::OnHold, 0.0, 0.0))
            .await
            .unwrap();

        let row = db.get_tracking(id, LOCAL_TRACKER).await.unwrap().unwrap();
        assert_eq!(row.status, WatchStatus::OnHold);
        assert_eq!(row.progress, 3.0);
        assert_eq!(row.score, 8.0);
        assert_eq!(row.external_id, "");
    }

    #[tokio::test]
    async fn test_list_and_search() {
        let (local, _db, id) = setup().await;
        local
            .update_anime_status(&id.to_string(), StatusUpdate::new(WatchStatus::Watching, 1.0, 0.0))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let list = local.get_user_anime_list(&cancel).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].info.title, "Dungeon Meshi");

        assert_eq!(local.search_anime("dungeon", 10).await.unwrap().len(), 1);
        assert_eq!(
            local.get_anime_details(&id.to_string()).await.unwrap().total_episodes,
            Some(24)
        );
    }

    #[tokio::test]
    async fn test_rejects_malformed_and_unknown_ids() {
        let (local, _db, _id) = setup().await;
        let update = StatusUpdate::new(WatchStatus::Watching, 1.0, 0.0);

        assert!(matches!(
            local.update_anime_status("abc", update).await,
            Err(TrackerError::Validation { .. })
        ));
        assert!(matches!(
            local.update_anime_status("999", update).await,
            Err(TrackerError::LocalStore(TsuzukiError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_sync_is_a_no_op() {
        let (local, db, _id) = setup().await;
        let cancel = CancellationToken::new();
        assert_eq!(
            local.sync_from_remote(&db, &cancel).await.unwrap(),
            SyncStats::default()
        );
        assert_eq!(
            local.sync_to_remote(&db, &cancel).await.unwrap(),
            SyncStats::default()
        );
    }
}
