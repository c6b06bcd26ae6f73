use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot};

use tsuzuki_core::error::TsuzukiError;
use tsuzuki_core::models::{Anime, EpisodeProgress, TrackingRecord};
use tsuzuki_core::storage::{BackupCounts, CascadeOutcome, Storage, StoredToken};

type Reply<T> = oneshot::Sender<Result<T, TsuzukiError>>;

/// Cloneable handle to the single store writer.
///
/// The SQLite connection lives on a dedicated thread; every call is a message
/// processed in arrival order, so writes never interleave.
#[derive(Clone)]
pub struct DbHandle {
    tx: mpsc::UnboundedSender<DbCommand>,
}

enum DbCommand {
    GetConfig {
        key: String,
        reply: Reply<Option<String>>,
    },
    SetConfig {
        key: String,
        value: String,
        reply: Reply<()>,
    },
    DeleteConfig {
        key: String,
        reply: Reply<()>,
    },
    InsertAnime {
        anime: Anime,
        reply: Reply<i64>,
    },
    GetAnime {
        id: i64,
        reply: Reply<Option<Anime>>,
    },
    UpdateAnime {
        anime: Anime,
        reply: Reply<()>,
    },
    DeleteAnime {
        id: i64,
        reply: Reply<()>,
    },
    SearchAnime {
        query: String,
        reply: Reply<Vec<Anime>>,
    },
    GetAnimeByExternalId {
        tracker: String,
        external_id: String,
        reply: Reply<Option<Anime>>,
    },
    UpsertTracking {
        record: TrackingRecord,
        reply: Reply<i64>,
    },
    GetTracking {
        anime_id: i64,
        tracker: String,
        reply: Reply<Option<TrackingRecord>>,
    },
    GetTrackingByExternalId {
        tracker: String,
        external_id: String,
        reply: Reply<Option<TrackingRecord>>,
    },
    TrackingForTracker {
        tracker: String,
        reply: Reply<Vec<TrackingRecord>>,
    },
    TrackingForAnime {
        anime_id: i64,
        reply: Reply<Vec<TrackingRecord>>,
    },
    DeleteTracking {
        anime_id: i64,
        tracker: String,
        reply: Reply<bool>,
    },
    AddTrackedAnime {
        anime: Anime,
        record: TrackingRecord,
        reply: Reply<TrackingRecord>,
    },
    UpdateTrackedAnime {
        anime: Option<Anime>,
        record: TrackingRecord,
        reply: Reply<()>,
    },
    DeleteTrackingCascade {
        anime_id: i64,
        tracker: String,
        reply: Reply<CascadeOutcome>,
    },
    UpsertEpisodeProgress {
        progress: EpisodeProgress,
        reply: Reply<()>,
    },
    EpisodeProgressForAnime {
        anime_id: i64,
        reply: Reply<Vec<EpisodeProgress>>,
    },
    CurrentlyWatching {
        reply: Reply<Vec<Anime>>,
    },
    RecentlyWatched {
        limit: usize,
        reply: Reply<Vec<Anime>>,
    },
    SaveToken {
        service: String,
        token: StoredToken,
        reply: Reply<()>,
    },
    GetToken {
        service: String,
        reply: Reply<Option<StoredToken>>,
    },
    DeleteToken {
        service: String,
        reply: Reply<()>,
    },
    ExportJson {
        path: PathBuf,
        reply: Reply<BackupCounts>,
    },
    ImportJson {
        path: PathBuf,
        reply: Reply<BackupCounts>,
    },
    Shutdown,
}

impl DbHandle {
    /// Open the database at `path` and spawn the actor thread.
    pub fn open(path: &Path) -> Result<Self, TsuzukiError> {
        Self::spawn(Storage::open(path)?)
    }

    /// In-memory store, used by tests and dry runs.
    pub fn open_memory() -> Result<Self, TsuzukiError> {
        Self::spawn(Storage::open_memory()?)
    }

    fn spawn(storage: Storage) -> Result<Self, TsuzukiError> {
        let (tx, rx) = mpsc::unbounded_channel();

        std::thread::Builder::new()
            .name("db-actor".into())
            .spawn(move || actor_loop(storage, rx))?;

        Ok(Self { tx })
    }

    /// Stop the actor after it drains the commands already queued.
    /// Every call made afterwards fails with [`TsuzukiError::StoreClosed`].
    pub fn shutdown(&self) {
        let _ = self.tx.send(DbCommand::Shutdown);
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> DbCommand,
    ) -> Result<T, TsuzukiError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| TsuzukiError::StoreClosed)?;
        rx.await.unwrap_or(Err(TsuzukiError::StoreClosed))
    }

    // ── Config ──────────────────────────────────────────────────

    pub async fn get_config(&self, key: &str) -> Result<Option<String>, TsuzukiError> {
        let key = key.to_string();
        self.request(|reply| DbCommand::GetConfig { key, reply })
            .await
    }

    pub async fn set_config(&self, key: &str, value: &str) -> Result<(), TsuzukiError> {
        let (key, value) = (key.to_string(), value.to_string());
        self.request(|reply| DbCommand::SetConfig { key, value, reply })
            .await
    }

    pub async fn delete_config(&self, key: &str) -> Result<(), TsuzukiError> {
        let key = key.to_string();
        self.request(|reply| DbCommand::DeleteConfig { key, reply })
            .await
    }

    // ── Anime ───────────────────────────────────────────────────

    pub async fn insert_anime(&self, anime: Anime) -> Result<i64, TsuzukiError> {
        self.request(|reply| DbCommand::InsertAnime { anime, reply })
            .await
    }

    pub async fn get_anime(&self, id: i64) -> Result<Option<Anime>, TsuzukiError> {
        self.request(|reply| DbCommand::GetAnime { id, reply }).await
    }

    pub async fn update_anime(&self, anime: Anime) -> Result<(), TsuzukiError> {
        self.request(|reply| DbCommand::UpdateAnime { anime, reply })
            .await
    }

    pub async fn delete_anime(&self, id: i64) -> Result<(), TsuzukiError> {
        self.request(|reply| DbCommand::DeleteAnime { id, reply })
            .await
    }

    pub async fn search_anime(&self, query: &str) -> Result<Vec<Anime>, TsuzukiError> {
        let query = query.to_string();
        self.request(|reply| DbCommand::SearchAnime { query, reply })
            .await
    }

    pub async fn get_anime_by_external_id(
        &self,
        tracker: &str,
        external_id: &str,
    ) -> Result<Option<Anime>, TsuzukiError> {
        let (tracker, external_id) = (tracker.to_string(), external_id.to_string());
        self.request(|reply| DbCommand::GetAnimeByExternalId {
            tracker,
            external_id,
            reply,
        })
        .await
    }

    // ── Tracking ────────────────────────────────────────────────

    pub async fn upsert_tracking(&self, record: TrackingRecord) -> Result<i64, TsuzukiError> {
        self.request(|reply| DbCommand::UpsertTracking { record, reply })
            .await
    }

    pub async fn get_tracking(
        &self,
        anime_id: i64,
        tracker: &str,
    ) -> Result<Option<TrackingRecord>, TsuzukiError> {
        let tracker = tracker.to_string();
        self.request(|reply| DbCommand::GetTracking {
            anime_id,
            tracker,
            reply,
        })
        .await
    }

    pub async fn get_tracking_by_external_id(
        &self,
        tracker: &str,
        external_id: &str,
    ) -> Result<Option<TrackingRecord>, TsuzukiError> {
        let (tracker, external_id) = (tracker.to_string(), external_id.to_string());
        self.request(|reply| DbCommand::GetTrackingByExternalId {
            tracker,
            external_id,
            reply,
        })
        .await
    }

    pub async fn tracking_for_tracker(
        &self,
        tracker: &str,
    ) -> Result<Vec<TrackingRecord>, TsuzukiError> {
        let tracker = tracker.to_string();
        self.request(|reply| DbCommand::TrackingForTracker { tracker, reply })
            .await
    }

    pub async fn tracking_for_anime(
        &self,
        anime_id: i64,
    ) -> Result<Vec<TrackingRecord>, TsuzukiError> {
        self.request(|reply| DbCommand::TrackingForAnime { anime_id, reply })
            .await
    }

    pub async fn delete_tracking(&self, anime_id: i64, tracker: &str) -> Result<bool, TsuzukiError> {
        let tracker = tracker.to_string();
        self.request(|reply| DbCommand::DeleteTracking {
            anime_id,
            tracker,
            reply,
        })
        .await
    }

    pub async fn add_tracked_anime(
        &self,
        anime: Anime,
        record: TrackingRecord,
    ) -> Result<TrackingRecord, TsuzukiError> {
        self.request(|reply| DbCommand::AddTrackedAnime {
            anime,
            record,
            reply,
        })
        .await
    }

    pub async fn update_tracked_anime(
        &self,
        anime: Option<Anime>,
        record: TrackingRecord,
    ) -> Result<(), TsuzukiError> {
        self.request(|reply| DbCommand::UpdateTrackedAnime {
            anime,
            record,
            reply,
        })
        .await
    }

    pub async fn delete_tracking_cascade(
        &self,
        anime_id: i64,
        tracker: &str,
    ) -> Result<CascadeOutcome, TsuzukiError> {
        let tracker = tracker.to_string();
        self.request(|reply| DbCommand::DeleteTrackingCascade {
            anime_id,
            tracker,
            reply,
        })
        .await
    }

    // ── Episode progress ────────────────────────────────────────

    pub async fn upsert_episode_progress(
        &self,
        progress: EpisodeProgress,
    ) -> Result<(), TsuzukiError> {
        self.request(|reply| DbCommand::UpsertEpisodeProgress { progress, reply })
            .await
    }

    pub async fn episode_progress_for_anime(
        &self,
        anime_id: i64,
    ) -> Result<Vec<EpisodeProgress>, TsuzukiError> {
        self.request(|reply| DbCommand::EpisodeProgressForAnime { anime_id, reply })
            .await
    }

    pub async fn currently_watching(&self) -> Result<Vec<Anime>, TsuzukiError> {
        self.request(|reply| DbCommand::CurrentlyWatching { reply })
            .await
    }

    pub async fn recently_watched(&self, limit: usize) -> Result<Vec<Anime>, TsuzukiError> {
        self.request(|reply| DbCommand::RecentlyWatched { limit, reply })
            .await
    }

    // ── Auth tokens ─────────────────────────────────────────────

    pub async fn save_token(&self, service: &str, token: StoredToken) -> Result<(), TsuzukiError> {
        let service = service.to_string();
        self.request(|reply| DbCommand::SaveToken {
            service,
            token,
            reply,
        })
        .await
    }

    pub async fn get_token(&self, service: &str) -> Result<Option<StoredToken>, TsuzukiError> {
        let service = service.to_string();
        self.request(|reply| DbCommand::GetToken { service, reply })
            .await
    }

    pub async fn delete_token(&self, service: &str) -> Result<(), TsuzukiError> {
        let service = service.to_string();
        self.request(|reply| DbCommand::DeleteToken { service, reply })
            .await
    }

    // ── Backup ──────────────────────────────────────────────────

    pub async fn export_json(&self, path: &Path) -> Result<BackupCounts, TsuzukiError> {
        let path = path.to_path_buf();
        self.request(|reply| DbCommand::ExportJson { path, reply })
            .await
    }

    pub async fn import_json(&self, path: &Path) -> Result<BackupCounts, TsuzukiError> {
        let path = path.to_path_buf();
        self.request(|reply| DbCommand::ImportJson { path, reply })
            .await
    }
}

fn actor_loop(storage: Storage, mut rx: mpsc::UnboundedReceiver<DbCommand>) {
    while let Some(cmd) = rx.blocking_recv() {
        match cmd {
            DbCommand::GetConfig { key, reply } => {
                let _ = reply.send(storage.get_config(&key));
            }
            DbCommand::SetConfig { key, value, reply } => {
                let _ = reply.send(storage.set_config(&key, &value));
            }
            DbCommand::DeleteConfig { key, reply } => {
                let _ = reply.send(storage.delete_config(&key));
            }
            DbCommand::InsertAnime { anime, reply } => {
                let _ = reply.send(storage.insert_anime(&anime));
            }
            DbCommand::GetAnime { id, reply } => {
                let _ = reply.send(storage.get_anime(id));
            }
            DbCommand::UpdateAnime { anime, reply } => {
                let _ = reply.send(storage.update_anime(&anime));
            }
            DbCommand::DeleteAnime { id, reply } => {
                let _ = reply.send(storage.delete_anime(id));
            }
            DbCommand::SearchAnime { query, reply } => {
                let _ = reply.send(storage.search_anime(&query));
            }
            DbCommand::GetAnimeByExternalId {
                tracker,
                external_id,
                reply,
            } => {
                let _ = reply.send(storage.get_anime_by_external_id(&tracker, &external_id));
            }
            DbCommand::UpsertTracking { record, reply } => {
                let _ = reply.send(storage.upsert_tracking(&record));
            }
            DbCommand::GetTracking {
                anime_id,
                tracker,
                reply,
            } => {
                let _ = reply.send(storage.get_tracking(anime_id, &tracker));
            }
            DbCommand::GetTrackingByExternalId {
                tracker,
                external_id,
                reply,
            } => {
                let _ = reply.send(storage.get_tracking_by_external_id(&tracker, &external_id));
            }
            DbCommand::TrackingForTracker { tracker, reply } => {
                let _ = reply.send(storage.tracking_for_tracker(&tracker));
            }
            DbCommand::TrackingForAnime { anime_id, reply } => {
                let _ = reply.send(storage.tracking_for_anime(anime_id));
            }
            DbCommand::DeleteTracking {
                anime_id,
                tracker,
                reply,
            } => {
                let _ = reply.send(storage.delete_tracking(anime_id, &tracker));
            }
            DbCommand::AddTrackedAnime {
                anime,
                record,
                reply,
            } => {
                let _ = reply.send(storage.add_tracked_anime(&anime, &record));
            }
            DbCommand::UpdateTrackedAnime {
                anime,
                record,
                reply,
            } => {
                let _ = reply.send(storage.update_tracked_anime(anime.as_ref(), &record));
            }
            DbCommand::DeleteTrackingCascade {
                anime_id,
                tracker,
                reply,
            } => {
                let _ = reply.send(storage.delete_tracking_cascade(anime_id, &tracker));
            }
            DbCommand::UpsertEpisodeProgress { progress, reply } => {
                let _ = reply.send(storage.upsert_episode_progress(&progress));
            }
            DbCommand::EpisodeProgressForAnime { anime_id, reply } => {
                let _ = reply.send(storage.episode_progress_for_anime(anime_id));
            }
            DbCommand::CurrentlyWatching { reply } => {
                let _ = reply.send(storage.currently_watching());
            }
            DbCommand::RecentlyWatched { limit, reply } => {
                let _ = reply.send(storage.recently_watched(limit));
            }
            DbCommand::SaveToken {
                service,
                token,
                reply,
            } => {
                let _ = reply.send(storage.save_token(&service, &token));
            }
            DbCommand::GetToken { service, reply } => {
                let _ = reply.send(storage.get_token(&service));
            }
            DbCommand::DeleteToken { service, reply } => {
                let _ = reply.send(storage.delete_token(&service));
            }
            DbCommand::ExportJson { path, reply } => {
                let _ = reply.send(storage.export_json(&path));
            }
            DbCommand::ImportJson { path, reply } => {
                let _ = reply.send(storage.import_json(&path));
            }
            DbCommand::Shutdown => {
                tracing::debug!("db actor shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip_through_actor() {
        let db = DbHandle::open_memory().unwrap();
        db.set_config("active_tracker", "anilist").await.unwrap();
        assert_eq!(
            db.get_config("active_tracker").await.unwrap().as_deref(),
            Some("anilist")
        );

        let stored = db
            .add_tracked_anime(
                Anime {
                    title: "Frieren".into(),
                    ..Default::default()
                },
                TrackingRecord::new(0, "anilist", "154587"),
            )
            .await
            .unwrap();
        let found = db
            .get_anime_by_external_id("anilist", "154587")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, stored.anime_id);
    }

    #[tokio::test]
    async fn test_backup_through_actor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        let db = DbHandle::open_memory().unwrap();
        db.add_tracked_anime(
            Anime {
                title: "Frieren".into(),
                ..Default::default()
            },
            TrackingRecord::new(0, "anilist", "154587"),
        )
        .await
        .unwrap();
        let written = db.export_json(&path).await.unwrap();
        assert_eq!(written.tracking, 1);

        let restored = DbHandle::open_memory().unwrap();
        assert_eq!(restored.import_json(&path).await.unwrap(), written);
        assert!(restored
            .get_anime_by_external_id("anilist", "154587")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_calls_after_shutdown_report_store_closed() {
        let db = DbHandle::open_memory().unwrap();
        let other = db.clone();
        db.shutdown();

        let err = other.get_config("anything").await.unwrap_err();
        assert!(err.is_unreachable());
    }
}
