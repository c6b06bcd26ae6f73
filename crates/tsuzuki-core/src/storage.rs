use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::TsuzukiError;
use crate::models::{Anime, EpisodeProgress, TrackingRecord, WatchStatus};

const SCHEMA_V1: &str = include_str!("../../../migrations/001_initial.sql");
const SCHEMA_V2: &str = include_str!("../../../migrations/002_auth_tokens.sql");

const ANIME_COLUMNS: &str = "id, title, original_title, alternative_titles, synopsis,
     total_episodes, media_type, year, season, airing_status, genres, thumbnail_url";

const TRACKING_COLUMNS: &str = "id, anime_id, tracker, external_id, status, score,
     progress, total_episodes, last_updated";

/// SQLite-backed storage for the tsuzuki ledger.
pub struct Storage {
    conn: Connection,
}

/// Persisted OAuth credentials for one service.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// What a cascading tracking delete removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeOutcome {
    pub tracking_deleted: bool,
    pub anime_deleted: bool,
}

pub const BACKUP_VERSION: u32 = 1;

/// Portable JSON snapshot of the ledger.
///
/// Auth tokens are never included. Rows keep their IDs so tracking and
/// episode rows still point at the right anime after an import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    #[serde(default)]
    pub anime: Vec<Anime>,
    #[serde(default)]
    pub tracking: Vec<TrackingRecord>,
    #[serde(default)]
    pub episode_progress: Vec<EpisodeProgress>,
}

/// Row counts of a backup, per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackupCounts {
    pub config: usize,
    pub anime: usize,
    pub tracking: usize,
    pub episode_progress: usize,
}

impl Backup {
    pub fn counts(&self) -> BackupCounts {
        BackupCounts {
            config: self.config.len(),
            anime: self.anime.len(),
            tracking: self.tracking.len(),
            episode_progress: self.episode_progress.len(),
        }
    }
}

impl std::fmt::Display for BackupCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} anime, {} tracking rows, {} episode progress rows, {} settings",
            self.anime, self.tracking, self.episode_progress, self.config
        )
    }
}

impl Storage {
    /// Open (or create) the database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self, TsuzukiError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self, TsuzukiError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        run_migrations(&conn)?;
        Ok(Self { conn })
    }

    // ── Config ──────────────────────────────────────────────────

    /// Read a config value. A missing key is `None`, not an error.
    pub fn get_config(&self, key: &str) -> Result<Option<String>, TsuzukiError> {
        self.conn
            .query_row(
                "SELECT value FROM config WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn set_config(&self, key: &str, value: &str) -> Result<(), TsuzukiError> {
        self.conn.execute(
            "INSERT INTO config (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn delete_config(&self, key: &str) -> Result<(), TsuzukiError> {
        self.conn
            .execute("DELETE FROM config WHERE key = ?1", params![key])?;
        Ok(())
    }

    // ── Anime CRUD ──────────────────────────────────────────────

    /// Insert a new anime, returning its auto-generated ID.
    pub fn insert_anime(&self, anime: &Anime) -> Result<i64, TsuzukiError> {
        insert_anime(&self.conn, anime)
    }

    /// Get an anime by its local database ID.
    pub fn get_anime(&self, id: i64) -> Result<Option<Anime>, TsuzukiError> {
        self.conn
            .query_row(
                &format!("SELECT {ANIME_COLUMNS} FROM anime WHERE id = ?1"),
                params![id],
                |row| Ok(row_to_anime(row)),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Overwrite the metadata of an existing anime.
    pub fn update_anime(&self, anime: &Anime) -> Result<(), TsuzukiError> {
        update_anime(&self.conn, anime)
    }

    pub fn delete_anime(&self, id: i64) -> Result<(), TsuzukiError> {
        self.conn
            .execute("DELETE FROM anime WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Search anime by title substring (case-insensitive).
    pub fn search_anime(&self, query: &str) -> Result<Vec<Anime>, TsuzukiError> {
        let pattern = format!("%{query}%");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ANIME_COLUMNS} FROM anime
             WHERE title LIKE ?1 OR original_title LIKE ?1 OR alternative_titles LIKE ?1
             ORDER BY title"
        ))?;
        let rows = stmt
            .query_map(params![pattern], |row| Ok(row_to_anime(row)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Get all anime in the database.
    pub fn all_anime(&self) -> Result<Vec<Anime>, TsuzukiError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {ANIME_COLUMNS} FROM anime ORDER BY title"))?;
        let rows = stmt
            .query_map([], |row| Ok(row_to_anime(row)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Find the anime a tracker knows under `external_id`.
    pub fn get_anime_by_external_id(
        &self,
        tracker: &str,
        external_id: &str,
    ) -> Result<Option<Anime>, TsuzukiError> {
        match find_anime_id_by_external(&self.conn, tracker, external_id)? {
            Some(id) => self.get_anime(id),
            None => Ok(None),
        }
    }

    // ── Tracking CRUD ───────────────────────────────────────────

    /// Insert or update the tracking row for `(anime_id, tracker)`.
    pub fn upsert_tracking(&self, record: &TrackingRecord) -> Result<i64, TsuzukiError> {
        upsert_tracking(&self.conn, record)
    }

    pub fn get_tracking(
        &self,
        anime_id: i64,
        tracker: &str,
    ) -> Result<Option<TrackingRecord>, TsuzukiError> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {TRACKING_COLUMNS} FROM anime_tracking
                     WHERE anime_id = ?1 AND tracker = ?2"
                ),
                params![anime_id, tracker],
                |row| Ok(row_to_tracking(row)),
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn get_tracking_by_external_id(
        &self,
        tracker: &str,
        external_id: &str,
    ) -> Result<Option<TrackingRecord>, TsuzukiError> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {TRACKING_COLUMNS} FROM anime_tracking
                     WHERE tracker = ?1 AND external_id = ?2"
                ),
                params![tracker, external_id],
                |row| Ok(row_to_tracking(row)),
            )
            .optional()
            .map_err(Into::into)
    }

    /// All tracking rows owned by one tracker, ordered by row ID.
    pub fn tracking_for_tracker(&self, tracker: &str) -> Result<Vec<TrackingRecord>, TsuzukiError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TRACKING_COLUMNS} FROM anime_tracking WHERE tracker = ?1 ORDER BY id"
        ))?;
        let rows = stmt
            .query_map(params![tracker], |row| Ok(row_to_tracking(row)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every tracker's row for one anime.
    pub fn tracking_for_anime(&self, anime_id: i64) -> Result<Vec<TrackingRecord>, TsuzukiError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TRACKING_COLUMNS} FROM anime_tracking WHERE anime_id = ?1 ORDER BY tracker"
        ))?;
        let rows = stmt
            .query_map(params![anime_id], |row| Ok(row_to_tracking(row)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete one tracking row without touching the anime. Returns whether a row existed.
    pub fn delete_tracking(&self, anime_id: i64, tracker: &str) -> Result<bool, TsuzukiError> {
        let n = self.conn.execute(
            "DELETE FROM anime_tracking WHERE anime_id = ?1 AND tracker = ?2",
            params![anime_id, tracker],
        )?;
        Ok(n > 0)
    }

    // ── Reconciliation writes ───────────────────────────────────
    //
    // Each of these is a single transaction so an interrupted pass never
    // leaves an anime without its tracking row or the reverse.

    /// Record a title first reported by `record.tracker`.
    ///
    /// Reuses the anime already tracked under `(tracker, external_id)` if there
    /// is one (refreshing its metadata), otherwise inserts it. Returns the
    /// stored tracking record.
    pub fn add_tracked_anime(
        &self,
        anime: &Anime,
        record: &TrackingRecord,
    ) -> Result<TrackingRecord, TsuzukiError> {
        let tx = self.conn.unchecked_transaction()?;

        let existing = if record.external_id.is_empty() {
            None
        } else {
            find_anime_id_by_external(&tx, &record.tracker, &record.external_id)?
        };
        let anime_id = match existing {
            Some(id) => {
                update_anime(&tx, &Anime { id, ..anime.clone() })?;
                id
            }
            None => insert_anime(&tx, anime)?,
        };

        let mut stored = record.clone();
        stored.anime_id = anime_id;
        stored.id = upsert_tracking(&tx, &stored)?;

        tx.commit()?;
        Ok(stored)
    }

    /// Overwrite a tracking row and, optionally, its anime's metadata.
    pub fn update_tracked_anime(
        &self,
        anime: Option<&Anime>,
        record: &TrackingRecord,
    ) -> Result<(), TsuzukiError> {
        let tx = self.conn.unchecked_transaction()?;
        if let Some(anime) = anime {
            update_anime(&tx, &Anime { id: record.anime_id, ..anime.clone() })?;
        }
        upsert_tracking(&tx, record)?;
        tx.commit()?;
        Ok(())
    }

    /// Delete a tracking row, then the anime itself if no tracker references it anymore.
    pub fn delete_tracking_cascade(
        &self,
        anime_id: i64,
        tracker: &str,
    ) -> Result<CascadeOutcome, TsuzukiError> {
        let tx = self.conn.unchecked_transaction()?;

        let removed = tx.execute(
            "DELETE FROM anime_tracking WHERE anime_id = ?1 AND tracker = ?2",
            params![anime_id, tracker],
        )?;

        let remaining: i64 = tx.query_row(
            "SELECT COUNT(*) FROM anime_tracking WHERE anime_id = ?1",
            params![anime_id],
            |row| row.get(0),
        )?;

        let anime_deleted = if remaining == 0 {
            tx.execute("DELETE FROM anime WHERE id = ?1", params![anime_id])? > 0
        } else {
            false
        };

        tx.commit()?;
        Ok(CascadeOutcome {
            tracking_deleted: removed > 0,
            anime_deleted,
        })
    }

    // ── Episode progress ────────────────────────────────────────

    pub fn upsert_episode_progress(&self, progress: &EpisodeProgress) -> Result<(), TsuzukiError> {
        self.conn.execute(
            "INSERT INTO episode_progress (anime_id, episode_number, position, duration,
             playback_speed, watched, source_id, last_watched)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(anime_id, episode_number) DO UPDATE SET
               position = excluded.position,
               duration = excluded.duration,
               playback_speed = excluded.playback_speed,
               watched = excluded.watched,
               source_id = excluded.source_id,
               last_watched = excluded.last_watched",
            params![
                progress.anime_id,
                progress.episode,
                progress.position,
                progress.duration,
                progress.playback_speed,
                progress.watched as i32,
                progress.source_id,
                progress.last_watched.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_episode_progress(
        &self,
        anime_id: i64,
        episode: f64,
    ) -> Result<Option<EpisodeProgress>, TsuzukiError> {
        self.conn
            .query_row(
                "SELECT id, anime_id, episode_number, position, duration, playback_speed,
                        watched, source_id, last_watched
                 FROM episode_progress WHERE anime_id = ?1 AND episode_number = ?2",
                params![anime_id, episode],
                |row| Ok(row_to_episode_progress(row)),
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn episode_progress_for_anime(
        &self,
        anime_id: i64,
    ) -> Result<Vec<EpisodeProgress>, TsuzukiError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, anime_id, episode_number, position, duration, playback_speed,
                    watched, source_id, last_watched
             FROM episode_progress WHERE anime_id = ?1 ORDER BY episode_number",
        )?;
        let rows = stmt
            .query_map(params![anime_id], |row| Ok(row_to_episode_progress(row)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn delete_episode_progress(&self, anime_id: i64, episode: f64) -> Result<(), TsuzukiError> {
        self.conn.execute(
            "DELETE FROM episode_progress WHERE anime_id = ?1 AND episode_number = ?2",
            params![anime_id, episode],
        )?;
        Ok(())
    }

    /// Anime with at least one `watching` tracking row, most recently touched first.
    pub fn currently_watching(&self) -> Result<Vec<Anime>, TsuzukiError> {
        let mut stmt = self.conn.prepare(
            "SELECT a.id, a.title, a.original_title, a.alternative_titles, a.synopsis,
                    a.total_episodes, a.media_type, a.year, a.season, a.airing_status,
                    a.genres, a.thumbnail_url
             FROM anime a
             JOIN anime_tracking t ON t.anime_id = a.id
             WHERE t.status = 'watching'
             GROUP BY a.id
             ORDER BY MAX(t.last_updated) DESC",
        )?;
        let rows = stmt
            .query_map([], |row| Ok(row_to_anime(row)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Anime ordered by their latest episode playback.
    pub fn recently_watched(&self, limit: usize) -> Result<Vec<Anime>, TsuzukiError> {
        let mut stmt = self.conn.prepare(
            "SELECT a.id, a.title, a.original_title, a.alternative_titles, a.synopsis,
                    a.total_episodes, a.media_type, a.year, a.season, a.airing_status,
                    a.genres, a.thumbnail_url
             FROM anime a
             JOIN episode_progress ep ON ep.anime_id = a.id
             GROUP BY a.id
             ORDER BY MAX(ep.last_watched) DESC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| Ok(row_to_anime(row)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    // ── Auth tokens ─────────────────────────────────────────────

    pub fn save_token(&self, service: &str, token: &StoredToken) -> Result<(), TsuzukiError> {
        self.conn.execute(
            "INSERT INTO auth_token (service, access_token, refresh_token, expires_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, datetime('now'))
             ON CONFLICT(service) DO UPDATE SET
               access_token = excluded.access_token,
               refresh_token = excluded.refresh_token,
               expires_at = excluded.expires_at,
               updated_at = datetime('now')",
            params![
                service,
                token.access_token,
                token.refresh_token,
                token.expires_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn get_token(&self, service: &str) -> Result<Option<StoredToken>, TsuzukiError> {
        self.conn
            .query_row(
                "SELECT access_token, refresh_token, expires_at FROM auth_token WHERE service = ?1",
                params![service],
                |row| {
                    let expires: Option<String> = row.get(2)?;
                    Ok(StoredToken {
                        access_token: row.get(0)?,
                        refresh_token: row.get(1)?,
                        expires_at: expires.as_deref().map(parse_datetime),
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn delete_token(&self, service: &str) -> Result<(), TsuzukiError> {
        self.conn
            .execute("DELETE FROM auth_token WHERE service = ?1", params![service])?;
        Ok(())
    }

    // ── Backup ──────────────────────────────────────────────────

    pub fn all_config(&self) -> Result<BTreeMap<String, String>, TsuzukiError> {
        let mut stmt = self.conn.prepare("SELECT key, value FROM config")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(rows)
    }

    pub fn all_tracking(&self) -> Result<Vec<TrackingRecord>, TsuzukiError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TRACKING_COLUMNS} FROM anime_tracking ORDER BY id"
        ))?;
        let rows = stmt
            .query_map([], |row| Ok(row_to_tracking(row)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn all_episode_progress(&self) -> Result<Vec<EpisodeProgress>, TsuzukiError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, anime_id, episode_number, position, duration, playback_speed,
                    watched, source_id, last_watched
             FROM episode_progress ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| Ok(row_to_episode_progress(row)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Snapshot every table except auth tokens.
    pub fn export_backup(&self) -> Result<Backup, TsuzukiError> {
        Ok(Backup {
            version: BACKUP_VERSION,
            created_at: Utc::now(),
            config: self.all_config()?,
            anime: self.all_anime()?,
            tracking: self.all_tracking()?,
            episode_progress: self.all_episode_progress()?,
        })
    }

    /// Merge a backup into the store in one transaction.
    ///
    /// Rows are matched by ID; anime present in the store but absent from the
    /// backup are left alone.
    pub fn import_backup(&self, backup: &Backup) -> Result<BackupCounts, TsuzukiError> {
        if backup.version > BACKUP_VERSION {
            return Err(TsuzukiError::UnsupportedBackup(backup.version));
        }

        let tx = self.conn.unchecked_transaction()?;
        for (key, value) in &backup.config {
            tx.execute(
                "INSERT INTO config (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
                params![key, value],
            )?;
        }
        for anime in &backup.anime {
            restore_anime(&tx, anime)?;
        }
        for record in &backup.tracking {
            tx.execute(
                &format!(
                    "INSERT OR REPLACE INTO anime_tracking ({TRACKING_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    record.id,
                    record.anime_id,
                    record.tracker,
                    record.external_id,
                    record.status.as_db_str(),
                    record.score,
                    record.progress,
                    record.total_episodes,
                    record.last_updated.to_rfc3339(),
                ],
            )?;
        }
        for progress in &backup.episode_progress {
            tx.execute(
                "INSERT OR REPLACE INTO episode_progress (id, anime_id, episode_number,
                 position, duration, playback_speed, watched, source_id, last_watched)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    progress.id,
                    progress.anime_id,
                    progress.episode,
                    progress.position,
                    progress.duration,
                    progress.playback_speed,
                    progress.watched as i32,
                    progress.source_id,
                    progress.last_watched.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;

        let counts = backup.counts();
        tracing::info!(%counts, "backup imported");
        Ok(counts)
    }

    /// Write [`Storage::export_backup`] to `path` as pretty-printed JSON.
    pub fn export_json(&self, path: &Path) -> Result<BackupCounts, TsuzukiError> {
        let backup = self.export_backup()?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&backup)?)?;
        tracing::info!(path = %path.display(), "backup written");
        Ok(backup.counts())
    }

    pub fn import_json(&self, path: &Path) -> Result<BackupCounts, TsuzukiError> {
        let contents = std::fs::read_to_string(path)?;
        let backup: Backup = serde_json::from_str(&contents)?;
        self.import_backup(&backup)
    }
}

// ── Statement helpers shared by plain and transactional writes ──

fn insert_anime(conn: &Connection, anime: &Anime) -> Result<i64, TsuzukiError> {
    conn.execute(
        "INSERT INTO anime (title, original_title, alternative_titles, synopsis,
         total_episodes, media_type, year, season, airing_status, genres, thumbnail_url)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            anime.title,
            anime.original_title,
            serde_json::to_string(&anime.alternative_titles)?,
            anime.synopsis,
            anime.total_episodes,
            anime.media_type,
            anime.year,
            anime.season,
            anime.airing_status,
            serde_json::to_string(&anime.genres)?,
            anime.thumbnail_url,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn update_anime(conn: &Connection, anime: &Anime) -> Result<(), TsuzukiError> {
    let n = conn.execute(
        "UPDATE anime SET
            title = ?1, original_title = ?2, alternative_titles = ?3, synopsis = ?4,
            total_episodes = ?5, media_type = ?6, year = ?7, season = ?8,
            airing_status = ?9, genres = ?10, thumbnail_url = ?11,
            updated_at = datetime('now')
         WHERE id = ?12",
        params![
            anime.title,
            anime.original_title,
            serde_json::to_string(&anime.alternative_titles)?,
            anime.synopsis,
            anime.total_episodes,
            anime.media_type,
            anime.year,
            anime.season,
            anime.airing_status,
            serde_json::to_string(&anime.genres)?,
            anime.thumbnail_url,
            anime.id,
        ],
    )?;
    if n == 0 {
        return Err(TsuzukiError::NotFound(format!("anime {}", anime.id)));
    }
    Ok(())
}

/// Insert or overwrite an anime under its own ID. Never deletes, so its
/// tracking rows survive.
fn restore_anime(conn: &Connection, anime: &Anime) -> Result<(), TsuzukiError> {
    conn.execute(
        &format!(
            "INSERT INTO anime ({ANIME_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO UPDATE SET
               title = excluded.title,
               original_title = excluded.original_title,
               alternative_titles = excluded.alternative_titles,
               synopsis = excluded.synopsis,
               total_episodes = excluded.total_episodes,
               media_type = excluded.media_type,
               year = excluded.year,
               season = excluded.season,
               airing_status = excluded.airing_status,
               genres = excluded.genres,
               thumbnail_url = excluded.thumbnail_url,
               updated_at = datetime('now')"
        ),
        params![
            anime.id,
            anime.title,
            anime.original_title,
            serde_json::to_string(&anime.alternative_titles)?,
            anime.synopsis,
            anime.total_episodes,
            anime.media_type,
            anime.year,
            anime.season,
            anime.airing_status,
            serde_json::to_string(&anime.genres)?,
            anime.thumbnail_url,
        ],
    )?;
    Ok(())
}

fn find_anime_id_by_external(
    conn: &Connection,
    tracker: &str,
    external_id: &str,
) -> Result<Option<i64>, TsuzukiError> {
    conn.query_row(
        "SELECT anime_id FROM anime_tracking WHERE tracker = ?1 AND external_id = ?2",
        params![tracker, external_id],
        |row| row.get(0),
    )
    .optional()
    .map_err(Into::into)
}

fn upsert_tracking(conn: &Connection, record: &TrackingRecord) -> Result<i64, TsuzukiError> {
    conn.execute(
        "INSERT INTO anime_tracking (anime_id, tracker, external_id, status, score,
         progress, total_episodes, last_updated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(anime_id, tracker) DO UPDATE SET
           external_id = excluded.external_id,
           status = excluded.status,
           score = excluded.score,
           progress = excluded.progress,
           total_episodes = excluded.total_episodes,
           last_updated = excluded.last_updated",
        params![
            record.anime_id,
            record.tracker,
            record.external_id,
            record.status.as_db_str(),
            record.score,
            record.progress,
            record.total_episodes,
            record.last_updated.to_rfc3339(),
        ],
    )?;
    // last_insert_rowid() is stale when the conflict branch ran.
    conn.query_row(
        "SELECT id FROM anime_tracking WHERE anime_id = ?1 AND tracker = ?2",
        params![record.anime_id, record.tracker],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

// ── Migrations ──────────────────────────────────────────────────

/// Run schema migrations using `PRAGMA user_version` for version tracking.
fn run_migrations(conn: &Connection) -> Result<(), TsuzukiError> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        conn.execute_batch(SCHEMA_V1)?;
        conn.pragma_update(None, "user_version", 1)?;
        tracing::debug!("applied schema v1");
    }
    if version < 2 {
        conn.execute_batch(SCHEMA_V2)?;
        conn.pragma_update(None, "user_version", 2)?;
        tracing::debug!("applied schema v2");
    }
    Ok(())
}

// ── Helpers ─────────────────────────────────────────────────────

/// Parse a datetime string from SQLite (either RFC 3339 or SQLite's `datetime('now')` format).
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return naive.and_utc();
    }
    DateTime::default()
}

// ── Row mapping helpers ─────────────────────────────────────────

fn row_to_anime(row: &rusqlite::Row<'_>) -> Anime {
    let alt_str: String = row.get(3).unwrap_or_default();
    let genres_str: String = row.get(10).unwrap_or_default();

    Anime {
        id: row.get(0).unwrap_or(0),
        title: row.get(1).unwrap_or_default(),
        original_title: row.get(2).unwrap_or(None),
        alternative_titles: serde_json::from_str(&alt_str).unwrap_or_default(),
        synopsis: row.get(4).unwrap_or(None),
        total_episodes: row.get(5).unwrap_or(None),
        media_type: row.get(6).unwrap_or(None),
        year: row.get(7).unwrap_or(None),
        season: row.get(8).unwrap_or(None),
        airing_status: row.get(9).unwrap_or(None),
        genres: serde_json::from_str(&genres_str).unwrap_or_default(),
        thumbnail_url: row.get(11).unwrap_or(None),
    }
}

fn row_to_tracking(row: &rusqlite::Row<'_>) -> TrackingRecord {
    let status_str: String = row.get(4).unwrap_or_default();
    let updated_str: String = row.get(8).unwrap_or_default();

    TrackingRecord {
        id: row.get(0).unwrap_or(0),
        anime_id: row.get(1).unwrap_or(0),
        tracker: row.get(2).unwrap_or_default(),
        external_id: row.get(3).unwrap_or_default(),
        status: WatchStatus::from_db_str(&status_str).unwrap_or(WatchStatus::Watching),
        score: row.get(5).unwrap_or(0.0),
        progress: row.get(6).unwrap_or(0.0),
        total_episodes: row.get(7).unwrap_or(None),
        last_updated: parse_datetime(&updated_str),
    }
}

fn row_to_episode_progress(row: &rusqlite::Row<'_>) -> EpisodeProgress {
    let watched_str: String = row.get(8).unwrap_or_default();

    EpisodeProgress {
        id: row.get(0).unwrap_or(0),
        anime_id: row.get(1).unwrap_or(0),
        episode: row.get(2).unwrap_or(0.0),
        position: row.get(3).unwrap_or(0),
        duration: row.get(4).unwrap_or(0),
        playback_speed: row.get(5).unwrap_or(1.0),
        watched: row.get::<_, i32>(6).unwrap_or(0) != 0,
        source_id: row.get(7).unwrap_or(None),
        last_watched: parse_datetime(&watched_str),
    }
}
