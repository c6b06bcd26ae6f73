//! Scripted tracker and fixtures shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use tsuzuki_core::models::WatchStatus;
use tsuzuki_sync::{AnimeInfo, StatusUpdate, Tracker, TrackerError, UserAnimeEntry};

/// A remote tracker whose list and failures are set by the test.
pub struct MockTracker {
    name: String,
    authenticated: AtomicBool,
    entries: Mutex<Vec<UserAnimeEntry>>,
    pushes: Mutex<Vec<(String, StatusUpdate)>>,
    failing_pushes: Mutex<HashSet<String>>,
    list_fails: AtomicBool,
    list_calls: AtomicUsize,
    hang_pushes: AtomicBool,
    whole_episodes: bool,
}

impl MockTracker {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            authenticated: AtomicBool::new(true),
            entries: Mutex::new(Vec::new()),
            pushes: Mutex::new(Vec::new()),
            failing_pushes: Mutex::new(HashSet::new()),
            list_fails: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
            hang_pushes: AtomicBool::new(false),
            whole_episodes: false,
        }
    }

    /// Behave like a service that only stores whole episodes.
    pub fn whole_episodes(mut self) -> Self {
        self.whole_episodes = true;
        self
    }

    pub fn with_entries(self, entries: Vec<UserAnimeEntry>) -> Self {
        self.set_entries(entries);
        self
    }

    pub fn set_entries(&self, entries: Vec<UserAnimeEntry>) {
        *self.entries.lock().unwrap() = entries;
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }

    pub fn fail_list(&self, fail: bool) {
        self.list_fails.store(fail, Ordering::SeqCst);
    }

    /// Pushes never complete, like a server that accepted the connection and went silent.
    pub fn hang_pushes(&self) {
        self.hang_pushes.store(true, Ordering::SeqCst);
    }

    pub fn fail_push_for(&self, external_id: &str) {
        self.failing_pushes
            .lock()
            .unwrap()
            .insert(external_id.to_string());
    }

    /// Every push attempted, including the ones that failed.
    pub fn pushes(&self) -> Vec<(String, StatusUpdate)> {
        self.pushes.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tracker for MockTracker {
    fn name(&self) -> &str {
        &self.name
    }

    fn counts_whole_episodes(&self) -> bool {
        self.whole_episodes
    }

    async fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn authenticate(&self, _cancel: &CancellationToken) -> Result<(), TrackerError> {
        self.set_authenticated(true);
        Ok(())
    }

    async fn search_anime(&self, query: &str, limit: u32) -> Result<Vec<AnimeInfo>, TrackerError> {
        let query = query.to_lowercase();
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.info.title.to_lowercase().contains(&query))
            .take(limit as usize)
            .map(|e| e.info.clone())
            .collect())
    }

    async fn get_anime_details(&self, external_id: &str) -> Result<AnimeInfo, TrackerError> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.external_id() == external_id)
            .map(|e| e.info.clone())
            .ok_or_else(|| TrackerError::RemoteApi {
                tracker: self.name.clone(),
                message: format!("no anime {external_id}"),
            })
    }

    async fn get_user_anime_list(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<Vec<UserAnimeEntry>, TrackerError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.list_fails.load(Ordering::SeqCst) {
            return Err(TrackerError::RemoteApi {
                tracker: self.name.clone(),
                message: "503 Service Unavailable".into(),
            });
        }
        Ok(self.entries.lock().unwrap().clone())
    }

    async fn update_anime_status(
        &self,
        external_id: &str,
        update: StatusUpdate,
    ) -> Result<(), TrackerError> {
        self.pushes
            .lock()
            .unwrap()
            .push((external_id.to_string(), update));
        if self.hang_pushes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.failing_pushes.lock().unwrap().contains(external_id) {
            return Err(TrackerError::RemoteApi {
                tracker: self.name.clone(),
                message: format!("rejected update for {external_id}"),
            });
        }
        Ok(())
    }
}

/// Whole-second timestamp in 2024, `offset_hours` after the first of January.
pub fn at(offset_hours: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::hours(offset_hours)
}

pub fn entry(external_id: &str, title: &str, progress: f64, last_updated: DateTime<Utc>) -> UserAnimeEntry {
    UserAnimeEntry {
        info: AnimeInfo {
            external_id: external_id.to_string(),
            title: title.to_string(),
            total_episodes: Some(12),
            ..Default::default()
        },
        status: WatchStatus::Watching,
        score: 0.0,
        progress,
        last_updated,
    }
}
