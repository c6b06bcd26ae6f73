//! Tracker adapter over a remote service client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use tsuzuki_api::anilist::AniListProvider;
use tsuzuki_api::mal::MalProvider;
use tsuzuki_api::{
    AnimeSearchResult, AnimeService, LibraryEntryUpdate, ServiceError, ServiceProvider,
    TokenGrant, UserListEntry,
};
use tsuzuki_core::models::WatchStatus;
use tsuzuki_core::storage::StoredToken;

use crate::auth::Session;
use crate::db::DbHandle;
use crate::error::TrackerError;
use crate::tracker::{AnimeInfo, StatusUpdate, Tracker, UserAnimeEntry};

pub type AniListTracker = RemoteTracker<AniListProvider>;
pub type MalTracker = RemoteTracker<MalProvider>;

/// A [`Tracker`] backed by one remote service.
///
/// The session is loaded from the store on first use and refreshed
/// transparently when the service issued a refresh token.
pub struct RemoteTracker<P: ServiceProvider> {
    provider: P,
    db: DbHandle,
    session: Mutex<Option<Session>>,
}

impl<P: ServiceProvider> RemoteTracker<P> {
    pub fn new(provider: P, db: DbHandle) -> Self {
        Self {
            provider,
            db,
            session: Mutex::new(None),
        }
    }

    async fn loaded<'a>(
        &self,
        guard: &'a mut Option<Session>,
    ) -> Result<&'a mut Session, TrackerError> {
        if guard.is_none() {
            let token = self.db.get_token(P::NAME).await?;
            tracing::debug!(tracker = P::NAME, has_token = token.is_some(), "session loaded");
            *guard = Some(Session::restore(token, Utc::now()));
        }
        Ok(guard.get_or_insert_with(Session::default))
    }

    async fn store_grant(&self, session: &mut Session, grant: TokenGrant) -> Result<(), TrackerError> {
        let token = StoredToken {
            access_token: grant.access_token.clone(),
            refresh_token: grant
                .refresh_token
                .clone()
                .or_else(|| session.refresh_token().map(str::to_string)),
            expires_at: grant.expires_at(Utc::now()),
        };
        self.db.save_token(P::NAME, token.clone()).await?;
        session.complete(token);
        Ok(())
    }

    /// Try a refresh. Leaves the session unauthenticated when it fails.
    async fn refresh(&self, session: &mut Session) -> Result<(), TrackerError> {
        let Some(refresh_token) = session.refresh_token().map(str::to_string) else {
            session.reset();
            return Err(self.auth_error("token expired and cannot be refreshed"));
        };
        session.begin_refresh();

        tracing::info!(tracker = P::NAME, "refreshing access token");
        match self.provider.refresh(&refresh_token).await {
            Ok(grant) => self.store_grant(session, grant).await,
            Err(e) => {
                tracing::warn!(tracker = P::NAME, error = %e, "token refresh failed");
                session.reset();
                Err(self.auth_error(format!("token refresh failed: {e}")))
            }
        }
    }

    /// A client holding a currently valid access token.
    async fn client(&self) -> Result<P::Client, TrackerError> {
        let mut guard = self.session.lock().await;
        let session = self.loaded(&mut guard).await?;
        let now = Utc::now();

        if session.needs_refresh(now) {
            self.refresh(session).await?;
        }
        match session.access_token(Utc::now()) {
            Some(token) => Ok(self.provider.client(token)),
            None => Err(self.auth_error("no valid access token")),
        }
    }

    /// Map a service error, expiring the session when the service rejected the token.
    async fn check<T>(&self, result: Result<T, P::Error>) -> Result<T, TrackerError> {
        match result {
            Ok(v) => Ok(v),
            Err(e) if e.is_unauthorized() => {
                if let Some(session) = self.session.lock().await.as_mut() {
                    session.expire();
                }
                Err(self.auth_error(e.to_string()))
            }
            Err(e) => Err(TrackerError::RemoteApi {
                tracker: P::NAME.to_string(),
                message: e.to_string(),
            }),
        }
    }

    fn auth_error(&self, reason: impl Into<String>) -> TrackerError {
        TrackerError::Authentication {
            tracker: P::NAME.to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl<P: ServiceProvider> Tracker for RemoteTracker<P> {
    fn name(&self) -> &str {
        P::NAME
    }

    fn counts_whole_episodes(&self) -> bool {
        true
    }

    async fn is_authenticated(&self) -> bool {
        let mut guard = self.session.lock().await;
        match self.loaded(&mut guard).await {
            Ok(session) => session.is_usable(Utc::now()),
            Err(e) => {
                tracing::warn!(tracker = P::NAME, error = %e, "could not load stored token");
                false
            }
        }
    }

    async fn authenticate(&self, cancel: &CancellationToken) -> Result<(), TrackerError> {
        let mut guard = self.session.lock().await;
        let session = self.loaded(&mut guard).await?;
        let now = Utc::now();

        if session.access_token(now).is_some() {
            return Ok(());
        }
        if session.needs_refresh(now) && self.refresh(session).await.is_ok() {
            return Ok(());
        }

        session.begin_login();
        tracing::info!(tracker = P::NAME, "starting interactive login");
        let grant = tokio::select! {
            _ = cancel.cancelled() => {
                session.reset();
                return Err(TrackerError::Cancelled);
            }
            grant = self.provider.authorize() => grant,
        };

        match grant {
            Ok(grant) => {
                self.store_grant(session, grant).await?;
                tracing::info!(tracker = P::NAME, "login complete");
                Ok(())
            }
            Err(e) => {
                session.reset();
                Err(self.auth_error(e.to_string()))
            }
        }
    }

    async fn logout(&self) -> Result<(), TrackerError> {
        self.db.delete_token(P::NAME).await?;
        let mut guard = self.session.lock().await;
        guard.get_or_insert_with(Session::default).reset();
        tracing::info!(tracker = P::NAME, "logged out");
        Ok(())
    }

    async fn search_anime(&self, query: &str, limit: u32) -> Result<Vec<AnimeInfo>, TrackerError> {
        let client = self.client().await?;
        let results = self.check(client.search_anime(query, limit).await).await?;
        Ok(results.into_iter().map(to_anime_info).collect())
    }

    async fn get_anime_details(&self, external_id: &str) -> Result<AnimeInfo, TrackerError> {
        let id = parse_external_id(external_id)?;
        let client = self.client().await?;
        let result = self.check(client.get_anime(id).await).await?;
        Ok(to_anime_info(result))
    }

    async fn get_user_anime_list(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<UserAnimeEntry>, TrackerError> {
        let client = self.client().await?;
        let entries = tokio::select! {
            _ = cancel.cancelled() => return Err(TrackerError::Cancelled),
            entries = client.get_user_list() => self.check(entries).await?,
        };
        tracing::debug!(tracker = P::NAME, count = entries.len(), "fetched remote list");
        Ok(entries.into_iter().map(to_user_entry).collect())
    }

    async fn update_anime_status(
        &self,
        external_id: &str,
        update: StatusUpdate,
    ) -> Result<(), TrackerError> {
        let id = parse_external_id(external_id)?;
        let client = self.client().await?;
        let update = LibraryEntryUpdate {
            status: Some(update.status.as_db_str().to_string()),
            // Services count whole episodes only.
            episode: update.episode.map(|ep| ep.floor() as u32),
            score: update.score,
        };
        tracing::debug!(tracker = P::NAME, external_id, ?update, "pushing status");
        self.check(client.update_library_entry(id, update).await)
            .await
    }
}

/// Remote IDs are positive integers on every supported service.
fn parse_external_id(external_id: &str) -> Result<u64, TrackerError> {
    match external_id.trim().parse::<u64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(TrackerError::Validation {
            id: external_id.to_string(),
            reason: "expected a positive integer".into(),
        }),
    }
}

fn to_anime_info(r: AnimeSearchResult) -> AnimeInfo {
    let mut alternative_titles = Vec::new();
    alternative_titles.extend(r.title_english.clone().filter(|t| *t != r.title));
    alternative_titles.extend(r.synonyms);

    AnimeInfo {
        external_id: r.service_id.to_string(),
        title: r.title,
        original_title: r.title_native,
        alternative_titles,
        synopsis: r.synopsis,
        total_episodes: r.episodes,
        media_type: r.media_type,
        year: r.year,
        season: r.season,
        airing_status: r.status,
        genres: r.genres,
        thumbnail_url: r.cover_url,
    }
}

fn to_user_entry(e: UserListEntry) -> UserAnimeEntry {
    UserAnimeEntry {
        status: WatchStatus::from_db_str(&e.status).unwrap_or(WatchStatus::Watching),
        score: e.score.unwrap_or(0.0),
        progress: f64::from(e.watched_episodes),
        // Entries without a timestamp lose every comparison.
        last_updated: e.updated_at.unwrap_or_else(DateTime::<Utc>::default),
        info: to_anime_info(e.media),
    }
}
