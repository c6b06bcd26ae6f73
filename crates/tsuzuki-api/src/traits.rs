//! Trait definitions for anime tracking services.
//!
//! The AniList and MAL clients implement these traits so the sync layer can
//! drive either one through a single generic adapter.

use std::future::Future;

use chrono::{DateTime, Utc};

/// Error type returned by a service client.
pub trait ServiceError: std::error::Error + Send + Sync + 'static {
    /// Whether the service rejected the credentials (token missing, revoked or expired).
    fn is_unauthorized(&self) -> bool;
}

/// A unified anime tracking service interface.
pub trait AnimeService: Send + Sync {
    type Error: ServiceError;

    /// Search for anime by title.
    fn search_anime(
        &self,
        query: &str,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<AnimeSearchResult>, Self::Error>> + Send;

    /// Fetch full metadata for one anime by its service ID.
    fn get_anime(
        &self,
        anime_id: u64,
    ) -> impl Future<Output = Result<AnimeSearchResult, Self::Error>> + Send;

    /// Get the authenticated user's complete anime list.
    fn get_user_list(&self)
        -> impl Future<Output = Result<Vec<UserListEntry>, Self::Error>> + Send;

    /// Create or update the user's list entry. `None` fields are left untouched.
    fn update_library_entry(
        &self,
        anime_id: u64,
        update: LibraryEntryUpdate,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Builds clients for one service and runs its OAuth flows.
pub trait ServiceProvider: Send + Sync + 'static {
    type Error: ServiceError;
    type Client: AnimeService<Error = Self::Error> + 'static;

    /// Stable lowercase service key, also used as the tracker name.
    const NAME: &'static str;

    fn client(&self, access_token: &str) -> Self::Client;

    /// Run the interactive authorization flow.
    fn authorize(&self) -> impl Future<Output = Result<TokenGrant, Self::Error>> + Send;

    /// Exchange a refresh token for a new access token.
    fn refresh(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Result<TokenGrant, Self::Error>> + Send;
}

/// Tokens returned by an authorization or refresh exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Lifetime in seconds, when the service reports one.
    pub expires_in: Option<u64>,
}

impl TokenGrant {
    /// Absolute expiry instant relative to `now`.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| now + chrono::Duration::seconds(secs))
    }
}

/// A search result from any anime service.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct AnimeSearchResult {
    pub service_id: u64,
    pub title: String,
    pub title_english: Option<String>,
    pub title_native: Option<String>,
    pub synonyms: Vec<String>,
    pub episodes: Option<u32>,
    pub cover_url: Option<String>,
    pub media_type: Option<String>,
    pub status: Option<String>,
    pub synopsis: Option<String>,
    pub genres: Vec<String>,
    pub mean_score: Option<f32>,
    pub season: Option<String>,
    pub year: Option<u32>,
}

/// An entry from a user's anime list.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct UserListEntry {
    pub media: AnimeSearchResult,
    pub watched_episodes: u32,
    /// Canonical status: `watching`, `completed`, `on_hold`, `dropped` or `plan_to_watch`.
    pub status: String,
    /// 0–10; `None` when unscored.
    pub score: Option<f32>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Fields to change on a list entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LibraryEntryUpdate {
    pub status: Option<String>,
    pub episode: Option<u32>,
    pub score: Option<f32>,
}
