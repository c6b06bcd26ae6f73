use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::traits::{AnimeSearchResult, UserListEntry};

// ── GraphQL response wrappers ────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct GraphQLResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQLError>,
}

#[derive(Debug, Deserialize)]
pub struct GraphQLError {
    pub message: String,
}

// ── Search / media queries ───────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PageResponse {
    #[serde(rename = "Page")]
    pub page: PageData,
}

#[derive(Debug, Deserialize)]
pub struct PageData {
    pub media: Vec<AniListMedia>,
}

#[derive(Debug, Deserialize)]
pub struct MediaResponse {
    #[serde(rename = "Media")]
    pub media: AniListMedia,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AniListMedia {
    pub id: u64,
    pub title: Option<AniListTitle>,
    pub episodes: Option<u32>,
    pub cover_image: Option<CoverImage>,
    pub mean_score: Option<u32>,
    pub season: Option<String>,
    pub season_year: Option<u32>,
    pub genres: Option<Vec<String>>,
    pub format: Option<String>,
    pub status: Option<String>,
    pub description: Option<String>,
    pub synonyms: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct AniListTitle {
    pub romaji: Option<String>,
    pub english: Option<String>,
    pub native: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CoverImage {
    pub large: Option<String>,
}

// ── User list queries ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MediaListCollectionResponse {
    #[serde(rename = "MediaListCollection")]
    pub media_list_collection: MediaListCollection,
}

#[derive(Debug, Deserialize)]
pub struct MediaListCollection {
    pub lists: Vec<MediaListGroup>,
}

#[derive(Debug, Deserialize)]
pub struct MediaListGroup {
    pub entries: Vec<MediaListEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaListEntry {
    pub media_id: u64,
    pub progress: Option<u32>,
    /// POINT_100 scale.
    pub score: Option<f32>,
    pub status: Option<String>,
    /// Unix seconds.
    pub updated_at: Option<i64>,
    pub media: AniListMedia,
}

// ── Viewer query ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ViewerResponse {
    #[serde(rename = "Viewer")]
    pub viewer: Viewer,
}

#[derive(Debug, Deserialize)]
pub struct Viewer {
    pub id: u64,
    pub name: String,
}

// ── Conversions ──────────────────────────────────────────────────

fn capitalize_season(s: &str) -> String {
    let mut c = s.chars();
    match c.next() {
        Some(first) => first.to_uppercase().to_string() + &c.as_str().to_lowercase(),
        None => String::new(),
    }
}

/// AniList `MediaListStatus` → canonical status.
pub fn map_status_from_anilist(s: &str) -> &'static str {
    match s {
        "CURRENT" | "REPEATING" => "watching",
        "COMPLETED" => "completed",
        "PAUSED" => "on_hold",
        "DROPPED" => "dropped",
        "PLANNING" => "plan_to_watch",
        _ => "watching",
    }
}

/// Canonical status → AniList `MediaListStatus`.
pub fn map_status_to_anilist(s: &str) -> &'static str {
    match s {
        "completed" => "COMPLETED",
        "on_hold" => "PAUSED",
        "dropped" => "DROPPED",
        "plan_to_watch" => "PLANNING",
        _ => "CURRENT",
    }
}

impl AniListMedia {
    pub fn into_search_result(self) -> AnimeSearchResult {
        let (romaji, english, native) = match self.title {
            Some(t) => (t.romaji, t.english, t.native),
            None => (None, None, None),
        };

        AnimeSearchResult {
            service_id: self.id,
            title: romaji.or_else(|| english.clone()).unwrap_or_default(),
            title_english: english,
            title_native: native,
            synonyms: self.synonyms.unwrap_or_default(),
            episodes: self.episodes,
            cover_url: self.cover_image.and_then(|c| c.large),
            media_type: self.format.map(|f| f.to_lowercase()),
            status: self.status.as_deref().map(str::to_lowercase),
            synopsis: self.description,
            genres: self.genres.unwrap_or_default(),
            mean_score: self.mean_score.map(|s| s as f32 / 10.0),
            season: self.season.as_deref().map(capitalize_season),
            year: self.season_year,
        }
    }
}

impl MediaListEntry {
    pub fn into_user_list_entry(self) -> UserListEntry {
        UserListEntry {
            watched_episodes: self.progress.unwrap_or(0),
            status: self
                .status
                .as_deref()
                .map(map_status_from_anilist)
                .unwrap_or("watching")
                .to_string(),
            score: self.score.filter(|s| *s > 0.0).map(|s| s / 10.0),
            updated_at: self
                .updated_at
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
            media: AnimeSearchResult {
                service_id: self.media_id,
                ..self.media.into_search_result()
            },
        }
    }
}
