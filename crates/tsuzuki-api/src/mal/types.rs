//! Wire shapes of the MAL v2 endpoints the ledger reads.
//!
//! Search and list responses share one paged envelope; only the fields that
//! end up in [`AnimeSearchResult`] or [`UserListEntry`] are declared.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::traits::{AnimeSearchResult, UserListEntry};

/// `{ "data": [...], "paging": { "next": ... } }`
#[derive(Debug, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub paging: Paging,
}

#[derive(Debug, Default, Deserialize)]
pub struct Paging {
    pub next: Option<String>,
}

/// A search hit. List items carry their status next to the node.
#[derive(Debug, Deserialize)]
pub struct Edge {
    pub node: Anime,
    pub list_status: Option<ListStatus>,
}

#[derive(Debug, Deserialize)]
pub struct Anime {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub alternative_titles: AlternativeTitles,
    pub num_episodes: Option<u32>,
    pub main_picture: Option<Picture>,
    pub media_type: Option<String>,
    pub status: Option<String>,
    pub synopsis: Option<String>,
    #[serde(default)]
    pub genres: Vec<Named>,
    pub mean: Option<f32>,
    pub start_season: Option<Season>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AlternativeTitles {
    pub en: Option<String>,
    pub ja: Option<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct Picture {
    pub large: Option<String>,
    pub medium: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Named {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct Season {
    pub year: u32,
    pub season: String,
}

#[derive(Debug, Deserialize)]
pub struct ListStatus {
    pub status: Option<String>,
    #[serde(default)]
    pub num_episodes_watched: u32,
    pub score: Option<u32>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// MAL spells every list status the way the ledger stores it; anything
/// unrecognised is sent as `watching`.
pub fn map_status_to_mal(status: &str) -> &'static str {
    match status {
        "completed" => "completed",
        "on_hold" => "on_hold",
        "dropped" => "dropped",
        "plan_to_watch" => "plan_to_watch",
        _ => "watching",
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

/// `fall` -> `Fall`
fn capitalize(season: &str) -> String {
    let mut chars = season.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl Anime {
    pub fn into_search_result(self) -> AnimeSearchResult {
        let AlternativeTitles { en, ja, synonyms } = self.alternative_titles;
        let (season, year) = match self.start_season {
            Some(s) => (Some(capitalize(&s.season)), Some(s.year)),
            None => (None, None),
        };

        AnimeSearchResult {
            service_id: self.id,
            title: self.title,
            title_english: non_empty(en),
            title_native: non_empty(ja),
            synonyms,
            // 0 means the count is not known yet.
            episodes: self.num_episodes.filter(|n| *n > 0),
            cover_url: self.main_picture.and_then(|p| p.large.or(p.medium)),
            media_type: self.media_type,
            status: self.status,
            synopsis: self.synopsis,
            genres: self.genres.into_iter().map(|g| g.name).collect(),
            mean_score: self.mean,
            season,
            year,
        }
    }
}

impl Edge {
    pub fn into_user_list_entry(self) -> UserListEntry {
        let status = self.list_status.unwrap_or(ListStatus {
            status: None,
            num_episodes_watched: 0,
            score: None,
            updated_at: None,
        });

        UserListEntry {
            media: self.node.into_search_result(),
            watched_episodes: status.num_episodes_watched,
            status: status.status.unwrap_or_else(|| "watching".into()),
            score: status.score.filter(|s| *s > 0).map(|s| s as f32),
            updated_at: status.updated_at,
        }
    }
}
