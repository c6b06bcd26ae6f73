use serde::{Deserialize, Serialize};

/// Core anime entity, stored locally and shared by every tracker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Anime {
    pub id: i64,
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

impl Anime {
    /// Returns the best available display title.
    pub fn display_title(&self) -> &str {
        if !self.title.is_empty() {
            return &self.title;
        }
        self.original_title
            .as_deref()
            .or(self.alternative_titles.first().map(String::as_str))
            .unwrap_or("Unknown")
    }
}
