use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Playback-resume bookkeeping for a single episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeProgress {
    pub id: i64,
    pub anime_id: i64,
    pub episode: f64,
    /// Seconds into the episode.
    pub position: u32,
    /// Seconds.
    pub duration: u32,
    pub playback_speed: f32,
    pub watched: bool,
    pub source_id: Option<String>,
    pub last_watched: DateTime<Utc>,
}

impl EpisodeProgress {
    pub fn new(anime_id: i64, episode: f64) -> Self {
        Self {
            id: 0,
            anime_id,
            episode,
            position: 0,
            duration: 0,
            playback_speed: 1.0,
            watched: false,
            source_id: None,
            last_watched: Utc::now(),
        }
    }
}
