use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the tracker that never talks to a remote service.
pub const LOCAL_TRACKER: &str = "local";

/// User's watch status for a tracking row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchStatus {
    Watching,
    Completed,
    OnHold,
    Dropped,
    PlanToWatch,
}

impl WatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Watching => "Watching",
            Self::Completed => "Completed",
            Self::OnHold => "On Hold",
            Self::Dropped => "Dropped",
            Self::PlanToWatch => "Plan to Watch",
        }
    }

    /// Database string representation (lowercase, no spaces).
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Watching => "watching",
            Self::Completed => "completed",
            Self::OnHold => "on_hold",
            Self::Dropped => "dropped",
            Self::PlanToWatch => "plan_to_watch",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "watching" => Some(Self::Watching),
            "completed" => Some(Self::Completed),
            "on_hold" => Some(Self::OnHold),
            "dropped" => Some(Self::Dropped),
            "plan_to_watch" => Some(Self::PlanToWatch),
            _ => None,
        }
    }

    pub const ALL: &[WatchStatus] = &[
        Self::Watching,
        Self::Completed,
        Self::OnHold,
        Self::Dropped,
        Self::PlanToWatch,
    ];
}

impl std::fmt::Display for WatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-tracker watch state of one anime. Unique per `(anime_id, tracker)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingRecord {
    pub id: i64,
    pub anime_id: i64,
    pub tracker: String,
    /// The tracker's own identifier for this title. Empty for the local tracker.
    pub external_id: String,
    pub status: WatchStatus,
    /// 0–10, where 0 means "no score".
    pub score: f32,
    /// Episodes watched; fractional values mark half episodes (e.g. 12.5).
    pub progress: f64,
    pub total_episodes: Option<u32>,
    pub last_updated: DateTime<Utc>,
}

impl TrackingRecord {
    pub fn new(anime_id: i64, tracker: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            id: 0,
            anime_id,
            tracker: tracker.into(),
            external_id: external_id.into(),
            status: WatchStatus::Watching,
            score: 0.0,
            progress: 0.0,
            total_episodes: None,
            last_updated: Utc::now(),
        }
    }
}
