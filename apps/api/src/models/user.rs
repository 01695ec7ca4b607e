use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::content::{Action, ContentStyle};

/// Dwell time above which an interaction counts as a long dwell.
pub const LONG_DWELL_MS: u64 = 3000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    pub interests: Vec<String>,
    pub language: String,
    pub style: ContentStyle,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(user_id: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            interests: Vec::new(),
            language: "zh-TW".to_string(),
            style: ContentStyle::Casual,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub total_likes: i64,
    pub total_dislikes: i64,
    pub total_views: i64,
    pub total_long_dwells: i64,
}

impl UserStats {
    pub fn apply(&mut self, kind: InteractionKind, dwell_time_ms: Option<u64>) {
        match kind {
            InteractionKind::Like => self.total_likes += 1,
            InteractionKind::Dislike => self.total_dislikes += 1,
            InteractionKind::View => self.total_views += 1,
            InteractionKind::LongDwell => self.total_long_dwells += 1,
        }
        let reaction = matches!(kind, InteractionKind::Like | InteractionKind::Dislike);
        if reaction && dwell_time_ms.is_some_and(|ms| ms > LONG_DWELL_MS) {
            self.total_long_dwells += 1;
        }
    }
}

/// Everything a user can do to a piece of content that the profile keeps count of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Like,
    Dislike,
    View,
    LongDwell,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Dislike => "dislike",
            Self::View => "view",
            Self::LongDwell => "long_dwell",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "like" => Some(Self::Like),
            "dislike" => Some(Self::Dislike),
            "view" => Some(Self::View),
            "long_dwell" => Some(Self::LongDwell),
            _ => None,
        }
    }
}

impl From<Action> for InteractionKind {
    fn from(action: Action) -> Self {
        match action {
            Action::Like => Self::Like,
            Action::Dislike => Self::Dislike,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRecord {
    pub content_id: String,
    pub action: InteractionKind,
    pub topics: Vec<String>,
    pub dwell_time_ms: Option<u64>,
    pub scroll_depth: Option<f64>,
    pub timestamp: DateTime<Utc>,
}
