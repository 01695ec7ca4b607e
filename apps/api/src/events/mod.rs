//! Interaction event log: append-only, capped, partitioned by session.

pub mod handlers;
pub mod log;
pub mod stats;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::experiment::Variant;

pub use log::{EventFilter, EventLog, EventLogConfig};
pub use stats::{AbTestStats, ExportFormat, VariantStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ContentView,
    ContentInteraction,
    QualityScoreUpdate,
    AbTestExposure,
    UserBehavior,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContentView => "content_view",
            Self::ContentInteraction => "content_interaction",
            Self::QualityScoreUpdate => "quality_score_update",
            Self::AbTestExposure => "ab_test_exposure",
            Self::UserBehavior => "user_behavior",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "content_view" => Some(Self::ContentView),
            "content_interaction" => Some(Self::ContentInteraction),
            "quality_score_update" => Some(Self::QualityScoreUpdate),
            "ab_test_exposure" => Some(Self::AbTestExposure),
            "user_behavior" => Some(Self::UserBehavior),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionEvent {
    pub event_type: EventType,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub variant: Option<Variant>,
    pub metadata: Map<String, Value>,
    pub session_id: String,
    /// Monotonic per (user, event type), starting at 1.
    pub sequence_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSession {
    pub session_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub page_views: u64,
    pub interactions: u64,
    pub variant: Option<Variant>,
}
