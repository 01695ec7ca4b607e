//! Per-user profile, counters and interaction history.

pub mod handlers;
pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::models::content::ContentStyle;
use crate::models::user::{InteractionRecord, UserProfile, UserStats};

pub use memory::MemoryUserStore;
pub use postgres::PgUserStore;

/// Interactions kept per user, oldest dropped first.
pub const HISTORY_CAP: usize = 100;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesUpdate {
    pub interests: Vec<String>,
    pub language: Option<String>,
    pub style: Option<ContentStyle>,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Loads the profile, creating a default one on first sight.
    async fn get_or_create_profile(&self, user_id: &str) -> Result<UserProfile>;

    async fn save_preferences(&self, user_id: &str, update: PreferencesUpdate) -> Result<UserProfile>;

    async fn stats(&self, user_id: &str) -> Result<UserStats>;

    /// Appends to the history and bumps the counters. Returns the new counters.
    async fn record_interaction(&self, user_id: &str, record: InteractionRecord) -> Result<UserStats>;

    /// Up to `limit` most recent interactions, oldest first.
    async fn recent_interactions(&self, user_id: &str, limit: usize) -> Result<Vec<InteractionRecord>>;

    fn backend(&self) -> &'static str;
}

/// Trims and de-duplicates interest tags, keeping first occurrence order.
pub fn normalize_interests(interests: Vec<String>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::with_capacity(interests.len());
    for interest in interests {
        let trimmed = interest.trim();
        if !trimmed.is_empty() && !seen.iter().any(|s| s.eq_ignore_ascii_case(trimmed)) {
            seen.push(trimmed.to_string());
        }
    }
    seen
}
