use std::collections::{HashMap, VecDeque};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::models::user::{InteractionRecord, UserProfile, UserStats};
use crate::users::{normalize_interests, PreferencesUpdate, UserStore, HISTORY_CAP};

struct UserRecord {
    profile: UserProfile,
    stats: UserStats,
    history: VecDeque<InteractionRecord>,
}

impl UserRecord {
    fn new(user_id: &str) -> Self {
        Self {
            profile: UserProfile::new(user_id, Utc::now()),
            stats: UserStats::default(),
            history: VecDeque::new(),
        }
    }
}

/// Process-local user store. Used when no database is configured and in tests.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_user<T>(&self, user_id: &str, f: impl FnOnce(&mut UserRecord) -> T) -> T {
        let mut users = self.users.write();
        let record = users
            .entry(user_id.to_string())
            .or_insert_with(|| UserRecord::new(user_id));
        f(record)
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn get_or_create_profile(&self, user_id: &str) -> Result<UserProfile> {
        Ok(self.with_user(user_id, |user| user.profile.clone()))
    }

    async fn save_preferences(&self, user_id: &str, update: PreferencesUpdate) -> Result<UserProfile> {
        Ok(self.with_user(user_id, |user| {
            user.profile.interests = normalize_interests(update.interests);
            if let Some(language) = update.language {
                user.profile.language = language;
            }
            if let Some(style) = update.style {
                user.profile.style = style;
            }
            user.profile.clone()
        }))
    }

    async fn stats(&self, user_id: &str) -> Result<UserStats> {
        Ok(self
            .users
            .read()
            .get(user_id)
            .map(|user| user.stats)
            .unwrap_or_default())
    }

    async fn record_interaction(&self, user_id: &str, record: InteractionRecord) -> Result<UserStats> {
        Ok(self.with_user(user_id, |user| {
            user.stats.apply(record.action, record.dwell_time_ms);
            user.history.push_back(record);
            while user.history.len() > HISTORY_CAP {
                user.history.pop_front();
            }
            user.stats
        }))
    }

    async fn recent_interactions(&self, user_id: &str, limit: usize) -> Result<Vec<InteractionRecord>> {
        let users = self.users.read();
        let Some(user) = users.get(user_id) else {
            return Ok(Vec::new());
        };
        let skip = user.history.len().saturating_sub(limit);
        Ok(user.history.iter().skip(skip).cloned().collect())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::content::ContentStyle;
    use crate::models::user::InteractionKind;

    fn record(content_id: &str, action: InteractionKind, dwell: Option<u64>) -> InteractionRecord {
        InteractionRecord {
            content_id: content_id.to_string(),
            action,
            topics: vec!["ai".to_string()],
            dwell_time_ms: dwell,
            scroll_depth: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_profile_is_created_once() {
        let store = MemoryUserStore::new();
        let first = store.get_or_create_profile("u1").await.unwrap();
        let second = store.get_or_create_profile("u1").await.unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(first.language, "zh-TW");
    }

    #[tokio::test]
    async fn test_preferences_update_keeps_unset_fields() {
        let store = MemoryUserStore::new();
        let profile = store
            .save_preferences(
                "u1",
                PreferencesUpdate {
                    interests: vec!["ai".to_string(), "AI".to_string()],
                    language: None,
                    style: Some(ContentStyle::Formal),
                },
            )
            .await
            .unwrap();
        assert_eq!(profile.interests, vec!["ai"]);
        assert_eq!(profile.language, "zh-TW");
        assert_eq!(profile.style, ContentStyle::Formal);
    }

    #[tokio::test]
    async fn test_interactions_update_counters() {
        let store = MemoryUserStore::new();
        store
            .record_interaction("u1", record("c1", InteractionKind::Like, Some(4000)))
            .await
            .unwrap();
        store
            .record_interaction("u1", record("c2", InteractionKind::View, None))
            .await
            .unwrap();
        let stats = store
            .record_interaction("u1", record("c3", InteractionKind::Dislike, Some(100)))
            .await
            .unwrap();
        assert_eq!(
            stats,
            UserStats {
                total_likes: 1,
                total_dislikes: 1,
                total_views: 1,
                total_long_dwells: 1,
            }
        );
        assert_eq!(store.stats("u1").await.unwrap(), stats);
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let store = MemoryUserStore::new();
        for i in 0..(HISTORY_CAP + 5) {
            store
                .record_interaction("u1", record(&format!("c{i}"), InteractionKind::View, None))
                .await
                .unwrap();
        }
        let all = store.recent_interactions("u1", 1000).await.unwrap();
        assert_eq!(all.len(), HISTORY_CAP);
        assert_eq!(all[0].content_id, "c5");

        let last_two = store.recent_interactions("u1", 2).await.unwrap();
        let ids: Vec<&str> = last_two.iter().map(|r| r.content_id.as_str()).collect();
        assert_eq!(ids, ["c103", "c104"]);
    }

    #[tokio::test]
    async fn test_unknown_user_has_empty_stats() {
        let store = MemoryUserStore::new();
        assert_eq!(store.stats("nobody").await.unwrap(), UserStats::default());
        assert!(store.recent_interactions("nobody", 10).await.unwrap().is_empty());
    }
}
