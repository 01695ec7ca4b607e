use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::content::ContentItem;
use crate::storage::{keys, load_json, save_json, KeyValueStore, StoreError};

pub const FAST_TIER_TTL_MINUTES: i64 = 60;
pub const DURABLE_TIER_TTL_MINUTES: i64 = 30;
pub const FAST_TIER_CAP: usize = 25;

#[derive(Debug, Clone)]
struct FastEntry {
    items: Vec<ContentItem>,
    expires_at: DateTime<Utc>,
}

/// Process-local, per-user list of recently served items.
pub struct FastTier {
    ttl: Duration,
    entries: RwLock<HashMap<String, FastEntry>>,
}

impl FastTier {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, user_id: &str, now: DateTime<Utc>) -> Option<Vec<ContentItem>> {
        {
            let entries = self.entries.read();
            match entries.get(user_id) {
                Some(entry) if entry.expires_at > now => return Some(entry.items.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        self.entries.write().remove(user_id);
        None
    }

    /// Replaces the user's list and restarts its lifetime.
    pub fn set(&self, user_id: &str, items: Vec<ContentItem>, now: DateTime<Utc>) {
        self.entries.write().insert(
            user_id.to_string(),
            FastEntry {
                items,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Puts `fresh` ahead of whatever is cached and keeps the newest `cap`.
    pub fn merge_front(
        &self,
        user_id: &str,
        fresh: Vec<ContentItem>,
        cap: usize,
        now: DateTime<Utc>,
    ) -> Vec<ContentItem> {
        let mut entries = self.entries.write();
        let previous = entries
            .remove(user_id)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.items)
            .unwrap_or_default();

        let mut merged = fresh;
        for item in previous {
            if !merged.iter().any(|m| m.id == item.id) {
                merged.push(item);
            }
        }
        merged.truncate(cap);

        entries.insert(
            user_id.to_string(),
            FastEntry {
                items: merged.clone(),
                expires_at: now + self.ttl,
            },
        );
        merged
    }

    /// Applies `update` to every cached copy of `content_id`.
    pub fn update_item(&self, content_id: &str, mut update: impl FnMut(&mut ContentItem)) -> usize {
        let mut touched = 0;
        for entry in self.entries.write().values_mut() {
            for item in entry.items.iter_mut().filter(|i| i.id == content_id) {
                update(item);
                touched += 1;
            }
        }
        touched
    }

    /// Drops expired users. Returns how many went.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write();
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn user_count(&self) -> usize {
        self.entries.read().len()
    }

    pub fn item_count(&self) -> usize {
        self.entries.read().values().map(|e| e.items.len()).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub contents: Vec<ContentItem>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub user_id: String,
}

impl CacheEntry {
    fn expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.created_at > ttl
    }
}

/// Per-user entries in the shared key-value store. Survives restarts when the
/// store does.
///
/// Expiry is checked on read against `created_at`; the backend TTL only bounds
/// how long dead entries linger. Every failure reads as a miss.
#[derive(Clone)]
pub struct DurableTier {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl DurableTier {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    pub async fn is_healthy(&self) -> bool {
        self.store.is_healthy().await
    }

    pub async fn get(&self, user_id: &str, now: DateTime<Utc>) -> Option<Vec<ContentItem>> {
        let key = keys::cache(user_id);
        let entry = match load_json::<CacheEntry>(self.store.as_ref(), &key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!("Durable cache read failed for {user_id}: {e}");
                return None;
            }
        };

        if entry.expired(now, self.ttl) || entry.user_id != user_id {
            debug!("Discarding stale durable cache entry for {user_id}");
            self.clear(user_id).await;
            return None;
        }
        Some(entry.contents)
    }

    pub async fn set(&self, user_id: &str, contents: Vec<ContentItem>, now: DateTime<Utc>) {
        let entry = CacheEntry {
            contents,
            created_at: now,
            expires_at: now + self.ttl,
            user_id: user_id.to_string(),
        };
        let ttl = self.ttl.to_std().ok();
        if let Err(e) = save_json(self.store.as_ref(), &keys::cache(user_id), &entry, ttl).await {
            warn!("Durable cache write failed for {user_id}: {e}");
        }
    }

    pub async fn clear(&self, user_id: &str) {
        if let Err(e) = self.store.delete(&keys::cache(user_id)).await {
            warn!("Durable cache delete failed for {user_id}: {e}");
        }
    }

    /// Removes every expired or unreadable entry. Returns how many went.
    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut removed = 0;
        for key in self.store.keys(&keys::cache_prefix()).await? {
            let stale = match load_json::<CacheEntry>(self.store.as_ref(), &key).await {
                Ok(Some(entry)) => entry.expired(now, self.ttl),
                Ok(None) => false,
                Err(StoreError::Serde(_)) => true,
                Err(e) => return Err(e),
            };
            if stale {
                self.store.delete(&key).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn entry_count(&self) -> Result<usize, StoreError> {
        Ok(self.store.keys(&keys::cache_prefix()).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::content::sample_item;
    use crate::storage::testing::FailingStore;
    use crate::storage::MemoryStore;

    fn ids(items: &[ContentItem]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn test_fast_tier_expires_entries() {
        let tier = FastTier::new(Duration::minutes(60));
        let now = Utc::now();
        tier.set("u1", vec![sample_item("a", &[], 50)], now);
        assert!(tier.get("u1", now + Duration::minutes(59)).is_some());
        assert!(tier.get("u1", now + Duration::minutes(60)).is_none());
        assert_eq!(tier.user_count(), 0);
    }

    #[test]
    fn test_merge_front_orders_and_caps() {
        let tier = FastTier::new(Duration::minutes(60));
        let now = Utc::now();
        let old: Vec<_> = (0..24).map(|i| sample_item(&format!("old{i}"), &[], 50)).collect();
        tier.set("u1", old, now);

        let merged = tier.merge_front(
            "u1",
            vec![sample_item("n1", &[], 50), sample_item("n2", &[], 50)],
            FAST_TIER_CAP,
            now,
        );
        assert_eq!(merged.len(), FAST_TIER_CAP);
        assert_eq!(ids(&merged)[..3], ["n1", "n2", "old0"]);
        assert_eq!(merged.last().unwrap().id, "old22");
    }

    #[test]
    fn test_merge_front_does_not_duplicate() {
        let tier = FastTier::new(Duration::minutes(60));
        let now = Utc::now();
        tier.set("u1", vec![sample_item("a", &[], 50)], now);
        let merged = tier.merge_front("u1", vec![sample_item("a", &[], 50)], 25, now);
        assert_eq!(ids(&merged), ["a"]);
    }

    #[test]
    fn test_update_item_touches_every_copy() {
        let tier = FastTier::new(Duration::minutes(60));
        let now = Utc::now();
        tier.set("u1", vec![sample_item("a", &[], 50)], now);
        tier.set("u2", vec![sample_item("a", &[], 50), sample_item("b", &[], 50)], now);
        let touched = tier.update_item("a", |item| item.quality_score = 61);
        assert_eq!(touched, 2);
        assert_eq!(tier.get("u2", now).unwrap()[0].quality_score, 61);
        assert_eq!(tier.get("u2", now).unwrap()[1].quality_score, 50);
    }

    #[test]
    fn test_purge_and_clear() {
        let tier = FastTier::new(Duration::minutes(60));
        let now = Utc::now();
        tier.set("old", vec![], now - Duration::minutes(90));
        tier.set("new", vec![sample_item("a", &[], 50)], now);
        assert_eq!(tier.purge_expired(now), 1);
        assert_eq!(tier.item_count(), 1);
        assert_eq!(tier.clear(), 1);
    }

    #[tokio::test]
    async fn test_durable_round_trip_and_expiry() {
        let tier = DurableTier::new(Arc::new(MemoryStore::new()), Duration::minutes(30));
        let now = Utc::now();
        tier.set("u1", vec![sample_item("a", &[], 50)], now).await;
        let hit = tier.get("u1", now + Duration::minutes(30)).await.unwrap();
        assert_eq!(ids(&hit), ["a"]);
        assert!(tier.get("u1", now + Duration::minutes(31)).await.is_none());
        // The stale entry was removed on read.
        assert_eq!(tier.entry_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_durable_rejects_foreign_owner() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let entry = CacheEntry {
            contents: vec![sample_item("a", &[], 50)],
            created_at: now,
            expires_at: now + Duration::minutes(30),
            user_id: "someone-else".to_string(),
        };
        save_json(store.as_ref(), &keys::cache("u1"), &entry, None)
            .await
            .unwrap();
        let tier = DurableTier::new(store, Duration::minutes(30));
        assert!(tier.get("u1", now).await.is_none());
    }

    #[tokio::test]
    async fn test_durable_cleanup_removes_expired_and_corrupt() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let tier = DurableTier::new(store.clone(), Duration::minutes(30));
        let now = Utc::now();
        tier.set("old", vec![], now - Duration::minutes(45)).await;
        tier.set("fresh", vec![], now).await;
        store
            .set(&keys::cache("junk"), "not json".to_string(), None)
            .await
            .unwrap();

        assert_eq!(tier.cleanup(now).await.unwrap(), 2);
        assert_eq!(tier.entry_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_durable_failures_read_as_miss() {
        let tier = DurableTier::new(Arc::new(FailingStore), Duration::minutes(30));
        let now = Utc::now();
        tier.set("u1", vec![sample_item("a", &[], 50)], now).await;
        assert!(tier.get("u1", now).await.is_none());
        assert!(tier.cleanup(now).await.is_err());
    }
}
