//! Two-tier content cache in front of generation, plus the catalog of every
//! item the service has produced.
//!
//! Reads go fast tier → durable tier → catalog ranking. Scores always come from
//! the catalog so a cached copy never reports an outdated score.

pub mod handlers;
pub mod tiers;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::models::content::{Action, ContentItem, DEFAULT_QUALITY_SCORE};
use crate::scoring::ScoreResult;
use crate::storage::KeyValueStore;

pub use tiers::{CacheEntry, DurableTier, FastTier, FAST_TIER_CAP};

/// Minimum score an item needs to be picked by interest ranking.
pub const MIN_RANKED_QUALITY: i32 = 60;
pub const DEFAULT_CATALOG_CAP: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    Fast,
    Durable,
    Catalog,
}

#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub items: Vec<ContentItem>,
    /// Tier that produced the items, `None` when nothing was found.
    pub tier: Option<CacheTier>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub fast_tier_users: usize,
    pub fast_tier_items: usize,
    pub catalog_size: usize,
    pub durable_entries: Option<usize>,
    pub durable_backend: &'static str,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub fast_ttl: Duration,
    pub durable_ttl: Duration,
    pub fast_cap: usize,
    pub catalog_cap: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fast_ttl: Duration::minutes(tiers::FAST_TIER_TTL_MINUTES),
            durable_ttl: Duration::minutes(tiers::DURABLE_TIER_TTL_MINUTES),
            fast_cap: FAST_TIER_CAP,
            catalog_cap: DEFAULT_CATALOG_CAP,
        }
    }
}

pub struct ContentCache {
    config: CacheConfig,
    fast: FastTier,
    durable: DurableTier,
    catalog: RwLock<HashMap<String, ContentItem>>,
}

impl ContentCache {
    pub fn new(config: CacheConfig, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            fast: FastTier::new(config.fast_ttl),
            durable: DurableTier::new(store, config.durable_ttl),
            catalog: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub async fn get_content_for_user(
        &self,
        user_id: &str,
        count: usize,
        interests: &[String],
    ) -> CacheLookup {
        self.get_content_for_user_at(user_id, count, interests, Utc::now())
            .await
    }

    /// Up to `count` items for the user. May return fewer; never fails.
    pub async fn get_content_for_user_at(
        &self,
        user_id: &str,
        count: usize,
        interests: &[String],
        now: DateTime<Utc>,
    ) -> CacheLookup {
        if let Some(items) = self.fast.get(user_id, now) {
            if items.len() >= count {
                debug!("Fast tier hit for {user_id}");
                return self.hit(items, count, CacheTier::Fast);
            }
        }

        if let Some(items) = self.durable.get(user_id, now).await {
            if items.len() >= count {
                debug!("Durable tier hit for {user_id}");
                self.fast.set(user_id, items.clone(), now);
                return self.hit(items, count, CacheTier::Durable);
            }
        }

        let picked = self.pick_from_catalog(user_id, count, interests);
        if picked.is_empty() {
            debug!("Cache miss for {user_id}");
            return CacheLookup {
                items: picked,
                tier: None,
            };
        }

        debug!("Catalog served {} items to {user_id}", picked.len());
        let served = self.save_generated_content_at(user_id, picked, now);
        CacheLookup {
            items: served,
            tier: Some(CacheTier::Catalog),
        }
    }

    pub fn save_generated_content(&self, user_id: &str, items: Vec<ContentItem>) -> Vec<ContentItem> {
        self.save_generated_content_at(user_id, items, Utc::now())
    }

    /// Marks `items` served to the user, puts them at the front of the user's
    /// fast tier and mirrors the tier to durable storage in the background.
    pub fn save_generated_content_at(
        &self,
        user_id: &str,
        items: Vec<ContentItem>,
        now: DateTime<Utc>,
    ) -> Vec<ContentItem> {
        let marked: Vec<ContentItem> = items
            .into_iter()
            .map(|mut item| {
                item.mark_served(user_id);
                item
            })
            .collect();

        self.upsert_catalog(&marked);
        let tier = self
            .fast
            .merge_front(user_id, marked.clone(), self.config.fast_cap, now);

        let durable = self.durable.clone();
        let owner = user_id.to_string();
        tokio::spawn(async move {
            durable.set(&owner, tier, now).await;
        });

        info!("Cached {} items for {user_id}", marked.len());
        marked
    }

    /// Writes the user's current fast-tier list to durable storage and waits.
    pub async fn mirror_to_durable(&self, user_id: &str, now: DateTime<Utc>) {
        if let Some(items) = self.fast.get(user_id, now) {
            self.durable.set(user_id, items, now).await;
        }
    }

    /// Records items handed to the user outside the cache tiers, such as
    /// rate-limited fallback content, so later reactions find their score.
    pub fn register_served(&self, user_id: &str, items: Vec<ContentItem>) -> Vec<ContentItem> {
        let marked: Vec<ContentItem> = items
            .into_iter()
            .map(|mut item| {
                item.mark_served(user_id);
                item
            })
            .collect();
        self.upsert_catalog(&marked);
        marked
    }

    /// Scores a reaction against the item's current score and stores the
    /// result. Read, score and write happen under one catalog lock so
    /// concurrent reactions to the same item never lose a delta. Unknown
    /// items score from the default and are not stored.
    pub fn apply_interaction<F>(&self, content_id: &str, action: Action, score: F) -> (i32, ScoreResult)
    where
        F: FnOnce(i32) -> ScoreResult,
    {
        let (old_score, result, known) = {
            let mut catalog = self.catalog.write();
            match catalog.get_mut(content_id) {
                Some(item) => {
                    let old_score = item.quality_score;
                    let result = score(old_score);
                    record_reaction(item, action, result.new_score);
                    (old_score, result, true)
                }
                None => {
                    let result = score(DEFAULT_QUALITY_SCORE);
                    (DEFAULT_QUALITY_SCORE, result, false)
                }
            }
        };

        // Tier copies are overlaid from the catalog on read; this keeps them
        // close for stats.
        let copies = self
            .fast
            .update_item(content_id, |item| record_reaction(item, action, result.new_score));
        if !known && copies == 0 {
            debug!("Score update for uncached content {content_id}");
        }
        (old_score, result)
    }

    /// Current score of a known item.
    pub fn content_score(&self, content_id: &str) -> Option<i32> {
        self.catalog
            .read()
            .get(content_id)
            .map(|item| item.quality_score)
    }

    pub fn content_topics(&self, content_id: &str) -> Vec<String> {
        self.catalog
            .read()
            .get(content_id)
            .map(|item| item.topics.clone())
            .unwrap_or_default()
    }

    /// Durable sweep plus fast-tier purge. Returns how many entries went.
    pub async fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let durable = match self.durable.cleanup(now).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Durable cache cleanup failed: {e}");
                0
            }
        };
        let fast = self.fast.purge_expired(now);
        if durable + fast > 0 {
            info!("Cache cleanup removed {durable} durable and {fast} fast entries");
        }
        durable + fast
    }

    pub fn flush_fast_tier(&self) -> usize {
        let flushed = self.fast.clear();
        info!("Flushed fast tier ({flushed} users)");
        flushed
    }

    pub async fn stats(&self) -> CacheStats {
        let durable_entries = match self.durable.entry_count().await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!("Failed to count durable cache entries: {e}");
                None
            }
        };
        CacheStats {
            fast_tier_users: self.fast.user_count(),
            fast_tier_items: self.fast.item_count(),
            catalog_size: self.catalog.read().len(),
            durable_entries,
            durable_backend: self.durable.backend(),
        }
    }

    pub async fn is_durable_healthy(&self) -> bool {
        self.durable.is_healthy().await
    }

    fn hit(&self, mut items: Vec<ContentItem>, count: usize, tier: CacheTier) -> CacheLookup {
        items.truncate(count);
        self.refresh_scores(&mut items);
        CacheLookup {
            items,
            tier: Some(tier),
        }
    }

    fn refresh_scores(&self, items: &mut [ContentItem]) {
        let catalog = self.catalog.read();
        for item in items.iter_mut() {
            if let Some(current) = catalog.get(&item.id) {
                item.quality_score = current.quality_score;
                item.likes = current.likes;
                item.dislikes = current.dislikes;
            }
        }
    }

    fn pick_from_catalog(&self, user_id: &str, count: usize, interests: &[String]) -> Vec<ContentItem> {
        let catalog = self.catalog.read();
        let unseen: Vec<&ContentItem> = catalog.values().filter(|i| !i.seen_by(user_id)).collect();

        let mut ranked: Vec<(usize, &ContentItem)> = unseen
            .iter()
            .map(|item| (interest_matches(&item.topics, interests), *item))
            .filter(|(matches, item)| *matches > 0 && item.quality_score >= MIN_RANKED_QUALITY)
            .collect();
        ranked.sort_by(|(ma, a), (mb, b)| {
            mb.cmp(ma)
                .then(b.quality_score.cmp(&a.quality_score))
                .then(b.generated_at.cmp(&a.generated_at))
                .then(a.id.cmp(&b.id))
        });

        let mut picked: Vec<ContentItem> = ranked
            .into_iter()
            .take(count)
            .map(|(_, item)| item.clone())
            .collect();

        if picked.len() < count {
            let mut rest: Vec<&ContentItem> = unseen
                .into_iter()
                .filter(|item| !picked.iter().any(|p| p.id == item.id))
                .collect();
            rest.sort_by(|a, b| {
                b.generated_at
                    .cmp(&a.generated_at)
                    .then(a.id.cmp(&b.id))
            });
            let shortfall = count - picked.len();
            picked.extend(rest.into_iter().take(shortfall).cloned());
        }
        picked
    }

    fn upsert_catalog(&self, items: &[ContentItem]) {
        let mut catalog = self.catalog.write();
        for item in items {
            catalog.insert(item.id.clone(), item.clone());
        }

        let overflow = catalog.len().saturating_sub(self.config.catalog_cap);
        if overflow > 0 {
            let mut by_age: Vec<(DateTime<Utc>, String)> = catalog
                .values()
                .map(|item| (item.generated_at, item.id.clone()))
                .collect();
            by_age.sort();
            for (_, id) in by_age.into_iter().take(overflow) {
                catalog.remove(&id);
            }
        }
    }
}

fn record_reaction(item: &mut ContentItem, action: Action, new_score: i32) {
    item.quality_score = new_score;
    match action {
        Action::Like => item.likes += 1,
        Action::Dislike => item.dislikes += 1,
    }
}

/// Topics that match at least one interest, case-insensitively, by substring
/// in either direction.
pub fn interest_matches(topics: &[String], interests: &[String]) -> usize {
    let interests: Vec<String> = interests.iter().map(|i| i.to_lowercase()).collect();
    topics
        .iter()
        .filter(|topic| {
            let topic = topic.to_lowercase();
            interests
                .iter()
                .any(|interest| topic.contains(interest.as_str()) || interest.contains(topic.as_str()))
        })
        .count()
}
