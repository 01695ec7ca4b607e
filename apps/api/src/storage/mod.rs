//! Key-value storage shared by the assignor, the rate limiter and the durable
//! cache tier.
//!
//! Backends are picked once in `main` (`MemoryStore` or `RedisStore`) and handed
//! around as `Arc<dyn KeyValueStore>`. Callers never branch on the backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub mod memory;
pub mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores `value` under `key`. `None` keeps the value until it is deleted.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Lists every live key starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Name reported by health checks.
    fn backend(&self) -> &'static str;

    async fn is_healthy(&self) -> bool {
        true
    }
}

/// Reads and decodes a JSON value.
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
        None => Ok(None),
    }
}

/// Encodes and writes a JSON value.
pub async fn save_json<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), StoreError> {
    let payload = serde_json::to_string(value)?;
    store.set(key, payload, ttl).await
}

/// Storage key namespaces. One key per user per component.
pub mod keys {
    const PREFIX: &str = "aipcs";

    pub fn assignment(user_id: &str) -> String {
        format!("{PREFIX}:assign:{user_id}")
    }

    pub fn rate_limit(user_id: &str) -> String {
        format!("{PREFIX}:ratelimit:{user_id}")
    }

    pub fn cache_prefix() -> String {
        format!("{PREFIX}:cache:")
    }

    pub fn cache(user_id: &str) -> String {
        format!("{}{user_id}", cache_prefix())
    }
}
