//! Per-user fixed-window admission control for generation requests.

pub mod handlers;

use std::sync::Arc;

use axum::http::{header::RETRY_AFTER, HeaderName, HeaderValue};
use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::storage::{keys, load_json, save_json, KeyValueStore, StoreError};

pub const DEFAULT_MAX_REQUESTS: u32 = 20;
pub const DEFAULT_WINDOW_MS: i64 = 60 * 60 * 1000;
pub const HISTORY_CAP: usize = 50;
pub const DEFAULT_ENDPOINT: &str = "/api/v1/generate";
/// Stored records outlive their window by this many windows.
const RECORD_TTL_WINDOWS: u64 = 24;

const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_ms: i64,
    pub message: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window_ms: DEFAULT_WINDOW_MS,
            message: "Hourly generation limit reached, please try again later".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEntry {
    pub timestamp: i64,
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRecord {
    pub user_id: String,
    /// Requests counted in the current window.
    pub count: u32,
    /// Epoch millis at which the current window opened.
    pub window_start: i64,
    /// Requests ever counted for this user, across windows.
    #[serde(default)]
    pub total_requests: u64,
    pub history: Vec<RequestEntry>,
}

impl RateLimitRecord {
    fn fresh(user_id: &str, now_ms: i64) -> Self {
        Self {
            user_id: user_id.to_string(),
            count: 0,
            window_start: now_ms,
            total_requests: 0,
            history: Vec::new(),
        }
    }

    fn expired(&self, now_ms: i64, window_ms: i64) -> bool {
        now_ms - self.window_start > window_ms
    }

    fn reset(&mut self, now_ms: i64) {
        self.count = 0;
        self.window_start = now_ms;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    /// Whole seconds until the window reopens; only set when denied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStats {
    pub current_count: u32,
    pub total_requests: u64,
    pub recent_requests: Vec<i64>,
    pub window_start: i64,
    pub window_end: i64,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    store: Arc<dyn KeyValueStore>,
    // Serializes read-modify-write cycles on records.
    write_lock: Mutex<()>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            config,
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub async fn check(&self, user_id: &str) -> RateLimitDecision {
        self.check_at(user_id, now_ms()).await
    }

    /// Decides admission without consuming a slot. Storage failures admit.
    pub async fn check_at(&self, user_id: &str, now_ms: i64) -> RateLimitDecision {
        match self.try_check(user_id, now_ms).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!("Rate limit check failed for {user_id}, allowing: {e}");
                self.decision(true, self.config.max_requests, now_ms, None)
            }
        }
    }

    pub async fn increment(&self, user_id: &str, endpoint: &str) -> bool {
        self.increment_at(user_id, endpoint, now_ms()).await
    }

    /// Consumes one slot unless the window is already full. An expired window
    /// restarts at `now_ms` first. Returns whether a slot was taken.
    pub async fn increment_at(&self, user_id: &str, endpoint: &str, now_ms: i64) -> bool {
        let decision = self.acquire_at(user_id, endpoint, now_ms).await;
        if !decision.allowed {
            warn!("Refused to count a request for {user_id} past the limit");
        }
        decision.allowed
    }

    pub async fn acquire(&self, user_id: &str, endpoint: &str) -> RateLimitDecision {
        self.acquire_at(user_id, endpoint, now_ms()).await
    }

    /// Checks and consumes a slot in one step, so overlapping requests from
    /// one user cannot both take the last slot. Storage failures admit.
    pub async fn acquire_at(&self, user_id: &str, endpoint: &str, now_ms: i64) -> RateLimitDecision {
        match self.try_acquire(user_id, endpoint, now_ms).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!("Rate limit acquire failed for {user_id}, allowing: {e}");
                self.decision(true, self.config.max_requests, now_ms, None)
            }
        }
    }

    pub async fn get_user_stats(&self, user_id: &str) -> Result<RateLimitStats, StoreError> {
        self.get_user_stats_at(user_id, now_ms()).await
    }

    pub async fn get_user_stats_at(
        &self,
        user_id: &str,
        now_ms: i64,
    ) -> Result<RateLimitStats, StoreError> {
        let record = self.load(user_id, now_ms).await?;
        let expired = record.expired(now_ms, self.config.window_ms);
        let recent_requests = record
            .history
            .iter()
            .map(|entry| entry.timestamp)
            .filter(|ts| *ts > now_ms - self.config.window_ms)
            .collect();

        Ok(RateLimitStats {
            current_count: if expired { 0 } else { record.count },
            total_requests: record.total_requests,
            recent_requests,
            window_start: record.window_start,
            window_end: record.window_start + self.config.window_ms,
        })
    }

    async fn try_check(&self, user_id: &str, now_ms: i64) -> Result<RateLimitDecision, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.load(user_id, now_ms).await?;
        let max = self.config.max_requests;

        if record.expired(now_ms, self.config.window_ms) {
            info!("Rate limit window expired for {user_id}, resetting");
            record.reset(now_ms);
            self.save(&record).await?;
            return Ok(self.decision(true, max.saturating_sub(1), now_ms, None));
        }

        if record.count >= max {
            return Ok(self.denied(&record, now_ms));
        }

        let remaining = max - record.count - 1;
        Ok(self.decision(true, remaining, record.window_start, None))
    }

    async fn try_acquire(
        &self,
        user_id: &str,
        endpoint: &str,
        now_ms: i64,
    ) -> Result<RateLimitDecision, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.load(user_id, now_ms).await?;
        let max = self.config.max_requests;

        if record.expired(now_ms, self.config.window_ms) {
            record.reset(now_ms);
        }
        if record.count >= max {
            return Ok(self.denied(&record, now_ms));
        }

        record.count += 1;
        record.total_requests += 1;
        record.history.push(RequestEntry {
            timestamp: now_ms,
            endpoint: endpoint.to_string(),
        });
        let overflow = record.history.len().saturating_sub(HISTORY_CAP);
        record.history.drain(..overflow);
        self.save(&record).await?;
        debug!("Rate limit for {user_id}: {}/{max}", record.count);

        Ok(self.decision(true, max - record.count, record.window_start, None))
    }

    fn denied(&self, record: &RateLimitRecord, now_ms: i64) -> RateLimitDecision {
        let window_end = record.window_start + self.config.window_ms;
        let retry_after = ((window_end - now_ms).max(0) as u64).div_ceil(1000);
        info!(
            "Rate limit exceeded for {} ({}/{}), retry in {retry_after}s",
            record.user_id, record.count, self.config.max_requests
        );
        self.decision(false, 0, record.window_start, Some(retry_after))
    }

    /// Idle records expire after this long; the lifetime total goes with them.
    fn record_ttl(&self) -> std::time::Duration {
        let window = self.config.window_ms.max(0) as u64;
        std::time::Duration::from_millis(window.saturating_mul(RECORD_TTL_WINDOWS))
    }

    fn decision(
        &self,
        allowed: bool,
        remaining: u32,
        window_start: i64,
        retry_after: Option<u64>,
    ) -> RateLimitDecision {
        RateLimitDecision {
            allowed,
            limit: self.config.max_requests,
            remaining,
            reset_at: from_ms(window_start + self.config.window_ms),
            retry_after,
        }
    }

    async fn load(&self, user_id: &str, now_ms: i64) -> Result<RateLimitRecord, StoreError> {
        let stored =
            load_json::<RateLimitRecord>(self.store.as_ref(), &keys::rate_limit(user_id)).await?;
        Ok(stored.unwrap_or_else(|| RateLimitRecord::fresh(user_id, now_ms)))
    }

    async fn save(&self, record: &RateLimitRecord) -> Result<(), StoreError> {
        save_json(
            self.store.as_ref(),
            &keys::rate_limit(&record.user_id),
            record,
            Some(self.record_ttl()),
        )
        .await
    }
}

/// Stamps `X-RateLimit-*` headers, plus `Retry-After` when denied.
pub fn apply_rate_limit_headers(res: &mut Response, decision: &RateLimitDecision) {
    let headers = res.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert(RATE_LIMIT_LIMIT, value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert(RATE_LIMIT_REMAINING, value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.reset_at.timestamp().to_string()) {
        headers.insert(RATE_LIMIT_RESET, value);
    }
    if let Some(retry_after) = decision.retry_after {
        if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
            headers.insert(RETRY_AFTER, value);
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}
