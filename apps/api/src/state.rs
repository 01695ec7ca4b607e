use std::sync::Arc;

use crate::cache::{CacheConfig, ContentCache};
use crate::config::Config;
use crate::events::{EventLog, EventLogConfig};
use crate::experiment::{VariantAssignor, VariantRegistry};
use crate::generation::{ContentGenerator, FallbackGenerator, GenerationService};
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::storage::KeyValueStore;
use crate::users::UserStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub assignor: Arc<VariantAssignor>,
    pub events: Arc<EventLog>,
    pub rate_limiter: Arc<RateLimiter>,
    pub cache: Arc<ContentCache>,
    /// Profile collaborator. Postgres when `DATABASE_URL` is set.
    pub users: Arc<dyn UserStore>,
    pub generation: Arc<GenerationService>,
}

impl AppState {
    /// Wires every component over one key-value store.
    pub fn new(
        config: Config,
        store: Arc<dyn KeyValueStore>,
        users: Arc<dyn UserStore>,
        generator: Arc<dyn ContentGenerator>,
    ) -> Self {
        let assignor = Arc::new(VariantAssignor::new(
            VariantRegistry::default(),
            store.clone(),
        ));
        let events = Arc::new(EventLog::new(
            EventLogConfig {
                max_events: config.event_log_cap,
                ..EventLogConfig::default()
            },
            assignor.clone(),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(
            RateLimitConfig {
                max_requests: config.rate_limit_max,
                window_ms: config.rate_limit_window_ms,
                ..RateLimitConfig::default()
            },
            store.clone(),
        ));
        let cache = Arc::new(ContentCache::new(CacheConfig::default(), store));

        let generation = Arc::new(GenerationService::new(
            generator,
            FallbackGenerator::new(config.fallback_seed),
            config.generation_deadline(),
            config.use_mock_generation,
        ));

        Self {
            config,
            assignor,
            events,
            rate_limiter,
            cache,
            users,
            generation,
        }
    }
}
