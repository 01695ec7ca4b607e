use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Every variable has a default; malformed values fail startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    /// Postgres user store when set, in-memory otherwise.
    pub database_url: Option<String>,
    /// Redis key-value store when set, in-memory otherwise.
    pub redis_url: Option<String>,
    pub ollama_base_url: String,
    pub ollama_model: String,
    pub generation_timeout_ms: u64,
    pub generation_max_retries: u32,
    pub generation_retry_delay_ms: u64,
    /// Upper bound on one generate request's wait for the model.
    pub generation_deadline_ms: u64,
    pub use_mock_generation: bool,
    pub rate_limit_max: u32,
    pub rate_limit_window_ms: i64,
    pub event_log_cap: usize,
    pub fallback_seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            rust_log: "info".to_string(),
            database_url: None,
            redis_url: None,
            ollama_base_url: "http://localhost:11434".to_string(),
            ollama_model: "gemma3:4b".to_string(),
            generation_timeout_ms: 90_000,
            generation_max_retries: 3,
            generation_retry_delay_ms: 1_000,
            generation_deadline_ms: 120_000,
            use_mock_generation: false,
            rate_limit_max: 20,
            rate_limit_window_ms: 3_600_000,
            event_log_cap: 10_000,
            fallback_seed: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let text = |key: &str, default: String| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default)
        };
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Config {
            port: parse_or(&lookup, "PORT", defaults.port)?,
            rust_log: text("RUST_LOG", defaults.rust_log),
            database_url: optional("DATABASE_URL"),
            redis_url: optional("REDIS_URL"),
            ollama_base_url: text("OLLAMA_BASE_URL", defaults.ollama_base_url),
            ollama_model: text("OLLAMA_MODEL", defaults.ollama_model),
            generation_timeout_ms: parse_or(&lookup, "GENERATION_TIMEOUT_MS", defaults.generation_timeout_ms)?,
            generation_max_retries: parse_or(&lookup, "GENERATION_MAX_RETRIES", defaults.generation_max_retries)?,
            generation_retry_delay_ms: parse_or(
                &lookup,
                "GENERATION_RETRY_DELAY_MS",
                defaults.generation_retry_delay_ms,
            )?,
            generation_deadline_ms: parse_or(
                &lookup,
                "GENERATION_DEADLINE_MS",
                defaults.generation_deadline_ms,
            )?,
            use_mock_generation: parse_or(&lookup, "USE_MOCK_GENERATION", defaults.use_mock_generation)?,
            rate_limit_max: parse_or(&lookup, "RATE_LIMIT_MAX", defaults.rate_limit_max)?,
            rate_limit_window_ms: parse_or(&lookup, "RATE_LIMIT_WINDOW_MS", defaults.rate_limit_window_ms)?,
            event_log_cap: parse_or(&lookup, "EVENT_LOG_CAP", defaults.event_log_cap)?,
            fallback_seed: match optional("FALLBACK_SEED") {
                Some(raw) => Some(
                    raw.trim()
                        .parse::<u64>()
                        .context("FALLBACK_SEED must be an unsigned integer")?,
                ),
                None => None,
            },
        })
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }

    pub fn generation_retry_delay(&self) -> Duration {
        Duration::from_millis(self.generation_retry_delay_ms)
    }

    /// Whole-call deadline: room for every attempt and its backoff, capped at
    /// `generation_deadline_ms`.
    pub fn generation_deadline(&self) -> Duration {
        let attempts = self.generation_max_retries.saturating_add(1);
        let budget = (self.generation_timeout() + self.generation_retry_delay())
            .saturating_mul(attempts);
        budget.min(Duration::from_millis(self.generation_deadline_ms))
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value: {raw}")),
        None => Ok(default),
    }
}
