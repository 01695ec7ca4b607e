mod cache;
mod config;
mod db;
mod errors;
mod events;
mod experiment;
mod generation;
mod jobs;
mod llm_client;
mod models;
mod rate_limit;
mod routes;
mod scoring;
mod state;
mod storage;
mod users;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::{create_pool, ensure_schema};
use crate::jobs::BackgroundJobs;
use crate::llm_client::{OllamaClient, OllamaConfig};
use crate::routes::build_router;
use crate::state::AppState;
use crate::storage::{KeyValueStore, MemoryStore, RedisStore};
use crate::users::{MemoryUserStore, PgUserStore, UserStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on malformed values)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting AIPCS API v{}", env!("CARGO_PKG_VERSION"));

    // Key-value store: Redis when configured, process memory otherwise
    let store: Arc<dyn KeyValueStore> = match &config.redis_url {
        Some(url) => match RedisStore::connect(url).await {
            Ok(redis) => Arc::new(redis),
            Err(e) => {
                warn!("Redis unavailable ({e}), falling back to in-memory store");
                Arc::new(MemoryStore::new())
            }
        },
        None => {
            info!("REDIS_URL not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    // User profiles: PostgreSQL when configured
    let users: Arc<dyn UserStore> = match &config.database_url {
        Some(url) => {
            let pool = create_pool(url).await?;
            ensure_schema(&pool).await?;
            Arc::new(PgUserStore::new(pool))
        }
        None => {
            info!("DATABASE_URL not set, using in-memory user store");
            Arc::new(MemoryUserStore::new())
        }
    };

    // Initialize generation client
    let ollama = OllamaClient::new(OllamaConfig {
        base_url: config.ollama_base_url.clone(),
        model: config.ollama_model.clone(),
        timeout: config.generation_timeout(),
        max_retries: config.generation_max_retries,
        retry_delay: config.generation_retry_delay(),
    })?;
    info!(
        "Ollama client initialized (model: {}, mock: {})",
        ollama.model(),
        config.use_mock_generation
    );

    // Build app state
    let state = AppState::new(config.clone(), store, users, Arc::new(ollama));
    let jobs = BackgroundJobs::spawn(&state);

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the web client has a fixed host

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    jobs.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
