use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Creates and returns a PostgreSQL connection pool.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    info!("PostgreSQL connection pool established");
    Ok(pool)
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS user_profiles (
        user_id     TEXT PRIMARY KEY,
        interests   TEXT[] NOT NULL DEFAULT '{}',
        language    TEXT NOT NULL,
        style       TEXT NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_stats (
        user_id            TEXT PRIMARY KEY,
        total_likes        BIGINT NOT NULL DEFAULT 0,
        total_dislikes     BIGINT NOT NULL DEFAULT 0,
        total_views        BIGINT NOT NULL DEFAULT 0,
        total_long_dwells  BIGINT NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_interactions (
        id             BIGSERIAL PRIMARY KEY,
        user_id        TEXT NOT NULL,
        content_id     TEXT NOT NULL,
        action         TEXT NOT NULL,
        topics         TEXT[] NOT NULL DEFAULT '{}',
        dwell_time_ms  BIGINT,
        scroll_depth   DOUBLE PRECISION,
        created_at     TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS user_interactions_user_idx ON user_interactions (user_id, id DESC)",
];

/// Creates the user tables if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("Failed to apply schema")?;
    }
    info!("User schema ready");
    Ok(())
}
