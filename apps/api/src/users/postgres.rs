use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::models::content::ContentStyle;
use crate::models::user::{InteractionKind, InteractionRecord, UserProfile, UserStats};
use crate::users::{normalize_interests, PreferencesUpdate, UserStore, HISTORY_CAP};

#[derive(Debug, FromRow)]
struct ProfileRow {
    user_id: String,
    interests: Vec<String>,
    language: String,
    style: String,
    created_at: DateTime<Utc>,
}

impl From<ProfileRow> for UserProfile {
    fn from(row: ProfileRow) -> Self {
        UserProfile {
            user_id: row.user_id,
            interests: row.interests,
            language: row.language,
            style: ContentStyle::parse(&row.style).unwrap_or_default(),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct InteractionRow {
    content_id: String,
    action: String,
    topics: Vec<String>,
    dwell_time_ms: Option<i64>,
    scroll_depth: Option<f64>,
    created_at: DateTime<Utc>,
}

impl InteractionRow {
    fn into_record(self) -> Option<InteractionRecord> {
        Some(InteractionRecord {
            action: InteractionKind::parse(&self.action)?,
            content_id: self.content_id,
            topics: self.topics,
            dwell_time_ms: self.dwell_time_ms.and_then(|ms| u64::try_from(ms).ok()),
            scroll_depth: self.scroll_depth,
            timestamp: self.created_at,
        })
    }
}

/// User store backed by the `user_profiles`, `user_stats` and
/// `user_interactions` tables (see `db::ensure_schema`).
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn ensure_profile(&self, user_id: &str) -> Result<()> {
        let fresh = UserProfile::new(user_id, Utc::now());
        sqlx::query(
            r#"
            INSERT INTO user_profiles (user_id, interests, language, style, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(&fresh.user_id)
        .bind(&fresh.interests)
        .bind(&fresh.language)
        .bind(fresh.style.as_str())
        .bind(fresh.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to create user profile")?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn get_or_create_profile(&self, user_id: &str) -> Result<UserProfile> {
        self.ensure_profile(user_id).await?;
        let row: ProfileRow = sqlx::query_as(
            "SELECT user_id, interests, language, style, created_at FROM user_profiles WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to load user profile")?;
        Ok(row.into())
    }

    async fn save_preferences(&self, user_id: &str, update: PreferencesUpdate) -> Result<UserProfile> {
        self.ensure_profile(user_id).await?;
        let row: ProfileRow = sqlx::query_as(
            r#"
            UPDATE user_profiles
            SET interests = $2,
                language = COALESCE($3, language),
                style = COALESCE($4, style)
            WHERE user_id = $1
            RETURNING user_id, interests, language, style, created_at
            "#,
        )
        .bind(user_id)
        .bind(normalize_interests(update.interests))
        .bind(update.language)
        .bind(update.style.map(|s| s.as_str()))
        .fetch_one(&self.pool)
        .await
        .context("Failed to save preferences")?;
        Ok(row.into())
    }

    async fn stats(&self, user_id: &str) -> Result<UserStats> {
        let stats: Option<UserStats> = sqlx::query_as(
            r#"
            SELECT total_likes, total_dislikes, total_views, total_long_dwells
            FROM user_stats WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load user stats")?;
        Ok(stats.unwrap_or_default())
    }

    async fn record_interaction(&self, user_id: &str, record: InteractionRecord) -> Result<UserStats> {
        self.ensure_profile(user_id).await?;

        let mut delta = UserStats::default();
        delta.apply(record.action, record.dwell_time_ms);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO user_interactions
                (user_id, content_id, action, topics, dwell_time_ms, scroll_depth, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user_id)
        .bind(&record.content_id)
        .bind(record.action.as_str())
        .bind(&record.topics)
        .bind(record.dwell_time_ms.and_then(|ms| i64::try_from(ms).ok()))
        .bind(record.scroll_depth)
        .bind(record.timestamp)
        .execute(&mut *tx)
        .await
        .context("Failed to insert interaction")?;

        // Ring buffer: keep only the newest rows per user.
        sqlx::query(
            r#"
            DELETE FROM user_interactions
            WHERE user_id = $1 AND id NOT IN (
                SELECT id FROM user_interactions WHERE user_id = $1 ORDER BY id DESC LIMIT $2
            )
            "#,
        )
        .bind(user_id)
        .bind(HISTORY_CAP as i64)
        .execute(&mut *tx)
        .await
        .context("Failed to trim interaction history")?;

        let stats: UserStats = sqlx::query_as(
            r#"
            INSERT INTO user_stats (user_id, total_likes, total_dislikes, total_views, total_long_dwells)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO UPDATE SET
                total_likes = user_stats.total_likes + EXCLUDED.total_likes,
                total_dislikes = user_stats.total_dislikes + EXCLUDED.total_dislikes,
                total_views = user_stats.total_views + EXCLUDED.total_views,
                total_long_dwells = user_stats.total_long_dwells + EXCLUDED.total_long_dwells
            RETURNING total_likes, total_dislikes, total_views, total_long_dwells
            "#,
        )
        .bind(user_id)
        .bind(delta.total_likes)
        .bind(delta.total_dislikes)
        .bind(delta.total_views)
        .bind(delta.total_long_dwells)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to update user stats")?;

        tx.commit().await?;
        Ok(stats)
    }

    async fn recent_interactions(&self, user_id: &str, limit: usize) -> Result<Vec<InteractionRecord>> {
        let rows: Vec<InteractionRow> = sqlx::query_as(
            r#"
            SELECT content_id, action, topics, dwell_time_ms, scroll_depth, created_at
            FROM user_interactions
            WHERE user_id = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load interactions")?;

        let mut records: Vec<InteractionRecord> =
            rows.into_iter().filter_map(InteractionRow::into_record).collect();
        records.reverse();
        Ok(records)
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
