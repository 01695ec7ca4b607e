//! Axum route handlers for recording and listing interactions.

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::AppError;
use crate::experiment::Variant;
use crate::models::content::Action;
use crate::models::user::{InteractionKind, InteractionRecord, UserStats};
use crate::scoring::{calculate_quality_score_with_variant, signals, UserSignals};
use crate::state::AppState;
use crate::users::HISTORY_CAP;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRequest {
    pub user_id: String,
    pub content_id: String,
    pub action: Action,
    pub dwell_time_ms: Option<u64>,
    pub scroll_depth: Option<f64>,
    /// Overrides the topics known for the item, if any.
    pub topics: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalsMetadata {
    pub user_age_days: f64,
    pub positive_rate: f64,
    pub recent_likes: u32,
}

impl From<UserSignals> for SignalsMetadata {
    fn from(signals: UserSignals) -> Self {
        Self {
            user_age_days: signals.age_days,
            positive_rate: signals.positive_rate,
            recent_likes: signals.recent_likes,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionResponse {
    pub success: bool,
    pub content_id: String,
    pub new_score: i32,
    pub old_score: i32,
    pub delta: f64,
    pub weight: f64,
    pub reason: String,
    pub variant: Variant,
    pub user_stats: UserStats,
    pub metadata: SignalsMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub user_id: String,
    pub content_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub user_id: String,
    pub total: usize,
    pub likes: usize,
    pub dislikes: usize,
    pub views: usize,
    pub average_dwell_time_ms: Option<f64>,
    /// Newest first.
    pub interactions: Vec<InteractionRecord>,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/interactions
///
/// Scores a like/dislike under the user's variant. Profile lookups are
/// best-effort: a failing user store scores with neutral signals.
pub async fn handle_record_interaction(
    State(state): State<AppState>,
    Json(req): Json<InteractionRequest>,
) -> Result<Json<InteractionResponse>, AppError> {
    if req.user_id.trim().is_empty() || req.content_id.trim().is_empty() {
        return Err(AppError::Validation(
            "userId and contentId are required".to_string(),
        ));
    }
    let now = Utc::now();

    let config = state.assignor.get_user_config(&req.user_id).await;
    let (user_signals, prior_stats) = load_signals(&state, &req.user_id, now).await;

    let (old_score, result) = state
        .cache
        .apply_interaction(&req.content_id, req.action, |current| {
            calculate_quality_score_with_variant(
                req.action,
                current,
                &user_signals,
                &config,
                req.dwell_time_ms,
            )
        });
    info!(
        "Scored {} on {} by {} (variant {}): {} -> {} ({})",
        req.action.as_str(),
        req.content_id,
        req.user_id,
        config.variant,
        old_score,
        result.new_score,
        result.reason
    );

    let topics = req
        .topics
        .clone()
        .unwrap_or_else(|| state.cache.content_topics(&req.content_id));
    let record = InteractionRecord {
        content_id: req.content_id.clone(),
        action: InteractionKind::from(req.action),
        topics,
        dwell_time_ms: req.dwell_time_ms,
        scroll_depth: req.scroll_depth,
        timestamp: now,
    };
    let user_stats = match state.users.record_interaction(&req.user_id, record).await {
        Ok(stats) => stats,
        Err(e) => {
            warn!("Failed to record interaction for {}: {e}", req.user_id);
            let mut stats = prior_stats;
            stats.apply(InteractionKind::from(req.action), req.dwell_time_ms);
            stats
        }
    };

    state
        .events
        .track_content_interaction(
            &req.user_id,
            &req.content_id,
            req.action,
            result.new_score,
            old_score,
            &config,
        )
        .await;

    Ok(Json(InteractionResponse {
        success: true,
        content_id: req.content_id,
        new_score: result.new_score,
        old_score,
        delta: result.delta,
        weight: result.weight,
        reason: result.reason,
        variant: config.variant,
        user_stats,
        metadata: user_signals.into(),
    }))
}

/// GET /api/v1/interactions?userId=&contentId=
pub async fn handle_list_interactions(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    if query.user_id.trim().is_empty() {
        return Err(AppError::Validation("userId is required".to_string()));
    }

    let mut interactions = state
        .users
        .recent_interactions(&query.user_id, HISTORY_CAP)
        .await?;
    if let Some(content_id) = &query.content_id {
        interactions.retain(|r| &r.content_id == content_id);
    }
    interactions.reverse();

    let count = |kind: InteractionKind| interactions.iter().filter(|r| r.action == kind).count();
    let dwell: Vec<u64> = interactions.iter().filter_map(|r| r.dwell_time_ms).collect();
    let average_dwell_time_ms = if dwell.is_empty() {
        None
    } else {
        Some(dwell.iter().sum::<u64>() as f64 / dwell.len() as f64)
    };

    Ok(Json(HistoryResponse {
        user_id: query.user_id,
        total: interactions.len(),
        likes: count(InteractionKind::Like),
        dislikes: count(InteractionKind::Dislike),
        views: count(InteractionKind::View),
        average_dwell_time_ms,
        interactions,
    }))
}

/// Signals for scoring plus the counters they came from. Neutral on failure.
async fn load_signals(
    state: &AppState,
    user_id: &str,
    now: DateTime<Utc>,
) -> (UserSignals, UserStats) {
    let loaded: anyhow::Result<(UserSignals, UserStats)> = async {
        let profile = state.users.get_or_create_profile(user_id).await?;
        let stats = state.users.stats(user_id).await?;
        let history = state.users.recent_interactions(user_id, HISTORY_CAP).await?;
        Ok((signals::derive(profile.created_at, &stats, &history, now), stats))
    }
    .await;

    match loaded {
        Ok(loaded) => loaded,
        Err(e) => {
            warn!("Failed to load signals for {user_id}, scoring neutrally: {e}");
            (UserSignals::default(), UserStats::default())
        }
    }
}
