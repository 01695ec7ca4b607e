use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::errors::AppError;
use crate::rate_limit::RateLimitStats;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatusResponse {
    pub user_id: String,
    pub max_requests: u32,
    pub window_ms: i64,
    pub stats: RateLimitStats,
}

/// GET /api/v1/rate-limit/:user_id
pub async fn handle_rate_limit_status(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<RateLimitStatusResponse>, AppError> {
    let config = state.rate_limiter.config();
    let stats = state.rate_limiter.get_user_stats(&user_id).await?;
    Ok(Json(RateLimitStatusResponse {
        max_requests: config.max_requests,
        window_ms: config.window_ms,
        user_id,
        stats,
    }))
}
