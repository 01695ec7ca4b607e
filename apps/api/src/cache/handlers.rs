use axum::{extract::State, Json};

use crate::cache::CacheStats;
use crate::state::AppState;

/// GET /api/v1/cache/stats
pub async fn handle_cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats().await)
}
