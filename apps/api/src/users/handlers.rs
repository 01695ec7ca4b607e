use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::errors::AppError;
use crate::models::user::{UserProfile, UserStats};
use crate::state::AppState;
use crate::users::PreferencesUpdate;

/// Most interest tags a user may keep.
const MAX_INTERESTS: usize = 20;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesResponse {
    pub profile: UserProfile,
    pub stats: UserStats,
}

/// GET /api/v1/users/:user_id/preferences
pub async fn handle_get_preferences(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<PreferencesResponse>, AppError> {
    let profile = state.users.get_or_create_profile(&user_id).await?;
    let stats = state.users.stats(&user_id).await?;
    Ok(Json(PreferencesResponse { profile, stats }))
}

/// PUT /api/v1/users/:user_id/preferences
pub async fn handle_put_preferences(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(update): Json<PreferencesUpdate>,
) -> Result<Json<PreferencesResponse>, AppError> {
    if user_id.trim().is_empty() {
        return Err(AppError::Validation("userId must not be empty".to_string()));
    }
    if update.interests.len() > MAX_INTERESTS {
        return Err(AppError::Validation(format!(
            "At most {MAX_INTERESTS} interests are allowed"
        )));
    }
    let profile = state.users.save_preferences(&user_id, update).await?;
    let stats = state.users.stats(&user_id).await?;
    Ok(Json(PreferencesResponse { profile, stats }))
}
