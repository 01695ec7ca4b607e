use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::errors::AppError;
use crate::events::AbTestStats;
use crate::experiment::{AssignorStats, UserAssignment, VariantConfig};
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentStatsResponse {
    pub assignments: AssignorStats,
    pub ab_test: AbTestStats,
    pub variants: Vec<VariantConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserExperimentResponse {
    pub assignment: Option<UserAssignment>,
    pub config: VariantConfig,
}

/// GET /api/v1/experiments/stats
pub async fn handle_experiment_stats(
    State(state): State<AppState>,
) -> Result<Json<ExperimentStatsResponse>, AppError> {
    Ok(Json(ExperimentStatsResponse {
        assignments: state.assignor.get_stats(),
        ab_test: state.events.get_ab_test_stats(),
        variants: state.assignor.registry().configs().to_vec(),
    }))
}

/// GET /api/v1/experiments/users/:user_id
///
/// Assigns the user on first sight, same as any other entry point.
pub async fn handle_user_experiment(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserExperimentResponse>, AppError> {
    if user_id.trim().is_empty() {
        return Err(AppError::Validation("userId must not be empty".to_string()));
    }
    let config = state.assignor.get_user_config(&user_id).await;
    Ok(Json(UserExperimentResponse {
        assignment: state.assignor.get_assignment(&user_id),
        config,
    }))
}
