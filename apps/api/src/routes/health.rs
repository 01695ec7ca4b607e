use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /health
/// Reports service version plus generator and durable-store reachability.
/// Degraded dependencies do not fail the check; the service keeps serving.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let (generator_ok, store_ok) = tokio::join!(
        state.generation.health_check(),
        state.cache.is_durable_healthy()
    );
    let status = if generator_ok && store_ok { "ok" } else { "degraded" };

    Json(json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "service": env!("CARGO_PKG_NAME"),
        "generator": {
            "name": state.generation.generator_name(),
            "mock": state.generation.is_mock(),
            "healthy": generator_ok
        },
        "store": {
            "healthy": store_ok
        },
        "users": state.users.backend()
    }))
}
