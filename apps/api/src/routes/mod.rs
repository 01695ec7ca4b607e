pub mod health;

use axum::{
    http::Uri,
    routing::{get, post},
    Router,
};

use crate::cache::handlers as cache;
use crate::errors::AppError;
use crate::events::handlers as events;
use crate::experiment::handlers as experiments;
use crate::generation::handlers as generation;
use crate::rate_limit::handlers as rate_limit;
use crate::scoring::handlers as interactions;
use crate::state::AppState;
use crate::users::handlers as users;

async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("No route for {uri}"))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Generation
        .route("/api/v1/generate", post(generation::handle_generate))
        // Scoring
        .route(
            "/api/v1/interactions",
            post(interactions::handle_record_interaction).get(interactions::handle_list_interactions),
        )
        // Event log
        .route(
            "/api/v1/events",
            post(events::handle_track_event).get(events::handle_list_events),
        )
        .route("/api/v1/events/export", get(events::handle_export_events))
        // Experiments
        .route(
            "/api/v1/experiments/stats",
            get(experiments::handle_experiment_stats),
        )
        .route(
            "/api/v1/experiments/users/:user_id",
            get(experiments::handle_user_experiment),
        )
        // Users
        .route(
            "/api/v1/users/:user_id/preferences",
            get(users::handle_get_preferences).put(users::handle_put_preferences),
        )
        // Diagnostics
        .route(
            "/api/v1/rate-limit/:user_id",
            get(rate_limit::handle_rate_limit_status),
        )
        .route("/api/v1/cache/stats", get(cache::handle_cache_stats))
        .fallback(not_found)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{header, HeaderMap, Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;
    use crate::generation::service::testing::Behaviour;
    use crate::state::testing::test_state;

    fn app(behaviour: Behaviour, config: Config) -> (Router, AppState) {
        let (state, _) = test_state(behaviour, config);
        (build_router(state.clone()), state)
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, bytes.to_vec())
    }

    async fn call_json(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, HeaderMap, Value) {
        let (status, headers, bytes) = call(app, method, uri, body).await;
        (status, headers, serde_json::from_slice(&bytes).unwrap())
    }

    fn generate(user_id: &str, count: usize) -> Option<Value> {
        Some(json!({ "userId": user_id, "count": count }))
    }

    #[tokio::test]
    async fn test_health_reports_components() {
        let (app, _) = app(Behaviour::Drafts, Config::default());
        let (status, _, body) = call_json(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["generator"]["name"], "stub");
        assert_eq!(body["users"], "memory");
    }

    #[tokio::test]
    async fn test_unknown_route_is_json_404() {
        let (app, _) = app(Behaviour::Drafts, Config::default());
        let (status, _, body) = call_json(&app, Method::GET, "/api/v1/nowhere", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_health_degraded_when_generator_down() {
        let (app, _) = app(Behaviour::Fail, Config::default());
        let (_, _, body) = call_json(&app, Method::GET, "/health", None).await;
        assert_eq!(body["status"], "degraded");
    }

    #[tokio::test]
    async fn test_generate_fresh_content_consumes_a_slot() {
        let (app, _) = app(Behaviour::Drafts, Config::default());
        let (status, headers, body) =
            call_json(&app, Method::POST, "/api/v1/generate", generate("u1", 3)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["source"], "ollama");
        assert_eq!(body["contents"].as_array().unwrap().len(), 3);
        assert_eq!(body["generatedCount"], 3);
        assert_eq!(body["rateLimit"]["remaining"], 19);
        assert_eq!(headers["x-ratelimit-remaining"], "19");
        assert_eq!(headers["x-ratelimit-limit"], "20");
    }

    #[tokio::test]
    async fn test_generate_from_cache_is_free() {
        let (state, stub) = test_state(Behaviour::Drafts, Config::default());
        let app = build_router(state);

        call_json(&app, Method::POST, "/api/v1/generate", generate("u1", 3)).await;
        let (status, _, body) =
            call_json(&app, Method::POST, "/api/v1/generate", generate("u1", 3)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["source"], "cache");
        assert_eq!(body["cachedCount"], 3);
        assert_eq!(body["rateLimit"]["remaining"], 19);
        assert_eq!(stub.calls(), 1);

        let (_, _, limits) = call_json(&app, Method::GET, "/api/v1/rate-limit/u1", None).await;
        assert_eq!(limits["stats"]["currentCount"], 1);
        assert_eq!(limits["maxRequests"], 20);
    }

    #[tokio::test]
    async fn test_generate_rate_limited_serves_fallback() {
        let config = Config {
            rate_limit_max: 1,
            ..Config::default()
        };
        let (app, _) = app(Behaviour::Drafts, config);

        let (first, _, _) = call_json(&app, Method::POST, "/api/v1/generate", generate("u1", 2)).await;
        assert_eq!(first, StatusCode::OK);

        let (status, headers, body) =
            call_json(&app, Method::POST, "/api/v1/generate", generate("u1", 2)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["success"], false);
        assert_eq!(body["source"], "fallback");
        assert_eq!(body["error"]["code"], "RATE_LIMIT_EXCEEDED");
        assert_eq!(body["contents"].as_array().unwrap().len(), 2);
        assert_eq!(body["rateLimit"]["remaining"], 0);
        assert!(body["rateLimit"]["retryAfter"].as_u64().unwrap() > 0);
        assert!(headers.contains_key(header::RETRY_AFTER));
        assert_eq!(headers["x-ratelimit-remaining"], "0");
    }

    #[tokio::test]
    async fn test_reactions_to_rate_limited_items_score_from_served_score() {
        let config = Config {
            rate_limit_max: 1,
            ..Config::default()
        };
        let (app, _) = app(Behaviour::Drafts, config);
        call_json(&app, Method::POST, "/api/v1/generate", generate("u1", 1)).await;
        let (status, _, body) =
            call_json(&app, Method::POST, "/api/v1/generate", generate("u1", 1)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        let item = &body["contents"][0];
        let content_id = item["id"].as_str().unwrap().to_string();
        let served_score = item["qualityScore"].as_i64().unwrap();

        let like = || {
            Some(json!({ "userId": "u2", "contentId": content_id, "action": "like" }))
        };
        let (_, _, first) = call_json(&app, Method::POST, "/api/v1/interactions", like()).await;
        assert_eq!(first["oldScore"].as_i64().unwrap(), served_score);

        let (_, _, second) = call_json(&app, Method::POST, "/api/v1/interactions", like()).await;
        assert_eq!(second["oldScore"], first["newScore"]);
    }

    #[tokio::test]
    async fn test_generate_degrades_when_generator_fails() {
        let (app, _) = app(Behaviour::Fail, Config::default());
        let (status, _, body) =
            call_json(&app, Method::POST, "/api/v1/generate", generate("u1", 2)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["source"], "fallback");
        assert_eq!(body["contents"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_generate_mock_mode() {
        let config = Config {
            use_mock_generation: true,
            ..Config::default()
        };
        let (app, _) = app(Behaviour::Fail, config);
        let (_, _, body) = call_json(&app, Method::POST, "/api/v1/generate", generate("u1", 2)).await;
        assert_eq!(body["source"], "mock");
    }

    #[tokio::test]
    async fn test_generate_rejects_bad_count() {
        let (app, _) = app(Behaviour::Drafts, Config::default());
        for count in [0, 21] {
            let (status, _, body) =
                call_json(&app, Method::POST, "/api/v1/generate", generate("u1", count)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        }
    }

    #[tokio::test]
    async fn test_generate_starts_session_with_exposure() {
        let (app, state) = app(Behaviour::Drafts, Config::default());
        call_json(&app, Method::POST, "/api/v1/generate", generate("u1", 1)).await;
        call_json(&app, Method::POST, "/api/v1/generate", generate("u1", 1)).await;

        let (_, _, body) = call_json(
            &app,
            Method::GET,
            "/api/v1/events?type=ab_test_exposure&userId=u1",
            None,
        )
        .await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["session"]["userId"], "u1");
        assert!(state.events.get_user_session("u1").is_some());
    }

    #[tokio::test]
    async fn test_like_on_unknown_content() {
        let (app, _) = app(Behaviour::Drafts, Config::default());
        let (status, _, body) = call_json(
            &app,
            Method::POST,
            "/api/v1/interactions",
            Some(json!({ "userId": "u1", "contentId": "c-unknown", "action": "like" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        // Variant A, brand-new user: 5 * 0.5 * 1.3 = 3.25
        assert_eq!(body["oldScore"], 50);
        assert_eq!(body["newScore"], 53);
        assert_eq!(body["variant"], "A");
        assert_eq!(body["userStats"]["totalLikes"], 1);
        assert_eq!(body["metadata"]["positiveRate"], 0.5);

        let (_, _, events) = call_json(
            &app,
            Method::GET,
            "/api/v1/events?type=content_interaction",
            None,
        )
        .await;
        assert_eq!(events["total"], 1);
        assert_eq!(events["events"][0]["metadata"]["content_id"], "c-unknown");
    }

    #[tokio::test]
    async fn test_dislike_uses_catalog_score() {
        let (app, state) = app(Behaviour::Drafts, Config::default());
        let (_, _, generated) =
            call_json(&app, Method::POST, "/api/v1/generate", generate("u1", 1)).await;
        let content_id = generated["contents"][0]["id"].as_str().unwrap().to_string();

        let (_, _, body) = call_json(
            &app,
            Method::POST,
            "/api/v1/interactions",
            Some(json!({ "userId": "u2", "contentId": content_id, "action": "dislike" })),
        )
        .await;
        assert_eq!(body["oldScore"], 80);
        let new_score = body["newScore"].as_i64().unwrap();
        assert!(new_score < 80);
        assert_eq!(state.cache.content_score(&content_id), Some(new_score as i32));

        let (_, _, history) = call_json(
            &app,
            Method::GET,
            &format!("/api/v1/interactions?userId=u2&contentId={content_id}"),
            None,
        )
        .await;
        assert_eq!(history["total"], 1);
        assert_eq!(history["dislikes"], 1);
        assert_eq!(history["interactions"][0]["topics"], json!(["ai"]));
    }

    #[tokio::test]
    async fn test_interaction_rejects_unknown_action() {
        let (app, _) = app(Behaviour::Drafts, Config::default());
        let (status, _, _) = call(
            &app,
            Method::POST,
            "/api/v1/interactions",
            Some(json!({ "userId": "u1", "contentId": "c1", "action": "love" })),
        )
        .await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn test_client_events_bump_counters() {
        let (app, _) = app(Behaviour::Drafts, Config::default());
        let (status, _, body) = call_json(
            &app,
            Method::POST,
            "/api/v1/events",
            Some(json!({ "userId": "u1", "eventType": "content_view", "contentId": "c1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["event"]["eventType"], "content_view");
        assert_eq!(body["event"]["sequenceId"], 1);

        call_json(
            &app,
            Method::POST,
            "/api/v1/events",
            Some(json!({ "userId": "u1", "eventType": "user_behavior", "dwellTimeMs": 4500 })),
        )
        .await;
        call_json(
            &app,
            Method::POST,
            "/api/v1/events",
            Some(json!({ "userId": "u1", "eventType": "user_behavior", "dwellTimeMs": 3000 })),
        )
        .await;

        let (_, _, prefs) =
            call_json(&app, Method::GET, "/api/v1/users/u1/preferences", None).await;
        assert_eq!(prefs["stats"]["totalViews"], 1);
        assert_eq!(prefs["stats"]["totalLongDwells"], 1);
    }

    #[tokio::test]
    async fn test_server_owned_events_are_rejected() {
        let (app, _) = app(Behaviour::Drafts, Config::default());
        let (status, _, body) = call_json(
            &app,
            Method::POST,
            "/api/v1/events",
            Some(json!({ "userId": "u1", "eventType": "quality_score_update" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_list_events_rejects_unknown_type() {
        let (app, _) = app(Behaviour::Drafts, Config::default());
        let (status, _, _) = call(&app, Method::GET, "/api/v1/events?type=nope", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_export_csv() {
        let (app, _) = app(Behaviour::Drafts, Config::default());
        call_json(
            &app,
            Method::POST,
            "/api/v1/events",
            Some(json!({ "userId": "u1", "eventType": "content_view" })),
        )
        .await;

        let (status, headers, bytes) =
            call(&app, Method::GET, "/api/v1/events/export?format=csv", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "text/csv");
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("event_type,user_id,timestamp,variant,sequence_id,session_id"));
        assert!(text.contains("content_view,u1,"));

        let (status, _, _) = call(&app, Method::GET, "/api/v1/events/export?format=xml", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_experiment_endpoints() {
        let (app, _) = app(Behaviour::Drafts, Config::default());
        let (_, _, user) =
            call_json(&app, Method::GET, "/api/v1/experiments/users/u1", None).await;
        assert_eq!(user["config"]["variant"], "A");
        assert_eq!(user["assignment"]["userId"], "u1");

        let (_, _, stats) = call_json(&app, Method::GET, "/api/v1/experiments/stats", None).await;
        assert_eq!(stats["assignments"]["totalUsers"], 1);
        assert_eq!(stats["variants"].as_array().unwrap().len(), 4);
        assert!(stats["abTest"]["variants"]["D"].is_object());
    }

    #[tokio::test]
    async fn test_preferences_round_trip() {
        let (app, _) = app(Behaviour::Drafts, Config::default());
        let (status, _, body) = call_json(
            &app,
            Method::PUT,
            "/api/v1/users/u1/preferences",
            Some(json!({ "interests": ["ai", " food ", "AI"], "style": "formal" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["profile"]["interests"], json!(["ai", "food"]));
        assert_eq!(body["profile"]["style"], "formal");

        let (_, _, body) = call_json(&app, Method::GET, "/api/v1/users/u1/preferences", None).await;
        assert_eq!(body["profile"]["style"], "formal");
    }

    #[tokio::test]
    async fn test_cache_stats_after_generation() {
        let (app, _) = app(Behaviour::Drafts, Config::default());
        call_json(&app, Method::POST, "/api/v1/generate", generate("u1", 2)).await;
        let (_, _, stats) = call_json(&app, Method::GET, "/api/v1/cache/stats", None).await;
        assert_eq!(stats["fastTierUsers"], 1);
        assert_eq!(stats["fastTierItems"], 2);
        assert_eq!(stats["catalogSize"], 2);
    }
}
