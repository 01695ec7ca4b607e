//! Axum route handler for the generation pipeline.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::AppError;
use crate::experiment::Variant;
use crate::generation::diversity::{diversity_score, DIVERSITY_WINDOW};
use crate::generation::prompts::{build_prompt, GenerationMode, PromptContext, TimeOfDay};
use crate::models::content::{ContentItem, ContentSource};
use crate::models::user::UserProfile;
use crate::rate_limit::{apply_rate_limit_headers, RateLimitDecision, DEFAULT_ENDPOINT};
use crate::state::AppState;

pub const DEFAULT_COUNT: usize = 3;
pub const MAX_COUNT: usize = 20;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub user_id: String,
    #[serde(default = "default_count")]
    pub count: usize,
    #[serde(default)]
    pub mode: GenerationMode,
}

fn default_count() -> usize {
    DEFAULT_COUNT
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct GenerateError {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub success: bool,
    pub contents: Vec<ContentItem>,
    pub source: ContentSource,
    pub cached_count: usize,
    pub generated_count: usize,
    pub generation_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<Variant>,
    pub rate_limit: RateLimitInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<GenerateError>,
}

// ────────────────────────────────────────────────────────────────────────────
// Handler
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/generate
///
/// Admission check → cache → take a rate-limit slot → generate the shortfall
/// → cache the result. Requests served entirely from cache are free.
pub async fn handle_generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Response, AppError> {
    let user_id = req.user_id.trim().to_string();
    if user_id.is_empty() {
        return Err(AppError::Validation("userId is required".to_string()));
    }
    if !(1..=MAX_COUNT).contains(&req.count) {
        return Err(AppError::Validation(format!(
            "count must be between 1 and {MAX_COUNT}"
        )));
    }

    let started = Utc::now();
    info!(
        "Generate request: {user_id}, {} items, mode {}",
        req.count,
        req.mode.as_str()
    );

    // Step 1: admission
    let decision = state.rate_limiter.check(&user_id).await;
    if !decision.allowed {
        return Ok(rate_limited(&state, &user_id, req.count, &decision, started));
    }

    // Step 2: experiment arm and session
    let variant = state.assignor.assign_variant(&user_id).await;
    if state.events.active_session(&user_id, started).is_none() {
        state.events.start_session(&user_id).await;
    }

    // Step 3: cache
    let profile = load_profile(&state, &user_id, started).await;
    let lookup = state
        .cache
        .get_content_for_user(&user_id, req.count, &profile.interests)
        .await;
    let cached = lookup.items;

    if cached.len() >= req.count {
        info!("Cache satisfied {user_id} with {} items", cached.len());
        // No slot consumed.
        let unspent = RateLimitDecision {
            remaining: decision.remaining.saturating_add(1).min(decision.limit),
            ..decision
        };
        let body = GenerateResponse {
            success: true,
            cached_count: cached.len(),
            contents: cached,
            source: ContentSource::Cache,
            generated_count: 0,
            generation_time_ms: elapsed_ms(started),
            variant: Some(variant),
            rate_limit: RateLimitInfo {
                remaining: unspent.remaining,
                reset_at: unspent.reset_at,
                retry_after: None,
            },
            error: None,
        };
        let mut res = Json(body).into_response();
        apply_rate_limit_headers(&mut res, &unspent);
        return Ok(res);
    }

    // Step 4: take the slot before the slow call. The early check is only a
    // prediction; another request from this user may have used it since.
    let decision = state.rate_limiter.acquire(&user_id, DEFAULT_ENDPOINT).await;
    if !decision.allowed {
        return Ok(rate_limited(&state, &user_id, req.count, &decision, started));
    }

    // Step 5: generate the shortfall
    let shortfall = req.count - cached.len();
    let recent = match state
        .users
        .recent_interactions(&user_id, DIVERSITY_WINDOW)
        .await
    {
        Ok(recent) => recent,
        Err(e) => {
            warn!("Failed to load history for {user_id}: {e}");
            Vec::new()
        }
    };
    let prompt = build_prompt(&PromptContext {
        profile: &profile,
        recent: &recent,
        time_of_day: TimeOfDay::at(started),
        mode: req.mode,
        diversity_score: diversity_score(&recent),
        count: shortfall,
    });
    let outcome = state.generation.generate(&prompt).await;

    // Step 6: cache
    let generated = state.cache.save_generated_content(&user_id, outcome.items);

    let cached_count = cached.len();
    let generated_count = generated.len();
    let mut contents = cached;
    contents.extend(generated);
    contents.truncate(req.count);

    info!(
        "Served {user_id}: {cached_count} cached + {generated_count} {} in {}ms",
        outcome.source.as_str(),
        elapsed_ms(started)
    );

    let mut res = Json(GenerateResponse {
        success: true,
        contents,
        source: outcome.source,
        cached_count,
        generated_count,
        generation_time_ms: elapsed_ms(started),
        variant: Some(variant),
        rate_limit: RateLimitInfo {
            remaining: decision.remaining,
            reset_at: decision.reset_at,
            retry_after: None,
        },
        error: None,
    })
    .into_response();
    apply_rate_limit_headers(&mut res, &decision);
    Ok(res)
}

fn rate_limited(
    state: &AppState,
    user_id: &str,
    count: usize,
    decision: &RateLimitDecision,
    started: DateTime<Utc>,
) -> Response {
    // Catalogued so reactions to these items score from what the client saw.
    let contents = state
        .cache
        .register_served(user_id, state.generation.fallback_content(count));
    let body = GenerateResponse {
        success: false,
        generated_count: 0,
        cached_count: 0,
        contents,
        source: ContentSource::Fallback,
        generation_time_ms: elapsed_ms(started),
        variant: None,
        rate_limit: RateLimitInfo {
            remaining: 0,
            reset_at: decision.reset_at,
            retry_after: decision.retry_after,
        },
        error: Some(GenerateError {
            code: "RATE_LIMIT_EXCEEDED",
            message: state.rate_limiter.config().message.clone(),
        }),
    };
    let mut res = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    apply_rate_limit_headers(&mut res, decision);
    res
}

async fn load_profile(state: &AppState, user_id: &str, now: DateTime<Utc>) -> UserProfile {
    match state.users.get_or_create_profile(user_id).await {
        Ok(profile) => profile,
        Err(e) => {
            warn!("Failed to load profile for {user_id}, using defaults: {e}");
            UserProfile::new(user_id, now)
        }
    }
}

fn elapsed_ms(started: DateTime<Utc>) -> u64 {
    (Utc::now() - started).num_milliseconds().max(0) as u64
}
