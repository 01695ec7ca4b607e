//! Axum route handlers for client-reported events and the event log views.

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::errors::AppError;
use crate::events::{AbTestStats, EventFilter, EventType, ExportFormat, InteractionEvent, UserSession};
use crate::experiment::Variant;
use crate::models::user::{InteractionKind, InteractionRecord, LONG_DWELL_MS};
use crate::state::AppState;

/// Most events a single listing returns.
pub const MAX_LISTED_EVENTS: usize = 100;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackEventRequest {
    pub user_id: String,
    pub event_type: EventType,
    pub content_id: Option<String>,
    pub dwell_time_ms: Option<u64>,
    pub scroll_depth: Option<f64>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct TrackEventResponse {
    pub success: bool,
    pub event: InteractionEvent,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub variant: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsResponse {
    pub events: Vec<InteractionEvent>,
    pub total: usize,
    pub stats: AbTestStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<UserSession>,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/events
///
/// Accepts only the event types clients observe themselves. Views and long
/// dwells also bump the user's counters, best-effort.
pub async fn handle_track_event(
    State(state): State<AppState>,
    Json(req): Json<TrackEventRequest>,
) -> Result<Json<TrackEventResponse>, AppError> {
    if req.user_id.trim().is_empty() {
        return Err(AppError::Validation("userId is required".to_string()));
    }
    if !matches!(req.event_type, EventType::ContentView | EventType::UserBehavior) {
        return Err(AppError::Validation(format!(
            "{} events are recorded by the server",
            req.event_type
        )));
    }

    let counted = match req.event_type {
        EventType::ContentView => Some(InteractionKind::View),
        _ if req.dwell_time_ms.is_some_and(|ms| ms > LONG_DWELL_MS) => {
            Some(InteractionKind::LongDwell)
        }
        _ => None,
    };
    if let Some(kind) = counted {
        let content_id = req.content_id.clone().unwrap_or_default();
        let record = InteractionRecord {
            topics: state.cache.content_topics(&content_id),
            content_id,
            action: kind,
            dwell_time_ms: req.dwell_time_ms,
            scroll_depth: req.scroll_depth,
            timestamp: Utc::now(),
        };
        if let Err(e) = state.users.record_interaction(&req.user_id, record).await {
            warn!("Failed to count {} for {}: {e}", kind.as_str(), req.user_id);
        }
    }

    let mut metadata = req.metadata;
    if let Some(content_id) = &req.content_id {
        metadata.insert("content_id".to_string(), json!(content_id));
    }
    if let Some(dwell) = req.dwell_time_ms {
        metadata.insert("dwell_time_ms".to_string(), json!(dwell));
    }
    if let Some(depth) = req.scroll_depth {
        metadata.insert("scroll_depth".to_string(), json!(depth));
    }

    let event = state
        .events
        .track_event(req.event_type, &req.user_id, metadata)
        .await;
    Ok(Json(TrackEventResponse {
        success: true,
        event,
    }))
}

/// GET /api/v1/events?type=&variant=&start=&end=&userId=
pub async fn handle_list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, AppError> {
    let event_type = match query.event_type.as_deref() {
        Some(raw) => Some(
            EventType::parse(raw)
                .ok_or_else(|| AppError::Validation(format!("Unknown event type: {raw}")))?,
        ),
        None => None,
    };
    let filter = EventFilter {
        event_type,
        variant: query.variant.map(Variant::new),
        start: query.start,
        end: query.end,
    };

    let mut events = state.events.get_events(&filter);
    let total = events.len();
    events.truncate(MAX_LISTED_EVENTS);
    let session = query
        .user_id
        .as_deref()
        .and_then(|user_id| state.events.get_user_session(user_id));

    Ok(Json(EventsResponse {
        events,
        total,
        stats: state.events.get_ab_test_stats(),
        session,
    }))
}

/// GET /api/v1/events/export?format=json|csv
pub async fn handle_export_events(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, AppError> {
    let format = match query.format.as_deref() {
        None => ExportFormat::Json,
        Some(raw) => ExportFormat::parse(raw)
            .ok_or_else(|| AppError::Validation(format!("Unsupported export format: {raw}")))?,
    };
    let body = state
        .events
        .export_events(format)
        .map_err(|e| AppError::Internal(e.into()))?;
    let extension = match format {
        ExportFormat::Json => "json",
        ExportFormat::Csv => "csv",
    };

    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"events.{extension}\""),
            ),
        ],
        body,
    )
        .into_response())
}
