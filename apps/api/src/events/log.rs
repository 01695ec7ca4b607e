use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::events::{EventType, InteractionEvent, UserSession};
use crate::experiment::{Variant, VariantAssignor, VariantConfig};
use crate::models::content::Action;

pub const DEFAULT_MAX_EVENTS: usize = 10_000;

#[derive(Debug, Clone)]
pub struct EventLogConfig {
    pub max_events: usize,
    /// Sweeps drop events older than this.
    pub retention: Duration,
    /// Idle time after which a session is replaced.
    pub session_timeout: Duration,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            max_events: DEFAULT_MAX_EVENTS,
            retention: Duration::hours(1),
            session_timeout: Duration::minutes(30),
        }
    }
}

/// AND-combined filters for `EventLog::get_events`.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_type: Option<EventType>,
    pub variant: Option<Variant>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl EventFilter {
    fn matches(&self, event: &InteractionEvent) -> bool {
        self.event_type.map_or(true, |t| event.event_type == t)
            && self
                .variant
                .as_ref()
                .map_or(true, |v| event.variant.as_ref() == Some(v))
            && self.start.map_or(true, |start| event.timestamp >= start)
            && self.end.map_or(true, |end| event.timestamp <= end)
    }
}

/// Global event list plus per-user sessions.
///
/// Each lock is held only for the map or list operation itself; no lock is
/// ever held across an `.await`.
pub struct EventLog {
    config: EventLogConfig,
    assignor: Arc<VariantAssignor>,
    events: Mutex<VecDeque<InteractionEvent>>,
    sessions: Mutex<HashMap<String, UserSession>>,
    sequences: Mutex<HashMap<(String, EventType), u64>>,
}

impl EventLog {
    pub fn new(config: EventLogConfig, assignor: Arc<VariantAssignor>) -> Self {
        Self {
            config,
            assignor,
            events: Mutex::new(VecDeque::new()),
            sessions: Mutex::new(HashMap::new()),
            sequences: Mutex::new(HashMap::new()),
        }
    }

    pub fn assignor(&self) -> &VariantAssignor {
        &self.assignor
    }

    pub async fn track_event(
        &self,
        event_type: EventType,
        user_id: &str,
        metadata: Map<String, Value>,
    ) -> InteractionEvent {
        self.track_event_at(event_type, user_id, metadata, Utc::now())
            .await
    }

    /// Appends one event stamped with the user's current session context.
    pub async fn track_event_at(
        &self,
        event_type: EventType,
        user_id: &str,
        mut metadata: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> InteractionEvent {
        let session = self.resolve_session(user_id, now).await;

        metadata.insert("session_id".to_string(), json!(session.session_id));
        metadata.insert("page_views".to_string(), json!(session.page_views));
        metadata.insert("interactions".to_string(), json!(session.interactions));

        let sequence_id = self.next_sequence(user_id, event_type);
        let event = InteractionEvent {
            event_type,
            user_id: user_id.to_string(),
            timestamp: now,
            variant: session.variant.clone(),
            metadata,
            session_id: session.session_id.clone(),
            sequence_id,
        };

        self.append(event.clone());

        if let Some(live) = self.sessions.lock().get_mut(user_id) {
            if live.session_id == session.session_id {
                match event_type {
                    EventType::ContentView => live.page_views += 1,
                    EventType::ContentInteraction => live.interactions += 1,
                    _ => {}
                }
            }
        }

        debug!(
            "Tracked {event_type} for {user_id} (variant={:?}, seq={sequence_id})",
            event.variant.as_ref().map(|v| v.as_str())
        );
        event
    }

    /// Opens a fresh session and records the experiment exposure.
    pub async fn start_session(&self, user_id: &str) -> UserSession {
        let session = self.create_session(user_id, Utc::now()).await;
        let mut metadata = Map::new();
        metadata.insert("variant".to_string(), json!(session.variant));
        self.track_event(EventType::AbTestExposure, user_id, metadata)
            .await;
        session
    }

    /// Records the reaction and the resulting score change, then counts the
    /// interaction against the user's experiment assignment.
    pub async fn track_content_interaction(
        &self,
        user_id: &str,
        content_id: &str,
        action: Action,
        new_score: i32,
        old_score: i32,
        config: &VariantConfig,
    ) {
        let delta = new_score - old_score;
        let base = match action {
            Action::Like => config.like_score,
            Action::Dislike => config.dislike_score,
        };
        let weight = if base != 0.0 { delta as f64 / base } else { 0.0 };

        let interaction = json!({
            "content_id": content_id,
            "action": action.as_str(),
            "quality_score": new_score,
            "old_score": old_score,
            "delta": delta,
            "weight": weight,
            "config_variant": config.variant,
            "like_score": config.like_score,
            "dislike_score": config.dislike_score,
            "dwell_time_bonus": config.dwell_time_bonus,
        });
        self.track_event(EventType::ContentInteraction, user_id, as_map(interaction))
            .await;

        let update = json!({
            "content_id": content_id,
            "new_score": new_score,
            "delta": delta,
            "config_variant": config.variant,
        });
        self.track_event(EventType::QualityScoreUpdate, user_id, as_map(update))
            .await;

        self.assignor.record_interaction(user_id).await;
    }

    /// Matching events, newest first.
    pub fn get_events(&self, filter: &EventFilter) -> Vec<InteractionEvent> {
        let mut matched: Vec<InteractionEvent> = self
            .events
            .lock()
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matched
    }

    pub fn get_user_session(&self, user_id: &str) -> Option<UserSession> {
        self.sessions.lock().get(user_id).cloned()
    }

    /// Session that is still within the idle timeout at `now`.
    pub fn active_session(&self, user_id: &str, now: DateTime<Utc>) -> Option<UserSession> {
        self.sessions
            .lock()
            .get(user_id)
            .filter(|s| now - s.last_activity_at <= self.config.session_timeout)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Drops the oldest events beyond the configured cap. Returns how many went.
    pub fn truncate(&self) -> usize {
        let mut events = self.events.lock();
        truncate_front(&mut events, self.config.max_events)
    }

    /// Drops events stamped before `cutoff`. Returns how many went.
    pub fn evict_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut events = self.events.lock();
        let before = events.len();
        events.retain(|e| e.timestamp >= cutoff);
        before - events.len()
    }

    /// Drops sessions idle past the timeout. Sequence counters are kept so
    /// ids stay monotonic. Returns how many went.
    pub fn evict_idle_sessions(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, s| now - s.last_activity_at <= self.config.session_timeout);
        before - sessions.len()
    }

    /// Periodic maintenance: age eviction, then the cap, then idle sessions.
    /// Returns how many events went.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let expired = self.evict_older_than(now - self.config.retention);
        let overflow = self.truncate();
        let idle = self.evict_idle_sessions(now);
        if expired + overflow + idle > 0 {
            info!(
                "Event sweep removed {} events and {idle} idle sessions",
                expired + overflow
            );
        }
        expired + overflow
    }

    pub(crate) fn snapshot(&self) -> Vec<InteractionEvent> {
        self.events.lock().iter().cloned().collect()
    }

    fn append(&self, event: InteractionEvent) {
        let mut events = self.events.lock();
        events.push_back(event);
        truncate_front(&mut events, self.config.max_events);
    }

    async fn resolve_session(&self, user_id: &str, now: DateTime<Utc>) -> UserSession {
        let current = {
            let mut sessions = self.sessions.lock();
            match sessions.get_mut(user_id) {
                Some(session) if now - session.last_activity_at <= self.config.session_timeout => {
                    session.last_activity_at = now;
                    Some(session.clone())
                }
                _ => None,
            }
        };

        match current {
            Some(session) => session,
            None => self.create_session(user_id, now).await,
        }
    }

    async fn create_session(&self, user_id: &str, now: DateTime<Utc>) -> UserSession {
        let variant = self.assignor.assign_variant(user_id).await;
        let session = UserSession {
            session_id: format!("session_{}_{}", now.timestamp_millis(), Uuid::new_v4().simple()),
            user_id: user_id.to_string(),
            started_at: now,
            last_activity_at: now,
            page_views: 0,
            interactions: 0,
            variant: Some(variant),
        };
        self.sessions
            .lock()
            .insert(user_id.to_string(), session.clone());
        debug!("Started session {} for {user_id}", session.session_id);
        session
    }

    fn next_sequence(&self, user_id: &str, event_type: EventType) -> u64 {
        let mut sequences = self.sequences.lock();
        let counter = sequences
            .entry((user_id.to_string(), event_type))
            .or_insert(0);
        *counter += 1;
        *counter
    }
}

fn truncate_front(events: &mut VecDeque<InteractionEvent>, cap: usize) -> usize {
    let overflow = events.len().saturating_sub(cap);
    events.drain(..overflow);
    overflow
}

fn as_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
