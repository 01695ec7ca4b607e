//! Trust signals derived from the user-profile collaborator.

use chrono::{DateTime, Duration, Utc};

use crate::models::user::{InteractionKind, InteractionRecord, UserStats};
use crate::scoring::UserSignals;

/// Positive rate assumed before a user has any likes or dislikes.
pub const NEUTRAL_POSITIVE_RATE: f64 = 0.5;

/// Whole days since account creation. Clock skew never yields a negative age.
pub fn user_age_days(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - created_at).num_days().max(0) as f64
}

/// likes / (likes + dislikes), or neutral with no history.
pub fn positive_rate(stats: &UserStats) -> f64 {
    let total = stats.total_likes + stats.total_dislikes;
    if total > 0 {
        stats.total_likes as f64 / total as f64
    } else {
        NEUTRAL_POSITIVE_RATE
    }
}

/// Likes recorded within `window` before `now`.
pub fn recent_likes(history: &[InteractionRecord], now: DateTime<Utc>, window: Duration) -> u32 {
    let since = now - window;
    history
        .iter()
        .filter(|r| r.action == InteractionKind::Like && r.timestamp > since)
        .count() as u32
}

pub fn derive(
    created_at: DateTime<Utc>,
    stats: &UserStats,
    history: &[InteractionRecord],
    now: DateTime<Utc>,
) -> UserSignals {
    UserSignals {
        age_days: user_age_days(created_at, now),
        positive_rate: positive_rate(stats),
        recent_likes: recent_likes(history, now, Duration::hours(1)),
    }
}
