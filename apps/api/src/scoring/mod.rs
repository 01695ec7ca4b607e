//! Quality scoring — turns one like/dislike into a bounded score change.
//!
//! Weight model: start at 1.0, then multiply in order
//! protection → reputation → anti-cheat, then clamp once to [0.1, 2.0].
//! Reordering changes results at the clamp boundaries.
//!
//! Numeric policy: the delta is applied in `f64`, the sum is clamped to
//! 0..=100 and rounded half away from zero to an integer score.

use serde::Serialize;

use crate::experiment::VariantConfig;
use crate::models::content::{Action, MAX_QUALITY_SCORE, MIN_QUALITY_SCORE};

pub mod handlers;
pub mod signals;

pub const MIN_WEIGHT: f64 = 0.1;
pub const MAX_WEIGHT: f64 = 2.0;
/// Reputation multiplier cap.
pub const MAX_REPUTATION_FACTOR: f64 = 1.5;
/// Base of the reputation multiplier before the positive-rate term.
const REPUTATION_BASE: f64 = 0.7;
/// Dwell above this earns the variant's dwell bonus on a like.
pub const DWELL_BONUS_THRESHOLD_MS: u64 = 3000;
/// Likes in the last hour above this earn the flat engagement bonus.
const ENGAGEMENT_LIKES_THRESHOLD: u32 = 5;
const ENGAGEMENT_BONUS: f64 = 2.0;

/// Trust signals of the acting user.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UserSignals {
    pub age_days: f64,
    /// 0.0 – 1.0; callers pass 0.5 when unknown.
    pub positive_rate: f64,
    pub recent_likes: u32,
}

impl Default for UserSignals {
    fn default() -> Self {
        Self {
            age_days: 0.0,
            positive_rate: signals::NEUTRAL_POSITIVE_RATE,
            recent_likes: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResult {
    pub new_score: i32,
    pub delta: f64,
    pub weight: f64,
    pub reason: String,
}

/// Multiplier applied to the raw like/dislike score.
pub fn calculate_user_weight(signals: &UserSignals, config: &VariantConfig) -> f64 {
    let age_days = finite_or(signals.age_days, 0.0).max(0.0);
    let positive_rate = finite_or(signals.positive_rate, signals::NEUTRAL_POSITIVE_RATE).clamp(0.0, 1.0);

    let mut weight = 1.0;

    if config.new_user_protection_days > 0.0 {
        let age_factor = (age_days / config.new_user_protection_days).min(1.0);
        if age_factor < 1.0 {
            let protection =
                config.new_user_weight + (1.0 - config.new_user_weight) * age_factor;
            weight *= protection;
        }
    }

    let reputation = REPUTATION_BASE + positive_rate * config.high_positive_rate_bonus;
    weight *= reputation.min(MAX_REPUTATION_FACTOR);

    if signals.recent_likes > config.anti_cheat_threshold {
        weight *= config.anti_cheat_penalty;
    }

    finite_or(weight, MIN_WEIGHT).clamp(MIN_WEIGHT, MAX_WEIGHT)
}

/// Scores one interaction under a variant. Never fails; the result is always
/// a clamped integer score plus an audit string.
pub fn calculate_quality_score_with_variant(
    action: Action,
    current_score: i32,
    signals: &UserSignals,
    config: &VariantConfig,
    dwell_time_ms: Option<u64>,
) -> ScoreResult {
    let weight = calculate_user_weight(signals, config);
    let long_dwell = dwell_time_ms.is_some_and(|ms| ms > DWELL_BONUS_THRESHOLD_MS);
    let engaged = signals.recent_likes > ENGAGEMENT_LIKES_THRESHOLD;

    let delta = match action {
        Action::Like => {
            let mut delta = config.like_score * weight;
            if long_dwell {
                delta += config.dwell_time_bonus;
            }
            if engaged {
                delta += ENGAGEMENT_BONUS;
            }
            delta
        }
        Action::Dislike => config.dislike_score * weight,
    };
    let delta = finite_or(delta, 0.0);

    let current = current_score.clamp(MIN_QUALITY_SCORE, MAX_QUALITY_SCORE);
    let new_score = (current as f64 + delta)
        .clamp(MIN_QUALITY_SCORE as f64, MAX_QUALITY_SCORE as f64)
        .round() as i32;

    ScoreResult {
        new_score,
        delta,
        weight,
        reason: score_reason(action, weight, config, long_dwell, engaged),
    }
}

fn score_reason(
    action: Action,
    weight: f64,
    config: &VariantConfig,
    long_dwell: bool,
    engaged: bool,
) -> String {
    match action {
        Action::Like => {
            let mut reason = format!("like: {} × {:.2}", config.like_score, weight);
            if long_dwell {
                reason.push_str(&format!(" + dwell: {}", config.dwell_time_bonus));
            }
            if engaged {
                reason.push_str(&format!(" + engagement: {ENGAGEMENT_BONUS}"));
            }
            reason
        }
        Action::Dislike => format!("dislike: {} × {:.2}", config.dislike_score, weight),
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::{Variant, VariantRegistry};

    fn arm(name: &str) -> VariantConfig {
        VariantRegistry::default()
            .get(&Variant::new(name))
            .cloned()
            .unwrap()
    }

    fn signals(age_days: f64, positive_rate: f64, recent_likes: u32) -> UserSignals {
        UserSignals {
            age_days,
            positive_rate,
            recent_likes,
        }
    }

    #[test]
    fn test_brand_new_user_weight_is_protection_times_reputation() {
        // 0.5 (protection) × min(1.5, 0.7 + 0.5 × 1.2) = 0.5 × 1.3
        let weight = calculate_user_weight(&signals(0.0, 0.5, 0), &arm("A"));
        assert!((weight - 0.65).abs() < 1e-9, "weight was {weight}");
    }

    #[test]
    fn test_protection_ramps_linearly() {
        let config = arm("A");
        // Halfway through a 7-day window: 0.5 + 0.5 × 0.5 = 0.75, × 1.3
        let weight = calculate_user_weight(&signals(3.5, 0.5, 0), &config);
        assert!((weight - 0.975).abs() < 1e-9, "weight was {weight}");
        // Past the window: reputation only.
        let weight = calculate_user_weight(&signals(30.0, 0.5, 0), &config);
        assert!((weight - 1.3).abs() < 1e-9, "weight was {weight}");
    }

    #[test]
    fn test_reputation_factor_is_capped() {
        let mut config = arm("C");
        config.high_positive_rate_bonus = 5.0;
        let weight = calculate_user_weight(&signals(100.0, 1.0, 0), &config);
        assert!((weight - MAX_REPUTATION_FACTOR).abs() < 1e-9);
    }

    #[test]
    fn test_anti_cheat_scales_by_exact_penalty() {
        let config = arm("A");
        let honest = calculate_user_weight(&signals(30.0, 0.5, 0), &config);
        let bursty = calculate_user_weight(
            &signals(30.0, 0.5, config.anti_cheat_threshold + 1),
            &config,
        );
        assert!((bursty - honest * config.anti_cheat_penalty).abs() < 1e-9);
    }

    #[test]
    fn test_anti_cheat_threshold_is_exclusive() {
        let config = arm("A");
        let at = calculate_user_weight(&signals(30.0, 0.5, config.anti_cheat_threshold), &config);
        let honest = calculate_user_weight(&signals(30.0, 0.5, 0), &config);
        assert!((at - honest).abs() < 1e-9);
    }

    #[test]
    fn test_weight_is_clamped_at_floor() {
        let mut config = arm("B");
        config.anti_cheat_penalty = 0.01;
        let weight = calculate_user_weight(&signals(0.0, 0.0, 50), &config);
        assert_eq!(weight, MIN_WEIGHT);
    }

    #[test]
    fn test_negative_age_is_treated_as_zero() {
        let config = arm("A");
        let negative = calculate_user_weight(&signals(-10.0, 0.5, 0), &config);
        let zero = calculate_user_weight(&signals(0.0, 0.5, 0), &config);
        assert_eq!(negative, zero);
    }

    #[test]
    fn test_end_to_end_like_with_long_dwell() {
        // weight 0.65, delta = 5 × 0.65 + 8 = 11.25, 50 + 11.25 → 61
        let result = calculate_quality_score_with_variant(
            Action::Like,
            50,
            &signals(0.0, 0.5, 0),
            &arm("A"),
            Some(4000),
        );
        assert!((result.delta - 11.25).abs() < 1e-9, "delta was {}", result.delta);
        assert_eq!(result.new_score, 61);
        assert_eq!(result.reason, "like: 5 × 0.65 + dwell: 8");
    }

    #[test]
    fn test_rounding_is_half_away_from_zero() {
        // Reputation pinned at the 1.5 cap so the deltas are exact halves.
        let mut config = arm("C");
        config.high_positive_rate_bonus = 5.0;
        config.like_score = 5.0;
        config.dislike_score = -5.0;
        let trusted = signals(30.0, 1.0, 0);

        let up = calculate_quality_score_with_variant(Action::Like, 50, &trusted, &config, None);
        assert_eq!(up.delta, 7.5);
        assert_eq!(up.new_score, 58);

        let down =
            calculate_quality_score_with_variant(Action::Dislike, 50, &trusted, &config, None);
        assert_eq!(down.delta, -7.5);
        assert_eq!(down.new_score, 43);
    }

    #[test]
    fn test_dwell_bonus_requires_more_than_three_seconds() {
        let at_threshold = calculate_quality_score_with_variant(
            Action::Like,
            50,
            &signals(30.0, 0.5, 0),
            &arm("A"),
            Some(3000),
        );
        assert!(!at_threshold.reason.contains("dwell"));
    }

    #[test]
    fn test_engagement_bonus_for_active_likers() {
        let result = calculate_quality_score_with_variant(
            Action::Like,
            50,
            &signals(30.0, 0.5, 6),
            &arm("C"),
            None,
        );
        // C: no protection, reputation 0.7 + 0.5 = 1.2; 6 ≤ threshold 10
        assert!((result.delta - (4.0 * 1.2 + 2.0)).abs() < 1e-9);
        assert!(result.reason.contains("engagement"));
    }

    #[test]
    fn test_dislike_delta_is_negative() {
        let result = calculate_quality_score_with_variant(
            Action::Dislike,
            50,
            &signals(30.0, 0.5, 0),
            &arm("A"),
            Some(10_000),
        );
        assert!((result.delta - (-8.0 * 1.3)).abs() < 1e-9);
        assert_eq!(result.new_score, 40);
        assert_eq!(result.reason, "dislike: -8 × 1.30");
    }

    #[test]
    fn test_score_clamped_at_zero() {
        let result = calculate_quality_score_with_variant(
            Action::Dislike,
            0,
            &signals(30.0, 0.5, 0),
            &arm("B"),
            None,
        );
        assert_eq!(result.new_score, 0);
    }

    #[test]
    fn test_score_clamped_at_hundred() {
        let result = calculate_quality_score_with_variant(
            Action::Like,
            100,
            &signals(30.0, 1.0, 6),
            &arm("D"),
            Some(60_000),
        );
        assert_eq!(result.new_score, 100);
    }

    #[test]
    fn test_scores_stay_in_bounds_across_inputs() {
        let registry = VariantRegistry::default();
        for config in registry.configs() {
            for current in [-20, 0, 1, 50, 99, 100, 250] {
                for action in [Action::Like, Action::Dislike] {
                    for likes in [0, 5, 6, 11, 100] {
                        let result = calculate_quality_score_with_variant(
                            action,
                            current,
                            &signals(2.0, 0.9, likes),
                            config,
                            Some(5000),
                        );
                        assert!((0..=100).contains(&result.new_score));
                    }
                }
            }
        }
    }

    #[test]
    fn test_non_finite_signals_do_not_escape() {
        let result = calculate_quality_score_with_variant(
            Action::Like,
            50,
            &signals(f64::NAN, f64::INFINITY, 0),
            &arm("A"),
            None,
        );
        assert!((0..=100).contains(&result.new_score));
        assert!(result.weight.is_finite());
    }
}
