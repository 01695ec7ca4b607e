use std::collections::HashMap;

use crate::models::user::InteractionRecord;

/// How many of the newest interactions feed the score.
pub const DIVERSITY_WINDOW: usize = 10;
pub const NEUTRAL_DIVERSITY: f64 = 0.5;

/// Normalised Shannon entropy of topics over the newest interactions.
///
/// 0.0 means every interaction shared one topic, 1.0 means topics were spread
/// evenly. Without topic history the score is neutral.
pub fn diversity_score(history: &[InteractionRecord]) -> f64 {
    let start = history.len().saturating_sub(DIVERSITY_WINDOW);
    let mut frequency: HashMap<String, usize> = HashMap::new();
    for record in &history[start..] {
        for topic in &record.topics {
            *frequency.entry(topic.to_lowercase()).or_insert(0) += 1;
        }
    }

    let total: usize = frequency.values().sum();
    if total == 0 {
        return NEUTRAL_DIVERSITY;
    }

    let entropy: f64 = frequency
        .values()
        .map(|&count| {
            let p = count as f64 / total as f64;
            -p * p.log2()
        })
        .sum();
    let max_entropy = (frequency.len() as f64).log2();
    if max_entropy > 0.0 {
        entropy / max_entropy
    } else {
        0.0
    }
}
