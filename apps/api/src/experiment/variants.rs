use std::fmt;

use serde::{Deserialize, Serialize};

/// Experiment arm identifier, e.g. `"A"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variant(String);

impl Variant {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tunable scoring weights for one experiment arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantConfig {
    pub like_score: f64,
    pub dislike_score: f64,
    pub dwell_time_bonus: f64,
    pub scroll_depth_bonus: f64,
    pub new_user_protection_days: f64,
    /// 0.0 – 1.0
    pub new_user_weight: f64,
    pub high_positive_rate_bonus: f64,
    /// Likes in the last hour above which a user is treated as burst-liking.
    pub anti_cheat_threshold: u32,
    pub anti_cheat_penalty: f64,
    pub variant: Variant,
    pub description: String,
}

/// Ordered set of arms. Order matters: hash buckets index into it.
#[derive(Debug, Clone)]
pub struct VariantRegistry {
    configs: Vec<VariantConfig>,
}

impl VariantRegistry {
    /// Panics on an empty list; a registry without arms cannot assign anyone.
    pub fn new(configs: Vec<VariantConfig>) -> Self {
        assert!(!configs.is_empty(), "variant registry needs at least one arm");
        Self { configs }
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn variants(&self) -> impl Iterator<Item = &Variant> {
        self.configs.iter().map(|c| &c.variant)
    }

    pub fn configs(&self) -> &[VariantConfig] {
        &self.configs
    }

    pub fn get(&self, variant: &Variant) -> Option<&VariantConfig> {
        self.configs.iter().find(|c| &c.variant == variant)
    }

    /// The first registered arm is the control group.
    pub fn control(&self) -> &VariantConfig {
        &self.configs[0]
    }

    /// Picks the arm for a hash bucket.
    pub fn for_hash(&self, hash: u32) -> &VariantConfig {
        &self.configs[hash as usize % self.configs.len()]
    }

    /// Looks up an arm, falling back to control for unknown names.
    pub fn config_or_control(&self, variant: &Variant) -> &VariantConfig {
        self.get(variant).unwrap_or_else(|| self.control())
    }
}

impl Default for VariantRegistry {
    fn default() -> Self {
        Self::new(vec![
            VariantConfig {
                like_score: 5.0,
                dislike_score: -8.0,
                dwell_time_bonus: 8.0,
                scroll_depth_bonus: 3.0,
                new_user_protection_days: 7.0,
                new_user_weight: 0.5,
                high_positive_rate_bonus: 1.2,
                anti_cheat_threshold: 5,
                anti_cheat_penalty: 0.3,
                variant: Variant::new("A"),
                description: "Control: moderate weights with new-user protection".to_string(),
            },
            VariantConfig {
                like_score: 6.0,
                dislike_score: -10.0,
                dwell_time_bonus: 10.0,
                scroll_depth_bonus: 4.0,
                new_user_protection_days: 14.0,
                new_user_weight: 0.3,
                high_positive_rate_bonus: 1.3,
                anti_cheat_threshold: 3,
                anti_cheat_penalty: 0.2,
                variant: Variant::new("B"),
                description: "Extended protection: longer window, lower new-user weight"
                    .to_string(),
            },
            VariantConfig {
                like_score: 4.0,
                dislike_score: -6.0,
                dwell_time_bonus: 6.0,
                scroll_depth_bonus: 2.0,
                new_user_protection_days: 0.0,
                new_user_weight: 1.0,
                high_positive_rate_bonus: 1.0,
                anti_cheat_threshold: 10,
                anti_cheat_penalty: 0.8,
                variant: Variant::new("C"),
                description: "Simplified: no new-user protection, flat reputation".to_string(),
            },
            VariantConfig {
                like_score: 5.0,
                dislike_score: -8.0,
                dwell_time_bonus: 15.0,
                scroll_depth_bonus: 5.0,
                new_user_protection_days: 5.0,
                new_user_weight: 0.7,
                high_positive_rate_bonus: 1.1,
                anti_cheat_threshold: 5,
                anti_cheat_penalty: 0.3,
                variant: Variant::new("D"),
                description: "Dwell-weighted: dwell-time bonus nearly doubled".to_string(),
            },
        ])
    }
}

/// 32-bit rolling string hash (`h = h * 31 + unit` over UTF-16 units), made
/// non-negative. Stable across processes and platforms.
pub fn hash_user_id(user_id: &str) -> u32 {
    let hash = user_id
        .encode_utf16()
        .fold(0i32, |h, unit| {
            h.wrapping_shl(5).wrapping_sub(h).wrapping_add(unit as i32)
        });
    hash.unsigned_abs()
}
