use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lowest score an item may carry.
pub const MIN_QUALITY_SCORE: i32 = 0;
/// Highest score an item may carry.
pub const MAX_QUALITY_SCORE: i32 = 100;
/// Score assumed for content the service has never seen.
pub const DEFAULT_QUALITY_SCORE: i32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStyle {
    Casual,
    Formal,
}

impl Default for ContentStyle {
    fn default() -> Self {
        Self::Casual
    }
}

impl ContentStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Casual => "casual",
            Self::Formal => "formal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "casual" => Some(Self::Casual),
            "formal" => Some(Self::Formal),
            _ => None,
        }
    }
}

/// Where a served item came from. Reported to clients so degradation is visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentSource {
    Cache,
    Ollama,
    Mock,
    Fallback,
}

impl ContentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Ollama => "ollama",
            Self::Mock => "mock",
            Self::Fallback => "fallback",
        }
    }
}

/// A short generated post. `quality_score` is always within 0..=100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub likes: u32,
    #[serde(default)]
    pub dislikes: u32,
    pub quality_score: i32,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub style: ContentStyle,
    #[serde(default)]
    pub used_by: Vec<String>,
    #[serde(default)]
    pub reuse_count: u32,
}

impl ContentItem {
    pub fn seen_by(&self, user_id: &str) -> bool {
        self.used_by.iter().any(|u| u == user_id)
    }

    /// Records a first-time serve to `user_id`. Repeat serves are no-ops.
    pub fn mark_served(&mut self, user_id: &str) {
        if !self.seen_by(user_id) {
            self.used_by.push(user_id.to_string());
            self.reuse_count += 1;
        }
    }
}

/// Scored reaction to a piece of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Like,
    Dislike,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Dislike => "dislike",
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_item(id: &str, topics: &[&str], quality_score: i32) -> ContentItem {
    ContentItem {
        id: id.to_string(),
        content: format!("post {id}"),
        hashtags: vec![],
        topics: topics.iter().map(|t| t.to_string()).collect(),
        likes: 0,
        dislikes: 0,
        quality_score,
        generated_at: Utc::now(),
        style: ContentStyle::Casual,
        used_by: vec![],
        reuse_count: 0,
    }
}
