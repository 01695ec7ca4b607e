//! The generation collaborator seam and its Ollama implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::generation::prompts::GenerationPrompt;
use crate::llm_client::{parse_drafts, DraftContent, LlmError, OllamaClient};
use crate::models::content::{ContentItem, ContentStyle};

/// Starting score for freshly generated posts.
pub const GENERATED_QUALITY_SCORE: i32 = 80;

// ────────────────────────────────────────────────────────────────────────────
// Trait
// ────────────────────────────────────────────────────────────────────────────

/// Anything that can turn a prompt into draft posts.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &GenerationPrompt) -> Result<Vec<DraftContent>, LlmError>;

    async fn health_check(&self) -> bool;
}

#[async_trait]
impl ContentGenerator for OllamaClient {
    fn name(&self) -> &str {
        self.model()
    }

    async fn generate(&self, prompt: &GenerationPrompt) -> Result<Vec<DraftContent>, LlmError> {
        let request = prompt.to_chat_request(self.model());
        let response = self.chat(&request).await?;
        parse_drafts(&response.message.content)
    }

    async fn health_check(&self) -> bool {
        OllamaClient::health_check(self).await
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Draft conversion
// ────────────────────────────────────────────────────────────────────────────

/// Turns parsed drafts into catalog items, keeping at most `count`.
pub fn drafts_to_items(drafts: Vec<DraftContent>, count: usize, now: DateTime<Utc>) -> Vec<ContentItem> {
    drafts
        .into_iter()
        .take(count)
        .map(|draft| ContentItem {
            id: format!("ollama_{}", Uuid::new_v4()),
            content: draft.content,
            hashtags: draft.hashtags,
            topics: draft.topics,
            likes: 0,
            dislikes: 0,
            quality_score: GENERATED_QUALITY_SCORE,
            generated_at: now,
            style: draft
                .style
                .as_deref()
                .and_then(ContentStyle::parse)
                .unwrap_or_default(),
            used_by: Vec::new(),
            reuse_count: 0,
        })
        .collect()
}
