/// LLM Client — the single point of entry for all calls to the local Ollama
/// server.
///
/// No other module may talk to Ollama directly. Generation goes through
/// `OllamaClient::chat`, health probes through `OllamaClient::health_check`.
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub mod prompts;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "gemma3:4b";
/// Longest post the service will store, in characters.
pub const MAX_CONTENT_CHARS: usize = 280;
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
/// Backoff never grows past `retry_delay * 2^MAX_BACKOFF_EXPONENT`.
const MAX_BACKOFF_EXPONENT: u32 = 3;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Gave up after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("LLM returned empty content")]
    EmptyContent,
}

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(90),
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub options: ChatOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatOptions {
    pub temperature: f64,
    pub top_p: f64,
    pub num_predict: u32,
    pub repeat_penalty: f64,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub model: String,
    pub message: ChatMessage,
    #[serde(default)]
    pub done: bool,
    pub eval_count: Option<u64>,
    pub total_duration: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OllamaErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// One post as the model wrote it, before it becomes a `ContentItem`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DraftContent {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub style: Option<String>,
}

/// Wraps the Ollama chat API with timeouts and capped exponential backoff.
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    config: OllamaConfig,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Result<Self, LlmError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Sends one chat request. Retries network errors, timeouts, 429 and 5xx.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let url = format!("{}/api/chat", self.config.base_url.trim_end_matches('/'));
        let attempts = self.config.max_retries + 1;
        let mut last_error: Option<LlmError> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let exponent = (attempt - 1).min(MAX_BACKOFF_EXPONENT);
                let delay = self.config.retry_delay * 2u32.pow(exponent);
                warn!(
                    "Ollama call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = match self.client.post(&url).json(request).send().await {
                Ok(r) => r,
                Err(e) if e.is_timeout() => {
                    last_error = Some(LlmError::Timeout(self.config.timeout));
                    continue;
                }
                Err(e) => {
                    last_error = Some(LlmError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if is_retriable(status) {
                let body = response.text().await.unwrap_or_default();
                warn!("Ollama returned {}: {}", status, body);
                last_error = Some(LlmError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<OllamaErrorBody>(&body)
                    .map(|e| e.error)
                    .unwrap_or(body);
                return Err(LlmError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let chat: ChatResponse = response.json().await?;
            debug!(
                "Ollama call succeeded: model={}, eval_count={:?}",
                chat.model, chat.eval_count
            );
            return Ok(chat);
        }

        Err(last_error.unwrap_or(LlmError::Exhausted { attempts }))
    }

    /// Models installed on the server.
    pub async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let url = format!("{}/api/tags", self.config.base_url.trim_end_matches('/'));
        let response = self.client.get(url).timeout(HEALTH_TIMEOUT).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    pub async fn health_check(&self) -> bool {
        match self.list_models().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Ollama health check failed: {e}");
                false
            }
        }
    }
}

fn is_retriable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Parses a model reply into drafts. Accepts a bare JSON array, a fenced one,
/// or an array embedded in surrounding prose.
pub fn parse_drafts(text: &str) -> Result<Vec<DraftContent>, LlmError> {
    let text = strip_json_fences(text);
    let drafts: Vec<DraftContent> = match serde_json::from_str(text) {
        Ok(drafts) => drafts,
        Err(e) => {
            let embedded = extract_json_array(text).ok_or(LlmError::Parse(e))?;
            serde_json::from_str(embedded)?
        }
    };

    let drafts: Vec<DraftContent> = drafts
        .into_iter()
        .filter_map(|mut draft| {
            draft.content = truncate_chars(draft.content.trim(), MAX_CONTENT_CHARS);
            (!draft.content.is_empty()).then_some(draft)
        })
        .collect();

    if drafts.is_empty() {
        return Err(LlmError::EmptyContent);
    }
    Ok(drafts)
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}

/// Outermost `[...]` span, if any.
fn extract_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end > start).then(|| &text[start..=end])
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode as AxumStatus, routing::post, Json, Router};
    use serde_json::json;

    use super::*;

    #[test]
    fn test_strip_json_fences_with_json_tag() {
        let input = "```json\n[{\"content\": \"x\"}]\n```";
        assert_eq!(strip_json_fences(input), "[{\"content\": \"x\"}]");
    }

    #[test]
    fn test_strip_json_fences_without_tag() {
        let input = "```\n[1]\n```";
        assert_eq!(strip_json_fences(input), "[1]");
    }

    #[test]
    fn test_strip_json_fences_no_fences() {
        assert_eq!(strip_json_fences("  [1] "), "[1]");
    }

    #[test]
    fn test_parse_drafts_from_prose() {
        let reply = "Here you go:\n[{\"content\":\"hello\",\"hashtags\":[\"#hi\"],\"topics\":[\"ai\"]}]\nEnjoy!";
        let drafts = parse_drafts(reply).unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].content, "hello");
        assert_eq!(drafts[0].topics, vec!["ai"]);
    }

    #[test]
    fn test_parse_drafts_truncates_and_drops_empty() {
        let long = "字".repeat(300);
        let reply = json!([{ "content": long }, { "content": "   " }]).to_string();
        let drafts = parse_drafts(&reply).unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].content.chars().count(), MAX_CONTENT_CHARS);
    }

    #[test]
    fn test_parse_drafts_rejects_garbage() {
        assert!(matches!(parse_drafts("no json here"), Err(LlmError::Parse(_))));
        assert!(matches!(parse_drafts("[]"), Err(LlmError::EmptyContent)));
    }

    #[test]
    fn test_retriable_statuses() {
        assert!(is_retriable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retriable(StatusCode::BAD_GATEWAY));
        assert!(!is_retriable(StatusCode::BAD_REQUEST));
    }

    fn request() -> ChatRequest {
        ChatRequest {
            model: DEFAULT_MODEL.to_string(),
            messages: vec![ChatMessage::user("hi")],
            stream: false,
            options: ChatOptions {
                temperature: 0.7,
                top_p: 0.9,
                num_predict: 800,
                repeat_penalty: 1.1,
            },
        }
    }

    /// Serves `/api/chat`, failing with `first_status` for the first `failures` calls.
    async fn fake_ollama(failures: usize, first_status: AxumStatus) -> (String, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/api/chat",
                post(
                    move |State(calls): State<Arc<AtomicUsize>>| async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        if n < failures {
                            return (first_status, Json(json!({ "error": "busy" })));
                        }
                        (
                            AxumStatus::OK,
                            Json(json!({
                                "model": DEFAULT_MODEL,
                                "message": { "role": "assistant", "content": "[]" },
                                "done": true
                            })),
                        )
                    },
                ),
            )
            .with_state(calls.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), calls)
    }

    fn client(base_url: String, max_retries: u32) -> OllamaClient {
        OllamaClient::new(OllamaConfig {
            base_url,
            max_retries,
            retry_delay: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
            ..OllamaConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_chat_retries_server_errors() {
        let (url, calls) = fake_ollama(2, AxumStatus::SERVICE_UNAVAILABLE).await;
        let response = client(url, 3).chat(&request()).await.unwrap();
        assert!(response.done);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_chat_gives_up_after_max_attempts() {
        let (url, calls) = fake_ollama(10, AxumStatus::INTERNAL_SERVER_ERROR).await;
        let err = client(url, 2).chat(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::Api { status: 500, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_chat_does_not_retry_client_errors() {
        let (url, calls) = fake_ollama(10, AxumStatus::BAD_REQUEST).await;
        let err = client(url, 3).chat(&request()).await.unwrap_err();
        match err {
            LlmError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "busy");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_health_check_fails_for_unreachable_server() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(!client(format!("http://{addr}"), 0).health_check().await);
    }
}
