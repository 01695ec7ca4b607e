use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::generation::fallback::FallbackGenerator;
use crate::generation::generator::{drafts_to_items, ContentGenerator};
use crate::generation::prompts::GenerationPrompt;
use crate::llm_client::LlmError;
use crate::models::content::{ContentItem, ContentSource};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOutcome {
    pub items: Vec<ContentItem>,
    pub source: ContentSource,
    pub elapsed_ms: u64,
}

/// Wraps the generator with a deadline and always returns some content.
///
/// Mock mode skips the generator entirely. Any generator failure, including
/// the deadline passing, degrades to the fallback library.
pub struct GenerationService {
    generator: Arc<dyn ContentGenerator>,
    fallback: FallbackGenerator,
    deadline: Duration,
    use_mock: bool,
}

impl GenerationService {
    pub fn new(
        generator: Arc<dyn ContentGenerator>,
        fallback: FallbackGenerator,
        deadline: Duration,
        use_mock: bool,
    ) -> Self {
        Self {
            generator,
            fallback,
            deadline,
            use_mock,
        }
    }

    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    pub fn is_mock(&self) -> bool {
        self.use_mock
    }

    pub async fn health_check(&self) -> bool {
        self.use_mock || self.generator.health_check().await
    }

    pub fn fallback_content(&self, count: usize) -> Vec<ContentItem> {
        self.fallback.pick(count, ContentSource::Fallback)
    }

    pub async fn generate(&self, prompt: &GenerationPrompt) -> GenerationOutcome {
        let started = Instant::now();

        if self.use_mock {
            let items = self.fallback.pick(prompt.count, ContentSource::Mock);
            info!("Mock generation produced {} items", items.len());
            return outcome(items, ContentSource::Mock, started);
        }

        let result = match tokio::time::timeout(self.deadline, self.generator.generate(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(self.deadline)),
        };

        match result.and_then(non_empty) {
            Ok(drafts) => {
                let items = drafts_to_items(drafts, prompt.count, Utc::now());
                info!(
                    "{} generated {} items in {}ms",
                    self.generator.name(),
                    items.len(),
                    started.elapsed().as_millis()
                );
                outcome(items, ContentSource::Ollama, started)
            }
            Err(e) => {
                warn!("Generation failed, serving fallback content: {e}");
                let items = self.fallback_content(prompt.count);
                outcome(items, ContentSource::Fallback, started)
            }
        }
    }
}

fn non_empty<T>(drafts: Vec<T>) -> Result<Vec<T>, LlmError> {
    if drafts.is_empty() {
        Err(LlmError::EmptyContent)
    } else {
        Ok(drafts)
    }
}

fn outcome(items: Vec<ContentItem>, source: ContentSource, started: Instant) -> GenerationOutcome {
    GenerationOutcome {
        items,
        source,
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::llm_client::DraftContent;

    pub enum Behaviour {
        Drafts,
        Fail,
        Hang,
    }

    /// In-process generator for tests.
    pub struct StubGenerator {
        pub behaviour: Behaviour,
        pub calls: AtomicUsize,
    }

    impl StubGenerator {
        pub fn new(behaviour: Behaviour) -> Self {
            Self {
                behaviour,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ContentGenerator for StubGenerator {
        fn name(&self) -> &str {
            "stub"
        }

        async fn generate(&self, prompt: &GenerationPrompt) -> Result<Vec<DraftContent>, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Drafts => Ok((0..prompt.count)
                    .map(|i| DraftContent {
                        content: format!("stub post {i}"),
                        hashtags: vec!["#AI".to_string()],
                        topics: vec!["ai".to_string()],
                        style: None,
                    })
                    .collect()),
                Behaviour::Fail => Err(LlmError::Exhausted { attempts: 4 }),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
            }
        }

        async fn health_check(&self) -> bool {
            !matches!(self.behaviour, Behaviour::Fail)
        }
    }
}
