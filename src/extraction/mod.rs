//! LLM-driven extraction: untyped entities, their categorisation, and the
//! relations between them.

pub mod entity_extractor;
pub mod json;
pub mod prompts;
pub mod relation_extractor;

pub use entity_extractor::{EntityBatch, EntityExtractor};
pub use json::{extract_json, parse_records, strip_fences};
pub use prompts::Prompt;
pub use relation_extractor::{RelationBatch, RelationExtractor};

use serde_json::{Map, Value};
use tracing::warn;

use crate::completion::{CompletionProvider, CompletionRequest};
use crate::config::{Config, DEFAULT_MAX_TOKENS, DEFAULT_PARSE_ATTEMPTS, DEFAULT_TEMPERATURE};
use crate::graph::IdStrategy;
use crate::{Error, Result};

/// Knobs shared by both extractors.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Completion calls per stage before an unparseable answer is fatal.
    pub parse_attempts: u32,
    pub id_strategy: IdStrategy,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            parse_attempts: DEFAULT_PARSE_ATTEMPTS,
            id_strategy: IdStrategy::default(),
        }
    }
}

impl ExtractionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
            parse_attempts: config.extraction.parse_attempts.max(1),
            id_strategy: config.extraction.id_strategy,
        }
    }

    pub fn with_id_strategy(mut self, id_strategy: IdStrategy) -> Self {
        self.id_strategy = id_strategy;
        self
    }

    fn request(&self, system: String, prompt: String) -> CompletionRequest {
        CompletionRequest::json(prompt)
            .with_system(system)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
    }
}

/// Sends one JSON request and decodes the records under `key`.
///
/// Completion failures propagate at once (the provider already retried);
/// undecodable answers are re-requested up to `parse_attempts` times.
async fn complete_records(
    provider: &dyn CompletionProvider,
    options: &ExtractionOptions,
    request: CompletionRequest,
    key: &str,
) -> Result<Vec<Map<String, Value>>> {
    let attempts = options.parse_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        let raw = provider.complete(&request).await?;
        match parse_records(&raw, key) {
            Ok(records) => return Ok(records),
            Err(err) => {
                warn!(
                    "Unparseable {} response from {} (attempt {}/{}): {}",
                    key,
                    provider.name(),
                    attempt,
                    attempts,
                    err
                );
                last_error = Some(err);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::Parse(format!("no {} response", key))))
}

/// First non-empty string among `keys`.
fn string_field(record: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match record.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
