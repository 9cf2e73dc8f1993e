//! Text embeddings for entity nodes and retrieval queries.

pub mod local;
pub mod openai;

pub use local::HashEmbedder;
pub use openai::OpenAiEmbeddings;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::completion::RetryPolicy;
use crate::config::{EmbeddingBackend, EmbeddingSettings};
use crate::graph::Entity;
use crate::{Error, Result};

/// Maps text to a fixed-length vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Length of every vector this provider returns.
    fn dimension(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("no embedding returned".to_string()))
    }
}

#[async_trait]
impl<E: EmbeddingProvider + ?Sized> EmbeddingProvider for Arc<E> {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        (**self).embed_batch(texts).await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        (**self).embed(text).await
    }
}

/// Wraps an embedder with timeouts and retries on transient failures.
pub struct RetryingEmbedder<E> {
    inner: E,
    policy: RetryPolicy,
}

impl<E: EmbeddingProvider> RetryingEmbedder<E> {
    pub fn new(inner: E, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<E: EmbeddingProvider> EmbeddingProvider for RetryingEmbedder<E> {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.policy.timeout, self.inner.embed_batch(texts)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Transient(format!(
                    "embedding request timed out after {:?}",
                    self.policy.timeout
                ))),
            };

            match result {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = self.policy.backoff(attempt, e.retry_after());
                    warn!(
                        "Embedding attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt, attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Builds the embedder selected by `settings`. Remote backends are wrapped
/// in a [`RetryingEmbedder`] with `policy`.
pub fn build_embedder(settings: &EmbeddingSettings, policy: RetryPolicy) -> Result<Arc<dyn EmbeddingProvider>> {
    match settings.backend {
        EmbeddingBackend::OpenAi => {
            let api_key = settings.api_key.clone().ok_or_else(|| {
                Error::Config("OpenAI embeddings need OPENAI_API_KEY".to_string())
            })?;
            let mut embedder = OpenAiEmbeddings::new(api_key, &settings.model, settings.dimension)?;
            if let Some(base_url) = &settings.base_url {
                embedder = embedder.with_base_url(base_url);
            }
            info!(
                "Embeddings: OpenAI {} ({} dimensions)",
                settings.model, settings.dimension
            );
            Ok(Arc::new(RetryingEmbedder::new(embedder, policy)))
        }
        EmbeddingBackend::Local => {
            let embedder = HashEmbedder::new(settings.local_dimension);
            info!("Embeddings: local hashing ({} dimensions)", embedder.dimension());
            Ok(Arc::new(embedder))
        }
    }
}

/// Text embedded for an entity: `name | type | description | key: value`
/// over its scalar attributes in key order.
pub fn entity_to_text(entity: &Entity) -> String {
    let mut parts = vec![entity.name.clone(), entity.entity_type.clone()];
    if let Some(description) = entity.description.as_deref().filter(|d| !d.trim().is_empty()) {
        parts.push(description.to_string());
    }
    for (key, value) in entity.all_properties() {
        if matches!(key.as_str(), "id" | "name" | "type" | "description") {
            continue;
        }
        let rendered = match value {
            Value::String(s) if !s.trim().is_empty() => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => continue,
        };
        parts.push(format!("{}: {}", key, rendered));
    }
    parts.join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingSettings;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays scripted outcomes, then answers with unit vectors.
    struct FlakyEmbedder {
        failures: Mutex<VecDeque<Error>>,
        calls: AtomicUsize,
    }

    impl FlakyEmbedder {
        fn new(failures: Vec<Error>) -> Self {
            Self {
                failures: Mutex::new(failures.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyEmbedder {
        fn dimension(&self) -> usize {
            2
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.failures.lock().unwrap().pop_front() {
                return Err(err);
            }
            Ok(vec![vec![1.0, 0.0]; texts.len()])
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn transient_embedding_failures_are_retried() {
        let flaky = Arc::new(FlakyEmbedder::new(vec![
            Error::Transient("connection reset".to_string()),
            Error::RateLimited {
                message: "429".to_string(),
                retry_after_secs: None,
            },
        ]));
        let embedder = RetryingEmbedder::new(flaky.clone(), fast_policy(3));

        let vector = embedder.embed("Uber").await.unwrap();
        assert_eq!(vector, vec![1.0, 0.0]);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn embedding_retries_are_bounded() {
        let flaky = Arc::new(FlakyEmbedder::new(vec![
            Error::Transient("503".to_string()),
            Error::Transient("503".to_string()),
            Error::Transient("503".to_string()),
        ]));
        let embedder = RetryingEmbedder::new(flaky.clone(), fast_policy(2));

        let err = embedder.embed("Uber").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_embedding_failure_is_not_retried() {
        let flaky = Arc::new(FlakyEmbedder::new(vec![Error::Embedding("invalid model".to_string())]));
        let embedder = RetryingEmbedder::new(flaky.clone(), fast_policy(3));

        assert!(matches!(embedder.embed("Uber").await, Err(Error::Embedding(_))));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn entity_text_lists_scalar_attributes_in_order() {
        let entity = Entity::new("e1", "Uber", "ORGANIZATION")
            .with_description("Ride-hailing company")
            .with_attribute("founded", 2009)
            .with_attribute("aliases", serde_json::json!(["Uber Inc"]))
            .with_attribute("hq", "San Francisco");

        assert_eq!(
            entity_to_text(&entity),
            "Uber | ORGANIZATION | Ride-hailing company | founded: 2009 | hq: San Francisco"
        );
    }

    #[test]
    fn entity_text_without_description() {
        let entity = Entity::new("e2", "Rider", "ROLE");
        assert_eq!(entity_to_text(&entity), "Rider | ROLE");
    }

    #[test]
    fn factory_picks_local_backend() {
        let settings = EmbeddingSettings {
            backend: EmbeddingBackend::Local,
            local_dimension: 64,
            ..EmbeddingSettings::default()
        };
        assert_eq!(build_embedder(&settings, RetryPolicy::default()).unwrap().dimension(), 64);
    }

    #[test]
    fn factory_requires_key_for_openai() {
        let settings = EmbeddingSettings {
            backend: EmbeddingBackend::OpenAi,
            api_key: None,
            ..EmbeddingSettings::default()
        };
        assert!(matches!(build_embedder(&settings, RetryPolicy::default()), Err(Error::Config(_))));
    }
}
