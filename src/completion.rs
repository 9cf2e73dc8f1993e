//! Completion providers: the request type, the provider trait, retry and
//! fallback wrappers, and the factory that builds them from settings.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::{LlmSettings, ProviderKind, ProviderSettings};
use crate::integrations::{GeminiClient, OllamaClient, OpenAIClient};
use crate::{Error, Result};

/// Hint for the shape of the response body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
}

/// One prompt to a completion backend.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub format: ResponseFormat,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            format: ResponseFormat::Text,
            temperature: crate::config::DEFAULT_TEMPERATURE,
            max_tokens: crate::config::DEFAULT_MAX_TOKENS,
        }
    }

    /// Request expecting a JSON payload.
    pub fn json(prompt: impl Into<String>) -> Self {
        Self {
            format: ResponseFormat::Json,
            ..Self::new(prompt)
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A language model that turns a prompt into raw text.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap readiness probe used for backend selection.
    async fn is_available(&self) -> bool {
        true
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

#[async_trait]
impl<P: CompletionProvider + ?Sized> CompletionProvider for Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn is_available(&self) -> bool {
        (**self).is_available().await
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        (**self).complete(request).await
    }
}

/// Bounded exponential backoff with a per-attempt timeout.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::config::DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(crate::config::DEFAULT_RETRY_BASE_DELAY_MS),
            timeout: Duration::from_secs(crate::config::DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &LlmSettings) -> Self {
        Self {
            max_attempts: settings.max_retries.max(1),
            base_delay: Duration::from_millis(settings.retry_base_delay_ms),
            timeout: Duration::from_secs(settings.timeout_secs.max(1)),
        }
    }

    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1),
    /// at least the server hint, plus up to 10% jitter.
    pub fn backoff(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base_ms = self.base_delay.as_millis() as u64;
        let computed = base_ms.saturating_mul(1u64 << exp);
        let hinted = hint.map(|h| h.as_millis() as u64).unwrap_or(0);
        let delay = computed.max(hinted);

        let jitter_cap = delay / 10;
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_cap)
        };
        Duration::from_millis(delay + jitter)
    }
}

/// Wraps a provider with timeouts and retries on transient failures.
pub struct RetryingProvider<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: CompletionProvider> RetryingProvider<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<P: CompletionProvider> CompletionProvider for RetryingProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn is_available(&self) -> bool {
        self.inner.is_available().await
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.policy.timeout, self.inner.complete(request))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::Transient(format!(
                    "{} timed out after {:?}",
                    self.inner.name(),
                    self.policy.timeout
                ))),
            };

            match result {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff(attempt, e.retry_after());
                    warn!(
                        "{} attempt {}/{} failed: {}. Retrying in {:?}",
                        self.inner.name(),
                        attempt,
                        self.policy.max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Tries providers in order, skipping unavailable ones and falling back on
/// failure. The last error is returned when every provider fails.
pub struct ProviderChain {
    providers: Vec<Box<dyn CompletionProvider>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Box<dyn CompletionProvider>>) -> Self {
        Self { providers }
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[async_trait]
impl CompletionProvider for ProviderChain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn is_available(&self) -> bool {
        for provider in &self.providers {
            if provider.is_available().await {
                return true;
            }
        }
        false
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let mut last_error = None;
        for provider in &self.providers {
            if !provider.is_available().await {
                debug!("Provider {} unavailable, skipping", provider.name());
                continue;
            }
            match provider.complete(request).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    warn!("Provider {} failed: {}", provider.name(), e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| Error::Completion("no completion provider is available".to_string())))
    }
}

/// Builds the provider chain described by `settings`.
pub fn build_completion_provider(settings: &LlmSettings) -> Result<Arc<dyn CompletionProvider>> {
    if settings.providers.is_empty() {
        return Err(Error::Config(
            "No LLM provider configured. Set GOOGLE_API_KEY, GROQ_API_KEY, OPENAI_API_KEY or OLLAMA_URL, or list providers in config.yml".to_string(),
        ));
    }

    let policy = RetryPolicy::from_settings(settings);
    let mut providers: Vec<Box<dyn CompletionProvider>> = Vec::with_capacity(settings.providers.len());
    for provider in &settings.providers {
        providers.push(build_backend(provider, &policy)?);
    }

    let names: Vec<&str> = settings.providers.iter().map(|p| p.kind.name()).collect();
    info!("Completion providers: {}", names.join(" -> "));
    Ok(Arc::new(ProviderChain::new(providers)))
}

fn build_backend(settings: &ProviderSettings, policy: &RetryPolicy) -> Result<Box<dyn CompletionProvider>> {
    let key = || {
        settings
            .api_key
            .clone()
            .ok_or_else(|| Error::Config(format!("{} provider needs an API key", settings.kind.name())))
    };
    let backend: Box<dyn CompletionProvider> = match settings.kind {
        ProviderKind::Gemini => Box::new(RetryingProvider::new(
            GeminiClient::new(key()?, &settings.model)?.with_base_url(&settings.base_url),
            policy.clone(),
        )),
        ProviderKind::Groq | ProviderKind::OpenAi => Box::new(RetryingProvider::new(
            OpenAIClient::new(key()?)?
                .with_base_url(&settings.base_url)
                .with_model(&settings.model)
                .with_label(settings.kind.name()),
            policy.clone(),
        )),
        ProviderKind::Ollama => Box::new(RetryingProvider::new(
            OllamaClient::with_url(&settings.base_url)?.with_model(&settings.model),
            policy.clone(),
        )),
    };
    Ok(backend)
}
