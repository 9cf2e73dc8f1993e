//! Embedding generation using OpenAI (or any compatible `/embeddings` API).

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{CreateEmbeddingRequestArgs, EmbeddingInput},
    Client as OpenAIClient,
};
use async_trait::async_trait;
use tracing::{debug, info};

use super::EmbeddingProvider;
use crate::{Error, Result};

const MAX_INPUT_CHARS: usize = 8000;

/// Embeddings through the OpenAI API.
pub struct OpenAiEmbeddings {
    client: OpenAIClient<OpenAIConfig>,
    api_key: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbeddings {
    pub fn new(api_key: impl Into<String>, model: &str, dimension: usize) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::Config("OPENAI_API_KEY is empty".to_string()));
        }
        if dimension == 0 {
            return Err(Error::Config("embedding dimension must be positive".to_string()));
        }

        let config = OpenAIConfig::new().with_api_key(api_key.clone());
        Ok(Self {
            client: OpenAIClient::with_config(config),
            api_key,
            model: model.to_string(),
            dimension,
        })
    }

    /// Point at an OpenAI-compatible server.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(self.api_key.clone())
            .with_api_base(base_url.trim_end_matches('/'));
        self.client = OpenAIClient::with_config(config);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Models that accept a `dimensions` override.
    fn supports_dimensions(&self) -> bool {
        self.model.starts_with("text-embedding-3")
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let processed: Vec<String> = texts.iter().map(|t| prepare(t)).collect();
        let inputs: Vec<String> = processed.iter().filter(|t| !t.is_empty()).cloned().collect();
        if inputs.is_empty() {
            return Ok(vec![vec![0.0; self.dimension]; texts.len()]);
        }

        let mut args = CreateEmbeddingRequestArgs::default();
        args.model(&self.model).input(EmbeddingInput::StringArray(inputs));
        if self.supports_dimensions() {
            args.dimensions(self.dimension as u32);
        }
        let request = args
            .build()
            .map_err(|e| Error::Embedding(format!("invalid embedding request: {}", e)))?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(classify)?;

        info!(
            "Generated {} embeddings, tokens used: {}",
            response.data.len(),
            response.usage.total_tokens
        );

        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        let mut embed_iter = data.into_iter();

        // Empty inputs were not sent; they get zero vectors in place.
        let mut result = Vec::with_capacity(texts.len());
        for text in &processed {
            if text.is_empty() {
                result.push(vec![0.0; self.dimension]);
            } else {
                let embedding = embed_iter
                    .next()
                    .ok_or_else(|| Error::Embedding("fewer embeddings than inputs".to_string()))?;
                result.push(embedding.embedding);
            }
        }
        Ok(result)
    }
}

/// Rate limits, server errors and dropped connections are transient.
fn classify(err: OpenAIError) -> Error {
    let transient = match &err {
        OpenAIError::Reqwest(e) => {
            e.is_timeout()
                || e.is_connect()
                || e.is_request()
                || e.status()
                    .is_some_and(|s| s.as_u16() == 429 || s.is_server_error())
        }
        OpenAIError::ApiError(api) => {
            api.code.as_deref() == Some("rate_limit_exceeded")
                || matches!(api.r#type.as_deref(), Some("server_error") | Some("requests"))
        }
        _ => false,
    };
    if transient {
        Error::Transient(format!("embeddings: {}", err))
    } else {
        Error::Embedding(err.to_string())
    }
}

/// Trimmed and cut to the input limit.
fn prepare(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() > MAX_INPUT_CHARS {
        trimmed.chars().take(MAX_INPUT_CHARS).collect()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn prepare_trims_and_truncates() {
        assert_eq!(prepare("  Uber  "), "Uber");
        let long = "é".repeat(MAX_INPUT_CHARS + 10);
        assert_eq!(prepare(&long).chars().count(), MAX_INPUT_CHARS);
    }

    fn api_error(error_type: Option<&str>, code: Option<&str>) -> OpenAIError {
        OpenAIError::ApiError(async_openai::error::ApiError {
            message: "failure".to_string(),
            r#type: error_type.map(str::to_string),
            param: None,
            code: code.map(str::to_string),
        })
    }

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        assert!(classify(api_error(Some("requests"), Some("rate_limit_exceeded"))).is_retryable());
        assert!(classify(api_error(Some("server_error"), None)).is_retryable());
    }

    #[test]
    fn request_errors_are_permanent() {
        let err = classify(api_error(Some("invalid_request_error"), Some("model_not_found")));
        assert!(matches!(err, Error::Embedding(_)));
        let err = classify(OpenAIError::InvalidArgument("bad input".to_string()));
        assert!(matches!(err, Error::Embedding(_)));
    }

    #[test]
    fn rejects_empty_key_and_zero_dimension() {
        assert!(OpenAiEmbeddings::new(" ", "text-embedding-3-small", 1536).is_err());
        assert!(OpenAiEmbeddings::new("key", "text-embedding-3-small", 0).is_err());
    }

    #[tokio::test]
    async fn blank_inputs_short_circuit_to_zero_vectors() {
        let embedder = OpenAiEmbeddings::new("test_key", "text-embedding-3-small", 4).unwrap();
        let vectors = embedder
            .embed_batch(&["   ".to_string(), "\n".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![0.0; 4], vec![0.0; 4]]);
    }

    #[tokio::test]
    async fn embeddings_map_back_to_input_positions() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(200).json_body(json!({
                "object": "list",
                "model": "text-embedding-3-small",
                "data": [
                    {"object": "embedding", "index": 1, "embedding": [0.0, 1.0]},
                    {"object": "embedding", "index": 0, "embedding": [1.0, 0.0]}
                ],
                "usage": {"prompt_tokens": 2, "total_tokens": 2}
            }));
        });

        let embedder = OpenAiEmbeddings::new("test_key", "text-embedding-3-small", 2)
            .unwrap()
            .with_base_url(&server.base_url());
        let vectors = embedder
            .embed_batch(&["Uber".to_string(), "".to_string(), "Rider".to_string()])
            .await
            .unwrap();

        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 0.0], vec![0.0, 1.0]]);
        mock.assert_calls(1);
    }
}
