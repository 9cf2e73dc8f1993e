//! Google Gemini `generateContent` client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{retry_after_header, status_error, transport_error, USER_AGENT};
use crate::completion::{CompletionProvider, CompletionRequest, ResponseFormat};
use crate::{Error, Result};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini client.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    /// Create client with API key and model.
    pub fn new<S: Into<String>>(api_key: S, model: &str) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::Config("GOOGLE_API_KEY is empty".to_string()));
        }

        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Config(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            http,
            api_key,
            base_url: GEMINI_API_URL.to_string(),
            model: model.to_string(),
        })
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Generate content for one user turn with an optional system prompt.
    pub async fn generate(&self, request: &CompletionRequest) -> Result<String> {
        let payload = GeminiRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part {
                    text: request.prompt.clone(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
                response_mime_type: (request.format == ResponseFormat::Json)
                    .then(|| "application/json".to_string()),
            },
            system_instruction: request.system.as_ref().map(|sys| SystemInstruction {
                parts: vec![Part { text: sys.clone() }],
            }),
        };

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error("gemini", e))?;

        let status = response.status();
        let retry_after = retry_after_header(&response);
        let text = response
            .text()
            .await
            .map_err(|e| transport_error("gemini", e))?;

        if !status.is_success() {
            return Err(status_error("gemini", status, retry_after, &text));
        }

        let gemini_response: GeminiResponse = serde_json::from_str(&text)
            .map_err(|e| Error::Completion(format!("Invalid Gemini response: {}", e)))?;

        let reply: String = gemini_response
            .candidates
            .first()
            .map(|c| c.content.parts.iter().map(|p| p.text.as_str()).collect())
            .unwrap_or_default();
        if reply.is_empty() {
            return Err(Error::Completion("Empty response from Gemini".to_string()));
        }
        Ok(reply)
    }
}

#[async_trait]
impl CompletionProvider for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.generate(request).await
    }
}

// === Request structures ===

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

// === Response structures ===

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}
