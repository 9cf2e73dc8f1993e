//! OpenAI-compatible chat completion client (OpenAI, Groq).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{retry_after_header, status_error, transport_error, USER_AGENT};
use crate::completion::{CompletionProvider, CompletionRequest, ResponseFormat};
use crate::{Error, Result};

const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Client for any `/chat/completions` endpoint speaking the OpenAI protocol.
#[derive(Debug, Clone)]
pub struct OpenAIClient {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
    label: String,
}

impl OpenAIClient {
    /// Create client with API key.
    pub fn new<S: Into<String>>(api_key: S) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::Config("OpenAI-compatible API key is empty".to_string()));
        }

        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Config(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            http,
            api_key,
            base_url: OPENAI_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            label: "openai".to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// Name reported in logs and errors ("openai", "groq").
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    /// Chat completion.
    pub async fn chat_completion(
        &self,
        messages: Vec<ChatMessage>,
        temperature: f32,
        max_tokens: u32,
        json_mode: bool,
    ) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            temperature,
            max_tokens,
            response_format: json_mode.then(|| ResponseFormatSpec {
                kind: "json_object".to_string(),
            }),
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(&self.label, e))?;

        let status = response.status();
        let retry_after = retry_after_header(&response);
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(&self.label, e))?;

        if !status.is_success() {
            return Err(status_error(&self.label, status, retry_after, &text));
        }

        let chat_response: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| Error::Completion(format!("Invalid {} response: {}", self.label, e)))?;

        chat_response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| Error::Completion(format!("Empty response from {}", self.label)))
    }
}

#[async_trait]
impl CompletionProvider for OpenAIClient {
    fn name(&self) -> &str {
        &self.label
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage::new("system", system));
        }
        messages.push(ChatMessage::new("user", &request.prompt));

        self.chat_completion(
            messages,
            request.temperature,
            request.max_tokens,
            request.format == ResponseFormat::Json,
        )
        .await
    }
}

/// Chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatMessage {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormatSpec>,
}

#[derive(Debug, Serialize)]
struct ResponseFormatSpec {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn test_new_rejects_empty_key() {
        let err = OpenAIClient::new("   ").unwrap_err();
        assert!(format!("{}", err).contains("empty"));
    }

    fn client(server: &MockServer) -> OpenAIClient {
        OpenAIClient::new("test_key")
            .expect("client")
            .with_base_url(&server.base_url())
    }

    #[tokio::test]
    async fn complete_sends_system_prompt_and_json_mode() {
        let server = MockServer::start_async().await;

        let completion_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .header("Authorization", "Bearer test_key")
                .is_true(|req| {
                    let body = String::from_utf8_lossy(req.body().as_ref());
                    body.contains("\"json_object\"") && body.contains("\"role\":\"system\"")
                });
            then.status(200).json_body(json!({
                "choices": [
                    { "message": { "role": "assistant", "content": "[]" } }
                ]
            }));
        });

        let reply = client(&server)
            .complete(&CompletionRequest::json("List entities").with_system("You extract"))
            .await
            .unwrap();

        assert_eq!(reply, "[]");
        completion_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn text_requests_omit_response_format() {
        let server = MockServer::start_async().await;

        let completion_mock = server.mock(|when, then| {
            when.method(POST).path("/chat/completions").is_true(|req| {
                let body = String::from_utf8_lossy(req.body().as_ref());
                !body.contains("response_format")
            });
            then.status(200).json_body(json!({
                "choices": [
                    { "message": { "role": "assistant", "content": "Hello!" } }
                ]
            }));
        });

        let reply = client(&server)
            .complete(&CompletionRequest::new("Hi"))
            .await
            .unwrap();

        assert_eq!(reply, "Hello!");
        completion_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn rate_limit_maps_to_retryable_error() {
        let server = MockServer::start_async().await;

        let completion_mock = server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(429)
                .header("retry-after", "7")
                .body("rate limited");
        });

        let err = client(&server)
            .with_label("groq")
            .complete(&CompletionRequest::new("Hi"))
            .await
            .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("groq error 429"));
        assert!(msg.contains("rate limited"));
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(std::time::Duration::from_secs(7)));
        completion_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn client_error_is_permanent() {
        let server = MockServer::start_async().await;

        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(401).body("invalid key");
        });

        let err = client(&server)
            .complete(&CompletionRequest::new("Hi"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Completion(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn invalid_json_body_is_completion_error() {
        let server = MockServer::start_async().await;

        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).body("not json");
        });

        let err = client(&server)
            .complete(&CompletionRequest::new("Hi"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Invalid openai response"));
    }

    #[tokio::test]
    async fn empty_choices_or_null_content_is_an_error() {
        let server = MockServer::start_async().await;

        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(json!({
                "choices": [
                    { "message": { "role": "assistant", "content": null } }
                ]
            }));
        });

        let err = client(&server)
            .complete(&CompletionRequest::new("Hi"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Empty response from openai"));
    }
}
