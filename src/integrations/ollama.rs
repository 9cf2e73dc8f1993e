//! Ollama client for local LLM inference.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{status_error, transport_error, USER_AGENT};
use crate::completion::{CompletionProvider, CompletionRequest, ResponseFormat};
use crate::{Error, Result};

const OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3.1";

/// Ollama client for local LLM.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    /// Create new client with default URL.
    pub fn new() -> Result<Self> {
        Self::with_url(OLLAMA_URL)
    }

    /// Create client with custom URL.
    pub fn with_url(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Config(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: DEFAULT_MODEL.to_string(),
        })
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// Check if Ollama server is running.
    pub async fn is_running(&self) -> bool {
        self.http
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    /// Chat with model.
    pub async fn chat(&self, messages: Vec<ChatMessage>, request: &CompletionRequest) -> Result<String> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages,
            stream: false,
            format: (request.format == ResponseFormat::Json).then(|| "json".to_string()),
            options: ChatOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("ollama", e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error("ollama", status, None, &text));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Completion(format!("Invalid Ollama response: {}", e)))?;

        Ok(result.message.content)
    }
}

#[async_trait]
impl CompletionProvider for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn is_available(&self) -> bool {
        self.is_running().await
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system".into(),
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".into(),
            content: request.prompt.clone(),
        });
        self.chat(messages, request).await
    }
}

/// Chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer) -> OllamaClient {
        OllamaClient::with_url(&server.base_url()).expect("client")
    }

    #[tokio::test]
    async fn complete_returns_assistant_message_in_json_mode() {
        let server = MockServer::start_async().await;

        let chat_mock = server.mock(|when, then| {
            when.method(POST).path("/api/chat").matches(|req| {
                let body: serde_json::Value =
                    serde_json::from_slice(req.body().as_ref()).unwrap();
                body.get("format").and_then(|v| v.as_str()) == Some("json")
                    && body["messages"][0]["role"] == "system"
                    && body["stream"] == false
            });
            then.status(200).json_body(json!({
                "message": {
                    "role": "assistant",
                    "content": "{\"entities\": []}"
                }
            }));
        });

        let reply = client(&server)
            .complete(&CompletionRequest::json("extract").with_system("sys"))
            .await
            .unwrap();

        assert_eq!(reply, "{\"entities\": []}");
        chat_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn server_failure_is_transient() {
        let server = MockServer::start_async().await;

        let chat_mock = server.mock(|when, then| {
            when.method(POST).path("/api/chat");
            then.status(500).body("boom");
        });

        let err = client(&server)
            .complete(&CompletionRequest::new("hi"))
            .await
            .unwrap_err();

        let msg = format!("{err}");
        assert!(msg.contains("ollama error 500"));
        assert!(msg.contains("boom"));
        assert!(err.is_retryable());
        chat_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn availability_follows_tags_endpoint() {
        let healthy = MockServer::start_async().await;
        healthy.mock(|when, then| {
            when.method(GET).path("/api/tags");
            then.status(200);
        });

        let failing = MockServer::start_async().await;
        failing.mock(|when, then| {
            when.method(GET).path("/api/tags");
            then.status(503);
        });

        assert!(client(&healthy).is_available().await);
        assert!(!client(&failing).is_available().await);
    }
}
