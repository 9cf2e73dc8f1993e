//! HTTP completion backends.
//!
//! Provides clients for:
//! - OpenAI-compatible chat APIs (OpenAI, Groq)
//! - Google Gemini
//! - Ollama (local LLM)

pub mod gemini;
pub mod ollama;
pub mod openai;

pub use gemini::GeminiClient;
pub use ollama::OllamaClient;
pub use openai::OpenAIClient;

use reqwest::StatusCode;

use crate::Error;

pub(crate) const USER_AGENT: &str = concat!("docgraph/", env!("CARGO_PKG_VERSION"));

/// Maps a non-success HTTP status to an error kind: rate limits and server
/// errors can be retried, everything else is permanent.
pub(crate) fn status_error(
    backend: &str,
    status: StatusCode,
    retry_after_header: Option<u64>,
    body: &str,
) -> Error {
    let message = format!("{} error {}: {}", backend, status, body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Error::RateLimited {
            message,
            retry_after_secs: retry_after_header.or_else(|| retry_after_from_body(body)),
        };
    }
    if status.is_server_error() {
        return Error::Transient(message);
    }
    Error::Completion(message)
}

/// Transport failures (connect, reset, timeout) are retryable.
pub(crate) fn transport_error(backend: &str, err: reqwest::Error) -> Error {
    Error::Transient(format!("{} request failed: {}", backend, err))
}

pub(crate) fn retry_after_header(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

fn retry_after_from_body(body: &str) -> Option<u64> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    json.get("retry_after")
        .or_else(|| json.get("error").and_then(|e| e.get("retry_after")))
        .and_then(|v| v.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_is_retryable_with_hint() {
        let err = status_error("groq", StatusCode::TOO_MANY_REQUESTS, None, r#"{"error": {"retry_after": 12}}"#);
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(std::time::Duration::from_secs(12)));
    }

    #[test]
    fn header_hint_wins_over_body() {
        let err = status_error("groq", StatusCode::TOO_MANY_REQUESTS, Some(3), r#"{"retry_after": 12}"#);
        assert_eq!(err.retry_after(), Some(std::time::Duration::from_secs(3)));
    }

    #[test]
    fn server_errors_are_transient_and_client_errors_are_not() {
        assert!(matches!(
            status_error("openai", StatusCode::BAD_GATEWAY, None, "upstream"),
            Error::Transient(_)
        ));
        let err = status_error("openai", StatusCode::UNAUTHORIZED, None, "bad key");
        assert!(matches!(err, Error::Completion(_)));
        assert!(err.to_string().contains("openai error 401"));
    }
}
