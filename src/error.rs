//! Error types for the document graph pipeline

use std::fmt;

use thiserror::Error;

/// Pipeline stage a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    EntityExtraction,
    RelationExtraction,
    Assembly,
    Serialization,
    Export,
    Retrieval,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Load => "load",
            Stage::EntityExtraction => "entity extraction",
            Stage::RelationExtraction => "relation extraction",
            Stage::Assembly => "graph assembly",
            Stage::Serialization => "serialization",
            Stage::Export => "graph store export",
            Stage::Retrieval => "retrieval",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Cannot read document {path}: {message}")]
    TextSource { path: String, message: String },

    #[error("Completion error: {0}")]
    Completion(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Graph invariant violated: {0}")]
    GraphInvariant(String),

    #[error("Graph store error: {0}")]
    Store(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("{stage} failed for {document}: {source}")]
    Stage {
        stage: Stage,
        document: String,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap an error with the stage and document it belongs to.
    pub fn at_stage(self, stage: Stage, document: impl Into<String>) -> Self {
        Error::Stage {
            stage,
            document: document.into(),
            source: Box::new(self),
        }
    }

    /// Whether another attempt of the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transient(_) | Error::RateLimited { .. } => true,
            Error::Stage { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Server-provided wait before the next attempt.
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Error::RateLimited {
                retry_after_secs: Some(secs),
                ..
            } => Some(std::time::Duration::from_secs(*secs)),
            Error::Stage { source, .. } => source.retry_after(),
            _ => None,
        }
    }

    /// Stage recorded on this error, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

/// Connection drops and transient server errors may succeed on another
/// attempt; everything else is a store failure.
impl From<neo4rs::Error> for Error {
    fn from(err: neo4rs::Error) -> Self {
        use neo4rs::{Neo4jClientErrorKind, Neo4jErrorKind};

        let transient = match &err {
            neo4rs::Error::IOError { .. } | neo4rs::Error::ConnectionError => true,
            neo4rs::Error::Neo4j(e) => matches!(
                e.kind(),
                Neo4jErrorKind::Transient | Neo4jErrorKind::Client(Neo4jClientErrorKind::SessionExpired)
            ),
            _ => false,
        };
        if transient {
            Error::Transient(format!("neo4j: {}", err))
        } else {
            Error::Store(err.to_string())
        }
    }
}

/// Extension for attaching stage context to results.
pub trait StageContext<T> {
    fn at_stage(self, stage: Stage, document: &str) -> Result<T>;
}

impl<T> StageContext<T> for Result<T> {
    fn at_stage(self, stage: Stage, document: &str) -> Result<T> {
        self.map_err(|e| e.at_stage(stage, document))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_text_source() {
        let err = Error::TextSource {
            path: "contract.pdf".to_string(),
            message: "unsupported format".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("contract.pdf"));
        assert!(msg.contains("unsupported format"));
    }

    #[test]
    fn test_error_display_completion() {
        let err = Error::Completion("401 unauthorized".to_string());
        assert!(err.to_string().contains("Completion error"));
        assert!(err.to_string().contains("401"));
    }

    #[test]
    fn test_error_display_parse() {
        let err = Error::Parse("expected array".to_string());
        assert!(err.to_string().contains("Parse error"));
    }

    #[test]
    fn test_error_display_store() {
        let err = Error::Store("connection refused".to_string());
        let msg = err.to_string();
        assert!(msg.contains("Graph store error"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn stage_error_names_stage_and_document() {
        let err = Error::Parse("not json".to_string())
            .at_stage(Stage::EntityExtraction, "docs/lease.txt");
        let msg = err.to_string();

        assert!(msg.starts_with("entity extraction failed for docs/lease.txt"));
        assert!(msg.contains("not json"));
        assert_eq!(err.stage(), Some(Stage::EntityExtraction));
    }

    #[test]
    fn stage_error_exposes_source() {
        use std::error::Error as StdError;

        let err = Error::Store("down".to_string()).at_stage(Stage::Export, "a.json");
        let source = err.source().expect("source");
        assert!(source.to_string().contains("down"));
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(Error::Transient("429".to_string()).is_retryable());
        assert!(Error::Transient("reset".to_string())
            .at_stage(Stage::RelationExtraction, "x")
            .is_retryable());
        assert!(!Error::Completion("401".to_string()).is_retryable());
        assert!(!Error::Parse("bad".to_string()).is_retryable());
        assert!(!Error::Store("down".to_string()).is_retryable());
    }

    #[test]
    fn rate_limit_carries_retry_hint() {
        let err = Error::RateLimited {
            message: "slow down".to_string(),
            retry_after_secs: Some(7),
        };
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(std::time::Duration::from_secs(7)));
        assert_eq!(Error::Transient("x".to_string()).retry_after(), None);
    }

    #[test]
    fn stage_context_wraps_results() {
        let result: Result<()> = Err(Error::Validation("bad".to_string()));
        let err = result.at_stage(Stage::Assembly, "doc").unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Assembly));
    }

    #[test]
    fn test_error_from_io_various_kinds() {
        let kinds = [
            std::io::ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied,
            std::io::ErrorKind::TimedOut,
        ];

        for kind in kinds {
            let io_err = std::io::Error::new(kind, "test");
            let err: Error = io_err.into();
            assert!(matches!(err, Error::IoError(_)));
        }
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();

        assert!(matches!(err, Error::SerializationError(_)));
        assert!(err.to_string().contains("Serialization error"));
    }

    #[test]
    fn neo4j_connection_failures_are_retryable() {
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err: Error = neo4rs::Error::IOError { detail: reset }.into();
        assert!(matches!(err, Error::Transient(_)));
        assert!(err.is_retryable());

        let err: Error = neo4rs::Error::ConnectionError.into();
        assert!(err.is_retryable());
    }

    #[test]
    fn neo4j_protocol_failures_are_fatal() {
        let err: Error = neo4rs::Error::InvalidConfig.into();
        assert!(matches!(err, Error::Store(_)));
        assert!(!err.is_retryable());

        let err: Error = neo4rs::Error::AuthenticationError("bad credentials".to_string()).into();
        assert!(matches!(err, Error::Store(_)));
    }

    #[test]
    fn test_stage_display_names() {
        assert_eq!(Stage::Load.to_string(), "load");
        assert_eq!(Stage::Export.to_string(), "graph store export");
        assert_eq!(Stage::Assembly.to_string(), "graph assembly");
    }
}
