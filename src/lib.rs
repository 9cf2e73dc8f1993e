//! Document to knowledge graph library
//!
//! This library provides tools to:
//! - Load plain-text documents and split them into chunks
//! - Extract typed entities and relations with an LLM (OpenAI, Gemini, Ollama)
//! - Assemble a per-document graph and save it as JSON or GraphML
//! - Export graphs to Neo4j with entity embeddings and a vector index
//! - Retrieve graph context for a natural-language query

pub mod completion;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod export;
pub mod extraction;
pub mod graph;
pub mod integrations;
pub mod pipeline;
pub mod retriever;
pub mod store;
pub mod text;

// Re-export common types
pub use completion::{build_completion_provider, CompletionProvider, CompletionRequest, RetryPolicy};
pub use config::Config;
pub use embeddings::{build_embedder, EmbeddingProvider, HashEmbedder};
pub use error::{Error, Result, Stage};
pub use export::{ExportOptions, ExportSummary, GraphStoreExporter};
pub use extraction::{EntityExtractor, ExtractionOptions, RelationExtractor};
pub use graph::{DocumentGraph, Entity, GraphAssembler, GraphStatistics, Relation};
pub use pipeline::DocumentPipeline;
pub use retriever::GraphRetriever;
pub use store::{GraphStore, InMemoryGraphStore, Neo4jGraphStore};
pub use text::{Chunker, FileTextSource, TextSource};

// Commands module uses re-exported types, so it must be declared after the re-exports
pub mod commands;
