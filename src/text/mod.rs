//! Document text: loading plain text and splitting it into chunks.

pub mod chunker;
pub mod source;

pub use chunker::{render_with_markers, Chunk, Chunker, ChunkingStrategy};
pub use source::{normalize_text, FileTextSource, SourceDocument, TextSource};
