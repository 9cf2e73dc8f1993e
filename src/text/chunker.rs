use serde::{Deserialize, Serialize};

/// Text segment of a document, ordered by `index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Chunk id (`chunk_<index>`), unique within a document
    pub id: String,
    /// Position of the chunk in the document
    pub index: usize,
    /// Raw text of the chunk
    pub text: String,
    /// Offset of the first unit (char or word, depending on strategy)
    pub start: usize,
    /// Offset after the last unit
    pub end: usize,
    /// Owning document id
    pub document_id: String,
}

impl Chunk {
    pub fn new(
        index: usize,
        text: String,
        start: usize,
        end: usize,
        document_id: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("chunk_{index}"),
            index,
            text,
            start,
            end,
            document_id: document_id.into(),
        }
    }
}

/// Chunking strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingStrategy {
    /// Fixed-size character windows with overlap (default)
    #[default]
    Characters,
    /// Split by words with overlap
    Words,
}

/// Chunker with overlapping windows.
#[derive(Debug, Clone)]
pub struct Chunker {
    size: usize,
    overlap: usize,
    strategy: ChunkingStrategy,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(1000, 200)
    }
}

impl Chunker {
    /// Create a character chunker.
    pub fn new(size: usize, overlap: usize) -> Self {
        Self::with_strategy(size, overlap, ChunkingStrategy::Characters)
    }

    /// Create with custom strategy.
    pub fn with_strategy(size: usize, overlap: usize, strategy: ChunkingStrategy) -> Self {
        Self {
            size: size.max(1),
            overlap: overlap.min(size.saturating_sub(1)),
            strategy,
        }
    }

    /// Split text into overlapping chunks.
    pub fn chunk(&self, text: &str, document_id: &str) -> Vec<Chunk> {
        match self.strategy {
            ChunkingStrategy::Characters => self.chunk_chars(text, document_id),
            ChunkingStrategy::Words => self.chunk_words(text, document_id),
        }
    }

    fn step(&self) -> usize {
        self.size.saturating_sub(self.overlap).max(1)
    }

    fn chunk_chars(&self, text: &str, document_id: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.trim().chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let end = (start + self.size).min(chars.len());
            let segment: String = chars[start..end].iter().collect();
            if !segment.trim().is_empty() {
                chunks.push(Chunk::new(chunks.len(), segment, start, end, document_id));
            }

            if end == chars.len() {
                break;
            }
            start += self.step();
        }

        chunks
    }

    fn chunk_words(&self, text: &str, document_id: &str) -> Vec<Chunk> {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut idx = 0;

        while idx < words.len() {
            let end = (idx + self.size).min(words.len());
            let chunk_text = words[idx..end].join(" ");
            chunks.push(Chunk::new(chunks.len(), chunk_text, idx, end, document_id));

            if end == words.len() {
                break;
            }
            idx += self.step();
        }

        chunks
    }
}

/// Joins chunks into one prompt body with `--- CHUNK <id> ---` markers so a
/// model can point back at the chunks an entity came from.
pub fn render_with_markers(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    for chunk in chunks {
        out.push_str("\n\n--- CHUNK ");
        out.push_str(&chunk.id);
        out.push_str(" ---\n\n");
        out.push_str(&chunk.text);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_chunker_respects_overlap() {
        let chunker = Chunker::new(10, 4);
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks = chunker.chunk(text, "doc");

        assert_eq!(chunks[0].text, "abcdefghij");
        assert_eq!(chunks[1].text, "ghijklmnop");
        assert_eq!(chunks[1].start, 6);
        assert_eq!(chunks.last().map(|c| c.end), Some(26));
        assert_eq!(chunks[2].id, "chunk_2");
        assert!(chunks.iter().all(|c| c.document_id == "doc"));
    }

    #[test]
    fn char_chunker_counts_unicode_scalars() {
        let chunker = Chunker::new(3, 0);
        let chunks = chunker.chunk("Привет", "doc");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "При");
        assert_eq!(chunks[1].text, "вет");
    }

    #[test]
    fn char_chunker_skips_blank_windows_and_keeps_indexes_dense() {
        let chunker = Chunker::new(4, 0);
        let chunks = chunker.chunk("abcd        efgh", "doc");
        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["chunk_0", "chunk_1"]);
        assert_eq!(chunks[1].text, "efgh");
    }

    #[test]
    fn chunker_empty_text_returns_empty() {
        let chunker = Chunker::default();
        assert!(chunker.chunk("", "doc").is_empty());
        assert!(chunker.chunk("   \t\n  ", "doc").is_empty());
    }

    #[test]
    fn word_chunker_respects_overlap() {
        let chunker = Chunker::with_strategy(4, 1, ChunkingStrategy::Words);
        let chunks = chunker.chunk("one two three four five six seven", "doc");

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "one two three four");
        assert_eq!(chunks[1].text, "four five six seven");
        assert_eq!(chunks[0].end - chunks[0].start, 4);
    }

    #[test]
    fn chunker_large_overlap_is_clamped() {
        let chunker = Chunker::with_strategy(3, 10, ChunkingStrategy::Words);
        let chunks = chunker.chunk("a b c d e f g", "doc");
        assert!(chunks.len() > 1);
    }

    #[test]
    fn chunker_zero_size_uses_minimum() {
        let chunker = Chunker::new(0, 0);
        let chunks = chunker.chunk("ab", "doc");
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn markers_precede_each_chunk() {
        let chunks = Chunker::new(5, 0).chunk("hello world", "doc");
        let rendered = render_with_markers(&chunks);

        assert!(rendered.contains("--- CHUNK chunk_0 ---\n\nhello"));
        assert!(rendered.contains("--- CHUNK chunk_1 ---"));
    }
}
