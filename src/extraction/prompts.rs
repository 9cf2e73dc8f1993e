//! System prompts for the extraction stages.
//!
//! Built-in prompts live in `prompts/` at the crate root and are compiled
//! in. A file with the same name in a local `prompts/` directory overrides
//! the built-in text.

use std::path::PathBuf;

use tracing::debug;

/// Available prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// Stage 1: untyped entities.
    EntityExtraction,
    /// Stage 2: type assignment.
    EntityCategorization,
    /// Relations between known entities.
    RelationExtraction,
}

impl Prompt {
    /// Prompt file name (Markdown).
    pub fn filename(&self) -> &'static str {
        match self {
            Prompt::EntityExtraction => "entity_extraction.md",
            Prompt::EntityCategorization => "entity_categorization.md",
            Prompt::RelationExtraction => "relation_extraction.md",
        }
    }

    fn builtin(&self) -> &'static str {
        match self {
            Prompt::EntityExtraction => include_str!("../../prompts/entity_extraction.md"),
            Prompt::EntityCategorization => include_str!("../../prompts/entity_categorization.md"),
            Prompt::RelationExtraction => include_str!("../../prompts/relation_extraction.md"),
        }
    }

    /// Local override if present, otherwise the built-in text.
    pub fn load(&self) -> String {
        let path = prompts_dir().join(self.filename());
        match std::fs::read_to_string(&path) {
            Ok(text) if !text.trim().is_empty() => {
                debug!("Using prompt override {}", path.display());
                text
            }
            _ => self.builtin().to_string(),
        }
    }
}

/// Path to the prompts directory.
pub fn prompts_dir() -> PathBuf {
    let candidates = [PathBuf::from("prompts"), PathBuf::from("../prompts")];
    for path in candidates {
        if path.exists() {
            return path;
        }
    }
    PathBuf::from("prompts")
}

pub fn entity_extraction_input(text: &str) -> String {
    format!(
        "Extract all entities from the following text. Include all available properties for each entity:\n\n{}\n\nReturn only a valid JSON array of entities.",
        text
    )
}

pub fn entity_categorization_input(entities_json: &str) -> String {
    format!(
        "Categorize these entities into types. Preserve all fields from the original extraction:\n\n{}\n\nReturn only a valid JSON array of entities with `type` assigned.",
        entities_json
    )
}

pub fn relation_extraction_input(entity_list: &str, text: &str) -> String {
    format!(
        "Available entities:\n{}\n\nExtract all relations between these entities from the following text. Include all available properties (dates, roles, amounts, ...):\n\n{}\n\nReturn only a valid JSON array of relations.",
        entity_list, text
    )
}
