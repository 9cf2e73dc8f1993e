//! Identity allocation and name/type normalisation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How fresh entity and relation ids are produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdStrategy {
    /// Random v4 ids: every run allocates new identities.
    #[default]
    Random,
    /// Name-based v5 ids: the same entity (normalised name + type) gets the
    /// same id across runs, so merge exports deduplicate.
    Content,
}

impl IdStrategy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "random" | "uuid" => Some(IdStrategy::Random),
            "content" | "stable" => Some(IdStrategy::Content),
            _ => None,
        }
    }

    pub fn entity_id(&self, name: &str, entity_type: &str) -> String {
        match self {
            IdStrategy::Random => Uuid::new_v4().to_string(),
            IdStrategy::Content => {
                let key = format!("entity:{}:{}", entity_type, canonical_name(name));
                Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
            }
        }
    }

    pub fn relation_id(&self, source_id: &str, relation_type: &str, target_id: &str) -> String {
        match self {
            IdStrategy::Random => Uuid::new_v4().to_string(),
            IdStrategy::Content => {
                let key = format!("relation:{}:{}:{}", source_id, relation_type, target_id);
                Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
            }
        }
    }
}

/// Normalised form of a display name used for duplicate detection:
/// lowercase, alphanumerics and single spaces only.
pub fn canonical_name(name: &str) -> String {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalises a model-produced type into an uppercase token
/// (`"works for"` -> `WORKS_FOR`). Returns `None` when nothing is left.
pub fn type_token(raw: &str) -> Option<String> {
    let mut token = String::with_capacity(raw.len());
    let mut pending_separator = false;
    for c in raw.trim().chars() {
        if c.is_alphanumeric() {
            if pending_separator && !token.is_empty() {
                token.push('_');
            }
            pending_separator = false;
            token.extend(c.to_uppercase());
        } else {
            pending_separator = true;
        }
    }
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}
