//! Persistent graph store: the write/read seam used by export and retrieval.

pub mod memory;
pub mod neo4j;

pub use memory::InMemoryGraphStore;
pub use neo4j::Neo4jGraphStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::Result;

/// Extra label carried by nodes that have an embedding.
pub const EMBEDDED_LABEL: &str = "EmbeddedEntity";
/// Node property holding the embedding vector.
pub const EMBEDDING_PROPERTY: &str = "embedding";
/// Name of the vector index over [`EMBEDDING_PROPERTY`].
pub const VECTOR_INDEX_NAME: &str = "entity_embedding_index";

/// Source document node.
pub const DOCUMENT_LABEL: &str = "Document";
/// Text chunk node, linked to its document and to the next chunk.
pub const CHUNK_LABEL: &str = "Chunk";
pub const HAS_CHUNK: &str = "HAS_CHUNK";
pub const NEXT_CHUNK: &str = "NEXT_CHUNK";
/// Entity to the chunk it was extracted from.
pub const MENTIONED_IN: &str = "MENTIONED_IN";

static NON_IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]").expect("identifier pattern is valid"));
static UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"_+").expect("underscore pattern is valid"));

/// Node to merge, keyed by `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeWrite {
    pub id: String,
    pub label: String,
    /// Store-safe properties (see [`store_properties`]).
    pub properties: BTreeMap<String, Value>,
    pub embedding: Option<Vec<f32>>,
}

/// Directed edge to merge between two existing nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeWrite {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub rel_type: String,
    pub properties: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeSummary {
    pub id: String,
    pub name: String,
    pub entity_type: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeSummary {
    pub id: String,
    pub rel_type: String,
    pub source_id: String,
    pub target_id: String,
    pub description: Option<String>,
}

/// Vector search hit; `score` is in [0, 1], higher is closer.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredNode {
    pub node: NodeSummary,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Neighborhood {
    pub nodes: Vec<NodeSummary>,
    pub edges: Vec<EdgeSummary>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreStats {
    pub total_nodes: u64,
    pub total_relationships: u64,
    pub nodes_by_label: BTreeMap<String, u64>,
    pub relationships_by_type: BTreeMap<String, u64>,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Deletes every node and relationship.
    async fn clear(&self) -> Result<()>;

    /// Creates the node or updates it in place.
    async fn upsert_node(&self, node: &NodeWrite) -> Result<()>;

    /// Merges the edge; `false` when an endpoint node does not exist.
    async fn upsert_edge(&self, edge: &EdgeWrite) -> Result<bool>;

    /// Creates the vector index unless it already exists.
    async fn ensure_vector_index(&self, dimension: usize) -> Result<()>;

    /// Nearest embedded nodes; empty when there is no index.
    async fn vector_search(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredNode>>;

    /// Seed nodes plus everything within `hops` relationships, either direction.
    /// Document and chunk nodes are never traversed.
    async fn neighborhood(&self, ids: &[String], hops: usize) -> Result<Neighborhood>;

    /// Relationships carrying a non-null property `name`.
    async fn relations_with_property(&self, name: &str) -> Result<Vec<EdgeSummary>>;

    async fn stats(&self) -> Result<StoreStats>;
}

/// Whether `label` marks document structure rather than an entity.
pub fn is_structural_label(label: &str) -> bool {
    label == DOCUMENT_LABEL || label == CHUNK_LABEL
}

/// Label or relationship type made of `[A-Za-z0-9_]` only, not starting
/// with a digit. Falls back to `fallback` when nothing is left.
pub fn sanitize_label(raw: &str, fallback: &str) -> String {
    let replaced = NON_IDENT.replace_all(raw.trim(), "_");
    let collapsed = UNDERSCORES.replace_all(&replaced, "_");
    let trimmed = collapsed.trim_matches('_');
    if trimmed.is_empty() {
        return fallback.to_string();
    }
    if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{}", trimmed)
    } else {
        trimmed.to_string()
    }
}

pub fn sanitize_property(raw: &str) -> String {
    let replaced = NON_IDENT.replace_all(raw, "_").into_owned();
    if replaced.is_empty() {
        "_property".to_string()
    } else if replaced.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{}", replaced)
    } else {
        replaced
    }
}

/// Rewrites properties into what the store accepts: scalars and homogeneous
/// scalar lists stay as they are, nested values become JSON text, nulls are
/// dropped and keys are sanitised.
pub fn store_properties(props: &BTreeMap<String, Value>) -> Result<BTreeMap<String, Value>> {
    let mut out = BTreeMap::new();
    for (key, value) in props {
        let converted = match value {
            Value::Null => continue,
            Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
            Value::Array(items) if is_scalar_list(items) => value.clone(),
            Value::Array(_) | Value::Object(_) => Value::String(serde_json::to_string(value)?),
        };
        out.insert(sanitize_property(key), converted);
    }
    Ok(out)
}

fn is_scalar_list(items: &[Value]) -> bool {
    let Some(first) = items.first() else {
        return true;
    };
    let same_kind = |v: &Value| match (first, v) {
        (Value::String(_), Value::String(_)) | (Value::Bool(_), Value::Bool(_)) => true,
        (Value::Number(_), Value::Number(_)) => true,
        _ => false,
    };
    items.iter().all(same_kind)
}

/// Cosine similarity mapped to [0, 1], as the store's cosine index reports it.
pub(crate) fn cosine_score(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += f64::from(x) * f64::from(y);
        norm_a += f64::from(x) * f64::from(x);
        norm_b += f64::from(y) * f64::from(y);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let cosine = dot / (norm_a.sqrt() * norm_b.sqrt());
    ((1.0 + cosine) / 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn labels_are_sanitised() {
        assert_eq!(sanitize_label("LEGAL ENTITY", "ENTITY"), "LEGAL_ENTITY");
        assert_eq!(sanitize_label("works-for / with", "RELATED_TO"), "works_for_with");
        assert_eq!(sanitize_label("3D_MODEL", "ENTITY"), "_3D_MODEL");
        assert_eq!(sanitize_label("???", "ENTITY"), "ENTITY");
    }

    #[test]
    fn structural_labels() {
        assert!(is_structural_label(DOCUMENT_LABEL));
        assert!(is_structural_label(CHUNK_LABEL));
        assert!(!is_structural_label("ORGANIZATION"));
        assert!(!is_structural_label(EMBEDDED_LABEL));
    }

    #[test]
    fn property_names_are_sanitised() {
        assert_eq!(sanitize_property("start date"), "start_date");
        assert_eq!(sanitize_property("2nd_party"), "_2nd_party");
        assert_eq!(sanitize_property(""), "_property");
    }

    #[test]
    fn nested_values_become_json_text() {
        let mut props = BTreeMap::new();
        props.insert("name".to_string(), json!("Uber"));
        props.insert("aliases".to_string(), json!(["Uber Inc", "Uber BV"]));
        props.insert("address".to_string(), json!({"city": "SF"}));
        props.insert("mixed".to_string(), json!([1, "two"]));
        props.insert("gone".to_string(), Value::Null);

        let out = store_properties(&props).unwrap();
        assert_eq!(out["name"], json!("Uber"));
        assert_eq!(out["aliases"], json!(["Uber Inc", "Uber BV"]));
        assert_eq!(out["address"], json!("{\"city\":\"SF\"}"));
        assert_eq!(out["mixed"], json!("[1,\"two\"]"));
        assert!(!out.contains_key("gone"));
    }

    #[test]
    fn cosine_score_edge_cases() {
        assert_eq!(cosine_score(&[], &[]), 0.0);
        assert_eq!(cosine_score(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_score(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_score(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!((cosine_score(&[1.0, 0.0], &[0.0, 1.0]) - 0.5).abs() < 1e-9);
        assert!(cosine_score(&[1.0, 0.0], &[-1.0, 0.0]).abs() < 1e-9);
    }
}
