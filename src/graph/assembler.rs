use serde_json::{Map, Value};
use tracing::{debug, error};

use super::document::{DocumentGraph, DocumentInfo};
use super::entity::Entity;
use super::relation::Relation;
use crate::text::Chunk;
use crate::{Error, Result};

/// Folds extracted entities and relations into one checked [`DocumentGraph`].
///
/// No model calls happen here. Any invariant break reaching this point is an
/// upstream bug and fails the whole assembly.
#[derive(Debug, Clone, Default)]
pub struct GraphAssembler {
    document: Option<DocumentInfo>,
    chunks: Vec<Chunk>,
    metadata: Map<String, Value>,
}

impl GraphAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(mut self, document: DocumentInfo) -> Self {
        self.document = Some(document);
        self
    }

    pub fn chunks(mut self, chunks: Vec<Chunk>) -> Self {
        self.chunks = chunks;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn assemble(self, entities: Vec<Entity>, relations: Vec<Relation>) -> Result<DocumentGraph> {
        if let Some(temporal) = entities.iter().find(|e| e.is_temporal()) {
            error!(
                "Temporal entity {} ({}) reached graph assembly",
                temporal.id, temporal.entity_type
            );
            return Err(Error::GraphInvariant(format!(
                "entity {} has temporal type {}",
                temporal.id, temporal.entity_type
            )));
        }

        let num_entities = entities.len();
        let num_relations = relations.len();
        let num_chunks = self.chunks.len();

        let mut graph = DocumentGraph::new(entities, relations)?;
        if let Some(document) = self.document {
            graph = graph.with_document(document);
        }
        graph = graph
            .with_chunks(self.chunks)
            .with_metadata("num_entities", num_entities)
            .with_metadata("num_relations", num_relations)
            .with_metadata("num_chunks", num_chunks);
        for (key, value) in self.metadata {
            graph = graph.with_metadata(key, value);
        }

        debug!(
            "Assembled graph: {} entities, {} relations, {} chunks",
            num_entities, num_relations, num_chunks
        );
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_in_production_order_with_counts() {
        let graph = GraphAssembler::new()
            .metadata("text_length", 42)
            .assemble(
                vec![
                    Entity::new("b", "Beta", "ORG"),
                    Entity::new("a", "Alpha", "ORG"),
                ],
                vec![Relation::new("r", "b", "a", "OWNS")],
            )
            .unwrap();

        let names: Vec<&str> = graph.entities().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Beta", "Alpha"]);
        assert_eq!(graph.metadata().get("num_entities"), Some(&Value::from(2)));
        assert_eq!(graph.metadata().get("text_length"), Some(&Value::from(42)));
    }

    #[test]
    fn temporal_entity_is_an_invariant_break() {
        let err = GraphAssembler::new()
            .assemble(vec![Entity::new("d", "1 Jan 2020", "DATE")], vec![])
            .unwrap_err();
        assert!(matches!(err, Error::GraphInvariant(_)));
    }

    #[test]
    fn dangling_endpoint_is_fatal() {
        let err = GraphAssembler::new()
            .assemble(
                vec![Entity::new("a", "Alpha", "ORG")],
                vec![Relation::new("r", "a", "ghost", "OWNS")],
            )
            .unwrap_err();
        assert!(matches!(err, Error::GraphInvariant(_)));
    }

    #[test]
    fn document_info_sets_document_id() {
        let graph = GraphAssembler::new()
            .document(DocumentInfo {
                doc_id: "lease".into(),
                title: "lease.txt".into(),
                source: "lease.txt".into(),
                published_date: None,
            })
            .assemble(vec![], vec![])
            .unwrap();
        assert_eq!(graph.document_id(), Some("lease"));
        assert!(graph.is_empty());
    }
}
