use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::entity::{null_as_empty, Entity};
use super::relation::Relation;
use crate::text::Chunk;
use crate::{Error, Result};

/// Where a graph came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub doc_id: String,
    pub title: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
}

/// On-disk shape of a graph. Every graph file goes through this struct so
/// loading re-checks the invariants and rebuilds the lookup indexes.
#[derive(Debug, Serialize, Deserialize)]
struct GraphFile {
    #[serde(default)]
    document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    document: Option<DocumentInfo>,
    #[serde(default)]
    entities: Vec<Entity>,
    #[serde(default)]
    relations: Vec<Relation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    chunks: Vec<Chunk>,
    #[serde(default, deserialize_with = "null_as_empty")]
    metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct GraphIndex {
    entity_by_id: HashMap<String, usize>,
    incident: HashMap<String, Vec<usize>>,
    by_attribute: HashMap<String, Vec<usize>>,
}

impl GraphIndex {
    fn build(entities: &[Entity], relations: &[Relation]) -> Result<Self> {
        let mut entity_by_id = HashMap::with_capacity(entities.len());
        for (pos, entity) in entities.iter().enumerate() {
            if entity.id.trim().is_empty() {
                return Err(Error::GraphInvariant(format!(
                    "entity '{}' has an empty id",
                    entity.name
                )));
            }
            if entity.name.trim().is_empty() {
                return Err(Error::GraphInvariant(format!(
                    "entity {} has an empty name",
                    entity.id
                )));
            }
            if entity_by_id.insert(entity.id.clone(), pos).is_some() {
                return Err(Error::GraphInvariant(format!(
                    "duplicate entity id {}",
                    entity.id
                )));
            }
        }

        let mut relation_ids = HashSet::with_capacity(relations.len());
        let mut incident: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_attribute: HashMap<String, Vec<usize>> = HashMap::new();

        for (pos, relation) in relations.iter().enumerate() {
            if !relation_ids.insert(relation.id.as_str()) {
                return Err(Error::GraphInvariant(format!(
                    "duplicate relation id {}",
                    relation.id
                )));
            }
            for endpoint in [&relation.source_entity_id, &relation.target_entity_id] {
                if !entity_by_id.contains_key(endpoint) {
                    return Err(Error::GraphInvariant(format!(
                        "relation {} references missing entity {}",
                        relation.id, endpoint
                    )));
                }
            }

            incident
                .entry(relation.source_entity_id.clone())
                .or_default()
                .push(pos);
            if relation.target_entity_id != relation.source_entity_id {
                incident
                    .entry(relation.target_entity_id.clone())
                    .or_default()
                    .push(pos);
            }

            let names: HashSet<&str> = relation.attribute_names().collect();
            for name in names {
                by_attribute.entry(name.to_string()).or_default().push(pos);
            }
        }

        Ok(Self {
            entity_by_id,
            incident,
            by_attribute,
        })
    }
}

/// Consolidated graph for one document.
///
/// Entities and relations keep insertion order. Construction checks that ids
/// are unique and that every relation endpoint exists, then builds the id,
/// incidence and attribute indexes once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GraphFile", into = "GraphFile")]
pub struct DocumentGraph {
    document_id: Option<String>,
    document: Option<DocumentInfo>,
    entities: Vec<Entity>,
    relations: Vec<Relation>,
    chunks: Vec<Chunk>,
    metadata: Map<String, Value>,
    index: GraphIndex,
}

impl DocumentGraph {
    pub fn new(entities: Vec<Entity>, relations: Vec<Relation>) -> Result<Self> {
        let index = GraphIndex::build(&entities, &relations)?;
        Ok(Self {
            document_id: None,
            document: None,
            entities,
            relations,
            chunks: Vec::new(),
            metadata: Map::new(),
            index,
        })
    }

    pub fn with_document(mut self, document: DocumentInfo) -> Self {
        self.document_id = Some(document.doc_id.clone());
        self.document = Some(document);
        self
    }

    pub fn with_document_id(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    pub fn with_chunks(mut self, chunks: Vec<Chunk>) -> Self {
        self.chunks = chunks;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn document_id(&self) -> Option<&str> {
        self.document_id.as_deref()
    }

    pub fn document(&self) -> Option<&DocumentInfo> {
        self.document.as_ref()
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.index
            .entity_by_id
            .get(id)
            .map(|&pos| &self.entities[pos])
    }

    /// Relations with the entity as source or target, in insertion order.
    pub fn relations_for_entity(&self, entity_id: &str) -> Vec<&Relation> {
        self.relations_at(self.index.incident.get(entity_id))
    }

    /// Relations carrying a non-null attribute with the given name.
    pub fn relations_with_attribute(&self, name: &str) -> Vec<&Relation> {
        self.relations_at(self.index.by_attribute.get(name))
    }

    /// Name of an entity, or its id when unknown.
    pub fn display_name<'a>(&'a self, entity_id: &'a str) -> &'a str {
        self.entity(entity_id)
            .map(|e| e.name.as_str())
            .unwrap_or(entity_id)
    }

    fn relations_at(&self, positions: Option<&Vec<usize>>) -> Vec<&Relation> {
        positions
            .map(|list| list.iter().map(|&pos| &self.relations[pos]).collect())
            .unwrap_or_default()
    }
}

impl TryFrom<GraphFile> for DocumentGraph {
    type Error = Error;

    fn try_from(file: GraphFile) -> Result<Self> {
        let mut graph = DocumentGraph::new(file.entities, file.relations)?;
        graph.document_id = file.document_id;
        graph.document = file.document;
        graph.chunks = file.chunks;
        graph.metadata = file.metadata;
        Ok(graph)
    }
}

impl From<DocumentGraph> for GraphFile {
    fn from(graph: DocumentGraph) -> Self {
        GraphFile {
            document_id: graph.document_id,
            document: graph.document,
            entities: graph.entities,
            relations: graph.relations,
            chunks: graph.chunks,
            metadata: graph.metadata,
        }
    }
}
