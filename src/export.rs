//! Writes a [`DocumentGraph`] into a [`GraphStore`] by merging on `id`.
//!
//! Every entity and relation is its own upsert, so an interrupted export
//! leaves a partially merged graph that a re-run completes. Embeddings are
//! computed and checked before the store is touched.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::{stream, StreamExt, TryStreamExt};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::DEFAULT_EMBEDDING_BATCH;
use crate::embeddings::{entity_to_text, EmbeddingProvider};
use crate::error::{Stage, StageContext};
use crate::graph::{DocumentGraph, DEFAULT_RELATION_TYPE};
use crate::store::{
    sanitize_label, store_properties, EdgeWrite, GraphStore, NodeWrite, CHUNK_LABEL, DOCUMENT_LABEL,
    EMBEDDING_PROPERTY, HAS_CHUNK, MENTIONED_IN, NEXT_CHUNK,
};
use crate::text::Chunk;
use crate::{Error, Result};

const FALLBACK_LABEL: &str = "ENTITY";
const EMBEDDING_CONCURRENCY: usize = 4;
/// Entity attribute listing the chunks an entity was seen in.
const SOURCE_CHUNKS_ATTRIBUTE: &str = "source_chunk_ids";

/// Relation fields that are encoded by the edge itself.
const EDGE_STRUCTURAL_FIELDS: &[&str] = &["source_entity_id", "target_entity_id", "relation_type"];

#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    /// Delete the whole store first ("replace"); otherwise merge into it.
    pub clear_first: bool,
    /// Texts per embedding request.
    pub batch_size: usize,
    /// Embedding requests in flight.
    pub concurrency: usize,
    /// Expected vector length; defaults to the embedder's dimension.
    pub embedding_dimension: Option<usize>,
    /// Also write the Document node, its Chunk nodes and their links.
    pub include_document: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            clear_first: true,
            batch_size: DEFAULT_EMBEDDING_BATCH,
            concurrency: EMBEDDING_CONCURRENCY,
            embedding_dimension: None,
            include_document: true,
        }
    }
}

impl ExportOptions {
    pub fn merge() -> Self {
        Self {
            clear_first: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportSummary {
    pub cleared: bool,
    pub entities_merged: usize,
    pub relations_merged: usize,
    pub embeddings_written: usize,
    pub documents_merged: usize,
    pub chunks_merged: usize,
    /// Relations that could not be attached to stored nodes.
    pub errors: Vec<String>,
}

/// Vectors computed up front, in entity and chunk order.
#[derive(Default)]
struct Vectors {
    entities: Option<Vec<Vec<f32>>>,
    chunks: Option<Vec<Vec<f32>>>,
}

pub struct GraphStoreExporter {
    store: Arc<dyn GraphStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl GraphStoreExporter {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            embedder: None,
        }
    }

    /// Attach embeddings to every node and keep a vector index.
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub async fn export(&self, graph: &DocumentGraph, options: &ExportOptions) -> Result<ExportSummary> {
        let label = graph.document_id().unwrap_or("graph").to_string();
        self.export_inner(graph, options)
            .await
            .at_stage(Stage::Export, &label)
    }

    async fn export_inner(&self, graph: &DocumentGraph, options: &ExportOptions) -> Result<ExportSummary> {
        let mut summary = ExportSummary::default();
        let document_id = graph.document_id().filter(|_| options.include_document);

        let vectors = match &self.embedder {
            Some(embedder) => {
                let dimension = options.embedding_dimension.unwrap_or_else(|| embedder.dimension());
                let entity_texts: Vec<String> = graph.entities().iter().map(entity_to_text).collect();
                let entities = embed_texts(embedder.as_ref(), entity_texts, options, dimension).await?;
                let chunks = match document_id {
                    Some(_) if !graph.chunks().is_empty() => {
                        let texts = graph.chunks().iter().map(|c| c.text.clone()).collect();
                        Some(embed_texts(embedder.as_ref(), texts, options, dimension).await?)
                    }
                    _ => None,
                };
                self.store.ensure_vector_index(dimension).await?;
                Vectors {
                    entities: Some(entities),
                    chunks,
                }
            }
            None => Vectors::default(),
        };

        if options.clear_first {
            self.store.clear().await?;
            summary.cleared = true;
        }

        for (pos, entity) in graph.entities().iter().enumerate() {
            let mut properties = store_properties(&entity.all_properties())
                .map_err(|e| Error::Store(format!("entity {}: {}", entity.id, e)))?;
            properties
                .entry("description".to_string())
                .or_insert_with(|| Value::String(String::new()));

            let embedding = vectors.entities.as_ref().map(|all| all[pos].clone());
            let node = NodeWrite {
                id: entity.id.clone(),
                label: sanitize_label(&entity.entity_type, FALLBACK_LABEL),
                properties,
                embedding,
            };
            self.store.upsert_node(&node).await?;
            summary.entities_merged += 1;
            if node.embedding.is_some() {
                summary.embeddings_written += 1;
            }
        }

        for relation in graph.relations() {
            let mut all = relation.all_properties();
            for field in EDGE_STRUCTURAL_FIELDS {
                all.remove(*field);
            }
            let mut properties = store_properties(&all)
                .map_err(|e| Error::Store(format!("relation {}: {}", relation.id, e)))?;
            properties
                .entry("description".to_string())
                .or_insert_with(|| Value::String(String::new()));

            let edge = EdgeWrite {
                id: relation.id.clone(),
                source_id: relation.source_entity_id.clone(),
                target_id: relation.target_entity_id.clone(),
                rel_type: sanitize_label(&relation.relation_type, DEFAULT_RELATION_TYPE),
                properties,
            };
            if self.store.upsert_edge(&edge).await? {
                summary.relations_merged += 1;
            } else {
                let message = format!(
                    "relation {} ({} -[{}]-> {}): endpoint not found in store",
                    relation.id, relation.source_entity_id, edge.rel_type, relation.target_entity_id
                );
                warn!("{}", message);
                summary.errors.push(message);
            }
        }

        if let Some(document_id) = document_id {
            self.export_document(graph, document_id, vectors.chunks.as_deref(), &mut summary)
                .await?;
        }

        info!(
            "Exported {}: {} entities, {} relations, {} chunks, {} embeddings, {} errors",
            graph.document_id().unwrap_or("graph"),
            summary.entities_merged,
            summary.relations_merged,
            summary.chunks_merged,
            summary.embeddings_written,
            summary.errors.len()
        );
        Ok(summary)
    }

    /// Document node, chunk nodes in order, and the entity mentions.
    async fn export_document(
        &self,
        graph: &DocumentGraph,
        document_id: &str,
        chunk_vectors: Option<&[Vec<f32>]>,
        summary: &mut ExportSummary,
    ) -> Result<()> {
        let info = graph.document();
        let mut properties = BTreeMap::new();
        properties.insert("docId".to_string(), json!(document_id));
        properties.insert("title".to_string(), json!(info.map(|d| d.title.as_str()).unwrap_or("")));
        properties.insert("source".to_string(), json!(info.map(|d| d.source.as_str()).unwrap_or("")));
        properties.insert(
            "publishedDate".to_string(),
            json!(info.and_then(|d| d.published_date.as_deref()).unwrap_or("")),
        );
        self.store
            .upsert_node(&NodeWrite {
                id: document_id.to_string(),
                label: DOCUMENT_LABEL.to_string(),
                properties,
                embedding: None,
            })
            .await?;
        summary.documents_merged += 1;

        let mut chunk_nodes: HashMap<&str, String> = HashMap::new();
        let mut previous: Option<String> = None;
        for (pos, chunk) in graph.chunks().iter().enumerate() {
            let node_id = chunk_node_id(document_id, chunk);
            let mut properties = BTreeMap::new();
            properties.insert("chunkId".to_string(), json!(chunk.id));
            properties.insert("text".to_string(), json!(chunk.text));
            properties.insert("index".to_string(), json!(chunk.index));
            properties.insert("documentId".to_string(), json!(document_id));
            properties.insert("start".to_string(), json!(chunk.start));
            properties.insert("end".to_string(), json!(chunk.end));
            // Chunk vectors stay out of the entity index.
            if let Some(vector) = chunk_vectors.and_then(|all| all.get(pos)) {
                properties.insert(EMBEDDING_PROPERTY.to_string(), json!(vector));
                summary.embeddings_written += 1;
            }
            self.store
                .upsert_node(&NodeWrite {
                    id: node_id.clone(),
                    label: CHUNK_LABEL.to_string(),
                    properties,
                    embedding: None,
                })
                .await?;
            summary.chunks_merged += 1;

            self.link(document_id, &node_id, HAS_CHUNK).await?;
            if let Some(prev) = &previous {
                self.link(prev, &node_id, NEXT_CHUNK).await?;
            }
            chunk_nodes.insert(chunk.id.as_str(), node_id.clone());
            previous = Some(node_id);
        }

        for entity in graph.entities() {
            let Some(Value::Array(ids)) = entity.attribute(SOURCE_CHUNKS_ATTRIBUTE) else {
                continue;
            };
            for chunk_id in ids.iter().filter_map(Value::as_str) {
                match chunk_nodes.get(chunk_id) {
                    Some(node_id) => self.link(&entity.id, node_id, MENTIONED_IN).await?,
                    None => debug!("Entity {} cites unknown chunk {}", entity.id, chunk_id),
                }
            }
        }
        Ok(())
    }

    async fn link(&self, source_id: &str, target_id: &str, rel_type: &str) -> Result<()> {
        let edge = EdgeWrite {
            id: format!("{}:{}:{}", source_id, rel_type, target_id),
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            rel_type: rel_type.to_string(),
            properties: BTreeMap::new(),
        };
        if !self.store.upsert_edge(&edge).await? {
            return Err(Error::Store(format!(
                "{} link {} -> {} lost an endpoint",
                rel_type, source_id, target_id
            )));
        }
        Ok(())
    }
}

/// Chunk ids repeat across documents, so stored ids carry the document id.
pub fn chunk_node_id(document_id: &str, chunk: &Chunk) -> String {
    format!("{}:{}", document_id, chunk.id)
}

/// One vector per text, in order, computed in bounded batches.
async fn embed_texts(
    embedder: &dyn EmbeddingProvider,
    texts: Vec<String>,
    options: &ExportOptions,
    dimension: usize,
) -> Result<Vec<Vec<f32>>> {
    let batches: Vec<Vec<String>> = texts
        .chunks(options.batch_size.max(1))
        .map(|c| c.to_vec())
        .collect();
    debug!("Embedding {} texts in {} batches", texts.len(), batches.len());

    let results: Vec<Vec<Vec<f32>>> = stream::iter(batches)
        .map(|batch| async move {
            let vectors = embedder.embed_batch(&batch).await?;
            if vectors.len() != batch.len() {
                return Err(Error::Embedding(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    vectors.len()
                )));
            }
            Ok::<_, Error>(vectors)
        })
        .buffered(options.concurrency.max(1))
        .try_collect()
        .await?;

    let vectors: Vec<Vec<f32>> = results.into_iter().flatten().collect();
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(Error::Embedding(format!(
            "embedding has {} dimensions, index expects {}",
            bad.len(),
            dimension
        )));
    }
    Ok(vectors)
}
