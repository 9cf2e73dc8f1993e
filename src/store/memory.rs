//! Process-local graph store with the same merge semantics as Neo4j.
//! Used by tests and for offline runs.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{
    cosine_score, is_structural_label, EdgeSummary, EdgeWrite, GraphStore, Neighborhood,
    NodeSummary, NodeWrite, ScoredNode, StoreStats, EMBEDDED_LABEL,
};
use crate::{Error, Result};

#[derive(Debug, Clone)]
struct StoredNode {
    id: String,
    labels: BTreeSet<String>,
    properties: BTreeMap<String, Value>,
    embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone)]
struct StoredEdge {
    id: String,
    rel_type: String,
    source_id: String,
    target_id: String,
    properties: BTreeMap<String, Value>,
}

impl StoredNode {
    fn is_structural(&self) -> bool {
        self.labels.iter().any(|l| is_structural_label(l))
    }
}

#[derive(Debug, Default)]
struct State {
    nodes: Vec<StoredNode>,
    node_index: HashMap<String, usize>,
    edges: Vec<StoredEdge>,
    vector_dimension: Option<usize>,
}

#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    state: RwLock<State>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn node_count(&self) -> usize {
        self.state.read().await.nodes.len()
    }

    pub async fn edge_count(&self) -> usize {
        self.state.read().await.edges.len()
    }

    /// Stored properties of a node, for inspection.
    pub async fn node_properties(&self, id: &str) -> Option<BTreeMap<String, Value>> {
        let state = self.state.read().await;
        state
            .node_index
            .get(id)
            .map(|&pos| state.nodes[pos].properties.clone())
    }

    pub async fn node_labels(&self, id: &str) -> Vec<String> {
        let state = self.state.read().await;
        state
            .node_index
            .get(id)
            .map(|&pos| state.nodes[pos].labels.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn vector_dimension(&self) -> Option<usize> {
        self.state.read().await.vector_dimension
    }
}

fn summary(node: &StoredNode) -> NodeSummary {
    let text = |key: &str| node.properties.get(key).and_then(Value::as_str).map(str::to_string);
    NodeSummary {
        id: node.id.clone(),
        name: text("name").unwrap_or_default(),
        entity_type: text("type").unwrap_or_default(),
        description: text("description").filter(|d| !d.is_empty()),
    }
}

fn edge_summary(edge: &StoredEdge) -> EdgeSummary {
    EdgeSummary {
        id: edge.id.clone(),
        rel_type: edge.rel_type.clone(),
        source_id: edge.source_id.clone(),
        target_id: edge.target_id.clone(),
        description: edge
            .properties
            .get("description")
            .and_then(Value::as_str)
            .filter(|d| !d.is_empty())
            .map(str::to_string),
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn clear(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.nodes.clear();
        state.node_index.clear();
        state.edges.clear();
        Ok(())
    }

    async fn upsert_node(&self, node: &NodeWrite) -> Result<()> {
        let mut state = self.state.write().await;
        let pos = match state.node_index.get(&node.id) {
            Some(&pos) => pos,
            None => {
                let pos = state.nodes.len();
                state.nodes.push(StoredNode {
                    id: node.id.clone(),
                    labels: BTreeSet::new(),
                    properties: BTreeMap::new(),
                    embedding: None,
                });
                state.node_index.insert(node.id.clone(), pos);
                pos
            }
        };

        let stored = &mut state.nodes[pos];
        stored.labels.insert(node.label.clone());
        stored
            .properties
            .extend(node.properties.iter().map(|(k, v)| (k.clone(), v.clone())));
        stored.properties.insert("id".to_string(), Value::String(node.id.clone()));
        if let Some(embedding) = &node.embedding {
            stored.labels.insert(EMBEDDED_LABEL.to_string());
            stored.embedding = Some(embedding.clone());
        }
        Ok(())
    }

    async fn upsert_edge(&self, edge: &EdgeWrite) -> Result<bool> {
        let mut state = self.state.write().await;
        if !state.node_index.contains_key(&edge.source_id)
            || !state.node_index.contains_key(&edge.target_id)
        {
            return Ok(false);
        }

        let existing = state.edges.iter().position(|e| {
            e.id == edge.id
                && e.rel_type == edge.rel_type
                && e.source_id == edge.source_id
                && e.target_id == edge.target_id
        });
        let pos = match existing {
            Some(pos) => pos,
            None => {
                state.edges.push(StoredEdge {
                    id: edge.id.clone(),
                    rel_type: edge.rel_type.clone(),
                    source_id: edge.source_id.clone(),
                    target_id: edge.target_id.clone(),
                    properties: BTreeMap::new(),
                });
                state.edges.len() - 1
            }
        };
        let stored = &mut state.edges[pos];
        stored
            .properties
            .extend(edge.properties.iter().map(|(k, v)| (k.clone(), v.clone())));
        stored.properties.insert("id".to_string(), Value::String(edge.id.clone()));
        Ok(true)
    }

    async fn ensure_vector_index(&self, dimension: usize) -> Result<()> {
        let mut state = self.state.write().await;
        if state.vector_dimension.is_none() {
            state.vector_dimension = Some(dimension);
        }
        Ok(())
    }

    async fn vector_search(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredNode>> {
        let state = self.state.read().await;
        let Some(dimension) = state.vector_dimension else {
            return Ok(Vec::new());
        };
        if vector.len() != dimension {
            return Err(Error::Store(format!(
                "query vector has {} dimensions, index expects {}",
                vector.len(),
                dimension
            )));
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut hits: Vec<ScoredNode> = state
            .nodes
            .iter()
            .filter(|n| n.labels.contains(EMBEDDED_LABEL))
            .filter_map(|n| {
                let embedding = n.embedding.as_ref().filter(|e| e.len() == dimension)?;
                Some(ScoredNode {
                    node: summary(n),
                    score: cosine_score(vector, embedding),
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.node.id.cmp(&b.node.id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn neighborhood(&self, ids: &[String], hops: usize) -> Result<Neighborhood> {
        let state = self.state.read().await;
        let mut visited: HashSet<&str> = HashSet::new();
        let mut order: Vec<&str> = Vec::new();
        let mut frontier: Vec<&str> = Vec::new();
        for id in ids {
            if let Some(&pos) = state.node_index.get(id) {
                let id = state.nodes[pos].id.as_str();
                if visited.insert(id) {
                    order.push(id);
                    frontier.push(id);
                }
            }
        }

        let mut edge_seen: HashSet<usize> = HashSet::new();
        let mut edge_order: Vec<usize> = Vec::new();
        for _ in 0..hops {
            let mut next = Vec::new();
            for node in &frontier {
                for (pos, edge) in state.edges.iter().enumerate() {
                    let other = if edge.source_id == *node {
                        edge.target_id.as_str()
                    } else if edge.target_id == *node {
                        edge.source_id.as_str()
                    } else {
                        continue;
                    };
                    let structural = state
                        .node_index
                        .get(other)
                        .is_some_and(|&p| state.nodes[p].is_structural());
                    if structural {
                        continue;
                    }
                    if edge_seen.insert(pos) {
                        edge_order.push(pos);
                    }
                    if visited.insert(other) {
                        order.push(other);
                        next.push(other);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        Ok(Neighborhood {
            nodes: order
                .into_iter()
                .filter_map(|id| state.node_index.get(id).map(|&pos| summary(&state.nodes[pos])))
                .collect(),
            edges: edge_order
                .into_iter()
                .map(|pos| edge_summary(&state.edges[pos]))
                .collect(),
        })
    }

    async fn relations_with_property(&self, name: &str) -> Result<Vec<EdgeSummary>> {
        let state = self.state.read().await;
        Ok(state
            .edges
            .iter()
            .filter(|e| e.properties.get(name).is_some_and(|v| !v.is_null()))
            .map(edge_summary)
            .collect())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let state = self.state.read().await;
        let mut stats = StoreStats {
            total_nodes: state.nodes.len() as u64,
            total_relationships: state.edges.len() as u64,
            ..StoreStats::default()
        };
        for node in &state.nodes {
            for label in &node.labels {
                *stats.nodes_by_label.entry(label.clone()).or_insert(0) += 1;
            }
        }
        for edge in &state.edges {
            *stats
                .relationships_by_type
                .entry(edge.rel_type.clone())
                .or_insert(0) += 1;
        }
        Ok(stats)
    }
}
