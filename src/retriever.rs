//! Query-time context: vector search over entity embeddings, expanded to
//! the surrounding subgraph and rendered as text for a language model.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{debug, info};

use crate::embeddings::EmbeddingProvider;
use crate::error::{Stage, StageContext};
use crate::store::{sanitize_property, EdgeSummary, GraphStore, Neighborhood, ScoredNode};
use crate::Result;

pub const DEFAULT_TOP_K: usize = 10;
pub const DEFAULT_HOPS: usize = 1;

/// Vector hits plus their expanded neighbourhood.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievedContext {
    pub hits: Vec<ScoredNode>,
    pub neighborhood: Neighborhood,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Entity lines, then relationship lines. Empty when nothing was found.
    pub fn render(&self, include_scores: bool) -> String {
        if self.hits.is_empty() {
            return String::new();
        }

        let mut names: HashMap<&str, &str> = HashMap::new();
        for node in &self.neighborhood.nodes {
            names.insert(node.id.as_str(), node.name.as_str());
        }
        for hit in &self.hits {
            names.insert(hit.node.id.as_str(), hit.node.name.as_str());
        }

        let mut out = String::from("## Relevant entities (from vector search)\n");
        let mut listed: HashSet<&str> = HashSet::new();
        for hit in &self.hits {
            if !listed.insert(hit.node.id.as_str()) {
                continue;
            }
            let _ = write!(out, "- {} (type: {})", hit.node.name, hit.node.entity_type);
            if let Some(description) = &hit.node.description {
                let _ = write!(out, ". {}", description);
            }
            if include_scores {
                let _ = write!(out, " [similarity: {:.3}]", hit.score);
            }
            out.push('\n');
        }

        let related: Vec<_> = self
            .neighborhood
            .nodes
            .iter()
            .filter(|n| !listed.contains(n.id.as_str()))
            .collect();
        if !related.is_empty() {
            out.push_str("\n## Related entities\n");
            for node in related {
                let _ = write!(out, "- {} (type: {})", node.name, node.entity_type);
                if let Some(description) = &node.description {
                    let _ = write!(out, ". {}", description);
                }
                out.push('\n');
            }
        }

        let mut seen: HashSet<(&str, &str, &str)> = HashSet::new();
        let mut relationships = String::new();
        for edge in &self.neighborhood.edges {
            if !seen.insert((edge.source_id.as_str(), edge.rel_type.as_str(), edge.target_id.as_str())) {
                continue;
            }
            let source = names.get(edge.source_id.as_str()).copied().unwrap_or(&edge.source_id);
            let target = names.get(edge.target_id.as_str()).copied().unwrap_or(&edge.target_id);
            let _ = writeln!(relationships, "- {} --[{}]--> {}", source, edge.rel_type, target);
        }
        if !relationships.is_empty() {
            out.push_str("\n## Relationships\n");
            out.push_str(&relationships);
        }

        out.trim_end().to_string()
    }
}

pub struct GraphRetriever {
    store: Arc<dyn GraphStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    include_scores: bool,
}

impl GraphRetriever {
    pub fn new(store: Arc<dyn GraphStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            embedder,
            include_scores: true,
        }
    }

    pub fn with_scores(mut self, include_scores: bool) -> Self {
        self.include_scores = include_scores;
        self
    }

    /// Rendered context for `query`; an empty string when nothing matches.
    pub async fn retrieve(&self, query: &str, top_k: usize, expand_hop: usize) -> Result<String> {
        let context = self.context(query, top_k, expand_hop).await?;
        Ok(context.render(self.include_scores))
    }

    /// Nearest entities to `query` without expansion.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredNode>> {
        let label = format!("query '{}'", query);
        async {
            let vector = self.embedder.embed(query).await?;
            self.store.vector_search(&vector, top_k).await
        }
        .await
        .at_stage(Stage::Retrieval, &label)
    }

    pub async fn context(&self, query: &str, top_k: usize, expand_hop: usize) -> Result<RetrievedContext> {
        let hits = self.search(query, top_k).await?;
        if hits.is_empty() {
            info!("No entities found for query");
            return Ok(RetrievedContext::default());
        }

        let ids: Vec<String> = hits.iter().map(|h| h.node.id.clone()).collect();
        let neighborhood = self
            .store
            .neighborhood(&ids, expand_hop)
            .await
            .at_stage(Stage::Retrieval, &format!("query '{}'", query))?;
        debug!(
            "Query matched {} entities, expanded to {} nodes and {} relationships",
            hits.len(),
            neighborhood.nodes.len(),
            neighborhood.edges.len()
        );
        Ok(RetrievedContext { hits, neighborhood })
    }

    /// Stored relationships that carry the attribute `name`.
    pub async fn relations_with_attribute(&self, name: &str) -> Result<Vec<EdgeSummary>> {
        self.store
            .relations_with_property(&sanitize_property(name))
            .await
            .at_stage(Stage::Retrieval, &format!("attribute '{}'", name))
    }
}
