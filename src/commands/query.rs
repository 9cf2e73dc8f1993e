//! Semantic search over the exported graph

use anyhow::{Context, Result};

use super::connect_store;
use crate::completion::RetryPolicy;
use crate::config::Config;
use crate::embeddings::build_embedder;
use crate::retriever::{GraphRetriever, DEFAULT_HOPS, DEFAULT_TOP_K};
use crate::store::VECTOR_INDEX_NAME;

/// Arguments of the `query` command.
#[derive(Debug, Clone)]
pub struct QueryArgs {
    pub query: String,
    pub top_k: usize,
    pub hops: usize,
    /// Hide similarity scores in the rendered context
    pub no_scores: bool,
    /// List relations carrying this attribute instead of searching
    pub attribute: Option<String>,
}

impl Default for QueryArgs {
    fn default() -> Self {
        Self {
            query: "payment terms and conditions".to_string(),
            top_k: DEFAULT_TOP_K,
            hops: DEFAULT_HOPS,
            no_scores: false,
            attribute: None,
        }
    }
}

pub async fn run(config: &Config, args: QueryArgs) -> Result<()> {
    let store = connect_store(config).await?;
    let embedder = build_embedder(&config.embeddings, RetryPolicy::from_settings(&config.llm))
        .context("embedding setup failed")?;
    let retriever = GraphRetriever::new(store, embedder).with_scores(!args.no_scores);

    if let Some(attribute) = &args.attribute {
        let relations = retriever.relations_with_attribute(attribute).await?;
        println!("Relations with attribute '{}': {}", attribute, relations.len());
        for relation in relations {
            println!(
                "  - ({}) --[{}]--> ({})  id={}",
                relation.source_id, relation.rel_type, relation.target_id, relation.id
            );
        }
        return Ok(());
    }

    println!("Query: {:?}", args.query);
    println!("Top {} most related nodes (vector similarity)", args.top_k);
    println!("{}", "-".repeat(60));
    println!("\nCypher (bind $query_vector to the embedding list):");
    println!(
        "  CALL db.index.vector.queryNodes('{}', {}, $query_vector)",
        VECTOR_INDEX_NAME, args.top_k
    );
    println!("  YIELD node, score");
    println!("  RETURN node.id AS id, node.name AS name, node.type AS type, score");
    println!("  ORDER BY score DESC\n");

    let context = retriever.context(&args.query, args.top_k, args.hops).await?;
    if context.is_empty() {
        println!("No nodes found. Ensure the graph was exported with embeddings (no --no-embed).");
        return Ok(());
    }

    println!("Results:");
    for (i, hit) in context.hits.iter().enumerate() {
        println!(
            "  {:2}. [{}] {} (id={})  score={:.4}",
            i + 1,
            hit.node.entity_type,
            hit.node.name,
            hit.node.id,
            hit.score
        );
    }

    println!("\nFormatted context for LLM:");
    println!("{}", "-".repeat(60));
    println!("{}", context.render(!args.no_scores));
    Ok(())
}
