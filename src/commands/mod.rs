//! Command implementations
//!
//! Each module corresponds to a subcommand of the `docgraph` CLI; the
//! standalone binaries reuse them.

pub mod export;
pub mod extract;
pub mod query;
pub mod stats;

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::completion::RetryPolicy;
use crate::config::Config;
use crate::store::{GraphStore, Neo4jGraphStore, StoreStats};

// Re-export commonly used types
pub use export::{export_graph, run as export_run, ExportArgs};
pub use extract::{output_paths, run as extract_run, write_outputs, ExtractArgs};
pub use query::{run as query_run, QueryArgs};
pub use stats::run as stats_run;

/// Connect to the Neo4j server from the configuration.
pub async fn connect_store(config: &Config) -> Result<Arc<dyn GraphStore>> {
    if !config.neo4j.is_configured() {
        bail!("NEO4J_PASSWORD is not set. Set it in .env, the environment or config.yml");
    }
    let store = Neo4jGraphStore::connect(&config.neo4j, RetryPolicy::from_settings(&config.llm))
        .await
        .with_context(|| format!("failed to connect to Neo4j at {}", config.neo4j.uri))?;
    Ok(Arc::new(store))
}

pub fn print_store_stats(stats: &StoreStats) {
    println!("  - Total nodes: {}", stats.total_nodes);
    println!("  - Total relationships: {}", stats.total_relationships);
    if !stats.nodes_by_label.is_empty() {
        println!("\n  Nodes by label:");
        for (label, count) in &stats.nodes_by_label {
            println!("    - {}: {}", label, count);
        }
    }
    if !stats.relationships_by_type.is_empty() {
        println!("\n  Relationships by type:");
        for (rel_type, count) in &stats.relationships_by_type {
            println!("    - {}: {}", rel_type, count);
        }
    }
}
