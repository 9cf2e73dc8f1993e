//! Statistics for a saved graph file or the live store

use std::path::Path;

use anyhow::{Context, Result};

use super::{connect_store, print_store_stats};
use crate::config::Config;
use crate::graph::{load_json, GraphStatistics};

/// Prints statistics for `graph_file`, or for Neo4j when no file is given.
pub async fn run(config: &Config, graph_file: Option<&Path>) -> Result<()> {
    match graph_file {
        Some(path) => {
            let graph =
                load_json(path).with_context(|| format!("failed to load {}", path.display()))?;
            let stats = GraphStatistics::compute(&graph);
            println!("Graph: {}", path.display());
            println!("  - Entities: {}", stats.total_entities);
            println!("  - Relations: {}", stats.total_relations);
            println!("  - Density: {:.4}", stats.density);
            println!("  - Connected components: {}", stats.connected_components);
            println!("\nEntity Types:");
            for (entity_type, count) in stats.top_entity_types() {
                println!("  - {}: {}", entity_type, count);
            }
            println!("\nRelation Types:");
            for (relation_type, count) in stats.top_relation_types() {
                println!("  - {}: {}", relation_type, count);
            }
        }
        None => {
            let store = connect_store(config).await?;
            println!("Neo4j Database Statistics ({}):", config.neo4j.uri);
            print_store_stats(&store.stats().await?);
        }
    }
    Ok(())
}
