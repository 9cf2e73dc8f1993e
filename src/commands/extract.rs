//! Extract a graph from one document, save it, and optionally push it to Neo4j

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde_json::Value;

use super::{connect_store, export::export_graph, export::print_summary, print_store_stats};
use crate::config::Config;
use crate::error::{Error, Stage};
use crate::graph::{save_json, write_graphml, DocumentGraph, GraphStatistics};
use crate::pipeline::DocumentPipeline;

const SAMPLE_SIZE: usize = 5;

/// Arguments of the `extract` command.
#[derive(Debug, Clone, Default)]
pub struct ExtractArgs {
    pub document: PathBuf,
    /// Defaults to the configured output directory
    pub output_dir: Option<PathBuf>,
    /// Merge into the store instead of replacing its contents
    pub merge: bool,
    pub no_embed: bool,
    /// Never export, even when Neo4j is configured
    pub no_store: bool,
}

pub async fn run(config: &Config, args: ExtractArgs) -> Result<()> {
    if !args.document.exists() {
        bail!("document not found at {}", args.document.display());
    }

    println!("Processing document: {}", args.document.display());
    println!("{}", "-".repeat(50));

    let pipeline = DocumentPipeline::from_config(config)?;
    let graph = pipeline
        .process(&args.document)
        .await
        .context("extraction failed")?;

    println!("\nExtraction complete!");
    print_statistics(&graph);

    let output_dir = args.output_dir.clone().unwrap_or_else(|| config.output.dir.clone());
    let (json_path, graphml_path) =
        write_outputs(&graph, &args.document, &output_dir, config.output.graphml_layout)?;
    println!("\nResults exported:");
    println!("  - JSON: {}", json_path.display());
    println!("  - GraphML: {}", graphml_path.display());
    print_samples(&graph);

    if !args.no_store && config.neo4j.is_configured() {
        println!("\nExporting to Neo4j...");
        if !args.merge {
            println!("Clearing existing graph, then importing new extraction...");
        }
        if let Err(e) = push_to_store(config, &graph, !args.merge, !args.no_embed).await {
            println!("\nExtraction results kept in {}", json_path.display());
            return Err(export_failure(e, &args.document));
        }
    }
    Ok(())
}

/// Store failures name the export stage and the document file.
fn export_failure(err: anyhow::Error, document: &Path) -> anyhow::Error {
    let staged = err
        .downcast_ref::<Error>()
        .is_some_and(|e| e.stage() == Some(Stage::Export));
    if staged {
        err
    } else {
        err.context(format!("{} failed for {}", Stage::Export, document.display()))
    }
}

/// `<dir>/<stem>_graph.json` and `<dir>/<stem>_graph.graphml`.
pub fn output_paths(document: &Path, output_dir: &Path) -> (PathBuf, PathBuf) {
    let stem = document
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    (
        output_dir.join(format!("{}_graph.json", stem)),
        output_dir.join(format!("{}_graph.graphml", stem)),
    )
}

/// Saves both file formats and returns their paths.
pub fn write_outputs(
    graph: &DocumentGraph,
    document: &Path,
    output_dir: &Path,
    graphml_layout: bool,
) -> Result<(PathBuf, PathBuf)> {
    let (json_path, graphml_path) = output_paths(document, output_dir);
    save_json(graph, &json_path).with_context(|| format!("failed to write {}", json_path.display()))?;
    write_graphml(graph, &graphml_path, graphml_layout)
        .with_context(|| format!("failed to write {}", graphml_path.display()))?;
    Ok((json_path, graphml_path))
}

fn print_statistics(graph: &DocumentGraph) {
    let stats = GraphStatistics::compute(graph);
    println!("  - Entities found: {}", stats.total_entities);
    println!("  - Relations found: {}", stats.total_relations);
    if let Some(dropped) = graph.metadata().get("dropped_entities").and_then(Value::as_u64) {
        if dropped > 0 {
            println!("  - Entities dropped (no name): {}", dropped);
        }
    }
    if let Some(dropped) = graph.metadata().get("dropped_relations").and_then(Value::as_u64) {
        if dropped > 0 {
            println!("  - Relations dropped (unresolved endpoints): {}", dropped);
        }
    }

    println!("\nEntity Types:");
    for (entity_type, count) in stats.top_entity_types() {
        println!("  - {}: {}", entity_type, count);
    }
    println!("\nRelation Types:");
    for (relation_type, count) in stats.top_relation_types() {
        println!("  - {}: {}", relation_type, count);
    }
}

fn print_samples(graph: &DocumentGraph) {
    println!("\nSample Entities:");
    for entity in graph.entities().iter().take(SAMPLE_SIZE) {
        println!("  - [{}] {} (ID: {})", entity.entity_type, entity.name, entity.id);
        if let Some(description) = &entity.description {
            println!("    Description: {}", description);
        }
    }
    if graph.entities().len() > SAMPLE_SIZE {
        println!("  ... and {} more entities", graph.entities().len() - SAMPLE_SIZE);
    }

    println!("\nSample Relations:");
    for relation in graph.relations().iter().take(SAMPLE_SIZE) {
        println!(
            "  - {} --[{}]--> {}",
            graph.display_name(&relation.source_entity_id),
            relation.relation_type,
            graph.display_name(&relation.target_entity_id)
        );
        if let Some(description) = &relation.description {
            println!("    Description: {}", description);
        }
        let attributes: Vec<String> = relation
            .attributes
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        if !attributes.is_empty() {
            println!("    Attributes: {}", attributes.join(", "));
        }
    }
    if graph.relations().len() > SAMPLE_SIZE {
        println!("  ... and {} more relations", graph.relations().len() - SAMPLE_SIZE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{load_json, Entity, Relation};

    #[test]
    fn output_paths_use_document_stem() {
        let (json, graphml) = output_paths(Path::new("docs/Legal _ Uber.txt"), Path::new("outputs"));
        assert_eq!(json, PathBuf::from("outputs/Legal _ Uber_graph.json"));
        assert_eq!(graphml, PathBuf::from("outputs/Legal _ Uber_graph.graphml"));
    }

    #[test]
    fn store_failures_name_stage_and_file() {
        let err = export_failure(anyhow::anyhow!("connection refused"), Path::new("docs/terms.txt"));
        let msg = format!("{:#}", err);
        assert!(msg.starts_with("graph store export failed for docs/terms.txt"));
        assert!(msg.contains("connection refused"));

        let staged = Error::Store("down".to_string()).at_stage(Stage::Export, "terms.txt");
        let err = export_failure(staged.into(), Path::new("docs/terms.txt"));
        assert_eq!(err.downcast_ref::<Error>().and_then(Error::stage), Some(Stage::Export));
        assert_eq!(err.to_string(), "graph store export failed for terms.txt: Graph store error: down");
    }

    #[test]
    fn write_outputs_creates_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let graph = DocumentGraph::new(
            vec![Entity::new("e1", "Uber", "ORGANIZATION"), Entity::new("e2", "Rider", "ROLE")],
            vec![Relation::new("r1", "e1", "e2", "DEFINES")],
        )
        .unwrap();

        let (json, graphml) =
            write_outputs(&graph, Path::new("terms.txt"), &dir.path().join("out"), false).unwrap();
        assert!(graphml.exists());
        assert_eq!(load_json(&json).unwrap(), graph);
    }
}
