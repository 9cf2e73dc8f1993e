//! Load a saved graph and merge it into Neo4j

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use super::{connect_store, print_store_stats};
use crate::completion::RetryPolicy;
use crate::config::Config;
use crate::embeddings::build_embedder;
use crate::export::{ExportOptions, ExportSummary, GraphStoreExporter};
use crate::graph::{load_json, DocumentGraph};
use crate::store::GraphStore;

const SHOWN_ERRORS: usize = 5;

/// Arguments of the `export` command.
#[derive(Debug, Clone)]
pub struct ExportArgs {
    /// Graph JSON written by `extract`
    pub graph_file: PathBuf,
    /// Wipe the store before importing
    pub clear: bool,
    /// Skip embeddings and the vector index
    pub no_embed: bool,
}

pub async fn run(config: &Config, args: ExportArgs) -> Result<()> {
    if !args.graph_file.exists() {
        bail!("file not found: {}", args.graph_file.display());
    }

    println!("Loading graph from: {}", args.graph_file.display());
    let graph = load_json(&args.graph_file)
        .with_context(|| format!("failed to load {}", args.graph_file.display()))?;
    println!(
        "Loaded {} entities and {} relations",
        graph.entities().len(),
        graph.relations().len()
    );
    if let Some(document) = graph.document() {
        println!("  Document: {} ({} chunks)", document.doc_id, graph.chunks().len());
    }

    println!("\nConnecting to Neo4j at {}...", config.neo4j.uri);
    let store = connect_store(config).await?;
    if args.clear {
        println!("Clearing existing graph data...");
    }
    let summary = export_graph(config, store.clone(), &graph, args.clear, !args.no_embed).await?;
    print_summary(&summary);

    println!("\nDatabase Statistics:");
    print_store_stats(&store.stats().await?);
    Ok(())
}

/// Export `graph` into `store`, embedding entities unless `embed` is off.
pub async fn export_graph(
    config: &Config,
    store: Arc<dyn GraphStore>,
    graph: &DocumentGraph,
    clear_first: bool,
    embed: bool,
) -> Result<ExportSummary> {
    let mut exporter = GraphStoreExporter::new(store);
    let mut options = ExportOptions {
        clear_first,
        batch_size: config.embeddings.batch_size,
        ..ExportOptions::default()
    };

    if embed {
        let embedder = build_embedder(&config.embeddings, RetryPolicy::from_settings(&config.llm))
            .context("embedding setup failed; fix it or pass --no-embed")?;
        // Probe the backend before touching the store.
        let probe = embedder
            .embed("test")
            .await
            .context("embedding setup failed; fix it or pass --no-embed")?;
        info!("Embedding backend ready ({} dimensions)", probe.len());
        options.embedding_dimension = Some(probe.len());
        exporter = exporter.with_embedder(embedder);
    }

    let summary = exporter.export(graph, &options).await?;
    if !summary.errors.is_empty() {
        warn!("{} relations were not exported", summary.errors.len());
    }
    Ok(summary)
}

pub(crate) fn print_summary(summary: &ExportSummary) {
    println!("\nExport complete!");
    println!("  - Entities merged: {}", summary.entities_merged);
    println!("  - Relations merged: {}", summary.relations_merged);
    if summary.chunks_merged > 0 {
        println!(
            "  - Document chunks merged: {} (in {} documents)",
            summary.chunks_merged, summary.documents_merged
        );
    }
    if summary.embeddings_written > 0 {
        println!("  - Embeddings written: {}", summary.embeddings_written);
    }
    if !summary.errors.is_empty() {
        println!("  - Errors: {}", summary.errors.len());
        for error in summary.errors.iter().take(SHOWN_ERRORS) {
            println!("    - {}", error);
        }
    }
}
