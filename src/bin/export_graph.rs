//! Export a saved graph JSON file to Neo4j.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use docgraph::commands::{export_run, ExportArgs};
use docgraph::Config;

#[derive(Parser)]
#[command(name = "export_graph")]
#[command(about = "Merge a graph JSON file into Neo4j")]
struct Cli {
    /// Graph JSON written by `docgraph extract`
    graph_file: PathBuf,

    /// Clear existing graph data before importing
    #[arg(long)]
    clear: bool,

    /// Skip vector embeddings (stored by default for semantic search, Neo4j 5.13+)
    #[arg(long)]
    no_embed: bool,

    /// Path to config.yml
    #[arg(long, env = "DOCGRAPH_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("docgraph=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    export_run(
        &config,
        ExportArgs {
            graph_file: cli.graph_file,
            clear: cli.clear,
            no_embed: cli.no_embed,
        },
    )
    .await
}
