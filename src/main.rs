//! docgraph CLI - main entry point
//!
//! Extract knowledge graphs from documents, export them to Neo4j and query
//! them back.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use docgraph::commands::{self, ExportArgs, ExtractArgs, QueryArgs};
use docgraph::retriever::{DEFAULT_HOPS, DEFAULT_TOP_K};
use docgraph::Config;

#[derive(Parser)]
#[command(name = "docgraph")]
#[command(about = "Document to knowledge graph extraction", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to config.yml (defaults to ./config.yml, then environment)
    #[arg(long, global = true, env = "DOCGRAPH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract entities and relations from a document
    Extract {
        /// Path to the document file to process
        document: PathBuf,

        /// Directory for the JSON and GraphML outputs
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Merge with existing Neo4j data (default: clear the graph first)
        #[arg(long, default_value_t = false)]
        merge: bool,

        /// Skip vector embeddings on Neo4j nodes
        #[arg(long, default_value_t = false)]
        no_embed: bool,

        /// Do not export to Neo4j even if it is configured
        #[arg(long, default_value_t = false)]
        no_store: bool,
    },

    /// Export a saved graph JSON file to Neo4j
    Export {
        /// Graph JSON written by `extract`
        graph_file: PathBuf,

        /// Clear existing graph data before importing
        #[arg(long, default_value_t = false)]
        clear: bool,

        /// Skip vector embeddings
        #[arg(long, default_value_t = false)]
        no_embed: bool,
    },

    /// Find the entities most related to a query and print graph context
    Query {
        /// Query text
        #[arg(default_value = "payment terms and conditions")]
        query: Vec<String>,

        /// Number of nearest entities
        #[arg(short = 'k', long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,

        /// Relationship hops to expand around each hit
        #[arg(long, default_value_t = DEFAULT_HOPS)]
        hops: usize,

        /// Hide similarity scores
        #[arg(long, default_value_t = false)]
        no_scores: bool,

        /// List relations that carry this attribute (e.g. start_date)
        #[arg(long)]
        attribute: Option<String>,
    },

    /// Show statistics for a graph file or the Neo4j database
    Stats {
        /// Graph JSON file; omit for Neo4j
        graph_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("docgraph=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Extract {
            document,
            output_dir,
            merge,
            no_embed,
            no_store,
        } => {
            commands::extract_run(
                &config,
                ExtractArgs {
                    document,
                    output_dir,
                    merge,
                    no_embed,
                    no_store,
                },
            )
            .await?;
        }
        Commands::Export {
            graph_file,
            clear,
            no_embed,
        } => {
            commands::export_run(
                &config,
                ExportArgs {
                    graph_file,
                    clear,
                    no_embed,
                },
            )
            .await?;
        }
        Commands::Query {
            query,
            top_k,
            hops,
            no_scores,
            attribute,
        } => {
            commands::query_run(
                &config,
                QueryArgs {
                    query: query.join(" "),
                    top_k,
                    hops,
                    no_scores,
                    attribute,
                },
            )
            .await?;
        }
        Commands::Stats { graph_file } => {
            commands::stats_run(&config, graph_file.as_deref()).await?;
        }
    }

    Ok(())
}
