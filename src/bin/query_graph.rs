//! Vector search over the exported graph, printing LLM-ready context.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use docgraph::commands::{query_run, QueryArgs};
use docgraph::retriever::{DEFAULT_HOPS, DEFAULT_TOP_K};
use docgraph::Config;

#[derive(Parser)]
#[command(name = "query_graph")]
#[command(about = "Find the graph entities most related to a query")]
struct Cli {
    /// Query text
    query: Vec<String>,

    #[arg(short = 'k', long, default_value_t = DEFAULT_TOP_K)]
    top_k: usize,

    #[arg(long, default_value_t = DEFAULT_HOPS)]
    hops: usize,

    /// Path to config.yml
    #[arg(long, env = "DOCGRAPH_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("docgraph=warn".parse()?))
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    let mut args = QueryArgs {
        top_k: cli.top_k,
        hops: cli.hops,
        ..QueryArgs::default()
    };
    if !cli.query.is_empty() {
        args.query = cli.query.join(" ");
    }
    query_run(&config, args).await
}
