//! Indexer CLI - command-line front end for the code-intelligence retrieval engine.
//!
//! # Usage
//!
//! ```bash
//! # Start the long-running service (auto-save + cache invalidation wired up)
//! indexer serve --config indexer.toml
//!
//! # Run a single query
//! indexer query --type semantic "parse function signatures"
//!
//! # Check that the store and the graph agree
//! indexer verify
//! ```

mod commands;
mod output;

use clap::{Parser, Subcommand};
use indexer_core::error::IndexerError;
use output::OutputFormat;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Code-intelligence retrieval engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults are used if omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit machine-readable JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the long-running service
    Serve,

    /// Run a single query against the index
    Query {
        /// Free-form query text
        text: String,

        /// Retrieval strategy
        #[arg(short = 't', long = "type", value_enum, default_value = "semantic")]
        query_type: commands::QueryTypeArg,

        /// Maximum number of results
        #[arg(short, long, default_value_t = indexer_coordinator::query::DEFAULT_MAX_RESULTS)]
        max_results: u32,

        /// Require an exact signature-name match (signature queries only)
        #[arg(long)]
        exact: bool,

        /// Restrict results to files under this path prefix
        #[arg(long)]
        file_prefix: Option<String>,

        /// Drop results below this confidence
        #[arg(long)]
        min_confidence: Option<f32>,
    },

    /// Rebuild the graph from the store and check they agree
    Verify,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let format = if cli.json { OutputFormat::Json } else { OutputFormat::Human };
    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Commands::Serve => commands::serve(config_path).await,
        Commands::Query { text, query_type, max_results, exact, file_prefix, min_confidence } => {
            commands::query(config_path, query_type, text, max_results, exact, file_prefix, min_confidence, format).await
        }
        Commands::Verify => commands::verify(config_path, format).await,
    };

    if let Err(e) = result {
        output::error(&e);
        process::exit(exit_code(&e));
    }
}

fn exit_code(e: &IndexerError) -> i32 {
    e.exit_code()
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("indexer=debug,indexer_cli=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("indexer=info,indexer_cli=info,warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
