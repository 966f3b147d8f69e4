//! Sett CLI entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "sett")]
#[command(about = "Incremental code graph indexer and query tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Workspace root path (defaults to current directory)
    #[arg(short, long, default_value = ".", global = true)]
    root: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Index the workspace and exit
    Index {
        /// Reconsider every file instead of trusting the watcher's view
        #[arg(long)]
        full: bool,

        /// Rebind the namespace if it belongs to another workspace
        #[arg(short, long)]
        yes: bool,

        /// Only these paths (relative to the root or absolute)
        paths: Vec<PathBuf>,
    },
    /// Index, then re-index on file changes until interrupted
    Watch {
        /// Rebind the namespace if it belongs to another workspace
        #[arg(short, long)]
        yes: bool,
    },
    /// Serve the query tools over HTTP, re-indexing on file changes
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Don't watch the workspace
        #[arg(long)]
        no_watch: bool,
    },
    /// Run one query tool and print its JSON response
    Query {
        /// Tool name, e.g. get_function_callers
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(default_value = "{}")]
        arguments: String,
    },
    /// List the available query tools
    Tools,
    /// Show node and edge counts of the indexed graph
    Stats,
    /// Delete the namespace's cache, workspace record and graph snapshot
    Clear,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("sett={}", log_level)));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::debug!("Sett v{}", env!("CARGO_PKG_VERSION"));
    tracing::debug!("Workspace root: {}", cli.root.display());

    match cli.command {
        Commands::Index { full, yes, paths } => commands::index(cli.root, full, yes, paths).await,
        Commands::Watch { yes } => commands::watch(cli.root, yes).await,
        Commands::Serve {
            port,
            host,
            no_watch,
        } => commands::serve(cli.root, host, port, !no_watch).await,
        Commands::Query { tool, arguments } => commands::query(cli.root, tool, arguments).await,
        Commands::Tools => commands::tools(),
        Commands::Stats => commands::stats(cli.root).await,
        Commands::Clear => commands::clear(cli.root),
        Commands::Version => {
            println!("Sett v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
