//! `cmp`: command-line entry point for the CMP runtime.
//!
//! Commands:
//! - `serve`: Start the HTTP gateway
//! - `config init`: Write a default `cmp.toml` and the project directories
//! - `context show`: Resolve a Context and print it with its content hash
//! - `memory ingest`: Add documents to a component's memory store
//! - `memory search`: Query a component's memory store
//! - `version`: Print the runtime version

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "cmp", about = "CMP agent-serving runtime", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project root holding contexts/, prompts/, memory/ and cmp.toml
    #[arg(long, global = true, env = "CMP_ROOT", default_value = ".")]
    root: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage project configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Inspect Contexts
    Context {
        #[command(subcommand)]
        command: ContextCommands,
    },

    /// Manage component memory
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },

    /// Print the runtime version
    Version,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a default cmp.toml under the project root
    Init {
        /// Overwrite an existing cmp.toml
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum ContextCommands {
    /// Resolve a Context and print it as JSON
    Show {
        name: String,
        #[arg(long, default_value = "")]
        tenant: String,
    },
}

#[derive(Subcommand)]
enum MemoryCommands {
    /// Ingest one document per file
    Ingest {
        component: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long, default_value = "")]
        tenant: String,
    },

    /// Search a component's memory
    Search {
        component: String,
        query: String,
        /// Number of results; 0 uses the configured default
        #[arg(long, default_value_t = 0)]
        top_k: usize,
        #[arg(long, default_value = "")]
        tenant: String,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json);

    match cli.command {
        Commands::Serve { port } => commands::serve::run(&cli.root, port).await?,
        Commands::Config {
            command: ConfigCommands::Init { force },
        } => commands::config::init(&cli.root, force).await?,
        Commands::Context {
            command: ContextCommands::Show { name, tenant },
        } => commands::context::show(&cli.root, &tenant, &name).await?,
        Commands::Memory { command } => match command {
            MemoryCommands::Ingest {
                component,
                files,
                tenant,
            } => commands::memory::ingest(&cli.root, &component, &tenant, &files).await?,
            MemoryCommands::Search {
                component,
                query,
                top_k,
                tenant,
            } => commands::memory::search(&cli.root, &component, &tenant, &query, top_k).await?,
        },
        Commands::Version => println!("cmp {}", env!("CARGO_PKG_VERSION")),
    }

    Ok(())
}
