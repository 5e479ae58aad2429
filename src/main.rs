//! # RAG Gateway CLI (`ragd`)
//!
//! The `ragd` binary runs the gateway server and offers operator commands
//! for collections, ingestion, and ad-hoc generation.
//!
//! ## Usage
//!
//! ```bash
//! ragd --config ./config/ragd.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragd init` | Create the SQLite database and run schema migrations |
//! | `ragd serve` | Start the HTTP server |
//! | `ragd ingest <file> --collection <c>` | Chunk, embed, and index a file |
//! | `ragd collections list` | List collections with document counts |
//! | `ragd collections create <name>` | Create an empty collection |
//! | `ragd collections delete <name>` | Delete a collection and its chunks |
//! | `ragd ask "<prompt>"` | Stream a (RAG) completion to stdout |
//!
//! Logging goes to stderr and is filtered with `RUST_LOG` (default `info`).

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use rag_gateway::config::load_config;
use rag_gateway::gateway::Gateway;
use rag_gateway::ingest::IngestRequest;
use rag_gateway::migrate;
use rag_gateway::orchestrator::{GenerateRequest, RagRequest};
use rag_gateway::server;
use rag_gateway_core::models::Metadata;

/// RAG Gateway: retrieval-augmented generation behind a streaming HTTP API.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ragd.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ragd",
    about = "RAG Gateway: retrieval-augmented generation behind a streaming HTTP API",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragd.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Ingest a text file as one document.
    Ingest {
        /// File to read.
        file: PathBuf,

        /// Target collection; created if missing.
        #[arg(long)]
        collection: String,

        /// Document id. Derived from the collection and content when omitted.
        #[arg(long)]
        document_id: Option<String>,

        /// Metadata entry as `key=value`. Repeatable.
        #[arg(long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, String)>,
    },

    /// Manage collections.
    Collections {
        #[command(subcommand)]
        action: CollectionAction,
    },

    /// Generate a completion and stream it to stdout.
    Ask {
        prompt: String,

        /// Collection to retrieve from (defaults to `retrieval.default_collection`).
        #[arg(long)]
        collection: Option<String>,

        /// Let the planner decide whether to retrieve.
        #[arg(long)]
        adaptive: bool,

        /// Skip retrieval entirely.
        #[arg(long, conflicts_with_all = ["collection", "adaptive"])]
        no_rag: bool,
    },
}

#[derive(Subcommand)]
enum CollectionAction {
    /// List collections, oldest first.
    List,
    /// Create an empty collection.
    Create {
        name: String,
        /// Metadata entry as `key=value`. Repeatable.
        #[arg(long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, String)>,
    },
    /// Delete a collection and every chunk in it.
    Delete { name: String },
}

fn parse_meta(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&config).await?;
            println!("Database initialized at {}", config.db.path.display());
        }
        Commands::Serve => {
            let gateway = Arc::new(Gateway::open(config).await?);
            server::run_server(gateway.clone()).await?;
            if let Ok(gateway) = Arc::try_unwrap(gateway) {
                gateway.shutdown().await;
            }
        }
        Commands::Ingest {
            file,
            collection,
            document_id,
            meta,
        } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let mut metadata: Metadata = meta.into_iter().collect();
            metadata
                .entry("source".to_string())
                .or_insert_with(|| file.display().to_string());

            let gateway = Gateway::open(config).await?;
            let outcome = gateway
                .pipeline()
                .ingest(IngestRequest {
                    content,
                    collection: collection.clone(),
                    metadata,
                    document_id,
                })
                .await;
            gateway.shutdown().await;
            let outcome = outcome?;

            println!(
                "ingested {} into '{}': {} chunks{}",
                outcome.document_id,
                collection,
                outcome.chunks_created,
                if outcome.collection_created {
                    " (collection created)"
                } else {
                    ""
                }
            );
        }
        Commands::Collections { action } => {
            let gateway = Gateway::open(config).await?;
            let result = run_collections(&gateway, action).await;
            gateway.shutdown().await;
            result?;
        }
        Commands::Ask {
            prompt,
            collection,
            adaptive,
            no_rag,
        } => {
            let gateway = Gateway::open(config).await?;
            let result = run_ask(&gateway, prompt, collection, adaptive, no_rag).await;
            gateway.shutdown().await;
            result?;
        }
    }

    Ok(())
}

async fn run_collections(gateway: &Gateway, action: CollectionAction) -> Result<()> {
    match action {
        CollectionAction::List => {
            let collections = gateway.registry().list().await?;
            if collections.is_empty() {
                println!("No collections.");
            }
            for c in collections {
                println!(
                    "{:<32} {:>6} docs  created {}",
                    c.name,
                    c.document_count,
                    c.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        CollectionAction::Create { name, meta } => {
            let collection = gateway
                .registry()
                .create(&name, meta.into_iter().collect())
                .await?;
            println!("created collection '{}'", collection.name);
        }
        CollectionAction::Delete { name } => {
            gateway.registry().delete(&name).await?;
            println!("deleted collection '{}'", name);
        }
    }
    Ok(())
}

async fn run_ask(
    gateway: &Gateway,
    prompt: String,
    collection: Option<String>,
    adaptive: bool,
    no_rag: bool,
) -> Result<()> {
    let mut stream = if no_rag {
        gateway.orchestrator().generate_stream(GenerateRequest {
            prompt,
            ..Default::default()
        })?
    } else {
        gateway.orchestrator().generate_with_rag(RagRequest {
            prompt,
            rag_collection: collection,
            adaptive,
            ..Default::default()
        })?
    };

    let mut stdout = std::io::stdout();
    while let Some(item) = stream.next().await {
        match item {
            Ok(token) => {
                stdout.write_all(token.as_bytes())?;
                stdout.flush()?;
            }
            Err(e) => {
                println!();
                bail!("generation failed: {}", e);
            }
        }
    }
    println!();
    Ok(())
}
