//! # MindMenu CLI (`mindmenu`)
//!
//! Runs the restaurant chatbot API and exposes the indexing and query
//! pipeline for local use.
//!
//! ## Usage
//!
//! ```bash
//! mindmenu --config ./config/mindmenu.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mindmenu init` | Create the SQLite database and run schema migrations |
//! | `mindmenu serve` | Start the HTTP API |
//! | `mindmenu chunk <file>` | Print the chunks a knowledge document produces |
//! | `mindmenu index --branch <id> --file <json>` | Index a document for a branch and wait |
//! | `mindmenu ask --branch <id> "<question>"` | Ask a branch chatbot a question |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use mindmenu::chunk::chunk_json;
use mindmenu::config;
use mindmenu::migrate;
use mindmenu::server;
use mindmenu::service::{CreateChatbot, QueryRequest, Service};

/// MindMenu: retrieval-augmented chatbots for restaurant branches.
#[derive(Parser)]
#[command(name = "mindmenu", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mindmenu.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Chunk a knowledge document and print the result as JSON.
    ///
    /// Does not read the config file or touch the database.
    Chunk {
        /// Path to a JSON knowledge document.
        file: PathBuf,
    },

    /// Index a knowledge document for a branch and wait for completion.
    Index {
        /// Branch ID.
        #[arg(long)]
        branch: String,

        /// Path to a JSON knowledge document. Defaults to the latest snapshot.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Delete vectors the document no longer produces.
        #[arg(long)]
        prune: bool,
    },

    /// Ask a branch chatbot a question.
    Ask {
        /// Branch ID.
        #[arg(long)]
        branch: String,

        /// Continue an existing session.
        #[arg(long)]
        session: Option<String>,

        /// Response language (`en`, `zh`, `ja`, `ko`).
        #[arg(long)]
        language: Option<String>,

        question: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Chunk { file } = &cli.command {
        let raw = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let output = chunk_json(&raw)?;
        for warning in &output.warnings {
            eprintln!("warning: {}: {}", warning.path, warning.reason);
        }
        let chunks: Vec<serde_json::Value> = output
            .chunks
            .iter()
            .map(|c| {
                serde_json::json!({
                    "text": c.text,
                    "source": c.metadata.source,
                    "category": c.metadata.category,
                    "item_key": c.metadata.item_key,
                    "item_index": c.metadata.item_index,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&chunks)?);
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Chunk { .. } => {}
        Commands::Init => {
            migrate::init_database(&cfg).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Index {
            branch,
            file,
            prune,
        } => {
            let content = match file {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    Some(serde_json::from_str(&raw).context("content is not valid JSON")?)
                }
                None => None,
            };

            let service = Service::from_config(&cfg).await?;
            let submission = service
                .create_chatbot(CreateChatbot {
                    branch_id: branch,
                    content,
                    prune,
                })
                .await?;
            let report = submission
                .done
                .await
                .context("index worker stopped before finishing")??;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Ask {
            branch,
            session,
            language,
            question,
        } => {
            let service = Service::from_config(&cfg).await?;
            let answer = service
                .query(
                    &branch,
                    QueryRequest {
                        question,
                        session_id: session,
                        language,
                    },
                    false,
                )
                .await?;
            println!("{}", answer.response);
            eprintln!(
                "session: {} ({} context chunks)",
                answer.session_id, answer.debug.context_count
            );
        }
    }

    Ok(())
}
