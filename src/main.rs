//! # wiki-digest CLI
//!
//! Resolves a free-text question to an encyclopedia article and prints a
//! short digest of it, asking for clarification when the topic is
//! ambiguous. The same pipeline is served over HTTP by `wiki-digest serve`.
//!
//! ## Usage
//!
//! ```bash
//! wiki-digest --config ./config/wiki-digest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `wiki-digest init` | Create the SQLite database and run schema migrations |
//! | `wiki-digest serve` | Start the HTTP API |
//! | `wiki-digest ask "<query>"` | Process a new query |
//! | `wiki-digest reply <id> "<text>"` | Answer a disambiguation question |
//! | `wiki-digest confirm <id> <url or text>` | Confirm an article or refine the query |
//! | `wiki-digest queries` | List recorded queries |
//! | `wiki-digest show <id>` | Show a query and its digests |
//! | `wiki-digest health` | Check the database |
//!
//! ## Example
//!
//! ```bash
//! wiki-digest init
//! wiki-digest ask "Meryl"
//! wiki-digest reply 1 "the actress"
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wiki_digest::{cli, config, migrate, server};

/// wiki-digest: ambiguity-aware encyclopedia digests.
#[derive(Parser)]
#[command(
    name = "wiki-digest",
    about = "Turn an ambiguous question into a short encyclopedia digest",
    version,
    long_about = "wiki-digest extracts a topic from a free-text question, asks a clarifying \
    question when the topic is ambiguous, finds the matching Wikipedia article and reduces it \
    to a digest of at most 300 words."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/wiki-digest.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite file and the `queries` and `search_results`
    /// tables. Safe to run more than once.
    Init,

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Process a new query.
    Ask {
        /// The question or topic, e.g. "Tell me about Meryl".
        query: String,

        /// Print the outcome as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Answer a disambiguation question for a query.
    Reply {
        /// Query id printed by `ask`.
        id: i64,

        /// Free-text answer: a number, an option name, or a description.
        text: String,

        #[arg(long)]
        json: bool,
    },

    /// Confirm an article URL, or refine the query with more text.
    Confirm {
        id: i64,

        /// An article URL, or extra words to add to the original query.
        selection: String,

        #[arg(long)]
        json: bool,
    },

    /// List recorded queries, newest first.
    Queries {
        #[arg(long)]
        json: bool,
    },

    /// Show one query with its stored digests.
    Show {
        id: i64,

        #[arg(long)]
        json: bool,
    },

    /// Check that the database is reachable.
    Health,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wiki_digest=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ask { query, json } => {
            cli::run_ask(&cfg, &query, json).await?;
        }
        Commands::Reply { id, text, json } => {
            cli::run_reply(&cfg, id, &text, json).await?;
        }
        Commands::Confirm {
            id,
            selection,
            json,
        } => {
            cli::run_confirm(&cfg, id, &selection, json).await?;
        }
        Commands::Queries { json } => {
            cli::run_queries(&cfg, json).await?;
        }
        Commands::Show { id, json } => {
            cli::run_show(&cfg, id, json).await?;
        }
        Commands::Health => {
            cli::run_health(&cfg).await?;
        }
    }

    Ok(())
}
