//! # Knowledge Hub CLI (`khub`)
//!
//! ## Usage
//!
//! ```bash
//! khub --config ./config/khub.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `khub init` | Create the SQLite database and run schema migrations |
//! | `khub serve` | Recover unfinished tasks, start workers and the HTTP API |
//! | `khub import <file> --repo <name>` | Queue a JSON array of items for import |
//! | `khub status <task_id>` | Show task progress and per-item status |
//! | `khub search "<query>"` | Search imported knowledge |
//! | `khub repos` | List repositories with imported knowledge |
//! | `khub classify "<text>"` | Run the classifier on one text |
//!
//! Logs go to stderr; set `RUST_LOG` to change the level (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use knowledge_hub::app::App;
use knowledge_hub::{config, import, migrate, search, server};

/// Knowledge Hub: queued knowledge import and hybrid label-aware search.
#[derive(Parser)]
#[command(name = "khub", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/khub.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; safe to run against an existing database.
    Init,

    /// Run the import workers and the HTTP API.
    ///
    /// Unfinished tasks from a previous run are re-queued before the
    /// workers start.
    Serve,

    /// Queue an import from a JSON file.
    ///
    /// The file holds an array of strings or `{"content": "..."}` objects.
    /// Items are processed by a running `khub serve`.
    Import {
        file: PathBuf,

        /// Repository the items belong to.
        #[arg(long)]
        repo: String,

        /// Higher runs first.
        #[arg(long, default_value = "0")]
        priority: i64,
    },

    /// Show the status of an import task.
    Status { task_id: String },

    /// Search imported knowledge.
    Search {
        query: String,

        /// Search mode: keyword, semantic, or hybrid.
        #[arg(long, default_value = "hybrid")]
        mode: String,

        /// Only return results from this repository.
        #[arg(long)]
        repo: Option<String>,

        /// Maximum number of results (defaults to `retrieval.default_limit`).
        #[arg(long)]
        limit: Option<i64>,
    },

    /// List repositories.
    Repos,

    /// Classify a piece of text and print labels and summary.
    Classify { text: String },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_serve(cfg: &config::Config) -> anyhow::Result<()> {
    let app = Arc::new(App::open(cfg).await?);
    let workers = app.start_workers().await?;

    let listener = tokio::net::TcpListener::bind(&cfg.server.bind).await?;
    let result = server::serve(app.clone(), listener, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
        tracing::info!("shutdown requested");
    })
    .await;

    app.shutdown();
    workers.join().await;
    tracing::info!("stopped");
    result
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            run_serve(&cfg).await?;
        }
        Commands::Import {
            file,
            repo,
            priority,
        } => {
            import::run_import(&cfg, &file, &repo, priority).await?;
        }
        Commands::Status { task_id } => {
            import::run_status(&cfg, &task_id).await?;
        }
        Commands::Search {
            query,
            mode,
            repo,
            limit,
        } => {
            search::run_search(&cfg, &query, &mode, repo, limit).await?;
        }
        Commands::Repos => {
            search::run_repos(&cfg).await?;
        }
        Commands::Classify { text } => {
            import::run_classify(&cfg, &text).await?;
        }
    }

    Ok(())
}
