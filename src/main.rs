//! # convodex CLI (`cvx`)
//!
//! The `cvx` binary is the primary interface for convodex. It provides
//! commands for store initialization, archive ingestion, search, listing,
//! selection-based export, and store inspection.
//!
//! ## Usage
//!
//! ```bash
//! cvx --config ./config/convodex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cvx init` | Create the SQLite store and reconcile the cache schema |
//! | `cvx load <archive>` | Ingest a chat archive (zip or `conversations.json`) |
//! | `cvx search "<query>"` | Search loaded conversations |
//! | `cvx list` | List loaded conversations |
//! | `cvx export <id>...` | Export selected conversations as JSON |
//! | `cvx status` | Show store status |

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use convodex::config::{self, Config};
use convodex::export;
use convodex::lifecycle::App;
use convodex::models::{format_ts_iso, MatchMode, SortBy};

/// convodex CLI — a local-first chat-archive ingestion and search tool.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file; without one, built-in defaults are used (store under `./data/`).
#[derive(Parser)]
#[command(
    name = "cvx",
    about = "convodex — a local-first chat-archive ingestion and search tool",
    version,
    long_about = "convodex ingests bulk chat-conversation exports, normalizes them into \
    searchable records, and maintains a persistent full-text index over them, all in a \
    local SQLite store. Subsequent runs restore the cached records and index instead of \
    re-parsing and re-indexing."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/convodex.toml`. When the file does not exist,
    /// built-in defaults apply.
    #[arg(long, global = true, default_value = "./config/convodex.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the local store.
    ///
    /// Creates the SQLite file and reconciles the cache schema, migrating
    /// any data left by older layouts. Idempotent — running it multiple
    /// times is safe.
    Init,

    /// Ingest a chat archive.
    ///
    /// Accepts the zip archive a chat service's data export produces, or a
    /// bare `conversations.json`. The new record set replaces the previous
    /// one, and the search index is rebuilt (or restored when the content
    /// is unchanged).
    Load {
        /// Path to the archive (`.zip`) or export document (`.json`).
        path: PathBuf,
    },

    /// Search loaded conversations.
    ///
    /// Fuzzy mode ranks via the persistent full-text index (prefix and
    /// typo tolerant); `--exact` does case-insensitive substring matching
    /// directly against titles and message text.
    Search {
        /// The search query string.
        query: String,

        /// Exact substring matching instead of fuzzy ranking.
        #[arg(long)]
        exact: bool,

        /// Sort order: `relevance`, `updated`, or `created`.
        #[arg(long, default_value = "relevance")]
        sort: String,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<i64>,
    },

    /// List loaded conversations, most recently updated first.
    List {
        /// Maximum number of conversations to show.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Export selected conversations as JSON.
    Export {
        /// Conversation ids to export.
        ids: Vec<String>,

        /// Write to this file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Show store status: schema version, record count, index state.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        Config::minimal()
    };

    match cli.command {
        Commands::Init => {
            let app = App::start(&cfg).await?;
            let version = app.schema_version().await.unwrap_or_else(|| "?".to_string());
            println!("Store initialized (schema v{version}).");
        }
        Commands::Load { path } => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("Failed to read archive: {}", path.display()))?;
            let mut app = App::start(&cfg).await?;
            let count = app.load_archive(&bytes).await?;

            println!("load {}", path.display());
            println!("  conversations: {}", count);
            if let Some(fp) = app.live_fingerprint() {
                println!("  fingerprint: {}", fp);
            }
            println!("ok");
        }
        Commands::Search {
            query,
            exact,
            sort,
            limit,
        } => {
            let Some(sort) = SortBy::parse(&sort) else {
                bail!("Unknown sort: {}. Use relevance, updated, or created.", sort);
            };
            let mode = if exact { MatchMode::Exact } else { MatchMode::Fuzzy };

            let app = App::start(&cfg).await?;
            let mut results = app.search(&query, mode, sort);
            if results.is_empty() {
                println!("No results.");
                return Ok(());
            }

            let final_limit = limit.unwrap_or(cfg.retrieval.final_limit);
            results.truncate(final_limit as usize);

            for (i, result) in results.iter().enumerate() {
                let title = if result.title.is_empty() {
                    "(untitled)"
                } else {
                    &result.title
                };
                match result.score {
                    Some(score) => println!("{}. [{:.2}] {}", i + 1, score, title),
                    None => println!("{}. {}", i + 1, title),
                }
                println!("    updated: {}", format_ts_iso(result.updated_at));
                println!("    id: {}", result.id);
                println!();
            }
        }
        Commands::List { limit } => {
            let app = App::start(&cfg).await?;
            let records = app.records();
            if records.is_empty() {
                println!("No conversations loaded.");
                return Ok(());
            }

            // Records are kept created-ascending; show most recent first.
            let shown = records
                .iter()
                .rev()
                .take(limit.unwrap_or(records.len()));
            for record in shown {
                let title = if record.title.is_empty() {
                    "(untitled)"
                } else {
                    &record.title
                };
                println!(
                    "{}  {}  {}",
                    format_ts_iso(record.updated_at),
                    record.id,
                    title
                );
            }
        }
        Commands::Export { ids, out } => {
            if ids.is_empty() {
                bail!("No conversation ids given.");
            }
            let app = App::start(&cfg).await?;
            let json = export::export_selection(app.records(), &ids)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, &json)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Exported {} conversation(s) to {}", ids.len(), path.display());
                }
                None => println!("{json}"),
            }
        }
        Commands::Status => {
            let app = App::start(&cfg).await?;
            println!("store: {}", cfg.db.path.display());
            println!(
                "  schema: v{}",
                app.schema_version().await.unwrap_or_else(|| "?".to_string())
            );
            println!("  conversations: {}", app.records().len());
            match app.live_fingerprint() {
                Some(fp) => println!("  index: live ({fp})"),
                None => println!("  index: none"),
            }
        }
    }

    Ok(())
}
