//! # repochat CLI
//!
//! The `repochat` binary indexes configured source repositories and
//! answers questions about them with file/line citations.
//!
//! ## Usage
//!
//! ```bash
//! repochat --config ./config/repochat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `repochat init` | Create both SQLite databases and run schema migrations |
//! | `repochat projects` | List configured projects and their index status |
//! | `repochat reconcile <project>` | Bring a project's index up to date |
//! | `repochat search <project> "<query>"` | Retrieve ranked citations |
//! | `repochat stats [<project>]` | Chunk/vector counts and consistency check |
//! | `repochat chat new <project>` | Start a chat session |
//! | `repochat chat ask <session> "<text>"` | Ask a question in a session |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `warn`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use repo_chat::progress::ProgressMode;
use repo_chat::search::SearchOptions;
use repo_chat::{chat_cmd, config, migrate, projects, reconcile_cmd, search, stats};
use repo_chat_core::models::ChunkKind;
use repo_chat_core::store::QueryFilter;

/// repochat: ask questions about a codebase and get cited answers.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/repochat.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "repochat",
    about = "Index source repositories and answer questions about them with citations",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/repochat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize both database schemas.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// List configured projects with their index status.
    Projects,

    /// Bring a project's index up to date with its files on disk.
    ///
    /// Only chunks whose content changed are re-embedded.
    Reconcile {
        /// Project id from `[projects.<id>]`.
        project: String,

        /// Clear the project's index first and rebuild it from scratch.
        /// Required after changing the embedding model or dimensions.
        #[arg(long)]
        full: bool,

        /// Progress output on stderr. Defaults to `human` on a TTY,
        /// otherwise `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Retrieve the chunks most similar to a query.
    Search {
        /// Project id from `[projects.<id>]`.
        project: String,

        /// The query text.
        query: String,

        /// Maximum number of results (defaults to `retrieval.top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Minimum cosine similarity (defaults to `retrieval.min_score`).
        #[arg(long)]
        min_score: Option<f32>,

        /// Only match files under this path prefix (e.g. `src/api/`).
        #[arg(long)]
        path_prefix: Option<String>,

        /// Only match chunks of this language (e.g. `rust`).
        #[arg(long)]
        language: Option<String>,

        /// Only match chunks of this kind: `whole_file` or `segment`.
        #[arg(long)]
        kind: Option<String>,
    },

    /// Show index statistics and check metadata/vector consistency.
    Stats {
        /// Limit to one project.
        project: Option<String>,
    },

    /// Manage chat sessions and ask questions.
    Chat {
        #[command(subcommand)]
        action: ChatAction,
    },
}

#[derive(Subcommand)]
enum ChatAction {
    /// Create a session; it becomes the project's active session.
    New {
        project: String,
        #[arg(long)]
        title: Option<String>,
    },
    /// List a project's sessions, most recently updated first.
    List { project: String },
    /// Print a session's messages with their citations.
    Show { session: String },
    /// Ask a question in a session.
    Ask {
        session: String,
        text: String,
        /// Only retrieve from files under this path prefix.
        #[arg(long)]
        path_prefix: Option<String>,
        /// Only retrieve chunks of this language.
        #[arg(long)]
        language: Option<String>,
    },
    /// Archive a session. Archived sessions accept no further turns.
    Archive { session: String },
    /// Make a session the project's active session.
    Activate { session: String },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Projects => {
            projects::list_projects(&cfg).await?;
        }
        Commands::Reconcile {
            project,
            full,
            progress,
        } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            reconcile_cmd::run_reconcile(&cfg, &project, full, mode).await?;
        }
        Commands::Search {
            project,
            query,
            top_k,
            min_score,
            path_prefix,
            language,
            kind,
        } => {
            let kind = kind.map(|k| k.parse::<ChunkKind>()).transpose()?;
            let options = SearchOptions {
                top_k,
                min_score,
                path_prefix,
                language,
                kind,
            };
            search::run_search(&cfg, &project, &query, &options).await?;
        }
        Commands::Stats { project } => {
            stats::run_stats(&cfg, project.as_deref()).await?;
        }
        Commands::Chat { action } => match action {
            ChatAction::New { project, title } => {
                chat_cmd::run_new(&cfg, &project, title.as_deref()).await?;
            }
            ChatAction::List { project } => {
                chat_cmd::run_list(&cfg, &project).await?;
            }
            ChatAction::Show { session } => {
                chat_cmd::run_show(&cfg, &session).await?;
            }
            ChatAction::Ask {
                session,
                text,
                path_prefix,
                language,
            } => {
                let filter = QueryFilter {
                    path_prefix,
                    language,
                    kind: None,
                };
                chat_cmd::run_ask(&cfg, &session, &text, filter).await?;
            }
            ChatAction::Archive { session } => {
                chat_cmd::run_archive(&cfg, &session).await?;
            }
            ChatAction::Activate { session } => {
                chat_cmd::run_activate(&cfg, &session).await?;
            }
        },
    }

    Ok(())
}
