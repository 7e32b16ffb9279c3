//! # Course Assistant CLI (`assist`)
//!
//! The `assist` binary answers questions over a question/answer corpus. It
//! provides commands for database initialization, index rebuilds, retrieval,
//! answering, feedback, and starting the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! assist --config ./config/assist.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `assist init` | Create the SQLite database and history tables |
//! | `assist index` | Reload the corpus and rebuild the search index |
//! | `assist search "<question>"` | Show the passages a question retrieves |
//! | `assist ask "<question>"` | Answer a question and save the conversation |
//! | `assist feedback <id> up\|down` | Rate a saved answer |
//! | `assist history` | List recent conversations |
//! | `assist stats` | Index state and feedback counts |
//! | `assist serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! assist init
//! assist index --progress human
//! assist search "what is overfitting" --top-k 5
//! assist ask "what is overfitting" --json
//! assist feedback 0b7d1c1e-5a43-4f7e-9d0e-2b4a8f5e6c11 up
//! ```
//!
//! Errors are printed as `error[<code>]: <message>` and exit with status 1.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use course_assistant::error::RagError;
use course_assistant::history::HistoryStore;
use course_assistant::logging::{self, LogFormat};
use course_assistant::pipeline::Pipeline;
use course_assistant::progress::ProgressMode;
use course_assistant::{ask, config, db, search, server, stats};

/// Course Assistant: retrieval-augmented answers over a question/answer
/// corpus.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/assist.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "assist",
    about = "Course Assistant: retrieval-augmented answers over a question/answer corpus",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/assist.toml")]
    config: PathBuf,

    /// Log line format on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Human)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database.
    ///
    /// Creates the SQLite database file and the conversation/feedback
    /// tables. Idempotent.
    Init,

    /// Rebuild the search index from the corpus.
    ///
    /// Deletes the existing index, recreates it, and loads every corpus row.
    /// Readers never observe a partially loaded index.
    Index {
        /// Progress reporting on stderr: auto (human when stderr is a TTY),
        /// off, human, or json.
        #[arg(long, default_value = "auto")]
        progress: String,
    },

    /// Show the passages a question retrieves, without generating an answer.
    Search {
        /// The question.
        query: String,

        /// Number of passages to return (defaults to `retrieval.top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Print the retrieval result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Answer a question and save the conversation.
    Ask {
        /// The question.
        question: String,

        /// Number of passages used as context (defaults to `retrieval.top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Rebuild the index from the corpus before answering.
        #[arg(long)]
        rebuild: bool,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Rate a saved answer.
    Feedback {
        /// Conversation id printed by `assist ask`.
        conversation_id: String,

        /// `up` or `down`.
        vote: String,
    },

    /// List recent conversations, newest first.
    History {
        #[arg(long, default_value_t = 5)]
        limit: u32,
    },

    /// Show index state and feedback counts.
    Stats,

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.log_format);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<RagError>() {
                Some(rag) => eprintln!("error[{}]: {}", rag.code(), rag),
                None => eprintln!("error: {:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            open_history(&cfg).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Index { progress } => {
            let mode = ProgressMode::parse(&progress).ok_or_else(|| {
                anyhow::anyhow!(
                    "invalid --progress '{}': use auto, off, human, or json",
                    progress
                )
            })?;
            let pipeline = Pipeline::from_config(cfg).await?;
            let reporter = mode.reporter();
            let summary = pipeline
                .rebuild_index_with_progress(reporter.as_ref())
                .await?;
            println!(
                "Indexed {} documents into '{}' ({}) in {} ms",
                summary.doc_count, summary.index, summary.backend, summary.elapsed_ms
            );
            println!("fingerprint: {}", summary.fingerprint);
        }
        Commands::Search { query, top_k, json } => {
            let top_k = top_k.unwrap_or(cfg.retrieval.top_k);
            let pipeline = Pipeline::from_config(cfg).await?;
            search::run_search(&pipeline, &query, top_k, json).await?;
        }
        Commands::Ask {
            question,
            top_k,
            rebuild,
            json,
        } => {
            let top_k = top_k.unwrap_or(cfg.retrieval.top_k);
            let history = open_history(&cfg).await?;
            let pipeline = Pipeline::from_config(cfg).await?;
            ask::run_ask(&pipeline, &history, &question, top_k, rebuild, json).await?;
        }
        Commands::Feedback {
            conversation_id,
            vote,
        } => {
            let history = open_history(&cfg).await?;
            ask::run_feedback(&history, &conversation_id, &vote).await?;
        }
        Commands::History { limit } => {
            let history = open_history(&cfg).await?;
            ask::run_history(&history, limit).await?;
        }
        Commands::Stats => {
            let history = open_history(&cfg).await?;
            let pipeline = Pipeline::from_config(cfg).await?;
            stats::run_stats(&pipeline, &history).await?;
        }
        Commands::Serve => {
            server::run_server(cfg).await?;
        }
    }

    Ok(())
}

async fn open_history(cfg: &config::Config) -> anyhow::Result<HistoryStore> {
    let history = HistoryStore::new(db::connect(cfg).await?);
    history.init().await?;
    Ok(history)
}
