//! # Compliance Harness CLI (`chk`)
//!
//! The `chk` binary reviews documents against a reference compliance corpus:
//! it splits a document into semantic chunks, retrieves the most relevant
//! corpus passages for each chunk, and asks a language model for findings.
//!
//! ## Usage
//!
//! ```bash
//! chk --config ./config/chk.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chk serve` | Start the HTTP server (`/upload`, `/analyze`, `/health`) |
//! | `chk analyze <file>` | Analyze a PDF, DOCX or TXT file and print JSON results |
//! | `chk chunk <file>` | Print the semantic chunks of a document |
//! | `chk extract <file>` | Print the text extracted from a document |
//! | `chk corpus build` | Build (or refresh) the corpus snapshot |
//! | `chk corpus info` | Describe the corpus snapshot |
//! | `chk corpus search "<query>"` | Query the corpus directly |
//!
//! ## Logging
//!
//! Diagnostics go to stderr and are filtered by `CHK_LOG` (default `info`),
//! e.g. `CHK_LOG=compliance_harness=debug chk serve`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use compliance_harness::progress::ProgressMode;
use compliance_harness::{analyze_cmd, config, corpus_cmd, server};

/// Compliance Harness CLI: retrieval-augmented compliance review.
///
/// All commands except `extract` read a TOML configuration file given by
/// `--config`. See `config/chk.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "chk",
    about = "Compliance Harness: retrieval-augmented compliance review of documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/chk.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    ///
    /// Loads (or builds) the corpus index, then serves `POST /upload`,
    /// `POST /analyze` and `GET /health` on `[server].bind`.
    Serve,

    /// Analyze a document and print one result per chunk as JSON.
    Analyze {
        /// Document to analyze (.pdf, .docx or .txt).
        file: PathBuf,

        /// Maximum chunk pipelines in flight (defaults to `[analysis].concurrency`).
        #[arg(long)]
        concurrency: Option<usize>,

        /// Progress on stderr: auto, human, json, or off.
        #[arg(long, default_value = "auto")]
        progress: String,
    },

    /// Split a document into semantic chunks and print them.
    Chunk {
        file: PathBuf,

        /// Minimum chunk length in characters (defaults to `[chunking].min_chunk_chars`).
        #[arg(long)]
        min_chars: Option<usize>,
    },

    /// Print the plain text extracted from a document.
    Extract { file: PathBuf },

    /// Manage the reference corpus.
    Corpus {
        #[command(subcommand)]
        action: CorpusAction,
    },
}

#[derive(Subcommand)]
enum CorpusAction {
    /// Build the snapshot from the records file.
    Build {
        /// Rebuild even if the snapshot is up to date.
        #[arg(long)]
        force: bool,
    },
    /// Show snapshot size, dimension and freshness.
    Info,
    /// Embed a query and list the nearest corpus entries.
    Search {
        query: String,

        /// Number of results (defaults to `[corpus].top_k`).
        #[arg(long)]
        k: Option<usize>,
    },
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("CHK_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        // Extraction needs no configuration
        Commands::Extract { file } => {
            analyze_cmd::run_extract(&file)?;
        }
        Commands::Serve => {
            let cfg = config::load_config(&cli.config)?;
            server::run_server(&cfg).await?;
        }
        Commands::Analyze {
            file,
            concurrency,
            progress,
        } => {
            let cfg = config::load_config(&cli.config)?;
            let mode = ProgressMode::parse(&progress)?;
            analyze_cmd::run_analyze(&cfg, &file, concurrency, mode).await?;
        }
        Commands::Chunk { file, min_chars } => {
            let cfg = config::load_config(&cli.config)?;
            analyze_cmd::run_chunk(&cfg, &file, min_chars).await?;
        }
        Commands::Corpus { action } => {
            let cfg = config::load_config(&cli.config)?;
            match action {
                CorpusAction::Build { force } => {
                    corpus_cmd::run_build(&cfg, force)?;
                }
                CorpusAction::Info => {
                    corpus_cmd::run_info(&cfg)?;
                }
                CorpusAction::Search { query, k } => {
                    corpus_cmd::run_search(&cfg, &query, k).await?;
                }
            }
        }
    }

    Ok(())
}
