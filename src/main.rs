//! # convo CLI
//!
//! The `convo` binary inspects chat history exports and imports them into a
//! conversation server.
//!
//! ## Usage
//!
//! ```bash
//! convo --config ./config/convo.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `convo inspect <file>` | Show format, counts, and conversation previews |
//! | `convo import <file>` | Upload all, a range, or a selection of conversations |
//! | `convo split <file>` | Write upload-sized chunk files to disk |
//! | `convo completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! # What is in this export, and what already exists on the server?
//! convo inspect conversations.json
//!
//! # Import the first 500 new conversations
//! convo import conversations.json --mode batch --start 1 --end 500
//!
//! # Import everything from the last week that mentions "deploy"
//! convo import conversations.json --mode selective --search deploy --date 7days --select-all-visible
//! ```

use std::io;
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use convo_import::config;
use convo_import::import_cmd::{self, ImportArgs, ImportMode};
use convo_import::logging::{self, LogFormat, LoggingConfig};
use convo_import::progress::ProgressMode;
use convo_import::{inspect, split_cmd};
use convo_import_core::selection::{ConversationFilter, DateFilter};

/// Import chat history exports (ChatGPT, Claude, LibreChat) into a
/// conversation server.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/convo.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "convo",
    about = "Import chat history exports into a conversation server",
    version,
    long_about = "convo detects the export format (ChatGPT, Claude, or LibreChat), previews \
    each conversation, marks the ones that already exist on the server, and uploads all of \
    them, a range, or a hand-picked selection. Large exports are split into sequential \
    chunks, and lost replies are followed up by polling the server."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/convo.toml`. Built-in defaults are used when
    /// the file does not exist.
    #[arg(long, global = true, default_value = "./config/convo.toml")]
    config: PathBuf,

    /// Log level for convo itself (`error`, `warn`, `info`, `debug`, `trace`).
    /// `RUST_LOG` takes precedence when set.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Log output format: `pretty`, `compact`, or `json`.
    #[arg(long, global = true, default_value = "compact")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Parse an export and list its conversations.
    ///
    /// Prints the detected format, total / duplicate / importable counts,
    /// and a preview of each conversation. Duplicates are checked against
    /// the server unless `--offline` is given.
    Inspect {
        /// Export file (`.json`).
        file: PathBuf,

        /// Skip the server; no duplicate check.
        #[arg(long)]
        offline: bool,

        /// Only list conversations whose title or first message contains this text.
        #[arg(long)]
        search: Option<String>,

        /// Creation date filter: `all`, `7days`, or `30days`.
        #[arg(long, default_value = "all")]
        date: DateFilter,

        /// Maximum number of previews to print.
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Upload an export to the server.
    ///
    /// `full` sends the original file (split into chunks when large).
    /// `batch` and `selective` send at most 500 conversations through the
    /// selective endpoint.
    Import {
        /// Export file (`.json`).
        file: PathBuf,

        #[arg(long, value_enum, default_value = "full")]
        mode: ImportMode,

        /// First conversation of a batch (1-based, over importable conversations).
        #[arg(long)]
        start: Option<usize>,

        /// Last conversation of a batch (inclusive).
        #[arg(long)]
        end: Option<usize>,

        /// Conversations to select, by preview id or source conversation id.
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,

        /// Selective mode: search text for the visible list.
        #[arg(long)]
        search: Option<String>,

        /// Selective mode: creation date filter (`all`, `7days`, `30days`).
        #[arg(long, default_value = "all")]
        date: DateFilter,

        /// Selective mode: select every visible importable conversation.
        #[arg(long)]
        select_all_visible: bool,

        /// Run against an in-memory server; nothing is sent.
        #[arg(long)]
        dry_run: bool,

        /// Resend conversations the server reported as failed, once.
        #[arg(long)]
        retry_failed: bool,

        /// Progress output: `off`, `human`, or `json`. Defaults to human on a TTY.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Split an export into upload-sized chunk files.
    Split {
        /// Export file (`.json`) holding an array of conversations.
        file: PathBuf,

        /// Directory for the chunk files.
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,

        /// Maximum bytes per chunk. Defaults to `upload.chunk_threshold_bytes`.
        #[arg(long)]
        max_bytes: Option<u64>,
    },

    /// Print shell completions to stdout.
    Completions {
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init_logging(&LoggingConfig {
        format: cli.log_format.parse::<LogFormat>()?,
        level: cli.log_level.clone(),
    })?;

    // Completions never read the config file.
    let load_config = || config::load_or_minimal(&cli.config);

    match cli.command {
        Commands::Inspect {
            file,
            offline,
            search,
            date,
            limit,
            json,
        } => {
            let filter = ConversationFilter {
                query: search.unwrap_or_default(),
                date,
            };
            let cfg = load_config()?;
            inspect::run_inspect(&cfg, &file, offline, &filter, limit, json).await?;
        }
        Commands::Import {
            file,
            mode,
            start,
            end,
            ids,
            search,
            date,
            select_all_visible,
            dry_run,
            retry_failed,
            progress,
        } => {
            let args = ImportArgs {
                mode,
                start,
                end,
                ids,
                filter: ConversationFilter {
                    query: search.unwrap_or_default(),
                    date,
                },
                select_all_visible,
                dry_run,
                retry_failed,
                progress: ProgressMode::from_flag(progress.as_deref())?,
            };
            let cfg = load_config()?;
            import_cmd::run_import(&cfg, &file, &args).await?;
        }
        Commands::Split {
            file,
            out_dir,
            max_bytes,
        } => {
            let max_bytes = match max_bytes {
                Some(n) => n,
                None => load_config()?.upload.chunk_threshold_bytes,
            };
            split_cmd::run_split(&file, &out_dir, max_bytes)?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "convo", &mut io::stdout());
        }
    }

    Ok(())
}
