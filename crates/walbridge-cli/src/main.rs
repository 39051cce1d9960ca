mod backends;
mod commands;
mod offsets;
mod runner;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use walbridge_config::{to_settings, TaskConfig};
use walbridge_core::TaskSettings;

use commands::{cmd_lsn, cmd_offsets, cmd_run, RunArgs};

#[derive(Parser)]
#[command(name = "walbridge")]
#[command(about = "Capture row changes from a change log and deliver them in resumable batches")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the task configuration file
    #[arg(short, long, global = true, default_value = "walbridge.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the capture task, writing records to stdout as JSON lines
    Run {
        /// Change log to stream from (JSON lines)
        #[arg(long)]
        changes: PathBuf,

        /// Rows to emit when a snapshot is taken (JSON lines)
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Offset store
        #[arg(long, default_value = "walbridge-offsets.json")]
        offsets: PathBuf,

        /// Commit after this many polls (0 = only on shutdown)
        #[arg(long, default_value = "1")]
        commit_every: u64,

        /// Stop after this many polls
        #[arg(long)]
        max_polls: Option<u64>,

        /// How often to check the change log for new lines
        #[arg(long, default_value = "200")]
        follow_interval_ms: u64,
    },

    /// Show stored offsets
    Offsets {
        /// Offset store
        #[arg(long, default_value = "walbridge-offsets.json")]
        offsets: PathBuf,
    },

    /// Convert an LSN between X/Y and integer form
    Lsn {
        /// LSN to convert
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Records go to stdout, logs to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("walbridge=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            changes,
            snapshot,
            offsets,
            commit_every,
            max_polls,
            follow_interval_ms,
        } => {
            let settings = load_settings(&cli.config)?;
            let args = RunArgs {
                changes,
                snapshot,
                offsets,
                commit_every,
                max_polls,
                follow_interval_ms,
            };
            cmd_run(settings, args).await
        }
        Commands::Offsets { offsets } => cmd_offsets(&offsets),
        Commands::Lsn { value } => cmd_lsn(&value),
    }
}

fn load_settings(path: &Path) -> Result<TaskSettings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = TaskConfig::parse(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    to_settings(&config).with_context(|| format!("Invalid configuration in {}", path.display()))
}
