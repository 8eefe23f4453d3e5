//! matchup-store - store and read back matchup executions
//!
//! Works against a JSON snapshot of the in-process store, so executions can
//! be written by one invocation and read back by the next.
//!
//! Usage:
//!   matchup-store store --snapshot results.json --input submission.json
//!   matchup-store retrieve --snapshot results.json <execution-id> [--trim]
//!   matchup-store inspect --snapshot results.json
//!
//! Logging goes to stderr and is controlled by RUST_LOG (default: info).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

use matchup_store::{
    ExecutionSubmission, MemoryStore, NestingDepth, ResultsStorage, SessionHandle, StoreConfig,
    Table,
};

#[derive(Parser, Debug)]
#[command(name = "matchup-store", version)]
#[command(about = "Persist and reconstruct matchup result trees")]
struct Cli {
    #[command(flatten)]
    overrides: ConfigOverrides,

    /// Print write metrics to stderr on exit
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

/// Config file plus per-knob overrides.
#[derive(Args, Debug)]
struct ConfigOverrides {
    /// JSON config file; missing file means defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    chunk_size: Option<usize>,

    #[arg(long, global = true)]
    max_attempts: Option<u32>,

    #[arg(long, global = true)]
    retry_backoff_ms: Option<u64>,

    #[arg(long, global = true)]
    row_timeout_ms: Option<u64>,

    /// "single" or "full"
    #[arg(long, global = true, value_parser = parse_depth)]
    nesting_depth: Option<NestingDepth>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store an execution read from a submission JSON file
    Store {
        #[arg(long)]
        snapshot: PathBuf,

        #[arg(long)]
        input: PathBuf,

        /// Use this execution id instead of the submission's or a new one
        #[arg(long)]
        execution_id: Option<Uuid>,
    },

    /// Print the stored results of an execution as JSON
    Retrieve {
        #[arg(long)]
        snapshot: PathBuf,

        execution_id: String,

        /// Only positions, source and time of top-level points
        #[arg(long)]
        trim: bool,
    },

    /// Print row counts per table
    Inspect {
        #[arg(long)]
        snapshot: PathBuf,
    },
}

fn parse_depth(value: &str) -> std::result::Result<NestingDepth, String> {
    match value {
        "single" => Ok(NestingDepth::Single),
        "full" => Ok(NestingDepth::Full),
        other => Err(format!("unknown nesting depth '{}', expected single or full", other)),
    }
}

impl ConfigOverrides {
    fn resolve(&self) -> Result<StoreConfig> {
        let mut config = match &self.config {
            Some(path) => StoreConfig::read_from(path)
                .with_context(|| format!("reading config {}", path.display()))?
                .unwrap_or_default(),
            None => StoreConfig::default(),
        };

        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.max_attempts = max_attempts;
        }
        if let Some(backoff) = self.retry_backoff_ms {
            config.retry_backoff_ms = backoff;
        }
        if let Some(timeout) = self.row_timeout_ms {
            config.row_timeout_ms = Some(timeout);
        }
        if let Some(depth) = self.nesting_depth {
            config.nesting_depth = depth;
        }

        config.validate()?;
        Ok(config)
    }
}

fn open_store(path: &Path) -> Result<Arc<MemoryStore>> {
    let store = MemoryStore::open(path)
        .with_context(|| format!("opening snapshot {}", path.display()))?;
    Ok(Arc::new(store))
}

async fn run(cli: &Cli, storage: &ResultsStorage) -> Result<()> {
    match &cli.command {
        Command::Store {
            snapshot,
            input,
            execution_id,
        } => {
            let contents = std::fs::read_to_string(input)
                .with_context(|| format!("reading submission {}", input.display()))?;
            let mut submission: ExecutionSubmission = serde_json::from_str(&contents)
                .with_context(|| format!("parsing submission {}", input.display()))?;
            if execution_id.is_some() {
                submission.execution_id = *execution_id;
            }

            let store = open_store(snapshot)?;
            let id = {
                let handle = SessionHandle::acquire(store.clone())?;
                storage.store(&handle, &submission).await?
            };
            store
                .save(snapshot)
                .with_context(|| format!("saving snapshot {}", snapshot.display()))?;

            println!("{}", id);
        }

        Command::Retrieve {
            snapshot,
            execution_id,
            trim,
        } => {
            let store = open_store(snapshot)?;
            let handle = SessionHandle::acquire(store)?;
            let results = storage.retrieve_str(&handle, execution_id, *trim).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }

        Command::Inspect { snapshot } => {
            let store = open_store(snapshot)?;
            for table in Table::ALL {
                println!("{:<24} {}", table.as_str(), store.table_len(table));
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.overrides.resolve()?;
    tracing::debug!(?config, "resolved store config");

    let storage = ResultsStorage::new(config)?;
    let outcome = run(&cli, &storage).await;

    if cli.metrics {
        let snapshot = storage.metrics().snapshot();
        eprintln!("{}", serde_json::to_string_pretty(&snapshot)?);
    }

    if let Err(e) = &outcome {
        if let Some(err) = e.downcast_ref::<matchup_store::MatchupError>() {
            tracing::error!(code = err.code(), "{}", err);
        }
    }
    outcome
}
