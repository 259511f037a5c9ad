//! `archiva` — operator CLI for the retention engine.
//!
//! Reads `archiva.toml` (or the path given with `--config`) layered with
//! `ARCHIVA_*` environment variables, opens the SQLite store and runs one
//! command. Results are printed to stdout as JSON; logs go to stderr.
//!
//! # Usage
//!
//! ```
//! archiva import-schedule trd-2024.json
//! archiva backfill legacy-documents.json
//! archiva sweep
//! archiva list --state vencido --page 2
//! archiva show 7c1f0d8e-3b0a-4f7e-9a55-0b1d2f6c9e11
//! archiva verify 7c1f0d8e-3b0a-4f7e-9a55-0b1d2f6c9e11
//! ```
//!
//! Nested engine settings can be overridden from the environment with a
//! double underscore, e.g. `ARCHIVA_ENGINE__PRE_ALERT_DAYS=45`.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::{Context as _, bail};
use archiva_core::{
  RetentionEngine,
  clock::SystemClock,
  config::EngineConfig,
  process::{NewProcess, ProcessState},
  schedule::RetentionSchedule,
  view::ProcessFilter,
};
use archiva_store_sqlite::SqliteStore;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(author, version, about = "Records retention and disposition engine")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "archiva.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Re-evaluate every open process and raise due alerts.
  Sweep,

  /// Publish a TRD version from a JSON file.
  ImportSchedule { file: PathBuf },

  /// Register existing entities from a JSON array of process requests.
  Backfill { file: PathBuf },

  /// Print one process with its alerts, history and available actions.
  Show { process_id: Uuid },

  /// List processes, one page at a time.
  List {
    /// Only processes in this state (e.g. `vencido`).
    #[arg(long)]
    state:    Option<ProcessState>,
    #[arg(long)]
    trd:      Option<Uuid>,
    #[arg(long)]
    page:     Option<usize>,
    #[arg(long)]
    per_page: Option<usize>,
  },

  /// Recompute the integrity seal of a process. Exits non-zero on mismatch.
  Verify { process_id: Uuid },
}

// ─── Config file ─────────────────────────────────────────────────────────────

/// Shape of `archiva.toml`.
#[derive(Debug, Deserialize)]
struct CliConfig {
  #[serde(default = "default_store_path")]
  store_path: PathBuf,
  #[serde(default)]
  engine:     EngineConfig,
}

fn default_store_path() -> PathBuf { PathBuf::from("archiva.db") }

fn load_config(path: PathBuf) -> anyhow::Result<CliConfig> {
  let settings = config::Config::builder()
    .add_source(config::File::from(path).required(false))
    .add_source(
      config::Environment::with_prefix("ARCHIVA")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true),
    )
    .build()
    .context("failed to read config file")?;

  settings
    .try_deserialize()
    .context("failed to deserialise CliConfig")
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let cfg = load_config(cli.config)?;

  let store_path = expand_tilde(&cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let engine = RetentionEngine::new(store, Arc::new(SystemClock), cfg.engine);
  run(&engine, cli.command).await
}

async fn run(engine: &RetentionEngine<SqliteStore>, command: Command) -> anyhow::Result<()> {
  match command {
    Command::Sweep => {
      let report = engine.run_batch_evaluation().await.context("batch evaluation failed")?;
      print_json(&report)
    }

    Command::ImportSchedule { file } => {
      let schedule: RetentionSchedule = read_json(&file)?;
      let trd = engine
        .publish_schedule(schedule)
        .await
        .context("failed to publish schedule")?;
      print_json(&trd)
    }

    Command::Backfill { file } => {
      let inputs: Vec<NewProcess> = read_json(&file)?;
      let report = engine.backfill(inputs).await;
      print_json(&report)
    }

    Command::Show { process_id } => {
      let detail = engine
        .get_process(process_id)
        .await
        .with_context(|| format!("failed to load process {process_id}"))?;
      print_json(&detail)
    }

    Command::List { state, trd, page, per_page } => {
      let filter = ProcessFilter { state, trd_id: trd, page, per_page, ..Default::default() };
      let listing = engine.list_processes(filter).await.context("failed to list processes")?;
      print_json(&listing)
    }

    Command::Verify { process_id } => {
      let intact = engine
        .verify_integrity(process_id)
        .await
        .with_context(|| format!("failed to verify process {process_id}"))?;
      print_json(&Verification { process_id, intact })?;
      if !intact {
        bail!("integrity check failed for process {process_id}");
      }
      Ok(())
    }
  }
}

#[derive(Serialize)]
struct Verification {
  process_id: Uuid,
  intact:     bool,
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
  let raw = std::fs::read_to_string(path)
    .with_context(|| format!("reading {}", path.display()))?;
  serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
  let out = serde_json::to_string_pretty(value).context("serialising output")?;
  println!("{out}");
  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
