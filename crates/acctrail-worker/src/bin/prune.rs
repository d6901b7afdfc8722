//! acctrail prune binary: trim every record to its newest rows.
//!
//! ```
//! cargo run -p acctrail-worker --bin prune -- --max-rows 50
//! ```

use std::{path::PathBuf, sync::Arc, time::Instant};

use acctrail_store_sqlite::SqliteStore;
use acctrail_worker::{PruneConfig, run_prune, settings};
use anyhow::Context as _;
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Bound account history to the newest rows per record")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "acctrail.toml")]
  config: PathBuf,

  /// Rows to keep per record. Overrides `max_rows` from the configuration.
  #[arg(long, value_name = "N")]
  max_rows: Option<usize>,

  /// Only prune this program. May be repeated.
  #[arg(long = "program", value_name = "ID")]
  programs: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let mut cfg: PruneConfig = settings::load(&cli.config).context("failed to load prune configuration")?;
  if let Some(max_rows) = cli.max_rows {
    cfg.max_rows = max_rows;
  }
  if !cli.programs.is_empty() {
    cfg.programs = cli.programs;
  }
  cfg.validate()?;

  let store = SqliteStore::open(&cfg.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", cfg.store_path))?;

  let started = Instant::now();
  let report = run_prune(&cfg, Arc::new(store)).await.context("pruning failed")?;
  let elapsed = started.elapsed();

  println!(
    "deleted {} rows from {} of {} accounts across {} programs in {elapsed:.2?} (keeping {} rows each)",
    report.rows_deleted, report.accounts_pruned, report.accounts_scanned, report.programs, cfg.max_rows,
  );
  if report.failures > 0 {
    anyhow::bail!("{} accounts could not be pruned", report.failures);
  }
  Ok(())
}
