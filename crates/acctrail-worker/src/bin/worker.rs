//! acctrail worker binary.
//!
//! Reads `acctrail.toml` (or the path given with `--config`) and `ACCTRAIL_*`
//! environment variables, opens the SQLite store, subscribes to the feed and
//! records account history until Ctrl-C.
//!
//! ```
//! ACCTRAIL_ENDPOINT=127.0.0.1:10000 ACCTRAIL_PROGRAMS=Prog1,Prog2 \
//!   cargo run -p acctrail-worker --bin worker -- --config acctrail.toml
//! ```

use std::{path::PathBuf, sync::Arc};

use acctrail_store_sqlite::SqliteStore;
use acctrail_stream::TcpTransport;
use acctrail_worker::{Worker, WorkerConfig, settings};
use anyhow::Context as _;
use clap::Parser;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Record account history from a live feed")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "acctrail.toml")]
  config: PathBuf,
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

  let cfg: WorkerConfig = settings::load(&cli.config).context("failed to load worker configuration")?;
  cfg.validate()?;

  let store = SqliteStore::open(&cfg.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", cfg.store_path))?;
  let transport = TcpTransport::new(cfg.endpoint.clone(), cfg.token.clone());

  let worker = Worker::new(cfg, Arc::new(store));
  let stats = worker
    .run(transport, async {
      if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C; stop the process another way");
        std::future::pending::<()>().await;
      }
    })
    .await
    .context("worker stopped")?;

  info!(changes = stats.changes_detected, "worker exited cleanly");
  Ok(())
}
