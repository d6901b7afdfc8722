//! Error type for `acctrail-worker`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error(
    "missing required configuration: {} (set in the config file or as ACCTRAIL_* environment variables)",
    .0.join(", ")
  )]
  MissingConfig(Vec<&'static str>),
  #[error("invalid configuration: {0}")]
  InvalidConfig(String),
  #[error("failed to load configuration: {0}")]
  Config(#[from] config::ConfigError),
  #[error("feed error: {0}")]
  Stream(#[from] acctrail_stream::Error),
  #[error("ingest error: {0}")]
  Ingest(#[from] acctrail_ingest::Error),
  #[error("pipeline task failed: {0}")]
  Task(#[from] tokio::task::JoinError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
