//! Error type for `acctrail-stream`.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("i/o error: {0}")]
  Io(#[from] std::io::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("framing error: {0}")]
  Codec(#[from] tokio_util::codec::LinesCodecError),

  #[error("timed out connecting after {0:?}")]
  ConnectTimeout(Duration),

  #[error("not connected")]
  NotConnected,

  #[error("feed stream ended")]
  StreamEnded,

  #[error("feed reported an error: {0}")]
  Server(String),

  #[error("malformed account update: {0}")]
  Decode(#[from] acctrail_core::Error),

  /// Terminal: the reconnect budget is exhausted. Requires a restart.
  #[error("gave up after {attempts} reconnect attempts")]
  GaveUp { attempts: u32 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
