//! Runtime configuration for the worker and prune entrypoints.
//!
//! Both are read from an optional TOML file layered under `ACCTRAIL_*`
//! environment variables. Required fields default to empty so that
//! [`WorkerConfig::validate`] can report every missing one at once.

use std::{fmt, path::{Path, PathBuf}, time::Duration};

use acctrail_ingest::PruneOptions;
use acctrail_stream::{ConnectionOptions, ReconnectPolicy};
use serde::{
  Deserialize, Deserializer,
  de::{self, DeserializeOwned, SeqAccess, Visitor},
};

use crate::{Error, Result};

/// Prefix of the environment variables read by both entrypoints.
pub const ENV_PREFIX: &str = "ACCTRAIL";

/// Read `path` (when it exists) and the environment into `T`.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
  let settings = config::Config::builder()
    .add_source(config::File::from(path).required(false))
    .add_source(config::Environment::with_prefix(ENV_PREFIX))
    .build()?;
  Ok(settings.try_deserialize()?)
}

// ─── Worker ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
  /// `host:port` of the feed.
  #[serde(default)]
  pub endpoint:               String,
  #[serde(default)]
  pub token:                  Option<String>,
  #[serde(default)]
  pub store_path:             PathBuf,
  /// Owning programs to follow. A comma-separated string is accepted.
  #[serde(default, deserialize_with = "string_or_list")]
  pub programs:               Vec<String>,
  #[serde(default = "defaults::flush_interval_ms")]
  pub flush_interval_ms:      u64,
  #[serde(default = "defaults::keepalive_secs")]
  pub keepalive_secs:         u64,
  #[serde(default = "defaults::reconnect_base_ms")]
  pub reconnect_base_ms:      u64,
  #[serde(default = "defaults::reconnect_max_ms")]
  pub reconnect_max_ms:       u64,
  #[serde(default = "defaults::reconnect_max_attempts")]
  pub reconnect_max_attempts: u32,
  #[serde(default = "defaults::channel_capacity")]
  pub channel_capacity:       usize,
  #[serde(default = "defaults::stats_interval_secs")]
  pub stats_interval_secs:    u64,
}

impl WorkerConfig {
  /// Fail fast on anything that would stop the worker from starting.
  pub fn validate(&self) -> Result<()> {
    let mut missing = Vec::new();
    if self.endpoint.trim().is_empty() {
      missing.push("endpoint");
    }
    if self.store_path.as_os_str().is_empty() {
      missing.push("store_path");
    }
    if self.programs.is_empty() {
      missing.push("programs");
    }
    if !missing.is_empty() {
      return Err(Error::MissingConfig(missing));
    }

    let zero = [
      ("flush_interval_ms", self.flush_interval_ms == 0),
      ("keepalive_secs", self.keepalive_secs == 0),
      ("reconnect_base_ms", self.reconnect_base_ms == 0),
      ("channel_capacity", self.channel_capacity == 0),
      ("stats_interval_secs", self.stats_interval_secs == 0),
    ];
    if let Some((field, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
      return Err(Error::InvalidConfig(format!("{field} must be greater than zero")));
    }
    if self.reconnect_max_ms < self.reconnect_base_ms {
      return Err(Error::InvalidConfig(
        "reconnect_max_ms must not be below reconnect_base_ms".into(),
      ));
    }
    Ok(())
  }

  pub fn connection_options(&self) -> ConnectionOptions {
    ConnectionOptions {
      keepalive: Duration::from_secs(self.keepalive_secs),
      reconnect: ReconnectPolicy {
        base:         Duration::from_millis(self.reconnect_base_ms),
        max_delay:    Duration::from_millis(self.reconnect_max_ms),
        max_attempts: self.reconnect_max_attempts,
      },
    }
  }

  pub fn flush_interval(&self) -> Duration { Duration::from_millis(self.flush_interval_ms) }

  pub fn stats_interval(&self) -> Duration { Duration::from_secs(self.stats_interval_secs) }
}

// ─── Prune ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct PruneConfig {
  #[serde(default)]
  pub store_path: PathBuf,
  /// Programs to prune. Empty means every program in the store.
  #[serde(default, deserialize_with = "string_or_list")]
  pub programs:   Vec<String>,
  #[serde(default = "defaults::max_rows")]
  pub max_rows:   usize,
  #[serde(default = "defaults::batch_size")]
  pub batch_size: usize,
}

impl PruneConfig {
  pub fn validate(&self) -> Result<()> {
    if self.store_path.as_os_str().is_empty() {
      return Err(Error::MissingConfig(vec!["store_path"]));
    }
    if self.max_rows == 0 {
      return Err(Error::InvalidConfig("max_rows must be greater than zero".into()));
    }
    if self.batch_size == 0 {
      return Err(Error::InvalidConfig("batch_size must be greater than zero".into()));
    }
    Ok(())
  }

  pub fn prune_options(&self) -> PruneOptions {
    PruneOptions { max_rows: self.max_rows, batch_size: self.batch_size }
  }
}

mod defaults {
  pub fn flush_interval_ms() -> u64 { 100 }
  pub fn keepalive_secs() -> u64 { 30 }
  pub fn reconnect_base_ms() -> u64 { 1_000 }
  pub fn reconnect_max_ms() -> u64 { 60_000 }
  pub fn reconnect_max_attempts() -> u32 { 10 }
  pub fn channel_capacity() -> usize { 10_000 }
  pub fn stats_interval_secs() -> u64 { 60 }
  pub fn max_rows() -> usize { 100 }
  pub fn batch_size() -> usize { 100 }
}

// ─── Program lists ───────────────────────────────────────────────────────────

/// Accept `["a", "b"]` from a file or `"a,b"` from the environment.
fn string_or_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
  struct ProgramList;

  impl<'de> Visitor<'de> for ProgramList {
    type Value = Vec<String>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str("a list of program ids or a comma-separated string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
      Ok(
        v.split(',')
          .map(str::trim)
          .filter(|s| !s.is_empty())
          .map(str::to_owned)
          .collect(),
      )
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
      let mut programs = Vec::new();
      while let Some(program) = seq.next_element::<String>()? {
        let program = program.trim();
        if !program.is_empty() {
          programs.push(program.to_owned());
        }
      }
      Ok(programs)
    }
  }

  deserializer.deserialize_any(ProgramList)
}
