//! Error types for `acctrail-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid base-58 character {0:?}")]
  InvalidBase58Char(char),

  #[error("invalid base-58 text: {0}")]
  InvalidBase58(String),

  #[error("invalid address length: expected {expected} bytes, got {actual}")]
  InvalidAddressLength { expected: usize, actual: usize },

  /// Slots are persisted as signed 64-bit integers.
  #[error("slot {0} is out of range")]
  SlotOutOfRange(u64),

  #[error("unknown change type: {0:?}")]
  UnknownChangeType(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
