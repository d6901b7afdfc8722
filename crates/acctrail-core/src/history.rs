//! History rows — the persisted, append-only snapshots of a record.
//!
//! A row is never mutated after insertion. Rows leave the store only through
//! retention pruning.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

// ─── Change type ─────────────────────────────────────────────────────────────

/// What a history row represents relative to the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
  /// The baseline. Written once per record by the baseline seeder.
  Create,
  Update,
  Delete,
}

impl ChangeType {
  pub fn as_str(self) -> &'static str {
    match self {
      ChangeType::Create => "create",
      ChangeType::Update => "update",
      ChangeType::Delete => "delete",
    }
  }
}

impl fmt::Display for ChangeType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for ChangeType {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "create" => Ok(ChangeType::Create),
      "update" => Ok(ChangeType::Update),
      "delete" => Ok(ChangeType::Delete),
      other => Err(Error::UnknownChangeType(other.to_owned())),
    }
  }
}

// ─── Rows ────────────────────────────────────────────────────────────────────

/// A history row as handed to the store. `created_at` is assigned by the
/// store on insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewHistoryRow {
  pub program_id:    String,
  pub pubkey:        String,
  pub slot:          u64,
  pub discriminator: Option<String>,
  pub change_type:   ChangeType,
  pub data:          Vec<u8>,
  pub data_hash:     String,
}

/// A persisted history row. `(program_id, pubkey, created_at)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRow {
  pub program_id:    String,
  pub pubkey:        String,
  pub created_at:    DateTime<Utc>,
  pub slot:          u64,
  pub discriminator: Option<String>,
  pub change_type:   ChangeType,
  pub data:          Vec<u8>,
  pub data_hash:     String,
}
