//! Encoding and decoding helpers between domain types and SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings with microsecond
//! precision, so lexicographic order in SQL equals chronological order.

use acctrail_core::history::{ChangeType, HistoryRow};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Micros, true) }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw column values read directly from an `account_history` row.
pub struct RawHistoryRow {
  pub program_id:    String,
  pub pubkey:        String,
  pub created_at:    String,
  pub slot:          u64,
  pub discriminator: Option<String>,
  pub change_type:   String,
  pub data:          Vec<u8>,
  pub data_hash:     String,
}

impl RawHistoryRow {
  pub const COLUMNS: &'static str =
    "program_id, pubkey, created_at, slot, discriminator, change_type, data, data_hash";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      program_id:    row.get(0)?,
      pubkey:        row.get(1)?,
      created_at:    row.get(2)?,
      slot:          row.get(3)?,
      discriminator: row.get(4)?,
      change_type:   row.get(5)?,
      data:          row.get(6)?,
      data_hash:     row.get(7)?,
    })
  }

  pub fn into_row(self) -> Result<HistoryRow> {
    Ok(HistoryRow {
      program_id:    self.program_id,
      pubkey:        self.pubkey,
      created_at:    decode_dt(&self.created_at)?,
      slot:          self.slot,
      discriminator: self.discriminator,
      change_type:   self.change_type.parse::<ChangeType>()?,
      data:          self.data,
      data_hash:     self.data_hash,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn timestamps_are_fixed_width() {
    let a = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let b = Utc.timestamp_opt(1_700_000_000, 5_000).unwrap();
    assert_eq!(encode_dt(a), "2023-11-14T22:13:20.000000Z");
    assert_eq!(encode_dt(a).len(), encode_dt(b).len());
    assert!(encode_dt(a) < encode_dt(b));
    assert_eq!(decode_dt(&encode_dt(b)).unwrap(), b);
  }
}
