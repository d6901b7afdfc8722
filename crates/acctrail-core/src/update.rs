//! The decoded shape of a single record mutation observed on the feed.

use serde::{Deserialize, Serialize};

/// One account mutation, with identifiers already rendered as base-58 text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountUpdate {
  pub pubkey:     String,
  /// The owning program; the namespace the record is stored under.
  pub owner:      String,
  /// Balance weight. Zero means the account was closed.
  pub lamports:   u64,
  pub slot:       u64,
  pub data:       Vec<u8>,
  pub executable: bool,
  pub rent_epoch: u64,
}

impl AccountUpdate {
  /// A closed account: zero balance or no payload left.
  pub fn is_deleted(&self) -> bool { self.lamports == 0 || self.data.is_empty() }
}
