//! Messages exchanged with the feed.
//!
//! Each message is one JSON object tagged by `"type"`. Raw byte fields
//! (identifiers, payloads) travel as standard base64.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ─── Client → feed ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
  /// First message on a session when the feed requires a token.
  Auth { token: String },
  /// The complete filter set. Each request replaces the previous one
  /// atomically; there are no incremental updates.
  Subscribe { accounts: BTreeMap<String, AccountFilter> },
  Ping { id: u32 },
}

/// Match accounts owned by any of `owner`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountFilter {
  pub owner: Vec<String>,
}

// ─── Feed → client ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
  Account {
    slot:    u64,
    account: RawAccount,
    /// Subscription keys this update matched.
    #[serde(default)]
    filters: Vec<String>,
  },
  Pong { id: u32 },
  Error { message: String },
}

/// Account state exactly as the feed sends it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAccount {
  #[serde(with = "b64")]
  pub pubkey:     Vec<u8>,
  #[serde(with = "b64")]
  pub owner:      Vec<u8>,
  pub lamports:   u64,
  #[serde(with = "b64")]
  pub data:       Vec<u8>,
  #[serde(default)]
  pub executable: bool,
  #[serde(default)]
  pub rent_epoch: u64,
}

mod b64 {
  use base64::{Engine as _, engine::general_purpose::STANDARD};
  use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

  pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let text = String::deserialize(deserializer)?;
    STANDARD.decode(text).map_err(D::Error::custom)
  }
}
