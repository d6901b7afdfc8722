//! The `HistoryStore` trait — the persistence boundary of the pipeline.
//!
//! The trait is implemented by storage backends (e.g. `acctrail-store-sqlite`).
//! The change detector and the retention pruner receive a store at
//! construction and depend only on this abstraction, so tests can substitute
//! an in-memory fake.

use std::{collections::HashMap, future::Future};

use chrono::{DateTime, Utc};

use crate::history::NewHistoryRow;

/// Abstraction over the relational store holding account history.
///
/// All methods return `Send` futures so the store can be shared between the
/// ingest tasks of a multi-threaded tokio runtime.
pub trait HistoryStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Change detection ──────────────────────────────────────────────────

  /// Return the `data_hash` of the newest row for each of `pubkeys` under
  /// `program_id`. Pubkeys without any row are absent from the map.
  fn lookup_latest_hashes<'a>(
    &'a self,
    program_id: &'a str,
    pubkeys: &'a [String],
  ) -> impl Future<Output = Result<HashMap<String, String>, Self::Error>> + Send + 'a;

  /// Insert `rows`, assigning each a fresh `created_at`. All-or-nothing:
  /// on error no row of the batch is visible. Returns the number inserted.
  fn insert_rows(
    &self,
    rows: Vec<NewHistoryRow>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  // ── Retention ─────────────────────────────────────────────────────────

  /// Distinct program ids that have at least one row.
  fn list_programs(&self) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + '_;

  /// One page of the distinct pubkeys stored under `program_id`, in a stable
  /// order.
  fn list_distinct_pubkeys<'a>(
    &'a self,
    program_id: &'a str,
    offset: usize,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + 'a;

  /// The `created_at` of the `limit` newest rows of a record, newest first.
  fn list_recent_timestamps<'a>(
    &'a self,
    program_id: &'a str,
    pubkey: &'a str,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<DateTime<Utc>>, Self::Error>> + Send + 'a;

  /// Delete every row of a record with `created_at` strictly before
  /// `cutoff`, in one statement. Returns the number of rows deleted.
  fn bulk_delete_older_than<'a>(
    &'a self,
    program_id: &'a str,
    pubkey: &'a str,
    cutoff: DateTime<Utc>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;
}
