//! [`SqliteStore`] — the SQLite implementation of [`HistoryStore`].

use std::{
  collections::HashMap,
  path::Path,
  sync::{Arc, Mutex, PoisonError},
};

use acctrail_core::{
  digest::{content_hash, discriminator},
  history::{ChangeType, HistoryRow, NewHistoryRow},
  store::HistoryStore,
};
use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::{
  encode::{decode_dt, encode_dt, RawHistoryRow},
  schema::SCHEMA,
  Result,
};

/// Pubkeys per `IN (...)` lookup; keeps well under SQLite's bound-parameter
/// limit.
const LOOKUP_CHUNK: usize = 500;

// ─── Store ───────────────────────────────────────────────────────────────────

/// An account history store backed by a single SQLite file.
///
/// Clones share the connection and the timestamp clock.
#[derive(Clone)]
pub struct SqliteStore {
  conn:       tokio_rusqlite::Connection,
  /// Last `created_at` handed out; stamps are strictly increasing.
  last_stamp: Arc<Mutex<DateTime<Utc>>>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn).await
  }

  /// Open a private in-memory store.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn).await
  }

  async fn init(conn: tokio_rusqlite::Connection) -> Result<Self> {
    conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(Self { conn, last_stamp: Arc::new(Mutex::new(DateTime::<Utc>::MIN_UTC)) })
  }

  /// Next server-assigned timestamp, truncated to the stored precision and
  /// strictly after every previously issued one.
  fn next_stamp(&self) -> DateTime<Utc> {
    let now = Utc::now();
    let now = DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now);
    let mut last = self.last_stamp.lock().unwrap_or_else(PoisonError::into_inner);
    let stamp = if now > *last { now } else { *last + TimeDelta::microseconds(1) };
    *last = stamp;
    stamp
  }

  /// Stamp and insert `rows` in one transaction. A slot outside the signed
  /// column range rejects the whole batch before anything is written.
  async fn insert_stamped(&self, rows: Vec<NewHistoryRow>) -> Result<Vec<HistoryRow>> {
    if let Some(row) = rows.iter().find(|row| i64::try_from(row.slot).is_err()) {
      return Err(acctrail_core::Error::SlotOutOfRange(row.slot).into());
    }

    let stamped: Vec<HistoryRow> = rows
      .into_iter()
      .map(|row| HistoryRow {
        program_id:    row.program_id,
        pubkey:        row.pubkey,
        created_at:    self.next_stamp(),
        slot:          row.slot,
        discriminator: row.discriminator,
        change_type:   row.change_type,
        data:          row.data,
        data_hash:     row.data_hash,
      })
      .collect();

    let inserted = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare(
            "INSERT INTO account_history (
               program_id, pubkey, created_at, slot,
               discriminator, change_type, data, data_hash
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          )?;
          for row in &stamped {
            stmt.execute(rusqlite::params![
              row.program_id,
              row.pubkey,
              encode_dt(row.created_at),
              row.slot,
              row.discriminator,
              row.change_type.as_str(),
              row.data,
              row.data_hash,
            ])?;
          }
        }
        tx.commit()?;
        Ok(stamped)
      })
      .await?;

    Ok(inserted)
  }

  /// Write the baseline (`create`) row for a record.
  ///
  /// Baselines normally come from the external seeding job; this is the same
  /// write for local tooling and tests.
  pub async fn seed_baseline(
    &self,
    program_id: &str,
    pubkey: &str,
    slot: u64,
    data: Vec<u8>,
  ) -> Result<HistoryRow> {
    let row = NewHistoryRow {
      program_id: program_id.to_owned(),
      pubkey: pubkey.to_owned(),
      slot,
      discriminator: discriminator(&data),
      change_type: ChangeType::Create,
      data_hash: content_hash(&data),
      data,
    };
    let mut rows = self.insert_stamped(vec![row]).await?;
    Ok(rows.remove(0))
  }

  /// Full history of one record, newest first.
  pub async fn history(&self, program_id: &str, pubkey: &str) -> Result<Vec<HistoryRow>> {
    let program_id = program_id.to_owned();
    let pubkey = pubkey.to_owned();

    let raws: Vec<RawHistoryRow> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM account_history
           WHERE program_id = ?1 AND pubkey = ?2
           ORDER BY created_at DESC",
          RawHistoryRow::COLUMNS
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![program_id, pubkey], RawHistoryRow::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawHistoryRow::into_row).collect()
  }
}

// ─── HistoryStore impl ───────────────────────────────────────────────────────

impl HistoryStore for SqliteStore {
  type Error = crate::Error;

  async fn lookup_latest_hashes(
    &self,
    program_id: &str,
    pubkeys: &[String],
  ) -> Result<HashMap<String, String>> {
    let mut latest = HashMap::with_capacity(pubkeys.len());

    for chunk in pubkeys.chunks(LOOKUP_CHUNK) {
      let program_id = program_id.to_owned();
      let chunk = chunk.to_vec();

      let pairs: Vec<(String, String)> = self
        .conn
        .call(move |conn| {
          let placeholders = (0..chunk.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
          let sql = format!(
            "SELECT h.pubkey, h.data_hash
             FROM account_history h
             JOIN (SELECT pubkey, MAX(created_at) AS latest
                   FROM account_history
                   WHERE program_id = ?1 AND pubkey IN ({placeholders})
                   GROUP BY pubkey) m
               ON h.pubkey = m.pubkey AND h.created_at = m.latest
             WHERE h.program_id = ?1"
          );
          let mut stmt = conn.prepare(&sql)?;
          let params = std::iter::once(&program_id).chain(chunk.iter());
          let rows = stmt
            .query_map(rusqlite::params_from_iter(params), |row| {
              Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          Ok(rows)
        })
        .await?;

      latest.extend(pairs);
    }

    debug!(program_id, requested = pubkeys.len(), found = latest.len(), "looked up latest hashes");
    Ok(latest)
  }

  async fn insert_rows(&self, rows: Vec<NewHistoryRow>) -> Result<usize> {
    if rows.is_empty() {
      return Ok(0);
    }
    Ok(self.insert_stamped(rows).await?.len())
  }

  async fn list_programs(&self) -> Result<Vec<String>> {
    let programs = self
      .conn
      .call(|conn| {
        let mut stmt =
          conn.prepare("SELECT DISTINCT program_id FROM account_history ORDER BY program_id")?;
        let rows = stmt
          .query_map([], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(programs)
  }

  async fn list_distinct_pubkeys(
    &self,
    program_id: &str,
    offset: usize,
    limit: usize,
  ) -> Result<Vec<String>> {
    let program_id = program_id.to_owned();
    let limit_val = limit as i64;
    let offset_val = offset as i64;

    let pubkeys = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT DISTINCT pubkey FROM account_history
           WHERE program_id = ?1
           ORDER BY pubkey
           LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![program_id, limit_val, offset_val], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(pubkeys)
  }

  async fn list_recent_timestamps(
    &self,
    program_id: &str,
    pubkey: &str,
    limit: usize,
  ) -> Result<Vec<DateTime<Utc>>> {
    let program_id = program_id.to_owned();
    let pubkey = pubkey.to_owned();
    let limit_val = limit as i64;

    let raws: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT created_at FROM account_history
           WHERE program_id = ?1 AND pubkey = ?2
           ORDER BY created_at DESC
           LIMIT ?3",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![program_id, pubkey, limit_val], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
      })
      .await?;

    raws.iter().map(String::as_str).map(decode_dt).collect()
  }

  async fn bulk_delete_older_than(
    &self,
    program_id: &str,
    pubkey: &str,
    cutoff: DateTime<Utc>,
  ) -> Result<u64> {
    let program_id = program_id.to_owned();
    let pubkey = pubkey.to_owned();
    let cutoff_str = encode_dt(cutoff);

    let deleted = self
      .conn
      .call(move |conn| {
        let n = conn.execute(
          "DELETE FROM account_history
           WHERE program_id = ?1 AND pubkey = ?2 AND created_at < ?3",
          rusqlite::params![program_id, pubkey, cutoff_str],
        )?;
        Ok(n)
      })
      .await?;
    Ok(deleted as u64)
  }
}
