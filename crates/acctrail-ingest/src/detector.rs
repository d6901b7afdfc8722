//! [`ChangeDetector`]: buffer, coalesce, compare, persist.
//!
//! Inbound mutations land in an in-memory map keyed by pubkey; a later
//! mutation for the same record replaces the earlier one. A timer-driven
//! flush compares every buffered record against the newest stored hash and
//! writes a history row only when the content actually changed.
//!
//! Each buffered entry carries a sequence number. A flush works on a
//! snapshot and, after a successful insert, removes only the entries whose
//! sequence still matches the snapshot. Mutations that arrive while a flush
//! is in flight therefore survive into the next one, and a failed insert
//! leaves the whole buffer in place for retry.

use std::{
  collections::{BTreeMap, HashMap},
  sync::{Arc, Mutex, MutexGuard, PoisonError},
  time::Duration,
};

use acctrail_core::{
  digest::{content_hash, discriminator},
  history::{ChangeType, NewHistoryRow},
  store::HistoryStore,
  update::AccountUpdate,
};
use tokio::{sync::mpsc, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
  Error, Result,
  stats::{Counters, DetectorStats},
};

// ─── Buffered update ─────────────────────────────────────────────────────────

/// The latest observed state of one record, waiting for a flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedUpdate {
  pub pubkey:        String,
  pub program_id:    String,
  pub slot:          u64,
  pub data:          Vec<u8>,
  pub data_hash:     String,
  pub discriminator: Option<String>,
  pub is_deleted:    bool,
}

impl From<AccountUpdate> for BufferedUpdate {
  fn from(update: AccountUpdate) -> Self {
    Self {
      data_hash:     content_hash(&update.data),
      discriminator: discriminator(&update.data),
      is_deleted:    update.is_deleted(),
      pubkey:        update.pubkey,
      program_id:    update.owner,
      slot:          update.slot,
      data:          update.data,
    }
  }
}

impl BufferedUpdate {
  fn to_row(&self, change_type: ChangeType) -> NewHistoryRow {
    NewHistoryRow {
      program_id: self.program_id.clone(),
      pubkey: self.pubkey.clone(),
      slot: self.slot,
      discriminator: self.discriminator.clone(),
      change_type,
      data: self.data.clone(),
      data_hash: self.data_hash.clone(),
    }
  }
}

#[derive(Debug)]
struct Entry {
  seq:    u64,
  update: Arc<BufferedUpdate>,
}

#[derive(Debug, Default)]
struct Buffer {
  entries:  HashMap<String, Entry>,
  next_seq: u64,
}

// ─── Flush results ───────────────────────────────────────────────────────────

/// What one flush did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
  /// Buffered records considered.
  pub examined:  usize,
  /// History rows written.
  pub written:   usize,
  /// Records whose content matched the stored hash.
  pub unchanged: usize,
  /// Records with no baseline yet; never written.
  pub unseeded:  usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
  /// Nothing was buffered.
  Idle,
  /// Another flush was in flight; this one was skipped.
  Busy,
  Flushed(FlushReport),
}

// ─── Detector ────────────────────────────────────────────────────────────────

pub struct ChangeDetector<S> {
  store:       Arc<S>,
  buffer:      Mutex<Buffer>,
  /// Held for the duration of a flush. `flush` skips when it is taken,
  /// `drain` waits for it.
  flush_guard: tokio::sync::Mutex<()>,
  counters:    Counters,
}

impl<S: HistoryStore> ChangeDetector<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self {
      store,
      buffer: Mutex::new(Buffer::default()),
      flush_guard: tokio::sync::Mutex::new(()),
      counters: Counters::default(),
    }
  }

  fn buffer(&self) -> MutexGuard<'_, Buffer> {
    self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Buffer one mutation, replacing any earlier one for the same pubkey.
  /// Never waits on I/O; safe to call while a flush is in flight.
  pub fn add_update(&self, update: AccountUpdate) {
    let buffered = BufferedUpdate::from(update);
    self.counters.record_update(buffered.slot);

    let mut buffer = self.buffer();
    let seq = buffer.next_seq;
    buffer.next_seq += 1;
    buffer
      .entries
      .insert(buffered.pubkey.clone(), Entry { seq, update: Arc::new(buffered) });
  }

  /// The buffered entry for `pubkey`, if any.
  pub fn buffered(&self, pubkey: &str) -> Option<BufferedUpdate> {
    self.buffer().entries.get(pubkey).map(|e| BufferedUpdate::clone(&e.update))
  }

  pub fn buffered_len(&self) -> usize { self.buffer().entries.len() }

  pub fn stats(&self) -> DetectorStats { self.counters.snapshot(self.buffered_len()) }

  /// Flush unless another flush is already running.
  pub async fn flush(&self) -> Result<FlushOutcome> {
    let Ok(_guard) = self.flush_guard.try_lock() else {
      return Ok(FlushOutcome::Busy);
    };
    self.flush_locked().await
  }

  /// Wait for any in-flight flush, then flush. Used on shutdown so nothing
  /// buffered is lost.
  pub async fn drain(&self) -> Result<FlushOutcome> {
    let _guard = self.flush_guard.lock().await;
    self.flush_locked().await
  }

  async fn flush_locked(&self) -> Result<FlushOutcome> {
    let snapshot: Vec<(u64, Arc<BufferedUpdate>)> = {
      let buffer = self.buffer();
      if buffer.entries.is_empty() {
        return Ok(FlushOutcome::Idle);
      }
      buffer
        .entries
        .values()
        .map(|e| (e.seq, Arc::clone(&e.update)))
        .collect()
    };

    let result = self.persist(&snapshot).await;
    match result {
      Ok(report) => {
        let mut buffer = self.buffer();
        for (seq, update) in &snapshot {
          if buffer.entries.get(&update.pubkey).is_some_and(|e| e.seq == *seq) {
            buffer.entries.remove(&update.pubkey);
          }
        }
        drop(buffer);
        self.counters.record_changes(report.written);
        Ok(FlushOutcome::Flushed(report))
      }
      Err(e) => {
        self.counters.record_failed_flush();
        Err(e)
      }
    }
  }

  /// Compare the snapshot against the store and insert the genuine changes.
  async fn persist(&self, snapshot: &[(u64, Arc<BufferedUpdate>)]) -> Result<FlushReport> {
    let mut by_program: BTreeMap<&str, Vec<&BufferedUpdate>> = BTreeMap::new();
    for (_, update) in snapshot {
      by_program.entry(update.program_id.as_str()).or_default().push(update);
    }

    let mut report = FlushReport { examined: snapshot.len(), ..Default::default() };
    let mut rows = Vec::new();

    for (program_id, updates) in by_program {
      let pubkeys: Vec<String> = updates.iter().map(|u| u.pubkey.clone()).collect();
      let latest = self
        .store
        .lookup_latest_hashes(program_id, &pubkeys)
        .await
        .map_err(Error::store)?;

      for update in updates {
        match latest.get(&update.pubkey) {
          None => report.unseeded += 1,
          Some(hash) if *hash == update.data_hash => report.unchanged += 1,
          Some(_) => {
            let change_type =
              if update.is_deleted { ChangeType::Delete } else { ChangeType::Update };
            rows.push(update.to_row(change_type));
          }
        }
      }
    }

    if !rows.is_empty() {
      report.written = self.store.insert_rows(rows).await.map_err(Error::store)?;
    }

    debug!(
      examined = report.examined,
      written = report.written,
      unchanged = report.unchanged,
      unseeded = report.unseeded,
      "flush complete"
    );
    Ok(report)
  }

  // ── Driving loops ─────────────────────────────────────────────────────

  /// Feed every update from `updates` into the buffer until the channel
  /// closes or `cancel` fires. On cancel, updates already queued are still
  /// buffered so a following [`drain`](Self::drain) persists them.
  pub async fn run_ingest(
    &self,
    mut updates: mpsc::Receiver<AccountUpdate>,
    cancel: &CancellationToken,
  ) {
    loop {
      tokio::select! {
        update = updates.recv() => match update {
          Some(update) => self.add_update(update),
          None => break,
        },
        _ = cancel.cancelled() => break,
      }
    }

    updates.close();
    let mut late = 0usize;
    while let Ok(update) = updates.try_recv() {
      self.add_update(update);
      late += 1;
    }
    debug!(late, "ingest loop stopped");
  }

  /// Flush every `interval` until `cancel` fires. Failures are logged and the
  /// buffer is retried on the next tick.
  pub async fn run_flush_timer(&self, interval: Duration, cancel: &CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
      tokio::select! {
        _ = cancel.cancelled() => break,
        _ = ticker.tick() => match self.flush().await {
          Ok(FlushOutcome::Flushed(report)) if report.written > 0 => {
            info!(written = report.written, examined = report.examined, "persisted changes");
          }
          Ok(_) => {}
          Err(e) => {
            warn!(error = %e, buffered = self.buffered_len(), "flush failed, retrying next tick");
          }
        },
      }
    }
    debug!("flush timer stopped");
  }
}
