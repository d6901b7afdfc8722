//! [`RetentionPruner`]: keep only the newest rows of every record.
//!
//! Stateless between runs and independent of the change detector. For each
//! record the pruner reads the timestamps of its `max_rows` newest rows; when
//! that many exist, the oldest of them becomes the cutoff and everything
//! strictly older is removed in a single bulk delete. Rows sharing the cutoff
//! timestamp are all kept, so a record can end up with more than `max_rows`.

use std::{ops::AddAssign, sync::Arc};

use acctrail_core::store::HistoryStore;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneOptions {
  /// Rows kept per record.
  pub max_rows:   usize,
  /// Pubkeys listed per page.
  pub batch_size: usize,
}

impl Default for PruneOptions {
  fn default() -> Self { Self { max_rows: 100, batch_size: 100 } }
}

/// Totals for one pruning run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
  pub programs:         usize,
  pub accounts_scanned: usize,
  /// Records that lost at least one row.
  pub accounts_pruned:  usize,
  pub rows_deleted:     u64,
  /// Records whose lookup or delete failed; pruning continued past them.
  pub failures:         usize,
}

impl AddAssign for PruneReport {
  fn add_assign(&mut self, other: Self) {
    self.programs += other.programs;
    self.accounts_scanned += other.accounts_scanned;
    self.accounts_pruned += other.accounts_pruned;
    self.rows_deleted += other.rows_deleted;
    self.failures += other.failures;
  }
}

pub struct RetentionPruner<S> {
  store:   Arc<S>,
  options: PruneOptions,
}

impl<S: HistoryStore> RetentionPruner<S> {
  pub fn new(store: Arc<S>, options: PruneOptions) -> Self { Self { store, options } }

  pub fn options(&self) -> PruneOptions { self.options }

  /// Trim one record. Returns the number of rows deleted; zero when the
  /// record has fewer than `max_rows` rows.
  pub async fn prune_account(&self, program_id: &str, pubkey: &str) -> Result<u64> {
    let max_rows = self.options.max_rows;
    if max_rows == 0 {
      return Ok(0);
    }

    let recent = self
      .store
      .list_recent_timestamps(program_id, pubkey, max_rows)
      .await
      .map_err(Error::store)?;
    if recent.len() < max_rows {
      return Ok(0);
    }

    let Some(cutoff) = recent.iter().copied().min() else {
      return Ok(0);
    };
    self.delete_before(program_id, pubkey, cutoff).await
  }

  async fn delete_before(&self, program_id: &str, pubkey: &str, cutoff: DateTime<Utc>) -> Result<u64> {
    let deleted = self
      .store
      .bulk_delete_older_than(program_id, pubkey, cutoff)
      .await
      .map_err(Error::store)?;
    if deleted > 0 {
      debug!(program_id, pubkey, deleted, %cutoff, "pruned record");
    }
    Ok(deleted)
  }

  /// Trim every record under `program_id`, page by page. A failing record
  /// is logged and counted; a failing page listing aborts the program.
  pub async fn prune_program(&self, program_id: &str) -> Result<PruneReport> {
    let batch_size = self.options.batch_size.max(1);
    let mut report = PruneReport { programs: 1, ..Default::default() };
    let mut offset = 0;

    loop {
      let pubkeys = self
        .store
        .list_distinct_pubkeys(program_id, offset, batch_size)
        .await
        .map_err(Error::store)?;
      if pubkeys.is_empty() {
        break;
      }

      for pubkey in &pubkeys {
        report.accounts_scanned += 1;
        match self.prune_account(program_id, pubkey).await {
          Ok(0) => {}
          Ok(deleted) => {
            report.accounts_pruned += 1;
            report.rows_deleted += deleted;
          }
          Err(e) => {
            report.failures += 1;
            warn!(program_id, pubkey, error = %e, "failed to prune record");
          }
        }
      }

      if pubkeys.len() < batch_size {
        break;
      }
      offset += pubkeys.len();
    }

    info!(
      program_id,
      scanned = report.accounts_scanned,
      pruned = report.accounts_pruned,
      deleted = report.rows_deleted,
      failures = report.failures,
      "pruned program"
    );
    Ok(report)
  }

  /// Trim every listed program. Stops at the first program whose listing
  /// fails.
  pub async fn prune_programs(&self, program_ids: &[String]) -> Result<PruneReport> {
    let mut report = PruneReport::default();
    for program_id in program_ids {
      report += self.prune_program(program_id).await?;
    }
    Ok(report)
  }

  /// Trim every program present in the store.
  pub async fn prune_all(&self) -> Result<PruneReport> {
    let programs = self.store.list_programs().await.map_err(Error::store)?;
    debug!(count = programs.len(), "pruning all programs");
    self.prune_programs(&programs).await
  }
}
