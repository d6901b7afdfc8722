//! Running counters for the change detector.

use std::sync::atomic::{AtomicU64, Ordering};

/// A point-in-time copy of the detector's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectorStats {
  pub updates_received: u64,
  pub changes_detected: u64,
  /// Highest slot seen on any update. Observability only.
  pub last_slot:        u64,
  /// Records currently waiting for a flush.
  pub buffered:         usize,
  pub failed_flushes:   u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
  updates_received: AtomicU64,
  changes_detected: AtomicU64,
  last_slot:        AtomicU64,
  failed_flushes:   AtomicU64,
}

impl Counters {
  pub fn record_update(&self, slot: u64) {
    self.updates_received.fetch_add(1, Ordering::Relaxed);
    self.last_slot.fetch_max(slot, Ordering::Relaxed);
  }

  pub fn record_changes(&self, n: usize) {
    self.changes_detected.fetch_add(n as u64, Ordering::Relaxed);
  }

  pub fn record_failed_flush(&self) { self.failed_flushes.fetch_add(1, Ordering::Relaxed); }

  pub fn snapshot(&self, buffered: usize) -> DetectorStats {
    DetectorStats {
      updates_received: self.updates_received.load(Ordering::Relaxed),
      changes_detected: self.changes_detected.load(Ordering::Relaxed),
      last_slot: self.last_slot.load(Ordering::Relaxed),
      buffered,
      failed_flushes: self.failed_flushes.load(Ordering::Relaxed),
    }
  }
}
