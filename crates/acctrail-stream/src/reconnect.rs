//! Reconnect schedule: capped exponential backoff with a hard attempt limit.

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder, backoff::Backoff};

/// Delay before reconnect attempt `n` (0-based) is `min(base * 2^n, max_delay)`.
/// After `max_attempts` consecutive failures the connection gives up for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
  pub base:         Duration,
  pub max_delay:    Duration,
  pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
  fn default() -> Self {
    Self {
      base:         Duration::from_millis(1000),
      max_delay:    Duration::from_millis(60_000),
      max_attempts: 10,
    }
  }
}

impl ReconnectPolicy {
  /// A fresh delay schedule. Unjittered, and never exhausts on its own: the
  /// attempt budget is enforced by the caller through [`allows`](Self::allows).
  pub fn schedule(&self) -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
      .with_initial_interval(self.base.min(self.max_delay))
      .with_randomization_factor(0.0)
      .with_multiplier(2.0)
      .with_max_interval(self.max_delay)
      .with_max_elapsed_time(None)
      .build()
  }

  /// The delay a fresh [`schedule`](Self::schedule) yields for attempt
  /// `attempt` (0-based).
  pub fn delay(&self, attempt: u32) -> Duration {
    // The interval sits at the cap long before 128 doublings.
    let mut schedule = self.schedule();
    for _ in 0..attempt.min(128) {
      schedule.next_backoff();
    }
    schedule.next_backoff().unwrap_or(self.max_delay)
  }

  /// Whether a further attempt is allowed after `attempt` failures.
  pub fn allows(&self, attempt: u32) -> bool { attempt < self.max_attempts }
}
