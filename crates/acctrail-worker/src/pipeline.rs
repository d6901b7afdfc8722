//! Wiring of feed → detector → store, and the ordered shutdown.

use std::{future::Future, sync::Arc, time::Duration};

use acctrail_core::store::HistoryStore;
use acctrail_ingest::{ChangeDetector, DetectorStats, PruneReport, RetentionPruner};
use acctrail_stream::{FeedTransport, StreamConnection};
use tokio::{sync::mpsc, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{PruneConfig, Result, WorkerConfig};

/// The ingest pipeline for one feed and one store.
pub struct Worker<S> {
  config:   WorkerConfig,
  detector: Arc<ChangeDetector<S>>,
}

impl<S: HistoryStore + 'static> Worker<S> {
  pub fn new(config: WorkerConfig, store: Arc<S>) -> Self {
    Self { config, detector: Arc::new(ChangeDetector::new(store)) }
  }

  pub fn detector(&self) -> &Arc<ChangeDetector<S>> { &self.detector }

  /// Run until `shutdown` resolves or the feed connection gives up.
  ///
  /// On the way out the timers and the inbound loop stop first, queued
  /// updates are moved into the buffer, the buffer is drained to the store,
  /// and only then is the feed session closed. Both steps run even when one
  /// of the pipeline tasks failed; the first failure is returned afterwards.
  pub async fn run<T>(&self, transport: T, shutdown: impl Future<Output = ()>) -> Result<DetectorStats>
  where
    T: FeedTransport + 'static,
  {
    let (updates_tx, updates_rx) = mpsc::channel(self.config.channel_capacity);
    let mut conn = StreamConnection::new(transport, self.config.connection_options(), updates_tx);
    for program_id in &self.config.programs {
      conn.subscribe_to_program(program_id);
    }

    // `connect` sends the remembered subscription set. A failure here goes
    // through the same recovery path as a dropped session.
    if let Err(e) = conn.connect().await {
      warn!(endpoint = %self.config.endpoint, error = %e, "initial connect failed, recovering");
    }

    let cancel = CancellationToken::new();
    let mut stream_task = {
      let cancel = cancel.clone();
      tokio::spawn(async move {
        let result = conn.run(&cancel).await;
        (conn, result)
      })
    };
    let ingest_task = {
      let (detector, cancel) = (self.detector.clone(), cancel.clone());
      tokio::spawn(async move { detector.run_ingest(updates_rx, &cancel).await })
    };
    let flush_task = {
      let (detector, cancel) = (self.detector.clone(), cancel.clone());
      let interval = self.config.flush_interval();
      tokio::spawn(async move { detector.run_flush_timer(interval, &cancel).await })
    };
    let stats_task = spawn_stats_logger(self.detector.clone(), self.config.stats_interval(), &cancel);

    info!(programs = self.config.programs.len(), "worker running");

    let finished = tokio::select! {
      _ = shutdown => {
        info!("shutdown requested");
        None
      }
      joined = &mut stream_task => Some(joined),
    };

    cancel.cancel();
    let stream_joined = match finished {
      Some(joined) => joined,
      None => stream_task.await,
    };
    let tasks = [ingest_task.await, flush_task.await, stats_task.await];

    // Drain and disconnect run whether or not a task failed.
    let drained = self.detector.drain().await;
    let stream_result = match stream_joined {
      Ok((mut conn, result)) => {
        conn.disconnect().await;
        Ok(result)
      }
      Err(e) => {
        warn!(error = %e, "stream task failed, session dropped with it");
        Err(e)
      }
    };
    for joined in &tasks {
      if let Err(e) = joined {
        warn!(error = %e, "pipeline task failed");
      }
    }

    let stats = self.detector.stats();
    log_stats(&stats, "final detector stats");
    let stream_result = stream_result?;
    for joined in tasks {
      joined?;
    }
    drained?;
    stream_result?;
    Ok(stats)
  }
}

fn spawn_stats_logger<S: HistoryStore + 'static>(
  detector: Arc<ChangeDetector<S>>,
  every: Duration,
  cancel: &CancellationToken,
) -> JoinHandle<()> {
  let cancel = cancel.clone();
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
      tokio::select! {
        _ = cancel.cancelled() => break,
        _ = ticker.tick() => log_stats(&detector.stats(), "detector stats"),
      }
    }
  })
}

fn log_stats(stats: &DetectorStats, message: &'static str) {
  info!(
    updates_received = stats.updates_received,
    changes_detected = stats.changes_detected,
    last_slot = stats.last_slot,
    buffered = stats.buffered,
    failed_flushes = stats.failed_flushes,
    "{message}"
  );
}

/// Trim the configured programs, or every program when none are configured.
pub async fn run_prune<S: HistoryStore>(config: &PruneConfig, store: Arc<S>) -> Result<PruneReport> {
  let pruner = RetentionPruner::new(store, config.prune_options());
  let report = if config.programs.is_empty() {
    pruner.prune_all().await?
  } else {
    pruner.prune_programs(&config.programs).await?
  };
  Ok(report)
}
