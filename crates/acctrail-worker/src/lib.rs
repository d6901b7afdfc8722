//! The acctrail worker: configuration and pipeline wiring shared by the
//! `worker` and `prune` binaries.
//!
//! [`Worker`] connects a [`StreamConnection`](acctrail_stream::StreamConnection)
//! to a [`ChangeDetector`](acctrail_ingest::ChangeDetector) over a bounded
//! channel and drives the flush timer, shutting everything down in order.
//! [`run_prune`] is the one-shot retention job.

pub mod error;
pub mod pipeline;
pub mod settings;

pub use error::{Error, Result};
pub use pipeline::{Worker, run_prune};
pub use settings::{PruneConfig, WorkerConfig};
