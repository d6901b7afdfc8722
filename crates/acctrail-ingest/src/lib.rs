//! Change detection and retention over the account history store.
//!
//! [`ChangeDetector`] turns a bursty stream of account mutations into the
//! minimal set of hash-verified history rows. [`RetentionPruner`] bounds how
//! many rows each record keeps. Both are generic over
//! [`HistoryStore`](acctrail_core::store::HistoryStore) and share no state.

pub mod detector;
pub mod error;
pub mod pruner;
pub mod stats;

pub use detector::{BufferedUpdate, ChangeDetector, FlushOutcome, FlushReport};
pub use error::{Error, Result};
pub use pruner::{PruneOptions, PruneReport, RetentionPruner};
pub use stats::DetectorStats;
