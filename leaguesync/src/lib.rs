//! # Leaguesync
//!
//! An incremental ingestion and promotion pipeline for league datasets.
//!
//! Leaguesync refreshes a production dataset set from an external source
//! without ever exposing a partially-updated state:
//!
//! - **Natural-key upsert**: incoming batches merge into a working copy with
//!   added/updated/skipped accounting and per-record integrity reporting
//! - **Staged validation**: dev and prod gates must pass before anything
//!   reaches production
//! - **Backup-then-swap promotion**: a verified backup snapshot precedes a
//!   single atomic pointer swap
//! - **Auditable checkpoints**: every stage transition appends to a durable,
//!   per-run queryable log
//! - **Single-writer discipline**: a stale-aware run lock rejects concurrent
//!   runs before any state is touched
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use leaguesync::prelude::*;
//!
//! let config = PipelineConfig::new("/var/lib/leaguesync");
//! let controller =
//!     PipelineController::new(config, store, fetcher, loader, gate, checkpoints);
//!
//! let report = controller.run(RunMode::Incremental).await?;
//! println!("{report}");
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancel;
pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod lock;
pub mod merge;
pub mod pipeline;
pub mod promote;
pub mod record;
pub mod sources;
pub mod store;
pub mod testing;
pub mod util;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancel::CancelToken;
    pub use crate::checkpoint::{
        Checkpoint, CheckpointLog, CheckpointStatus, CountDelta, JsonlCheckpointLog,
        MemoryCheckpointLog,
    };
    pub use crate::config::PipelineConfig;
    pub use crate::errors::{PipelineError, PromotionError};
    pub use crate::lock::{RunLock, RunLockGuard};
    pub use crate::merge::{merge, MergeOutcome};
    pub use crate::pipeline::{
        PipelineController, RunContext, RunMode, RunReport, RunStatus, Stage,
    };
    pub use crate::promote::{BackupSnapshot, PromotionManager};
    pub use crate::record::{Dataset, DatasetKind, DatasetSet, KeySpec, NaturalKey, Record};
    pub use crate::sources::{
        FetchWindow, Fetcher, GateReport, GateTarget, Loader, ValidationGate,
    };
    pub use crate::store::{DatasetStore, FsDatasetStore};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn prelude_exposes_dataset_kinds() {
        assert_eq!(DatasetKind::all().len(), 3);
    }
}
