//! Per-run context: identity, mode, cancellation, and checkpointing.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Stage;
use crate::cancel::CancelToken;
use crate::checkpoint::{Checkpoint, CheckpointLog};
use crate::errors::PipelineError;

/// Whether a run merges into existing data or rebuilds from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Merge fetched batches into the existing datasets.
    Incremental,
    /// Discard existing datasets and rebuild from the fetched batches.
    FullRefresh,
}

impl RunMode {
    /// Resolves the mode for a run.
    ///
    /// An explicit operator request always wins; otherwise incremental
    /// runs upgrade to a full refresh on the configured weekday.
    #[must_use]
    pub fn resolve(full_refresh: bool, today: Weekday, weekly_refresh_day: Option<Weekday>) -> Self {
        if full_refresh || weekly_refresh_day == Some(today) {
            Self::FullRefresh
        } else {
            Self::Incremental
        }
    }

    /// Whether this run rebuilds from scratch.
    #[must_use]
    pub fn is_full_refresh(&self) -> bool {
        matches!(self, Self::FullRefresh)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incremental => write!(f, "incremental"),
            Self::FullRefresh => write!(f, "full_refresh"),
        }
    }
}

/// Everything a stage needs to know about the run it belongs to.
#[derive(Clone)]
pub struct RunContext {
    run_id: Uuid,
    mode: RunMode,
    started_at: DateTime<Utc>,
    cancel: Arc<CancelToken>,
    checkpoints: Arc<dyn CheckpointLog>,
    sequence: Arc<AtomicU64>,
}

impl RunContext {
    /// Creates a context for a fresh run with a new run id.
    pub fn new(mode: RunMode, checkpoints: Arc<dyn CheckpointLog>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            mode,
            started_at: Utc::now(),
            cancel: Arc::new(CancelToken::new()),
            checkpoints,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shares an externally owned cancel token with this run.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: Arc<CancelToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// The run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The resolved run mode.
    #[must_use]
    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// When the run started.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// The run's cancel token.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancelToken> {
        &self.cancel
    }

    /// Appends a checkpoint to the run's audit trail, stamping it with
    /// the next per-run sequence number (starting at 1).
    pub fn checkpoint(&self, mut checkpoint: Checkpoint) -> Result<(), PipelineError> {
        checkpoint.sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.checkpoints.append(&checkpoint)?;
        Ok(())
    }

    /// Fails with [`PipelineError::Cancelled`] if cancellation was requested.
    pub fn ensure_active(&self, stage: Stage) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            let reason = self
                .cancel
                .reason()
                .unwrap_or_else(|| "cancelled".to_string());
            tracing::info!(run_id = %self.run_id, %stage, %reason, "run cancelled");
            return Err(PipelineError::cancelled(reason));
        }
        Ok(())
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("mode", &self.mode)
            .field("started_at", &self.started_at)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointLog;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_explicit_full_refresh_wins() {
        let mode = RunMode::resolve(true, Weekday::Thu, None);
        assert_eq!(mode, RunMode::FullRefresh);
        assert!(mode.is_full_refresh());
    }

    #[test]
    fn test_weekly_refresh_day_upgrades_incremental() {
        assert_eq!(
            RunMode::resolve(false, Weekday::Mon, Some(Weekday::Mon)),
            RunMode::FullRefresh
        );
        assert_eq!(
            RunMode::resolve(false, Weekday::Tue, Some(Weekday::Mon)),
            RunMode::Incremental
        );
        assert_eq!(
            RunMode::resolve(false, Weekday::Mon, None),
            RunMode::Incremental
        );
    }

    #[test]
    fn test_checkpoint_appends_to_log() {
        let log = Arc::new(MemoryCheckpointLog::new());
        let ctx = RunContext::new(RunMode::Incremental, Arc::clone(&log) as _);

        ctx.checkpoint(Checkpoint::passed(ctx.run_id(), Stage::Prepare))
            .unwrap();

        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].run_id, ctx.run_id());
    }

    #[test]
    fn test_checkpoint_sequences_are_monotone() {
        let log = Arc::new(MemoryCheckpointLog::new());
        let ctx = RunContext::new(RunMode::Incremental, Arc::clone(&log) as _);

        ctx.checkpoint(Checkpoint::passed(ctx.run_id(), Stage::Prepare))
            .unwrap();
        ctx.checkpoint(Checkpoint::passed(ctx.run_id(), Stage::FetchMerge))
            .unwrap();
        ctx.checkpoint(Checkpoint::passed(ctx.run_id(), Stage::Load))
            .unwrap();

        let sequences: Vec<u64> = log.entries().iter().map(|entry| entry.sequence).collect();
        assert_eq!(sequences, [1, 2, 3]);
    }

    #[test]
    fn test_ensure_active_reports_cancellation() {
        let ctx = RunContext::new(
            RunMode::Incremental,
            Arc::new(MemoryCheckpointLog::new()) as _,
        );
        ctx.ensure_active(Stage::Prepare).unwrap();

        ctx.cancel_token().cancel("timeout");
        let err = ctx.ensure_active(Stage::FetchMerge).unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled { .. }));
    }
}
