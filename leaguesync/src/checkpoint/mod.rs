//! Run checkpoints and the append-only checkpoint log.
//!
//! Every stage transition of a run is recorded as a [`Checkpoint`] and
//! appended to a [`CheckpointLog`]. The log is the audit trail: given a
//! run id, its ordered history reconstructs exactly how far the run got,
//! what each stage did to the record counts, and why it stopped.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::Stage;
use crate::record::DatasetKind;

mod log;

pub use log::{
    CheckpointError, CheckpointLog, JsonlCheckpointLog, MemoryCheckpointLog, RunDigest,
};

/// A record-count transition observed at one checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountDelta {
    /// Count before the stage ran.
    pub before: usize,
    /// Count after the stage ran.
    pub after: usize,
    /// Signed difference, `after - before`.
    pub delta: i64,
}

impl CountDelta {
    /// Creates a delta from before and after counts.
    #[must_use]
    pub fn new(before: usize, after: usize) -> Self {
        let magnitude = i64::try_from(before.abs_diff(after)).unwrap_or(i64::MAX);
        let delta = if after >= before { magnitude } else { -magnitude };
        Self {
            before,
            after,
            delta,
        }
    }
}

impl fmt::Display for CountDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} ({:+})", self.before, self.after, self.delta)
    }
}

/// Whether a checkpointed stage completed or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    /// The stage completed.
    Passed,
    /// The stage failed; the checkpoint carries the cause.
    Failed,
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One entry in a run's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The run this checkpoint belongs to.
    pub run_id: Uuid,
    /// Position within the run's trail, monotone from 1. Assigned on
    /// append, so log order survives clock skew in `recorded_at`.
    #[serde(default)]
    pub sequence: u64,
    /// The stage being checkpointed.
    pub stage: Stage,
    /// The dataset the checkpoint refers to, for per-dataset entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<DatasetKind>,
    /// Record-count transitions per dataset.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub counts: BTreeMap<DatasetKind, CountDelta>,
    /// Outcome of the stage.
    pub status: CheckpointStatus,
    /// Failure cause, present on failed checkpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    /// Free-form detail, such as merge counters or a backup stamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// When the checkpoint was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Creates a passed checkpoint for a stage.
    #[must_use]
    pub fn passed(run_id: Uuid, stage: Stage) -> Self {
        Self {
            run_id,
            sequence: 0,
            stage,
            dataset: None,
            counts: BTreeMap::new(),
            status: CheckpointStatus::Passed,
            cause: None,
            detail: None,
            recorded_at: Utc::now(),
        }
    }

    /// Creates a failed checkpoint carrying the failure cause.
    #[must_use]
    pub fn failed(run_id: Uuid, stage: Stage, cause: impl Into<String>) -> Self {
        Self {
            cause: Some(cause.into()),
            status: CheckpointStatus::Failed,
            ..Self::passed(run_id, stage)
        }
    }

    /// Attaches per-dataset count transitions.
    #[must_use]
    pub fn with_counts(mut self, counts: BTreeMap<DatasetKind, CountDelta>) -> Self {
        self.counts = counts;
        self
    }

    /// Scopes the checkpoint to one dataset and records its transition.
    #[must_use]
    pub fn with_dataset(mut self, kind: DatasetKind, delta: CountDelta) -> Self {
        self.dataset = Some(kind);
        self.counts.insert(kind, delta);
        self
    }

    /// Attaches free-form detail.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Whether this checkpoint records a failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status == CheckpointStatus::Failed
    }
}
