//! Error types for the leaguesync pipeline.
//!
//! The taxonomy mirrors how failures propagate: transient fetch/load faults
//! are retried with bounded backoff, gate and promotion failures are fatal to
//! the run, per-record integrity issues are collected without aborting, and
//! lock contention fails fast before any state is touched.

use crate::checkpoint::CheckpointError;
use crate::lock::{LockError, LockHolder};
use crate::record::DatasetKind;
use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The main error type for pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Transient network or storage fault during fetch or load; retryable.
    #[error("Transient I/O during {operation}: {message}")]
    TransientIo {
        /// The operation that failed (e.g. "fetch standings").
        operation: String,
        /// Underlying failure description.
        message: String,
    },

    /// A fetch or load collaborator failed in a way retries cannot fix.
    #[error("{operation} failed: {message}")]
    Collaborator {
        /// The operation that failed.
        operation: String,
        /// Underlying failure description.
        message: String,
    },

    /// A validation gate rejected the working copy; never retried.
    #[error("Validation gate '{target}' failed: {diagnostic}")]
    Validation {
        /// The gate that failed ("dev" or "prod").
        target: String,
        /// Free-text diagnostic from the gate.
        diagnostic: String,
    },

    /// Another run holds the lock; reported before any state is touched.
    #[error("Another run holds the pipeline lock ({holder})")]
    LockContention {
        /// Identity of the holding run.
        holder: LockHolder,
    },

    /// Backup or atomic swap failure during promotion.
    #[error("{0}")]
    Promotion(#[from] PromotionError),

    /// The run was cancelled by an operator or a timeout.
    #[error("Run cancelled: {reason}")]
    Cancelled {
        /// Why the run was cancelled.
        reason: String,
    },

    /// Storage fault outside the promotion path.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Checkpoint log fault.
    #[error("{0}")]
    Checkpoint(#[from] CheckpointError),
}

impl PipelineError {
    /// Classifies a collaborator failure into the transient or permanent
    /// variant.
    #[must_use]
    pub fn from_collaborator(
        operation: impl Into<String>,
        message: impl Into<String>,
        retryable: bool,
    ) -> Self {
        if retryable {
            Self::TransientIo {
                operation: operation.into(),
                message: message.into(),
            }
        } else {
            Self::Collaborator {
                operation: operation.into(),
                message: message.into(),
            }
        }
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Returns true if the error may resolve on retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientIo { .. })
    }

    /// Returns true if the error is lock contention.
    #[must_use]
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, Self::LockContention { .. })
    }
}

impl From<LockError> for PipelineError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Contention { holder, .. } => Self::LockContention { holder },
            LockError::Io { path, source } => Self::Store(StoreError::Io { path, source }),
        }
    }
}

/// Error raised when a promotion cannot complete.
#[derive(Debug, Error)]
pub enum PromotionError {
    /// The pre-swap backup could not be taken or verified; production is
    /// untouched.
    #[error("Backup failed before promotion: {source}")]
    BackupFailed {
        /// The storage fault behind the failure.
        #[source]
        source: StoreError,
    },

    /// The pointer swap failed after a verified backup was taken.
    #[error("Production swap failed: {source}; restore backup '{backup_stamp}' to roll back")]
    SwapFailed {
        /// Stamp of the backup snapshot to restore from.
        backup_stamp: String,
        /// The storage fault behind the failure.
        #[source]
        source: StoreError,
    },

    /// Restoring production from a backup snapshot failed.
    #[error("Restore from backup '{stamp}' failed: {source}")]
    RestoreFailed {
        /// Stamp of the backup snapshot being restored.
        stamp: String,
        /// The storage fault behind the failure.
        #[source]
        source: StoreError,
    },
}

/// A per-record data-integrity problem found during merge.
///
/// Issues never abort a run; they are collected and surfaced in the run's
/// final report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityIssue {
    /// Dataset the offending record belongs to.
    pub dataset: DatasetKind,
    /// What was wrong with the record.
    pub kind: IntegrityIssueKind,
    /// A short rendering of the offending record.
    pub record_hint: String,
}

impl IntegrityIssue {
    /// Creates a new integrity issue.
    #[must_use]
    pub fn new(
        dataset: DatasetKind,
        kind: IntegrityIssueKind,
        record_hint: impl Into<String>,
    ) -> Self {
        Self {
            dataset,
            kind,
            record_hint: record_hint.into(),
        }
    }
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.dataset, self.kind, self.record_hint)
    }
}

/// The kinds of per-record integrity problems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum IntegrityIssueKind {
    /// A key attribute was absent, null, or non-scalar.
    MissingKeyField {
        /// The offending attribute name.
        field: String,
    },
    /// An earlier record in the same batch shared this key and was displaced.
    DuplicateInBatch {
        /// The shared natural key.
        key: String,
    },
    /// Two stored records shared this key; only the later one was kept.
    DuplicateInExisting {
        /// The shared natural key.
        key: String,
    },
}

impl fmt::Display for IntegrityIssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingKeyField { field } => write!(f, "missing key attribute '{field}'"),
            Self::DuplicateInBatch { key } => write!(f, "duplicate key in batch '{key}'"),
            Self::DuplicateInExisting { key } => {
                write!(f, "duplicate key in stored data '{key}'")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_collaborator_classification() {
        let transient = PipelineError::from_collaborator("fetch standings", "timeout", true);
        assert!(transient.is_retryable());

        let permanent = PipelineError::from_collaborator("fetch standings", "bad payload", false);
        assert!(!permanent.is_retryable());
    }

    #[test]
    fn test_only_transient_io_is_retryable() {
        let validation = PipelineError::Validation {
            target: "dev".to_string(),
            diagnostic: "3 tests failed".to_string(),
        };
        assert!(!validation.is_retryable());

        let cancelled = PipelineError::cancelled("operator abort");
        assert!(!cancelled.is_retryable());
    }

    #[test]
    fn test_lock_error_mapping() {
        let holder = LockHolder::current("run-1");
        let err: PipelineError = LockError::Contention {
            path: "/tmp/leaguesync.lock".into(),
            holder,
        }
        .into();

        assert!(err.is_lock_contention());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_integrity_issue_display() {
        let issue = IntegrityIssue::new(
            DatasetKind::Standings,
            IntegrityIssueKind::MissingKeyField {
                field: "team".to_string(),
            },
            "season=2024/25 competition=Division One",
        );

        let rendered = issue.to_string();
        assert!(rendered.starts_with("standings:"));
        assert!(rendered.contains("missing key attribute 'team'"));
    }

    #[test]
    fn test_swap_failed_carries_rollback_guidance() {
        let err = PromotionError::SwapFailed {
            backup_stamp: "2025-03-01_04-00-00".to_string(),
            source: StoreError::Io {
                path: "/data/production/CURRENT".into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            },
        };

        let rendered = err.to_string();
        assert!(rendered.contains("2025-03-01_04-00-00"));
        assert!(rendered.contains("roll back"));
    }
}
