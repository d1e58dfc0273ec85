//! Pipeline stages and run outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The stages of a run, in execution order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Snapshot production into an isolated working copy.
    Prepare,
    /// Fetch incoming batches and merge them into the working copy.
    FetchMerge,
    /// Load merged datasets into the warehouse.
    Load,
    /// Validate the development environment.
    ValidateDev,
    /// Validate the production environment.
    ValidateProd,
    /// Back up and swap production to the working data.
    Promote,
}

impl Stage {
    /// All stages, in execution order.
    #[must_use]
    pub const fn all() -> [Self; 6] {
        [
            Self::Prepare,
            Self::FetchMerge,
            Self::Load,
            Self::ValidateDev,
            Self::ValidateProd,
            Self::Promote,
        ]
    }

    /// The snake_case name of this stage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::FetchMerge => "fetch_merge",
            Self::Load => "load",
            Self::ValidateDev => "validate_dev",
            Self::ValidateProd => "validate_prod",
            Self::Promote => "promote",
        }
    }

    /// Whether transient faults in this stage may be retried.
    ///
    /// Only the collaborator-bound stages retry. Validation stages never
    /// do: a failed verdict is a decision about the data, not a fault.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::FetchMerge | Self::Load)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// Every stage completed and production was promoted.
    Succeeded,
    /// A stage failed; later stages did not run.
    Failed {
        /// The stage that failed.
        stage: Stage,
        /// Why it failed.
        cause: String,
    },
    /// The run was cancelled at a suspension point.
    Aborted {
        /// The stage that was interrupted.
        stage: Stage,
        /// The cancellation reason.
        reason: String,
    },
}

impl RunStatus {
    /// Whether the run completed successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// The process exit code this outcome maps to.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed { stage, cause } => write!(f, "failed at {stage}: {cause}"),
            Self::Aborted { stage, reason } => write!(f, "aborted at {stage}: {reason}"),
        }
    }
}
