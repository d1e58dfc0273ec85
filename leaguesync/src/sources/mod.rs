//! Collaborator seams: fetching, loading, and validation gates.
//!
//! The pipeline drives three external collaborators through the traits
//! here. [`Fetcher`] produces raw record batches, [`Loader`] pushes
//! merged datasets into the analytical warehouse, and [`ValidationGate`]
//! renders a pass or fail verdict over a deployed environment. The
//! subprocess-backed implementations ([`ProcessFetcher`], [`ProcessLoader`],
//! [`ProcessGate`]) drive external commands; tests plug in scripted ones
//! from the testing module.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::{Dataset, DatasetKind, Record};

mod process;

pub use process::{
    CommandSpec, ProcessFetcher, ProcessGate, ProcessLoader, ENV_DATASET, ENV_SINCE, ENV_TARGET,
    ENV_WINDOW,
};

/// How far back a fetch should reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchWindow {
    /// Fetch everything the source has.
    Full,
    /// Fetch changes on or after the given date.
    Since(NaiveDate),
}

impl fmt::Display for FetchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Since(date) => write!(f, "since {date}"),
        }
    }
}

/// A fetch attempt failed.
#[derive(Debug, Clone, Error)]
#[error("Fetching {dataset} failed: {message}")]
pub struct FetchError {
    /// The dataset being fetched.
    pub dataset: DatasetKind,
    /// What went wrong.
    pub message: String,
    /// Whether retrying the fetch could succeed.
    pub retryable: bool,
}

impl FetchError {
    /// A fault worth retrying, such as a network or subprocess hiccup.
    pub fn transient(dataset: DatasetKind, message: impl Into<String>) -> Self {
        Self {
            dataset,
            message: message.into(),
            retryable: true,
        }
    }

    /// A fault retrying cannot fix, such as malformed source output.
    pub fn permanent(dataset: DatasetKind, message: impl Into<String>) -> Self {
        Self {
            dataset,
            message: message.into(),
            retryable: false,
        }
    }
}

/// A load attempt failed.
#[derive(Debug, Clone, Error)]
#[error("Loading {dataset} failed: {message}")]
pub struct LoadError {
    /// The dataset being loaded.
    pub dataset: DatasetKind,
    /// What went wrong.
    pub message: String,
    /// Whether retrying the load could succeed.
    pub retryable: bool,
}

impl LoadError {
    /// A fault worth retrying.
    pub fn transient(dataset: DatasetKind, message: impl Into<String>) -> Self {
        Self {
            dataset,
            message: message.into(),
            retryable: true,
        }
    }

    /// A fault retrying cannot fix.
    pub fn permanent(dataset: DatasetKind, message: impl Into<String>) -> Self {
        Self {
            dataset,
            message: message.into(),
            retryable: false,
        }
    }
}

/// The environment a validation gate runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateTarget {
    /// The development environment, validated before promotion.
    Dev,
    /// The production environment, validated after load.
    Prod,
}

impl GateTarget {
    /// The snake_case name of this target.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Prod => "prod",
        }
    }
}

impl fmt::Display for GateTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error parsing a gate target name.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown gate target '{input}', expected 'dev' or 'prod'")]
pub struct ParseGateTargetError {
    /// The rejected input.
    pub input: String,
}

impl FromStr for GateTarget {
    type Err = ParseGateTargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(Self::Dev),
            "prod" => Ok(Self::Prod),
            other => Err(ParseGateTargetError {
                input: other.to_string(),
            }),
        }
    }
}

/// A gate's verdict, with its diagnostic output either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateReport {
    /// Whether validation passed.
    pub passed: bool,
    /// The gate's own description of what it checked or found.
    pub diagnostic: String,
}

impl GateReport {
    /// A passing verdict.
    pub fn pass(diagnostic: impl Into<String>) -> Self {
        Self {
            passed: true,
            diagnostic: diagnostic.into(),
        }
    }

    /// A failing verdict.
    pub fn fail(diagnostic: impl Into<String>) -> Self {
        Self {
            passed: false,
            diagnostic: diagnostic.into(),
        }
    }
}

/// The gate itself could not run to a verdict.
#[derive(Debug, Clone, Error)]
#[error("Validation gate for {target} failed to run: {message}")]
pub struct GateError {
    /// The environment being validated.
    pub target: GateTarget,
    /// What went wrong.
    pub message: String,
}

/// Produces raw record batches from an upstream source.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches one dataset's batch for the given window.
    async fn fetch(
        &self,
        dataset: DatasetKind,
        window: FetchWindow,
    ) -> Result<Vec<Record>, FetchError>;
}

/// Pushes merged datasets into the analytical warehouse.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Loads one dataset, returning the number of records accepted.
    async fn load(&self, dataset: &Dataset) -> Result<usize, LoadError>;
}

/// Renders a pass or fail verdict over a deployed environment.
#[async_trait]
pub trait ValidationGate: Send + Sync {
    /// Validates the given environment.
    async fn validate(&self, target: GateTarget) -> Result<GateReport, GateError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fetch_window_display() {
        assert_eq!(FetchWindow::Full.to_string(), "full");
        let date = NaiveDate::from_ymd_opt(2025, 2, 22).unwrap();
        assert_eq!(FetchWindow::Since(date).to_string(), "since 2025-02-22");
    }

    #[test]
    fn test_gate_target_round_trip() {
        assert_eq!("dev".parse::<GateTarget>().unwrap(), GateTarget::Dev);
        assert_eq!("prod".parse::<GateTarget>().unwrap(), GateTarget::Prod);
        assert_eq!(GateTarget::Dev.to_string(), "dev");
        assert!("staging".parse::<GateTarget>().is_err());
    }

    #[test]
    fn test_fetch_error_retryability() {
        assert!(FetchError::transient(DatasetKind::Matches, "timeout").retryable);
        assert!(!FetchError::permanent(DatasetKind::Matches, "bad json").retryable);
    }

    #[test]
    fn test_gate_report_factories() {
        assert!(GateReport::pass("42 checks").passed);
        let fail = GateReport::fail("row count drifted");
        assert!(!fail.passed);
        assert_eq!(fail.diagnostic, "row count drifted");
    }
}
