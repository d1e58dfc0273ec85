//! Pipeline orchestration.
//!
//! This module provides:
//! - The stage state machine and run outcomes
//! - Per-run context threaded through every stage
//! - Retry policy for transient collaborator faults
//! - The controller that drives a run from prepare to promote
//! - End-of-run reporting

mod context;
mod controller;
mod report;
mod retry;
mod stage;


pub use context::{RunContext, RunMode};
pub use controller::PipelineController;
pub use report::{DatasetSummary, RunReport};
pub use retry::{backoff_delay, with_retry, BackoffStrategy, JitterStrategy, RetryConfig};
pub use stage::{RunStatus, Stage};
