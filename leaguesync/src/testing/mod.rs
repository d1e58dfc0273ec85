//! Testing utilities for leaguesync pipelines.
//!
//! This module provides:
//! - Scripted collaborator doubles (fetcher, loader, validation gate)
//! - Record and dataset fixture builders

mod fixtures;
mod mocks;

pub use fixtures::{match_record, matches_table, standings_record, standings_table};
pub use mocks::{FlakyFetcher, RecordingLoader, ScriptedGate, StaticFetcher};
