//! End-of-run reporting.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{RunMode, RunStatus};
use crate::errors::IntegrityIssue;
use crate::merge::MergeCounts;
use crate::record::DatasetKind;

/// What one run did to one dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetSummary {
    /// The dataset.
    pub dataset: DatasetKind,
    /// Production record count when the run started.
    pub before: usize,
    /// Record count after merging.
    pub merged: usize,
    /// Merge disposition counters.
    pub counts: MergeCounts,
    /// Records the loader accepted, once the load stage has run.
    pub loaded: Option<usize>,
}

/// The full outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// The run id.
    pub run_id: Uuid,
    /// The resolved run mode.
    pub mode: RunMode,
    /// Terminal status.
    pub status: RunStatus,
    /// Per-dataset summaries, in canonical kind order.
    pub datasets: Vec<DatasetSummary>,
    /// Integrity issues recorded during merging.
    pub issues: Vec<IntegrityIssue>,
    /// Stamp of the pre-promotion backup, when promotion was reached.
    pub backup_stamp: Option<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Wall-clock duration of the run in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        self.finished_at
            .signed_duration_since(self.started_at)
            .num_milliseconds()
    }

    /// The process exit code this run maps to.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        self.status.exit_code()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "run {} ({}) {} in {} ms",
            self.run_id,
            self.mode,
            self.status,
            self.duration_ms()
        )?;
        for summary in &self.datasets {
            write!(
                f,
                "  {}: {} -> {} [{}]",
                summary.dataset,
                summary.before,
                summary.merged,
                summary.counts
            )?;
            if let Some(loaded) = summary.loaded {
                write!(f, " loaded {loaded}")?;
            }
            writeln!(f)?;
        }
        if let Some(stamp) = &self.backup_stamp {
            writeln!(f, "  backup: {stamp}")?;
        }
        for issue in &self.issues {
            writeln!(f, "  warning: {issue}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::IntegrityIssueKind;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn fixed_report() -> RunReport {
        let started_at = Utc.with_ymd_and_hms(2025, 3, 1, 4, 0, 0).single().unwrap();
        RunReport {
            run_id: Uuid::nil(),
            mode: RunMode::Incremental,
            status: RunStatus::Succeeded,
            datasets: vec![
                DatasetSummary {
                    dataset: DatasetKind::Standings,
                    before: 744,
                    merged: 744,
                    counts: MergeCounts {
                        added: 0,
                        updated: 3,
                        unchanged: 741,
                        skipped: 0,
                    },
                    loaded: Some(744),
                },
                DatasetSummary {
                    dataset: DatasetKind::Matches,
                    before: 5235,
                    merged: 5243,
                    counts: MergeCounts {
                        added: 8,
                        updated: 0,
                        unchanged: 5235,
                        skipped: 0,
                    },
                    loaded: Some(5243),
                },
            ],
            issues: vec![IntegrityIssue::new(
                DatasetKind::Standings,
                IntegrityIssueKind::MissingKeyField {
                    field: "team".to_string(),
                },
                "points=12",
            )],
            backup_stamp: Some("2025-03-01_04-00-17".to_string()),
            started_at,
            finished_at: started_at + chrono::Duration::milliseconds(1843),
        }
    }

    #[test]
    fn test_duration_and_exit_code() {
        let report = fixed_report();
        assert_eq!(report.duration_ms(), 1843);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_display_lays_out_summary_lines() {
        let rendered = fixed_report().to_string();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(
            lines[0],
            "run 00000000-0000-0000-0000-000000000000 (incremental) succeeded in 1843 ms"
        );
        assert_eq!(
            lines[1],
            "  standings: 744 -> 744 [0 added, 3 updated, 741 unchanged, 0 skipped] loaded 744"
        );
        assert_eq!(
            lines[2],
            "  matches: 5235 -> 5243 [8 added, 0 updated, 5235 unchanged, 0 skipped] loaded 5243"
        );
        assert_eq!(lines[3], "  backup: 2025-03-01_04-00-17");
        assert!(lines[4].starts_with("  warning: standings: missing key attribute 'team'"));
    }

    #[test]
    fn test_failed_report_exit_code() {
        let mut report = fixed_report();
        report.status = RunStatus::Failed {
            stage: super::super::Stage::ValidateDev,
            cause: "row count drifted".to_string(),
        };
        assert_eq!(report.exit_code(), 1);
    }
}
