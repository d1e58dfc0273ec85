//! Natural-key upsert merging of incoming batches into stored datasets.
//!
//! [`merge`] folds a fetched batch into an existing dataset: records whose
//! natural key matches a stored record replace it in place, records with
//! unseen keys append after the existing rows, and records that cannot be
//! keyed are skipped without failing the batch. The merge never mutates
//! its input; it produces a fresh [`Dataset`] plus counters and any
//! integrity issues it observed.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{IntegrityIssue, IntegrityIssueKind};
use crate::record::{Dataset, KeySpec, NaturalKey, Record};

/// How the records of one merged batch were dispositioned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeCounts {
    /// Records with keys not present in the existing dataset.
    pub added: usize,
    /// Records that replaced an existing record with different content.
    pub updated: usize,
    /// Records that replaced an existing record with identical content.
    pub unchanged: usize,
    /// Records dropped for missing keys or displaced by a later duplicate.
    pub skipped: usize,
}

impl fmt::Display for MergeCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} added, {} updated, {} unchanged, {} skipped",
            self.added, self.updated, self.unchanged, self.skipped
        )
    }
}

/// The result of merging one batch: the merged dataset, disposition
/// counters, and any integrity issues recorded along the way.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// The merged dataset, replacing the existing one.
    pub dataset: Dataset,
    /// Batch disposition counters.
    pub counts: MergeCounts,
    /// Non-fatal data problems observed during the merge.
    pub issues: Vec<IntegrityIssue>,
}

impl MergeOutcome {
    /// Whether the merge recorded any integrity issues.
    #[must_use]
    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }
}

/// Merges an incoming batch into an existing dataset by natural key.
///
/// Within the batch, a repeated key keeps the position of its first
/// occurrence but the later record's content. With `full_refresh` the
/// existing records are discarded and the result is the winnowed batch
/// alone; every surviving record then counts as `added`.
#[must_use]
pub fn merge(
    existing: &Dataset,
    incoming: Vec<Record>,
    keys: &KeySpec,
    full_refresh: bool,
) -> MergeOutcome {
    let kind = existing.kind();
    let mut counts = MergeCounts::default();
    let mut issues = Vec::new();

    // Winnow the batch: drop unkeyable records, collapse in-batch
    // duplicates to the later occurrence.
    let mut batch: Vec<(NaturalKey, Record)> = Vec::new();
    let mut batch_index: HashMap<NaturalKey, usize> = HashMap::new();
    for record in incoming {
        match keys.key_of(&record) {
            Err(err) => {
                counts.skipped += 1;
                issues.push(IntegrityIssue::new(
                    kind,
                    IntegrityIssueKind::MissingKeyField {
                        field: err.field().to_string(),
                    },
                    record.hint(),
                ));
            }
            Ok(key) => {
                if let Some(&at) = batch_index.get(&key) {
                    counts.skipped += 1;
                    issues.push(IntegrityIssue::new(
                        kind,
                        IntegrityIssueKind::DuplicateInBatch {
                            key: key.to_string(),
                        },
                        batch[at].1.hint(),
                    ));
                    batch[at].1 = record;
                } else {
                    batch_index.insert(key.clone(), batch.len());
                    batch.push((key, record));
                }
            }
        }
    }

    // Base layer: existing records in stored order. Stored duplicates
    // collapse to the later occurrence; unkeyable stored records are
    // preserved verbatim.
    let mut merged: Vec<Record> = Vec::new();
    let mut index: HashMap<NaturalKey, usize> = HashMap::new();
    if !full_refresh {
        for record in existing.records() {
            match keys.key_of(record) {
                Ok(key) => {
                    if let Some(&at) = index.get(&key) {
                        issues.push(IntegrityIssue::new(
                            kind,
                            IntegrityIssueKind::DuplicateInExisting {
                                key: key.to_string(),
                            },
                            merged[at].hint(),
                        ));
                        merged[at] = record.clone();
                    } else {
                        index.insert(key.clone(), merged.len());
                        merged.push(record.clone());
                    }
                }
                Err(_) => merged.push(record.clone()),
            }
        }
    }

    // Apply the winnowed batch.
    for (key, record) in batch {
        if let Some(&at) = index.get(&key) {
            if merged[at] == record {
                counts.unchanged += 1;
            } else {
                merged[at] = record;
                counts.updated += 1;
            }
        } else {
            index.insert(key, merged.len());
            merged.push(record);
            counts.added += 1;
        }
    }

    if !issues.is_empty() {
        tracing::warn!(
            dataset = %kind,
            issues = issues.len(),
            "merge recorded integrity issues"
        );
    }
    tracing::debug!(dataset = %kind, %counts, "merge complete");

    MergeOutcome {
        dataset: Dataset::from_records(kind, merged),
        counts,
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DatasetKind;
    use pretty_assertions::assert_eq;

    fn standings(team: &str, points: usize) -> Record {
        Record::new()
            .with("season", "2024-2025")
            .with("competition", "premier-league")
            .with("team", team)
            .with("points", points)
    }

    fn league_table(size: usize) -> Vec<Record> {
        (0..size)
            .map(|i| standings(&format!("team-{i:04}"), i))
            .collect()
    }

    fn spec() -> KeySpec {
        DatasetKind::Standings.key_spec()
    }

    #[test]
    fn test_incremental_refresh_updates_in_place() {
        let existing = Dataset::from_records(DatasetKind::Standings, league_table(744));
        let mut incoming = league_table(744);
        for i in [12, 99, 508] {
            incoming[i] = standings(&format!("team-{i:04}"), i + 3);
        }

        let outcome = merge(&existing, incoming, &spec(), false);

        assert_eq!(outcome.dataset.len(), 744);
        assert_eq!(outcome.counts.added, 0);
        assert_eq!(outcome.counts.updated, 3);
        assert_eq!(outcome.counts.unchanged, 741);
        assert_eq!(outcome.counts.skipped, 0);
        assert!(outcome.issues.is_empty());
    }

    #[test]
    fn test_new_keys_append_after_existing() {
        let existing = Dataset::from_records(DatasetKind::Standings, league_table(5235));
        let incoming: Vec<Record> = (5235..5243)
            .map(|i| standings(&format!("team-{i:04}"), i))
            .collect();

        let outcome = merge(&existing, incoming, &spec(), false);

        assert_eq!(outcome.dataset.len(), 5243);
        assert_eq!(outcome.counts.added, 8);
        assert_eq!(outcome.counts.updated, 0);
        let tail = &outcome.dataset.records()[5235..];
        assert_eq!(tail[0].get("team").unwrap(), "team-5235");
        assert_eq!(tail[7].get("team").unwrap(), "team-5242");
    }

    #[test]
    fn test_merge_is_idempotent() {
        let existing = Dataset::from_records(DatasetKind::Standings, league_table(20));
        let batch = league_table(20);

        let first = merge(&existing, batch.clone(), &spec(), false);
        let second = merge(&first.dataset, batch, &spec(), false);

        assert_eq!(second.dataset, first.dataset);
        assert_eq!(second.counts.added, 0);
        assert_eq!(second.counts.updated, 0);
        assert_eq!(second.counts.unchanged, 20);
    }

    #[test]
    fn test_result_keys_are_unique() {
        let existing = Dataset::from_records(DatasetKind::Standings, league_table(10));
        let mut incoming = league_table(15);
        incoming.push(standings("team-0003", 99));

        let outcome = merge(&existing, incoming, &spec(), false);

        let keys: Vec<String> = outcome
            .dataset
            .records()
            .iter()
            .map(|r| spec().key_of(r).unwrap().to_string())
            .collect();
        let mut deduped = keys.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), keys.len());
    }

    #[test]
    fn test_full_refresh_discards_existing() {
        let existing = Dataset::from_records(DatasetKind::Standings, league_table(100));
        let incoming = league_table(7);

        let outcome = merge(&existing, incoming, &spec(), true);

        assert_eq!(outcome.dataset.len(), 7);
        assert_eq!(outcome.counts.added, 7);
        assert_eq!(outcome.counts.updated, 0);
        assert_eq!(outcome.counts.unchanged, 0);
    }

    #[test]
    fn test_full_refresh_still_collapses_batch_duplicates() {
        let existing = Dataset::empty(DatasetKind::Standings);
        let incoming = vec![
            standings("arsenal", 70),
            standings("chelsea", 60),
            standings("arsenal", 74),
        ];

        let outcome = merge(&existing, incoming, &spec(), true);

        assert_eq!(outcome.dataset.len(), 2);
        assert_eq!(outcome.counts.added, 2);
        assert_eq!(outcome.counts.skipped, 1);
        assert_eq!(outcome.dataset.records()[0].get("points").unwrap(), 74);
    }

    #[test]
    fn test_missing_key_records_are_skipped_non_fatally() {
        let existing = Dataset::empty(DatasetKind::Standings);
        let incoming = vec![
            standings("arsenal", 74),
            Record::new().with("points", 12),
            standings("chelsea", 60),
        ];

        let outcome = merge(&existing, incoming, &spec(), false);

        assert_eq!(outcome.dataset.len(), 2);
        assert_eq!(outcome.counts.added, 2);
        assert_eq!(outcome.counts.skipped, 1);
        assert_eq!(outcome.issues.len(), 1);
        assert!(matches!(
            outcome.issues[0].kind,
            IntegrityIssueKind::MissingKeyField { ref field } if field == "season"
        ));
    }

    #[test]
    fn test_batch_duplicate_later_wins_at_first_position() {
        let existing = Dataset::empty(DatasetKind::Standings);
        let incoming = vec![
            standings("arsenal", 70),
            standings("chelsea", 60),
            standings("arsenal", 74),
        ];

        let outcome = merge(&existing, incoming, &spec(), false);

        assert_eq!(outcome.dataset.len(), 2);
        assert_eq!(outcome.dataset.records()[0].get("team").unwrap(), "arsenal");
        assert_eq!(outcome.dataset.records()[0].get("points").unwrap(), 74);
        assert_eq!(outcome.counts.skipped, 1);
        assert!(matches!(
            outcome.issues[0].kind,
            IntegrityIssueKind::DuplicateInBatch { .. }
        ));
    }

    #[test]
    fn test_updates_preserve_record_order() {
        let existing = Dataset::from_records(DatasetKind::Standings, league_table(5));
        let incoming = vec![standings("team-0002", 99)];

        let outcome = merge(&existing, incoming, &spec(), false);

        let teams: Vec<&serde_json::Value> = outcome
            .dataset
            .records()
            .iter()
            .map(|r| r.get("team").unwrap())
            .collect();
        assert_eq!(
            teams,
            ["team-0000", "team-0001", "team-0002", "team-0003", "team-0004"]
        );
        assert_eq!(outcome.dataset.records()[2].get("points").unwrap(), 99);
    }

    #[test]
    fn test_existing_duplicates_collapse_with_issue() {
        let existing = Dataset::from_records(
            DatasetKind::Standings,
            vec![
                standings("arsenal", 70),
                standings("chelsea", 60),
                standings("arsenal", 74),
            ],
        );

        let outcome = merge(&existing, Vec::new(), &spec(), false);

        assert_eq!(outcome.dataset.len(), 2);
        assert_eq!(outcome.dataset.records()[0].get("points").unwrap(), 74);
        assert_eq!(outcome.issues.len(), 1);
        assert!(matches!(
            outcome.issues[0].kind,
            IntegrityIssueKind::DuplicateInExisting { .. }
        ));
    }

    #[test]
    fn test_unkeyable_existing_records_are_preserved() {
        let stray = Record::new().with("note", "hand-entered row");
        let existing = Dataset::from_records(
            DatasetKind::Standings,
            vec![standings("arsenal", 70), stray.clone()],
        );

        let outcome = merge(&existing, vec![standings("arsenal", 74)], &spec(), false);

        assert_eq!(outcome.dataset.len(), 2);
        assert_eq!(outcome.dataset.records()[1], stray);
        assert_eq!(outcome.counts.updated, 1);
        assert!(outcome.issues.is_empty());
    }

    #[test]
    fn test_counts_display() {
        let counts = MergeCounts {
            added: 8,
            updated: 3,
            unchanged: 741,
            skipped: 1,
        };
        assert_eq!(counts.to_string(), "8 added, 3 updated, 741 unchanged, 1 skipped");
    }
}
