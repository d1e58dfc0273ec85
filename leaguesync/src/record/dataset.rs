//! In-memory datasets and the full working set.

use std::collections::BTreeMap;

use super::{DatasetKind, Record};

/// An ordered collection of records of a single kind.
///
/// Record order is load order and is preserved by every pipeline
/// operation; merges append new records after existing ones.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    kind: DatasetKind,
    records: Vec<Record>,
}

impl Dataset {
    /// Creates an empty dataset of the given kind.
    #[must_use]
    pub fn empty(kind: DatasetKind) -> Self {
        Self {
            kind,
            records: Vec::new(),
        }
    }

    /// Creates a dataset from pre-ordered records.
    #[must_use]
    pub fn from_records(kind: DatasetKind, records: Vec<Record>) -> Self {
        Self { kind, records }
    }

    /// The dataset kind.
    #[must_use]
    pub fn kind(&self) -> DatasetKind {
        self.kind
    }

    /// The records, in stored order.
    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the dataset holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Consumes the dataset, yielding its records.
    #[must_use]
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

/// The complete set of managed datasets, one [`Dataset`] per kind.
///
/// Cloning a set deep-copies every record; a clone shares no storage
/// with its source, so mutating one can never leak into the other.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSet {
    standings: Dataset,
    matches: Dataset,
    match_events: Dataset,
}

impl DatasetSet {
    /// Creates a set with every dataset empty.
    #[must_use]
    pub fn new() -> Self {
        Self {
            standings: Dataset::empty(DatasetKind::Standings),
            matches: Dataset::empty(DatasetKind::Matches),
            match_events: Dataset::empty(DatasetKind::MatchEvents),
        }
    }

    /// The dataset of the given kind.
    #[must_use]
    pub fn get(&self, kind: DatasetKind) -> &Dataset {
        match kind {
            DatasetKind::Standings => &self.standings,
            DatasetKind::Matches => &self.matches,
            DatasetKind::MatchEvents => &self.match_events,
        }
    }

    /// Mutable access to the dataset of the given kind.
    pub fn get_mut(&mut self, kind: DatasetKind) -> &mut Dataset {
        match kind {
            DatasetKind::Standings => &mut self.standings,
            DatasetKind::Matches => &mut self.matches,
            DatasetKind::MatchEvents => &mut self.match_events,
        }
    }

    /// Replaces the dataset of the incoming value's kind.
    pub fn insert(&mut self, dataset: Dataset) {
        let kind = dataset.kind();
        *self.get_mut(kind) = dataset;
    }

    /// Record counts per kind, in canonical kind order.
    #[must_use]
    pub fn counts(&self) -> BTreeMap<DatasetKind, usize> {
        DatasetKind::all()
            .into_iter()
            .map(|kind| (kind, self.get(kind).len()))
            .collect()
    }

    /// Total records across all kinds.
    #[must_use]
    pub fn total_records(&self) -> usize {
        DatasetKind::all()
            .into_iter()
            .map(|kind| self.get(kind).len())
            .sum()
    }

    /// Iterates over the datasets in canonical kind order.
    pub fn iter(&self) -> impl Iterator<Item = &Dataset> {
        DatasetKind::all().into_iter().map(|kind| self.get(kind))
    }

    /// Whether every dataset is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_records() == 0
    }
}

impl Default for DatasetSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn team(name: &str) -> Record {
        Record::new().with("team", name)
    }

    #[test]
    fn test_insert_replaces_by_kind() {
        let mut set = DatasetSet::new();
        set.insert(Dataset::from_records(
            DatasetKind::Standings,
            vec![team("arsenal")],
        ));
        set.insert(Dataset::from_records(
            DatasetKind::Standings,
            vec![team("chelsea"), team("leeds")],
        ));
        assert_eq!(set.get(DatasetKind::Standings).len(), 2);
        assert_eq!(set.total_records(), 2);
    }

    #[test]
    fn test_counts_cover_every_kind() {
        let mut set = DatasetSet::new();
        set.insert(Dataset::from_records(
            DatasetKind::Matches,
            vec![team("x"), team("y")],
        ));
        let counts = set.counts();
        assert_eq!(counts.len(), 3);
        assert_eq!(counts[&DatasetKind::Standings], 0);
        assert_eq!(counts[&DatasetKind::Matches], 2);
    }

    #[test]
    fn test_clone_shares_no_storage() {
        let mut original = DatasetSet::new();
        original.insert(Dataset::from_records(
            DatasetKind::Standings,
            vec![team("arsenal")],
        ));
        let snapshot = original.clone();
        original.insert(Dataset::from_records(DatasetKind::Standings, Vec::new()));
        assert_eq!(snapshot.get(DatasetKind::Standings).len(), 1);
        assert!(original.get(DatasetKind::Standings).is_empty());
    }

    #[test]
    fn test_iter_follows_canonical_order() {
        let set = DatasetSet::new();
        let kinds: Vec<DatasetKind> = set.iter().map(Dataset::kind).collect();
        assert_eq!(
            kinds,
            [
                DatasetKind::Standings,
                DatasetKind::Matches,
                DatasetKind::MatchEvents
            ]
        );
    }
}
