//! Dataset storage: production data, working copies, and backups.
//!
//! A [`DatasetStore`] owns the three places managed data lives: the
//! promoted production datasets, per-run working copies, and timestamped
//! backups. Implementations must make [`DatasetStore::swap_production`]
//! atomic: readers see either the previous production data or the new
//! data in full, never a mix.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use thiserror::Error;
use uuid::Uuid;

use crate::record::{DatasetKind, DatasetSet};

mod fs;

pub use fs::{BackupManifest, FsDatasetStore};

/// Errors raised by dataset stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing storage failed.
    #[error("Store I/O failed at '{path}': {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// A stored dataset file did not parse.
    #[error("Stored data at '{path}' is malformed: {source}")]
    Malformed {
        /// The file that failed to parse.
        path: PathBuf,
        /// The underlying parse error.
        source: serde_json::Error,
    },

    /// A backup with this stamp already exists and must not be overwritten.
    #[error("Backup '{stamp}' already exists")]
    BackupExists {
        /// The colliding stamp.
        stamp: String,
    },

    /// No backup with this stamp exists.
    #[error("Backup '{stamp}' does not exist")]
    BackupMissing {
        /// The requested stamp.
        stamp: String,
    },

    /// A backup dataset holds a different number of records than expected.
    #[error("Backup '{stamp}' failed verification: {dataset} has {found} records, expected {expected}")]
    BackupCountMismatch {
        /// The backup stamp.
        stamp: String,
        /// The dataset that mismatched.
        dataset: DatasetKind,
        /// Records the source held.
        expected: usize,
        /// Records the backup holds.
        found: usize,
    },

    /// A backup dataset's content does not match its recorded checksum.
    #[error("Backup '{stamp}' failed verification: {dataset} checksum does not match")]
    BackupChecksumMismatch {
        /// The backup stamp.
        stamp: String,
        /// The dataset that mismatched.
        dataset: DatasetKind,
    },
}

impl StoreError {
    /// Wraps an I/O error with the path it occurred at.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Storage backend for production data, working copies, and backups.
pub trait DatasetStore: Send + Sync {
    /// Reads the promoted production datasets.
    ///
    /// A store that has never been promoted to returns an empty set.
    fn read_production(&self) -> Result<DatasetSet, StoreError>;

    /// Writes (or rewrites) a run's working copy.
    fn write_working(&self, run_id: Uuid, datasets: &DatasetSet) -> Result<(), StoreError>;

    /// Removes a run's working copy, if present.
    fn discard_working(&self, run_id: Uuid) -> Result<(), StoreError>;

    /// Writes a backup under the given stamp. Stamps are never reused.
    fn write_backup(&self, stamp: &str, datasets: &DatasetSet) -> Result<(), StoreError>;

    /// Verifies a backup against the expected per-dataset record counts.
    fn verify_backup(
        &self,
        stamp: &str,
        expected: &BTreeMap<DatasetKind, usize>,
    ) -> Result<(), StoreError>;

    /// Reads a backup back into memory.
    fn read_backup(&self, stamp: &str) -> Result<DatasetSet, StoreError>;

    /// Lists backup stamps, oldest first.
    fn list_backups(&self) -> Result<Vec<String>, StoreError>;

    /// Atomically replaces the production datasets.
    fn swap_production(&self, datasets: &DatasetSet) -> Result<(), StoreError>;
}

#[derive(Default)]
struct MemoryInner {
    production: Option<DatasetSet>,
    backups: BTreeMap<String, DatasetSet>,
    working: HashMap<Uuid, DatasetSet>,
}

/// In-memory store for tests and embedded use.
///
/// Failure injection knobs let tests exercise the pipeline's backup and
/// promotion error paths without a filesystem.
#[derive(Default)]
pub struct MemoryDatasetStore {
    inner: RwLock<MemoryInner>,
    fail_backup: AtomicBool,
    fail_swap: AtomicBool,
}

impl MemoryDatasetStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent backup writes fail.
    pub fn set_fail_backup(&self, fail: bool) {
        self.fail_backup.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent production swaps fail.
    pub fn set_fail_swap(&self, fail: bool) {
        self.fail_swap.store(fail, Ordering::SeqCst);
    }

    /// Number of working copies currently held.
    #[must_use]
    pub fn working_copies(&self) -> usize {
        self.inner.read().working.len()
    }
}

impl DatasetStore for MemoryDatasetStore {
    fn read_production(&self) -> Result<DatasetSet, StoreError> {
        Ok(self
            .inner
            .read()
            .production
            .clone()
            .unwrap_or_default())
    }

    fn write_working(&self, run_id: Uuid, datasets: &DatasetSet) -> Result<(), StoreError> {
        self.inner.write().working.insert(run_id, datasets.clone());
        Ok(())
    }

    fn discard_working(&self, run_id: Uuid) -> Result<(), StoreError> {
        self.inner.write().working.remove(&run_id);
        Ok(())
    }

    fn write_backup(&self, stamp: &str, datasets: &DatasetSet) -> Result<(), StoreError> {
        if self.fail_backup.load(Ordering::SeqCst) {
            return Err(StoreError::io(
                "<memory>",
                io::Error::other("injected backup failure"),
            ));
        }
        let mut inner = self.inner.write();
        if inner.backups.contains_key(stamp) {
            return Err(StoreError::BackupExists {
                stamp: stamp.to_string(),
            });
        }
        inner.backups.insert(stamp.to_string(), datasets.clone());
        Ok(())
    }

    fn verify_backup(
        &self,
        stamp: &str,
        expected: &BTreeMap<DatasetKind, usize>,
    ) -> Result<(), StoreError> {
        let inner = self.inner.read();
        let backup = inner
            .backups
            .get(stamp)
            .ok_or_else(|| StoreError::BackupMissing {
                stamp: stamp.to_string(),
            })?;
        for (kind, &expected_count) in expected {
            let found = backup.get(*kind).len();
            if found != expected_count {
                return Err(StoreError::BackupCountMismatch {
                    stamp: stamp.to_string(),
                    dataset: *kind,
                    expected: expected_count,
                    found,
                });
            }
        }
        Ok(())
    }

    fn read_backup(&self, stamp: &str) -> Result<DatasetSet, StoreError> {
        self.inner
            .read()
            .backups
            .get(stamp)
            .cloned()
            .ok_or_else(|| StoreError::BackupMissing {
                stamp: stamp.to_string(),
            })
    }

    fn list_backups(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.inner.read().backups.keys().cloned().collect())
    }

    fn swap_production(&self, datasets: &DatasetSet) -> Result<(), StoreError> {
        if self.fail_swap.load(Ordering::SeqCst) {
            return Err(StoreError::io(
                "<memory>",
                io::Error::other("injected swap failure"),
            ));
        }
        self.inner.write().production = Some(datasets.clone());
        Ok(())
    }
}
