//! Filesystem-backed dataset store.
//!
//! Layout under the store root:
//!
//! ```text
//! production/CURRENT            pointer file naming the live version
//! production/versions/<id>/     one directory of dataset files per version
//! backups/<stamp>/              dataset files plus manifest.json
//! working/<run-id>/             per-run working copies
//! ```
//!
//! Every file lands via write-to-temp-then-rename, and promotion is a
//! single rename of the `CURRENT` pointer onto a fully written version
//! directory. A crash at any point leaves either the old production data
//! or the new, never a torn mix.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{DatasetStore, StoreError};
use crate::record::{Dataset, DatasetKind, DatasetSet, Record};

const MANIFEST_FILE: &str = "manifest.json";

/// What a backup directory claims to contain.
///
/// The manifest is written after every dataset file has landed, so its
/// presence marks the backup as complete. Verification re-reads the
/// dataset files and checks them against these counts and checksums.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    /// When the backup was taken.
    pub created_at: DateTime<Utc>,
    /// Records per dataset at backup time.
    pub row_counts: BTreeMap<DatasetKind, usize>,
    /// SHA-256 of each dataset file's bytes, hex encoded.
    pub checksums: BTreeMap<DatasetKind, String>,
}

/// Dataset store rooted at a data directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsDatasetStore {
    root: PathBuf,
}

impl FsDatasetStore {
    /// Creates a store rooted at the given directory.
    ///
    /// Subdirectories are created lazily on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The store's root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn production_dir(&self) -> PathBuf {
        self.root.join("production")
    }

    fn pointer_path(&self) -> PathBuf {
        self.production_dir().join("CURRENT")
    }

    fn versions_dir(&self) -> PathBuf {
        self.production_dir().join("versions")
    }

    fn backup_dir(&self, stamp: &str) -> PathBuf {
        self.root.join("backups").join(stamp)
    }

    fn working_dir(&self, run_id: Uuid) -> PathBuf {
        self.root.join("working").join(run_id.to_string())
    }

    fn current_version(&self) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.pointer_path()) {
            Ok(contents) => {
                let version = contents.trim().to_string();
                Ok((!version.is_empty()).then_some(version))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::io(self.pointer_path(), source)),
        }
    }

    fn read_dataset_dir(&self, dir: &Path) -> Result<DatasetSet, StoreError> {
        let mut set = DatasetSet::new();
        for kind in DatasetKind::all() {
            let path = dir.join(kind.file_name());
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(source) => return Err(StoreError::io(path, source)),
            };
            let records: Vec<Record> =
                serde_json::from_slice(&bytes).map_err(|source| StoreError::Malformed {
                    path: path.clone(),
                    source,
                })?;
            set.insert(Dataset::from_records(kind, records));
        }
        Ok(set)
    }

    fn write_dataset_dir(&self, dir: &Path, datasets: &DatasetSet) -> Result<(), StoreError> {
        for dataset in datasets.iter() {
            let path = dir.join(dataset.kind().file_name());
            let bytes = serialize_records(dataset.records())
                .map_err(|source| StoreError::io(&path, source.into()))?;
            atomic_write(&path, &bytes)?;
        }
        Ok(())
    }
}

impl DatasetStore for FsDatasetStore {
    fn read_production(&self) -> Result<DatasetSet, StoreError> {
        match self.current_version()? {
            Some(version) => self.read_dataset_dir(&self.versions_dir().join(version)),
            None => Ok(DatasetSet::new()),
        }
    }

    fn write_working(&self, run_id: Uuid, datasets: &DatasetSet) -> Result<(), StoreError> {
        self.write_dataset_dir(&self.working_dir(run_id), datasets)
    }

    fn discard_working(&self, run_id: Uuid) -> Result<(), StoreError> {
        let dir = self.working_dir(run_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::io(dir, source)),
        }
    }

    fn write_backup(&self, stamp: &str, datasets: &DatasetSet) -> Result<(), StoreError> {
        let dir = self.backup_dir(stamp);
        if dir.exists() {
            return Err(StoreError::BackupExists {
                stamp: stamp.to_string(),
            });
        }

        let mut row_counts = BTreeMap::new();
        let mut checksums = BTreeMap::new();
        for dataset in datasets.iter() {
            let path = dir.join(dataset.kind().file_name());
            let bytes = serialize_records(dataset.records())
                .map_err(|source| StoreError::io(&path, source.into()))?;
            atomic_write(&path, &bytes)?;
            row_counts.insert(dataset.kind(), dataset.len());
            checksums.insert(dataset.kind(), sha256_hex(&bytes));
        }

        // The manifest lands last; its presence marks the backup complete.
        let manifest = BackupManifest {
            created_at: Utc::now(),
            row_counts,
            checksums,
        };
        let manifest_path = dir.join(MANIFEST_FILE);
        let bytes = serde_json::to_vec_pretty(&manifest)
            .map_err(|source| StoreError::io(&manifest_path, source.into()))?;
        atomic_write(&manifest_path, &bytes)?;
        tracing::info!(stamp, records = datasets.total_records(), "backup written");
        Ok(())
    }

    fn verify_backup(
        &self,
        stamp: &str,
        expected: &BTreeMap<DatasetKind, usize>,
    ) -> Result<(), StoreError> {
        let dir = self.backup_dir(stamp);
        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest: BackupManifest = match fs::read(&manifest_path) {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|source| StoreError::Malformed {
                    path: manifest_path.clone(),
                    source,
                })?
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::BackupMissing {
                    stamp: stamp.to_string(),
                })
            }
            Err(source) => return Err(StoreError::io(manifest_path, source)),
        };

        for kind in DatasetKind::all() {
            let path = dir.join(kind.file_name());
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    return Err(StoreError::BackupMissing {
                        stamp: stamp.to_string(),
                    })
                }
                Err(source) => return Err(StoreError::io(path, source)),
            };
            let records: Vec<Record> =
                serde_json::from_slice(&bytes).map_err(|source| StoreError::Malformed {
                    path: path.clone(),
                    source,
                })?;
            if let Some(&expected_count) = expected.get(&kind) {
                if records.len() != expected_count {
                    return Err(StoreError::BackupCountMismatch {
                        stamp: stamp.to_string(),
                        dataset: kind,
                        expected: expected_count,
                        found: records.len(),
                    });
                }
            }
            let matches = manifest
                .checksums
                .get(&kind)
                .is_some_and(|recorded| *recorded == sha256_hex(&bytes));
            if !matches {
                return Err(StoreError::BackupChecksumMismatch {
                    stamp: stamp.to_string(),
                    dataset: kind,
                });
            }
        }
        Ok(())
    }

    fn read_backup(&self, stamp: &str) -> Result<DatasetSet, StoreError> {
        let dir = self.backup_dir(stamp);
        if !dir.is_dir() {
            return Err(StoreError::BackupMissing {
                stamp: stamp.to_string(),
            });
        }
        self.read_dataset_dir(&dir)
    }

    fn list_backups(&self) -> Result<Vec<String>, StoreError> {
        let dir = self.root.join("backups");
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::io(dir, source)),
        };
        let mut stamps = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::io(&dir, source))?;
            if entry.path().is_dir() {
                stamps.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        stamps.sort();
        Ok(stamps)
    }

    fn swap_production(&self, datasets: &DatasetSet) -> Result<(), StoreError> {
        let previous = self.current_version()?;
        let version = Uuid::now_v7().to_string();
        self.write_dataset_dir(&self.versions_dir().join(&version), datasets)?;
        atomic_write(&self.pointer_path(), format!("{version}\n").as_bytes())?;
        tracing::info!(%version, records = datasets.total_records(), "production pointer swapped");

        if let Some(previous) = previous {
            let displaced = self.versions_dir().join(&previous);
            if let Err(err) = fs::remove_dir_all(&displaced) {
                if err.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(
                        path = %displaced.display(),
                        error = %err,
                        "failed to prune displaced production version"
                    );
                }
            }
        }
        Ok(())
    }
}

fn serialize_records(records: &[Record]) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec_pretty(records)?;
    bytes.push(b'\n');
    Ok(bytes)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Writes bytes to a sibling temp file, fsyncs, then renames into place.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::io(path, io::Error::other("path has no parent")))?;
    fs::create_dir_all(parent).map_err(|source| StoreError::io(parent, source))?;

    let name = path
        .file_name()
        .map_or_else(|| "data".to_string(), |n| n.to_string_lossy().into_owned());
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos());
    let tmp = parent.join(format!(".{name}.tmp.{}.{nanos}", std::process::id()));

    if let Err(source) = write_then_rename(&tmp, path, bytes) {
        let _ = fs::remove_file(&tmp);
        return Err(StoreError::io(path, source));
    }
    if let Ok(dir) = fs::File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

fn write_then_rename(tmp: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(tmp)?;
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_all()?;
    fs::rename(tmp, path)
}
