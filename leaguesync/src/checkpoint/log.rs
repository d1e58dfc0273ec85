//! Checkpoint log backends.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use uuid::Uuid;

use super::{Checkpoint, CheckpointStatus};
use crate::pipeline::Stage;

/// Errors raised by checkpoint log backends.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Reading or writing the log file failed.
    #[error("Checkpoint log I/O failed at '{path}': {source}")]
    Io {
        /// The log path involved.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A log line did not parse as a checkpoint.
    #[error("Checkpoint log '{path}' is malformed at line {line}: {source}")]
    Malformed {
        /// The log path involved.
        path: PathBuf,
        /// The 1-based offending line number.
        line: usize,
        /// The underlying parse error.
        source: serde_json::Error,
    },
}

/// Append-only store of run checkpoints.
///
/// Entries are returned in append order; the log is never rewritten.
pub trait CheckpointLog: Send + Sync {
    /// Appends one checkpoint.
    fn append(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// The history of one run, ordered by sequence number (stable over
    /// append order for entries that share one).
    fn history(&self, run_id: Uuid) -> Result<Vec<Checkpoint>, CheckpointError>;

    /// One digest per recorded run, in order of first appearance.
    fn runs(&self) -> Result<Vec<RunDigest>, CheckpointError>;
}

/// A per-run summary derived from the log.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RunDigest {
    /// The run id.
    pub run_id: Uuid,
    /// Stage of the run's most recent checkpoint.
    pub last_stage: Stage,
    /// Status of the run's most recent checkpoint.
    pub last_status: CheckpointStatus,
    /// When the most recent checkpoint was recorded.
    pub recorded_at: DateTime<Utc>,
    /// Number of checkpoints the run has logged.
    pub entries: usize,
}

impl std::fmt::Display for RunDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "run {}: {} checkpoints, last {} {} at {}",
            self.run_id, self.entries, self.last_stage, self.last_status, self.recorded_at
        )
    }
}

fn digest_runs(checkpoints: &[Checkpoint]) -> Vec<RunDigest> {
    let mut digests: Vec<RunDigest> = Vec::new();
    let mut index: HashMap<Uuid, usize> = HashMap::new();
    for checkpoint in checkpoints {
        if let Some(&at) = index.get(&checkpoint.run_id) {
            let digest = &mut digests[at];
            digest.last_stage = checkpoint.stage;
            digest.last_status = checkpoint.status;
            digest.recorded_at = checkpoint.recorded_at;
            digest.entries += 1;
        } else {
            index.insert(checkpoint.run_id, digests.len());
            digests.push(RunDigest {
                run_id: checkpoint.run_id,
                last_stage: checkpoint.stage,
                last_status: checkpoint.status,
                recorded_at: checkpoint.recorded_at,
                entries: 1,
            });
        }
    }
    digests
}

/// File-backed checkpoint log: one JSON object per line, append-only.
#[derive(Debug)]
pub struct JsonlCheckpointLog {
    path: PathBuf,
    write_guard: Mutex<()>,
}

impl JsonlCheckpointLog {
    /// Creates a log backed by the given file path.
    ///
    /// The file and its parent directories are created on first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_guard: Mutex::new(()),
        }
    }

    /// The backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<Checkpoint>, CheckpointError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let mut checkpoints = Vec::new();
        for (number, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let checkpoint =
                serde_json::from_str(line).map_err(|source| CheckpointError::Malformed {
                    path: self.path.clone(),
                    line: number + 1,
                    source,
                })?;
            checkpoints.push(checkpoint);
        }
        Ok(checkpoints)
    }
}

impl CheckpointLog for JsonlCheckpointLog {
    fn append(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let _guard = self.write_guard.lock();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| CheckpointError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let line = serde_json::to_string(checkpoint).map_err(|source| CheckpointError::Io {
            path: self.path.clone(),
            source: source.into(),
        })?;
        let io_err = |source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        };
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        writeln!(file, "{line}").map_err(io_err)?;
        file.flush().map_err(io_err)?;
        Ok(())
    }

    fn history(&self, run_id: Uuid) -> Result<Vec<Checkpoint>, CheckpointError> {
        let mut history: Vec<Checkpoint> = self
            .read_all()?
            .into_iter()
            .filter(|checkpoint| checkpoint.run_id == run_id)
            .collect();
        history.sort_by_key(|checkpoint| checkpoint.sequence);
        Ok(history)
    }

    fn runs(&self) -> Result<Vec<RunDigest>, CheckpointError> {
        Ok(digest_runs(&self.read_all()?))
    }
}

/// In-memory checkpoint log for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryCheckpointLog {
    entries: RwLock<Vec<Checkpoint>>,
}

impl MemoryCheckpointLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded checkpoints, in append order.
    #[must_use]
    pub fn entries(&self) -> Vec<Checkpoint> {
        self.entries.read().clone()
    }
}

impl CheckpointLog for MemoryCheckpointLog {
    fn append(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        self.entries.write().push(checkpoint.clone());
        Ok(())
    }

    fn history(&self, run_id: Uuid) -> Result<Vec<Checkpoint>, CheckpointError> {
        let mut history: Vec<Checkpoint> = self
            .entries
            .read()
            .iter()
            .filter(|checkpoint| checkpoint.run_id == run_id)
            .cloned()
            .collect();
        history.sort_by_key(|checkpoint| checkpoint.sequence);
        Ok(history)
    }

    fn runs(&self) -> Result<Vec<RunDigest>, CheckpointError> {
        Ok(digest_runs(&self.entries.read()))
    }
}
