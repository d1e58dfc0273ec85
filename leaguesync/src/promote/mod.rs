//! Backup-then-swap promotion of working data into production.
//!
//! Promotion is strictly ordered: take a timestamped backup of current
//! production, verify it against the live counts and checksums, and only
//! then swap the production pointer to the new data. A failed backup
//! aborts with production untouched; a failed swap names the backup to
//! restore from.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::errors::PromotionError;
use crate::record::{DatasetKind, DatasetSet};
use crate::store::{DatasetStore, StoreError};
use crate::util::backup_stamp;

/// Description of the verified backup a promotion produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSnapshot {
    /// The backup's stamp, usable with restore.
    pub stamp: String,
    /// Records per dataset the backup holds.
    pub counts: BTreeMap<DatasetKind, usize>,
    /// When the backup was taken.
    pub created_at: DateTime<Utc>,
}

/// Performs backup-verified promotions and restores against a store.
pub struct PromotionManager {
    store: Arc<dyn DatasetStore>,
}

impl PromotionManager {
    /// Creates a manager over the given store.
    pub fn new(store: Arc<dyn DatasetStore>) -> Self {
        Self { store }
    }

    /// Promotes working data to production.
    ///
    /// Backs up and verifies the current production data first; if any
    /// of that fails, production is left exactly as it was. Returns the
    /// backup snapshot taken before the swap.
    pub fn promote(&self, working: &DatasetSet) -> Result<BackupSnapshot, PromotionError> {
        let production = self
            .store
            .read_production()
            .map_err(|source| PromotionError::BackupFailed { source })?;
        let counts = production.counts();
        let created_at = Utc::now();

        let mut stamp = backup_stamp(&created_at);
        let mut attempt = 1;
        loop {
            match self.store.write_backup(&stamp, &production) {
                Ok(()) => break,
                Err(StoreError::BackupExists { .. }) if attempt < 3 => {
                    attempt += 1;
                    stamp = format!("{}-{attempt}", backup_stamp(&created_at));
                }
                Err(source) => return Err(PromotionError::BackupFailed { source }),
            }
        }
        self.store
            .verify_backup(&stamp, &counts)
            .map_err(|source| PromotionError::BackupFailed { source })?;
        tracing::info!(
            %stamp,
            records = production.total_records(),
            "pre-promotion backup verified"
        );

        self.store
            .swap_production(working)
            .map_err(|source| PromotionError::SwapFailed {
                backup_stamp: stamp.clone(),
                source,
            })?;
        tracing::info!(
            records = working.total_records(),
            "working datasets promoted to production"
        );

        Ok(BackupSnapshot {
            stamp,
            counts,
            created_at,
        })
    }

    /// Restores production from a backup.
    ///
    /// With no stamp, the most recent backup is used. Returns the stamp
    /// that was restored.
    pub fn restore(&self, stamp: Option<&str>) -> Result<String, PromotionError> {
        let stamp = match stamp {
            Some(stamp) => stamp.to_string(),
            None => self
                .store
                .list_backups()
                .map_err(|source| PromotionError::RestoreFailed {
                    stamp: "latest".to_string(),
                    source,
                })?
                .pop()
                .ok_or_else(|| PromotionError::RestoreFailed {
                    stamp: "latest".to_string(),
                    source: StoreError::BackupMissing {
                        stamp: "latest".to_string(),
                    },
                })?,
        };

        let datasets = self
            .store
            .read_backup(&stamp)
            .map_err(|source| PromotionError::RestoreFailed {
                stamp: stamp.clone(),
                source,
            })?;
        self.store
            .swap_production(&datasets)
            .map_err(|source| PromotionError::RestoreFailed {
                stamp: stamp.clone(),
                source,
            })?;
        tracing::info!(%stamp, "production restored from backup");
        Ok(stamp)
    }
}
