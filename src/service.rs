// src/service.rs

use chrono::Duration;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::backup::{PruneReport, SnapshotId, SnapshotInfo};
use crate::config::StoreConfig;
use crate::error::Result;
use crate::import::{ImportOptions, ImportPipeline, ImportResult};
use crate::repository::{CentralRepository, DedupeMode, DedupeOutcome, DedupeProposal, GroupId};
use crate::table::Table;

/// Operations offered to the web and CLI layers. Each call is synchronous and
/// returns a structured result or a typed [`crate::StoreError`].
pub struct SisManager {
    config: StoreConfig,
    repository: CentralRepository,
}

impl SisManager {
    pub fn new(config: StoreConfig) -> Result<Self> {
        let repository = CentralRepository::new(&config)?;
        info!(
            store = %repository.path().display(),
            backups = %repository.backups().backup_dir().display(),
            "record store ready"
        );
        Ok(Self { config, repository })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn repository(&self) -> &CentralRepository {
        &self.repository
    }

    pub fn read(&self) -> Result<Table> {
        self.repository.read()
    }

    pub fn import(&self, source: impl AsRef<Path>, options: &ImportOptions) -> Result<ImportResult> {
        ImportPipeline::new(&self.repository, &self.config).run(source, options)
    }

    pub fn deduplicate(&self, mode: DedupeMode) -> Result<DedupeOutcome> {
        self.repository.deduplicate(mode)
    }

    /// Second phase of a soft dedupe; `approved` defaults to every group.
    pub fn commit_duplicates(
        &self,
        proposal: &DedupeProposal,
        approved: Option<&[GroupId]>,
    ) -> Result<usize> {
        self.repository.commit_duplicates(proposal, approved)
    }

    pub fn export(&self, path: impl AsRef<Path>, columns: Option<&[String]>) -> Result<PathBuf> {
        self.repository.export(path, columns)
    }

    /// Snapshot the store now; `None` when there is no store file yet.
    pub fn backup(&self) -> Result<Option<SnapshotId>> {
        Ok(self.repository.backups().snapshot()?.id().cloned())
    }

    pub fn restore(&self, snapshot_id: &str) -> Result<()> {
        self.repository.backups().restore(snapshot_id)?;
        Ok(())
    }

    /// Delete snapshots older than `older_than`, or than the configured
    /// retention when `None`.
    pub fn prune(&self, older_than: Option<Duration>) -> Result<PruneReport> {
        let older_than = older_than
            .unwrap_or_else(|| Duration::days(i64::from(self.config.backup_retention_days)));
        self.repository.backups().prune(older_than)
    }

    pub fn snapshots(&self) -> Result<Vec<SnapshotInfo>> {
        self.repository.backups().list()
    }
}
