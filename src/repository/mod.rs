// src/repository/mod.rs

pub mod dedupe;

pub use dedupe::{
    find_groups, DedupeMode, DedupeOutcome, DedupeProposal, DuplicateGroup, GroupId,
};

use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

use crate::backup::{BackupManager, SnapshotId};
use crate::config::{PrimaryKey, StoreConfig};
use crate::error::{Result, StoreError};
use crate::fsutil;
use crate::table::{self, Row, Schema, Table, Value};

/// Result of a mutation that reached disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Snapshot of the store as it was right before this commit.
    pub snapshot: Option<SnapshotId>,
    pub rows: usize,
}

/// Sole owner of the persisted record table.
///
/// Reads never lock: every commit lands through a temp file + rename, so a
/// reader only ever sees a complete file. Mutations assume a single writer
/// and always snapshot the current file first; if the snapshot fails the
/// mutation does not happen.
pub struct CentralRepository {
    path: PathBuf,
    schema: Schema,
    primary_key: PrimaryKey,
    duplicate_columns: Vec<usize>,
    delimiter: u8,
    backups: BackupManager,
}

impl CentralRepository {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let schema = config.schema();
        let duplicate_columns = config
            .duplicate_key
            .resolve(&schema, &config.primary_key)?;
        Ok(Self {
            path: config.store_path(),
            schema,
            primary_key: config.primary_key.clone(),
            duplicate_columns,
            delimiter: config.delimiter_byte()?,
            backups: BackupManager::new(config.store_path(), config.backup_dir()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn primary_key(&self) -> &PrimaryKey {
        &self.primary_key
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// The full persisted table; an empty table with the configured schema
    /// if the store file does not exist yet.
    pub fn read(&self) -> Result<Table> {
        if !self.exists() {
            debug!(path = %self.path.display(), "store file absent, returning empty table");
            return Ok(Table::empty(self.schema.clone()));
        }
        table::read_table(&self.path, &self.schema, self.delimiter)
    }

    pub fn row_count(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    /// Replace the whole store with `table`.
    pub fn write(&self, table: &Table) -> Result<CommitReceipt> {
        if table.schema() != &self.schema {
            return Err(StoreError::SchemaMismatch(format!(
                "table columns [{}] differ from store columns [{}]",
                table.schema().names().join(", "),
                self.schema.names().join(", ")
            )));
        }
        self.commit(table)
    }

    /// Append `batch` after the current rows. `batch` may carry a subset of
    /// the store columns (missing ones become empty) but must include both
    /// primary-key columns, and every column it carries must exist in the
    /// store with the same type. Returns `None` when `batch` has no rows.
    #[instrument(level = "info", skip(self, batch), fields(rows = batch.len()))]
    pub fn append(&self, batch: &Table) -> Result<Option<CommitReceipt>> {
        let rows = self.conform(batch)?;
        if rows.is_empty() {
            info!("nothing to append");
            return Ok(None);
        }

        let mut current = self.read()?;
        let added = rows.len();
        current.extend_unchecked(rows);
        let receipt = self.commit(&current)?;
        info!(added, total = receipt.rows, "appended rows to store");
        Ok(Some(receipt))
    }

    /// Map `batch` rows into store column order, validating compatibility.
    fn conform(&self, batch: &Table) -> Result<Vec<Row>> {
        let mut mapping = Vec::with_capacity(batch.schema().len());
        for col in batch.schema().columns() {
            let target = self.schema.index_of(&col.name).ok_or_else(|| {
                StoreError::SchemaMismatch(format!(
                    "column `{}` is not part of the store schema",
                    col.name
                ))
            })?;
            let expected = self.schema.columns()[target].ty;
            if expected != col.ty {
                return Err(StoreError::SchemaMismatch(format!(
                    "column `{}` is {} in the store, {} in the batch",
                    col.name, expected, col.ty
                )));
            }
            mapping.push(target);
        }
        for key in self.primary_key.columns() {
            if batch.schema().index_of(key).is_none() {
                return Err(StoreError::SchemaMismatch(format!(
                    "primary key column `{}` missing from batch",
                    key
                )));
            }
        }

        let group_idx = self.schema.index_of(&self.primary_key.group_column);
        let pos_idx = self.schema.index_of(&self.primary_key.position_column);

        let mut out = Vec::with_capacity(batch.len());
        for (n, src) in batch.rows().iter().enumerate() {
            let mut row = vec![Value::Null; self.schema.len()];
            for (value, &target) in src.iter().zip(&mapping) {
                row[target] = value.clone();
            }
            let group_ok = group_idx
                .and_then(|i| row[i].as_text())
                .map_or(false, |s| !s.trim().is_empty());
            let pos_ok = pos_idx.map_or(false, |i| !row[i].is_null());
            if !group_ok || !pos_ok {
                return Err(StoreError::SchemaMismatch(format!(
                    "batch row {} has an empty primary key",
                    n + 1
                )));
            }
            out.push(row);
        }
        Ok(out)
    }

    /// Phase one (soft) or the whole pass (forceful).
    #[instrument(level = "info", skip(self))]
    pub fn deduplicate(&self, mode: DedupeMode) -> Result<DedupeOutcome> {
        match mode {
            DedupeMode::Forceful => {
                let proposal = self.propose_duplicates()?;
                let removed = self.remove_duplicates(&proposal, None)?;
                Ok(DedupeOutcome::Removed { removed })
            }
            DedupeMode::Soft => {
                let proposal = self.propose_duplicates()?;
                info!(
                    groups = proposal.groups.len(),
                    candidates = proposal.duplicate_count(),
                    "duplicate groups proposed"
                );
                Ok(DedupeOutcome::Proposed { proposal })
            }
        }
    }

    /// Compute duplicate groups without changing anything.
    pub fn propose_duplicates(&self) -> Result<DedupeProposal> {
        let fingerprint = self.fingerprint()?;
        let table = self.read()?;
        let groups = find_groups(&table, &self.duplicate_columns);
        for g in &groups {
            debug!(group = g.id, keep = g.keep, duplicates = ?g.duplicates, "duplicate group");
        }
        Ok(DedupeProposal {
            fingerprint,
            groups,
        })
    }

    /// Phase two of a soft dedupe: remove the duplicates of the `approved`
    /// groups (all groups when `None`). Fails with `StaleProposal` if the
    /// store changed since `proposal` was computed.
    #[instrument(level = "info", skip(self, proposal))]
    pub fn commit_duplicates(
        &self,
        proposal: &DedupeProposal,
        approved: Option<&[GroupId]>,
    ) -> Result<usize> {
        self.remove_duplicates(proposal, approved)
    }

    fn remove_duplicates(
        &self,
        proposal: &DedupeProposal,
        approved: Option<&[GroupId]>,
    ) -> Result<usize> {
        if self.fingerprint()? != proposal.fingerprint {
            warn!("store changed since duplicates were proposed");
            return Err(StoreError::StaleProposal);
        }
        let drop = proposal.rows_to_drop(approved)?;
        if drop.is_empty() {
            info!("no duplicates to remove");
            return Ok(0);
        }

        let mut table = self.read()?;
        let before = table.len();
        table.retain_indices(|i| !drop.contains(&i));
        let removed = before - table.len();
        self.commit(&table)?;
        info!(removed, remaining = table.len(), "duplicates removed");
        Ok(removed)
    }

    /// SHA-256 of the store file; empty when the store does not exist.
    fn fingerprint(&self) -> Result<String> {
        if !self.exists() {
            return Ok(String::new());
        }
        fsutil::sha256_file(&self.path)
    }

    /// Write the store (or a projection onto `columns`) to a workbook.
    #[instrument(level = "info", skip(self, path, columns), fields(path = %path.as_ref().display()))]
    pub fn export(&self, path: impl AsRef<Path>, columns: Option<&[String]>) -> Result<PathBuf> {
        let path = path.as_ref();
        let table = self.read()?;
        if table.is_empty() {
            warn!("store is empty, exporting header only");
        }
        let table = match columns {
            Some(cols) => table.project(cols)?,
            None => table,
        };
        table::write_workbook(path, &table)?;
        info!(rows = table.len(), "exported store");
        Ok(path.to_path_buf())
    }

    /// Snapshot, then atomically replace the store with `table`.
    fn commit(&self, table: &Table) -> Result<CommitReceipt> {
        // 1) a missing store is materialized empty so its prior state is snapshotted too
        let created = !self.exists();
        if created {
            let empty = Table::empty(self.schema.clone());
            fsutil::write_atomic(&self.path, |f| {
                table::write_table(f, &empty, self.delimiter)
            })?;
            debug!(path = %self.path.display(), "initialized empty store");
        }

        // 2) no backup, no write; a store created in step 1 is taken back
        let snapshot = match self.backups.snapshot() {
            Ok(s) => s,
            Err(e) => {
                if created {
                    if let Err(rm) = fs::remove_file(&self.path) {
                        warn!(path = %self.path.display(), "could not remove new empty store: {}", rm);
                    }
                }
                return Err(e);
            }
        };

        // 3) temp file + rename
        fsutil::write_atomic(&self.path, |f| table::write_table(f, table, self.delimiter))?;

        Ok(CommitReceipt {
            snapshot: snapshot.id().cloned(),
            rows: table.len(),
        })
    }
}
