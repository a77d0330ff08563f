// src/backup/mod.rs

pub mod snapshot;

pub use snapshot::{PruneReport, Snapshot, SnapshotId, SnapshotInfo};

use chrono::{DateTime, Duration, SubsecRound, Utc};
use glob::{glob, Pattern};
use std::{
    fs::{self, File},
    io::{self, Seek, SeekFrom},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

use crate::error::{IoResultExt, Result, StoreError};
use crate::fsutil;

/// Timestamped copies of the store file under a backup directory.
///
/// Snapshot files are named `<store stem>_<YYYYMMDD>_<HHMMSS>_<micros>.<ext>`
/// in UTC. They are written once (temp file + no-clobber rename) and only
/// ever removed by [`BackupManager::prune`].
#[derive(Debug, Clone)]
pub struct BackupManager {
    source: PathBuf,
    backup_dir: PathBuf,
    stem: String,
    extension: String,
}

impl BackupManager {
    /// Does not touch the filesystem; the backup directory is created on the
    /// first snapshot.
    pub fn new(source: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        let source = source.into();
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "store".into());
        let extension = source
            .extension()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "csv".into());
        Self {
            source,
            backup_dir: backup_dir.into(),
            stem,
            extension,
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    fn file_name(&self, id: &SnapshotId) -> String {
        format!("{}_{}.{}", self.stem, id, self.extension)
    }

    /// Extract the id from a snapshot file name, or from a bare id.
    fn id_from_name(&self, name: &str) -> Option<SnapshotId> {
        let prefix = format!("{}_", self.stem);
        let suffix = format!(".{}", self.extension);
        let bare = name
            .strip_prefix(&prefix)
            .and_then(|s| s.strip_suffix(&suffix))
            .unwrap_or(name);
        SnapshotId::parse(bare)
    }

    /// Copy the current store file into the backup directory and verify the
    /// copy (size and SHA-256) before making it visible.
    #[instrument(level = "debug", skip(self), fields(source = %self.source.display()))]
    pub fn snapshot(&self) -> Result<Snapshot> {
        if !self.source.exists() {
            warn!("no store file to back up");
            return Ok(Snapshot::NoSource);
        }
        fs::create_dir_all(&self.backup_dir).at_path(&self.backup_dir)?;

        // 1) pick a capture time strictly after the newest existing snapshot,
        //    at the microsecond resolution the id keeps
        let mut at = Utc::now().trunc_subsecs(6);
        if let Some(latest) = self.latest()? {
            let floor = latest.captured_at + Duration::microseconds(1);
            if at < floor {
                at = floor;
            }
        }

        let expected_hash = fsutil::sha256_file(&self.source)?;
        let expected_size = fs::metadata(&self.source).at_path(&self.source)?.len();

        // 2) copy into a temp file, verify, then publish without clobbering
        loop {
            let id = SnapshotId::from_time(at);
            let path = self.backup_dir.join(self.file_name(&id));
            let mut input = File::open(&self.source).at_path(&self.source)?;

            let res = fsutil::create_atomic(&path, |f| {
                let copied = io::copy(&mut input, f)?;
                f.seek(SeekFrom::Start(0))?;
                let hash = fsutil::sha256_reader(&mut *f)?;
                if copied != expected_size || hash != expected_hash {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "snapshot verification failed",
                    ));
                }
                Ok(())
            });

            match res {
                Ok(()) => {
                    info!(snapshot = %id, bytes = expected_size, "snapshot created and verified");
                    return Ok(Snapshot::Captured(SnapshotInfo {
                        id,
                        path,
                        captured_at: at,
                        size: expected_size,
                    }));
                }
                Err(StoreError::StorageIo { source, .. })
                    if source.kind() == io::ErrorKind::AlreadyExists =>
                {
                    debug!(snapshot = %id, "name taken, advancing capture time");
                    at += Duration::microseconds(1);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// All snapshots, oldest first. Files that do not follow the naming
    /// scheme are ignored.
    pub fn list(&self) -> Result<Vec<SnapshotInfo>> {
        if !self.backup_dir.is_dir() {
            return Ok(Vec::new());
        }
        let pattern = format!(
            "{}/{}_*.{}",
            Pattern::escape(&self.backup_dir.to_string_lossy()),
            Pattern::escape(&self.stem),
            Pattern::escape(&self.extension)
        );

        let mut out = Vec::new();
        let entries = glob(&pattern).map_err(|e| {
            StoreError::io(
                &self.backup_dir,
                io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
            )
        })?;
        for entry in entries {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    warn!("cannot read backup entry: {}", e);
                    continue;
                }
            };
            if !path.is_file() {
                continue;
            }
            let id = match path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| self.id_from_name(n))
            {
                Some(id) => id,
                None => continue,
            };
            let captured_at = match id.captured_at() {
                Some(t) => t,
                None => continue,
            };
            let size = fs::metadata(&path).at_path(&path)?.len();
            out.push(SnapshotInfo {
                id,
                path,
                captured_at,
                size,
            });
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    pub fn latest(&self) -> Result<Option<SnapshotInfo>> {
        Ok(self.list()?.pop())
    }

    /// Look up a snapshot by id or by file name.
    pub fn find(&self, id: &str) -> Result<SnapshotInfo> {
        let wanted = self
            .id_from_name(id)
            .ok_or_else(|| StoreError::SnapshotNotFound(id.to_string()))?;
        self.list()?
            .into_iter()
            .find(|s| s.id == wanted)
            .ok_or_else(|| StoreError::SnapshotNotFound(id.to_string()))
    }

    /// Replace the store with the content of snapshot `id`. The current
    /// store is snapshotted first, so a restore can itself be undone; that
    /// safety snapshot is returned.
    #[instrument(level = "info", skip(self))]
    pub fn restore(&self, id: &str) -> Result<Option<SnapshotInfo>> {
        let target = self.find(id)?;
        let safety = self.snapshot()?.into_info();
        fsutil::copy_atomic(&target.path, &self.source)?;
        info!(snapshot = %target.id, "store restored");
        Ok(safety)
    }

    /// Delete snapshots older than `older_than`. The most recent snapshot is
    /// always kept.
    pub fn prune(&self, older_than: Duration) -> Result<PruneReport> {
        self.prune_at(older_than, Utc::now())
    }

    /// [`BackupManager::prune`] evaluated against an explicit clock.
    pub fn prune_at(&self, older_than: Duration, now: DateTime<Utc>) -> Result<PruneReport> {
        let snapshots = self.list()?;
        let mut report = PruneReport::default();

        let Some((_newest, rest)) = snapshots.split_last() else {
            info!("no backups to prune");
            return Ok(report);
        };

        for snap in rest {
            if now - snap.captured_at > older_than {
                fs::remove_file(&snap.path).at_path(&snap.path)?;
                report.deleted += 1;
                report.bytes_freed += snap.size;
                debug!(snapshot = %snap.id, "pruned");
            }
        }

        let freed_mb = report.bytes_freed as f64 / 1024.0 / 1024.0;
        info!(deleted = report.deleted, freed_mb, "pruned old backups");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, BackupManager) {
        let tmp = tempdir().unwrap();
        let source = tmp.path().join("central_db.csv");
        let mgr = BackupManager::new(&source, tmp.path().join("backups"));
        (tmp, mgr)
    }

    #[test]
    fn missing_source_is_not_an_error() {
        let (_tmp, mgr) = setup();
        assert_eq!(mgr.snapshot().unwrap(), Snapshot::NoSource);
        assert!(mgr.list().unwrap().is_empty());
    }

    #[test]
    fn snapshot_is_byte_identical() {
        let (_tmp, mgr) = setup();
        fs::write(mgr.source(), "orderCode,quantity\nORDER001,10\nORDER002,5\n").unwrap();

        let info = mgr.snapshot().unwrap().into_info().unwrap();
        assert_eq!(fs::read(&info.path).unwrap(), fs::read(mgr.source()).unwrap());
        assert!(info
            .path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("central_db_"));
        assert_eq!(mgr.list().unwrap(), vec![info]);
    }

    #[test]
    fn rapid_snapshots_get_distinct_ordered_ids() {
        let (_tmp, mgr) = setup();
        fs::write(mgr.source(), "a\n").unwrap();
        let ids: Vec<SnapshotId> = (0..5)
            .map(|_| mgr.snapshot().unwrap().id().cloned().unwrap())
            .collect();
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 5);
        let listed: Vec<SnapshotId> = mgr.list().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(listed, ids);
    }

    #[test]
    fn returned_info_matches_listed_info() {
        let (_tmp, mgr) = setup();
        fs::write(mgr.source(), "a\n").unwrap();
        let taken: Vec<SnapshotInfo> = (0..20)
            .map(|_| mgr.snapshot().unwrap().into_info().unwrap())
            .collect();
        for info in &taken {
            assert_eq!(info.id.captured_at(), Some(info.captured_at));
            assert_eq!(&mgr.find(info.id.as_str()).unwrap(), info);
        }
        assert_eq!(mgr.list().unwrap(), taken);
    }

    #[test]
    fn list_ignores_foreign_files() {
        let (_tmp, mgr) = setup();
        fs::write(mgr.source(), "a\n").unwrap();
        mgr.snapshot().unwrap();
        fs::write(mgr.backup_dir().join("notes.txt"), "x").unwrap();
        fs::write(mgr.backup_dir().join("central_db_garbage.csv"), "x").unwrap();
        fs::create_dir_all(mgr.backup_dir().join("central_db_20250101_000000_000000.csv"))
            .unwrap();
        assert_eq!(mgr.list().unwrap().len(), 1);
    }

    #[test]
    fn restore_unknown_id_fails() {
        let (_tmp, mgr) = setup();
        fs::write(mgr.source(), "a\n").unwrap();
        let err = mgr.restore("20200101_000000_000000").unwrap_err();
        assert!(matches!(err, StoreError::SnapshotNotFound(_)));
        let err = mgr.restore("yesterday").unwrap_err();
        assert!(matches!(err, StoreError::SnapshotNotFound(_)));
        assert_eq!(fs::read_to_string(mgr.source()).unwrap(), "a\n");
    }

    #[test]
    fn restore_brings_back_content_and_keeps_safety_copy() {
        let (_tmp, mgr) = setup();
        fs::write(mgr.source(), "v1\n").unwrap();
        let first = mgr.snapshot().unwrap().into_info().unwrap();
        fs::write(mgr.source(), "v2\n").unwrap();

        // accepts the file name as well as the bare id
        let name = first.path.file_name().unwrap().to_string_lossy().into_owned();
        let safety = mgr.restore(&name).unwrap().unwrap();

        assert_eq!(fs::read_to_string(mgr.source()).unwrap(), "v1\n");
        assert_eq!(fs::read_to_string(&safety.path).unwrap(), "v2\n");
        assert_eq!(mgr.list().unwrap().len(), 2);
    }

    #[test]
    fn prune_keeps_most_recent() {
        let (_tmp, mgr) = setup();
        fs::write(mgr.source(), "abc\n").unwrap();
        for _ in 0..4 {
            mgr.snapshot().unwrap();
        }
        let newest = mgr.latest().unwrap().unwrap();

        let later = Utc::now() + Duration::days(365);
        let report = mgr.prune_at(Duration::zero(), later).unwrap();
        assert_eq!(report.deleted, 3);
        assert_eq!(report.bytes_freed, 12);
        assert_eq!(mgr.list().unwrap(), vec![newest]);

        // a single remaining snapshot survives any threshold
        let report = mgr.prune_at(Duration::zero(), later).unwrap();
        assert_eq!(report, PruneReport::default());
        assert_eq!(mgr.list().unwrap().len(), 1);
    }

    #[test]
    fn prune_spares_recent_snapshots() {
        let (_tmp, mgr) = setup();
        fs::write(mgr.source(), "abc\n").unwrap();
        mgr.snapshot().unwrap();
        mgr.snapshot().unwrap();
        let report = mgr.prune(Duration::days(30)).unwrap();
        assert_eq!(report.deleted, 0);
        assert_eq!(mgr.list().unwrap().len(), 2);
    }

    #[test]
    fn prune_on_empty_backup_dir() {
        let (_tmp, mgr) = setup();
        assert_eq!(mgr.prune(Duration::days(1)).unwrap(), PruneReport::default());
    }
}
