// src/backup/snapshot.rs

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf};

/// `YYYYMMDD_HHMMSS_micros`, all fixed width so that string order is time order.
static SNAPSHOT_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{8})_(\d{6})_(\d{6})$").unwrap());

/// Identifier of a snapshot, derived from its UTC capture time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(String);

impl SnapshotId {
    pub fn from_time(at: DateTime<Utc>) -> Self {
        SnapshotId(format!(
            "{}_{:06}",
            at.format("%Y%m%d_%H%M%S"),
            at.timestamp_subsec_micros()
        ))
    }

    /// Parse a bare id. Returns `None` unless the text is a well-formed,
    /// valid timestamp.
    pub fn parse(s: &str) -> Option<Self> {
        let id = SnapshotId(s.to_string());
        id.captured_at().map(|_| id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        let caps = SNAPSHOT_ID.captures(&self.0)?;
        let date = NaiveDate::parse_from_str(&caps[1], "%Y%m%d").ok()?;
        let micros: u32 = caps[3].parse().ok()?;
        let time = NaiveTime::parse_from_str(&caps[2], "%H%M%S")
            .ok()?
            .with_nanosecond(micros * 1_000)?;
        Some(date.and_time(time).and_utc())
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A snapshot file present in the backup directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotInfo {
    pub id: SnapshotId,
    pub path: PathBuf,
    pub captured_at: DateTime<Utc>,
    pub size: u64,
}

/// Outcome of [`super::BackupManager::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot {
    Captured(SnapshotInfo),
    /// The store file does not exist yet; nothing to copy.
    NoSource,
}

impl Snapshot {
    pub fn id(&self) -> Option<&SnapshotId> {
        match self {
            Snapshot::Captured(info) => Some(&info.id),
            Snapshot::NoSource => None,
        }
    }

    pub fn into_info(self) -> Option<SnapshotInfo> {
        match self {
            Snapshot::Captured(info) => Some(info),
            Snapshot::NoSource => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PruneReport {
    pub deleted: usize,
    pub bytes_freed: u64,
}
