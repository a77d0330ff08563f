// src/repository/dedupe.rs

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    str::FromStr,
};

use crate::error::{Result, StoreError};
use crate::table::Table;

/// 1-based id of a duplicate group within one proposal.
pub type GroupId = usize;

/// `Forceful` removes every duplicate at once; `Soft` only proposes the
/// groups and waits for the caller to approve them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupeMode {
    Forceful,
    Soft,
}

impl DedupeMode {
    pub fn as_str(&self) -> &str {
        match self {
            DedupeMode::Forceful => "forceful",
            DedupeMode::Soft => "soft",
        }
    }
}

impl fmt::Display for DedupeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DedupeMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "forceful" => Ok(DedupeMode::Forceful),
            "soft" => Ok(DedupeMode::Soft),
            other => Err(format!("unknown dedupe mode `{}` (use forceful or soft)", other)),
        }
    }
}

/// Rows that agree on the duplicate key. `keep` is the first-seen row; the
/// rest are removal candidates. Indices refer to store row order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub id: GroupId,
    pub key: Vec<String>,
    pub keep: usize,
    pub duplicates: Vec<usize>,
}

/// Phase one of a soft dedupe. `fingerprint` pins the store content the
/// groups were computed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupeProposal {
    pub fingerprint: String,
    pub groups: Vec<DuplicateGroup>,
}

impl DedupeProposal {
    /// Number of rows a full approval would remove.
    pub fn duplicate_count(&self) -> usize {
        self.groups.iter().map(|g| g.duplicates.len()).sum()
    }

    /// Row indices to drop for the `approved` groups (all groups if `None`).
    pub fn rows_to_drop(&self, approved: Option<&[GroupId]>) -> Result<BTreeSet<usize>> {
        let mut rows = BTreeSet::new();
        match approved {
            None => {
                for g in &self.groups {
                    rows.extend(g.duplicates.iter().copied());
                }
            }
            Some(ids) => {
                for id in ids {
                    let group = self
                        .groups
                        .iter()
                        .find(|g| g.id == *id)
                        .ok_or(StoreError::UnknownGroup(*id))?;
                    rows.extend(group.duplicates.iter().copied());
                }
            }
        }
        Ok(rows)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum DedupeOutcome {
    /// Forceful pass: rows already removed and persisted.
    Removed { removed: usize },
    /// Soft pass: nothing persisted yet.
    Proposed { proposal: DedupeProposal },
}

/// Group rows of `table` by the rendered values of `key_columns`. Only
/// groups with at least one duplicate are returned, ordered by their first
/// row.
pub fn find_groups(table: &Table, key_columns: &[usize]) -> Vec<DuplicateGroup> {
    let mut slots: HashMap<Vec<String>, usize> = HashMap::new();
    let mut groups: Vec<(Vec<String>, usize, Vec<usize>)> = Vec::new();

    for (idx, row) in table.rows().iter().enumerate() {
        let key: Vec<String> = key_columns.iter().map(|&c| row[c].to_string()).collect();
        match slots.get(&key) {
            Some(&slot) => groups[slot].2.push(idx),
            None => {
                slots.insert(key.clone(), groups.len());
                groups.push((key, idx, Vec::new()));
            }
        }
    }

    groups
        .into_iter()
        .filter(|(_, _, dups)| !dups.is_empty())
        .enumerate()
        .map(|(i, (key, keep, duplicates))| DuplicateGroup {
            id: i + 1,
            key,
            keep,
            duplicates,
        })
        .collect()
}
