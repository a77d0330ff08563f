// src/import/identify.rs

use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    fmt,
    path::Path,
};

use super::normalize::Normalized;
use crate::config::PrimaryKey;
use crate::error::{Result, StoreError};
use crate::table::{Table, Value};

/// Composite identifier of an imported row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId {
    pub order_code: String,
    pub position: i64,
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.order_code, self.position)
    }
}

/// Default order code for rows that carry none: the file stem of
/// `original_name` when given, else of `path`.
pub fn default_order_code(path: &Path, original_name: Option<&str>) -> String {
    let name = original_name.map(Path::new).unwrap_or(path);
    name.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Fill in missing key cells and return every row's identifier, in row order.
///
/// Empty group cells get `default_group`. Empty position cells get, per
/// group in source order, the smallest positive integer not yet used in
/// that group, explicit positions included. The result depends only on the
/// source content, so the same file always yields the same identifiers.
pub fn assign_identifiers(
    normalized: Normalized,
    pk: &PrimaryKey,
    default_group: &str,
) -> Result<(Table, Vec<RecordId>)> {
    let Normalized {
        source_name,
        table,
        lines,
    } = normalized;
    let schema = table.schema().clone();
    let missing_key = |name: &str| {
        StoreError::SchemaMismatch(format!("batch has no primary key column `{}`", name))
    };
    let g = schema
        .index_of(&pk.group_column)
        .ok_or_else(|| missing_key(&pk.group_column))?;
    let p = schema
        .index_of(&pk.position_column)
        .ok_or_else(|| missing_key(&pk.position_column))?;

    if default_group.trim().is_empty() {
        return Err(StoreError::UnreadableSource {
            path: source_name.clone().into(),
            reason: "cannot derive an order code from an empty file name".into(),
        });
    }

    let mut rows = table.into_rows();

    // 1) groups, and the explicit positions already taken in each
    let mut taken: HashMap<String, HashSet<i64>> = HashMap::new();
    for (row, &line) in rows.iter_mut().zip(&lines) {
        let group = match row[g].as_text().map(str::trim) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => default_group.to_string(),
        };
        row[g] = Value::Text(group.clone());

        let used = taken.entry(group).or_default();
        if let Some(pos) = row[p].as_integer() {
            if pos < 1 {
                return Err(StoreError::InvalidCellValue {
                    source_name,
                    row: line,
                    column: pk.position_column.clone(),
                    value: pos.to_string(),
                });
            }
            used.insert(pos);
        }
    }

    // 2) smallest free position per group
    let mut next: HashMap<String, i64> = HashMap::new();
    let mut ids = Vec::with_capacity(rows.len());
    for row in rows.iter_mut() {
        let group = row[g].as_text().unwrap_or_default().to_string();
        let position = match row[p].as_integer() {
            Some(pos) => pos,
            None => {
                let used = taken.entry(group.clone()).or_default();
                let cursor = next.entry(group.clone()).or_insert(1);
                while used.contains(&*cursor) {
                    *cursor += 1;
                }
                let pos = *cursor;
                used.insert(pos);
                row[p] = Value::Integer(pos);
                pos
            }
        };
        ids.push(RecordId {
            order_code: group,
            position,
        });
    }

    Ok((Table::new(schema, rows)?, ids))
}
