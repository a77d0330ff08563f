// src/import/parse.rs

use calamine::{open_workbook_auto, Data, Range, Reader};
use std::path::Path;
use tracing::{debug, warn};

use super::batch::{Cell, ImportBatch, SourceRow};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};

/// Reject files whose extension is not in the accepted set, before any I/O.
pub fn ensure_supported(path: &Path, config: &StoreConfig) -> Result<()> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    if ext.is_empty() || !config.accepts_extension(&ext) {
        return Err(StoreError::UnsupportedFileType {
            path: path.to_path_buf(),
            extension: ext,
        });
    }
    Ok(())
}

/// Read the first sheet of the workbook at `path`. The first non-empty row is
/// the header; fully empty rows are skipped.
pub fn read_workbook(path: &Path, source_name: &str) -> Result<ImportBatch> {
    let unreadable = |reason: String| StoreError::UnreadableSource {
        path: path.to_path_buf(),
        reason,
    };

    let mut workbook = open_workbook_auto(path).map_err(|e| unreadable(e.to_string()))?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| unreadable("workbook has no sheets".into()))?;
    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| unreadable(format!("sheet `{}`: {}", sheet, e)))?;
    debug!(sheet = %sheet, source = source_name, "reading first sheet");

    batch_from_range(&range, source_name).ok_or_else(|| unreadable("no header row".into()))
}

/// `None` when the range holds no non-empty row at all.
fn batch_from_range(range: &Range<Data>, source_name: &str) -> Option<ImportBatch> {
    let first_row = range.start().map(|(r, _)| r as usize).unwrap_or(0);

    let mut rows = range
        .rows()
        .enumerate()
        .map(|(i, cells)| (first_row + i + 1, cells.iter().map(Cell::from).collect::<Vec<_>>()))
        .filter(|(_, cells)| !cells.iter().all(Cell::is_empty));

    let (header_line, header_cells) = rows.next()?;
    let header: Vec<String> = header_cells
        .iter()
        .map(|c| c.to_string().trim().to_string())
        .collect();
    for (i, name) in header.iter().enumerate() {
        if !name.is_empty() && header[..i].contains(name) {
            warn!(column = %name, line = header_line, "repeated header, first occurrence wins");
        }
    }

    let width = header.len();
    let rows = rows
        .map(|(line, mut cells)| {
            cells.resize(width, Cell::Empty);
            SourceRow { line, cells }
        })
        .collect();

    Some(ImportBatch {
        source_name: source_name.to_string(),
        header,
        rows,
    })
}
