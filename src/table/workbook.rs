// src/table/workbook.rs

use rust_xlsxwriter::{Format, Workbook};
use std::path::Path;

use super::{Table, Value};
use crate::error::{Result, StoreError};
use crate::fsutil;

/// Render `table` as a single-sheet workbook and write it to `path`
/// atomically. The header row is always written, even for an empty table.
pub fn write_workbook(path: &Path, table: &Table) -> Result<()> {
    let export_err = |reason: String| StoreError::Export {
        path: path.to_path_buf(),
        reason,
    };

    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let sheet = workbook.add_worksheet();

    for (c, col) in table.schema().columns().iter().enumerate() {
        let c = u16::try_from(c).map_err(|_| export_err("too many columns".into()))?;
        sheet
            .write_string_with_format(0, c, &col.name, &bold)
            .map_err(|e| export_err(e.to_string()))?;
    }

    for (r, row) in table.rows().iter().enumerate() {
        let r = u32::try_from(r + 1).map_err(|_| export_err("too many rows".into()))?;
        for (c, value) in row.iter().enumerate() {
            let c = u16::try_from(c).map_err(|_| export_err("too many columns".into()))?;
            let written = match value {
                Value::Null => continue,
                Value::Text(s) => sheet.write_string(r, c, s),
                Value::Integer(i) => sheet.write_number(r, c, *i as f64),
                Value::Float(f) => sheet.write_number(r, c, *f),
                // ISO text keeps the date readable and re-importable as-is
                Value::Date(d) => sheet.write_string(r, c, d.format("%Y-%m-%d").to_string()),
            };
            written.map_err(|e| export_err(e.to_string()))?;
        }
    }

    let buf = workbook
        .save_to_buffer()
        .map_err(|e| export_err(e.to_string()))?;
    fsutil::write_atomic(path, |f| std::io::Write::write_all(f, &buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Column, ColumnType, Schema};
    use calamine::{open_workbook_auto, Data, Reader};
    use tempfile::tempdir;

    #[test]
    fn header_and_cells_are_readable_back() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("out.xlsx");
        let schema = Schema::new(vec![
            Column::new("orderCode", ColumnType::Text),
            Column::new("quantity", ColumnType::Integer),
        ]);
        let table = Table::new(
            schema,
            vec![
                vec![Value::Text("ORDER001".into()), Value::Integer(10)],
                vec![Value::Text("ORDER002".into()), Value::Null],
            ],
        )
        .unwrap();

        write_workbook(&path, &table).unwrap();

        let mut wb = open_workbook_auto(&path).unwrap();
        let range = wb.worksheet_range_at(0).unwrap().unwrap();
        let rows: Vec<_> = range.rows().collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][0], Data::String("orderCode".into()));
        assert!(matches!(rows[1][1], Data::Float(f) if f == 10.0) || rows[1][1] == Data::Int(10));
        assert_eq!(rows[2][1], Data::Empty);
    }

    #[test]
    fn empty_table_still_gets_header() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("empty.xlsx");
        let table = Table::empty(Schema::new(vec![Column::new("orderCode", ColumnType::Text)]));
        write_workbook(&path, &table).unwrap();

        let mut wb = open_workbook_auto(&path).unwrap();
        let range = wb.worksheet_range_at(0).unwrap().unwrap();
        assert_eq!(range.get_size(), (1, 1));
    }
}
