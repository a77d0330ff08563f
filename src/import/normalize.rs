// src/import/normalize.rs

use chrono::{Duration, NaiveDate, NaiveDateTime};
use tracing::debug;

use super::batch::{Cell, ImportBatch};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::table::{Column, ColumnType, Row, Schema, Table, Value};

/// Date text layouts accepted in date columns, tried in order.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d/%m/%Y %H:%M:%S"];

/// Largest serial Excel can display (9999-12-31).
const MAX_EXCEL_SERIAL: f64 = 2_958_465.0;

/// Batch restricted to the accepted columns, with typed cells. `lines[i]` is
/// the sheet row number of `table.rows()[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub source_name: String,
    pub table: Table,
    pub lines: Vec<usize>,
}

/// Restrict `batch` to the configured columns (optionally narrowed further to
/// `accepted`), in store order, and coerce every cell to its column type.
///
/// Primary-key columns are always kept, even when absent from the sheet;
/// they are filled in by the identify stage. Any other requested or required
/// column missing from the header fails the batch with `MissingColumns`. A
/// single bad cell fails the whole batch.
pub fn normalize(
    batch: &ImportBatch,
    config: &StoreConfig,
    accepted: Option<&[String]>,
) -> Result<Normalized> {
    let schema = config.schema();
    let pk = &config.primary_key;

    if let Some(names) = accepted {
        schema.indices_of(names)?;
    }
    let wanted = |name: &str| {
        pk.contains(name)
            || accepted.map_or(true, |a| a.iter().any(|n| n == name))
    };

    // 1) every required or explicitly requested non-key column must be in the header
    let missing: Vec<String> = config
        .columns
        .iter()
        .filter(|c| !pk.contains(&c.name))
        .filter(|c| c.required || accepted.map_or(false, |a| a.contains(&c.name)))
        .filter(|c| batch.column_index(&c.name).is_none())
        .map(|c| c.name.clone())
        .collect();
    if !missing.is_empty() {
        return Err(StoreError::MissingColumns(missing));
    }

    // 2) pick output columns in store order; sheet index is None for derived key columns
    let mut columns = Vec::new();
    let mut sources = Vec::new();
    for col in schema.columns() {
        let src = batch.column_index(&col.name);
        if wanted(&col.name) && (src.is_some() || pk.contains(&col.name)) {
            columns.push(Column::new(col.name.clone(), col.ty));
            sources.push(src);
        }
    }

    let dropped: Vec<&str> = batch
        .header
        .iter()
        .map(String::as_str)
        .filter(|h| !h.is_empty() && !columns.iter().any(|c| c.name == *h))
        .collect();
    if !dropped.is_empty() {
        debug!(source = %batch.source_name, ?dropped, "dropping columns outside the accepted set");
    }

    // 3) coerce
    let mut rows: Vec<Row> = Vec::with_capacity(batch.rows.len());
    let mut lines = Vec::with_capacity(batch.rows.len());
    for src_row in &batch.rows {
        let mut row = Vec::with_capacity(columns.len());
        for (col, src) in columns.iter().zip(&sources) {
            let Some(i) = *src else {
                row.push(Value::Null);
                continue;
            };
            let cell = &src_row.cells[i];
            let value = coerce(cell, col.ty).ok_or_else(|| StoreError::InvalidCellValue {
                source_name: batch.source_name.clone(),
                row: src_row.line,
                column: col.name.clone(),
                value: cell.to_string(),
            })?;
            row.push(value);
        }
        rows.push(row);
        lines.push(src_row.line);
    }

    Ok(Normalized {
        source_name: batch.source_name.clone(),
        table: Table::new(Schema::new(columns), rows)?,
        lines,
    })
}

/// Convert `cell` to a value of type `ty`; `None` if it cannot be.
pub fn coerce(cell: &Cell, ty: ColumnType) -> Option<Value> {
    if cell.is_empty() {
        return Some(Value::Null);
    }
    match ty {
        ColumnType::Text => as_text(cell).map(Value::Text),
        ColumnType::Integer => as_integer(cell).map(Value::Integer),
        ColumnType::Float => as_float(cell).map(Value::Float),
        ColumnType::Date => as_date(cell).map(Value::Date),
    }
}

fn as_text(cell: &Cell) -> Option<String> {
    match cell {
        Cell::Text(s) => Some(s.clone()),
        Cell::Int(i) => Some(i.to_string()),
        Cell::Float(f) => Some(match integral(*f) {
            Some(i) => i.to_string(),
            None => f.to_string(),
        }),
        Cell::Bool(b) => Some(b.to_string()),
        Cell::DateTime(dt) if dt.time() == chrono::NaiveTime::MIN => {
            Some(dt.date().format("%Y-%m-%d").to_string())
        }
        Cell::DateTime(dt) => Some(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
        Cell::Empty | Cell::Error(_) => None,
    }
}

fn as_integer(cell: &Cell) -> Option<i64> {
    match cell {
        Cell::Int(i) => Some(*i),
        Cell::Float(f) => integral(*f),
        Cell::Text(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral))
        }
        _ => None,
    }
}

fn as_float(cell: &Cell) -> Option<f64> {
    match cell {
        Cell::Int(i) => Some(*i as f64),
        Cell::Float(f) => Some(*f),
        Cell::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn as_date(cell: &Cell) -> Option<NaiveDate> {
    match cell {
        Cell::DateTime(dt) => Some(dt.date()),
        Cell::Int(i) => from_excel_serial(*i as f64),
        Cell::Float(f) => from_excel_serial(*f),
        Cell::Text(s) => {
            let s = s.trim();
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                .or_else(|| {
                    DATETIME_FORMATS
                        .iter()
                        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                        .map(|dt| dt.date())
                })
        }
        _ => None,
    }
}

/// `f` as an integer if it has no fractional part and fits in `i64`.
fn integral(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15).then(|| f as i64)
}

/// Excel day serial (1900 date system) to a calendar date.
fn from_excel_serial(serial: f64) -> Option<NaiveDate> {
    if !(1.0..=MAX_EXCEL_SERIAL).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::days(serial.trunc() as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::batch::SourceRow;

    fn batch(header: &[&str], rows: Vec<Vec<Cell>>) -> ImportBatch {
        ImportBatch {
            source_name: "orders_jan".into(),
            header: header.iter().map(|s| s.to_string()).collect(),
            rows: rows
                .into_iter()
                .enumerate()
                .map(|(i, cells)| SourceRow { line: i + 2, cells })
                .collect(),
        }
    }

    fn text(s: &str) -> Cell {
        Cell::Text(s.into())
    }

    #[test]
    fn keeps_store_order_and_drops_unknown_columns() {
        let b = batch(
            &["quantity", "colore", "codiceMateriale"],
            vec![vec![Cell::Float(10.0), text("rosso"), text("MAT001")]],
        );
        let n = normalize(&b, &StoreConfig::default(), None).unwrap();
        assert_eq!(
            n.table.schema().names(),
            vec!["orderCode", "idOrderPos", "codiceMateriale", "quantity"]
        );
        assert_eq!(
            n.table.rows()[0],
            vec![
                Value::Null,
                Value::Null,
                Value::Text("MAT001".into()),
                Value::Integer(10)
            ]
        );
        assert_eq!(n.lines, vec![2]);
    }

    #[test]
    fn accepted_columns_narrow_and_must_exist() {
        let b = batch(
            &["descrizioneMateriale", "codiceMateriale", "quantity"],
            vec![vec![text("Material A"), text("MAT001"), Cell::Int(3)]],
        );
        let cfg = StoreConfig::default();

        let only = vec!["quantity".to_string()];
        let n = normalize(&b, &cfg, Some(&only)).unwrap();
        assert_eq!(n.table.schema().names(), vec!["orderCode", "idOrderPos", "quantity"]);

        let unknown = vec!["colore".to_string()];
        assert!(matches!(
            normalize(&b, &cfg, Some(&unknown)),
            Err(StoreError::UnknownColumn(c)) if c == "colore"
        ));
    }

    #[test]
    fn missing_required_columns_are_listed() {
        let mut cfg = StoreConfig::default();
        for c in cfg.columns.iter_mut() {
            if c.name == "codiceMateriale" || c.name == "quantity" {
                c.required = true;
            }
        }
        let b = batch(&["descrizioneMateriale"], vec![vec![text("Material A")]]);
        match normalize(&b, &cfg, None) {
            Err(StoreError::MissingColumns(cols)) => {
                assert_eq!(cols, vec!["codiceMateriale", "quantity"])
            }
            other => panic!("unexpected: {:?}", other),
        }

        // a requested column absent from the sheet is missing too
        let wanted = vec!["quantity".to_string()];
        assert!(matches!(
            normalize(&b, &StoreConfig::default(), Some(&wanted)),
            Err(StoreError::MissingColumns(_))
        ));
    }

    #[test]
    fn one_bad_cell_fails_the_batch() {
        let b = batch(
            &["codiceMateriale", "quantity"],
            vec![
                vec![text("MAT001"), Cell::Int(1)],
                vec![text("MAT002"), text("tanti")],
            ],
        );
        match normalize(&b, &StoreConfig::default(), None) {
            Err(StoreError::InvalidCellValue {
                source_name,
                row,
                column,
                value,
            }) => {
                assert_eq!(source_name, "orders_jan");
                assert_eq!(row, 3);
                assert_eq!(column, "quantity");
                assert_eq!(value, "tanti");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn coercion_rules() {
        assert_eq!(coerce(&Cell::Float(10.0), ColumnType::Text), Some(Value::Text("10".into())));
        assert_eq!(coerce(&Cell::Float(2.5), ColumnType::Text), Some(Value::Text("2.5".into())));
        assert_eq!(coerce(&Cell::Bool(true), ColumnType::Text), Some(Value::Text("true".into())));
        assert_eq!(coerce(&text(" 42 "), ColumnType::Integer), Some(Value::Integer(42)));
        assert_eq!(coerce(&text("42.0"), ColumnType::Integer), Some(Value::Integer(42)));
        assert_eq!(coerce(&Cell::Float(2.5), ColumnType::Integer), None);
        assert_eq!(coerce(&Cell::Bool(true), ColumnType::Integer), None);
        assert_eq!(coerce(&Cell::Int(3), ColumnType::Float), Some(Value::Float(3.0)));
        assert_eq!(coerce(&Cell::Error("Div0".into()), ColumnType::Float), None);
        assert_eq!(coerce(&text("   "), ColumnType::Integer), Some(Value::Null));

        let d = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        for raw in ["2024-03-15", "15/03/2024", "2024/03/15", "2024-03-15 10:20:00"] {
            assert_eq!(coerce(&text(raw), ColumnType::Date), Some(Value::Date(d)), "{raw}");
        }
        assert_eq!(coerce(&Cell::Float(45366.0), ColumnType::Date), Some(Value::Date(d)));
        assert_eq!(coerce(&text("marzo"), ColumnType::Date), None);
        assert_eq!(coerce(&Cell::Bool(false), ColumnType::Date), None);
    }
}
