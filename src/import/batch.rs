// src/import/batch.rs

use calamine::Data;
use chrono::{NaiveDate, NaiveDateTime};
use std::fmt;

/// A raw spreadsheet cell, before coercion to a column type.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
    /// Formula error such as `#DIV/0!`.
    Error(String),
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Int(i) => Cell::Int(*i),
            Data::Float(f) => Cell::Float(*f),
            Data::Bool(b) => Cell::Bool(*b),
            Data::DateTime(dt) => match dt.as_datetime() {
                Some(ndt) if dt.is_datetime() => Cell::DateTime(ndt),
                _ => Cell::Float(dt.as_f64()),
            },
            Data::DateTimeIso(s) => parse_iso(s)
                .map(Cell::DateTime)
                .unwrap_or_else(|| Cell::Text(s.clone())),
            Data::Error(e) => Cell::Error(format!("{e:?}")),
            other => Cell::Text(other.to_string()),
        }
    }
}

fn parse_iso(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

impl fmt::Display for Cell {
    /// The raw value as it would be shown in an error message.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Empty => Ok(()),
            Cell::Text(s) => f.write_str(s),
            Cell::Int(i) => write!(f, "{}", i),
            Cell::Float(v) => write!(f, "{}", v),
            Cell::Bool(b) => write!(f, "{}", b),
            Cell::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
            Cell::Error(e) => f.write_str(e),
        }
    }
}

/// One data row of the source sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    /// 1-based row number in the sheet, for error reporting.
    pub line: usize,
    /// Aligned with [`ImportBatch::header`]; short rows are padded with `Empty`.
    pub cells: Vec<Cell>,
}

/// Everything read from one spreadsheet source. Lives for a single import call.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportBatch {
    /// Name used in error messages and as the default order code stem.
    pub source_name: String,
    pub header: Vec<String>,
    pub rows: Vec<SourceRow>,
}

impl ImportBatch {
    /// Position of the first header cell named `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_calamine_cells() {
        assert_eq!(Cell::from(&Data::Empty), Cell::Empty);
        assert_eq!(Cell::from(&Data::String("ORDER001".into())), Cell::Text("ORDER001".into()));
        assert_eq!(Cell::from(&Data::Float(2.5)), Cell::Float(2.5));
        assert_eq!(Cell::from(&Data::Int(7)), Cell::Int(7));
        assert_eq!(Cell::from(&Data::Bool(true)), Cell::Bool(true));
        assert_eq!(
            Cell::from(&Data::DateTimeIso("2024-05-01T08:30:00".into())),
            Cell::DateTime(
                NaiveDate::from_ymd_opt(2024, 5, 1)
                    .unwrap()
                    .and_hms_opt(8, 30, 0)
                    .unwrap()
            )
        );
    }

    #[test]
    fn whitespace_text_counts_as_empty() {
        assert!(Cell::Text("   ".into()).is_empty());
        assert!(!Cell::Int(0).is_empty());
    }
}
