// src/table/delimited.rs

use csv::{ReaderBuilder, WriterBuilder};
use std::{
    fs::File,
    io::{self, BufReader, Write},
    path::Path,
};

use super::{Row, Schema, Table, Value};
use crate::error::{IoResultExt, Result, StoreError};

/// Load the persisted table at `path`. The header row must name exactly the
/// columns of `schema`, in order.
pub fn read_table(path: &Path, schema: &Schema, delimiter: u8) -> Result<Table> {
    let file = File::open(path).at_path(path)?;
    let mut rdr = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_reader(BufReader::new(file));

    let corrupt = |reason: String| StoreError::CorruptStore {
        path: path.to_path_buf(),
        reason,
    };

    // 1) header must match the configured column set exactly
    let headers = rdr
        .headers()
        .map_err(|e| corrupt(format!("reading header: {}", e)))?
        .clone();
    let found: Vec<&str> = headers.iter().collect();
    if found != schema.names() {
        return Err(StoreError::SchemaMismatch(format!(
            "store header [{}] does not match configured columns [{}]",
            found.join(", "),
            schema.names().join(", ")
        )));
    }

    // 2) decode each record against the column types
    let mut rows: Vec<Row> = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        let record = result.map_err(|e| corrupt(format!("record {}: {}", idx + 1, e)))?;
        let mut row = Vec::with_capacity(schema.len());
        for (raw, col) in record.iter().zip(schema.columns()) {
            let value = Value::decode(raw, col.ty).ok_or_else(|| {
                corrupt(format!(
                    "record {}: `{}` is not a valid {} for `{}`",
                    idx + 1,
                    raw,
                    col.ty,
                    col.name
                ))
            })?;
            row.push(value);
        }
        rows.push(row);
    }

    Table::new(schema.clone(), rows)
}

/// Serialize `table` (header + rows) to `writer`.
pub fn write_table<W: Write>(writer: W, table: &Table, delimiter: u8) -> io::Result<()> {
    let mut wtr = WriterBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .from_writer(writer);

    wtr.write_record(table.schema().names())?;
    for row in table.rows() {
        wtr.write_record(row.iter().map(|v| v.to_string()))?;
    }
    wtr.flush()?;
    Ok(())
}
