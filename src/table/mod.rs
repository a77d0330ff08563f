pub mod delimited;
pub mod types;
pub mod workbook;

pub use delimited::{read_table, write_table};
pub use types::{Column, ColumnType, Row, Schema, Table, Value};
pub use workbook::write_workbook;
