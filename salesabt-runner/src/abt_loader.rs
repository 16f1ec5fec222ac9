//! Loads the ABT table from SQLite into a validated [`Dataset`].
//!
//! SQLite is dynamically typed, so column types are inferred from the stored
//! values: a column holding any text becomes a `String` column, otherwise it
//! becomes `Float64`. NULL is preserved as a polars null.

use polars::prelude::*;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use salesabt_core::{AbtSchema, Dataset, DatasetError};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("column '{0}' holds binary data")]
    UnsupportedBlob(String),

    #[error("table '{0}' is empty")]
    EmptyTable(String),

    #[error("dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("polars error: {0}")]
    Polars(#[from] PolarsError),
}

enum Cell {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

/// Read every row of `table` into a frame.
pub fn read_table(conn: &Connection, table: &str) -> Result<DataFrame, LoadError> {
    let mut stmt = conn.prepare(&format!("SELECT * FROM \"{}\"", table.replace('"', "\"\"")))?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut cells: Vec<Vec<Cell>> = names.iter().map(|_| Vec::new()).collect();

    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        for (j, column) in cells.iter_mut().enumerate() {
            let cell = match row.get_ref(j)? {
                ValueRef::Null => Cell::Null,
                ValueRef::Integer(v) => Cell::Int(v),
                ValueRef::Real(v) => Cell::Real(v),
                ValueRef::Text(bytes) => Cell::Text(String::from_utf8_lossy(bytes).into_owned()),
                ValueRef::Blob(_) => return Err(LoadError::UnsupportedBlob(names[j].clone())),
            };
            column.push(cell);
        }
    }

    let columns: Vec<Column> = names
        .iter()
        .zip(cells)
        .map(|(name, values)| to_column(name, values))
        .collect();
    Ok(DataFrame::new(columns)?)
}

fn to_column(name: &str, values: Vec<Cell>) -> Column {
    let has_text = values.iter().any(|c| matches!(c, Cell::Text(_)));
    if has_text {
        let strings: Vec<Option<String>> = values
            .into_iter()
            .map(|c| match c {
                Cell::Null => None,
                Cell::Int(v) => Some(v.to_string()),
                Cell::Real(v) => Some(v.to_string()),
                Cell::Text(s) => Some(s),
            })
            .collect();
        Column::new(name.into(), strings)
    } else {
        let numbers: Vec<Option<f64>> = values
            .into_iter()
            .map(|c| match c {
                Cell::Int(v) => Some(v as f64),
                Cell::Real(v) => Some(v),
                Cell::Null | Cell::Text(_) => None,
            })
            .collect();
        Column::new(name.into(), numbers)
    }
}

/// Read and validate the ABT named in `schema`.
pub fn load_abt(conn: &Connection, schema: &AbtSchema) -> Result<Dataset, LoadError> {
    let frame = read_table(conn, &schema.table)?;
    if frame.height() == 0 {
        return Err(LoadError::EmptyTable(schema.table.clone()));
    }
    info!(
        table = %schema.table,
        rows = frame.height(),
        columns = frame.width(),
        "loaded ABT"
    );
    Ok(Dataset::from_frame(frame, schema)?)
}

/// Open the database at `path` and load the ABT.
pub fn load_abt_from_path(path: &Path, schema: &AbtSchema) -> Result<Dataset, LoadError> {
    let conn = Connection::open(path)?;
    load_abt(&conn, schema)
}
