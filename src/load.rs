//! Replace-contents load of a frame into the target database.
//!
//! Each run drops and recreates the destination table from the frame schema,
//! inserts in chunked transactions, and indexes key columns for downstream
//! joins. Nulls in the frame become SQL NULLs.

use std::path::Path;

use rusqlite::{params_from_iter, Connection};
use thiserror::Error;
use tracing::info;

use crate::frame::{ColumnSpec, ColumnType, Frame, Value};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot load a frame with no columns into table {0}")]
    EmptySchema(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Opens (creating parent directories if needed) a SQLite database for
/// writing, with the pragmas every store connection in this crate uses.
pub fn open_database(path: &Path) -> Result<Connection, LoadError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    conn.execute_batch(
        "
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        PRAGMA temp_store=MEMORY;
        ",
    )?;
    Ok(conn)
}

/// Replaces the full contents of `table` with `frame`. Returns the number of
/// rows written. Residual non-finite values are nulled here as well, so the
/// target never stores an infinity regardless of what produced the frame.
pub fn load_frame(
    conn: &mut Connection,
    table: &str,
    frame: &Frame,
    chunk_size: usize,
) -> Result<u64, LoadError> {
    if frame.columns().is_empty() {
        return Err(LoadError::EmptySchema(table.to_string()));
    }

    let mut frame = frame.clone();
    frame.replace_non_finite_with_null();

    conn.execute_batch(&format!("DROP TABLE IF EXISTS \"{table}\";"))?;
    conn.execute_batch(&create_table_ddl(table, frame.columns()))?;

    let insert_sql = insert_sql(table, frame.columns());
    let chunk_size = chunk_size.max(1);
    let mut written = 0u64;

    for chunk in frame.rows().chunks(chunk_size) {
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&insert_sql)?;
            for row in chunk {
                stmt.execute(params_from_iter(row.iter().map(sql_value)))?;
                written += 1;
            }
        }
        tx.commit()?;
    }

    add_key_indexes(conn, table, frame.columns())?;

    info!(
        component = "load",
        event = "load.table.finish",
        table = table,
        rows = written,
        columns = frame.columns().len(),
        chunk_size = chunk_size
    );

    Ok(written)
}

fn create_table_ddl(table: &str, columns: &[ColumnSpec]) -> String {
    let body: Vec<String> = columns
        .iter()
        .map(|spec| format!("\"{}\" {}", spec.name, sql_type(spec.dtype)))
        .collect();
    format!("CREATE TABLE \"{table}\" ({});", body.join(", "))
}

fn insert_sql(table: &str, columns: &[ColumnSpec]) -> String {
    let names: Vec<String> = columns
        .iter()
        .map(|spec| format!("\"{}\"", spec.name))
        .collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|idx| format!("?{idx}")).collect();
    format!(
        "INSERT INTO \"{table}\" ({}) VALUES ({})",
        names.join(", "),
        placeholders.join(", ")
    )
}

fn sql_type(dtype: ColumnType) -> &'static str {
    match dtype {
        ColumnType::Integer => "INTEGER",
        ColumnType::Real => "REAL",
        ColumnType::Text => "TEXT",
    }
}

fn sql_value(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Int(v) => rusqlite::types::Value::Integer(*v),
        Value::Real(v) => rusqlite::types::Value::Real(*v),
        Value::Text(v) => rusqlite::types::Value::Text(v.clone()),
        Value::Null => rusqlite::types::Value::Null,
    }
}

/// Indexes every `*_id` column, mirroring the staging loader's key-column
/// convention so client/previous-application lookups stay cheap.
pub(crate) fn add_key_indexes(
    conn: &Connection,
    table: &str,
    columns: &[ColumnSpec],
) -> Result<(), LoadError> {
    for spec in columns {
        if spec.name.ends_with("_id") {
            conn.execute_batch(&format!(
                "CREATE INDEX IF NOT EXISTS \"idx_{table}_{name}\" ON \"{table}\"(\"{name}\");",
                name = spec.name
            ))?;
        }
    }
    Ok(())
}
