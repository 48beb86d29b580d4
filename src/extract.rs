//! Whole-table extraction from the source database into frames.
//!
//! The dataset carries no reliable cross-table incremental timestamp, so
//! extraction is always full-table with an optional row limit; the watermark
//! is bookkeeping for the orchestrator, never a filter here.

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::info;

use crate::config::EtlConfig;
use crate::frame::{ColumnSpec, ColumnType, Frame, FrameError, Value};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("source table does not exist: {0}")]
    MissingTable(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

pub fn extract_applications(conn: &Connection, cfg: &EtlConfig) -> Result<Frame, ExtractError> {
    extract_table(conn, &cfg.applications_table, cfg.row_limit)
}

pub fn extract_previous_applications(
    conn: &Connection,
    cfg: &EtlConfig,
) -> Result<Frame, ExtractError> {
    extract_table(conn, &cfg.previous_applications_table, cfg.row_limit)
}

pub fn extract_installments(conn: &Connection, cfg: &EtlConfig) -> Result<Frame, ExtractError> {
    extract_table(conn, &cfg.installments_table, cfg.row_limit)
}

/// Reads an entire table into a frame. A missing table is a hard failure
/// (upstream fatal), unlike the per-column degradation inside the transform.
pub fn extract_table(
    conn: &Connection,
    table: &str,
    limit: Option<u64>,
) -> Result<Frame, ExtractError> {
    if !table_exists(conn, table)? {
        return Err(ExtractError::MissingTable(table.to_string()));
    }

    let columns = declared_columns(conn, table)?;
    let sql = match limit {
        Some(n) => format!("SELECT * FROM \"{table}\" LIMIT {n}"),
        None => format!("SELECT * FROM \"{table}\""),
    };

    let mut stmt = conn.prepare(&sql)?;
    let column_count = stmt.column_count();
    let mut frame = Frame::new(columns);

    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut cells = Vec::with_capacity(column_count);
        for idx in 0..column_count {
            cells.push(match row.get_ref(idx)? {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(v) => Value::Int(v),
                ValueRef::Real(v) => Value::Real(v),
                ValueRef::Text(bytes) => {
                    Value::Text(String::from_utf8_lossy(bytes).into_owned())
                }
                // Blobs have no meaning in this pipeline; treat as missing.
                ValueRef::Blob(_) => Value::Null,
            });
        }
        frame.push_row(cells)?;
    }

    info!(
        component = "extract",
        event = "extract.table.finish",
        table = table,
        rows = frame.len(),
        limit = ?limit
    );

    Ok(frame)
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool, ExtractError> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1 LIMIT 1",
            params![table],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    Ok(exists)
}

/// Column specs from the declared SQLite types, in table order. SQLite typing
/// is dynamic, so cells are still read by their stored type; the declared
/// type only seeds the frame schema.
fn declared_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnSpec>, ExtractError> {
    let pragma = format!("PRAGMA table_info(\"{table}\")");
    let mut stmt = conn.prepare(&pragma)?;
    let mut rows = stmt.query([])?;

    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        let decl: String = row.get(2)?;
        columns.push(ColumnSpec::new(name, dtype_from_decl(&decl)));
    }
    Ok(columns)
}

fn dtype_from_decl(decl: &str) -> ColumnType {
    let upper = decl.to_ascii_uppercase();
    if upper.contains("INT") {
        ColumnType::Integer
    } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
        ColumnType::Real
    } else {
        ColumnType::Text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory sqlite");
        conn.execute_batch(
            "
            CREATE TABLE applications (
                client_id INTEGER NOT NULL,
                income_total REAL,
                contract_type TEXT
            );
            INSERT INTO applications VALUES (1, 100000.0, 'Cash loans');
            INSERT INTO applications VALUES (2, NULL, NULL);
            INSERT INTO applications VALUES (3, 55000.5, 'Revolving loans');
            ",
        )
        .expect("seed schema");
        conn
    }

    #[test]
    fn extracts_declared_schema_and_typed_cells() {
        let conn = seeded_conn();
        let frame = extract_table(&conn, "applications", None).expect("extract succeeds");

        assert_eq!(frame.len(), 3);
        assert_eq!(frame.columns()[0].dtype, ColumnType::Integer);
        assert_eq!(frame.columns()[1].dtype, ColumnType::Real);
        assert_eq!(frame.columns()[2].dtype, ColumnType::Text);
        assert_eq!(frame.rows()[0][0], Value::Int(1));
        assert_eq!(frame.rows()[1][1], Value::Null);
        assert_eq!(
            frame.rows()[2][2],
            Value::Text("Revolving loans".to_string())
        );
    }

    #[test]
    fn limit_caps_extracted_rows() {
        let conn = seeded_conn();
        let frame = extract_table(&conn, "applications", Some(2)).expect("extract succeeds");
        assert_eq!(frame.len(), 2);
    }

    #[test]
    fn missing_table_is_a_hard_failure() {
        let conn = Connection::open_in_memory().expect("open in-memory sqlite");
        let err = extract_table(&conn, "nope", None).expect_err("must fail");
        assert!(matches!(err, ExtractError::MissingTable(name) if name == "nope"));
    }
}
