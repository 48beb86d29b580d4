//! CSV staging loader: seeds the source database from raw CSV exports.
//!
//! One table per CSV file, named by a slug of the filename. Column types are
//! inferred from a bounded sample of records, inserts run in chunked
//! transactions, and files whose table already holds rows are skipped so
//! reruns are cheap. The data-dictionary export is never staged.

use std::fs;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use thiserror::Error;
use tracing::info;

use crate::frame::{ColumnSpec, ColumnType};
use crate::load::{add_key_indexes, LoadError};

const DATA_DICTIONARY_SLUG: &str = "columns_description";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingConfig {
    pub chunk_size: usize,
    pub sample_rows: usize,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 50_000,
            sample_rows: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedTable {
    pub table: String,
    pub rows: u64,
    pub skipped: bool,
}

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("no CSV files found in {0}")]
    NoCsvFiles(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Filename (or header) to table/column slug: lowercased, runs of
/// non-alphanumerics collapsed to a single underscore.
pub fn slug_name(raw: &str) -> String {
    let stem = match raw.rsplit_once('.') {
        Some((stem, ext)) if ext.eq_ignore_ascii_case("csv") => stem,
        _ => raw,
    };
    let mut out = String::with_capacity(stem.len());
    for ch in stem.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

/// Stages every `*.csv` in `dir`, in sorted filename order.
pub fn stage_csv_dir(
    conn: &mut Connection,
    dir: &Path,
    cfg: &StagingConfig,
) -> Result<Vec<StagedTable>, StagingError> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .map(|ext| ext.eq_ignore_ascii_case("csv"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(StagingError::NoCsvFiles(dir.to_path_buf()));
    }

    let mut staged = Vec::new();
    for path in files {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let table = slug_name(&file_name);

        if table.contains(DATA_DICTIONARY_SLUG) {
            info!(
                component = "staging",
                event = "staging.file.skipped",
                file = %file_name,
                reason = "data_dictionary"
            );
            continue;
        }

        if table_has_data(conn, &table)? {
            info!(
                component = "staging",
                event = "staging.table.skipped",
                table = table,
                reason = "already_populated"
            );
            staged.push(StagedTable {
                table,
                rows: 0,
                skipped: true,
            });
            continue;
        }

        let rows = stage_csv_file(conn, &path, &table, cfg)?;
        staged.push(StagedTable {
            table,
            rows,
            skipped: false,
        });
    }

    Ok(staged)
}

/// Stages one CSV file into `table`, replacing any existing definition.
pub fn stage_csv_file(
    conn: &mut Connection,
    path: &Path,
    table: &str,
    cfg: &StagingConfig,
) -> Result<u64, StagingError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(slug_name).collect();
    let columns = infer_columns(&mut reader, &headers, cfg.sample_rows)?;

    conn.execute_batch(&format!("DROP TABLE IF EXISTS \"{table}\";"))?;
    let ddl_body: Vec<String> = columns
        .iter()
        .map(|spec| {
            let sql_type = match spec.dtype {
                ColumnType::Integer => "INTEGER",
                ColumnType::Real => "REAL",
                ColumnType::Text => "TEXT",
            };
            format!("\"{}\" {sql_type}", spec.name)
        })
        .collect();
    conn.execute_batch(&format!(
        "CREATE TABLE \"{table}\" ({});",
        ddl_body.join(", ")
    ))?;

    let names: Vec<String> = columns
        .iter()
        .map(|spec| format!("\"{}\"", spec.name))
        .collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|idx| format!("?{idx}")).collect();
    let insert_sql = format!(
        "INSERT INTO \"{table}\" ({}) VALUES ({})",
        names.join(", "),
        placeholders.join(", ")
    );

    // Second pass streams the whole file in insert chunks.
    let mut reader = csv::Reader::from_path(path)?;
    let chunk_size = cfg.chunk_size.max(1);
    let mut buffer: Vec<Vec<rusqlite::types::Value>> = Vec::with_capacity(chunk_size);
    let mut written = 0u64;

    for record in reader.records() {
        let record = record?;
        buffer.push(staged_row(&record, &columns));
        if buffer.len() >= chunk_size {
            written += insert_chunk(conn, &insert_sql, &buffer)?;
            buffer.clear();
        }
    }
    if !buffer.is_empty() {
        written += insert_chunk(conn, &insert_sql, &buffer)?;
    }

    add_key_indexes(conn, table, &columns)?;

    info!(
        component = "staging",
        event = "staging.table.finish",
        table = table,
        rows = written,
        columns = columns.len()
    );

    Ok(written)
}

fn infer_columns(
    reader: &mut csv::Reader<fs::File>,
    headers: &[String],
    sample_rows: usize,
) -> Result<Vec<ColumnSpec>, StagingError> {
    let mut saw_value = vec![false; headers.len()];
    let mut all_int = vec![true; headers.len()];
    let mut all_real = vec![true; headers.len()];

    for record in reader.records().take(sample_rows) {
        let record = record?;
        for (idx, raw) in record.iter().enumerate().take(headers.len()) {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            saw_value[idx] = true;
            if trimmed.parse::<i64>().is_err() {
                all_int[idx] = false;
                if trimmed.parse::<f64>().is_err() {
                    all_real[idx] = false;
                }
            }
        }
    }

    Ok(headers
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let dtype = if !saw_value[idx] {
                ColumnType::Text
            } else if all_int[idx] {
                ColumnType::Integer
            } else if all_real[idx] {
                ColumnType::Real
            } else {
                ColumnType::Text
            };
            ColumnSpec::new(name.clone(), dtype)
        })
        .collect())
}

fn staged_row(record: &StringRecord, columns: &[ColumnSpec]) -> Vec<rusqlite::types::Value> {
    columns
        .iter()
        .enumerate()
        .map(|(idx, spec)| staged_value(record.get(idx).unwrap_or_default(), spec.dtype))
        .collect()
}

/// One CSV cell to a SQL value. Empty cells are nulls; values that fail the
/// inferred type degrade per-cell (SQLite columns carry mixed storage).
fn staged_value(raw: &str, dtype: ColumnType) -> rusqlite::types::Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return rusqlite::types::Value::Null;
    }
    match dtype {
        ColumnType::Integer => {
            if let Ok(v) = trimmed.parse::<i64>() {
                return rusqlite::types::Value::Integer(v);
            }
            if let Ok(v) = trimmed.parse::<f64>() {
                return rusqlite::types::Value::Real(v);
            }
            rusqlite::types::Value::Text(trimmed.to_string())
        }
        ColumnType::Real => {
            if let Ok(v) = trimmed.parse::<f64>() {
                return rusqlite::types::Value::Real(v);
            }
            rusqlite::types::Value::Text(trimmed.to_string())
        }
        ColumnType::Text => rusqlite::types::Value::Text(trimmed.to_string()),
    }
}

fn insert_chunk(
    conn: &mut Connection,
    insert_sql: &str,
    rows: &[Vec<rusqlite::types::Value>],
) -> Result<u64, StagingError> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(insert_sql)?;
        for row in rows {
            stmt.execute(params_from_iter(row.iter().cloned()))?;
        }
    }
    tx.commit()?;
    Ok(rows.len() as u64)
}

fn table_has_data(conn: &Connection, table: &str) -> Result<bool, StagingError> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1 LIMIT 1",
            params![table],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if !exists {
        return Ok(false);
    }

    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM \"{table}\""),
        [],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn slug_collapses_punctuation_and_case() {
        assert_eq!(slug_name("POS_CASH_balance.csv"), "pos_cash_balance");
        assert_eq!(slug_name("previous application.csv"), "previous_application");
        assert_eq!(slug_name("__weird--Name__"), "weird_name");
    }

    #[test]
    fn slug_strips_the_extension_regardless_of_case() {
        assert_eq!(slug_name("DATA.CSV"), "data");
        assert_eq!(slug_name("Bureau.Csv"), "bureau");
        assert_eq!(slug_name("notes.txt"), "notes_txt");
    }

    fn write_csv(dir: &Path, name: &str, body: &str) {
        let mut file = fs::File::create(dir.join(name)).unwrap();
        file.write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn stages_with_inferred_types_and_null_empties() {
        let dir = tempdir().unwrap();
        write_csv(
            dir.path(),
            "applications.csv",
            "client_id,income_total,contract_type\n1,100000.5,Cash loans\n2,,\n3,55000,Revolving loans\n",
        );

        let mut conn = Connection::open_in_memory().unwrap();
        let staged = stage_csv_dir(&mut conn, dir.path(), &StagingConfig::default()).unwrap();

        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].table, "applications");
        assert_eq!(staged[0].rows, 3);
        assert!(!staged[0].skipped);

        let income: Option<f64> = conn
            .query_row(
                "SELECT income_total FROM applications WHERE client_id = 2",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(income, None);

        let kind: String = conn
            .query_row(
                "SELECT contract_type FROM applications WHERE client_id = 3",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(kind, "Revolving loans");
    }

    #[test]
    fn rerun_skips_already_populated_tables() {
        let dir = tempdir().unwrap();
        write_csv(dir.path(), "installments.csv", "prev_id,days_instalment\n10,5\n");

        let mut conn = Connection::open_in_memory().unwrap();
        stage_csv_dir(&mut conn, dir.path(), &StagingConfig::default()).unwrap();
        let second = stage_csv_dir(&mut conn, dir.path(), &StagingConfig::default()).unwrap();

        assert_eq!(second.len(), 1);
        assert!(second[0].skipped);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM installments", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn data_dictionary_export_is_never_staged() {
        let dir = tempdir().unwrap();
        write_csv(dir.path(), "HomeCredit_columns_description.csv", "a,b\n1,2\n");
        write_csv(dir.path(), "installments.csv", "prev_id\n10\n");

        let mut conn = Connection::open_in_memory().unwrap();
        let staged = stage_csv_dir(&mut conn, dir.path(), &StagingConfig::default()).unwrap();

        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].table, "installments");
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempdir().unwrap();
        let mut conn = Connection::open_in_memory().unwrap();
        let err = stage_csv_dir(&mut conn, dir.path(), &StagingConfig::default()).unwrap_err();
        assert!(matches!(err, StagingError::NoCsvFiles(_)));
    }

    #[test]
    fn id_columns_are_indexed() {
        let dir = tempdir().unwrap();
        write_csv(dir.path(), "installments.csv", "prev_id,days_instalment\n10,5\n");

        let mut conn = Connection::open_in_memory().unwrap();
        stage_csv_dir(&mut conn, dir.path(), &StagingConfig::default()).unwrap();

        let index_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name='idx_installments_prev_id'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(index_count, 1);
    }
}
