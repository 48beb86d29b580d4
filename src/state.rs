//! Persisted run state: watermark date, per-table row counts, last-run stamp.
//!
//! The dataset has no cross-table incremental timestamp, so the watermark is
//! advisory bookkeeping owned by the orchestrator; the transformation core
//! never reads it.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunState {
    #[serde(default)]
    pub since: Option<NaiveDate>,
    #[serde(default)]
    pub row_counts: BTreeMap<String, u64>,
    #[serde(default)]
    pub last_run_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed state file: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Reads the state file; a missing file is an empty state, not an error.
pub fn read_state(path: &Path) -> Result<RunState, StateError> {
    if !path.exists() {
        return Ok(RunState::default());
    }
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

/// Writes the state, stamping `last_run_utc` at write time.
pub fn write_state(path: &Path, state: &RunState) -> Result<(), StateError> {
    let mut stamped = state.clone();
    stamped.last_run_utc = Some(Utc::now());

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(&stamped)?)?;
    Ok(())
}
