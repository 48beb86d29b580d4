//! Run orchestration: extract the three raw tables, build the feature
//! relation, load it into the target, and persist run state. All blocking
//! I/O, retries, and backoff live here; the transform itself is pure.

use std::collections::BTreeMap;
use std::fmt::Display;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::EtlConfig;
use crate::extract::{
    extract_applications, extract_installments, extract_previous_applications, ExtractError,
};
use crate::load::{load_frame, open_database, LoadError};
use crate::state::{read_state, write_state, RunState, StateError};
use crate::transform::build_features;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("extract failed: {0}")]
    Extract(#[from] ExtractError),
    #[error("load failed: {0}")]
    Load(#[from] LoadError),
    #[error("state bookkeeping failed: {0}")]
    State(#[from] StateError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub since: Option<NaiveDate>,
    pub applications: u64,
    pub previous_applications: u64,
    pub installments: u64,
    pub feature_rows: u64,
    pub loaded_rows: Option<u64>,
    pub dry_run: bool,
}

/// One full batch run. Either returns a complete report or propagates the
/// first fatal error; the target table is only touched by the final
/// replace-contents load.
pub fn run_pipeline(cfg: &EtlConfig) -> Result<RunReport, PipelineError> {
    let state = read_state(&cfg.state_path)?;
    let since = if cfg.full_refresh {
        None
    } else {
        cfg.since_override.or(state.since)
    };

    info!(
        component = "pipeline",
        event = "run.start",
        full = cfg.full_refresh,
        since = ?since,
        dry_run = cfg.dry_run,
        row_limit = ?cfg.row_limit,
        source_db = %cfg.source_db.display(),
        target_db = %cfg.target_db.display()
    );

    let source = open_database(&cfg.source_db)?;
    let app = retry(cfg, "extract.applications", || {
        extract_applications(&source, cfg)
    })?;
    let prev = retry(cfg, "extract.previous_applications", || {
        extract_previous_applications(&source, cfg)
    })?;
    let inst = retry(cfg, "extract.installments", || {
        extract_installments(&source, cfg)
    })?;

    let features = build_features(&app, &prev, &inst);

    let loaded_rows = if cfg.dry_run {
        info!(
            component = "pipeline",
            event = "load.skipped",
            reason = "dry_run",
            table = %cfg.features_table
        );
        None
    } else {
        let mut target = open_database(&cfg.target_db)?;
        let written = retry(cfg, "load.features", || {
            load_frame(&mut target, &cfg.features_table, &features, cfg.chunk_size)
        })?;
        Some(written)
    };

    let mut row_counts = BTreeMap::new();
    row_counts.insert(cfg.applications_table.clone(), app.len() as u64);
    row_counts.insert(cfg.previous_applications_table.clone(), prev.len() as u64);
    row_counts.insert(cfg.installments_table.clone(), inst.len() as u64);

    // No cross-table timestamp exists, so the new watermark is simply the run
    // date.
    write_state(
        &cfg.state_path,
        &RunState {
            since: Some(Utc::now().date_naive()),
            row_counts,
            last_run_utc: None,
        },
    )?;

    let report = RunReport {
        since,
        applications: app.len() as u64,
        previous_applications: prev.len() as u64,
        installments: inst.len() as u64,
        feature_rows: features.len() as u64,
        loaded_rows,
        dry_run: cfg.dry_run,
    };

    info!(
        component = "pipeline",
        event = "run.finish",
        applications = report.applications,
        previous_applications = report.previous_applications,
        installments = report.installments,
        feature_rows = report.feature_rows,
        loaded_rows = ?report.loaded_rows,
        dry_run = report.dry_run
    );

    Ok(report)
}

/// Bounded retry with exponential backoff. `max_retries` counts total
/// attempts; the last error is returned unchanged.
pub fn retry<T, E: Display>(
    cfg: &EtlConfig,
    operation: &str,
    mut f: impl FnMut() -> Result<T, E>,
) -> Result<T, E> {
    let attempts = cfg.max_retries.max(1);
    let mut attempt: u32 = 1;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= attempts => return Err(err),
            Err(err) => {
                let shift = attempt.saturating_sub(1).min(10);
                let sleep_ms = cfg.retry_backoff_ms.saturating_mul(1u64 << shift);
                warn!(
                    component = "pipeline",
                    event = "run.retry",
                    operation = operation,
                    attempt = attempt,
                    max_attempts = attempts,
                    sleep_ms = sleep_ms,
                    error = %err
                );
                std::thread::sleep(std::time::Duration::from_millis(sleep_ms));
                attempt += 1;
            }
        }
    }
}
