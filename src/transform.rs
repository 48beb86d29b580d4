//! Credit-risk feature transform: three raw relations in, one flat feature
//! relation out.
//!
//! Stages: installment lateness aggregation (per previous application),
//! previous-application rollup (per client), and final feature assembly over
//! the application base. Every ratio goes through [`safe_div_scalar`]; no
//! stage raises on missing optional columns.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use crate::frame::{ColumnSpec, ColumnType, Frame, Value};

pub const FEATURE_SCHEMA_VERSION: u32 = 1;

const UNKNOWN_CATEGORY: &str = "UNKNOWN";
const STATUS_APPROVED: &str = "Approved";
const STATUS_REFUSED: &str = "Refused";

/// Fixed output column order of the feature relation.
pub const FEATURE_COLUMN_ORDER: [&str; 11] = [
    "client_id",
    "target",
    "income_total",
    "credit_amount",
    "annuity_amount",
    "debt_to_income_ratio",
    "prev_count",
    "prev_approved",
    "prev_rejected",
    "avg_utilization",
    "avg_late_ratio",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<ColumnSpec>,
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    SchemaFingerprintMismatch { expected: String, actual: String },
}

/// Division that never emits an infinite or undefined result. Returns
/// `Some(n / d)` only when both operands are present and finite and the
/// denominator is strictly positive; everything else is missing.
pub fn safe_div_scalar(numer: Option<f64>, denom: Option<f64>) -> Option<f64> {
    match (numer, denom) {
        (Some(n), Some(d)) if n.is_finite() && d.is_finite() && d > 0.0 => Some(n / d),
        _ => None,
    }
}

/// Element-wise [`safe_div_scalar`] over aligned columns of equal length.
pub fn safe_div(numer: &[Option<f64>], denom: &[Option<f64>]) -> Vec<Option<f64>> {
    numer
        .iter()
        .zip(denom)
        .map(|(n, d)| safe_div_scalar(*n, *d))
        .collect()
}

fn installment_aggregate_columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::new("prev_id", ColumnType::Integer),
        ColumnSpec::new("total_installments", ColumnType::Integer),
        ColumnSpec::new("late_installments", ColumnType::Integer),
        ColumnSpec::new("late_payment_ratio", ColumnType::Real),
    ]
}

fn client_aggregate_columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::new("client_id", ColumnType::Integer),
        ColumnSpec::new("prev_rejected", ColumnType::Integer),
        ColumnSpec::new("prev_approved", ColumnType::Integer),
        ColumnSpec::new("avg_utilization", ColumnType::Real),
        ColumnSpec::new("avg_late_ratio", ColumnType::Real),
        ColumnSpec::new("prev_count", ColumnType::Integer),
    ]
}

/// Collapses the installment relation into per-previous-application lateness
/// statistics. Degrades to an empty relation with the declared schema when
/// any required column is absent.
pub fn aggregate_installments(inst: &Frame) -> Frame {
    let mut out = Frame::new(installment_aggregate_columns());

    let required = ["prev_id", "days_instalment", "days_entry_payment"];
    if !inst.has_columns(&required) {
        warn!(
            component = "transform",
            event = "transform.installments.degraded",
            reason = "missing_columns",
            required = ?required
        );
        return out;
    }

    let due = inst
        .numeric_column("days_instalment")
        .expect("column presence checked");
    let paid = inst
        .numeric_column("days_entry_payment")
        .expect("column presence checked");
    let groups = inst
        .group_by_int("prev_id")
        .expect("column presence checked");

    for (prev_id, row_indices) in groups {
        let total = row_indices.len() as i64;
        let late = row_indices
            .iter()
            .filter(|&&idx| matches!((paid[idx], due[idx]), (Some(p), Some(d)) if p > d))
            .count() as i64;
        let ratio = safe_div_scalar(Some(late as f64), Some(total as f64));

        out.push_row(vec![
            Value::Int(prev_id),
            Value::Int(total),
            Value::Int(late),
            opt_real(ratio),
        ])
        .expect("aggregate schema is fixed");
    }

    out
}

/// Rolls previous applications up to per-client statistics, joining the
/// installment aggregate by `prev_id` first. Degrades to an empty relation
/// when the key columns are absent; absent non-key columns behave as all-null.
pub fn aggregate_previous(prev: &Frame, inst_agg: &Frame) -> Frame {
    let mut out = Frame::new(client_aggregate_columns());

    if !prev.has_columns(&["prev_id", "client_id"]) {
        warn!(
            component = "transform",
            event = "transform.previous.degraded",
            reason = "missing_key_columns"
        );
        return out;
    }

    let selected = prev.select(&[
        "prev_id",
        "client_id",
        "application_amount",
        "credit_amount",
        "contract_status",
    ]);
    // An installment aggregate without its key behaves like absent non-key
    // columns: the rollup proceeds with late ratios all-null.
    let joined = if inst_agg.has_columns(&["prev_id"]) {
        selected
            .left_join(inst_agg, "prev_id")
            .expect("both join keys checked")
    } else {
        selected
    };

    let credit = joined
        .numeric_column("credit_amount")
        .unwrap_or_else(|| vec![None; joined.len()]);
    let application = joined
        .numeric_column("application_amount")
        .unwrap_or_else(|| vec![None; joined.len()]);
    let utilization = safe_div(&credit, &application);
    let late_ratio = joined
        .numeric_column("late_payment_ratio")
        .unwrap_or_else(|| vec![None; joined.len()]);

    let status_idx = joined.column_index("contract_status");
    let prev_idx = joined.column_index("prev_id").expect("key presence checked");
    let groups = joined
        .group_by_int("client_id")
        .expect("key presence checked");

    for (client_id, row_indices) in groups {
        let mut rejected = 0i64;
        let mut approved = 0i64;
        let mut distinct_prev: BTreeSet<i64> = BTreeSet::new();

        for &idx in &row_indices {
            if let Some(status_idx) = status_idx {
                match joined.cell(idx, status_idx).and_then(Value::as_str) {
                    Some(STATUS_REFUSED) => rejected += 1,
                    Some(STATUS_APPROVED) => approved += 1,
                    _ => {}
                }
            }
            if let Some(prev_id) = joined.cell(idx, prev_idx).and_then(Value::as_i64) {
                distinct_prev.insert(prev_id);
            }
        }

        let avg_utilization = mean_of_present(row_indices.iter().map(|&idx| utilization[idx]));
        let avg_late_ratio = mean_of_present(row_indices.iter().map(|&idx| late_ratio[idx]));

        out.push_row(vec![
            Value::Int(client_id),
            Value::Int(rejected),
            Value::Int(approved),
            opt_real(avg_utilization),
            opt_real(avg_late_ratio),
            Value::Int(distinct_prev.len() as i64),
        ])
        .expect("aggregate schema is fixed");
    }

    out
}

/// Assembles the final feature relation: one output row per application row,
/// fixed column order, no infinities, count columns filled to integer zero.
/// Pure and idempotent; all I/O belongs to the orchestrator.
pub fn build_features(app: &Frame, prev: &Frame, inst: &Frame) -> Frame {
    info!(
        component = "transform",
        event = "features.transform.start",
        applications = app.len(),
        previous_applications = prev.len(),
        installments = inst.len()
    );

    let mut app = app.clone();
    let mut prev = prev.clone();
    let mut inst = inst.clone();

    // Categorical fill happens before any grouping so missing-category rows
    // survive as the literal UNKNOWN bucket.
    for frame in [&mut app, &mut prev, &mut inst] {
        frame.fill_missing_text(UNKNOWN_CATEGORY);
    }

    let inst_agg = aggregate_installments(&inst);
    let per_client = aggregate_previous(&prev, &inst_agg);

    let mut base = app.select(&[
        "client_id",
        "income_total",
        "credit_amount",
        "annuity_amount",
        "target",
    ]);
    for column in ["income_total", "credit_amount", "annuity_amount"] {
        base.coerce_numeric(column);
    }

    let credit = base
        .numeric_column("credit_amount")
        .unwrap_or_else(|| vec![None; base.len()]);
    let income = base
        .numeric_column("income_total")
        .unwrap_or_else(|| vec![None; base.len()]);
    base.push_real_column("debt_to_income_ratio", safe_div(&credit, &income))
        .expect("derived column covers every base row");

    let mut merged = if base.has_columns(&["client_id"]) {
        base.left_join(&per_client, "client_id")
            .expect("key presence checked")
    } else {
        warn!(
            component = "transform",
            event = "features.transform.degraded",
            reason = "applications_missing_client_id"
        );
        base
    };

    merged.fill_null_real("avg_utilization", 0.0);
    merged.fill_null_real("avg_late_ratio", 0.0);
    for column in ["prev_count", "prev_rejected", "prev_approved"] {
        merged.fill_null_int(column, 0);
    }

    let mut out = merged.select(&FEATURE_COLUMN_ORDER);
    // Defensive: every ratio already routes through safe_div, but nothing
    // infinite may reach the load stage.
    out.replace_non_finite_with_null();

    info!(
        component = "transform",
        event = "features.transform.finish",
        feature_rows = out.len(),
        feature_columns = out.columns().len()
    );

    out
}

/// Declared schema of the feature relation, with a fingerprint over the
/// version and column layout so consumers can pin what they were built
/// against.
pub fn feature_schema() -> FeatureSchema {
    let columns = vec![
        ColumnSpec::new("client_id", ColumnType::Integer),
        ColumnSpec::new("target", ColumnType::Integer),
        ColumnSpec::new("income_total", ColumnType::Real),
        ColumnSpec::new("credit_amount", ColumnType::Real),
        ColumnSpec::new("annuity_amount", ColumnType::Real),
        ColumnSpec::new("debt_to_income_ratio", ColumnType::Real),
        ColumnSpec::new("prev_count", ColumnType::Integer),
        ColumnSpec::new("prev_approved", ColumnType::Integer),
        ColumnSpec::new("prev_rejected", ColumnType::Integer),
        ColumnSpec::new("avg_utilization", ColumnType::Real),
        ColumnSpec::new("avg_late_ratio", ColumnType::Real),
    ];
    let fingerprint = schema_fingerprint(FEATURE_SCHEMA_VERSION, &columns);

    info!(
        component = "transform",
        event = "features.schema.built",
        version = FEATURE_SCHEMA_VERSION,
        column_count = columns.len(),
        fingerprint = fingerprint
    );

    FeatureSchema {
        version: FEATURE_SCHEMA_VERSION,
        fingerprint,
        columns,
    }
}

pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    actual: &FeatureSchema,
) -> Result<(), TransformError> {
    if expected_version != actual.version {
        return Err(TransformError::SchemaVersionMismatch {
            expected: expected_version,
            actual: actual.version,
        });
    }
    if expected_fingerprint != actual.fingerprint {
        return Err(TransformError::SchemaFingerprintMismatch {
            expected: expected_fingerprint.to_string(),
            actual: actual.fingerprint.clone(),
        });
    }
    Ok(())
}

fn schema_fingerprint(version: u32, columns: &[ColumnSpec]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{version};columns:"));
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update(match column.dtype {
            ColumnType::Integer => ":integer;",
            ColumnType::Real => ":real;",
            ColumnType::Text => ":text;",
        });
    }
    hex::encode(hasher.finalize())
}

fn mean_of_present(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0u64;
    for value in values.flatten() {
        sum += value;
        count += 1;
    }
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

fn opt_real(value: Option<f64>) -> Value {
    match value {
        Some(v) => Value::Real(v),
        None => Value::Null,
    }
}
