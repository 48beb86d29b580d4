//! In-memory relation model backing extraction, transformation, and load.
//!
//! A [`Frame`] is an ordered set of typed columns plus row-major cells. It
//! deliberately stays small: presence checks, column selection, numeric
//! coercion, an integer-keyed left join, and deterministic grouping are all
//! the relational algebra the feature transform needs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

/// One cell. `Null` is the missing-value marker across every column type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Real(f64),
    Text(String),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view of the cell. Unparseable text and nulls coerce to `None`;
    /// non-finite reals are kept (sanitization is a separate, explicit pass).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Real(v) => Some(*v),
            Self::Text(raw) => raw.trim().parse::<f64>().ok(),
            Self::Null => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Real(v) if v.is_finite() && v.fract() == 0.0 => Some(*v as i64),
            Self::Real(_) => None,
            Self::Text(raw) => raw.trim().parse::<i64>().ok(),
            Self::Null => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(raw) => Some(raw),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub dtype: ColumnType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, dtype: ColumnType) -> Self {
        Self {
            name: name.into(),
            dtype,
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("row has {found} cells, frame expects {expected}")]
    RowArity { expected: usize, found: usize },
    #[error("column count {found} does not match row count {expected}")]
    ColumnArity { expected: usize, found: usize },
    #[error("unknown column: {0}")]
    UnknownColumn(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    columns: Vec<ColumnSpec>,
    rows: Vec<Vec<Value>>,
}

impl Frame {
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), FrameError> {
        if row.len() != self.columns.len() {
            return Err(FrameError::RowArity {
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|spec| spec.name == name)
    }

    pub fn has_columns(&self, names: &[&str]) -> bool {
        names.iter().all(|name| self.column_index(name).is_some())
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&Value> {
        self.rows.get(row).and_then(|cells| cells.get(column))
    }

    /// Projects the subset of `names` that exists, in the requested order.
    /// Absent names are silently dropped, never an error.
    pub fn select(&self, names: &[&str]) -> Self {
        let kept: Vec<usize> = names
            .iter()
            .filter_map(|name| self.column_index(name))
            .collect();

        let columns = kept.iter().map(|&idx| self.columns[idx].clone()).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| kept.iter().map(|&idx| row[idx].clone()).collect())
            .collect();

        Self { columns, rows }
    }

    /// Numeric-or-missing view of a column, `None` when the column is absent.
    pub fn numeric_column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| row[idx].as_f64()).collect())
    }

    /// Rewrites a column to numeric-or-null in place and retypes it `Real`.
    /// A no-op when the column is absent.
    pub fn coerce_numeric(&mut self, name: &str) {
        let Some(idx) = self.column_index(name) else {
            return;
        };
        for row in &mut self.rows {
            row[idx] = match row[idx].as_f64() {
                Some(v) => Value::Real(v),
                None => Value::Null,
            };
        }
        self.columns[idx].dtype = ColumnType::Real;
    }

    /// Replaces nulls in every `Text`-typed column with `fill`.
    pub fn fill_missing_text(&mut self, fill: &str) {
        let text_columns: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, spec)| spec.dtype == ColumnType::Text)
            .map(|(idx, _)| idx)
            .collect();

        for row in &mut self.rows {
            for &idx in &text_columns {
                if row[idx].is_null() {
                    row[idx] = Value::Text(fill.to_string());
                }
            }
        }
    }

    /// Appends a `Real` column; `values` must cover every existing row.
    pub fn push_real_column(
        &mut self,
        name: impl Into<String>,
        values: Vec<Option<f64>>,
    ) -> Result<(), FrameError> {
        if values.len() != self.rows.len() {
            return Err(FrameError::ColumnArity {
                expected: self.rows.len(),
                found: values.len(),
            });
        }
        self.columns.push(ColumnSpec::new(name, ColumnType::Real));
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(match value {
                Some(v) => Value::Real(v),
                None => Value::Null,
            });
        }
        Ok(())
    }

    /// Left join on an integer key column. Every left row is kept; unmatched
    /// rows get nulls for the right-hand columns, and the right key column is
    /// not duplicated. Right keys are expected to be unique (aggregate
    /// outputs); on duplicates the first match wins.
    pub fn left_join(&self, right: &Self, key: &str) -> Result<Self, FrameError> {
        let left_key = self
            .column_index(key)
            .ok_or_else(|| FrameError::UnknownColumn(key.to_string()))?;
        let right_key = right
            .column_index(key)
            .ok_or_else(|| FrameError::UnknownColumn(key.to_string()))?;

        let mut right_index: BTreeMap<i64, usize> = BTreeMap::new();
        for (row_idx, row) in right.rows.iter().enumerate() {
            if let Some(k) = row[right_key].as_i64() {
                right_index.entry(k).or_insert(row_idx);
            }
        }

        let carried: Vec<usize> = (0..right.columns.len())
            .filter(|&idx| idx != right_key)
            .collect();

        let mut columns = self.columns.clone();
        columns.extend(carried.iter().map(|&idx| right.columns[idx].clone()));

        let mut rows = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            let mut joined = row.clone();
            let matched = row[left_key].as_i64().and_then(|k| right_index.get(&k));
            match matched {
                Some(&right_row) => {
                    joined.extend(carried.iter().map(|&idx| right.rows[right_row][idx].clone()));
                }
                None => {
                    joined.extend(carried.iter().map(|_| Value::Null));
                }
            }
            rows.push(joined);
        }

        Ok(Self { columns, rows })
    }

    /// Deterministic grouping by an integer key: sorted key order, row indices
    /// in input order. Rows whose key is null or non-integer fall into no
    /// group, matching dataframe groupby semantics.
    pub fn group_by_int(&self, key: &str) -> Result<BTreeMap<i64, Vec<usize>>, FrameError> {
        let idx = self
            .column_index(key)
            .ok_or_else(|| FrameError::UnknownColumn(key.to_string()))?;

        let mut groups: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (row_idx, row) in self.rows.iter().enumerate() {
            if let Some(k) = row[idx].as_i64() {
                groups.entry(k).or_default().push(row_idx);
            }
        }
        Ok(groups)
    }

    /// Fills nulls in a `Real` column; a no-op when the column is absent.
    pub fn fill_null_real(&mut self, name: &str, fill: f64) {
        let Some(idx) = self.column_index(name) else {
            return;
        };
        for row in &mut self.rows {
            if row[idx].is_null() {
                row[idx] = Value::Real(fill);
            }
        }
    }

    /// Fills nulls in a column with an integer default and retypes it
    /// `Integer`. Nullable-until-filled: callers rely on the column carrying
    /// distinct "no value" cells right up to this call.
    pub fn fill_null_int(&mut self, name: &str, fill: i64) {
        let Some(idx) = self.column_index(name) else {
            return;
        };
        for row in &mut self.rows {
            row[idx] = match row[idx].as_i64() {
                Some(v) => Value::Int(v),
                None => Value::Int(fill),
            };
        }
        self.columns[idx].dtype = ColumnType::Integer;
    }

    /// Replaces every non-finite real cell with null, across all columns.
    pub fn replace_non_finite_with_null(&mut self) {
        for row in &mut self.rows {
            for cell in row.iter_mut() {
                if let Value::Real(v) = cell {
                    if !v.is_finite() {
                        *cell = Value::Null;
                    }
                }
            }
        }
    }
}
