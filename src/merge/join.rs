//! Hash joins over Arrow batches
//!
//! Key semantics:
//! - keys compare by value; integers and integral floats are equal (`3 == 3.0`)
//! - strings compare exactly
//! - a null (or NaN) in any key component never matches
//!
//! Output rows are gathered with `arrow::compute::take`, so every column keeps
//! its Arrow type; unmatched lookups become nulls.

use crate::table::{build_batch, named_columns, require_column};
use crate::{Error, Result};
use arrow::array::{Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray, UInt64Array};
use arrow::compute;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::warn;

/// One component of a composite join key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyValue {
    /// Integer (or integral float) value
    Int(i64),
    /// Non-integral float, by bit pattern
    Float(u64),
    /// String value
    Str(String),
}

/// Per-row key components of one column; `None` for null/NaN
///
/// # Errors
/// Returns error if the column type cannot be keyed
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn key_values(column: &ArrayRef) -> Result<Vec<Option<KeyValue>>> {
    match column.data_type() {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32 => {
            let cast = compute::cast(column.as_ref(), &DataType::Int64)?;
            let array = downcast::<Int64Array>(&cast, "Int64Array")?;
            Ok(array.iter().map(|v| v.map(KeyValue::Int)).collect())
        }
        DataType::Boolean => {
            let array = downcast::<BooleanArray>(column, "BooleanArray")?;
            Ok(array
                .iter()
                .map(|v| v.map(|b| KeyValue::Int(i64::from(b))))
                .collect())
        }
        DataType::UInt64 | DataType::Float16 | DataType::Float32 | DataType::Float64 => {
            let cast = compute::cast(column.as_ref(), &DataType::Float64)?;
            let array = downcast::<Float64Array>(&cast, "Float64Array")?;
            Ok(array
                .iter()
                .map(|v| {
                    v.and_then(|x| {
                        if x.is_nan() {
                            None
                        } else if x.fract() == 0.0 && x.abs() < i64::MAX as f64 {
                            Some(KeyValue::Int(x as i64))
                        } else {
                            Some(KeyValue::Float((x + 0.0).to_bits()))
                        }
                    })
                })
                .collect())
        }
        _ => {
            let cast = compute::cast(column.as_ref(), &DataType::Utf8)?;
            let array = downcast::<StringArray>(&cast, "StringArray")?;
            Ok(array
                .iter()
                .map(|v| v.map(|s| KeyValue::Str(s.to_string())))
                .collect())
        }
    }
}

fn downcast<'a, T: 'static>(array: &'a ArrayRef, name: &str) -> Result<&'a T> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| Error::Storage(format!("Failed to downcast to {name}")))
}

/// Composite keys for `columns` of `batch`; `None` when any component is null
///
/// # Errors
/// Returns [`Error::Configuration`] if a key column is missing
pub fn composite_keys(
    batch: &RecordBatch,
    columns: &[String],
    table: &str,
) -> Result<Vec<Option<Vec<KeyValue>>>> {
    let per_column = columns
        .iter()
        .map(|name| {
            let index = require_column(batch, name, table)?;
            key_values(batch.column(index))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((0..batch.num_rows())
        .map(|row| per_column.iter().map(|col| col[row].clone()).collect())
        .collect())
}

type KeyIndex = FxHashMap<Vec<KeyValue>, Vec<usize>>;

fn index_keys(keys: Vec<Option<Vec<KeyValue>>>) -> KeyIndex {
    let mut index: KeyIndex = FxHashMap::default();
    for (row, key) in keys.into_iter().enumerate() {
        if let Some(key) = key {
            index.entry(key).or_default().push(row);
        }
    }
    index
}

fn first_duplicate(index: &KeyIndex) -> Option<&Vec<KeyValue>> {
    index
        .iter()
        .find(|(_, rows)| rows.len() > 1)
        .map(|(key, _)| key)
}

fn gather(column: &ArrayRef, rows: &UInt64Array) -> Result<ArrayRef> {
    Ok(compute::take(column.as_ref(), rows, None)?)
}

/// Inner equi-join of two tables
#[derive(Debug, Clone)]
pub struct InnerJoin<'a> {
    /// Name of the left table, for messages and suffixes
    pub left_name: &'a str,
    /// Name of the right table, for messages and suffixes
    pub right_name: &'a str,
    /// Left key columns
    pub left_on: Vec<String>,
    /// Right key columns (same arity as `left_on`)
    pub right_on: Vec<String>,
    /// Allow a key to appear more than once on either side
    pub allow_duplicates: bool,
}

impl InnerJoin<'_> {
    /// Join `left` and `right`
    ///
    /// Rows come out in left order, then right order within a key. A right
    /// key column named like its left counterpart is emitted once; any other
    /// name collision is suffixed `_<left_name>` / `_<right_name>`. Rows
    /// dropped on either side are reported with `warn!`.
    ///
    /// # Errors
    /// - [`Error::Configuration`] if a key column is missing or arities differ
    /// - [`Error::Validation`] if duplicate keys occur while not allowed
    pub fn execute(&self, left: &RecordBatch, right: &RecordBatch) -> Result<RecordBatch> {
        if self.left_on.len() != self.right_on.len() {
            return Err(Error::config(format!(
                "Join {}-{}: {} left keys but {} right keys",
                self.left_name,
                self.right_name,
                self.left_on.len(),
                self.right_on.len()
            )));
        }

        let left_keys = composite_keys(left, &self.left_on, self.left_name)?;
        let right_index = index_keys(composite_keys(right, &self.right_on, self.right_name)?);

        if !self.allow_duplicates {
            if let Some(key) = first_duplicate(&right_index) {
                return Err(Error::validation(format!(
                    "Join {}-{}: key {key:?} occurs more than once in {} (expected one-to-one linkage)",
                    self.left_name, self.right_name, self.right_name
                )));
            }
            let mut seen: FxHashSet<&Vec<KeyValue>> = FxHashSet::default();
            if let Some(key) = left_keys.iter().flatten().find(|k| !seen.insert(*k)) {
                return Err(Error::validation(format!(
                    "Join {}-{}: key {key:?} occurs more than once in {} (expected one-to-one linkage)",
                    self.left_name, self.right_name, self.left_name
                )));
            }
        }

        let mut left_rows = Vec::new();
        let mut right_rows = Vec::new();
        let mut right_matched = vec![false; right.num_rows()];
        let mut left_unmatched = 0usize;
        for (row, key) in left_keys.iter().enumerate() {
            match key.as_ref().and_then(|k| right_index.get(k)) {
                Some(matches) => {
                    for &r in matches {
                        left_rows.push(row as u64);
                        right_rows.push(r as u64);
                        right_matched[r] = true;
                    }
                }
                None => left_unmatched += 1,
            }
        }
        let right_unmatched = right_matched.iter().filter(|m| !**m).count();
        if left_unmatched > 0 || right_unmatched > 0 {
            warn!(
                left = self.left_name,
                right = self.right_name,
                left_dropped = left_unmatched,
                right_dropped = right_unmatched,
                "inner join dropped unmatched rows"
            );
        }

        let left_rows = UInt64Array::from(left_rows);
        let right_rows = UInt64Array::from(right_rows);

        // Right key columns that share the left key's name are merged
        let merged_keys: Vec<&String> = self
            .left_on
            .iter()
            .zip(&self.right_on)
            .filter(|(l, r)| l == r)
            .map(|(_, r)| r)
            .collect();

        let left_cols = named_columns(left);
        let right_cols: Vec<(String, ArrayRef)> = named_columns(right)
            .into_iter()
            .filter(|(name, _)| !merged_keys.contains(&name))
            .collect();

        let left_names: FxHashSet<&str> = left_cols.iter().map(|(n, _)| n.as_str()).collect();
        let right_names: FxHashSet<&str> = right_cols.iter().map(|(n, _)| n.as_str()).collect();

        let mut columns = Vec::with_capacity(left_cols.len() + right_cols.len());
        for (name, array) in &left_cols {
            let out = if right_names.contains(name.as_str()) {
                format!("{name}_{}", self.left_name)
            } else {
                name.clone()
            };
            columns.push((out, gather(array, &left_rows)?));
        }
        for (name, array) in &right_cols {
            let out = if left_names.contains(name.as_str()) {
                format!("{name}_{}", self.right_name)
            } else {
                name.clone()
            };
            columns.push((out, gather(array, &right_rows)?));
        }

        build_batch(columns)
    }
}

/// Result of a [`LookupJoin`]
#[derive(Debug)]
pub struct LookupOutput {
    /// Joined table
    pub batch: RecordBatch,
    /// Primary rows with no lookup match
    pub unmatched: usize,
}

/// Attach columns of a keyed lookup table to every row of a primary table
///
/// The lookup keys must be unique. Primary row order is preserved; lookup
/// columns come first and the lookup key columns are dropped.
#[derive(Debug, Clone)]
pub struct LookupJoin<'a> {
    /// Name of the lookup table, for messages
    pub lookup_name: &'a str,
    /// Primary key columns
    pub primary_on: Vec<String>,
    /// Lookup key columns (same arity as `primary_on`)
    pub lookup_on: Vec<String>,
    /// Keep primary rows without a match (nulls in lookup columns)
    pub keep_unmatched: bool,
}

impl LookupJoin<'_> {
    /// Join `lookup` onto `primary`
    ///
    /// # Errors
    /// - [`Error::Configuration`] if a key column is missing
    /// - [`Error::Validation`] if lookup keys are not unique
    pub fn execute(&self, primary: &RecordBatch, lookup: &RecordBatch) -> Result<LookupOutput> {
        let primary_keys = composite_keys(primary, &self.primary_on, "profiles")?;
        let lookup_index = index_keys(composite_keys(lookup, &self.lookup_on, self.lookup_name)?);

        if let Some(key) = first_duplicate(&lookup_index) {
            return Err(Error::validation(format!(
                "{} key {key:?} is not unique",
                self.lookup_name
            )));
        }

        let mut primary_rows = Vec::with_capacity(primary.num_rows());
        let mut lookup_rows: Vec<Option<u64>> = Vec::with_capacity(primary.num_rows());
        let mut unmatched = 0usize;
        for (row, key) in primary_keys.iter().enumerate() {
            let hit = key
                .as_ref()
                .and_then(|k| lookup_index.get(k))
                .map(|rows| rows[0] as u64);
            if hit.is_none() {
                unmatched += 1;
                if !self.keep_unmatched {
                    continue;
                }
            }
            primary_rows.push(row as u64);
            lookup_rows.push(hit);
        }

        let primary_rows = UInt64Array::from(primary_rows);
        let lookup_rows = UInt64Array::from(lookup_rows);

        let primary_cols = named_columns(primary);
        let primary_names: FxHashSet<&str> = primary_cols.iter().map(|(n, _)| n.as_str()).collect();

        let mut columns = Vec::new();
        for (name, array) in named_columns(lookup) {
            if self.lookup_on.contains(&name) {
                continue;
            }
            let out = if primary_names.contains(name.as_str()) {
                format!("{name}_{}", self.lookup_name)
            } else {
                name
            };
            columns.push((out, gather(&array, &lookup_rows)?));
        }
        for (name, array) in &primary_cols {
            columns.push((name.clone(), gather(array, &primary_rows)?));
        }

        Ok(LookupOutput {
            batch: build_batch(columns)?,
            unmatched,
        })
    }
}
