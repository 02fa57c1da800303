//! Column helpers shared by the merge, normalize and selection stages
//!
//! All derived tables use nullable fields: joins and lookups can introduce
//! nulls into columns that were dense in their source table.

use crate::{Error, Result};
use arrow::array::{Array, ArrayRef, Float64Array, StringArray};
use arrow::compute;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

/// Whether a column type holds numeric measurements
#[must_use]
pub const fn is_numeric(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float16
            | DataType::Float32
            | DataType::Float64
    )
}

/// Find a column by name
#[must_use]
pub fn column_index(batch: &RecordBatch, name: &str) -> Option<usize> {
    batch.schema().index_of(name).ok()
}

/// Find a column by name, failing with a configuration error naming `table`
///
/// # Errors
/// Returns [`Error::Configuration`] if the column is absent
pub fn require_column(batch: &RecordBatch, name: &str, table: &str) -> Result<usize> {
    column_index(batch, name)
        .ok_or_else(|| Error::config(format!("Column not found in {table}: {name}")))
}

/// Column values as `f64`; nulls and NaN become `None`
///
/// # Errors
/// Returns error if the column cannot be cast to Float64
pub fn float_values(column: &ArrayRef) -> Result<Vec<Option<f64>>> {
    let cast = compute::cast(column.as_ref(), &DataType::Float64)?;
    let array = cast
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| Error::Storage("Failed to downcast to Float64Array".to_string()))?;
    Ok(array.iter().map(|v| v.filter(|x| !x.is_nan())).collect())
}

/// Column values rendered as strings; nulls become `None`
///
/// # Errors
/// Returns error if the column cannot be cast to Utf8
pub fn string_values(column: &ArrayRef) -> Result<Vec<Option<String>>> {
    let cast = compute::cast(column.as_ref(), &DataType::Utf8)?;
    let array = cast
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| Error::Storage("Failed to downcast to StringArray".to_string()))?;
    Ok(array.iter().map(|v| v.map(str::to_string)).collect())
}

/// Build a batch from named columns, marking every field nullable
///
/// # Errors
/// Returns error if column lengths disagree
pub fn build_batch(columns: Vec<(String, ArrayRef)>) -> Result<RecordBatch> {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, array)| Field::new(name, array.data_type().clone(), true))
        .collect();
    let arrays: Vec<ArrayRef> = columns.into_iter().map(|(_, array)| array).collect();
    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays).map_err(Error::from)
}

/// Named columns of a batch, in schema order
#[must_use]
pub fn named_columns(batch: &RecordBatch) -> Vec<(String, ArrayRef)> {
    batch
        .schema()
        .fields()
        .iter()
        .zip(batch.columns())
        .map(|(field, array)| (field.name().clone(), Arc::clone(array)))
        .collect()
}

/// Remove the columns at `drop` (remaining schema order preserved)
///
/// # Errors
/// Returns error if an index is out of bounds
pub fn drop_columns(batch: &RecordBatch, drop: &[usize]) -> Result<RecordBatch> {
    let keep: Vec<usize> = (0..batch.num_columns())
        .filter(|i| !drop.contains(i))
        .collect();
    batch.project(&keep).map_err(Error::from)
}

/// Rename every column through `rename`
///
/// # Errors
/// Returns error if the renamed schema is invalid
pub fn rename_columns<F>(batch: &RecordBatch, rename: F) -> Result<RecordBatch>
where
    F: Fn(&str) -> String,
{
    let columns = named_columns(batch)
        .into_iter()
        .map(|(name, array)| (rename(&name), array))
        .collect();
    build_batch(columns)
}

/// Column names of a batch
#[must_use]
pub fn column_names(batch: &RecordBatch) -> Vec<String> {
    batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect()
}
