//! Table transform capability
//!
//! The pipeline only ever talks to its statistics engine through this trait,
//! so a normalizer or selector backed by another engine can be swapped in
//! without touching orchestration.

use arrow::record_batch::RecordBatch;

/// A stage that maps one table to a new table
pub trait TableTransform {
    /// Short stage name used in logs
    fn name(&self) -> &str;

    /// Produce a new table from `table`
    ///
    /// # Errors
    /// Returns error if the transform's configuration does not fit the table
    /// (missing columns, empty fitting sample) or a column kernel fails
    fn apply(&self, table: &RecordBatch) -> crate::Result<RecordBatch>;
}

/// Apply transforms in order, each consuming the previous output
///
/// # Errors
/// Returns the first error raised by any transform; later transforms do not run
pub fn apply_all(table: &RecordBatch, transforms: &[&dyn TableTransform]) -> crate::Result<RecordBatch> {
    let mut current = table.clone();
    for transform in transforms {
        current = transform.apply(&current)?;
        tracing::debug!(
            transform = transform.name(),
            rows = current.num_rows(),
            columns = current.num_columns(),
            "transform applied"
        );
    }
    Ok(current)
}
