//! In-memory measurement store

use super::{missing_table, MeasurementStore};
use crate::table::column_names;
use crate::Result;
use arrow::record_batch::RecordBatch;
use indexmap::IndexMap;

/// Named Arrow batches held in memory
///
/// Useful for testing and for embedding the pipeline behind another loader.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    tables: IndexMap<String, RecordBatch>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a table
    #[must_use]
    pub fn with_table(mut self, name: impl Into<String>, batch: RecordBatch) -> Self {
        self.insert(name, batch);
        self
    }

    /// Add (or replace) a table in place
    pub fn insert(&mut self, name: impl Into<String>, batch: RecordBatch) {
        self.tables.insert(name.into(), batch);
    }

    fn get(&self, table: &str) -> Result<&RecordBatch> {
        self.tables.get(table).ok_or_else(|| {
            let available: Vec<String> = self.tables.keys().cloned().collect();
            missing_table(table, &available)
        })
    }
}

impl MeasurementStore for MemoryStore {
    fn table_names(&self) -> Result<Vec<String>> {
        Ok(self.tables.keys().cloned().collect())
    }

    fn columns(&self, table: &str) -> Result<Vec<String>> {
        Ok(column_names(self.get(table)?))
    }

    fn read_table(&self, table: &str) -> Result<RecordBatch> {
        self.get(table).cloned()
    }
}
