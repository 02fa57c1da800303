//! Parquet directory store: one `<table>.parquet` file per table

use super::{missing_table, MeasurementStore};
use crate::{Error, Result};
use arrow::compute;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const PARQUET_EXTENSION: &str = "parquet";

/// Directory of Parquet files, addressed by file stem
#[derive(Debug, Clone)]
pub struct ParquetStore {
    root: PathBuf,
}

impl ParquetStore {
    /// Open a directory of Parquet tables
    ///
    /// # Errors
    /// Returns error if `root` is not a readable directory
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(Error::Storage(format!(
                "Parquet store is not a directory: {}",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    fn table_path(&self, table: &str) -> Result<PathBuf> {
        let path = self.root.join(format!("{table}.{PARQUET_EXTENSION}"));
        if path.is_file() {
            Ok(path)
        } else {
            Err(missing_table(table, &self.table_names()?))
        }
    }
}

/// Read a whole Parquet file into one batch
///
/// # Errors
/// Returns [`Error::Storage`] naming the file if it cannot be opened or decoded
pub(crate) fn read_parquet_file(path: &Path) -> Result<RecordBatch> {
    let builder = reader_builder(path)?;
    let schema = Arc::clone(builder.schema());
    let failed = |e: &dyn std::fmt::Display| {
        Error::Storage(format!("Failed to read Parquet file {}: {e}", path.display()))
    };
    let batches = builder
        .build()
        .map_err(|e| failed(&e))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| failed(&e))?;
    compute::concat_batches(&schema, &batches).map_err(|e| failed(&e))
}

fn reader_builder(path: &Path) -> Result<ParquetRecordBatchReaderBuilder<File>> {
    let file = File::open(path).map_err(|e| {
        Error::Storage(format!("Failed to open Parquet file {}: {e}", path.display()))
    })?;
    ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| {
        Error::Storage(format!("Failed to parse Parquet file {}: {e}", path.display()))
    })
}

impl MeasurementStore for ParquetStore {
    fn table_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(PARQUET_EXTENSION) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn columns(&self, table: &str) -> Result<Vec<String>> {
        let builder = reader_builder(&self.table_path(table)?)?;
        Ok(builder
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect())
    }

    fn read_table(&self, table: &str) -> Result<RecordBatch> {
        read_parquet_file(&self.table_path(table)?)
    }
}
