//! Measurement stores (SQLite / Parquet / in-memory)
//!
//! A measurement store is any tabular source addressable by table name: the
//! per-object compartment tables (`Per_Cells`, `Per_Cytoplasm`, ...) and the
//! per-image table of an imaging run.
//!
//! **Read-Only Design**:
//! - The pipeline never writes back into a store
//! - Tables are read whole into a single Arrow batch (one plate fits in memory)
//! - Column listing is cheap and does not materialize rows, so the loader can
//!   validate configuration before any data is read

mod memory;
mod parquet_dir;
mod sqlite;

pub use memory::MemoryStore;
pub use parquet_dir::ParquetStore;
pub(crate) use parquet_dir::read_parquet_file;
pub use sqlite::SqliteStore;

use crate::{Error, Result};
use arrow::record_batch::RecordBatch;
use std::path::Path;
use tracing::debug;

/// URL scheme accepted in front of SQLite paths (`sqlite:///path/to/file.sqlite`)
pub const SQLITE_URL_PREFIX: &str = "sqlite:///";

/// Tabular source addressable by table name
pub trait MeasurementStore {
    /// Names of all tables in the store
    ///
    /// # Errors
    /// Returns error if the store cannot be listed
    fn table_names(&self) -> Result<Vec<String>>;

    /// Column names of `table`, in storage order
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if the table does not exist
    fn columns(&self, table: &str) -> Result<Vec<String>>;

    /// Read all rows of `table`
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if the table does not exist, or a
    /// storage error if it cannot be decoded
    fn read_table(&self, table: &str) -> Result<RecordBatch>;

    /// Whether `table` exists
    ///
    /// # Errors
    /// Returns error if the store cannot be listed
    fn has_table(&self, table: &str) -> Result<bool> {
        Ok(self.table_names()?.iter().any(|t| t == table))
    }
}

impl<S: MeasurementStore + ?Sized> MeasurementStore for Box<S> {
    fn table_names(&self) -> Result<Vec<String>> {
        (**self).table_names()
    }

    fn columns(&self, table: &str) -> Result<Vec<String>> {
        (**self).columns(table)
    }

    fn read_table(&self, table: &str) -> Result<RecordBatch> {
        (**self).read_table(table)
    }

    fn has_table(&self, table: &str) -> Result<bool> {
        (**self).has_table(table)
    }
}

/// Open a store from a location string
///
/// - `sqlite:///path` or a regular file: SQLite database
/// - a directory: one `<table>.parquet` file per table
///
/// # Errors
/// Returns [`Error::Io`] if the location does not exist
pub fn open_store(location: &str) -> Result<Box<dyn MeasurementStore>> {
    let path_str = location.strip_prefix(SQLITE_URL_PREFIX).unwrap_or(location);
    let path = Path::new(path_str);

    if path.is_dir() {
        return Ok(Box::new(ParquetStore::open(path)?));
    }
    if !path.is_file() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Measurement store not found: {}", path.display()),
        )));
    }
    let store = SqliteStore::open(path)?;
    debug!(path = %store.path().display(), "opened SQLite store");
    Ok(Box::new(store))
}

pub(crate) fn missing_table(table: &str, available: &[String]) -> Error {
    Error::config(format!(
        "Table not found in measurement store: {table} (available: {})",
        available.join(", ")
    ))
}
