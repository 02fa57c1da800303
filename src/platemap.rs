//! Plate map input
//!
//! One row per physical well: a well identifier plus experimental condition
//! labels (`genotype`, `dose`, ...). Columns are renamed with the `Metadata_`
//! prefix only at annotation time, so the file is read as-is.

use crate::config::PlatemapConfig;
use crate::output::read_delimited;
use crate::{Error, Result};
use arrow::record_batch::RecordBatch;
use tracing::{info, instrument};

/// Read the plate map described by `config`
///
/// # Errors
/// - [`Error::Io`] if the file is missing or unreadable
/// - [`Error::Configuration`] if the delimiter is not a single byte
#[instrument(skip_all, fields(path = %config.path.display()))]
pub fn load_platemap(config: &PlatemapConfig) -> Result<RecordBatch> {
    if !config.path.is_file() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Plate map not found: {}", config.path.display()),
        )));
    }
    let platemap = read_delimited(&config.path, config.delimiter)?;
    info!(
        wells = platemap.num_rows(),
        columns = platemap.num_columns(),
        "loaded plate map"
    );
    Ok(platemap)
}
