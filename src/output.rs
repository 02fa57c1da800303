//! Table artifacts on disk
//!
//! **Atomic writes**: a table is serialized to a hidden sibling file
//! (`.<name>.partial`) and renamed over the destination only once every byte
//! is flushed. An aborted write removes the partial file, so a file at the
//! destination is always complete.
//!
//! Formats:
//! - CSV with header, optionally gzip or zstd compressed (`.csv.gz`, `.csv.zst`)
//! - Parquet (uncompressed column chunks)

use crate::storage::read_parquet_file;
use crate::{Error, Result};
use arrow::compute::concat_batches;
use arrow::csv::reader::Format;
use arrow::csv::{ReaderBuilder, WriterBuilder};
use arrow::record_batch::RecordBatch;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
#[cfg(feature = "zstd")]
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Tabular file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Comma-separated text with a header row
    #[default]
    Csv,
    /// Apache Parquet
    Parquet,
}

/// Stream compression applied to delimited output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Plain file
    None,
    /// gzip (`.gz`)
    #[default]
    Gzip,
    /// zstd (`.zst`), requires the `zstd` feature
    Zstd,
}

/// How tables are serialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputOptions {
    /// File format
    pub format: OutputFormat,
    /// Stream compression
    pub compression: Compression,
}

impl OutputOptions {
    /// Check that this build can produce the requested combination
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for Parquet with stream compression,
    /// or zstd without the `zstd` feature
    pub fn validate(&self) -> Result<()> {
        if self.format == OutputFormat::Parquet && self.compression != Compression::None {
            return Err(Error::config(
                "Parquet output does not take stream compression; set compression = \"none\"",
            ));
        }
        if self.compression == Compression::Zstd && !cfg!(feature = "zstd") {
            return Err(Error::config(
                "zstd compression requires building with the `zstd` feature",
            ));
        }
        Ok(())
    }

    /// File name for an artifact stem, e.g. `nf1_sc_cellprofiler.csv.gz`
    #[must_use]
    pub fn file_name(&self, stem: &str) -> String {
        match (self.format, self.compression) {
            (OutputFormat::Parquet, _) => format!("{stem}.parquet"),
            (OutputFormat::Csv, Compression::None) => format!("{stem}.csv"),
            (OutputFormat::Csv, Compression::Gzip) => format!("{stem}.csv.gz"),
            (OutputFormat::Csv, Compression::Zstd) => format!("{stem}.csv.zst"),
        }
    }
}

/// Hidden sibling path a table is staged at before the final rename
#[must_use]
pub fn partial_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map_or_else(|| "table".into(), |n| n.to_string_lossy());
    destination.with_file_name(format!(".{name}.partial"))
}

/// Write `table` to `destination`, creating parent directories
///
/// # Errors
/// - [`Error::Configuration`] for an unsupported format/compression
/// - [`Error::Io`] if the destination is not writable
pub fn write_table(table: &RecordBatch, destination: &Path, options: &OutputOptions) -> Result<()> {
    options.validate()?;
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let partial = partial_path(destination);
    let result = write_staged(table, &partial, options)
        .and_then(|()| fs::rename(&partial, destination).map_err(Error::from));
    if result.is_err() {
        // Partial file may not exist yet
        let _ = fs::remove_file(&partial);
        return result;
    }

    info!(
        path = %destination.display(),
        rows = table.num_rows(),
        columns = table.num_columns(),
        "wrote table"
    );
    Ok(())
}

fn write_staged(table: &RecordBatch, path: &Path, options: &OutputOptions) -> Result<()> {
    let file = File::create(path)?;
    match options.format {
        OutputFormat::Parquet => {
            let mut writer = ArrowWriter::try_new(file, table.schema(), None)?;
            writer.write(table)?;
            writer.close()?;
        }
        OutputFormat::Csv => {
            let sink = BufWriter::new(file);
            let mut sink = match options.compression {
                Compression::None => write_csv(table, sink)?,
                Compression::Gzip => {
                    let encoder = GzEncoder::new(sink, flate2::Compression::default());
                    write_csv(table, encoder)?.finish()?
                }
                Compression::Zstd => write_zstd(table, sink)?,
            };
            sink.flush()?;
            sink.get_ref().sync_all()?;
        }
    }
    Ok(())
}

fn write_csv<W: Write>(table: &RecordBatch, sink: W) -> Result<W> {
    let mut writer = WriterBuilder::new().with_header(true).build(sink);
    writer.write(table)?;
    Ok(writer.into_inner())
}

#[cfg(feature = "zstd")]
fn write_zstd<W: Write>(table: &RecordBatch, sink: W) -> Result<W> {
    let encoder = zstd::stream::write::Encoder::new(sink, 0)?;
    Ok(write_csv(table, encoder)?.finish()?)
}

#[cfg(not(feature = "zstd"))]
fn write_zstd<W: Write>(_table: &RecordBatch, _sink: W) -> Result<W> {
    Err(Error::config(
        "zstd compression requires building with the `zstd` feature",
    ))
}

/// Read a table written by [`write_table`] (format from the file name)
///
/// # Errors
/// Returns [`Error::Io`] if the file is missing, or an IO-class error if it
/// cannot be decoded
pub fn read_table(path: &Path) -> Result<RecordBatch> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if name.ends_with(".parquet") {
        read_parquet_file(path)
    } else if name.contains(".tsv") || name.ends_with(".txt") {
        read_delimited(path, '\t')
    } else {
        read_delimited(path, ',')
    }
}

/// Read a delimited text file with a header row
///
/// gzip (and, with the `zstd` feature, zstd) input is detected from its magic
/// bytes. Column types are inferred from the whole file.
///
/// # Errors
/// - [`Error::Configuration`] if `delimiter` is not a single-byte character
/// - [`Error::Io`] if the file is missing, or an IO-class error if it is malformed
pub fn read_delimited(path: &Path, delimiter: char) -> Result<RecordBatch> {
    let delimiter = u8::try_from(delimiter)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| Error::config(format!("Delimiter must be ASCII, got {delimiter:?}")))?;

    let bytes = decompressed_bytes(path)?;
    let format = Format::default()
        .with_header(true)
        .with_delimiter(delimiter);
    let (schema, _) = format.infer_schema(Cursor::new(&bytes), None)?;
    let schema = Arc::new(schema);

    let reader = ReaderBuilder::new(Arc::clone(&schema))
        .with_format(format)
        .build(Cursor::new(&bytes))?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    let table = concat_batches(&schema, &batches)?;
    debug!(
        path = %path.display(),
        rows = table.num_rows(),
        columns = table.num_columns(),
        "read delimited table"
    );
    Ok(table)
}

fn decompressed_bytes(path: &Path) -> Result<Vec<u8>> {
    let raw = fs::read(path)?;
    if raw.starts_with(&GZIP_MAGIC) {
        let mut out = Vec::new();
        MultiGzDecoder::new(raw.as_slice()).read_to_end(&mut out)?;
        return Ok(out);
    }
    #[cfg(feature = "zstd")]
    if raw.starts_with(&ZSTD_MAGIC) {
        return Ok(zstd::stream::decode_all(raw.as_slice())?);
    }
    Ok(raw)
}
