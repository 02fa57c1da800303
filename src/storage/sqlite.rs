//! SQLite measurement store (CellProfiler `ExportToDatabase` output)
//!
//! SQLite is dynamically typed, so each column's Arrow type is decided from
//! the values actually stored:
//! - any TEXT/BLOB value: Utf8 (numbers rendered as text)
//! - any REAL value: Float64 (integers widened)
//! - only INTEGER values: Int64
//! - only NULLs: the declared column affinity (INT -> Int64, CHAR/CLOB/TEXT -> Utf8,
//!   anything else -> Float64)

use super::{missing_table, MeasurementStore};
use crate::table::build_batch;
use crate::{Error, Result};
use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Read-only SQLite measurement database
pub struct SqliteStore {
    path: PathBuf,
    conn: Connection,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").field("path", &self.path).finish()
    }
}

impl SqliteStore {
    /// Open a database file read-only
    ///
    /// # Errors
    /// Returns error if the file cannot be opened as SQLite
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| {
            Error::Storage(format!(
                "Failed to open SQLite database {}: {e}",
                path.display()
            ))
        })?;
        Ok(Self { path, conn })
    }

    /// Path of the underlying database file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_table(&self, table: &str) -> Result<()> {
        let names = self.table_names()?;
        if names.iter().any(|t| t == table) {
            Ok(())
        } else {
            Err(missing_table(table, &names))
        }
    }

    /// Declared column names and types, from `PRAGMA table_info`
    fn table_info(&self, table: &str) -> Result<Vec<(String, String)>> {
        let sql = format!("PRAGMA table_info({})", quote_identifier(table));
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;
        let info = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(info)
    }
}

impl MeasurementStore for SqliteStore {
    fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type IN ('table', 'view') ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let names = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn columns(&self, table: &str) -> Result<Vec<String>> {
        self.ensure_table(table)?;
        Ok(self.table_info(table)?.into_iter().map(|(name, _)| name).collect())
    }

    fn read_table(&self, table: &str) -> Result<RecordBatch> {
        self.ensure_table(table)?;
        let declared = self.table_info(table)?;

        let sql = format!("SELECT * FROM {}", quote_identifier(table));
        let mut stmt = self.conn.prepare(&sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut values: Vec<Vec<Value>> = vec![Vec::new(); names.len()];
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            for (i, column) in values.iter_mut().enumerate() {
                column.push(row.get::<_, Value>(i)?);
            }
        }

        let columns = names
            .into_iter()
            .zip(values)
            .map(|(name, column)| {
                let decl = declared
                    .iter()
                    .find(|(n, _)| *n == name)
                    .map_or("", |(_, t)| t.as_str());
                let array = column_to_array(&column, decl);
                (name, array)
            })
            .collect::<Vec<_>>();

        let batch = build_batch(columns)?;
        debug!(
            table,
            rows = batch.num_rows(),
            columns = batch.num_columns(),
            "loaded SQLite table"
        );
        Ok(batch)
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Integer,
    Real,
    Text,
}

fn declared_kind(decl: &str) -> ColumnKind {
    let decl = decl.to_uppercase();
    if decl.contains("INT") {
        ColumnKind::Integer
    } else if decl.contains("CHAR") || decl.contains("CLOB") || decl.contains("TEXT") {
        ColumnKind::Text
    } else {
        ColumnKind::Real
    }
}

fn observed_kind(values: &[Value], decl: &str) -> ColumnKind {
    let mut kind: Option<ColumnKind> = None;
    for value in values {
        let this = match value {
            Value::Null => continue,
            Value::Integer(_) => ColumnKind::Integer,
            Value::Real(_) => ColumnKind::Real,
            Value::Text(_) | Value::Blob(_) => return ColumnKind::Text,
        };
        kind = Some(match (kind, this) {
            (Some(ColumnKind::Real), _) | (_, ColumnKind::Real) => ColumnKind::Real,
            _ => ColumnKind::Integer,
        });
    }
    kind.unwrap_or_else(|| declared_kind(decl))
}

#[allow(clippy::cast_precision_loss)]
fn column_to_array(values: &[Value], decl: &str) -> ArrayRef {
    match observed_kind(values, decl) {
        ColumnKind::Integer => Arc::new(
            values
                .iter()
                .map(|v| match v {
                    Value::Integer(i) => Some(*i),
                    _ => None,
                })
                .collect::<Int64Array>(),
        ),
        ColumnKind::Real => Arc::new(
            values
                .iter()
                .map(|v| match v {
                    Value::Integer(i) => Some(*i as f64),
                    Value::Real(r) => Some(*r),
                    _ => None,
                })
                .collect::<Float64Array>(),
        ),
        ColumnKind::Text => Arc::new(
            values
                .iter()
                .map(|v| match v {
                    Value::Null => None,
                    Value::Integer(i) => Some(i.to_string()),
                    Value::Real(r) => Some(r.to_string()),
                    Value::Text(s) => Some(s.clone()),
                    Value::Blob(b) => Some(String::from_utf8_lossy(b).into_owned()),
                })
                .collect::<StringArray>(),
        ),
    }
}
