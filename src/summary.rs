//! Count summaries of metadata columns
//!
//! Used after the merge to sanity-check annotation: how many cells each
//! genotype has, and whether every well maps to exactly one genotype.

use crate::table::{require_column, string_values};
use crate::Result;
use arrow::record_batch::RecordBatch;
use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::fmt;

/// Count occurrences of each non-null value of `column`
///
/// Sorted by count (descending), then value.
///
/// # Errors
/// Returns [`crate::Error::Configuration`] if the column is missing
pub fn value_counts(table: &RecordBatch, column: &str) -> Result<Vec<(String, usize)>> {
    let index = require_column(table, column, "summary input")?;
    let mut counts: IndexMap<String, usize> = IndexMap::new();
    for value in string_values(table.column(index))?.into_iter().flatten() {
        *counts.entry(value).or_default() += 1;
    }
    let mut counts: Vec<(String, usize)> = counts.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Ok(counts)
}

/// Contingency table of two categorical columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossTab {
    /// Row labels, sorted
    pub rows: Vec<String>,
    /// Column labels, sorted
    pub columns: Vec<String>,
    /// `counts[row][column]`
    pub counts: Vec<Vec<usize>>,
}

impl CrossTab {
    /// Count for a `(row, column)` label pair; 0 when either label is unknown
    #[must_use]
    pub fn get(&self, row: &str, column: &str) -> usize {
        let r = self.rows.iter().position(|x| x == row);
        let c = self.columns.iter().position(|x| x == column);
        match (r, c) {
            (Some(r), Some(c)) => self.counts[r][c],
            _ => 0,
        }
    }

    /// Cells outside each column's dominant row
    ///
    /// Zero when every column label (e.g. a well) co-occurs with exactly one
    /// row label (e.g. a genotype).
    #[must_use]
    pub fn off_diagonal_total(&self) -> usize {
        (0..self.columns.len())
            .map(|c| {
                let column: Vec<usize> = self.counts.iter().map(|row| row[c]).collect();
                let total: usize = column.iter().sum();
                total - column.iter().max().copied().unwrap_or(0)
            })
            .sum()
    }
}

impl fmt::Display for CrossTab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.rows.iter().map(String::len).max().unwrap_or(0);
        write!(f, "{:width$}", "")?;
        for column in &self.columns {
            write!(f, " {column:>6}")?;
        }
        for (label, counts) in self.rows.iter().zip(&self.counts) {
            write!(f, "\n{label:width$}")?;
            for count in counts {
                write!(f, " {count:>6}")?;
            }
        }
        Ok(())
    }
}

/// Cross-tabulate `row_column` against `col_column`; rows with a null in
/// either column are skipped
///
/// # Errors
/// Returns [`crate::Error::Configuration`] if either column is missing
pub fn crosstab(table: &RecordBatch, row_column: &str, col_column: &str) -> Result<CrossTab> {
    let rows = string_values(table.column(require_column(table, row_column, "summary input")?))?;
    let cols = string_values(table.column(require_column(table, col_column, "summary input")?))?;

    let pairs: Vec<(String, String)> = rows
        .into_iter()
        .zip(cols)
        .filter_map(|(r, c)| Some((r?, c?)))
        .collect();
    let row_labels: Vec<String> = pairs.iter().map(|(r, _)| r.clone()).collect::<BTreeSet<_>>().into_iter().collect();
    let col_labels: Vec<String> = pairs.iter().map(|(_, c)| c.clone()).collect::<BTreeSet<_>>().into_iter().collect();

    let mut counts = vec![vec![0usize; col_labels.len()]; row_labels.len()];
    for (r, c) in &pairs {
        // Labels come from `pairs`, so both searches succeed
        if let (Ok(ri), Ok(ci)) = (row_labels.binary_search(r), col_labels.binary_search(c)) {
            counts[ri][ci] += 1;
        }
    }

    Ok(CrossTab {
        rows: row_labels,
        columns: col_labels,
        counts,
    })
}
