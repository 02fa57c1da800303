//! Feature normalization
//!
//! Every feature column is rescaled as `(x - center) / scale`, with `center`
//! and `scale` fit on a sample of rows and then applied to all rows:
//!
//! | Method          | Center | Scale                         |
//! |-----------------|--------|-------------------------------|
//! | `standardize`   | mean   | population std                |
//! | `robustize`     | median | IQR (25th to 75th percentile) |
//! | `mad_robustize` | median | `1.4826 * MAD + 1e-18`        |
//!
//! A zero std or IQR uses scale 1 so constant features become 0, not NaN.
//! Nulls stay null; metadata columns pass through untouched.

use crate::features::FeatureSpec;
use crate::stats;
use crate::table::{build_batch, float_values, named_columns, require_column, string_values};
use crate::transform::TableTransform;
use crate::{Error, Result};
use arrow::array::{ArrayRef, Float64Array};
use arrow::record_batch::RecordBatch;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Guards the MAD denominator against division by zero
pub const MAD_EPSILON: f64 = 1e-18;

/// Normalization method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NormalizationMethod {
    /// Mean and population standard deviation
    #[default]
    Standardize,
    /// Median and interquartile range
    Robustize,
    /// Median and scaled median absolute deviation
    MadRobustize,
}

impl NormalizationMethod {
    /// Configuration name of the method
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Standardize => "standardize",
            Self::Robustize => "robustize",
            Self::MadRobustize => "mad_robustize",
        }
    }

    /// `(center, scale)` fit on `values`; `None` if `values` is empty
    #[must_use]
    pub fn fit(&self, values: &[f64]) -> Option<(f64, f64)> {
        let nonzero = |s: f64| if s == 0.0 { 1.0 } else { s };
        match self {
            Self::Standardize => Some((stats::mean(values)?, nonzero(stats::population_std(values)?))),
            Self::Robustize => Some((stats::median(values)?, nonzero(stats::iqr(values)?))),
            Self::MadRobustize => Some((
                stats::median(values)?,
                stats::MAD_NORMAL_SCALE * stats::median_absolute_deviation(values)? + MAD_EPSILON,
            )),
        }
    }
}

impl fmt::Display for NormalizationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NormalizationMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "standardize" => Ok(Self::Standardize),
            "robustize" => Ok(Self::Robustize),
            "mad_robustize" => Ok(Self::MadRobustize),
            other => Err(Error::config(format!(
                "Unknown normalization method: {other} (expected standardize, robustize or mad_robustize)"
            ))),
        }
    }
}

/// Rows the normalization statistics are fit on
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SampleSelection {
    /// Every row
    #[default]
    All,
    /// Rows where `column` renders as `value` (e.g. control wells)
    Matching {
        /// Metadata column
        column: String,
        /// Required value
        value: String,
    },
}

impl FromStr for SampleSelection {
    type Err = Error;

    /// Parse `all` or `<column> == <value>`; the value may be quoted
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "all" {
            return Ok(Self::All);
        }
        let (column, value) = s.split_once("==").ok_or_else(|| {
            Error::config(format!(
                "Invalid samples expression: {s} (expected \"all\" or \"<column> == <value>\")"
            ))
        })?;
        let column = column.trim();
        let value = value.trim();
        let value = value
            .strip_prefix('\'')
            .and_then(|v| v.strip_suffix('\''))
            .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
            .unwrap_or(value);
        if column.is_empty() {
            return Err(Error::config(format!("Invalid samples expression: {s} (empty column)")));
        }
        Ok(Self::Matching {
            column: column.to_string(),
            value: value.to_string(),
        })
    }
}

impl SampleSelection {
    /// Per-row membership mask for `table`
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if the selection column is missing
    pub fn mask(&self, table: &RecordBatch) -> Result<Vec<bool>> {
        match self {
            Self::All => Ok(vec![true; table.num_rows()]),
            Self::Matching { column, value } => {
                let index = require_column(table, column, "normalization input")?;
                Ok(string_values(table.column(index))?
                    .iter()
                    .map(|v| v.as_deref() == Some(value.as_str()))
                    .collect())
            }
        }
    }
}

/// Feature normalizer
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    method: NormalizationMethod,
    samples: SampleSelection,
    features: FeatureSpec,
}

impl Normalizer {
    /// Normalizer fitting on all rows with the default feature prefixes
    #[must_use]
    pub fn new(method: NormalizationMethod) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    /// Fit statistics on a subset of rows
    #[must_use]
    pub fn with_samples(mut self, samples: SampleSelection) -> Self {
        self.samples = samples;
        self
    }

    /// Recognize feature columns by these prefixes
    #[must_use]
    pub fn with_features(mut self, features: FeatureSpec) -> Self {
        self.features = features;
        self
    }

    /// Configured method
    #[must_use]
    pub const fn method(&self) -> NormalizationMethod {
        self.method
    }

    /// Rows of `table` the statistics are fit on
    ///
    /// # Errors
    /// - [`Error::Configuration`] if the sample column is missing
    /// - [`Error::Validation`] if no row is selected
    pub fn fit_mask(&self, table: &RecordBatch) -> Result<Vec<bool>> {
        let mask = self.samples.mask(table)?;
        if !mask.contains(&true) {
            return Err(Error::validation(format!(
                "Normalization sample is empty ({:?} selected 0 of {} rows)",
                self.samples,
                table.num_rows()
            )));
        }
        Ok(mask)
    }
}

impl TableTransform for Normalizer {
    fn name(&self) -> &str {
        self.method.as_str()
    }

    #[instrument(skip_all, fields(method = %self.method))]
    fn apply(&self, table: &RecordBatch) -> Result<RecordBatch> {
        let mask = self.fit_mask(table)?;
        let fit_rows = mask.iter().filter(|m| **m).count();

        let feature_indices = self.features.feature_indices(&table.schema());
        let mut columns = named_columns(table);
        for &index in &feature_indices {
            let values = float_values(table.column(index))?;
            let sample: Vec<f64> = values
                .iter()
                .zip(&mask)
                .filter_map(|(v, keep)| if *keep { *v } else { None })
                .collect();

            let normalized: Float64Array = match self.method.fit(&sample) {
                Some((center, scale)) => values
                    .iter()
                    .map(|v| v.map(|x| (x - center) / scale))
                    .collect(),
                None => {
                    debug!(column = %columns[index].0, "no non-null fitting values");
                    values.iter().map(|_| None).collect()
                }
            };
            columns[index].1 = Arc::new(normalized) as ArrayRef;
        }

        debug!(
            features = feature_indices.len(),
            fit_rows,
            rows = table.num_rows(),
            "normalized features"
        );
        build_batch(columns)
    }
}
