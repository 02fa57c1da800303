//! Feature selection
//!
//! An ordered list of operations, each excluding feature columns from the
//! output of the previous one. Metadata columns and rows are never touched.
//!
//! | Operation               | Excludes a feature when                                 |
//! |-------------------------|---------------------------------------------------------|
//! | `variance_threshold`    | near-constant (see [`variance_threshold`])              |
//! | `correlation_threshold` | highly correlated with another, more redundant feature  |
//! | `blocklist`             | its name is on the blocklist                            |
//! | `drop_na_columns`       | null fraction above `na_cutoff`                         |
//! | `drop_outliers`         | any absolute value above `outlier_cutoff`               |
//! | `noise_removal`         | mean within-group std above the cutoff                  |

mod blocklist;
mod correlation;
mod noise;
mod variance;

pub use blocklist::Blocklist;
pub use correlation::correlation_threshold;
pub use noise::noise_removal;
pub use variance::variance_threshold;

use crate::features::FeatureSpec;
use crate::table::{drop_columns, float_values, require_column, string_values};
use crate::transform::TableTransform;
use crate::{Error, Result};
use arrow::record_batch::RecordBatch;
use std::fmt;
use std::str::FromStr;
use tracing::{info, instrument};

/// Default `noise_removal` cutoff when none is configured
pub const DEFAULT_NOISE_STDEV_CUTOFF: f64 = 0.8;

/// One feature selection operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSelectOperation {
    /// Drop near-constant features
    VarianceThreshold,
    /// Drop redundant, highly correlated features
    CorrelationThreshold,
    /// Drop features named on the blocklist
    Blocklist,
    /// Drop features with too many nulls
    DropNaColumns,
    /// Drop features with extreme values
    DropOutliers,
    /// Drop features that vary too much between replicates
    NoiseRemoval,
}

impl FeatureSelectOperation {
    /// Configuration name of the operation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::VarianceThreshold => "variance_threshold",
            Self::CorrelationThreshold => "correlation_threshold",
            Self::Blocklist => "blocklist",
            Self::DropNaColumns => "drop_na_columns",
            Self::DropOutliers => "drop_outliers",
            Self::NoiseRemoval => "noise_removal",
        }
    }
}

impl fmt::Display for FeatureSelectOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureSelectOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "variance_threshold" => Ok(Self::VarianceThreshold),
            "correlation_threshold" => Ok(Self::CorrelationThreshold),
            "blocklist" => Ok(Self::Blocklist),
            "drop_na_columns" => Ok(Self::DropNaColumns),
            "drop_outliers" => Ok(Self::DropOutliers),
            "noise_removal" => Ok(Self::NoiseRemoval),
            other => Err(Error::config(format!(
                "Unknown feature selection operation: {other} (expected variance_threshold, \
                 correlation_threshold, blocklist, drop_na_columns, drop_outliers or noise_removal)"
            ))),
        }
    }
}

/// Thresholds and inputs of the selection operations
#[derive(Debug, Clone)]
pub struct SelectionParams {
    /// `variance_threshold`: second/first most common value count cutoff
    pub freq_cut: f64,
    /// `variance_threshold`: distinct/rows cutoff
    pub unique_cut: f64,
    /// `correlation_threshold`: absolute Pearson cutoff
    pub correlation_threshold: f64,
    /// `drop_na_columns`: maximum tolerated null fraction
    pub na_cutoff: f64,
    /// `drop_outliers`: maximum tolerated absolute value
    pub outlier_cutoff: f64,
    /// `blocklist`: names to drop
    pub blocklist: Blocklist,
    /// `noise_removal`: metadata column grouping replicates
    pub noise_removal_perturb_column: Option<String>,
    /// `noise_removal`: maximum tolerated mean within-group std
    pub noise_removal_stdev_cutoff: Option<f64>,
}

impl Default for SelectionParams {
    fn default() -> Self {
        Self {
            freq_cut: 0.05,
            unique_cut: 0.01,
            correlation_threshold: 0.9,
            na_cutoff: 0.05,
            outlier_cutoff: 500.0,
            blocklist: Blocklist::default(),
            noise_removal_perturb_column: None,
            noise_removal_stdev_cutoff: None,
        }
    }
}

/// One feature column's values, nulls and NaN as `None`
#[derive(Debug, Clone)]
pub struct FeatureColumn {
    /// Column name
    pub name: String,
    /// Column values
    pub values: Vec<Option<f64>>,
}

impl FeatureColumn {
    /// Non-null values
    #[must_use]
    pub fn present(&self) -> Vec<f64> {
        self.values.iter().flatten().copied().collect()
    }
}

/// Ordered feature selection, applied as one [`TableTransform`]
#[derive(Debug, Clone)]
pub struct FeatureSelector {
    operations: Vec<FeatureSelectOperation>,
    params: SelectionParams,
    features: FeatureSpec,
}

impl FeatureSelector {
    /// Selector with default parameters and feature prefixes
    #[must_use]
    pub fn new(operations: Vec<FeatureSelectOperation>) -> Self {
        Self {
            operations,
            params: SelectionParams::default(),
            features: FeatureSpec::default(),
        }
    }

    /// Replace the operation parameters
    #[must_use]
    pub fn with_params(mut self, params: SelectionParams) -> Self {
        self.params = params;
        self
    }

    /// Recognize feature columns by these prefixes
    #[must_use]
    pub fn with_features(mut self, features: FeatureSpec) -> Self {
        self.features = features;
        self
    }

    /// Configured operations, in application order
    #[must_use]
    pub fn operations(&self) -> &[FeatureSelectOperation] {
        &self.operations
    }

    /// Check that every operation has usable parameters
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for a ratio outside `[0, 1]`, a
    /// negative cutoff, or `noise_removal` without a perturbation column
    pub fn validated(self) -> Result<Self> {
        let p = &self.params;
        for (name, value) in [
            ("freq_cut", p.freq_cut),
            ("unique_cut", p.unique_cut),
            ("correlation_threshold", p.correlation_threshold),
            ("na_cutoff", p.na_cutoff),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::config(format!("{name} must be within [0, 1], got {value}")));
            }
        }
        if p.outlier_cutoff.is_nan() || p.outlier_cutoff < 0.0 {
            return Err(Error::config(format!(
                "outlier_cutoff must be non-negative, got {}",
                p.outlier_cutoff
            )));
        }
        if self.operations.contains(&FeatureSelectOperation::NoiseRemoval) {
            if p.noise_removal_perturb_column.is_none() {
                return Err(Error::config(
                    "noise_removal requires noise_removal_perturb_column",
                ));
            }
            if p.noise_removal_stdev_cutoff.is_some_and(|c| c.is_nan() || c < 0.0) {
                return Err(Error::config("noise_removal_stdev_cutoff must be non-negative"));
            }
        }
        Ok(self)
    }

    fn feature_columns(&self, table: &RecordBatch) -> Result<Vec<(usize, FeatureColumn)>> {
        let schema = table.schema();
        self.features
            .feature_indices(&schema)
            .into_iter()
            .map(|i| {
                Ok((
                    i,
                    FeatureColumn {
                        name: schema.field(i).name().clone(),
                        values: float_values(table.column(i))?,
                    },
                ))
            })
            .collect()
    }

    /// Names of the features `operation` excludes from `table`
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if `noise_removal` is missing its
    /// perturbation column
    pub fn excluded(&self, operation: FeatureSelectOperation, table: &RecordBatch) -> Result<Vec<String>> {
        let columns: Vec<FeatureColumn> = self
            .feature_columns(table)?
            .into_iter()
            .map(|(_, c)| c)
            .collect();
        let p = &self.params;
        Ok(match operation {
            FeatureSelectOperation::VarianceThreshold => {
                variance_threshold(&columns, p.freq_cut, p.unique_cut)
            }
            FeatureSelectOperation::CorrelationThreshold => {
                correlation_threshold(&columns, p.correlation_threshold)
            }
            FeatureSelectOperation::Blocklist => columns
                .iter()
                .filter(|c| p.blocklist.contains(&c.name))
                .map(|c| c.name.clone())
                .collect(),
            FeatureSelectOperation::DropNaColumns => drop_na_columns(&columns, p.na_cutoff),
            FeatureSelectOperation::DropOutliers => drop_outliers(&columns, p.outlier_cutoff),
            FeatureSelectOperation::NoiseRemoval => {
                let index = self.perturb_column(table)?;
                let groups = string_values(table.column(index))?;
                noise_removal(
                    &columns,
                    &groups,
                    p.noise_removal_stdev_cutoff
                        .unwrap_or(DEFAULT_NOISE_STDEV_CUTOFF),
                )
            }
        })
    }

    /// Check that `table` has every metadata column the operations read
    ///
    /// Selection never adds or removes metadata, so a check against the
    /// merged table holds for every later stage.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if the `noise_removal` perturbation
    /// column is missing
    pub fn check_input(&self, table: &RecordBatch) -> Result<()> {
        if self.operations.contains(&FeatureSelectOperation::NoiseRemoval) {
            self.perturb_column(table)?;
        }
        Ok(())
    }

    fn perturb_column(&self, table: &RecordBatch) -> Result<usize> {
        let column = self
            .params
            .noise_removal_perturb_column
            .as_deref()
            .ok_or_else(|| Error::config("noise_removal requires noise_removal_perturb_column"))?;
        require_column(table, column, "feature selection input")
    }
}

/// Features whose null fraction exceeds `cutoff`
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn drop_na_columns(columns: &[FeatureColumn], cutoff: f64) -> Vec<String> {
    columns
        .iter()
        .filter(|c| {
            let rows = c.values.len();
            rows > 0 && c.values.iter().filter(|v| v.is_none()).count() as f64 / rows as f64 > cutoff
        })
        .map(|c| c.name.clone())
        .collect()
}

/// Features with a maximum or minimum absolute value above `cutoff`
#[must_use]
pub fn drop_outliers(columns: &[FeatureColumn], cutoff: f64) -> Vec<String> {
    columns
        .iter()
        .filter(|c| c.values.iter().flatten().any(|v| v.abs() > cutoff))
        .map(|c| c.name.clone())
        .collect()
}

impl TableTransform for FeatureSelector {
    fn name(&self) -> &str {
        "feature_select"
    }

    #[instrument(skip_all, fields(operations = self.operations.len()))]
    fn apply(&self, table: &RecordBatch) -> Result<RecordBatch> {
        let mut current = table.clone();
        for &operation in &self.operations {
            let excluded = self.excluded(operation, &current)?;
            let schema = current.schema();
            let indices: Vec<usize> = excluded
                .iter()
                .filter_map(|name| schema.index_of(name).ok())
                .collect();
            current = drop_columns(&current, &indices)?;
            info!(
                operation = %operation,
                dropped = indices.len(),
                remaining = current.num_columns(),
                "feature selection step"
            );
        }
        Ok(current)
    }
}
