//! Pipeline configuration
//!
//! Everything the extraction script used to hardcode (store location,
//! compartments, linking map, plate-map join columns, normalization method,
//! selection operations, output directory) is an explicit field here, loaded
//! from TOML:
//!
//! ```toml
//! summary_column = "Metadata_genotype"
//! crosstab_column = "Metadata_Well"
//!
//! [store]
//! path = "sqlite:///../CellProfiler_pipelines/Analysis_Output/NF1_data.sqlite"
//! image_table = "Per_Image"
//! compartments = ["Per_Cells", "Per_Cytoplasm", "Per_Nuclei"]
//! merge_columns = ["ImageNumber"]
//! strata = ["Image_Metadata_Well", "Image_Metadata_Plate"]
//!
//! [store.linking.Per_Cytoplasm]
//! Per_Cells = "Cytoplasm_Parent_Cells"
//! Per_Nuclei = "Cytoplasm_Parent_OrigNuclei"
//!
//! [store.linking.Per_Cells]
//! Per_Cytoplasm = "Cells_Number_Object_Number"
//!
//! [store.linking.Per_Nuclei]
//! Per_Cytoplasm = "Nuclei_Number_Object_Number"
//!
//! [platemap]
//! path = "../CellProfiler_pipelines/Metadata/platemap_NF1_CP.csv"
//! join_on = ["Metadata_well_position", "Image_Metadata_Well"]
//!
//! [normalize]
//! method = "standardize"
//!
//! [feature_select]
//! operations = ["variance_threshold", "correlation_threshold", "blocklist"]
//!
//! [output]
//! directory = "data"
//! prefix = "nf1"
//! ```
//!
//! Method, operation and sample names stay strings until [`PipelineConfig::validate`]
//! so that an unknown name surfaces as a configuration error, not a parse error.

use crate::feature_select::{Blocklist, FeatureSelectOperation, FeatureSelector, SelectionParams};
use crate::features::FeatureSpec;
use crate::normalize::{NormalizationMethod, Normalizer, SampleSelection};
use crate::output::{Compression, OutputFormat, OutputOptions};
use crate::{Error, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// `compartment -> (linked compartment -> linking column in compartment)`
///
/// For a pair (A, B), `links[A][B]` is the column of A whose values match
/// `links[B][A]` in B. Declaration order drives merge order.
pub type LinkingMap = IndexMap<String, IndexMap<String, String>>;

/// Complete pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Metadata column summarized (value counts, crosstab against well) in logs
    #[serde(default)]
    pub summary_column: Option<String>,
    /// Column the summary column is cross-tabulated against
    #[serde(default = "default_crosstab_column")]
    pub crosstab_column: String,
    /// Measurement store and merge layout
    pub store: StoreConfig,
    /// Plate map annotation
    pub platemap: PlatemapConfig,
    /// Normalization stage
    #[serde(default)]
    pub normalize: NormalizeConfig,
    /// Feature selection stage
    #[serde(default)]
    pub feature_select: FeatureSelectConfig,
    /// Output artifacts
    pub output: OutputConfig,
}

/// Measurement store and compartment merge layout
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// SQLite file (optionally `sqlite:///`-prefixed) or Parquet directory
    pub path: String,
    /// Per-image table providing strata
    #[serde(default = "default_image_table")]
    pub image_table: String,
    /// Compartment tables to merge
    pub compartments: Vec<String>,
    /// Columns shared by every table (join keys)
    #[serde(default = "default_merge_columns")]
    pub merge_columns: Vec<String>,
    /// Image-level columns attached to every cell
    #[serde(default)]
    pub strata: Vec<String>,
    /// Parent/child linking columns between compartments
    #[serde(default)]
    pub linking: LinkingMap,
    /// Permit one parent object with several children
    #[serde(default)]
    pub allow_one_to_many: bool,
    /// Feature column prefixes; derived from compartment names when absent
    #[serde(default)]
    pub feature_prefixes: Option<Vec<String>>,
}

fn default_crosstab_column() -> String {
    "Metadata_Well".to_string()
}

fn default_image_table() -> String {
    "Per_Image".to_string()
}

fn default_merge_columns() -> Vec<String> {
    vec!["ImageNumber".to_string()]
}

impl StoreConfig {
    /// Feature columns recognized downstream of the merge
    #[must_use]
    pub fn feature_spec(&self) -> FeatureSpec {
        self.feature_prefixes.as_ref().map_or_else(
            || FeatureSpec::from_compartments(&self.compartments),
            |prefixes| FeatureSpec::new(prefixes.iter().cloned()),
        )
    }
}

/// Plate-map column and profile column joined on
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "[String; 2]")]
pub struct JoinOn {
    /// Plate-map column, after `Metadata_` prefixing (e.g. `Metadata_well_position`)
    pub platemap_column: String,
    /// Single-cell profile column (e.g. `Image_Metadata_Well`)
    pub profile_column: String,
}

impl From<[String; 2]> for JoinOn {
    fn from([platemap_column, profile_column]: [String; 2]) -> Self {
        Self {
            platemap_column,
            profile_column,
        }
    }
}

impl JoinOn {
    /// Create a join specification
    pub fn new(platemap_column: impl Into<String>, profile_column: impl Into<String>) -> Self {
        Self {
            platemap_column: platemap_column.into(),
            profile_column: profile_column.into(),
        }
    }
}

/// Plate map input
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlatemapConfig {
    /// Delimited plate-map file (optionally gzip-compressed)
    pub path: PathBuf,
    /// `[platemap column, profile column]`
    pub join_on: JoinOn,
    /// Field delimiter
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

const fn default_delimiter() -> char {
    ','
}

/// Normalization stage
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NormalizeConfig {
    /// `standardize`, `robustize` or `mad_robustize`
    pub method: String,
    /// `all` or `<column> == <value>`: rows the statistics are fit on
    pub samples: String,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            method: "standardize".to_string(),
            samples: "all".to_string(),
        }
    }
}

/// Feature selection stage
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeatureSelectConfig {
    /// Operation names, applied in order
    pub operations: Vec<String>,
    /// `variance_threshold`: second/first most common value ratio cutoff
    pub freq_cut: f64,
    /// `variance_threshold`: distinct/rows ratio cutoff
    pub unique_cut: f64,
    /// `correlation_threshold`: absolute Pearson cutoff
    pub correlation_threshold: f64,
    /// `drop_na_columns`: maximum tolerated null fraction
    pub na_cutoff: f64,
    /// `drop_outliers`: maximum tolerated absolute value
    pub outlier_cutoff: f64,
    /// `blocklist`: file of feature names; embedded default when absent
    pub blocklist_file: Option<PathBuf>,
    /// `noise_removal`: metadata column grouping replicate perturbations
    pub noise_removal_perturb_column: Option<String>,
    /// `noise_removal`: maximum tolerated mean within-group std
    pub noise_removal_stdev_cutoff: Option<f64>,
}

impl Default for FeatureSelectConfig {
    fn default() -> Self {
        let params = SelectionParams::default();
        Self {
            operations: vec![
                "variance_threshold".to_string(),
                "correlation_threshold".to_string(),
                "blocklist".to_string(),
            ],
            freq_cut: params.freq_cut,
            unique_cut: params.unique_cut,
            correlation_threshold: params.correlation_threshold,
            na_cutoff: params.na_cutoff,
            outlier_cutoff: params.outlier_cutoff,
            blocklist_file: None,
            noise_removal_perturb_column: None,
            noise_removal_stdev_cutoff: None,
        }
    }
}

/// Output artifacts
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Directory receiving all artifacts (created when missing)
    pub directory: PathBuf,
    /// File-name prefix, e.g. `nf1` -> `nf1_sc_cellprofiler.csv.gz`
    pub prefix: String,
    /// Tabular format
    #[serde(default)]
    pub format: OutputFormat,
    /// Stream compression for delimited output
    #[serde(default)]
    pub compression: Compression,
}

impl PipelineConfig {
    /// Parse a TOML document
    ///
    /// # Errors
    /// Returns [`Error::Config`] if the document is malformed
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML file
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the file cannot be read, or [`Error::Config`]
    /// if it is malformed
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Check every name-valued setting without touching the measurement store
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for an unknown method, operation or
    /// sample expression, an empty compartment list, or an unusable output
    /// format/compression combination
    pub fn validate(&self) -> Result<()> {
        if self.store.compartments.is_empty() {
            return Err(Error::config("At least one compartment is required"));
        }
        if self.output.prefix.trim().is_empty() {
            return Err(Error::config("Output prefix must not be empty"));
        }
        self.normalizer()?;
        self.feature_selector()?;
        self.output_options().validate()
    }

    /// Feature columns recognized by the normalize and select stages
    #[must_use]
    pub fn feature_spec(&self) -> FeatureSpec {
        self.store.feature_spec()
    }

    /// Normalizer described by `[normalize]`
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for an unknown method or sample expression
    pub fn normalizer(&self) -> Result<Normalizer> {
        let method: NormalizationMethod = self.normalize.method.parse()?;
        let samples: SampleSelection = self.normalize.samples.parse()?;
        Ok(Normalizer::new(method)
            .with_samples(samples)
            .with_features(self.feature_spec()))
    }

    /// Feature selector described by `[feature_select]`
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for an unknown operation or missing
    /// operation parameter, [`Error::Io`] if the blocklist file is unreadable
    pub fn feature_selector(&self) -> Result<FeatureSelector> {
        let fs = &self.feature_select;
        let operations = fs
            .operations
            .iter()
            .map(|op| op.parse::<FeatureSelectOperation>())
            .collect::<Result<Vec<_>>>()?;

        let blocklist = match &fs.blocklist_file {
            Some(path) if operations.contains(&FeatureSelectOperation::Blocklist) => {
                Blocklist::from_file(path)?
            }
            _ => Blocklist::default(),
        };

        let params = SelectionParams {
            freq_cut: fs.freq_cut,
            unique_cut: fs.unique_cut,
            correlation_threshold: fs.correlation_threshold,
            na_cutoff: fs.na_cutoff,
            outlier_cutoff: fs.outlier_cutoff,
            blocklist,
            noise_removal_perturb_column: fs.noise_removal_perturb_column.clone(),
            noise_removal_stdev_cutoff: fs.noise_removal_stdev_cutoff,
        };

        FeatureSelector::new(operations)
            .with_params(params)
            .with_features(self.feature_spec())
            .validated()
    }

    /// Writer options described by `[output]`
    #[must_use]
    pub const fn output_options(&self) -> OutputOptions {
        OutputOptions {
            format: self.output.format,
            compression: self.output.compression,
        }
    }
}
