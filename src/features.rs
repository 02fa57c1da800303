//! Feature vs metadata column inference
//!
//! A feature is a numeric column named `<compartment prefix>_...`
//! (`Cells_AreaShape_Area`, `Nuclei_Intensity_MeanIntensity_DAPI`). Every
//! other column, including `Metadata_*` keys and `Image_*` strata, is
//! metadata and passes through every stage untouched.

use crate::table::is_numeric;
use arrow::datatypes::Schema;

/// Prefix that marks identifying/experimental metadata columns
pub const METADATA_PREFIX: &str = "Metadata_";

/// Prefix CellProfiler puts in front of per-object table names
pub const COMPARTMENT_TABLE_PREFIX: &str = "Per_";

/// Compartment prefixes recognized as feature columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSpec {
    prefixes: Vec<String>,
}

impl Default for FeatureSpec {
    fn default() -> Self {
        Self::new(["Cells", "Cytoplasm", "Nuclei"])
    }
}

impl FeatureSpec {
    /// Create a spec from compartment prefixes (without trailing underscore)
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    /// Derive prefixes from compartment table names (`Per_Cells` -> `Cells`)
    #[must_use]
    pub fn from_compartments(compartments: &[String]) -> Self {
        Self::new(compartments.iter().map(|c| compartment_prefix(c).to_string()))
    }

    /// Configured prefixes
    #[must_use]
    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// Whether a column name carries one of the compartment prefixes
    #[must_use]
    pub fn matches_name(&self, name: &str) -> bool {
        !name.starts_with(METADATA_PREFIX)
            && self.prefixes.iter().any(|p| {
                name.strip_prefix(p.as_str())
                    .is_some_and(|rest| rest.starts_with('_'))
            })
    }

    /// Indices of feature columns in `schema`
    #[must_use]
    pub fn feature_indices(&self, schema: &Schema) -> Vec<usize> {
        schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, f)| is_numeric(f.data_type()) && self.matches_name(f.name()))
            .map(|(i, _)| i)
            .collect()
    }

    /// Indices of metadata (non-feature) columns in `schema`
    #[must_use]
    pub fn metadata_indices(&self, schema: &Schema) -> Vec<usize> {
        let features = self.feature_indices(schema);
        (0..schema.fields().len())
            .filter(|i| !features.contains(i))
            .collect()
    }
}

/// Compartment prefix of a table name (`Per_Cytoplasm` -> `Cytoplasm`)
#[must_use]
pub fn compartment_prefix(table: &str) -> &str {
    table.strip_prefix(COMPARTMENT_TABLE_PREFIX).unwrap_or(table)
}

/// `Metadata_`-prefixed form of a column name (idempotent)
#[must_use]
pub fn metadata_name(name: &str) -> String {
    if name.starts_with(METADATA_PREFIX) {
        name.to_string()
    } else {
        format!("{METADATA_PREFIX}{name}")
    }
}
