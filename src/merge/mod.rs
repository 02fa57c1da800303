//! Loader and Merger: compartment tables to one row per cell
//!
//! [`SingleCells::open`] validates the whole layout (compartments, linking
//! map, merge columns, strata) against the store's column listings before a
//! single row is read. [`SingleCells::merge_single_cells`] then:
//!
//! 1. Walks the linking map in declaration order, inner-joining each new
//!    compartment onto the accumulated table
//!    (`merge_columns + [links[left][right]]` = `merge_columns + [links[right][left]]`)
//! 2. Attaches image strata by the merge columns (cells without an image keep
//!    null strata)
//! 3. Renames merge and linking columns to `Metadata_<name>`
//! 4. Annotates with the plate map (see [`annotate()`])
//!
//! Every row lost to a join is reported with `warn!`.

mod annotate;
mod join;

pub use annotate::{annotate, clean_image_metadata, metadata_first, IMAGE_METADATA_PREFIX};
pub use join::{composite_keys, key_values, InnerJoin, KeyValue, LookupJoin, LookupOutput};

use crate::config::{JoinOn, LinkingMap, StoreConfig};
use crate::features::metadata_name;
use crate::storage::{open_store, MeasurementStore};
use crate::table::rename_columns;
use crate::{Error, Result};
use arrow::record_batch::RecordBatch;
use rustc_hash::FxHashSet;
use tracing::{info, instrument, warn};

/// One step of the compartment merge: join `right` onto the accumulated table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeStep {
    /// Compartment already in the accumulated table
    pub left: String,
    /// Compartment joined in by this step
    pub right: String,
    /// Linking column of `left`
    pub left_column: String,
    /// Linking column of `right`
    pub right_column: String,
}

/// Validated single-cell layout over a measurement store
pub struct SingleCells {
    store: Box<dyn MeasurementStore>,
    config: StoreConfig,
    plan: Vec<MergeStep>,
}

impl std::fmt::Debug for SingleCells {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleCells")
            .field("compartments", &self.config.compartments)
            .field("plan", &self.plan)
            .finish_non_exhaustive()
    }
}

impl SingleCells {
    /// Open the store named by `config.path` and validate the layout
    ///
    /// # Errors
    /// - [`Error::Io`] if the store does not exist
    /// - [`Error::Configuration`] as for [`SingleCells::open`]
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        Self::open(open_store(&config.path)?, config)
    }

    /// Validate `config` against `store`
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] when a compartment or the image table
    /// is missing, the linking map names an unknown compartment, is one-sided,
    /// references a missing column or leaves a compartment unlinked, or a merge
    /// or strata column is missing
    #[instrument(skip_all, fields(compartments = config.compartments.len()))]
    pub fn open<S>(store: S, config: &StoreConfig) -> Result<Self>
    where
        S: MeasurementStore + 'static,
    {
        if config.compartments.is_empty() {
            return Err(Error::config("At least one compartment is required"));
        }
        let tables = store.table_names()?;
        let uses_image = !config.strata.is_empty();

        let mut required: Vec<&String> = config.compartments.iter().collect();
        if uses_image {
            required.push(&config.image_table);
        }
        for table in &required {
            if !tables.contains(*table) {
                return Err(crate::storage::missing_table(table, &tables));
            }
        }

        for compartment in &config.compartments {
            let columns = store.columns(compartment)?;
            for merge_column in &config.merge_columns {
                if !columns.contains(merge_column) {
                    return Err(Error::config(format!(
                        "Merge column {merge_column} not found in compartment {compartment}"
                    )));
                }
            }
        }

        if uses_image {
            let columns = store.columns(&config.image_table)?;
            for column in config.merge_columns.iter().chain(&config.strata) {
                if !columns.contains(column) {
                    return Err(Error::config(format!(
                        "Column {column} not found in image table {}",
                        config.image_table
                    )));
                }
            }
        }

        let plan = merge_plan(&config.linking, &config.compartments)?;
        for step in &plan {
            for (table, column) in [(&step.left, &step.left_column), (&step.right, &step.right_column)] {
                if !store.columns(table)?.contains(column) {
                    return Err(Error::config(format!(
                        "Linking column {column} not found in compartment {table}"
                    )));
                }
            }
        }

        info!(
            compartments = ?config.compartments,
            steps = plan.len(),
            "validated single-cell layout"
        );
        Ok(Self {
            store: Box::new(store),
            config: config.clone(),
            plan,
        })
    }

    /// Ordered merge steps derived from the linking map
    #[must_use]
    pub fn plan(&self) -> &[MergeStep] {
        &self.plan
    }

    /// Compartments in configuration order
    #[must_use]
    pub fn compartments(&self) -> &[String] {
        &self.config.compartments
    }

    /// Join compartments and image strata into one row per cell
    ///
    /// # Errors
    /// - [`Error::Validation`] if the compartments yield zero rows or linkage
    ///   is not one-to-one while `allow_one_to_many` is off
    /// - IO-class errors if a table cannot be read
    #[instrument(skip_all)]
    pub fn merge_compartments(&self) -> Result<RecordBatch> {
        let merge_columns = &self.config.merge_columns;

        let mut merged = match self.plan.first() {
            Some(step) => self.store.read_table(&step.left)?,
            None => self.store.read_table(&self.config.compartments[0])?,
        };
        for step in &self.plan {
            let right = self.store.read_table(&step.right)?;
            let join = InnerJoin {
                left_name: &step.left,
                right_name: &step.right,
                left_on: with_key(merge_columns, &step.left_column),
                right_on: with_key(merge_columns, &step.right_column),
                allow_duplicates: self.config.allow_one_to_many,
            };
            merged = join.execute(&merged, &right)?;
            info!(
                left = %step.left,
                right = %step.right,
                rows = merged.num_rows(),
                columns = merged.num_columns(),
                "merged compartment"
            );
        }

        if merged.num_rows() == 0 {
            return Err(Error::validation(format!(
                "Merging compartments {:?} produced zero rows; check the linking columns",
                self.config.compartments
            )));
        }

        if !self.config.strata.is_empty() {
            merged = self.attach_image_data(&merged)?;
        }

        let identifying: FxHashSet<&str> = merge_columns
            .iter()
            .chain(self.plan.iter().flat_map(|s| [&s.left_column, &s.right_column]))
            .map(String::as_str)
            .collect();
        rename_columns(&merged, |name| {
            if identifying.contains(name) {
                metadata_name(name)
            } else {
                name.to_string()
            }
        })
    }

    fn attach_image_data(&self, cells: &RecordBatch) -> Result<RecordBatch> {
        let image = self.store.read_table(&self.config.image_table)?;
        let schema = image.schema();
        let projection = self
            .config
            .merge_columns
            .iter()
            .chain(&self.config.strata)
            .map(|c| schema.index_of(c))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let image = image.project(&projection)?;

        let joined = LookupJoin {
            lookup_name: &self.config.image_table,
            primary_on: self.config.merge_columns.clone(),
            lookup_on: self.config.merge_columns.clone(),
            keep_unmatched: true,
        }
        .execute(cells, &image)?;
        if joined.unmatched > 0 {
            warn!(
                cells = joined.unmatched,
                image_table = %self.config.image_table,
                "cells without an image row have null strata"
            );
        }
        Ok(joined.batch)
    }

    /// Merge compartments, attach strata and annotate with the plate map
    ///
    /// # Errors
    /// As [`SingleCells::merge_compartments`] and [`annotate()`]
    #[instrument(skip_all, fields(platemap_column = %join_on.platemap_column, profile_column = %join_on.profile_column))]
    pub fn merge_single_cells(&self, platemap: &RecordBatch, join_on: &JoinOn) -> Result<RecordBatch> {
        let merged = self.merge_compartments()?;
        annotate(&merged, platemap, join_on)
    }
}

fn with_key(merge_columns: &[String], key: &str) -> Vec<String> {
    let mut columns = merge_columns.to_vec();
    columns.push(key.to_string());
    columns
}

/// Derive merge steps from the linking map
///
/// Pairs are visited in declaration order; each unordered pair is merged once.
///
/// # Errors
/// Returns [`Error::Configuration`] if the map names an unknown compartment,
/// declares a pair in only one direction, joins a compartment that is not yet
/// merged or merges one twice, or leaves a compartment unlinked
pub fn merge_plan(linking: &LinkingMap, compartments: &[String]) -> Result<Vec<MergeStep>> {
    for (left, links) in linking {
        for right in std::iter::once(left).chain(links.keys()) {
            if !compartments.contains(right) {
                return Err(Error::config(format!(
                    "Linking map names {right}, which is not a configured compartment"
                )));
            }
        }
        for right in links.keys() {
            if !linking.get(right).is_some_and(|back| back.contains_key(left)) {
                return Err(Error::config(format!(
                    "Linking map declares {left} -> {right} but not {right} -> {left}"
                )));
            }
        }
    }

    let mut plan = Vec::new();
    let mut merged: Vec<&String> = Vec::new();
    let mut seen: FxHashSet<(&String, &String)> = FxHashSet::default();
    for (left, links) in linking {
        for (right, left_column) in links {
            let pair = if left < right { (left, right) } else { (right, left) };
            if !seen.insert(pair) {
                continue;
            }
            if merged.is_empty() {
                merged.push(left);
            } else if !merged.contains(&left) {
                return Err(Error::config(format!(
                    "Linking map joins {left} -> {right} before {left} is merged"
                )));
            }
            if merged.contains(&right) {
                return Err(Error::config(format!(
                    "Linking map merges {right} twice (via {left})"
                )));
            }
            merged.push(right);
            plan.push(MergeStep {
                left: left.clone(),
                right: right.clone(),
                left_column: left_column.clone(),
                right_column: linking[right][left].clone(),
            });
        }
    }

    if compartments.len() > 1 {
        if let Some(unlinked) = compartments.iter().find(|c| !merged.contains(c)) {
            return Err(Error::config(format!(
                "Compartment {unlinked} is not linked to any other compartment"
            )));
        }
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::table::{build_batch, column_names};
    use crate::ErrorKind;
    use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StringArray};
    use indexmap::IndexMap;
    use std::sync::Arc;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    fn nf1_linking() -> LinkingMap {
        let mut linking = IndexMap::new();
        linking.insert(
            "Per_Cytoplasm".to_string(),
            IndexMap::from([
                ("Per_Cells".to_string(), "Cytoplasm_Parent_Cells".to_string()),
                ("Per_Nuclei".to_string(), "Cytoplasm_Parent_OrigNuclei".to_string()),
            ]),
        );
        linking.insert(
            "Per_Cells".to_string(),
            IndexMap::from([("Per_Cytoplasm".to_string(), "Cells_Number_Object_Number".to_string())]),
        );
        linking.insert(
            "Per_Nuclei".to_string(),
            IndexMap::from([("Per_Cytoplasm".to_string(), "Nuclei_Number_Object_Number".to_string())]),
        );
        linking
    }

    fn ints(values: &[i64]) -> ArrayRef {
        Arc::new(Int64Array::from(values.to_vec()))
    }

    fn floats(values: &[f64]) -> ArrayRef {
        Arc::new(Float64Array::from(values.to_vec()))
    }

    fn table(columns: Vec<(&str, ArrayRef)>) -> RecordBatch {
        build_batch(columns.into_iter().map(|(n, a)| (n.to_string(), a)).collect()).unwrap()
    }

    fn store() -> MemoryStore {
        MemoryStore::new()
            .with_table(
                "Per_Cells",
                table(vec![
                    ("ImageNumber", ints(&[1, 1, 2])),
                    ("Cells_Number_Object_Number", ints(&[1, 2, 1])),
                    ("Cells_AreaShape_Area", floats(&[10.0, 20.0, 30.0])),
                ]),
            )
            .with_table(
                "Per_Cytoplasm",
                table(vec![
                    ("ImageNumber", ints(&[1, 1, 2])),
                    ("Cytoplasm_Parent_Cells", ints(&[2, 1, 1])),
                    ("Cytoplasm_Parent_OrigNuclei", ints(&[2, 1, 1])),
                    ("Cytoplasm_AreaShape_Area", floats(&[2.0, 1.0, 3.0])),
                ]),
            )
            .with_table(
                "Per_Nuclei",
                table(vec![
                    ("ImageNumber", ints(&[1, 1, 2])),
                    ("Nuclei_Number_Object_Number", ints(&[1, 2, 1])),
                    ("Nuclei_AreaShape_Area", floats(&[0.1, 0.2, 0.3])),
                ]),
            )
            .with_table(
                "Per_Image",
                table(vec![
                    ("ImageNumber", ints(&[1, 2])),
                    ("Image_Metadata_Well", Arc::new(StringArray::from(vec!["C6", "D7"])) as ArrayRef),
                    ("Image_Metadata_Plate", Arc::new(StringArray::from(vec!["P1", "P1"])) as ArrayRef),
                ]),
            )
    }

    fn config() -> StoreConfig {
        StoreConfig {
            path: String::new(),
            image_table: "Per_Image".to_string(),
            compartments: names(&["Per_Cells", "Per_Cytoplasm", "Per_Nuclei"]),
            merge_columns: names(&["ImageNumber"]),
            strata: names(&["Image_Metadata_Well", "Image_Metadata_Plate"]),
            linking: nf1_linking(),
            allow_one_to_many: false,
            feature_prefixes: None,
        }
    }

    #[test]
    fn test_merge_plan_follows_declaration_order() {
        let plan = merge_plan(&nf1_linking(), &config().compartments).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].left, "Per_Cytoplasm");
        assert_eq!(plan[0].right, "Per_Cells");
        assert_eq!(plan[0].right_column, "Cells_Number_Object_Number");
        assert_eq!(plan[1].right, "Per_Nuclei");
        assert_eq!(plan[1].left_column, "Cytoplasm_Parent_OrigNuclei");
    }

    #[test]
    fn test_merge_plan_rejects_one_sided_link() {
        let mut linking = nf1_linking();
        linking.shift_remove("Per_Nuclei");
        let err = merge_plan(&linking, &config().compartments).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_merge_compartments_one_row_per_cell() {
        let cells = SingleCells::open(store(), &config()).unwrap();
        let merged = cells.merge_compartments().unwrap();

        assert_eq!(merged.num_rows(), 3);
        let columns = column_names(&merged);
        assert_eq!(&columns[..2], &["Image_Metadata_Well", "Image_Metadata_Plate"]);
        for renamed in [
            "Metadata_ImageNumber",
            "Metadata_Cytoplasm_Parent_Cells",
            "Metadata_Cells_Number_Object_Number",
            "Metadata_Nuclei_Number_Object_Number",
        ] {
            assert!(columns.contains(&renamed.to_string()), "{renamed} missing");
        }
        assert!(!columns.contains(&"ImageNumber".to_string()));

        // Seeded from Per_Cytoplasm: row 0 is cytoplasm of cell 2 in image 1
        let cell_area = merged
            .column_by_name("Cells_AreaShape_Area")
            .unwrap()
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(cell_area.values(), &[20.0, 10.0, 30.0]);
    }

    #[test]
    fn test_missing_compartment_is_configuration_error() {
        let mut config = config();
        config.compartments.push("Per_Mitochondria".to_string());
        let err = SingleCells::open(store(), &config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("Per_Mitochondria"));
    }

    #[test]
    fn test_missing_linking_column_is_configuration_error() {
        let mut config = config();
        config.linking["Per_Cells"]["Per_Cytoplasm"] = "Cells_Parent_Nothing".to_string();
        let err = SingleCells::open(store(), &config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_missing_strata_column_is_configuration_error() {
        let mut config = config();
        config.strata.push("Image_Metadata_Site".to_string());
        let err = SingleCells::open(store(), &config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_unlinked_compartments_is_configuration_error() {
        let mut config = config();
        config.linking.clear();
        let err = SingleCells::open(store(), &config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_disjoint_keys_is_validation_error() {
        let store = store().with_table(
            "Per_Nuclei",
            table(vec![
                ("ImageNumber", ints(&[9])),
                ("Nuclei_Number_Object_Number", ints(&[1])),
            ]),
        );
        let cells = SingleCells::open(store, &config()).unwrap();
        let err = cells.merge_compartments().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_merge_single_cells_annotates() {
        let cells = SingleCells::open(store(), &config()).unwrap();
        let platemap = table(vec![
            ("well_position", Arc::new(StringArray::from(vec!["C6", "D7"])) as ArrayRef),
            ("genotype", Arc::new(StringArray::from(vec!["WT", "NF1"])) as ArrayRef),
        ]);
        let out = cells
            .merge_single_cells(&platemap, &JoinOn::new("Metadata_well_position", "Image_Metadata_Well"))
            .unwrap();
        assert_eq!(out.num_rows(), 3);
        let columns = column_names(&out);
        assert_eq!(columns[0], "Metadata_genotype");
        assert!(columns.contains(&"Metadata_Well".to_string()));
        assert!(columns.contains(&"Metadata_Plate".to_string()));
    }
}
