//! Plate-map annotation of merged single cells
//!
//! 1. Plate-map columns get the `Metadata_` prefix
//! 2. Cells are inner-joined to wells (`[platemap column, profile column]`),
//!    keeping the cells' order; the plate map's key column is dropped
//! 3. `Image_Metadata_<x>` columns are renamed `Metadata_<x>`
//! 4. `Metadata_*` columns move to the front, relative order kept

use super::join::LookupJoin;
use crate::config::JoinOn;
use crate::features::{metadata_name, METADATA_PREFIX};
use crate::table::{build_batch, named_columns, rename_columns, require_column};
use crate::{Error, Result};
use arrow::compute;
use arrow::record_batch::RecordBatch;
use tracing::{info, warn};

/// Prefix CellProfiler gives image-level metadata columns
pub const IMAGE_METADATA_PREFIX: &str = "Image_Metadata_";

/// Annotate `profiles` with plate-map metadata
///
/// # Errors
/// - [`Error::Configuration`] if either join column is missing
/// - [`Error::Validation`] if plate-map keys are not unique per well, or no
///   cell matches any well
pub fn annotate(profiles: &RecordBatch, platemap: &RecordBatch, join_on: &JoinOn) -> Result<RecordBatch> {
    let platemap = rename_columns(platemap, metadata_name)?;
    let key_index = require_column(&platemap, &join_on.platemap_column, "plate map")?;
    let profile_index = require_column(profiles, &join_on.profile_column, "single-cell profiles")?;

    // Key the plate map with the profile column's type (e.g. integer well
    // numbers read from text)
    let target = profiles.schema().field(profile_index).data_type().clone();
    let platemap = if platemap.column(key_index).data_type() == &target {
        platemap
    } else {
        let mut columns = named_columns(&platemap);
        columns[key_index].1 = compute::cast(&columns[key_index].1, &target)?;
        build_batch(columns)?
    };

    let joined = LookupJoin {
        lookup_name: "platemap",
        primary_on: vec![join_on.profile_column.clone()],
        lookup_on: vec![join_on.platemap_column.clone()],
        keep_unmatched: false,
    }
    .execute(profiles, &platemap)
    .map_err(|e| match e {
        Error::Validation(msg) => Error::validation(format!("{msg}: plate map must list each well once")),
        other => other,
    })?;

    if joined.unmatched > 0 {
        warn!(
            dropped = joined.unmatched,
            profile_column = %join_on.profile_column,
            "cells without a plate-map well dropped by annotation"
        );
    }
    if joined.batch.num_rows() == 0 {
        return Err(Error::validation(format!(
            "Annotation produced zero rows: no {} value matches plate-map column {}",
            join_on.profile_column, join_on.platemap_column
        )));
    }

    let cleaned = clean_image_metadata(&joined.batch)?;
    let annotated = metadata_first(&cleaned)?;
    info!(
        rows = annotated.num_rows(),
        columns = annotated.num_columns(),
        "annotated single cells"
    );
    Ok(annotated)
}

/// Rename `Image_Metadata_<x>` to `Metadata_<x>` unless that name is taken
///
/// # Errors
/// Returns error if the renamed schema is invalid
pub fn clean_image_metadata(table: &RecordBatch) -> Result<RecordBatch> {
    let schema = table.schema();
    rename_columns(table, |name| {
        name.strip_prefix(IMAGE_METADATA_PREFIX)
            .map(|rest| format!("{METADATA_PREFIX}{rest}"))
            .filter(|renamed| schema.index_of(renamed).is_err())
            .unwrap_or_else(|| name.to_string())
    })
}

/// Move `Metadata_*` columns before all others, keeping relative order
///
/// # Errors
/// Returns error if projection fails
pub fn metadata_first(table: &RecordBatch) -> Result<RecordBatch> {
    let schema = table.schema();
    let (mut order, rest): (Vec<usize>, Vec<usize>) = (0..schema.fields().len())
        .partition(|&i| schema.field(i).name().starts_with(METADATA_PREFIX));
    order.extend(rest);
    Ok(table.project(&order)?)
}
