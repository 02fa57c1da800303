//! Replicate noise filter
//!
//! Rows are grouped by a perturbation column (replicate wells of the same
//! treatment). A feature is excluded when the mean of its within-group
//! population standard deviations exceeds the cutoff. Rows with a null group
//! key, and groups with no values for the feature, do not contribute.

use super::FeatureColumn;
use crate::stats::{mean, population_std};
use indexmap::IndexMap;

/// Names of features that are noisy across replicates
#[must_use]
pub fn noise_removal(columns: &[FeatureColumn], groups: &[Option<String>], stdev_cutoff: f64) -> Vec<String> {
    columns
        .iter()
        .filter(|column| {
            let mut by_group: IndexMap<&str, Vec<f64>> = IndexMap::new();
            for (group, value) in groups.iter().zip(&column.values) {
                if let (Some(group), Some(value)) = (group, value) {
                    by_group.entry(group.as_str()).or_default().push(*value);
                }
            }
            let stds: Vec<f64> = by_group.values().filter_map(|v| population_std(v)).collect();
            mean(&stds).is_some_and(|m| m > stdev_cutoff)
        })
        .map(|column| column.name.clone())
        .collect()
}
