//! Near-zero variance filter
//!
//! A feature is excluded when any of these hold:
//! - it has at most one distinct non-null value
//! - `count(second most common) / count(most common) < freq_cut`
//! - `distinct values / rows < unique_cut`

use super::FeatureColumn;
use rustc_hash::FxHashMap;

/// Names of near-constant features
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn variance_threshold(columns: &[FeatureColumn], freq_cut: f64, unique_cut: f64) -> Vec<String> {
    columns
        .iter()
        .filter(|column| {
            let mut counts: FxHashMap<u64, usize> = FxHashMap::default();
            for value in column.values.iter().flatten() {
                // +0.0 folds -0.0 onto 0.0
                *counts.entry((value + 0.0).to_bits()).or_default() += 1;
            }
            if counts.len() <= 1 {
                return true;
            }

            let mut frequencies: Vec<usize> = counts.values().copied().collect();
            frequencies.sort_unstable_by(|a, b| b.cmp(a));
            let freq_ratio = frequencies[1] as f64 / frequencies[0] as f64;
            let unique_ratio = counts.len() as f64 / column.values.len() as f64;

            freq_ratio < freq_cut || unique_ratio < unique_cut
        })
        .map(|column| column.name.clone())
        .collect()
}
