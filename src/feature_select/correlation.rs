//! Redundant feature filter
//!
//! Features are ranked by their summed absolute Pearson correlation to every
//! feature (the diagonal included; undefined correlations count as 0), with a
//! stable sort so ties keep column order. For each pair whose absolute
//! correlation exceeds the threshold, the member ranked later (more redundant,
//! or later in the table on a tie) is excluded.

use super::FeatureColumn;
use crate::stats::pearson;
use ndarray::{Array1, Array2};
use tracing::debug;

/// Names of redundant features
#[must_use]
pub fn correlation_threshold(columns: &[FeatureColumn], threshold: f64) -> Vec<String> {
    let n = columns.len();
    let matrix = abs_correlations(columns);

    let totals: Vec<f64> = matrix
        .iter()
        .map(|row| row.iter().flatten().sum())
        .collect();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|a, b| totals[*a].total_cmp(&totals[*b]));
    let mut rank = vec![0; n];
    for (position, &column) in order.iter().enumerate() {
        rank[column] = position;
    }

    let mut excluded = vec![false; n];
    let mut pairs = 0usize;
    for i in 0..n {
        for j in (i + 1)..n {
            if matrix[i][j].is_some_and(|r| r > threshold) {
                pairs += 1;
                let drop = if rank[i] > rank[j] { i } else { j };
                excluded[drop] = true;
            }
        }
    }
    debug!(features = n, pairs, threshold, "correlated feature pairs");

    columns
        .iter()
        .zip(excluded)
        .filter(|(_, e)| *e)
        .map(|(c, _)| c.name.clone())
        .collect()
}

/// Absolute pairwise correlations
///
/// Columns without nulls are centered and scaled to unit norm once so their
/// correlations come from a single Gram product; pairs involving a column
/// with nulls fall back to pairwise-complete [`pearson`].
fn abs_correlations(columns: &[FeatureColumn]) -> Vec<Vec<Option<f64>>> {
    let n = columns.len();
    let rows = columns.first().map_or(0, |c| c.values.len());

    let mut slot = vec![None; n];
    let mut units: Vec<Array1<f64>> = Vec::new();
    for (i, column) in columns.iter().enumerate() {
        if let Some(unit) = unit_vector(&column.values) {
            slot[i] = Some(units.len());
            units.push(unit);
        }
    }
    let stacked = Array2::from_shape_fn((rows, units.len()), |(r, c)| units[c][r]);
    let gram = stacked.t().dot(&stacked);

    let mut matrix = vec![vec![None; n]; n];
    for i in 0..n {
        for j in i..n {
            let r = match (slot[i], slot[j]) {
                (Some(a), Some(b)) => Some(gram[[a, b]].clamp(-1.0, 1.0)),
                _ if is_complete(&columns[i].values) && is_complete(&columns[j].values) => None,
                _ => pearson(&columns[i].values, &columns[j].values),
            }
            .map(f64::abs);
            matrix[i][j] = r;
            matrix[j][i] = r;
        }
    }
    matrix
}

fn is_complete(values: &[Option<f64>]) -> bool {
    values.iter().all(Option::is_some)
}

/// Centered, unit-norm copy of a column with no nulls and nonzero variance
fn unit_vector(values: &[Option<f64>]) -> Option<Array1<f64>> {
    if values.len() < 2 {
        return None;
    }
    let data: Array1<f64> = values.iter().copied().collect::<Option<_>>()?;
    let mean = data.mean()?;
    let centered = data - mean;
    let norm = centered.dot(&centered).sqrt();
    (norm > 0.0).then(|| centered / norm)
}
