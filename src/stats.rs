//! Scalar column statistics
//!
//! Inputs are the non-null values of one feature column. Empty inputs yield
//! `None` rather than a made-up value.

use ndarray::{Array1, ArrayView1};
use ndarray_stats::interpolate::Linear;
use ndarray_stats::Quantile1dExt;
use noisy_float::prelude::{n64, N64};

/// Scale factor turning a median absolute deviation into a consistent
/// estimator of the standard deviation for normal data
pub const MAD_NORMAL_SCALE: f64 = 1.4826;

/// Arithmetic mean
#[must_use]
pub fn mean(values: &[f64]) -> Option<f64> {
    ArrayView1::from(values).mean()
}

/// Population standard deviation (ddof = 0)
#[must_use]
pub fn population_std(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(ArrayView1::from(values).std(0.0))
}

/// Quantile with linear interpolation between order statistics
///
/// `q` is clamped to `[0, 1]`. Matches the default `linear` method of the
/// common array libraries: position `h = (n - 1) * q`.
#[must_use]
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.iter().any(|v| v.is_nan()) {
        return None;
    }
    let mut data: Array1<N64> = values.iter().copied().map(n64).collect();
    data.quantile_mut(n64(q.clamp(0.0, 1.0)), &Linear)
        .ok()
        .map(N64::raw)
}

/// Median
#[must_use]
pub fn median(values: &[f64]) -> Option<f64> {
    quantile(values, 0.5)
}

/// Interquartile range (75th minus 25th percentile)
#[must_use]
pub fn iqr(values: &[f64]) -> Option<f64> {
    Some(quantile(values, 0.75)? - quantile(values, 0.25)?)
}

/// Median absolute deviation around the median, unscaled
#[must_use]
pub fn median_absolute_deviation(values: &[f64]) -> Option<f64> {
    let center = median(values)?;
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations)
}

/// Pearson correlation over paired, complete observations
///
/// Returns `None` when fewer than two pairs exist or either side has zero
/// variance.
#[must_use]
pub fn pearson(a: &[Option<f64>], b: &[Option<f64>]) -> Option<f64> {
    let pairs = || a.iter().zip(b).filter_map(|(x, y)| Some(((*x)?, (*y)?)));
    let (n, sum_a, sum_b) = pairs().fold((0_usize, 0.0, 0.0), |(n, sa, sb), (x, y)| (n + 1, sa + x, sb + y));
    if n < 2 {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let (mean_a, mean_b) = (sum_a / n as f64, sum_b / n as f64);

    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in pairs() {
        let (dx, dy) = (x - mean_a, y - mean_b);
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return None;
    }
    Some((cov / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_mean_and_std() {
        let data = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!(close(mean(&data).unwrap(), 5.0));
        assert!(close(population_std(&data).unwrap(), 2.0));
    }

    #[test]
    fn test_empty_inputs() {
        assert!(mean(&[]).is_none());
        assert!(population_std(&[]).is_none());
        assert!(median(&[]).is_none());
        assert!(median_absolute_deviation(&[]).is_none());
    }

    #[test]
    fn test_quantile_linear_interpolation() {
        let data = [4.0, 1.0, 3.0, 2.0];
        assert!(close(median(&data).unwrap(), 2.5));
        assert!(close(quantile(&data, 0.25).unwrap(), 1.75));
        assert!(close(quantile(&data, 0.75).unwrap(), 3.25));
        assert!(close(iqr(&data).unwrap(), 1.5));
    }

    #[test]
    fn test_quantile_clamps_and_rejects_nan() {
        let data = [4.0, 1.0, 3.0, 2.0];
        assert!(close(quantile(&data, -0.5).unwrap(), 1.0));
        assert!(close(quantile(&data, 2.0).unwrap(), 4.0));
        assert!(quantile(&[1.0, f64::NAN], 0.5).is_none());
        assert!(close(median(&[7.0]).unwrap(), 7.0));
    }

    #[test]
    fn test_mad() {
        let data = [1.0, 1.0, 2.0, 2.0, 4.0, 6.0, 9.0];
        // median 2, deviations 1,1,0,0,2,4,7 -> median 1
        assert!(close(median_absolute_deviation(&data).unwrap(), 1.0));
    }

    #[test]
    fn test_pearson_perfect_and_anti() {
        let a = [Some(1.0), Some(2.0), Some(3.0)];
        let b = [Some(2.0), Some(4.0), Some(6.0)];
        let c = [Some(3.0), Some(2.0), Some(1.0)];
        assert!(close(pearson(&a, &b).unwrap(), 1.0));
        assert!(close(pearson(&a, &c).unwrap(), -1.0));
    }

    #[test]
    fn test_pearson_pairwise_complete() {
        let a = [Some(1.0), None, Some(3.0), Some(4.0)];
        let b = [Some(1.0), Some(100.0), Some(3.0), Some(4.0)];
        assert!(close(pearson(&a, &b).unwrap(), 1.0));
    }

    #[test]
    fn test_pearson_constant_is_undefined() {
        let a = [Some(1.0), Some(1.0), Some(1.0)];
        let b = [Some(1.0), Some(2.0), Some(3.0)];
        assert!(pearson(&a, &b).is_none());
    }
}
