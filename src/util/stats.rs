//! Batch statistics shared by the feature builder and the risk scorer.
//!
//! Every statistic here is computed over the current batch only; nothing is
//! carried between runs.

/// Median of the present, finite values. `None` when no value is present.
#[must_use]
pub fn median(values: &[Option<f64>]) -> Option<f64> {
    let mut present: Vec<f64> = values
        .iter()
        .filter_map(|v| v.filter(|x| x.is_finite()))
        .collect();
    if present.is_empty() {
        return None;
    }
    present.sort_by(f64::total_cmp);
    let mid = present.len() / 2;
    if present.len() % 2 == 0 {
        Some((present[mid - 1] + present[mid]) / 2.0)
    } else {
        Some(present[mid])
    }
}

/// Replace missing values with the batch median.
///
/// Returns `None` when the column has no present value at all.
#[must_use]
pub fn impute_median(values: &[Option<f64>]) -> Option<Vec<f64>> {
    let fill = median(values)?;
    Some(
        values
            .iter()
            .map(|v| v.filter(|x| x.is_finite()).unwrap_or(fill))
            .collect(),
    )
}

/// Min-max scale into [0, 1]. A constant column maps to all zeros.
#[must_use]
pub fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    if !range.is_finite() || range <= 0.0 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - min) / range).collect()
}

/// Zero-mean, unit-variance scaling with the population standard deviation.
///
/// A zero-variance column is centred but left unscaled.
#[must_use]
pub fn standardize(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();
    let scale = if std > 0.0 { std } else { 1.0 };
    values.iter().map(|v| (v - mean) / scale).collect()
}

/// Shannon entropy in bits. Zero probabilities contribute nothing.
#[must_use]
pub fn entropy_bits<'a>(probabilities: impl IntoIterator<Item = &'a f64>) -> f64 {
    probabilities
        .into_iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| -p * p.log2())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_even_count_averages_middle_pair() {
        let values = [Some(4.0), None, Some(1.0), Some(3.0), Some(2.0)];
        assert_eq!(median(&values), Some(2.5));
    }

    #[test]
    fn median_ignores_non_finite() {
        let values = [Some(f64::NAN), Some(7.0), None];
        assert_eq!(median(&values), Some(7.0));
    }

    #[test]
    fn impute_fills_missing_with_median() {
        let values = [Some(10.0), None, Some(30.0), Some(20.0)];
        assert_eq!(
            impute_median(&values),
            Some(vec![10.0, 20.0, 30.0, 20.0])
        );
        assert_eq!(impute_median(&[None, None]), None);
    }

    #[test]
    fn min_max_handles_constant_column() {
        assert_eq!(min_max_normalize(&[3.0, 3.0, 3.0]), vec![0.0, 0.0, 0.0]);
        assert_eq!(min_max_normalize(&[0.0, 5.0, 10.0]), vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn standardize_produces_zero_mean_unit_variance() {
        let scaled = standardize(&[1.0, 2.0, 3.0, 4.0]);
        let mean = scaled.iter().sum::<f64>() / 4.0;
        let var = scaled.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 4.0;
        assert!(mean.abs() < 1e-12);
        assert!((var - 1.0).abs() < 1e-12);
    }

    #[test]
    fn standardize_zero_variance_is_centred() {
        assert_eq!(standardize(&[5.0, 5.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn entropy_of_uniform_four_is_two_bits() {
        let probs = [0.25, 0.25, 0.25, 0.25];
        assert!((entropy_bits(&probs) - 2.0).abs() < 1e-12);
        assert!(entropy_bits(&[1.0, 0.0]).abs() < 1e-12);
    }
}
