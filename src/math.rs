//! Utility functions for stable argsorts and log-weight normalization.

use std::cmp::Ordering;

/// Computes the stable argsort of `values`: the returned permutation lists
/// row indices in ascending order of their value, with ties kept in input
/// order.
pub fn stable_argsort(values: &[f64]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..values.len()).collect();
    // Inputs are validated to be finite before sorting ever happens.
    indices.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap_or(Ordering::Equal));
    indices
}

/// Normalizes log-weights to probabilities using the log-sum-exp trick so
/// the exponentiation is numerically stable.
pub fn normalize_log_weights(log_weights: &[f64]) -> Vec<f64> {
    let max_log_weight = log_weights
        .iter()
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max);

    let exp_shifted: Vec<f64> = log_weights
        .iter()
        .map(|&w| (w - max_log_weight).exp())
        .collect();

    let sum_exp: f64 = exp_shifted.iter().sum();

    exp_shifted.iter().map(|&w| w / sum_exp).collect()
}

/// Mean of a slice.
pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_argsort_is_stable_on_ties() {
        let values = [2.0, 1.0, 2.0, 0.5, 1.0];
        assert_eq!(stable_argsort(&values), vec![3, 1, 4, 0, 2]);
    }

    #[test]
    fn test_normalized_weights_sum_to_one() {
        let weights = normalize_log_weights(&[-1000.0, -1001.0, -999.5]);
        assert_abs_diff_eq!(weights.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(weights[2] > weights[0] && weights[0] > weights[1]);
    }

    #[test]
    fn test_mean_of_slice() {
        assert_abs_diff_eq!(mean(&[1.0, 2.0, 3.0]), 2.0, epsilon = 1e-12);
    }
}
