use approx::assert_abs_diff_eq;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;

use sumtrees::data::{Dataset, FeatureType};
use sumtrees::leaf::{sample_leaf_parameters, GlobalVarianceSampler, LeafScaleSampler};
use sumtrees::partition::UnsortedPartition;
use sumtrees::priors::VariancePrior;
use sumtrees::suffstat::{ConstantLeafModel, LeafModel, LeafSuffStat};
use sumtrees::tree::{Ensemble, Tree, ROOT_ID};

fn dataset_with_residuals(residuals: Vec<f64>) -> Dataset {
    let n = residuals.len();
    let x = Array2::zeros((n, 1));
    let y = Array1::from_vec(residuals);
    Dataset::new(x, y, vec![FeatureType::Numeric]).unwrap()
}

fn sample_moments(draws: &[f64]) -> (f64, f64) {
    let n = draws.len() as f64;
    let mean = draws.iter().sum::<f64>() / n;
    let variance = draws.iter().map(|d| (d - mean) * (d - mean)).sum::<f64>() / (n - 1.0);
    (mean, variance)
}

#[test]
fn test_leaf_mean_draws_match_the_conjugate_posterior() {
    // A single root leaf holding synthetic Gaussian residuals: repeated
    // draws must reproduce the closed-form posterior moments.
    let residuals = vec![1.2, 0.8, 1.1, 0.9, 1.0, 1.3, 0.7, 1.05];
    let data = dataset_with_residuals(residuals.clone());
    let model = ConstantLeafModel::new(0.5);
    let sigma_sq = 0.25;
    let partition = UnsortedPartition::new(residuals.len());

    let mut stat = model.zero_stat();
    for obs in 0..residuals.len() {
        stat.increment(&data, obs);
    }
    let (posterior_mean, posterior_var) = model.posterior(&stat, sigma_sq);

    let num_draws = 10_000;
    let mut rng = StdRng::seed_from_u64(42);
    let mut draws = Vec::with_capacity(num_draws);
    let mut tree = Tree::new(0.0, 1);
    for _ in 0..num_draws {
        sample_leaf_parameters(&mut tree, &partition, &data, &model, sigma_sq, 0, &mut rng)
            .unwrap();
        draws.push(tree.leaf_scalar(ROOT_ID));
    }

    let (empirical_mean, empirical_var) = sample_moments(&draws);
    let standard_error = (posterior_var / num_draws as f64).sqrt();
    assert_abs_diff_eq!(empirical_mean, posterior_mean, epsilon = 5.0 * standard_error);
    assert!((empirical_var / posterior_var - 1.0).abs() < 0.1);
}

#[test]
fn test_variance_draws_match_the_inverse_gamma_posterior() {
    let residuals = vec![0.5, -0.25, 0.75, -0.5, 0.25, -0.75];
    let data = dataset_with_residuals(residuals);
    let prior = VariancePrior::new(6.0, 2.0);
    let sampler = GlobalVarianceSampler::new(prior);

    let shape = sampler.posterior_shape(&data);
    let scale = sampler.posterior_scale(&data);
    // Inverse-gamma moments in the (shape, scale) parameterization.
    let expected_mean = scale / (shape - 1.0);
    let expected_var = scale * scale / ((shape - 1.0) * (shape - 1.0) * (shape - 2.0));

    let num_draws = 20_000;
    let mut rng = StdRng::seed_from_u64(7);
    let draws: Vec<f64> = (0..num_draws)
        .map(|_| sampler.sample(&data, &mut rng).unwrap())
        .collect();

    let (empirical_mean, empirical_var) = sample_moments(&draws);
    let standard_error = (expected_var / num_draws as f64).sqrt();
    assert_abs_diff_eq!(empirical_mean, expected_mean, epsilon = 5.0 * standard_error);
    assert!((empirical_var / expected_var - 1.0).abs() < 0.15);
}

#[test]
fn test_leaf_scale_draws_shrink_with_many_small_leaves() {
    // An ensemble of root-only trees with tiny leaf values concentrates
    // the leaf-scale posterior near zero.
    let mut ensemble = Ensemble::new(50, 0.0, 1);
    for j in 0..50 {
        let value = 0.01 * (j as f64 / 50.0 - 0.5);
        let tree = ensemble.tree_mut(j);
        tree.set_leaf_value(ROOT_ID, &[value]);
    }
    let sampler = LeafScaleSampler::new(VariancePrior::new(2.0, 0.1));
    let mut rng = StdRng::seed_from_u64(11);
    let draws: Vec<f64> = (0..2_000)
        .map(|_| sampler.sample(&ensemble, &mut rng).unwrap())
        .collect();
    let (mean, _) = sample_moments(&draws);
    assert!(mean < 0.05, "leaf scale posterior mean {mean} too large");
}
