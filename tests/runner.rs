use ndarray::{Array1, Array2};

use sumtrees::error::Error;
use sumtrees::{BartRunner, FeatureType, LeafModelKind, Method, Settings};

fn line_dataset(n: usize) -> (Array2<f64>, Array1<f64>) {
    let x: Vec<f64> = (0..n).map(|i| i as f64 / n as f64).collect();
    let y: Vec<f64> = x.iter().map(|&v| 3.0 * v - 1.0).collect();
    (
        Array2::from_shape_vec((n, 1), x).unwrap(),
        Array1::from_vec(y),
    )
}

#[test]
fn test_invalid_configuration_is_rejected_before_sampling() {
    let settings = Settings {
        num_trees: 0,
        ..Settings::default()
    };
    assert!(matches!(BartRunner::new(settings), Err(Error::Config(_))));
}

#[test]
fn test_run_requires_training_data() {
    let mut runner = BartRunner::new(Settings::default()).unwrap();
    assert!(matches!(runner.run(), Err(Error::Data(_))));
}

#[test]
fn test_predict_requires_a_completed_run() {
    let (x, y) = line_dataset(20);
    let mut runner = BartRunner::new(Settings {
        num_trees: 5,
        num_samples: 10,
        num_burnin: 5,
        seed: 2,
        ..Settings::default()
    })
    .unwrap();
    runner
        .load_train(x.clone(), y, vec![FeatureType::Numeric])
        .unwrap();
    runner.load_predict(x).unwrap();
    assert!(matches!(runner.predict(), Err(Error::Data(_))));
}

#[test]
fn test_predict_layout_is_draw_major() {
    let (x, y) = line_dataset(30);
    let mut runner = BartRunner::new(Settings {
        num_trees: 10,
        num_samples: 20,
        num_burnin: 20,
        seed: 4,
        ..Settings::default()
    })
    .unwrap();
    runner
        .load_train(x.clone(), y, vec![FeatureType::Numeric])
        .unwrap();
    runner.load_predict(x).unwrap();
    runner.run().unwrap();

    let predictions = runner.predict().unwrap();
    assert_eq!(predictions.len(), 30 * runner.num_draws());
    assert_eq!(runner.num_draws(), 20);
}

#[test]
fn test_prediction_data_must_match_training_width() {
    let (x, y) = line_dataset(10);
    let mut runner = BartRunner::new(Settings::default()).unwrap();
    runner
        .load_train(x, y, vec![FeatureType::Numeric])
        .unwrap();
    let wide = Array2::zeros((4, 3));
    assert!(matches!(runner.load_predict(wide), Err(Error::Data(_))));
}

#[test]
fn test_saved_draw_is_valid_json() {
    let (x, y) = line_dataset(25);
    let mut runner = BartRunner::new(Settings {
        num_trees: 3,
        num_samples: 5,
        num_burnin: 5,
        seed: 8,
        ..Settings::default()
    })
    .unwrap();
    runner
        .load_train(x, y, vec![FeatureType::Numeric])
        .unwrap();
    runner.run().unwrap();

    let path = std::env::temp_dir().join("sumtrees_draw_test.json");
    runner.save_draw(0, &path).unwrap();
    let contents = std::fs::read_to_string(&path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
    assert!(parsed.get("sigma_sq").is_some());
    assert!(parsed.get("tau").is_some());
    assert_eq!(parsed["trees"].as_array().unwrap().len(), 3);
    std::fs::remove_file(&path).ok();

    assert!(matches!(
        runner.save_draw(99, &std::env::temp_dir().join("missing.json")),
        Err(Error::Data(_))
    ));
}

#[test]
fn test_regression_leaves_require_a_basis() {
    let (x, y) = line_dataset(20);
    let mut runner = BartRunner::new(Settings {
        leaf_model: LeafModelKind::UnivariateRegressionGaussian,
        num_trees: 5,
        num_samples: 10,
        num_burnin: 10,
        ..Settings::default()
    })
    .unwrap();
    runner
        .load_train(x, y, vec![FeatureType::Numeric])
        .unwrap();
    assert!(matches!(runner.run(), Err(Error::Data(_))));
}

#[test]
fn test_univariate_regression_recovers_a_global_slope() {
    // y = 1.5 * b with an uninformative covariate: the summed leaf slopes
    // must approach 1.5.
    let n = 80;
    let basis_values: Vec<f64> = (0..n).map(|i| (i as f64 * 0.711).sin() + 1.5).collect();
    let y: Vec<f64> = basis_values.iter().map(|&b| 1.5 * b).collect();
    let x = Array2::zeros((n, 1));
    let basis = Array2::from_shape_vec((n, 1), basis_values.clone()).unwrap();

    let mut runner = BartRunner::new(Settings {
        leaf_model: LeafModelKind::UnivariateRegressionGaussian,
        num_trees: 10,
        num_samples: 100,
        num_burnin: 100,
        method: Method::Bart,
        seed: 21,
        ..Settings::default()
    })
    .unwrap();
    runner
        .load_train(x, Array1::from_vec(y.clone()), vec![FeatureType::Numeric])
        .unwrap();
    runner.load_train_basis(basis).unwrap();
    runner.run().unwrap();

    let predictions = runner.predict_train().unwrap();
    let draws = runner.num_draws();
    for i in 0..n {
        let mean: f64 = (0..draws).map(|s| predictions[s * n + i]).sum::<f64>() / draws as f64;
        assert!(
            (mean - y[i]).abs() < 0.4,
            "row {i}: posterior mean {mean} vs target {}",
            y[i]
        );
    }
}

#[test]
fn test_multivariate_regression_runs_end_to_end() {
    // Leaf coefficient vectors over an intercept-plus-slope basis.
    let n = 60;
    let t_values: Vec<f64> = (0..n).map(|i| i as f64 / n as f64).collect();
    let y: Vec<f64> = t_values.iter().map(|&t| 1.0 + 0.5 * t).collect();
    let mut basis_values = Vec::with_capacity(2 * n);
    for &t in &t_values {
        basis_values.push(1.0);
        basis_values.push(t);
    }
    let x = Array2::zeros((n, 1));
    let basis = Array2::from_shape_vec((n, 2), basis_values).unwrap();

    let mut runner = BartRunner::new(Settings {
        leaf_model: LeafModelKind::MultivariateRegressionGaussian,
        leaf_covariance: Some(nalgebra::DMatrix::identity(2, 2)),
        num_trees: 5,
        num_samples: 50,
        num_burnin: 50,
        method: Method::Xbart,
        cutpoint_grid_size: 10,
        seed: 33,
        ..Settings::default()
    })
    .unwrap();
    runner
        .load_train(x, Array1::from_vec(y.clone()), vec![FeatureType::Numeric])
        .unwrap();
    runner.load_train_basis(basis).unwrap();
    runner.run().unwrap();

    let predictions = runner.predict_train().unwrap();
    let draws = runner.num_draws();
    for i in [0usize, n / 2, n - 1] {
        let mean: f64 = (0..draws).map(|s| predictions[s * n + i]).sum::<f64>() / draws as f64;
        assert!(
            (mean - y[i]).abs() < 0.4,
            "row {i}: posterior mean {mean} vs target {}",
            y[i]
        );
    }
}
