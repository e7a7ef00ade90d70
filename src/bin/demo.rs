use ndarray::{Array1, Array2};

use sumtrees::{BartRunner, FeatureType, Method, Settings};

fn main() {
    // A small noisy step function both samplers should recover.
    let n = 200;
    let x: Vec<f64> = (0..n).map(|i| i as f64 / n as f64).collect();
    let y: Vec<f64> = x
        .iter()
        .enumerate()
        .map(|(i, &v)| if v < 0.5 { -1.0 } else { 1.0 } + 0.05 * ((i * 7919 % 100) as f64 / 100.0 - 0.5))
        .collect();
    let covariates = Array2::from_shape_vec((n, 1), x).unwrap();
    let outcome = Array1::from_vec(y);

    for method in [Method::Bart, Method::Xbart] {
        let settings = Settings {
            num_trees: 20,
            num_samples: 100,
            num_burnin: 100,
            method,
            seed: 7,
            ..Settings::default()
        };
        let mut runner = BartRunner::new(settings).unwrap();
        runner
            .load_train(
                covariates.clone(),
                outcome.clone(),
                vec![FeatureType::Numeric],
            )
            .unwrap();
        runner.run().unwrap();

        let predictions = runner.predict_train().unwrap();
        let num_draws = runner.num_draws();
        let posterior_mean_low: f64 =
            (0..num_draws).map(|s| predictions[s * n]).sum::<f64>() / num_draws as f64;
        let posterior_mean_high: f64 =
            (0..num_draws).map(|s| predictions[s * n + n - 1]).sum::<f64>() / num_draws as f64;
        let sigma_sq = runner.draw(num_draws - 1).sigma_sq;

        println!(
            "{method:?}: f(0) ~ {posterior_mean_low:.3}, f(1) ~ {posterior_mean_high:.3}, last sigma^2 = {sigma_sq:.4}"
        );
    }
}
