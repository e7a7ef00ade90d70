//! Run orchestration: data loading, the per-sweep driver loop, draw
//! storage, prediction, and draw persistence.
//!
//! One sweep updates the trees in order. For each tree the driver adds the
//! tree's previous contribution back into the residual, asks the sampler
//! for a new structure against that partial residual, draws fresh leaf
//! parameters, and subtracts the new contribution. After all trees the
//! global variance (and optionally the leaf scale) is redrawn. Burn-in
//! sweeps overwrite draw slot 0; retention then advances through the draw
//! vector via the `(model_iter, prev_model_iter)` pair.

use std::fs::File;
use std::path::{Path, PathBuf};

use log::{info, warn};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::data::{Dataset, FeatureType};
use crate::error::{Error, Result};
use crate::gfr::GrowFromRootSampler;
use crate::leaf::{sample_leaf_parameters, GlobalVarianceSampler, LeafScaleSampler};
use crate::mcmc::McmcTreeSampler;
use crate::priors::{TreePrior, VariancePrior};
use crate::settings::{LeafModelKind, Method, Settings};
use crate::suffstat::{ConstantLeafModel, LeafModel, MultivariateLeafModel, UnivariateLeafModel};
use crate::tree::{Ensemble, PreorderNode, Tree, ROOT_ID};

/// One retained posterior draw: the ensemble plus the global parameters
/// current at the end of its sweep.
#[derive(Debug, Clone)]
pub struct ModelDraw {
    /// The sum-of-trees model.
    pub ensemble: Ensemble,
    /// Global residual variance at the end of the sweep.
    pub sigma_sq: f64,
    /// Leaf scale at the end of the sweep.
    pub tau: f64,
}

#[derive(Serialize)]
struct DrawFile {
    sigma_sq: f64,
    tau: f64,
    trees: Vec<Vec<PreorderNode>>,
}

/// Owns one sampling run: configuration, data, and the retained draws.
pub struct BartRunner {
    settings: Settings,
    train: Option<Dataset>,
    predict_covariates: Option<Array2<f64>>,
    predict_basis: Option<Array2<f64>>,
    draws: Vec<ModelDraw>,
}

impl BartRunner {
    /// Validates the configuration and creates an empty runner.
    pub fn new(settings: Settings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            train: None,
            predict_covariates: None,
            predict_basis: None,
            draws: Vec::new(),
        })
    }

    /// Loads and validates the training data.
    pub fn load_train(
        &mut self,
        covariates: Array2<f64>,
        outcome: Array1<f64>,
        feature_types: Vec<FeatureType>,
    ) -> Result<()> {
        self.train = Some(Dataset::new(covariates, outcome, feature_types)?);
        Ok(())
    }

    /// Attaches a leaf-regression basis to previously loaded training data.
    pub fn load_train_basis(&mut self, basis: Array2<f64>) -> Result<()> {
        let data = self
            .train
            .take()
            .ok_or_else(|| Error::Data("no training data loaded".into()))?;
        self.train = Some(data.with_basis(basis)?);
        Ok(())
    }

    /// Loads a covariate matrix to predict on.
    pub fn load_predict(&mut self, covariates: Array2<f64>) -> Result<()> {
        if covariates.iter().any(|x| !x.is_finite()) {
            return Err(Error::Data(
                "prediction covariates contain non-finite entries".into(),
            ));
        }
        if let Some(train) = &self.train {
            if covariates.ncols() != train.num_features() {
                return Err(Error::Data(format!(
                    "prediction data has {} columns, training data has {}",
                    covariates.ncols(),
                    train.num_features()
                )));
            }
        }
        self.predict_covariates = Some(covariates);
        Ok(())
    }

    /// Loads the basis rows matching the prediction covariates, required by
    /// the regression leaf models.
    pub fn load_predict_basis(&mut self, basis: Array2<f64>) -> Result<()> {
        if basis.iter().any(|x| !x.is_finite()) {
            return Err(Error::Data(
                "prediction basis contains non-finite entries".into(),
            ));
        }
        self.predict_basis = Some(basis);
        Ok(())
    }

    /// The loaded training data.
    pub fn train_data(&self) -> Option<&Dataset> {
        self.train.as_ref()
    }

    /// Number of retained draws (populated by [`BartRunner::run`]).
    pub fn num_draws(&self) -> usize {
        self.draws.len()
    }

    /// One retained draw.
    pub fn draw(&self, index: usize) -> &ModelDraw {
        &self.draws[index]
    }

    /// Executes `num_burnin + num_samples` sweeps, retaining one draw per
    /// post-burn-in sweep.
    pub fn run(&mut self) -> Result<()> {
        match self.settings.leaf_model {
            LeafModelKind::ConstantGaussian => {
                let model = ConstantLeafModel::new(self.settings.leaf_scale);
                self.run_with(model)
            }
            LeafModelKind::UnivariateRegressionGaussian => {
                let model = UnivariateLeafModel::new(self.settings.leaf_scale);
                self.run_with(model)
            }
            LeafModelKind::MultivariateRegressionGaussian => {
                let covariance = self
                    .settings
                    .leaf_covariance
                    .clone()
                    .ok_or_else(|| Error::Config("leaf prior covariance missing".into()))?;
                let model = MultivariateLeafModel::new(covariance).map_err(Error::Config)?;
                self.run_with(model)
            }
        }
    }

    fn run_with<M: LeafModel>(&mut self, mut model: M) -> Result<()> {
        {
            let data = self
                .train
                .as_ref()
                .ok_or_else(|| Error::Data("no training data loaded".into()))?;
            if model.requires_basis() {
                if data.basis_dim() == 0 {
                    return Err(Error::Data(
                        "the selected leaf model requires a loaded basis".into(),
                    ));
                }
                if data.basis_dim() < model.leaf_dim() {
                    return Err(Error::Data(format!(
                        "basis has {} columns, leaf model needs {}",
                        data.basis_dim(),
                        model.leaf_dim()
                    )));
                }
            }
        }
        let mut data = self.train.take().expect("training data checked above");
        let result = match self.settings.method {
            Method::Bart => run_bart(&self.settings, &mut data, &mut self.draws, &mut model),
            Method::Xbart => run_xbart(&self.settings, &mut data, &mut self.draws, &mut model),
        };
        self.train = Some(data);
        result
    }

    /// Predictions on the loaded prediction matrix, one value per
    /// `(draw, row)` pair in draw-major order: entry `s * m + i` is draw
    /// `s`'s prediction for row `i`.
    pub fn predict(&self) -> Result<Array1<f64>> {
        let covariates = self
            .predict_covariates
            .as_ref()
            .ok_or_else(|| Error::Data("no prediction data loaded".into()))?;
        self.predict_matrix(covariates, self.predict_basis.as_ref())
    }

    /// In-sample predictions on the training matrix, in the same layout as
    /// [`BartRunner::predict`].
    pub fn predict_train(&self) -> Result<Array1<f64>> {
        let data = self
            .train
            .as_ref()
            .ok_or_else(|| Error::Data("no training data loaded".into()))?;
        self.predict_matrix(data.covariates(), data.basis())
    }

    fn predict_matrix(
        &self,
        covariates: &Array2<f64>,
        basis: Option<&Array2<f64>>,
    ) -> Result<Array1<f64>> {
        if self.draws.is_empty() {
            return Err(Error::Data("run() must complete before predicting".into()));
        }
        match self.settings.leaf_model {
            LeafModelKind::ConstantGaussian => {
                self.predict_with(&ConstantLeafModel::new(self.settings.leaf_scale), covariates, basis)
            }
            LeafModelKind::UnivariateRegressionGaussian => self.predict_with(
                &UnivariateLeafModel::new(self.settings.leaf_scale),
                covariates,
                basis,
            ),
            LeafModelKind::MultivariateRegressionGaussian => {
                let covariance = self
                    .settings
                    .leaf_covariance
                    .clone()
                    .ok_or_else(|| Error::Config("leaf prior covariance missing".into()))?;
                let model = MultivariateLeafModel::new(covariance).map_err(Error::Config)?;
                self.predict_with(&model, covariates, basis)
            }
        }
    }

    fn predict_with<M: LeafModel>(
        &self,
        model: &M,
        covariates: &Array2<f64>,
        basis: Option<&Array2<f64>>,
    ) -> Result<Array1<f64>> {
        if model.requires_basis() && basis.is_none() {
            return Err(Error::Data(
                "the selected leaf model requires basis rows for prediction".into(),
            ));
        }
        if let Some(b) = basis {
            if b.nrows() != covariates.nrows() {
                return Err(Error::Data(format!(
                    "basis has {} rows for {} prediction rows",
                    b.nrows(),
                    covariates.nrows()
                )));
            }
        }
        let m = covariates.nrows();
        let mut out = Array1::zeros(m * self.draws.len());
        for (s, draw) in self.draws.iter().enumerate() {
            for i in 0..m {
                let row = covariates.row(i);
                let mut total = 0.0;
                for j in 0..draw.ensemble.num_trees() {
                    let tree = draw.ensemble.tree(j);
                    let leaf = tree.leaf_for_row(row);
                    total += model.contribution(tree.leaf_value(leaf), basis.map(|b| b.row(i)));
                }
                out[s * m + i] = total;
            }
        }
        Ok(out)
    }

    /// Persists one retained draw to `path` as JSON: every tree as a
    /// pre-order node list, followed by the global parameters.
    pub fn save_draw(&self, draw_id: usize, path: &Path) -> Result<()> {
        let draw = self.draws.get(draw_id).ok_or_else(|| {
            Error::Data(format!(
                "draw {draw_id} does not exist ({} retained)",
                self.draws.len()
            ))
        })?;
        write_draw(draw, path)
    }
}

/// Contribution of a tree to one observation's prediction, read through the
/// observation-to-leaf map.
fn node_contribution<M: LeafModel>(
    model: &M,
    tree: &Tree,
    node: usize,
    data: &Dataset,
    observation: usize,
) -> f64 {
    model.contribution(tree.leaf_value(node), data.basis_row(observation))
}

fn run_bart<M: LeafModel>(
    settings: &Settings,
    data: &mut Dataset,
    draws: &mut Vec<ModelDraw>,
    model: &mut M,
) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(settings.seed);
    let n = data.num_observations();
    let num_trees = settings.num_trees;
    let tree_prior = TreePrior::new(settings.alpha, settings.beta, settings.min_samples_leaf);
    let variance_sampler = GlobalVarianceSampler::new(VariancePrior::new(
        settings.variance_prior.0,
        settings.variance_prior.1,
    ));
    let leaf_scale_sampler = settings
        .leaf_scale_prior
        .map(|(a, b)| LeafScaleSampler::new(VariancePrior::new(a, b)));

    // Every tree starts as a root predicting mean(y) / num_trees (zero for
    // the regression leaf models, whose contribution depends on the basis).
    let ybar = data.outcome().mean().unwrap_or(0.0);
    let init_value = if model.requires_basis() {
        0.0
    } else {
        ybar / num_trees as f64
    };

    data.reset_residual();
    draws.clear();
    draws.push(ModelDraw {
        ensemble: Ensemble::new(num_trees, init_value, model.leaf_dim()),
        sigma_sq: 1.0,
        tau: settings.leaf_scale,
    });

    let mut sampler = McmcTreeSampler::new(num_trees, n);

    // Subtract the constant root predictions to obtain initial residuals.
    for j in 0..num_trees {
        for k in 0..n {
            let value = node_contribution(model, draws[0].ensemble.tree(j), ROOT_ID, data, k);
            data.residual_subtract(k, value);
        }
    }

    let mut sigma_sq = variance_sampler.sample(data, &mut rng)?;
    let mut tau = settings.leaf_scale;

    let total_sweeps = settings.num_burnin + settings.num_samples;
    info!(
        "BART run: {} trees, {} observations, {} sweeps ({} burn-in)",
        num_trees, n, total_sweeps, settings.num_burnin
    );

    let mut model_iter = 0usize;
    let mut prev_model_iter = 0usize;
    for sweep in 0..total_sweeps {
        if sweep > 0 && model_iter > prev_model_iter {
            draws.push(ModelDraw {
                ensemble: Ensemble::new(num_trees, init_value, model.leaf_dim()),
                sigma_sq,
                tau,
            });
        }

        for j in 0..num_trees {
            // Add tree j's previous contribution back into the residual,
            // producing the partial residual this tree is fit against.
            for k in 0..n {
                let node = sampler.node_id(j, k);
                let value =
                    node_contribution(model, draws[prev_model_iter].ensemble.tree(j), node, data, k);
                data.residual_add(k, value);
            }

            // A freshly retained slot continues from the previous draw's
            // trees.
            if model_iter > prev_model_iter {
                let prev_tree = draws[prev_model_iter].ensemble.tree(j).clone();
                draws[model_iter].ensemble.clone_tree_from(j, &prev_tree);
            }

            let tree = draws[model_iter].ensemble.tree_mut(j);
            sampler.sample_tree(tree, data, model, &tree_prior, sigma_sq, j, &mut rng)?;
            sample_leaf_parameters(tree, sampler.partition(j), data, model, sigma_sq, j, &mut rng)?;

            for k in 0..n {
                let node = sampler.node_id(j, k);
                let value =
                    node_contribution(model, draws[model_iter].ensemble.tree(j), node, data, k);
                data.residual_subtract(k, value);
            }
        }

        sigma_sq = variance_sampler.sample(data, &mut rng)?;
        if let Some(scale_sampler) = &leaf_scale_sampler {
            tau = scale_sampler.sample(&draws[model_iter].ensemble, &mut rng)?;
            model.set_scale(tau);
        }
        draws[model_iter].sigma_sq = sigma_sq;
        draws[model_iter].tau = tau;

        if settings.save_model_draws && sweep >= settings.num_burnin {
            save_sweep_draw(settings, &draws[model_iter], sweep);
        }
        if sweep >= settings.num_burnin {
            prev_model_iter = model_iter;
            model_iter += 1;
        }
    }
    info!("BART run finished with {} retained draws", draws.len());
    Ok(())
}

fn run_xbart<M: LeafModel>(
    settings: &Settings,
    data: &mut Dataset,
    draws: &mut Vec<ModelDraw>,
    model: &mut M,
) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(settings.seed);
    let n = data.num_observations();
    let num_trees = settings.num_trees;
    let tree_prior = TreePrior::new(settings.alpha, settings.beta, settings.min_samples_leaf);
    let variance_sampler = GlobalVarianceSampler::new(VariancePrior::new(
        settings.variance_prior.0,
        settings.variance_prior.1,
    ));
    let leaf_scale_sampler = settings
        .leaf_scale_prior
        .map(|(a, b)| LeafScaleSampler::new(VariancePrior::new(a, b)));

    let ybar = data.outcome().mean().unwrap_or(0.0);
    let init_value = if model.requires_basis() {
        0.0
    } else {
        ybar / num_trees as f64
    };

    data.reset_residual();
    draws.clear();
    draws.push(ModelDraw {
        ensemble: Ensemble::new(num_trees, init_value, model.leaf_dim()),
        sigma_sq: 1.0,
        tau: settings.leaf_scale,
    });

    // The dataset-wide presorts are computed once here and cloned into a
    // fresh partition for every tree update.
    let mut sampler = GrowFromRootSampler::new(data, num_trees, settings.cutpoint_grid_size);

    for j in 0..num_trees {
        for k in 0..n {
            let value = node_contribution(model, draws[0].ensemble.tree(j), ROOT_ID, data, k);
            data.residual_subtract(k, value);
        }
    }

    let mut sigma_sq = variance_sampler.sample(data, &mut rng)?;
    let mut tau = settings.leaf_scale;

    let total_sweeps = settings.num_burnin + settings.num_samples;
    info!(
        "XBART run: {} trees, {} observations, {} sweeps ({} burn-in)",
        num_trees, n, total_sweeps, settings.num_burnin
    );

    let mut model_iter = 0usize;
    let mut prev_model_iter = 0usize;
    for sweep in 0..total_sweeps {
        if sweep > 0 && model_iter > prev_model_iter {
            draws.push(ModelDraw {
                ensemble: Ensemble::new(num_trees, init_value, model.leaf_dim()),
                sigma_sq,
                tau,
            });
        }

        for j in 0..num_trees {
            // The leaf map still reflects tree j's structure from the
            // previous sweep, which is exactly what the add-back needs.
            for k in 0..n {
                let node = sampler.node_id(j, k);
                let value =
                    node_contribution(model, draws[prev_model_iter].ensemble.tree(j), node, data, k);
                data.residual_add(k, value);
            }

            // Grow-from-root rebuilds the tree and its partition afresh.
            sampler.reset_for_tree(data, j);
            draws[model_iter].ensemble.reset_tree(j, init_value);
            let tree = draws[model_iter].ensemble.tree_mut(j);
            sampler.sample_tree(tree, data, model, &tree_prior, sigma_sq, j, &mut rng)?;
            sample_leaf_parameters(tree, sampler.partition(), data, model, sigma_sq, j, &mut rng)?;

            for k in 0..n {
                let node = sampler.node_id(j, k);
                let value =
                    node_contribution(model, draws[model_iter].ensemble.tree(j), node, data, k);
                data.residual_subtract(k, value);
            }
        }

        sigma_sq = variance_sampler.sample(data, &mut rng)?;
        if let Some(scale_sampler) = &leaf_scale_sampler {
            tau = scale_sampler.sample(&draws[model_iter].ensemble, &mut rng)?;
            model.set_scale(tau);
        }
        draws[model_iter].sigma_sq = sigma_sq;
        draws[model_iter].tau = tau;

        if settings.save_model_draws && sweep >= settings.num_burnin {
            save_sweep_draw(settings, &draws[model_iter], sweep);
        }
        if sweep >= settings.num_burnin {
            prev_model_iter = model_iter;
            model_iter += 1;
        }
    }
    info!("XBART run finished with {} retained draws", draws.len());
    Ok(())
}

/// Best-effort per-sweep dump; failures are warnings and never abort the
/// run.
fn save_sweep_draw(settings: &Settings, draw: &ModelDraw, sweep: usize) {
    let filename = format!("model_{sweep}.json");
    let path = settings
        .draw_dir
        .as_ref()
        .map(|dir| dir.join(&filename))
        .unwrap_or_else(|| PathBuf::from(filename));
    if let Err(error) = write_draw(draw, &path) {
        warn!("failed to save draw for sweep {sweep} to {}: {error}", path.display());
    }
}

fn write_draw(draw: &ModelDraw, path: &Path) -> Result<()> {
    let trees: Vec<Vec<PreorderNode>> = (0..draw.ensemble.num_trees())
        .map(|j| draw.ensemble.tree(j).preorder())
        .collect();
    let file = File::create(path)?;
    serde_json::to_writer_pretty(
        file,
        &DrawFile {
            sigma_sq: draw.sigma_sq,
            tau: draw.tau,
            trees,
        },
    )?;
    Ok(())
}
