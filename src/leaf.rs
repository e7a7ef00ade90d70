//! Conjugate posterior draws for leaf parameters, the global residual
//! variance, and the optional hierarchical leaf scale.

use rand::Rng;
use rand_distr::{Distribution, Gamma};

use crate::data::Dataset;
use crate::error::{Error, Result};
use crate::partition::NodeObservations;
use crate::priors::VariancePrior;
use crate::suffstat::{LeafModel, LeafSuffStat};
use crate::tree::{Ensemble, Tree};

/// Draws a fresh parameter for every leaf of `tree` from its conjugate
/// posterior, reading the observations of each leaf through the tracker
/// view.
pub fn sample_leaf_parameters<M, V, R>(
    tree: &mut Tree,
    view: &V,
    data: &Dataset,
    model: &M,
    sigma_sq: f64,
    tree_num: usize,
    rng: &mut R,
) -> Result<()>
where
    M: LeafModel,
    V: NodeObservations,
    R: Rng,
{
    for leaf in tree.leaves() {
        let mut stat = model.zero_stat();
        for &obs in view.node_observations(leaf) {
            stat.increment(data, obs);
        }
        let value = model
            .sample_leaf(&stat, sigma_sq, rng)
            .map_err(|message| Error::Numerical {
                context: format!("tree {tree_num}, leaf {leaf}: {message}"),
            })?;
        tree.set_leaf_value(leaf, &value);
    }
    Ok(())
}

/// Inverse-gamma draw for the global residual variance.
pub struct GlobalVarianceSampler {
    prior: VariancePrior,
}

impl GlobalVarianceSampler {
    /// Creates the sampler from the `(a, b)` prior.
    pub fn new(prior: VariancePrior) -> Self {
        Self { prior }
    }

    /// Posterior shape `a/2 + n`.
    pub fn posterior_shape(&self, data: &Dataset) -> f64 {
        self.prior.shape / 2.0 + data.num_observations() as f64
    }

    /// Posterior scale `a*b/2 + sum r^2` over the current residuals.
    pub fn posterior_scale(&self, data: &Dataset) -> f64 {
        self.prior.shape * self.prior.scale / 2.0 + data.sum_squared_residuals()
    }

    /// Draws `sigma^2` from its inverse-gamma posterior. The draw is taken
    /// from the corresponding gamma distribution and inverted.
    pub fn sample<R: Rng>(&self, data: &Dataset, rng: &mut R) -> Result<f64> {
        let shape = self.posterior_shape(data);
        let scale = self.posterior_scale(data);
        let gamma = Gamma::new(shape, 1.0 / scale).map_err(|e| Error::Numerical {
            context: format!("global variance posterior ({shape}, {scale}): {e}"),
        })?;
        Ok(1.0 / gamma.sample(rng))
    }
}

/// Inverse-gamma draw for the leaf scale `tau`, pooled over every leaf in
/// the ensemble.
pub struct LeafScaleSampler {
    prior: VariancePrior,
}

impl LeafScaleSampler {
    /// Creates the sampler from the `(a, b)` prior.
    pub fn new(prior: VariancePrior) -> Self {
        Self { prior }
    }

    /// Draws `tau` with posterior shape `a/2 + total leaves` and scale
    /// `a*b/2 + sum of squared leaf values`.
    pub fn sample<R: Rng>(&self, ensemble: &Ensemble, rng: &mut R) -> Result<f64> {
        let shape = self.prior.shape / 2.0 + ensemble.num_leaves() as f64;
        let scale = self.prior.shape * self.prior.scale / 2.0 + ensemble.sum_leaf_squared();
        let gamma = Gamma::new(shape, 1.0 / scale).map_err(|e| Error::Numerical {
            context: format!("leaf scale posterior ({shape}, {scale}): {e}"),
        })?;
        Ok(1.0 / gamma.sample(rng))
    }
}
