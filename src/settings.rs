//! Run configuration for the tree ensemble samplers.

use nalgebra::DMatrix;

use crate::error::{Error, Result};

/// Tree ensemble sampling algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Metropolis-Hastings grow/prune updates of a persistent ensemble.
    Bart,
    /// Stochastic grow-from-root rebuild of each tree every sweep.
    Xbart,
}

/// Leaf parameter model. The three variants share the same conjugate
/// Gaussian machinery but differ in their sufficient statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafModelKind {
    /// Each leaf holds a constant mean.
    ConstantGaussian,
    /// Each leaf holds a single regression coefficient on a basis column.
    UnivariateRegressionGaussian,
    /// Each leaf holds a coefficient vector on a multi-column basis.
    MultivariateRegressionGaussian,
}

/// Parameters of one sampling run.
///
/// Construct with struct-update syntax over [`Settings::default`] and call
/// [`Settings::validate`] (the runner does so on construction):
///
/// ```
/// use sumtrees::settings::{Method, Settings};
///
/// let settings = Settings {
///     num_trees: 50,
///     num_samples: 500,
///     num_burnin: 250,
///     method: Method::Xbart,
///     seed: 42,
///     ..Settings::default()
/// };
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct Settings {
    /// Number of trees in the ensemble.
    pub num_trees: usize,
    /// Number of retained posterior draws.
    pub num_samples: usize,
    /// Number of discarded burn-in sweeps.
    pub num_burnin: usize,
    /// Sampling algorithm.
    pub method: Method,
    /// Depth prior base: `P(split at depth d) = alpha * (1 + d)^(-beta)`.
    pub alpha: f64,
    /// Depth prior decay.
    pub beta: f64,
    /// Minimum number of observations in any leaf created by a split.
    pub min_samples_leaf: usize,
    /// Maximum number of candidate cutpoints per feature (XBART only).
    pub cutpoint_grid_size: usize,
    /// Inverse-gamma prior `(a, b)` on the global residual variance.
    pub variance_prior: (f64, f64),
    /// Leaf parameter model.
    pub leaf_model: LeafModelKind,
    /// Prior scale of the leaf parameter (`tau`), for the scalar models.
    pub leaf_scale: f64,
    /// Prior covariance of the leaf coefficient vector, for the
    /// multivariate model.
    pub leaf_covariance: Option<DMatrix<f64>>,
    /// Inverse-gamma prior `(a, b)` on `tau`; when set, `tau` is resampled
    /// once per sweep from the ensemble's leaf values.
    pub leaf_scale_prior: Option<(f64, f64)>,
    /// RNG seed. Two runs with identical settings and data produce
    /// identical draws.
    pub seed: u64,
    /// Whether to dump each retained draw to disk during the run.
    pub save_model_draws: bool,
    /// Directory for dumped draws (current directory when unset).
    pub draw_dir: Option<std::path::PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            num_trees: 200,
            num_samples: 1000,
            num_burnin: 100,
            method: Method::Bart,
            alpha: 0.95,
            beta: 2.0,
            min_samples_leaf: 1,
            cutpoint_grid_size: 100,
            variance_prior: (1.0, 1.0),
            leaf_model: LeafModelKind::ConstantGaussian,
            leaf_scale: 1.0,
            leaf_covariance: None,
            leaf_scale_prior: None,
            seed: 0,
            save_model_draws: false,
            draw_dir: None,
        }
    }
}

impl Settings {
    /// Checks every parameter for validity. Called by the runner before any
    /// data is touched.
    pub fn validate(&self) -> Result<()> {
        if self.num_trees < 1 {
            return Err(Error::Config("num_trees must be at least 1".into()));
        }
        if self.num_samples < 1 {
            return Err(Error::Config("num_samples must be at least 1".into()));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(Error::Config(format!(
                "alpha must lie in (0, 1), got {}",
                self.alpha
            )));
        }
        if !(self.beta > 0.0) {
            return Err(Error::Config(format!(
                "beta must be positive, got {}",
                self.beta
            )));
        }
        if self.min_samples_leaf < 1 {
            return Err(Error::Config("min_samples_leaf must be at least 1".into()));
        }
        if self.method == Method::Xbart && self.cutpoint_grid_size < 2 {
            return Err(Error::Config(
                "cutpoint_grid_size must be at least 2".into(),
            ));
        }
        let (a, b) = self.variance_prior;
        if !(a > 0.0 && b > 0.0) {
            return Err(Error::Config(format!(
                "variance prior (a, b) must be positive, got ({a}, {b})"
            )));
        }
        match self.leaf_model {
            LeafModelKind::MultivariateRegressionGaussian => {
                let cov = self.leaf_covariance.as_ref().ok_or_else(|| {
                    Error::Config(
                        "multivariate leaf model requires a prior covariance matrix".into(),
                    )
                })?;
                if !cov.is_square() || cov.nrows() == 0 {
                    return Err(Error::Config(
                        "leaf prior covariance must be a non-empty square matrix".into(),
                    ));
                }
            }
            _ => {
                if !(self.leaf_scale > 0.0) {
                    return Err(Error::Config(format!(
                        "leaf scale tau must be positive, got {}",
                        self.leaf_scale
                    )));
                }
            }
        }
        if let Some((a, b)) = self.leaf_scale_prior {
            if !(a > 0.0 && b > 0.0) {
                return Err(Error::Config(format!(
                    "leaf scale prior (a, b) must be positive, got ({a}, {b})"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_validate() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_depth_prior() {
        let settings = Settings {
            alpha: 1.5,
            ..Settings::default()
        };
        assert!(matches!(settings.validate(), Err(Error::Config(_))));

        let settings = Settings {
            beta: 0.0,
            ..Settings::default()
        };
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_xbart_requires_a_real_grid() {
        let settings = Settings {
            method: Method::Xbart,
            cutpoint_grid_size: 1,
            ..Settings::default()
        };
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_multivariate_model_requires_covariance() {
        let settings = Settings {
            leaf_model: LeafModelKind::MultivariateRegressionGaussian,
            ..Settings::default()
        };
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
    }
}
