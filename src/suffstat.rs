//! Leaf sufficient statistics and the conjugate Gaussian leaf models.
//!
//! The three leaf models (constant mean, univariate regression,
//! multivariate regression) differ only in their sufficient-statistic
//! algebra and posterior draws. They share a capability set: zero
//! initialization, per-observation increment, sibling subtraction, closed
//! form log marginal likelihood, and a posterior draw. The tree samplers
//! are generic over this capability set.

use nalgebra::{Cholesky, DMatrix, DVector};
use ndarray::ArrayView1;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::data::Dataset;

/// Sufficient statistic of the observations inside one leaf.
pub trait LeafSuffStat: Clone {
    /// Number of accumulated observations.
    fn n(&self) -> usize;
    /// Folds one observation (its residual, and basis where applicable)
    /// into the statistic.
    fn increment(&mut self, data: &Dataset, observation: usize);
    /// Computes `parent - left`, the statistic of the right sibling.
    fn subtract(parent: &Self, left: &Self) -> Self;
}

/// Conjugate Gaussian leaf model: the algebra the samplers need from a
/// leaf prior, generic over the matching sufficient statistic.
pub trait LeafModel {
    /// Sufficient statistic type of this model.
    type Stat: LeafSuffStat;

    /// Length of a leaf value vector.
    fn leaf_dim(&self) -> usize;
    /// Whether the model reads a basis matrix from the dataset.
    fn requires_basis(&self) -> bool;
    /// A zeroed statistic.
    fn zero_stat(&self) -> Self::Stat;
    /// Log marginal likelihood of a leaf with statistic `stat` given the
    /// current global residual variance.
    fn log_ml(&self, stat: &Self::Stat, sigma_sq: f64) -> f64;
    /// Draws the leaf parameter from its conjugate posterior. Fails with a
    /// message when the posterior variance is not positive definite, which
    /// indicates corrupted sufficient statistics.
    fn sample_leaf<R: Rng>(
        &self,
        stat: &Self::Stat,
        sigma_sq: f64,
        rng: &mut R,
    ) -> Result<Vec<f64>, String>;
    /// Contribution of a leaf with the given value vector to the
    /// prediction of one observation.
    fn contribution(&self, leaf_value: &[f64], basis_row: Option<ArrayView1<f64>>) -> f64;
    /// Replaces the prior scale after a hierarchical `tau` update. Ignored
    /// by models whose prior scale is a fixed matrix.
    fn set_scale(&mut self, _tau: f64) {}
}

// ---------------------------------------------------------------------------
// Constant mean leaves

/// Sufficient statistic for a constant-mean leaf: `(n, sum r, sum r^2)`.
#[derive(Debug, Clone, Default)]
pub struct ConstantSuffStat {
    /// Observation count.
    pub n: usize,
    /// Sum of residuals.
    pub sum_r: f64,
    /// Sum of squared residuals.
    pub sum_r_sq: f64,
}

impl LeafSuffStat for ConstantSuffStat {
    fn n(&self) -> usize {
        self.n
    }

    #[inline(always)]
    fn increment(&mut self, data: &Dataset, observation: usize) {
        let r = data.residual(observation);
        self.n += 1;
        self.sum_r += r;
        self.sum_r_sq += r * r;
    }

    fn subtract(parent: &Self, left: &Self) -> Self {
        Self {
            n: parent.n - left.n,
            sum_r: parent.sum_r - left.sum_r,
            sum_r_sq: parent.sum_r_sq - left.sum_r_sq,
        }
    }
}

/// Constant-mean leaf model with prior `mu ~ Normal(0, tau)`.
#[derive(Debug, Clone)]
pub struct ConstantLeafModel {
    tau: f64,
}

impl ConstantLeafModel {
    /// Creates the model with prior scale `tau`.
    pub fn new(tau: f64) -> Self {
        Self { tau }
    }

    /// Closed-form posterior `(mean, variance)` of the leaf mean.
    pub fn posterior(&self, stat: &ConstantSuffStat, sigma_sq: f64) -> (f64, f64) {
        let n = stat.n as f64;
        let denom = sigma_sq + self.tau * n;
        (
            self.tau * stat.sum_r / denom,
            self.tau * sigma_sq / denom,
        )
    }
}

impl LeafModel for ConstantLeafModel {
    type Stat = ConstantSuffStat;

    fn leaf_dim(&self) -> usize {
        1
    }

    fn requires_basis(&self) -> bool {
        false
    }

    fn zero_stat(&self) -> ConstantSuffStat {
        ConstantSuffStat::default()
    }

    fn log_ml(&self, stat: &ConstantSuffStat, sigma_sq: f64) -> f64 {
        let n = stat.n as f64;
        let tau = self.tau;
        -(n * 0.5) * (2.0 * std::f64::consts::PI).ln() - n * sigma_sq.sqrt().ln()
            + 0.5 * (sigma_sq / (sigma_sq + tau * n)).ln()
            - stat.sum_r_sq / (2.0 * sigma_sq)
            + (tau * stat.sum_r * stat.sum_r) / (2.0 * sigma_sq * (sigma_sq + tau * n))
    }

    fn sample_leaf<R: Rng>(
        &self,
        stat: &ConstantSuffStat,
        sigma_sq: f64,
        rng: &mut R,
    ) -> Result<Vec<f64>, String> {
        let (mean, variance) = self.posterior(stat, sigma_sq);
        if !(variance > 0.0) || !variance.is_finite() {
            return Err(format!("non-positive posterior leaf variance {variance}"));
        }
        let normal = Normal::new(0.0, 1.0).unwrap();
        Ok(vec![mean + variance.sqrt() * normal.sample(rng)])
    }

    fn contribution(&self, leaf_value: &[f64], _basis_row: Option<ArrayView1<f64>>) -> f64 {
        leaf_value[0]
    }

    fn set_scale(&mut self, tau: f64) {
        self.tau = tau;
    }
}

// ---------------------------------------------------------------------------
// Univariate regression leaves

/// Sufficient statistic for a univariate-regression leaf over basis column
/// `b`: `(n, sum b*r, sum b^2, sum r^2)`.
#[derive(Debug, Clone, Default)]
pub struct UnivariateSuffStat {
    /// Observation count.
    pub n: usize,
    /// Sum of basis times residual.
    pub sum_br: f64,
    /// Sum of squared basis values.
    pub sum_b_sq: f64,
    /// Sum of squared residuals.
    pub sum_r_sq: f64,
}

impl LeafSuffStat for UnivariateSuffStat {
    fn n(&self) -> usize {
        self.n
    }

    #[inline(always)]
    fn increment(&mut self, data: &Dataset, observation: usize) {
        let r = data.residual(observation);
        let b = data.basis_value(observation, 0);
        self.n += 1;
        self.sum_br += b * r;
        self.sum_b_sq += b * b;
        self.sum_r_sq += r * r;
    }

    fn subtract(parent: &Self, left: &Self) -> Self {
        Self {
            n: parent.n - left.n,
            sum_br: parent.sum_br - left.sum_br,
            sum_b_sq: parent.sum_b_sq - left.sum_b_sq,
            sum_r_sq: parent.sum_r_sq - left.sum_r_sq,
        }
    }
}

/// Univariate-regression leaf model with prior `beta ~ Normal(0, tau)` on
/// the slope over basis column 0.
#[derive(Debug, Clone)]
pub struct UnivariateLeafModel {
    tau: f64,
}

impl UnivariateLeafModel {
    /// Creates the model with prior scale `tau`.
    pub fn new(tau: f64) -> Self {
        Self { tau }
    }

    /// Closed-form posterior `(mean, variance)` of the leaf slope.
    pub fn posterior(&self, stat: &UnivariateSuffStat, sigma_sq: f64) -> (f64, f64) {
        let denom = sigma_sq + self.tau * stat.sum_b_sq;
        (
            self.tau * stat.sum_br / denom,
            self.tau * sigma_sq / denom,
        )
    }
}

impl LeafModel for UnivariateLeafModel {
    type Stat = UnivariateSuffStat;

    fn leaf_dim(&self) -> usize {
        1
    }

    fn requires_basis(&self) -> bool {
        true
    }

    fn zero_stat(&self) -> UnivariateSuffStat {
        UnivariateSuffStat::default()
    }

    fn log_ml(&self, stat: &UnivariateSuffStat, sigma_sq: f64) -> f64 {
        let n = stat.n as f64;
        let tau = self.tau;
        -(n * 0.5) * (2.0 * std::f64::consts::PI).ln() - n * sigma_sq.sqrt().ln()
            + 0.5 * (sigma_sq / (sigma_sq + tau * stat.sum_b_sq)).ln()
            - stat.sum_r_sq / (2.0 * sigma_sq)
            + (tau * stat.sum_br * stat.sum_br)
                / (2.0 * sigma_sq * (sigma_sq + tau * stat.sum_b_sq))
    }

    fn sample_leaf<R: Rng>(
        &self,
        stat: &UnivariateSuffStat,
        sigma_sq: f64,
        rng: &mut R,
    ) -> Result<Vec<f64>, String> {
        let (mean, variance) = self.posterior(stat, sigma_sq);
        if !(variance > 0.0) || !variance.is_finite() {
            return Err(format!("non-positive posterior slope variance {variance}"));
        }
        let normal = Normal::new(0.0, 1.0).unwrap();
        Ok(vec![mean + variance.sqrt() * normal.sample(rng)])
    }

    fn contribution(&self, leaf_value: &[f64], basis_row: Option<ArrayView1<f64>>) -> f64 {
        let basis = basis_row.expect("univariate regression leaves require a basis");
        leaf_value[0] * basis[0]
    }

    fn set_scale(&mut self, tau: f64) {
        self.tau = tau;
    }
}

// ---------------------------------------------------------------------------
// Multivariate regression leaves

/// Sufficient statistic for a multivariate-regression leaf over a basis
/// vector of dimension `d`: `(n, X'X, X'r, sum r^2)`.
#[derive(Debug, Clone)]
pub struct MultivariateSuffStat {
    /// Observation count.
    pub n: usize,
    /// Gram matrix of basis rows (d x d).
    pub xtx: DMatrix<f64>,
    /// Basis-weighted residual sums (d x 1).
    pub xtr: DVector<f64>,
    /// Sum of squared residuals.
    pub sum_r_sq: f64,
}

impl MultivariateSuffStat {
    fn zero(dim: usize) -> Self {
        Self {
            n: 0,
            xtx: DMatrix::zeros(dim, dim),
            xtr: DVector::zeros(dim),
            sum_r_sq: 0.0,
        }
    }
}

impl LeafSuffStat for MultivariateSuffStat {
    fn n(&self) -> usize {
        self.n
    }

    fn increment(&mut self, data: &Dataset, observation: usize) {
        let r = data.residual(observation);
        let dim = self.xtr.len();
        self.n += 1;
        for a in 0..dim {
            let ba = data.basis_value(observation, a);
            self.xtr[a] += ba * r;
            for b in 0..dim {
                self.xtx[(a, b)] += ba * data.basis_value(observation, b);
            }
        }
        self.sum_r_sq += r * r;
    }

    fn subtract(parent: &Self, left: &Self) -> Self {
        Self {
            n: parent.n - left.n,
            xtx: &parent.xtx - &left.xtx,
            xtr: &parent.xtr - &left.xtr,
            sum_r_sq: parent.sum_r_sq - left.sum_r_sq,
        }
    }
}

/// Multivariate-regression leaf model with prior
/// `beta ~ Normal(0, Sigma)` on the coefficient vector.
#[derive(Debug, Clone)]
pub struct MultivariateLeafModel {
    prior_precision: DMatrix<f64>,
    prior_log_det: f64,
    dim: usize,
}

impl MultivariateLeafModel {
    /// Creates the model from a positive-definite prior covariance.
    pub fn new(covariance: DMatrix<f64>) -> Result<Self, String> {
        let dim = covariance.nrows();
        let chol = Cholesky::new(covariance)
            .ok_or_else(|| "leaf prior covariance is not positive definite".to_string())?;
        let prior_log_det = 2.0 * chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>();
        Ok(Self {
            prior_precision: chol.inverse(),
            prior_log_det,
            dim,
        })
    }

    /// Posterior precision `Sigma^-1 + X'X / sigma^2`.
    fn posterior_precision(&self, stat: &MultivariateSuffStat, sigma_sq: f64) -> DMatrix<f64> {
        &self.prior_precision + &stat.xtx / sigma_sq
    }
}

impl LeafModel for MultivariateLeafModel {
    type Stat = MultivariateSuffStat;

    fn leaf_dim(&self) -> usize {
        self.dim
    }

    fn requires_basis(&self) -> bool {
        true
    }

    fn zero_stat(&self) -> MultivariateSuffStat {
        MultivariateSuffStat::zero(self.dim)
    }

    fn log_ml(&self, stat: &MultivariateSuffStat, sigma_sq: f64) -> f64 {
        let n = stat.n as f64;
        let precision = self.posterior_precision(stat, sigma_sq);
        // log det(I + Sigma X'X / sigma^2) = log det(Sigma) + log det(precision)
        let (log_det_precision, quad) = match Cholesky::new(precision) {
            Some(chol) => {
                let log_det = 2.0 * chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>();
                let scaled = &stat.xtr / sigma_sq;
                let solved = chol.solve(&scaled);
                (log_det, scaled.dot(&solved))
            }
            // A non-PD posterior precision collapses the candidate's weight
            // rather than aborting mid-enumeration.
            None => return f64::NEG_INFINITY,
        };
        -(n * 0.5) * (2.0 * std::f64::consts::PI * sigma_sq).ln()
            - 0.5 * (self.prior_log_det + log_det_precision)
            - stat.sum_r_sq / (2.0 * sigma_sq)
            + 0.5 * quad
    }

    fn sample_leaf<R: Rng>(
        &self,
        stat: &MultivariateSuffStat,
        sigma_sq: f64,
        rng: &mut R,
    ) -> Result<Vec<f64>, String> {
        let precision = self.posterior_precision(stat, sigma_sq);
        let chol = Cholesky::new(precision)
            .ok_or_else(|| "posterior leaf precision is not positive definite".to_string())?;
        let covariance = chol.inverse();
        let mean = &covariance * (&stat.xtr / sigma_sq);
        let cov_chol = Cholesky::new(covariance)
            .ok_or_else(|| "posterior leaf covariance is not positive definite".to_string())?;

        let normal = Normal::new(0.0, 1.0).unwrap();
        let z = DVector::from_fn(self.dim, |_, _| normal.sample(rng));
        let draw = mean + cov_chol.l() * z;
        Ok(draw.iter().copied().collect())
    }

    fn contribution(&self, leaf_value: &[f64], basis_row: Option<ArrayView1<f64>>) -> f64 {
        let basis = basis_row.expect("multivariate regression leaves require a basis");
        leaf_value
            .iter()
            .zip(basis.iter())
            .map(|(v, b)| v * b)
            .sum()
    }
}
