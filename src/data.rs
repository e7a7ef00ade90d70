//! In-memory training data: covariates, outcome, and the mutable residual
//! the samplers condition on.

use ndarray::{Array1, Array2, ArrayView1};

use crate::error::{Error, Result};

/// Kind of a covariate column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureType {
    /// Real-valued feature, split on a threshold.
    Numeric,
    /// Integer-coded feature with a meaningful ordering, split on a
    /// threshold like a numeric feature.
    OrderedCategorical,
    /// Integer-coded feature without an ordering, split on a category
    /// subset.
    UnorderedCategorical,
}

/// Training dataset.
///
/// The covariate matrix, outcome, and optional basis / treatment blocks are
/// immutable for the lifetime of a run; the residual vector is the single
/// piece of mutable state, and only the sweep driver writes to it.
pub struct Dataset {
    covariates: Array2<f64>,
    outcome: Array1<f64>,
    residual: Array1<f64>,
    feature_types: Vec<FeatureType>,
    basis: Option<Array2<f64>>,
    treatment: Option<Array2<f64>>,
}

impl Dataset {
    /// Builds and validates a dataset from a covariate matrix, outcome
    /// vector, and per-column feature types. The residual starts equal to
    /// the outcome.
    pub fn new(
        covariates: Array2<f64>,
        outcome: Array1<f64>,
        feature_types: Vec<FeatureType>,
    ) -> Result<Self> {
        let n = covariates.nrows();
        let p = covariates.ncols();
        if n < 1 {
            return Err(Error::Data("dataset must contain at least one row".into()));
        }
        if p < 1 {
            return Err(Error::Data(
                "dataset must contain at least one feature".into(),
            ));
        }
        if outcome.len() != n {
            return Err(Error::Data(format!(
                "outcome length {} does not match {} covariate rows",
                outcome.len(),
                n
            )));
        }
        if feature_types.len() != p {
            return Err(Error::Data(format!(
                "{} feature types provided for {} columns",
                feature_types.len(),
                p
            )));
        }
        if covariates.iter().any(|x| !x.is_finite()) {
            return Err(Error::Data("covariates contain non-finite entries".into()));
        }
        if outcome.iter().any(|y| !y.is_finite()) {
            return Err(Error::Data("outcome contains non-finite entries".into()));
        }
        for (j, kind) in feature_types.iter().enumerate() {
            if matches!(
                kind,
                FeatureType::OrderedCategorical | FeatureType::UnorderedCategorical
            ) {
                let ok = covariates
                    .column(j)
                    .iter()
                    .all(|&x| x >= 0.0 && x.fract() == 0.0);
                if !ok {
                    return Err(Error::Data(format!(
                        "categorical column {j} must contain non-negative integer values"
                    )));
                }
            }
        }

        let residual = outcome.clone();
        Ok(Self {
            covariates,
            outcome,
            residual,
            feature_types,
            basis: None,
            treatment: None,
        })
    }

    /// Attaches a leaf-regression basis matrix (one row per observation).
    pub fn with_basis(mut self, basis: Array2<f64>) -> Result<Self> {
        if basis.nrows() != self.num_observations() {
            return Err(Error::Data(format!(
                "basis has {} rows for {} observations",
                basis.nrows(),
                self.num_observations()
            )));
        }
        if basis.ncols() == 0 {
            return Err(Error::Data("basis must have at least one column".into()));
        }
        if basis.iter().any(|x| !x.is_finite()) {
            return Err(Error::Data("basis contains non-finite entries".into()));
        }
        self.basis = Some(basis);
        Ok(self)
    }

    /// Attaches a treatment matrix. Stored for downstream consumers; the
    /// tree samplers never read it.
    pub fn with_treatment(mut self, treatment: Array2<f64>) -> Result<Self> {
        if treatment.nrows() != self.num_observations() {
            return Err(Error::Data(format!(
                "treatment has {} rows for {} observations",
                treatment.nrows(),
                self.num_observations()
            )));
        }
        self.treatment = Some(treatment);
        Ok(self)
    }

    /// Number of observations.
    pub fn num_observations(&self) -> usize {
        self.covariates.nrows()
    }

    /// Number of covariate columns.
    pub fn num_features(&self) -> usize {
        self.covariates.ncols()
    }

    /// Covariate value at (row, col).
    #[inline(always)]
    pub fn covariate(&self, row: usize, col: usize) -> f64 {
        self.covariates[[row, col]]
    }

    /// The full covariate matrix.
    pub fn covariates(&self) -> &Array2<f64> {
        &self.covariates
    }

    /// Kind of column `j`.
    pub fn feature_type(&self, j: usize) -> FeatureType {
        self.feature_types[j]
    }

    /// The raw outcome vector.
    pub fn outcome(&self) -> &Array1<f64> {
        &self.outcome
    }

    /// Current residual for one observation.
    #[inline(always)]
    pub fn residual(&self, row: usize) -> f64 {
        self.residual[row]
    }

    /// Adds a tree contribution back into the residual for one observation.
    #[inline(always)]
    pub fn residual_add(&mut self, row: usize, value: f64) {
        self.residual[row] += value;
    }

    /// Subtracts a tree contribution from the residual for one observation.
    #[inline(always)]
    pub fn residual_subtract(&mut self, row: usize, value: f64) {
        self.residual[row] -= value;
    }

    /// The full residual vector.
    pub fn residuals(&self) -> &Array1<f64> {
        &self.residual
    }

    /// Resets the residual to the raw outcome, ahead of a fresh run.
    pub fn reset_residual(&mut self) {
        self.residual.assign(&self.outcome);
    }

    /// Sum of squared residuals over the whole dataset.
    pub fn sum_squared_residuals(&self) -> f64 {
        self.residual.iter().map(|r| r * r).sum()
    }

    /// Number of basis columns (zero when no basis is loaded).
    pub fn basis_dim(&self) -> usize {
        self.basis.as_ref().map_or(0, |b| b.ncols())
    }

    /// Basis value at (row, col). Callers must have validated that a basis
    /// is loaded.
    #[inline(always)]
    pub fn basis_value(&self, row: usize, col: usize) -> f64 {
        self.basis.as_ref().expect("basis not loaded")[[row, col]]
    }

    /// Basis row view, when a basis is loaded.
    pub fn basis_row(&self, row: usize) -> Option<ArrayView1<'_, f64>> {
        self.basis.as_ref().map(|b| b.row(row))
    }

    /// The basis matrix, when loaded.
    pub fn basis(&self) -> Option<&Array2<f64>> {
        self.basis.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_rejects_dimension_mismatch() {
        let x = array![[0.0], [1.0]];
        let y = array![0.0, 1.0, 2.0];
        let result = Dataset::new(x, y, vec![FeatureType::Numeric]);
        assert!(matches!(result, Err(Error::Data(_))));
    }

    #[test]
    fn test_rejects_non_finite_entries() {
        let x = array![[0.0], [f64::NAN]];
        let y = array![0.0, 1.0];
        assert!(Dataset::new(x, y, vec![FeatureType::Numeric]).is_err());

        let x = array![[0.0], [1.0]];
        let y = array![0.0, f64::INFINITY];
        assert!(Dataset::new(x, y, vec![FeatureType::Numeric]).is_err());
    }

    #[test]
    fn test_rejects_fractional_categoricals() {
        let x = array![[0.0], [1.5]];
        let y = array![0.0, 1.0];
        let result = Dataset::new(x, y, vec![FeatureType::UnorderedCategorical]);
        assert!(matches!(result, Err(Error::Data(_))));
    }

    #[test]
    fn test_residual_starts_at_outcome() {
        let x = array![[0.0], [1.0]];
        let y = array![2.0, -3.0];
        let mut data = Dataset::new(x, y, vec![FeatureType::Numeric]).unwrap();
        assert_eq!(data.residual(0), 2.0);
        data.residual_subtract(0, 0.5);
        data.residual_add(1, 1.0);
        assert_eq!(data.residual(0), 1.5);
        assert_eq!(data.residual(1), -2.0);
    }
}
