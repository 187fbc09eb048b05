//! Multivariate normal distributions parameterized by mean and lower Cholesky factor.
//!
//! Every distribution in the filter (prior, process, measurement, importance) is one of these.
//! Sampling draws `x = μ + L z` with `z ~ N(0, I)`; the log-density is evaluated through the same
//! factor by forward substitution, so the two are consistent and no explicit inverse is formed.

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::errors::FilterError;
use crate::linalg::{cholesky_factor, cholesky_log_determinant};

/// ln(2π)
const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Draw one sample `mean + L z` where `z` is a vector of independent standard normals.
pub fn sample<R: Rng + ?Sized>(rng: &mut R, mean: &DVector<f64>, cholesky: &DMatrix<f64>) -> DVector<f64> {
    let z = DVector::<f64>::from_fn(mean.len(), |_, _| rng.sample(StandardNormal));
    mean + cholesky * z
}

/// Log-density of `x` under `N(mean, L Lᵀ)`.
///
/// Computes `−½‖L⁻¹(x − μ)‖² − Σ ln Lᵢᵢ − (n/2) ln 2π`. Returns `−∞` when the shapes disagree or
/// `L` has a zero on its diagonal; the weight update then clamps the resulting log-weight.
pub fn log_density(x: &DVector<f64>, mean: &DVector<f64>, cholesky: &DMatrix<f64>) -> f64 {
    let n = x.len();
    if mean.len() != n || !cholesky.is_square() || cholesky.nrows() != n {
        return f64::NEG_INFINITY;
    }
    match cholesky.solve_lower_triangular(&(x - mean)) {
        Some(z) => -0.5 * z.norm_squared() - 0.5 * cholesky_log_determinant(cholesky) - 0.5 * n as f64 * LN_2PI,
        None => f64::NEG_INFINITY,
    }
}

/// A Gaussian with a cached Cholesky factor.
#[derive(Clone, Debug)]
pub struct MultivariateNormal {
    mean: DVector<f64>,
    cholesky: DMatrix<f64>,
}

impl MultivariateNormal {
    /// Build from a mean and a covariance matrix.
    ///
    /// # Arguments
    /// * `mean` - mean vector of length n
    /// * `covariance` - n×n symmetric positive definite covariance
    /// * `context` - name used in errors
    pub fn new(mean: DVector<f64>, covariance: &DMatrix<f64>, context: &str) -> Result<Self, FilterError> {
        if covariance.nrows() != mean.len() {
            return Err(FilterError::dimension(
                mean.len(),
                covariance.nrows(),
                format!("{context} covariance rows"),
            ));
        }
        let cholesky = cholesky_factor(covariance, context)?;
        Ok(MultivariateNormal { mean, cholesky })
    }

    /// Diagonal covariance from a slice of variances.
    pub fn from_variances(mean: DVector<f64>, variances: &[f64], context: &str) -> Result<Self, FilterError> {
        if variances.len() != mean.len() {
            return Err(FilterError::dimension(
                mean.len(),
                variances.len(),
                format!("{context} diagonal length"),
            ));
        }
        let covariance = DMatrix::from_diagonal(&DVector::from_column_slice(variances));
        Self::new(mean, &covariance, context)
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    pub fn cholesky(&self) -> &DMatrix<f64> {
        &self.cholesky
    }

    /// Reconstructed covariance `L Lᵀ`.
    pub fn covariance(&self) -> DMatrix<f64> {
        &self.cholesky * self.cholesky.transpose()
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> DVector<f64> {
        sample(rng, &self.mean, &self.cholesky)
    }

    pub fn log_density(&self, x: &DVector<f64>) -> f64 {
        log_density(x, &self.mean, &self.cholesky)
    }

    /// Log-density of `x` with the mean replaced by `mean`.
    pub fn log_density_at(&self, x: &DVector<f64>, mean: &DVector<f64>) -> f64 {
        log_density(x, mean, &self.cholesky)
    }
}
