//! Linear algebra helpers for Cholesky-parameterized Gaussians.
//!
//! Public API:
//!     pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64>
//!     pub fn cholesky_factor(matrix: &DMatrix<f64>, context: &str) -> Result<DMatrix<f64>, FilterError>
//!     pub fn cholesky_log_determinant(lower: &DMatrix<f64>) -> f64
//!
//! Strategy:
//! 1) Symmetrize P ← 0.5 (P + Pᵀ)
//! 2) Cholesky, failing loudly. Covariances here come straight from configuration, so a
//!    non-positive-definite input is a configuration error and is never jittered into shape.
//! 3) Quadratic forms (`DMatrix::solve_lower_triangular`) and determinants are taken through the
//!    factor, never through an inverse.

use nalgebra::linalg::Cholesky;
use nalgebra::DMatrix;

use crate::errors::FilterError;

/// Symmetrize a matrix: P ← 0.5 (P + Pᵀ)
///
/// Simple matrix symmetrization function that reduces round-off errors associated
/// with floating point arithmetic.
///
/// # Arguments
/// * `m` - the matrix to symmetrize
///
/// # Returns
/// A symmetrized version of the input matrix.
#[inline]
pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    0.5 * (m + m.transpose())
}

/// Lower Cholesky factor L such that P = L Lᵀ.
///
/// # Arguments
/// * `matrix` - the covariance to factor; symmetrized before decomposition
/// * `context` - name of the covariance, used in the error
///
/// # Returns
/// The lower triangular factor, or [`FilterError::NotPositiveDefinite`] if the matrix is not
/// square, has non-finite entries, or is not positive definite.
pub fn cholesky_factor(matrix: &DMatrix<f64>, context: &str) -> Result<DMatrix<f64>, FilterError> {
    if !matrix.is_square() {
        return Err(FilterError::dimension(
            matrix.nrows(),
            matrix.ncols(),
            format!("{context} (square covariance)"),
        ));
    }
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(FilterError::NotPositiveDefinite {
            context: format!("{context} has non-finite entries"),
        });
    }
    let p = symmetrize(matrix);
    Cholesky::new(p)
        .map(|ch| ch.l())
        .ok_or_else(|| FilterError::NotPositiveDefinite {
            context: context.to_string(),
        })
}

/// ln |L Lᵀ| = 2 Σ ln Lᵢᵢ
pub fn cholesky_log_determinant(lower: &DMatrix<f64>) -> f64 {
    2.0 * lower.diagonal().iter().map(|d| d.ln()).sum::<f64>()
}

/* =============================== Tests ==================================== */
