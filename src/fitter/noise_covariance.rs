//! Noise weighting of the fit.
//!
//! The fitter only sees a [`NoiseCovariance`]: either per-TOA 1σ uncertainties
//! (uncorrelated noise) or a full covariance matrix in s². Both are reduced
//! to a whitening transform `L⁻¹` with `C = L Lᵀ`, so the weighted problem
//! becomes an ordinary least-squares problem on `L⁻¹r` and `L⁻¹M`.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

use crate::pulsefit_errors::PulsefitError;

#[derive(Debug, Clone, PartialEq)]
pub enum NoiseCovariance {
    /// 1σ uncertainty per TOA, seconds.
    Diagonal(DVector<f64>),
    /// Full covariance, s².
    Full(DMatrix<f64>),
}

impl NoiseCovariance {
    pub fn len(&self) -> usize {
        match self {
            NoiseCovariance::Diagonal(s) => s.len(),
            NoiseCovariance::Full(c) => c.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Covariance multiplied by `factor²` (uncertainties by `factor`).
    pub fn scaled(&self, factor: f64) -> NoiseCovariance {
        match self {
            NoiseCovariance::Diagonal(s) => NoiseCovariance::Diagonal(s * factor),
            NoiseCovariance::Full(c) => NoiseCovariance::Full(c * (factor * factor)),
        }
    }

    /// The covariance of a subset of the rows, in the order of `rows`.
    ///
    /// Errors
    /// ----------
    /// * [`PulsefitError::DimensionMismatch`] if a row is out of range.
    pub fn select(&self, rows: &[usize]) -> Result<NoiseCovariance, PulsefitError> {
        if let Some(&row) = rows.iter().find(|&&r| r >= self.len()) {
            return Err(PulsefitError::DimensionMismatch {
                expected: self.len(),
                got: row + 1,
            });
        }
        Ok(match self {
            NoiseCovariance::Diagonal(s) => NoiseCovariance::Diagonal(s.select_rows(rows)),
            NoiseCovariance::Full(c) => NoiseCovariance::Full(c.select_rows(rows).select_columns(rows)),
        })
    }

    /// Per-TOA 1σ uncertainties (square root of the diagonal).
    pub fn sigmas(&self) -> DVector<f64> {
        match self {
            NoiseCovariance::Diagonal(s) => s.clone(),
            NoiseCovariance::Full(c) => c.diagonal().map(f64::sqrt),
        }
    }

    /// Build the whitening transform.
    ///
    /// Errors
    /// ----------
    /// * [`PulsefitError::InvalidConfiguration`] if an uncertainty is not
    ///   strictly positive or the covariance is not positive definite.
    pub fn whitener(&self) -> Result<Whitener, PulsefitError> {
        match self {
            NoiseCovariance::Diagonal(s) => {
                if s.iter().any(|&x| !(x > 0.0) || !x.is_finite()) {
                    return Err(PulsefitError::InvalidConfiguration(
                        "TOA uncertainties must be finite and > 0".into(),
                    ));
                }
                Ok(Whitener::Diagonal(s.map(|x| 1.0 / x)))
            }
            NoiseCovariance::Full(c) => {
                if !c.is_square() {
                    return Err(PulsefitError::DimensionMismatch {
                        expected: c.nrows(),
                        got: c.ncols(),
                    });
                }
                Cholesky::new(c.clone())
                    .map(Whitener::Cholesky)
                    .ok_or_else(|| {
                        PulsefitError::InvalidConfiguration("noise covariance is not positive definite".into())
                    })
            }
        }
    }
}

/// `L⁻¹` for a noise covariance `C = L Lᵀ`.
#[derive(Debug, Clone)]
pub enum Whitener {
    Diagonal(DVector<f64>),
    Cholesky(Cholesky<f64, Dyn>),
}

impl Whitener {
    pub fn apply_vector(&self, v: &DVector<f64>) -> DVector<f64> {
        match self {
            Whitener::Diagonal(w) => v.component_mul(w),
            Whitener::Cholesky(ch) => ch.l().solve_lower_triangular(v).unwrap_or_else(|| v.clone()),
        }
    }

    pub fn apply_matrix(&self, m: &DMatrix<f64>) -> DMatrix<f64> {
        match self {
            Whitener::Diagonal(w) => {
                let mut out = m.clone();
                for (mut row, &wi) in out.row_iter_mut().zip(w.iter()) {
                    row *= wi;
                }
                out
            }
            Whitener::Cholesky(ch) => ch.l().solve_lower_triangular(m).unwrap_or_else(|| m.clone()),
        }
    }

    /// χ² = rᵀ C⁻¹ r.
    pub fn chi2(&self, r: &DVector<f64>) -> f64 {
        self.apply_vector(r).norm_squared()
    }
}
