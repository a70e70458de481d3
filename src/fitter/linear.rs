//! Weighted linear least squares on a whitened, column-normalised design matrix.
//!
//! With `C = L Lᵀ` the noise covariance, the linearised problem
//!
//! ```text
//! min ‖L⁻¹ (r + M δ)‖²
//! ```
//!
//! is solved on `A = L⁻¹ M D⁻¹` (`D` = column norms) through the SVD
//! `A = U S Vᵀ`. Normalising the columns first keeps the condition number
//! meaningful across parameters of very different scales (F0 vs F1).

use nalgebra::{DMatrix, DVector};

use crate::fitter::noise_covariance::NoiseCovariance;
use crate::pulsefit_errors::PulsefitError;

/// Share of the largest null-vector component above which a parameter is
/// named as involved in a degeneracy.
const NULL_VECTOR_SHARE: f64 = 0.3;

/// Whitened, normalised least-squares problem with its SVD.
#[derive(Debug, Clone)]
pub(crate) struct WeightedProblem {
    /// Column norms of `L⁻¹M`.
    norms: DVector<f64>,
    /// `L⁻¹ r`.
    residuals: DVector<f64>,
    u: DMatrix<f64>,
    singular_values: DVector<f64>,
    v_t: DMatrix<f64>,
    condition: f64,
}

impl WeightedProblem {
    /// Whiten, normalise and decompose.
    ///
    /// Arguments
    /// -----------------
    /// * `design`: design matrix in seconds per parameter unit.
    /// * `residuals`: time residuals, seconds.
    /// * `covariance`: noise covariance of the rows.
    /// * `columns`: column names, used to report degeneracies.
    /// * `max_condition`: largest accepted `s_max / s_min`.
    ///
    /// Errors
    /// ----------
    /// * [`PulsefitError::DimensionMismatch`] if the shapes disagree.
    /// * [`PulsefitError::FitDegenerate`] with fewer rows than columns, a zero
    ///   singular value or a condition number above `max_condition`.
    pub(crate) fn new(
        design: &DMatrix<f64>,
        residuals: &DVector<f64>,
        covariance: &NoiseCovariance,
        columns: &[String],
        max_condition: f64,
    ) -> Result<Self, PulsefitError> {
        if design.nrows() != residuals.len() || covariance.len() != residuals.len() {
            return Err(PulsefitError::DimensionMismatch {
                expected: residuals.len(),
                got: design.nrows().min(covariance.len()),
            });
        }
        if design.ncols() != columns.len() {
            return Err(PulsefitError::DimensionMismatch {
                expected: columns.len(),
                got: design.ncols(),
            });
        }
        if design.nrows() < design.ncols() {
            return Err(PulsefitError::FitDegenerate {
                condition: f64::INFINITY,
                parameters: columns.to_vec(),
                best: None,
            });
        }

        let whitener = covariance.whitener()?;
        let mut a = whitener.apply_matrix(design);
        let r = whitener.apply_vector(residuals);

        let norms = DVector::from_iterator(a.ncols(), a.column_iter().map(|c| c.norm()));
        for (mut col, &n) in a.column_iter_mut().zip(norms.iter()) {
            if n > 0.0 {
                col /= n;
            }
        }

        let svd = a.svd(true, true);
        let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
            return Err(PulsefitError::FitDegenerate {
                condition: f64::INFINITY,
                parameters: columns.to_vec(),
                best: None,
            });
        };
        let s = svd.singular_values;

        let (k_min, s_min) = s
            .iter()
            .copied()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap_or((0, 0.0));
        let s_max = s.iter().copied().fold(0.0, f64::max);
        let condition = if s_min > 0.0 { s_max / s_min } else { f64::INFINITY };

        if !(condition <= max_condition) {
            let null = v_t.row(k_min);
            let largest = null.iter().fold(0.0f64, |m, v| m.max(v.abs()));
            let parameters = columns
                .iter()
                .zip(null.iter())
                .filter(|(_, v)| v.abs() >= NULL_VECTOR_SHARE * largest)
                .map(|(name, _)| name.clone())
                .collect();
            return Err(PulsefitError::FitDegenerate {
                condition,
                parameters,
                best: None,
            });
        }

        Ok(WeightedProblem {
            norms,
            residuals: r,
            u,
            singular_values: s,
            v_t,
            condition,
        })
    }

    pub(crate) fn condition(&self) -> f64 {
        self.condition
    }

    /// `χ²` at the linearisation point.
    pub(crate) fn chi2(&self) -> f64 {
        self.residuals.norm_squared()
    }

    /// Damped step `δ = −D⁻¹ V diag(s / (s² + λ)) Uᵀ L⁻¹r`.
    ///
    /// `λ = 0` is the Gauss–Newton step. With normalised columns the damping
    /// term `λ I` equals Marquardt's `λ diag(AᵀA)`.
    pub(crate) fn step(&self, lambda: f64) -> DVector<f64> {
        let projected = self.u.tr_mul(&self.residuals);
        let scaled = DVector::from_iterator(
            projected.len(),
            projected
                .iter()
                .zip(self.singular_values.iter())
                .map(|(p, s)| -p * s / (s * s + lambda)),
        );
        let x = self.v_t.tr_mul(&scaled);
        x.component_div(&self.norms)
    }

    /// Parameter covariance `D⁻¹ V S⁻² Vᵀ D⁻¹`.
    pub(crate) fn covariance(&self) -> DMatrix<f64> {
        let inv_s2 = self.singular_values.map(|s| 1.0 / (s * s));
        let mut scaled_v = self.v_t.transpose();
        for (mut col, w) in scaled_v.column_iter_mut().zip(inv_s2.iter()) {
            col *= *w;
        }
        let mut cov = scaled_v * &self.v_t;
        for i in 0..cov.nrows() {
            for j in 0..cov.ncols() {
                cov[(i, j)] /= self.norms[i] * self.norms[j];
            }
        }
        cov
    }

    /// `χ²` predicted by the linear model after a step `δ`.
    pub(crate) fn predicted_chi2(&self, delta: &DVector<f64>) -> f64 {
        let x = delta.component_mul(&self.norms);
        let a = &self.u * DMatrix::from_diagonal(&self.singular_values) * &self.v_t;
        (&self.residuals + a * x).norm_squared()
    }
}

#[cfg(test)]
mod linear_test {
    use super::*;
    use approx::assert_relative_eq;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("P{i}")).collect()
    }

    #[test]
    fn test_straight_line_fit() {
        // r(t) = 2 + 3t; the step must cancel it exactly
        let t = [0.0, 1.0, 2.0, 3.0, 4.0];
        let design = DMatrix::from_fn(5, 2, |i, j| if j == 0 { 1.0 } else { t[i] });
        let r = DVector::from_iterator(5, t.iter().map(|x| 2.0 + 3.0 * x));
        let cov = NoiseCovariance::Diagonal(DVector::from_element(5, 0.5));
        let p = WeightedProblem::new(&design, &r, &cov, &names(2), 1e10).unwrap();
        let delta = p.step(0.0);
        assert_relative_eq!(delta[0], -2.0, max_relative = 1e-10);
        assert_relative_eq!(delta[1], -3.0, max_relative = 1e-10);
        assert!(p.predicted_chi2(&delta) < 1e-20);

        // Var(intercept) for x = 0..4, σ = 0.5: σ² Σx² / (n Σx² − (Σx)²)
        let cov = p.covariance();
        assert_relative_eq!(cov[(0, 0)], 0.25 * 30.0 / (5.0 * 30.0 - 100.0), max_relative = 1e-10);
    }

    #[test]
    fn test_damping_shortens_the_step() {
        let design = DMatrix::from_fn(4, 1, |i, _| i as f64 + 1.0);
        let r = DVector::from_element(4, 1.0);
        let cov = NoiseCovariance::Diagonal(DVector::from_element(4, 1.0));
        let p = WeightedProblem::new(&design, &r, &cov, &names(1), 1e10).unwrap();
        assert!(p.step(10.0)[0].abs() < p.step(0.0)[0].abs());
        assert!(p.step(0.0)[0] < 0.0);
    }

    #[test]
    fn test_identical_columns_are_degenerate() {
        let design = DMatrix::from_fn(6, 3, |i, j| if j == 2 { i as f64 } else { 1.0 });
        let r = DVector::from_element(6, 1.0);
        let cov = NoiseCovariance::Diagonal(DVector::from_element(6, 1.0));
        let err = WeightedProblem::new(&design, &r, &cov, &names(3), 1e10).unwrap_err();
        let PulsefitError::FitDegenerate { parameters, .. } = err else {
            panic!("expected a degenerate fit");
        };
        assert_eq!(parameters, vec!["P0".to_string(), "P1".to_string()]);
    }

    #[test]
    fn test_too_few_rows() {
        let design = DMatrix::from_element(1, 2, 1.0);
        let r = DVector::from_element(1, 1.0);
        let cov = NoiseCovariance::Diagonal(DVector::from_element(1, 1.0));
        assert!(matches!(
            WeightedProblem::new(&design, &r, &cov, &names(2), 1e10),
            Err(PulsefitError::FitDegenerate { .. })
        ));
    }
}
