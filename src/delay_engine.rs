//! # Delay engine
//!
//! Evaluates the chain of delay components for every prepared TOA and the
//! partial derivatives the fitter needs.
//!
//! ## Delay chain
//!
//! For one TOA at site TDB `t`, components run in rank order and each one sees
//! the delays accumulated upstream:
//!
//! ```text
//! Δ  = Δ_astrometry(t) + Δ_shapiro(t) + Δ_dm(t, f_ssb)     (geometric, frequency)
//! Δ += Δ_binary   solved from  Δ_b = D(t − Δ − Δ_b)         (bounded fixed point)
//! Δ += Δ_jump
//! φ  = spin(t − Δ)
//! ```
//!
//! The binary fixed point is bounded by [`DelayEngineConfig::max_iterations`]
//! and fails with [`PulsefitError::DelayConvergenceError`] for that TOA only.
//!
//! ## Derivatives
//!
//! Design-matrix entries are `∂r/∂p` in seconds per unit of `p` (days for
//! epochs). Spin, dispersion, astrometry and jump parameters have closed
//! forms; binary parameters and reference epochs are differentiated by central
//! finite differences of the whole delay chain, with steps declared by their
//! component.

use nalgebra::{DMatrix, Vector3};
use tracing::{debug, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::constants::Second;
use crate::model::components::solar_shapiro::SolarSystemShapiro;
use crate::model::components::ComponentKind;
use crate::model::parameter::ParamSnapshot;
use crate::model::{ResolvedModel, TimingModel};
use crate::pulsefit_errors::PulsefitError;
use crate::toa::{PreparedToa, PreparedToas, RejectedToa, Toa, ToaBatch};

/// How delay derivatives are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DerivativeMethod {
    /// Closed forms where available, finite differences otherwise.
    #[default]
    Analytic,
    /// Finite differences of the full delay chain for every delay parameter.
    ///
    /// Slower, but includes cross-component terms (e.g. the effect of the
    /// Roemer delay on the binary orbital phase).
    FiniteDifference,
}

/// Configuration of the delay engine.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayEngineConfig {
    /// Convergence threshold of the binary fixed point, seconds.
    pub tolerance: Second,
    /// Bound on the binary fixed-point iterations.
    pub max_iterations: usize,
    pub derivatives: DerivativeMethod,
    /// Multiplier applied to every declared finite-difference step.
    pub fd_step_scale: f64,
}

impl Default for DelayEngineConfig {
    fn default() -> Self {
        DelayEngineConfig {
            tolerance: 1e-10,
            max_iterations: 16,
            derivatives: DerivativeMethod::Analytic,
            fd_step_scale: 1.0,
        }
    }
}

impl DelayEngineConfig {
    pub fn builder() -> DelayEngineConfigBuilder {
        DelayEngineConfigBuilder::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DelayEngineConfigBuilder {
    config: DelayEngineConfig,
}

impl DelayEngineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tolerance(mut self, v: Second) -> Self {
        self.config.tolerance = v;
        self
    }
    pub fn max_iterations(mut self, v: usize) -> Self {
        self.config.max_iterations = v;
        self
    }
    pub fn derivatives(mut self, v: DerivativeMethod) -> Self {
        self.config.derivatives = v;
        self
    }
    pub fn fd_step_scale(mut self, v: f64) -> Self {
        self.config.fd_step_scale = v;
        self
    }

    /// Validation rules: `tolerance > 0`, `max_iterations ≥ 1`, `fd_step_scale > 0`.
    pub fn build(self) -> Result<DelayEngineConfig, PulsefitError> {
        let c = &self.config;
        if !(c.tolerance > 0.0) {
            return Err(PulsefitError::InvalidConfiguration("tolerance must be > 0".into()));
        }
        if c.max_iterations == 0 {
            return Err(PulsefitError::InvalidConfiguration("max_iterations must be >= 1".into()));
        }
        if !(c.fd_step_scale > 0.0) || !c.fd_step_scale.is_finite() {
            return Err(PulsefitError::InvalidConfiguration("fd_step_scale must be finite and > 0".into()));
        }
        Ok(self.config)
    }
}

/// Per-component delays of one TOA, seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DelayBreakdown {
    pub astrometry: Second,
    pub solar_shapiro: Second,
    pub dispersion: Second,
    pub binary: Second,
    pub jump: Second,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToaDelay {
    pub index: usize,
    /// Sum of all component delays.
    pub total: Second,
    pub breakdown: DelayBreakdown,
    /// Fixed-point iterations used by the binary component (0 without one).
    pub binary_iterations: usize,
    /// Pulsar direction at this TOA, if the model has astrometry.
    pub direction: Option<Vector3<f64>>,
}

/// Delays of a whole batch at one parameter point.
#[derive(Debug, Clone)]
pub struct BatchDelays {
    pub resolved: ResolvedModel,
    entries: Vec<Option<ToaDelay>>,
    rejected: Vec<RejectedToa>,
}

impl BatchDelays {
    pub fn get(&self, index: usize) -> Option<&ToaDelay> {
        self.entries.get(index).and_then(Option::as_ref)
    }

    /// Evaluated TOAs in batch order.
    pub fn valid(&self) -> impl Iterator<Item = &ToaDelay> {
        self.entries.iter().flatten()
    }

    /// TOAs rejected by the delay stage (preparation rejections not included).
    pub fn rejected(&self) -> &[RejectedToa] {
        &self.rejected
    }
}

/// Design matrix with its column names and the TOA index of every row.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignMatrix {
    pub matrix: DMatrix<f64>,
    pub columns: Vec<String>,
    pub rows: Vec<usize>,
}

/// Name of the implicit phase-offset column.
pub const OFFSET_COLUMN: &str = "Offset";

/// Delay chain of one TOA.
pub fn toa_delay(
    resolved: &ResolvedModel,
    toa: &Toa,
    prepared: &PreparedToa,
    config: &DelayEngineConfig,
) -> Result<ToaDelay, PulsefitError> {
    let kin = &prepared.kinematics;
    let direction = resolved.astrometry.as_ref().map(|a| a.direction(&kin.tdb));
    let mut breakdown = DelayBreakdown::default();

    if let Some(astro) = &resolved.astrometry {
        breakdown.astrometry = astro.delay(kin);
    }
    if resolved.solar_shapiro {
        if let Some(n) = &direction {
            breakdown.solar_shapiro = SolarSystemShapiro::delay(kin, n);
        }
    }
    if let Some(dm) = &resolved.dispersion {
        breakdown.dispersion = dm.delay(toa.frequency, kin, direction.as_ref());
    }

    let mut binary_iterations = 0;
    if let Some(binary) = &resolved.binary {
        let upstream = breakdown.astrometry + breakdown.solar_shapiro + breakdown.dispersion;
        let tt0 = kin.tdb.seconds_since(&binary.epoch()) - upstream;
        let (delay, iterations) = binary.solve(tt0, config.tolerance, config.max_iterations, prepared.index)?;
        breakdown.binary = delay;
        binary_iterations = iterations;
    }
    if let Some(jumps) = &resolved.jumps {
        breakdown.jump = jumps.delay(toa);
    }

    let total = breakdown.astrometry + breakdown.solar_shapiro + breakdown.dispersion + breakdown.binary + breakdown.jump;
    Ok(ToaDelay {
        index: prepared.index,
        total,
        breakdown,
        binary_iterations,
        direction,
    })
}

/// Evaluation of one model on one prepared batch.
#[derive(Debug, Clone, Copy)]
pub struct DelayEngine<'a> {
    model: &'a TimingModel,
    batch: &'a ToaBatch,
    prepared: &'a PreparedToas,
    config: &'a DelayEngineConfig,
}

impl<'a> DelayEngine<'a> {
    /// Errors
    /// ----------
    /// * [`PulsefitError::InvalidConfiguration`] if `prepared` does not belong to `batch`.
    pub fn new(
        model: &'a TimingModel,
        batch: &'a ToaBatch,
        prepared: &'a PreparedToas,
        config: &'a DelayEngineConfig,
    ) -> Result<Self, PulsefitError> {
        if prepared.version() != batch.version() {
            return Err(PulsefitError::InvalidConfiguration(format!(
                "prepared TOAs are for batch version {}, not {}",
                prepared.version(),
                batch.version()
            )));
        }
        Ok(DelayEngine {
            model,
            batch,
            prepared,
            config,
        })
    }

    pub fn config(&self) -> &DelayEngineConfig {
        self.config
    }

    /// Delays of every prepared TOA under `snap`.
    ///
    /// TOAs whose delay cannot be computed are listed in
    /// [`BatchDelays::rejected`]; other errors abort the evaluation.
    pub fn evaluate(&self, snap: &ParamSnapshot) -> Result<BatchDelays, PulsefitError> {
        let resolved = self.model.resolve(snap)?;
        let results = self.map_valid(|p| toa_delay(&resolved, &self.batch[p.index], p, self.config));

        let mut entries = vec![None; self.batch.len()];
        let mut rejected = Vec::new();
        let mut max_iterations = 0;
        for (index, result) in results {
            match result {
                Ok(d) => {
                    max_iterations = max_iterations.max(d.binary_iterations);
                    entries[index] = Some(d);
                }
                Err(error) if error.is_per_toa() => {
                    warn!(toa = index, %error, "TOA rejected during delay evaluation");
                    rejected.push(RejectedToa { index, error });
                }
                Err(error) => return Err(error),
            }
        }
        debug!(
            toas = self.batch.len(),
            rejected = rejected.len(),
            max_binary_iterations = max_iterations,
            "evaluated delay chain"
        );

        Ok(BatchDelays {
            resolved,
            entries,
            rejected,
        })
    }

    /// Apply `f` to every prepared TOA, preserving batch order.
    fn map_valid<T, F>(&self, f: F) -> Vec<(usize, T)>
    where
        T: Send,
        F: Fn(&PreparedToa) -> T + Sync + Send,
    {
        let valid: Vec<&PreparedToa> = self.prepared.valid().collect();

        #[cfg(feature = "parallel")]
        let out = valid.into_par_iter().map(|p| (p.index, f(p))).collect();
        #[cfg(not(feature = "parallel"))]
        let out = valid.into_iter().map(|p| (p.index, f(p))).collect();

        out
    }

    fn fd_step(&self, name: &str, snap: &ParamSnapshot) -> Result<f64, PulsefitError> {
        if let Some(step) = self.model.fd_step(name) {
            return Ok(step * self.config.fd_step_scale);
        }
        let value = snap.get(name)?.value.as_f64();
        Ok(1e-6 * value.abs().max(1.0) * self.config.fd_step_scale)
    }

    /// Phase derivatives `∂φ/∂p` (turns per unit of `p`) of every row TOA.
    ///
    /// Arguments
    /// -----------------
    /// * `delays`: batch delays at the current parameter point.
    /// * `rows`: TOA indices, all present in `delays`.
    /// * `name`: parameter to differentiate.
    fn phase_column(&self, delays: &BatchDelays, rows: &[usize], name: &str) -> Result<Vec<f64>, PulsefitError> {
        let resolved = &delays.resolved;
        let owner = self
            .model
            .owner(name)
            .ok_or_else(|| PulsefitError::InvalidParameter {
                name: name.to_string(),
                reason: "not a timing-model parameter; noise parameters cannot be fitted".into(),
            })?;

        let row_delay = |index: usize| -> Result<(&PreparedToa, &ToaDelay), PulsefitError> {
            match (self.prepared.get(index), delays.get(index)) {
                (Some(p), Some(d)) => Ok((p, d)),
                _ => Err(PulsefitError::InvalidConfiguration(format!("TOA {index} has no delay"))),
            }
        };

        if owner == ComponentKind::Spindown {
            return rows
                .iter()
                .map(|&i| {
                    let (p, d) = row_delay(i)?;
                    resolved
                        .spin
                        .phase_derivative(name, &p.tdb(), d.total)
                        .ok_or_else(|| PulsefitError::UnknownParameter(name.to_string()))
                })
                .collect();
        }

        let analytic = |p: &PreparedToa, d: &ToaDelay| -> Option<f64> {
            if self.config.derivatives == DerivativeMethod::FiniteDifference {
                return None;
            }
            let toa = &self.batch[p.index];
            match owner {
                ComponentKind::Astrometry => resolved.astrometry.as_ref()?.delay_derivative(name, &p.kinematics),
                ComponentKind::Dispersion => resolved.dispersion.as_ref()?.delay_derivative(
                    name,
                    toa.frequency,
                    &p.kinematics,
                    d.direction.as_ref(),
                ),
                ComponentKind::PhaseJump => resolved.jumps.as_ref()?.delay_derivative(name, toa),
                _ => None,
            }
        };

        // Shifted models are resolved once for the whole column
        let mut shifted: Option<(ResolvedModel, ResolvedModel, f64)> = None;
        let mut column = Vec::with_capacity(rows.len());
        for &i in rows {
            let (p, d) = row_delay(i)?;
            let d_delay = match analytic(p, d) {
                Some(v) => v,
                None => {
                    if shifted.is_none() {
                        let h = self.fd_step(name, &resolved.snapshot)?;
                        let plus = self.model.resolve(&resolved.snapshot.with_shift(name, h)?)?;
                        let minus = self.model.resolve(&resolved.snapshot.with_shift(name, -h)?)?;
                        shifted = Some((plus, minus, h));
                    }
                    let Some((plus, minus, h)) = &shifted else {
                        return Err(PulsefitError::UnknownParameter(name.to_string()));
                    };
                    let toa = &self.batch[i];
                    let dp = toa_delay(plus, toa, p, self.config)?.total;
                    let dm = toa_delay(minus, toa, p, self.config)?.total;
                    (dp - dm) / (2.0 * h)
                }
            };
            // φ(t − Δ): ∂φ/∂p = −F(t − Δ) ∂Δ/∂p
            column.push(-resolved.spin.frequency(&p.tdb(), d.total) * d_delay);
        }
        Ok(column)
    }

    /// Design matrix of the residuals with respect to `params`.
    ///
    /// Arguments
    /// -----------------
    /// * `delays`: batch delays at the current parameter point.
    /// * `rows`: TOA indices forming the rows, in residual order.
    /// * `reference`: TOA index whose phase is subtracted from every row, if any.
    /// * `params`: free parameters, one column each.
    /// * `offset`: append an [`OFFSET_COLUMN`] of ones (absorbs the mean).
    ///
    /// Return
    /// ----------
    /// * `M[i][j] = ∂rᵢ/∂pⱼ` in seconds per parameter unit, with
    ///   `rᵢ = (φᵢ − φ_ref − Nᵢ) / Fᵢ`.
    pub fn design_matrix(
        &self,
        delays: &BatchDelays,
        rows: &[usize],
        reference: Option<usize>,
        params: &[String],
        offset: bool,
    ) -> Result<DesignMatrix, PulsefitError> {
        let n_cols = params.len() + usize::from(offset);
        let mut matrix = DMatrix::zeros(rows.len(), n_cols);

        let frequencies = rows
            .iter()
            .map(|&i| match (self.prepared.get(i), delays.get(i)) {
                (Some(p), Some(d)) => Ok(delays.resolved.spin.frequency(&p.tdb(), d.total)),
                _ => Err(PulsefitError::InvalidConfiguration(format!("TOA {i} has no delay"))),
            })
            .collect::<Result<Vec<f64>, _>>()?;

        for (j, name) in params.iter().enumerate() {
            let column = self.phase_column(delays, rows, name)?;
            let reference_phase = match reference {
                Some(r) => self.phase_column(delays, &[r], name)?[0],
                None => 0.0,
            };
            for (i, dphi) in column.iter().enumerate() {
                matrix[(i, j)] = (dphi - reference_phase) / frequencies[i];
            }
        }

        let mut columns = params.to_vec();
        if offset {
            matrix.column_mut(params.len()).fill(1.0);
            columns.push(OFFSET_COLUMN.to_string());
        }
        debug!(rows = rows.len(), columns = n_cols, "built design matrix");

        Ok(DesignMatrix {
            matrix,
            columns,
            rows: rows.to_vec(),
        })
    }
}
