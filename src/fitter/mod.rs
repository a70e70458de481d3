//! # Timing-model fitter
//!
//! Iterative weighted least squares on the free parameters of a
//! [`TimingModel`]:
//!
//! 1. evaluate the delay chain and the residuals `r` at the current parameters,
//! 2. build the design matrix `M = ∂r/∂p` (plus an `Offset` column when the
//!    weighted mean is subtracted),
//! 3. whiten by the noise covariance and solve for `δ = −(MᵀC⁻¹M)⁻¹MᵀC⁻¹r`
//!    through an SVD of the normalised matrix, rejecting degenerate problems,
//! 4. write `p ← p + δ` back into the model and iterate.
//!
//! Two strategies are available ([`FitStrategy`]): plain re-linearisation
//! (Gauss–Newton) and Levenberg–Marquardt damping with accept/reject steps
//! for strongly non-linear parameters (orbits far from the initial guess).
//!
//! Convergence is declared when the χ² change is within
//! `chi2_rtol · χ² + chi2_atol`, or every parameter step is below
//! `param_tol` times its uncertainty. Otherwise the fit ends with
//! [`PulsefitError::FitNotConverged`], which carries the best state reached.
//!
//! Example
//! -----------------
//! ```rust, no_run
//! use pulsefit::fitter::{FitParams, FitStrategy};
//!
//! let params = FitParams::builder()
//!     .strategy(FitStrategy::LevenbergMarquardt)
//!     .max_iterations(50)
//!     .build()?;
//! println!("{params:#}");
//! # Ok::<(), pulsefit::pulsefit_errors::PulsefitError>(())
//! ```

pub mod levenberg;
pub(crate) mod linear;
pub mod noise_covariance;

use std::cmp::Ordering::{Equal, Greater};
use std::fmt;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::delay_engine::{BatchDelays, DelayEngine, DelayEngineConfig};
use crate::fitter::linear::WeightedProblem;
use crate::fitter::noise_covariance::NoiseCovariance;
use crate::model::TimingModel;
use crate::pulsefit_errors::PulsefitError;
use crate::residuals::{ResidualConfig, Residuals};
use crate::toa::{BatchPolicy, PreparedToas, ToaBatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FitStrategy {
    /// Re-linearise and take the full Gauss–Newton step every iteration.
    #[default]
    Linearized,
    /// Damped steps, accepted only when χ² decreases.
    LevenbergMarquardt,
}

/// Configuration of a fit.
#[derive(Debug, Clone, PartialEq)]
pub struct FitParams {
    pub strategy: FitStrategy,
    pub max_iterations: usize,
    /// Relative χ² tolerance.
    pub chi2_rtol: f64,
    /// Absolute χ² tolerance.
    pub chi2_atol: f64,
    /// Parameter tolerance in units of the parameter uncertainty.
    pub param_tol: f64,
    /// Largest accepted condition number of the normalised design matrix.
    pub max_condition: f64,

    // --- Levenberg–Marquardt ---
    pub lambda_initial: f64,
    pub lambda_up: f64,
    pub lambda_down: f64,
    /// Above this damping no downhill step exists and the fit stops.
    pub lambda_max: f64,

    pub batch_policy: BatchPolicy,
    pub allow_ambiguous: bool,
}

impl FitParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> FitParamsBuilder {
        FitParamsBuilder::new()
    }
}

impl Default for FitParams {
    fn default() -> Self {
        FitParams {
            strategy: FitStrategy::Linearized,
            max_iterations: 20,
            chi2_rtol: 1e-6,
            chi2_atol: 1e-6,
            param_tol: 1e-4,
            max_condition: 1e10,
            lambda_initial: 1e-3,
            lambda_up: 10.0,
            lambda_down: 10.0,
            lambda_max: 1e8,
            batch_policy: BatchPolicy::SkipInvalid,
            allow_ambiguous: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FitParamsBuilder {
    params: FitParams,
}

impl Default for FitParamsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FitParamsBuilder {
    pub fn new() -> Self {
        Self {
            params: FitParams::default(),
        }
    }

    pub fn strategy(mut self, v: FitStrategy) -> Self {
        self.params.strategy = v;
        self
    }
    pub fn max_iterations(mut self, v: usize) -> Self {
        self.params.max_iterations = v;
        self
    }
    pub fn chi2_rtol(mut self, v: f64) -> Self {
        self.params.chi2_rtol = v;
        self
    }
    pub fn chi2_atol(mut self, v: f64) -> Self {
        self.params.chi2_atol = v;
        self
    }
    pub fn param_tol(mut self, v: f64) -> Self {
        self.params.param_tol = v;
        self
    }
    pub fn max_condition(mut self, v: f64) -> Self {
        self.params.max_condition = v;
        self
    }

    // --- Levenberg–Marquardt ---
    pub fn lambda_initial(mut self, v: f64) -> Self {
        self.params.lambda_initial = v;
        self
    }
    pub fn lambda_up(mut self, v: f64) -> Self {
        self.params.lambda_up = v;
        self
    }
    pub fn lambda_down(mut self, v: f64) -> Self {
        self.params.lambda_down = v;
        self
    }
    pub fn lambda_max(mut self, v: f64) -> Self {
        self.params.lambda_max = v;
        self
    }

    pub fn batch_policy(mut self, v: BatchPolicy) -> Self {
        self.params.batch_policy = v;
        self
    }
    pub fn allow_ambiguous(mut self, v: bool) -> Self {
        self.params.allow_ambiguous = v;
        self
    }

    /// Return true iff x > 0.0 and comparable (not NaN).
    #[inline]
    fn gt0(x: f64) -> bool {
        x.partial_cmp(&0.0) == Some(Greater)
    }

    /// Return true iff x >= 0.0 and comparable (not NaN).
    #[inline]
    fn ge0(x: f64) -> bool {
        matches!(x.partial_cmp(&0.0), Some(Greater) | Some(Equal))
    }

    /// Finalize the builder.
    ///
    /// Validation rules
    /// -----------------
    /// * `max_iterations ≥ 1`
    /// * `chi2_rtol`, `chi2_atol`, `param_tol` ≥ 0
    /// * `max_condition > 1`
    /// * `lambda_initial > 0`, `lambda_up > 1`, `lambda_down > 1`,
    ///   `lambda_max ≥ lambda_initial`
    pub fn build(self) -> Result<FitParams, PulsefitError> {
        let p = &self.params;

        if p.max_iterations == 0 {
            return Err(PulsefitError::InvalidConfiguration(
                "max_iterations must be >= 1".into(),
            ));
        }
        if !Self::ge0(p.chi2_rtol) || !Self::ge0(p.chi2_atol) || !Self::ge0(p.param_tol) {
            return Err(PulsefitError::InvalidConfiguration(
                "fit tolerances must be non-negative".into(),
            ));
        }
        if !Self::gt0(p.max_condition - 1.0) {
            return Err(PulsefitError::InvalidConfiguration(
                "max_condition must be > 1".into(),
            ));
        }
        if !Self::gt0(p.lambda_initial) {
            return Err(PulsefitError::InvalidConfiguration(
                "lambda_initial must be > 0".into(),
            ));
        }
        if !Self::gt0(p.lambda_up - 1.0) || !Self::gt0(p.lambda_down - 1.0) {
            return Err(PulsefitError::InvalidConfiguration(
                "lambda_up and lambda_down must be > 1".into(),
            ));
        }
        if !Self::ge0(p.lambda_max - p.lambda_initial) {
            return Err(PulsefitError::InvalidConfiguration(
                "lambda_max must be >= lambda_initial".into(),
            ));
        }

        Ok(self.params)
    }
}

impl fmt::Display for FitParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            const PARAM_COL: usize = 40;
            writeln!(f, "Fit Parameters")?;
            writeln!(f, "--------------")?;

            macro_rules! line {
                ($fmt:expr, $val:expr, $comment:expr) => {{
                    let s = format!($fmt, $val);
                    let pad = if s.len() < PARAM_COL {
                        " ".repeat(PARAM_COL - s.len())
                    } else {
                        " ".to_string()
                    };
                    writeln!(f, "  {}{}# {}", s, pad, $comment)
                }};
            }

            line!("strategy       = {:?}", self.strategy, "Step strategy")?;
            line!("max_iterations = {}", self.max_iterations, "Bound on linearisations")?;
            line!("chi2_rtol      = {:.1e}", self.chi2_rtol, "Relative chi2 tolerance")?;
            line!("chi2_atol      = {:.1e}", self.chi2_atol, "Absolute chi2 tolerance")?;
            line!("param_tol      = {:.1e}", self.param_tol, "Step tolerance in sigmas")?;
            line!("max_condition  = {:.1e}", self.max_condition, "Degeneracy threshold")?;

            writeln!(f, "\n[Levenberg-Marquardt]")?;
            line!("lambda_initial = {:.1e}", self.lambda_initial, "Initial damping")?;
            line!("lambda_up      = {}", self.lambda_up, "Damping factor on rejection")?;
            line!("lambda_down    = {}", self.lambda_down, "Damping divisor on acceptance")?;
            line!("lambda_max     = {:.1e}", self.lambda_max, "Damping giving up")?;

            writeln!(f, "\n[Batch]")?;
            line!("batch_policy   = {:?}", self.batch_policy, "Handling of failed TOAs")?;
            line!("allow_ambiguous= {}", self.allow_ambiguous, "Accept ambiguous pulse numbers")?;
            Ok(())
        } else {
            write!(
                f,
                "FitParams(strategy={:?}, max_iter={}, chi2_rtol={:.1e}, chi2_atol={:.1e}, param_tol={:.1e}, max_cond={:.1e}, policy={:?})",
                self.strategy,
                self.max_iterations,
                self.chi2_rtol,
                self.chi2_atol,
                self.param_tol,
                self.max_condition,
                self.batch_policy
            )
        }
    }
}

/// Result of a fit.
#[derive(Debug, Clone, PartialEq)]
pub struct FitState {
    /// Fitted parameters, in column order.
    pub names: Vec<String>,
    /// Values after the fit (epochs as MJD).
    pub values: Vec<f64>,
    /// Parameter covariance at the final point.
    pub covariance: DMatrix<f64>,
    pub chi2: f64,
    pub dof: usize,
    /// Parameter updates applied.
    pub iterations: usize,
    pub converged: bool,
}

impl FitState {
    /// 1σ uncertainties, from the covariance diagonal.
    pub fn uncertainties(&self) -> Vec<f64> {
        self.covariance.diagonal().iter().map(|v| v.sqrt()).collect()
    }

    pub fn reduced_chi2(&self) -> f64 {
        if self.dof == 0 {
            f64::NAN
        } else {
            self.chi2 / self.dof as f64
        }
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.names.iter().position(|n| n == name).map(|i| self.values[i])
    }

    pub fn uncertainty(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.covariance[(i, i)].sqrt())
    }
}

impl fmt::Display for FitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "chi2 = {:.6} ({} dof, reduced {:.4}), {} iteration(s), {}",
            self.chi2,
            self.dof,
            self.reduced_chi2(),
            self.iterations,
            if self.converged { "converged" } else { "not converged" }
        )?;
        for ((name, value), sigma) in self.names.iter().zip(&self.values).zip(self.uncertainties()) {
            writeln!(f, "  {name:<10} = {value:.15e} ± {sigma:.3e}")?;
        }
        Ok(())
    }
}

/// Residuals and weighted problem at one parameter point.
pub(crate) struct Linearization {
    pub residuals: Residuals,
    pub problem: WeightedProblem,
}

/// A fit of one model to one prepared batch.
#[derive(Debug, Clone)]
pub struct Fitter<'a> {
    batch: &'a ToaBatch,
    prepared: &'a PreparedToas,
    engine_config: &'a DelayEngineConfig,
    residual_config: ResidualConfig,
    params: &'a FitParams,
    /// Caller-supplied covariance over the whole batch, replacing the noise model.
    noise_covariance: Option<NoiseCovariance>,
}

impl<'a> Fitter<'a> {
    /// Arguments
    /// -----------------
    /// * `batch`, `prepared`: the TOAs and their prepared form (same version).
    /// * `engine_config`: delay-chain settings.
    /// * `residual_config`: residual settings; its batch policy and ambiguity
    ///   handling are replaced by those of `params`.
    /// * `params`: fit settings.
    pub fn new(
        batch: &'a ToaBatch,
        prepared: &'a PreparedToas,
        engine_config: &'a DelayEngineConfig,
        residual_config: &ResidualConfig,
        params: &'a FitParams,
    ) -> Result<Self, PulsefitError> {
        if prepared.version() != batch.version() {
            return Err(PulsefitError::InvalidConfiguration(format!(
                "prepared TOAs are for batch version {}, not {}",
                prepared.version(),
                batch.version()
            )));
        }
        let residual_config = ResidualConfig {
            batch_policy: params.batch_policy,
            allow_ambiguous: params.allow_ambiguous,
            ..residual_config.clone()
        };
        Ok(Fitter {
            batch,
            prepared,
            engine_config,
            residual_config,
            params,
            noise_covariance: None,
        })
    }

    /// Weight the fit with `covariance` instead of the model's noise
    /// components.
    ///
    /// `covariance` has one row per TOA of the batch, in batch order; rows of
    /// TOAs dropped from the residuals are ignored.
    ///
    /// Errors
    /// ----------
    /// * [`PulsefitError::DimensionMismatch`] if its size is not the batch length.
    /// * [`PulsefitError::InvalidConfiguration`] if it is not positive definite.
    pub fn with_noise_covariance(mut self, covariance: NoiseCovariance) -> Result<Self, PulsefitError> {
        if covariance.len() != self.batch.len() {
            return Err(PulsefitError::DimensionMismatch {
                expected: self.batch.len(),
                got: covariance.len(),
            });
        }
        covariance.whitener()?;
        self.noise_covariance = Some(covariance);
        Ok(self)
    }

    pub fn params(&self) -> &FitParams {
        self.params
    }

    /// Covariance weighting the evaluated rows of `residuals`.
    fn covariance_of(&self, residuals: &Residuals) -> Result<NoiseCovariance, PulsefitError> {
        match &self.noise_covariance {
            Some(cov) => cov.select(&residuals.indices()),
            None => Ok(residuals.covariance().clone()),
        }
    }

    /// `rᵀ C⁻¹ r` under the covariance the fit is weighted with.
    pub(crate) fn chi2_of(&self, residuals: &Residuals) -> Result<f64, PulsefitError> {
        match &self.noise_covariance {
            Some(_) => Ok(self.covariance_of(residuals)?.whitener()?.chi2(&residuals.time_residuals())),
            None => Ok(residuals.chi2()),
        }
    }

    /// Delays and residuals of `model` at its current parameters.
    pub(crate) fn evaluate(&self, model: &TimingModel) -> Result<(BatchDelays, Residuals), PulsefitError> {
        let engine = DelayEngine::new(model, self.batch, self.prepared, self.engine_config)?;
        let delays = engine.evaluate(&model.snapshot())?;
        let residuals = Residuals::compute(model, self.batch, self.prepared, &delays, &self.residual_config)?;
        Ok((delays, residuals))
    }

    /// Linear problem around evaluated delays and residuals.
    pub(crate) fn linearize_at(
        &self,
        model: &TimingModel,
        delays: &BatchDelays,
        residuals: Residuals,
        names: &[String],
    ) -> Result<Linearization, PulsefitError> {
        let engine = DelayEngine::new(model, self.batch, self.prepared, self.engine_config)?;
        let design = engine.design_matrix(
            delays,
            &residuals.indices(),
            residuals.reference(),
            names,
            self.residual_config.subtract_mean,
        )?;
        let problem = WeightedProblem::new(
            &design.matrix,
            &residuals.time_residuals(),
            &self.covariance_of(&residuals)?,
            &design.columns,
            self.params.max_condition,
        )?;
        debug!(condition = problem.condition(), "linearised fit problem");
        Ok(Linearization { residuals, problem })
    }

    pub(crate) fn linearize(&self, model: &TimingModel, names: &[String]) -> Result<Linearization, PulsefitError> {
        let (delays, residuals) = self.evaluate(model)?;
        self.linearize_at(model, &delays, residuals, names)
    }

    /// Number of fitted columns, `Offset` included.
    pub(crate) fn n_columns(&self, names: &[String]) -> usize {
        names.len() + usize::from(self.residual_config.subtract_mean)
    }

    /// Fit state at a linearisation point.
    pub(crate) fn state(
        &self,
        model: &TimingModel,
        names: &[String],
        lin: &Linearization,
        iterations: usize,
        converged: bool,
    ) -> Result<FitState, PulsefitError> {
        let n = names.len();
        let values = names
            .iter()
            .map(|name| model.params().get(name).map(|p| p.value.as_f64()))
            .collect::<Result<Vec<f64>, _>>()?;
        Ok(FitState {
            names: names.to_vec(),
            values,
            covariance: lin.problem.covariance().view((0, 0), (n, n)).into_owned(),
            chi2: lin.problem.chi2(),
            dof: lin.residuals.len().saturating_sub(self.n_columns(names)),
            iterations,
            converged,
        })
    }

    pub(crate) fn chi2_converged(&self, previous: f64, current: f64) -> bool {
        (previous - current).abs() <= self.params.chi2_rtol * current + self.params.chi2_atol
    }

    pub(crate) fn step_converged(&self, delta: &[f64], sigmas: &[f64]) -> bool {
        delta
            .iter()
            .zip(sigmas)
            .all(|(d, s)| d.abs() <= self.params.param_tol * s)
    }

    /// Fit the free parameters of `model`.
    ///
    /// On success the fitted values and their 1σ uncertainties are written back
    /// into `model`. When the iteration bound is hit, the model is left at the
    /// lowest-χ² point reached and [`PulsefitError::FitNotConverged`] carries
    /// the corresponding state. Frozen parameters are never changed.
    ///
    /// Errors
    /// ----------
    /// * [`PulsefitError::FitDegenerate`] if the design matrix is (nearly) singular.
    /// * [`PulsefitError::FitNotConverged`] after `max_iterations` updates.
    /// * Any residual-stage error ([`Residuals::compute`]).
    pub fn fit(&self, model: &mut TimingModel) -> Result<FitState, PulsefitError> {
        let names = model.free_parameters();
        if names.is_empty() {
            let (_, residuals) = self.evaluate(model)?;
            return Ok(FitState {
                names,
                values: Vec::new(),
                covariance: DMatrix::zeros(0, 0),
                chi2: self.chi2_of(&residuals)?,
                dof: residuals.len().saturating_sub(self.n_columns(&[])),
                iterations: 0,
                converged: true,
            });
        }
        info!(
            parameters = names.len(),
            strategy = ?self.params.strategy,
            "starting timing fit"
        );
        match self.params.strategy {
            FitStrategy::Linearized => self.fit_linearized(model, &names),
            FitStrategy::LevenbergMarquardt => levenberg::fit(self, model, &names),
        }
    }

    fn fit_linearized(&self, model: &mut TimingModel, names: &[String]) -> Result<FitState, PulsefitError> {
        let n = names.len();
        let mut previous_chi2: Option<f64> = None;
        let mut step_small = false;
        let mut best: Option<(FitState, TimingModel)> = None;

        for iteration in 0..=self.params.max_iterations {
            let lin = match self.linearize(model, names) {
                Ok(lin) => lin,
                Err(PulsefitError::FitDegenerate {
                    condition, parameters, ..
                }) => {
                    return Err(PulsefitError::FitDegenerate {
                        condition,
                        parameters,
                        best: best.map(|(state, _)| Box::new(state)),
                    })
                }
                Err(e) => return Err(e),
            };
            let chi2 = lin.problem.chi2();
            let state = self.state(model, names, &lin, iteration, false)?;
            info!(
                iteration,
                chi2,
                reduced_chi2 = state.reduced_chi2(),
                "linearized fit iteration"
            );

            let sigmas = state.uncertainties();
            if step_small || previous_chi2.is_some_and(|prev| self.chi2_converged(prev, chi2)) {
                model.apply_update(names, &vec![0.0; n], &sigmas)?;
                return Ok(FitState {
                    converged: true,
                    ..state
                });
            }

            if best.as_ref().is_none_or(|(b, _)| chi2 < b.chi2) {
                best = Some((state.clone(), model.clone()));
            }
            if iteration == self.params.max_iterations {
                break;
            }

            let delta = lin.problem.step(0.0);
            let delta = &delta.as_slice()[..n];
            step_small = self.step_converged(delta, &sigmas);
            model.apply_update(names, delta, &sigmas)?;
            previous_chi2 = Some(chi2);
        }

        let Some((state, best_model)) = best else {
            return Err(PulsefitError::InvalidConfiguration("fit performed no iteration".into()));
        };
        *model = best_model;
        model.apply_update(names, &vec![0.0; n], &state.uncertainties())?;
        warn!(
            iterations = self.params.max_iterations,
            chi2 = state.chi2,
            "timing fit did not converge"
        );
        Err(PulsefitError::FitNotConverged {
            iterations: self.params.max_iterations,
            chi2: state.chi2,
            best: Box::new(state),
        })
    }
}
