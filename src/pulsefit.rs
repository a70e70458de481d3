//! # Pulsefit: timing data, prepared-TOA cache and pipeline entry points
//!
//! [`Pulsefit`] is the central façade of the crate. It owns
//!
//! 1. the read-only [`TimingData`] (clock corrections, solar-system ephemeris,
//!    observatory registry), shared through an [`Arc`],
//! 2. a cache of [`PreparedToas`] keyed by [`ToaBatch::version`], so that clock
//!    corrections and barycentric kinematics are computed once per batch,
//! 3. the delay-engine and residual configurations used by every call.
//!
//! A [`TimingModel`] is passed to each call: the façade never holds parameter
//! state, and only [`Pulsefit::fit`] writes into the model.
//!
//! ## Typical usage
//!
//! ```rust, no_run
//! use pulsefit::env_state::TimingData;
//! use pulsefit::fitter::FitParams;
//! use pulsefit::model::TimingModel;
//! use pulsefit::model::components::spindown::Spindown;
//! use pulsefit::pulsefit::Pulsefit;
//! use pulsefit::simulation::uniform_toas;
//! use pulsefit::time::{SplitMjd, TimeScaleTag};
//!
//! let pf = Pulsefit::new(TimingData::barycentric_only());
//! let pepoch = SplitMjd::new(55000, 0.0);
//!
//! let mut model = TimingModel::new("J0000+0000");
//! model.add_component(Spindown::new(&[100.0], pepoch)?)?;
//! model.set_free(&["F0"])?;
//!
//! let toas = uniform_toas(pepoch, 30.0, 10, "@", TimeScaleTag::Tdb, &[1400.0], 1.0)?;
//! let residuals = pf.residuals(&toas, &model)?;
//! println!("rms = {:.3e} s", residuals.weighted_rms());
//!
//! let state = pf.fit(&toas, &mut model, &FitParams::default())?;
//! println!("{state}");
//! # Ok::<(), pulsefit::pulsefit_errors::PulsefitError>(())
//! ```
//!
//! ## See also
//! ------------
//! * [`crate::env_state`] – process-wide installation of the timing data.
//! * [`crate::delay_engine`], [`crate::residuals`], [`crate::fitter`] – the pipeline stages.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::constants::FastMap;
use crate::delay_engine::{BatchDelays, DelayEngine, DelayEngineConfig, DesignMatrix};
use crate::env_state::{shared_data, TimingData};
use crate::fitter::noise_covariance::NoiseCovariance;
use crate::fitter::{FitParams, FitState, Fitter};
use crate::model::TimingModel;
use crate::pulsefit_errors::PulsefitError;
use crate::residuals::{ResidualConfig, Residuals};
use crate::simulation;
use crate::toa::{PreparedToas, ToaBatch};

#[derive(Debug)]
pub struct Pulsefit {
    data: Arc<TimingData>,
    engine_config: DelayEngineConfig,
    residual_config: ResidualConfig,
    prepared: Mutex<FastMap<u64, Arc<PreparedToas>>>,
}

impl Pulsefit {
    /// A façade owning `data`, with default configurations.
    pub fn new(data: TimingData) -> Self {
        Self::with_data(Arc::new(data))
    }

    pub fn with_data(data: Arc<TimingData>) -> Self {
        Pulsefit {
            data,
            engine_config: DelayEngineConfig::default(),
            residual_config: ResidualConfig::default(),
            prepared: Mutex::new(FastMap::default()),
        }
    }

    /// A façade over the process-wide data ([`crate::env_state::install_shared_data`]).
    ///
    /// Errors
    /// ----------
    /// * [`PulsefitError::InvalidConfiguration`] if no data is installed.
    pub fn from_shared() -> Result<Self, PulsefitError> {
        Ok(Self::with_data(shared_data()?))
    }

    #[must_use]
    pub fn with_engine_config(mut self, config: DelayEngineConfig) -> Self {
        self.engine_config = config;
        self
    }

    #[must_use]
    pub fn with_residual_config(mut self, config: ResidualConfig) -> Self {
        self.residual_config = config;
        self
    }

    pub fn data(&self) -> &Arc<TimingData> {
        &self.data
    }

    pub fn engine_config(&self) -> &DelayEngineConfig {
        &self.engine_config
    }

    pub fn residual_config(&self) -> &ResidualConfig {
        &self.residual_config
    }

    /// Prepared form of a batch, computed on first use for its version.
    ///
    /// Errors
    /// ----------
    /// * Batch-level preparation errors ([`PreparedToas::prepare`]); per-TOA
    ///   failures are recorded in the result instead.
    pub fn prepare(&self, batch: &ToaBatch) -> Result<Arc<PreparedToas>, PulsefitError> {
        if let Some(hit) = self.lock_cache().get(&batch.version()) {
            return Ok(Arc::clone(hit));
        }
        // Prepared outside the lock; a concurrent call may prepare the same batch twice
        let prepared = Arc::new(PreparedToas::prepare(batch, &self.data)?);
        let mut cache = self.lock_cache();
        let cached = Arc::clone(cache.entry(batch.version()).or_insert(prepared));
        debug!(version = batch.version(), cached = cache.len(), "cached prepared TOAs");
        Ok(cached)
    }

    /// Number of batch versions held in the cache.
    pub fn cached_batches(&self) -> usize {
        self.lock_cache().len()
    }

    /// Forget every prepared batch.
    pub fn clear_cache(&self) {
        self.lock_cache().clear();
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, FastMap<u64, Arc<PreparedToas>>> {
        self.prepared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Delay chain of every TOA under the model's current parameters.
    pub fn delays(&self, batch: &ToaBatch, model: &TimingModel) -> Result<BatchDelays, PulsefitError> {
        let prepared = self.prepare(batch)?;
        DelayEngine::new(model, batch, &prepared, &self.engine_config)?.evaluate(&model.snapshot())
    }

    /// Residuals of a batch under the model's current parameters.
    pub fn residuals(&self, batch: &ToaBatch, model: &TimingModel) -> Result<Residuals, PulsefitError> {
        let prepared = self.prepare(batch)?;
        let engine = DelayEngine::new(model, batch, &prepared, &self.engine_config)?;
        let delays = engine.evaluate(&model.snapshot())?;
        Residuals::compute(model, batch, &prepared, &delays, &self.residual_config)
    }

    /// Design matrix of the residuals with respect to the free parameters.
    ///
    /// Rows are the evaluated TOAs in batch order; columns the free parameters
    /// followed by `Offset` when the weighted mean is subtracted. Frozen
    /// parameters have no column.
    pub fn design_matrix(&self, batch: &ToaBatch, model: &TimingModel) -> Result<DesignMatrix, PulsefitError> {
        let prepared = self.prepare(batch)?;
        let engine = DelayEngine::new(model, batch, &prepared, &self.engine_config)?;
        let delays = engine.evaluate(&model.snapshot())?;
        let residuals = Residuals::compute(model, batch, &prepared, &delays, &self.residual_config)?;
        engine.design_matrix(
            &delays,
            &residuals.indices(),
            residuals.reference(),
            &model.free_parameters(),
            self.residual_config.subtract_mean,
        )
    }

    /// Fit the free parameters of `model` to a batch.
    ///
    /// See [`Fitter::fit`] for the convergence rules and the state left in
    /// `model` on failure.
    pub fn fit(&self, batch: &ToaBatch, model: &mut TimingModel, params: &FitParams) -> Result<FitState, PulsefitError> {
        let prepared = self.prepare(batch)?;
        Fitter::new(batch, &prepared, &self.engine_config, &self.residual_config, params)?.fit(model)
    }

    /// [`Pulsefit::fit`] weighted by a caller-supplied noise covariance, one
    /// row per TOA of `batch`, in place of the model's noise components.
    pub fn fit_with_covariance(
        &self,
        batch: &ToaBatch,
        model: &mut TimingModel,
        params: &FitParams,
        covariance: NoiseCovariance,
    ) -> Result<FitState, PulsefitError> {
        let prepared = self.prepare(batch)?;
        Fitter::new(batch, &prepared, &self.engine_config, &self.residual_config, params)?
            .with_noise_covariance(covariance)?
            .fit(model)
    }

    /// A copy of `batch` that `model` predicts exactly ([`simulation::zero_residuals`]).
    pub fn zero_residuals(&self, batch: &ToaBatch, model: &TimingModel) -> Result<ToaBatch, PulsefitError> {
        simulation::zero_residuals(batch, model, &self.data, &self.engine_config)
    }
}

#[cfg(test)]
mod pulsefit_test {
    use super::*;
    use crate::model::components::spindown::Spindown;
    use crate::simulation::uniform_toas;
    use crate::time::{SplitMjd, TimeScaleTag};

    fn batch() -> ToaBatch {
        uniform_toas(SplitMjd::new(55000, 0.0), 2.0, 3, "@", TimeScaleTag::Tdb, &[1400.0], 1.0).unwrap()
    }

    #[test]
    fn test_prepared_cache_is_per_version() {
        let pf = Pulsefit::new(TimingData::barycentric_only());
        let b = batch();
        let first = pf.prepare(&b).unwrap();
        let again = pf.prepare(&b.clone()).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(pf.cached_batches(), 1);

        pf.prepare(&batch()).unwrap();
        assert_eq!(pf.cached_batches(), 2);
        pf.clear_cache();
        assert_eq!(pf.cached_batches(), 0);
    }

    #[test]
    fn test_design_matrix_has_free_columns_only() {
        let pf = Pulsefit::new(TimingData::barycentric_only());
        let mut m = TimingModel::new("t");
        m.add_component(Spindown::new(&[100.0, 0.0], SplitMjd::new(55000, 0.0)).unwrap())
            .unwrap();
        m.set_free(&["F0"]).unwrap();
        let dm = pf.design_matrix(&batch(), &m).unwrap();
        assert_eq!(dm.columns, vec!["F0".to_string(), "Offset".to_string()]);
        assert_eq!(dm.rows, vec![0, 1, 2]);
    }
}
