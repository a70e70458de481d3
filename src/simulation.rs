//! # Synthetic TOAs
//!
//! Helpers to build TOA batches a model fits exactly, mostly for round-trip
//! checks of the fitter:
//!
//! - [`uniform_toas`]: evenly spaced TOAs over a time span,
//! - [`zero_residuals`]: shift every TOA until the model predicts an integer
//!   phase for it,
//! - [`add_gaussian_noise`]: perturb every TOA by its own uncertainty.
//!
//! Each helper returns a new batch (new version); inputs are never modified.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use tracing::debug;

use crate::constants::{MHz, Second};
use crate::delay_engine::{DelayEngine, DelayEngineConfig};
use crate::env_state::TimingData;
use crate::model::TimingModel;
use crate::pulsefit_errors::PulsefitError;
use crate::residuals::{ReferenceToa, ResidualConfig, Residuals, TrackMode};
use crate::time::{SplitMjd, TimeScaleTag};
use crate::toa::{BatchPolicy, PreparedToas, Toa, ToaBatch};

/// Largest residual accepted by [`zero_residuals`], seconds.
pub const ZERO_RESIDUAL_TOLERANCE: Second = 1e-9;

/// Bound on the timestamp corrections of [`zero_residuals`].
const MAX_ZERO_ITERATIONS: usize = 10;

/// `n` TOAs evenly spaced over `[start, start + span_days]`.
///
/// Arguments
/// -----------------
/// * `frequencies`: observing frequencies, cycled over the TOAs.
/// * `uncertainty_us`: 1σ uncertainty of every TOA, µs.
pub fn uniform_toas(
    start: SplitMjd,
    span_days: f64,
    n: usize,
    observatory: &str,
    scale: TimeScaleTag,
    frequencies: &[MHz],
    uncertainty_us: f64,
) -> Result<ToaBatch, PulsefitError> {
    if frequencies.is_empty() {
        return Err(PulsefitError::InvalidConfiguration("at least one frequency is needed".into()));
    }
    let step = if n > 1 { span_days / (n - 1) as f64 } else { 0.0 };
    let toas = (0..n)
        .map(|i| {
            Toa::new(
                start.add_days(step * i as f64),
                observatory,
                frequencies[i % frequencies.len()],
                uncertainty_us,
            )
            .map(|t| t.with_scale(scale))
        })
        .collect::<Result<Vec<_>, _>>()?;
    ToaBatch::new(toas)
}

/// A copy of `batch` whose TOAs `model` predicts with residuals below
/// [`ZERO_RESIDUAL_TOLERANCE`].
///
/// The raw timestamps are moved by minus their residual and the batch is
/// re-evaluated until every residual is small enough; the uncertainties,
/// flags and observatories are kept.
///
/// Errors
/// ----------
/// * Any error of preparation or residual computation; every TOA must be
///   evaluable.
/// * [`PulsefitError::InvalidConfiguration`] if the residuals do not fall
///   below the tolerance.
pub fn zero_residuals(
    batch: &ToaBatch,
    model: &TimingModel,
    data: &TimingData,
    engine_config: &DelayEngineConfig,
) -> Result<ToaBatch, PulsefitError> {
    let config = ResidualConfig {
        subtract_mean: false,
        reference: ReferenceToa::Zero,
        track_mode: TrackMode::Nearest,
        batch_policy: BatchPolicy::Strict,
        allow_ambiguous: true,
        ..ResidualConfig::default()
    };

    let mut current = batch.clone();
    for iteration in 0..MAX_ZERO_ITERATIONS {
        let prepared = PreparedToas::prepare(&current, data)?;
        prepared.check(BatchPolicy::Strict)?;
        let engine = DelayEngine::new(model, &current, &prepared, engine_config)?;
        let delays = engine.evaluate(&model.snapshot())?;
        let residuals = Residuals::compute(model, &current, &prepared, &delays, &config)?;

        let worst = residuals
            .records()
            .iter()
            .map(|r| r.time_residual.abs())
            .fold(0.0, f64::max);
        debug!(iteration, worst, "zeroing residuals");
        if worst < ZERO_RESIDUAL_TOLERANCE {
            return Ok(current);
        }

        let shifts: Vec<Second> = residuals.records().iter().map(|r| r.time_residual).collect();
        let mut k = 0;
        current = current.map(|toa| {
            let mut shifted = toa.clone();
            shifted.mjd = toa.mjd.add_seconds(-shifts[k]);
            k += 1;
            shifted
        })?;
    }
    Err(PulsefitError::InvalidConfiguration(format!(
        "residuals still above {ZERO_RESIDUAL_TOLERANCE:e} s after {MAX_ZERO_ITERATIONS} corrections"
    )))
}

/// A copy of `batch` with every timestamp moved by a draw of
/// `N(0, (scale · σᵢ)²)`.
///
/// Arguments
/// -----------------
/// * `rng`: random number generator (seed it for reproducible batches).
/// * `scale`: multiplier of the TOA uncertainties (finite, ≥ 0).
///
/// Errors
/// ----------
/// * [`PulsefitError::InvalidConfiguration`] for a negative or non-finite `scale`.
pub fn add_gaussian_noise(batch: &ToaBatch, rng: &mut impl Rng, scale: f64) -> Result<ToaBatch, PulsefitError> {
    // Normal::new accepts a negative standard deviation
    if !(scale.is_finite() && scale >= 0.0) {
        return Err(PulsefitError::InvalidConfiguration(format!(
            "noise scale must be finite and non-negative, got {scale}"
        )));
    }
    let draws = batch
        .iter()
        .map(|toa| Normal::new(0.0, scale * toa.uncertainty).map(|n| n.sample(&mut *rng)))
        .collect::<Result<Vec<Second>, _>>()?;
    let mut k = 0;
    batch.map(|toa| {
        let mut noisy = toa.clone();
        noisy.mjd = toa.mjd.add_seconds(draws[k]);
        k += 1;
        noisy
    })
}

#[cfg(test)]
mod simulation_test {
    use super::*;
    use crate::model::components::spindown::Spindown;
    use rand::{rngs::StdRng, SeedableRng};

    fn model() -> TimingModel {
        let mut m = TimingModel::new("sim");
        m.add_component(Spindown::new(&[123.456, -1e-14], SplitMjd::new(55000, 0.0)).unwrap())
            .unwrap();
        m
    }

    #[test]
    fn test_uniform_toas() {
        let b = uniform_toas(SplitMjd::new(55000, 0.0), 10.0, 5, "@", TimeScaleTag::Tdb, &[1400.0, 800.0], 1.0)
            .unwrap();
        assert_eq!(b.len(), 5);
        assert_eq!(b[4].mjd, SplitMjd::new(55010, 0.0));
        assert_eq!(b[1].frequency, 800.0);
        assert!(uniform_toas(SplitMjd::new(55000, 0.0), 1.0, 2, "@", TimeScaleTag::Tdb, &[], 1.0).is_err());
    }

    #[test]
    fn test_zero_residuals_converges() {
        let data = TimingData::barycentric_only();
        let batch =
            uniform_toas(SplitMjd::new(55000, 0.123), 100.0, 20, "@", TimeScaleTag::Tdb, &[1400.0], 1.0).unwrap();
        let m = model();
        let config = DelayEngineConfig::default();
        let zeroed = zero_residuals(&batch, &m, &data, &config).unwrap();
        assert_ne!(zeroed.version(), batch.version());
        assert_eq!(zeroed.len(), batch.len());

        let prepared = PreparedToas::prepare(&zeroed, &data).unwrap();
        let engine = DelayEngine::new(&m, &zeroed, &prepared, &config).unwrap();
        let delays = engine.evaluate(&m.snapshot()).unwrap();
        let r = Residuals::compute(&m, &zeroed, &prepared, &delays, &ResidualConfig::default()).unwrap();
        assert!(r.records().iter().all(|rec| rec.time_residual.abs() < 2.0 * ZERO_RESIDUAL_TOLERANCE));
    }

    #[test]
    fn test_noise_is_reproducible() {
        let batch =
            uniform_toas(SplitMjd::new(55000, 0.0), 10.0, 8, "@", TimeScaleTag::Tdb, &[1400.0], 5.0).unwrap();
        let a = add_gaussian_noise(&batch, &mut StdRng::seed_from_u64(42), 1.0).unwrap();
        let b = add_gaussian_noise(&batch, &mut StdRng::seed_from_u64(42), 1.0).unwrap();
        assert_eq!(a.toas(), b.toas());
        assert_ne!(a.toas(), batch.toas());

        let moved = a
            .iter()
            .zip(batch.iter())
            .map(|(x, y)| x.mjd.seconds_since(&y.mjd).abs())
            .fold(0.0, f64::max);
        assert!(moved < 10.0 * 5e-6);
    }

    #[test]
    fn test_noise_scale_is_validated() {
        let batch =
            uniform_toas(SplitMjd::new(55000, 0.0), 10.0, 4, "@", TimeScaleTag::Tdb, &[1400.0], 1.0).unwrap();
        for scale in [-1.0, f64::NAN, f64::INFINITY] {
            let err = add_gaussian_noise(&batch, &mut StdRng::seed_from_u64(1), scale).unwrap_err();
            assert!(matches!(err, PulsefitError::InvalidConfiguration(_)));
        }
        let silent = add_gaussian_noise(&batch, &mut StdRng::seed_from_u64(1), 0.0).unwrap();
        assert_eq!(silent.toas(), batch.toas());
    }
}
