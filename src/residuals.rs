//! # Phase and timing residuals
//!
//! For every evaluated TOA the spin model gives the pulse phase at emission,
//! `φᵢ = spin(tᵢ − Δᵢ)`. Phases are taken relative to a reference TOA and an
//! integer pulse number `Nᵢ` is assigned:
//!
//! ```text
//! φ'ᵢ = φᵢ − φ_ref          rᵢ = (φ'ᵢ − Nᵢ) / F(tᵢ − Δᵢ)      (seconds)
//! ```
//!
//! `Nᵢ` comes from the TOAs' own pulse numbers when they carry them, otherwise
//! from rounding `φ'ᵢ` to the nearest integer. Rounding is refused, not
//! guessed, when
//!
//! - the fractional phase is within `ambiguity_margin` of ±½ turn, or
//! - pulse numbers decrease along the time-ordered batch.
//!
//! Both are reported as [`PulsefitError::PulseNumberAmbiguity`] with the TOA
//! indices and candidate integers.

use std::fmt;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};
use tracing::{debug, warn};

use crate::constants::Second;
use crate::delay_engine::BatchDelays;
use crate::fitter::noise_covariance::NoiseCovariance;
use crate::model::TimingModel;
use crate::phase::Phase;
use crate::pulsefit_errors::PulsefitError;
use crate::toa::{BatchPolicy, PreparedToas, RejectedToa, Toa, ToaBatch};

/// Phase origin of the residuals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReferenceToa {
    /// Earliest evaluated TOA.
    #[default]
    FirstToa,
    /// A given TOA (batch index).
    Index(usize),
    /// Absolute phase: no reference is subtracted.
    Zero,
}

/// Source of the integer pulse numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrackMode {
    /// TOA pulse numbers when every evaluated TOA has one, rounding otherwise.
    #[default]
    Auto,
    /// Always round to the nearest integer.
    Nearest,
    /// Always use the TOA pulse numbers.
    PulseNumbers,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResidualConfig {
    /// Subtract the weighted mean residual.
    pub subtract_mean: bool,
    pub reference: ReferenceToa,
    /// Distance to ±½ turn below which rounding is ambiguous, turns.
    pub ambiguity_margin: f64,
    pub track_mode: TrackMode,
    pub batch_policy: BatchPolicy,
    /// Report ambiguities in [`Residuals::ambiguities`] instead of failing.
    pub allow_ambiguous: bool,
}

impl Default for ResidualConfig {
    fn default() -> Self {
        ResidualConfig {
            subtract_mean: true,
            reference: ReferenceToa::FirstToa,
            ambiguity_margin: 1e-3,
            track_mode: TrackMode::Auto,
            batch_policy: BatchPolicy::SkipInvalid,
            allow_ambiguous: false,
        }
    }
}

impl ResidualConfig {
    pub fn builder() -> ResidualConfigBuilder {
        ResidualConfigBuilder::new()
    }
}

impl fmt::Display for ResidualConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ResidualConfig(subtract_mean={}, reference={:?}, margin={}, track={:?}, policy={:?}, allow_ambiguous={})",
            self.subtract_mean,
            self.reference,
            self.ambiguity_margin,
            self.track_mode,
            self.batch_policy,
            self.allow_ambiguous
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResidualConfigBuilder {
    config: ResidualConfig,
}

impl ResidualConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subtract_mean(mut self, v: bool) -> Self {
        self.config.subtract_mean = v;
        self
    }
    pub fn reference(mut self, v: ReferenceToa) -> Self {
        self.config.reference = v;
        self
    }
    pub fn ambiguity_margin(mut self, v: f64) -> Self {
        self.config.ambiguity_margin = v;
        self
    }
    pub fn track_mode(mut self, v: TrackMode) -> Self {
        self.config.track_mode = v;
        self
    }
    pub fn batch_policy(mut self, v: BatchPolicy) -> Self {
        self.config.batch_policy = v;
        self
    }
    pub fn allow_ambiguous(mut self, v: bool) -> Self {
        self.config.allow_ambiguous = v;
        self
    }

    /// Validation rules: `0 ≤ ambiguity_margin < 0.5`.
    pub fn build(self) -> Result<ResidualConfig, PulsefitError> {
        let m = self.config.ambiguity_margin;
        if !(0.0..0.5).contains(&m) {
            return Err(PulsefitError::InvalidConfiguration(
                "ambiguity_margin must be in [0, 0.5)".into(),
            ));
        }
        Ok(self.config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AmbiguityReason {
    /// Fractional phase too close to ±½ turn.
    HalfTurn { fraction: f64 },
    /// Pulse number lower than that of an earlier TOA.
    NonMonotonic { previous: i64 },
}

/// A TOA whose pulse number cannot be assigned safely.
#[derive(Debug, Clone, PartialEq)]
pub struct AmbiguousPulse {
    pub toa_index: usize,
    pub candidates: SmallVec<[i64; 3]>,
    pub reason: AmbiguityReason,
}

/// Residual of one TOA.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResidualRecord {
    pub index: usize,
    /// Seconds.
    pub time_residual: Second,
    /// Turns.
    pub phase_residual: f64,
    /// Scaled 1σ uncertainty, seconds.
    pub uncertainty: Second,
    pub pulse_number: i64,
    /// Spin frequency at emission, Hz.
    pub frequency: f64,
    /// Total delay, seconds.
    pub delay: Second,
}

#[derive(Debug, Clone)]
pub struct Residuals {
    records: Vec<ResidualRecord>,
    rejected: Vec<RejectedToa>,
    ambiguities: Vec<AmbiguousPulse>,
    reference: Option<usize>,
    mean: Second,
    covariance: NoiseCovariance,
    chi2: f64,
}

impl Residuals {
    /// Residuals of every evaluated TOA.
    ///
    /// Arguments
    /// -----------------
    /// * `model`: the timing model (spin-down and noise terms are used here).
    /// * `batch`, `prepared`: the TOAs and their prepared form.
    /// * `delays`: delay chain evaluated at the parameter point of interest.
    /// * `config`: residual options.
    ///
    /// Errors
    /// ----------
    /// * The first per-TOA error under [`BatchPolicy::Strict`].
    /// * [`PulsefitError::NoValidToas`] if no TOA could be evaluated.
    /// * [`PulsefitError::PulseNumberAmbiguity`] unless `allow_ambiguous`.
    /// * [`PulsefitError::InvalidConfiguration`] for an invalid reference TOA
    ///   or missing pulse numbers under [`TrackMode::PulseNumbers`].
    pub fn compute(
        model: &TimingModel,
        batch: &ToaBatch,
        prepared: &PreparedToas,
        delays: &BatchDelays,
        config: &ResidualConfig,
    ) -> Result<Self, PulsefitError> {
        let mut rejected: Vec<RejectedToa> = prepared
            .rejected()
            .iter()
            .chain(delays.rejected())
            .cloned()
            .collect();
        rejected.sort_by_key(|r| r.index);
        if config.batch_policy == BatchPolicy::Strict {
            if let Some(first) = rejected.first() {
                return Err(first.error.clone());
            }
        }

        let rows: Vec<usize> = delays.valid().map(|d| d.index).collect();
        if rows.is_empty() {
            return Err(PulsefitError::NoValidToas {
                rejected: rejected.len(),
            });
        }

        let spin = &delays.resolved.spin;
        let snap = &delays.resolved.snapshot;
        let mut phases = Vec::with_capacity(rows.len());
        let mut frequencies = Vec::with_capacity(rows.len());
        let mut totals = Vec::with_capacity(rows.len());
        for &i in &rows {
            let (Some(p), Some(d)) = (prepared.get(i), delays.get(i)) else {
                return Err(PulsefitError::InvalidConfiguration(format!("TOA {i} has no delay")));
            };
            phases.push(spin.phase(&p.tdb(), d.total));
            frequencies.push(spin.frequency(&p.tdb(), d.total));
            totals.push(d.total);
        }

        // Rows in time order
        let position: crate::constants::FastMap<usize, usize> =
            rows.iter().enumerate().map(|(k, &i)| (i, k)).collect();
        let time_order: Vec<usize> = batch
            .time_order()
            .into_iter()
            .filter_map(|i| position.get(&i).copied())
            .collect();

        let reference = match config.reference {
            ReferenceToa::FirstToa => time_order.first().copied(),
            ReferenceToa::Index(i) => Some(*position.get(&i).ok_or_else(|| {
                PulsefitError::InvalidConfiguration(format!("reference TOA {i} was not evaluated"))
            })?),
            ReferenceToa::Zero => None,
        };
        let reference_phase = reference.map(|k| phases[k]).unwrap_or_default();
        let relative: Vec<Phase> = phases.iter().map(|&p| p - reference_phase).collect();

        let toas: Vec<&Toa> = rows.iter().map(|&i| &batch[i]).collect();
        let use_pulse_numbers = match config.track_mode {
            TrackMode::Nearest => false,
            TrackMode::Auto => toas.iter().all(|t| t.pulse_number.is_some()),
            TrackMode::PulseNumbers => {
                if let Some(k) = toas.iter().position(|t| t.pulse_number.is_none()) {
                    return Err(PulsefitError::InvalidConfiguration(format!(
                        "TOA {} has no pulse number",
                        rows[k]
                    )));
                }
                true
            }
        };

        let mut ambiguities = Vec::new();
        let (pulse_numbers, fractions): (Vec<i64>, Vec<f64>) = if use_pulse_numbers {
            let base = reference.and_then(|k| toas[k].pulse_number).unwrap_or(0);
            relative
                .iter()
                .zip(&toas)
                .map(|(phi, toa)| {
                    let n = toa.pulse_number.unwrap_or_default();
                    (n, (phi.int - (n - base) as f64) + phi.frac)
                })
                .unzip()
        } else {
            let half = 0.5 - config.ambiguity_margin;
            relative
                .iter()
                .enumerate()
                .map(|(k, phi)| {
                    let n = phi.int as i64;
                    if phi.frac.abs() > half {
                        let other = if phi.frac > 0.0 { n + 1 } else { n - 1 };
                        ambiguities.push(AmbiguousPulse {
                            toa_index: rows[k],
                            candidates: smallvec![n, other],
                            reason: AmbiguityReason::HalfTurn { fraction: phi.frac },
                        });
                    }
                    (n, phi.frac)
                })
                .unzip()
        };

        for pair in time_order.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if pulse_numbers[b] < pulse_numbers[a] {
                ambiguities.push(AmbiguousPulse {
                    toa_index: rows[b],
                    candidates: smallvec![pulse_numbers[b], pulse_numbers[a]],
                    reason: AmbiguityReason::NonMonotonic {
                        previous: pulse_numbers[a],
                    },
                });
            }
        }
        if !ambiguities.is_empty() {
            if config.allow_ambiguous {
                warn!(count = ambiguities.len(), "pulse-number ambiguities reported");
            } else {
                return Err(PulsefitError::PulseNumberAmbiguity(ambiguities));
            }
        }

        let sigmas = toas
            .iter()
            .map(|t| model.noise().scaled_sigma(t, snap))
            .collect::<Result<Vec<f64>, _>>()?;

        let mut time_residuals: Vec<f64> = fractions.iter().zip(&frequencies).map(|(f, nu)| f / nu).collect();
        let mean = if config.subtract_mean {
            weighted_mean(&time_residuals, &sigmas)
        } else {
            0.0
        };
        time_residuals.iter_mut().for_each(|r| *r -= mean);

        let covariance = model.noise().covariance(&toas, &sigmas, snap)?;
        let chi2 = covariance
            .whitener()?
            .chi2(&DVector::from_column_slice(&time_residuals));

        let records = rows
            .iter()
            .enumerate()
            .map(|(k, &index)| ResidualRecord {
                index,
                time_residual: time_residuals[k],
                phase_residual: time_residuals[k] * frequencies[k],
                uncertainty: sigmas[k],
                pulse_number: pulse_numbers[k],
                frequency: frequencies[k],
                delay: totals[k],
            })
            .collect();

        debug!(
            toas = rows.len(),
            rejected = rejected.len(),
            chi2,
            mean,
            "computed residuals"
        );

        Ok(Residuals {
            records,
            rejected,
            ambiguities,
            reference: reference.map(|k| rows[k]),
            mean,
            covariance,
            chi2,
        })
    }

    pub fn records(&self) -> &[ResidualRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Batch indices of the evaluated TOAs, in batch order.
    pub fn indices(&self) -> Vec<usize> {
        self.records.iter().map(|r| r.index).collect()
    }

    pub fn time_residuals(&self) -> DVector<f64> {
        DVector::from_iterator(self.len(), self.records.iter().map(|r| r.time_residual))
    }

    pub fn phase_residuals(&self) -> DVector<f64> {
        DVector::from_iterator(self.len(), self.records.iter().map(|r| r.phase_residual))
    }

    pub fn uncertainties(&self) -> DVector<f64> {
        DVector::from_iterator(self.len(), self.records.iter().map(|r| r.uncertainty))
    }

    pub fn pulse_numbers(&self) -> Vec<i64> {
        self.records.iter().map(|r| r.pulse_number).collect()
    }

    pub fn rejected(&self) -> &[RejectedToa] {
        &self.rejected
    }

    pub fn ambiguities(&self) -> &[AmbiguousPulse] {
        &self.ambiguities
    }

    /// Batch index of the reference TOA.
    pub fn reference(&self) -> Option<usize> {
        self.reference
    }

    /// Weighted mean removed from the residuals (0 if not subtracted).
    pub fn subtracted_mean(&self) -> Second {
        self.mean
    }

    /// Noise covariance of the evaluated TOAs.
    pub fn covariance(&self) -> &NoiseCovariance {
        &self.covariance
    }

    /// `rᵀ C⁻¹ r`.
    pub fn chi2(&self) -> f64 {
        self.chi2
    }

    pub fn rms(&self) -> Second {
        let n = self.len() as f64;
        (self.records.iter().map(|r| r.time_residual.powi(2)).sum::<f64>() / n).sqrt()
    }

    /// `√(Σ wᵢrᵢ² / Σ wᵢ)` with `wᵢ = 1/σᵢ²`.
    pub fn weighted_rms(&self) -> Second {
        let (num, den) = self.records.iter().fold((0.0, 0.0), |(num, den), r| {
            let w = 1.0 / (r.uncertainty * r.uncertainty);
            (num + w * r.time_residual * r.time_residual, den + w)
        });
        (num / den).sqrt()
    }
}

fn weighted_mean(values: &[f64], sigmas: &[f64]) -> f64 {
    let (num, den) = values.iter().zip(sigmas).fold((0.0, 0.0), |(num, den), (v, s)| {
        let w = 1.0 / (s * s);
        (num + w * v, den + w)
    });
    num / den
}

#[cfg(test)]
mod residuals_test {
    use super::*;
    use crate::delay_engine::{DelayEngine, DelayEngineConfig};
    use crate::env_state::TimingData;
    use crate::model::components::spindown::Spindown;
    use crate::time::{SplitMjd, TimeScaleTag};
    use approx::assert_abs_diff_eq;

    fn toa(day: i64, frac: f64) -> Toa {
        Toa::new(SplitMjd::new(day, frac), "@", f64::INFINITY, 1.0)
            .unwrap()
            .with_scale(TimeScaleTag::Tdb)
    }

    fn spin_model(f0: f64) -> TimingModel {
        let mut m = TimingModel::new("test");
        m.add_component(Spindown::new(&[f0], SplitMjd::new(55000, 0.0)).unwrap()).unwrap();
        m
    }

    fn residuals(model: &TimingModel, batch: &ToaBatch, config: &ResidualConfig) -> Result<Residuals, PulsefitError> {
        let data = TimingData::barycentric_only();
        let prepared = PreparedToas::prepare(batch, &data)?;
        let engine_config = DelayEngineConfig::default();
        let engine = DelayEngine::new(model, batch, &prepared, &engine_config)?;
        let delays = engine.evaluate(&model.snapshot())?;
        Residuals::compute(model, batch, &prepared, &delays, config)
    }

    #[test]
    fn test_exact_model_gives_zero_residuals() {
        let batch = ToaBatch::new(vec![toa(55000, 0.0), toa(55001, 0.0), toa(55002, 0.0)]).unwrap();
        let r = residuals(&spin_model(100.0), &batch, &ResidualConfig::default()).unwrap();
        assert_eq!(r.len(), 3);
        for rec in r.records() {
            assert_abs_diff_eq!(rec.time_residual, 0.0, epsilon = 1e-12);
        }
        assert_eq!(r.pulse_numbers(), vec![0, 8_640_000, 17_280_000]);
        assert_eq!(r.reference(), Some(0));
        assert!(r.chi2() < 1e-6);
    }

    #[test]
    fn test_frequency_offset_gives_linear_trend() {
        let batch = ToaBatch::new(vec![toa(55000, 0.0), toa(55001, 0.0), toa(55002, 0.0)]).unwrap();
        let config = ResidualConfig::builder().subtract_mean(false).build().unwrap();
        let r = residuals(&spin_model(100.0 + 1e-6), &batch, &config).unwrap();
        let t = r.time_residuals();
        assert_abs_diff_eq!(t[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(t[1], 0.0864 / (100.0 + 1e-6), epsilon = 1e-10);
        assert_abs_diff_eq!(t[2], 2.0 * t[1], epsilon = 1e-10);
    }

    #[test]
    fn test_half_turn_is_ambiguous() {
        // 5 ms after a whole number of turns at 100 Hz: exactly half a turn
        let batch = ToaBatch::new(vec![toa(55000, 0.0), toa(55000, 0.005 / 86400.0)]).unwrap();
        let err = residuals(&spin_model(100.0), &batch, &ResidualConfig::default()).unwrap_err();
        let PulsefitError::PulseNumberAmbiguity(list) = err else {
            panic!("expected an ambiguity");
        };
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].toa_index, 1);
        assert_eq!(list[0].candidates.len(), 2);

        let config = ResidualConfig::builder().allow_ambiguous(true).build().unwrap();
        let r = residuals(&spin_model(100.0), &batch, &config).unwrap();
        assert_eq!(r.ambiguities().len(), 1);
    }

    #[test]
    fn test_user_pulse_numbers_are_trusted_and_checked() {
        let batch = ToaBatch::new(vec![
            toa(55000, 0.0).with_pulse_number(10),
            toa(55001, 0.0).with_pulse_number(8_640_011),
        ])
        .unwrap();
        let config = ResidualConfig::builder().subtract_mean(false).build().unwrap();
        let r = residuals(&spin_model(100.0), &batch, &config).unwrap();
        // One turn more than the phase says: residual of −1 turn
        assert_abs_diff_eq!(r.records()[1].phase_residual, -1.0, epsilon = 1e-9);

        let bad = ToaBatch::new(vec![
            toa(55000, 0.0).with_pulse_number(10),
            toa(55001, 0.0).with_pulse_number(5),
        ])
        .unwrap();
        let err = residuals(&spin_model(100.0), &bad, &config).unwrap_err();
        assert!(matches!(err, PulsefitError::PulseNumberAmbiguity(_)));

        let partial = ToaBatch::new(vec![toa(55000, 0.0).with_pulse_number(1), toa(55001, 0.0)]).unwrap();
        let strict = ResidualConfig::builder().track_mode(TrackMode::PulseNumbers).build().unwrap();
        assert!(residuals(&spin_model(100.0), &partial, &strict).is_err());
    }

    #[test]
    fn test_weighted_statistics() {
        let batch = ToaBatch::new(vec![toa(55000, 0.0), toa(55001, 0.0), toa(55002, 0.0)]).unwrap();
        let r = residuals(&spin_model(100.0 + 1e-6), &batch, &ResidualConfig::default()).unwrap();
        let sum: f64 = r.time_residuals().iter().sum();
        assert_abs_diff_eq!(sum, 0.0, epsilon = 1e-12);
        assert!(r.rms() > 0.0);
        assert_abs_diff_eq!(r.rms(), r.weighted_rms(), epsilon = 1e-15);
        assert!(ResidualConfig::builder().ambiguity_margin(0.5).build().is_err());
    }
}
