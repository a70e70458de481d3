//! Spin-down phase polynomial.
//!
//! ```text
//! φ(t) = Σₖ Fₖ · Δtᵏ⁺¹ / (k+1)!     Δt = t_emission − PEPOCH  (seconds)
//! ```
//!
//! The F0 term dominates the phase (~10¹¹ turns over a decade for a
//! millisecond pulsar), so it is formed with error-free products on the exact
//! whole-day part of Δt, its fractional part and the delay, each kept apart.
//! Higher terms are small enough for a plain `f64` evaluation.

use smallvec::SmallVec;

use crate::constants::{Second, SECONDS_PER_DAY};
use crate::model::parameter::{ParamSnapshot, Parameter, Unit};
use crate::phase::Phase;
use crate::pulsefit_errors::PulsefitError;
use crate::time::SplitMjd;

#[derive(Debug, Clone, PartialEq)]
pub struct Spindown {
    initial: Vec<f64>,
    pepoch: SplitMjd,
}

impl Spindown {
    /// Arguments
    /// -----------------
    /// * `frequencies`: initial `[F0, F1, …]` in Hz, Hz/s, … (at least F0).
    /// * `pepoch`: reference epoch of the polynomial (TDB).
    pub fn new(frequencies: &[f64], pepoch: SplitMjd) -> Result<Self, PulsefitError> {
        if frequencies.is_empty() {
            return Err(PulsefitError::InvalidParameter {
                name: "F0".into(),
                reason: "spin-down needs at least F0".into(),
            });
        }
        Ok(Spindown {
            initial: frequencies.to_vec(),
            pepoch,
        })
    }

    pub fn n_terms(&self) -> usize {
        self.initial.len()
    }

    pub fn parameters(&self) -> Vec<Parameter> {
        let mut params: Vec<Parameter> = self
            .initial
            .iter()
            .enumerate()
            .map(|(k, &f)| {
                let p = Parameter::float(
                    format!("F{k}"),
                    f,
                    Unit::SpinDerivative(k as u8),
                    if k == 0 { "Spin frequency" } else { "Spin frequency derivative" },
                );
                if k == 0 {
                    p.with_range(f64::MIN_POSITIVE, f64::INFINITY)
                } else {
                    p
                }
            })
            .collect();
        params.push(Parameter::epoch("PEPOCH", self.pepoch, "Epoch of spin measurements"));
        params
    }

    pub fn resolve(&self, snap: &ParamSnapshot) -> Result<SpinTerms, PulsefitError> {
        let f = (0..self.initial.len())
            .map(|k| snap.value(&format!("F{k}")))
            .collect::<Result<SmallVec<_>, _>>()?;
        Ok(SpinTerms {
            f,
            pepoch: snap.epoch("PEPOCH")?,
        })
    }
}

/// Spin-down coefficients at one parameter point.
#[derive(Debug, Clone, PartialEq)]
pub struct SpinTerms {
    f: SmallVec<[f64; 4]>,
    pepoch: SplitMjd,
}

impl SpinTerms {
    /// Emission time since PEPOCH as an exact whole-day part and a remainder (s).
    fn dt(&self, tdb: &SplitMjd, delay: Second) -> (Second, Second) {
        let (hi, lo) = tdb.diff_seconds(&self.pepoch);
        (hi, lo - delay)
    }

    pub fn f0(&self) -> f64 {
        self.f[0]
    }

    /// Pulse phase at the emission time `tdb − delay`.
    pub fn phase(&self, tdb: &SplitMjd, delay: Second) -> Phase {
        // lo − delay would round a nanosecond delay at the ulp of a fraction of a day
        let (hi, lo) = tdb.diff_seconds(&self.pepoch);
        let dt = hi + (lo - delay);

        let mut phase = Phase::from_product(self.f[0], hi)
            + Phase::from_product(self.f[0], lo)
            + Phase::from_product(self.f[0], -delay);

        let mut higher = 0.0;
        let mut power = dt;
        let mut factorial = 1.0;
        for (k, fk) in self.f.iter().enumerate().skip(1) {
            power *= dt;
            factorial *= (k + 1) as f64;
            higher += fk * power / factorial;
        }
        phase = phase + higher;
        phase
    }

    /// Instantaneous spin frequency `dφ/dt` in Hz.
    pub fn frequency(&self, tdb: &SplitMjd, delay: Second) -> f64 {
        let (hi, lo) = self.dt(tdb, delay);
        let dt = hi + lo;
        let mut freq = 0.0;
        let mut power = 1.0;
        let mut factorial = 1.0;
        for (k, fk) in self.f.iter().enumerate() {
            if k > 0 {
                power *= dt;
                factorial *= k as f64;
            }
            freq += fk * power / factorial;
        }
        freq
    }

    /// `∂φ/∂p` for a spin parameter, `None` if `name` is not one.
    pub fn phase_derivative(&self, name: &str, tdb: &SplitMjd, delay: Second) -> Option<f64> {
        if name == "PEPOCH" {
            return Some(-self.frequency(tdb, delay) * SECONDS_PER_DAY);
        }
        let k: usize = name.strip_prefix('F')?.parse().ok()?;
        if k >= self.f.len() {
            return None;
        }
        let (hi, lo) = self.dt(tdb, delay);
        let dt = hi + lo;
        let factorial: f64 = (1..=k + 1).map(|i| i as f64).product();
        Some(dt.powi(k as i32 + 1) / factorial)
    }
}

#[cfg(test)]
mod spindown_test {
    use super::*;
    use crate::model::parameter::ParameterTable;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn terms(f: &[f64]) -> SpinTerms {
        let spin = Spindown::new(f, SplitMjd::new(55000, 0.0)).unwrap();
        let mut table = ParameterTable::new();
        spin.parameters().into_iter().for_each(|p| table.insert(p));
        spin.resolve(&table.snapshot()).unwrap()
    }

    #[test]
    fn test_constant_frequency_phase() {
        let spin = terms(&[100.0]);
        let t = SplitMjd::new(55001, 0.0);
        let phase = spin.phase(&t, 0.0);
        assert_eq!(phase.int, 8_640_000.0);
        assert_eq!(phase.frac, 0.0);

        // 1 ms of delay removes 0.1 turn
        let phase = spin.phase(&t, 1e-3);
        assert_eq!(phase.int, 8_640_000.0);
        assert_relative_eq!(phase.frac, -0.1, epsilon = 1e-9);
    }

    #[test]
    fn test_phase_precision_over_decades() {
        // A 700 Hz pulsar ten years after PEPOCH: the fraction must still resolve 1 ns
        let spin = terms(&[700.123456789]);
        let t = SplitMjd::new(58652, 0.25);
        let p0 = spin.phase(&t, 0.0);
        let p1 = spin.phase(&t, -1e-9);
        let diff = (p1 - p0).value();
        assert_abs_diff_eq!(diff, 700.123456789e-9, epsilon = 1e-12);

        // half a microsecond either side of a fraction that is not a power of two
        let t = SplitMjd::new(58652, 0.3);
        let late = spin.phase(&t, -5e-7) - spin.phase(&t, 0.0);
        let early = spin.phase(&t, 5e-7) - spin.phase(&t, 0.0);
        assert_abs_diff_eq!(late.value(), 700.123456789 * 5e-7, epsilon = 1e-12);
        assert_abs_diff_eq!(late.value(), -early.value(), epsilon = 1e-12);
    }

    #[test]
    fn test_frequency_and_derivatives() {
        let spin = terms(&[100.0, -1e-10]);
        let t = SplitMjd::new(55010, 0.0);
        let dt = 10.0 * SECONDS_PER_DAY;
        assert_relative_eq!(spin.frequency(&t, 0.0), 100.0 - 1e-10 * dt, epsilon = 1e-12);
        assert_relative_eq!(spin.phase_derivative("F0", &t, 0.0).unwrap(), dt);
        assert_relative_eq!(spin.phase_derivative("F1", &t, 0.0).unwrap(), dt * dt / 2.0);
        assert_relative_eq!(
            spin.phase_derivative("PEPOCH", &t, 0.0).unwrap(),
            -spin.frequency(&t, 0.0) * SECONDS_PER_DAY
        );
        assert!(spin.phase_derivative("F2", &t, 0.0).is_none());
        assert!(spin.phase_derivative("DM", &t, 0.0).is_none());
    }
}
