//! Binary-orbit delays.
//!
//! Three orbital models share one set of orbital-period parameters:
//!
//! | model  | orbit parameters                  | delays                         |
//! |--------|-----------------------------------|--------------------------------|
//! | `BT`   | ECC, OM, T0, OMDOT, GAMMA         | Roemer + Einstein              |
//! | `DD`   | ECC, OM, T0, OMDOT, GAMMA, M2, SINI | Roemer + Einstein + Shapiro  |
//! | `ELL1` | EPS1, EPS2, TASC, M2, SINI        | Roemer (first order in e) + Shapiro |
//!
//! The delay depends on the emission time, which depends on the delay. The
//! delay engine therefore calls [`BinaryTerms::solve`], a bounded fixed-point
//! iteration `Δₖ₊₁ = D(t − Δₖ)`.

use std::fmt;

use crate::constants::{Second, DPI, RADEG, SECONDS_PER_DAY, SECONDS_PER_YEAR, T_SUN};
use crate::kepler::{eccentric_anomaly, true_anomaly};
use crate::model::parameter::{ParamSnapshot, Parameter, Unit};
use crate::pulsefit_errors::PulsefitError;
use crate::time::SplitMjd;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryModel {
    /// Blandford & Teukolsky: Keplerian orbit, Roemer and Einstein delays.
    Bt,
    /// Damour & Deruelle: adds the Shapiro delay and periastron advance along the true anomaly.
    Dd,
    /// Low-eccentricity expansion with Laplace–Lagrange parameters.
    Ell1,
}

impl fmt::Display for BinaryModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryModel::Bt => write!(f, "BT"),
            BinaryModel::Dd => write!(f, "DD"),
            BinaryModel::Ell1 => write!(f, "ELL1"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Binary {
    model: BinaryModel,
    initial: Vec<Parameter>,
}

fn period_parameters(pb: f64, a1: f64) -> Vec<Parameter> {
    vec![
        Parameter::float("PB", pb, Unit::Day, "Orbital period").with_range(f64::MIN_POSITIVE, f64::INFINITY),
        Parameter::float("PBDOT", 0.0, Unit::Dimensionless, "Orbital period derivative"),
        Parameter::float("A1", a1, Unit::LightSecond, "Projected semi-major axis").with_range(0.0, f64::INFINITY),
        Parameter::float("A1DOT", 0.0, Unit::LightSecondPerSecond, "Derivative of A1"),
    ]
}

fn shapiro_parameters() -> Vec<Parameter> {
    vec![
        Parameter::float("M2", 0.0, Unit::SolarMass, "Companion mass").with_range(0.0, f64::INFINITY),
        Parameter::float("SINI", 0.0, Unit::Dimensionless, "Sine of inclination").with_range(0.0, 1.0),
    ]
}

impl Binary {
    fn keplerian(model: BinaryModel, pb: f64, a1: f64, ecc: f64, om: f64, t0: SplitMjd) -> Self {
        let mut initial = period_parameters(pb, a1);
        initial.extend([
            Parameter::float("ECC", ecc, Unit::Dimensionless, "Eccentricity").with_range(0.0, 1.0 - 1e-12),
            Parameter::float("OM", om, Unit::Degree, "Longitude of periastron"),
            Parameter::epoch("T0", t0, "Epoch of periastron"),
            Parameter::float("OMDOT", 0.0, Unit::DegreePerYear, "Periastron advance"),
            Parameter::float("GAMMA", 0.0, Unit::Second, "Einstein delay amplitude"),
        ]);
        if model == BinaryModel::Dd {
            initial.extend(shapiro_parameters());
        }
        Binary { model, initial }
    }

    /// BT orbit: period (days), projected semi-major axis (ls), eccentricity,
    /// longitude of periastron (deg) and epoch of periastron.
    pub fn bt(pb: f64, a1: f64, ecc: f64, om: f64, t0: SplitMjd) -> Self {
        Self::keplerian(BinaryModel::Bt, pb, a1, ecc, om, t0)
    }

    /// DD orbit, same arguments as [`Binary::bt`]; M2 and SINI start at zero.
    pub fn dd(pb: f64, a1: f64, ecc: f64, om: f64, t0: SplitMjd) -> Self {
        Self::keplerian(BinaryModel::Dd, pb, a1, ecc, om, t0)
    }

    /// ELL1 orbit: period (days), A1 (ls), epoch of ascending node, EPS1 = e sin ω, EPS2 = e cos ω.
    pub fn ell1(pb: f64, a1: f64, tasc: SplitMjd, eps1: f64, eps2: f64) -> Self {
        let mut initial = period_parameters(pb, a1);
        initial.extend([
            Parameter::epoch("TASC", tasc, "Epoch of ascending node"),
            Parameter::float("EPS1", eps1, Unit::Dimensionless, "e sin ω"),
            Parameter::float("EPS2", eps2, Unit::Dimensionless, "e cos ω"),
        ]);
        initial.extend(shapiro_parameters());
        Binary {
            model: BinaryModel::Ell1,
            initial,
        }
    }

    pub fn model(&self) -> BinaryModel {
        self.model
    }

    pub fn parameters(&self) -> Vec<Parameter> {
        self.initial.clone()
    }

    /// Finite-difference step for a binary parameter, in its own unit (days for epochs).
    pub fn fd_step(name: &str) -> Option<f64> {
        let step = match name {
            "PB" => 1e-9,
            "PBDOT" => 1e-12,
            "A1" => 1e-5,
            "A1DOT" => 1e-14,
            "ECC" | "EPS1" | "EPS2" => 1e-7,
            "OM" => 1e-5,
            "T0" | "TASC" => 1e-8,
            "OMDOT" => 1e-3,
            "GAMMA" => 1e-6,
            "M2" => 1e-3,
            "SINI" => 1e-6,
            _ => return None,
        };
        Some(step)
    }

    pub fn resolve(&self, snap: &ParamSnapshot) -> Result<BinaryTerms, PulsefitError> {
        let opt = |name: &str| -> Result<f64, PulsefitError> {
            if snap.contains(name) {
                snap.value(name)
            } else {
                Ok(0.0)
            }
        };
        let epoch = match self.model {
            BinaryModel::Ell1 => snap.epoch("TASC")?,
            BinaryModel::Bt | BinaryModel::Dd => snap.epoch("T0")?,
        };
        Ok(BinaryTerms {
            model: self.model,
            pb: snap.value("PB")? * SECONDS_PER_DAY,
            pbdot: snap.value("PBDOT")?,
            a1: snap.value("A1")?,
            a1dot: snap.value("A1DOT")?,
            ecc: opt("ECC")?,
            om: opt("OM")? * RADEG,
            omdot: opt("OMDOT")? * RADEG / SECONDS_PER_YEAR,
            gamma: opt("GAMMA")?,
            m2: opt("M2")?,
            sini: opt("SINI")?,
            eps1: opt("EPS1")?,
            eps2: opt("EPS2")?,
            epoch,
        })
    }
}

/// Orbital elements at one parameter point, in SI-like units (s, rad, rad/s).
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryTerms {
    model: BinaryModel,
    pb: Second,
    pbdot: f64,
    a1: f64,
    a1dot: f64,
    ecc: f64,
    om: f64,
    omdot: f64,
    gamma: Second,
    m2: f64,
    sini: f64,
    eps1: f64,
    eps2: f64,
    epoch: SplitMjd,
}

impl BinaryTerms {
    /// Reference epoch of the orbit (T0 or TASC).
    pub fn epoch(&self) -> SplitMjd {
        self.epoch
    }

    /// Mean anomaly / orbital phase in radians, `tt0` seconds after the epoch.
    fn orbital_phase(&self, tt0: Second) -> f64 {
        let orbits = tt0 / self.pb - 0.5 * self.pbdot * (tt0 / self.pb).powi(2);
        DPI * orbits
    }

    fn shapiro(&self, arg: f64) -> Result<Second, PulsefitError> {
        if self.m2 == 0.0 {
            return Ok(0.0);
        }
        if arg <= 0.0 {
            return Err(PulsefitError::InvalidParameter {
                name: "SINI".into(),
                reason: format!("Shapiro delay diverges (argument {arg:e}) for SINI = {}", self.sini),
            });
        }
        Ok(-2.0 * T_SUN * self.m2 * arg.ln())
    }

    /// Binary delay at emission time `tt0` seconds after the orbit epoch.
    pub fn delay(&self, tt0: Second) -> Result<Second, PulsefitError> {
        let phase = self.orbital_phase(tt0);
        let x = self.a1 + self.a1dot * tt0;

        match self.model {
            BinaryModel::Bt => {
                let e = eccentric_anomaly(phase, self.ecc);
                let (se, ce) = e.sin_cos();
                let (sw, cw) = (self.om + self.omdot * tt0).sin_cos();
                let root = (1.0 - self.ecc * self.ecc).sqrt();
                Ok(x * sw * (ce - self.ecc) + (x * cw * root + self.gamma) * se)
            }
            BinaryModel::Dd => {
                let e = eccentric_anomaly(phase, self.ecc);
                let (se, ce) = e.sin_cos();
                let ae = true_anomaly(e, self.ecc);
                // k = ω̇ Pb / 2π, ω advances along the true anomaly
                let k = self.omdot * self.pb / DPI;
                let (sw, cw) = (self.om + k * ae).sin_cos();
                let root = (1.0 - self.ecc * self.ecc).sqrt();
                let shape = sw * (ce - self.ecc) + root * cw * se;

                let roemer = x * shape;
                let einstein = self.gamma * se;
                let shapiro = self.shapiro(1.0 - self.ecc * ce - self.sini * shape)?;
                Ok(roemer + einstein + shapiro)
            }
            BinaryModel::Ell1 => {
                let s1 = phase.sin();
                let (s2, c2) = (2.0 * phase).sin_cos();
                let roemer = x * (s1 + 0.5 * self.eps2 * s2 - 0.5 * self.eps1 * c2);
                let shapiro = self.shapiro(1.0 - self.sini * s1)?;
                Ok(roemer + shapiro)
            }
        }
    }

    /// Solve `Δ = D(t − Δ)` for the binary delay.
    ///
    /// Arguments
    /// -----------------
    /// * `tt0`: arrival time at the binary barycentre, seconds after the orbit
    ///   epoch (upstream delays already removed).
    /// * `tolerance`: convergence threshold on the change of Δ between iterations (s).
    /// * `max_iterations`: bound on the number of iterations.
    /// * `toa_index`: TOA index reported on failure.
    ///
    /// Return
    /// ----------
    /// * The converged delay and the number of iterations used, or
    ///   [`PulsefitError::DelayConvergenceError`].
    pub fn solve(
        &self,
        tt0: Second,
        tolerance: Second,
        max_iterations: usize,
        toa_index: usize,
    ) -> Result<(Second, usize), PulsefitError> {
        let mut delay = 0.0;
        let mut change = f64::INFINITY;
        for iteration in 1..=max_iterations {
            let next = self.delay(tt0 - delay)?;
            change = (next - delay).abs();
            delay = next;
            if change <= tolerance {
                return Ok((delay, iteration));
            }
            if !change.is_finite() {
                break;
            }
        }
        Err(PulsefitError::DelayConvergenceError {
            toa_index,
            iterations: max_iterations,
            last_change: change,
        })
    }
}

#[cfg(test)]
mod binary_test {
    use super::*;
    use crate::model::parameter::ParameterTable;
    use approx::assert_relative_eq;

    fn resolve(binary: &Binary, edits: &[(&str, f64)]) -> BinaryTerms {
        let mut table = ParameterTable::new();
        binary.parameters().into_iter().for_each(|p| table.insert(p));
        for (name, v) in edits {
            let unit = table.get(name).unwrap().unit;
            table.set_value(name, *v, unit).unwrap();
        }
        binary.resolve(&table.snapshot()).unwrap()
    }

    #[test]
    fn test_circular_orbit_models_agree() {
        let epoch = SplitMjd::new(55000, 0.0);
        // With e = 0 and ω = 0, T0 is the ascending node and all three models coincide
        let bt = resolve(&Binary::bt(1.5, 2.0, 0.0, 0.0, epoch), &[]);
        let dd = resolve(&Binary::dd(1.5, 2.0, 0.0, 0.0, epoch), &[]);
        let ell1 = resolve(&Binary::ell1(1.5, 2.0, epoch, 0.0, 0.0), &[]);
        for &t in &[0.0, 1234.5, 40_000.0, 1e6] {
            let a = bt.delay(t).unwrap();
            let phase = DPI * t / (1.5 * SECONDS_PER_DAY);
            assert_relative_eq!(a, 2.0 * phase.sin(), epsilon = 1e-12);
            assert_relative_eq!(dd.delay(t).unwrap(), a, epsilon = 1e-12);
            assert_relative_eq!(ell1.delay(t).unwrap(), a, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_dd_shapiro_peak_at_conjunction() {
        let epoch = SplitMjd::new(55000, 0.0);
        let dd = resolve(&Binary::dd(1.0, 1.0, 0.0, 0.0, epoch), &[("M2", 0.3), ("SINI", 0.99)]);
        let plain = resolve(&Binary::dd(1.0, 1.0, 0.0, 0.0, epoch), &[]);
        // Superior conjunction at a quarter orbit for ω = 0
        let t = 0.25 * SECONDS_PER_DAY;
        let shapiro = dd.delay(t).unwrap() - plain.delay(t).unwrap();
        assert_relative_eq!(shapiro, -2.0 * T_SUN * 0.3 * (1.0f64 - 0.99).ln(), max_relative = 1e-9);
    }

    #[test]
    fn test_fixed_point_converges() {
        let epoch = SplitMjd::new(55000, 0.0);
        let bt = resolve(&Binary::bt(0.1, 1.2, 0.1, 30.0, epoch), &[]);
        let (delay, iterations) = bt.solve(5000.0, 1e-10, 16, 0).unwrap();
        assert!(iterations <= 6, "{iterations} iterations");
        assert_relative_eq!(delay, bt.delay(5000.0 - delay).unwrap(), epsilon = 1e-10);
    }

    #[test]
    fn test_fixed_point_fails_when_orbit_is_too_fast() {
        let epoch = SplitMjd::new(55000, 0.0);
        // x·2π/Pb ≫ 1: the iteration map is not a contraction
        let fast = resolve(&Binary::bt(0.01, 1000.0, 0.0, 0.0, epoch), &[]);
        let err = fast.solve(123.0, 1e-10, 16, 7).unwrap_err();
        assert_eq!(
            err,
            PulsefitError::DelayConvergenceError {
                toa_index: 7,
                iterations: 16,
                last_change: 0.0
            }
        );
    }

    #[test]
    fn test_shapiro_divergence_is_reported() {
        let epoch = SplitMjd::new(55000, 0.0);
        let ell1 = resolve(&Binary::ell1(1.0, 1.0, epoch, 0.0, 0.0), &[("M2", 0.2), ("SINI", 1.0)]);
        assert!(ell1.delay(0.25 * SECONDS_PER_DAY).is_err());
        assert!(Binary::fd_step("PB").is_some());
        assert!(Binary::fd_step("F0").is_none());
    }
}
