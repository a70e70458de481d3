//! Interstellar dispersion delay.
//!
//! ```text
//! Δ_DM = K · DM(t) / f_ssb²        K = 1 / 2.41e-4  s MHz² cm³ / pc
//! DM(t) = Σₖ DMₖ · Δtᵏ / k!        Δt = t − DMEPOCH  (years)
//! ```
//!
//! `f_ssb = f_obs · (1 − v̂·n̂)` is the observing frequency Doppler-shifted
//! to the barycentric frame.

use nalgebra::Vector3;
use smallvec::SmallVec;

use crate::constants::{Second, DAYS_PER_YEAR, DM_CONST, MHz};
use crate::model::parameter::{ParamSnapshot, Parameter, Unit};
use crate::observatories::site_position::SiteKinematics;
use crate::pulsefit_errors::PulsefitError;
use crate::time::SplitMjd;

#[derive(Debug, Clone, PartialEq)]
pub struct Dispersion {
    initial: Vec<f64>,
    dmepoch: SplitMjd,
}

impl Dispersion {
    /// Arguments
    /// -----------------
    /// * `dm`: initial `[DM, DM1, …]` in pc cm⁻³, pc cm⁻³ yr⁻¹, … (at least DM).
    /// * `dmepoch`: reference epoch of the DM polynomial.
    pub fn new(dm: &[f64], dmepoch: SplitMjd) -> Result<Self, PulsefitError> {
        if dm.is_empty() {
            return Err(PulsefitError::InvalidParameter {
                name: "DM".into(),
                reason: "dispersion needs at least DM".into(),
            });
        }
        Ok(Dispersion {
            initial: dm.to_vec(),
            dmepoch,
        })
    }

    fn name(k: usize) -> String {
        if k == 0 {
            "DM".to_string()
        } else {
            format!("DM{k}")
        }
    }

    pub fn parameters(&self) -> Vec<Parameter> {
        let mut params: Vec<Parameter> = self
            .initial
            .iter()
            .enumerate()
            .map(|(k, &dm)| {
                Parameter::float(
                    Self::name(k),
                    dm,
                    Unit::DispersionMeasure(k as u8),
                    "Dispersion measure",
                )
            })
            .collect();
        params.push(Parameter::epoch("DMEPOCH", self.dmepoch, "Epoch of DM measurement"));
        params
    }

    pub fn resolve(&self, snap: &ParamSnapshot) -> Result<DispersionTerms, PulsefitError> {
        let dm = (0..self.initial.len())
            .map(|k| snap.value(&Self::name(k)))
            .collect::<Result<SmallVec<_>, _>>()?;
        Ok(DispersionTerms {
            dm,
            dmepoch: snap.epoch("DMEPOCH")?,
        })
    }
}

/// Dispersion values at one parameter point.
#[derive(Debug, Clone, PartialEq)]
pub struct DispersionTerms {
    dm: SmallVec<[f64; 4]>,
    dmepoch: SplitMjd,
}

impl DispersionTerms {
    fn years(&self, tdb: &SplitMjd) -> f64 {
        tdb.seconds_since(&self.dmepoch) / 86400.0 / DAYS_PER_YEAR
    }

    /// Observing frequency in the SSB frame (MHz).
    pub fn barycentric_frequency(
        frequency: MHz,
        kin: &SiteKinematics,
        direction: Option<&Vector3<f64>>,
    ) -> MHz {
        match direction {
            Some(n) => frequency * (1.0 - kin.ssb_velocity.dot(n)),
            None => frequency,
        }
    }

    /// Dispersion measure at `tdb`.
    pub fn dm_at(&self, tdb: &SplitMjd) -> f64 {
        let dt = self.years(tdb);
        let mut power = 1.0;
        let mut factorial = 1.0;
        let mut total = 0.0;
        for (k, dmk) in self.dm.iter().enumerate() {
            if k > 0 {
                power *= dt;
                factorial *= k as f64;
            }
            total += dmk * power / factorial;
        }
        total
    }

    pub fn delay(&self, frequency: MHz, kin: &SiteKinematics, direction: Option<&Vector3<f64>>) -> Second {
        if frequency.is_infinite() {
            return 0.0;
        }
        let f = Self::barycentric_frequency(frequency, kin, direction);
        DM_CONST * self.dm_at(&kin.tdb) / (f * f)
    }

    /// `∂Δ/∂DMk`, `None` for DMEPOCH and unknown names.
    pub fn delay_derivative(
        &self,
        name: &str,
        frequency: MHz,
        kin: &SiteKinematics,
        direction: Option<&Vector3<f64>>,
    ) -> Option<f64> {
        let k: usize = match name {
            "DM" => 0,
            _ => name.strip_prefix("DM")?.parse().ok()?,
        };
        if k >= self.dm.len() {
            return None;
        }
        if frequency.is_infinite() {
            return Some(0.0);
        }
        let f = Self::barycentric_frequency(frequency, kin, direction);
        let dt = self.years(&kin.tdb);
        let factorial: f64 = (1..=k).map(|i| i as f64).product();
        Some(DM_CONST / (f * f) * dt.powi(k as i32) / factorial)
    }
}
