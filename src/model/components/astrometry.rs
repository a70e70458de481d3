//! Pulsar position, proper motion and parallax.
//!
//! The geometric (Roemer) delay of a site at `r` (light-seconds from the SSB)
//! for a pulsar in direction `n̂` at distance `d` is
//!
//! ```text
//! Δ_R = −r·n̂ + (|r|² − (r·n̂)²) / (2d)
//! ```
//!
//! where the second term is the curvature of the wavefront (parallax) with
//! `d = 1 / PX` (PX in mas → distance in kpc).

use nalgebra::Vector3;

use crate::constants::{Radian, Second, DAYS_PER_YEAR, DPI, PARSEC_LIGHT_SECONDS, RADMAS};
use crate::model::parameter::{ParamSnapshot, Parameter, Unit};
use crate::observatories::site_position::SiteKinematics;
use crate::pulsefit_errors::PulsefitError;
use crate::time::SplitMjd;

#[derive(Debug, Clone, PartialEq)]
pub struct Astrometry {
    ra: Radian,
    dec: Radian,
    pmra: f64,
    pmdec: f64,
    px: f64,
    posepoch: SplitMjd,
}

impl Astrometry {
    /// Arguments
    /// -----------------
    /// * `ra`, `dec`: ICRS right ascension and declination at `posepoch` (radians).
    /// * `posepoch`: reference epoch of the position (TDB).
    pub fn new(ra: Radian, dec: Radian, posepoch: SplitMjd) -> Self {
        Astrometry {
            ra,
            dec,
            pmra: 0.0,
            pmdec: 0.0,
            px: 0.0,
            posepoch,
        }
    }

    /// Proper motion in mas/yr; `pmra` already includes the cos δ factor.
    #[must_use]
    pub fn with_proper_motion(mut self, pmra: f64, pmdec: f64) -> Self {
        self.pmra = pmra;
        self.pmdec = pmdec;
        self
    }

    /// Parallax in mas.
    #[must_use]
    pub fn with_parallax(mut self, px: f64) -> Self {
        self.px = px;
        self
    }

    pub fn parameters(&self) -> Vec<Parameter> {
        vec![
            Parameter::float("RAJ", self.ra, Unit::Radian, "Right ascension (J2000)")
                .with_range(0.0, DPI),
            Parameter::float("DECJ", self.dec, Unit::Radian, "Declination (J2000)")
                .with_range(-DPI / 4.0, DPI / 4.0),
            Parameter::float("PMRA", self.pmra, Unit::MasPerYear, "Proper motion in RA (× cos δ)"),
            Parameter::float("PMDEC", self.pmdec, Unit::MasPerYear, "Proper motion in DEC"),
            Parameter::float("PX", self.px, Unit::Mas, "Parallax").with_range(0.0, f64::INFINITY),
            Parameter::epoch("POSEPOCH", self.posepoch, "Epoch of position"),
        ]
    }

    pub fn resolve(snap: &ParamSnapshot) -> Result<AstrometryTerms, PulsefitError> {
        Ok(AstrometryTerms {
            ra: snap.value("RAJ")?,
            dec: snap.value("DECJ")?,
            pmra: snap.value("PMRA")?,
            pmdec: snap.value("PMDEC")?,
            px: snap.value("PX")?,
            posepoch: snap.epoch("POSEPOCH")?,
        })
    }
}

/// Astrometric values at one parameter point.
#[derive(Debug, Clone, PartialEq)]
pub struct AstrometryTerms {
    ra: Radian,
    dec: Radian,
    pmra: f64,
    pmdec: f64,
    px: f64,
    posepoch: SplitMjd,
}

impl AstrometryTerms {
    /// Years elapsed since POSEPOCH.
    fn years_since_posepoch(&self, tdb: &SplitMjd) -> f64 {
        tdb.seconds_since(&self.posepoch) / 86400.0 / DAYS_PER_YEAR
    }

    /// Right ascension and declination at `tdb`, linear in proper motion.
    pub fn position_at(&self, tdb: &SplitMjd) -> (Radian, Radian) {
        let dt = self.years_since_posepoch(tdb);
        let cos_dec = self.dec.cos();
        let ra = if cos_dec.abs() > 1e-12 {
            self.ra + self.pmra * RADMAS * dt / cos_dec
        } else {
            self.ra
        };
        (ra, self.dec + self.pmdec * RADMAS * dt)
    }

    /// Unit vector towards the pulsar at `tdb`.
    pub fn direction(&self, tdb: &SplitMjd) -> Vector3<f64> {
        let (ra, dec) = self.position_at(tdb);
        Vector3::new(dec.cos() * ra.cos(), dec.cos() * ra.sin(), dec.sin())
    }

    fn parallax_term(&self, r: &Vector3<f64>, n: &Vector3<f64>) -> Second {
        if self.px == 0.0 {
            return 0.0;
        }
        let rn = r.dot(n);
        (r.norm_squared() - rn * rn) * self.px / (2.0 * 1000.0 * PARSEC_LIGHT_SECONDS)
    }

    /// Roemer and parallax delay of the site.
    pub fn delay(&self, kin: &SiteKinematics) -> Second {
        let n = self.direction(&kin.tdb);
        let r = kin.ssb_position;
        -r.dot(&n) + self.parallax_term(&r, &n)
    }

    /// `∂Δ/∂p` for an astrometric parameter, `None` for POSEPOCH and unknown names.
    ///
    /// The wavefront curvature is neglected in the position derivatives: its
    /// contribution is below 10⁻⁸ of the Roemer term.
    pub fn delay_derivative(&self, name: &str, kin: &SiteKinematics) -> Option<f64> {
        let (ra, dec) = self.position_at(&kin.tdb);
        let r = kin.ssb_position;
        let (sa, ca) = ra.sin_cos();
        let (sd, cd) = dec.sin_cos();

        let dn_dra = Vector3::new(-cd * sa, cd * ca, 0.0);
        let dn_ddec = Vector3::new(-sd * ca, -sd * sa, cd);

        let dt = self.years_since_posepoch(&kin.tdb);
        match name {
            "RAJ" => Some(-r.dot(&dn_dra)),
            "DECJ" => Some(-r.dot(&dn_ddec)),
            "PMRA" => {
                let cos_dec0 = self.dec.cos();
                if cos_dec0.abs() > 1e-12 {
                    Some(-r.dot(&dn_dra) * RADMAS * dt / cos_dec0)
                } else {
                    Some(0.0)
                }
            }
            "PMDEC" => Some(-r.dot(&dn_ddec) * RADMAS * dt),
            "PX" => {
                let n = Vector3::new(cd * ca, cd * sa, sd);
                let rn = r.dot(&n);
                Some((r.norm_squared() - rn * rn) / (2.0 * 1000.0 * PARSEC_LIGHT_SECONDS))
            }
            _ => None,
        }
    }
}
