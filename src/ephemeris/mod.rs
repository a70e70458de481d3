//! # Solar-system ephemeris
//!
//! Barycentric positions and velocities of the Earth and the Sun, the two bodies
//! the timing delays need (Roemer and Einstein terms use the Earth, the solar
//! Shapiro delay uses the Sun).
//!
//! Two backends are supported through the [`Ephemeris`] enum:
//!
//! - [`Ephemeris::Chebyshev`]: piecewise Chebyshev series, the layout of JPL
//!   planetary ephemerides ([`chebyshev`]).
//! - [`Ephemeris::Tabulated`]: state tables with cubic Hermite interpolation
//!   ([`tabulated`]), loadable from CSV.
//!
//! Either backend may also carry TDB − TT tabulated by the ephemeris
//! ([`time_ephemeris`]); without it the analytic series of
//! [`crate::time::tdb_minus_tt`] is used.
//!
//! All vectors are relative to the solar-system barycentre, in the ICRS
//! equatorial frame, in km and km/day, at TDB epochs. Lookups outside the
//! covered interval fail with [`PulsefitError::EphemerisRangeError`].
//!
//! [`Ephemeris::analytic`] builds a low-precision Chebyshev ephemeris from mean
//! Keplerian elements of the Earth–Moon barycentre. It is accurate to ~10⁻⁴ AU
//! and meant for simulation and tests, not for real timing.
pub mod chebyshev;
pub mod state_vector;
pub mod tabulated;
pub mod time_ephemeris;

use std::fmt;

use camino::Utf8Path;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::constants::{Second, AU, MJD, RADEG, T2000};
use crate::pulsefit_errors::PulsefitError;
use chebyshev::ChebyshevTable;
use state_vector::StateVector;
use tabulated::HermiteTable;
use time_ephemeris::TimeEphemeris;

/// Solar-system bodies provided by the ephemeris.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Body {
    Earth,
    Sun,
}

impl fmt::Display for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Earth => write!(f, "Earth"),
            Body::Sun => write!(f, "Sun"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Ephemeris {
    Chebyshev {
        earth: ChebyshevTable,
        sun: ChebyshevTable,
        time: Option<TimeEphemeris>,
    },
    Tabulated {
        earth: HermiteTable,
        sun: HermiteTable,
        time: Option<TimeEphemeris>,
    },
}

impl Ephemeris {
    /// Barycentric state of `body` at `mjd_tdb`.
    pub fn state(&self, body: Body, mjd_tdb: MJD) -> Result<StateVector, PulsefitError> {
        match (self, body) {
            (Ephemeris::Chebyshev { earth, .. }, Body::Earth) => earth.state(mjd_tdb),
            (Ephemeris::Chebyshev { sun, .. }, Body::Sun) => sun.state(mjd_tdb),
            (Ephemeris::Tabulated { earth, .. }, Body::Earth) => earth.state(mjd_tdb),
            (Ephemeris::Tabulated { sun, .. }, Body::Sun) => sun.state(mjd_tdb),
        }
    }

    /// Interval (TDB) where every body is available.
    pub fn coverage(&self) -> (MJD, MJD) {
        let ((e0, e1), (s0, s1)) = match self {
            Ephemeris::Chebyshev { earth, sun, .. } => (earth.coverage(), sun.coverage()),
            Ephemeris::Tabulated { earth, sun, .. } => (earth.coverage(), sun.coverage()),
        };
        (e0.max(s0), e1.min(s1))
    }

    /// Tabulated TDB − TT, if the ephemeris carries one.
    pub fn time_ephemeris(&self) -> Option<&TimeEphemeris> {
        match self {
            Ephemeris::Chebyshev { time, .. } | Ephemeris::Tabulated { time, .. } => time.as_ref(),
        }
    }

    /// Attach tabulated TDB − TT, which then takes precedence over the series.
    #[must_use]
    pub fn with_tdb_minus_tt(mut self, table: TimeEphemeris) -> Self {
        match &mut self {
            Ephemeris::Chebyshev { time, .. } | Ephemeris::Tabulated { time, .. } => *time = Some(table),
        }
        self
    }

    /// Geocentric TDB − TT (s) at `mjd_tt`.
    ///
    /// Errors
    /// ----------
    /// * [`PulsefitError::EphemerisRangeError`] outside an attached table; the
    ///   series is only used when no table is attached.
    pub fn tdb_minus_tt(&self, mjd_tt: MJD) -> Result<Second, PulsefitError> {
        match self.time_ephemeris() {
            Some(table) => table.tdb_minus_tt(mjd_tt),
            None => Ok(crate::time::tdb_minus_tt(mjd_tt)),
        }
    }

    /// Load Earth and Sun state tables from CSV files.
    pub fn from_csv(earth: &Utf8Path, sun: &Utf8Path) -> Result<Self, PulsefitError> {
        Ok(Ephemeris::Tabulated {
            earth: HermiteTable::from_csv(Body::Earth.to_string(), earth)?,
            sun: HermiteTable::from_csv(Body::Sun.to_string(), sun)?,
            time: None,
        })
    }

    /// Low-precision ephemeris from mean orbital elements, covering `[start, end]` (MJD TDB).
    ///
    /// The Sun is held at the barycentre and the Earth follows the Keplerian orbit
    /// of the Earth–Moon barycentre with secularly varying mean longitude and
    /// perihelion.
    pub fn analytic(start: MJD, end: MJD) -> Result<Self, PulsefitError> {
        Ok(Ephemeris::Chebyshev {
            earth: ChebyshevTable::fit(Body::Earth, start, end, 16.0, 14, mean_earth_position)?,
            sun: ChebyshevTable::fit(Body::Sun, start, end, end - start, 1, |_| Vector3::zeros())?,
            time: None,
        })
    }
}

/// Heliocentric Earth–Moon barycentre from mean elements, ICRS equatorial, km.
fn mean_earth_position(mjd: MJD) -> Vector3<f64> {
    let t = (mjd - T2000) / 36525.0;

    let a = 1.000_002_61 * AU;
    let e = 0.016_711_23;
    let mean_longitude = (100.464_571_66 + 35_999.372_449_81 * t) * RADEG;
    let perihelion = (102.937_681_93 + 0.323_273_64 * t) * RADEG;
    let obliquity = 23.439_291_1 * RADEG;

    let m = (mean_longitude - perihelion).rem_euclid(std::f64::consts::TAU);
    let mut ecc_anomaly = m + e * m.sin();
    for _ in 0..8 {
        let f = ecc_anomaly - e * ecc_anomaly.sin() - m;
        ecc_anomaly -= f / (1.0 - e * ecc_anomaly.cos());
    }

    let xp = a * (ecc_anomaly.cos() - e);
    let yp = a * (1.0 - e * e).sqrt() * ecc_anomaly.sin();

    let (sw, cw) = perihelion.sin_cos();
    let x = xp * cw - yp * sw;
    let y = xp * sw + yp * cw;

    let (se, ce) = obliquity.sin_cos();
    Vector3::new(x, y * ce, y * se)
}

#[cfg(test)]
mod ephemeris_test {
    use super::*;
    use crate::constants::DAYS_PER_YEAR;
    use approx::assert_relative_eq;

    #[test]
    fn test_analytic_earth_orbit() {
        let eph = Ephemeris::analytic(58000.0, 58400.0).unwrap();
        for mjd in [58000.0, 58123.4, 58399.0] {
            let s = eph.state(Body::Earth, mjd).unwrap();
            let r = s.position.norm() / AU;
            assert!((0.98..1.02).contains(&r), "r = {r} AU");
            // Mean orbital speed 2πAU/yr within eccentricity
            let v = s.velocity.norm() / AU * DAYS_PER_YEAR / std::f64::consts::TAU;
            assert_relative_eq!(v, 1.0, epsilon = 0.02);
            // Orbit lies in the ecliptic: z/y = tan ε
            assert_relative_eq!(s.position.z / s.position.y, (23.4392911 * RADEG).tan(), epsilon = 1e-6);
        }
        assert_eq!(eph.state(Body::Sun, 58100.0).unwrap().position, Vector3::zeros());
    }

    #[test]
    fn test_velocity_matches_position_derivative() {
        let eph = Ephemeris::analytic(58000.0, 58100.0).unwrap();
        let h = 1e-3;
        let p0 = eph.state(Body::Earth, 58050.0 - h).unwrap().position;
        let p1 = eph.state(Body::Earth, 58050.0 + h).unwrap().position;
        let v = eph.state(Body::Earth, 58050.0).unwrap().velocity;
        assert_relative_eq!((p1 - p0) / (2.0 * h), v, max_relative = 1e-6);
    }

    #[test]
    fn test_tabulated_tdb_minus_tt_takes_precedence() {
        let eph = Ephemeris::analytic(58000.0, 58100.0).unwrap();
        assert!(eph.time_ephemeris().is_none());
        assert_eq!(eph.tdb_minus_tt(59000.0).unwrap(), crate::time::tdb_minus_tt(59000.0));

        let shifted = |t: MJD| crate::time::tdb_minus_tt(t) + 2.5e-7;
        let table = TimeEphemeris::sample(58000.0, 58100.0, 0.5, shifted).unwrap();
        let eph = eph.with_tdb_minus_tt(table);
        assert_relative_eq!(eph.tdb_minus_tt(58050.3).unwrap(), shifted(58050.3), epsilon = 1e-12);
        assert!(matches!(
            eph.tdb_minus_tt(58100.5),
            Err(PulsefitError::EphemerisRangeError { .. })
        ));
    }

    #[test]
    fn test_range_error() {
        let eph = Ephemeris::analytic(58000.0, 58100.0).unwrap();
        assert_eq!(eph.coverage(), (58000.0, 58100.0));
        let err = eph.state(Body::Earth, 59000.0).unwrap_err();
        assert_eq!(
            err,
            PulsefitError::EphemerisRangeError {
                body: "Earth".into(),
                mjd: 59000.0,
                start: 58000.0,
                end: 58100.0
            }
        );
    }
}
