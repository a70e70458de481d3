//! Barycentric kinematics of an observatory.
//!
//! For a terrestrial site the ITRF vector is rotated into GCRS
//! ([`crate::earth_orientation::itrf_to_gcrs`]) and added to the barycentric
//! Earth state. The same geocentric vector gives the topocentric part of
//! TDB − TT, `(v_earth · r_site)/c²`.
//!
//! Results are in light-seconds (positions) and units of c (velocities), which
//! is what the delay formulas consume.

use nalgebra::Vector3;

use super::{Observatory, ObservatoryKind};
use crate::constants::{LightSecond, SECONDS_PER_DAY};
use crate::earth_orientation::{earth_rotation_rate, itrf_to_gcrs};
use crate::ephemeris::state_vector::StateVector;
use crate::ephemeris::{Body, Ephemeris};
use crate::pulsefit_errors::PulsefitError;
use crate::time::SplitMjd;

/// Observatory state relative to the solar-system barycentre at one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SiteKinematics {
    /// Barycentric TDB epoch of the observation.
    pub tdb: SplitMjd,
    /// Site position relative to the SSB, light-seconds.
    pub ssb_position: Vector3<LightSecond>,
    /// Site velocity relative to the SSB, units of c.
    pub ssb_velocity: Vector3<f64>,
    /// Vector from the site to the Sun, light-seconds. `None` at the barycentre.
    pub sun_position: Option<Vector3<LightSecond>>,
}

impl SiteKinematics {
    /// Kinematics of the barycentre itself.
    pub fn barycentric(tdb: SplitMjd) -> Self {
        SiteKinematics {
            tdb,
            ssb_position: Vector3::zeros(),
            ssb_velocity: Vector3::zeros(),
            sun_position: None,
        }
    }
}

/// Geocentric GCRS state of an observatory (km, km/day).
///
/// Arguments
/// -----------------
/// * `observatory`: the site.
/// * `mjd_tt`: epoch in TT.
/// * `mjd_ut1`: the same epoch in UT1, for the Earth rotation angle.
pub fn geocentric_state(
    observatory: &Observatory,
    mjd_tt: f64,
    mjd_ut1: f64,
) -> Result<StateVector, PulsefitError> {
    match observatory.kind() {
        ObservatoryKind::Geodetic { itrf } => {
            let itrf_km = itrf.map(|c| c.into_inner()) / 1000.0;
            let (rot, true_to_gcrs) = itrf_to_gcrs(mjd_tt, mjd_ut1);

            let position = rot * itrf_km;
            // ω × r is evaluated in the true equator of date, where ω is along Z
            let r_true = true_to_gcrs.transpose() * position;
            let omega = Vector3::new(0.0, 0.0, earth_rotation_rate() * SECONDS_PER_DAY);

            Ok(StateVector::new(position, true_to_gcrs * omega.cross(&r_true)))
        }
        ObservatoryKind::Spacecraft { orbit } => orbit.state(mjd_tt),
        ObservatoryKind::Geocenter | ObservatoryKind::Barycenter => Ok(StateVector::default()),
    }
}

/// Barycentric position and velocity of an observatory.
///
/// Arguments
/// -----------------
/// * `observatory`: the site.
/// * `tt`: observation epoch in TT.
/// * `mjd_ut1`: the same epoch in UT1 (low precision is enough).
/// * `ephemeris`: solar-system ephemeris providing the Earth and the Sun.
///
/// Return
/// ----------
/// * The [`SiteKinematics`] including the TDB epoch, or
///   [`PulsefitError::EphemerisRangeError`] outside ephemeris or orbit coverage.
///
/// For the barycentre pseudo-observatory `tt` is taken to be the TDB epoch and
/// no ephemeris lookup is made.
pub fn position_velocity(
    observatory: &Observatory,
    tt: &SplitMjd,
    mjd_ut1: f64,
    ephemeris: &Ephemeris,
) -> Result<SiteKinematics, PulsefitError> {
    if observatory.is_barycentric() {
        return Ok(SiteKinematics::barycentric(*tt));
    }

    let geocentric_tdb = tt.add_seconds(ephemeris.tdb_minus_tt(tt.to_mjd())?);
    let earth = ephemeris.state(Body::Earth, geocentric_tdb.to_mjd())?;
    let sun = ephemeris.state(Body::Sun, geocentric_tdb.to_mjd())?;
    let site = geocentric_state(observatory, tt.to_mjd(), mjd_ut1)?;

    let (earth_pos, earth_vel) = earth.to_light_seconds();
    let (site_pos, site_vel) = site.to_light_seconds();
    let (sun_pos, _) = sun.to_light_seconds();

    // Topocentric term of TDB − TT
    let tdb = geocentric_tdb.add_seconds(earth_vel.dot(&site_pos));

    let ssb_position = earth_pos + site_pos;
    Ok(SiteKinematics {
        tdb,
        ssb_position,
        ssb_velocity: earth_vel + site_vel,
        sun_position: Some(sun_pos - ssb_position),
    })
}

#[cfg(test)]
mod site_position_test {
    use super::*;
    use crate::constants::{AU_LIGHT_SECONDS, VLIGHT};
    use crate::observatories::ObservatoryRegistry;
    use approx::assert_relative_eq;

    #[test]
    fn test_terrestrial_site_rotation() {
        let reg = ObservatoryRegistry::with_defaults();
        let gbt = reg.get("gbt").unwrap();
        let state = geocentric_state(&gbt, 58000.3, 58000.3).unwrap();

        // Rotation preserves the geocentric distance
        let r = gbt.itrf().unwrap().norm() / 1000.0;
        assert_relative_eq!(state.position.norm(), r, max_relative = 1e-12);

        // |ω × r| = ω r cos(φ): about 0.364 km/s at Green Bank
        let v = state.velocity.norm() / SECONDS_PER_DAY;
        assert!((0.35..0.38).contains(&v), "v = {v} km/s");
        assert!(state.velocity.dot(&state.position).abs() < 1e-6 * r * v * SECONDS_PER_DAY);
    }

    #[test]
    fn test_barycentric_kinematics() {
        let eph = Ephemeris::analytic(57990.0, 58010.0).unwrap();
        let reg = ObservatoryRegistry::with_defaults();
        let tt = SplitMjd::new(58000, 0.25);

        let gbt = reg.get("gbt").unwrap();
        let k = position_velocity(&gbt, &tt, 58000.25, &eph).unwrap();
        assert_relative_eq!(k.ssb_position.norm(), AU_LIGHT_SECONDS, max_relative = 0.02);
        assert_relative_eq!(k.ssb_velocity.norm(), 29.8 / VLIGHT, max_relative = 0.03);
        let sun = k.sun_position.unwrap();
        assert_relative_eq!(sun.norm(), k.ssb_position.norm(), max_relative = 1e-4);

        // TDB - TT stays below 2 ms; the topocentric part below 2.1 µs
        let geo = position_velocity(&reg.get("geocenter").unwrap(), &tt, 58000.25, &eph).unwrap();
        assert!(k.tdb.seconds_since(&tt).abs() < 2e-3);
        assert!(k.tdb.seconds_since(&geo.tdb).abs() < 2.1e-6);

        let bary = position_velocity(&reg.get("@").unwrap(), &tt, 58000.25, &eph).unwrap();
        assert_eq!(bary.tdb, tt);
        assert!(bary.sun_position.is_none());
    }

    #[test]
    fn test_tdb_follows_the_ephemeris_time_table() {
        use crate::ephemeris::time_ephemeris::TimeEphemeris;
        use crate::time::tdb_minus_tt;

        let series = Ephemeris::analytic(57990.0, 58010.0).unwrap();
        let shifted = |t: f64| tdb_minus_tt(t) + 3.0e-7;
        let tabulated = series
            .clone()
            .with_tdb_minus_tt(TimeEphemeris::sample(57995.0, 58005.0, 0.5, shifted).unwrap());
        let reg = ObservatoryRegistry::with_defaults();
        let gbt = reg.get("gbt").unwrap();

        let tt = SplitMjd::new(58000, 0.25);
        let a = position_velocity(&gbt, &tt, 58000.25, &series).unwrap();
        let b = position_velocity(&gbt, &tt, 58000.25, &tabulated).unwrap();
        assert!((b.tdb.seconds_since(&a.tdb) - 3.0e-7).abs() < 1e-10);

        let late = SplitMjd::new(58008, 0.0);
        assert!(position_velocity(&gbt, &late, 58008.0, &series).is_ok());
        let err = position_velocity(&gbt, &late, 58008.0, &tabulated).unwrap_err();
        assert!(matches!(err, PulsefitError::EphemerisRangeError { ref body, .. } if body == "TDB-TT"));
    }

    #[test]
    fn test_out_of_range() {
        let eph = Ephemeris::analytic(57990.0, 58010.0).unwrap();
        let reg = ObservatoryRegistry::with_defaults();
        let err = position_velocity(&reg.get("gbt").unwrap(), &SplitMjd::new(59000, 0.0), 59000.0, &eph)
            .unwrap_err();
        assert!(matches!(err, PulsefitError::EphemerisRangeError { .. }));
    }
}
