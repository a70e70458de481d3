mod common;

use std::f64::consts::TAU;

use approx::assert_abs_diff_eq;
use common::spin_model;
use nalgebra::Vector3;
use pulsefit::clock::corrector::{ClockConfig, ClockCorrector};
use pulsefit::constants::VLIGHT;
use pulsefit::env_state::TimingData;
use pulsefit::ephemeris::state_vector::StateVector;
use pulsefit::ephemeris::tabulated::HermiteTable;
use pulsefit::ephemeris::Ephemeris;
use pulsefit::model::components::astrometry::Astrometry;
use pulsefit::observatories::{Observatory, ObservatoryRegistry};
use pulsefit::pulsefit::Pulsefit;
use pulsefit::pulsefit_errors::PulsefitError;
use pulsefit::residuals::ResidualConfig;
use pulsefit::time::{SplitMjd, TimeScaleTag};
use pulsefit::toa::{BatchPolicy, Toa, ToaBatch};

const RADIUS_KM: f64 = 7000.0;
const PERIOD_DAYS: f64 = 0.07;

/// Inclined circular low-Earth orbit sampled every 0.002 d over MJD 55000–55001.
fn leo_orbit() -> HermiteTable {
    let (mjd, states): (Vec<f64>, Vec<StateVector>) = (0..=500)
        .map(|k| {
            let t = 55000.0 + k as f64 / 500.0;
            let (s, c) = (TAU * (t - 55000.0) / PERIOD_DAYS).sin_cos();
            let speed = TAU * RADIUS_KM / PERIOD_DAYS;
            let state = StateVector::new(
                Vector3::new(RADIUS_KM * c, RADIUS_KM * s * 0.8, RADIUS_KM * s * 0.6),
                Vector3::new(-speed * s, speed * c * 0.8, speed * c * 0.6),
            );
            (t, state)
        })
        .unzip();
    HermiteTable::new("leo-orbit", mjd, states).unwrap()
}

fn spacecraft_data() -> TimingData {
    let mut observatories = ObservatoryRegistry::with_defaults();
    observatories.insert(Observatory::spacecraft("leo", leo_orbit()));
    TimingData::new(
        ClockCorrector::new(ClockConfig::default()),
        Ephemeris::analytic(54900.0, 55100.0).unwrap(),
        observatories,
    )
}

fn tt_toa(mjd: f64, site: &str) -> Toa {
    Toa::new(SplitMjd::from_mjd(mjd), site, 1400.0, 1.0)
        .unwrap()
        .with_scale(TimeScaleTag::Tt)
}

#[test]
fn test_spacecraft_position_follows_the_orbit() {
    let pf = Pulsefit::new(spacecraft_data());
    let orbit = leo_orbit();
    let mut model = spin_model(&[100.0]);
    model
        .add_component(Astrometry::new(1.2, 0.3, SplitMjd::new(55000, 0.0)))
        .unwrap();

    for mjd in [55000.0113, 55000.4567, 55000.9001] {
        let toas = ToaBatch::new(vec![tt_toa(mjd, "leo"), tt_toa(mjd, "geocenter")]).unwrap();
        let prepared = pf.prepare(&toas).unwrap();
        assert!(prepared.rejected().is_empty());
        let (craft, geo) = (prepared.get(0).unwrap(), prepared.get(1).unwrap());

        let offset = orbit.state(craft.tt.to_mjd()).unwrap().position / VLIGHT;
        let moved = craft.kinematics.ssb_position - geo.kinematics.ssb_position;
        assert_abs_diff_eq!(moved, offset, epsilon = 1e-12);
        assert!(offset.norm() > 0.9 * RADIUS_KM / VLIGHT);

        // Topocentric TDB − TT term: v_earth · r_site / c²
        let topocentric = geo.kinematics.ssb_velocity.dot(&offset);
        assert_abs_diff_eq!(craft.tdb().seconds_since(&geo.tdb()), topocentric, epsilon = 1e-10);

        // Roemer delay moves by −n̂ · r_orbit / c
        let delays = pf.delays(&toas, &model).unwrap();
        let (d_craft, d_geo) = (delays.get(0).unwrap(), delays.get(1).unwrap());
        let n = d_geo.direction.unwrap();
        assert_abs_diff_eq!(
            d_craft.breakdown.astrometry - d_geo.breakdown.astrometry,
            -n.dot(&offset),
            epsilon = 1e-9
        );
    }
}

#[test]
fn test_spacecraft_outside_its_orbit_table() {
    let pf = Pulsefit::new(spacecraft_data());
    let toas = ToaBatch::new(vec![
        tt_toa(55000.5, "leo"),
        tt_toa(55001.5, "leo"),
        tt_toa(55001.5, "geocenter"),
    ])
    .unwrap();

    let prepared = pf.prepare(&toas).unwrap();
    assert_eq!(prepared.rejected().len(), 1);
    let rejected = &prepared.rejected()[0];
    assert_eq!(rejected.index, 1);
    assert!(matches!(
        &rejected.error,
        PulsefitError::EphemerisRangeError { body, start, end, .. }
            if body == "leo-orbit" && *start == 55000.0 && *end == 55001.0
    ));
    assert!(prepared.get(2).is_some());

    let strict = ResidualConfig::builder()
        .batch_policy(BatchPolicy::Strict)
        .build()
        .unwrap();
    let err = pf
        .with_residual_config(strict)
        .residuals(&toas, &spin_model(&[100.0]))
        .unwrap_err();
    assert!(matches!(err, PulsefitError::EphemerisRangeError { .. }));
}
