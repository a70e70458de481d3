#![allow(dead_code)]

use approx::assert_abs_diff_eq;
use pulsefit::clock::corrector::{ClockConfig, ClockCorrector};
use pulsefit::clock::ClockFile;
use pulsefit::env_state::TimingData;
use pulsefit::ephemeris::Ephemeris;
use pulsefit::fitter::FitState;
use pulsefit::model::components::spindown::Spindown;
use pulsefit::model::TimingModel;
use pulsefit::observatories::{Observatory, ObservatoryRegistry};
use pulsefit::simulation::uniform_toas;
use pulsefit::time::{SplitMjd, TimeScaleTag};
use pulsefit::toa::ToaBatch;

pub fn pepoch() -> SplitMjd {
    SplitMjd::new(55000, 0.0)
}

/// Spin-down only model.
pub fn spin_model(frequencies: &[f64]) -> TimingModel {
    let mut model = TimingModel::new("J0000+0000");
    model
        .add_component(Spindown::new(frequencies, pepoch()).unwrap())
        .unwrap();
    model
}

/// Evenly spaced TDB TOAs at the barycentre.
pub fn barycentric_toas(n: usize, span_days: f64, frequencies: &[f64], uncertainty_us: f64) -> ToaBatch {
    uniform_toas(
        SplitMjd::new(55000, 0.137),
        span_days,
        n,
        "@",
        TimeScaleTag::Tdb,
        frequencies,
        uncertainty_us,
    )
    .unwrap()
}

/// Timing data with an analytic ephemeris over `[start, end]` and a GBT clock
/// chain ("gbt2gps") covering MJD 54900–55400.
pub fn site_data(start: f64, end: f64) -> TimingData {
    let mut clock = ClockCorrector::new(ClockConfig::default());
    clock.add_clock_file(
        ClockFile::new("gbt2gps", vec![54900.0, 55150.0, 55400.0], vec![1.0e-6, 1.5e-6, 0.5e-6]).unwrap(),
    );

    let mut observatories = ObservatoryRegistry::with_defaults();
    observatories.insert(
        Observatory::from_itrf("gbt", 882589.289, -4924872.368, 3943729.418)
            .unwrap()
            .with_clock_chain(vec!["gbt2gps".to_string()]),
    );

    TimingData::new(clock, Ephemeris::analytic(start, end).unwrap(), observatories)
}

/// Fitted value of `name` within `n_sigma` uncertainties (or `floor`) of `expected`.
pub fn assert_recovered(state: &FitState, name: &str, expected: f64, n_sigma: f64, floor: f64) {
    let value = state.value(name).unwrap();
    let sigma = state.uncertainty(name).unwrap();
    assert_abs_diff_eq!(value, expected, epsilon = (n_sigma * sigma).max(floor));
}
