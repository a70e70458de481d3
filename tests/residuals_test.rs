mod common;

use approx::assert_abs_diff_eq;
use common::{barycentric_toas, pepoch, spin_model};
use pulsefit::env_state::TimingData;
use pulsefit::model::components::binary::Binary;
use pulsefit::model::components::dispersion::Dispersion;
use pulsefit::pulsefit::Pulsefit;
use pulsefit::residuals::{ResidualConfig, TrackMode};
use pulsefit::simulation::uniform_toas;
use pulsefit::time::{SplitMjd, TimeScaleTag};
use pulsefit::toa::ToaBatch;

#[test]
fn test_three_toa_scenario() {
    let pf = Pulsefit::new(TimingData::barycentric_only());
    let toas = uniform_toas(pepoch(), 2.0, 3, "@", TimeScaleTag::Tdb, &[1400.0], 1.0).unwrap();

    let exact = pf.residuals(&toas, &spin_model(&[100.0])).unwrap();
    for r in exact.records() {
        assert_abs_diff_eq!(r.time_residual, 0.0, epsilon = 1e-12);
    }

    // 1e-6 Hz error: 0.0864 turns per day, a straight line through the TOAs
    let pf = pf.with_residual_config(ResidualConfig::builder().subtract_mean(false).build().unwrap());
    let perturbed = pf.residuals(&toas, &spin_model(&[100.0 + 1e-6])).unwrap();
    let r = perturbed.time_residuals();
    assert_abs_diff_eq!(r[0], 0.0, epsilon = 1e-12);
    assert!(r[1] > 8e-4);
    assert_abs_diff_eq!(r[2] - r[1], r[1] - r[0], epsilon = 1e-12);
}

#[test]
fn test_residuals_are_deterministic() {
    let pf = Pulsefit::new(TimingData::barycentric_only())
        .with_residual_config(ResidualConfig::builder().allow_ambiguous(true).build().unwrap());
    let toas = barycentric_toas(50, 300.0, &[430.0, 1400.0, 2300.0], 2.0);
    let mut model = spin_model(&[218.81, -4.08e-16]);
    model.add_component(Dispersion::new(&[15.99, 1e-4], pepoch()).unwrap()).unwrap();
    model
        .add_component(Binary::ell1(0.38, 1.89, SplitMjd::new(55001, 0.25), 1e-5, -2e-5))
        .unwrap();

    let first = pf.residuals(&toas, &model).unwrap();
    pf.clear_cache();
    let second = pf.residuals(&toas, &model).unwrap();
    assert_eq!(first.records(), second.records());
    assert_eq!(first.chi2().to_bits(), second.chi2().to_bits());
}

#[test]
fn test_pulse_numbers_follow_time_order() {
    let pf = Pulsefit::new(TimingData::barycentric_only())
        .with_residual_config(ResidualConfig::builder().allow_ambiguous(true).build().unwrap());
    let sorted = barycentric_toas(40, 60.0, &[1400.0], 1.0);

    // Same TOAs in a scrambled order
    let mut toas = sorted.toas().to_vec();
    toas.reverse();
    toas.swap(3, 17);
    let shuffled = ToaBatch::new(toas).unwrap();

    let model = spin_model(&[61.48, -1e-14]);
    let residuals = pf.residuals(&shuffled, &model).unwrap();
    let numbers = residuals.pulse_numbers();

    let mut previous = i64::MIN;
    for index in shuffled.time_order() {
        let n = numbers[index];
        assert!(n >= previous, "pulse number decreased at TOA {index}");
        previous = n;
    }
    assert_eq!(residuals.reference(), shuffled.time_order().first().copied());
}

#[test]
fn test_inconsistent_pulse_numbers_are_reported() {
    let pf = Pulsefit::new(TimingData::barycentric_only())
        .with_residual_config(ResidualConfig::builder().track_mode(TrackMode::PulseNumbers).build().unwrap());
    let base = barycentric_toas(3, 2.0, &[1400.0], 1.0);
    let numbered = base
        .map(|t| {
            let n = if t.mjd.day() == 55001 { 5 } else { 100 };
            t.clone().with_pulse_number(n)
        })
        .unwrap();

    let err = pf.residuals(&numbered, &spin_model(&[100.0])).unwrap_err();
    let pulsefit::pulsefit_errors::PulsefitError::PulseNumberAmbiguity(list) = err else {
        panic!("expected a pulse-number ambiguity");
    };
    assert_eq!(list[0].toa_index, 1);
    assert_eq!(list[0].candidates.as_slice(), &[5, 100]);
}
