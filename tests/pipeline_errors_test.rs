mod common;

use common::{barycentric_toas, pepoch, site_data, spin_model};
use pulsefit::env_state::TimingData;
use pulsefit::model::components::binary::Binary;
use pulsefit::pulsefit::Pulsefit;
use pulsefit::pulsefit_errors::PulsefitError;
use pulsefit::residuals::ResidualConfig;
use pulsefit::time::{SplitMjd, TimeScaleTag};
use pulsefit::toa::{BatchPolicy, Toa, ToaBatch};

fn strict() -> ResidualConfig {
    ResidualConfig::builder()
        .batch_policy(BatchPolicy::Strict)
        .build()
        .unwrap()
}

fn gbt_toas(mjds: &[f64]) -> ToaBatch {
    let toas = mjds
        .iter()
        .map(|&mjd| {
            Toa::new(SplitMjd::from_mjd(mjd), "gbt", 1400.0, 1.0)
                .unwrap()
                .with_scale(TimeScaleTag::Observatory)
        })
        .collect();
    ToaBatch::new(toas).unwrap()
}

#[test]
fn test_runaway_binary_delay_is_rejected() {
    let pf = Pulsefit::new(TimingData::barycentric_only());
    let toas = barycentric_toas(10, 5.0, &[1400.0], 1.0);
    let mut model = spin_model(&[100.0]);
    // a·2π/PB ≫ 1: the Roemer fixed point cannot converge
    model
        .add_component(Binary::bt(0.01, 1000.0, 0.0, 0.0, pepoch()))
        .unwrap();

    let delays = pf.delays(&toas, &model).unwrap();
    assert!(!delays.rejected().is_empty());
    for rejected in delays.rejected() {
        assert!(matches!(
            rejected.error,
            PulsefitError::DelayConvergenceError { toa_index, .. } if toa_index == rejected.index
        ));
    }

    let err = pf
        .with_residual_config(strict())
        .residuals(&toas, &model)
        .unwrap_err();
    assert!(matches!(err, PulsefitError::DelayConvergenceError { .. }));
}

#[test]
fn test_missing_clock_coverage() {
    let pf = Pulsefit::new(site_data(54800.0, 55700.0));
    let toas = gbt_toas(&[55000.3, 55100.7, 55200.1, 55500.5]);
    let model = spin_model(&[100.0]);

    let prepared = pf.prepare(&toas).unwrap();
    assert_eq!(prepared.rejected().len(), 1);
    let rejected = &prepared.rejected()[0];
    assert_eq!(rejected.index, 3);
    assert!(matches!(
        &rejected.error,
        PulsefitError::ClockDataMissing { observatory, .. } if observatory == "gbt"
    ));
    assert!(prepared.check(BatchPolicy::SkipInvalid).is_ok());

    let err = pf
        .with_residual_config(strict())
        .residuals(&toas, &model)
        .unwrap_err();
    assert!(matches!(err, PulsefitError::ClockDataMissing { .. }));
}

#[test]
fn test_ephemeris_out_of_range() {
    let pf = Pulsefit::new(site_data(54900.0, 55200.0));
    let toas = gbt_toas(&[55000.3, 55100.7, 55300.2]);

    let prepared = pf.prepare(&toas).unwrap();
    assert_eq!(prepared.rejected().len(), 1);
    assert_eq!(prepared.rejected()[0].index, 2);
    assert!(matches!(
        prepared.rejected()[0].error,
        PulsefitError::EphemerisRangeError { .. }
    ));

    let err = prepared.check(BatchPolicy::Strict).unwrap_err();
    assert!(matches!(err, PulsefitError::EphemerisRangeError { .. }));
}

#[test]
fn test_unknown_observatory_fails_the_batch() {
    let pf = Pulsefit::new(TimingData::barycentric_only());
    let toas = ToaBatch::new(vec![Toa::new(SplitMjd::new(55000, 0.5), "nowhere", 1400.0, 1.0).unwrap()]).unwrap();
    let model = spin_model(&[100.0]);

    let err = pf.residuals(&toas, &model).unwrap_err();
    assert_eq!(err, PulsefitError::UnknownObservatory("nowhere".into()));
    assert_eq!(pf.cached_batches(), 0);
}
