use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;

use pulsefit::env_state::TimingData;
use pulsefit::fitter::FitParams;
use pulsefit::model::components::binary::Binary;
use pulsefit::model::components::dispersion::Dispersion;
use pulsefit::model::components::spindown::Spindown;
use pulsefit::model::TimingModel;
use pulsefit::pulsefit::Pulsefit;
use pulsefit::simulation::{add_gaussian_noise, uniform_toas};
use pulsefit::time::{SplitMjd, TimeScaleTag};
use pulsefit::toa::ToaBatch;

/// Spin, dispersion and a circular binary.
fn binary_pulsar() -> TimingModel {
    let epoch = SplitMjd::new(55000, 0.0);
    let mut model = TimingModel::new("J1012+5307");
    model
        .add_component(Spindown::new(&[190.2678, -6.2e-16], epoch).expect("spindown"))
        .expect("add spindown");
    model
        .add_component(Dispersion::new(&[9.02], epoch).expect("dispersion"))
        .expect("add dispersion");
    model
        .add_component(Binary::ell1(0.6046, 0.5818, SplitMjd::new(55000, 0.41), 1e-6, 2e-6))
        .expect("add binary");
    model
}

/// Noisy TOAs the model fits to the noise level.
fn noisy_batch(pf: &Pulsefit, model: &TimingModel, n: usize) -> ToaBatch {
    let raw = uniform_toas(
        SplitMjd::new(55000, 0.21),
        700.0,
        n,
        "@",
        TimeScaleTag::Tdb,
        &[430.0, 820.0, 1400.0],
        1.0,
    )
    .expect("uniform TOAs");
    let exact = pf.zero_residuals(&raw, model).expect("zeroed TOAs");
    add_gaussian_noise(&exact, &mut StdRng::seed_from_u64(0xC0FFEE), 1.0).expect("noise")
}

fn bench_residuals(c: &mut Criterion) {
    let pf = Pulsefit::new(TimingData::barycentric_only());
    let model = binary_pulsar();
    let toas = noisy_batch(&pf, &model, 2_000);
    pf.prepare(&toas).expect("prepare");

    c.bench_function("residuals/2000_toas", |b| {
        b.iter(|| black_box(pf.residuals(black_box(&toas), black_box(&model)).expect("residuals")))
    });

    c.bench_function("design_matrix/2000_toas", |b| {
        let mut free = model.clone();
        free.set_free(&["F0", "F1", "DM", "A1", "PB", "TASC"]).expect("free");
        b.iter(|| black_box(pf.design_matrix(black_box(&toas), &free).expect("design matrix")))
    });
}

fn bench_fit(c: &mut Criterion) {
    let pf = Pulsefit::new(TimingData::barycentric_only());
    let truth = binary_pulsar();
    let toas = noisy_batch(&pf, &truth, 500);

    let mut start = truth.clone();
    start.params_mut().shift("F0", 2e-10).expect("shift F0");
    start.params_mut().shift("A1", 3e-6).expect("shift A1");
    start
        .set_free(&["F0", "F1", "DM", "A1", "PB", "TASC", "EPS1", "EPS2"])
        .expect("free");
    let params = FitParams::default();

    c.bench_function("fit/linearized_500_toas", |b| {
        b.iter_batched(
            || start.clone(),
            |mut model| black_box(pf.fit(&toas, &mut model, &params).ok()),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_residuals, bench_fit);
criterion_main!(benches);
