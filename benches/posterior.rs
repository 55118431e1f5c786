use criterion::Criterion;
use sersic_posterior::{BoundsConvention, LogDensity};
use sersic_posterior_test_util::{prepare_catalog_scene, single_blob_scene};
use std::hint::black_box;

pub fn bench_log_density(c: &mut Criterion) {
    let scenes = [
        ("one source, one filter", single_blob_scene(0)),
        (
            "two sources, two filters",
            prepare_catalog_scene(&["F090W", "F200W"], 0.02, 0),
        ),
    ];
    for (name, prepared) in scenes.iter() {
        let mut posterior = prepared.posterior(prepared.model(), BoundsConvention::Internal);
        let theta = prepared.theta0().to_vec();
        let mut grad = vec![0.0; theta.len()];
        c.bench_function(format!("Log-density: {name}").as_str(), |b| {
            b.iter(|| posterior.log_density(black_box(&theta)));
        });
        c.bench_function(format!("Log-density and gradient: {name}").as_str(), |b| {
            b.iter(|| posterior.log_density_and_gradient(black_box(&theta), &mut grad));
        });
    }
}
