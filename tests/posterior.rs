use approx::assert_abs_diff_eq;
use ndarray::{Array1, Array2};
use sersic_posterior::*;
use sersic_posterior_test_util::*;
use std::f64::consts::FRAC_PI_2;

fn analytic_model(prepared: &PreparedScene) -> AnalyticGaussian {
    let sigma = prepared.bounds.width().mapv(|w| w / 20.0);
    AnalyticGaussian::new(prepared.theta0().to_vec(), sigma.to_vec())
}

#[test]
fn bounds_of_example_scene() {
    let scene = Scene::new(
        vec!["F090W".into()],
        vec![Source::from_tuple(10.0, 20.0, 20.0, 0.8, 0.3, 2.5, 0.05)],
    )
    .unwrap();
    let bounds = PriorBounds::from_scene(&scene, 0.05, &SceneConfig::default()).unwrap();
    let expected_lower = [0.0, 19.85, 19.85, 0.3, -FRAC_PI_2, 1.2, 0.015];
    let expected_upper = [12.0, 20.15, 20.15, 1.0, FRAC_PI_2, 5.0, 0.12];
    for (actual, expected) in bounds.lower().iter().zip(expected_lower) {
        assert_abs_diff_eq!(*actual, expected, epsilon = 1e-12);
    }
    for (actual, expected) in bounds.upper().iter().zip(expected_upper) {
        assert_abs_diff_eq!(*actual, expected, epsilon = 1e-12);
    }
    assert!(bounds.contains(scene.theta().as_slice().unwrap()));
}

#[test]
fn catalog_scene_is_prepared_in_pixel_frame() {
    let prepared = prepare_catalog_scene(&["F090W", "F200W"], 0.02, 0);
    assert_eq!(prepared.scene.nsources(), 2);
    assert_eq!(prepared.scene.ndim(), 2 * 8);
    assert_eq!(prepared.plans.len(), 2);
    for plan in prepared.plans.iter() {
        assert!(plan.stamp().frame().is_pixel());
        assert!(plan.stamp().subtracted_background() > 0.0);
    }
    let x0 = prepared.scene.sources()[0].x;
    let y0 = prepared.scene.sources()[0].y;
    assert_abs_diff_eq!(x0, 16.0, epsilon = 1e-6);
    assert_abs_diff_eq!(y0, 16.0, epsilon = 1e-6);
    assert!(prepared.bounds.contains(prepared.theta0().as_slice().unwrap()));
    assert_eq!(prepared.proposal_scales.len(), prepared.scene.ndim());
}

#[test]
fn unbiased_inside_bounds() {
    let prepared = single_blob_scene(0);
    let model = analytic_model(&prepared);
    let mut posterior = prepared.posterior(model.clone(), BoundsConvention::Internal);
    let mut theta = prepared.theta0();
    theta[0] += 0.1;
    theta[1] -= 0.05;
    let z0 = 0.1 / model.sigma[0];
    let z1 = 0.05 / model.sigma[1];
    let expected = -0.5 * (z0 * z0 + z1 * z1);
    let ln_p = posterior.log_density(theta.as_slice().unwrap()).unwrap();
    assert_abs_diff_eq!(ln_p, expected, epsilon = 1e-12);
}

#[test]
fn outside_bounds_is_infeasible() {
    let prepared = single_blob_scene(0);
    let mut posterior = prepared.posterior(prepared.model(), BoundsConvention::Internal);
    let mut theta = prepared.theta0();
    theta[0] = -1.0;
    let ln_p = posterior.log_density(theta.as_slice().unwrap()).unwrap();
    assert_eq!(ln_p, f64::NEG_INFINITY);
    let grad = posterior
        .log_density_gradient(theta.as_slice().unwrap())
        .unwrap();
    assert!(grad.iter().all(|&g| g == 0.0));
    assert_eq!(posterior.ncall(), 2);
}

#[test]
fn repeated_evaluation_is_identical() {
    let prepared = single_blob_scene(1);
    let mut posterior = prepared.posterior(prepared.model(), BoundsConvention::Internal);
    let theta = prepared.theta0();
    let first = posterior.log_density(theta.as_slice().unwrap()).unwrap();
    let second = posterior.log_density(theta.as_slice().unwrap()).unwrap();
    assert_eq!(first, second);
    assert_eq!(posterior.ncall(), 2);
    assert_eq!(posterior.reset_ncall(), 2);
    assert_eq!(posterior.ncall(), 0);
}

#[test]
fn truths_are_more_probable_than_catalog_values() {
    let prepared = single_blob_scene(2);
    let mut posterior = prepared.posterior(prepared.model(), BoundsConvention::Internal);
    let at_truths = posterior
        .log_density(prepared.truths.as_slice().unwrap())
        .unwrap();
    let at_catalog = posterior
        .log_density(prepared.theta0().as_slice().unwrap())
        .unwrap();
    assert!(at_truths > at_catalog, "{at_truths} <= {at_catalog}");
}

#[test]
fn gradient_matches_finite_differences() {
    let prepared = prepare_catalog_scene(&["F200W"], 0.02, 3);
    let mut posterior = prepared.posterior(prepared.model(), BoundsConvention::Internal);
    let theta = prepared.theta0();
    let grad = posterior
        .log_density_gradient(theta.as_slice().unwrap())
        .unwrap();
    let h = 1e-4;
    for i in 0..theta.len() {
        let mut shifted = theta.clone();
        shifted[i] = theta[i] + h;
        let upper = posterior.log_density(shifted.as_slice().unwrap()).unwrap();
        shifted[i] = theta[i] - h;
        let lower = posterior.log_density(shifted.as_slice().unwrap()).unwrap();
        let numeric = (upper - lower) / (2.0 * h);
        let tolerance = 1e-3 * numeric.abs().max(1.0);
        assert!(
            (grad[i] - numeric).abs() < tolerance,
            "parameter {i}: {} vs {numeric}",
            grad[i]
        );
    }
}

#[test]
fn prior_transform_round_trip() {
    let prepared = single_blob_scene(0);
    let u = Array1::linspace(0.05, 0.95, prepared.bounds.dim());
    let theta = prepared.bounds.prior_transform(u.as_slice().unwrap());
    assert!(prepared.bounds.contains(theta.as_slice().unwrap()));
    let restored = prepared
        .bounds
        .inverse_prior_transform(theta.as_slice().unwrap());
    for (a, b) in restored.iter().zip(u.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
    }
}

#[test]
fn masked_pixels_do_not_contribute() {
    let prepared = single_blob_scene(4);
    let stamp = prepared.plans[0].stamp();
    let mut pixels = stamp.pixel_values().clone();
    pixels[(0, 0)] = f64::NAN;
    let mut ierr: Array2<f64> = stamp.ierr().clone();
    ierr[(0, 1)] = 0.0;
    let masked = Stamp::new(
        stamp.filter(),
        pixels,
        ierr,
        stamp.psf().clone(),
        Astrometry::identity(),
    )
    .unwrap()
    .into_pixel_frame()
    .unwrap();
    let plan = WorkPlan::new(masked);
    assert_eq!(plan.npixels(), prepared.plans[0].npixels() - 2);

    let mut posterior = BoundedPosterior::new(
        prepared.model(),
        prepared.scene.clone(),
        vec![plan],
        prepared.bounds.clone(),
        BoundsConvention::Internal,
    )
    .unwrap();
    let ln_p = posterior
        .log_density(prepared.theta0().as_slice().unwrap())
        .unwrap();
    assert!(ln_p.is_finite());
}
