use crate::catalog_data::SYNTHETIC_CATALOG_ROWS;
use crate::models::EllipticalBlob;

use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use sersic_posterior::{
    Astrometry, BackgroundEstimate, BoundedPosterior, BoundsConvention, ForwardModel, PriorBounds,
    PsfMixture, Scene, SceneConfig, Source, Stamp, WorkPlan, proposal_scales, select_scene,
};

/// Catalog plate scale, arcsec per pixel
pub const PLATE_SCALE_ARCSEC: f64 = 0.03;

const PIXELS_PER_DEGREE: f64 = 3600.0 / PLATE_SCALE_ARCSEC;
const STAMP_SIDE: usize = 32;

/// Scene prepared for fitting in the pixel frame, with the data simulated at `truths`
#[derive(Clone, Debug)]
pub struct PreparedScene {
    pub scene: Scene,
    pub plans: Vec<WorkPlan>,
    pub bounds: PriorBounds,
    pub proposal_scales: Array1<f64>,
    pub truths: Array1<f64>,
}

impl PreparedScene {
    /// Initial vector: the catalog values
    pub fn theta0(&self) -> Array1<f64> {
        self.scene.theta()
    }

    /// Renderer the data were simulated with
    pub fn model(&self) -> EllipticalBlob {
        EllipticalBlob::new(1.0 / PLATE_SCALE_ARCSEC)
    }

    pub fn posterior<M: ForwardModel>(
        &self,
        model: M,
        convention: BoundsConvention,
    ) -> BoundedPosterior<M> {
        BoundedPosterior::new(
            model,
            self.scene.clone(),
            self.plans.clone(),
            self.bounds.clone(),
            convention,
        )
        .unwrap()
    }
}

fn sky_astrometry() -> Astrometry {
    Astrometry::new(
        [[-PIXELS_PER_DEGREE, 0.0], [0.0, PIXELS_PER_DEGREE]],
        [53.1, -27.8],
        [16.0, 16.0],
    )
}

/// Shift every source off its catalog values so that the fit has something to recover
fn perturbed(scene: &Scene) -> Scene {
    let sources = scene
        .sources()
        .iter()
        .map(|source| Source {
            flux: source.flux.iter().map(|flux| 0.9 * flux).collect(),
            ..source.with_position(source.x + 0.3, source.y - 0.2)
        })
        .collect();
    Scene::new(scene.filters().to_vec(), sources).unwrap()
}

/// Simulate one stamp per filter and take the scene through the preparation steps: background
/// subtraction, conversion of positions to pixels, bounds and proposal scales
fn prepare(
    sky_scene: Scene,
    noise_sigma: f64,
    background: f64,
    seed: u64,
) -> PreparedScene {
    let model = EllipticalBlob::new(1.0 / PLATE_SCALE_ARCSEC);
    let config = SceneConfig::default();
    let psf = PsfMixture::gaussian(1.2);
    let shape = (STAMP_SIDE, STAMP_SIDE);
    let ierr = Array2::from_elem(shape, 1.0 / noise_sigma);

    let blank =
        Stamp::new("blank", Array2::zeros(shape), ierr.clone(), psf.clone(), sky_astrometry())
            .unwrap();
    let scene = sky_scene.to_pixel_frame(&blank).unwrap();
    let truth_scene = perturbed(&scene);
    let truths = truth_scene.theta();

    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(background, noise_sigma).unwrap();
    let plans = scene
        .filters()
        .iter()
        .map(|filter| {
            let pixel_blank = Stamp::new(
                filter.as_str(),
                Array2::zeros(shape),
                ierr.clone(),
                psf.clone(),
                sky_astrometry(),
            )
            .unwrap()
            .into_pixel_frame()
            .unwrap();
            let mut data = model.image(&truth_scene, &pixel_blank, truths.as_slice().unwrap());
            data.mapv_inplace(|x| x + noise.sample(&mut rng));
            let stamp = Stamp::new(filter.as_str(), data, ierr.clone(), psf.clone(), sky_astrometry())
                .unwrap()
                .subtract_background(BackgroundEstimate::MedianOfFirstRows(5))
                .unwrap()
                .into_pixel_frame()
                .unwrap();
            WorkPlan::new(stamp)
        })
        .collect();

    let bounds = PriorBounds::from_scene(&scene, 1.0, &config).unwrap();
    let proposal_scales = proposal_scales(&scene, 1.0, &config).unwrap();
    PreparedScene {
        scene,
        plans,
        bounds,
        proposal_scales,
        truths,
    }
}

/// Two neighbouring catalog sources observed in every filter of `filters`
pub fn prepare_catalog_scene(filters: &[&str], noise_sigma: f64, seed: u64) -> PreparedScene {
    let rows = &*SYNTHETIC_CATALOG_ROWS;
    let selected = select_scene(rows, &rows[0], 1e-4, 1e-4);
    let filters = filters.iter().map(|&filter| filter.to_owned()).collect();
    let sky_scene = Scene::from_catalog(&selected, filters, &SceneConfig::default()).unwrap();
    prepare(sky_scene, noise_sigma, 0.05, seed)
}

/// One round source in a single filter, the cheapest realistic posterior
pub fn single_blob_scene(seed: u64) -> PreparedScene {
    let sky_scene = Scene::new(
        vec!["F200W".into()],
        vec![Source::from_tuple(6.0, 53.1, -27.8, 0.8, 0.3, 2.0, 0.06)],
    )
    .unwrap();
    prepare(sky_scene, 0.01, 0.0, seed)
}
