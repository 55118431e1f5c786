use ndarray::{Array2, Array3, Axis};
use sersic_posterior::{ForwardModel, RenderedImage, Scene, Stamp, WorkPlan};
use std::f64::consts::PI;

/// Elliptical Gaussian stand-in for a Sersic renderer
///
/// Every source is a 2-d Gaussian with major-axis width `rh * pixels_per_rh`, axis ratio `q`
/// and position angle `pa` counted from the pixel x axis, convolved analytically with the
/// stamp's PSF mixture. The Sersic index is ignored. Positions are mapped to pixels with the
/// stamp's coordinate frame. Gradients are central finite differences with the absolute step
/// `step`, which suits pixel-frame scenes.
#[derive(Clone, Debug)]
pub struct EllipticalBlob {
    pub pixels_per_rh: f64,
    pub step: f64,
}

impl EllipticalBlob {
    pub fn new(pixels_per_rh: f64) -> Self {
        Self {
            pixels_per_rh,
            step: 1e-5,
        }
    }

    pub fn image(&self, scene: &Scene, stamp: &Stamp, theta: &[f64]) -> Array2<f64> {
        let mut image = Array2::zeros(stamp.shape());
        let Ok(filter) = scene.filter_index(stamp.filter()) else {
            return image;
        };
        let nfilters = scene.filters().len();
        let psf = stamp.psf();
        for i in 0..scene.nsources() {
            let params = &theta[scene.source_range(i)];
            let flux = params[filter];
            let &[x, y, q, pa, _n, rh] = &params[nfilters..] else {
                continue;
            };
            let [x0, y0] = stamp.sky_to_pix([x, y]);
            let s2 = (rh * self.pixels_per_rh).powi(2);
            let (major, minor) = (s2, q.powi(2) * s2);
            let (sin, cos) = pa.sin_cos();
            let galaxy = [
                [major * cos * cos + minor * sin * sin, (major - minor) * sin * cos],
                [(major - minor) * sin * cos, major * sin * sin + minor * cos * cos],
            ];
            for ((&amplitude, mean), cov) in psf
                .amplitudes
                .iter()
                .zip(psf.means.iter())
                .zip(psf.covariances.iter())
            {
                let c = [
                    [galaxy[0][0] + cov[0][0], galaxy[0][1] + cov[0][1]],
                    [galaxy[1][0] + cov[1][0], galaxy[1][1] + cov[1][1]],
                ];
                let det = c[0][0] * c[1][1] - c[0][1] * c[1][0];
                if !(det > 0.0) {
                    continue;
                }
                let norm = amplitude * flux / (2.0 * PI * det.sqrt());
                let (mx, my) = (x0 + mean[0], y0 + mean[1]);
                for ((row, column), value) in image.indexed_iter_mut() {
                    let dx = column as f64 - mx;
                    let dy = row as f64 - my;
                    let chi2 = (c[1][1] * dx * dx - 2.0 * c[0][1] * dx * dy + c[0][0] * dy * dy) / det;
                    *value += norm * (-0.5 * chi2).exp();
                }
            }
        }
        image
    }
}

impl ForwardModel for EllipticalBlob {
    fn render(
        &self,
        scene: &Scene,
        stamp: &Stamp,
        theta: &[f64],
        with_gradient: bool,
    ) -> RenderedImage {
        let image = self.image(scene, stamp, theta);
        if !with_gradient {
            return RenderedImage::new(image);
        }
        let (rows, columns) = stamp.shape();
        let mut gradient = Array3::zeros((theta.len(), rows, columns));
        let mut shifted = theta.to_vec();
        for (i, mut dimage) in gradient.axis_iter_mut(Axis(0)).enumerate() {
            shifted[i] = theta[i] + self.step;
            let upper = self.image(scene, stamp, &shifted);
            shifted[i] = theta[i] - self.step;
            let lower = self.image(scene, stamp, &shifted);
            shifted[i] = theta[i];
            dimage.assign(&((upper - lower) / (2.0 * self.step)));
        }
        RenderedImage::with_gradient(image, gradient)
    }
}

/// Independent normal likelihood that ignores the pixels
///
/// Rendered images are blank, the log-likelihood `-Σ ((θ - mean) / sigma)² / 2` is contributed
/// once per plan with its analytic gradient.
#[derive(Clone, Debug)]
pub struct AnalyticGaussian {
    pub mean: Vec<f64>,
    pub sigma: Vec<f64>,
}

impl AnalyticGaussian {
    pub fn new(mean: Vec<f64>, sigma: Vec<f64>) -> Self {
        assert_eq!(mean.len(), sigma.len());
        Self { mean, sigma }
    }
}

impl ForwardModel for AnalyticGaussian {
    fn render(
        &self,
        _scene: &Scene,
        stamp: &Stamp,
        theta: &[f64],
        with_gradient: bool,
    ) -> RenderedImage {
        let (rows, columns) = stamp.shape();
        let image = Array2::zeros((rows, columns));
        if with_gradient {
            RenderedImage::with_gradient(image, Array3::zeros((theta.len(), rows, columns)))
        } else {
            RenderedImage::new(image)
        }
    }

    fn ln_likelihood(
        &self,
        _scene: &Scene,
        _plan: &mut WorkPlan,
        theta: &[f64],
        grad: Option<&mut [f64]>,
    ) -> f64 {
        let mut grad = grad;
        let mut ln_like = 0.0;
        for (i, ((&x, &mu), &sigma)) in theta
            .iter()
            .zip(self.mean.iter())
            .zip(self.sigma.iter())
            .enumerate()
        {
            let z = (x - mu) / sigma;
            ln_like -= 0.5 * z * z;
            if let Some(grad) = grad.as_deref_mut() {
                grad[i] -= z / sigma;
            }
        }
        ln_like
    }
}
