//! Seam to the image renderer and per-exposure likelihood
//!
//! Image synthesis lives outside this crate: a renderer is plugged in by implementing
//! [ForwardModel]. Both methods must be pure functions of `theta` for a fixed scene and plan,
//! apart from the plan's reusable buffers.

use crate::plan::WorkPlan;
use crate::scene::Scene;
use crate::stamp::Stamp;

use ndarray::{Array2, Array3, Axis, Zip};
use std::fmt::Debug;

/// Model image of a stamp with optional per-parameter derivatives
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedImage {
    pub image: Array2<f64>,
    /// `d image / d theta_k` stacked along the first axis, `(ndim, rows, columns)`
    pub gradient: Option<Array3<f64>>,
}

impl RenderedImage {
    pub fn new(image: Array2<f64>) -> Self {
        Self {
            image,
            gradient: None,
        }
    }

    pub fn with_gradient(image: Array2<f64>, gradient: Array3<f64>) -> Self {
        Self {
            image,
            gradient: Some(gradient),
        }
    }
}

pub trait ForwardModel: Debug {
    /// Render the scene described by `theta` into the pixel grid of `stamp`
    ///
    /// `gradient` must be filled when `with_gradient` is true.
    fn render(
        &self,
        scene: &Scene,
        stamp: &Stamp,
        theta: &[f64],
        with_gradient: bool,
    ) -> RenderedImage;

    /// Log-likelihood of a single exposure
    ///
    /// If `grad` is `Some`, d(ln_likelihood)/d(theta) is added to it. The default implementation
    /// renders the model image and compares it to the stamp through [WorkPlan]; a missing
    /// rendered gradient poisons `grad` with NaN.
    fn ln_likelihood(
        &self,
        scene: &Scene,
        plan: &mut WorkPlan,
        theta: &[f64],
        grad: Option<&mut [f64]>,
    ) -> f64 {
        let rendered = self.render(scene, plan.stamp(), theta, grad.is_some());
        let ln_like = plan.ln_likelihood_from_model(&rendered.image);
        if let Some(grad) = grad {
            let (Some(dmodel), Some(residual)) = (&rendered.gradient, plan.residual()) else {
                grad.fill(f64::NAN);
                return ln_like;
            };
            let (rows, columns) = plan.stamp().shape();
            if ln_like.is_nan() || dmodel.dim() != (grad.len(), rows, columns) {
                grad.fill(f64::NAN);
                return ln_like;
            }
            // d(-chi2/2)/d(model) = residual * ierr
            let weight = residual * plan.stamp().ierr();
            for (g, dmodel_k) in grad.iter_mut().zip(dmodel.axis_iter(Axis(0))) {
                *g += Zip::from(&weight)
                    .and(&dmodel_k)
                    .fold(0.0, |acc, &w, &dm| acc + w * dm);
            }
        }
        ln_like
    }
}
