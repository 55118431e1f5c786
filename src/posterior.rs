//! Bounded posterior adapter shared by every sampler backend

use crate::bounds::PriorBounds;
use crate::error::{ConfigurationError, LogpError};
use crate::forward_model::{ForwardModel, RenderedImage};
use crate::plan::WorkPlan;
use crate::prior::{LnPrior, LnPriorTrait};
use crate::scene::Scene;

use log::warn;
use ndarray::Array1;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Which party enforces the prior bounds
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum BoundsConvention {
    /// The sampler sees an unbounded space, the adapter alone rejects points outside the
    /// bounds
    #[default]
    Internal,
    /// The sampler is given the true bounds and changes variables itself (unit-cube transform
    /// or boundary reflection); the adapter still rejects points outside them
    SamplerTransform,
}

/// Log-density target driven by the samplers
///
/// Points outside the support evaluate to `Ok(f64::NEG_INFINITY)` with a zero gradient.
/// `Err` is reserved for non-finite values inside the support. Every evaluation call,
/// feasible or not, increases [LogDensity::ncall] by exactly one.
pub trait LogDensity {
    fn dim(&self) -> usize;

    fn convention(&self) -> BoundsConvention;

    /// Bounds the sampler works with under [LogDensity::convention]
    fn sampler_bounds(&self) -> PriorBounds;

    fn log_density(&mut self, theta: &[f64]) -> Result<f64, LogpError>;

    /// Log-density with its gradient written to `grad`
    fn log_density_and_gradient(
        &mut self,
        theta: &[f64],
        grad: &mut [f64],
    ) -> Result<f64, LogpError>;

    /// Number of evaluations since construction or the last [LogDensity::reset_ncall]
    fn ncall(&self) -> u64;

    /// Reset the evaluation counter, returning its previous value
    fn reset_ncall(&mut self) -> u64;
}

/// Parts of a [BoundedPosterior] given back by [BoundedPosterior::into_parts]
#[derive(Debug)]
pub struct PosteriorParts<M> {
    pub model: M,
    pub scene: Scene,
    pub plans: Vec<WorkPlan>,
    pub bounds: PriorBounds,
    pub convention: BoundsConvention,
    pub ln_prior: LnPrior,
}

/// Forward-model likelihood summed over exposures, restricted to the prior bounds
#[derive(Debug)]
pub struct BoundedPosterior<M> {
    model: M,
    scene: Scene,
    plans: Vec<WorkPlan>,
    bounds: PriorBounds,
    convention: BoundsConvention,
    ln_prior: LnPrior,
    ncall: u64,
}

impl<M> BoundedPosterior<M>
where
    M: ForwardModel,
{
    pub fn new(
        model: M,
        scene: Scene,
        plans: Vec<WorkPlan>,
        bounds: PriorBounds,
        convention: BoundsConvention,
    ) -> Result<Self, ConfigurationError> {
        if bounds.dim() != scene.ndim() {
            return Err(ConfigurationError::LengthMismatch {
                what: "prior bounds",
                actual: bounds.dim(),
                expected: scene.ndim(),
            });
        }
        for plan in plans.iter() {
            scene.filter_index(plan.stamp().filter())?;
        }
        Ok(Self {
            model,
            scene,
            plans,
            bounds,
            convention,
            ln_prior: LnPrior::none(),
            ncall: 0,
        })
    }

    /// Add a smooth prior penalty inside the bounds
    pub fn with_ln_prior(self, ln_prior: LnPrior) -> Result<Self, ConfigurationError> {
        ln_prior.validate(self.scene.ndim())?;
        Ok(Self { ln_prior, ..self })
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn plans(&self) -> &[WorkPlan] {
        &self.plans
    }

    pub fn bounds(&self) -> &PriorBounds {
        &self.bounds
    }

    pub fn ln_prior(&self) -> &LnPrior {
        &self.ln_prior
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Gradient of the log-density, zero outside the support
    pub fn log_density_gradient(&mut self, theta: &[f64]) -> Result<Array1<f64>, LogpError> {
        let mut grad = vec![0.0; theta.len()];
        self.log_density_and_gradient(theta, &mut grad)?;
        Ok(grad.into())
    }

    /// Model images of every plan's stamp, does not count as an evaluation
    pub fn render(&self, theta: &[f64]) -> Result<Vec<RenderedImage>, ConfigurationError> {
        self.scene.check_theta(theta)?;
        Ok(self
            .plans
            .iter()
            .map(|plan| self.model.render(&self.scene, plan.stamp(), theta, false))
            .collect())
    }

    pub fn into_parts(self) -> PosteriorParts<M> {
        PosteriorParts {
            model: self.model,
            scene: self.scene,
            plans: self.plans,
            bounds: self.bounds,
            convention: self.convention,
            ln_prior: self.ln_prior,
        }
    }

    /// Shape errors are returned before the call is counted
    fn evaluate(&mut self, theta: &[f64], mut grad: Option<&mut [f64]>) -> Result<f64, LogpError> {
        self.scene.check_theta(theta)?;
        if let Some(grad) = grad.as_deref() {
            if grad.len() != theta.len() {
                return Err(ConfigurationError::LengthMismatch {
                    what: "gradient buffer",
                    actual: grad.len(),
                    expected: theta.len(),
                }
                .into());
            }
        }
        self.ncall += 1;
        if let Some(grad) = grad.as_deref_mut() {
            grad.fill(0.0);
        }
        if !self.bounds.contains(theta) {
            return Ok(f64::NEG_INFINITY);
        }

        let ln_prior = self.ln_prior.ln_density(theta, grad.as_deref_mut());
        if ln_prior == f64::NEG_INFINITY {
            if let Some(grad) = grad {
                grad.fill(0.0);
            }
            return Ok(f64::NEG_INFINITY);
        }
        let mut total = ln_prior;
        for plan in self.plans.iter_mut() {
            total += self
                .model
                .ln_likelihood(&self.scene, plan, theta, grad.as_deref_mut());
        }

        let finite_grad = grad.is_none_or(|grad| grad.iter().all(|g| g.is_finite()));
        if total.is_finite() && finite_grad {
            Ok(total)
        } else {
            warn!("non-finite log-density or gradient at {theta:?}");
            Err(LogpError::NonFinite {
                theta: theta.to_vec(),
            })
        }
    }
}

impl<M> LogDensity for BoundedPosterior<M>
where
    M: ForwardModel,
{
    fn dim(&self) -> usize {
        self.scene.ndim()
    }

    fn convention(&self) -> BoundsConvention {
        self.convention
    }

    fn sampler_bounds(&self) -> PriorBounds {
        match self.convention {
            BoundsConvention::Internal => PriorBounds::unbounded(self.dim()),
            BoundsConvention::SamplerTransform => self.bounds.clone(),
        }
    }

    fn log_density(&mut self, theta: &[f64]) -> Result<f64, LogpError> {
        self.evaluate(theta, None)
    }

    fn log_density_and_gradient(
        &mut self,
        theta: &[f64],
        grad: &mut [f64],
    ) -> Result<f64, LogpError> {
        self.evaluate(theta, Some(grad))
    }

    fn ncall(&self) -> u64 {
        self.ncall
    }

    fn reset_ncall(&mut self) -> u64 {
        std::mem::take(&mut self.ncall)
    }
}
