use crate::error::ConfigurationError;
use crate::prior::ln_prior_1d::{LnPrior1D, LnPrior1DTrait};
use crate::scene::Scene;

use enum_dispatch::enum_dispatch;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

#[enum_dispatch]
pub trait LnPriorTrait: Clone + Debug + Serialize + DeserializeOwned {
    /// Log-density of the flat parameter vector
    ///
    /// If `grad` is `Some`, d(ln_prior)/d(theta) is added to it.
    fn ln_density(&self, theta: &[f64], grad: Option<&mut [f64]>) -> f64;

    /// Check the prior against a scene of `ndim` parameters
    fn validate(&self, ndim: usize) -> Result<(), ConfigurationError>;
}

/// Smooth log-prior over the flat parameter vector
///
/// The penalty is added to the likelihood inside the hard prior bounds and never replaces
/// them: a point outside the bounds is infeasible whatever the penalty says.
#[enum_dispatch(LnPriorTrait)]
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum LnPrior {
    None(NoneLnPrior),
    Independent(IndependentLnPrior),
}

impl LnPrior {
    pub fn none() -> Self {
        NoneLnPrior {}.into()
    }

    pub fn independent(components: Vec<LnPrior1D>) -> Self {
        IndependentLnPrior { components }.into()
    }

    /// The same per-source block for every source of `scene`
    ///
    /// `block` follows the per-source layout `[flux per filter.., x, y, q, pa, n, rh]`.
    pub fn per_source(scene: &Scene, block: &[LnPrior1D]) -> Result<Self, ConfigurationError> {
        if block.len() != scene.params_per_source() {
            return Err(ConfigurationError::LengthMismatch {
                what: "per-source prior block",
                actual: block.len(),
                expected: scene.params_per_source(),
            });
        }
        Ok(Self::independent(
            std::iter::repeat_n(block, scene.nsources())
                .flatten()
                .cloned()
                .collect(),
        ))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None(_))
    }
}

impl Default for LnPrior {
    fn default() -> Self {
        Self::none()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub struct NoneLnPrior {}

impl LnPriorTrait for NoneLnPrior {
    fn ln_density(&self, _theta: &[f64], _grad: Option<&mut [f64]>) -> f64 {
        0.0
    }

    fn validate(&self, _ndim: usize) -> Result<(), ConfigurationError> {
        Ok(())
    }
}

/// Independent one-dimensional priors, one per parameter
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub struct IndependentLnPrior {
    pub components: Vec<LnPrior1D>,
}

impl LnPriorTrait for IndependentLnPrior {
    fn ln_density(&self, theta: &[f64], grad: Option<&mut [f64]>) -> f64 {
        let mut grad = grad;
        let mut total = 0.0;
        for (i, (prior, &x)) in self.components.iter().zip(theta).enumerate() {
            let mut derivative = 0.0;
            total += prior.ln_density(x, grad.is_some().then_some(&mut derivative));
            if let Some(grad) = grad.as_deref_mut() {
                grad[i] += derivative;
            }
        }
        total
    }

    fn validate(&self, ndim: usize) -> Result<(), ConfigurationError> {
        if self.components.len() != ndim {
            return Err(ConfigurationError::LengthMismatch {
                what: "prior components",
                actual: self.components.len(),
                expected: ndim,
            });
        }
        self.components.iter().try_for_each(|prior| prior.validate())
    }
}
