use crate::error::ConfigurationError;

use enum_dispatch::enum_dispatch;
use ordered_float::NotNan;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::fmt::Debug;
use std::hash::Hash;

#[enum_dispatch]
pub trait LnPrior1DTrait:
    Clone + Debug + Serialize + DeserializeOwned + PartialEq + Eq + Hash
{
    /// Log-density of a single parameter, its derivative is written to `grad`
    fn ln_density(&self, x: f64, grad: Option<&mut f64>) -> f64;

    /// Check the distribution parameters, called before the prior is attached to a posterior
    fn validate(&self) -> Result<(), ConfigurationError>;
}

/// Smooth prior of one component of the parameter vector
#[enum_dispatch(LnPrior1DTrait)]
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum LnPrior1D {
    None(NoneLnPrior1D),
    Normal(NormalLnPrior1D),
    LogNormal(LogNormalLnPrior1D),
}

impl LnPrior1D {
    pub fn none() -> Self {
        NoneLnPrior1D {}.into()
    }

    /// Normal prior, the mean must be finite and the width positive
    pub fn normal(mu: f64, sigma: f64) -> Result<Self, ConfigurationError> {
        let prior = NormalLnPrior1D {
            mu: not_nan("normal prior mean", mu)?,
            sigma: not_nan("normal prior width", sigma)?,
        };
        prior.validate()?;
        Ok(prior.into())
    }

    /// Log-normal prior: `ln x` is normal with mean `ln_mu` and deviation `ln_sigma`
    pub fn log_normal(ln_mu: f64, ln_sigma: f64) -> Result<Self, ConfigurationError> {
        let prior = LogNormalLnPrior1D {
            ln_mu: not_nan("log-normal prior mean", ln_mu)?,
            ln_sigma: not_nan("log-normal prior width", ln_sigma)?,
        };
        prior.validate()?;
        Ok(prior.into())
    }
}

fn not_nan(what: &str, x: f64) -> Result<NotNan<f64>, ConfigurationError> {
    NotNan::new(x)
        .map_err(|_| ConfigurationError::InvalidSetting(format!("{what} must not be NaN")))
}

fn check_normal(what: &str, mu: NotNan<f64>, sigma: NotNan<f64>) -> Result<(), ConfigurationError> {
    let (mu, sigma) = (mu.into_inner(), sigma.into_inner());
    if !mu.is_finite() {
        return Err(ConfigurationError::InvalidSetting(format!(
            "{what} prior mean must be finite, got {mu}"
        )));
    }
    if sigma.is_finite() && sigma > 0.0 {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidSetting(format!(
            "{what} prior width must be positive and finite, got {sigma}"
        )))
    }
}

/// `ln N(x | mu, sigma)` and its derivative over `x`
fn normal_ln_pdf(x: f64, mu: f64, sigma: f64) -> (f64, f64) {
    let z = (x - mu) / sigma;
    (-0.5 * z * z - sigma.ln() - 0.5 * TAU.ln(), -z / sigma)
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub struct NoneLnPrior1D {}

impl LnPrior1DTrait for NoneLnPrior1D {
    fn ln_density(&self, _x: f64, grad: Option<&mut f64>) -> f64 {
        if let Some(grad) = grad {
            *grad = 0.0;
        }
        0.0
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub struct NormalLnPrior1D {
    pub mu: NotNan<f64>,
    pub sigma: NotNan<f64>,
}

impl LnPrior1DTrait for NormalLnPrior1D {
    fn ln_density(&self, x: f64, grad: Option<&mut f64>) -> f64 {
        let (ln_p, derivative) = normal_ln_pdf(x, self.mu.into_inner(), self.sigma.into_inner());
        if let Some(grad) = grad {
            *grad = derivative;
        }
        ln_p
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        check_normal("normal", self.mu, self.sigma)
    }
}

/// Density over `x > 0`, useful for fluxes and radii
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub struct LogNormalLnPrior1D {
    pub ln_mu: NotNan<f64>,
    pub ln_sigma: NotNan<f64>,
}

impl LnPrior1DTrait for LogNormalLnPrior1D {
    fn ln_density(&self, x: f64, grad: Option<&mut f64>) -> f64 {
        if !(x > 0.0) {
            if let Some(grad) = grad {
                *grad = 0.0;
            }
            return f64::NEG_INFINITY;
        }
        let ln_x = x.ln();
        let (ln_p, derivative) =
            normal_ln_pdf(ln_x, self.ln_mu.into_inner(), self.ln_sigma.into_inner());
        // change of variables from ln x to x
        if let Some(grad) = grad {
            *grad = (derivative - 1.0) / x;
        }
        ln_p - ln_x
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        check_normal("log-normal", self.ln_mu, self.ln_sigma)
    }
}
