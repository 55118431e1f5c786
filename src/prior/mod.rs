//! Smooth log-prior penalties added to the likelihood inside the prior bounds

mod ln_prior;
pub use ln_prior::{IndependentLnPrior, LnPrior, LnPriorTrait, NoneLnPrior};

mod ln_prior_1d;
pub use ln_prior_1d::{
    LnPrior1D, LnPrior1DTrait, LogNormalLnPrior1D, NoneLnPrior1D, NormalLnPrior1D,
};
