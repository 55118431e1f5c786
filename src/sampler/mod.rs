//! Posterior sampler backends
//!
//! Every backend drives a [LogDensity] through the same two-phase contract: [PosteriorSamplerTrait::warm_up]
//! tunes the backend from the initial vector, [PosteriorSamplerTrait::sample] produces the
//! draws. [PosteriorSamplerTrait::run] chains both and records per-phase evaluation counts and
//! wall-clock time.
//!
//! Backends differ in how they react to evaluations that fail inside the support:
//! gradient-based backends treat them as divergent transitions and reject the proposal, the
//! nested sampler discards the candidate point. A failed evaluation at the initial vector
//! aborts the run before any sampling.

use crate::error::{ConfigurationError, LogpError, SamplerError};
use crate::posterior::{BoundsConvention, LogDensity};

use enum_dispatch::enum_dispatch;
use ndarray::{Array1, Array2};
use rand::Rng;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::{Duration, Instant};

pub mod hmc;
pub use hmc::{BasicHmcSampler, HmcWarmup, TrajectoryStorage};

mod leapfrog;

pub mod metric;
pub use metric::DiagMetric;

pub mod nested;
pub use nested::{NestedSampler, NestedWarmup};

pub mod nuts;
pub use nuts::{NutsSampler, NutsWarmup};

mod step_size;

/// Phase of a single inference run
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum RunPhase {
    Initialized,
    WarmingUp,
    Sampling,
    Completed,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Cost of one run phase
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PhaseSummary {
    /// Posterior evaluations made during the phase
    pub ncall: u64,
    pub elapsed: Duration,
}

/// Backend-specific run diagnostics
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum Diagnostics {
    Nuts {
        step_size: f64,
        metric_variance: Array1<f64>,
        n_divergent: usize,
        /// Mean acceptance statistic of the draws, `None` without draws
        mean_accept: Option<f64>,
    },
    Hmc {
        step_size: f64,
        mass_matrix: Array1<f64>,
        accepted: usize,
        /// Positions visited by each stored trajectory, start included
        trajectories: Vec<Array2<f64>>,
        trajectories_truncated: bool,
    },
    Nested {
        logz: f64,
        logz_err: f64,
        information: f64,
        /// Log-importance weight of every dead point
        logwt: Array1<f64>,
        /// Number of live points at every dead point
        nlive: Array1<usize>,
        n_effective: f64,
        n_batches: usize,
    },
}

/// Output of a sampler backend
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RunOutcome {
    /// Chain draws or dead points, one row per sample
    pub samples: Array2<f64>,
    /// Log-probability of every row of `samples`, the log-likelihood for nested sampling
    pub ln_prob: Array1<f64>,
    pub best: Array1<f64>,
    pub best_ln_prob: f64,
    pub warmup: PhaseSummary,
    pub sampling: PhaseSummary,
    pub diagnostics: Diagnostics,
}

impl RunOutcome {
    pub(crate) fn with_phases(self, warmup: PhaseSummary, sampling: PhaseSummary) -> Self {
        Self {
            warmup,
            sampling,
            ..self
        }
    }

    pub fn nsamples(&self) -> usize {
        self.samples.nrows()
    }
}

/// State handed from [PosteriorSamplerTrait::warm_up] to [PosteriorSamplerTrait::sample]
#[derive(Clone, Debug)]
pub enum WarmupState {
    Nuts(NutsWarmup),
    Hmc(HmcWarmup),
    Nested(NestedWarmup),
}

impl WarmupState {
    /// Position the sampling phase starts from
    pub fn position(&self) -> &[f64] {
        match self {
            Self::Nuts(state) => state.position(),
            Self::Hmc(state) => state.position(),
            Self::Nested(state) => state.best(),
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Self::Nuts(_) => "NUTS",
            Self::Hmc(_) => "basic HMC",
            Self::Nested(_) => "nested sampling",
        }
    }
}

#[enum_dispatch]
pub trait PosteriorSamplerTrait: Clone + Debug + Serialize + DeserializeOwned {
    fn name(&self) -> &'static str;

    /// Whether the backend can work under the given bounds convention
    fn supports(&self, convention: BoundsConvention) -> bool;

    /// Check the settings before anything is evaluated
    fn validate(&self) -> Result<(), ConfigurationError>;

    /// Evaluate the initial vector and tune the backend
    ///
    /// `scales` are the proposal scales of the parameters, used as the initial metric.
    fn warm_up<P, R>(
        &self,
        posterior: &mut P,
        theta0: &[f64],
        scales: &[f64],
        rng: &mut R,
    ) -> Result<WarmupState, SamplerError>
    where
        P: LogDensity,
        R: Rng + ?Sized;

    fn sample<P, R>(
        &self,
        posterior: &mut P,
        warmup: WarmupState,
        rng: &mut R,
    ) -> Result<RunOutcome, SamplerError>
    where
        P: LogDensity,
        R: Rng + ?Sized;

    /// Warm up and sample, resetting the evaluation counter between phases
    fn run<P, R>(
        &self,
        posterior: &mut P,
        theta0: &[f64],
        scales: &[f64],
        rng: &mut R,
    ) -> Result<RunOutcome, SamplerError>
    where
        P: LogDensity,
        R: Rng + ?Sized,
    {
        self.run_with_phases(posterior, theta0, scales, rng, |_| {})
    }

    /// [PosteriorSamplerTrait::run] calling `enter` as each phase starts
    ///
    /// `enter` sees [RunPhase::WarmingUp] then [RunPhase::Sampling], an error belongs to the
    /// last phase entered.
    fn run_with_phases<P, R, F>(
        &self,
        posterior: &mut P,
        theta0: &[f64],
        scales: &[f64],
        rng: &mut R,
        mut enter: F,
    ) -> Result<RunOutcome, SamplerError>
    where
        P: LogDensity,
        R: Rng + ?Sized,
        F: FnMut(RunPhase),
    {
        self.validate()?;
        check_convention(self, posterior.convention())?;
        enter(RunPhase::WarmingUp);
        let (warmup, warmup_summary) =
            timed(posterior, |posterior| self.warm_up(posterior, theta0, scales, rng));
        let warmup = match warmup {
            Ok(warmup) => warmup,
            Err(err) => return attach_phases(Err(err), warmup_summary, PhaseSummary::default()),
        };
        enter(RunPhase::Sampling);
        let (outcome, sampling_summary) =
            timed(posterior, |posterior| self.sample(posterior, warmup, rng));
        attach_phases(outcome, warmup_summary, sampling_summary)
    }
}

/// Interchangeable sampler backend
#[enum_dispatch(PosteriorSamplerTrait)]
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[non_exhaustive]
pub enum PosteriorSampler {
    Nuts(NutsSampler),
    BasicHmc(BasicHmcSampler),
    Nested(NestedSampler),
}

impl PosteriorSampler {
    pub fn nuts() -> Self {
        NutsSampler::default().into()
    }

    pub fn basic_hmc() -> Self {
        BasicHmcSampler::default().into()
    }

    pub fn nested() -> Self {
        NestedSampler::default().into()
    }
}

impl Default for PosteriorSampler {
    fn default() -> Self {
        Self::nuts()
    }
}

pub(crate) fn check_convention<S: PosteriorSamplerTrait>(
    sampler: &S,
    convention: BoundsConvention,
) -> Result<(), ConfigurationError> {
    if sampler.supports(convention) {
        Ok(())
    } else {
        Err(ConfigurationError::UnsupportedConvention {
            sampler: sampler.name(),
            convention,
        })
    }
}

/// Run `f` with a freshly reset evaluation counter, returning what it cost
pub(crate) fn timed<P, T>(posterior: &mut P, f: impl FnOnce(&mut P) -> T) -> (T, PhaseSummary)
where
    P: LogDensity,
{
    posterior.reset_ncall();
    let start = Instant::now();
    let value = f(posterior);
    let summary = PhaseSummary {
        ncall: posterior.ncall(),
        elapsed: start.elapsed(),
    };
    (value, summary)
}

/// Patch phase costs into the outcome, or into the partial outcome of a backend failure
pub(crate) fn attach_phases(
    outcome: Result<RunOutcome, SamplerError>,
    warmup: PhaseSummary,
    sampling: PhaseSummary,
) -> Result<RunOutcome, SamplerError> {
    match outcome {
        Ok(outcome) => Ok(outcome.with_phases(warmup, sampling)),
        Err(SamplerError::Backend { message, partial }) => Err(SamplerError::Backend {
            message,
            partial: partial.map(|partial| Box::new(partial.with_phases(warmup, sampling))),
        }),
        Err(err) => Err(err),
    }
}

/// Evaluate the initial vector, which must be feasible and finite
pub(crate) fn start_phase<P: LogDensity>(
    posterior: &mut P,
    theta0: &[f64],
) -> Result<leapfrog::Phase, SamplerError> {
    if theta0.len() != posterior.dim() {
        return Err(ConfigurationError::ThetaLength {
            actual: theta0.len(),
            expected: posterior.dim(),
        }
        .into());
    }
    match leapfrog::Phase::at(posterior, theta0) {
        Ok(phase) if phase.is_feasible() => Ok(phase),
        Ok(_) => Err(SamplerError::InfeasibleStart {
            theta: theta0.to_vec(),
        }),
        Err(LogpError::Configuration(err)) => Err(err.into()),
        Err(LogpError::NonFinite { .. }) => Err(SamplerError::NonFiniteStart {
            theta: theta0.to_vec(),
        }),
    }
}

pub(crate) fn check_scales(scales: &[f64], dim: usize) -> Result<(), ConfigurationError> {
    if scales.len() != dim {
        return Err(ConfigurationError::LengthMismatch {
            what: "proposal scales",
            actual: scales.len(),
            expected: dim,
        });
    }
    if let Some(s) = scales.iter().find(|s| !(s.is_finite() && **s > 0.0)) {
        return Err(ConfigurationError::InvalidSetting(format!(
            "proposal scales must be positive and finite, got {s}"
        )));
    }
    Ok(())
}
