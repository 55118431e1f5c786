//! Run orchestration: warm-up, sampling and result capture around one posterior

use crate::error::{ConfigurationError, InferenceError, SamplerError};
use crate::forward_model::ForwardModel;
use crate::posterior::{BoundedPosterior, LogDensity};
use crate::result::{Provenance, RunRecord};
use crate::sampler::{PosteriorSampler, PosteriorSamplerTrait, RunPhase, check_convention};

use log::{error, info};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Settings of a single inference run
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct InferenceConfig {
    pub sampler: PosteriorSampler,
    /// Seed of the random generator, a random one is drawn and recorded when `None`
    pub seed: Option<u64>,
}

impl InferenceConfig {
    pub fn new(sampler: impl Into<PosteriorSampler>) -> Self {
        Self {
            sampler: sampler.into(),
            seed: None,
        }
    }

    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..self
        }
    }
}

/// One sampling run of a bounded posterior
///
/// The run goes through `Initialized → WarmingUp → Sampling → Completed`, any sampler failure
/// moves it to `Failed`. The evaluation counter is reset at the start of each phase so that
/// the record reports per-phase counts. A run can be performed once.
#[derive(Debug)]
pub struct Inference<M> {
    posterior: BoundedPosterior<M>,
    theta0: Array1<f64>,
    proposal_scales: Array1<f64>,
    truths: Option<Array1<f64>>,
    config: InferenceConfig,
    phase: RunPhase,
}

impl<M> Inference<M>
where
    M: ForwardModel,
{
    /// Check the initial vector and the sampler settings, nothing is evaluated yet
    ///
    /// Proposal scales default to one for every parameter.
    pub fn new(
        posterior: BoundedPosterior<M>,
        theta0: Array1<f64>,
        config: InferenceConfig,
    ) -> Result<Self, ConfigurationError> {
        posterior.scene().check_theta(&theta0.to_vec())?;
        config.sampler.validate()?;
        check_convention(&config.sampler, posterior.convention())?;
        let proposal_scales = Array1::ones(theta0.len());
        Ok(Self {
            posterior,
            theta0,
            proposal_scales,
            truths: None,
            config,
            phase: RunPhase::Initialized,
        })
    }

    pub fn with_proposal_scales(self, scales: Array1<f64>) -> Result<Self, ConfigurationError> {
        self.check_length("proposal scales", scales.len())?;
        Ok(Self {
            proposal_scales: scales,
            ..self
        })
    }

    /// Known true parameters, kept in the record for simulated data
    pub fn with_truths(self, truths: Array1<f64>) -> Result<Self, ConfigurationError> {
        self.check_length("truths", truths.len())?;
        Ok(Self {
            truths: Some(truths),
            ..self
        })
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn posterior(&self) -> &BoundedPosterior<M> {
        &self.posterior
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    fn check_length(&self, what: &'static str, actual: usize) -> Result<(), ConfigurationError> {
        if actual == self.theta0.len() {
            Ok(())
        } else {
            Err(ConfigurationError::LengthMismatch {
                what,
                actual,
                expected: self.theta0.len(),
            })
        }
    }

    fn enter(&mut self, phase: RunPhase) {
        info!("{} run: {:?} -> {:?}", self.config.sampler.name(), self.phase, phase);
        self.phase = phase;
    }

    fn fail(&mut self, source: SamplerError) -> InferenceError {
        let phase = self.phase;
        error!("{} run failed while {phase:?}: {source}", self.config.sampler.name());
        self.phase = RunPhase::Failed;
        InferenceError::Sampler { phase, source }
    }

    /// Warm up, sample and capture the record
    ///
    /// The initial vector must lie inside the prior bounds and have a finite log-density,
    /// otherwise the run fails in the warm-up phase before any sampling.
    pub fn run(&mut self) -> Result<RunRecord, InferenceError> {
        if self.phase != RunPhase::Initialized {
            return Err(ConfigurationError::InvalidSetting(format!(
                "inference run is already {:?}",
                self.phase
            ))
            .into());
        }
        let seed = self.config.seed.unwrap_or_else(|| rand::rng().random());
        let mut rng = StdRng::seed_from_u64(seed);
        let sampler = self.config.sampler.clone();
        let theta0 = self.theta0.to_vec();
        let scales = self.proposal_scales.to_vec();

        let name = sampler.name();
        let phase = &mut self.phase;
        let result =
            sampler.run_with_phases(&mut self.posterior, &theta0, &scales, &mut rng, |next| {
                info!("{name} run: {phase:?} -> {next:?}");
                *phase = next;
            });
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(source) => return Err(self.fail(source)),
        };
        info!(
            "warm-up done: {} evaluations in {:.3?}",
            outcome.warmup.ncall, outcome.warmup.elapsed
        );
        info!(
            "sampling done: {} samples, {} evaluations in {:.3?}, best ln p = {}",
            outcome.nsamples(),
            outcome.sampling.ncall,
            outcome.sampling.elapsed,
            outcome.best_ln_prob
        );
        self.enter(RunPhase::Completed);

        let provenance = Provenance::now(sampler.name(), seed, self.posterior.convention());
        Ok(RunRecord::new(
            &self.posterior,
            self.proposal_scales.clone(),
            self.truths.clone(),
            self.theta0.clone(),
            sampler,
            outcome,
            provenance,
        ))
    }
}
