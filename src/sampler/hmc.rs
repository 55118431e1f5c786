use crate::array_stats::argmax;
use crate::error::{ConfigurationError, SamplerError};
use crate::posterior::{BoundsConvention, LogDensity};
use crate::sampler::leapfrog::{Phase, leapfrog};
use crate::sampler::metric::DiagMetric;
use crate::sampler::step_size::find_reasonable_step_size;
use crate::sampler::{
    Diagnostics, PhaseSummary, PosteriorSamplerTrait, RunOutcome, WarmupState, check_scales,
    start_phase,
};

use log::{debug, warn};
use ndarray::{Array1, Array2};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

const INITIAL_SEARCH_STEP: f64 = 0.1;

/// Whether basic HMC keeps every position of every trajectory
///
/// Storage grows as iterations × trajectory length × dimension, so it is bounded by
/// `max_points`, the total number of stored positions. Trajectories that would exceed it are
/// dropped and the outcome is flagged as truncated.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum TrajectoryStorage {
    #[default]
    Disabled,
    Enabled { max_points: usize },
}

/// Fixed-length Hamiltonian Monte Carlo with a diagonal mass matrix
///
/// The mass matrix is `1 / scales^2`. Unless `step_size` is given, warm-up searches for the
/// step size whose single-step acceptance is about one half and multiplies it by
/// `step_size_factor`. Every iteration integrates `round(N(length, sigma_length))` leapfrog
/// steps, clamped to `[1, max_length]`, followed by a Metropolis test.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename = "BasicHmc")]
pub struct BasicHmcSampler {
    pub num_iterations: usize,
    pub length: usize,
    pub sigma_length: f64,
    pub max_length: usize,
    pub step_size: Option<f64>,
    pub step_size_factor: f64,
    pub store_trajectories: TrajectoryStorage,
}

impl BasicHmcSampler {
    #[inline]
    pub fn default_num_iterations() -> usize {
        500
    }

    #[inline]
    pub fn default_length() -> usize {
        20
    }

    #[inline]
    pub fn default_sigma_length() -> f64 {
        5.0
    }

    #[inline]
    pub fn default_max_length() -> usize {
        100
    }

    #[inline]
    pub fn default_step_size() -> Option<f64> {
        None
    }

    #[inline]
    pub fn default_step_size_factor() -> f64 {
        0.5
    }

    #[inline]
    pub fn default_store_trajectories() -> TrajectoryStorage {
        TrajectoryStorage::Disabled
    }
}

impl Default for BasicHmcSampler {
    fn default() -> Self {
        Self {
            num_iterations: Self::default_num_iterations(),
            length: Self::default_length(),
            sigma_length: Self::default_sigma_length(),
            max_length: Self::default_max_length(),
            step_size: Self::default_step_size(),
            step_size_factor: Self::default_step_size_factor(),
            store_trajectories: Self::default_store_trajectories(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct HmcWarmup {
    current: Phase,
    step_size: f64,
    metric: DiagMetric,
}

impl HmcWarmup {
    pub fn position(&self) -> &[f64] {
        &self.current.position
    }

    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    /// Diagonal of the mass matrix
    pub fn mass_matrix(&self) -> Vec<f64> {
        self.metric.mass_matrix()
    }
}

#[derive(Debug, Default)]
struct TrajectoryStore {
    trajectories: Vec<Array2<f64>>,
    stored_points: usize,
    truncated: bool,
}

impl TrajectoryStore {
    /// Whether positions of the next trajectory should be collected at all
    fn accepts(&self, storage: TrajectoryStorage) -> bool {
        matches!(storage, TrajectoryStorage::Enabled { .. }) && !self.truncated
    }

    fn push(&mut self, storage: TrajectoryStorage, trajectory: Array2<f64>) {
        let TrajectoryStorage::Enabled { max_points } = storage else {
            return;
        };
        if self.truncated || self.stored_points + trajectory.nrows() > max_points {
            if !self.truncated {
                warn!(
                    "trajectory storage limit of {max_points} points reached after {} trajectories",
                    self.trajectories.len()
                );
            }
            self.truncated = true;
            return;
        }
        self.stored_points += trajectory.nrows();
        self.trajectories.push(trajectory);
    }
}

impl PosteriorSamplerTrait for BasicHmcSampler {
    fn name(&self) -> &'static str {
        "basic HMC"
    }

    fn supports(&self, _convention: BoundsConvention) -> bool {
        true
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.length == 0 {
            return Err(ConfigurationError::InvalidSetting(
                "HMC trajectory length must be positive".into(),
            ));
        }
        if self.max_length < self.length {
            return Err(ConfigurationError::InvalidSetting(format!(
                "HMC max_length must be at least length = {}, got {}",
                self.length, self.max_length
            )));
        }
        if !(self.sigma_length.is_finite() && self.sigma_length >= 0.0) {
            return Err(ConfigurationError::InvalidSetting(format!(
                "HMC sigma_length must be non-negative, got {}",
                self.sigma_length
            )));
        }
        if let Some(step_size) = self.step_size {
            if !(step_size.is_finite() && step_size > 0.0) {
                return Err(ConfigurationError::InvalidSetting(format!(
                    "HMC step size must be positive, got {step_size}"
                )));
            }
        }
        if !(self.step_size_factor.is_finite() && self.step_size_factor > 0.0) {
            return Err(ConfigurationError::InvalidSetting(format!(
                "HMC step_size_factor must be positive, got {}",
                self.step_size_factor
            )));
        }
        Ok(())
    }

    fn warm_up<P, R>(
        &self,
        posterior: &mut P,
        theta0: &[f64],
        scales: &[f64],
        rng: &mut R,
    ) -> Result<WarmupState, SamplerError>
    where
        P: LogDensity,
        R: Rng + ?Sized,
    {
        check_scales(scales, posterior.dim())?;
        let current = start_phase(posterior, theta0)?;
        let metric = DiagMetric::from_scales(scales);
        let step_size = match self.step_size {
            Some(step_size) => step_size,
            None => {
                let bounds = posterior.sampler_bounds();
                let found = find_reasonable_step_size(
                    posterior,
                    &metric,
                    &bounds,
                    &current,
                    INITIAL_SEARCH_STEP,
                    rng,
                );
                found * self.step_size_factor
            }
        };
        debug!("basic HMC uses step size {step_size}");
        Ok(WarmupState::Hmc(HmcWarmup {
            current,
            step_size,
            metric,
        }))
    }

    fn sample<P, R>(
        &self,
        posterior: &mut P,
        warmup: WarmupState,
        rng: &mut R,
    ) -> Result<RunOutcome, SamplerError>
    where
        P: LogDensity,
        R: Rng + ?Sized,
    {
        let HmcWarmup {
            mut current,
            step_size,
            metric,
        } = match warmup {
            WarmupState::Hmc(state) => state,
            other => {
                return Err(SamplerError::WrongWarmupState {
                    expected: self.name(),
                    actual: other.backend(),
                });
            }
        };
        let length_distr = Normal::new(self.length as f64, self.sigma_length)
            .map_err(|err| ConfigurationError::InvalidSetting(err.to_string()))?;

        let bounds = posterior.sampler_bounds();
        let dim = current.position.len();
        let mut samples = Array2::zeros((self.num_iterations, dim));
        let mut ln_prob = Array1::zeros(self.num_iterations);
        let mut accepted = 0;
        let mut store = TrajectoryStore::default();
        for (mut row, lp) in samples.outer_iter_mut().zip(ln_prob.iter_mut()) {
            let n_steps = length_distr
                .sample(rng)
                .round()
                .clamp(1.0, self.max_length as f64) as usize;
            let mut phase = current.clone();
            metric.sample_momentum(rng, &mut phase.momentum);
            let initial_energy = phase.energy(&metric);

            let mut positions = store
                .accepts(self.store_trajectories)
                .then(|| phase.position.clone());
            let mut failed = false;
            for _ in 0..n_steps {
                match leapfrog(posterior, &metric, &bounds, &phase, step_size) {
                    Ok(next) if next.is_feasible() => phase = next,
                    _ => {
                        failed = true;
                        break;
                    }
                }
                if let Some(positions) = positions.as_mut() {
                    positions.extend_from_slice(&phase.position);
                }
            }
            if let Some(positions) = positions {
                let n_points = positions.len() / dim;
                if let Ok(trajectory) = Array2::from_shape_vec((n_points, dim), positions) {
                    store.push(self.store_trajectories, trajectory);
                }
            }

            if !failed {
                let log_accept = initial_energy - phase.energy(&metric);
                if rng.random::<f64>().ln() < log_accept {
                    accepted += 1;
                    current = phase;
                    current.momentum.fill(0.0);
                }
            }
            row.assign(&Array1::from(current.position.clone()));
            *lp = current.ln_prob;
        }
        debug!(
            "basic HMC accepted {accepted} of {} proposals",
            self.num_iterations
        );

        let (best, best_ln_prob) = match argmax(ln_prob.view()) {
            Some(i) => (samples.row(i).to_owned(), ln_prob[i]),
            None => (Array1::from(current.position.clone()), current.ln_prob),
        };
        Ok(RunOutcome {
            samples,
            ln_prob,
            best,
            best_ln_prob,
            warmup: PhaseSummary::default(),
            sampling: PhaseSummary::default(),
            diagnostics: Diagnostics::Hmc {
                step_size,
                mass_matrix: metric.mass_matrix().into(),
                accepted,
                trajectories: store.trajectories,
                trajectories_truncated: store.truncated,
            },
        })
    }
}
