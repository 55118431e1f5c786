use crate::array_stats::{argmax, logaddexp};
use crate::bounds::PriorBounds;
use crate::error::{ConfigurationError, SamplerError};
use crate::posterior::{BoundsConvention, LogDensity};
use crate::sampler::leapfrog::{Phase, leapfrog};
use crate::sampler::metric::{DiagMetric, RunningVariance, adaptation_windows};
use crate::sampler::step_size::{DualAverage, DualAverageOptions};
use crate::sampler::{
    Diagnostics, PhaseSummary, PosteriorSamplerTrait, RunOutcome, WarmupState, check_scales,
    start_phase,
};

use log::debug;
use ndarray::{Array1, Array2};
use rand::Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// No-U-Turn sampler with step-size and diagonal metric adaptation
///
/// Warm-up starts from the proposal scales as the metric and `initial_step_size`, tunes the
/// step size with dual averaging towards `target_accept` over all `num_warmup` iterations and
/// re-estimates the metric at the end of each adaptation window. Draws use multinomial
/// trajectory sampling with the generalized no-U-turn criterion. The best vector is the draw
/// with the maximum log-probability.
///
/// Initialization costs exactly one evaluation, with `num_warmup = 0` warm-up returns the
/// initial vector unchanged.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename = "Nuts")]
pub struct NutsSampler {
    pub num_warmup: usize,
    pub num_draws: usize,
    pub max_depth: u32,
    pub target_accept: f64,
    pub max_energy_error: f64,
    pub adapt_metric: bool,
    pub initial_step_size: f64,
}

impl NutsSampler {
    pub fn new(num_warmup: usize, num_draws: usize) -> Self {
        Self {
            num_warmup,
            num_draws,
            ..Self::default()
        }
    }

    #[inline]
    pub fn default_num_warmup() -> usize {
        500
    }

    #[inline]
    pub fn default_num_draws() -> usize {
        2000
    }

    #[inline]
    pub fn default_max_depth() -> u32 {
        10
    }

    #[inline]
    pub fn default_target_accept() -> f64 {
        0.8
    }

    #[inline]
    pub fn default_max_energy_error() -> f64 {
        1000.0
    }

    #[inline]
    pub fn default_adapt_metric() -> bool {
        true
    }

    #[inline]
    pub fn default_initial_step_size() -> f64 {
        0.1
    }
}

impl Default for NutsSampler {
    fn default() -> Self {
        Self {
            num_warmup: Self::default_num_warmup(),
            num_draws: Self::default_num_draws(),
            max_depth: Self::default_max_depth(),
            target_accept: Self::default_target_accept(),
            max_energy_error: Self::default_max_energy_error(),
            adapt_metric: Self::default_adapt_metric(),
            initial_step_size: Self::default_initial_step_size(),
        }
    }
}

/// Tuned NUTS state
#[derive(Clone, Debug)]
pub struct NutsWarmup {
    current: Phase,
    step_size: f64,
    metric: DiagMetric,
    n_divergent: usize,
}

impl NutsWarmup {
    pub fn position(&self) -> &[f64] {
        &self.current.position
    }

    pub fn ln_prob(&self) -> f64 {
        self.current.ln_prob
    }

    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    pub fn metric(&self) -> &DiagMetric {
        &self.metric
    }

    /// Divergent transitions during warm-up
    pub fn n_divergent(&self) -> usize {
        self.n_divergent
    }
}

/// Contiguous piece of a trajectory, `left` is the earliest state in time
#[derive(Clone, Debug)]
struct Tree {
    left: Phase,
    right: Phase,
    draw: Phase,
    /// Log of the summed multinomial weights of the leaves
    log_weight: f64,
    /// Sum of the momenta of the leaves
    rho: Vec<f64>,
}

impl Tree {
    fn leaf(phase: Phase, log_weight: f64) -> Self {
        Self {
            left: phase.clone(),
            right: phase.clone(),
            rho: phase.momentum.clone(),
            draw: phase,
            log_weight,
        }
    }

    fn edge(&self, forward: bool) -> &Phase {
        if forward { &self.right } else { &self.left }
    }

    /// Join `outer`, built further along `forward`, to `self` keeping `draw` as given
    fn join(self, outer: Tree, forward: bool, draw: Phase) -> Self {
        let (left, right) = if forward {
            (self.left, outer.right)
        } else {
            (outer.left, self.right)
        };
        Self {
            left,
            right,
            draw,
            log_weight: logaddexp(self.log_weight, outer.log_weight),
            rho: self
                .rho
                .iter()
                .zip(outer.rho.iter())
                .map(|(a, b)| a + b)
                .collect(),
        }
    }

    fn is_turning(&self, metric: &DiagMetric) -> bool {
        !(metric.project(&self.rho, &self.left.momentum) > 0.0
            && metric.project(&self.rho, &self.right.momentum) > 0.0)
    }
}

enum Stop {
    Divergent,
    Turning,
}

/// Integration context of a single transition
struct Trajectory<'a, P> {
    posterior: &'a mut P,
    metric: &'a DiagMetric,
    bounds: &'a PriorBounds,
    step_size: f64,
    max_energy_error: f64,
    initial_energy: f64,
    sum_accept: f64,
    n_steps: usize,
}

impl<P: LogDensity> Trajectory<'_, P> {
    fn step(&mut self, edge: &Phase, forward: bool) -> Result<Tree, Stop> {
        let step = if forward { self.step_size } else { -self.step_size };
        self.n_steps += 1;
        let phase = leapfrog(self.posterior, self.metric, self.bounds, edge, step)
            .map_err(|_| Stop::Divergent)?;
        let energy_error = phase.energy(self.metric) - self.initial_energy;
        if !energy_error.is_finite() || energy_error > self.max_energy_error {
            return Err(Stop::Divergent);
        }
        self.sum_accept += (-energy_error).exp().min(1.0);
        Ok(Tree::leaf(phase, -energy_error))
    }

    /// Subtree of `2^depth` leaves extending `edge`, choosing its draw uniformly by weight
    fn build<R: Rng + ?Sized>(
        &mut self,
        edge: &Phase,
        forward: bool,
        depth: u32,
        rng: &mut R,
    ) -> Result<Tree, Stop> {
        if depth == 0 {
            return self.step(edge, forward);
        }
        let inner = self.build(edge, forward, depth - 1, rng)?;
        let outer = self.build(inner.edge(forward), forward, depth - 1, rng)?;
        let total = logaddexp(inner.log_weight, outer.log_weight);
        let draw = if rng.random::<f64>().ln() < outer.log_weight - total {
            outer.draw.clone()
        } else {
            inner.draw.clone()
        };
        let tree = inner.join(outer, forward, draw);
        if tree.is_turning(self.metric) {
            Err(Stop::Turning)
        } else {
            Ok(tree)
        }
    }
}

struct Transition {
    phase: Phase,
    accept: f64,
    divergent: bool,
}

impl NutsSampler {
    fn transition<P, R>(
        &self,
        posterior: &mut P,
        metric: &DiagMetric,
        bounds: &PriorBounds,
        current: &Phase,
        step_size: f64,
        rng: &mut R,
    ) -> Transition
    where
        P: LogDensity,
        R: Rng + ?Sized,
    {
        let mut start = current.clone();
        metric.sample_momentum(rng, &mut start.momentum);
        let initial_energy = start.energy(metric);
        let mut trajectory = Trajectory {
            posterior,
            metric,
            bounds,
            step_size,
            max_energy_error: self.max_energy_error,
            initial_energy,
            sum_accept: 0.0,
            n_steps: 0,
        };

        let mut tree = Tree::leaf(start, 0.0);
        let mut divergent = false;
        for depth in 0..self.max_depth {
            let forward = rng.random_bool(0.5);
            let subtree = match trajectory.build(tree.edge(forward), forward, depth, rng) {
                Ok(subtree) => subtree,
                Err(Stop::Divergent) => {
                    divergent = true;
                    break;
                }
                Err(Stop::Turning) => break,
            };
            // progressive sampling biased towards the new subtree
            let draw = if rng.random::<f64>().ln() < subtree.log_weight - tree.log_weight {
                subtree.draw.clone()
            } else {
                tree.draw.clone()
            };
            tree = tree.join(subtree, forward, draw);
            if tree.is_turning(metric) {
                break;
            }
        }

        let accept = if trajectory.n_steps > 0 {
            trajectory.sum_accept / trajectory.n_steps as f64
        } else {
            0.0
        };
        let mut phase = tree.draw;
        phase.momentum.fill(0.0);
        Transition {
            phase,
            accept,
            divergent,
        }
    }
}

impl PosteriorSamplerTrait for NutsSampler {
    fn name(&self) -> &'static str {
        "NUTS"
    }

    fn supports(&self, _convention: BoundsConvention) -> bool {
        true
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_depth == 0 {
            return Err(ConfigurationError::InvalidSetting(
                "NUTS max_depth must be positive".into(),
            ));
        }
        if !(self.target_accept > 0.0 && self.target_accept < 1.0) {
            return Err(ConfigurationError::InvalidSetting(format!(
                "NUTS target_accept must be in (0, 1), got {}",
                self.target_accept
            )));
        }
        if !(self.initial_step_size.is_finite() && self.initial_step_size > 0.0) {
            return Err(ConfigurationError::InvalidSetting(format!(
                "NUTS initial_step_size must be positive, got {}",
                self.initial_step_size
            )));
        }
        if self.max_energy_error.is_nan() || self.max_energy_error <= 0.0 {
            return Err(ConfigurationError::InvalidSetting(format!(
                "NUTS max_energy_error must be positive, got {}",
                self.max_energy_error
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
        let mut current = start_phase(posterior, theta0)?;
        let mut metric = DiagMetric::from_scales(scales);
        if self.num_warmup == 0 {
            return Ok(WarmupState::Nuts(NutsWarmup {
                current,
                step_size: self.initial_step_size,
                metric,
                n_divergent: 0,
            }));
        }

        let bounds = posterior.sampler_bounds();
        let windows = if self.adapt_metric {
            adaptation_windows(self.num_warmup)
        } else {
            vec![]
        };
        let mut variance = RunningVariance::new(posterior.dim());
        let mut dual = DualAverage::new(DualAverageOptions::default(), self.initial_step_size);
        let mut n_divergent = 0;
        for i in 0..self.num_warmup {
            let transition = self.transition(
                posterior,
                &metric,
                &bounds,
                &current,
                dual.current_step_size(),
                rng,
            );
            current = transition.phase;
            n_divergent += transition.divergent as usize;
            dual.advance(transition.accept, self.target_accept);

            if let Some(window) = windows.iter().find(|window| window.contains(&i)) {
                variance.update(&current.position);
                if i + 1 == window.end {
                    metric = DiagMetric::new(variance.regularized_variance());
                    debug!(
                        "NUTS metric window {window:?} done over {} draws, step size {}",
                        variance.count(),
                        dual.current_step_size()
                    );
                    variance.reset();
                    dual.reset(dual.current_step_size());
                }
            }
        }
        let step_size = dual.current_step_size_adapted();
        debug!("NUTS warm-up finished with step size {step_size}, {n_divergent} divergences");

        Ok(WarmupState::Nuts(NutsWarmup {
            current,
            step_size,
            metric,
            n_divergent,
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
        let NutsWarmup {
            mut current,
            step_size,
            metric,
            ..
        } = match warmup {
            WarmupState::Nuts(state) => state,
            other => {
                return Err(SamplerError::WrongWarmupState {
                    expected: self.name(),
                    actual: other.backend(),
                });
            }
        };

        let bounds = posterior.sampler_bounds();
        let dim = current.position.len();
        let mut samples = Array2::zeros((self.num_draws, dim));
        let mut ln_prob = Array1::zeros(self.num_draws);
        let mut n_divergent = 0;
        let mut sum_accept = 0.0;
        for (mut row, lp) in samples.outer_iter_mut().zip(ln_prob.iter_mut()) {
            let transition = self.transition(posterior, &metric, &bounds, &current, step_size, rng);
            current = transition.phase;
            n_divergent += transition.divergent as usize;
            sum_accept += transition.accept;
            row.assign(&Array1::from(current.position.clone()));
            *lp = current.ln_prob;
        }

        let (best, best_ln_prob) = match argmax(ln_prob.view()) {
            Some(i) => (samples.row(i).to_owned(), ln_prob[i]),
            None => (Array1::from(current.position.clone()), current.ln_prob),
        };
        let mean_accept = (self.num_draws > 0).then(|| sum_accept / self.num_draws as f64);
        Ok(RunOutcome {
            samples,
            ln_prob,
            best,
            best_ln_prob,
            warmup: PhaseSummary::default(),
            sampling: PhaseSummary::default(),
            diagnostics: Diagnostics::Nuts {
                step_size,
                metric_variance: metric.variance().to_vec().into(),
                n_divergent,
                mean_accept,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::PosteriorSampler;
    use crate::tests::GaussianTarget;

    use approx::assert_abs_diff_eq;
    use ndarray::Axis;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn zero_warmup_returns_initial_vector() {
        let sampler = NutsSampler::new(0, 10);
        let mut target = GaussianTarget::standard(3);
        let mut rng = StdRng::seed_from_u64(0);
        let theta0 = [0.3, -0.2, 1.5];
        let warmup = sampler
            .warm_up(&mut target, &theta0, &[1.0; 3], &mut rng)
            .unwrap();
        assert_eq!(warmup.position(), &theta0);
        assert_eq!(target.ncall(), 1);
        match warmup {
            WarmupState::Nuts(state) => {
                assert_eq!(state.step_size(), sampler.initial_step_size);
                assert_eq!(state.metric().variance(), &[1.0; 3]);
            }
            _ => panic!("expected NUTS warm-up state"),
        }
    }

    #[test]
    fn recovers_gaussian_moments() {
        let mean = vec![1.0, -2.0];
        let sigma = vec![0.5, 3.0];
        let mut target = GaussianTarget::new(mean.clone(), sigma.clone());
        let sampler = NutsSampler::new(500, 2000);
        let mut rng = StdRng::seed_from_u64(7);
        let outcome = sampler
            .run(&mut target, &[0.0, 0.0], &[1.0, 1.0], &mut rng)
            .unwrap();
        assert_eq!(outcome.samples.dim(), (2000, 2));

        let sample_mean = outcome.samples.mean_axis(Axis(0)).unwrap();
        let sample_std = outcome.samples.std_axis(Axis(0), 1.0);
        for i in 0..2 {
            assert_abs_diff_eq!(sample_mean[i], mean[i], epsilon = 0.2 * sigma[i]);
            assert_abs_diff_eq!(sample_std[i], sigma[i], epsilon = 0.15 * sigma[i]);
        }
        match &outcome.diagnostics {
            Diagnostics::Nuts {
                metric_variance,
                n_divergent,
                mean_accept,
                ..
            } => {
                // the adapted metric approaches the target variance
                assert_abs_diff_eq!(metric_variance[1], 9.0, epsilon = 4.0);
                assert_eq!(*n_divergent, 0);
                assert!(mean_accept.is_some_and(|a| a > 0.6), "{mean_accept:?}");
            }
            _ => panic!("expected NUTS diagnostics"),
        }
        assert!(outcome.best_ln_prob >= outcome.ln_prob.iter().copied().fold(f64::MIN, f64::max));
    }

    #[test]
    fn stays_inside_reflected_bounds() {
        let mut target = GaussianTarget::new(vec![0.9, 0.0], vec![1.0, 1.0])
            .in_box(1.0, BoundsConvention::SamplerTransform);
        let sampler = NutsSampler::new(200, 300);
        let mut rng = StdRng::seed_from_u64(3);
        let outcome = sampler
            .run(&mut target, &[0.5, 0.0], &[0.5, 0.5], &mut rng)
            .unwrap();
        assert!(outcome.samples.iter().all(|x| (-1.0..=1.0).contains(x)));
        assert!(outcome.ln_prob.iter().all(|lp| lp.is_finite()));
    }

    #[test]
    fn failed_evaluations_are_divergences() {
        let mut target = GaussianTarget::standard(1).failing_above(1.0);
        let sampler = NutsSampler::new(0, 300);
        let mut rng = StdRng::seed_from_u64(5);
        let outcome = sampler
            .run(&mut target, &[0.0], &[1.0], &mut rng)
            .unwrap();
        assert!(outcome.samples.iter().all(|&x| x <= 1.0));
        match outcome.diagnostics {
            Diagnostics::Nuts { n_divergent, .. } => assert!(n_divergent > 0),
            _ => panic!("expected NUTS diagnostics"),
        }
    }

    #[test]
    fn no_draws_outcome_round_trips() {
        let mut target = GaussianTarget::standard(2);
        let mut rng = StdRng::seed_from_u64(0);
        let outcome = NutsSampler::new(10, 0)
            .run(&mut target, &[0.0, 0.0], &[1.0, 1.0], &mut rng)
            .unwrap();
        assert_eq!(outcome.nsamples(), 0);
        let Diagnostics::Nuts { mean_accept, .. } = &outcome.diagnostics else {
            panic!("expected NUTS diagnostics");
        };
        assert_eq!(*mean_accept, None);
        let json = serde_json::to_string(&outcome).unwrap();
        let restored: RunOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, outcome);
    }

    #[test]
    fn validation() {
        assert!(NutsSampler::default().validate().is_ok());
        let sampler = NutsSampler {
            target_accept: 1.0,
            ..NutsSampler::default()
        };
        assert!(sampler.validate().is_err());
        let sampler = NutsSampler {
            max_depth: 0,
            ..NutsSampler::default()
        };
        assert!(PosteriorSampler::from(sampler).validate().is_err());
    }

    #[test]
    fn serialization() {
        let sampler = NutsSampler::new(10, 20);
        let json = serde_json::to_string(&sampler).unwrap();
        let restored: NutsSampler = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, sampler);
    }
}
