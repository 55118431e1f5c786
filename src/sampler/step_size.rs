use crate::posterior::LogDensity;
use crate::sampler::leapfrog::{Phase, leapfrog};
use crate::sampler::metric::DiagMetric;
use crate::bounds::PriorBounds;

use log::debug;
use rand::Rng;

const MAX_SEARCH_TRIALS: usize = 100;

/// Settings of the dual-averaging step-size adaptation
#[derive(Debug, Clone, Copy)]
pub(crate) struct DualAverageOptions {
    pub k: f64,
    pub t0: f64,
    pub gamma: f64,
}

impl Default for DualAverageOptions {
    fn default() -> DualAverageOptions {
        DualAverageOptions {
            k: 0.75,
            t0: 10.,
            gamma: 0.05,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct DualAverage {
    log_step: f64,
    log_step_adapted: f64,
    hbar: f64,
    mu: f64,
    count: u64,
    settings: DualAverageOptions,
}

impl DualAverage {
    pub(crate) fn new(settings: DualAverageOptions, initial_step: f64) -> DualAverage {
        DualAverage {
            log_step: initial_step.ln(),
            log_step_adapted: initial_step.ln(),
            hbar: 0.,
            mu: (10. * initial_step).ln(),
            count: 1,
            settings,
        }
    }

    pub(crate) fn advance(&mut self, accept_stat: f64, target: f64) {
        let w = 1. / (self.count as f64 + self.settings.t0);
        self.hbar = (1. - w) * self.hbar + w * (target - accept_stat);
        self.log_step = self.mu - self.hbar * (self.count as f64).sqrt() / self.settings.gamma;
        let mk = (self.count as f64).powf(-self.settings.k);
        self.log_step_adapted = mk * self.log_step + (1. - mk) * self.log_step_adapted;
        self.count += 1;
    }

    pub(crate) fn current_step_size(&self) -> f64 {
        self.log_step.exp()
    }

    pub(crate) fn current_step_size_adapted(&self) -> f64 {
        self.log_step_adapted.exp()
    }

    /// Restart the averaging around a new initial step
    pub(crate) fn reset(&mut self, initial_step: f64) {
        *self = Self::new(self.settings, initial_step);
    }
}

/// Heuristic step size giving a single-step acceptance probability close to one half
///
/// The step is doubled while the acceptance probability of one leapfrog step from `start`
/// exceeds 1/2, or halved while it is below. Every trial costs one evaluation and at most
/// 100 trials are made.
pub(crate) fn find_reasonable_step_size<P, R>(
    posterior: &mut P,
    metric: &DiagMetric,
    bounds: &PriorBounds,
    start: &Phase,
    initial: f64,
    rng: &mut R,
) -> f64
where
    P: LogDensity,
    R: Rng + ?Sized,
{
    let mut phase = start.clone();
    metric.sample_momentum(rng, &mut phase.momentum);
    let h0 = phase.energy(metric);

    let mut log_accept = |step: f64, posterior: &mut P| -> f64 {
        match leapfrog(posterior, metric, bounds, &phase, step) {
            Ok(end) => {
                let delta = h0 - end.energy(metric);
                if delta.is_nan() { f64::NEG_INFINITY } else { delta }
            }
            Err(_) => f64::NEG_INFINITY,
        }
    };

    let mut step = initial;
    let first = log_accept(step, posterior);
    let direction = if first > -std::f64::consts::LN_2 { 1.0 } else { -1.0 };
    let mut delta = first;
    let mut trials = 1;
    while trials < MAX_SEARCH_TRIALS && direction * delta > -direction * std::f64::consts::LN_2 {
        step *= 2f64.powf(direction);
        delta = log_accept(step, posterior);
        trials += 1;
    }
    debug!("step-size search settled at {step} after {trials} trials");
    step
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::GaussianTarget;

    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn dual_average_converges_to_target() {
        // acceptance falls linearly with the log step size
        let accept = |step: f64| (1.0 - 0.25 * (step.ln() + 2.0)).clamp(0.0, 1.0);
        let mut dual = DualAverage::new(DualAverageOptions::default(), 1.0);
        for _ in 0..2000 {
            let a = accept(dual.current_step_size());
            dual.advance(a, 0.8);
        }
        assert_abs_diff_eq!(
            accept(dual.current_step_size_adapted()),
            0.8,
            epsilon = 0.02
        );
    }

    #[test]
    fn reset_restarts_averaging() {
        let mut dual = DualAverage::new(DualAverageOptions::default(), 0.1);
        dual.advance(0.0, 0.8);
        dual.reset(0.5);
        assert_abs_diff_eq!(dual.current_step_size(), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(dual.current_step_size_adapted(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn reasonable_step_size_for_standard_normal() {
        let mut target = GaussianTarget::standard(4);
        let metric = DiagMetric::from_scales(&[1.0; 4]);
        let bounds = PriorBounds::unbounded(4);
        let start = Phase::at(&mut target, &[0.5, -0.5, 0.1, 0.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let step = find_reasonable_step_size(&mut target, &metric, &bounds, &start, 1e-3, &mut rng);
        assert!(step > 0.1 && step < 10.0, "step = {step}");
        // the initial point evaluation plus at most 100 trials
        assert!(target.ncall() <= 101);
    }

    #[test]
    fn search_is_capped() {
        let mut target = GaussianTarget::standard(1);
        let metric = DiagMetric::from_scales(&[1.0]);
        let bounds = PriorBounds::unbounded(1);
        let start = Phase::at(&mut target, &[0.0]).unwrap();
        target.reset_ncall();
        let mut rng = StdRng::seed_from_u64(1);
        find_reasonable_step_size(&mut target, &metric, &bounds, &start, 1e-300, &mut rng);
        assert!(target.ncall() <= 100);
    }
}
