use crate::bounds::PriorBounds;
use crate::error::LogpError;
use crate::posterior::LogDensity;
use crate::sampler::metric::DiagMetric;

const MAX_REFLECTIONS: usize = 100;

/// Point of phase space with the log-density and its gradient at the position
#[derive(Clone, Debug)]
pub(crate) struct Phase {
    pub position: Vec<f64>,
    pub momentum: Vec<f64>,
    pub gradient: Vec<f64>,
    pub ln_prob: f64,
}

impl Phase {
    /// Evaluate the posterior at `position`, momentum is zero
    pub(crate) fn at<P: LogDensity>(posterior: &mut P, position: &[f64]) -> Result<Self, LogpError> {
        let mut gradient = vec![0.0; position.len()];
        let ln_prob = posterior.log_density_and_gradient(position, &mut gradient)?;
        Ok(Self {
            position: position.to_vec(),
            momentum: vec![0.0; position.len()],
            gradient,
            ln_prob,
        })
    }

    /// Hamiltonian, `-ln_prob + kinetic energy`
    pub(crate) fn energy(&self, metric: &DiagMetric) -> f64 {
        -self.ln_prob + metric.kinetic_energy(&self.momentum)
    }

    pub(crate) fn is_feasible(&self) -> bool {
        self.ln_prob > f64::NEG_INFINITY
    }
}

/// Reflect `x` into `[lower, upper]`, flipping the momentum on every bounce
fn reflect(x: &mut f64, p: &mut f64, lower: f64, upper: f64) {
    for _ in 0..MAX_REFLECTIONS {
        if *x < lower {
            *x = 2.0 * lower - *x;
        } else if *x > upper {
            *x = 2.0 * upper - *x;
        } else {
            return;
        }
        *p = -*p;
    }
    *x = x.clamp(lower, upper);
}

/// One leapfrog step of signed size `step` from `start`
///
/// Positions leaving finite sampler bounds are reflected back, which keeps the integrator
/// volume-preserving and reversible. Costs exactly one evaluation.
pub(crate) fn leapfrog<P: LogDensity>(
    posterior: &mut P,
    metric: &DiagMetric,
    sampler_bounds: &PriorBounds,
    start: &Phase,
    step: f64,
) -> Result<Phase, LogpError> {
    let mut momentum: Vec<f64> = start
        .momentum
        .iter()
        .zip(start.gradient.iter())
        .map(|(p, g)| p + 0.5 * step * g)
        .collect();
    let mut position = start.position.clone();
    for (i, (x, var)) in position.iter_mut().zip(metric.variance()).enumerate() {
        *x += step * var * momentum[i];
        reflect(
            x,
            &mut momentum[i],
            sampler_bounds.lower()[i],
            sampler_bounds.upper()[i],
        );
    }

    let mut gradient = vec![0.0; position.len()];
    let ln_prob = posterior.log_density_and_gradient(&position, &mut gradient)?;
    for (p, g) in momentum.iter_mut().zip(gradient.iter()) {
        *p += 0.5 * step * g;
    }
    Ok(Phase {
        position,
        momentum,
        gradient,
        ln_prob,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::GaussianTarget;

    use approx::assert_abs_diff_eq;

    #[test]
    fn energy_nearly_conserved() {
        let mut target = GaussianTarget::standard(2);
        let metric = DiagMetric::from_scales(&[1.0, 1.0]);
        let bounds = PriorBounds::unbounded(2);
        let mut phase = Phase::at(&mut target, &[1.0, -0.5]).unwrap();
        phase.momentum = vec![0.3, 0.7];
        let h0 = phase.energy(&metric);
        for _ in 0..50 {
            phase = leapfrog(&mut target, &metric, &bounds, &phase, 0.05).unwrap();
        }
        assert_abs_diff_eq!(phase.energy(&metric), h0, epsilon = 1e-3);
        assert_eq!(target.ncall(), 51);
    }

    #[test]
    fn reversible() {
        let mut target = GaussianTarget::standard(2);
        let metric = DiagMetric::from_scales(&[1.5, 0.5]);
        let bounds = PriorBounds::unbounded(2);
        let mut start = Phase::at(&mut target, &[0.2, 0.4]).unwrap();
        start.momentum = vec![-0.3, 1.1];
        let forward = leapfrog(&mut target, &metric, &bounds, &start, 0.1).unwrap();
        let backward = leapfrog(&mut target, &metric, &bounds, &forward, -0.1).unwrap();
        for (a, b) in backward.position.iter().zip(start.position.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn reflects_at_bounds() {
        let mut x = 1.3;
        let mut p = 2.0;
        reflect(&mut x, &mut p, 0.0, 1.0);
        assert_abs_diff_eq!(x, 0.7, epsilon = 1e-12);
        assert_eq!(p, -2.0);

        let mut x = -0.25;
        let mut p = -1.0;
        reflect(&mut x, &mut p, 0.0, 1.0);
        assert_abs_diff_eq!(x, 0.25, epsilon = 1e-12);
        assert_eq!(p, 1.0);

        // many bounces end inside the interval
        let mut x = 57.3;
        let mut p = 1.0;
        reflect(&mut x, &mut p, 0.0, 1.0);
        assert!((0.0..=1.0).contains(&x));
    }
}
