use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::ops::Range;

const INITIAL_BUFFER: usize = 75;
const BASE_WINDOW: usize = 25;
const TERMINAL_BUFFER: usize = 50;

/// Diagonal inverse mass matrix
///
/// Kinetic energy is `p^T diag(variance) p / 2`, the variance approximates the posterior
/// variance of each parameter.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DiagMetric {
    variance: Vec<f64>,
}

impl DiagMetric {
    pub fn new(variance: Vec<f64>) -> Self {
        Self { variance }
    }

    /// Metric whose variance is the square of the given proposal scales
    pub fn from_scales(scales: &[f64]) -> Self {
        Self::new(scales.iter().map(|s| s.powi(2)).collect())
    }

    pub fn dim(&self) -> usize {
        self.variance.len()
    }

    pub fn variance(&self) -> &[f64] {
        &self.variance
    }

    /// Diagonal of the mass matrix, `1 / variance`
    pub fn mass_matrix(&self) -> Vec<f64> {
        self.variance.iter().map(|v| v.recip()).collect()
    }

    pub fn kinetic_energy(&self, momentum: &[f64]) -> f64 {
        0.5 * momentum
            .iter()
            .zip(self.variance.iter())
            .map(|(p, v)| p.powi(2) * v)
            .sum::<f64>()
    }

    pub fn velocity(&self, momentum: &[f64], out: &mut [f64]) {
        for ((v_out, p), v) in out.iter_mut().zip(momentum).zip(self.variance.iter()) {
            *v_out = p * v;
        }
    }

    /// `rho . velocity`
    pub fn project(&self, rho: &[f64], momentum: &[f64]) -> f64 {
        rho.iter()
            .zip(momentum)
            .zip(self.variance.iter())
            .map(|((r, p), v)| r * p * v)
            .sum()
    }

    /// Draw a momentum from `N(0, M)`
    pub fn sample_momentum<R: Rng + ?Sized>(&self, rng: &mut R, out: &mut [f64]) {
        for (p, v) in out.iter_mut().zip(self.variance.iter()) {
            let z: f64 = rng.sample(StandardNormal);
            *p = z / v.sqrt();
        }
    }
}

/// Welford accumulator of per-component variance
#[derive(Clone, Debug)]
pub(crate) struct RunningVariance {
    n: usize,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl RunningVariance {
    pub(crate) fn new(dim: usize) -> Self {
        Self {
            n: 0,
            mean: vec![0.0; dim],
            m2: vec![0.0; dim],
        }
    }

    pub(crate) fn reset(&mut self) {
        self.n = 0;
        self.mean.fill(0.0);
        self.m2.fill(0.0);
    }

    pub(crate) fn count(&self) -> usize {
        self.n
    }

    pub(crate) fn update(&mut self, x: &[f64]) {
        self.n += 1;
        let n = self.n as f64;
        for ((mean, m2), &x) in self.mean.iter_mut().zip(self.m2.iter_mut()).zip(x) {
            let delta = x - *mean;
            *mean += delta / n;
            *m2 += delta * (x - *mean);
        }
    }

    /// Sample variance shrunk towards `1e-3`: `n / (n + 5) var + 1e-3 * 5 / (n + 5)`
    pub(crate) fn regularized_variance(&self) -> Vec<f64> {
        let n = self.n as f64;
        self.m2
            .iter()
            .map(|m2| {
                let var = if self.n > 1 { m2 / (n - 1.0) } else { 0.0 };
                n / (n + 5.0) * var + 1e-3 * 5.0 / (n + 5.0)
            })
            .collect()
    }
}

/// Metric adaptation windows of a warm-up of the given length
///
/// After an initial buffer, windows start at 25 iterations and double, the last window is
/// stretched to the terminal buffer. Warm-ups too short to hold both buffers and one window
/// have no windows.
pub(crate) fn adaptation_windows(num_warmup: usize) -> Vec<Range<usize>> {
    if num_warmup < INITIAL_BUFFER + BASE_WINDOW + TERMINAL_BUFFER {
        return vec![];
    }
    let last_end = num_warmup - TERMINAL_BUFFER;
    let mut windows = vec![];
    let mut start = INITIAL_BUFFER;
    let mut size = BASE_WINDOW;
    while start < last_end {
        let mut end = start + size;
        if end + 2 * size > last_end {
            end = last_end;
        }
        windows.push(start..end);
        start = end;
        size *= 2;
    }
    windows
}
