//! Dynamic nested sampling on the unit hypercube
//!
//! The sampler never sees the parameter vector directly: live points live in `[0, 1]^ndim`
//! and are mapped to parameters by [PriorBounds::prior_transform], so the prior is uniform
//! inside the bounds. A baseline run with `nlive_init` live points is followed by batches of
//! `nlive_batch` points concentrated where the posterior mass is. Every point remembers the
//! likelihood threshold it was born at, which is all that is needed to merge runs: the number
//! of live points at level `L` is the number of points born below `L` that die at or above it.
//!
//! New points are drawn from the constrained prior with axis-aligned slice sampling.
//!
//! The batch phase stops on the fractional posterior error: the prior volumes of the merged
//! run are re-simulated `stopping_simulations` times and the run is complete once the spread
//! of the KL divergence between the simulated and the expected importance weights falls to
//! `posterior_threshold`.

use crate::array_stats::{effective_sample_size, logaddexp, logsumexp};
use crate::bounds::PriorBounds;
use crate::error::{ConfigurationError, LogpError, SamplerError};
use crate::posterior::{BoundsConvention, LogDensity};
use crate::sampler::{
    Diagnostics, PhaseSummary, PosteriorSamplerTrait, RunOutcome, WarmupState, check_convention,
};

use itertools::izip;
use log::debug;
use ndarray::{Array1, Array2};
use rand::Rng;
use rand::seq::SliceRandom;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

const MAX_STEP_OUT: usize = 100;
const MIN_SLICE_WIDTH: f64 = 1e-4;
const MIN_SHRUNK_WIDTH: f64 = 1e-12;
const HIGH_WEIGHT_FRACTION: f64 = 0.8;

/// Dynamic nested sampler
///
/// Requires [BoundsConvention::SamplerTransform] and finite bounds. Warm-up evaluates the
/// initial vector once and runs the baseline until the estimated remaining evidence changes
/// `ln Z` by less than `dlogz_init`. Sampling adds posterior-focused batches, at least one
/// unless `max_batches` is zero, until the standard deviation of the KL divergence over
/// `stopping_simulations` jittered copies of the run is at most `posterior_threshold` or
/// `max_batches` batches were run. `max_call` bounds the evaluations of the whole run,
/// running out of them is a backend failure.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename = "Nested")]
pub struct NestedSampler {
    pub nlive_init: usize,
    pub nlive_batch: usize,
    pub max_batches: usize,
    pub dlogz_init: f64,
    pub posterior_threshold: f64,
    pub slices: usize,
    pub max_call: u64,
    pub stopping_simulations: usize,
}

impl NestedSampler {
    #[inline]
    pub fn default_nlive_init() -> usize {
        25
    }

    #[inline]
    pub fn default_nlive_batch() -> usize {
        50
    }

    #[inline]
    pub fn default_max_batches() -> usize {
        10
    }

    #[inline]
    pub fn default_dlogz_init() -> f64 {
        0.01
    }

    #[inline]
    pub fn default_posterior_threshold() -> f64 {
        0.2
    }

    #[inline]
    pub fn default_slices() -> usize {
        5
    }

    #[inline]
    pub fn default_max_call() -> u64 {
        1_000_000
    }

    #[inline]
    pub fn default_stopping_simulations() -> usize {
        128
    }
}

impl Default for NestedSampler {
    fn default() -> Self {
        Self {
            nlive_init: Self::default_nlive_init(),
            nlive_batch: Self::default_nlive_batch(),
            max_batches: Self::default_max_batches(),
            dlogz_init: Self::default_dlogz_init(),
            posterior_threshold: Self::default_posterior_threshold(),
            slices: Self::default_slices(),
            max_call: Self::default_max_call(),
            stopping_simulations: Self::default_stopping_simulations(),
        }
    }
}

#[derive(Clone, Debug)]
struct NestedPoint {
    u: Vec<f64>,
    theta: Vec<f64>,
    logl: f64,
    /// Likelihood threshold the point was drawn above
    birth: f64,
}

/// Baseline run handed to the batch phase
#[derive(Clone, Debug)]
pub struct NestedWarmup {
    points: Vec<NestedPoint>,
    calls: u64,
    logz: f64,
}

impl NestedWarmup {
    /// Estimate of `ln Z` from the baseline run alone
    pub fn logz(&self) -> f64 {
        self.logz
    }

    pub fn npoints(&self) -> usize {
        self.points.len()
    }

    /// Evaluations spent on the baseline, the initial vector included
    pub fn calls(&self) -> u64 {
        self.calls
    }

    /// Maximum log-likelihood vector found by the baseline
    pub fn best(&self) -> &[f64] {
        self.points
            .iter()
            .max_by(|a, b| a.logl.total_cmp(&b.logl))
            .map_or(&[], |p| p.theta.as_slice())
    }
}

enum Failure {
    Budget(u64),
    Shrink,
    Plateau(f64),
}

impl Failure {
    fn message(&self) -> String {
        match self {
            Self::Budget(max_call) => format!("nested sampling exhausted max_call = {max_call}"),
            Self::Shrink => "slice sampling failed to shrink onto the constrained prior".into(),
            Self::Plateau(threshold) => {
                format!("no live point lies above the likelihood threshold {threshold}")
            }
        }
    }
}

enum Until {
    /// Remaining evidence changes `ln Z` by at most `dlogz`
    Converged { dlogz: f64 },
    /// Worst live point reaches `logl_max`
    Reaches { logl_max: f64 },
}

struct Explorer<'a, P, R: ?Sized> {
    posterior: &'a mut P,
    bounds: PriorBounds,
    rng: &'a mut R,
    slices: usize,
    max_call: u64,
    calls: u64,
}

impl<P, R> Explorer<'_, P, R>
where
    P: LogDensity,
    R: Rng + ?Sized,
{
    /// Failed evaluations count as zero likelihood, the candidate is discarded
    fn loglike(&mut self, u: &[f64]) -> Result<(Vec<f64>, f64), Failure> {
        if self.calls >= self.max_call {
            return Err(Failure::Budget(self.max_call));
        }
        self.calls += 1;
        let theta = self.bounds.prior_transform(u).to_vec();
        let logl = self
            .posterior
            .log_density(&theta)
            .unwrap_or(f64::NEG_INFINITY);
        Ok((theta, logl))
    }

    fn uniform_point(&mut self, birth: f64) -> Result<NestedPoint, Failure> {
        loop {
            let u: Vec<f64> = (0..self.bounds.dim()).map(|_| self.rng.random()).collect();
            let (theta, logl) = self.loglike(&u)?;
            if logl > birth {
                return Ok(NestedPoint {
                    u,
                    theta,
                    logl,
                    birth,
                });
            }
        }
    }

    /// Axis-aligned slice sampling of the prior restricted to `logl > threshold`
    fn slice_point(
        &mut self,
        start: &NestedPoint,
        threshold: f64,
        widths: &[f64],
    ) -> Result<NestedPoint, Failure> {
        let mut u = start.u.clone();
        let mut theta = start.theta.clone();
        let mut logl = start.logl;
        let mut axes: Vec<usize> = (0..u.len()).collect();
        for _ in 0..self.slices {
            axes.shuffle(&mut *self.rng);
            for &axis in axes.iter() {
                let x0 = u[axis];
                let w = widths[axis];
                let mut left = x0 - self.rng.random::<f64>() * w;
                let mut right = left + w;
                for _ in 0..MAX_STEP_OUT {
                    if !self.above(&mut u, axis, left, threshold)? {
                        break;
                    }
                    left -= w;
                }
                for _ in 0..MAX_STEP_OUT {
                    if !self.above(&mut u, axis, right, threshold)? {
                        break;
                    }
                    right += w;
                }

                loop {
                    if right - left < MIN_SHRUNK_WIDTH {
                        return Err(Failure::Shrink);
                    }
                    let x = left + self.rng.random::<f64>() * (right - left);
                    u[axis] = x;
                    if (0.0..=1.0).contains(&x) {
                        let (candidate_theta, candidate_logl) = self.loglike(&u)?;
                        if candidate_logl > threshold {
                            theta = candidate_theta;
                            logl = candidate_logl;
                            break;
                        }
                    }
                    if x < x0 {
                        left = x;
                    } else {
                        right = x;
                    }
                }
            }
        }
        Ok(NestedPoint {
            u,
            theta,
            logl,
            birth: threshold,
        })
    }

    /// Whether `u` with `u[axis] = x` lies above the threshold, `u[axis]` is restored
    fn above(&mut self, u: &mut [f64], axis: usize, x: f64, threshold: f64) -> Result<bool, Failure> {
        if !(0.0..=1.0).contains(&x) {
            return Ok(false);
        }
        let x0 = std::mem::replace(&mut u[axis], x);
        let result = self.loglike(u);
        u[axis] = x0;
        Ok(result?.1 > threshold)
    }

    /// Draw `n` points above `birth`, seeded from `seeds` when the threshold is finite
    fn fill_live(
        &mut self,
        n: usize,
        birth: f64,
        seeds: &[NestedPoint],
        live: &mut Vec<NestedPoint>,
    ) -> Result<(), Failure> {
        if birth == f64::NEG_INFINITY {
            while live.len() < n {
                live.push(self.uniform_point(birth)?);
            }
            return Ok(());
        }
        let seeds: Vec<&NestedPoint> = seeds.iter().filter(|p| p.logl > birth).collect();
        if seeds.is_empty() {
            return Err(Failure::Plateau(birth));
        }
        let widths = slice_widths(seeds.iter().copied());
        while live.len() < n {
            let seed = seeds[self.rng.random_range(0..seeds.len())];
            live.push(self.slice_point(seed, birth, &widths)?);
        }
        Ok(())
    }

    /// Replace the worst live point until `until` holds, moving every point to `dead`
    ///
    /// Live points are moved to `dead` whether the run succeeds or fails, so that a failure
    /// keeps everything evaluated so far.
    fn evolve(
        &mut self,
        mut live: Vec<NestedPoint>,
        until: Until,
        dead: &mut Vec<NestedPoint>,
    ) -> Result<f64, Failure> {
        let nlive = live.len() as f64;
        let mut lnx = 0.0;
        let mut logz = f64::NEG_INFINITY;
        let result = loop {
            let Some(iworst) = live
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.logl.total_cmp(&b.logl))
                .map(|(i, _)| i)
            else {
                break Ok(logz);
            };
            let threshold = live[iworst].logl;
            let done = match until {
                Until::Converged { dlogz } => {
                    let max_logl = live.iter().map(|p| p.logl).fold(f64::NEG_INFINITY, f64::max);
                    logaddexp(logz, max_logl + lnx) - logz <= dlogz
                }
                Until::Reaches { logl_max } => threshold >= logl_max,
            };
            if done {
                break Ok(logz);
            }

            let logwt = threshold + lnx + (-(-1.0 / nlive).exp_m1()).ln();
            logz = logaddexp(logz, logwt);
            lnx -= 1.0 / nlive;

            let seeds: Vec<&NestedPoint> = live
                .iter()
                .enumerate()
                .filter(|&(i, p)| i != iworst && p.logl > threshold)
                .map(|(_, p)| p)
                .collect();
            if seeds.is_empty() {
                break Err(Failure::Plateau(threshold));
            }
            let widths = slice_widths(live.iter());
            let seed = seeds[self.rng.random_range(0..seeds.len())].clone();
            match self.slice_point(&seed, threshold, &widths) {
                Ok(point) => dead.push(std::mem::replace(&mut live[iworst], point)),
                Err(failure) => break Err(failure),
            }
        };
        dead.append(&mut live);
        result
    }
}

/// Twice the spread of the points along every axis of the unit cube
fn slice_widths<'a>(points: impl Iterator<Item = &'a NestedPoint> + Clone) -> Vec<f64> {
    let n = points.clone().count() as f64;
    let Some(dim) = points.clone().next().map(|p| p.u.len()) else {
        return vec![];
    };
    (0..dim)
        .map(|axis| {
            let mean = points.clone().map(|p| p.u[axis]).sum::<f64>() / n;
            let var = points.clone().map(|p| (p.u[axis] - mean).powi(2)).sum::<f64>() / n;
            (2.0 * var.sqrt()).clamp(MIN_SLICE_WIDTH, 1.0)
        })
        .collect()
}

/// Merged run: points sorted by likelihood with their weights
struct Merged {
    points: Vec<NestedPoint>,
    logwt: Vec<f64>,
    nlive: Vec<usize>,
    logz: f64,
}

impl Merged {
    fn new(mut points: Vec<NestedPoint>) -> Self {
        points.sort_by(|a, b| a.logl.total_cmp(&b.logl));
        let mut births: Vec<f64> = points.iter().map(|p| p.birth).collect();
        births.sort_by(f64::total_cmp);

        let n = points.len();
        let mut logwt = Vec::with_capacity(n);
        let mut nlive = Vec::with_capacity(n);
        let mut lnx = 0.0;
        for (i, point) in points.iter().enumerate() {
            // alive at level L: born below L, dying at or above it
            let born_later = n - births.partition_point(|&b| b < point.logl);
            let n_i = (n - i).saturating_sub(born_later).max(1);
            let ln_n1 = ((n_i + 1) as f64).ln();
            logwt.push(point.logl + lnx - ln_n1);
            lnx += (n_i as f64).ln() - ln_n1;
            nlive.push(n_i);
        }
        let logz = logsumexp(logwt.iter());
        Self {
            points,
            logwt,
            nlive,
            logz,
        }
    }

    fn information(&self) -> f64 {
        let h: f64 = self
            .points
            .iter()
            .zip(self.logwt.iter())
            .filter(|(_, w)| w.is_finite())
            .map(|(p, w)| (w - self.logz).exp() * p.logl)
            .sum();
        h - self.logz
    }

    /// Variance of `ln Z` accumulated along the run with the local number of live points
    fn logz_variance(&self) -> f64 {
        let mut logz = f64::NEG_INFINITY;
        let mut h = 0.0;
        let mut variance = 0.0;
        for (point, &logwt, &nlive) in izip!(&self.points, &self.logwt, &self.nlive) {
            let logz_new = logaddexp(logz, logwt);
            let carried = if logz.is_finite() {
                (logz - logz_new).exp() * (h + logz)
            } else {
                0.0
            };
            let h_new = (logwt - logz_new).exp() * point.logl + carried - logz_new;
            variance += (h_new - h) * ((nlive + 1) as f64 / nlive as f64).ln();
            h = h_new;
            logz = logz_new;
        }
        variance.max(0.0)
    }

    /// Standard deviation of the KL divergence between jittered and expected posterior weights
    ///
    /// Every simulation draws the shrinkage of the prior volume at each point from
    /// `Beta(nlive, 1)` instead of using its expectation.
    fn posterior_spread<R: Rng + ?Sized>(&self, rng: &mut R, simulations: usize) -> f64 {
        let norm = logsumexp(self.logwt.iter());
        let divergences: Vec<f64> = (0..simulations)
            .map(|_| {
                let mut lnx = 0.0;
                let logwt: Vec<f64> = izip!(&self.points, &self.nlive)
                    .map(|(point, &nlive)| {
                        let ln_t = (1.0 - rng.random::<f64>()).ln() / nlive as f64;
                        let logwt = point.logl + lnx + (-ln_t.exp_m1()).ln();
                        lnx += ln_t;
                        logwt
                    })
                    .collect();
                let jittered_norm = logsumexp(logwt.iter());
                izip!(&logwt, &self.logwt)
                    .filter(|(w, _)| w.is_finite())
                    .map(|(w, w0)| {
                        let ln_p = w - jittered_norm;
                        ln_p.exp() * (ln_p - (w0 - norm))
                    })
                    .sum()
            })
            .collect();
        let n = divergences.len() as f64;
        let mean = divergences.iter().sum::<f64>() / n;
        let variance = divergences.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / (n - 1.0);
        variance.sqrt()
    }

    fn n_effective(&self) -> f64 {
        effective_sample_size(Array1::from(self.logwt.clone()).view())
    }

    /// Likelihood interval holding the points with weight of at least 80% of the maximum
    fn high_weight_interval(&self) -> Option<(f64, f64)> {
        let max = self.logwt.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            return None;
        }
        let cut = max + HIGH_WEIGHT_FRACTION.ln();
        let first = self.logwt.iter().position(|&w| w >= cut)?;
        let last = self.logwt.iter().rposition(|&w| w >= cut)?;
        let logl_min = match first {
            0 => f64::NEG_INFINITY,
            i => self.points[i - 1].logl,
        };
        Some((logl_min, self.points[last].logl))
    }

    fn into_outcome(self, n_batches: usize) -> Option<RunOutcome> {
        let dim = self.points.first()?.theta.len();
        let n_effective = self.n_effective();
        let information = self.information();
        let logz_err = self.logz_variance().sqrt();

        let flat: Vec<f64> = self.points.iter().flat_map(|p| p.theta.iter().copied()).collect();
        let samples = Array2::from_shape_vec((self.points.len(), dim), flat).ok()?;
        let ln_prob: Array1<f64> = self.points.iter().map(|p| p.logl).collect();
        let best_index = self.points.len() - 1;
        Some(RunOutcome {
            best: samples.row(best_index).to_owned(),
            best_ln_prob: ln_prob[best_index],
            samples,
            ln_prob,
            warmup: PhaseSummary::default(),
            sampling: PhaseSummary::default(),
            diagnostics: Diagnostics::Nested {
                logz: self.logz,
                logz_err,
                information,
                logwt: self.logwt.into(),
                nlive: self.nlive.into(),
                n_effective,
                n_batches,
            },
        })
    }
}

fn backend_failure(failure: Failure, points: Vec<NestedPoint>, n_batches: usize) -> SamplerError {
    SamplerError::Backend {
        message: failure.message(),
        partial: Merged::new(points).into_outcome(n_batches).map(Box::new),
    }
}

impl NestedSampler {
    fn explorer<'a, P, R>(
        &self,
        posterior: &'a mut P,
        rng: &'a mut R,
        calls: u64,
    ) -> Result<Explorer<'a, P, R>, ConfigurationError>
    where
        P: LogDensity,
        R: Rng + ?Sized,
    {
        check_convention(self, posterior.convention())?;
        let bounds = posterior.sampler_bounds();
        if !bounds.is_finite() {
            return Err(ConfigurationError::InvalidSetting(
                "nested sampling requires finite prior bounds".into(),
            ));
        }
        Ok(Explorer {
            posterior,
            bounds,
            rng,
            slices: self.slices,
            max_call: self.max_call,
            calls,
        })
    }
}

impl PosteriorSamplerTrait for NestedSampler {
    fn name(&self) -> &'static str {
        "nested sampling"
    }

    fn supports(&self, convention: BoundsConvention) -> bool {
        convention == BoundsConvention::SamplerTransform
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.nlive_init < 2 || self.nlive_batch < 2 {
            return Err(ConfigurationError::InvalidSetting(format!(
                "nested sampling needs at least two live points, got nlive_init = {} and nlive_batch = {}",
                self.nlive_init, self.nlive_batch
            )));
        }
        if self.stopping_simulations < 2 {
            return Err(ConfigurationError::InvalidSetting(format!(
                "nested sampling needs at least two stopping simulations, got {}",
                self.stopping_simulations
            )));
        }
        if self.slices == 0 {
            return Err(ConfigurationError::InvalidSetting(
                "nested sampling needs at least one slice".into(),
            ));
        }
        if !(self.dlogz_init > 0.0 && self.posterior_threshold > 0.0) {
            return Err(ConfigurationError::InvalidSetting(format!(
                "nested sampling stopping criteria must be positive, got dlogz_init = {} and posterior_threshold = {}",
                self.dlogz_init, self.posterior_threshold
            )));
        }
        if self.max_call == 0 {
            return Err(ConfigurationError::InvalidSetting(
                "nested sampling max_call must be positive".into(),
            ));
        }
        Ok(())
    }

    fn warm_up<P, R>(
        &self,
        posterior: &mut P,
        theta0: &[f64],
        _scales: &[f64],
        rng: &mut R,
    ) -> Result<WarmupState, SamplerError>
    where
        P: LogDensity,
        R: Rng + ?Sized,
    {
        if theta0.len() != posterior.dim() {
            return Err(ConfigurationError::ThetaLength {
                actual: theta0.len(),
                expected: posterior.dim(),
            }
            .into());
        }
        let mut explorer = self.explorer(posterior, rng, 0)?;
        explorer.calls += 1;
        match explorer.posterior.log_density(theta0) {
            Ok(lnp) if lnp > f64::NEG_INFINITY => {}
            Ok(_) => {
                return Err(SamplerError::InfeasibleStart {
                    theta: theta0.to_vec(),
                });
            }
            Err(LogpError::Configuration(err)) => return Err(err.into()),
            Err(LogpError::NonFinite { .. }) => {
                return Err(SamplerError::NonFiniteStart {
                    theta: theta0.to_vec(),
                });
            }
        }

        let mut live = Vec::with_capacity(self.nlive_init);
        let mut dead = vec![];
        let result = match explorer.fill_live(self.nlive_init, f64::NEG_INFINITY, &[], &mut live) {
            Ok(()) => explorer.evolve(
                live,
                Until::Converged {
                    dlogz: self.dlogz_init,
                },
                &mut dead,
            ),
            Err(failure) => {
                dead.append(&mut live);
                Err(failure)
            }
        };
        let logz = match result {
            Ok(logz) => logz,
            Err(failure) => return Err(backend_failure(failure, dead, 0)),
        };
        debug!(
            "nested baseline finished with {} points, ln Z = {logz}, {} calls",
            dead.len(),
            explorer.calls
        );
        Ok(WarmupState::Nested(NestedWarmup {
            points: dead,
            calls: explorer.calls,
            logz,
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
        let NestedWarmup { points, calls, .. } = match warmup {
            WarmupState::Nested(state) => state,
            other => {
                return Err(SamplerError::WrongWarmupState {
                    expected: self.name(),
                    actual: other.backend(),
                });
            }
        };
        let mut explorer = self.explorer(posterior, rng, calls)?;

        let mut n_batches = 0;
        let mut merged = Merged::new(points);
        while n_batches < self.max_batches {
            let Some((logl_min, logl_max)) = merged.high_weight_interval() else {
                break;
            };
            debug!("nested batch {n_batches} over ln L in ({logl_min}, {logl_max}]");
            let mut points = merged.points;

            let mut live = Vec::with_capacity(self.nlive_batch);
            let mut batch = vec![];
            let result = match explorer.fill_live(self.nlive_batch, logl_min, &points, &mut live) {
                Ok(()) => explorer
                    .evolve(live, Until::Reaches { logl_max }, &mut batch)
                    .map(|_| ()),
                Err(failure) => {
                    batch.append(&mut live);
                    Err(failure)
                }
            };
            points.append(&mut batch);
            n_batches += 1;
            if let Err(failure) = result {
                return Err(backend_failure(failure, points, n_batches));
            }

            merged = Merged::new(points);
            let spread = merged.posterior_spread(&mut *explorer.rng, self.stopping_simulations);
            debug!(
                "nested batch {n_batches} merged: {} points, posterior spread {spread}",
                merged.points.len()
            );
            if spread <= self.posterior_threshold {
                break;
            }
        }

        merged
            .into_outcome(n_batches)
            .ok_or_else(|| SamplerError::backend("nested sampling produced no points"))
    }
}
