use crate::array_stats::logsumexp;
use crate::bounds::PriorBounds;
use crate::error::ConfigurationError;
use crate::forward_model::ForwardModel;
use crate::plan::WorkPlan;
use crate::posterior::{BoundedPosterior, BoundsConvention};
use crate::prior::LnPrior;
use crate::sampler::{Diagnostics, PhaseSummary, PosteriorSampler, RunOutcome};
use crate::scene::Scene;
use crate::stamp::Stamp;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Where a record comes from
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Provenance {
    pub crate_version: String,
    pub backend: String,
    pub seed: u64,
    pub bounds_convention: BoundsConvention,
    pub created_unix_seconds: u64,
}

impl Provenance {
    pub(crate) fn now(backend: &str, seed: u64, bounds_convention: BoundsConvention) -> Self {
        let created_unix_seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |duration| duration.as_secs());
        Self {
            crate_version: env!("CARGO_PKG_VERSION").to_owned(),
            backend: backend.to_owned(),
            seed,
            bounds_convention,
            created_unix_seconds,
        }
    }
}

/// Immutable result of a completed run
///
/// The record owns the scene, the prepared work plans with their stamps, the bounds and the
/// prior penalty, so the posterior can be rebuilt exactly without the original catalogs and
/// images, which may differ from the prepared stamps after background subtraction and the
/// switch to the pixel frame.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    ndim: usize,
    filters: Vec<String>,
    parameter_names: Vec<String>,
    scene: Scene,
    plans: Vec<WorkPlan>,
    bounds: PriorBounds,
    ln_prior: LnPrior,
    proposal_scales: Array1<f64>,
    truths: Option<Array1<f64>>,
    theta0: Array1<f64>,
    samples: Array2<f64>,
    ln_prob: Array1<f64>,
    best: Array1<f64>,
    best_ln_prob: f64,
    warmup: PhaseSummary,
    sampling: PhaseSummary,
    diagnostics: Diagnostics,
    sampler: PosteriorSampler,
    provenance: Provenance,
}

impl RunRecord {
    pub(crate) fn new<M>(
        posterior: &BoundedPosterior<M>,
        proposal_scales: Array1<f64>,
        truths: Option<Array1<f64>>,
        theta0: Array1<f64>,
        sampler: PosteriorSampler,
        outcome: RunOutcome,
        provenance: Provenance,
    ) -> Self
    where
        M: ForwardModel,
    {
        let scene = posterior.scene().clone();
        Self {
            ndim: scene.ndim(),
            filters: scene.filters().to_vec(),
            parameter_names: scene.parameter_names(),
            plans: posterior.plans().to_vec(),
            bounds: posterior.bounds().clone(),
            ln_prior: posterior.ln_prior().clone(),
            scene,
            proposal_scales,
            truths,
            theta0,
            samples: outcome.samples,
            ln_prob: outcome.ln_prob,
            best: outcome.best,
            best_ln_prob: outcome.best_ln_prob,
            warmup: outcome.warmup,
            sampling: outcome.sampling,
            diagnostics: outcome.diagnostics,
            sampler,
            provenance,
        }
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    pub fn parameter_names(&self) -> &[String] {
        &self.parameter_names
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn plans(&self) -> &[WorkPlan] {
        &self.plans
    }

    /// Prepared stamps in the order of the plans
    pub fn stamps(&self) -> impl Iterator<Item = &Stamp> {
        self.plans.iter().map(|plan| plan.stamp())
    }

    pub fn bounds(&self) -> &PriorBounds {
        &self.bounds
    }

    pub fn ln_prior(&self) -> &LnPrior {
        &self.ln_prior
    }

    pub fn proposal_scales(&self) -> &Array1<f64> {
        &self.proposal_scales
    }

    pub fn truths(&self) -> Option<&Array1<f64>> {
        self.truths.as_ref()
    }

    pub fn theta0(&self) -> &Array1<f64> {
        &self.theta0
    }

    /// Chain draws or nested-sampling dead points, one row per sample
    pub fn samples(&self) -> &Array2<f64> {
        &self.samples
    }

    pub fn ln_prob(&self) -> &Array1<f64> {
        &self.ln_prob
    }

    pub fn best(&self) -> &Array1<f64> {
        &self.best
    }

    pub fn best_ln_prob(&self) -> f64 {
        self.best_ln_prob
    }

    pub fn warmup(&self) -> &PhaseSummary {
        &self.warmup
    }

    /// Cost of the main phase
    pub fn sampling(&self) -> &PhaseSummary {
        &self.sampling
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn sampler(&self) -> &PosteriorSampler {
        &self.sampler
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn convention(&self) -> BoundsConvention {
        self.provenance.bounds_convention
    }

    /// Normalized weights of the samples
    ///
    /// Nested-sampling dead points carry importance weights, chain draws are equally weighted.
    pub fn weights(&self) -> Array1<f64> {
        match &self.diagnostics {
            Diagnostics::Nested { logwt, .. } if !logwt.is_empty() => {
                let norm = logsumexp(logwt.iter());
                logwt.mapv(|w| (w - norm).exp())
            }
            _ => {
                let n = self.samples.nrows();
                Array1::from_elem(n, 1.0 / n.max(1) as f64)
            }
        }
    }

    /// Posterior adapter equivalent to the one the record was produced with
    pub fn rebuild_posterior<M>(&self, model: M) -> Result<BoundedPosterior<M>, ConfigurationError>
    where
        M: ForwardModel,
    {
        BoundedPosterior::new(
            model,
            self.scene.clone(),
            self.plans.clone(),
            self.bounds.clone(),
            self.convention(),
        )?
        .with_ln_prior(self.ln_prior.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{Inference, InferenceConfig};
    use crate::posterior::LogDensity;
    use crate::sampler::{NestedSampler, NutsSampler};
    use crate::tests::*;

    use approx::assert_abs_diff_eq;

    fn nuts_record() -> RunRecord {
        let (posterior, theta0) = gaussian_blob_posterior(BoundsConvention::Internal);
        let config = InferenceConfig::new(NutsSampler::new(0, 10)).with_seed(3);
        Inference::new(posterior, theta0, config)
            .unwrap()
            .with_truths(Array1::from(vec![9.0, 7.2, 7.9, 0.8, 0.3, 2.5, 0.05]))
            .unwrap()
            .run()
            .unwrap()
    }

    #[test]
    fn record_carries_run_configuration() {
        let record = nuts_record();
        assert_eq!(record.ndim(), 7);
        assert_eq!(record.filters(), &["F090W".to_owned()]);
        assert_eq!(record.parameter_names().len(), 7);
        assert_eq!(record.stamps().count(), 1);
        assert_eq!(record.proposal_scales(), &Array1::<f64>::ones(7));
        assert_eq!(record.truths().map(|t| t[0]), Some(9.0));
        assert_eq!(record.provenance().backend, "NUTS");
        assert_eq!(record.provenance().crate_version, env!("CARGO_PKG_VERSION"));
        assert_eq!(record.convention(), BoundsConvention::Internal);
        assert_eq!(record.samples().nrows(), record.ln_prob().len());
    }

    #[test]
    fn chain_weights_are_uniform() {
        let record = nuts_record();
        let weights = record.weights();
        assert_eq!(weights.len(), 10);
        assert_abs_diff_eq!(weights.sum(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(weights[0], 0.1, epsilon = 1e-12);
    }

    #[test]
    fn serialization() {
        let record = nuts_record();
        let json = serde_json::to_string(&record).unwrap();
        let restored: RunRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, record);
    }

    #[test]
    fn rebuilt_posterior_reproduces_best_ln_prob() {
        let record = nuts_record();
        let mut posterior = record.rebuild_posterior(GaussianBlob { sigma: 1.5 }).unwrap();
        let ln_p = posterior
            .log_density(record.best().as_slice().unwrap())
            .unwrap();
        assert_abs_diff_eq!(ln_p, record.best_ln_prob(), epsilon = 1e-9);
        assert_eq!(posterior.ncall(), 1);
    }

    #[test]
    fn nested_weights_are_normalized() {
        let (posterior, theta0) = gaussian_blob_posterior(BoundsConvention::SamplerTransform);
        let config = InferenceConfig::new(NestedSampler {
            nlive_init: 20,
            nlive_batch: 20,
            max_batches: 1,
            dlogz_init: 0.5,
            ..NestedSampler::default()
        })
        .with_seed(0);
        let record = Inference::new(posterior, theta0, config)
            .unwrap()
            .run()
            .unwrap();
        let weights = record.weights();
        assert_eq!(weights.len(), record.samples().nrows());
        assert_abs_diff_eq!(weights.sum(), 1.0, epsilon = 1e-9);
        assert!(weights.iter().all(|&w| w >= 0.0));
    }
}
