#![doc = include_str!("../README.md")]


mod array_stats;

pub mod bounds;
pub use bounds::{PriorBounds, proposal_scales};

pub mod catalog;
pub use catalog::{CatalogRow, read_catalog, scene_center, select_scene};

mod config;
pub use config::{ParameterRange, ProposalScaleConfig, SceneConfig};

mod error;
pub use error::{ConfigurationError, InferenceError, LogpError, SamplerError};

mod forward_model;
pub use forward_model::{ForwardModel, RenderedImage};

mod inference;
pub use inference::{Inference, InferenceConfig};

mod plan;
pub use plan::WorkPlan;

mod posterior;
pub use posterior::{BoundedPosterior, BoundsConvention, LogDensity, PosteriorParts};

pub mod prior;
pub use prior::{LnPrior, LnPrior1D};

mod result;
pub use result::{Provenance, RunRecord};

pub mod sampler;
pub use sampler::{
    BasicHmcSampler, Diagnostics, NestedSampler, NutsSampler, PhaseSummary, PosteriorSampler,
    PosteriorSamplerTrait, RunOutcome, RunPhase, TrajectoryStorage,
};

mod scene;
pub use scene::Scene;

mod source;
pub use source::Source;

pub mod stamp;
pub use stamp::{Astrometry, BackgroundEstimate, CoordinateFrame, PsfMixture, Stamp};

pub use ndarray;
