use crate::sampler::{RunOutcome, RunPhase};

/// Errors raised while preparing a run, always before any sampling begins
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigurationError {
    #[error("catalog line {line}: {message}")]
    CatalogRow { line: usize, message: String },

    #[error("cannot read catalog: {0}")]
    CatalogRead(String),

    #[error("astrometric Jacobian {dpix_dsky:?} is singular")]
    SingularJacobian { dpix_dsky: [[f64; 2]; 2] },

    #[error("plate scale must be positive and finite, got {0}")]
    InvalidPlateScale(f64),

    #[error("parameter vector has length {actual}, scene requires {expected}")]
    ThetaLength { actual: usize, expected: usize },

    #[error("{what} has length {actual}, {expected} is required")]
    LengthMismatch {
        what: &'static str,
        actual: usize,
        expected: usize,
    },

    #[error("lower bound {lower} exceeds upper bound {upper} for parameter {index}")]
    InvertedBounds { index: usize, lower: f64, upper: f64 },

    #[error("scene has no sources")]
    EmptyScene,

    #[error("scene has no filters")]
    NoFilters,

    #[error("stamp shape mismatch: pixel values {pixels:?}, inverse errors {ierr:?}")]
    StampShape {
        pixels: (usize, usize),
        ierr: (usize, usize),
    },

    #[error("stamp astrometry is already pixel-normalized")]
    AlreadyPixelFrame,

    #[error("filter {0} is not part of the scene")]
    UnknownFilter(String),

    #[error("sampler {sampler} does not support the {convention:?} bounds convention")]
    UnsupportedConvention {
        sampler: &'static str,
        convention: crate::posterior::BoundsConvention,
    },

    #[error("invalid sampler setting: {0}")]
    InvalidSetting(String),
}

/// Failure of a single posterior evaluation inside the prior support
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum LogpError {
    #[error("forward model returned a non-finite value at {theta:?}")]
    NonFinite { theta: Vec<f64> },

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

/// Errors returned by sampler backends
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SamplerError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("initial point {theta:?} is outside the prior support")]
    InfeasibleStart { theta: Vec<f64> },

    #[error("log-density is not finite at the initial point {theta:?}")]
    NonFiniteStart { theta: Vec<f64> },

    #[error("sampler backend failed: {message}")]
    Backend {
        message: String,
        partial: Option<Box<RunOutcome>>,
    },

    #[error("warm-up state of {actual} cannot be used by {expected}")]
    WrongWarmupState {
        expected: &'static str,
        actual: &'static str,
    },
}

/// Errors returned by [crate::Inference::run]
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("run failed while {phase:?}: {source}")]
    Sampler { phase: RunPhase, source: SamplerError },
}

impl SamplerError {
    pub(crate) fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            partial: None,
        }
    }
}

impl InferenceError {
    /// Results captured before a backend failure, if the backend produced any
    pub fn partial(&self) -> Option<&RunOutcome> {
        match self {
            Self::Sampler {
                source: SamplerError::Backend { partial, .. },
                ..
            } => partial.as_deref(),
            _ => None,
        }
    }
}
