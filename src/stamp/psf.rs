use crate::error::ConfigurationError;
use crate::stamp::astrometry::{Matrix2, mat_mul, transpose};

use serde::{Deserialize, Serialize};

/// Point-spread function as a mixture of 2-d Gaussians in pixel coordinates
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PsfMixture {
    pub amplitudes: Vec<f64>,
    pub means: Vec<[f64; 2]>,
    pub covariances: Vec<Matrix2>,
}

impl PsfMixture {
    pub fn new(
        amplitudes: Vec<f64>,
        means: Vec<[f64; 2]>,
        covariances: Vec<Matrix2>,
    ) -> Result<Self, ConfigurationError> {
        for (what, len) in [("PSF means", means.len()), ("PSF covariances", covariances.len())] {
            if len != amplitudes.len() {
                return Err(ConfigurationError::LengthMismatch {
                    what,
                    actual: len,
                    expected: amplitudes.len(),
                });
            }
        }
        Ok(Self {
            amplitudes,
            means,
            covariances,
        })
    }

    /// Single circular Gaussian component centred at the origin
    pub fn gaussian(sigma: f64) -> Self {
        Self {
            amplitudes: vec![1.0],
            means: vec![[0.0; 2]],
            covariances: vec![[[sigma.powi(2), 0.0], [0.0, sigma.powi(2)]]],
        }
    }

    pub fn len(&self) -> usize {
        self.amplitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.amplitudes.is_empty()
    }

    /// Apply the linear map `t` to every component
    ///
    /// Covariances become `t C tᵀ`, means are right-multiplied as row vectors, `m t`.
    pub fn transformed(&self, t: &Matrix2) -> Self {
        let t_transposed = transpose(t);
        Self {
            amplitudes: self.amplitudes.clone(),
            means: self
                .means
                .iter()
                .map(|m| {
                    [
                        m[0] * t[0][0] + m[1] * t[1][0],
                        m[0] * t[0][1] + m[1] * t[1][1],
                    ]
                })
                .collect(),
            covariances: self
                .covariances
                .iter()
                .map(|c| mat_mul(t, &mat_mul(c, &t_transposed)))
                .collect(),
        }
    }

    /// Reflection through the origin in both pixel axes, `t = -I`
    ///
    /// This is the orientation convention that matches PSF mixtures fitted in the detector
    /// frame to images whose pixel axes run opposite to the mixture's. Covariances are
    /// invariant and means change sign.
    pub fn point_reflected(&self) -> Self {
        self.transformed(&[[-1.0, 0.0], [0.0, -1.0]])
    }
}
