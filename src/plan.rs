use crate::stamp::Stamp;

use itertools::izip;
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// A stamp bound to the likelihood machinery
///
/// The plan owns the pixel mask and a residual buffer reused by every likelihood evaluation
/// of its stamp. The buffer is not serialized and is allocated again on first use.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkPlan {
    stamp: Stamp,
    mask: Array2<bool>,
    #[serde(skip)]
    residual: Option<Array2<f64>>,
}

impl WorkPlan {
    /// Pixels are used when both the value and the inverse error are finite and `ierr > 0`
    pub fn new(stamp: Stamp) -> Self {
        let mut mask = Array2::from_elem(stamp.shape(), false);
        Zip::from(&mut mask)
            .and(stamp.pixel_values())
            .and(stamp.ierr())
            .for_each(|m, &value, &ierr| {
                *m = value.is_finite() && ierr.is_finite() && ierr > 0.0;
            });
        Self {
            stamp,
            mask,
            residual: None,
        }
    }

    pub fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    pub fn mask(&self) -> &Array2<bool> {
        &self.mask
    }

    pub fn npixels(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    pub fn into_stamp(self) -> Stamp {
        self.stamp
    }

    /// Normalized residual `(data - model) * ierr` of the last evaluation, zero outside the mask
    pub fn residual(&self) -> Option<&Array2<f64>> {
        self.residual.as_ref()
    }

    /// `-chi^2 / 2` of a model image of the stamp shape, filling the residual buffer
    ///
    /// Returns NaN if the model shape differs from the stamp shape.
    pub fn ln_likelihood_from_model(&mut self, model: &Array2<f64>) -> f64 {
        let shape = self.stamp.shape();
        if model.dim() != shape {
            return f64::NAN;
        }
        if self.residual.as_ref().is_some_and(|r| r.dim() != shape) {
            self.residual = None;
        }
        let residual = self.residual.get_or_insert_with(|| Array2::zeros(shape));
        let mut chi2 = 0.0;
        for (r, &m, &data, &ierr, &model) in izip!(
            residual.iter_mut(),
            self.mask.iter(),
            self.stamp.pixel_values().iter(),
            self.stamp.ierr().iter(),
            model.iter()
        ) {
            *r = if m { (data - model) * ierr } else { 0.0 };
            chi2 += r.powi(2);
        }
        -0.5 * chi2
    }
}

impl PartialEq for WorkPlan {
    fn eq(&self, other: &Self) -> bool {
        self.stamp == other.stamp && self.mask == other.mask
    }
}
