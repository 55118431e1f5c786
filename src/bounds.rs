use crate::config::{ParameterRange, SceneConfig};
use crate::error::ConfigurationError;
use crate::scene::Scene;

use itertools::izip;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

pub(crate) fn within_bounds<'a, T>(
    x: impl IntoIterator<Item = &'a T>,
    lower: impl IntoIterator<Item = &'a T>,
    upper: impl IntoIterator<Item = &'a T>,
) -> bool
where
    T: 'a + PartialOrd,
{
    izip!(x, lower, upper).all(|(x, lower, upper)| lower <= x && x <= upper)
}

fn check_plate_scale(plate_scale: f64) -> Result<(), ConfigurationError> {
    if plate_scale.is_finite() && plate_scale > 0.0 {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidPlateScale(plate_scale))
    }
}

/// Closed per-parameter prior support `[lower, upper]` of the flat parameter vector
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PriorBounds {
    lower: Array1<f64>,
    upper: Array1<f64>,
}

impl PriorBounds {
    pub fn new(lower: Array1<f64>, upper: Array1<f64>) -> Result<Self, ConfigurationError> {
        if lower.len() != upper.len() {
            return Err(ConfigurationError::LengthMismatch {
                what: "upper bounds",
                actual: upper.len(),
                expected: lower.len(),
            });
        }
        for (index, (&lower, &upper)) in lower.iter().zip(upper.iter()).enumerate() {
            if lower.is_nan() || upper.is_nan() || lower > upper {
                return Err(ConfigurationError::InvertedBounds {
                    index,
                    lower,
                    upper,
                });
            }
        }
        Ok(Self { lower, upper })
    }

    /// `(-inf, +inf)` for every parameter
    pub fn unbounded(ndim: usize) -> Self {
        Self {
            lower: Array1::from_elem(ndim, f64::NEG_INFINITY),
            upper: Array1::from_elem(ndim, f64::INFINITY),
        }
    }

    /// Bounds of a scene whose positions are expressed in units where one pixel is
    /// `plate_scale`
    ///
    /// Positions are bounded by `position ± position_half_width * plate_scale` around the
    /// scene's current values, all other parameters use the fixed ranges of `config`.
    pub fn from_scene(
        scene: &Scene,
        plate_scale: f64,
        config: &SceneConfig,
    ) -> Result<Self, ConfigurationError> {
        check_plate_scale(plate_scale)?;
        let half_width = config.position_half_width * plate_scale;
        let mut lower = Vec::with_capacity(scene.ndim());
        let mut upper = Vec::with_capacity(scene.ndim());
        let mut push = |range: ParameterRange| {
            lower.push(range.lower);
            upper.push(range.upper);
        };
        for source in scene.sources() {
            for _ in 0..source.nfilters() {
                push(config.flux_range);
            }
            for position in [source.x, source.y] {
                push(ParameterRange {
                    lower: position - half_width,
                    upper: position + half_width,
                });
            }
            push(config.q_range);
            push(config.pa_range);
            push(config.sersic_range);
            push(config.rh_range);
        }
        Self::new(lower.into(), upper.into())
    }

    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    pub fn lower(&self) -> &Array1<f64> {
        &self.lower
    }

    pub fn upper(&self) -> &Array1<f64> {
        &self.upper
    }

    pub fn width(&self) -> Array1<f64> {
        &self.upper - &self.lower
    }

    /// Whether both ends of every interval are finite
    pub fn is_finite(&self) -> bool {
        self.lower.iter().chain(self.upper.iter()).all(|x| x.is_finite())
    }

    /// Whether every component lies in its closed interval, vectors of wrong length never do
    pub fn contains(&self, theta: &[f64]) -> bool {
        theta.len() == self.dim() && within_bounds(theta, &self.lower, &self.upper)
    }

    /// Map unit-cube coordinates to parameters: `lower + (upper - lower) * u`
    pub fn prior_transform(&self, u: &[f64]) -> Array1<f64> {
        izip!(u, self.lower.iter(), self.upper.iter())
            .map(|(&u, &lower, &upper)| lower + (upper - lower) * u)
            .collect()
    }

    /// Inverse of [PriorBounds::prior_transform], zero for degenerate intervals
    pub fn inverse_prior_transform(&self, theta: &[f64]) -> Array1<f64> {
        izip!(theta, self.lower.iter(), self.upper.iter())
            .map(|(&x, &lower, &upper)| {
                let width = upper - lower;
                if width > 0.0 { (x - lower) / width } else { 0.0 }
            })
            .collect()
    }
}

/// Diagonal proposal scales in flat-vector order
///
/// One scale per parameter type, replicated per source; the position scale is measured in
/// plate scales.
pub fn proposal_scales(
    scene: &Scene,
    plate_scale: f64,
    config: &SceneConfig,
) -> Result<Array1<f64>, ConfigurationError> {
    check_plate_scale(plate_scale)?;
    let scales = &config.proposal_scales;
    let position = scales.position_in_plate_scales * plate_scale;
    let block: Vec<f64> = std::iter::repeat_n(scales.flux, scene.filters().len())
        .chain([position, position, scales.q, scales.pa, scales.sersic, scales.rh])
        .collect();
    Ok(block
        .iter()
        .copied()
        .cycle()
        .take(scene.ndim())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Source;

    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::f64::consts::FRAC_PI_2;

    fn scene() -> Scene {
        Scene::new(
            vec!["F090W".into()],
            vec![Source::from_tuple(10.0, 20.0, 20.0, 0.8, 0.3, 2.5, 0.05)],
        )
        .unwrap()
    }

    #[test]
    fn single_source_bounds() {
        let scene = scene();
        let bounds = PriorBounds::from_scene(&scene, 0.05, &SceneConfig::default()).unwrap();
        let lower = bounds.lower();
        let upper = bounds.upper();
        assert_abs_diff_eq!(lower[0], 0.0);
        assert_abs_diff_eq!(upper[0], 12.0);
        for i in [1, 2] {
            assert_abs_diff_eq!(lower[i], 19.85, epsilon = 1e-12);
            assert_abs_diff_eq!(upper[i], 20.15, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(lower[3], 0.3);
        assert_abs_diff_eq!(upper[3], 1.0);
        assert_abs_diff_eq!(lower[4], -FRAC_PI_2);
        assert_abs_diff_eq!(upper[4], FRAC_PI_2);
        assert_abs_diff_eq!(lower[5], 1.2);
        assert_abs_diff_eq!(upper[5], 5.0);
        assert_abs_diff_eq!(lower[6], 0.015);
        assert_abs_diff_eq!(upper[6], 0.12);

        let theta0 = scene.theta();
        assert!(bounds.contains(theta0.as_slice().unwrap()));
        let mut negative_flux = theta0.clone();
        negative_flux[0] = -1.0;
        assert!(!bounds.contains(negative_flux.as_slice().unwrap()));
        assert!(!bounds.contains(&theta0.as_slice().unwrap()[..6]));
    }

    #[test]
    fn closed_interval() {
        let bounds = PriorBounds::new(array![0.0, -1.0], array![1.0, 1.0]).unwrap();
        assert!(bounds.contains(&[0.0, 1.0]));
        assert!(!bounds.contains(&[0.0, 1.0 + 1e-12]));
        assert!(!bounds.contains(&[f64::NAN, 0.0]));
    }

    #[test]
    fn invalid_bounds() {
        assert_eq!(
            PriorBounds::new(array![0.0, 2.0], array![1.0, 1.0]).unwrap_err(),
            ConfigurationError::InvertedBounds {
                index: 1,
                lower: 2.0,
                upper: 1.0
            }
        );
        assert!(PriorBounds::new(array![0.0], array![1.0, 2.0]).is_err());
        assert_eq!(
            PriorBounds::from_scene(&scene(), 0.0, &SceneConfig::default()).unwrap_err(),
            ConfigurationError::InvalidPlateScale(0.0)
        );
    }

    #[test]
    fn unit_cube_round_trip() {
        let bounds = PriorBounds::from_scene(&scene(), 0.05, &SceneConfig::default()).unwrap();
        let u = [0.1, 0.0, 1.0, 0.5, 0.25, 0.75, 0.99];
        let theta = bounds.prior_transform(&u);
        assert!(bounds.contains(theta.as_slice().unwrap()));
        assert_abs_diff_eq!(theta[0], 1.2, epsilon = 1e-12);
        let back = bounds.inverse_prior_transform(theta.as_slice().unwrap());
        assert_abs_diff_eq!(back, Array1::from(u.to_vec()), epsilon = 1e-12);
    }

    #[test]
    fn unbounded_contains_everything() {
        let bounds = PriorBounds::unbounded(3);
        assert!(!bounds.is_finite());
        assert!(bounds.contains(&[-1e300, 0.0, 1e300]));
    }

    #[test]
    fn proposal_scales_replicate_per_source() {
        let scene = Scene::new(
            vec!["F090W".into(), "F200W".into()],
            vec![
                Source {
                    flux: vec![1.0, 1.0],
                    x: 0.0,
                    y: 0.0,
                    q: 0.9,
                    pa: 0.0,
                    n: 2.0,
                    rh: 0.05,
                };
                2
            ],
        )
        .unwrap();
        let scales = proposal_scales(&scene, 0.05, &SceneConfig::default()).unwrap();
        let block = array![1.0, 1.0, 0.05, 0.05, 0.1, 0.1, 0.1, 0.01];
        assert_eq!(scales.len(), 16);
        assert_abs_diff_eq!(scales.slice(ndarray::s![..8]), block.view(), epsilon = 1e-15);
        assert_abs_diff_eq!(scales.slice(ndarray::s![8..]), block.view(), epsilon = 1e-15);
    }
}
