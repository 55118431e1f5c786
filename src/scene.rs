use crate::catalog::CatalogRow;
use crate::config::SceneConfig;
use crate::error::ConfigurationError;
use crate::source::{SHAPE_PARAMS, Source};
use crate::stamp::Stamp;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Names of the non-flux parameters in flat-vector order
pub const SHAPE_PARAM_NAMES: [&str; SHAPE_PARAMS] = ["x", "y", "q", "pa", "n", "rh"];

/// Ordered collection of sources fitted together
///
/// The scene owns the layout of the flat parameter vector: source blocks are contiguous and
/// follow the scene order, each block is `[flux per filter.., x, y, q, pa, n, rh]`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Scene {
    filters: Vec<String>,
    sources: Vec<Source>,
}

impl Scene {
    pub fn new(filters: Vec<String>, sources: Vec<Source>) -> Result<Self, ConfigurationError> {
        if filters.is_empty() {
            return Err(ConfigurationError::NoFilters);
        }
        if sources.is_empty() {
            return Err(ConfigurationError::EmptyScene);
        }
        for source in sources.iter() {
            if source.nfilters() != filters.len() {
                return Err(ConfigurationError::LengthMismatch {
                    what: "source flux",
                    actual: source.nfilters(),
                    expected: filters.len(),
                });
            }
        }
        Ok(Self { filters, sources })
    }

    /// Scene of catalog sources with celestial positions
    pub fn from_catalog(
        rows: &[CatalogRow],
        filters: Vec<String>,
        config: &SceneConfig,
    ) -> Result<Self, ConfigurationError> {
        let sources = rows
            .iter()
            .map(|row| Source::from_catalog(row, filters.len(), config))
            .collect();
        Self::new(filters, sources)
    }

    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn nsources(&self) -> usize {
        self.sources.len()
    }

    pub fn params_per_source(&self) -> usize {
        self.filters.len() + SHAPE_PARAMS
    }

    /// Length of the flat parameter vector
    pub fn ndim(&self) -> usize {
        self.nsources() * self.params_per_source()
    }

    pub fn filter_index(&self, filter: &str) -> Result<usize, ConfigurationError> {
        self.filters
            .iter()
            .position(|f| f == filter)
            .ok_or_else(|| ConfigurationError::UnknownFilter(filter.to_string()))
    }

    /// Index range of the `i`-th source block in the flat vector
    pub fn source_range(&self, i: usize) -> Range<usize> {
        let n = self.params_per_source();
        i * n..(i + 1) * n
    }

    /// Flat parameter vector of the current source parameters
    pub fn theta(&self) -> Array1<f64> {
        let mut theta = Vec::with_capacity(self.ndim());
        for source in self.sources.iter() {
            source.write_params(&mut theta);
        }
        theta.into()
    }

    pub fn check_theta(&self, theta: &[f64]) -> Result<(), ConfigurationError> {
        if theta.len() == self.ndim() {
            Ok(())
        } else {
            Err(ConfigurationError::ThetaLength {
                actual: theta.len(),
                expected: self.ndim(),
            })
        }
    }

    /// Split a flat vector into per-source parameters
    pub fn split(&self, theta: &[f64]) -> Result<Vec<Source>, ConfigurationError> {
        self.check_theta(theta)?;
        theta
            .chunks_exact(self.params_per_source())
            .map(|block| Source::from_params(block, self.filters.len()))
            .collect()
    }

    /// Same scene with parameters taken from a flat vector
    pub fn with_theta(&self, theta: &[f64]) -> Result<Self, ConfigurationError> {
        Ok(Self {
            filters: self.filters.clone(),
            sources: self.split(theta)?,
        })
    }

    /// Parameter labels in flat-vector order, suffixed by the source index
    pub fn parameter_names(&self) -> Vec<String> {
        (0..self.nsources())
            .flat_map(|i| {
                self.filters
                    .iter()
                    .map(String::as_str)
                    .chain(SHAPE_PARAM_NAMES)
                    .map(move |name| format!("{name}_{i}"))
            })
            .collect()
    }

    /// Same scene with source positions converted to the stamp's pixel coordinates
    ///
    /// This must happen before prior bounds are built. The stamp itself is switched to the
    /// pixel frame with [Stamp::into_pixel_frame] afterwards.
    pub fn to_pixel_frame(&self, stamp: &Stamp) -> Result<Self, ConfigurationError> {
        if stamp.frame().is_pixel() {
            return Err(ConfigurationError::AlreadyPixelFrame);
        }
        let sources = self
            .sources
            .iter()
            .map(|source| {
                let [x, y] = stamp.sky_to_pix([source.x, source.y]);
                source.with_position(x, y)
            })
            .collect();
        Ok(Self {
            filters: self.filters.clone(),
            sources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stamp::{Astrometry, PsfMixture};

    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    fn two_source_scene() -> Scene {
        Scene::new(
            vec!["F090W".into()],
            vec![
                Source::from_tuple(10.0, 20.0, 20.0, 0.8, 0.3, 2.5, 0.05),
                Source::from_tuple(3.0, 25.0, 18.0, 0.5, -1.0, 4.0, 0.02),
            ],
        )
        .unwrap()
    }

    #[test]
    fn flat_vector_layout() {
        let scene = two_source_scene();
        let theta = scene.theta();
        assert_eq!(theta.len(), scene.nsources() * 7);
        assert_eq!(
            theta.to_vec(),
            vec![
                10.0, 20.0, 20.0, 0.8, 0.3, 2.5, 0.05, 3.0, 25.0, 18.0, 0.5, -1.0, 4.0, 0.02
            ]
        );
        assert_eq!(scene.source_range(1), 7..14);
        assert_eq!(scene.split(theta.as_slice().unwrap()).unwrap(), scene.sources());
    }

    #[test]
    fn wrong_theta_length() {
        let scene = two_source_scene();
        assert_eq!(
            scene.split(&[1.0; 13]).unwrap_err(),
            ConfigurationError::ThetaLength {
                actual: 13,
                expected: 14
            }
        );
    }

    #[test]
    fn multi_filter_layout() {
        let scene = Scene::new(
            vec!["F090W".into(), "F200W".into()],
            vec![Source {
                flux: vec![1.0, 2.0],
                x: 3.0,
                y: 4.0,
                q: 0.9,
                pa: 0.1,
                n: 2.0,
                rh: 0.03,
            }],
        )
        .unwrap();
        assert_eq!(scene.ndim(), 8);
        assert_eq!(
            scene.parameter_names(),
            vec!["F090W_0", "F200W_0", "x_0", "y_0", "q_0", "pa_0", "n_0", "rh_0"]
        );
        assert_eq!(scene.filter_index("F200W").unwrap(), 1);
        assert!(scene.filter_index("F444W").is_err());
    }

    #[test]
    fn mismatched_flux_rejected() {
        let result = Scene::new(
            vec!["F090W".into(), "F200W".into()],
            vec![Source::from_tuple(1.0, 0.0, 0.0, 1.0, 0.0, 2.0, 0.05)],
        );
        assert!(matches!(
            result,
            Err(ConfigurationError::LengthMismatch { .. })
        ));
        assert_eq!(
            Scene::new(vec!["F090W".into()], vec![]).unwrap_err(),
            ConfigurationError::EmptyScene
        );
    }

    #[test]
    fn with_theta_replaces_values() {
        let scene = two_source_scene();
        let mut theta = scene.theta();
        theta[8] = 26.0;
        let moved = scene.with_theta(theta.as_slice().unwrap()).unwrap();
        assert_abs_diff_eq!(moved.sources()[1].x, 26.0);
        assert_abs_diff_eq!(scene.sources()[1].x, 25.0);
    }

    #[test]
    fn pixel_frame_conversion() {
        let stamp = Stamp::new(
            "F090W",
            Array2::zeros((40, 40)),
            Array2::ones((40, 40)),
            PsfMixture::gaussian(1.0),
            Astrometry::new([[1e4, 0.0], [0.0, 1e4]], [53.0, -27.0], [20.0, 20.0]),
        )
        .unwrap();
        let scene = Scene::new(
            vec!["F090W".into()],
            vec![Source::from_tuple(1.0, 53.0005, -27.001, 0.9, 0.1, 2.0, 0.03)],
        )
        .unwrap();
        let pixel_scene = scene.to_pixel_frame(&stamp).unwrap();
        assert_abs_diff_eq!(pixel_scene.sources()[0].x, 25.0, epsilon = 1e-6);
        assert_abs_diff_eq!(pixel_scene.sources()[0].y, 10.0, epsilon = 1e-6);
        assert_abs_diff_eq!(pixel_scene.sources()[0].q, 0.9);

        let pixel_stamp = stamp.into_pixel_frame().unwrap();
        assert_eq!(
            scene.to_pixel_frame(&pixel_stamp).unwrap_err(),
            ConfigurationError::AlreadyPixelFrame
        );
    }
}
