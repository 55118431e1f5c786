use crate::catalog::CatalogRow;
use crate::config::SceneConfig;
use crate::error::ConfigurationError;

use serde::{Deserialize, Serialize};

/// Number of non-flux parameters of a source: `x, y, q, pa, n, rh`
pub const SHAPE_PARAMS: usize = 6;

/// Parameters of a single Sersic source
///
/// Flux is given per filter, position is either celestial `(ra, dec)` or pixel `(x, y)`
/// depending on the coordinate frame the scene is fitted in. `q` is the axis ratio, `pa` the
/// position angle in radians, `n` the Sersic index and `rh` the half-light radius.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub flux: Vec<f64>,
    pub x: f64,
    pub y: f64,
    pub q: f64,
    pub pa: f64,
    pub n: f64,
    pub rh: f64,
}

impl Source {
    /// Single-filter source from the canonical `(flux, x, y, q, pa, n, rh)` tuple
    pub fn from_tuple(flux: f64, x: f64, y: f64, q: f64, pa: f64, n: f64, rh: f64) -> Self {
        Self {
            flux: vec![flux],
            x,
            y,
            q,
            pa,
            n,
            rh,
        }
    }

    /// Source from a catalog row, positions stay celestial
    ///
    /// Requires `a >= b > 0`, the result is undefined otherwise. The axis ratio is
    /// `q = sqrt(b / a)`, the position angle is converted from degrees East of North to
    /// `(90° - pa)` in radians and the half-light radius is the mean of `diag(q, 1/q) (a, b)`.
    /// The catalog magnitude is converted to the same flux in every filter.
    pub fn from_catalog(row: &CatalogRow, nfilters: usize, config: &SceneConfig) -> Self {
        let q = (row.b / row.a).sqrt();
        let rh = 0.5 * (q * row.a + row.b / q);
        Self {
            flux: vec![config.flux_from_magnitude(row.mag); nfilters],
            x: row.ra,
            y: row.dec,
            q,
            pa: (90.0 - row.pa).to_radians(),
            n: row.n,
            rh,
        }
    }

    pub fn nfilters(&self) -> usize {
        self.flux.len()
    }

    pub fn nparams(&self) -> usize {
        self.flux.len() + SHAPE_PARAMS
    }

    /// Parameters in the flat-vector order `[flux.., x, y, q, pa, n, rh]`
    pub fn params(&self) -> Vec<f64> {
        let mut params = Vec::with_capacity(self.nparams());
        self.write_params(&mut params);
        params
    }

    pub(crate) fn write_params(&self, out: &mut Vec<f64>) {
        out.extend_from_slice(&self.flux);
        out.extend_from_slice(&[self.x, self.y, self.q, self.pa, self.n, self.rh]);
    }

    /// Inverse of [Source::params]
    pub fn from_params(params: &[f64], nfilters: usize) -> Result<Self, ConfigurationError> {
        if params.len() != nfilters + SHAPE_PARAMS {
            return Err(ConfigurationError::LengthMismatch {
                what: "source parameter block",
                actual: params.len(),
                expected: nfilters + SHAPE_PARAMS,
            });
        }
        let (flux, shape) = params.split_at(nfilters);
        Ok(Self {
            flux: flux.to_vec(),
            x: shape[0],
            y: shape[1],
            q: shape[2],
            pa: shape[3],
            n: shape[4],
            rh: shape[5],
        })
    }

    pub fn with_position(&self, x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;

    fn row() -> CatalogRow {
        CatalogRow {
            id: 7.0,
            ra: 53.1,
            dec: -27.8,
            a: 0.1,
            b: 0.025,
            pa: 30.0,
            n: 2.5,
            mag: 25.0,
        }
    }

    #[test]
    fn catalog_conversion() {
        let config = SceneConfig::default();
        let source = Source::from_catalog(&row(), 2, &config);
        assert_abs_diff_eq!(source.q, 0.5);
        assert_abs_diff_eq!(source.pa, 60.0_f64.to_radians(), epsilon = 1e-12);
        // diag(0.5, 2) (0.1, 0.025) = (0.05, 0.05)
        assert_abs_diff_eq!(source.rh, 0.05, epsilon = 1e-12);
        assert_eq!(source.flux.len(), 2);
        assert_abs_diff_eq!(source.flux[0], config.flux_from_magnitude(25.0));
        assert_abs_diff_eq!(source.flux[1], source.flux[0]);
        assert_abs_diff_eq!(source.x, 53.1);
        assert_abs_diff_eq!(source.y, -27.8);
    }

    #[test]
    fn round_shape_keeps_radius() {
        let mut row = row();
        row.b = row.a;
        let source = Source::from_catalog(&row, 1, &SceneConfig::default());
        assert_abs_diff_eq!(source.q, 1.0);
        assert_abs_diff_eq!(source.rh, row.a, epsilon = 1e-12);
    }

    #[test]
    fn params_layout() {
        let source = Source::from_tuple(10.0, 20.0, 21.0, 0.8, 0.3, 2.5, 0.05);
        assert_eq!(source.params(), vec![10.0, 20.0, 21.0, 0.8, 0.3, 2.5, 0.05]);
        assert_eq!(Source::from_params(&source.params(), 1).unwrap(), source);
        assert!(Source::from_params(&source.params(), 2).is_err());
    }
}
