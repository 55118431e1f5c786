use crate::error::ConfigurationError;

use serde::{Deserialize, Serialize};

pub type Matrix2 = [[f64; 2]; 2];

/// Linear astrometric solution of a stamp
///
/// `pix = dpix_dsky (sky - crval) + crpix`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Astrometry {
    pub dpix_dsky: Matrix2,
    pub crval: [f64; 2],
    pub crpix: [f64; 2],
}

impl Astrometry {
    pub fn new(dpix_dsky: Matrix2, crval: [f64; 2], crpix: [f64; 2]) -> Self {
        Self {
            dpix_dsky,
            crval,
            crpix,
        }
    }

    /// Identity transform with zero reference point, sky and pixel coordinates coincide
    pub fn identity() -> Self {
        Self::new([[1.0, 0.0], [0.0, 1.0]], [0.0; 2], [0.0; 2])
    }

    pub fn sky_to_pix(&self, sky: [f64; 2]) -> [f64; 2] {
        let d = [sky[0] - self.crval[0], sky[1] - self.crval[1]];
        let pix = mat_vec(&self.dpix_dsky, d);
        [pix[0] + self.crpix[0], pix[1] + self.crpix[1]]
    }

    pub fn pix_to_sky(&self, pix: [f64; 2]) -> Result<[f64; 2], ConfigurationError> {
        let dsky_dpix = self.dsky_dpix()?;
        let d = [pix[0] - self.crpix[0], pix[1] - self.crpix[1]];
        let sky = mat_vec(&dsky_dpix, d);
        Ok([sky[0] + self.crval[0], sky[1] + self.crval[1]])
    }

    /// Inverse of the pixel-to-sky Jacobian
    pub fn dsky_dpix(&self) -> Result<Matrix2, ConfigurationError> {
        inverse(&self.dpix_dsky).ok_or(ConfigurationError::SingularJacobian {
            dpix_dsky: self.dpix_dsky,
        })
    }

    /// Sky-angle size of a pixel: mean absolute eigenvalue of `dsky_dpix`
    pub fn plate_scale(&self) -> Result<f64, ConfigurationError> {
        let m = self.dsky_dpix()?;
        let half_trace = 0.5 * (m[0][0] + m[1][1]);
        let det = determinant(&m);
        let discriminant = half_trace.powi(2) - det;
        let scale = if discriminant >= 0.0 {
            let root = discriminant.sqrt();
            0.5 * ((half_trace + root).abs() + (half_trace - root).abs())
        } else {
            // complex-conjugate pair, both have modulus sqrt(det)
            det.sqrt()
        };
        if scale.is_finite() && scale > 0.0 {
            Ok(scale)
        } else {
            Err(ConfigurationError::SingularJacobian {
                dpix_dsky: self.dpix_dsky,
            })
        }
    }
}

pub(crate) fn determinant(m: &Matrix2) -> f64 {
    m[0][0] * m[1][1] - m[0][1] * m[1][0]
}

pub(crate) fn inverse(m: &Matrix2) -> Option<Matrix2> {
    let det = determinant(m);
    if det == 0.0 || !det.is_finite() {
        return None;
    }
    Some([
        [m[1][1] / det, -m[0][1] / det],
        [-m[1][0] / det, m[0][0] / det],
    ])
}

pub(crate) fn mat_vec(m: &Matrix2, v: [f64; 2]) -> [f64; 2] {
    [
        m[0][0] * v[0] + m[0][1] * v[1],
        m[1][0] * v[0] + m[1][1] * v[1],
    ]
}

pub(crate) fn mat_mul(a: &Matrix2, b: &Matrix2) -> Matrix2 {
    let mut out = [[0.0; 2]; 2];
    for i in 0..2 {
        for j in 0..2 {
            out[i][j] = a[i][0] * b[0][j] + a[i][1] * b[1][j];
        }
    }
    out
}

pub(crate) fn transpose(m: &Matrix2) -> Matrix2 {
    [[m[0][0], m[1][0]], [m[0][1], m[1][1]]]
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;

    fn rotated(scale: f64, angle: f64) -> Astrometry {
        let (s, c) = angle.sin_cos();
        Astrometry::new(
            [[c / scale, -s / scale], [s / scale, c / scale]],
            [53.1, -27.8],
            [20.0, 20.0],
        )
    }

    #[test]
    fn plate_scale_of_diagonal_jacobian() {
        let astrometry = Astrometry::new([[20.0, 0.0], [0.0, 20.0]], [0.0; 2], [0.0; 2]);
        assert_abs_diff_eq!(astrometry.plate_scale().unwrap(), 0.05, epsilon = 1e-15);
    }

    #[test]
    fn plate_scale_of_rotated_jacobian() {
        // rotation gives a complex-conjugate eigenvalue pair
        let astrometry = rotated(0.03, 0.4);
        assert_abs_diff_eq!(astrometry.plate_scale().unwrap(), 0.03, epsilon = 1e-12);
    }

    #[test]
    fn plate_scale_of_flipped_jacobian() {
        let astrometry = Astrometry::new([[-10.0, 0.0], [0.0, 40.0]], [0.0; 2], [0.0; 2]);
        assert_abs_diff_eq!(
            astrometry.plate_scale().unwrap(),
            0.5 * (0.1 + 0.025),
            epsilon = 1e-15
        );
    }

    #[test]
    fn singular_jacobian_fails() {
        let astrometry = Astrometry::new([[1.0, 2.0], [2.0, 4.0]], [0.0; 2], [0.0; 2]);
        assert!(matches!(
            astrometry.plate_scale(),
            Err(ConfigurationError::SingularJacobian { .. })
        ));
        assert!(astrometry.pix_to_sky([1.0, 1.0]).is_err());
    }

    #[test]
    fn sky_pix_round_trip() {
        let astrometry = rotated(1e-5, -0.7);
        let sky = [53.1001, -27.7998];
        let pix = astrometry.sky_to_pix(sky);
        let back = astrometry.pix_to_sky(pix).unwrap();
        assert_abs_diff_eq!(&back[..], &sky[..], epsilon = 1e-10);
        assert_abs_diff_eq!(
            &astrometry.sky_to_pix(astrometry.crval)[..],
            &astrometry.crpix[..],
            epsilon = 1e-12
        );
    }
}
