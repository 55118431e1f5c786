//! Image cutouts and their astrometric, noise and PSF metadata
//!
//! A [Stamp] is read-only once prepared: background subtraction, PSF reflection and the switch
//! to the pixel coordinate frame each return a new stamp.

pub mod astrometry;
pub use astrometry::Astrometry;

pub mod psf;
pub use psf::PsfMixture;

use crate::array_stats::nan_median;
use crate::error::ConfigurationError;

use ndarray::{Array2, s};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Coordinate frame the source positions are expressed in for a stamp
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum CoordinateFrame {
    /// Positions are celestial, converted to pixels with the astrometric solution
    Sky(Astrometry),
    /// Positions are already pixel coordinates, the original solution is kept for reference
    PixelNormalized { original: Astrometry },
}

impl CoordinateFrame {
    /// Transform used by the renderer: identity for the pixel-normalized frame
    pub fn astrometry(&self) -> Astrometry {
        match self {
            Self::Sky(astrometry) => astrometry.clone(),
            Self::PixelNormalized { .. } => Astrometry::identity(),
        }
    }

    /// Size of one pixel in the frame's position units
    pub fn plate_scale(&self) -> Result<f64, ConfigurationError> {
        match self {
            Self::Sky(astrometry) => astrometry.plate_scale(),
            Self::PixelNormalized { .. } => Ok(1.0),
        }
    }

    pub fn is_pixel(&self) -> bool {
        matches!(self, Self::PixelNormalized { .. })
    }
}

/// How the sky background level of a stamp is estimated
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub enum BackgroundEstimate {
    /// Known constant level
    Fixed(f64),
    /// Median of the finite pixels of the first rows of the stamp
    MedianOfFirstRows(usize),
}

impl Default for BackgroundEstimate {
    fn default() -> Self {
        Self::MedianOfFirstRows(5)
    }
}

/// Image cutout of a single (filter, detector, exposure) combination
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Stamp {
    filter: String,
    pixel_values: Array2<f64>,
    ierr: Array2<f64>,
    psf: PsfMixture,
    frame: CoordinateFrame,
    subtracted_background: f64,
}

impl Stamp {
    /// New stamp in the sky frame
    ///
    /// `ierr` is the per-pixel inverse uncertainty and must have the shape of `pixel_values`.
    pub fn new(
        filter: impl Into<String>,
        pixel_values: Array2<f64>,
        ierr: Array2<f64>,
        psf: PsfMixture,
        astrometry: Astrometry,
    ) -> Result<Self, ConfigurationError> {
        if pixel_values.dim() != ierr.dim() {
            return Err(ConfigurationError::StampShape {
                pixels: pixel_values.dim(),
                ierr: ierr.dim(),
            });
        }
        Ok(Self {
            filter: filter.into(),
            pixel_values,
            ierr,
            psf,
            frame: CoordinateFrame::Sky(astrometry),
            subtracted_background: 0.0,
        })
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn pixel_values(&self) -> &Array2<f64> {
        &self.pixel_values
    }

    pub fn ierr(&self) -> &Array2<f64> {
        &self.ierr
    }

    pub fn psf(&self) -> &PsfMixture {
        &self.psf
    }

    pub fn frame(&self) -> &CoordinateFrame {
        &self.frame
    }

    pub fn subtracted_background(&self) -> f64 {
        self.subtracted_background
    }

    /// `(rows, columns)`
    pub fn shape(&self) -> (usize, usize) {
        self.pixel_values.dim()
    }

    pub fn sky_to_pix(&self, sky: [f64; 2]) -> [f64; 2] {
        self.frame.astrometry().sky_to_pix(sky)
    }

    pub fn plate_scale(&self) -> Result<f64, ConfigurationError> {
        self.frame.plate_scale()
    }

    /// New stamp with the estimated background level removed
    ///
    /// Levels accumulate: the returned stamp records the total subtracted background.
    pub fn subtract_background(&self, estimate: BackgroundEstimate) -> Result<Self, ConfigurationError> {
        let level = match estimate {
            BackgroundEstimate::Fixed(level) => level,
            BackgroundEstimate::MedianOfFirstRows(nrows) => {
                let nrows = nrows.min(self.pixel_values.nrows());
                nan_median(self.pixel_values.slice(s![..nrows, ..]).iter()).ok_or_else(|| {
                    ConfigurationError::InvalidSetting(format!(
                        "no finite pixels in the first {nrows} rows of the {} stamp",
                        self.filter
                    ))
                })?
            }
        };
        Ok(Self {
            pixel_values: self.pixel_values.mapv(|x| x - level),
            subtracted_background: self.subtracted_background + level,
            ..self.clone()
        })
    }

    /// New stamp with the PSF mixture reflected through the origin, see
    /// [PsfMixture::point_reflected]
    pub fn with_reflected_psf(&self) -> Self {
        Self {
            psf: self.psf.point_reflected(),
            ..self.clone()
        }
    }

    /// New stamp whose positions are pixel coordinates
    ///
    /// Only the frame changes: the PSF mixture and the pixels are kept as they are, and the
    /// sky astrometry is kept as the frame's `original`. Source positions must be converted with [Stamp::sky_to_pix] (see
    /// [crate::Scene::to_pixel_frame]) before this stamp is used.
    pub fn into_pixel_frame(self) -> Result<Self, ConfigurationError> {
        match self.frame {
            CoordinateFrame::Sky(original) => Ok(Self {
                frame: CoordinateFrame::PixelNormalized { original },
                ..self
            }),
            CoordinateFrame::PixelNormalized { .. } => Err(ConfigurationError::AlreadyPixelFrame),
        }
    }
}
