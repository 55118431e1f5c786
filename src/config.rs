use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;

/// Closed interval of allowed values for a single parameter type
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ParameterRange {
    pub lower: f64,
    pub upper: f64,
}

impl ParameterRange {
    pub fn new(lower: f64, upper: f64) -> Self {
        assert!(lower <= upper, "lower must not exceed upper");
        Self { lower, upper }
    }

    pub fn contains(&self, x: f64) -> bool {
        self.lower <= x && x <= self.upper
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Diagonal proposal scale for each parameter type of a source
///
/// Position scale is given in units of the plate scale, all other scales are absolute.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ProposalScaleConfig {
    pub flux: f64,
    pub position_in_plate_scales: f64,
    pub q: f64,
    pub pa: f64,
    pub sersic: f64,
    pub rh: f64,
}

impl ProposalScaleConfig {
    #[inline]
    pub fn default_flux() -> f64 {
        1.0
    }

    #[inline]
    pub fn default_position_in_plate_scales() -> f64 {
        1.0
    }

    #[inline]
    pub fn default_q() -> f64 {
        0.1
    }

    #[inline]
    pub fn default_pa() -> f64 {
        0.1
    }

    #[inline]
    pub fn default_sersic() -> f64 {
        0.1
    }

    #[inline]
    pub fn default_rh() -> f64 {
        0.01
    }
}

impl Default for ProposalScaleConfig {
    fn default() -> Self {
        Self {
            flux: Self::default_flux(),
            position_in_plate_scales: Self::default_position_in_plate_scales(),
            q: Self::default_q(),
            pa: Self::default_pa(),
            sersic: Self::default_sersic(),
            rh: Self::default_rh(),
        }
    }
}

/// Run parameters of the scene parameterization and of the prior bounds
///
/// Photometric zero point and magnitude offset convert catalog magnitudes to model fluxes:
/// `flux = 10^(0.4 (zero_point - mag - mag_offset))`. Positional bounds are
/// `position ± position_half_width * plate_scale`, the other bounds are fixed ranges.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SceneConfig {
    pub zero_point: f64,
    pub mag_offset: f64,
    pub position_half_width: f64,
    pub flux_range: ParameterRange,
    pub q_range: ParameterRange,
    pub pa_range: ParameterRange,
    pub sersic_range: ParameterRange,
    pub rh_range: ParameterRange,
    pub proposal_scales: ProposalScaleConfig,
}

impl SceneConfig {
    #[inline]
    pub fn default_zero_point() -> f64 {
        27.4525
    }

    #[inline]
    pub fn default_mag_offset() -> f64 {
        0.4
    }

    #[inline]
    pub fn default_position_half_width() -> f64 {
        3.0
    }

    #[inline]
    pub fn default_flux_range() -> ParameterRange {
        ParameterRange::new(0.0, 12.0)
    }

    #[inline]
    pub fn default_q_range() -> ParameterRange {
        ParameterRange::new(0.3, 1.0)
    }

    #[inline]
    pub fn default_pa_range() -> ParameterRange {
        ParameterRange::new(-FRAC_PI_2, FRAC_PI_2)
    }

    #[inline]
    pub fn default_sersic_range() -> ParameterRange {
        ParameterRange::new(1.2, 5.0)
    }

    #[inline]
    pub fn default_rh_range() -> ParameterRange {
        ParameterRange::new(0.015, 0.12)
    }

    pub fn flux_from_magnitude(&self, mag: f64) -> f64 {
        10.0_f64.powf(0.4 * (self.zero_point - mag - self.mag_offset))
    }
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            zero_point: Self::default_zero_point(),
            mag_offset: Self::default_mag_offset(),
            position_half_width: Self::default_position_half_width(),
            flux_range: Self::default_flux_range(),
            q_range: Self::default_q_range(),
            pa_range: Self::default_pa_range(),
            sersic_range: Self::default_sersic_range(),
            rh_range: Self::default_rh_range(),
            proposal_scales: ProposalScaleConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;

    #[test]
    fn flux_from_magnitude_at_zero_point() {
        let config = SceneConfig {
            mag_offset: 0.0,
            ..SceneConfig::default()
        };
        assert_abs_diff_eq!(config.flux_from_magnitude(config.zero_point), 1.0);
        assert_abs_diff_eq!(
            config.flux_from_magnitude(config.zero_point - 2.5),
            10.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn default_flux_of_mag_25() {
        let config = SceneConfig::default();
        let desired = 10.0_f64.powf(0.4 * (27.4525 - 25.0 - 0.4));
        assert_abs_diff_eq!(config.flux_from_magnitude(25.0), desired, epsilon = 1e-12);
    }

    #[test]
    fn serde_keeps_ranges() {
        let config = SceneConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let restored: SceneConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, restored);
    }

    #[test]
    #[should_panic]
    fn inverted_range_panics() {
        ParameterRange::new(1.0, 0.0);
    }
}
