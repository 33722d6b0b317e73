//! Placement of the cutout inside the background frame

use crate::error::{BgChangerError, Result};
use serde::{Deserialize, Serialize};

/// Default vertical anchor (fraction of the free vertical space above the cutout)
pub const DEFAULT_HEIGHT_POSITION: f64 = 0.69;
/// Default horizontal anchor
pub const DEFAULT_WIDTH_POSITION: f64 = 0.5;
/// Default cutout width relative to the background width
pub const DEFAULT_SCALE_FACTOR: f64 = 0.62;

/// Where the scaled cutout lands and how large it renders.
///
/// All three values live in the closed interval `[0, 1]`. `height_position` and
/// `width_position` are fractions of the space left over once the cutout is placed,
/// so `0.0` pins the cutout to the top/left edge and `1.0` to the bottom/right edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionConfig {
    pub height_position: f64,
    pub width_position: f64,
    pub scale_factor: f64,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            height_position: DEFAULT_HEIGHT_POSITION,
            width_position: DEFAULT_WIDTH_POSITION,
            scale_factor: DEFAULT_SCALE_FACTOR,
        }
    }
}

impl PositionConfig {
    /// Build a position and validate it in one step
    pub fn new(height_position: f64, width_position: f64, scale_factor: f64) -> Result<Self> {
        let position = Self {
            height_position,
            width_position,
            scale_factor,
        };
        position.validate()?;
        Ok(position)
    }

    /// Reject non-finite values and values outside `[0, 1]`
    ///
    /// # Errors
    /// - `InvalidArgument` naming the first offending field
    pub fn validate(&self) -> Result<()> {
        Self::check_unit("height_position", self.height_position)?;
        Self::check_unit("width_position", self.width_position)?;
        Self::check_unit("scale_factor", self.scale_factor)?;
        Ok(())
    }

    fn check_unit(field: &str, value: f64) -> Result<()> {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(BgChangerError::invalid_argument(format!(
                "{} must be within [0, 1], got {}",
                field, value
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_service_defaults() {
        let position = PositionConfig::default();
        assert!((position.height_position - 0.69).abs() < f64::EPSILON);
        assert!((position.width_position - 0.5).abs() < f64::EPSILON);
        assert!((position.scale_factor - 0.62).abs() < f64::EPSILON);
        assert!(position.validate().is_ok());
    }

    #[test]
    fn test_bounds_are_inclusive() {
        assert!(PositionConfig::new(0.0, 0.0, 0.0).is_ok());
        assert!(PositionConfig::new(1.0, 1.0, 1.0).is_ok());
    }

    #[test]
    fn test_out_of_range_rejected() {
        let err = PositionConfig::new(1.01, 0.5, 0.5).unwrap_err();
        assert!(matches!(err, BgChangerError::InvalidArgument(_)));
        assert!(err.to_string().contains("height_position"));

        let err = PositionConfig::new(0.5, -0.1, 0.5).unwrap_err();
        assert!(err.to_string().contains("width_position"));

        let err = PositionConfig::new(0.5, 0.5, f64::NAN).unwrap_err();
        assert!(err.to_string().contains("scale_factor"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let position: PositionConfig = serde_json::from_str(r#"{"scale_factor": 0.4}"#).unwrap();
        assert!((position.scale_factor - 0.4).abs() < f64::EPSILON);
        assert!((position.height_position - DEFAULT_HEIGHT_POSITION).abs() < f64::EPSILON);
    }
}
