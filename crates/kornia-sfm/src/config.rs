use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bundle_adjustment::BundleAdjustmentConfig;
use crate::data_association::DataAssociationConfig;
use crate::triangulation::TriangulationMode;

/// Errors raised while loading a [`SfmConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the file failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The file is not valid JSON for the configuration.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A value is out of its valid range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration of both reconstruction stages.
///
/// Missing fields take their default values, so `{}` is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SfmConfig {
    /// Track building and triangulation.
    pub data_association: DataAssociationConfig,
    /// Joint refinement.
    pub bundle_adjustment: BundleAdjustmentConfig,
}

impl SfmConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(data: &str) -> Result<Self, ConfigError> {
        let config: SfmConfig = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    /// Serialize to pretty printed JSON.
    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check value ranges that deserialization cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let da = &self.data_association;
        let tri = &da.triangulation;
        let ba = &self.bundle_adjustment;

        if da.min_track_len < 2 {
            return Err(ConfigError::Invalid(format!(
                "min_track_len must be at least 2, got {}",
                da.min_track_len
            )));
        }
        if !is_positive(tri.reproj_error_thresh) {
            return Err(ConfigError::Invalid(format!(
                "reproj_error_thresh must be positive, got {}",
                tri.reproj_error_thresh
            )));
        }
        if let Some(angle) = tri.min_tri_angle_deg {
            if !(0.0..180.0).contains(&angle) {
                return Err(ConfigError::Invalid(format!(
                    "min_tri_angle_deg must be in [0, 180), got {angle}"
                )));
            }
        }
        if matches!(tri.mode, TriangulationMode::Ransac(_)) && tri.num_ransac_hypotheses == Some(0)
        {
            return Err(ConfigError::Invalid(
                "num_ransac_hypotheses must be positive".to_string(),
            ));
        }
        for (name, sigma) in [
            ("measurement_sigma", ba.measurement_sigma),
            ("pose_prior_sigma", ba.pose_prior_sigma),
            ("calibration_prior_sigma", ba.calibration_prior_sigma),
        ] {
            if !is_positive(sigma) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be positive, got {sigma}"
                )));
            }
        }
        if !is_positive(ba.output_reproj_error_thresh) {
            return Err(ConfigError::Invalid(format!(
                "output_reproj_error_thresh must be positive, got {}",
                ba.output_reproj_error_thresh
            )));
        }
        if let Some(budget) = ba.time_budget_secs {
            if budget.is_nan() || budget < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "time_budget_secs must be non-negative, got {budget}"
                )));
            }
        }
        Ok(())
    }
}

fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}
