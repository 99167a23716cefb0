use serde::{Deserialize, Serialize};

use crate::error::ReconstructError;

pub const DEFAULT_RESOLUTION: f32 = 0.1;
pub const DEFAULT_TRUNCATION: f32 = 0.2;
/// Weighted-average fusion leaves a voxel's distance above its closest
/// observation, so the isosurface sits well above zero.
pub const DEFAULT_SURFACE_THRESHOLD: f32 = 0.08;
pub const DEFAULT_DISPATCH_CHUNK: usize = 64;
pub const DEFAULT_GROWTH_MARGIN: usize = 10;
pub const DEFAULT_MAX_GRID_VOXELS: u64 = 64_000_000;
/// Largest accepted `ceil(truncation / resolution)`.
pub const MAX_KERNEL_RADIUS: i64 = 32;

/// How a new observation is combined with a voxel's fused state.
///
/// Both policies only touch a voxel when the candidate distance is strictly
/// closer than the value already stored there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionPolicy {
    /// Running average with unit weight per observation.
    #[default]
    WeightedAverage,
    /// Closer observation replaces distance and colour outright.
    MinReplace,
}

/// Lifetime of the voxel grid across cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum GridMode {
    /// Fresh grid fitted to every batch; no fusion carries across cycles.
    #[default]
    Rebuild,
    /// Origin is fixed by the first batch. The grid only grows, and only
    /// when a batch needs more than `growth_margin` extra voxels on an axis.
    Persistent { growth_margin: usize },
}

impl GridMode {
    pub fn persistent() -> Self {
        GridMode::Persistent {
            growth_margin: DEFAULT_GROWTH_MARGIN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// World units per voxel edge.
    pub resolution: f32,
    /// Maximum magnitude of a stored signed distance.
    pub truncation: f32,
    /// Corners with a distance above this are classified as outside.
    pub surface_threshold: f32,
    /// Minimum number of points or cells handed to one parallel task.
    pub cells_per_dispatch_chunk: usize,
    pub fusion: FusionPolicy,
    pub grid_mode: GridMode,
    pub max_grid_voxels: u64,
    pub default_color: [f32; 4],
    /// Runs integration and extraction on the calling thread, in point and
    /// cell order, so repeated runs emit identical vertex order.
    pub serial: bool,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            resolution: DEFAULT_RESOLUTION,
            truncation: DEFAULT_TRUNCATION,
            surface_threshold: DEFAULT_SURFACE_THRESHOLD,
            cells_per_dispatch_chunk: DEFAULT_DISPATCH_CHUNK,
            fusion: FusionPolicy::default(),
            grid_mode: GridMode::default(),
            max_grid_voxels: DEFAULT_MAX_GRID_VOXELS,
            default_color: [0.0, 0.0, 0.0, 1.0],
            serial: false,
        }
    }
}

impl ReconstructionConfig {
    pub fn new(resolution: f32, truncation: f32, surface_threshold: f32) -> Self {
        Self {
            resolution,
            truncation,
            surface_threshold,
            ..Self::default()
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, ReconstructError> {
        let config: Self = serde_json::from_str(text)
            .map_err(|err| ReconstructError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Chebyshev radius, in voxels, of the neighbourhood a point fuses into.
    pub fn radius(&self) -> i64 {
        (self.truncation / self.resolution).ceil() as i64
    }

    pub fn validate(&self) -> Result<(), ReconstructError> {
        if !self.resolution.is_finite() || self.resolution <= 0.0 {
            return Err(ReconstructError::InvalidConfig(format!(
                "resolution must be positive, got {}",
                self.resolution
            )));
        }
        if !self.truncation.is_finite() || self.truncation <= 0.0 {
            return Err(ReconstructError::InvalidConfig(format!(
                "truncation must be positive, got {}",
                self.truncation
            )));
        }
        let ratio = self.truncation / self.resolution;
        if !ratio.is_finite() || ratio.ceil() > MAX_KERNEL_RADIUS as f32 {
            return Err(ReconstructError::InvalidConfig(format!(
                "truncation / resolution must be at most {MAX_KERNEL_RADIUS}, got {ratio}"
            )));
        }
        if !self.surface_threshold.is_finite() {
            return Err(ReconstructError::InvalidConfig(
                "surface threshold must be finite".to_string(),
            ));
        }
        if self.cells_per_dispatch_chunk == 0 {
            return Err(ReconstructError::InvalidConfig(
                "cells per dispatch chunk must be at least 1".to_string(),
            ));
        }
        if self.max_grid_voxels == 0 {
            return Err(ReconstructError::InvalidConfig(
                "max grid voxels must be at least 1".to_string(),
            ));
        }
        if self.default_color.iter().any(|c| !c.is_finite()) {
            return Err(ReconstructError::InvalidConfig(
                "default color must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ReconstructionConfig::default();
        config.validate().expect("valid defaults");
        assert_eq!(config.radius(), 2);
        assert_eq!(config.fusion, FusionPolicy::WeightedAverage);
        assert_eq!(config.grid_mode, GridMode::Rebuild);
    }

    #[test]
    fn rejects_non_positive_resolution_and_truncation() {
        assert!(ReconstructionConfig::new(0.0, 0.2, 0.01).validate().is_err());
        assert!(ReconstructionConfig::new(-0.1, 0.2, 0.01).validate().is_err());
        assert!(ReconstructionConfig::new(0.1, 0.0, 0.01).validate().is_err());
        assert!(ReconstructionConfig::new(f32::NAN, 0.2, 0.01)
            .validate()
            .is_err());
        assert!(ReconstructionConfig::new(0.1, 0.2, f32::INFINITY)
            .validate()
            .is_err());
    }

    #[test]
    fn rejects_oversized_kernel_radius() {
        let err = ReconstructionConfig::new(1e-30, 1e30, 0.01)
            .validate()
            .expect_err("unbounded radius");
        assert!(matches!(err, ReconstructError::InvalidConfig(_)));
        assert!(ReconstructionConfig::new(0.125, 4.5, 0.01).validate().is_err());

        let config = ReconstructionConfig::new(0.125, 4.0, 0.01);
        config.validate().expect("radius at the cap");
        assert_eq!(config.radius(), MAX_KERNEL_RADIUS);
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = ReconstructionConfig::from_json_str(
            r#"{ "resolution": 0.05, "fusion": "min_replace",
                 "grid_mode": { "mode": "persistent", "growth_margin": 4 } }"#,
        )
        .expect("config");
        assert_eq!(config.resolution, 0.05);
        assert_eq!(config.truncation, DEFAULT_TRUNCATION);
        assert_eq!(config.fusion, FusionPolicy::MinReplace);
        assert_eq!(config.grid_mode, GridMode::Persistent { growth_margin: 4 });
    }

    #[test]
    fn json_validation_errors_are_reported() {
        let err = ReconstructionConfig::from_json_str(r#"{ "truncation": -1.0 }"#)
            .expect_err("negative truncation");
        assert!(matches!(err, ReconstructError::InvalidConfig(_)));
    }
}
