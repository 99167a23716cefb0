use glam::Vec3;

use crate::error::ReconstructError;

/// Axis-aligned bounds of a point batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn from_points(points: &[[f32; 3]]) -> Option<Self> {
        let mut iter = points.iter();
        let first = Vec3::from(*iter.next()?);
        let mut min = first;
        let mut max = first;
        for p in iter {
            let v = Vec3::from(*p);
            min = min.min(v);
            max = max.max(v);
        }
        Some(Self { min, max })
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}

/// Placement and extent of a voxel lattice in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLayout {
    /// World position of voxel `(0, 0, 0)`.
    pub origin: Vec3,
    pub dims: [usize; 3],
    pub resolution: f32,
}

impl GridLayout {
    /// Fits a lattice to `bounds` with the origin at the minimum corner.
    pub fn fit(bounds: &Aabb, resolution: f32) -> Result<Self, ReconstructError> {
        let dims = dims_from_size(bounds.size(), resolution)?;
        Ok(Self {
            origin: bounds.min,
            dims,
            resolution,
        })
    }

    /// Dimensions needed to cover `bounds` from an already fixed `origin`.
    /// Points below the origin are not covered; the integrator clips them.
    pub fn dims_covering(
        origin: Vec3,
        bounds: &Aabb,
        resolution: f32,
    ) -> Result<[usize; 3], ReconstructError> {
        let span = (bounds.max - origin).max(Vec3::ZERO);
        dims_from_size(span, resolution)
    }

    pub fn voxel_count(&self) -> u64 {
        voxel_count(self.dims)
    }
}

/// `ceil(size / resolution) + 1` along each axis.
pub fn dims_from_size(size: Vec3, resolution: f32) -> Result<[usize; 3], ReconstructError> {
    let mut dims = [0usize; 3];
    for (axis, extent) in size.to_array().into_iter().enumerate() {
        let cells = (extent.max(0.0) / resolution).ceil();
        if !cells.is_finite() || cells >= (u32::MAX - 1) as f32 {
            return Err(ReconstructError::GridTooLarge {
                dims: [0, 0, 0],
                voxels: u64::MAX,
                max: u32::MAX as u64,
            });
        }
        dims[axis] = cells as usize + 1;
    }
    Ok(dims)
}

pub fn voxel_count(dims: [usize; 3]) -> u64 {
    (dims[0] as u64)
        .saturating_mul(dims[1] as u64)
        .saturating_mul(dims[2] as u64)
}
