use glam::Vec3;

use crate::bounds::{voxel_count, GridLayout};
use crate::error::{try_alloc, ReconstructError};
use crate::parallel;

/// Fused state of one voxel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Voxel {
    /// Signed distance to the nearest observed surface, in `[-truncation, truncation]`.
    pub distance: f32,
    pub color: [f32; 4],
    /// Number of observations fused into this voxel.
    pub weight: f32,
}

impl Voxel {
    pub fn empty(truncation: f32, color: [f32; 4]) -> Self {
        Self {
            distance: truncation,
            color,
            weight: 0.0,
        }
    }
}

/// Dense TSDF lattice stored as one flat array.
///
/// Voxel `(x, y, z)` lives at `x * size_y * size_z + y * size_z + z`, so each
/// x-slab is a contiguous run of `size_y * size_z` voxels.
#[derive(Debug, Clone)]
pub struct VoxelGrid {
    pub origin: Vec3,
    pub dims: [usize; 3],
    pub resolution: f32,
    pub truncation: f32,
    pub default_color: [f32; 4],
    voxels: Vec<Voxel>,
}

impl VoxelGrid {
    pub fn new(
        layout: GridLayout,
        truncation: f32,
        default_color: [f32; 4],
        max_voxels: u64,
    ) -> Result<Self, ReconstructError> {
        let len = checked_len(layout.dims, max_voxels)?;
        let voxels = try_alloc(len, Voxel::empty(truncation, default_color), "voxel grid")?;
        Ok(Self {
            origin: layout.origin,
            dims: layout.dims,
            resolution: layout.resolution,
            truncation,
            default_color,
            voxels,
        })
    }

    pub fn layout(&self) -> GridLayout {
        GridLayout {
            origin: self.origin,
            dims: self.dims,
            resolution: self.resolution,
        }
    }

    pub fn len(&self) -> usize {
        self.voxels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voxels.is_empty()
    }

    pub fn slab_len(&self) -> usize {
        self.dims[1] * self.dims[2]
    }

    /// Flat offset of `(x, y, z)`. Callers bounds-check first; this never clamps.
    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        debug_assert!(x < self.dims[0] && y < self.dims[1] && z < self.dims[2]);
        x * self.dims[1] * self.dims[2] + y * self.dims[2] + z
    }

    #[inline]
    pub fn contains(&self, x: i64, y: i64, z: i64) -> bool {
        x >= 0
            && y >= 0
            && z >= 0
            && (x as usize) < self.dims[0]
            && (y as usize) < self.dims[1]
            && (z as usize) < self.dims[2]
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> &Voxel {
        &self.voxels[self.index(x, y, z)]
    }

    pub fn get_checked(&self, x: i64, y: i64, z: i64) -> Option<&Voxel> {
        if !self.contains(x, y, z) {
            return None;
        }
        Some(self.get(x as usize, y as usize, z as usize))
    }

    #[inline]
    pub fn get_mut(&mut self, x: usize, y: usize, z: usize) -> &mut Voxel {
        let idx = self.index(x, y, z);
        &mut self.voxels[idx]
    }

    pub fn voxels(&self) -> &[Voxel] {
        &self.voxels
    }

    pub(crate) fn voxels_mut(&mut self) -> &mut [Voxel] {
        &mut self.voxels
    }

    /// World position of the voxel lattice point `(x, y, z)`.
    pub fn voxel_position(&self, x: usize, y: usize, z: usize) -> Vec3 {
        self.origin + Vec3::new(x as f32, y as f32, z as f32) * self.resolution
    }

    /// Voxel coordinate containing a world position; may be out of range.
    pub fn voxel_coord(&self, position: Vec3) -> [i64; 3] {
        let rel = (position - self.origin) / self.resolution;
        [
            rel.x.floor() as i64,
            rel.y.floor() as i64,
            rel.z.floor() as i64,
        ]
    }

    pub fn reset(&mut self) {
        let empty = Voxel::empty(self.truncation, self.default_color);
        parallel::for_each_indexed_mut(&mut self.voxels, |_, voxel| {
            *voxel = empty;
        });
    }

    /// Reallocates to `new_dims`, copying every voxel whose `(x, y, z)` is
    /// valid in both shapes. Voxels only present in the new shape start
    /// empty. On failure the grid is left untouched.
    pub fn resize_and_preserve(
        &mut self,
        new_dims: [usize; 3],
        max_voxels: u64,
    ) -> Result<(), ReconstructError> {
        let len = checked_len(new_dims, max_voxels)?;
        let empty = Voxel::empty(self.truncation, self.default_color);
        let mut voxels = try_alloc(len, empty, "voxel grid resize")?;

        let old_dims = self.dims;
        let old = &self.voxels;
        let new_slab = new_dims[1] * new_dims[2];
        let copy_x = old_dims[0].min(new_dims[0]);
        let copy_y = old_dims[1].min(new_dims[1]);
        let copy_z = old_dims[2].min(new_dims[2]);
        parallel::for_each_chunk_mut(&mut voxels, new_slab.max(1), 1, |x, slab| {
            if x >= copy_x {
                return;
            }
            for y in 0..copy_y {
                let src = x * old_dims[1] * old_dims[2] + y * old_dims[2];
                let dst = y * new_dims[2];
                slab[dst..dst + copy_z].copy_from_slice(&old[src..src + copy_z]);
            }
        });

        self.voxels = voxels;
        self.dims = new_dims;
        Ok(())
    }
}

fn checked_len(dims: [usize; 3], max_voxels: u64) -> Result<usize, ReconstructError> {
    let voxels = voxel_count(dims);
    if voxels == 0 || voxels > max_voxels || voxels > usize::MAX as u64 {
        return Err(ReconstructError::GridTooLarge {
            dims,
            voxels,
            max: max_voxels,
        });
    }
    Ok(voxels as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(dims: [usize; 3]) -> GridLayout {
        GridLayout {
            origin: Vec3::ZERO,
            dims,
            resolution: 0.5,
        }
    }

    #[test]
    fn index_is_row_major_with_z_fastest() {
        let grid = VoxelGrid::new(layout([2, 3, 4]), 1.0, [0.0; 4], 1_000).expect("grid");
        assert_eq!(grid.len(), 24);
        assert_eq!(grid.index(0, 0, 1), 1);
        assert_eq!(grid.index(0, 1, 0), 4);
        assert_eq!(grid.index(1, 0, 0), 12);
        assert_eq!(grid.index(1, 2, 3), 23);
    }

    #[test]
    fn reset_restores_truncation() {
        let mut grid = VoxelGrid::new(layout([2, 2, 2]), 0.3, [0.5; 4], 1_000).expect("grid");
        *grid.get_mut(1, 1, 1) = Voxel {
            distance: -0.1,
            color: [1.0; 4],
            weight: 4.0,
        };
        grid.reset();
        assert!(grid
            .voxels()
            .iter()
            .all(|v| *v == Voxel::empty(0.3, [0.5; 4])));
    }

    #[test]
    fn resize_preserves_index_correspondence() {
        let mut grid = VoxelGrid::new(layout([2, 3, 2]), 1.0, [0.0; 4], 1_000).expect("grid");
        for x in 0..2 {
            for y in 0..3 {
                for z in 0..2 {
                    let v = grid.get_mut(x, y, z);
                    v.distance = (x * 100 + y * 10 + z) as f32 * 0.001;
                    v.weight = 1.0;
                }
            }
        }

        grid.resize_and_preserve([3, 2, 4], 1_000).expect("resize");
        assert_eq!(grid.dims, [3, 2, 4]);
        for x in 0..3 {
            for y in 0..2 {
                for z in 0..4 {
                    let v = grid.get(x, y, z);
                    if x < 2 && z < 2 {
                        assert_eq!(v.distance, (x * 100 + y * 10 + z) as f32 * 0.001);
                        assert_eq!(v.weight, 1.0);
                    } else {
                        assert_eq!(*v, Voxel::empty(1.0, [0.0; 4]));
                    }
                }
            }
        }
    }

    #[test]
    fn failed_resize_leaves_grid_untouched() {
        let mut grid = VoxelGrid::new(layout([2, 2, 2]), 1.0, [0.0; 4], 8).expect("grid");
        grid.get_mut(0, 0, 0).weight = 3.0;
        let err = grid.resize_and_preserve([4, 4, 4], 8).expect_err("over cap");
        assert!(matches!(err, ReconstructError::GridTooLarge { .. }));
        assert_eq!(grid.dims, [2, 2, 2]);
        assert_eq!(grid.get(0, 0, 0).weight, 3.0);
    }

    #[test]
    fn voxel_coord_floors_relative_position() {
        let grid = VoxelGrid::new(layout([4, 4, 4]), 1.0, [0.0; 4], 1_000).expect("grid");
        assert_eq!(grid.voxel_coord(Vec3::new(0.75, 1.0, -0.25)), [1, 2, -1]);
        assert!(grid.get_checked(-1, 0, 0).is_none());
        assert!(grid.get_checked(3, 3, 3).is_some());
    }
}
