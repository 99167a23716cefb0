use std::sync::atomic::{AtomicUsize, Ordering};

use glam::{Vec3, Vec4};

use crate::config::{FusionPolicy, MAX_KERNEL_RADIUS};
use crate::parallel;
use crate::point_batch::PointBatch;
use crate::voxel_grid::{Voxel, VoxelGrid};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegrationStats {
    pub points: usize,
    /// Points whose neighbourhood misses the grid entirely.
    pub clipped_points: usize,
    /// Voxel updates applied, counting a voxel once per point that moved it.
    pub updates: usize,
}

/// Geometry shared by every point of one integration pass.
#[derive(Debug, Clone, Copy)]
struct Kernel {
    origin: Vec3,
    resolution: f32,
    truncation: f32,
    radius: i64,
    dims: [i64; 3],
    fusion: FusionPolicy,
}

impl Kernel {
    /// `None` when the grid's truncation spans more than
    /// [`MAX_KERNEL_RADIUS`] voxels.
    fn new(grid: &VoxelGrid, fusion: FusionPolicy) -> Option<Self> {
        let ratio = (grid.truncation / grid.resolution).ceil();
        if !ratio.is_finite() || ratio < 0.0 || ratio > MAX_KERNEL_RADIUS as f32 {
            return None;
        }
        let dim = |axis: usize| i64::try_from(grid.dims[axis]).ok();
        Some(Self {
            origin: grid.origin,
            resolution: grid.resolution,
            truncation: grid.truncation,
            radius: ratio as i64,
            dims: [dim(0)?, dim(1)?, dim(2)?],
            fusion,
        })
    }

    fn reaches_grid(&self, coord: [i64; 3]) -> bool {
        (0..3).all(|axis| {
            coord[axis] >= -self.radius && coord[axis] < self.dims[axis] + self.radius
        })
    }

    /// Fuses one point into x-slab `x`, which holds `dims[1] * dims[2]` voxels.
    fn apply_to_slab(
        &self,
        slab: &mut [Voxel],
        x: i64,
        coord: [i64; 3],
        position: Vec3,
        color: [f32; 4],
    ) -> usize {
        let y0 = (coord[1] - self.radius).max(0);
        let y1 = (coord[1] + self.radius).min(self.dims[1] - 1);
        let z0 = (coord[2] - self.radius).max(0);
        let z1 = (coord[2] + self.radius).min(self.dims[2] - 1);
        let size_z = self.dims[2] as usize;
        let mut updates = 0;
        for y in y0..=y1 {
            for z in z0..=z1 {
                let center =
                    self.origin + Vec3::new(x as f32, y as f32, z as f32) * self.resolution;
                let signed_distance = signed_distance(
                    center,
                    position,
                    self.resolution,
                    self.truncation,
                );
                let voxel = &mut slab[y as usize * size_z + z as usize];
                if fuse(voxel, signed_distance, color, self.fusion, self.truncation) {
                    updates += 1;
                }
            }
        }
        updates
    }
}

/// Clamped distance from a voxel centre to an observed point, offset by one
/// voxel so the observation itself sits slightly inside the surface band.
pub fn signed_distance(center: Vec3, point: Vec3, resolution: f32, truncation: f32) -> f32 {
    (center.distance(point) - resolution).clamp(-truncation, truncation)
}

/// Folds one observation into `voxel`. Returns whether the voxel changed.
pub fn fuse(
    voxel: &mut Voxel,
    signed_distance: f32,
    color: [f32; 4],
    policy: FusionPolicy,
    truncation: f32,
) -> bool {
    if signed_distance.is_nan() || signed_distance >= voxel.distance {
        return false;
    }

    let new_weight = voxel.weight + 1.0;
    if voxel.weight <= 0.0 {
        voxel.distance = signed_distance;
        voxel.color = color;
        voxel.weight = new_weight;
        return true;
    }

    match policy {
        FusionPolicy::WeightedAverage => {
            let distance = (voxel.distance * voxel.weight + signed_distance) / new_weight;
            voxel.distance = distance.clamp(-truncation, truncation);
            voxel.color = Vec4::from(voxel.color)
                .lerp(Vec4::from(color), 1.0 / new_weight)
                .to_array();
        }
        FusionPolicy::MinReplace => {
            voxel.distance = signed_distance;
            voxel.color = color;
        }
    }
    voxel.weight = new_weight;
    true
}

/// Fuses every point of `batch` into `grid`.
///
/// Work is split by x-slab: each task owns one contiguous slab and replays,
/// in ascending point order, every point whose neighbourhood reaches it. No
/// voxel is written by two tasks, and each voxel sees its updates in the
/// same order as [`integrate_serial`], so both produce identical grids.
pub fn integrate(
    grid: &mut VoxelGrid,
    batch: &PointBatch,
    fusion: FusionPolicy,
    min_points_per_task: usize,
) -> IntegrationStats {
    let mut stats = IntegrationStats {
        points: batch.len(),
        ..IntegrationStats::default()
    };
    if grid.is_empty() || !batch.is_usable() {
        return stats;
    }

    let Some(kernel) = Kernel::new(grid, fusion) else {
        stats.clipped_points = stats.points;
        return stats;
    };
    // Bucket `b` holds points whose voxel x is `b - radius`.
    let radius = kernel.radius;
    let Some(bucket_count) = radius
        .checked_mul(2)
        .and_then(|span| span.checked_add(kernel.dims[0]))
        .and_then(|count| usize::try_from(count).ok())
    else {
        stats.clipped_points = stats.points;
        return stats;
    };

    let coords: Vec<[i64; 3]> = batch
        .positions
        .iter()
        .map(|p| grid.voxel_coord(Vec3::from(*p)))
        .collect();

    let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); bucket_count];
    for (idx, coord) in coords.iter().enumerate() {
        if !kernel.reaches_grid(*coord) {
            stats.clipped_points += 1;
            continue;
        }
        buckets[(coord[0] + radius) as usize].push(idx);
    }

    let updates = AtomicUsize::new(0);
    let slab_len = grid.slab_len();
    let slabs_per_task = (min_points_per_task / slab_len.max(1)).max(1);
    parallel::for_each_chunk_mut(grid.voxels_mut(), slab_len, slabs_per_task, |x, slab| {
        let window = &buckets[x..=x + 2 * radius as usize];
        let mut candidates: Vec<usize> = window.iter().flatten().copied().collect();
        if candidates.is_empty() {
            return;
        }
        candidates.sort_unstable();
        let mut applied = 0;
        for idx in candidates {
            applied += kernel.apply_to_slab(
                slab,
                x as i64,
                coords[idx],
                Vec3::from(batch.positions[idx]),
                batch.colors[idx],
            );
        }
        updates.fetch_add(applied, Ordering::Relaxed);
    });

    stats.updates = updates.into_inner();
    stats
}

/// Single-threaded integration in point order.
pub fn integrate_serial(
    grid: &mut VoxelGrid,
    batch: &PointBatch,
    fusion: FusionPolicy,
) -> IntegrationStats {
    let mut stats = IntegrationStats {
        points: batch.len(),
        ..IntegrationStats::default()
    };
    if grid.is_empty() || !batch.is_usable() {
        return stats;
    }

    let Some(kernel) = Kernel::new(grid, fusion) else {
        stats.clipped_points = stats.points;
        return stats;
    };
    let slab_len = grid.slab_len();
    for (position, color) in batch.positions.iter().zip(&batch.colors) {
        let position = Vec3::from(*position);
        let coord = grid.voxel_coord(position);
        if !kernel.reaches_grid(coord) {
            stats.clipped_points += 1;
            continue;
        }
        let x0 = (coord[0] - kernel.radius).max(0);
        let x1 = (coord[0] + kernel.radius).min(kernel.dims[0] - 1);
        for x in x0..=x1 {
            let start = x as usize * slab_len;
            let slab = &mut grid.voxels_mut()[start..start + slab_len];
            stats.updates += kernel.apply_to_slab(slab, x, coord, position, *color);
        }
    }
    stats
}
