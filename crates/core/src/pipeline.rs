#[cfg(not(target_arch = "wasm32"))]
use std::time::Instant;
#[cfg(target_arch = "wasm32")]
use web_time::Instant;

use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use crate::bounds::{Aabb, GridLayout};
use crate::config::{GridMode, ReconstructionConfig};
use crate::error::ReconstructError;
use crate::integrate::{integrate, integrate_serial};
use crate::marching_cubes::{extract, Dispatch};
use crate::mesh::Mesh;
use crate::parallel;
use crate::point_batch::PointBatch;
use crate::voxel_grid::VoxelGrid;

/// Summary of one completed reconstruction cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleStats {
    pub cycle: u64,
    pub points: usize,
    pub clipped_points: usize,
    pub dims: [usize; 3],
    /// Voxels holding at least one observation after integration.
    pub touched_voxels: usize,
    pub active_cells: usize,
    pub triangles: usize,
    pub skipped_triangles: usize,
    /// The persistent grid was enlarged this cycle.
    pub grew: bool,
}

/// Turns successive point batches into meshes.
///
/// Owns the voxel grid between cycles. Every cycle runs bounds, grid
/// preparation, integration, extraction and assembly in that order, and
/// hands the finished mesh to the caller without keeping a copy.
#[derive(Debug)]
pub struct Reconstructor {
    config: ReconstructionConfig,
    grid: Option<VoxelGrid>,
    cycles: u64,
    last_stats: Option<CycleStats>,
}

impl Reconstructor {
    pub fn new(config: ReconstructionConfig) -> Result<Self, ReconstructError> {
        config.validate()?;
        Ok(Self {
            config,
            grid: None,
            cycles: 0,
            last_stats: None,
        })
    }

    pub fn config(&self) -> &ReconstructionConfig {
        &self.config
    }

    pub fn grid(&self) -> Option<&VoxelGrid> {
        self.grid.as_ref()
    }

    pub fn last_stats(&self) -> Option<&CycleStats> {
        self.last_stats.as_ref()
    }

    /// Completed cycles; skipped batches do not count.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Runs one cycle. Returns `Ok(None)` without touching any state when the
    /// batch is empty or its positions and colours differ in length.
    ///
    /// A grid that cannot be allocated or grown fails this cycle only; the
    /// grid from the previous cycle is kept as it was.
    pub fn update(&mut self, batch: &PointBatch) -> Result<Option<Mesh>, ReconstructError> {
        if !batch.is_usable() {
            debug!(
                positions = batch.positions.len(),
                colors = batch.colors.len(),
                "skipping reconstruction cycle without usable points"
            );
            return Ok(None);
        }
        let Some(bounds) = Aabb::from_points(&batch.positions) else {
            return Ok(None);
        };

        let cycle = self.cycles + 1;
        let span = info_span!("reconstruct_cycle", cycle);
        let _guard = span.enter();
        let start = Instant::now();

        let grew = self.prepare_grid(&bounds)?;
        let chunk = self.config.cells_per_dispatch_chunk;
        let serial = self.config.serial;
        let fusion = self.config.fusion;
        let threshold = self.config.surface_threshold;
        let Some(grid) = self.grid.as_mut() else {
            return Ok(None);
        };

        let phase = Instant::now();
        let integration = if serial {
            integrate_serial(grid, batch, fusion)
        } else {
            integrate(grid, batch, fusion, chunk)
        };
        let voxels = grid.voxels();
        let touched_voxels = parallel::count_indices(voxels.len(), chunk, |idx| {
            voxels[idx].weight > 0.0
        });
        debug!(
            points = integration.points,
            clipped = integration.clipped_points,
            updates = integration.updates,
            touched_voxels,
            elapsed_ms = phase.elapsed().as_secs_f64() * 1000.0,
            "integrated point batch"
        );

        let phase = Instant::now();
        let dispatch = if serial {
            Dispatch::Serial
        } else {
            Dispatch::Parallel {
                min_cells_per_task: chunk,
            }
        };
        let extraction = extract(grid, threshold, dispatch)?;
        debug!(
            active_cells = extraction.active_cells,
            triangles = extraction.triangle_count(),
            elapsed_ms = phase.elapsed().as_secs_f64() * 1000.0,
            "extracted isosurface"
        );
        if extraction.skipped_triangles > 0 {
            debug!(
                skipped = extraction.skipped_triangles,
                "dropped triangles on degenerate edges"
            );
        }

        let stats = CycleStats {
            cycle,
            points: integration.points,
            clipped_points: integration.clipped_points,
            dims: grid.dims,
            touched_voxels,
            active_cells: extraction.active_cells,
            triangles: extraction.triangle_count(),
            skipped_triangles: extraction.skipped_triangles,
            grew,
        };
        let mesh = Mesh::from_extraction(extraction)?;

        info!(
            points = stats.points,
            dims = ?stats.dims,
            triangles = stats.triangles,
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "reconstruction cycle complete"
        );
        self.cycles = cycle;
        self.last_stats = Some(stats);
        Ok(Some(mesh))
    }

    /// Makes `self.grid` ready for a batch spanning `bounds`. Returns whether
    /// a persistent grid grew.
    fn prepare_grid(&mut self, bounds: &Aabb) -> Result<bool, ReconstructError> {
        let config = &self.config;
        let Some(grid) = self.grid.as_mut() else {
            let layout = GridLayout::fit(bounds, config.resolution)?;
            self.grid = Some(allocate_grid(config, layout)?);
            return Ok(false);
        };

        match config.grid_mode {
            GridMode::Rebuild => {
                let layout = GridLayout::fit(bounds, config.resolution)?;
                if grid.layout() == layout {
                    grid.reset();
                    debug!(dims = ?layout.dims, "reset voxel grid");
                } else {
                    *grid = allocate_grid(config, layout)?;
                }
                Ok(false)
            }
            GridMode::Persistent { growth_margin } => {
                let needed = GridLayout::dims_covering(grid.origin, bounds, config.resolution)?;
                let exceeds = (0..3).any(|axis| needed[axis] > grid.dims[axis] + growth_margin);
                if !exceeds {
                    return Ok(false);
                }
                let old_dims = grid.dims;
                let new_dims = [0, 1, 2].map(|axis| needed[axis].max(old_dims[axis]));
                if let Err(err) = grid.resize_and_preserve(new_dims, config.max_grid_voxels) {
                    warn!(?old_dims, ?new_dims, %err, "voxel grid growth failed");
                    return Err(err);
                }
                debug!(?old_dims, ?new_dims, "grew voxel grid");
                Ok(true)
            }
        }
    }
}

fn allocate_grid(
    config: &ReconstructionConfig,
    layout: GridLayout,
) -> Result<VoxelGrid, ReconstructError> {
    let grid = VoxelGrid::new(
        layout,
        config.truncation,
        config.default_color,
        config.max_grid_voxels,
    )
    .inspect_err(|err| warn!(dims = ?layout.dims, %err, "voxel grid allocation failed"))?;
    debug!(dims = ?layout.dims, origin = ?layout.origin, "allocated voxel grid");
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::config::FusionPolicy;

    fn sphere_batch(radius: f32, count: usize) -> PointBatch {
        let golden = std::f64::consts::PI * (3.0 - 5f64.sqrt());
        let mut positions = Vec::with_capacity(count);
        let mut colors = Vec::with_capacity(count);
        for i in 0..count {
            let y = 1.0 - 2.0 * (i as f64 + 0.5) / count as f64;
            let r = (1.0 - y * y).sqrt();
            let theta = golden * i as f64;
            let p = [theta.cos() * r, y, theta.sin() * r].map(|c| (c * radius as f64) as f32);
            positions.push(p);
            colors.push([0.5 + 0.5 * y as f32, 0.25, 0.75, 1.0]);
        }
        PointBatch::new(positions, colors)
    }

    fn cube_batch(min: f32, max: f32, steps: usize) -> PointBatch {
        let mut positions = Vec::new();
        for i in 0..=steps {
            for j in 0..=steps {
                let a = min + (max - min) * i as f32 / steps as f32;
                let b = min + (max - min) * j as f32 / steps as f32;
                positions.push([a, b, min]);
                positions.push([a, b, max]);
                positions.push([a, min, b]);
                positions.push([a, max, b]);
                positions.push([min, a, b]);
                positions.push([max, a, b]);
            }
        }
        PointBatch::uniform(positions, [0.8, 0.1, 0.1, 1.0])
    }

    #[test]
    fn rejects_invalid_config() {
        let err = Reconstructor::new(ReconstructionConfig::new(0.0, 0.2, 0.01))
            .expect_err("zero resolution");
        assert!(matches!(err, ReconstructError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_unbounded_kernel_radius() {
        let err = Reconstructor::new(ReconstructionConfig::new(1e-30, 1e30, 0.01))
            .expect_err("radius overflow");
        assert!(matches!(err, ReconstructError::InvalidConfig(_)));
    }

    #[test]
    fn sphere_round_trip() {
        let radius = 1.0;
        let resolution = 0.05;
        let truncation = 0.1;
        // Averaged voxels sit a few hundredths above their closest
        // observation, so the level has to clear that band.
        let threshold = 0.03;
        let config = ReconstructionConfig::new(resolution, truncation, threshold);
        let mut reconstructor = Reconstructor::new(config).expect("reconstructor");
        let mesh = reconstructor
            .update(&sphere_batch(radius, 30_000))
            .expect("cycle")
            .expect("mesh");

        assert!(mesh.vertex_count() > 0);
        assert_eq!(mesh.indices.len(), mesh.vertex_count());
        assert_eq!(mesh.colors.len(), mesh.vertex_count());
        for p in &mesh.positions {
            let r = Vec3::from(*p).length();
            assert!((r - radius).abs() <= truncation, "vertex at radius {r}");
        }

        let expected = 4.0 * std::f32::consts::PI * radius * radius / (resolution * resolution);
        let triangles = mesh.triangle_count() as f32;
        assert!(triangles > expected * 0.1 && triangles < expected * 10.0);

        let stats = reconstructor.last_stats().expect("stats");
        assert_eq!(stats.cycle, 1);
        assert_eq!(stats.triangles, mesh.triangle_count());
        assert!(stats.touched_voxels > 0);
    }

    #[test]
    fn serial_runs_are_identical() {
        let mut config = ReconstructionConfig::new(0.05, 0.1, 0.03);
        config.serial = true;
        let batch = sphere_batch(0.6, 8_000);
        let mut a = Reconstructor::new(config.clone()).expect("a");
        let mut b = Reconstructor::new(config).expect("b");
        let mesh_a = a.update(&batch).expect("cycle a").expect("mesh a");
        let mesh_b = b.update(&batch).expect("cycle b").expect("mesh b");
        assert_eq!(mesh_a, mesh_b);
        assert_eq!(
            a.grid().expect("grid a").voxels(),
            b.grid().expect("grid b").voxels()
        );
    }

    #[test]
    fn parallel_grid_matches_serial_grid() {
        let batch = sphere_batch(0.6, 8_000);
        let mut config = ReconstructionConfig::new(0.05, 0.1, 0.03);
        let mut parallel = Reconstructor::new(config.clone()).expect("parallel");
        config.serial = true;
        let mut serial = Reconstructor::new(config).expect("serial");
        let mesh_p = parallel.update(&batch).expect("cycle").expect("mesh");
        let mesh_s = serial.update(&batch).expect("cycle").expect("mesh");
        assert_eq!(
            parallel.grid().expect("grid").voxels(),
            serial.grid().expect("grid").voxels()
        );
        assert_eq!(mesh_p.triangle_count(), mesh_s.triangle_count());
    }

    #[test]
    fn empty_batch_leaves_state_untouched() {
        let mut reconstructor =
            Reconstructor::new(ReconstructionConfig::default()).expect("reconstructor");
        reconstructor
            .update(&cube_batch(0.0, 1.0, 10))
            .expect("cycle")
            .expect("mesh");
        let grid_before = reconstructor.grid().expect("grid").clone();
        let stats_before = *reconstructor.last_stats().expect("stats");

        assert!(reconstructor
            .update(&PointBatch::default())
            .expect("empty")
            .is_none());
        let mismatched = PointBatch::new(vec![[0.0; 3], [1.0; 3]], vec![[1.0; 4]]);
        assert!(reconstructor.update(&mismatched).expect("mismatch").is_none());

        let grid_after = reconstructor.grid().expect("grid");
        assert_eq!(grid_after.dims, grid_before.dims);
        assert_eq!(grid_after.voxels(), grid_before.voxels());
        assert_eq!(reconstructor.last_stats(), Some(&stats_before));
        assert_eq!(reconstructor.cycles(), 1);
    }

    #[test]
    fn rebuild_mode_starts_each_cycle_fresh() {
        let mut reconstructor =
            Reconstructor::new(ReconstructionConfig::default()).expect("reconstructor");
        let batch = cube_batch(0.0, 1.0, 10);
        let first = reconstructor.update(&batch).expect("first").expect("mesh");
        let weights: Vec<f32> = reconstructor
            .grid()
            .expect("grid")
            .voxels()
            .iter()
            .map(|v| v.weight)
            .collect();
        let second = reconstructor.update(&batch).expect("second").expect("mesh");
        let grid = reconstructor.grid().expect("grid");
        assert!(grid.voxels().iter().zip(&weights).all(|(v, w)| v.weight == *w));
        assert_eq!(first.triangle_count(), second.triangle_count());
        assert!(!reconstructor.last_stats().expect("stats").grew);
    }

    #[test]
    fn persistent_growth_preserves_fused_voxels() {
        let mut config = ReconstructionConfig::default();
        config.grid_mode = GridMode::Persistent { growth_margin: 0 };
        let mut reconstructor = Reconstructor::new(config).expect("reconstructor");

        reconstructor
            .update(&cube_batch(0.0, 1.0, 10))
            .expect("first")
            .expect("mesh");
        let before = reconstructor.grid().expect("grid").clone();

        let far = PointBatch::uniform(vec![[2.5, 0.0, 0.0]], [0.0, 1.0, 0.0, 1.0]);
        reconstructor.update(&far).expect("second").expect("mesh");
        let after = reconstructor.grid().expect("grid");
        assert!(reconstructor.last_stats().expect("stats").grew);
        assert_eq!(after.origin, before.origin);
        assert!(after.dims[0] > before.dims[0]);
        assert_eq!(after.dims[1], before.dims[1]);
        assert_eq!(after.dims[2], before.dims[2]);

        // The far point only reaches voxels with x beyond the first cube.
        let untouched_x = before.dims[0] - 4;
        for x in 0..untouched_x {
            for y in 0..before.dims[1] {
                for z in 0..before.dims[2] {
                    assert_eq!(after.get(x, y, z), before.get(x, y, z));
                }
            }
        }
    }

    #[test]
    fn persistent_grid_fuses_across_cycles_within_margin() {
        let mut config = ReconstructionConfig::default();
        config.grid_mode = GridMode::persistent();
        config.fusion = FusionPolicy::MinReplace;
        let mut reconstructor = Reconstructor::new(config).expect("reconstructor");
        reconstructor
            .update(&cube_batch(0.0, 1.0, 10))
            .expect("first")
            .expect("mesh");
        let dims = reconstructor.grid().expect("grid").dims;
        let weight_before: f32 = reconstructor
            .grid()
            .expect("grid")
            .voxels()
            .iter()
            .map(|v| v.weight)
            .sum();

        let mut inner = sphere_batch(0.3, 2_000);
        for p in &mut inner.positions {
            *p = p.map(|c| c + 0.5);
        }
        reconstructor.update(&inner).expect("second").expect("mesh");
        let grid = reconstructor.grid().expect("grid");
        assert_eq!(grid.dims, dims);
        assert!(!reconstructor.last_stats().expect("stats").grew);
        let weight_after: f32 = grid.voxels().iter().map(|v| v.weight).sum();
        assert!(weight_after > weight_before);
    }

    #[test]
    fn failed_growth_keeps_previous_grid() {
        let mut config = ReconstructionConfig::default();
        config.grid_mode = GridMode::Persistent { growth_margin: 0 };
        config.max_grid_voxels = 20 * 20 * 20;
        let mut reconstructor = Reconstructor::new(config).expect("reconstructor");
        reconstructor
            .update(&cube_batch(0.0, 1.0, 10))
            .expect("first")
            .expect("mesh");
        let before = reconstructor.grid().expect("grid").clone();

        let huge = PointBatch::uniform(vec![[50.0, 50.0, 50.0]], [1.0; 4]);
        let err = reconstructor.update(&huge).expect_err("growth over cap");
        assert!(matches!(err, ReconstructError::GridTooLarge { .. }));
        let grid = reconstructor.grid().expect("grid");
        assert_eq!(grid.dims, before.dims);
        assert_eq!(grid.voxels(), before.voxels());
        assert_eq!(reconstructor.cycles(), 1);

        reconstructor
            .update(&cube_batch(0.0, 1.0, 10))
            .expect("retry")
            .expect("mesh");
        assert_eq!(reconstructor.cycles(), 2);
    }
}
