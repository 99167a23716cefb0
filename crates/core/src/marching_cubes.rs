use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use glam::{Vec3, Vec4};

use crate::error::ReconstructError;
use crate::parallel;
use crate::tables::{
    triangle_edges, CORNER_OFFSETS, EDGE_CORNERS, EDGE_ENDPOINTS, MAX_CELL_VERTICES,
};
use crate::voxel_grid::{Voxel, VoxelGrid};

/// Corner distances closer than this are treated as one value and their
/// edge is not interpolated.
pub const EDGE_EPSILON: f32 = 1.0e-6;

/// Floats per reserved vertex: position then RGBA.
const SLOT_STRIDE: usize = 7;

/// Raw marching-cubes output: every three consecutive vertices are one
/// triangle, and no vertex is shared between triangles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub positions: Vec<[f32; 3]>,
    pub colors: Vec<[f32; 4]>,
    /// Cells whose corners straddle the threshold.
    pub active_cells: usize,
    /// Triangles dropped for a degenerate or out-of-range edge.
    pub skipped_triangles: usize,
}

impl Extraction {
    pub fn triangle_count(&self) -> usize {
        self.positions.len() / 3
    }
}

/// How cells are scheduled. Parallel runs interleave triangle blocks in
/// whatever order workers reserve them; serial runs emit in cell order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Parallel { min_cells_per_task: usize },
    Serial,
}

#[derive(Debug, Clone, Copy, Default)]
struct EmittedVertex {
    position: [f32; 3],
    color: [f32; 4],
}

struct CellTriangles {
    vertices: [EmittedVertex; MAX_CELL_VERTICES],
    len: usize,
    skipped: usize,
}

impl CellTriangles {
    fn new() -> Self {
        Self {
            vertices: [EmittedVertex::default(); MAX_CELL_VERTICES],
            len: 0,
            skipped: 0,
        }
    }

    fn emitted(&self) -> &[EmittedVertex] {
        &self.vertices[..self.len]
    }
}

/// Fixed-capacity vertex store filled concurrently. Writers claim disjoint
/// blocks through `next` and store float bits without further coordination.
struct VertexSlots {
    data: Vec<AtomicU32>,
    capacity: usize,
    next: AtomicUsize,
}

impl VertexSlots {
    fn with_capacity(capacity: usize) -> Result<Self, ReconstructError> {
        let len = capacity
            .checked_mul(SLOT_STRIDE)
            .ok_or(ReconstructError::Allocation {
                what: "vertex buffer",
                len: usize::MAX,
            })?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| ReconstructError::Allocation {
                what: "vertex buffer",
                len,
            })?;
        data.extend((0..len).map(|_| AtomicU32::new(0)));
        Ok(Self {
            data,
            capacity,
            next: AtomicUsize::new(0),
        })
    }

    /// First slot of a fresh block of `count` vertices, or `None` when full.
    fn reserve(&self, count: usize) -> Option<usize> {
        let base = self.next.fetch_add(count, Ordering::Relaxed);
        (base + count <= self.capacity).then_some(base)
    }

    fn write(&self, slot: usize, vertex: &EmittedVertex) {
        let offset = slot * SLOT_STRIDE;
        let values = vertex.position.iter().chain(vertex.color.iter());
        for (cell, value) in self.data[offset..offset + SLOT_STRIDE].iter().zip(values) {
            cell.store(value.to_bits(), Ordering::Relaxed);
        }
    }

    fn into_buffers(self) -> (Vec<[f32; 3]>, Vec<[f32; 4]>) {
        let len = self.next.into_inner().min(self.capacity);
        let mut positions = Vec::with_capacity(len);
        let mut colors = Vec::with_capacity(len);
        let floats: Vec<f32> = self
            .data
            .into_iter()
            .take(len * SLOT_STRIDE)
            .map(|bits| f32::from_bits(bits.into_inner()))
            .collect();
        for slot in floats.chunks_exact(SLOT_STRIDE) {
            positions.push([slot[0], slot[1], slot[2]]);
            colors.push([slot[3], slot[4], slot[5], slot[6]]);
        }
        (positions, colors)
    }
}

/// Number of cells per axis; zero when the grid is too thin to hold one.
pub fn cell_dims(grid: &VoxelGrid) -> [usize; 3] {
    if grid.dims.iter().any(|d| *d < 2) {
        return [0, 0, 0];
    }
    [grid.dims[0] - 1, grid.dims[1] - 1, grid.dims[2] - 1]
}

fn cell_coord(cells: [usize; 3], idx: usize) -> [usize; 3] {
    let plane = cells[1] * cells[2];
    [idx / plane, (idx / cells[2]) % cells[1], idx % cells[2]]
}

fn corners(grid: &VoxelGrid, cell: [usize; 3]) -> [Option<&Voxel>; 8] {
    CORNER_OFFSETS.map(|offset| {
        grid.get_checked(
            (cell[0] + offset[0] as usize) as i64,
            (cell[1] + offset[1] as usize) as i64,
            (cell[2] + offset[2] as usize) as i64,
        )
    })
}

/// Bit `i` is set when corner `i` lies above `threshold`. Missing corners
/// count as below.
pub fn cell_config(corners: &[Option<&Voxel>; 8], threshold: f32) -> u8 {
    corners
        .iter()
        .enumerate()
        .fold(0u8, |config, (i, corner)| match corner {
            Some(voxel) if voxel.distance > threshold => config | (1 << i),
            _ => config,
        })
}

fn interpolate_edge(
    grid: &VoxelGrid,
    cell: [usize; 3],
    corners: &[Option<&Voxel>; 8],
    edge: usize,
) -> Option<EmittedVertex> {
    let [a, b] = EDGE_CORNERS[edge];
    let (va, vb) = (corners[a]?, corners[b]?);
    let (s1, s2) = (va.distance, vb.distance);
    if (s1 - s2).abs() < EDGE_EPSILON {
        return None;
    }
    let alpha = (s1 / (s1 - s2)).clamp(0.0, 1.0);
    let [p1, p2] =
        EDGE_ENDPOINTS[edge].map(|p| Vec3::new(p[0] as f32, p[1] as f32, p[2] as f32));
    let local = p1.lerp(p2, alpha);
    let cell = Vec3::new(cell[0] as f32, cell[1] as f32, cell[2] as f32);
    let position = grid.origin + (cell + local) * grid.resolution;
    let color = Vec4::from(va.color).lerp(Vec4::from(vb.color), alpha);
    Some(EmittedVertex {
        position: position.to_array(),
        color: color.to_array(),
    })
}

fn march_cell(grid: &VoxelGrid, cell: [usize; 3], threshold: f32) -> CellTriangles {
    let mut out = CellTriangles::new();
    let corners = corners(grid, cell);
    let config = cell_config(&corners, threshold);
    if config == 0 || config == u8::MAX {
        return out;
    }

    'triangles: for tri in triangle_edges(config).chunks_exact(3) {
        let mut vertices = [EmittedVertex::default(); 3];
        for (slot, edge) in vertices.iter_mut().zip(tri) {
            match interpolate_edge(grid, cell, &corners, *edge as usize) {
                Some(vertex) => *slot = vertex,
                None => {
                    out.skipped += 1;
                    continue 'triangles;
                }
            }
        }
        out.vertices[out.len..out.len + 3].copy_from_slice(&vertices);
        out.len += 3;
    }
    out
}

fn is_active(grid: &VoxelGrid, cell: [usize; 3], threshold: f32) -> bool {
    let config = cell_config(&corners(grid, cell), threshold);
    config != 0 && config != u8::MAX
}

/// Extracts the `threshold` isosurface of `grid`.
///
/// A first pass counts active cells so the shared vertex store can be sized
/// for the worst case of those cells alone. Each cell then triangulates
/// locally, reserves one contiguous block, and writes it in place.
pub fn extract(
    grid: &VoxelGrid,
    threshold: f32,
    dispatch: Dispatch,
) -> Result<Extraction, ReconstructError> {
    let cells = cell_dims(grid);
    let cell_count = cells[0] * cells[1] * cells[2];
    if cell_count == 0 {
        return Ok(Extraction::default());
    }

    let active_cells = match dispatch {
        Dispatch::Parallel { min_cells_per_task } => {
            parallel::count_indices(cell_count, min_cells_per_task, |idx| {
                is_active(grid, cell_coord(cells, idx), threshold)
            })
        }
        Dispatch::Serial => (0..cell_count)
            .filter(|idx| is_active(grid, cell_coord(cells, *idx), threshold))
            .count(),
    };
    if active_cells == 0 {
        return Ok(Extraction::default());
    }

    let slots = VertexSlots::with_capacity(active_cells.saturating_mul(MAX_CELL_VERTICES))?;
    let skipped = AtomicUsize::new(0);
    let process = |idx: usize| {
        let cell = cell_coord(cells, idx);
        let out = march_cell(grid, cell, threshold);
        if out.skipped > 0 {
            skipped.fetch_add(out.skipped, Ordering::Relaxed);
        }
        let emitted = out.emitted();
        if emitted.is_empty() {
            return;
        }
        if let Some(base) = slots.reserve(emitted.len()) {
            for (offset, vertex) in emitted.iter().enumerate() {
                slots.write(base + offset, vertex);
            }
        }
    };
    match dispatch {
        Dispatch::Parallel { min_cells_per_task } => {
            parallel::for_each_index(cell_count, min_cells_per_task, process)
        }
        Dispatch::Serial => (0..cell_count).for_each(process),
    }

    let (positions, colors) = slots.into_buffers();
    Ok(Extraction {
        positions,
        colors,
        active_cells,
        skipped_triangles: skipped.into_inner(),
    })
}
