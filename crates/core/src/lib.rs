mod bounds;
mod config;
mod error;
mod integrate;
mod marching_cubes;
mod mesh;
mod parallel;
mod pipeline;
mod point_batch;
pub mod tables;
mod voxel_grid;

pub use bounds::{dims_from_size, voxel_count, Aabb, GridLayout};
pub use config::{
    FusionPolicy, GridMode, ReconstructionConfig, DEFAULT_DISPATCH_CHUNK, DEFAULT_GROWTH_MARGIN,
    DEFAULT_MAX_GRID_VOXELS, DEFAULT_RESOLUTION, DEFAULT_SURFACE_THRESHOLD, DEFAULT_TRUNCATION,
    MAX_KERNEL_RADIUS,
};
pub use error::ReconstructError;
pub use integrate::{fuse, integrate, integrate_serial, signed_distance, IntegrationStats};
pub use marching_cubes::{cell_config, cell_dims, extract, Dispatch, Extraction, EDGE_EPSILON};
pub use mesh::Mesh;
pub use pipeline::{CycleStats, Reconstructor};
pub use point_batch::{rgba8_to_f32, PointBatch};
pub use voxel_grid::{Voxel, VoxelGrid};
