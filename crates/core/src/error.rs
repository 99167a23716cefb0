use thiserror::Error;

/// Errors surfaced by a reconstruction cycle or by configuration.
///
/// Empty or mismatched point batches are not errors; they make a cycle a no-op.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconstructError {
    #[error("invalid reconstruction config: {0}")]
    InvalidConfig(String),

    #[error("voxel grid too large ({dims:?} = {voxels} voxels, max {max})")]
    GridTooLarge {
        dims: [usize; 3],
        voxels: u64,
        max: u64,
    },

    #[error("failed to allocate {len} elements for {what}")]
    Allocation { what: &'static str, len: usize },

    #[error("mesh has {vertices} vertices, more than 32-bit indices can address")]
    MeshTooLarge { vertices: usize },
}

pub(crate) fn try_alloc<T: Clone>(
    len: usize,
    value: T,
    what: &'static str,
) -> Result<Vec<T>, ReconstructError> {
    let mut values = Vec::new();
    values
        .try_reserve_exact(len)
        .map_err(|_| ReconstructError::Allocation { what, len })?;
    values.resize(len, value);
    Ok(values)
}
