use glam::Vec3;

use crate::bounds::Aabb;
use crate::error::ReconstructError;
use crate::marching_cubes::Extraction;

/// Triangle mesh handed to the consumer. Vertices are never shared, so
/// `indices` is `0..positions.len()` and every triple is one triangle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub positions: Vec<[f32; 3]>,
    pub colors: Vec<[f32; 4]>,
    pub indices: Vec<u32>,
    pub normals: Option<Vec<[f32; 3]>>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of the extracted buffers, numbers the vertices in
    /// order and computes normals.
    pub fn from_extraction(extraction: Extraction) -> Result<Self, ReconstructError> {
        let Extraction {
            mut positions,
            mut colors,
            ..
        } = extraction;
        let len = positions.len().min(colors.len());
        let len = len - len % 3;
        positions.truncate(len);
        colors.truncate(len);

        let count = u32::try_from(len)
            .map_err(|_| ReconstructError::MeshTooLarge { vertices: len })?;
        let mut mesh = Self {
            positions,
            colors,
            indices: (0..count).collect(),
            normals: None,
        };
        mesh.normals = flat_normals(&mesh.positions);
        Ok(mesh)
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn bounds(&self) -> Option<Aabb> {
        Aabb::from_points(&self.positions)
    }
}

/// One normal per triangle, repeated on its three vertices. Vertices are not
/// shared, so there is nothing to smooth across.
fn flat_normals(positions: &[[f32; 3]]) -> Option<Vec<[f32; 3]>> {
    if positions.is_empty() {
        return None;
    }
    let mut normals = Vec::with_capacity(positions.len());
    for tri in positions.chunks_exact(3) {
        let [p0, p1, p2] = [tri[0], tri[1], tri[2]].map(Vec3::from);
        let normal = (p1 - p0).cross(p2 - p0).try_normalize().unwrap_or(Vec3::Y);
        normals.extend([normal.to_array(); 3]);
    }
    Some(normals)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extraction(positions: Vec<[f32; 3]>) -> Extraction {
        let colors = vec![[0.2, 0.4, 0.6, 1.0]; positions.len()];
        Extraction {
            positions,
            colors,
            active_cells: 1,
            skipped_triangles: 0,
        }
    }

    #[test]
    fn indices_number_vertices_in_order() {
        let mesh = Mesh::from_extraction(extraction(vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 1.0],
            [0.0, 1.0, 1.0],
        ]))
        .expect("mesh");
        assert_eq!(mesh.indices, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.colors.len(), mesh.vertex_count());
    }

    #[test]
    fn normals_follow_winding() {
        let mesh = Mesh::from_extraction(extraction(vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
        ]))
        .expect("mesh");
        let normals = mesh.normals.expect("normals");
        for n in normals {
            assert!((n[2] - 1.0).abs() < 0.001);
        }
    }

    #[test]
    fn coincident_triangles_keep_their_own_normals() {
        let mesh = Mesh::from_extraction(extraction(vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
        ]))
        .expect("mesh");
        let normals = mesh.normals.expect("normals");
        assert_eq!(normals.len(), 9);
        assert_eq!(&normals[0..3], &[[0.0, 0.0, 1.0]; 3]);
        assert_eq!(&normals[3..6], &[[0.0, 0.0, -1.0]; 3]);
        assert_eq!(&normals[6..9], &[[0.0, 1.0, 0.0]; 3]);
    }

    #[test]
    fn empty_extraction_gives_empty_mesh() {
        let mesh = Mesh::from_extraction(Extraction::default()).expect("mesh");
        assert!(mesh.is_empty());
        assert!(mesh.bounds().is_none());
        assert!(mesh.normals.is_none());
    }

    #[test]
    fn bounds_for_simple_points() {
        let mesh = Mesh::from_extraction(extraction(vec![
            [1.0, -2.0, 0.5],
            [-3.0, 4.0, 2.0],
            [0.0, 0.0, 0.0],
        ]))
        .expect("mesh");
        let bounds = mesh.bounds().expect("bounds");
        assert_eq!(bounds.min, Vec3::new(-3.0, -2.0, 0.0));
        assert_eq!(bounds.max, Vec3::new(1.0, 4.0, 2.0));
    }
}
