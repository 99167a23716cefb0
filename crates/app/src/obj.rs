use std::io::{self, BufWriter, Write};
use std::path::Path;

use pointmesh_core::Mesh;

pub fn write_obj(path: &Path, mesh: &Mesh) -> Result<(), String> {
    let file = std::fs::File::create(path).map_err(|err| format!("{}: {err}", path.display()))?;
    let mut writer = BufWriter::new(file);
    write_obj_to(&mut writer, mesh)
        .and_then(|_| writer.flush())
        .map_err(|err| format!("{}: {err}", path.display()))
}

/// Vertex colours go on the `v` line as three extra RGB floats; alpha has
/// no place in OBJ and is dropped.
pub fn write_obj_to<W: Write>(out: &mut W, mesh: &Mesh) -> io::Result<()> {
    writeln!(
        out,
        "# {} vertices, {} triangles",
        mesh.vertex_count(),
        mesh.triangle_count()
    )?;

    let has_colors = mesh.colors.len() == mesh.positions.len();
    for (idx, p) in mesh.positions.iter().enumerate() {
        if has_colors {
            let c = mesh.colors[idx];
            writeln!(out, "v {} {} {} {} {} {}", p[0], p[1], p[2], c[0], c[1], c[2])?;
        } else {
            writeln!(out, "v {} {} {}", p[0], p[1], p[2])?;
        }
    }

    let normals = mesh
        .normals
        .as_ref()
        .filter(|normals| normals.len() == mesh.positions.len());
    if let Some(normals) = normals {
        for n in normals {
            writeln!(out, "vn {} {} {}", n[0], n[1], n[2])?;
        }
    }

    for tri in mesh.indices.chunks_exact(3) {
        let a = tri[0] + 1;
        let b = tri[1] + 1;
        let c = tri[2] + 1;
        if normals.is_some() {
            writeln!(out, "f {a}//{a} {b}//{b} {c}//{c}")?;
        } else {
            writeln!(out, "f {a} {b} {c}")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Mesh {
        Mesh {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            colors: vec![[1.0, 0.0, 0.0, 1.0], [0.0, 1.0, 0.0, 1.0], [0.0, 0.0, 1.0, 0.5]],
            indices: vec![0, 1, 2],
            normals: None,
        }
    }

    fn render(mesh: &Mesh) -> String {
        let mut out = Vec::new();
        write_obj_to(&mut out, mesh).expect("write");
        String::from_utf8(out).expect("utf8")
    }

    #[test]
    fn writes_colored_vertices_and_faces() {
        let text = render(&triangle());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# 3 vertices, 1 triangles");
        assert_eq!(lines[1], "v 0 0 0 1 0 0");
        assert_eq!(lines[3], "v 0 1 0 0 0 1");
        assert_eq!(lines[4], "f 1 2 3");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn writes_normals_when_present() {
        let mut mesh = triangle();
        mesh.normals = Some(vec![[0.0, 0.0, 1.0]; 3]);
        let text = render(&mesh);
        assert!(text.contains("vn 0 0 1\n"));
        assert!(text.trim_end().ends_with("f 1//1 2//2 3//3"));
    }

    #[test]
    fn empty_mesh_writes_only_the_summary() {
        let text = render(&Mesh::new());
        assert_eq!(text, "# 0 vertices, 0 triangles\n");
    }
}
