//! Binary little-endian PLY export for meshes and point clouds.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use nalgebra::Vector3;

use crate::mesh::{PointCloud, TriangleMesh};

/// Parsed PLY header.
#[derive(Debug, Clone, PartialEq)]
pub struct PlyHeader {
    pub format: String,
    pub elements: Vec<PlyElement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlyElement {
    pub name: String,
    pub count: usize,
    pub properties: Vec<String>,
}

impl PlyHeader {
    pub fn element(&self, name: &str) -> Option<&PlyElement> {
        self.elements.iter().find(|e| e.name == name)
    }
}

pub fn write_triangle_mesh<P: AsRef<Path>>(path: P, mesh: &TriangleMesh) -> Result<()> {
    let path = path.as_ref();
    let normals = mesh.has_vertex_normals().then_some(mesh.vertex_normals.as_slice());
    let colors = mesh.has_vertex_colors().then_some(mesh.vertex_colors.as_slice());

    let mut out = create(path)?;
    write_header(
        &mut out,
        mesh.vertices.len(),
        normals.is_some(),
        colors.is_some(),
        Some(mesh.triangles.len()),
    )?;
    write_vertices(&mut out, &mesh.vertices, normals, colors)?;
    for t in &mesh.triangles {
        out.write_all(&[3u8])?;
        for &v in t {
            out.write_all(&(v as i32).to_le_bytes())?;
        }
    }
    out.flush()
        .with_context(|| format!("Failed to write {}", path.display()))
}

pub fn write_point_cloud<P: AsRef<Path>>(path: P, cloud: &PointCloud) -> Result<()> {
    let path = path.as_ref();
    let normals = cloud.has_normals().then_some(cloud.normals.as_slice());
    let colors = cloud.has_colors().then_some(cloud.colors.as_slice());

    let mut out = create(path)?;
    write_header(
        &mut out,
        cloud.points.len(),
        normals.is_some(),
        colors.is_some(),
        None,
    )?;
    write_vertices(&mut out, &cloud.points, normals, colors)?;
    out.flush()
        .with_context(|| format!("Failed to write {}", path.display()))
}

pub fn read_ply_header<P: AsRef<Path>>(path: P) -> Result<PlyHeader> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);

    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim_end() != "ply" {
        bail!("{} is not a PLY file", path.display());
    }

    let mut format = String::new();
    let mut elements: Vec<PlyElement> = Vec::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            bail!("Unexpected end of header in {}", path.display());
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["end_header"] => break,
            ["format", fmt, _version] => format = fmt.to_string(),
            ["element", name, count] => elements.push(PlyElement {
                name: name.to_string(),
                count: count.parse().with_context(|| format!("Bad element count '{}'", count))?,
                properties: Vec::new(),
            }),
            ["property", .., name] => {
                if let Some(el) = elements.last_mut() {
                    el.properties.push(name.to_string());
                }
            }
            _ => {}
        }
    }
    Ok(PlyHeader { format, elements })
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn write_header(
    out: &mut impl Write,
    vertex_count: usize,
    normals: bool,
    colors: bool,
    face_count: Option<usize>,
) -> Result<()> {
    writeln!(out, "ply")?;
    writeln!(out, "format binary_little_endian 1.0")?;
    writeln!(out, "comment rust-recon")?;
    writeln!(out, "element vertex {}", vertex_count)?;
    for axis in ["x", "y", "z"] {
        writeln!(out, "property float {}", axis)?;
    }
    if normals {
        for axis in ["nx", "ny", "nz"] {
            writeln!(out, "property float {}", axis)?;
        }
    }
    if colors {
        for channel in ["red", "green", "blue"] {
            writeln!(out, "property uchar {}", channel)?;
        }
    }
    if let Some(faces) = face_count {
        writeln!(out, "element face {}", faces)?;
        writeln!(out, "property list uchar int vertex_indices")?;
    }
    writeln!(out, "end_header")?;
    Ok(())
}

fn write_vertices(
    out: &mut impl Write,
    points: &[Vector3<f64>],
    normals: Option<&[Vector3<f64>]>,
    colors: Option<&[Vector3<f64>]>,
) -> Result<()> {
    for (i, p) in points.iter().enumerate() {
        for c in p.iter() {
            out.write_all(&(*c as f32).to_le_bytes())?;
        }
        if let Some(normals) = normals {
            for c in normals[i].iter() {
                out.write_all(&(*c as f32).to_le_bytes())?;
            }
        }
        if let Some(colors) = colors {
            let rgb = colors[i].map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
            out.write_all(rgb.as_slice())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_mesh_header_and_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/mesh.ply");
        let mut mesh = TriangleMesh::new(
            vec![Vector3::zeros(), Vector3::x(), Vector3::y()],
            vec![[0, 1, 2]],
        );
        mesh.compute_vertex_normals();

        write_triangle_mesh(&path, &mesh).unwrap();
        let header = read_ply_header(&path).unwrap();

        assert_eq!(header.format, "binary_little_endian");
        let vertex = header.element("vertex").unwrap();
        assert_eq!(vertex.count, 3);
        assert_eq!(vertex.properties, vec!["x", "y", "z", "nx", "ny", "nz"]);
        assert_eq!(header.element("face").unwrap().count, 1);

        let bytes = std::fs::read(&path).unwrap();
        let body_len = 3 * 6 * 4 + (1 + 3 * 4);
        assert!(bytes.ends_with(&[2, 0, 0, 0]));
        assert!(bytes.len() > body_len);
    }

    #[test]
    fn test_empty_point_cloud_still_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cloud.ply");

        write_point_cloud(&path, &PointCloud::default()).unwrap();
        let header = read_ply_header(&path).unwrap();

        assert_eq!(header.element("vertex").unwrap().count, 0);
        assert!(header.element("face").is_none());
    }

    #[test]
    fn test_colored_cloud_properties() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cloud.ply");
        let cloud = PointCloud {
            points: vec![Vector3::zeros()],
            colors: vec![Vector3::new(1.0, 0.5, 0.0)],
            normals: Vec::new(),
        };

        write_point_cloud(&path, &cloud).unwrap();
        let header = read_ply_header(&path).unwrap();
        let bytes = std::fs::read(&path).unwrap();

        assert_eq!(
            header.element("vertex").unwrap().properties,
            vec!["x", "y", "z", "red", "green", "blue"]
        );
        assert!(bytes.ends_with(&[255, 128, 0]));
    }
}
