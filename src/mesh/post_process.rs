//! Mesh Post-Processor, run once when a session stops.
//!
//! 1. Compute vertex normals on the extracted mesh.
//! 2. Crop to the session crop box, if any.
//! 3. Apply normal filters in request order (removal only).
//! 4. Remove connected clusters smaller than `min_num_faces`, then drop
//!    unreferenced vertices.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::geometry::Aabb;

use super::triangle_mesh::TriangleMesh;

/// Keep triangles whose normal lies within `angle_deg` of `direction`.
///
/// The test is `dot(normal, direction) >= cos(angle)`; `direction` is used
/// as given, so it should be a unit vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalFilter {
    pub direction: Vector3<f64>,
    /// Half-angle of the accepted cone, in degrees.
    pub angle_deg: f64,
}

/// Triangle counts at each stage of [`post_process`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostProcessReport {
    pub extracted_triangles: usize,
    pub after_crop: usize,
    pub removed_by_normals: usize,
    pub removed_by_clusters: usize,
    pub final_triangles: usize,
    pub final_vertices: usize,
}

/// Remove triangles facing away from the filter cone. Returns how many
/// triangles were removed.
pub fn filter_normals(mesh: &mut TriangleMesh, filter: &NormalFilter) -> usize {
    mesh.compute_vertex_normals();
    let min_dot = filter.angle_deg.to_radians().cos();
    let mask: Vec<bool> = mesh
        .triangle_normals
        .iter()
        .map(|n| n.dot(&filter.direction) < min_dot)
        .collect();
    let removed = mask.iter().filter(|&&m| m).count();
    mesh.remove_triangles_by_mask(&mask);
    removed
}

/// Remove every triangle in a connected cluster with fewer than
/// `min_num_faces` triangles, then drop unreferenced vertices.
pub fn filter_small_clusters(mesh: &mut TriangleMesh, min_num_faces: usize) -> usize {
    let clusters = mesh.cluster_connected_triangles();
    let mask: Vec<bool> = clusters
        .triangle_cluster
        .iter()
        .map(|&c| clusters.cluster_size[c] < min_num_faces)
        .collect();
    let removed = mask.iter().filter(|&&m| m).count();
    mesh.remove_triangles_by_mask(&mask);
    mesh.remove_unreferenced_vertices();
    removed
}

/// Run the full pipeline on an extracted mesh.
pub fn post_process(
    mut mesh: TriangleMesh,
    crop_box: Option<&Aabb>,
    normal_filters: &[NormalFilter],
    min_num_faces: usize,
) -> (TriangleMesh, PostProcessReport) {
    let mut report = PostProcessReport {
        extracted_triangles: mesh.triangles.len(),
        ..Default::default()
    };

    mesh.compute_vertex_normals();
    let mut mesh = match crop_box {
        Some(bx) => mesh.crop(bx),
        None => mesh,
    };
    report.after_crop = mesh.triangles.len();

    for filter in normal_filters {
        let removed = filter_normals(&mut mesh, filter);
        debug!(?filter.direction, filter.angle_deg, removed, "Applied normal filter");
        report.removed_by_normals += removed;
    }

    report.removed_by_clusters = filter_small_clusters(&mut mesh, min_num_faces);
    report.final_triangles = mesh.triangles.len();
    report.final_vertices = mesh.vertices.len();
    (mesh, report)
}
