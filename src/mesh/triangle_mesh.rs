//! Indexed triangle mesh with the editing operations the post-processor needs.

use std::collections::HashMap;

use nalgebra::Vector3;

use crate::geometry::Aabb;

/// Indexed triangle mesh.
///
/// `vertex_normals` / `vertex_colors` are either empty or parallel to
/// `vertices`; `triangle_normals` is either empty or parallel to `triangles`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangleMesh {
    pub vertices: Vec<Vector3<f64>>,
    pub vertex_normals: Vec<Vector3<f64>>,
    /// RGB in [0, 1].
    pub vertex_colors: Vec<Vector3<f64>>,
    pub triangles: Vec<[usize; 3]>,
    pub triangle_normals: Vec<Vector3<f64>>,
}

/// Result of [`TriangleMesh::cluster_connected_triangles`].
#[derive(Debug, Clone, PartialEq)]
pub struct TriangleClusters {
    /// Cluster index of each triangle.
    pub triangle_cluster: Vec<usize>,
    /// Number of triangles in each cluster.
    pub cluster_size: Vec<usize>,
    /// Surface area of each cluster.
    pub cluster_area: Vec<f64>,
}

impl TriangleMesh {
    pub fn new(vertices: Vec<Vector3<f64>>, triangles: Vec<[usize; 3]>) -> Self {
        Self {
            vertices,
            triangles,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn has_vertex_normals(&self) -> bool {
        !self.vertices.is_empty() && self.vertex_normals.len() == self.vertices.len()
    }

    pub fn has_vertex_colors(&self) -> bool {
        !self.vertices.is_empty() && self.vertex_colors.len() == self.vertices.len()
    }

    /// Unit normal of every triangle (zero for degenerate triangles).
    pub fn compute_triangle_normals(&mut self) {
        self.triangle_normals = self
            .triangles
            .iter()
            .map(|t| {
                let n = (self.vertices[t[1]] - self.vertices[t[0]])
                    .cross(&(self.vertices[t[2]] - self.vertices[t[0]]));
                n.try_normalize(f64::EPSILON).unwrap_or_else(Vector3::zeros)
            })
            .collect();
    }

    /// Vertex normals as the normalized sum of adjacent triangle normals.
    /// Also refreshes `triangle_normals`.
    pub fn compute_vertex_normals(&mut self) {
        self.compute_triangle_normals();
        let mut normals = vec![Vector3::zeros(); self.vertices.len()];
        for (t, n) in self.triangles.iter().zip(&self.triangle_normals) {
            for &v in t {
                normals[v] += n;
            }
        }
        for n in &mut normals {
            *n = n.try_normalize(f64::EPSILON).unwrap_or_else(Vector3::zeros);
        }
        self.vertex_normals = normals;
    }

    pub fn triangle_area(&self, idx: usize) -> f64 {
        let t = self.triangles[idx];
        0.5 * (self.vertices[t[1]] - self.vertices[t[0]])
            .cross(&(self.vertices[t[2]] - self.vertices[t[0]]))
            .norm()
    }

    /// Keep the vertices inside `bx` and the triangles whose three vertices
    /// are all inside.
    pub fn crop(&self, bx: &Aabb) -> TriangleMesh {
        let keep: Vec<bool> = self.vertices.iter().map(|v| bx.contains(v)).collect();
        let mut cropped = self.clone();
        let mask: Vec<bool> = self
            .triangles
            .iter()
            .map(|t| !t.iter().all(|&v| keep[v]))
            .collect();
        cropped.remove_triangles_by_mask(&mask);
        cropped.remove_vertices_where(|i| !keep[i]);
        cropped
    }

    /// Remove every triangle whose mask entry is `true`.
    pub fn remove_triangles_by_mask(&mut self, mask: &[bool]) {
        debug_assert_eq!(mask.len(), self.triangles.len());
        let has_normals = self.triangle_normals.len() == self.triangles.len();
        let mut i = 0;
        self.triangles.retain(|_| {
            let keep = !mask.get(i).copied().unwrap_or(false);
            i += 1;
            keep
        });
        if has_normals {
            let mut i = 0;
            self.triangle_normals.retain(|_| {
                let keep = !mask.get(i).copied().unwrap_or(false);
                i += 1;
                keep
            });
        } else {
            self.triangle_normals.clear();
        }
    }

    /// Drop vertices not referenced by any triangle and reindex.
    pub fn remove_unreferenced_vertices(&mut self) {
        let mut referenced = vec![false; self.vertices.len()];
        for t in &self.triangles {
            for &v in t {
                referenced[v] = true;
            }
        }
        self.remove_vertices_where(|i| !referenced[i]);
    }

    /// Remove vertices matching `remove`, along with any triangle that uses
    /// one of them, and reindex the remaining triangles.
    fn remove_vertices_where(&mut self, remove: impl Fn(usize) -> bool) {
        let mut remap = vec![usize::MAX; self.vertices.len()];
        let mut next = 0;
        for (i, slot) in remap.iter_mut().enumerate() {
            if !remove(i) {
                *slot = next;
                next += 1;
            }
        }
        if next == self.vertices.len() {
            return;
        }

        let mask: Vec<bool> = self
            .triangles
            .iter()
            .map(|t| t.iter().any(|&v| remap[v] == usize::MAX))
            .collect();
        self.remove_triangles_by_mask(&mask);
        for t in &mut self.triangles {
            for v in t.iter_mut() {
                *v = remap[*v];
            }
        }

        let compact = |values: &mut Vec<Vector3<f64>>| {
            if values.len() == remap.len() {
                let mut i = 0;
                values.retain(|_| {
                    let keep = remap[i] != usize::MAX;
                    i += 1;
                    keep
                });
            } else {
                values.clear();
            }
        };
        compact(&mut self.vertices);
        compact(&mut self.vertex_normals);
        compact(&mut self.vertex_colors);
    }

    /// Group triangles that are connected through shared edges.
    ///
    /// Clusters are numbered in order of their lowest triangle index.
    pub fn cluster_connected_triangles(&self) -> TriangleClusters {
        let n = self.triangles.len();
        let mut parent: Vec<usize> = (0..n).collect();

        fn find(parent: &mut [usize], mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }

        let mut edge_owner: HashMap<(usize, usize), usize> = HashMap::new();
        for (ti, t) in self.triangles.iter().enumerate() {
            for (a, b) in [(t[0], t[1]), (t[1], t[2]), (t[2], t[0])] {
                let key = (a.min(b), a.max(b));
                match edge_owner.get(&key) {
                    Some(&other) => {
                        let ra = find(&mut parent, ti);
                        let rb = find(&mut parent, other);
                        if ra != rb {
                            parent[ra.max(rb)] = ra.min(rb);
                        }
                    }
                    None => {
                        edge_owner.insert(key, ti);
                    }
                }
            }
        }

        let mut cluster_of_root: HashMap<usize, usize> = HashMap::new();
        let mut triangle_cluster = Vec::with_capacity(n);
        let mut cluster_size = Vec::new();
        let mut cluster_area = Vec::new();
        for ti in 0..n {
            let root = find(&mut parent, ti);
            let next_id = cluster_of_root.len();
            let cluster = *cluster_of_root.entry(root).or_insert(next_id);
            if cluster == cluster_size.len() {
                cluster_size.push(0);
                cluster_area.push(0.0);
            }
            cluster_size[cluster] += 1;
            cluster_area[cluster] += self.triangle_area(ti);
            triangle_cluster.push(cluster);
        }

        TriangleClusters {
            triangle_cluster,
            cluster_size,
            cluster_area,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_meshes {
    use super::*;

    /// Flat strip of `n` triangles in the z = `z` plane starting at `x0`.
    /// Consecutive triangles share an edge, so the strip is one cluster.
    pub fn strip(n: usize, x0: f64, z: f64) -> TriangleMesh {
        let cols = n / 2 + 2;
        let mut vertices = Vec::new();
        for i in 0..cols {
            vertices.push(Vector3::new(x0 + i as f64, 0.0, z));
            vertices.push(Vector3::new(x0 + i as f64, 1.0, z));
        }
        let mut triangles = Vec::new();
        for k in 0..n {
            let i = k / 2;
            let (b0, t0, b1, t1) = (2 * i, 2 * i + 1, 2 * i + 2, 2 * i + 3);
            if k % 2 == 0 {
                triangles.push([b0, b1, t0]);
            } else {
                triangles.push([t0, b1, t1]);
            }
        }
        let mut mesh = TriangleMesh::new(vertices, triangles);
        mesh.remove_unreferenced_vertices();
        mesh
    }

    /// Concatenate meshes.
    pub fn merge(parts: &[TriangleMesh]) -> TriangleMesh {
        let mut out = TriangleMesh::default();
        for part in parts {
            let offset = out.vertices.len();
            out.vertices.extend(part.vertices.iter().copied());
            out.triangles.extend(
                part.triangles
                    .iter()
                    .map(|t| [t[0] + offset, t[1] + offset, t[2] + offset]),
            );
        }
        out
    }
}
