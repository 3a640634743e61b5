//! Voxel occupancy engine.
//!
//! Back-projects every valid depth pixel into the reference frame and marks
//! the voxel it lands in, accumulating color. The surface is the set of voxel
//! faces that border free space, so extraction yields a closed, blocky mesh.
//! This stands in for a TSDF engine where none is linked in.

use std::collections::HashMap;

use nalgebra::{Matrix4, Vector3, Vector4};

use crate::error::EngineError;
use crate::mesh::{PointCloud, TriangleMesh};
use crate::sensor::CameraIntrinsics;
use crate::system::messages::TsdfParams;

use super::ReconstructionEngine;
use super::rgbd::RgbdImage;

type VoxelKey = [i32; 3];

#[derive(Debug, Clone, Copy, Default)]
struct Voxel {
    color_sum: Vector3<f64>,
    hits: u32,
}

impl Voxel {
    fn color(&self) -> Vector3<f64> {
        self.color_sum / self.hits.max(1) as f64
    }
}

/// Face directions with their four corners, counter-clockwise seen from
/// outside the voxel.
const FACES: [([i32; 3], [[i32; 3]; 4]); 6] = [
    ([1, 0, 0], [[1, 0, 0], [1, 1, 0], [1, 1, 1], [1, 0, 1]]),
    ([-1, 0, 0], [[0, 0, 0], [0, 0, 1], [0, 1, 1], [0, 1, 0]]),
    ([0, 1, 0], [[0, 1, 0], [0, 1, 1], [1, 1, 1], [1, 1, 0]]),
    ([0, -1, 0], [[0, 0, 0], [1, 0, 0], [1, 0, 1], [0, 0, 1]]),
    ([0, 0, 1], [[0, 0, 1], [1, 0, 1], [1, 1, 1], [0, 1, 1]]),
    ([0, 0, -1], [[0, 0, 0], [0, 1, 0], [1, 1, 0], [1, 0, 0]]),
];

pub struct OccupancyEngine {
    voxel_length: Option<f64>,
    /// Sample every n-th pixel in both directions.
    pixel_stride: u32,
    /// Voxels hit fewer times than this are treated as noise.
    min_hits: u32,
    voxels: HashMap<VoxelKey, Voxel>,
    integrated_frames: usize,
}

impl OccupancyEngine {
    pub fn new() -> Self {
        Self {
            voxel_length: None,
            pixel_stride: 1,
            min_hits: 1,
            voxels: HashMap::new(),
            integrated_frames: 0,
        }
    }

    pub fn with_pixel_stride(mut self, stride: u32) -> Self {
        self.pixel_stride = stride.max(1);
        self
    }

    pub fn with_min_hits(mut self, min_hits: u32) -> Self {
        self.min_hits = min_hits.max(1);
        self
    }

    pub fn integrated_frames(&self) -> usize {
        self.integrated_frames
    }

    fn occupied(&self) -> impl Iterator<Item = (&VoxelKey, &Voxel)> {
        self.voxels.iter().filter(|(_, v)| v.hits >= self.min_hits)
    }

    fn is_occupied(&self, key: &VoxelKey) -> bool {
        self.voxels
            .get(key)
            .is_some_and(|v| v.hits >= self.min_hits)
    }
}

impl Default for OccupancyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconstructionEngine for OccupancyEngine {
    fn reset(&mut self, params: &TsdfParams) {
        self.voxel_length = Some(params.voxel_length);
        self.voxels.clear();
        self.integrated_frames = 0;
    }

    fn integrate(
        &mut self,
        rgbd: &RgbdImage,
        intrinsics: &CameraIntrinsics,
        extrinsic: &Matrix4<f64>,
    ) -> Result<(), EngineError> {
        let voxel_length = self.voxel_length.ok_or(EngineError::NotInitialized)?;
        if intrinsics.fx == 0.0 || intrinsics.fy == 0.0 {
            return Err(EngineError::Other("focal length is zero".to_string()));
        }
        let cam_to_ref = extrinsic.try_inverse().ok_or_else(|| {
            EngineError::InvalidExtrinsic("matrix is not invertible".to_string())
        })?;

        let (w, h) = rgbd.dimensions();
        for v in (0..h).step_by(self.pixel_stride as usize) {
            for u in (0..w).step_by(self.pixel_stride as usize) {
                let z = rgbd.depth.get_pixel(u, v)[0] as f64;
                if z <= 0.0 || !z.is_finite() {
                    continue;
                }
                let p_cam = Vector4::new(
                    (u as f64 - intrinsics.cx) * z / intrinsics.fx,
                    (v as f64 - intrinsics.cy) * z / intrinsics.fy,
                    z,
                    1.0,
                );
                let p = cam_to_ref * p_cam;
                let key = [
                    (p.x / voxel_length).floor() as i32,
                    (p.y / voxel_length).floor() as i32,
                    (p.z / voxel_length).floor() as i32,
                ];
                let [r, g, b] = rgbd.color.get_pixel(u, v).0;
                let voxel = self.voxels.entry(key).or_default();
                voxel.color_sum += Vector3::new(r as f64, g as f64, b as f64);
                voxel.hits += 1;
            }
        }

        self.integrated_frames += 1;
        Ok(())
    }

    fn extract_triangle_mesh(&self) -> Result<TriangleMesh, EngineError> {
        let voxel_length = self.voxel_length.ok_or(EngineError::NotInitialized)?;

        // Sorted for deterministic vertex order
        let mut keys: Vec<(&VoxelKey, &Voxel)> = self.occupied().collect();
        keys.sort_unstable_by_key(|(k, _)| **k);

        let mut mesh = TriangleMesh::default();
        let mut corner_index: HashMap<VoxelKey, usize> = HashMap::new();
        for (key, voxel) in keys {
            for (dir, corners) in FACES.iter() {
                let neighbor = [key[0] + dir[0], key[1] + dir[1], key[2] + dir[2]];
                if self.is_occupied(&neighbor) {
                    continue;
                }
                let idx = corners.map(|c| {
                    let corner = [key[0] + c[0], key[1] + c[1], key[2] + c[2]];
                    *corner_index.entry(corner).or_insert_with(|| {
                        mesh.vertices.push(Vector3::new(
                            corner[0] as f64 * voxel_length,
                            corner[1] as f64 * voxel_length,
                            corner[2] as f64 * voxel_length,
                        ));
                        mesh.vertex_colors.push(voxel.color());
                        mesh.vertices.len() - 1
                    })
                });
                mesh.triangles.push([idx[0], idx[1], idx[2]]);
                mesh.triangles.push([idx[0], idx[2], idx[3]]);
            }
        }
        Ok(mesh)
    }

    fn extract_point_cloud(&self) -> Result<PointCloud, EngineError> {
        let voxel_length = self.voxel_length.ok_or(EngineError::NotInitialized)?;

        let mut keys: Vec<(&VoxelKey, &Voxel)> = self.occupied().collect();
        keys.sort_unstable_by_key(|(k, _)| **k);

        let mut cloud = PointCloud::default();
        for (key, voxel) in keys {
            cloud.points.push(Vector3::new(
                (key[0] as f64 + 0.5) * voxel_length,
                (key[1] as f64 + 0.5) * voxel_length,
                (key[2] as f64 + 0.5) * voxel_length,
            ));
            cloud.colors.push(voxel.color());
        }
        Ok(cloud)
    }
}
