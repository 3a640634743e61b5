//! Reconstruction engine seam.
//!
//! Volumetric fusion and meshing live behind [`ReconstructionEngine`]. The
//! controller only decides which frames reach the engine and when.
//! [`OccupancyEngine`] is a small in-process implementation used by the
//! replay binary and the tests.

pub mod occupancy;
pub mod rgbd;

use nalgebra::Matrix4;

use crate::error::EngineError;
use crate::mesh::{PointCloud, TriangleMesh};
use crate::sensor::CameraIntrinsics;
use crate::system::messages::TsdfParams;

pub use occupancy::OccupancyEngine;
pub use rgbd::RgbdImage;

pub trait ReconstructionEngine: Send {
    /// Discard the current volume and start a new one.
    fn reset(&mut self, params: &TsdfParams);

    /// Fuse one RGBD image. `extrinsic` maps reference-frame points into the
    /// camera frame (`T_cam_ref`).
    fn integrate(
        &mut self,
        rgbd: &RgbdImage,
        intrinsics: &CameraIntrinsics,
        extrinsic: &Matrix4<f64>,
    ) -> Result<(), EngineError>;

    fn extract_triangle_mesh(&self) -> Result<TriangleMesh, EngineError>;

    fn extract_point_cloud(&self) -> Result<PointCloud, EngineError>;
}
