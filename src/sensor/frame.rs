//! Frame types flowing through the capture pipeline.
//!
//! Ownership moves stage to stage: synchronizer -> producer -> capture queue
//! -> consumer -> (deferred buffer) -> keyframe log. Nothing is shared.

use nalgebra::{Matrix3, Matrix4};
use serde::{Deserialize, Serialize};

use crate::geometry::SE3;

use super::image::{ColorImage, DepthImage};

/// A synchronized depth/color pair.
#[derive(Debug, Clone)]
pub struct Frame {
    pub depth: DepthImage,
    pub color: ColorImage,
    /// Capture timestamp in nanoseconds (taken from the color image).
    pub stamp_ns: u64,
}

/// A frame with its camera pose in the reference frame (`T_ref_cam`).
#[derive(Debug, Clone)]
pub struct PosedFrame {
    pub frame: Frame,
    pub pose: SE3,
}

/// A posed frame admitted by the keyframe gate.
#[derive(Debug, Clone)]
pub struct Keyframe {
    pub depth: DepthImage,
    pub color: ColorImage,
    /// Homogeneous camera-to-reference transform.
    pub pose: Matrix4<f64>,
    pub stamp_ns: u64,
}

impl Keyframe {
    pub fn from_posed(posed: PosedFrame) -> Self {
        Self {
            pose: posed.pose.to_matrix(),
            stamp_ns: posed.frame.stamp_ns,
            depth: posed.frame.depth,
            color: posed.frame.color,
        }
    }
}

/// Pinhole camera intrinsics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    pub width: u32,
    pub height: u32,
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Build from a row-major 3x3 K matrix as carried by camera info messages.
    pub fn from_k(width: u32, height: u32, k: &[f64; 9]) -> Self {
        Self {
            width,
            height,
            fx: k[0],
            fy: k[4],
            cx: k[2],
            cy: k[5],
        }
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    /// Serializable form with a column-major intrinsic matrix.
    pub fn to_json(&self) -> IntrinsicsJson {
        IntrinsicsJson {
            width: self.width,
            height: self.height,
            intrinsic_matrix: self.matrix().as_slice().to_vec(),
        }
    }

    pub fn from_json(json: &IntrinsicsJson) -> Option<Self> {
        if json.intrinsic_matrix.len() != 9 {
            return None;
        }
        let k = Matrix3::from_column_slice(&json.intrinsic_matrix);
        Some(Self {
            width: json.width,
            height: json.height,
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
        })
    }
}

/// On-disk layout of `camera_intrinsic.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrinsicsJson {
    pub width: u32,
    pub height: u32,
    pub intrinsic_matrix: Vec<f64>,
}
