//! Control requests and responses.
//!
//! One explicit struct per operation; the transport layer maps its own
//! encoding onto these.

use std::path::PathBuf;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

pub use crate::mesh::NormalFilter;

/// Volume parameters handed to the reconstruction engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TsdfParams {
    /// Voxel edge length (metres).
    pub voxel_length: f64,
    /// Truncation distance of the signed distance field (metres).
    pub sdf_trunc: f64,
}

/// How depth/color pairs are turned into RGBD images.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RgbdParams {
    /// Raw depth units per metre (1000 for millimetre depth).
    pub depth_scale: f64,
    /// Depth beyond this many metres is discarded.
    pub depth_trunc: f64,
    #[serde(default)]
    pub convert_to_intensity: bool,
}

impl Default for RgbdParams {
    fn default() -> Self {
        Self {
            depth_scale: 1000.0,
            depth_trunc: 3.0,
            convert_to_intensity: false,
        }
    }
}

/// Crop box bounds as requested. Equal bounds mean "no crop".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropBounds {
    pub min: Vector3<f64>,
    pub max: Vector3<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    /// Frame whose pose is tracked (the camera optical frame).
    pub tracking_frame: String,
    /// Frame the reconstruction is expressed in.
    pub reference_frame: String,
    pub tsdf_params: TsdfParams,
    #[serde(default)]
    pub rgbd_params: RgbdParams,
    #[serde(default)]
    pub crop_box: Option<CropBounds>,
    /// Metres of motion that make a frame a keyframe.
    pub translation_threshold: f64,
    /// Orientation distance that makes a frame a keyframe.
    pub rotation_threshold: f64,
    /// Integrate frames as they are admitted instead of at Stop.
    #[serde(default)]
    pub live: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopRequest {
    pub mesh_filepath: PathBuf,
    #[serde(default)]
    pub normal_filters: Vec<NormalFilter>,
    #[serde(default)]
    pub min_num_faces: usize,
    #[serde(default)]
    pub archive_directory: Option<PathBuf>,
}

/// Outcome of any control operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    pub message: String,
}

impl ControlResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
