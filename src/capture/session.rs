//! Reconstruction session: lifecycle state, parameters and counters.

use crate::error::ControlError;
use crate::geometry::Aabb;
use crate::system::messages::{RgbdParams, StartRequest, TsdfParams};

/// Lifecycle of a session.
///
/// `Idle -> Recording -> {Paused <-> Recording} -> Stopping -> Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session, or the last one finished exporting.
    #[default]
    Idle,
    /// Frames are accepted by the producer.
    Recording,
    /// New frames are ignored; queued frames keep draining.
    Paused,
    /// Stop in progress: draining, integrating and exporting.
    Stopping,
}

impl SessionState {
    /// Recording or Paused.
    pub fn is_open(&self) -> bool {
        matches!(self, SessionState::Recording | SessionState::Paused)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Recording => "recording",
            SessionState::Paused => "paused",
            SessionState::Stopping => "stopping",
        }
    }
}

/// Parameters fixed at Start. Installed atomically with the session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionParams {
    pub tracking_frame: String,
    pub reference_frame: String,
    pub tsdf: TsdfParams,
    pub rgbd: RgbdParams,
    pub crop_box: Option<Aabb>,
    pub translation_threshold: f64,
    pub rotation_threshold: f64,
    pub live: bool,
}

impl SessionParams {
    pub fn from_request(req: &StartRequest) -> Result<Self, ControlError> {
        if req.tracking_frame.is_empty() || req.reference_frame.is_empty() {
            return Err(ControlError::InvalidRequest(
                "tracking_frame and reference_frame must be set".to_string(),
            ));
        }
        if !(req.tsdf_params.voxel_length > 0.0) || !(req.tsdf_params.sdf_trunc > 0.0) {
            return Err(ControlError::InvalidRequest(format!(
                "voxel_length and sdf_trunc must be positive, got {} and {}",
                req.tsdf_params.voxel_length, req.tsdf_params.sdf_trunc
            )));
        }
        if !(req.rgbd_params.depth_scale > 0.0) {
            return Err(ControlError::InvalidRequest(format!(
                "depth_scale must be positive, got {}",
                req.rgbd_params.depth_scale
            )));
        }
        if req.translation_threshold < 0.0 || req.rotation_threshold < 0.0 {
            return Err(ControlError::InvalidRequest(
                "keyframe thresholds must be non-negative".to_string(),
            ));
        }

        Ok(Self {
            tracking_frame: req.tracking_frame.clone(),
            reference_frame: req.reference_frame.clone(),
            tsdf: req.tsdf_params,
            rgbd: req.rgbd_params,
            crop_box: req
                .crop_box
                .and_then(|b| Aabb::from_bounds(b.min, b.max)),
            translation_threshold: req.translation_threshold,
            rotation_threshold: req.rotation_threshold,
            live: req.live,
        })
    }
}

/// Per-session frame accounting.
///
/// `frames_admitted <= frames_seen` and
/// `frames_integrated + frames_dropped <= frames_admitted`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounters {
    /// Posed frames enqueued by the producer.
    pub frames_seen: u64,
    /// Frames accepted by the keyframe gate.
    pub frames_admitted: u64,
    /// Admitted frames integrated into the engine.
    pub frames_integrated: u64,
    /// Admitted frames the engine failed to integrate.
    pub frames_dropped: u64,
}

/// One reconstruction session. Replaced wholesale on each Start.
#[derive(Debug, Clone)]
pub struct Session {
    /// Monotonic session number, used to reject frames from a closed session.
    pub id: u64,
    pub state: SessionState,
    pub params: SessionParams,
    pub counters: SessionCounters,
}

impl Session {
    pub fn new(id: u64, params: SessionParams) -> Self {
        Self {
            id,
            state: SessionState::Recording,
            params,
            counters: SessionCounters::default(),
        }
    }
}
