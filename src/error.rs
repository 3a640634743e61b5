//! Error taxonomy for the capture and integration pipeline.
//!
//! Per-frame errors ([`FrameError`]) are recovered by dropping the frame.
//! Control errors ([`ControlError`]) surface as a failed
//! [`ControlResponse`](crate::system::ControlResponse); neither is fatal.

use std::time::Duration;

/// Errors raised by a reconstruction engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Engine has not been reset with volume parameters yet
    #[error("Reconstruction volume not initialized")]
    NotInitialized,

    /// Input images do not agree in size
    #[error("Depth image is {depth:?} but color image is {color:?}")]
    SizeMismatch {
        depth: (u32, u32),
        color: (u32, u32),
    },

    /// Extrinsic matrix could not be used
    #[error("Invalid extrinsic: {0}")]
    InvalidExtrinsic(String),

    /// Generic engine failure
    #[error("{0}")]
    Other(String),
}

/// Transient, per-frame failures. The frame is dropped and the session continues.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Image payload could not be decoded
    #[error("Image decode failed: {0}")]
    Decode(String),

    /// Transform lookup timed out or the frames are not connected
    #[error("Pose unavailable for {source_frame} -> {target_frame} at {stamp_ns} ns (waited {waited:?})")]
    PoseUnavailable {
        target_frame: String,
        source_frame: String,
        stamp_ns: u64,
        waited: Duration,
    },

    /// No camera intrinsics have been received yet
    #[error("Camera intrinsics not received yet")]
    MissingIntrinsics,

    /// Engine rejected the frame
    #[error("Integration failed: {0}")]
    Integration(#[from] EngineError),
}

/// Misuse of a control operation, or a failure while exporting.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Start reconstruction hasn't been called yet")]
    NotStarted,

    #[error("Cannot pause reconstruction that was never started. Doing nothing")]
    NotRecording,

    #[error("Cannot resume reconstruction that was not initially paused. Doing nothing")]
    NotPaused,

    #[error("A reconstruction session is already {0}. Stop it before starting another")]
    SessionActive(&'static str),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Waiting for queued frames was cancelled by shutdown")]
    DrainCancelled,

    #[error("Export failed: {0:#}")]
    Export(#[from] anyhow::Error),
}
