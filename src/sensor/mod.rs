//! Sensor-side types: decoded images, synchronized frames, intrinsics.

pub mod frame;
pub mod image;
pub mod synchronizer;

pub use frame::{CameraIntrinsics, Frame, IntrinsicsJson, Keyframe, PosedFrame};
pub use image::{ColorImage, DepthImage, RawImage, decode_color, decode_depth};
pub use synchronizer::FrameSynchronizer;
