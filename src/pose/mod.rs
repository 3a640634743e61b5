//! Camera pose lookup.
//!
//! The transform source is external; [`TransformProvider`] is the seam and
//! [`TransformBuffer`] the in-process implementation used by replay and tests.

pub mod provider;
pub mod resolver;

pub use provider::{TransformBuffer, TransformProvider};
pub use resolver::{DEFAULT_POSE_TIMEOUT, PoseResolver};
