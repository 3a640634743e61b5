//! Frame admission: keyframe gating, the capture queue and session state.

pub mod keyframe_gate;
pub mod queue;
pub mod session;

pub use keyframe_gate::{Displacement, KeyframeGate, RotationMetric};
pub use queue::{CaptureQueue, OverflowPolicy, PushOutcome};
pub use session::{Session, SessionCounters, SessionParams, SessionState};
