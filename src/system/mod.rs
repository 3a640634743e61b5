//! Controller orchestration and thread management.
//!
//! [`ReconstructionController`] owns the shared state and exposes the
//! producer, consumer and control entry points. [`IntegrationWorker`] drives
//! the consumer at a fixed rate on its own thread.

pub mod controller;
pub mod messages;
pub mod shared_state;
pub mod worker;

pub use controller::{FrameOutcome, ReconstructionController, TickOutcome};
pub use messages::{
    ControlResponse, CropBounds, NormalFilter, RgbdParams, StartRequest, StopRequest, TsdfParams,
};
pub use shared_state::SharedState;
pub use worker::IntegrationWorker;
