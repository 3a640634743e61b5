//! State shared between the producer, consumer and control contexts.
//!
//! Everything a frame passes through after pose resolution sits behind one
//! lock, so the producer and consumer never observe a half-installed
//! session. Two condition variables hang off that lock: `not_full` wakes
//! blocked producers, `drained` wakes a Stop waiting on the drain barrier.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::capture::{CaptureQueue, KeyframeGate, OverflowPolicy, RotationMetric, Session};
use crate::pose::PoseResolver;
use crate::sensor::{CameraIntrinsics, Keyframe, PosedFrame};

/// Data guarded by [`SharedState::capture`].
pub struct CaptureState {
    /// Current or last session; `None` before the first Start.
    pub session: Option<Session>,
    /// Id handed to the next session.
    pub next_session_id: u64,
    /// Posed frames waiting for the consumer.
    pub queue: CaptureQueue<PosedFrame>,
    /// Admitted frames awaiting integration at Stop (deferred mode only).
    pub deferred: VecDeque<Keyframe>,
    /// Integrated frames kept for archiving.
    pub keyframes: Vec<Keyframe>,
    pub gate: KeyframeGate,
    /// Bound to the session's frames at Start.
    pub resolver: Option<PoseResolver>,
    /// Latched from the camera info channel.
    pub intrinsics: Option<CameraIntrinsics>,
    /// The consumer is integrating a frame outside the lock.
    pub integrating: bool,
}

impl CaptureState {
    fn new(capacity: usize, policy: OverflowPolicy, metric: RotationMetric) -> Self {
        Self {
            session: None,
            next_session_id: 1,
            queue: CaptureQueue::new(capacity, policy),
            deferred: VecDeque::new(),
            keyframes: Vec::new(),
            gate: KeyframeGate::new(0.0, 0.0, metric),
            resolver: None,
            intrinsics: None,
            integrating: false,
        }
    }

    /// Drain barrier: nothing queued and nothing in flight.
    pub fn is_drained(&self) -> bool {
        self.queue.is_empty() && !self.integrating
    }

    /// Drop every buffered frame.
    pub fn clear_buffers(&mut self) {
        self.queue.clear();
        self.deferred.clear();
        self.keyframes.clear();
        self.integrating = false;
    }
}

pub struct SharedState {
    pub capture: Mutex<CaptureState>,

    /// Signalled when the consumer pops, or when producers should re-check
    /// the session (Stop, shutdown).
    pub not_full: Condvar,

    /// Signalled when the consumer finishes a tick that touched the queue.
    pub drained: Condvar,

    /// Set once; blocked producers and a waiting Stop give up.
    pub shutdown_requested: AtomicBool,
}

impl SharedState {
    pub fn new(capacity: usize, policy: OverflowPolicy, metric: RotationMetric) -> Self {
        Self {
            capture: Mutex::new(CaptureState::new(capacity, policy, metric)),
            not_full: Condvar::new(),
            drained: Condvar::new(),
            shutdown_requested: AtomicBool::new(false),
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.not_full.notify_all();
        self.drained.notify_all();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }
}
