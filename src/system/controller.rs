//! Frame admission and integration controller.
//!
//! Three contexts drive the controller concurrently:
//!
//! - **producer**: `on_depth` / `on_color` / `on_frame`, called from sensor
//!   callbacks. Synchronizes, resolves the pose (may block) and enqueues.
//! - **consumer**: `tick`, called at a fixed rate by
//!   [`IntegrationWorker`](super::IntegrationWorker). Pops one frame, gates
//!   it, then integrates it (live) or buffers it (deferred).
//! - **control**: `start` / `pause` / `resume` / `stop`, serialized among
//!   themselves by their own mutex.
//!
//! Lock order is control -> capture -> engine. The capture lock is never held
//! across a pose lookup or an engine call.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::capture::{
    KeyframeGate, PushOutcome, Session, SessionCounters, SessionParams, SessionState,
};
use crate::config::ControllerConfig;
use crate::engine::{ReconstructionEngine, RgbdImage};
use crate::error::{ControlError, FrameError};
use crate::geometry::SE3;
use crate::io::{write_archive, write_point_cloud, write_triangle_mesh};
use crate::mesh::post_process;
use crate::pose::{PoseResolver, TransformProvider};
use crate::publish::{BoxMarker, MeshMarker, PointCloudMsg, Publication, Publisher};
use crate::sensor::{
    CameraIntrinsics, ColorImage, DepthImage, Frame, FrameSynchronizer, Keyframe, PosedFrame,
    RawImage, decode_color, decode_depth,
};

use super::messages::{ControlResponse, RgbdParams, StartRequest, StopRequest};
use super::shared_state::{CaptureState, SharedState};

/// What the producer did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Image cached, waiting for its partner on the other channel.
    Unmatched,
    /// Posed frame appended to the capture queue.
    Queued,
    /// No session is recording; the frame was ignored.
    NotRecording,
    /// The session closed while the pose was being resolved.
    SessionClosed,
}

/// What one consumer tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No session, or the last one has finished.
    Idle,
    /// Not enough frames seen yet.
    WarmingUp,
    /// Nothing queued.
    Empty,
    /// Popped a frame the keyframe gate rejected.
    Rejected,
    /// Admitted frame appended to the deferred buffer.
    Deferred,
    /// Admitted frame integrated into the engine.
    Integrated,
    /// Admitted frame the engine failed to integrate.
    Failed,
}

pub struct ReconstructionController {
    config: ControllerConfig,
    shared: SharedState,
    engine: Mutex<Box<dyn ReconstructionEngine>>,
    provider: Arc<dyn TransformProvider>,
    synchronizer: Mutex<FrameSynchronizer>,
    publisher: Publisher,
    /// Serializes start/pause/resume/stop.
    control: Mutex<()>,
}

impl ReconstructionController {
    pub fn new(
        config: ControllerConfig,
        engine: Box<dyn ReconstructionEngine>,
        provider: Arc<dyn TransformProvider>,
        publisher: Publisher,
    ) -> Self {
        let shared = SharedState::new(
            config.queue_capacity,
            config.overflow_policy,
            config.rotation_metric,
        );
        let synchronizer = FrameSynchronizer::new(config.cache_count, config.slop_ns());
        Self {
            config,
            shared,
            engine: Mutex::new(engine),
            provider,
            synchronizer: Mutex::new(synchronizer),
            publisher,
            control: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Producer
    // ------------------------------------------------------------------

    pub fn on_depth(&self, stamp_ns: u64, image: DepthImage) -> Result<FrameOutcome, FrameError> {
        let matched = self.synchronizer.lock().push_depth(stamp_ns, image);
        match matched {
            Some(frame) => self.on_frame(frame),
            None => Ok(FrameOutcome::Unmatched),
        }
    }

    pub fn on_color(&self, stamp_ns: u64, image: ColorImage) -> Result<FrameOutcome, FrameError> {
        let matched = self.synchronizer.lock().push_color(stamp_ns, image);
        match matched {
            Some(frame) => self.on_frame(frame),
            None => Ok(FrameOutcome::Unmatched),
        }
    }

    pub fn on_raw_depth(&self, raw: &RawImage) -> Result<FrameOutcome, FrameError> {
        let image = decode_depth(raw).inspect_err(|e| warn!("Dropping depth image: {}", e))?;
        self.on_depth(raw.stamp_ns, image)
    }

    pub fn on_raw_color(&self, raw: &RawImage) -> Result<FrameOutcome, FrameError> {
        let image = decode_color(raw).inspect_err(|e| warn!("Dropping color image: {}", e))?;
        self.on_color(raw.stamp_ns, image)
    }

    /// Latch camera intrinsics. Later calls replace earlier ones.
    pub fn set_intrinsics(&self, intrinsics: CameraIntrinsics) {
        let mut state = self.shared.capture.lock();
        if state.intrinsics.is_none() {
            info!(
                width = intrinsics.width,
                height = intrinsics.height,
                "Received camera intrinsics"
            );
        }
        state.intrinsics = Some(intrinsics);
    }

    /// Resolve the pose of a synchronized frame and enqueue it.
    ///
    /// Frames are ignored unless the session is recording. A pose lookup
    /// failure drops the frame and is returned to the caller.
    pub fn on_frame(&self, frame: Frame) -> Result<FrameOutcome, FrameError> {
        // Step 1: snapshot what the lookup needs
        let (session_id, resolver) = {
            let state = self.shared.capture.lock();
            match (&state.session, &state.resolver) {
                (Some(session), Some(resolver)) if session.state == SessionState::Recording => {
                    (session.id, resolver.clone())
                }
                _ => return Ok(FrameOutcome::NotRecording),
            }
        };

        // Step 2: the lookup may block, so it runs unlocked
        let stamp_ns = frame.stamp_ns;
        let pose = resolver
            .resolve(stamp_ns)
            .inspect_err(|e| error!("Dropping frame at {} ns: {}", stamp_ns, e))?;
        let mut posed = PosedFrame { frame, pose };

        // Step 3: enqueue, unless the session closed meanwhile
        let mut state = self.shared.capture.lock();
        loop {
            if self.shared.is_shutdown_requested() || !session_accepts(&state, session_id) {
                debug!(stamp_ns, "Session closed during pose lookup, dropping frame");
                return Ok(FrameOutcome::SessionClosed);
            }
            match state.queue.push(posed) {
                PushOutcome::Queued => break,
                PushOutcome::Evicted(old) => {
                    warn!(
                        "Capture queue full, dropped oldest frame at {} ns",
                        old.frame.stamp_ns
                    );
                    break;
                }
                PushOutcome::Full(item) => {
                    posed = item;
                    self.shared
                        .not_full
                        .wait_for(&mut state, self.config.drain_poll_interval());
                }
            }
        }
        if let Some(session) = state.session.as_mut() {
            session.counters.frames_seen += 1;
        }
        Ok(FrameOutcome::Queued)
    }

    // ------------------------------------------------------------------
    // Consumer
    // ------------------------------------------------------------------

    /// Pop at most one frame and admit it.
    pub fn tick(&self) -> TickOutcome {
        let mut guard = self.shared.capture.lock();
        let state = &mut *guard;
        // A full queue ends warm-up early, otherwise blocked producers could
        // never raise frames_seen past it
        let queue_full = state.queue.is_full();
        let Some(session) = state.session.as_mut() else {
            return TickOutcome::Idle;
        };
        match session.state {
            SessionState::Idle => return TickOutcome::Idle,
            // Stopping drains regardless of warm-up
            SessionState::Recording | SessionState::Paused
                if !queue_full && session.counters.frames_seen <= self.config.warmup_frames =>
            {
                return TickOutcome::WarmingUp;
            }
            _ => {}
        }

        let Some(posed) = state.queue.pop() else {
            return TickOutcome::Empty;
        };
        self.shared.not_full.notify_one();

        if !state.gate.accept(&posed.pose) {
            debug!(stamp_ns = posed.frame.stamp_ns, "Keyframe gate rejected frame");
            drop(guard);
            self.shared.drained.notify_all();
            return TickOutcome::Rejected;
        }
        session.counters.frames_admitted += 1;
        let keyframe = Keyframe::from_posed(posed);

        if !session.params.live {
            state.deferred.push_back(keyframe);
            drop(guard);
            self.shared.drained.notify_all();
            return TickOutcome::Deferred;
        }

        let rgbd_params = session.params.rgbd;
        let recording = session.state == SessionState::Recording;
        let frame_id = session.params.reference_frame.clone();
        let intrinsics = state.intrinsics;
        state.integrating = true;
        drop(guard);

        let result = self.integrate_keyframe(&keyframe, intrinsics, &rgbd_params);

        let mut guard = self.shared.capture.lock();
        let state = &mut *guard;
        state.integrating = false;
        let integrated = state.session.as_mut().map_or(0, |session| {
            count_integration(&mut session.counters, &result);
            session.counters.frames_integrated
        });
        if self.config.retain_keyframes {
            state.keyframes.push(keyframe);
        }
        drop(guard);
        self.shared.drained.notify_all();

        match result {
            Ok(()) => {
                let period = self.config.diagnostic_period;
                if recording && period > 0 && integrated % period == 0 {
                    self.publish_diagnostic_cloud(&frame_id);
                }
                TickOutcome::Integrated
            }
            Err(e) => {
                error!("Failed to integrate frame: {}", e);
                TickOutcome::Failed
            }
        }
    }

    fn integrate_keyframe(
        &self,
        keyframe: &Keyframe,
        intrinsics: Option<CameraIntrinsics>,
        params: &RgbdParams,
    ) -> Result<(), FrameError> {
        let intrinsics = intrinsics.ok_or(FrameError::MissingIntrinsics)?;
        let rgbd = RgbdImage::from_color_and_depth(&keyframe.color, &keyframe.depth, params)?;
        // The engine wants T_cam_ref; admitted poses are T_ref_cam
        let extrinsic = SE3::from_matrix(keyframe.pose).inverse().to_matrix();
        self.engine.lock().integrate(&rgbd, &intrinsics, &extrinsic)?;
        Ok(())
    }

    fn publish_diagnostic_cloud(&self, frame_id: &str) {
        let cloud = self.engine.lock().extract_point_cloud();
        match cloud {
            Ok(cloud) => {
                debug!(points = cloud.len(), "Publishing diagnostic point cloud");
                self.publisher
                    .publish(Publication::PointCloud(PointCloudMsg::from_cloud(frame_id, &cloud)));
            }
            Err(e) => warn!("Diagnostic point cloud extraction failed: {}", e),
        }
    }

    // ------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------

    pub fn start(&self, req: &StartRequest) -> ControlResponse {
        let _control = self.control.lock();
        respond("Start", self.try_start(req))
    }

    pub fn pause(&self) -> ControlResponse {
        let _control = self.control.lock();
        respond("Pause", self.try_pause())
    }

    pub fn resume(&self) -> ControlResponse {
        let _control = self.control.lock();
        respond("Resume", self.try_resume())
    }

    /// Close the session, wait for the consumer to drain the queue, then
    /// integrate deferred frames and export.
    ///
    /// Blocks until the drain barrier holds, so a consumer must be ticking
    /// (or [`shutdown`](Self::shutdown) must be called) for this to return.
    pub fn stop(&self, req: &StopRequest) -> ControlResponse {
        let _control = self.control.lock();
        respond("Stop", self.try_stop(req))
    }

    fn try_start(&self, req: &StartRequest) -> Result<String, ControlError> {
        if let Some(session) = &self.shared.capture.lock().session {
            if session.state != SessionState::Idle {
                return Err(ControlError::SessionActive(session.state.as_str()));
            }
        }
        let params = SessionParams::from_request(req)?;

        self.engine.lock().reset(&params.tsdf);
        self.synchronizer.lock().clear();

        let crop_box = params.crop_box;
        let reference_frame = params.reference_frame.clone();
        let live = params.live;

        let mut state = self.shared.capture.lock();
        let id = state.next_session_id;
        state.next_session_id += 1;
        state.clear_buffers();
        state.gate = KeyframeGate::new(
            params.translation_threshold,
            params.rotation_threshold,
            self.config.rotation_metric,
        );
        state.resolver = Some(PoseResolver::new(
            Arc::clone(&self.provider),
            params.tracking_frame.clone(),
            params.reference_frame.clone(),
            self.config.pose_timeout(),
        ));
        state.session = Some(Session::new(id, params));
        drop(state);

        if let Some(bounds) = crop_box {
            self.publisher
                .publish(Publication::CropBox(BoxMarker::crop_box(&reference_frame, &bounds)));
        }

        Ok(format!(
            "Started reconstruction session {} ({} integration)",
            id,
            if live { "live" } else { "deferred" }
        ))
    }

    fn try_pause(&self) -> Result<String, ControlError> {
        let mut state = self.shared.capture.lock();
        let pending = state.queue.len();
        match state.session.as_mut() {
            Some(session) if session.state == SessionState::Recording => {
                session.state = SessionState::Paused;
                Ok(format!(
                    "Pausing reconstruction, {} queued frames will still be processed",
                    pending
                ))
            }
            _ => Err(ControlError::NotRecording),
        }
    }

    fn try_resume(&self) -> Result<String, ControlError> {
        let mut state = self.shared.capture.lock();
        match state.session.as_mut() {
            Some(session) if session.state == SessionState::Paused => {
                session.state = SessionState::Recording;
                Ok("Resuming reconstruction".to_string())
            }
            _ => Err(ControlError::NotPaused),
        }
    }

    fn try_stop(&self, req: &StopRequest) -> Result<String, ControlError> {
        // Step 1: producers stop enqueueing from here on
        {
            let mut state = self.shared.capture.lock();
            match state.session.as_mut() {
                Some(session) if session.state.is_open() => session.state = SessionState::Stopping,
                _ => return Err(ControlError::NotStarted),
            }
        }
        self.shared.not_full.notify_all();
        info!("Stopping reconstruction, waiting for queued frames");

        let result = self.finish_session(req);
        self.close_session();
        result
    }

    fn finish_session(&self, req: &StopRequest) -> Result<String, ControlError> {
        // Step 2: drain barrier
        self.wait_for_drain()?;

        // Step 3: deferred frames, in admission order
        let (deferred, rgbd_params, intrinsics, crop_box, frame_id) = {
            let mut state = self.shared.capture.lock();
            let deferred = std::mem::take(&mut state.deferred);
            let intrinsics = state.intrinsics;
            let session = state.session.as_ref().ok_or(ControlError::NotStarted)?;
            (
                deferred,
                session.params.rgbd,
                intrinsics,
                session.params.crop_box,
                session.params.reference_frame.clone(),
            )
        };
        self.integrate_deferred(deferred, intrinsics, &rgbd_params);

        // Step 4: extract and post-process the mesh
        let mesh = self
            .engine
            .lock()
            .extract_triangle_mesh()
            .context("Mesh extraction failed")?;
        let unfiltered = req.archive_directory.is_some().then(|| mesh.clone());
        let (mesh, report) =
            post_process(mesh, crop_box.as_ref(), &req.normal_filters, req.min_num_faces);
        debug!(?report, "Mesh post-processing finished");

        write_triangle_mesh(&req.mesh_filepath, &mesh)?;
        info!(
            "Mesh with {} vertices and {} triangles saved to {}",
            mesh.vertices.len(),
            mesh.triangles.len(),
            req.mesh_filepath.display()
        );
        self.publisher
            .publish(Publication::Mesh(MeshMarker::from_mesh(&frame_id, &mesh)));

        // Step 5: archive raw frames and the unfiltered mesh
        if let (Some(dir), Some(unfiltered)) = (&req.archive_directory, &unfiltered) {
            info!("Archiving data to {}", dir.display());
            let keyframes = std::mem::take(&mut self.shared.capture.lock().keyframes);
            write_archive(dir, &keyframes, intrinsics.as_ref())?;
            write_triangle_mesh(dir.join(&self.config.archive_mesh_filename), unfiltered)?;
        }

        // Step 6: the engine's full point cloud, next to the mesh
        let cloud = self
            .engine
            .lock()
            .extract_point_cloud()
            .context("Point cloud extraction failed")?;
        if cloud.is_empty() {
            warn!("Point cloud was empty");
        }
        let cloud_path = req
            .mesh_filepath
            .parent()
            .unwrap_or(Path::new(""))
            .join(&self.config.point_cloud_filename);
        write_point_cloud(&cloud_path, &cloud)?;
        info!(
            "Point cloud with {} points saved to {}",
            cloud.len(),
            cloud_path.display()
        );

        Ok(format!(
            "Mesh saved to {} and point cloud saved to {}",
            req.mesh_filepath.display(),
            cloud_path.display()
        ))
    }

    /// Wait until the queue is empty and nothing is being integrated.
    fn wait_for_drain(&self) -> Result<(), ControlError> {
        let mut state = self.shared.capture.lock();
        while !state.is_drained() {
            if self.shared.is_shutdown_requested() {
                return Err(ControlError::DrainCancelled);
            }
            self.shared
                .drained
                .wait_for(&mut state, self.config.drain_poll_interval());
        }
        Ok(())
    }

    fn integrate_deferred(
        &self,
        deferred: VecDeque<Keyframe>,
        intrinsics: Option<CameraIntrinsics>,
        params: &RgbdParams,
    ) {
        if deferred.is_empty() {
            return;
        }
        info!("Integrating {} deferred frames", deferred.len());
        for keyframe in deferred {
            let result = self.integrate_keyframe(&keyframe, intrinsics, params);
            if let Err(e) = &result {
                error!("Failed to integrate frame at {} ns: {}", keyframe.stamp_ns, e);
            }

            let mut state = self.shared.capture.lock();
            if let Some(session) = state.session.as_mut() {
                count_integration(&mut session.counters, &result);
            }
            if self.config.retain_keyframes {
                state.keyframes.push(keyframe);
            }
        }
    }

    /// Back to Idle with empty buffers. Counters stay readable.
    fn close_session(&self) {
        let mut state = self.shared.capture.lock();
        state.clear_buffers();
        state.resolver = None;
        if let Some(session) = state.session.as_mut() {
            session.state = SessionState::Idle;
        }
        drop(state);
        self.synchronizer.lock().clear();
        self.shared.not_full.notify_all();
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        self.shared
            .capture
            .lock()
            .session
            .as_ref()
            .map_or(SessionState::Idle, |s| s.state)
    }

    /// Counters of the current or last session.
    pub fn counters(&self) -> SessionCounters {
        self.shared
            .capture
            .lock()
            .session
            .as_ref()
            .map(|s| s.counters)
            .unwrap_or_default()
    }

    pub fn session_id(&self) -> Option<u64> {
        self.shared.capture.lock().session.as_ref().map(|s| s.id)
    }

    pub fn queue_len(&self) -> usize {
        self.shared.capture.lock().queue.len()
    }

    pub fn deferred_len(&self) -> usize {
        self.shared.capture.lock().deferred.len()
    }

    /// Release blocked producers and cancel a pending drain wait.
    pub fn shutdown(&self) {
        self.shared.request_shutdown();
    }
}

/// The session frames were resolved for is still the current one, and open.
fn session_accepts(state: &CaptureState, session_id: u64) -> bool {
    state
        .session
        .as_ref()
        .is_some_and(|s| s.id == session_id && s.state.is_open())
}

fn count_integration(counters: &mut SessionCounters, result: &Result<(), FrameError>) {
    match result {
        Ok(()) => counters.frames_integrated += 1,
        Err(_) => counters.frames_dropped += 1,
    }
}

fn respond(operation: &str, result: Result<String, ControlError>) -> ControlResponse {
    match result {
        Ok(message) => {
            info!("{}", message);
            ControlResponse::ok(message)
        }
        Err(e @ (ControlError::Export(_) | ControlError::DrainCancelled)) => {
            error!("{} failed: {}", operation, e);
            ControlResponse::failed(e.to_string())
        }
        Err(e) => {
            warn!("{}", e);
            ControlResponse::failed(e.to_string())
        }
    }
}
