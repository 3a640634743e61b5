//! End-to-end controller scenarios driven through the public API, with the
//! real integration worker and a recording engine.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use approx::assert_relative_eq;
use crossbeam_channel::Receiver;
use nalgebra::{Matrix4, UnitQuaternion, Vector3};
use parking_lot::Mutex;
use tempfile::TempDir;

use rust_recon::capture::{OverflowPolicy, SessionState};
use rust_recon::config::ControllerConfig;
use rust_recon::engine::{ReconstructionEngine, RgbdImage};
use rust_recon::error::EngineError;
use rust_recon::geometry::SE3;
use rust_recon::io::{ArchiveReader, read_ply_header};
use rust_recon::mesh::{PointCloud, TriangleMesh};
use rust_recon::pose::TransformBuffer;
use rust_recon::publish::{Publication, Publisher};
use rust_recon::sensor::{CameraIntrinsics, ColorImage, DepthImage, Frame};
use rust_recon::system::{
    CropBounds, FrameOutcome, IntegrationWorker, ReconstructionController, RgbdParams,
    StartRequest, StopRequest, TickOutcome, TsdfParams,
};

const REFERENCE: &str = "world";
const TRACKING: &str = "camera";
const FRAME_PERIOD_NS: u64 = 1_000_000;

// ============================================================================
// Recording engine
// ============================================================================

#[derive(Debug, Default)]
struct EngineLog {
    resets: usize,
    /// Extrinsics (`T_cam_ref`) in integration order.
    extrinsics: Vec<Matrix4<f64>>,
}

/// Records every call. Each integrated frame becomes one small triangle at
/// the camera position, so mesh size tracks integration count.
struct RecordingEngine {
    log: Arc<Mutex<EngineLog>>,
}

impl ReconstructionEngine for RecordingEngine {
    fn reset(&mut self, _params: &TsdfParams) {
        let mut log = self.log.lock();
        log.resets += 1;
        log.extrinsics.clear();
    }

    fn integrate(
        &mut self,
        _rgbd: &RgbdImage,
        _intrinsics: &CameraIntrinsics,
        extrinsic: &Matrix4<f64>,
    ) -> Result<(), EngineError> {
        self.log.lock().extrinsics.push(*extrinsic);
        Ok(())
    }

    fn extract_triangle_mesh(&self) -> Result<TriangleMesh, EngineError> {
        let log = self.log.lock();
        let mut mesh = TriangleMesh::default();
        for (i, e) in log.extrinsics.iter().enumerate() {
            let p = camera_position(e);
            mesh.vertices.extend([p, p + Vector3::x() * 0.01, p + Vector3::y() * 0.01]);
            mesh.triangles.push([3 * i, 3 * i + 1, 3 * i + 2]);
        }
        Ok(mesh)
    }

    fn extract_point_cloud(&self) -> Result<PointCloud, EngineError> {
        let log = self.log.lock();
        Ok(PointCloud::new(log.extrinsics.iter().map(camera_position).collect()))
    }
}

fn camera_position(extrinsic: &Matrix4<f64>) -> Vector3<f64> {
    SE3::from_matrix(*extrinsic).inverse().translation
}

// ============================================================================
// Fixture
// ============================================================================

struct Fixture {
    controller: Arc<ReconstructionController>,
    tf: Arc<TransformBuffer>,
    log: Arc<Mutex<EngineLog>>,
    publications: Receiver<Publication>,
}

impl Fixture {
    fn new(config: ControllerConfig) -> Self {
        let tf = Arc::new(TransformBuffer::new());
        let log = Arc::new(Mutex::new(EngineLog::default()));
        let (publisher, publications) = Publisher::channel(64);
        let controller = Arc::new(ReconstructionController::new(
            config,
            Box::new(RecordingEngine { log: log.clone() }),
            tf.clone(),
            publisher,
        ));
        controller.set_intrinsics(CameraIntrinsics {
            width: 2,
            height: 2,
            fx: 1.0,
            fy: 1.0,
            cx: 1.0,
            cy: 1.0,
        });
        Self {
            controller,
            tf,
            log,
            publications,
        }
    }

    fn worker(&self) -> IntegrationWorker {
        IntegrationWorker::spawn(Arc::clone(&self.controller))
    }

    fn pose(x: f64) -> SE3 {
        SE3::from_rt(UnitQuaternion::identity(), Vector3::new(x, 0.0, 0.0))
    }

    /// Publish the pose for frame `i` and deliver its depth/color pair.
    fn feed(&self, i: u64) -> FrameOutcome {
        let stamp_ns = (i + 1) * FRAME_PERIOD_NS;
        let x = 0.1 * (i + 1) as f64;
        self.tf.set_transform(REFERENCE, TRACKING, stamp_ns, Self::pose(x));

        let depth = DepthImage::from_pixel(2, 2, image::Luma([1000]));
        let color = ColorImage::from_pixel(2, 2, image::Rgb([10, 20, 30]));
        assert_eq!(
            self.controller.on_depth(stamp_ns, depth).unwrap(),
            FrameOutcome::Unmatched
        );
        self.controller.on_color(stamp_ns, color).unwrap()
    }

    fn published(&self) -> Vec<Publication> {
        self.publications.try_iter().collect()
    }
}

fn fast_config() -> ControllerConfig {
    ControllerConfig {
        integration_rate_hz: 1000.0,
        drain_poll_interval_ms: 5,
        ..Default::default()
    }
}

fn start_request(live: bool) -> StartRequest {
    StartRequest {
        tracking_frame: TRACKING.to_string(),
        reference_frame: REFERENCE.to_string(),
        tsdf_params: TsdfParams {
            voxel_length: 0.01,
            sdf_trunc: 0.04,
        },
        rgbd_params: RgbdParams::default(),
        crop_box: None,
        translation_threshold: 0.05,
        rotation_threshold: 0.1,
        live,
    }
}

fn stop_request(dir: &Path) -> StopRequest {
    StopRequest {
        mesh_filepath: dir.join("out/mesh.ply"),
        normal_filters: Vec::new(),
        min_num_faces: 0,
        archive_directory: None,
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

fn frame(stamp_ns: u64) -> Frame {
    Frame {
        depth: DepthImage::new(2, 2),
        color: ColorImage::new(2, 2),
        stamp_ns,
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_deferred_session_integrates_everything_at_stop_in_order() {
    let fx = Fixture::new(fast_config());
    let _worker = fx.worker();
    let dir = TempDir::new().unwrap();

    assert!(fx.controller.start(&start_request(false)).success);
    for i in 0..40 {
        assert_eq!(fx.feed(i), FrameOutcome::Queued);
    }

    // Everything is admitted into the deferred buffer, nothing integrated yet
    assert!(wait_until(Duration::from_secs(10), || {
        fx.controller.deferred_len() == 40
    }));
    assert!(fx.log.lock().extrinsics.is_empty());

    let response = fx.controller.stop(&stop_request(dir.path()));
    assert!(response.success, "{}", response.message);

    let counters = fx.controller.counters();
    assert_eq!(counters.frames_seen, 40);
    assert_eq!(counters.frames_admitted, 40);
    assert_eq!(counters.frames_integrated, 40);
    assert_eq!(counters.frames_dropped, 0);
    assert_eq!(fx.controller.queue_len(), 0);
    assert_eq!(fx.controller.deferred_len(), 0);
    assert_eq!(fx.controller.state(), SessionState::Idle);

    // Arrival order, and integrated with the inverse of the camera pose
    let log = fx.log.lock();
    assert_eq!(log.extrinsics.len(), 40);
    for (i, e) in log.extrinsics.iter().enumerate() {
        assert_relative_eq!(e[(0, 3)], -0.1 * (i + 1) as f64, epsilon = 1e-12);
    }
    drop(log);

    let mesh = read_ply_header(dir.path().join("out/mesh.ply")).unwrap();
    assert_eq!(mesh.element("face").unwrap().count, 40);
    let cloud = read_ply_header(dir.path().join("out/integrated_point_cloud.ply")).unwrap();
    assert_eq!(cloud.element("vertex").unwrap().count, 40);

    assert!(fx
        .published()
        .iter()
        .any(|p| matches!(p, Publication::Mesh(m) if m.triangle_count() == 40)));
}

#[test]
fn test_short_session_below_warmup_still_stops() {
    let fx = Fixture::new(fast_config());
    let _worker = fx.worker();
    let dir = TempDir::new().unwrap();

    fx.controller.start(&start_request(false));
    for i in 0..5 {
        fx.feed(i);
    }
    thread::sleep(Duration::from_millis(20));
    // Warm-up holds the queue while recording
    assert_eq!(fx.controller.queue_len(), 5);

    let response = fx.controller.stop(&stop_request(dir.path()));

    assert!(response.success, "{}", response.message);
    assert_eq!(fx.controller.counters().frames_integrated, 5);
}

#[test]
fn test_live_session_integrates_per_tick_and_publishes_diagnostics() {
    let config = ControllerConfig {
        warmup_frames: 0,
        diagnostic_period: 10,
        ..fast_config()
    };
    let fx = Fixture::new(config);
    let _worker = fx.worker();
    let dir = TempDir::new().unwrap();

    fx.controller.start(&start_request(true));
    for i in 0..25 {
        assert_eq!(fx.feed(i), FrameOutcome::Queued);
    }
    assert!(wait_until(Duration::from_secs(10), || {
        fx.controller.counters().frames_integrated == 25
    }));
    assert_eq!(fx.controller.deferred_len(), 0);

    let clouds = fx
        .published()
        .into_iter()
        .filter(|p| matches!(p, Publication::PointCloud(_)))
        .count();
    assert_eq!(clouds, 2);

    let response = fx.controller.stop(&stop_request(dir.path()));
    assert!(response.success, "{}", response.message);
    let counters = fx.controller.counters();
    assert_eq!(counters.frames_admitted, 25);
    assert_eq!(counters.frames_integrated, 25);
}

#[test]
fn test_stop_with_archive_round_trips_poses() {
    let fx = Fixture::new(fast_config());
    let _worker = fx.worker();
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("archive");

    fx.controller.start(&start_request(false));
    for i in 0..32 {
        fx.feed(i);
    }
    let response = fx.controller.stop(&StopRequest {
        archive_directory: Some(archive.clone()),
        ..stop_request(dir.path())
    });
    assert!(response.success, "{}", response.message);

    let reader = ArchiveReader::open(&archive).unwrap();
    assert_eq!(reader.len(), 32);
    assert_eq!(reader.intrinsics().map(|k| k.fx), Some(1.0));
    for i in 0..32 {
        let pose = reader.read_pose(i).unwrap();
        let expected = Fixture::pose(0.1 * (i + 1) as f64).to_matrix();
        assert_relative_eq!(pose, expected, epsilon = 1e-12);
    }
    assert!(archive.join("integrated.ply").exists());
}

#[test]
fn test_crop_box_marker_and_crop_applied() {
    let fx = Fixture::new(fast_config());
    let _worker = fx.worker();
    let dir = TempDir::new().unwrap();

    let request = StartRequest {
        crop_box: Some(CropBounds {
            min: Vector3::new(0.0, -1.0, -1.0),
            max: Vector3::new(1.05, 1.0, 1.0),
        }),
        ..start_request(false)
    };
    fx.controller.start(&request);
    assert!(matches!(
        fx.published().as_slice(),
        [Publication::CropBox(marker)] if marker.frame_id == REFERENCE
    ));

    // Cameras at x = 0.1 .. 4.0; only the first ten triangles fit the box
    for i in 0..40 {
        fx.feed(i);
    }
    let response = fx.controller.stop(&stop_request(dir.path()));
    assert!(response.success, "{}", response.message);

    let mesh = read_ply_header(dir.path().join("out/mesh.ply")).unwrap();
    assert_eq!(mesh.element("face").unwrap().count, 10);
    // The point cloud is not cropped
    let cloud = read_ply_header(dir.path().join("out/integrated_point_cloud.ply")).unwrap();
    assert_eq!(cloud.element("vertex").unwrap().count, 40);
}

#[test]
fn test_control_misuse_and_restart() {
    let fx = Fixture::new(fast_config());
    let _worker = fx.worker();
    let dir = TempDir::new().unwrap();

    assert!(!fx.controller.stop(&stop_request(dir.path())).success);
    assert!(!fx.controller.pause().success);

    assert!(fx.controller.start(&start_request(false)).success);
    let first = fx.controller.session_id();
    assert!(!fx.controller.start(&start_request(false)).success);
    assert!(!fx.controller.resume().success);

    fx.feed(0);
    assert!(fx.controller.pause().success);
    assert_eq!(fx.feed(1), FrameOutcome::NotRecording);
    assert!(fx.controller.resume().success);

    // Stopping from Paused is allowed too
    assert!(fx.controller.pause().success);
    assert!(fx.controller.stop(&stop_request(dir.path())).success);
    assert_eq!(fx.controller.counters().frames_seen, 1);

    assert!(fx.controller.start(&start_request(true)).success);
    assert_ne!(fx.controller.session_id(), first);
    assert_eq!(fx.controller.counters().frames_seen, 0);
    assert_eq!(fx.log.lock().resets, 2);
}

#[test]
fn test_drop_oldest_policy_keeps_newest_frames() {
    let config = ControllerConfig {
        queue_capacity: 3,
        overflow_policy: OverflowPolicy::DropOldest,
        warmup_frames: 0,
        ..fast_config()
    };
    let fx = Fixture::new(config);
    fx.controller.start(&start_request(true));

    for i in 0..5 {
        assert_eq!(fx.feed(i), FrameOutcome::Queued);
    }
    assert_eq!(fx.controller.queue_len(), 3);
    assert_eq!(fx.controller.counters().frames_seen, 5);

    // Frames 0 and 1 were evicted; the oldest survivor is frame 2 (x = 0.3)
    assert_eq!(fx.controller.tick(), TickOutcome::Integrated);
    assert_relative_eq!(fx.log.lock().extrinsics[0][(0, 3)], -0.3, epsilon = 1e-12);
}

#[test]
fn test_blocked_producer_released_by_consumer() {
    let config = ControllerConfig {
        queue_capacity: 1,
        warmup_frames: 0,
        ..fast_config()
    };
    let fx = Fixture::new(config);
    fx.controller.start(&start_request(false));
    for i in 1..=2u64 {
        fx.tf
            .set_transform(REFERENCE, TRACKING, i, Fixture::pose(i as f64));
    }
    assert_eq!(fx.controller.on_frame(frame(1)).unwrap(), FrameOutcome::Queued);

    let controller = Arc::clone(&fx.controller);
    let producer = thread::spawn(move || controller.on_frame(frame(2)).unwrap());
    thread::sleep(Duration::from_millis(30));
    assert_eq!(fx.controller.queue_len(), 1);

    assert_eq!(fx.controller.tick(), TickOutcome::Deferred);
    assert_eq!(producer.join().unwrap(), FrameOutcome::Queued);
    assert_eq!(fx.controller.queue_len(), 1);
}

#[test]
fn test_shutdown_cancels_drain_wait() {
    let fx = Fixture::new(fast_config());
    let dir = TempDir::new().unwrap();
    fx.controller.start(&start_request(false));
    fx.feed(0);

    // No worker: the queued frame is never consumed
    let controller = Arc::clone(&fx.controller);
    let mesh_dir = dir.path().to_path_buf();
    let stopper = thread::spawn(move || controller.stop(&stop_request(&mesh_dir)));
    thread::sleep(Duration::from_millis(30));
    fx.controller.shutdown();

    let response = stopper.join().unwrap();
    assert!(!response.success);
    assert!(response.message.contains("cancelled"));
    assert_eq!(fx.controller.state(), SessionState::Idle);
    assert_eq!(fx.controller.queue_len(), 0);
}
