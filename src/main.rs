//! rust-recon CLI: replay a recorded session archive through the controller.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use rust_recon::config::ControllerConfig;
use rust_recon::engine::OccupancyEngine;
use rust_recon::geometry::SE3;
use rust_recon::io::ArchiveReader;
use rust_recon::pose::TransformBuffer;
use rust_recon::publish::Publisher;
use rust_recon::system::{
    FrameOutcome, IntegrationWorker, NormalFilter, ReconstructionController,
    RgbdParams, StartRequest, StopRequest, TsdfParams,
};

/// Spacing of the synthetic timestamps given to replayed frames.
const REPLAY_FRAME_PERIOD_NS: u64 = 33_333_333;

#[derive(Parser)]
#[command(name = "rust-recon")]
#[command(about = "RGB-D frame admission and volumetric integration controller")]
#[command(version)]
struct Cli {
    /// Controller configuration (YAML). Defaults apply to missing keys.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay an archive directory and export a mesh and point cloud.
    Replay(ReplayArgs),

    /// Print the effective controller configuration as YAML.
    Config,
}

#[derive(Debug, Clone, Args)]
struct ReplayArgs {
    /// Archive written by a previous Stop (depth/, color/, pose/, camera_intrinsic.json).
    #[arg(long)]
    archive: PathBuf,

    /// Where to write the filtered mesh. The point cloud goes next to it.
    #[arg(long)]
    mesh: PathBuf,

    /// Start/stop parameters as YAML; overrides the flags below.
    #[arg(long)]
    session: Option<PathBuf>,

    /// Re-archive the admitted frames into this directory.
    #[arg(long)]
    archive_out: Option<PathBuf>,

    #[arg(long, default_value = "camera")]
    tracking_frame: String,

    #[arg(long, default_value = "world")]
    reference_frame: String,

    #[arg(long, default_value = "0.01")]
    voxel_length: f64,

    #[arg(long, default_value = "0.04")]
    sdf_trunc: f64,

    #[arg(long, default_value = "1000.0")]
    depth_scale: f64,

    #[arg(long, default_value = "3.0")]
    depth_trunc: f64,

    /// Keyframe translation threshold (metres).
    #[arg(long, default_value = "0.0")]
    translation_threshold: f64,

    /// Keyframe rotation threshold.
    #[arg(long, default_value = "0.0")]
    rotation_threshold: f64,

    /// Integrate frames as they are admitted.
    #[arg(long)]
    live: bool,

    /// Triangle clusters smaller than this are removed.
    #[arg(long, default_value = "0")]
    min_num_faces: usize,

    /// Voxel sampling stride of the occupancy engine (pixels).
    #[arg(long, default_value = "1")]
    pixel_stride: u32,
}

/// Session file accepted by `replay --session`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReplaySession {
    start: StartRequest,
    #[serde(default)]
    normal_filters: Vec<NormalFilter>,
    #[serde(default)]
    min_num_faces: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ControllerConfig::load(path)?,
        None => ControllerConfig::default(),
    };

    match cli.command {
        Commands::Replay(args) => replay(config, &args),
        Commands::Config => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
    }
}

fn load_session(args: &ReplayArgs) -> Result<ReplaySession> {
    if let Some(path) = &args.session {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        return serde_yaml::from_str(&text)
            .with_context(|| format!("Failed to parse {}", path.display()));
    }

    Ok(ReplaySession {
        start: StartRequest {
            tracking_frame: args.tracking_frame.clone(),
            reference_frame: args.reference_frame.clone(),
            tsdf_params: TsdfParams {
                voxel_length: args.voxel_length,
                sdf_trunc: args.sdf_trunc,
            },
            rgbd_params: RgbdParams {
                depth_scale: args.depth_scale,
                depth_trunc: args.depth_trunc,
                convert_to_intensity: false,
            },
            crop_box: None,
            translation_threshold: args.translation_threshold,
            rotation_threshold: args.rotation_threshold,
            live: args.live,
        },
        normal_filters: Vec::new(),
        min_num_faces: args.min_num_faces,
    })
}

fn replay(config: ControllerConfig, args: &ReplayArgs) -> Result<()> {
    let reader = ArchiveReader::open(&args.archive)?;
    let Some(intrinsics) = reader.intrinsics().copied() else {
        bail!("{} has no camera_intrinsic.json", args.archive.display());
    };
    let session = load_session(args)?;
    info!("Replaying {} frames from {}", reader.len(), args.archive.display());

    // Step 1: controller, transform source and publication sink
    let tf = Arc::new(TransformBuffer::new());
    let (publisher, publications) = Publisher::channel(config.publish_capacity);
    let sink = thread::spawn(move || {
        for msg in publications {
            debug!(topic = msg.topic(), "Publication");
        }
    });
    let engine = OccupancyEngine::new().with_pixel_stride(args.pixel_stride);
    let controller = Arc::new(ReconstructionController::new(
        config,
        Box::new(engine),
        tf.clone(),
        publisher,
    ));
    let mut worker = IntegrationWorker::spawn(Arc::clone(&controller));

    controller.set_intrinsics(intrinsics);
    let started = controller.start(&session.start);
    if !started.success {
        bail!("Start failed: {}", started.message);
    }

    // Step 2: feed frames with their recorded poses
    let reference = &session.start.reference_frame;
    let tracking = &session.start.tracking_frame;
    for (i, frame) in reader.frames().enumerate() {
        let frame = frame?;
        let stamp_ns = (i as u64 + 1) * REPLAY_FRAME_PERIOD_NS;
        tf.set_transform(reference, tracking, stamp_ns, SE3::from_matrix(frame.pose));

        controller.on_depth(stamp_ns, frame.depth)?;
        match controller.on_color(stamp_ns, frame.color)? {
            FrameOutcome::Queued => {}
            other => warn!("Frame {} not queued: {:?}", frame.index, other),
        }
    }

    // Step 3: stop and export
    let stopped = controller.stop(&StopRequest {
        mesh_filepath: args.mesh.clone(),
        normal_filters: session.normal_filters,
        min_num_faces: session.min_num_faces,
        archive_directory: args.archive_out.clone(),
    });
    let counters = controller.counters();

    controller.shutdown();
    worker.stop();
    drop(controller);
    if sink.join().is_err() {
        warn!("Publication sink panicked");
    }

    info!(
        "Frames seen {}, admitted {}, integrated {}, dropped {}",
        counters.frames_seen,
        counters.frames_admitted,
        counters.frames_integrated,
        counters.frames_dropped
    );
    if !stopped.success {
        bail!("Stop failed: {}", stopped.message);
    }
    println!("{}", stopped.message);
    print_summary(&args.mesh);
    Ok(())
}

fn print_summary(mesh: &Path) {
    match rust_recon::io::read_ply_header(mesh) {
        Ok(header) => {
            let count = |name: &str| header.element(name).map_or(0, |e| e.count);
            println!(
                "{}: {} vertices, {} faces",
                mesh.display(),
                count("vertex"),
                count("face")
            );
        }
        Err(e) => warn!("Could not read back {}: {:#}", mesh.display(), e),
    }
}
