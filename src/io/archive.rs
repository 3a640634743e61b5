//! Session archive: raw keyframes, poses and intrinsics on disk.
//!
//! Layout under the archive root:
//! ```text
//! depth/000000.png   16-bit depth
//! color/000000.jpg   RGB
//! pose/000000.pose   4x4 camera-to-reference matrix, one row per line
//! camera_intrinsic.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use nalgebra::Matrix4;
use tracing::{debug, info, warn};

use crate::sensor::{CameraIntrinsics, ColorImage, DepthImage, IntrinsicsJson, Keyframe};

pub const DEPTH_DIR: &str = "depth";
pub const COLOR_DIR: &str = "color";
pub const POSE_DIR: &str = "pose";
pub const INTRINSICS_FILE: &str = "camera_intrinsic.json";

fn frame_name(index: usize, ext: &str) -> String {
    format!("{:06}.{}", index, ext)
}

/// Create `dir`, keeping what is already there, and empty the per-frame
/// subdirectories so indices start at zero.
pub fn prepare_archive_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    for sub in [DEPTH_DIR, COLOR_DIR, POSE_DIR] {
        let path = dir.join(sub);
        if path.exists() {
            fs::remove_dir_all(&path)
                .with_context(|| format!("Failed to clear {}", path.display()))?;
        }
        fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
    }
    Ok(())
}

/// Write every keyframe plus the intrinsics into `dir`.
pub fn write_archive(
    dir: &Path,
    keyframes: &[Keyframe],
    intrinsics: Option<&CameraIntrinsics>,
) -> Result<()> {
    prepare_archive_dir(dir)?;

    for (i, kf) in keyframes.iter().enumerate() {
        let depth_path = dir.join(DEPTH_DIR).join(frame_name(i, "png"));
        kf.depth
            .save(&depth_path)
            .with_context(|| format!("Failed to write {}", depth_path.display()))?;

        let color_path = dir.join(COLOR_DIR).join(frame_name(i, "jpg"));
        kf.color
            .save(&color_path)
            .with_context(|| format!("Failed to write {}", color_path.display()))?;

        write_pose(dir.join(POSE_DIR).join(frame_name(i, "pose")), &kf.pose)?;
    }

    match intrinsics {
        Some(k) => write_intrinsics(dir.join(INTRINSICS_FILE), k)?,
        None => warn!("No camera intrinsics received, {} not written", INTRINSICS_FILE),
    }

    info!("Archived {} keyframes to {}", keyframes.len(), dir.display());
    Ok(())
}

pub fn write_pose<P: AsRef<Path>>(path: P, pose: &Matrix4<f64>) -> Result<()> {
    let path = path.as_ref();
    let mut text = String::new();
    for r in 0..4 {
        let row: Vec<String> = (0..4).map(|c| format!("{:.18e}", pose[(r, c)])).collect();
        text.push_str(&row.join(" "));
        text.push('\n');
    }
    fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}

pub fn read_pose<P: AsRef<Path>>(path: P) -> Result<Matrix4<f64>> {
    let path = path.as_ref();
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;

    let values = text
        .split_whitespace()
        .map(|tok| {
            tok.parse::<f64>()
                .with_context(|| format!("Bad value '{}' in {}", tok, path.display()))
        })
        .collect::<Result<Vec<f64>>>()?;
    if values.len() != 16 {
        bail!("{} holds {} values, expected 16", path.display(), values.len());
    }
    Ok(Matrix4::from_row_slice(&values))
}

pub fn write_intrinsics<P: AsRef<Path>>(path: P, intrinsics: &CameraIntrinsics) -> Result<()> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(&intrinsics.to_json())?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

pub fn read_intrinsics<P: AsRef<Path>>(path: P) -> Result<CameraIntrinsics> {
    let path = path.as_ref();
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let json: IntrinsicsJson = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    CameraIntrinsics::from_json(&json)
        .with_context(|| format!("{} has a malformed intrinsic matrix", path.display()))
}

/// One frame read back from an archive.
#[derive(Debug, Clone)]
pub struct ArchivedFrame {
    pub index: usize,
    pub depth: DepthImage,
    pub color: ColorImage,
    pub pose: Matrix4<f64>,
}

/// Reads an archive written by [`write_archive`] in index order.
#[derive(Debug)]
pub struct ArchiveReader {
    root: PathBuf,
    indices: Vec<usize>,
    intrinsics: Option<CameraIntrinsics>,
}

impl ArchiveReader {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let pose_dir = root.join(POSE_DIR);
        if !pose_dir.is_dir() {
            bail!("{} is not an archive (no {}/)", root.display(), POSE_DIR);
        }

        let mut indices = Vec::new();
        for entry in fs::read_dir(&pose_dir)
            .with_context(|| format!("Failed to list {}", pose_dir.display()))?
        {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "pose") {
                match path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.parse::<usize>().ok())
                {
                    Some(i) => indices.push(i),
                    None => debug!("Skipping {}", path.display()),
                }
            }
        }
        indices.sort_unstable();

        let intr_path = root.join(INTRINSICS_FILE);
        let intrinsics = if intr_path.exists() {
            Some(read_intrinsics(&intr_path)?)
        } else {
            None
        };

        Ok(Self {
            root,
            indices,
            intrinsics,
        })
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn intrinsics(&self) -> Option<&CameraIntrinsics> {
        self.intrinsics.as_ref()
    }

    pub fn read_pose(&self, index: usize) -> Result<Matrix4<f64>> {
        read_pose(self.root.join(POSE_DIR).join(frame_name(index, "pose")))
    }

    pub fn read_frame(&self, index: usize) -> Result<ArchivedFrame> {
        let depth_path = self.root.join(DEPTH_DIR).join(frame_name(index, "png"));
        let depth = image::open(&depth_path)
            .with_context(|| format!("Failed to read {}", depth_path.display()))?
            .into_luma16();

        let color_path = self.root.join(COLOR_DIR).join(frame_name(index, "jpg"));
        let color = image::open(&color_path)
            .with_context(|| format!("Failed to read {}", color_path.display()))?
            .into_rgb8();

        Ok(ArchivedFrame {
            index,
            depth,
            color,
            pose: self.read_pose(index)?,
        })
    }

    /// All frames in index order.
    pub fn frames(&self) -> impl Iterator<Item = Result<ArchivedFrame>> + '_ {
        self.indices.iter().map(|&i| self.read_frame(i))
    }
}
