//! File formats: PLY export and the session archive.

pub mod archive;
pub mod ply;

pub use archive::{ArchiveReader, ArchivedFrame, read_pose, write_archive, write_pose};
pub use ply::{read_ply_header, write_point_cloud, write_triangle_mesh};
