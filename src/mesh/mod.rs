//! Mesh and point cloud containers plus the post-processing run at Stop.

pub mod point_cloud;
pub mod post_process;
pub mod triangle_mesh;

pub use point_cloud::PointCloud;
pub use post_process::{
    NormalFilter, PostProcessReport, filter_normals, filter_small_clusters, post_process,
};
pub use triangle_mesh::{TriangleClusters, TriangleMesh};
