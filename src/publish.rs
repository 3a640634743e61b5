//! Published outputs: mesh marker, diagnostic point cloud, crop-box marker.
//!
//! Everything here is best-effort. The publisher never blocks the caller; a
//! full or disconnected channel just drops the message.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use nalgebra::{UnitQuaternion, Vector3};
use tracing::debug;

use crate::geometry::Aabb;
use crate::mesh::{PointCloud, TriangleMesh};

pub const MESH_TOPIC: &str = "industrial_reconstruction_mesh";
pub const CLOUD_TOPIC: &str = "tsdf_point_cloud";
pub const VOLUME_TOPIC: &str = "tsdf_volume";

/// RGBA in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorRgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

/// Axis-aligned box marker drawn around the active crop region.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxMarker {
    pub frame_id: String,
    pub id: i32,
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
    pub scale: Vector3<f64>,
    pub color: ColorRgba,
}

impl BoxMarker {
    pub const CROP_BOX_ID: i32 = 1;

    pub fn crop_box(frame_id: &str, bounds: &Aabb) -> Self {
        Self {
            frame_id: frame_id.to_string(),
            id: Self::CROP_BOX_ID,
            position: bounds.center(),
            orientation: UnitQuaternion::identity(),
            scale: bounds.extent(),
            color: ColorRgba {
                r: 1.0,
                g: 0.0,
                b: 0.0,
                a: 0.25,
            },
        }
    }
}

/// Triangle-list marker: three consecutive points per triangle.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshMarker {
    pub frame_id: String,
    pub points: Vec<Vector3<f64>>,
    /// One color per point; empty when the mesh carries no vertex colors.
    pub colors: Vec<ColorRgba>,
}

impl MeshMarker {
    pub fn from_mesh(frame_id: &str, mesh: &TriangleMesh) -> Self {
        let mut points = Vec::with_capacity(mesh.triangles.len() * 3);
        let mut colors = Vec::new();
        for t in &mesh.triangles {
            for &v in t {
                points.push(mesh.vertices[v]);
                if mesh.has_vertex_colors() {
                    let c = mesh.vertex_colors[v];
                    colors.push(ColorRgba {
                        r: c.x as f32,
                        g: c.y as f32,
                        b: c.z as f32,
                        a: 1.0,
                    });
                }
            }
        }
        Self {
            frame_id: frame_id.to_string(),
            points,
            colors,
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.points.len() / 3
    }
}

/// A float32 field of a packed point record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointField {
    pub name: &'static str,
    /// Byte offset inside one point record.
    pub offset: u32,
}

/// Unordered (height 1), little-endian packed point cloud.
///
/// Fields are appended in a fixed order, each float32: `x y z`, then `rgb`
/// when the cloud has colors, then `normal_x normal_y normal_z` when it has
/// normals.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloudMsg {
    pub frame_id: String,
    pub height: u32,
    pub width: u32,
    pub fields: Vec<PointField>,
    pub is_bigendian: bool,
    pub point_step: u32,
    pub row_step: u32,
    pub data: Vec<u8>,
    pub is_dense: bool,
}

impl PointCloudMsg {
    pub fn from_cloud(frame_id: &str, cloud: &PointCloud) -> Self {
        let mut fields = Vec::new();
        let mut point_step = 0u32;
        let mut add_field = |name: &'static str| {
            fields.push(PointField {
                name,
                offset: point_step,
            });
            point_step += 4;
        };

        for name in ["x", "y", "z"] {
            add_field(name);
        }
        if cloud.has_colors() {
            add_field("rgb");
        }
        if cloud.has_normals() {
            for name in ["normal_x", "normal_y", "normal_z"] {
                add_field(name);
            }
        }

        let width = cloud.len() as u32;
        let mut data = Vec::with_capacity((point_step * width) as usize);
        for i in 0..cloud.len() {
            for c in cloud.points[i].iter() {
                data.extend_from_slice(&(*c as f32).to_le_bytes());
            }
            if cloud.has_colors() {
                data.extend_from_slice(&pack_rgb(&cloud.colors[i]).to_le_bytes());
            }
            if cloud.has_normals() {
                for c in cloud.normals[i].iter() {
                    data.extend_from_slice(&(*c as f32).to_le_bytes());
                }
            }
        }

        Self {
            frame_id: frame_id.to_string(),
            height: 1,
            width,
            fields,
            is_bigendian: false,
            point_step,
            row_step: point_step * width,
            data,
            is_dense: false,
        }
    }

    pub fn field(&self, name: &str) -> Option<&PointField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Read one float32 field of point `index`.
    pub fn read_f32(&self, index: usize, name: &str) -> Option<f32> {
        let field = self.field(name)?;
        let start = index * self.point_step as usize + field.offset as usize;
        let bytes = self.data.get(start..start + 4)?;
        Some(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

/// Pack a [0, 1] color as `0x00RRGGBB` and reinterpret the bits as f32.
pub fn pack_rgb(color: &Vector3<f64>) -> f32 {
    let channel = |c: f64| (c.clamp(0.0, 1.0) * 255.0) as u32;
    let rgb = 65536 * channel(color.x) + 256 * channel(color.y) + channel(color.z);
    f32::from_bits(rgb)
}

pub fn unpack_rgb(packed: f32) -> [u8; 3] {
    let bits = packed.to_bits();
    [(bits >> 16) as u8, (bits >> 8) as u8, bits as u8]
}

#[derive(Debug, Clone, PartialEq)]
pub enum Publication {
    Mesh(MeshMarker),
    PointCloud(PointCloudMsg),
    CropBox(BoxMarker),
}

impl Publication {
    pub fn topic(&self) -> &'static str {
        match self {
            Publication::Mesh(_) => MESH_TOPIC,
            Publication::PointCloud(_) => CLOUD_TOPIC,
            Publication::CropBox(_) => VOLUME_TOPIC,
        }
    }
}

/// Non-blocking sender side of the publication channel.
#[derive(Debug, Clone)]
pub struct Publisher {
    tx: Option<Sender<Publication>>,
}

impl Publisher {
    /// Publisher plus the receiver a transport adapter drains.
    pub fn channel(capacity: usize) -> (Self, Receiver<Publication>) {
        let (tx, rx) = bounded(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// Publisher that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Returns whether the message was handed to the channel.
    pub fn publish(&self, msg: Publication) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        let topic = msg.topic();
        match tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Publication channel full, dropping {} message", topic);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn cloud(colors: bool, normals: bool) -> PointCloud {
        let mut cloud = PointCloud::new(vec![Vector3::new(1.0, 2.0, 3.0), Vector3::new(-1.0, 0.5, 0.0)]);
        if colors {
            cloud.colors = vec![Vector3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 0.5, 1.0)];
        }
        if normals {
            cloud.normals = vec![Vector3::z(), Vector3::x()];
        }
        cloud
    }

    #[test]
    fn test_point_step_grows_per_field() {
        assert_eq!(PointCloudMsg::from_cloud("map", &cloud(false, false)).point_step, 12);
        assert_eq!(PointCloudMsg::from_cloud("map", &cloud(true, false)).point_step, 16);
        assert_eq!(PointCloudMsg::from_cloud("map", &cloud(false, true)).point_step, 24);

        let msg = PointCloudMsg::from_cloud("map", &cloud(true, true));
        let names: Vec<&str> = msg.fields.iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["x", "y", "z", "rgb", "normal_x", "normal_y", "normal_z"]);
        assert_eq!(msg.point_step, 28);
        assert_eq!(msg.row_step, 56);
        assert_eq!(msg.data.len(), 56);
        assert_eq!(msg.field("normal_x").unwrap().offset, 16);
    }

    #[test]
    fn test_packed_values_readable() {
        let msg = PointCloudMsg::from_cloud("map", &cloud(true, true));

        assert_relative_eq!(msg.read_f32(1, "x").unwrap(), -1.0);
        assert_relative_eq!(msg.read_f32(0, "normal_z").unwrap(), 1.0);
        assert_eq!(unpack_rgb(msg.read_f32(0, "rgb").unwrap()), [255, 0, 0]);
        // Channels are truncated, not rounded
        assert_eq!(unpack_rgb(msg.read_f32(1, "rgb").unwrap()), [0, 127, 255]);
    }

    #[test]
    fn test_crop_box_marker() {
        let bounds = Aabb::from_bounds(Vector3::new(-1.0, 0.0, 0.0), Vector3::new(1.0, 2.0, 0.5)).unwrap();
        let marker = BoxMarker::crop_box("world", &bounds);

        assert_eq!(marker.id, 1);
        assert_eq!(marker.frame_id, "world");
        assert_relative_eq!(marker.position, Vector3::new(0.0, 1.0, 0.25));
        assert_relative_eq!(marker.scale, Vector3::new(2.0, 2.0, 0.5));
        assert_eq!(marker.color.a, 0.25);
    }

    #[test]
    fn test_mesh_marker_expands_triangles() {
        let mesh = TriangleMesh::new(
            vec![Vector3::zeros(), Vector3::x(), Vector3::y(), Vector3::z()],
            vec![[0, 1, 2], [0, 2, 3]],
        );
        let marker = MeshMarker::from_mesh("world", &mesh);

        assert_eq!(marker.triangle_count(), 2);
        assert_eq!(marker.points[5], Vector3::z());
        assert!(marker.colors.is_empty());
    }

    #[test]
    fn test_publish_never_blocks() {
        let (publisher, rx) = Publisher::channel(1);
        let msg = Publication::PointCloud(PointCloudMsg::from_cloud("map", &PointCloud::default()));

        assert!(publisher.publish(msg.clone()));
        assert!(!publisher.publish(msg.clone()));
        assert_eq!(rx.len(), 1);

        drop(rx);
        assert!(!publisher.publish(msg.clone()));
        assert!(!Publisher::disabled().publish(msg));
    }
}
