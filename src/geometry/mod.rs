//! Geometry utilities: SE3 transforms, quaternion distances, crop boxes.

pub mod aabb;
pub mod se3;

pub use aabb::Aabb;
pub use se3::{
    SE3, quaternion_absolute_distance, quaternion_geodesic_distance, translation_distance,
};
