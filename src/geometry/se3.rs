//! Rigid body transforms (SE(3)) as unit quaternion + translation.
//!
//! Naming follows `T_target_source`: a pose `T_ref_cam` maps a point from the
//! camera frame into the reference frame, `p_ref = T_ref_cam * p_cam`.

use nalgebra::{Matrix3, Matrix4, Quaternion, Rotation3, UnitQuaternion, Vector3};

/// Rigid transform in 3D.
#[derive(Debug, Clone, PartialEq)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn from_rt(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Build from a w-first quaternion. The quaternion is normalized.
    pub fn from_quaternion(qw: f64, qx: f64, qy: f64, qz: f64, translation: Vector3<f64>) -> Self {
        let rotation = UnitQuaternion::from_quaternion(Quaternion::new(qw, qx, qy, qz));
        Self {
            rotation,
            translation,
        }
    }

    /// Build from a homogeneous 4x4 matrix. The rotation block is
    /// re-orthonormalized, so slightly noisy matrices (e.g. parsed from
    /// text) are accepted.
    pub fn from_matrix(mat: Matrix4<f64>) -> Self {
        let r: Matrix3<f64> = mat.fixed_view::<3, 3>(0, 0).into_owned();
        let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix(&r));
        let translation = Vector3::new(mat[(0, 3)], mat[(1, 3)], mat[(2, 3)]);
        Self {
            rotation,
            translation,
        }
    }

    pub fn to_matrix(&self) -> Matrix4<f64> {
        let mut mat = Matrix4::identity();
        mat.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(self.rotation.to_rotation_matrix().matrix());
        mat.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        mat
    }

    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        let translation = -(rotation * self.translation);
        Self {
            rotation,
            translation,
        }
    }

    /// `self * other`.
    pub fn compose(&self, other: &SE3) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    /// Interpolate between `self` (t = 0) and `other` (t = 1): linear in
    /// translation, spherical in rotation.
    pub fn interpolate(&self, other: &SE3, t: f64) -> Self {
        let rotation = self
            .rotation
            .try_slerp(&other.rotation, t, 1e-9)
            .unwrap_or(if t < 0.5 { self.rotation } else { other.rotation });
        Self {
            rotation,
            translation: self.translation.lerp(&other.translation, t),
        }
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}

/// Euclidean distance between the positions of two poses.
pub fn translation_distance(a: &SE3, b: &SE3) -> f64 {
    (a.translation - b.translation).norm()
}

/// Chordal distance between two unit quaternions, accounting for the double
/// cover: `min(|a - b|, |a + b|)` over the 4-vector coefficients.
pub fn quaternion_absolute_distance(a: &UnitQuaternion<f64>, b: &UnitQuaternion<f64>) -> f64 {
    let minus = (a.coords - b.coords).norm();
    let plus = (a.coords + b.coords).norm();
    minus.min(plus)
}

/// Arc length between two orientations on the unit quaternion sphere.
/// Equal to half the relative rotation angle.
pub fn quaternion_geodesic_distance(a: &UnitQuaternion<f64>, b: &UnitQuaternion<f64>) -> f64 {
    0.5 * a.angle_to(b)
}
