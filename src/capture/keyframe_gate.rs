//! Keyframe Gate: motion-based down-sampling of posed frames.

use serde::{Deserialize, Serialize};

use crate::geometry::{
    SE3, quaternion_absolute_distance, quaternion_geodesic_distance, translation_distance,
};

/// Orientation distance used by the gate.
///
/// `Chordal` is the default: it is the distance the `industrial_reconstruction`
/// ROS node thresholds against (pyquaternion's `absolute_distance`), so
/// rotation thresholds tuned for that node keep their meaning here.
/// `Geodesic` is the true rotation-angle metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationMetric {
    /// `min(|q0 - q1|, |q0 + q1|)` on quaternion coefficients.
    #[default]
    Chordal,
    /// Arc length on the unit quaternion sphere (half the rotation angle).
    Geodesic,
}

impl RotationMetric {
    pub fn distance(&self, a: &SE3, b: &SE3) -> f64 {
        match self {
            RotationMetric::Chordal => quaternion_absolute_distance(&a.rotation, &b.rotation),
            RotationMetric::Geodesic => quaternion_geodesic_distance(&a.rotation, &b.rotation),
        }
    }
}

/// Motion between two poses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Displacement {
    pub translation: f64,
    pub rotation: f64,
}

impl Displacement {
    pub fn between(pose: &SE3, prev: &SE3, metric: RotationMetric) -> Self {
        Self {
            translation: translation_distance(pose, prev),
            rotation: metric.distance(pose, prev),
        }
    }
}

/// Greedy keyframe selection.
///
/// A pose is accepted when it moved at least `translation_threshold` or
/// turned at least `rotation_threshold` relative to the last *accepted*
/// pose. Rejected poses never move the baseline. The baseline starts at
/// identity, so the first frame of a session is judged against the origin.
#[derive(Debug, Clone)]
pub struct KeyframeGate {
    /// Minimum translation (metres) to accept.
    translation_threshold: f64,
    /// Minimum orientation distance to accept, in units of `metric`.
    rotation_threshold: f64,
    metric: RotationMetric,
    /// Last accepted pose.
    prev_pose: SE3,
}

impl KeyframeGate {
    pub fn new(translation_threshold: f64, rotation_threshold: f64, metric: RotationMetric) -> Self {
        Self {
            translation_threshold,
            rotation_threshold,
            metric,
            prev_pose: SE3::identity(),
        }
    }

    /// Decide on `pose`; on acceptance it becomes the new baseline.
    pub fn accept(&mut self, pose: &SE3) -> bool {
        let d = Displacement::between(pose, &self.prev_pose, self.metric);
        let accepted = self.exceeds(&d);
        if accepted {
            self.prev_pose = pose.clone();
        }
        accepted
    }

    /// Threshold test with inclusive bounds.
    pub fn exceeds(&self, d: &Displacement) -> bool {
        d.translation >= self.translation_threshold || d.rotation >= self.rotation_threshold
    }

    pub fn prev_pose(&self) -> &SE3 {
        &self.prev_pose
    }

    /// Back to the identity baseline.
    pub fn reset(&mut self) {
        self.prev_pose = SE3::identity();
    }
}
