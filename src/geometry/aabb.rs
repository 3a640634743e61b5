//! Axis-aligned bounding box used to crop reconstructions.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vector3<f64>,
    pub max: Vector3<f64>,
}

impl Aabb {
    /// Build a crop box from request bounds.
    ///
    /// Returns `None` when `min == max`, which callers use to mean "no crop".
    /// Bounds given in the wrong order are swapped per axis.
    pub fn from_bounds(min: Vector3<f64>, max: Vector3<f64>) -> Option<Self> {
        if min == max {
            return None;
        }
        Some(Self {
            min: min.inf(&max),
            max: min.sup(&max),
        })
    }

    /// Inclusive containment test.
    pub fn contains(&self, p: &Vector3<f64>) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }

    pub fn center(&self) -> Vector3<f64> {
        (self.min + self.max) / 2.0
    }

    pub fn extent(&self) -> Vector3<f64> {
        self.max - self.min
    }
}
