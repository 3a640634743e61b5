use nalgebra::Vector3;

/// Point cloud with optional per-point colors (RGB in [0, 1]) and normals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    pub points: Vec<Vector3<f64>>,
    pub colors: Vec<Vector3<f64>>,
    pub normals: Vec<Vector3<f64>>,
}

impl PointCloud {
    pub fn new(points: Vec<Vector3<f64>>) -> Self {
        Self {
            points,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn has_colors(&self) -> bool {
        !self.points.is_empty() && self.colors.len() == self.points.len()
    }

    pub fn has_normals(&self) -> bool {
        !self.points.is_empty() && self.normals.len() == self.points.len()
    }
}
