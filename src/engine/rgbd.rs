//! RGBD image assembly from a raw depth/color pair.

use image::{ImageBuffer, Luma, Rgb};

use crate::error::EngineError;
use crate::sensor::{ColorImage, DepthImage};
use crate::system::messages::RgbdParams;

/// Depth in metres (0 = invalid) plus color as floats in [0, 1].
#[derive(Debug, Clone)]
pub struct RgbdImage {
    pub depth: ImageBuffer<Luma<f32>, Vec<f32>>,
    /// RGB, or intensity replicated into all three channels.
    pub color: ImageBuffer<Rgb<f32>, Vec<f32>>,
}

impl RgbdImage {
    /// Scale raw depth to metres and zero out anything beyond `depth_trunc`.
    pub fn from_color_and_depth(
        color: &ColorImage,
        depth: &DepthImage,
        params: &RgbdParams,
    ) -> Result<Self, EngineError> {
        if color.dimensions() != depth.dimensions() {
            return Err(EngineError::SizeMismatch {
                depth: depth.dimensions(),
                color: color.dimensions(),
            });
        }
        let (w, h) = depth.dimensions();
        let scale = params.depth_scale as f32;
        let trunc = params.depth_trunc as f32;

        let depth_m = ImageBuffer::from_fn(w, h, |x, y| {
            let d = depth.get_pixel(x, y)[0] as f32 / scale;
            Luma([if d > trunc { 0.0 } else { d }])
        });

        let color_f = ImageBuffer::from_fn(w, h, |x, y| {
            let [r, g, b] = color.get_pixel(x, y).0.map(|c| c as f32 / 255.0);
            if params.convert_to_intensity {
                let i = 0.2990 * r + 0.5870 * g + 0.1140 * b;
                Rgb([i, i, i])
            } else {
                Rgb([r, g, b])
            }
        });

        Ok(Self {
            depth: depth_m,
            color: color_f,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.depth.dimensions()
    }
}
