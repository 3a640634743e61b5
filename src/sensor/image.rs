//! Image buffers and decoding of raw transport payloads.
//!
//! Depth is kept as raw 16-bit sensor units; conversion to metres happens
//! when an RGBD image is built for integration (`depth_scale`).

use image::{ImageBuffer, Luma, RgbImage};

use crate::error::FrameError;

/// 16-bit depth image in sensor units.
pub type DepthImage = ImageBuffer<Luma<u16>, Vec<u16>>;

/// 8-bit RGB color image.
pub type ColorImage = RgbImage;

/// Undecoded image as delivered by the transport layer.
#[derive(Debug, Clone)]
pub struct RawImage {
    /// Capture timestamp in nanoseconds.
    pub stamp_ns: u64,
    pub width: u32,
    pub height: u32,
    /// Pixel encoding, e.g. "16UC1", "rgb8", "bgr8", "mono8".
    pub encoding: String,
    /// Row stride in bytes.
    pub step: u32,
    pub is_bigendian: bool,
    pub data: Vec<u8>,
}

/// Decode a depth payload (`16UC1` / `mono16`).
pub fn decode_depth(raw: &RawImage) -> Result<DepthImage, FrameError> {
    match raw.encoding.as_str() {
        "16UC1" | "mono16" => {}
        other => {
            return Err(FrameError::Decode(format!(
                "unsupported depth encoding '{}'",
                other
            )));
        }
    }
    let row_bytes = check_layout(raw, 2)?;

    let mut pixels = Vec::with_capacity(row_bytes / 2 * raw.height as usize);
    for row in raw.data.chunks(raw.step as usize).take(raw.height as usize) {
        for px in row[..row_bytes].chunks_exact(2) {
            let bytes = [px[0], px[1]];
            pixels.push(if raw.is_bigendian {
                u16::from_be_bytes(bytes)
            } else {
                u16::from_le_bytes(bytes)
            });
        }
    }

    DepthImage::from_raw(raw.width, raw.height, pixels)
        .ok_or_else(|| FrameError::Decode("depth buffer size mismatch".to_string()))
}

/// Decode a color payload into RGB8. Grayscale input is expanded to RGB and
/// alpha channels are discarded.
pub fn decode_color(raw: &RawImage) -> Result<ColorImage, FrameError> {
    // (bytes per pixel, channel order mapping to r, g, b)
    let (bpp, order): (u32, [usize; 3]) = match raw.encoding.as_str() {
        "rgb8" => (3, [0, 1, 2]),
        "bgr8" => (3, [2, 1, 0]),
        "rgba8" => (4, [0, 1, 2]),
        "bgra8" => (4, [2, 1, 0]),
        "mono8" | "8UC1" => (1, [0, 0, 0]),
        other => {
            return Err(FrameError::Decode(format!(
                "unsupported color encoding '{}'",
                other
            )));
        }
    };
    let row_bytes = check_layout(raw, bpp)?;

    let mut pixels = Vec::with_capacity(row_bytes / bpp as usize * 3 * raw.height as usize);
    for row in raw.data.chunks(raw.step as usize).take(raw.height as usize) {
        for px in row[..row_bytes].chunks_exact(bpp as usize) {
            pixels.extend(order.iter().map(|&c| px[c]));
        }
    }

    ColorImage::from_raw(raw.width, raw.height, pixels)
        .ok_or_else(|| FrameError::Decode("color buffer size mismatch".to_string()))
}

/// Validate the header against the payload and return the used bytes per row.
fn check_layout(raw: &RawImage, bytes_per_pixel: u32) -> Result<usize, FrameError> {
    if raw.width == 0 || raw.height == 0 {
        return Err(FrameError::Decode("empty image".to_string()));
    }
    let row_bytes = (raw.width as usize)
        .checked_mul(bytes_per_pixel as usize)
        .ok_or_else(|| FrameError::Decode(format!("width {} overflows", raw.width)))?;
    if (raw.step as usize) < row_bytes {
        return Err(FrameError::Decode(format!(
            "row step {} too small for width {} at {} bytes/pixel",
            raw.step, raw.width, bytes_per_pixel
        )));
    }
    let needed = (raw.step as usize)
        .checked_mul(raw.height as usize)
        .ok_or_else(|| FrameError::Decode(format!("height {} overflows", raw.height)))?;
    if raw.data.len() < needed {
        return Err(FrameError::Decode(format!(
            "payload has {} bytes, expected {}",
            raw.data.len(),
            needed
        )));
    }
    Ok(row_bytes)
}
