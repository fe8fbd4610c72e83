//! Capture trait definitions
//!
//! The session never knows what it is recording. It only holds a
//! [`Renderer`] and asks it for a bitmap once per frame.

use serde::{Deserialize, Serialize};

/// Byte order of a captured bitmap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgba,
    Bgra,
}

/// Requested output geometry for one render
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderTarget {
    /// Logical width in points
    pub width: u32,

    /// Logical height in points
    pub height: u32,

    /// Pixels per point (e.g., 2.0 for Retina)
    pub scale: f64,
}

impl RenderTarget {
    /// Pixel dimensions after applying the scale
    pub fn pixel_size(&self) -> (u32, u32) {
        (
            ((self.width as f64 * self.scale).round() as u32).max(1),
            ((self.height as f64 * self.scale).round() as u32).max(1),
        )
    }
}

/// One rendered bitmap
#[derive(Debug, Clone)]
pub struct CapturedImage {
    /// Raw pixel data, 4 bytes per pixel
    pub data: Vec<u8>,

    /// Image width in pixels
    pub width: u32,

    /// Image height in pixels
    pub height: u32,

    /// Bytes per row (may include padding)
    pub bytes_per_row: u32,

    pub format: PixelFormat,
}

impl CapturedImage {
    /// Tightly packed RGBA image
    pub fn rgba(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            data,
            width,
            height,
            bytes_per_row: width * 4,
            format: PixelFormat::Rgba,
        }
    }

    /// Whether the buffer is large enough for the declared geometry
    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.bytes_per_row >= self.width * 4
            && self.data.len() >= (self.bytes_per_row as usize) * (self.height as usize - 1) + self.width as usize * 4
    }
}

/// Produces a bitmap of the current visual state
///
/// Called from the timing loop once per captured frame. Returning `None`
/// drops that frame without advancing the frame clock.
pub trait Renderer: Send + Sync {
    fn render(&self, target: RenderTarget) -> Option<CapturedImage>;
}

impl<F> Renderer for F
where
    F: Fn(RenderTarget) -> Option<CapturedImage> + Send + Sync,
{
    fn render(&self, target: RenderTarget) -> Option<CapturedImage> {
        self(target)
    }
}
