//! Encodable samples
//!
//! What the sink adapters hand to the container writer and the live fan-out.

use image::imageops::{self, FilterType};
use image::RgbaImage;
use std::sync::Arc;

use crate::audio::PcmBuffer;
use crate::capture::{CapturedImage, PixelFormat};
use crate::utils::time::MediaTime;

/// Tightly packed RGBA frame at the session's output size
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Arc<[u8]>,
}

impl PixelBuffer {
    /// Solid-color frame
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data: Vec<u8> = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self {
            width,
            height,
            data: data.into(),
        }
    }

    /// Convert a captured bitmap, resizing it to `width` x `height`
    ///
    /// Returns `None` for images whose buffer doesn't match their geometry.
    pub fn from_image(image: &CapturedImage, width: u32, height: u32) -> Option<Self> {
        if !image.is_well_formed() || width == 0 || height == 0 {
            return None;
        }

        let stride = image.bytes_per_row as usize;
        let row_bytes = image.width as usize * 4;
        let mut packed = Vec::with_capacity(row_bytes * image.height as usize);
        for row in image.data.chunks(stride).take(image.height as usize) {
            let row = &row[..row_bytes];
            match image.format {
                PixelFormat::Rgba => packed.extend_from_slice(row),
                PixelFormat::Bgra => {
                    for px in row.chunks_exact(4) {
                        packed.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
                    }
                }
            }
        }

        if image.width == width && image.height == height {
            return Some(Self {
                width,
                height,
                data: packed.into(),
            });
        }

        let source = RgbaImage::from_raw(image.width, image.height, packed)?;
        let resized = imageops::resize(&source, width, height, FilterType::Triangle);
        Some(Self {
            width,
            height,
            data: resized.into_raw().into(),
        })
    }

    /// Bytes in one frame
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// Container-ready sample mirrored to live destinations
#[derive(Debug, Clone)]
pub enum MediaSample {
    Video { frame: PixelBuffer, time: MediaTime },
    Audio { buffer: PcmBuffer, time: MediaTime },
}

impl MediaSample {
    pub fn time(&self) -> MediaTime {
        match self {
            Self::Video { time, .. } | Self::Audio { time, .. } => *time,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bgra_is_swizzled() {
        let image = CapturedImage {
            data: vec![1, 2, 3, 4],
            width: 1,
            height: 1,
            bytes_per_row: 4,
            format: PixelFormat::Bgra,
        };
        let frame = PixelBuffer::from_image(&image, 1, 1).unwrap();
        assert_eq!(&*frame.data, &[3, 2, 1, 4]);
    }

    #[test]
    fn test_row_padding_is_stripped() {
        // 1x2 image with 4 bytes of padding per row
        let image = CapturedImage {
            data: vec![10, 11, 12, 13, 0, 0, 0, 0, 20, 21, 22, 23],
            width: 1,
            height: 2,
            bytes_per_row: 8,
            format: PixelFormat::Rgba,
        };
        let frame = PixelBuffer::from_image(&image, 1, 2).unwrap();
        assert_eq!(&*frame.data, &[10, 11, 12, 13, 20, 21, 22, 23]);
    }

    #[test]
    fn test_resize_to_output_size() {
        let image = CapturedImage::rgba(4, 4, vec![7; 64]);
        let frame = PixelBuffer::from_image(&image, 2, 2).unwrap();
        assert_eq!(frame.frame_size(), 16);
        assert_eq!(frame.data.len(), 16);
        assert!(frame.data.iter().all(|b| *b == 7));

        let upscaled = PixelBuffer::from_image(&image, 8, 6).unwrap();
        assert_eq!(upscaled.data.len(), 8 * 6 * 4);
    }

    #[test]
    fn test_padded_bgra_is_swizzled_before_resize() {
        // 2x2 BGRA, 12 bytes per row, every pixel blue
        let row = [255, 0, 0, 255, 255, 0, 0, 255, 0, 0, 0, 0];
        let image = CapturedImage {
            data: [row, row].concat(),
            width: 2,
            height: 2,
            bytes_per_row: 12,
            format: PixelFormat::Bgra,
        };
        let frame = PixelBuffer::from_image(&image, 1, 1).unwrap();
        assert_eq!(&*frame.data, &[0, 0, 255, 255]);
    }

    #[test]
    fn test_malformed_image_is_rejected() {
        let image = CapturedImage::rgba(4, 4, vec![0; 3]);
        assert!(PixelBuffer::from_image(&image, 4, 4).is_none());
    }

    #[test]
    fn test_filled() {
        let frame = PixelBuffer::filled(2, 1, [1, 2, 3, 4]);
        assert_eq!(&*frame.data, &[1, 2, 3, 4, 1, 2, 3, 4]);
    }
}
