//! In-memory frames.
//!
//! - `Frame`: owned pixel buffer produced by a camera device. One frame lives for
//!   exactly one pipeline iteration.
//! - `PixelFormat`: the layouts a `Frame` may carry after ingest normalization.
//!
//! Annotation, luminance conversion and display resizing live here so every
//! detector backend and sink sees the same pixels.

use anyhow::{anyhow, Result};
use image::{imageops::FilterType, GrayImage, RgbImage};

use crate::detect::FaceBox;

/// Rectangle color drawn around detected faces (RGB, blue).
pub const ANNOTATION_COLOR: [u8; 3] = [0, 0, 255];

/// Rectangle line thickness in pixels.
pub const ANNOTATION_THICKNESS: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Gray8,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Owned image buffer captured from a camera.
///
/// The buffer length always matches `width * height * channels`; this is checked
/// once at construction so downstream code can index without re-validating.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    data: Vec<u8>,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(format.channels()))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        if data.len() != expected {
            return Err(anyhow!(
                "{:?} frame length mismatch: expected {}, got {}",
                format,
                expected,
                data.len()
            ));
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    pub fn from_rgb_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            format: PixelFormat::Rgb24,
            data: image.into_raw(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Pixel at `(x, y)` as a channel slice, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let channels = self.format.channels();
        let offset = (y as usize * self.width as usize + x as usize) * channels;
        self.data.get(offset..offset + channels)
    }

    /// Single-channel luminance plane (BT.601 integer weights).
    pub fn luma(&self) -> Vec<u8> {
        match self.format {
            PixelFormat::Gray8 => self.data.clone(),
            PixelFormat::Rgb24 => self
                .data
                .chunks_exact(3)
                .map(|px| {
                    let y = 77 * px[0] as u32 + 150 * px[1] as u32 + 29 * px[2] as u32 + 128;
                    (y >> 8) as u8
                })
                .collect(),
        }
    }

    pub fn to_rgb_image(&self) -> RgbImage {
        let data = match self.format {
            PixelFormat::Rgb24 => self.data.clone(),
            PixelFormat::Gray8 => self.data.iter().flat_map(|&v| [v, v, v]).collect(),
        };
        // Length was validated at construction.
        RgbImage::from_raw(self.width, self.height, data)
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }

    /// Copy of this frame scaled to `width` x `height`.
    pub fn resized(&self, width: u32, height: u32) -> Frame {
        if width == self.width && height == self.height {
            return self.clone();
        }
        match self.format {
            PixelFormat::Rgb24 => {
                let scaled = image::imageops::resize(
                    &self.to_rgb_image(),
                    width,
                    height,
                    FilterType::Triangle,
                );
                Frame::from_rgb_image(scaled)
            }
            PixelFormat::Gray8 => {
                let gray = GrayImage::from_raw(self.width, self.height, self.data.clone())
                    .unwrap_or_else(|| GrayImage::new(self.width, self.height));
                let scaled = image::imageops::resize(&gray, width, height, FilterType::Triangle);
                Frame {
                    width,
                    height,
                    format: PixelFormat::Gray8,
                    data: scaled.into_raw(),
                }
            }
        }
    }

    /// Draw the outline of `face` in place. Edges are clamped to the frame.
    ///
    /// The rectangle spans `x..=x+width` and `y..=y+height`; the line grows
    /// inward from those edges.
    pub fn draw_box(&mut self, face: &FaceBox) {
        if face.x >= self.width || face.y >= self.height {
            return;
        }
        let t = ANNOTATION_THICKNESS.saturating_sub(1);
        let left = face.x;
        let top = face.y;
        let right = face.x.saturating_add(face.width).min(self.width - 1);
        let bottom = face.y.saturating_add(face.height).min(self.height - 1);

        self.fill_rect(left, top, right, (top + t).min(bottom));
        self.fill_rect(left, bottom.saturating_sub(t).max(top), right, bottom);
        self.fill_rect(left, top, (left + t).min(right), bottom);
        self.fill_rect(right.saturating_sub(t).max(left), top, right, bottom);
    }

    // Inclusive bounds, already clamped by the caller.
    fn fill_rect(&mut self, x0: u32, y0: u32, x1: u32, y1: u32) {
        let channels = self.format.channels();
        let color: [u8; 3] = match self.format {
            PixelFormat::Rgb24 => ANNOTATION_COLOR,
            PixelFormat::Gray8 => {
                let [r, g, b] = ANNOTATION_COLOR;
                let y = (77 * r as u32 + 150 * g as u32 + 29 * b as u32 + 128) >> 8;
                [y as u8; 3]
            }
        };
        let stride = self.width as usize;
        for y in y0..=y1 {
            for x in x0..=x1 {
                let offset = (y as usize * stride + x as usize) * channels;
                self.data[offset..offset + channels].copy_from_slice(&color[..channels]);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_rgb(width: u32, height: u32, value: [u8; 3]) -> Frame {
        let data = value.repeat((width * height) as usize);
        Frame::new(data, width, height, PixelFormat::Rgb24).unwrap()
    }

    #[test]
    fn rejects_mismatched_buffers() {
        assert!(Frame::new(vec![0; 10], 2, 2, PixelFormat::Rgb24).is_err());
        assert!(Frame::new(vec![], 0, 0, PixelFormat::Gray8).is_err());
        assert!(Frame::new(vec![0; 4], 2, 2, PixelFormat::Gray8).is_ok());
    }

    #[test]
    fn luma_uses_bt601_weights() {
        let frame = Frame::new(
            vec![255, 255, 255, 0, 0, 0, 255, 0, 0],
            3,
            1,
            PixelFormat::Rgb24,
        )
        .unwrap();
        assert_eq!(frame.luma(), vec![255, 0, 77]);
    }

    #[test]
    fn draw_box_paints_outline_only() {
        let mut frame = solid_rgb(40, 40, [10, 10, 10]);
        frame.draw_box(&FaceBox::new(5, 5, 20, 20));

        assert_eq!(frame.pixel(5, 5).unwrap(), &ANNOTATION_COLOR);
        assert_eq!(frame.pixel(25, 25).unwrap(), &ANNOTATION_COLOR);
        assert_eq!(frame.pixel(6, 15).unwrap(), &ANNOTATION_COLOR);
        assert_eq!(frame.pixel(15, 15).unwrap(), &[10, 10, 10]);
        assert_eq!(frame.pixel(4, 4).unwrap(), &[10, 10, 10]);
    }

    #[test]
    fn draw_box_clamps_to_frame() {
        let mut frame = solid_rgb(16, 16, [0, 0, 0]);
        frame.draw_box(&FaceBox::new(10, 10, 30, 30));
        assert_eq!(frame.pixel(15, 15).unwrap(), &ANNOTATION_COLOR);

        let before = frame.clone();
        frame.draw_box(&FaceBox::new(40, 40, 5, 5));
        assert_eq!(frame, before);
    }

    #[test]
    fn resized_keeps_solid_color() {
        let frame = solid_rgb(64, 48, [200, 100, 50]);
        let small = frame.resized(16, 12);
        assert_eq!(small.width, 16);
        assert_eq!(small.height, 12);
        assert_eq!(small.pixel(8, 6).unwrap(), &[200, 100, 50]);
        assert_eq!(frame.resized(64, 48), frame);
    }
}
