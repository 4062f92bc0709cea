use std::path::Path;

use anyhow::{anyhow, Result};

use crate::detect::backend::{DetectorParams, FaceDetector};
use crate::detect::cascade::CascadeModel;
use crate::detect::grouping::{group_rectangles, GROUP_EPS};
use crate::detect::integral::IntegralImage;
use crate::detect::result::FaceBox;
use crate::frame::Frame;

/// Pure-Rust Haar cascade backend.
///
/// Runs on the luminance plane: integral images, multi-scale window scan, then
/// neighbor grouping.
pub struct HaarBackend {
    model: CascadeModel,
    params: DetectorParams,
}

impl HaarBackend {
    pub fn new(model: CascadeModel, params: DetectorParams) -> Result<Self> {
        model.validate()?;
        if params.scale_factor <= 1.0 {
            return Err(anyhow!(
                "scale factor must be greater than 1.0 (got {})",
                params.scale_factor
            ));
        }
        Ok(Self { model, params })
    }

    /// Load an OpenCV XML or JSON cascade model from disk.
    pub fn from_path<P: AsRef<Path>>(path: P, params: DetectorParams) -> Result<Self> {
        Self::new(CascadeModel::from_path(path)?, params)
    }
}

impl FaceDetector for HaarBackend {
    fn name(&self) -> &'static str {
        "haar"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceBox>> {
        let luma = frame.luma();
        let ii = IntegralImage::new(&luma, frame.width, frame.height);
        let hits = self.model.scan(&ii, &self.params);
        let faces = group_rectangles(&hits, self.params.min_neighbors, GROUP_EPS);
        log::debug!(
            "haar: {} raw hits -> {} faces ({}x{})",
            hits.len(),
            faces.len(),
            frame.width,
            frame.height
        );
        Ok(faces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::cascade::tests::{split_block, split_cascade};
    use crate::frame::PixelFormat;

    fn params() -> DetectorParams {
        DetectorParams {
            scale_factor: 1.1,
            min_neighbors: 3,
            min_width: 20,
            min_height: 20,
        }
    }

    #[test]
    fn finds_the_pattern_once() -> Result<()> {
        let mut backend = HaarBackend::new(split_cascade(24), params())?;
        let luma = split_block(96, 96, (30, 30), 24);
        let frame = Frame::new(luma, 96, 96, PixelFormat::Gray8)?;

        let faces = backend.detect(&frame)?;
        assert_eq!(faces.len(), 1);
        let face = faces[0];
        assert!(face.x.abs_diff(30) <= 8, "x={}", face.x);
        assert!(face.y.abs_diff(30) <= 8, "y={}", face.y);
        Ok(())
    }

    #[test]
    fn blank_frame_yields_nothing() -> Result<()> {
        let mut backend = HaarBackend::new(split_cascade(24), params())?;
        let frame = Frame::new(vec![0; 64 * 64 * 3], 64, 64, PixelFormat::Rgb24)?;
        assert!(backend.detect(&frame)?.is_empty());
        Ok(())
    }

    #[test]
    fn detection_is_deterministic() -> Result<()> {
        let mut backend = HaarBackend::new(split_cascade(24), params())?;
        let frame = Frame::new(split_block(80, 80, (10, 40), 24), 80, 80, PixelFormat::Gray8)?;
        assert_eq!(backend.detect(&frame)?, backend.detect(&frame)?);
        Ok(())
    }

    #[test]
    fn rejects_non_growing_scale() {
        let bad = DetectorParams {
            scale_factor: 1.0,
            ..params()
        };
        assert!(HaarBackend::new(split_cascade(24), bad).is_err());
    }
}
