#![cfg(feature = "backend-opencv")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use opencv::core::{self, Mat, Rect, Size, Vector};
use opencv::objdetect::CascadeClassifier;
use opencv::prelude::*;

use crate::detect::backend::{DetectorParams, FaceDetector};
use crate::detect::result::FaceBox;
use crate::frame::Frame;

/// OpenCV `CascadeClassifier` backend.
///
/// Loads a stock OpenCV cascade XML (e.g. `haarcascade_frontalface_default.xml`)
/// and runs `detectMultiScale` on the luminance plane.
pub struct OpenCvBackend {
    classifier: CascadeClassifier,
    params: DetectorParams,
}

impl OpenCvBackend {
    pub fn new<P: AsRef<Path>>(cascade_path: P, params: DetectorParams) -> Result<Self> {
        let path = cascade_path.as_ref();
        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow!("cascade path is not valid UTF-8: {}", path.display()))?;
        let classifier = CascadeClassifier::new(path_str)
            .with_context(|| format!("failed to load cascade {}", path.display()))?;
        if classifier.empty()? {
            return Err(anyhow!("cascade {} is empty", path.display()));
        }
        Ok(Self { classifier, params })
    }

    fn gray_mat(frame: &Frame) -> Result<Mat> {
        let luma = frame.luma();
        let mut mat = Mat::new_rows_cols_with_default(
            frame.height as i32,
            frame.width as i32,
            core::CV_8UC1,
            core::Scalar::all(0.0),
        )?;
        mat.data_bytes_mut()?.copy_from_slice(&luma);
        Ok(mat)
    }
}

impl FaceDetector for OpenCvBackend {
    fn name(&self) -> &'static str {
        "opencv"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceBox>> {
        let gray = Self::gray_mat(frame)?;
        let mut faces: Vector<Rect> = Vector::new();
        self.classifier
            .detect_multi_scale(
                &gray,
                &mut faces,
                self.params.scale_factor,
                self.params.min_neighbors as i32,
                0,
                Size::new(self.params.min_width as i32, self.params.min_height as i32),
                Size::new(0, 0),
            )
            .context("detectMultiScale failed")?;

        Ok(faces
            .iter()
            .map(|r| {
                FaceBox::new(
                    r.x.max(0) as u32,
                    r.y.max(0) as u32,
                    r.width.max(0) as u32,
                    r.height.max(0) as u32,
                )
            })
            .collect())
    }
}
