//! Haar-like boosted cascade model and its multi-scale window scan.
//!
//! `from_path` accepts OpenCV's XML cascades (the stock
//! `haarcascade_frontalface_default.xml` and friends, see `cascade_xml`) and a
//! compact JSON form of the same model:
//!
//! ```json
//! {
//!   "window_width": 24,
//!   "window_height": 24,
//!   "stages": [
//!     {
//!       "threshold": 0.82,
//!       "stumps": [
//!         {
//!           "rects": [
//!             { "x": 6, "y": 4, "width": 12, "height": 9, "weight": -1.0 },
//!             { "x": 6, "y": 7, "width": 12, "height": 3, "weight": 3.0 }
//!           ],
//!           "threshold": -0.031,
//!           "left": 0.84,
//!           "right": -0.25
//!         }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! Rectangle coordinates are in model-window pixels. A stump votes `left` when
//! its normalized response is below `threshold * window_stddev`, `right`
//! otherwise; a stage passes when the vote sum reaches the stage threshold.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::detect::backend::DetectorParams;
use crate::detect::cascade_xml::parse_opencv_cascade;
use crate::detect::integral::IntegralImage;
use crate::detect::result::FaceBox;

#[derive(Clone, Debug, Deserialize)]
pub struct CascadeModel {
    pub window_width: u32,
    pub window_height: u32,
    pub stages: Vec<CascadeStage>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CascadeStage {
    pub threshold: f64,
    pub stumps: Vec<HaarStump>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct HaarStump {
    pub rects: Vec<WeightedRect>,
    pub threshold: f64,
    pub left: f64,
    pub right: f64,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct WeightedRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub weight: f64,
}

impl CascadeModel {
    /// Load and validate a model file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read cascade model {}", path.display()))?;
        let parsed = if raw.trim_start().starts_with('<') {
            parse_opencv_cascade(&raw)
        } else {
            serde_json::from_str::<CascadeModel>(&raw).map_err(anyhow::Error::new)
        };
        let model =
            parsed.with_context(|| format!("invalid cascade model {}", path.display()))?;
        model.validate()?;
        log::debug!(
            "cascade {}: {}x{} window, {} stages",
            path.display(),
            model.window_width,
            model.window_height,
            model.stages.len()
        );
        Ok(model)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_width == 0 || self.window_height == 0 {
            return Err(anyhow!("cascade window must be non-zero"));
        }
        if self.stages.is_empty() {
            return Err(anyhow!("cascade has no stages"));
        }
        for (s, stage) in self.stages.iter().enumerate() {
            if stage.stumps.is_empty() {
                return Err(anyhow!("cascade stage {} has no stumps", s));
            }
            for stump in &stage.stumps {
                if stump.rects.len() < 2 {
                    return Err(anyhow!(
                        "cascade stage {}: features need at least two rectangles",
                        s
                    ));
                }
                for r in &stump.rects {
                    if r.width == 0
                        || r.height == 0
                        || r.x + r.width > self.window_width
                        || r.y + r.height > self.window_height
                    {
                        return Err(anyhow!(
                            "cascade stage {}: rectangle {:?} outside {}x{} window",
                            s,
                            r,
                            self.window_width,
                            self.window_height
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Raw window hits over all scales, before neighbor grouping.
    pub(crate) fn scan(&self, ii: &IntegralImage, params: &DetectorParams) -> Vec<FaceBox> {
        let mut hits = Vec::new();
        let mut factor = 1.0f64;
        loop {
            let win_w = (self.window_width as f64 * factor).round() as u32;
            let win_h = (self.window_height as f64 * factor).round() as u32;
            if win_w > ii.width() || win_h > ii.height() {
                break;
            }
            if win_w >= params.min_width && win_h >= params.min_height {
                let scaled = ScaledCascade::new(self, factor, win_w, win_h);
                // Stride in scaled-image pixels is 2 up to factor 2, then 1.
                let step = if factor > 2.0 { factor } else { 2.0 * factor };
                let step = (step.round() as u32).max(1);
                let mut y = 0;
                while y + win_h <= ii.height() {
                    let mut x = 0;
                    while x + win_w <= ii.width() {
                        if scaled.accepts(ii, x, y) {
                            hits.push(FaceBox::new(x, y, win_w, win_h));
                        }
                        x += step;
                    }
                    y += step;
                }
            }
            if params.scale_factor <= 1.0 {
                break;
            }
            factor *= params.scale_factor;
        }
        hits
    }
}

// ----------------------------------------------------------------------------
// Per-scale evaluation
// ----------------------------------------------------------------------------

struct ScaledRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    weight: f64,
}

struct ScaledStump {
    rects: Vec<ScaledRect>,
    threshold: f64,
    left: f64,
    right: f64,
}

struct ScaledStage {
    threshold: f64,
    stumps: Vec<ScaledStump>,
}

/// Cascade with rectangles scaled to one window size and weights folded with
/// the inverse window area.
struct ScaledCascade {
    win_w: u32,
    win_h: u32,
    inv_area: f64,
    stages: Vec<ScaledStage>,
}

impl ScaledCascade {
    fn new(model: &CascadeModel, factor: f64, win_w: u32, win_h: u32) -> Self {
        let inv_area = 1.0 / (win_w as f64 * win_h as f64);
        let stages = model
            .stages
            .iter()
            .map(|stage| ScaledStage {
                threshold: stage.threshold,
                stumps: stage
                    .stumps
                    .iter()
                    .map(|stump| ScaledStump {
                        rects: scale_rects(&stump.rects, factor, win_w, win_h, inv_area),
                        threshold: stump.threshold,
                        left: stump.left,
                        right: stump.right,
                    })
                    .collect(),
            })
            .collect();
        Self {
            win_w,
            win_h,
            inv_area,
            stages,
        }
    }

    fn accepts(&self, ii: &IntegralImage, x: u32, y: u32) -> bool {
        let sum = ii.rect_sum(x, y, self.win_w, self.win_h) as f64;
        let sq_sum = ii.rect_sq_sum(x, y, self.win_w, self.win_h) as f64;
        let mean = sum * self.inv_area;
        let variance = sq_sum * self.inv_area - mean * mean;
        let norm = if variance > 0.0 { variance.sqrt() } else { 1.0 };

        for stage in &self.stages {
            let mut votes = 0.0;
            for stump in &stage.stumps {
                let response: f64 = stump
                    .rects
                    .iter()
                    .map(|r| {
                        r.weight * ii.rect_sum(x + r.x, y + r.y, r.width, r.height) as f64
                    })
                    .sum();
                votes += if response < stump.threshold * norm {
                    stump.left
                } else {
                    stump.right
                };
            }
            if votes < stage.threshold {
                return false;
            }
        }
        true
    }
}

fn scale_rects(
    rects: &[WeightedRect],
    factor: f64,
    win_w: u32,
    win_h: u32,
    inv_area: f64,
) -> Vec<ScaledRect> {
    let mut scaled: Vec<ScaledRect> = rects
        .iter()
        .map(|r| {
            let x = ((r.x as f64 * factor).round() as u32).min(win_w - 1);
            let y = ((r.y as f64 * factor).round() as u32).min(win_h - 1);
            let width = ((r.width as f64 * factor).round() as u32)
                .clamp(1, win_w - x);
            let height = ((r.height as f64 * factor).round() as u32)
                .clamp(1, win_h - y);
            ScaledRect {
                x,
                y,
                width,
                height,
                weight: r.weight * inv_area,
            }
        })
        .collect();

    // Rounding changes rectangle areas; re-balance the first weight so the
    // feature stays zero-sum over a flat window.
    let rest: f64 = scaled
        .iter()
        .skip(1)
        .map(|r| r.weight * r.width as f64 * r.height as f64)
        .sum();
    if let Some(first) = scaled.first_mut() {
        first.weight = -rest / (first.width as f64 * first.height as f64);
    }
    scaled
}
