use anyhow::Result;

use crate::detect::result::FaceBox;
use crate::frame::Frame;

/// Multi-scale scan factor between successive window sizes.
pub const DEFAULT_SCALE_FACTOR: f64 = 1.3;
/// Overlapping raw hits required before a cluster is accepted.
pub const DEFAULT_MIN_NEIGHBORS: u32 = 5;
/// Smallest face edge (pixels) the scan considers.
pub const DEFAULT_MIN_SIZE: u32 = 30;

/// Sliding-window tunables shared by the cascade backends.
///
/// A smaller `scale_factor` raises recall and latency; a lower `min_neighbors`
/// raises false positives.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectorParams {
    pub scale_factor: f64,
    pub min_neighbors: u32,
    pub min_width: u32,
    pub min_height: u32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            scale_factor: DEFAULT_SCALE_FACTOR,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
            min_width: DEFAULT_MIN_SIZE,
            min_height: DEFAULT_MIN_SIZE,
        }
    }
}

/// Face detector backend.
///
/// Implementations must be deterministic for a given frame and configuration and
/// must not keep the frame beyond the `detect` call. An empty result means no face
/// was found; `Err` is reserved for frames the backend cannot process at all.
pub trait FaceDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceBox>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
