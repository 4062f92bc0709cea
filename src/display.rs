//! Display sinks.
//!
//! The pipeline pushes every processed frame, already resized to the display
//! surface, into a `DisplaySink`. Rendering is fire-and-forget: a sink never
//! reports failure back to the pipeline.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};

use crate::frame::Frame;

pub trait DisplaySink: Send {
    fn render(&mut self, frame: Frame);
}

/// Keeps only the most recent frame.
///
/// Clones share the slot, so the UI side keeps one clone and hands another to
/// the pipeline.
#[derive(Clone, Debug, Default)]
pub struct LatestFrameDisplay {
    slot: Arc<Mutex<Option<Frame>>>,
    rendered: Arc<Mutex<u64>>,
}

impl LatestFrameDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<Frame> {
        lock(&self.slot).clone()
    }

    /// Number of frames rendered so far.
    pub fn rendered(&self) -> u64 {
        *lock(&self.rendered)
    }

    /// Write the latest frame to `path` (format from the extension).
    pub fn snapshot_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let frame = self
            .latest()
            .ok_or_else(|| anyhow!("no frame has been displayed yet"))?;
        frame
            .to_rgb_image()
            .save(path)
            .with_context(|| format!("write snapshot {}", path.display()))
    }
}

impl DisplaySink for LatestFrameDisplay {
    fn render(&mut self, frame: Frame) {
        *lock(&self.slot) = Some(frame);
        *lock(&self.rendered) += 1;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    #[test]
    fn clones_share_the_latest_frame() -> Result<()> {
        let display = LatestFrameDisplay::new();
        let mut sink = display.clone();
        assert!(display.latest().is_none());

        sink.render(Frame::new(vec![1u8; 12], 2, 2, PixelFormat::Rgb24)?);
        sink.render(Frame::new(vec![2u8; 12], 2, 2, PixelFormat::Rgb24)?);

        assert_eq!(display.rendered(), 2);
        assert_eq!(display.latest().map(|f| f.as_bytes()[0]), Some(2));
        Ok(())
    }

    #[test]
    fn snapshot_requires_a_frame() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let display = LatestFrameDisplay::new();
        assert!(display.snapshot_to(dir.path().join("empty.png")).is_err());

        display
            .clone()
            .render(Frame::new(vec![200u8; 27], 3, 3, PixelFormat::Rgb24)?);
        let path = dir.path().join("snap.png");
        display.snapshot_to(&path)?;
        assert_eq!(image::open(&path)?.to_rgb8().dimensions(), (3, 3));
        Ok(())
    }
}
