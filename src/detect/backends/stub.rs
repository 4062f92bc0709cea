use std::collections::VecDeque;

use anyhow::Result;

use crate::detect::backend::FaceDetector;
use crate::detect::result::FaceBox;
use crate::frame::Frame;

/// Scripted backend for tests and hardware-free demos.
///
/// Replays the scripted results one call at a time, then falls back to the
/// repeating result (empty unless set).
#[derive(Default)]
pub struct StubBackend {
    script: VecDeque<Vec<FaceBox>>,
    repeat: Vec<FaceBox>,
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script<I>(script: I) -> Self
    where
        I: IntoIterator<Item = Vec<FaceBox>>,
    {
        Self {
            script: script.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn repeating(faces: Vec<FaceBox>) -> Self {
        Self {
            repeat: faces,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl FaceDetector for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<FaceBox>> {
        self.calls += 1;
        Ok(self
            .script
            .pop_front()
            .unwrap_or_else(|| self.repeat.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    #[test]
    fn replays_script_then_repeats() -> Result<()> {
        let frame = Frame::new(vec![0; 4], 2, 2, PixelFormat::Gray8)?;
        let face = FaceBox::new(0, 0, 1, 1);
        let mut backend = StubBackend::with_script([vec![face, face], vec![]]);

        assert_eq!(backend.detect(&frame)?.len(), 2);
        assert!(backend.detect(&frame)?.is_empty());
        assert!(backend.detect(&frame)?.is_empty());
        assert_eq!(backend.calls(), 3);
        Ok(())
    }
}
