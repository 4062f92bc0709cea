//! Synthetic camera driver.
//!
//! In-process virtual cameras for tests and hardware-free demos. The driver is a
//! cheap handle over shared state, so a test can keep a clone after handing the
//! driver to a pipeline and still script failures or inspect open handles.
//!
//! Cameras honour the same rules as real devices:
//! - a camera can be opened by one holder at a time
//! - a "silent" camera opens but never delivers a frame
//! - dropping the device releases it

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};

use crate::frame::{Frame, PixelFormat};
use crate::ingest::{CameraDevice, CameraDriver, CameraId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyntheticBehavior {
    /// Opens and delivers frames.
    Streaming,
    /// Opens but returns no data.
    Silent,
    /// Refuses to open.
    Refuses,
}

#[derive(Debug)]
struct SyntheticCamera {
    behavior: SyntheticBehavior,
    pending_failures: u32,
    frames: u64,
}

#[derive(Debug, Default)]
struct SyntheticState {
    cameras: BTreeMap<CameraId, SyntheticCamera>,
    open: BTreeSet<CameraId>,
    total_opens: u64,
}

#[derive(Clone, Debug)]
pub struct SyntheticDriver {
    state: Arc<Mutex<SyntheticState>>,
    width: u32,
    height: u32,
}

impl SyntheticDriver {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(SyntheticState::default())),
            width,
            height,
        }
    }

    pub fn with_camera(self, index: CameraId, behavior: SyntheticBehavior) -> Self {
        self.set_behavior(index, behavior);
        self
    }

    /// Change (or add) a camera's behavior; affects open handles on their next read.
    pub fn set_behavior(&self, index: CameraId, behavior: SyntheticBehavior) {
        let mut state = self.lock();
        state
            .cameras
            .entry(index)
            .and_modify(|cam| cam.behavior = behavior)
            .or_insert(SyntheticCamera {
                behavior,
                pending_failures: 0,
                frames: 0,
            });
    }

    /// Make the next `count` reads on `index` return no data.
    pub fn fail_reads(&self, index: CameraId, count: u32) {
        if let Some(cam) = self.lock().cameras.get_mut(&index) {
            cam.pending_failures += count;
        }
    }

    pub fn open_handles(&self) -> usize {
        self.lock().open.len()
    }

    pub fn is_open(&self, index: CameraId) -> bool {
        self.lock().open.contains(&index)
    }

    pub fn total_opens(&self) -> u64 {
        self.lock().total_opens
    }

    pub fn frames_delivered(&self, index: CameraId) -> u64 {
        self.lock().cameras.get(&index).map_or(0, |cam| cam.frames)
    }

    fn lock(&self) -> MutexGuard<'_, SyntheticState> {
        // State stays consistent across a panicking test thread.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CameraDriver for SyntheticDriver {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open(&mut self, index: CameraId) -> Result<Box<dyn CameraDevice>> {
        let mut state = self.lock();
        match state.cameras.get(&index).map(|cam| cam.behavior) {
            None | Some(SyntheticBehavior::Refuses) => {
                return Err(anyhow!("no synthetic camera at index {}", index))
            }
            Some(_) => {}
        }
        if !state.open.insert(index) {
            return Err(anyhow!("synthetic camera {} is busy", index));
        }
        state.total_opens += 1;
        log::debug!("SyntheticDriver: opened camera {}", index);
        Ok(Box::new(SyntheticDevice {
            index,
            state: Arc::clone(&self.state),
            width: self.width,
            height: self.height,
        }))
    }
}

struct SyntheticDevice {
    index: CameraId,
    state: Arc<Mutex<SyntheticState>>,
    width: u32,
    height: u32,
}

impl SyntheticDevice {
    /// Moving diagonal gradient so consecutive frames differ.
    fn pixels(&self, frame_count: u64) -> Vec<u8> {
        let pixel_count = (self.width * self.height * 3) as usize;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 / 3 + frame_count + self.index as u64) % 256) as u8;
        }
        pixels
    }
}

impl CameraDevice for SyntheticDevice {
    fn read(&mut self) -> Result<Option<Frame>> {
        let frame_count = {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            let Some(cam) = state.cameras.get_mut(&self.index) else {
                return Ok(None);
            };
            if cam.behavior != SyntheticBehavior::Streaming {
                return Ok(None);
            }
            if cam.pending_failures > 0 {
                cam.pending_failures -= 1;
                return Ok(None);
            }
            cam.frames += 1;
            cam.frames
        };
        let frame = Frame::new(
            self.pixels(frame_count),
            self.width,
            self.height,
            PixelFormat::Rgb24,
        )?;
        Ok(Some(frame))
    }
}

impl Drop for SyntheticDevice {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.open.remove(&self.index);
        log::debug!("SyntheticDriver: released camera {}", self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_is_exclusive_until_dropped() -> Result<()> {
        let mut driver = SyntheticDriver::new(8, 8).with_camera(0, SyntheticBehavior::Streaming);
        let first = driver.open(0)?;
        assert!(driver.open(0).is_err());
        drop(first);
        assert!(driver.open(0).is_ok());
        assert_eq!(driver.total_opens(), 2);
        Ok(())
    }

    #[test]
    fn silent_camera_opens_without_frames() -> Result<()> {
        let mut driver = SyntheticDriver::new(8, 8).with_camera(4, SyntheticBehavior::Silent);
        let mut device = driver.open(4)?;
        assert!(device.read()?.is_none());
        Ok(())
    }

    #[test]
    fn consecutive_frames_differ() -> Result<()> {
        let mut driver = SyntheticDriver::new(8, 8).with_camera(1, SyntheticBehavior::Streaming);
        let mut device = driver.open(1)?;
        let a = device.read()?.expect("frame");
        let b = device.read()?.expect("frame");
        assert_ne!(a, b);
        assert_eq!(driver.frames_delivered(1), 2);
        Ok(())
    }
}
