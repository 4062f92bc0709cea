//! Camera ingestion.
//!
//! This module provides:
//! - `CameraDriver` / `CameraDevice`: the seam to camera hardware
//! - `CameraRegistry`: probing device indices for cameras that actually stream
//! - `FrameSource`: the single open camera handle of a capture session
//! - Drivers: synthetic in-process cameras (testing, demos) and local V4L2
//!   devices (feature: ingest-v4l2)
//!
//! Device handles are exclusive hardware resources. A handle is released when its
//! `CameraDevice` is dropped; nothing in this module keeps one alive longer than
//! the probe or session that opened it.

use anyhow::Result;

use crate::config::{CameraBackend, CameraSettings};
use crate::frame::Frame;

#[cfg(any(test, feature = "ingest-v4l2"))]
mod normalize;
pub mod registry;
pub mod source;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use registry::{CameraDescriptor, CameraRegistry};
pub use source::FrameSource;
pub use synthetic::{SyntheticBehavior, SyntheticDriver};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Driver;

/// Camera device index.
pub type CameraId = u32;

/// One open camera handle. Dropping it releases the device.
pub trait CameraDevice: Send {
    /// Read the next frame. `Ok(None)` means the device delivered no data this
    /// time (end of stream or a transient glitch).
    fn read(&mut self) -> Result<Option<Frame>>;
}

/// Opens camera handles by index.
pub trait CameraDriver: Send {
    /// Driver identifier.
    fn name(&self) -> &'static str;

    /// Open the device at `index`. Fails when there is no such device or it
    /// refuses to open (including when it is already open).
    fn open(&mut self, index: CameraId) -> Result<Box<dyn CameraDevice>>;
}

/// Build the configured camera driver.
pub fn build_driver(settings: &CameraSettings) -> Result<Box<dyn CameraDriver>> {
    match settings.backend {
        CameraBackend::Synthetic => {
            let mut driver = SyntheticDriver::new(settings.width, settings.height);
            for &index in &settings.synthetic_cameras {
                driver = driver.with_camera(index, SyntheticBehavior::Streaming);
            }
            Ok(Box::new(driver))
        }
        #[cfg(feature = "ingest-v4l2")]
        CameraBackend::V4l2 => Ok(Box::new(V4l2Driver::new(
            settings.width,
            settings.height,
            settings.target_fps,
        ))),
        #[cfg(not(feature = "ingest-v4l2"))]
        CameraBackend::V4l2 => Err(anyhow::anyhow!(
            "v4l2 cameras require the ingest-v4l2 feature (or set camera backend to synthetic)"
        )),
    }
}
