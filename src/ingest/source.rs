use crate::error::CaptureError;
use crate::frame::Frame;
use crate::ingest::{CameraDevice, CameraDriver, CameraId, CameraRegistry};

/// The open camera handle of a capture session.
///
/// `close` is idempotent and also runs on drop, so a handle cannot outlive the
/// source that owns it.
pub struct FrameSource {
    camera_id: CameraId,
    device: Option<Box<dyn CameraDevice>>,
    frames_captured: u64,
}

impl FrameSource {
    /// Open `camera_id`. The id must be part of the registry's last enumeration.
    pub fn open(
        driver: &mut dyn CameraDriver,
        registry: &CameraRegistry,
        camera_id: CameraId,
    ) -> Result<Self, CaptureError> {
        if !registry.contains(camera_id) {
            return Err(CaptureError::DeviceUnavailable {
                camera_id,
                reason: "not in the last camera enumeration".to_string(),
            });
        }
        let device = driver
            .open(camera_id)
            .map_err(|err| CaptureError::DeviceUnavailable {
                camera_id,
                reason: format!("{:#}", err),
            })?;
        log::info!("FrameSource: opened camera {} ({})", camera_id, driver.name());
        Ok(Self {
            camera_id,
            device: Some(device),
            frames_captured: 0,
        })
    }

    pub fn camera_id(&self) -> CameraId {
        self.camera_id
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured
    }

    /// Pull the next frame. Any failure is reported as `CaptureFailed`; whether
    /// to retry is the caller's decision.
    pub fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let camera_id = self.camera_id;
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| CaptureError::CaptureFailed {
                camera_id,
                reason: "source is closed".to_string(),
            })?;
        match device.read() {
            Ok(Some(frame)) => {
                self.frames_captured += 1;
                Ok(frame)
            }
            Ok(None) => Err(CaptureError::CaptureFailed {
                camera_id,
                reason: "device returned no data".to_string(),
            }),
            Err(err) => Err(CaptureError::CaptureFailed {
                camera_id,
                reason: format!("{:#}", err),
            }),
        }
    }

    /// Release the device handle. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.device.take().is_some() {
            log::info!(
                "FrameSource: released camera {} after {} frames",
                self.camera_id,
                self.frames_captured
            );
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::ingest::{SyntheticBehavior, SyntheticDriver};

    fn enumerated(driver: &mut SyntheticDriver) -> CameraRegistry {
        let mut registry = CameraRegistry::new();
        registry.enumerate(driver, 4, None);
        registry
    }

    #[test]
    fn open_requires_enumerated_id() {
        let mut driver = SyntheticDriver::new(16, 16).with_camera(1, SyntheticBehavior::Streaming);
        let registry = CameraRegistry::new();

        let err = FrameSource::open(&mut driver, &registry, 1).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::DeviceUnavailable);
        assert_eq!(driver.open_handles(), 0);
    }

    #[test]
    fn open_fails_when_device_refuses() {
        let mut driver = SyntheticDriver::new(16, 16).with_camera(1, SyntheticBehavior::Streaming);
        let registry = enumerated(&mut driver);
        driver.set_behavior(1, SyntheticBehavior::Refuses);

        let err = FrameSource::open(&mut driver, &registry, 1).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::DeviceUnavailable);
    }

    #[test]
    fn read_then_close_is_idempotent() -> anyhow::Result<()> {
        let mut driver = SyntheticDriver::new(16, 16).with_camera(2, SyntheticBehavior::Streaming);
        let registry = enumerated(&mut driver);
        let mut source = FrameSource::open(&mut driver, &registry, 2)?;

        let frame = source.read_frame()?;
        assert_eq!((frame.width, frame.height), (16, 16));
        assert_eq!(source.frames_captured(), 1);
        assert_eq!(driver.open_handles(), 1);

        source.close();
        source.close();
        assert!(!source.is_open());
        assert_eq!(driver.open_handles(), 0);
        assert_eq!(
            source.read_frame().err().map(|e| e.kind()),
            Some(ErrorKind::CaptureFailed)
        );
        Ok(())
    }

    #[test]
    fn empty_read_is_capture_failed() -> anyhow::Result<()> {
        let mut driver = SyntheticDriver::new(16, 16).with_camera(0, SyntheticBehavior::Streaming);
        let registry = enumerated(&mut driver);
        let mut source = FrameSource::open(&mut driver, &registry, 0)?;
        driver.fail_reads(0, 1);

        assert_eq!(
            source.read_frame().err().map(|e| e.kind()),
            Some(ErrorKind::CaptureFailed)
        );
        assert!(source.read_frame().is_ok());
        Ok(())
    }

    #[test]
    fn drop_releases_handle() -> anyhow::Result<()> {
        let mut driver = SyntheticDriver::new(16, 16).with_camera(0, SyntheticBehavior::Streaming);
        let registry = enumerated(&mut driver);
        {
            let _source = FrameSource::open(&mut driver, &registry, 0)?;
            assert_eq!(driver.open_handles(), 1);
        }
        assert_eq!(driver.open_handles(), 0);
        Ok(())
    }
}
