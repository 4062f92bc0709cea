//! V4L2 camera driver.
//!
//! Opens local device nodes (`/dev/video{index}`) through libv4l and streams
//! frames from memory-mapped buffers. Frames are normalized to RGB24 before they
//! leave this module; RGB3, YUYV and NV12 device formats are understood.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelLayout};
use crate::frame::{Frame, PixelFormat};
use crate::ingest::{CameraDevice, CameraDriver, CameraId};

const STREAM_BUFFERS: u32 = 4;

/// Driver for local V4L2 devices.
#[derive(Clone, Debug)]
pub struct V4l2Driver {
    width: u32,
    height: u32,
    target_fps: u32,
}

impl V4l2Driver {
    pub fn new(width: u32, height: u32, target_fps: u32) -> Self {
        Self {
            width,
            height,
            target_fps,
        }
    }

    fn device_path(index: CameraId) -> String {
        format!("/dev/video{}", index)
    }
}

impl CameraDriver for V4l2Driver {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn open(&mut self, index: CameraId) -> Result<Box<dyn CameraDevice>> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let path = Self::device_path(index);
        let mut device = v4l::Device::with_path(&path)
            .with_context(|| format!("open v4l2 device {}", path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.width;
        format.height = self.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Driver: failed to set format on {}: {}", path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let layout = layout_for(&format.fourcc.repr)
            .ok_or_else(|| anyhow!("{}: unsupported pixel format {}", path, format.fourcc))?;

        if self.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Driver: failed to set fps on {}: {}", path, err);
            }
        }

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Driver: opened {} ({}x{} {})",
            path,
            format.width,
            format.height,
            format.fourcc
        );
        Ok(Box::new(V4l2Device {
            path,
            state,
            width: format.width,
            height: format.height,
            layout,
        }))
    }
}

fn layout_for(fourcc: &[u8; 4]) -> Option<PixelLayout> {
    match fourcc {
        b"RGB3" => Some(PixelLayout::Rgb24),
        b"YUYV" => Some(PixelLayout::Yuyv),
        b"NV12" => Some(PixelLayout::Nv12),
        _ => None,
    }
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

struct V4l2Device {
    path: String,
    state: V4l2State,
    width: u32,
    height: u32,
    layout: PixelLayout,
}

impl CameraDevice for V4l2Device {
    fn read(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let (width, height, layout) = (self.width, self.height, self.layout);
        let pixels = self.state.with_mut(|fields| -> Result<Option<Vec<u8>>> {
            let (buf, meta) = fields.stream.next().context("capture v4l2 frame")?;
            let used = (meta.bytesused as usize).min(buf.len());
            if used == 0 {
                return Ok(None);
            }
            normalize_to_rgb(&buf[..used], width, height, layout).map(Some)
        });
        match pixels.with_context(|| format!("read {}", self.path))? {
            Some(pixels) => Ok(Some(Frame::new(pixels, width, height, PixelFormat::Rgb24)?)),
            None => Ok(None),
        }
    }
}

impl Drop for V4l2Device {
    fn drop(&mut self) {
        log::debug!("V4l2Driver: closed {}", self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_fourccs_map_to_layouts() {
        assert_eq!(layout_for(b"RGB3"), Some(PixelLayout::Rgb24));
        assert_eq!(layout_for(b"YUYV"), Some(PixelLayout::Yuyv));
        assert_eq!(layout_for(b"NV12"), Some(PixelLayout::Nv12));
        assert_eq!(layout_for(b"MJPG"), None);
    }

    #[test]
    fn device_paths_follow_index() {
        assert_eq!(V4l2Driver::device_path(3), "/dev/video3");
    }
}
