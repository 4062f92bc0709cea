//! Frame persistence.
//!
//! `FrameSink` writes annotated frames as PNG files named after the local time
//! of the save, at second granularity: `EyeWatch_YYYYMMDD_HHMMSS.png`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDateTime;

use crate::error::SaveError;
use crate::frame::Frame;

const FILE_PREFIX: &str = "EyeWatch_";
const FILE_EXTENSION: &str = "png";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Writes frames into a save directory.
///
/// By default two saves within the same second share a filename and the later
/// one replaces the earlier. With `unique_filenames` the later one gets a
/// `_1`, `_2`, ... suffix instead.
#[derive(Clone)]
pub struct FrameSink {
    clock: Clock,
    unique_filenames: bool,
}

impl FrameSink {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(|| chrono::Local::now().naive_local()),
            unique_filenames: false,
        }
    }

    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> NaiveDateTime + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn unique_filenames(mut self, enabled: bool) -> Self {
        self.unique_filenames = enabled;
        self
    }

    /// Filename for a save made at `at`.
    pub fn file_name(at: NaiveDateTime) -> String {
        format!(
            "{}{}.{}",
            FILE_PREFIX,
            at.format(TIMESTAMP_FORMAT),
            FILE_EXTENSION
        )
    }

    /// Persist `frame` under `directory`, creating the directory if needed.
    ///
    /// An empty (or all-whitespace) directory is rejected before anything on
    /// disk is touched.
    pub fn save(&self, frame: &Frame, directory: &str) -> Result<PathBuf, SaveError> {
        let directory = directory.trim();
        if directory.is_empty() {
            return Err(SaveError::NoSaveLocationConfigured);
        }
        let directory = Path::new(directory);
        std::fs::create_dir_all(directory).map_err(|source| SaveError::DirectoryCreateFailed {
            path: directory.to_path_buf(),
            source,
        })?;

        let path = self.target_path(directory, (self.clock)());
        frame
            .to_rgb_image()
            .save_with_format(&path, image::ImageFormat::Png)
            .with_context(|| format!("encode png ({}x{})", frame.width, frame.height))
            .map_err(|source| SaveError::WriteFailed {
                path: path.clone(),
                source,
            })?;
        log::debug!("FrameSink: wrote {}", path.display());
        Ok(path)
    }

    fn target_path(&self, directory: &Path, at: NaiveDateTime) -> PathBuf {
        let base = directory.join(Self::file_name(at));
        if !self.unique_filenames || !base.exists() {
            return base;
        }
        let stem = format!("{}{}", FILE_PREFIX, at.format(TIMESTAMP_FORMAT));
        (1u32..)
            .map(|n| directory.join(format!("{}_{}.{}", stem, n, FILE_EXTENSION)))
            .find(|candidate| !candidate.exists())
            .unwrap_or(base)
    }
}

impl Default for FrameSink {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSink")
            .field("unique_filenames", &self.unique_filenames)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::frame::PixelFormat;
    use chrono::NaiveDate;

    fn fixed_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|d| d.and_hms_opt(14, 5, 7))
            .expect("valid timestamp")
    }

    fn frame() -> Frame {
        Frame::new(vec![90u8; 4 * 3 * 3], 4, 3, PixelFormat::Rgb24).expect("frame")
    }

    #[test]
    fn file_name_uses_second_granularity() {
        assert_eq!(FrameSink::file_name(fixed_time()), "EyeWatch_20240309_140507.png");
    }

    #[test]
    fn blank_directory_is_rejected() {
        let sink = FrameSink::new();
        let err = sink.save(&frame(), "   ").expect_err("blank directory");
        assert_eq!(err.kind(), ErrorKind::NoSaveLocationConfigured);
    }

    #[test]
    fn creates_nested_directory_and_writes_png() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("a").join("b");
        let sink = FrameSink::new().with_clock(fixed_time);

        let path = sink.save(&frame(), &target.to_string_lossy())?;
        assert_eq!(path, target.join("EyeWatch_20240309_140507.png"));
        let decoded = image::open(&path)?.to_rgb8();
        assert_eq!(decoded.dimensions(), (4, 3));
        assert_eq!(decoded.get_pixel(0, 0).0, [90, 90, 90]);
        Ok(())
    }

    #[test]
    fn same_second_overwrites_unless_unique() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let location = dir.path().to_string_lossy().to_string();

        let sink = FrameSink::new().with_clock(fixed_time);
        let first = sink.save(&frame(), &location)?;
        let second = sink.save(&frame(), &location)?;
        assert_eq!(first, second);
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);

        let sink = sink.unique_filenames(true);
        let third = sink.save(&frame(), &location)?;
        let fourth = sink.save(&frame(), &location)?;
        assert_eq!(third, dir.path().join("EyeWatch_20240309_140507_1.png"));
        assert_eq!(fourth, dir.path().join("EyeWatch_20240309_140507_2.png"));
        Ok(())
    }

    #[test]
    fn directory_blocked_by_file_fails_to_create() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory")?;

        let sink = FrameSink::new();
        let err = sink
            .save(&frame(), &blocker.join("inner").to_string_lossy())
            .expect_err("file in the way");
        assert_eq!(err.kind(), ErrorKind::DirectoryCreateFailed);
        Ok(())
    }
}
