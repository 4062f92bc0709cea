//! Monitor configuration and the save-location settings store.
//!
//! `MonitorConfig` is loaded once at startup: optional JSON file named by
//! `EYEWATCH_CONFIG`, then environment overrides, then validation.
//!
//! `ConfigStore` is the user-editable settings collaborator. The pipeline asks it
//! for the image save location at every save event and never caches the answer.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::detect::{DetectorParams, DEFAULT_MIN_NEIGHBORS, DEFAULT_MIN_SIZE, DEFAULT_SCALE_FACTOR};
use crate::pipeline::SavePolicy;

const DEFAULT_PROBE_COUNT: u32 = 5;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_TICK_MS: u64 = 10;
const DEFAULT_MAX_TRANSIENT_FAILURES: u32 = 3;
const DEFAULT_DISPLAY_WIDTH: u32 = 700;
const DEFAULT_DISPLAY_HEIGHT: u32 = 500;
const SETTINGS_DIR: &str = "eyewatch";
const SETTINGS_FILE: &str = "settings.json";

/// Cascade used when none is configured, looked up in `detector.cascade_dirs`.
pub const STOCK_CASCADE: &str = "haarcascade_frontalface_default.xml";
const STOCK_CASCADE_DIRS: &[&str] = &[
    "/usr/share/opencv4/haarcascades",
    "/usr/share/opencv/haarcascades",
    "/usr/local/share/opencv4/haarcascades",
    "/usr/local/share/opencv/haarcascades",
    "/opt/homebrew/share/opencv4/haarcascades",
];

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

// ----------------------------------------------------------------------------
// File schema (all optional)
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    settings_path: Option<PathBuf>,
    camera: Option<CameraConfigFile>,
    capture: Option<CaptureConfigFile>,
    display: Option<DisplayConfigFile>,
    detector: Option<DetectorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    backend: Option<String>,
    synthetic_cameras: Option<Vec<u32>>,
    probe_count: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    tick_ms: Option<u64>,
    max_transient_failures: Option<u32>,
    save_policy: Option<String>,
    unique_filenames: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    cascade_path: Option<PathBuf>,
    cascade_dirs: Option<Vec<PathBuf>>,
    scale_factor: Option<f64>,
    min_neighbors: Option<u32>,
    min_size: Option<u32>,
}

// ----------------------------------------------------------------------------
// Resolved configuration
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraBackend {
    Synthetic,
    V4l2,
}

impl CameraBackend {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "synthetic" | "stub" => Ok(CameraBackend::Synthetic),
            "v4l2" => Ok(CameraBackend::V4l2),
            other => Err(anyhow!("unknown camera backend '{}'", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorBackendKind {
    Haar,
    OpenCv,
    Stub,
}

impl DetectorBackendKind {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "haar" => Ok(DetectorBackendKind::Haar),
            "opencv" => Ok(DetectorBackendKind::OpenCv),
            "stub" => Ok(DetectorBackendKind::Stub),
            other => Err(anyhow!("unknown detector backend '{}'", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CameraSettings {
    pub backend: CameraBackend,
    /// Indices that stream when the synthetic backend is used.
    pub synthetic_cameras: Vec<u32>,
    pub probe_count: u32,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

#[derive(Clone, Debug)]
pub struct CaptureSettings {
    pub tick_interval: Duration,
    pub max_transient_failures: u32,
    pub save_policy: SavePolicy,
    pub unique_filenames: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct DisplaySettings {
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug)]
pub struct DetectorSettings {
    pub backend: DetectorBackendKind,
    pub cascade_path: Option<PathBuf>,
    /// Searched for `STOCK_CASCADE` when `cascade_path` is unset.
    pub cascade_dirs: Vec<PathBuf>,
    pub params: DetectorParams,
}

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub settings_path: PathBuf,
    pub camera: CameraSettings,
    pub capture: CaptureSettings,
    pub display: DisplaySettings,
    pub detector: DetectorSettings,
}

impl MonitorConfig {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::load_camera_only()?;
        cfg.resolve_detector()?;
        Ok(cfg)
    }

    /// Like `load`, but skips detector checks. For tools that never build a
    /// detector (camera probing).
    pub fn load_camera_only() -> Result<Self> {
        let config_path = std::env::var("EYEWATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Result<Self> {
        let camera_file = file.camera.unwrap_or_default();
        let capture_file = file.capture.unwrap_or_default();
        let display_file = file.display.unwrap_or_default();
        let detector_file = file.detector.unwrap_or_default();

        let camera = CameraSettings {
            backend: camera_file
                .backend
                .as_deref()
                .map(CameraBackend::parse)
                .transpose()?
                .unwrap_or(CameraBackend::V4l2),
            synthetic_cameras: camera_file.synthetic_cameras.unwrap_or_else(|| vec![0]),
            probe_count: camera_file.probe_count.unwrap_or(DEFAULT_PROBE_COUNT),
            width: camera_file.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: camera_file.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
            target_fps: camera_file.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
        };
        let capture = CaptureSettings {
            tick_interval: Duration::from_millis(capture_file.tick_ms.unwrap_or(DEFAULT_TICK_MS)),
            max_transient_failures: capture_file
                .max_transient_failures
                .unwrap_or(DEFAULT_MAX_TRANSIENT_FAILURES),
            save_policy: capture_file
                .save_policy
                .as_deref()
                .map(SavePolicy::parse)
                .transpose()?
                .unwrap_or_default(),
            unique_filenames: capture_file.unique_filenames.unwrap_or(false),
        };
        let display = DisplaySettings {
            width: display_file.width.unwrap_or(DEFAULT_DISPLAY_WIDTH),
            height: display_file.height.unwrap_or(DEFAULT_DISPLAY_HEIGHT),
        };
        let min_size = detector_file.min_size.unwrap_or(DEFAULT_MIN_SIZE);
        let detector = DetectorSettings {
            backend: detector_file
                .backend
                .as_deref()
                .map(DetectorBackendKind::parse)
                .transpose()?
                .unwrap_or(DetectorBackendKind::Haar),
            cascade_path: detector_file.cascade_path,
            cascade_dirs: detector_file.cascade_dirs.unwrap_or_else(|| {
                STOCK_CASCADE_DIRS.iter().map(PathBuf::from).collect()
            }),
            params: DetectorParams {
                scale_factor: detector_file.scale_factor.unwrap_or(DEFAULT_SCALE_FACTOR),
                min_neighbors: detector_file.min_neighbors.unwrap_or(DEFAULT_MIN_NEIGHBORS),
                min_width: min_size,
                min_height: min_size,
            },
        };

        Ok(Self {
            settings_path: file.settings_path.unwrap_or_else(default_settings_path),
            camera,
            capture,
            display,
            detector,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(backend) = std::env::var("EYEWATCH_CAMERA_BACKEND") {
            if !backend.trim().is_empty() {
                self.camera.backend = CameraBackend::parse(&backend)?;
            }
        }
        if let Ok(cameras) = std::env::var("EYEWATCH_SYNTHETIC_CAMERAS") {
            let parsed = split_csv(&cameras)
                .iter()
                .map(|id| {
                    id.parse::<u32>()
                        .map_err(|_| anyhow!("EYEWATCH_SYNTHETIC_CAMERAS entry '{}' is not an index", id))
                })
                .collect::<Result<Vec<_>>>()?;
            self.camera.synthetic_cameras = parsed;
        }
        if let Ok(count) = std::env::var("EYEWATCH_PROBE_COUNT") {
            self.camera.probe_count = count
                .trim()
                .parse()
                .map_err(|_| anyhow!("EYEWATCH_PROBE_COUNT must be an integer"))?;
        }
        if let Ok(tick) = std::env::var("EYEWATCH_TICK_MS") {
            let ms: u64 = tick
                .trim()
                .parse()
                .map_err(|_| anyhow!("EYEWATCH_TICK_MS must be an integer number of milliseconds"))?;
            self.capture.tick_interval = Duration::from_millis(ms);
        }
        if let Ok(path) = std::env::var("EYEWATCH_SETTINGS_PATH") {
            if !path.trim().is_empty() {
                self.settings_path = PathBuf::from(path);
            }
        }
        if let Ok(backend) = std::env::var("EYEWATCH_DETECTOR") {
            if !backend.trim().is_empty() {
                self.detector.backend = DetectorBackendKind::parse(&backend)?;
            }
        }
        if let Ok(path) = std::env::var("EYEWATCH_CASCADE") {
            if !path.trim().is_empty() {
                self.detector.cascade_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(dirs) = std::env::var("EYEWATCH_CASCADE_DIRS") {
            self.detector.cascade_dirs = split_csv(&dirs).into_iter().map(PathBuf::from).collect();
        }
        if let Ok(policy) = std::env::var("EYEWATCH_SAVE_POLICY") {
            if !policy.trim().is_empty() {
                self.capture.save_policy = SavePolicy::parse(&policy)?;
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.camera.probe_count == 0 {
            return Err(anyhow!("probe_count must be at least 1"));
        }
        if self.display.width == 0 || self.display.height == 0 {
            return Err(anyhow!("display size must be non-zero"));
        }
        if self.detector.params.scale_factor <= 1.0 {
            return Err(anyhow!(
                "detector scale_factor must be greater than 1.0 (got {})",
                self.detector.params.scale_factor
            ));
        }
        self.camera.synthetic_cameras.sort_unstable();
        self.camera.synthetic_cameras.dedup();
        Ok(())
    }

    /// Cascade backends need a model. Without an explicit `cascade_path` the
    /// stock OpenCV frontal-face cascade is looked up in `cascade_dirs`.
    pub fn resolve_detector(&mut self) -> Result<()> {
        if !matches!(
            self.detector.backend,
            DetectorBackendKind::Haar | DetectorBackendKind::OpenCv
        ) || self.detector.cascade_path.is_some()
        {
            return Ok(());
        }
        let found = self
            .detector
            .cascade_dirs
            .iter()
            .map(|dir| dir.join(STOCK_CASCADE))
            .find(|candidate| candidate.is_file());
        match found {
            Some(path) => {
                log::info!("using stock cascade {}", path.display());
                self.detector.cascade_path = Some(path);
                Ok(())
            }
            None => Err(anyhow!(
                "detector backend {:?} needs a cascade model: set cascade_path (or EYEWATCH_CASCADE), \
                 or install OpenCV's {} into one of [{}]",
                self.detector.backend,
                STOCK_CASCADE,
                self.detector
                    .cascade_dirs
                    .iter()
                    .map(|dir| dir.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

/// Per-user settings file: `<config_dir>/eyewatch/settings.json`.
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(SETTINGS_DIR)
        .join(SETTINGS_FILE)
}

// ----------------------------------------------------------------------------
// ConfigStore: save-location collaborator
// ----------------------------------------------------------------------------

/// Source of the user-chosen image save directory.
///
/// An empty string means "unset". Implementations must return the current value
/// on every call; writers may run on other threads.
pub trait ConfigStore: Send + Sync {
    fn image_save_location(&self) -> String;

    fn set_image_save_location(&self, path: &str) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image_location: Option<String>,
}

/// JSON-file settings store (`{"image_location": "..."}`).
///
/// A missing file is created empty on first read. Any other read or parse failure
/// is logged and treated as an unset location.
pub struct JsonConfigStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonConfigStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when the file does not exist yet.
    fn read(&self) -> Result<Option<SettingsFile>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map(Some)
                .with_context(|| format!("invalid settings file {}", self.path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(anyhow::Error::new(err)
                .context(format!("failed to read settings file {}", self.path.display()))),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| anyhow!("settings lock poisoned"))
    }

    fn create_if_missing(&self) -> Result<()> {
        let _guard = self.lock()?;
        // A writer may have won the race while we waited.
        if self.path.exists() {
            return Ok(());
        }
        self.write(&SettingsFile::default())?;
        log::info!("created settings file {}", self.path.display());
        Ok(())
    }

    /// Callers hold `write_lock`.
    fn write(&self, settings: &SettingsFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create settings directory {}", parent.display())
                })?;
            }
        }
        let json = serde_json::to_string_pretty(settings)?;
        // Readers never lock, so replace the file atomically. The temp name is
        // per write so stores in other processes cannot clobber each other.
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .path
            .with_extension(format!("json.{}.{}.tmp", std::process::id(), seq));
        std::fs::write(&tmp, json)
            .with_context(|| format!("failed to write settings file {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path).with_context(|| {
            let _ = std::fs::remove_file(&tmp);
            format!("failed to replace settings file {}", self.path.display())
        })
    }
}

impl ConfigStore for JsonConfigStore {
    fn image_save_location(&self) -> String {
        let settings = match self.read() {
            Ok(Some(settings)) => Ok(settings),
            Ok(None) => self.create_if_missing().map(|_| SettingsFile::default()),
            Err(err) => Err(err),
        };
        match settings {
            Ok(settings) => settings.image_location.unwrap_or_default(),
            Err(err) => {
                log::warn!("image save location unavailable: {:#}", err);
                String::new()
            }
        }
    }

    fn set_image_save_location(&self, path: &str) -> Result<()> {
        let _guard = self.lock()?;
        // A corrupt file is replaced rather than blocking the user from fixing it.
        let mut settings = self.read().ok().flatten().unwrap_or_default();
        settings.image_location = Some(path.to_string());
        self.write(&settings)
    }
}

/// Process-local store for embedding and tests.
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    image_location: RwLock<String>,
}

impl InMemoryConfigStore {
    pub fn new(image_location: impl Into<String>) -> Self {
        Self {
            image_location: RwLock::new(image_location.into()),
        }
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn image_save_location(&self) -> String {
        self.image_location
            .read()
            .map(|loc| loc.clone())
            .unwrap_or_default()
    }

    fn set_image_save_location(&self, path: &str) -> Result<()> {
        let mut loc = self
            .image_location
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        *loc = path.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_settings_file_is_created_empty() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("settings.json");
        let store = JsonConfigStore::new(&path);

        assert_eq!(store.image_save_location(), "");
        assert!(path.exists());
        assert_eq!(std::fs::read_to_string(&path)?.trim(), "{}");
        Ok(())
    }

    #[test]
    fn set_location_round_trips_through_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("settings.json");
        let store = JsonConfigStore::new(&path);

        store.set_image_save_location("/srv/captures")?;
        assert_eq!(store.image_save_location(), "/srv/captures");

        // A second store over the same file observes the write.
        let other = JsonConfigStore::new(&path);
        assert_eq!(other.image_save_location(), "/srv/captures");
        Ok(())
    }

    #[test]
    fn corrupt_settings_read_as_unset() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json")?;
        let store = JsonConfigStore::new(&path);

        assert_eq!(store.image_save_location(), "");
        store.set_image_save_location("/tmp/eyewatch")?;
        assert_eq!(store.image_save_location(), "/tmp/eyewatch");
        Ok(())
    }

    #[test]
    fn first_read_never_overwrites_a_concurrent_set() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for round in 0..50 {
            let path = dir.path().join(format!("settings-{}.json", round));
            let store = std::sync::Arc::new(JsonConfigStore::new(&path));
            let reader = {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        store.image_save_location();
                    }
                })
            };
            store.set_image_save_location("/srv/captures")?;
            reader.join().map_err(|_| anyhow!("reader panicked"))?;

            assert_eq!(store.image_save_location(), "/srv/captures", "round {}", round);
        }
        let leftovers = std::fs::read_dir(dir.path())?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
        Ok(())
    }

    #[test]
    fn in_memory_store_reflects_updates() -> Result<()> {
        let store = InMemoryConfigStore::default();
        assert_eq!(store.image_save_location(), "");
        store.set_image_save_location("captures")?;
        assert_eq!(store.image_save_location(), "captures");
        Ok(())
    }

    #[test]
    fn file_defaults_match_documented_constants() -> Result<()> {
        let cfg = MonitorConfig::from_file(MonitorConfigFile::default())?;
        assert_eq!(cfg.camera.probe_count, 5);
        assert_eq!(cfg.capture.tick_interval, Duration::from_millis(10));
        assert_eq!(cfg.capture.max_transient_failures, 3);
        assert_eq!(cfg.capture.save_policy, SavePolicy::PerFace);
        assert_eq!((cfg.display.width, cfg.display.height), (700, 500));
        assert_eq!(cfg.detector.params, DetectorParams::default());
        assert_eq!(cfg.detector.backend, DetectorBackendKind::Haar);
        assert!(cfg
            .detector
            .cascade_dirs
            .contains(&PathBuf::from("/usr/share/opencv4/haarcascades")));
        Ok(())
    }
}
