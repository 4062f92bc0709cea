//! Capture → detect → annotate/save → display.
//!
//! `CapturePipeline` is the session state machine. It is synchronous and owns
//! every collaborator it drives; `MonitorRuntime` is what puts it on a thread
//! and calls `tick` on a schedule.
//!
//! ```text
//!   Idle ──start──▶ Running ──stop──▶ Idle
//!                     │
//!                     └─ too many consecutive capture failures ─▶ Faulted ──stop──▶ Idle
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::config::{ConfigStore, MonitorConfig};
use crate::detect::{self, FaceBox, FaceDetector};
use crate::display::DisplaySink;
use crate::error::{CaptureError, ErrorKind, PipelineError, SaveError};
use crate::frame::Frame;
use crate::ingest::{self, CameraDescriptor, CameraDriver, CameraId, CameraRegistry, FrameSource};
use crate::storage::FrameSink;

// ----------------------------------------------------------------------------
// Settings
// ----------------------------------------------------------------------------

/// How many saves a frame with faces produces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SavePolicy {
    /// One save per detected face, taken right after that face's box is drawn.
    #[default]
    PerFace,
    /// One save per frame that has at least one face.
    PerFrame,
}

impl SavePolicy {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "per_face" | "face" => Ok(SavePolicy::PerFace),
            "per_frame" | "frame" => Ok(SavePolicy::PerFrame),
            other => Err(anyhow!("unknown save policy '{}'", other)),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PipelineSettings {
    /// Cameras probed by a plain enumeration (indices `0..probe_count`).
    pub probe_count: u32,
    /// Consecutive failed reads tolerated before the session faults.
    pub max_transient_failures: u32,
    pub save_policy: SavePolicy,
    pub display_width: u32,
    pub display_height: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            probe_count: 5,
            max_transient_failures: 3,
            save_policy: SavePolicy::default(),
            display_width: 700,
            display_height: 500,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(cfg: &MonitorConfig) -> Self {
        Self {
            probe_count: cfg.camera.probe_count,
            max_transient_failures: cfg.capture.max_transient_failures,
            save_policy: cfg.capture.save_policy,
            display_width: cfg.display.width,
            display_height: cfg.display.height,
        }
    }
}

// ----------------------------------------------------------------------------
// State
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Faulted,
}

impl PipelineState {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Running => "running",
            PipelineState::Faulted => "faulted",
        }
    }
}

/// Bookkeeping for the current (or most recent) session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureSession {
    pub camera_id: CameraId,
    pub is_running: bool,
    pub last_error: Option<ErrorKind>,
    pub frames: u64,
    pub faces: u64,
    pub saves: u64,
}

impl CaptureSession {
    fn new(camera_id: CameraId) -> Self {
        Self {
            camera_id,
            is_running: true,
            last_error: None,
            frames: 0,
            faces: 0,
            saves: 0,
        }
    }
}

/// What one `tick` did.
#[derive(Debug)]
pub enum TickOutcome {
    /// Not running; nothing was read.
    Inactive,
    /// The read failed and the failure was tolerated.
    Skipped { consecutive_failures: u32 },
    /// A frame went through the whole pipeline.
    Processed(FrameReport),
}

#[derive(Debug, Default)]
pub struct FrameReport {
    pub faces: Vec<FaceBox>,
    pub saved: Vec<PathBuf>,
    pub save_errors: Vec<SaveError>,
}

// ----------------------------------------------------------------------------
// Pipeline
// ----------------------------------------------------------------------------

pub struct CapturePipeline {
    driver: Box<dyn CameraDriver>,
    registry: CameraRegistry,
    detector: Box<dyn FaceDetector>,
    sink: FrameSink,
    display: Box<dyn DisplaySink>,
    config_store: Arc<dyn ConfigStore>,
    settings: PipelineSettings,
    state: PipelineState,
    source: Option<FrameSource>,
    session: Option<CaptureSession>,
    consecutive_failures: u32,
}

impl CapturePipeline {
    pub fn new(
        driver: Box<dyn CameraDriver>,
        detector: Box<dyn FaceDetector>,
        display: Box<dyn DisplaySink>,
        config_store: Arc<dyn ConfigStore>,
    ) -> Self {
        Self {
            driver,
            registry: CameraRegistry::new(),
            detector,
            sink: FrameSink::new(),
            display,
            config_store,
            settings: PipelineSettings::default(),
            state: PipelineState::Idle,
            source: None,
            session: None,
            consecutive_failures: 0,
        }
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_sink(mut self, sink: FrameSink) -> Self {
        self.sink = sink;
        self
    }

    /// Assemble the camera driver and detector named by `cfg`.
    pub fn from_config(
        cfg: &MonitorConfig,
        config_store: Arc<dyn ConfigStore>,
        display: Box<dyn DisplaySink>,
    ) -> Result<Self> {
        let driver = ingest::build_driver(&cfg.camera)?;
        let detector = detect::build_detector(&cfg.detector)?;
        let sink = FrameSink::new().unique_filenames(cfg.capture.unique_filenames);
        Ok(Self::new(driver, detector, display, config_store)
            .with_settings(PipelineSettings::from_config(cfg))
            .with_sink(sink))
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn session(&self) -> Option<&CaptureSession> {
        self.session.as_ref()
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Probe indices `0..max_probe`. The running camera, if any, is listed
    /// without being reopened.
    pub fn enumerate_cameras(&mut self, max_probe: u32) -> Vec<CameraDescriptor> {
        let active = match self.state {
            PipelineState::Running => self.source.as_ref().map(FrameSource::camera_id),
            _ => None,
        };
        self.registry.enumerate(self.driver.as_mut(), max_probe, active)
    }

    /// Begin capturing from `camera_id`.
    ///
    /// A running session is stopped first, so on failure the pipeline is Idle
    /// with no camera open. A faulted pipeline must be stopped explicitly.
    pub fn start(&mut self, camera_id: CameraId) -> Result<(), PipelineError> {
        match self.state {
            PipelineState::Faulted => {
                return Err(PipelineError::InvalidState {
                    operation: "start",
                    state: self.state.as_str(),
                })
            }
            PipelineState::Running => self.stop(),
            PipelineState::Idle => {}
        }

        let source = FrameSource::open(self.driver.as_mut(), &self.registry, camera_id)
            .inspect_err(|err| log::warn!("pipeline: start rejected: {}", err))?;
        self.source = Some(source);
        self.session = Some(CaptureSession::new(camera_id));
        self.consecutive_failures = 0;
        self.state = PipelineState::Running;
        log::info!("pipeline: session started on camera {}", camera_id);
        Ok(())
    }

    /// Run one iteration. Does nothing unless Running.
    ///
    /// Returns `Err` only for the failure that faults the session; later ticks
    /// return `Inactive` until the pipeline is stopped and started again.
    pub fn tick(&mut self) -> Result<TickOutcome, PipelineError> {
        if self.state != PipelineState::Running {
            return Ok(TickOutcome::Inactive);
        }
        let Some(source) = self.source.as_mut() else {
            log::error!("pipeline: running without an open camera; stopping");
            self.stop();
            return Ok(TickOutcome::Inactive);
        };
        let camera_id = source.camera_id();

        let mut frame = match source.read_frame() {
            Ok(frame) => frame,
            Err(err) => return self.capture_failed(err),
        };

        // A detector error is a bad frame, so the counter only resets once
        // detection succeeds.
        let faces = match self.detector.detect(&frame) {
            Ok(faces) => faces,
            Err(err) => {
                return self.capture_failed(CaptureError::CaptureFailed {
                    camera_id,
                    reason: format!("{} detector: {:#}", self.detector.name(), err),
                })
            }
        };
        self.consecutive_failures = 0;

        let mut report = FrameReport::default();
        match self.settings.save_policy {
            // Each box is drawn and then saved, so the k-th save carries the
            // first k boxes.
            SavePolicy::PerFace => {
                for face in &faces {
                    frame.draw_box(face);
                    self.save_frame(&frame, &mut report);
                }
            }
            SavePolicy::PerFrame => {
                for face in &faces {
                    frame.draw_box(face);
                }
                if !faces.is_empty() {
                    self.save_frame(&frame, &mut report);
                }
            }
        }
        report.faces = faces;

        if let Some(session) = self.session.as_mut() {
            session.frames += 1;
            session.faces += report.faces.len() as u64;
            session.saves += report.saved.len() as u64;
            if let Some(err) = report.save_errors.last() {
                session.last_error = Some(err.kind());
            }
        }
        if !report.faces.is_empty() {
            log::debug!(
                "pipeline: camera {}: {} face(s)",
                camera_id,
                report.faces.len()
            );
        }

        self.display.render(
            frame.resized(self.settings.display_width, self.settings.display_height),
        );
        Ok(TickOutcome::Processed(report))
    }

    /// Release the camera and return to Idle. Safe from any state.
    pub fn stop(&mut self) {
        let was = self.state;
        if let Some(mut source) = self.source.take() {
            source.close();
        }
        if let Some(session) = self.session.as_mut() {
            session.is_running = false;
        }
        self.consecutive_failures = 0;
        self.state = PipelineState::Idle;
        if was != PipelineState::Idle {
            log::info!("pipeline: stopped (was {})", was.as_str());
        }
    }

    fn save_frame(&self, frame: &Frame, report: &mut FrameReport) {
        // Re-read every time; the user may change it mid-session.
        let location = self.config_store.image_save_location();
        match self.sink.save(frame, &location) {
            Ok(path) => {
                log::info!("pipeline: saved {}", path.display());
                report.saved.push(path);
            }
            Err(err) => {
                log::warn!("pipeline: save failed: {}", err);
                report.save_errors.push(err);
            }
        }
    }

    fn capture_failed(&mut self, err: CaptureError) -> Result<TickOutcome, PipelineError> {
        self.consecutive_failures += 1;
        if self.consecutive_failures <= self.settings.max_transient_failures {
            log::warn!(
                "pipeline: transient failure {}/{}: {}",
                self.consecutive_failures,
                self.settings.max_transient_failures,
                err
            );
            return Ok(TickOutcome::Skipped {
                consecutive_failures: self.consecutive_failures,
            });
        }

        log::error!(
            "pipeline: faulted after {} consecutive failures: {}",
            self.consecutive_failures,
            err
        );
        if let Some(mut source) = self.source.take() {
            source.close();
        }
        if let Some(session) = self.session.as_mut() {
            session.is_running = false;
            session.last_error = Some(err.kind());
        }
        self.state = PipelineState::Faulted;
        Err(PipelineError::Capture(err))
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
