//! EyeWatch camera monitor.
//!
//! Streams frames from a local camera, detects faces in each frame, saves
//! annotated frames to a user-chosen directory and hands a resized copy to a
//! display surface.
//!
//! # Module Structure
//!
//! - `ingest`: camera drivers, probing (`CameraRegistry`) and the open handle (`FrameSource`)
//! - `detect`: face detector backends (pure-Rust Haar cascade, OpenCV, stub)
//! - `pipeline`: the session state machine (`CapturePipeline`)
//! - `runtime`: the worker thread that ticks the pipeline (`MonitorRuntime`)
//! - `storage`: timestamped PNG persistence (`FrameSink`)
//! - `display`: display sinks
//! - `config`: startup configuration and the save-location store
//! - `auth`: account store gating the command surface

pub mod auth;
pub mod config;
pub mod detect;
pub mod display;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod runtime;
pub mod storage;
pub mod ui;

pub use auth::{AuthError, AuthStore, InMemoryAuthStore};
pub use config::{ConfigStore, InMemoryConfigStore, JsonConfigStore, MonitorConfig};
pub use detect::{DetectorParams, FaceBox, FaceDetector, HaarBackend, StubBackend};
pub use display::{DisplaySink, LatestFrameDisplay};
pub use error::{CaptureError, ErrorKind, PipelineError, SaveError};
pub use frame::{Frame, PixelFormat};
pub use ingest::{
    CameraDescriptor, CameraDevice, CameraDriver, CameraId, CameraRegistry, FrameSource,
    SyntheticBehavior, SyntheticDriver,
};
pub use pipeline::{
    CapturePipeline, CaptureSession, FrameReport, PipelineSettings, PipelineState, SavePolicy,
    TickOutcome,
};
pub use runtime::{MonitorEvent, MonitorRuntime, RuntimeStatus};
pub use storage::FrameSink;
