//! Worker thread that drives a `CapturePipeline`.
//!
//! The pipeline lives on one dedicated thread. Commands reach it over a channel
//! and are always drained before the next tick, so a `stop` never waits behind
//! more than the tick already in flight. Ticks fire `tick_interval` after the
//! previous one finished. Events flow back on a second channel.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::error::{ErrorKind, PipelineError};
use crate::ingest::{CameraDescriptor, CameraId};
use crate::pipeline::{CapturePipeline, CaptureSession, PipelineState, TickOutcome};

/// Something the UI may want to show.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MonitorEvent {
    SessionStarted {
        camera_id: CameraId,
    },
    SessionStopped {
        camera_id: Option<CameraId>,
    },
    SessionFaulted {
        camera_id: Option<CameraId>,
        kind: Option<ErrorKind>,
        message: String,
    },
    FacesDetected {
        camera_id: CameraId,
        count: usize,
    },
    FrameSaved {
        path: PathBuf,
    },
    SaveFailed {
        kind: ErrorKind,
        message: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeStatus {
    pub state: PipelineState,
    pub session: Option<CaptureSession>,
}

enum Command {
    Enumerate {
        max_probe: Option<u32>,
        reply: Sender<Vec<CameraDescriptor>>,
    },
    Start {
        camera_id: CameraId,
        reply: Sender<Result<(), PipelineError>>,
    },
    Stop {
        reply: Sender<()>,
    },
    Status {
        reply: Sender<RuntimeStatus>,
    },
    Shutdown,
}

/// Handle to the worker thread. Dropping it shuts the worker down.
pub struct MonitorRuntime {
    commands: Sender<Command>,
    events: Receiver<MonitorEvent>,
    cancel: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl MonitorRuntime {
    pub fn spawn(pipeline: CapturePipeline, tick_interval: Duration) -> Result<Self> {
        let (commands, command_rx) = mpsc::channel();
        let (event_tx, events) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_worker = cancel.clone();
        let join = std::thread::Builder::new()
            .name("eyewatch-capture".to_string())
            .spawn(move || {
                Worker {
                    pipeline,
                    commands: command_rx,
                    events: event_tx,
                    cancel: cancel_worker,
                    tick_interval,
                }
                .run()
            })?;
        Ok(Self {
            commands,
            events,
            cancel,
            join: Some(join),
        })
    }

    /// Enumerate using the configured probe count.
    pub fn enumerate_cameras(&self) -> Result<Vec<CameraDescriptor>, PipelineError> {
        self.request(|reply| Command::Enumerate {
            max_probe: None,
            reply,
        })
    }

    pub fn enumerate_cameras_up_to(
        &self,
        max_probe: u32,
    ) -> Result<Vec<CameraDescriptor>, PipelineError> {
        self.request(|reply| Command::Enumerate {
            max_probe: Some(max_probe),
            reply,
        })
    }

    pub fn start(&self, camera_id: CameraId) -> Result<(), PipelineError> {
        self.request(|reply| Command::Start { camera_id, reply })?
    }

    /// Stop the session. When this returns no further tick will run.
    pub fn stop(&self) -> Result<(), PipelineError> {
        self.cancel.store(true, Ordering::SeqCst);
        self.request(|reply| Command::Stop { reply })
    }

    pub fn status(&self) -> Result<RuntimeStatus, PipelineError> {
        self.request(|reply| Command::Status { reply })
    }

    /// Events published since the last call.
    pub fn try_events(&self) -> Vec<MonitorEvent> {
        self.events.try_iter().collect()
    }

    pub fn next_event(&self, timeout: Duration) -> Option<MonitorEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Stop any session and join the worker.
    pub fn shutdown(mut self) -> Result<()> {
        self.shutdown_inner()
    }

    fn shutdown_inner(&mut self) -> Result<()> {
        self.cancel.store(true, Ordering::SeqCst);
        let _ = self.commands.send(Command::Shutdown);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("capture worker thread panicked"))?;
        }
        Ok(())
    }

    fn request<T>(&self, build: impl FnOnce(Sender<T>) -> Command) -> Result<T, PipelineError> {
        let (reply, response) = mpsc::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| PipelineError::RuntimeGone)?;
        response.recv().map_err(|_| PipelineError::RuntimeGone)
    }
}

impl Drop for MonitorRuntime {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown_inner() {
            log::error!("monitor runtime shutdown: {}", err);
        }
    }
}

// ----------------------------------------------------------------------------
// Worker
// ----------------------------------------------------------------------------

struct Worker {
    pipeline: CapturePipeline,
    commands: Receiver<Command>,
    events: Sender<MonitorEvent>,
    cancel: Arc<AtomicBool>,
    tick_interval: Duration,
}

enum Flow {
    Continue,
    Exit,
}

impl Worker {
    fn run(mut self) {
        log::debug!("capture worker started");
        let mut next_tick = Instant::now();
        loop {
            // Pending commands always win over the next tick.
            loop {
                match self.commands.try_recv() {
                    Ok(command) => {
                        if let Flow::Exit = self.handle(command, &mut next_tick) {
                            return self.finish();
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return self.finish(),
                }
            }

            let active = self.pipeline.state() == PipelineState::Running
                && !self.cancel.load(Ordering::SeqCst);
            if !active {
                match self.commands.recv() {
                    Ok(command) => {
                        if let Flow::Exit = self.handle(command, &mut next_tick) {
                            return self.finish();
                        }
                    }
                    Err(_) => return self.finish(),
                }
                continue;
            }

            let now = Instant::now();
            if now < next_tick {
                match self.commands.recv_timeout(next_tick - now) {
                    Ok(command) => {
                        if let Flow::Exit = self.handle(command, &mut next_tick) {
                            return self.finish();
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => return self.finish(),
                }
                continue;
            }

            self.tick();
            next_tick = Instant::now() + self.tick_interval;
        }
    }

    fn handle(&mut self, command: Command, next_tick: &mut Instant) -> Flow {
        match command {
            Command::Enumerate { max_probe, reply } => {
                let max_probe = max_probe.unwrap_or(self.pipeline.settings().probe_count);
                let _ = reply.send(self.pipeline.enumerate_cameras(max_probe));
            }
            Command::Start { camera_id, reply } => {
                let previous = match self.pipeline.state() {
                    PipelineState::Running => self.pipeline.session().map(|s| s.camera_id),
                    _ => None,
                };
                self.cancel.store(false, Ordering::SeqCst);
                // A running session is always torn down, even if the new one fails.
                let result = self.pipeline.start(camera_id);
                if previous.is_some() {
                    self.publish(MonitorEvent::SessionStopped {
                        camera_id: previous,
                    });
                }
                if result.is_ok() {
                    self.publish(MonitorEvent::SessionStarted { camera_id });
                    *next_tick = Instant::now();
                }
                let _ = reply.send(result);
            }
            Command::Stop { reply } => {
                self.stop_session();
                let _ = reply.send(());
            }
            Command::Status { reply } => {
                let _ = reply.send(RuntimeStatus {
                    state: self.pipeline.state(),
                    session: self.pipeline.session().cloned(),
                });
            }
            Command::Shutdown => return Flow::Exit,
        }
        Flow::Continue
    }

    fn tick(&mut self) {
        let camera_id = self.pipeline.session().map(|s| s.camera_id);
        match self.pipeline.tick() {
            Ok(TickOutcome::Processed(report)) => {
                if let (Some(camera_id), false) = (camera_id, report.faces.is_empty()) {
                    self.publish(MonitorEvent::FacesDetected {
                        camera_id,
                        count: report.faces.len(),
                    });
                }
                for path in report.saved {
                    self.publish(MonitorEvent::FrameSaved { path });
                }
                for err in report.save_errors {
                    self.publish(MonitorEvent::SaveFailed {
                        kind: err.kind(),
                        message: err.to_string(),
                    });
                }
            }
            Ok(TickOutcome::Skipped { .. }) | Ok(TickOutcome::Inactive) => {}
            Err(err) => self.publish(MonitorEvent::SessionFaulted {
                camera_id,
                kind: err.kind(),
                message: err.to_string(),
            }),
        }
    }

    fn stop_session(&mut self) {
        let was_active = self.pipeline.state() != PipelineState::Idle;
        let camera_id = self.pipeline.session().map(|s| s.camera_id);
        self.pipeline.stop();
        if was_active {
            self.publish(MonitorEvent::SessionStopped { camera_id });
        }
    }

    fn finish(mut self) {
        self.stop_session();
        log::debug!("capture worker exiting");
    }

    fn publish(&self, event: MonitorEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InMemoryConfigStore;
    use crate::detect::{FaceBox, StubBackend};
    use crate::display::LatestFrameDisplay;
    use crate::ingest::{SyntheticBehavior, SyntheticDriver};

    fn runtime(detector: StubBackend) -> (MonitorRuntime, SyntheticDriver, LatestFrameDisplay) {
        let driver = SyntheticDriver::new(32, 24)
            .with_camera(0, SyntheticBehavior::Streaming)
            .with_camera(2, SyntheticBehavior::Streaming);
        let display = LatestFrameDisplay::new();
        let pipeline = CapturePipeline::new(
            Box::new(driver.clone()),
            Box::new(detector),
            Box::new(display.clone()),
            Arc::new(InMemoryConfigStore::new("")),
        );
        let runtime = MonitorRuntime::spawn(pipeline, Duration::from_millis(2)).expect("spawn");
        (runtime, driver, display)
    }

    fn wait_for_frames(display: &LatestFrameDisplay, at_least: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while display.rendered() < at_least {
            assert!(Instant::now() < deadline, "timed out waiting for frames");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn no_ticks_after_stop_returns() -> anyhow::Result<()> {
        let (runtime, driver, display) = runtime(StubBackend::new());
        let cameras = runtime.enumerate_cameras()?;
        assert_eq!(cameras.iter().map(|c| c.id).collect::<Vec<_>>(), vec![0, 2]);

        runtime.start(2)?;
        wait_for_frames(&display, 3);
        runtime.stop()?;
        let rendered = display.rendered();
        assert_eq!(driver.open_handles(), 0);

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(display.rendered(), rendered);
        assert_eq!(runtime.status()?.state, PipelineState::Idle);

        runtime.start(2)?;
        wait_for_frames(&display, rendered + 1);
        runtime.shutdown()?;
        assert_eq!(driver.open_handles(), 0);
        Ok(())
    }

    #[test]
    fn events_report_session_and_save_failures() -> anyhow::Result<()> {
        let face = FaceBox::new(2, 2, 8, 8);
        let (runtime, _driver, display) = runtime(StubBackend::with_script([vec![face]]));
        runtime.enumerate_cameras()?;
        runtime.start(0)?;
        wait_for_frames(&display, 2);
        runtime.stop()?;

        let events = runtime.try_events();
        assert_eq!(events[0], MonitorEvent::SessionStarted { camera_id: 0 });
        assert!(events.contains(&MonitorEvent::FacesDetected {
            camera_id: 0,
            count: 1
        }));
        assert!(events.iter().any(|e| matches!(
            e,
            MonitorEvent::SaveFailed {
                kind: ErrorKind::NoSaveLocationConfigured,
                ..
            }
        )));
        assert_eq!(
            events.last(),
            Some(&MonitorEvent::SessionStopped { camera_id: Some(0) })
        );
        Ok(())
    }

    #[test]
    fn start_error_is_returned_to_caller() -> anyhow::Result<()> {
        let (runtime, _driver, _display) = runtime(StubBackend::new());
        runtime.enumerate_cameras()?;
        let err = runtime.start(1).expect_err("camera 1 does not stream");
        assert_eq!(err.kind(), Some(ErrorKind::DeviceUnavailable));
        assert_eq!(runtime.status()?.state, PipelineState::Idle);
        Ok(())
    }
}
