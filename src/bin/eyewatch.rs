//! eyewatch - interactive camera monitor
//!
//! Sign up or log in, pick a camera, and the monitor saves an annotated PNG to
//! the configured location whenever a face is in view. Runtime events are
//! printed as they arrive.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use eyewatch::config::{CameraBackend, DetectorBackendKind};
use eyewatch::{
    AuthStore, CameraId, CapturePipeline, ConfigStore, InMemoryAuthStore, JsonConfigStore,
    LatestFrameDisplay, MonitorConfig, MonitorEvent, MonitorRuntime,
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "eyewatch", about = "Camera monitor that saves frames with faces")]
struct Args {
    /// Use synthetic cameras instead of local devices
    #[arg(long)]
    synthetic: bool,

    /// Use the scripted stub detector (no cascade model needed)
    #[arg(long)]
    stub_detector: bool,

    /// Haar cascade model (overrides config and EYEWATCH_CASCADE)
    #[arg(long, value_name = "PATH")]
    cascade: Option<PathBuf>,

    /// Settings file holding the image save location
    #[arg(long, value_name = "PATH")]
    settings: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = MonitorConfig::load_camera_only()?;
    if args.synthetic {
        cfg.camera.backend = CameraBackend::Synthetic;
    }
    if args.stub_detector {
        cfg.detector.backend = DetectorBackendKind::Stub;
    }
    if let Some(path) = args.cascade {
        cfg.detector.cascade_path = Some(path);
    }
    if let Some(path) = args.settings {
        cfg.settings_path = path;
    }
    cfg.resolve_detector()?;

    let config_store = Arc::new(JsonConfigStore::new(&cfg.settings_path));
    log::info!("settings file: {}", config_store.path().display());
    let display = LatestFrameDisplay::new();
    let pipeline = CapturePipeline::from_config(&cfg, config_store.clone(), Box::new(display.clone()))?;
    let runtime = MonitorRuntime::spawn(pipeline, cfg.capture.tick_interval)?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_handler = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_handler.store(true, Ordering::SeqCst);
    })
    .map_err(|err| anyhow!("error setting Ctrl-C handler: {}", err))?;

    // stdin blocks, so it gets its own thread; EOF closes the channel.
    let (line_tx, lines) = mpsc::channel::<String>();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut repl = Repl {
        auth: InMemoryAuthStore::new(),
        config_store,
        display,
        runtime: &runtime,
        user: None,
    };
    println!("eyewatch ready. Type 'help' for commands.");
    prompt();
    loop {
        if interrupted.load(Ordering::SeqCst) {
            println!();
            log::info!("interrupt received, stopping");
            break;
        }
        for event in runtime.try_events() {
            print_event(&event);
        }
        match lines.recv_timeout(POLL_INTERVAL) {
            Ok(line) => {
                if let Flow::Quit = repl.handle(&line) {
                    break;
                }
                prompt();
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    runtime.shutdown()?;
    Ok(())
}

enum Flow {
    Continue,
    Quit,
}

struct Repl<'a> {
    auth: InMemoryAuthStore,
    config_store: Arc<JsonConfigStore>,
    display: LatestFrameDisplay,
    runtime: &'a MonitorRuntime,
    user: Option<String>,
}

impl Repl<'_> {
    fn handle(&mut self, line: &str) -> Flow {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, rest)) = words.split_first() else {
            return Flow::Continue;
        };
        let result = match command {
            "help" | "?" => {
                print_help();
                Ok(())
            }
            "quit" | "exit" => return Flow::Quit,
            "signup" => self.sign_up(rest),
            "login" => self.log_in(rest),
            "logout" => {
                self.user = None;
                self.runtime.stop().map_err(Into::into)
            }
            "cameras" => self.cameras(rest),
            "start" => self.start(rest),
            "stop" => self.stop(),
            "location" => self.location(rest),
            "snapshot" => self.snapshot(rest),
            "status" => self.status(),
            other => Err(anyhow!("unknown command '{}' (try 'help')", other)),
        };
        if let Err(err) = result {
            println!("error: {:#}", err);
        }
        Flow::Continue
    }

    fn require_login(&self) -> Result<&str> {
        self.user
            .as_deref()
            .ok_or_else(|| anyhow!("log in first ('login <user> <password>')"))
    }

    fn credentials<'w>(args: &[&'w str]) -> (&'w str, &'w str) {
        (
            args.first().copied().unwrap_or(""),
            args.get(1).copied().unwrap_or(""),
        )
    }

    fn sign_up(&mut self, args: &[&str]) -> Result<()> {
        let (user, password) = Self::credentials(args);
        self.auth.sign_up(user, password)?;
        println!("account created; log in with 'login {} <password>'", user);
        Ok(())
    }

    fn log_in(&mut self, args: &[&str]) -> Result<()> {
        let (user, password) = Self::credentials(args);
        self.auth.log_in(user, password)?;
        self.user = Some(user.to_string());
        println!("welcome, {}", user);
        Ok(())
    }

    fn cameras(&self, args: &[&str]) -> Result<()> {
        self.require_login()?;
        let cameras = match args.first() {
            Some(count) => {
                let count: u32 = count
                    .parse()
                    .map_err(|_| anyhow!("probe count must be a number"))?;
                self.runtime.enumerate_cameras_up_to(count)?
            }
            None => self.runtime.enumerate_cameras()?,
        };
        if cameras.is_empty() {
            println!("no cameras found");
        }
        for camera in cameras {
            println!("  {}  {}", camera.id, camera.label);
        }
        Ok(())
    }

    fn start(&self, args: &[&str]) -> Result<()> {
        self.require_login()?;
        let id: CameraId = args
            .first()
            .ok_or_else(|| anyhow!("usage: start <camera id>"))?
            .parse()
            .map_err(|_| anyhow!("camera id must be a number"))?;
        self.runtime.start(id)?;
        if self.config_store.image_save_location().is_empty() {
            println!("note: no save location set; use 'location <dir>'");
        }
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.require_login()?;
        self.runtime.stop()?;
        Ok(())
    }

    fn location(&self, args: &[&str]) -> Result<()> {
        self.require_login()?;
        if args.is_empty() {
            let current = self.config_store.image_save_location();
            if current.is_empty() {
                println!("save location: (unset)");
            } else {
                println!("save location: {}", current);
            }
            return Ok(());
        }
        let path = args.join(" ");
        self.config_store.set_image_save_location(&path)?;
        println!("save location set to {}", path);
        Ok(())
    }

    fn snapshot(&self, args: &[&str]) -> Result<()> {
        self.require_login()?;
        let path = args
            .first()
            .ok_or_else(|| anyhow!("usage: snapshot <file.png>"))?;
        self.display.snapshot_to(path)?;
        println!("wrote {}", path);
        Ok(())
    }

    fn status(&self) -> Result<()> {
        let status = self.runtime.status()?;
        println!(
            "user: {}",
            self.user.as_deref().unwrap_or("(not logged in)")
        );
        println!("pipeline: {}", status.state.as_str());
        if let Some(session) = status.session {
            println!(
                "camera {}: {} frames, {} faces, {} saves{}",
                session.camera_id,
                session.frames,
                session.faces,
                session.saves,
                session
                    .last_error
                    .map(|kind| format!(", last error {:?}", kind))
                    .unwrap_or_default()
            );
        }
        Ok(())
    }
}

fn print_event(event: &MonitorEvent) {
    match event {
        MonitorEvent::SessionStarted { camera_id } => println!("[camera {}] started", camera_id),
        MonitorEvent::SessionStopped { camera_id } => match camera_id {
            Some(id) => println!("[camera {}] stopped", id),
            None => println!("[capture] stopped"),
        },
        MonitorEvent::SessionFaulted { message, .. } => {
            println!("[capture] faulted: {} (use 'stop' then 'start')", message)
        }
        MonitorEvent::FacesDetected { camera_id, count } => {
            println!("[camera {}] {} face(s) detected", camera_id, count)
        }
        MonitorEvent::FrameSaved { path } => println!("[saved] {}", path.display()),
        MonitorEvent::SaveFailed { message, .. } => println!("[save failed] {}", message),
    }
}

fn print_help() {
    println!(
        "commands:
  signup <user> <password>   create an account
  login <user> <password>    log in (required for camera commands)
  logout                     stop capture and log out
  cameras [count]            list cameras that stream
  start <id>                 start monitoring a camera
  stop                       stop monitoring
  location [dir]             show or set the image save location
  snapshot <file>            write the latest displayed frame
  status                     show pipeline state
  quit                       exit"
    );
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}
