//! camera_probe - list cameras that open and stream a frame.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;

use eyewatch::config::CameraBackend;
use eyewatch::ingest::{self, CameraRegistry};
use eyewatch::ui;
use eyewatch::MonitorConfig;

#[derive(Parser, Debug)]
#[command(name = "camera_probe", about = "List cameras that deliver frames")]
struct Args {
    /// Probe device indices 0..N (defaults to the configured probe count)
    #[arg(long, value_name = "N")]
    count: Option<u32>,

    /// Use the synthetic camera driver instead of the configured one
    #[arg(long)]
    synthetic: bool,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::from_flag(Some(&args.ui), std::io::stderr().is_terminal());

    let mut cfg = {
        let _stage = ui.stage("Load configuration");
        MonitorConfig::load_camera_only()?
    };
    if args.synthetic {
        cfg.camera.backend = CameraBackend::Synthetic;
    }
    let count = args.count.unwrap_or(cfg.camera.probe_count);
    if count == 0 {
        return Err(anyhow!("--count must be >= 1"));
    }

    let mut driver = ingest::build_driver(&cfg.camera)?;
    let cameras = {
        let mut stage = ui.stage(&format!("Probe {} camera indices", count));
        let cameras = CameraRegistry::new().enumerate(driver.as_mut(), count, None);
        stage.set_outcome(format!("{} streaming", cameras.len()));
        cameras
    };

    if args.json {
        let listed: Vec<_> = cameras
            .iter()
            .map(|camera| serde_json::json!({ "id": camera.id, "label": camera.label }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&listed)?);
    } else if cameras.is_empty() {
        println!("no cameras found");
    } else {
        for camera in &cameras {
            println!("{}\t{}", camera.id, camera.label);
        }
    }
    Ok(())
}
