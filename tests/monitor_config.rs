use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use eyewatch::config::{CameraBackend, DetectorBackendKind};
use eyewatch::{MonitorConfig, SavePolicy};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "EYEWATCH_CONFIG",
        "EYEWATCH_CAMERA_BACKEND",
        "EYEWATCH_SYNTHETIC_CAMERAS",
        "EYEWATCH_PROBE_COUNT",
        "EYEWATCH_TICK_MS",
        "EYEWATCH_SETTINGS_PATH",
        "EYEWATCH_DETECTOR",
        "EYEWATCH_CASCADE",
        "EYEWATCH_CASCADE_DIRS",
        "EYEWATCH_SAVE_POLICY",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let settings_path = file.path().with_extension("settings.json");
    let json = format!(
        r#"{{
            "settings_path": "{}",
            "camera": {{
                "backend": "synthetic",
                "synthetic_cameras": [3, 1, 3],
                "probe_count": 8,
                "width": 320,
                "height": 240
            }},
            "capture": {{
                "tick_ms": 25,
                "max_transient_failures": 5,
                "save_policy": "per_frame",
                "unique_filenames": true
            }},
            "display": {{ "width": 640, "height": 360 }},
            "detector": {{
                "backend": "stub",
                "scale_factor": 1.2,
                "min_neighbors": 2,
                "min_size": 40
            }}
        }}"#,
        settings_path.display()
    );
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("EYEWATCH_CONFIG", file.path());
    std::env::set_var("EYEWATCH_PROBE_COUNT", "3");
    std::env::set_var("EYEWATCH_TICK_MS", "50");

    let cfg = MonitorConfig::load().expect("load config");

    assert_eq!(cfg.settings_path, settings_path);
    assert_eq!(cfg.camera.backend, CameraBackend::Synthetic);
    assert_eq!(cfg.camera.synthetic_cameras, vec![1, 3]);
    assert_eq!(cfg.camera.probe_count, 3);
    assert_eq!((cfg.camera.width, cfg.camera.height), (320, 240));
    assert_eq!(cfg.capture.tick_interval, Duration::from_millis(50));
    assert_eq!(cfg.capture.max_transient_failures, 5);
    assert_eq!(cfg.capture.save_policy, SavePolicy::PerFrame);
    assert!(cfg.capture.unique_filenames);
    assert_eq!((cfg.display.width, cfg.display.height), (640, 360));
    assert_eq!(cfg.detector.backend, DetectorBackendKind::Stub);
    assert_eq!(cfg.detector.params.scale_factor, 1.2);
    assert_eq!(cfg.detector.params.min_neighbors, 2);
    assert_eq!(cfg.detector.params.min_width, 40);

    clear_env();
}

#[test]
fn env_overrides_apply_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("EYEWATCH_CAMERA_BACKEND", "synthetic");
    std::env::set_var("EYEWATCH_SYNTHETIC_CAMERAS", "2, 0");
    std::env::set_var("EYEWATCH_DETECTOR", "haar");
    std::env::set_var("EYEWATCH_CASCADE", "/opt/models/face.json");
    std::env::set_var("EYEWATCH_SAVE_POLICY", "per-face");

    let cfg = MonitorConfig::load().expect("load config");
    assert_eq!(cfg.camera.synthetic_cameras, vec![0, 2]);
    assert_eq!(cfg.detector.backend, DetectorBackendKind::Haar);
    assert_eq!(
        cfg.detector.cascade_path.as_deref(),
        Some(std::path::Path::new("/opt/models/face.json"))
    );
    assert_eq!(cfg.capture.save_policy, SavePolicy::PerFace);

    clear_env();
}

#[test]
fn cascade_backends_require_a_model_path() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let empty = tempfile::tempdir().expect("temp dir");
    std::env::set_var("EYEWATCH_DETECTOR", "haar");
    std::env::set_var("EYEWATCH_CASCADE_DIRS", empty.path());
    let err = MonitorConfig::load().expect_err("no model anywhere");
    assert!(
        format!("{:#}", err).contains("haarcascade_frontalface_default.xml"),
        "{:#}",
        err
    );
    // Camera-only loading does not look at the detector.
    assert!(MonitorConfig::load_camera_only().is_ok());

    clear_env();
}

#[test]
fn stock_cascade_is_found_in_search_dirs() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let empty = tempfile::tempdir().expect("temp dir");
    let opencv = tempfile::tempdir().expect("temp dir");
    let stock = opencv.path().join(eyewatch::config::STOCK_CASCADE);
    std::fs::write(&stock, "<opencv_storage/>").expect("write cascade");
    std::env::set_var(
        "EYEWATCH_CASCADE_DIRS",
        format!("{}, {}", empty.path().display(), opencv.path().display()),
    );

    let cfg = MonitorConfig::load().expect("load config");
    assert_eq!(cfg.detector.backend, DetectorBackendKind::Haar);
    assert_eq!(cfg.detector.cascade_path, Some(stock));

    // An explicit path wins over the search.
    std::env::set_var("EYEWATCH_CASCADE", "/opt/models/face.xml");
    let cfg = MonitorConfig::load().expect("load config");
    assert_eq!(
        cfg.detector.cascade_path.as_deref(),
        Some(std::path::Path::new("/opt/models/face.xml"))
    );

    clear_env();
}

#[test]
fn invalid_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    std::env::set_var("EYEWATCH_DETECTOR", "stub");

    std::env::set_var("EYEWATCH_PROBE_COUNT", "0");
    assert!(MonitorConfig::load().is_err());
    std::env::set_var("EYEWATCH_PROBE_COUNT", "many");
    assert!(MonitorConfig::load().is_err());
    std::env::remove_var("EYEWATCH_PROBE_COUNT");

    std::env::set_var("EYEWATCH_SAVE_POLICY", "sometimes");
    assert!(MonitorConfig::load().is_err());
    std::env::remove_var("EYEWATCH_SAVE_POLICY");

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{ "detector": { "scale_factor": 1.0 } }"#)
        .expect("write config");
    std::env::set_var("EYEWATCH_CONFIG", file.path());
    assert!(MonitorConfig::load().is_err());

    clear_env();
}
