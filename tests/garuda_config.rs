use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use garuda_watch::config::GarudaConfig;
use garuda_watch::{InputKind, SourceRef};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "GARUDA_CONFIG",
        "GARUDA_API_ADDR",
        "GARUDA_DETECTOR",
        "GARUDA_MODEL_PATH",
        "GARUDA_CAMERA_DEVICE",
        "GARUDA_ALERT_API_BASE",
        "GARUDA_ALERT_COOLDOWN_SECS",
        "GARUDA_UTC_OFFSET_MINUTES",
        "GARUDA_PLACEHOLDER_PATH",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = GarudaConfig::load().expect("load config");
    assert_eq!(cfg.api_addr, "127.0.0.1:8790");
    assert_eq!(cfg.capture.camera_device, "/dev/video{index}");
    assert_eq!(cfg.capture.inference_width, 640);
    assert_eq!(cfg.detector.backend, "stub");
    assert_eq!(cfg.detector.stride, 3);
    assert_eq!(cfg.alert.cooldown, Duration::from_secs(10));
    assert_eq!(cfg.alert.workers, 2);
    assert_eq!(cfg.alert.queue_depth, 4);
    assert_eq!(cfg.alert.api_base, "https://api.telegram.org");
    assert_eq!(cfg.stream.jpeg_quality, 80);
    assert_eq!(cfg.utc_offset_minutes, None);
    assert_eq!(cfg.session.source, SourceRef::Camera(0));
    assert_eq!(cfg.session.window.from, "00:00:00");
    assert_eq!(cfg.session.window.to, "23:59:59");
    assert_eq!(cfg.session.playback_speed, 1.0);
    assert_eq!(cfg.session.target_fps, 15.0);
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "api": { "addr": "0.0.0.0:9000" },
            "capture": { "camera_device": "stub://camera?fps=25", "inference_width": 320 },
            "detector": { "stride": 5, "confidence": 0.6 },
            "alert": { "cooldown_secs": 30, "workers": 1, "caption": "Intruder" },
            "stream": { "jpeg_quality": 70 },
            "clock": { "utc_offset_minutes": 60 },
            "session": {
                "input_type": "File",
                "source_path": "clips/yard.mp4",
                "from_time": "18:00:00",
                "to_time": "23:00:00",
                "target_fps": "12"
            }
        }"#,
    );

    std::env::set_var("GARUDA_CONFIG", file.path());
    std::env::set_var("GARUDA_API_ADDR", "127.0.0.1:9100");
    std::env::set_var("GARUDA_ALERT_COOLDOWN_SECS", "45");
    std::env::set_var("GARUDA_UTC_OFFSET_MINUTES", "330");

    let cfg = GarudaConfig::load().expect("load config");
    clear_env();

    assert_eq!(cfg.api_addr, "127.0.0.1:9100");
    assert_eq!(cfg.capture.camera_device, "stub://camera?fps=25");
    assert_eq!(cfg.capture.inference_width, 320);
    assert_eq!(cfg.detector.stride, 5);
    assert_eq!(cfg.detector.confidence, 0.6);
    assert_eq!(cfg.alert.cooldown, Duration::from_secs(45));
    assert_eq!(cfg.alert.workers, 1);
    assert_eq!(cfg.alert.caption, "Intruder");
    assert_eq!(cfg.stream.jpeg_quality, 70);
    assert_eq!(cfg.utc_offset_minutes, Some(330));

    assert_eq!(cfg.session.input_kind(), InputKind::File);
    assert_eq!(
        cfg.session.source,
        SourceRef::File("clips/yard.mp4".into())
    );
    assert_eq!(cfg.session.window.from, "18:00:00");
    assert_eq!(cfg.session.target_fps, 12.0);

    let tuning = cfg.pipeline_tuning();
    assert_eq!(tuning.inference_width, 320);
    assert_eq!(tuning.detection_stride, 5);
    assert_eq!(tuning.alert_cooldown, Duration::from_secs(45));
    assert_eq!(tuning.alert_caption, "Intruder");
}

#[test]
fn session_defaults_are_clamped_not_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(r#"{ "session": { "playback_speed": 50, "target_fps": 0 } }"#);
    std::env::set_var("GARUDA_CONFIG", file.path());
    let cfg = GarudaConfig::load().expect("load config");
    clear_env();

    assert_eq!(cfg.session.playback_speed, 10.0);
    assert_eq!(cfg.session.target_fps, 1.0);
}

#[test]
fn rejects_values_that_cannot_be_clamped() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cases = [
        r#"{ "api": { "addr": "not-an-address" } }"#,
        r#"{ "alert": { "workers": 0 } }"#,
        r#"{ "alert": { "queue_depth": 0 } }"#,
        r#"{ "detector": { "backend": "magic" } }"#,
        r#"{ "detector": { "backend": "tract" } }"#,
        r#"{ "detector": { "confidence": 1.5 } }"#,
        r#"{ "stream": { "jpeg_quality": 0 } }"#,
        r#"{ "clock": { "utc_offset_minutes": 5000 } }"#,
    ];
    for json in cases {
        let file = write_config(json);
        std::env::set_var("GARUDA_CONFIG", file.path());
        assert!(GarudaConfig::load().is_err(), "accepted {}", json);
    }

    std::env::set_var("GARUDA_CONFIG", "/nonexistent/garuda.json");
    assert!(GarudaConfig::load().is_err());

    clear_env();
    std::env::set_var("GARUDA_ALERT_COOLDOWN_SECS", "soon");
    assert!(GarudaConfig::load().is_err());
    clear_env();
}

#[test]
fn placeholder_comes_from_file_or_builtin_card() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let builtin = GarudaConfig::load()
        .expect("load config")
        .placeholder_jpeg()
        .expect("builtin placeholder");
    assert_eq!(&builtin[..2], &[0xFF, 0xD8]);

    let custom = write_config("not really a jpeg");
    std::env::set_var("GARUDA_PLACEHOLDER_PATH", custom.path());
    let cfg = GarudaConfig::load().expect("load config");
    clear_env();
    assert_eq!(cfg.placeholder_jpeg().expect("custom placeholder"), b"not really a jpeg");

    let mut missing = cfg.clone();
    missing.stream.placeholder_path = Some("/nonexistent/idle.jpg".into());
    assert!(missing.placeholder_jpeg().is_err());
}
