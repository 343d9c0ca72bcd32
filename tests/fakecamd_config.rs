use std::path::Path;
use std::process::Command;
use std::sync::Mutex;

use tempfile::{NamedTempFile, TempDir};

use fakecam::config::FakecamConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

const ENV_KEYS: [&str; 7] = [
    "FAKECAM_CONFIG",
    "FAKECAM_BASE_PATH",
    "FAKECAM_OBS_HOST",
    "FAKECAM_OBS_PORT",
    "FAKECAM_OBS_PASSWORD",
    "FAKECAM_SEND_TO",
    "FAKECAM_LOG_FILE",
];

fn clear_env() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, contents.as_bytes()).expect("write config");
    file
}

/// Upload root and staging directory laid out like a real install.
fn install(with_standby: bool) -> (TempDir, String) {
    let root = tempfile::tempdir().expect("tempdir");
    let uploads = root.path().join("driveway");
    let staging = root.path().join("staging");
    std::fs::create_dir_all(&uploads).expect("uploads");
    std::fs::create_dir_all(&staging).expect("staging");
    if with_standby {
        std::fs::write(staging.join("waiting.mp4"), b"standby").expect("standby");
        std::fs::write(staging.join("ERROR_ALERT.mp4"), b"error").expect("error video");
    }
    let toml = format!(
        r#"
        [monitor]
        base_path = "{}"
        host_staging_path = "{}"
        send_to = "ops@example.com"
        required_containers = []

        [permissions]
        enabled = false
        "#,
        uploads.display(),
        staging.display()
    );
    (root, toml)
}

fn run_test_config(config: &Path) -> std::process::Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_fakecamd"));
    for key in ENV_KEYS {
        cmd.env_remove(key);
    }
    cmd.arg("--config")
        .arg(config)
        .arg("--test-config")
        .output()
        .expect("run fakecamd")
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"
        [monitor]
        base_path = "/srv/uploads"
        poll_interval_seconds = 3
        stability_samples = 4

        [playback]
        retry_base_seconds = 2
        retry_max_seconds = 60

        [obs]
        host = "10.0.0.5"
        port = 4460
        scene_alert = "Camera"
        "#,
    );

    std::env::set_var("FAKECAM_CONFIG", file.path());
    std::env::set_var("FAKECAM_OBS_PORT", "4470");
    std::env::set_var("FAKECAM_SEND_TO", "ops@example.com");

    let cfg = FakecamConfig::load(None).expect("load config");
    assert_eq!(cfg.monitor.base_path, Path::new("/srv/uploads"));
    assert_eq!(cfg.monitor.poll_interval.as_secs(), 3);
    assert_eq!(cfg.monitor.stability_samples, 4);
    assert_eq!(cfg.playback.retry_base.as_secs(), 2);
    assert_eq!(cfg.playback.retry_max.as_secs(), 60);
    assert_eq!(cfg.obs.host, "10.0.0.5");
    assert_eq!(cfg.obs.port, 4470);
    assert_eq!(cfg.obs.scene_alert, "Camera");
    assert_eq!(cfg.obs.scene_error, "Camera");
    assert_eq!(cfg.monitor.send_to, "ops@example.com");

    clear_env();
}

#[test]
fn blank_env_values_do_not_override() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config("[obs]\nhost = \"10.0.0.5\"\n");
    std::env::set_var("FAKECAM_OBS_HOST", "   ");
    let cfg = FakecamConfig::load(Some(file.path())).expect("load config");
    assert_eq!(cfg.obs.host, "10.0.0.5");

    clear_env();
}

#[test]
fn rejects_non_numeric_port_override() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config("");
    std::env::set_var("FAKECAM_OBS_PORT", "obs");
    let err = FakecamConfig::load(Some(file.path())).expect_err("port must be numeric");
    assert!(err.to_string().contains("FAKECAM_OBS_PORT"));

    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let err = FakecamConfig::load(Some(Path::new("/nonexistent/fakecam.toml")))
        .expect_err("file does not exist");
    assert!(err.to_string().contains("failed to read config file"));
}

#[test]
fn missing_standby_media_fails_validation() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let (_root, toml) = install(false);
    let cfg = FakecamConfig::from_toml_str(&toml).expect("parse");
    let report = cfg.validate();
    assert!(!report.is_ok());
    assert!(report.errors.iter().any(|e| e.contains("standby video")));
    assert!(report.warnings.iter().any(|w| w.contains("error video")));
}

#[test]
fn test_config_without_standby_media_exits_non_zero() {
    let _guard = ENV_LOCK.lock().unwrap();
    let (_root, toml) = install(false);
    let file = write_config(&toml);

    let output = run_test_config(file.path());
    assert_eq!(output.status.code(), Some(2));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(&format!("Config: {}", file.path().display())));
    assert!(stdout.contains("ERROR: standby video"));
    assert!(!stdout.lines().any(|line| line == "OK"));
}

#[test]
fn test_config_with_complete_install_prints_ok() {
    let _guard = ENV_LOCK.lock().unwrap();
    let (_root, toml) = install(true);
    let file = write_config(&toml);

    let output = run_test_config(file.path());
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.lines().any(|line| line == "OK"));
}

#[test]
fn test_config_with_unreadable_file_exits_non_zero() {
    let _guard = ENV_LOCK.lock().unwrap();
    let output = run_test_config(Path::new("/nonexistent/fakecam.toml"));
    assert_eq!(output.status.code(), Some(2));
}
