use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fixup::{parse_octal_mode, resolve_user_group};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/fakecam/fakecam.toml";

const DEFAULT_BASE_PATH: &str = "/home/camerauser/driveway";
const DEFAULT_HOST_STAGING_PATH: &str = "/var/lib/fakecam";
const DEFAULT_CONTAINER_STAGING_PATH: &str = "/fakecam";
const DEFAULT_STANDBY_VIDEO_NAME: &str = "waiting.mp4";
const DEFAULT_ERROR_VIDEO_NAME: &str = "ERROR_ALERT.mp4";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
const DEFAULT_STABILITY_SAMPLES: u32 = 2;
const DEFAULT_MIN_QUIET_SECS: u64 = 5;
const DEFAULT_RETENTION_HORIZON_SECS: u64 = 300;
const DEFAULT_ROLLOVER_GRACE_SECS: u64 = 300;
const DEFAULT_RETENTION_DAYS: u64 = 7;
const DEFAULT_SEND_TO: &str = "root";
const DEFAULT_REQUIRED_CONTAINERS: [&str; 2] = ["obs_compositor", "mediamtx"];
const DEFAULT_HEALTH_CHECK_SECS: u64 = 300;

const DEFAULT_TRAILING_MARGIN_SECS: u64 = 2;
const DEFAULT_CLIP_SECS: u64 = 30;
const DEFAULT_MAX_CLIP_SECS: u64 = 120;
const DEFAULT_RETRY_BASE_SECS: u64 = 5;
const DEFAULT_RETRY_MAX_SECS: u64 = 300;

const DEFAULT_OBS_HOST: &str = "127.0.0.1";
const DEFAULT_OBS_PORT: i64 = 4455;
const DEFAULT_OBS_TIMEOUT_SECS: u64 = 5;
const DEFAULT_OBS_MEDIA_INPUT: &str = "Alert_Video";
const DEFAULT_OBS_SCENE_ALERT: &str = "Alert";
const DEFAULT_OBS_SCENE_STANDBY: &str = "Standby";

const DEFAULT_FILE_MODE: u32 = 0o644;
const DEFAULT_DIR_MODE: u32 = 0o755;

#[derive(Debug, Deserialize, Default)]
struct FakecamConfigFile {
    monitor: Option<MonitorConfigFile>,
    playback: Option<PlaybackConfigFile>,
    obs: Option<ObsConfigFile>,
    permissions: Option<PermissionsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    base_path: Option<PathBuf>,
    host_staging_path: Option<PathBuf>,
    container_staging_path: Option<PathBuf>,
    standby_video_name: Option<String>,
    error_video_name: Option<String>,
    poll_interval_seconds: Option<u64>,
    stability_samples: Option<u32>,
    min_quiet_seconds: Option<u64>,
    retention_horizon: Option<u64>,
    rollover_grace_seconds: Option<u64>,
    skip_existing_on_start: Option<bool>,
    retention_days: Option<u64>,
    log_file: Option<PathBuf>,
    send_to: Option<String>,
    required_containers: Option<Vec<String>>,
    health_check_seconds: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct PlaybackConfigFile {
    trailing_margin_seconds: Option<u64>,
    default_clip_seconds: Option<u64>,
    max_clip_seconds: Option<u64>,
    retry_base_seconds: Option<u64>,
    retry_max_seconds: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ObsConfigFile {
    host: Option<String>,
    port: Option<i64>,
    password: Option<String>,
    timeout_seconds: Option<u64>,
    media_input: Option<String>,
    scene_alert: Option<String>,
    scene_standby: Option<String>,
    scene_error: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PermissionsConfigFile {
    enabled: Option<bool>,
    user_group: Option<String>,
    file_mask: Option<ModeValue>,
    directory_mask: Option<ModeValue>,
}

/// Masks may be written as strings (`"0644"`, `"0o644"`) or bare integers
/// whose decimal digits are read as octal (`644`).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ModeValue {
    Text(String),
    Digits(u64),
}

impl ModeValue {
    fn to_mode(&self) -> Option<u32> {
        match self {
            ModeValue::Text(raw) => parse_octal_mode(raw),
            ModeValue::Digits(digits) => parse_octal_mode(&digits.to_string()),
        }
    }
}

/// Parsed, defaulted configuration. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct FakecamConfig {
    pub monitor: MonitorSettings,
    pub playback: PlaybackSettings,
    pub obs: ObsSettings,
    pub permissions: PermissionSettings,
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub base_path: PathBuf,
    pub host_staging_path: PathBuf,
    pub container_staging_path: PathBuf,
    pub standby_video_name: String,
    pub error_video_name: String,
    pub poll_interval: Duration,
    pub stability_samples: u32,
    pub min_quiet: Duration,
    pub retention_horizon: Duration,
    pub rollover_grace: Duration,
    pub skip_existing_on_start: bool,
    pub retention_days: u64,
    pub log_file: Option<PathBuf>,
    pub send_to: String,
    pub required_containers: Vec<String>,
    pub health_check_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct PlaybackSettings {
    pub trailing_margin: Duration,
    pub default_clip: Duration,
    pub max_clip: Duration,
    pub retry_base: Duration,
    pub retry_max: Duration,
}

#[derive(Debug, Clone)]
pub struct ObsSettings {
    pub host: String,
    /// Kept wide so out-of-range values survive parsing and surface in validation.
    pub port: i64,
    pub password: String,
    pub timeout: Duration,
    pub media_input: String,
    pub scene_alert: String,
    pub scene_standby: String,
    pub scene_error: String,
}

#[derive(Debug, Clone)]
pub struct PermissionSettings {
    pub enabled: bool,
    pub user_group: String,
    /// `None` when the configured mask could not be parsed.
    pub file_mode: Option<u32>,
    pub dir_mode: Option<u32>,
}

/// Outcome of [`FakecamConfig::validate`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Collapses the report into a single startup error.
    pub fn into_result(self) -> Result<()> {
        if self.errors.is_empty() {
            return Ok(());
        }
        Err(anyhow!("invalid configuration: {}", self.errors.join("; ")))
    }
}

impl FakecamConfig {
    /// Loads from `path`, or from `FAKECAM_CONFIG`, falling back to defaults
    /// when neither names a file. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("FAKECAM_CONFIG")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        let file_cfg = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => read_config_file(&path)?,
            None => FakecamConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        Ok(cfg)
    }

    /// Parses configuration text without touching the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: FakecamConfigFile =
            toml::from_str(raw).map_err(|e| anyhow!("invalid config: {}", e))?;
        Ok(Self::from_file(file))
    }

    fn from_file(file: FakecamConfigFile) -> Self {
        let m = file.monitor.unwrap_or_default();
        let p = file.playback.unwrap_or_default();
        let o = file.obs.unwrap_or_default();
        let perms = file.permissions.unwrap_or_default();

        let scene_alert = o
            .scene_alert
            .unwrap_or_else(|| DEFAULT_OBS_SCENE_ALERT.to_string());
        let monitor = MonitorSettings {
            base_path: m
                .base_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BASE_PATH)),
            host_staging_path: m
                .host_staging_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_HOST_STAGING_PATH)),
            container_staging_path: m
                .container_staging_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONTAINER_STAGING_PATH)),
            standby_video_name: m
                .standby_video_name
                .unwrap_or_else(|| DEFAULT_STANDBY_VIDEO_NAME.to_string()),
            error_video_name: m
                .error_video_name
                .unwrap_or_else(|| DEFAULT_ERROR_VIDEO_NAME.to_string()),
            poll_interval: Duration::from_secs(
                m.poll_interval_seconds.unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            ),
            stability_samples: m.stability_samples.unwrap_or(DEFAULT_STABILITY_SAMPLES),
            min_quiet: Duration::from_secs(m.min_quiet_seconds.unwrap_or(DEFAULT_MIN_QUIET_SECS)),
            retention_horizon: Duration::from_secs(
                m.retention_horizon.unwrap_or(DEFAULT_RETENTION_HORIZON_SECS),
            ),
            rollover_grace: Duration::from_secs(
                m.rollover_grace_seconds
                    .unwrap_or(DEFAULT_ROLLOVER_GRACE_SECS),
            ),
            skip_existing_on_start: m.skip_existing_on_start.unwrap_or(true),
            retention_days: m.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS),
            log_file: m.log_file.filter(|p| !p.as_os_str().is_empty()),
            send_to: m.send_to.unwrap_or_else(|| DEFAULT_SEND_TO.to_string()),
            required_containers: m.required_containers.unwrap_or_else(|| {
                DEFAULT_REQUIRED_CONTAINERS
                    .iter()
                    .map(|c| c.to_string())
                    .collect()
            }),
            health_check_interval: Duration::from_secs(
                m.health_check_seconds.unwrap_or(DEFAULT_HEALTH_CHECK_SECS),
            ),
        };
        let playback = PlaybackSettings {
            trailing_margin: Duration::from_secs(
                p.trailing_margin_seconds
                    .unwrap_or(DEFAULT_TRAILING_MARGIN_SECS),
            ),
            default_clip: Duration::from_secs(p.default_clip_seconds.unwrap_or(DEFAULT_CLIP_SECS)),
            max_clip: Duration::from_secs(p.max_clip_seconds.unwrap_or(DEFAULT_MAX_CLIP_SECS)),
            retry_base: Duration::from_secs(
                p.retry_base_seconds.unwrap_or(DEFAULT_RETRY_BASE_SECS),
            ),
            retry_max: Duration::from_secs(p.retry_max_seconds.unwrap_or(DEFAULT_RETRY_MAX_SECS)),
        };
        let obs = ObsSettings {
            host: o.host.unwrap_or_else(|| DEFAULT_OBS_HOST.to_string()),
            port: o.port.unwrap_or(DEFAULT_OBS_PORT),
            password: o.password.unwrap_or_default(),
            timeout: Duration::from_secs(o.timeout_seconds.unwrap_or(DEFAULT_OBS_TIMEOUT_SECS)),
            media_input: o
                .media_input
                .unwrap_or_else(|| DEFAULT_OBS_MEDIA_INPUT.to_string()),
            scene_standby: o
                .scene_standby
                .unwrap_or_else(|| DEFAULT_OBS_SCENE_STANDBY.to_string()),
            scene_error: o.scene_error.unwrap_or_else(|| scene_alert.clone()),
            scene_alert,
        };
        let permissions = PermissionSettings {
            enabled: perms.enabled.unwrap_or(true),
            user_group: perms.user_group.unwrap_or_default().trim().to_string(),
            file_mode: perms
                .file_mask
                .map_or(Some(DEFAULT_FILE_MODE), |v| v.to_mode()),
            dir_mode: perms
                .directory_mask
                .map_or(Some(DEFAULT_DIR_MODE), |v| v.to_mode()),
        };
        Self {
            monitor,
            playback,
            obs,
            permissions,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_value("FAKECAM_BASE_PATH") {
            self.monitor.base_path = PathBuf::from(path);
        }
        if let Some(host) = env_value("FAKECAM_OBS_HOST") {
            self.obs.host = host;
        }
        if let Some(port) = env_value("FAKECAM_OBS_PORT") {
            self.obs.port = port
                .parse()
                .map_err(|_| anyhow!("FAKECAM_OBS_PORT must be an integer port number"))?;
        }
        if let Some(password) = env_value("FAKECAM_OBS_PASSWORD") {
            self.obs.password = password;
        }
        if let Some(send_to) = env_value("FAKECAM_SEND_TO") {
            self.monitor.send_to = send_to;
        }
        if let Some(log_file) = env_value("FAKECAM_LOG_FILE") {
            self.monitor.log_file = Some(PathBuf::from(log_file));
        }
        Ok(())
    }

    /// Host-side location of the standby loop.
    pub fn standby_video_host_path(&self) -> PathBuf {
        self.monitor
            .host_staging_path
            .join(&self.monitor.standby_video_name)
    }

    /// Host-side location of the error video.
    pub fn error_video_host_path(&self) -> PathBuf {
        self.monitor
            .host_staging_path
            .join(&self.monitor.error_video_name)
    }

    /// Error video as the composer sees it.
    pub fn error_video_composer_path(&self) -> PathBuf {
        self.monitor
            .container_staging_path
            .join(&self.monitor.error_video_name)
    }

    /// Checks paths, connection parameters and intervals. Never fails itself;
    /// problems land in the returned report.
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        let errors = &mut report.errors;
        let warnings = &mut report.warnings;
        let m = &self.monitor;

        if m.base_path.as_os_str().is_empty() {
            errors.push("monitor.base_path is empty".to_string());
        } else {
            if !m.base_path.is_absolute() {
                warnings.push(format!(
                    "monitor.base_path is not absolute: {}",
                    m.base_path.display()
                ));
            }
            if !m.base_path.is_dir() {
                errors.push(format!(
                    "monitor.base_path does not exist or is not a directory: {}",
                    m.base_path.display()
                ));
            }
        }

        if !m.host_staging_path.is_absolute() {
            warnings.push(format!(
                "monitor.host_staging_path is not absolute: {}",
                m.host_staging_path.display()
            ));
        }
        if !m.host_staging_path.is_dir() {
            errors.push(format!(
                "monitor.host_staging_path does not exist or is not a directory: {}",
                m.host_staging_path.display()
            ));
        } else {
            let standby = self.standby_video_host_path();
            if let Err(e) = check_readable_file(&standby) {
                errors.push(format!("standby video unusable at {}: {}", standby.display(), e));
            }
            let error_video = self.error_video_host_path();
            if !error_video.is_file() {
                warnings.push(format!(
                    "error video not found at {} (shown while the composer is failing)",
                    error_video.display()
                ));
            }
        }
        if m.standby_video_name.trim().is_empty() {
            errors.push("monitor.standby_video_name is empty".to_string());
        }
        if m.error_video_name.trim().is_empty() {
            errors.push("monitor.error_video_name is empty".to_string());
        }
        if m.send_to.trim().is_empty() {
            warnings.push("monitor.send_to is empty; alerts will only be logged".to_string());
        }

        if self.obs.host.trim().is_empty() {
            errors.push("obs.host is empty".to_string());
        }
        if !(1..=65535).contains(&self.obs.port) {
            errors.push(format!("obs.port must be 1-65535, got: {}", self.obs.port));
        }
        for (key, value) in [
            ("obs.media_input", &self.obs.media_input),
            ("obs.scene_alert", &self.obs.scene_alert),
            ("obs.scene_standby", &self.obs.scene_standby),
            ("obs.scene_error", &self.obs.scene_error),
        ] {
            if value.trim().is_empty() {
                errors.push(format!("{} is empty", key));
            }
        }

        for (key, value) in [
            ("monitor.poll_interval_seconds", m.poll_interval),
            ("monitor.health_check_seconds", m.health_check_interval),
            ("obs.timeout_seconds", self.obs.timeout),
            ("playback.max_clip_seconds", self.playback.max_clip),
            ("playback.retry_base_seconds", self.playback.retry_base),
        ] {
            if value.is_zero() {
                errors.push(format!("{} must be a positive integer", key));
            }
        }
        if m.stability_samples == 0 {
            errors.push("monitor.stability_samples must be a positive integer".to_string());
        }
        if self.playback.retry_max < self.playback.retry_base {
            errors.push(
                "playback.retry_max_seconds must not be smaller than retry_base_seconds"
                    .to_string(),
            );
        }

        if self.permissions.enabled {
            match self.permissions.file_mode {
                Some(mode) if mode <= 0o777 => {}
                _ => errors.push("permissions.file_mask must be an octal mode (0-0777)".to_string()),
            }
            match self.permissions.dir_mode {
                Some(mode) if mode <= 0o777 => {}
                _ => errors
                    .push("permissions.directory_mask must be an octal mode (0-0777)".to_string()),
            }
            if !self.permissions.user_group.is_empty() {
                if let Err(e) = resolve_user_group(&self.permissions.user_group) {
                    errors.push(format!(
                        "permissions.user_group is invalid ({:?}): {}",
                        self.permissions.user_group, e
                    ));
                }
            }
        }

        report
    }
}

fn read_config_file(path: &Path) -> Result<FakecamConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn check_readable_file(path: &Path) -> Result<()> {
    let meta = std::fs::metadata(path).map_err(|e| anyhow!("{}", e))?;
    if !meta.is_file() {
        return Err(anyhow!("not a regular file"));
    }
    std::fs::File::open(path).map_err(|e| anyhow!("{}", e))?;
    Ok(())
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() -> Result<()> {
        let cfg = FakecamConfig::from_toml_str("")?;
        assert_eq!(cfg.monitor.base_path, PathBuf::from(DEFAULT_BASE_PATH));
        assert_eq!(cfg.monitor.container_staging_path, PathBuf::from("/fakecam"));
        assert_eq!(cfg.monitor.error_video_name, "ERROR_ALERT.mp4");
        assert_eq!(cfg.monitor.required_containers, vec!["obs_compositor", "mediamtx"]);
        assert_eq!(cfg.monitor.retention_days, 7);
        assert_eq!(cfg.monitor.send_to, "root");
        assert!(cfg.monitor.log_file.is_none());
        assert_eq!(cfg.obs.host, "127.0.0.1");
        assert_eq!(cfg.obs.port, 4455);
        assert_eq!(cfg.obs.media_input, "Alert_Video");
        assert_eq!(cfg.obs.scene_alert, "Alert");
        assert_eq!(cfg.obs.scene_standby, "Standby");
        assert_eq!(cfg.obs.scene_error, "Alert");
        assert!(cfg.permissions.enabled);
        assert_eq!(cfg.permissions.file_mode, Some(0o644));
        assert_eq!(cfg.permissions.dir_mode, Some(0o755));
        Ok(())
    }

    #[test]
    fn permission_masks_accept_strings_and_digits() -> Result<()> {
        let cfg = FakecamConfig::from_toml_str(
            r#"
            [permissions]
            enabled = false
            user_group = "1000:1001"
            file_mask = 600
            directory_mask = "0o750"
            "#,
        )?;
        assert!(!cfg.permissions.enabled);
        assert_eq!(cfg.permissions.user_group, "1000:1001");
        assert_eq!(cfg.permissions.file_mode, Some(0o600));
        assert_eq!(cfg.permissions.dir_mode, Some(0o750));
        Ok(())
    }

    #[test]
    fn out_of_range_port_is_reported() -> Result<()> {
        let cfg = FakecamConfig::from_toml_str("[obs]\nport = 70000\n")?;
        let report = cfg.validate();
        assert!(report.errors.iter().any(|e| e.contains("obs.port")));
        Ok(())
    }

    #[test]
    fn unparsable_mask_is_reported_only_when_enabled() -> Result<()> {
        let enabled = FakecamConfig::from_toml_str("[permissions]\nfile_mask = \"rw-r--r--\"\n")?;
        assert!(enabled
            .validate()
            .errors
            .iter()
            .any(|e| e.contains("file_mask")));

        let disabled = FakecamConfig::from_toml_str(
            "[permissions]\nenabled = false\nfile_mask = \"rw-r--r--\"\n",
        )?;
        assert!(!disabled
            .validate()
            .errors
            .iter()
            .any(|e| e.contains("file_mask")));
        Ok(())
    }

    #[test]
    fn retry_cap_below_base_is_rejected() -> Result<()> {
        let cfg = FakecamConfig::from_toml_str(
            "[playback]\nretry_base_seconds = 30\nretry_max_seconds = 10\n",
        )?;
        assert!(cfg
            .validate()
            .errors
            .iter()
            .any(|e| e.contains("retry_max_seconds")));
        Ok(())
    }
}
