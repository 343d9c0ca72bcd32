//! Periodic liveness check of the containers the stream depends on.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::alert::{AlertSink, Severity};
use crate::subprocess::wait_bounded;

const DEFAULT_INSPECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Answers whether a named container is running.
pub trait ContainerProbe {
    fn is_running(&self, name: &str) -> Result<bool>;
}

/// Asks the local Docker daemon via `docker inspect`. A daemon that does not
/// answer within the timeout counts as a failed check.
#[derive(Clone, Debug)]
pub struct DockerProbe {
    program: String,
    timeout: Duration,
}

impl Default for DockerProbe {
    fn default() -> Self {
        Self::with_program("docker", DEFAULT_INSPECT_TIMEOUT)
    }
}

impl DockerProbe {
    pub fn with_program(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

impl ContainerProbe for DockerProbe {
    fn is_running(&self, name: &str) -> Result<bool> {
        let mut child = Command::new(&self.program)
            .args(["inspect", "-f", "{{.State.Running}}", name])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| anyhow!("failed to run {} inspect: {}", self.program, e))?;
        let status = wait_bounded(&mut child, self.timeout)
            .with_context(|| format!("failed to wait for {} inspect", self.program))?
            .ok_or_else(|| {
                anyhow!(
                    "{} inspect {} timed out after {:?}",
                    self.program,
                    name,
                    self.timeout
                )
            })?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_string(&mut stdout)?;
        }
        if let Some(mut err) = child.stderr.take() {
            err.read_to_string(&mut stderr)?;
        }
        if !status.success() {
            return Err(anyhow!(
                "{} inspect {} failed: {}",
                self.program,
                name,
                stderr.trim()
            ));
        }
        Ok(stdout.trim() == "true")
    }
}

pub struct HealthCheck {
    containers: Vec<String>,
    interval: Duration,
    last_run: Option<Instant>,
    probe: Box<dyn ContainerProbe>,
}

impl std::fmt::Debug for HealthCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheck")
            .field("containers", &self.containers)
            .field("interval", &self.interval)
            .field("last_run", &self.last_run)
            .finish()
    }
}

impl HealthCheck {
    pub fn new(containers: Vec<String>, interval: Duration, probe: Box<dyn ContainerProbe>) -> Self {
        Self {
            containers,
            interval,
            last_run: None,
            probe,
        }
    }

    pub fn set_probe(&mut self, probe: Box<dyn ContainerProbe>) {
        self.probe = probe;
    }

    pub fn is_enabled(&self) -> bool {
        !self.containers.is_empty()
    }

    /// The first check runs one interval after startup.
    pub fn due(&mut self, now: Instant) -> bool {
        if !self.is_enabled() {
            return false;
        }
        match self.last_run {
            None => {
                self.last_run = Some(now);
                false
            }
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// Checks every container and alerts for each one that is down.
    /// Returns the names that failed.
    pub fn run(&mut self, now: Instant, alerts: &dyn AlertSink) -> Vec<String> {
        self.last_run = Some(now);
        let mut down = Vec::new();
        for name in &self.containers {
            let problem = match self.probe.is_running(name) {
                Ok(true) => continue,
                Ok(false) => format!("container {} is not running", name),
                Err(e) => e.to_string(),
            };
            log::error!("container health check failed: {}", problem);
            alerts.notify(
                Severity::Critical,
                &format!("container {} down", name),
                &format!("Health check failed for {}.\nError: {}", name, problem),
            );
            down.push(name.clone());
        }
        down
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::MemoryAlertSink;

    struct FixedProbe(Vec<(&'static str, Result<bool, &'static str>)>);

    impl ContainerProbe for FixedProbe {
        fn is_running(&self, name: &str) -> Result<bool> {
            self.0
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, r)| r.map_err(|e| anyhow!(e)))
                .unwrap_or_else(|| Err(anyhow!("no such container")))
        }
    }

    #[test]
    fn alerts_for_each_container_down() {
        let mut check = HealthCheck::new(
            vec!["obs".into(), "mediamtx".into(), "gone".into()],
            Duration::from_secs(300),
            Box::new(FixedProbe(vec![
                ("obs", Ok(true)),
                ("mediamtx", Ok(false)),
            ])),
        );
        let alerts = MemoryAlertSink::default();
        let down = check.run(Instant::now(), &alerts);
        assert_eq!(down, vec!["mediamtx".to_string(), "gone".to_string()]);
        assert_eq!(alerts.count(Severity::Critical), 2);
    }

    #[test]
    fn check_waits_one_interval() {
        let mut check = HealthCheck::new(
            vec!["obs".into()],
            Duration::from_secs(300),
            Box::new(FixedProbe(vec![("obs", Ok(true))])),
        );
        let t0 = Instant::now();
        assert!(!check.due(t0));
        assert!(!check.due(t0 + Duration::from_secs(299)));
        assert!(check.due(t0 + Duration::from_secs(300)));
    }

    #[test]
    fn empty_list_disables_check() {
        let mut check = HealthCheck::new(
            Vec::new(),
            Duration::from_secs(1),
            Box::new(DockerProbe::default()),
        );
        let t0 = Instant::now();
        assert!(!check.due(t0));
        assert!(!check.due(t0 + Duration::from_secs(10)));
    }

    #[test]
    fn missing_docker_binary_fails_the_check() {
        let probe = DockerProbe::with_program("/nonexistent/docker", Duration::from_secs(1));
        let err = probe.is_running("obs").expect_err("binary does not exist");
        assert!(err.to_string().contains("failed to run"));
    }

    #[cfg(unix)]
    #[test]
    fn unresponsive_docker_times_out() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir()?;
        let fake = temp.path().join("docker");
        std::fs::write(&fake, "#!/bin/sh\nsleep 10\n")?;
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755))?;

        let probe = DockerProbe::with_program(fake.to_string_lossy(), Duration::from_millis(200));
        let started = Instant::now();
        let err = probe.is_running("obs").expect_err("inspect never answers");
        assert!(err.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(5));
        Ok(())
    }
}
