//! Outbound operator notifications.
//!
//! Delivery is fire-and-forget: `AlertSink::notify` never returns an error and
//! never panics into the caller. Failures are logged and dropped.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

use crate::subprocess::{reap, wait_bounded};

/// How long `mail` may take to accept a message before it is killed.
pub const DEFAULT_MAIL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write message to {command}: {source}")]
    Write {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} exited with {status}")]
    Exit { command: String, status: String },
    #[error("{command} did not finish within {after:?} and was killed")]
    Timeout { command: String, after: Duration },
}

pub trait AlertSink {
    fn notify(&self, severity: Severity, subject: &str, message: &str);
}

impl<T: AlertSink + ?Sized> AlertSink for Box<T> {
    fn notify(&self, severity: Severity, subject: &str, message: &str) {
        (**self).notify(severity, subject, message)
    }
}

/// Logs alerts and nothing else.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn notify(&self, severity: Severity, subject: &str, message: &str) {
        match severity {
            Severity::Info => log::info!("alert [{}] {}: {}", severity.as_str(), subject, message),
            Severity::Warning | Severity::Critical => {
                log::warn!("alert [{}] {}: {}", severity.as_str(), subject, message)
            }
        }
    }
}

/// Pipes alerts into the system `mail` command: `mail -s <subject> <send_to>`.
///
/// Each alert is handed to its own delivery thread, so `notify` returns at
/// once. A `mail` that hangs is killed after the timeout.
#[derive(Clone, Debug)]
pub struct MailAlertSink {
    send_to: String,
    program: String,
    timeout: Duration,
}

impl MailAlertSink {
    pub fn new(send_to: impl Into<String>) -> Self {
        Self::with_program(send_to, "mail")
    }

    /// Uses `program` in place of `mail`, with the same argument layout.
    pub fn with_program(send_to: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            send_to: send_to.into(),
            program: program.into(),
            timeout: DEFAULT_MAIL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn deliver(&self, subject: &str, body: &str) -> Result<(), AlertError> {
        let mut child = Command::new(&self.program)
            .arg("-s")
            .arg(subject)
            .arg(&self.send_to)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| AlertError::Spawn {
                command: self.program.clone(),
                source,
            })?;
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(source) = stdin.write_all(body.as_bytes()) {
                drop(stdin);
                reap(&mut child);
                return Err(AlertError::Write {
                    command: self.program.clone(),
                    source,
                });
            }
        }
        let status = wait_bounded(&mut child, self.timeout)
            .map_err(|source| AlertError::Spawn {
                command: self.program.clone(),
                source,
            })?
            .ok_or_else(|| AlertError::Timeout {
                command: self.program.clone(),
                after: self.timeout,
            })?;
        if !status.success() {
            return Err(AlertError::Exit {
                command: self.program.clone(),
                status: status.to_string(),
            });
        }
        Ok(())
    }
}

impl AlertSink for MailAlertSink {
    fn notify(&self, severity: Severity, subject: &str, message: &str) {
        let subject = format!("{}: {}", severity.as_str(), subject);
        let message = message.to_string();
        let sink = self.clone();
        let spawned = std::thread::Builder::new()
            .name("fakecam-mail".into())
            .spawn(move || match sink.deliver(&subject, &message) {
                Ok(()) => log::info!("alert sent to {}: {}", sink.send_to, subject),
                Err(e) => log::error!("failed to send alert {:?}: {}", subject, e),
            });
        if let Err(e) = spawned {
            log::error!("failed to start alert delivery: {}", e);
        }
    }
}

/// A delivered alert, as captured by [`MemoryAlertSink`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlertRecord {
    pub severity: Severity,
    pub subject: String,
    pub message: String,
}

/// Collects alerts in memory; clones share the same buffer.
#[derive(Clone, Debug, Default)]
pub struct MemoryAlertSink {
    alerts: Arc<Mutex<Vec<AlertRecord>>>,
}

impl MemoryAlertSink {
    pub fn alerts(&self) -> Vec<AlertRecord> {
        self.alerts
            .lock()
            .map(|alerts| alerts.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.alerts()
            .iter()
            .filter(|alert| alert.severity == severity)
            .count()
    }
}

impl AlertSink for MemoryAlertSink {
    fn notify(&self, severity: Severity, subject: &str, message: &str) {
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(AlertRecord {
                severity,
                subject: subject.to_string(),
                message: message.to_string(),
            });
        }
    }
}
