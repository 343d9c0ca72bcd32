//! Upload completion detection.
//!
//! The uploader never announces that a clip is finished. A clip is considered
//! complete once its size and modification time have held still for a number
//! of consecutive polls and the last write is older than a quiet period.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Result of sampling a tracked clip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Readiness {
    /// Still being written, empty, or not yet quiet long enough.
    Pending,
    /// Complete and safe to hand to the composer.
    Ready,
    /// Gone from disk since the previous sample.
    Vanished,
}

/// Thresholds for promoting a clip to [`Readiness::Ready`].
#[derive(Clone, Copy, Debug)]
pub struct ReadinessPolicy {
    /// Consecutive identical (size, mtime) samples required.
    pub stability_samples: u32,
    /// Minimum age of the last modification.
    pub min_quiet: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            stability_samples: 2,
            min_quiet: Duration::from_secs(5),
        }
    }
}

/// Tracking state for one uploaded file, keyed by its absolute path.
#[derive(Clone, Debug)]
pub struct ClipRecord {
    pub path: PathBuf,
    pub discovered_at: SystemTime,
    pub size: u64,
    pub modified: SystemTime,
    /// Number of consecutive samples that agreed on (size, mtime).
    pub stable_streak: u32,
    pub ready: bool,
    /// When the record was promoted to ready.
    pub ready_at: Option<SystemTime>,
    pub played: bool,
    empty_logged: bool,
}

impl ClipRecord {
    /// Creates a record from the first sample of `path`.
    pub fn discover(path: &Path, now: SystemTime) -> io::Result<Self> {
        let (size, modified) = stat(path)?;
        Ok(Self::from_sample(path.to_path_buf(), now, size, modified))
    }

    pub fn from_sample(path: PathBuf, now: SystemTime, size: u64, modified: SystemTime) -> Self {
        Self {
            path,
            discovered_at: now,
            size,
            modified,
            stable_streak: 1,
            ready: false,
            ready_at: None,
            played: false,
            empty_logged: false,
        }
    }

    /// Stats the file again and folds the sample in.
    pub fn observe(&mut self, policy: &ReadinessPolicy, now: SystemTime) -> Readiness {
        match stat(&self.path) {
            Ok((size, modified)) => self.sample(size, modified, policy, now),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Readiness::Vanished,
            Err(e) => {
                log::warn!("stat failed for {}: {}", self.path.display(), e);
                if self.ready {
                    Readiness::Ready
                } else {
                    Readiness::Pending
                }
            }
        }
    }

    /// Folds an already-taken sample into the record.
    pub fn sample(
        &mut self,
        size: u64,
        modified: SystemTime,
        policy: &ReadinessPolicy,
        now: SystemTime,
    ) -> Readiness {
        if self.ready {
            return Readiness::Ready;
        }
        if size == self.size && modified == self.modified {
            self.stable_streak = self.stable_streak.saturating_add(1);
        } else {
            self.size = size;
            self.modified = modified;
            self.stable_streak = 1;
            self.empty_logged = false;
        }
        self.evaluate(policy, now)
    }

    /// Decides readiness from the samples already held.
    pub fn evaluate(&mut self, policy: &ReadinessPolicy, now: SystemTime) -> Readiness {
        if self.ready {
            return Readiness::Ready;
        }
        if self.stable_streak < policy.stability_samples {
            return Readiness::Pending;
        }
        let quiet = now
            .duration_since(self.modified)
            .map(|age| age >= policy.min_quiet)
            .unwrap_or(false);
        if !quiet {
            return Readiness::Pending;
        }
        if self.size == 0 {
            if !self.empty_logged {
                log::info!("skipping empty clip {}", self.path.display());
                self.empty_logged = true;
            }
            return Readiness::Pending;
        }
        self.ready = true;
        self.ready_at = Some(now);
        Readiness::Ready
    }
}

fn stat(path: &Path) -> io::Result<(u64, SystemTime)> {
    let meta = fs::metadata(path)?;
    Ok((meta.len(), meta.modified()?))
}
