//! Clip backlog: discovery, readiness sampling, ordering and dedupe.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::paths::list_clips;
use crate::readiness::{ClipRecord, Readiness, ReadinessPolicy};

#[derive(Clone, Copy, Debug)]
pub struct SelectorPolicy {
    pub readiness: ReadinessPolicy,
    /// Clips still unplayed this long after becoming ready are dropped.
    pub retention_horizon: Duration,
    /// Retire clips that are already complete on the first scan.
    pub skip_existing_on_start: bool,
}

impl Default for SelectorPolicy {
    fn default() -> Self {
        Self {
            readiness: ReadinessPolicy::default(),
            retention_horizon: Duration::from_secs(300),
            skip_existing_on_start: true,
        }
    }
}

/// Counters for one [`ClipSelector::poll`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub discovered: usize,
    pub became_ready: usize,
    pub vanished: usize,
    pub skipped_stale: usize,
    pub baselined: usize,
}

/// Ordered backlog of uploaded clips.
///
/// Clips are handed out oldest discovery first, ties broken by path. A path
/// handed out (or dropped as stale) is retired and is never tracked again
/// while it stays in a watched directory.
#[derive(Debug)]
pub struct ClipSelector {
    policy: SelectorPolicy,
    tracked: BTreeMap<PathBuf, ClipRecord>,
    retired: HashSet<PathBuf>,
    baselined: bool,
}

impl ClipSelector {
    pub fn new(policy: SelectorPolicy) -> Self {
        Self {
            policy,
            tracked: BTreeMap::new(),
            retired: HashSet::new(),
            baselined: !policy.skip_existing_on_start,
        }
    }

    /// Scans `dirs`, samples every tracked clip once and drops stale ones.
    pub fn poll(&mut self, dirs: &[PathBuf], now: SystemTime) -> PollSummary {
        let mut summary = PollSummary::default();
        let mut seen: HashSet<PathBuf> = HashSet::new();
        for dir in dirs {
            match list_clips(dir) {
                Ok(clips) => seen.extend(clips),
                Err(e) => log::warn!("failed to list {}: {}", dir.display(), e),
            }
        }

        if !self.baselined {
            self.baselined = true;
            summary.baselined = self.baseline(&seen, now);
            return summary;
        }

        let before = self.tracked.len();
        self.tracked.retain(|path, _| seen.contains(path));
        summary.vanished += before - self.tracked.len();
        self.retired.retain(|path| seen.contains(path));

        let mut fresh: Vec<&PathBuf> = seen
            .iter()
            .filter(|path| !self.retired.contains(*path))
            .collect();
        fresh.sort();

        for path in fresh {
            let readiness = match self.tracked.get_mut(path) {
                Some(record) => {
                    let was_ready = record.ready;
                    let readiness = record.observe(&self.policy.readiness, now);
                    if readiness == Readiness::Ready && !was_ready {
                        summary.became_ready += 1;
                    }
                    readiness
                }
                None => match ClipRecord::discover(path, now) {
                    Ok(mut record) => {
                        log::debug!("discovered {}", path.display());
                        summary.discovered += 1;
                        let readiness = record.evaluate(&self.policy.readiness, now);
                        if readiness == Readiness::Ready {
                            summary.became_ready += 1;
                        }
                        self.tracked.insert(path.clone(), record);
                        readiness
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Readiness::Vanished,
                    Err(e) => {
                        log::warn!("failed to stat {}: {}", path.display(), e);
                        continue;
                    }
                },
            };
            if readiness == Readiness::Vanished && self.tracked.remove(path).is_some() {
                log::debug!("{} vanished before playback", path.display());
                summary.vanished += 1;
            }
        }

        summary.skipped_stale = self.drop_stale(now);
        summary
    }

    /// Hands out the oldest ready, unplayed clip and retires it.
    pub fn next(&mut self) -> Option<ClipRecord> {
        let path = self
            .tracked
            .values()
            .filter(|record| record.ready && !record.played)
            .min_by(|a, b| {
                a.discovered_at
                    .cmp(&b.discovered_at)
                    .then_with(|| a.path.cmp(&b.path))
            })
            .map(|record| record.path.clone())?;
        let mut record = self.tracked.remove(&path)?;
        record.played = true;
        self.retired.insert(path);
        Some(record)
    }

    /// Number of ready clips waiting for playback.
    pub fn backlog_len(&self) -> usize {
        self.tracked
            .values()
            .filter(|record| record.ready && !record.played)
            .count()
    }

    /// Whether `path` is tracked but not yet ready.
    pub fn is_pending(&self, path: &Path) -> bool {
        self.tracked
            .get(path)
            .map(|record| !record.ready)
            .unwrap_or(false)
    }

    pub fn is_retired(&self, path: &Path) -> bool {
        self.retired.contains(path)
    }

    fn baseline(&mut self, seen: &HashSet<PathBuf>, now: SystemTime) -> usize {
        let mut count = 0;
        for path in seen {
            let Ok(record) = ClipRecord::discover(path, now) else {
                continue;
            };
            let quiet = now
                .duration_since(record.modified)
                .map(|age| age >= self.policy.readiness.min_quiet)
                .unwrap_or(false);
            // An empty file may be a stalled upload that resumes later.
            if quiet && record.size > 0 {
                self.retired.insert(path.clone());
                count += 1;
            } else {
                self.tracked.insert(path.clone(), record);
            }
        }
        if count > 0 {
            log::info!("ignoring {} clip(s) uploaded before startup", count);
        }
        count
    }

    fn drop_stale(&mut self, now: SystemTime) -> usize {
        let horizon = self.policy.retention_horizon;
        let stale: Vec<PathBuf> = self
            .tracked
            .values()
            .filter(|record| record.ready && !record.played)
            .filter(|record| {
                record
                    .ready_at
                    .and_then(|ready_at| now.duration_since(ready_at).ok())
                    .map(|waited| waited > horizon)
                    .unwrap_or(false)
            })
            .map(|record| record.path.clone())
            .collect();
        for path in &stale {
            log::warn!(
                "skipping stale clip {} (waited more than {}s)",
                path.display(),
                horizon.as_secs()
            );
            self.tracked.remove(path);
            self.retired.insert(path.clone());
        }
        stale.len()
    }
}
