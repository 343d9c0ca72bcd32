//! The control loop.
//!
//! One [`Monitor::tick`] resolves the watched day directories, samples the
//! backlog, feeds ready clips through the fixup hook into the injector and
//! runs the periodic side channels. Nothing else mutates the stream state.

use chrono::{NaiveDate, NaiveDateTime};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use crate::alert::{AlertSink, Severity};
use crate::config::FakecamConfig;
use crate::fixup::{FixupOutcome, PermissionFixup};
use crate::health::{ContainerProbe, DockerProbe, HealthCheck};
use crate::injector::{Clip, ClipSource, Injector, InjectorSettings};
use crate::paths::{day_path, watch_dirs};
use crate::probe::clip_duration;
use crate::readiness::ReadinessPolicy;
use crate::retention;
use crate::scene::SceneController;
use crate::selector::{ClipSelector, SelectorPolicy};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// The three clocks a tick needs. Wall time drives file ages, local time
/// drives directory resolution and the monotonic clock drives playback.
#[derive(Clone, Copy, Debug)]
pub struct TickTime {
    pub wall: SystemTime,
    pub local: NaiveDateTime,
    pub mono: Instant,
}

impl TickTime {
    pub fn now() -> Self {
        Self {
            wall: SystemTime::now(),
            local: chrono::Local::now().naive_local(),
            mono: Instant::now(),
        }
    }
}

/// Hands the injector ready clips that survived fixups, with their duration.
struct ReadyClips<'a> {
    selector: &'a mut ClipSelector,
    fixup: &'a PermissionFixup,
}

impl ClipSource for ReadyClips<'_> {
    fn next_clip(&mut self) -> Option<Clip> {
        loop {
            let record = self.selector.next()?;
            if self.fixup.prepare_clip(&record.path) == FixupOutcome::Unreadable {
                continue;
            }
            let duration = clip_duration(&record.path);
            if duration.is_none() {
                log::debug!("no duration in {}; using default", record.path.display());
            }
            return Some(Clip {
                path: record.path,
                duration,
            });
        }
    }
}

pub struct Monitor<C, A> {
    base_path: PathBuf,
    poll_interval: Duration,
    rollover_grace: Duration,
    retention_horizon: Duration,
    retention_days: u64,
    selector: ClipSelector,
    fixup: PermissionFixup,
    injector: Injector<C, A>,
    health: HealthCheck,
    started: bool,
    current_day: Option<NaiveDate>,
    prepared_day: Option<NaiveDate>,
}

impl<C: SceneController, A: AlertSink> Monitor<C, A> {
    pub fn new(cfg: &FakecamConfig, controller: C, alerts: A) -> Self {
        let m = &cfg.monitor;
        let policy = SelectorPolicy {
            readiness: ReadinessPolicy {
                stability_samples: m.stability_samples,
                min_quiet: m.min_quiet,
            },
            retention_horizon: m.retention_horizon,
            skip_existing_on_start: m.skip_existing_on_start,
        };
        Self {
            base_path: m.base_path.clone(),
            poll_interval: m.poll_interval,
            rollover_grace: m.rollover_grace,
            retention_horizon: m.retention_horizon,
            retention_days: m.retention_days,
            selector: ClipSelector::new(policy),
            fixup: PermissionFixup::from_settings(&cfg.permissions),
            injector: Injector::new(InjectorSettings::from_config(cfg), controller, alerts),
            health: HealthCheck::new(
                m.required_containers.clone(),
                m.health_check_interval,
                Box::new(DockerProbe::default()),
            ),
            started: false,
            current_day: None,
            prepared_day: None,
        }
    }

    /// Replaces the Docker-backed container probe.
    pub fn with_container_probe(mut self, probe: Box<dyn ContainerProbe>) -> Self {
        self.health.set_probe(probe);
        self
    }

    pub fn injector(&self) -> &Injector<C, A> {
        &self.injector
    }

    pub fn selector(&self) -> &ClipSelector {
        &self.selector
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Runs one pass of the loop.
    pub fn tick(&mut self, now: TickTime) {
        if !self.started {
            self.started = true;
            log::info!("watching {}", self.base_path.display());
            self.injector.start(now.mono);
        }

        let today = now.local.date();
        if self.current_day != Some(today) {
            if self.current_day.is_some() {
                log::info!("day rollover to {}", today);
            }
            self.current_day = Some(today);
            self.sweep_retention(now.wall);
        }
        self.prepare_day_dir(today);

        let dirs = watch_dirs(&self.base_path, now.local, self.rollover_grace);
        let summary = self.selector.poll(&dirs, now.wall);
        if summary.became_ready > 0 {
            log::info!(
                "{} clip(s) ready; backlog {}",
                summary.became_ready,
                self.selector.backlog_len()
            );
        }
        if summary.skipped_stale > 0 {
            log::warn!("dropped {} stale clip(s) unplayed", summary.skipped_stale);
            self.injector.alerts().notify(
                Severity::Warning,
                "clips dropped unplayed",
                &format!(
                    "{} clip(s) waited more than {}s for playback and were skipped.\nStream state: {}",
                    summary.skipped_stale,
                    self.retention_horizon.as_secs(),
                    self.injector.state().name()
                ),
            );
        }

        let previous = self.injector.state().name();
        self.injector.tick(
            now.mono,
            &mut ReadyClips {
                selector: &mut self.selector,
                fixup: &self.fixup,
            },
        );
        let current = self.injector.state().name();
        if previous != current {
            log::debug!("stream state {} -> {}", previous, current);
        }

        if self.health.due(now.mono) {
            self.health.run(now.mono, self.injector.alerts());
        }
    }

    /// How long the caller may sleep before the next tick.
    pub fn sleep_for(&self, now: Instant) -> Duration {
        match self.injector.next_deadline() {
            Some(deadline) => deadline
                .saturating_duration_since(now)
                .min(self.poll_interval),
            None => self.poll_interval,
        }
    }

    pub fn shutdown(&mut self) {
        log::info!(
            "shutting down after {} clip(s); state {}",
            self.injector.clips_played(),
            self.injector.state().name()
        );
        self.injector.shutdown();
    }

    fn sweep_retention(&self, now: SystemTime) {
        if self.retention_days == 0 {
            return;
        }
        let window = Duration::from_secs(self.retention_days.saturating_mul(SECS_PER_DAY));
        retention::sweep(&self.base_path, window, now);
    }

    fn prepare_day_dir(&mut self, today: NaiveDate) {
        if !self.fixup.is_enabled() || self.prepared_day == Some(today) {
            return;
        }
        let dir = day_path(&self.base_path, today);
        if dir.is_dir() {
            self.fixup.prepare_dir(&dir);
            self.prepared_day = Some(today);
        }
    }
}
