//! Stream injection state machine.
//!
//! Owns the single [`StreamState`] and is the only code that talks to the
//! composer. States:
//!
//! - `Idle`: standby scene on program; the next ready clip starts playback.
//! - `Playing`: clip scene on program until `expected_end_at`; queued clips
//!   wait and are never allowed to cut the current one short.
//! - `Error`: the composer failed; the error scene is attempted once on entry
//!   and recovery to standby is retried on an exponential backoff.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::alert::{AlertSink, Severity};
use crate::config::FakecamConfig;
use crate::scene::{SceneController, SceneError};

/// A ready clip handed to the injector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Clip {
    pub path: PathBuf,
    /// Measured media duration, when the container header could be read.
    pub duration: Option<Duration>,
}

/// Supplies clips in playback order. Only asked when a clip can start.
pub trait ClipSource {
    fn next_clip(&mut self) -> Option<Clip>;
}

impl ClipSource for VecDeque<Clip> {
    fn next_clip(&mut self) -> Option<Clip> {
        self.pop_front()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Playing {
        clip: PathBuf,
        started_at: Instant,
        expected_end_at: Instant,
    },
    Error {
        reason: String,
        entered_at: Instant,
    },
}

impl StreamState {
    pub fn name(&self) -> &'static str {
        match self {
            StreamState::Idle => "idle",
            StreamState::Playing { .. } => "playing",
            StreamState::Error { .. } => "error",
        }
    }
}

#[derive(Clone, Debug)]
pub struct InjectorSettings {
    pub media_input: String,
    pub scene_clip: String,
    pub scene_standby: String,
    pub scene_error: String,
    /// Error video as the composer sees it; also used to re-arm the input.
    pub error_media: String,
    pub trailing_margin: Duration,
    pub default_clip: Duration,
    pub max_clip: Duration,
    pub retry_base: Duration,
    pub retry_max: Duration,
}

impl InjectorSettings {
    pub fn from_config(cfg: &FakecamConfig) -> Self {
        Self {
            media_input: cfg.obs.media_input.clone(),
            scene_clip: cfg.obs.scene_alert.clone(),
            scene_standby: cfg.obs.scene_standby.clone(),
            scene_error: cfg.obs.scene_error.clone(),
            error_media: cfg.error_video_composer_path().to_string_lossy().into_owned(),
            trailing_margin: cfg.playback.trailing_margin,
            default_clip: cfg.playback.default_clip,
            max_clip: cfg.playback.max_clip,
            retry_base: cfg.playback.retry_base,
            retry_max: cfg.playback.retry_max,
        }
    }
}

pub struct Injector<C, A> {
    settings: InjectorSettings,
    controller: C,
    alerts: A,
    state: StreamState,
    retry_delay: Duration,
    next_retry_at: Option<Instant>,
    clips_played: u64,
}

impl<C: SceneController, A: AlertSink> Injector<C, A> {
    pub fn new(settings: InjectorSettings, controller: C, alerts: A) -> Self {
        let retry_delay = settings.retry_base;
        Self {
            settings,
            controller,
            alerts,
            state: StreamState::Idle,
            retry_delay,
            next_retry_at: None,
            clips_played: 0,
        }
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn clips_played(&self) -> u64 {
        self.clips_played
    }

    pub fn alerts(&self) -> &A {
        &self.alerts
    }

    /// Earliest instant at which `tick` has time-driven work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match &self.state {
            StreamState::Idle => None,
            StreamState::Playing {
                expected_end_at, ..
            } => Some(*expected_end_at),
            StreamState::Error { .. } => self.next_retry_at,
        }
    }

    /// Puts the standby scene on program at startup.
    pub fn start(&mut self, now: Instant) {
        match self.show_standby() {
            Ok(()) => log::info!("standby scene {:?} on program", self.settings.scene_standby),
            Err(e) => self.enter_error(e, now),
        }
    }

    /// Advances the state machine once.
    pub fn tick(&mut self, now: Instant, source: &mut dyn ClipSource) {
        match &self.state {
            StreamState::Idle => {
                if let Some(clip) = source.next_clip() {
                    self.play(clip, now);
                }
            }
            StreamState::Playing {
                expected_end_at, ..
            } => {
                if now < *expected_end_at {
                    self.verify_playing(now);
                } else if let Some(clip) = source.next_clip() {
                    self.play(clip, now);
                } else {
                    self.finish(now);
                }
            }
            StreamState::Error { .. } => {
                if self.next_retry_at.map_or(true, |at| now >= at) {
                    self.try_recover(now);
                }
            }
        }
    }

    /// Releases the composer connection.
    pub fn shutdown(&mut self) {
        self.controller.disconnect();
    }

    fn play(&mut self, clip: Clip, now: Instant) {
        let media_len = clip
            .duration
            .unwrap_or(self.settings.default_clip)
            .min(self.settings.max_clip);
        let media = clip.path.to_string_lossy().into_owned();
        let result = self
            .controller
            .set_media_file(&self.settings.media_input, &media)
            .and_then(|_| self.controller.set_scene(&self.settings.scene_clip));
        match result {
            Ok(()) => {
                self.clips_played += 1;
                let expected_end_at = now + media_len + self.settings.trailing_margin;
                log::info!(
                    "playing {} for {:.1}s (+{}s margin)",
                    clip.path.display(),
                    media_len.as_secs_f64(),
                    self.settings.trailing_margin.as_secs()
                );
                self.state = StreamState::Playing {
                    clip: clip.path,
                    started_at: now,
                    expected_end_at,
                };
            }
            Err(e) => {
                log::error!("failed to start {}: {}", clip.path.display(), e);
                self.enter_error(e, now);
            }
        }
    }

    fn verify_playing(&mut self, now: Instant) {
        match self.controller.current_scene() {
            Ok(scene) if scene != self.settings.scene_clip => {
                log::debug!(
                    "program scene is {:?} while a clip is playing (expected {:?})",
                    scene,
                    self.settings.scene_clip
                );
            }
            Ok(_) => {}
            Err(e) => self.enter_error(e, now),
        }
    }

    fn finish(&mut self, now: Instant) {
        match self.show_standby() {
            Ok(()) => {
                if let StreamState::Playing { clip, .. } = &self.state {
                    log::info!("finished {}; back to standby", clip.display());
                }
                self.state = StreamState::Idle;
            }
            Err(e) => self.enter_error(e, now),
        }
    }

    /// Standby on program, then the media input re-armed with the error
    /// video. Only the scene switch decides success.
    fn show_standby(&mut self) -> Result<(), SceneError> {
        self.controller.set_scene(&self.settings.scene_standby)?;
        let rearm = self
            .controller
            .set_media_file(&self.settings.media_input, &self.settings.error_media)
            .and_then(|_| self.controller.stop_media(&self.settings.media_input));
        if let Err(e) = rearm {
            log::warn!("failed to re-arm media input: {}", e);
        }
        Ok(())
    }

    fn enter_error(&mut self, error: SceneError, now: Instant) {
        let reason = error.to_string();
        log::error!("entering error state: {}", reason);
        if error.is_connection() {
            self.controller.disconnect();
        }

        let fallback = self
            .controller
            .set_media_file(&self.settings.media_input, &self.settings.error_media)
            .and_then(|_| self.controller.set_scene(&self.settings.scene_error));
        if let Err(e) = fallback {
            log::warn!("could not show error scene: {}", e);
        }

        let interrupted = match &self.state {
            StreamState::Playing { clip, .. } => {
                format!("\nInterrupted clip: {}", clip.display())
            }
            _ => String::new(),
        };
        self.alerts.notify(
            Severity::Critical,
            "composer unavailable",
            &format!("Stream injection failed: {}{}", reason, interrupted),
        );

        self.state = StreamState::Error {
            reason,
            entered_at: now,
        };
        self.retry_delay = self.settings.retry_base;
        self.next_retry_at = Some(now + self.retry_delay);
    }

    fn try_recover(&mut self, now: Instant) {
        match self.show_standby() {
            Ok(()) => {
                let outage = match &self.state {
                    StreamState::Error { entered_at, .. } => now.saturating_duration_since(*entered_at),
                    _ => Duration::ZERO,
                };
                log::info!(
                    "composer recovered after {}s; standby on program",
                    outage.as_secs()
                );
                self.alerts.notify(
                    Severity::Info,
                    "composer recovered",
                    &format!("Standby restored after {}s outage.", outage.as_secs()),
                );
                self.state = StreamState::Idle;
                self.retry_delay = self.settings.retry_base;
                self.next_retry_at = None;
            }
            Err(e) => {
                if e.is_connection() {
                    self.controller.disconnect();
                }
                self.retry_delay = (self.retry_delay * 2).min(self.settings.retry_max);
                self.next_retry_at = Some(now + self.retry_delay);
                log::warn!(
                    "composer still unavailable ({}); retrying in {}s",
                    e,
                    self.retry_delay.as_secs()
                );
            }
        }
    }
}
