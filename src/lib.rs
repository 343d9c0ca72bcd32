//! fakecam
//!
//! Turns an FTP-upload camera into a live stream. Clips the camera drops into
//! `base_path/YYYY/MM/DD/` are detected once their uploads settle and played
//! through a live composer (OBS over obs-websocket v5), which otherwise shows a
//! standby loop.
//!
//! # Module Structure
//!
//! - `paths`: day directory resolution and clip listing
//! - `readiness` / `selector`: upload stability sampling and the clip backlog
//! - `fixup`: ownership and permission normalization of uploads
//! - `probe`: MP4 duration lookup
//! - `injector`: the stream state machine (Idle, Playing, Error)
//! - `scene`: composer adapters (OBS WebSocket, in-memory)
//! - `alert`: operator notifications
//! - `health`, `retention`: periodic side channels
//! - `monitor`: the control loop that ties everything together

pub mod alert;
pub mod config;
pub mod fixup;
pub mod health;
pub mod injector;
pub mod monitor;
pub mod paths;
pub mod probe;
pub mod readiness;
pub mod retention;
pub mod scene;
pub mod selector;
mod subprocess;

pub use alert::{AlertSink, LogAlertSink, MailAlertSink, MemoryAlertSink, Severity};
pub use config::{FakecamConfig, ValidationReport, DEFAULT_CONFIG_PATH};
pub use injector::{Clip, ClipSource, Injector, InjectorSettings, StreamState};
pub use monitor::{Monitor, TickTime};
pub use readiness::{ClipRecord, Readiness, ReadinessPolicy};
pub use scene::{
    MemoryControllerHandle, MemorySceneController, ObsEndpoint, ObsSceneController,
    SceneController, SceneError,
};
pub use selector::{ClipSelector, SelectorPolicy};
