//! Scene controller capability.
//!
//! The composer owns the live output and exposes named scenes. The injector
//! only needs an idempotent "set", an observable "get", a way to point the
//! clip media input at a file, and explicit failures:
//! - `SceneError::Connection`: unreachable, dropped, or timed out
//! - `SceneError::Rejected`: reachable, but the request was refused
//!
//! `ObsSceneController` speaks OBS WebSocket v5. `MemorySceneController` is an
//! in-process stand-in selected with a `stub://` host.

mod memory;
mod obs;

pub use memory::{MemoryControllerHandle, MemorySceneController, SceneCall};
pub use obs::{obs_auth_response, ObsEndpoint, ObsSceneController};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SceneError {
    #[error("composer connection failed: {0}")]
    Connection(String),
    #[error("composer rejected {request} (code {code}): {comment}")]
    Rejected {
        request: String,
        code: i64,
        comment: String,
    },
}

impl SceneError {
    pub fn is_connection(&self) -> bool {
        matches!(self, SceneError::Connection(_))
    }
}

pub trait SceneController {
    /// Switches the program output to `name`.
    fn set_scene(&mut self, name: &str) -> Result<(), SceneError>;

    /// Name of the scene currently on program.
    fn current_scene(&mut self) -> Result<String, SceneError>;

    /// Points media input `input` at `path` and restarts it.
    fn set_media_file(&mut self, input: &str, path: &str) -> Result<(), SceneError>;

    /// Stops playback on media input `input`.
    fn stop_media(&mut self, input: &str) -> Result<(), SceneError>;

    /// Drops any open connection. The next call reconnects.
    fn disconnect(&mut self);
}

impl<T: SceneController + ?Sized> SceneController for Box<T> {
    fn set_scene(&mut self, name: &str) -> Result<(), SceneError> {
        (**self).set_scene(name)
    }

    fn current_scene(&mut self) -> Result<String, SceneError> {
        (**self).current_scene()
    }

    fn set_media_file(&mut self, input: &str, path: &str) -> Result<(), SceneError> {
        (**self).set_media_file(input, path)
    }

    fn stop_media(&mut self, input: &str) -> Result<(), SceneError> {
        (**self).stop_media(input)
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }
}
