use std::sync::{Arc, Mutex};

use super::{SceneController, SceneError};

/// A request observed by [`MemorySceneController`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SceneCall {
    SetScene(String),
    CurrentScene,
    SetMediaFile { input: String, path: String },
    StopMedia(String),
}

#[derive(Debug, Default)]
struct MemoryState {
    scene: String,
    media: Option<String>,
    calls: Vec<SceneCall>,
    offline: bool,
    rejected_scenes: Vec<String>,
}

/// In-process composer. Records every request and can be switched offline to
/// simulate an outage.
#[derive(Clone, Debug, Default)]
pub struct MemorySceneController {
    state: Arc<Mutex<MemoryState>>,
}

/// Shared view of a [`MemorySceneController`] for inspection and fault
/// injection while the controller itself is owned by the injector.
#[derive(Clone, Debug)]
pub struct MemoryControllerHandle {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySceneController {
    pub fn new(initial_scene: &str) -> Self {
        let controller = Self::default();
        controller.lock().scene = initial_scene.to_string();
        controller
    }

    pub fn handle(&self) -> MemoryControllerHandle {
        MemoryControllerHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn call(&self, call: SceneCall) -> Result<std::sync::MutexGuard<'_, MemoryState>, SceneError> {
        let mut state = self.lock();
        state.calls.push(call);
        if state.offline {
            return Err(SceneError::Connection("composer offline".to_string()));
        }
        Ok(state)
    }
}

impl MemoryControllerHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Makes every switch to `scene` fail as rejected.
    pub fn reject_scene(&self, scene: &str) {
        self.lock().rejected_scenes.push(scene.to_string());
    }

    pub fn scene(&self) -> String {
        self.lock().scene.clone()
    }

    pub fn media(&self) -> Option<String> {
        self.lock().media.clone()
    }

    pub fn calls(&self) -> Vec<SceneCall> {
        self.lock().calls.clone()
    }

    /// Scene switches in order, ignoring other requests.
    pub fn scene_switches(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                SceneCall::SetScene(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}

impl SceneController for MemorySceneController {
    fn set_scene(&mut self, name: &str) -> Result<(), SceneError> {
        let mut state = self.call(SceneCall::SetScene(name.to_string()))?;
        if state.rejected_scenes.iter().any(|s| s == name) {
            return Err(SceneError::Rejected {
                request: "SetCurrentProgramScene".to_string(),
                code: 600,
                comment: format!("No source was found by the name of `{}`.", name),
            });
        }
        state.scene = name.to_string();
        Ok(())
    }

    fn current_scene(&mut self) -> Result<String, SceneError> {
        let state = self.call(SceneCall::CurrentScene)?;
        Ok(state.scene.clone())
    }

    fn set_media_file(&mut self, input: &str, path: &str) -> Result<(), SceneError> {
        let mut state = self.call(SceneCall::SetMediaFile {
            input: input.to_string(),
            path: path.to_string(),
        })?;
        state.media = Some(path.to_string());
        Ok(())
    }

    fn stop_media(&mut self, input: &str) -> Result<(), SceneError> {
        self.call(SceneCall::StopMedia(input.to_string()))?;
        Ok(())
    }

    fn disconnect(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_controller_fails_with_connection_error() {
        let mut controller = MemorySceneController::new("Standby");
        let handle = controller.handle();
        handle.set_offline(true);
        let err = controller.set_scene("Alert").expect_err("offline");
        assert!(err.is_connection());
        assert_eq!(handle.scene(), "Standby");

        handle.set_offline(false);
        controller.set_scene("Alert").expect("online");
        assert_eq!(controller.current_scene().expect("scene"), "Alert");
    }

    #[test]
    fn rejected_scene_is_not_a_connection_error() {
        let mut controller = MemorySceneController::new("Standby");
        controller.handle().reject_scene("Missing");
        let err = controller.set_scene("Missing").expect_err("rejected");
        assert!(!err.is_connection());
    }
}
