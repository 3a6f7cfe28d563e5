//! The context object threaded through every scene.
//!
//! One instance is built at startup and passed by `&mut` into scene
//! lifecycle methods; there are no global singletons. Scene transitions
//! are queued here and applied by the driver between frames.

use audio::AudioSystem;
use engine_core::{Scene, SceneRequest, Time};
use input::InputState;
use renderer::Renderer;

use crate::config::GameConfig;

/// Everything a scene can touch.
pub struct GameContext {
    pub renderer: Renderer,
    pub input: InputState,
    pub audio: AudioSystem,
    pub time: Time,
    pub config: GameConfig,
    /// Scene transitions requested this frame, applied after update.
    pub requests: Vec<SceneRequest<GameContext>>,
    /// Set to end the game at the end of the frame.
    pub quit: bool,
}

impl GameContext {
    pub fn new(
        renderer: Renderer,
        audio: AudioSystem,
        config: GameConfig,
    ) -> Self {
        Self {
            renderer,
            input: InputState::new(),
            audio,
            time: Time::new(),
            config,
            requests: Vec::new(),
            quit: false,
        }
    }

    /// Queue a push of `scene` on top of the stack.
    pub fn push_scene(&mut self, scene: Box<dyn Scene<GameContext>>) {
        self.requests.push(SceneRequest::Push(scene));
    }

    /// Queue removal of the current scene.
    pub fn pop_scene(&mut self) {
        self.requests.push(SceneRequest::Pop);
    }

    /// Queue replacement of the current scene.
    pub fn replace_scene(&mut self, scene: Box<dyn Scene<GameContext>>) {
        self.requests.push(SceneRequest::Replace(scene));
    }

    /// Queue a quit.
    pub fn request_quit(&mut self) {
        self.requests.push(SceneRequest::Quit);
    }

    /// Current swapchain dimensions as floats.
    pub fn screen_size(&self) -> (f32, f32) {
        let (w, h) = self.renderer.dimensions();
        (w as f32, h as f32)
    }
}
