//! Title screen: backdrop, fade-in, and "press any key".

use anyhow::Result;
use engine_core::{Scene, SceneBase};
use input::KeyCode;
use renderer::{SpriteBatch, TextureId};

use super::{render_ui_frame, MainGameScene};
use crate::context::GameContext;

pub struct TitleScene {
    base: SceneBase,
    background: TextureId,
    bgm: Option<audio::Playback>,
    timer: f32,
    leaving: bool,
}

impl TitleScene {
    pub fn new() -> Self {
        Self {
            base: SceneBase::new("TitleScene"),
            background: TextureId(0),
            bgm: None,
            timer: 0.0,
            leaving: false,
        }
    }
}

impl Default for TitleScene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene<GameContext> for TitleScene {
    fn base(&self) -> &SceneBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut SceneBase {
        &mut self.base
    }

    fn initialize(&mut self, ctx: &mut GameContext) -> Result<()> {
        self.background = ctx.renderer.load_texture("assets/textures/title.png")?;
        // Audio is allowed to fail (headless machines); the game goes on.
        self.bgm = match ctx.audio.prepare("assets/audio/title_bgm.ogg") {
            Ok(sound) => ctx.audio.play_looping(sound).ok(),
            Err(e) => {
                log::warn!("title bgm unavailable: {e}");
                None
            }
        };
        Ok(())
    }

    fn process_input(&mut self, ctx: &mut GameContext) {
        if ctx.input.is_key_pressed(KeyCode::Escape) {
            ctx.request_quit();
            return;
        }
        // Swallow the fade-in so a mashed key doesn't skip the title
        // before it's visible.
        if !self.leaving && self.timer > 0.5 && ctx.input.any_key_pressed() {
            self.leaving = true;
            ctx.replace_scene(Box::new(MainGameScene::new()));
        }
    }

    fn update(&mut self, _ctx: &mut GameContext, dt: f32) {
        self.timer += dt;
    }

    fn render(&mut self, ctx: &mut GameContext) -> Result<()> {
        let (w, h) = ctx.screen_size();
        let mut backdrop = SpriteBatch::new(self.background);
        backdrop.add_quad(0.0, 0.0, w, h, w, h, [1.0, 1.0, 1.0, 1.0]);

        // Fade in from black over the first second.
        let fade = (1.0 - self.timer).clamp(0.0, 1.0);
        let mut overlay = SpriteBatch::new(ctx.renderer.white_texture());
        overlay.add_quad(0.0, 0.0, w, h, w, h, [0.0, 0.0, 0.0, fade]);

        render_ui_frame(ctx, [0.01, 0.01, 0.03], &[backdrop, overlay])
    }

    fn finalize(&mut self, ctx: &mut GameContext) {
        if let Some(bgm) = self.bgm.take() {
            ctx.audio.stop(bgm);
        }
    }
}
