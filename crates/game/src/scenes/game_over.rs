//! Game over screen. Replaces the main game on player death; any key
//! returns to the title.

use anyhow::Result;
use engine_core::{Scene, SceneBase};
use renderer::{SpriteBatch, TextureId};

use super::{render_ui_frame, TitleScene};
use crate::context::GameContext;

pub struct GameOverScene {
    base: SceneBase,
    background: TextureId,
    timer: f32,
    leaving: bool,
}

impl GameOverScene {
    pub fn new() -> Self {
        Self {
            base: SceneBase::new("GameOverScene"),
            background: TextureId(0),
            timer: 0.0,
            leaving: false,
        }
    }
}

impl Default for GameOverScene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene<GameContext> for GameOverScene {
    fn base(&self) -> &SceneBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut SceneBase {
        &mut self.base
    }

    fn initialize(&mut self, ctx: &mut GameContext) -> Result<()> {
        self.background = ctx.renderer.load_texture("assets/textures/game_over.png")?;
        Ok(())
    }

    fn process_input(&mut self, ctx: &mut GameContext) {
        // Brief lockout so the death keystroke doesn't skip the screen.
        if !self.leaving && self.timer > 1.0 && ctx.input.any_key_pressed() {
            self.leaving = true;
            ctx.replace_scene(Box::new(TitleScene::new()));
        }
    }

    fn update(&mut self, _ctx: &mut GameContext, dt: f32) {
        self.timer += dt;
    }

    fn render(&mut self, ctx: &mut GameContext) -> Result<()> {
        let (w, h) = ctx.screen_size();
        let mut backdrop = SpriteBatch::new(self.background);
        let alpha = (self.timer * 0.7).clamp(0.0, 1.0);
        backdrop.add_quad(0.0, 0.0, w, h, w, h, [1.0, 1.0, 1.0, alpha]);
        render_ui_frame(ctx, [0.02, 0.0, 0.0], &[backdrop])
    }

    fn finalize(&mut self, _ctx: &mut GameContext) {}
}
