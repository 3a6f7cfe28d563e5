//! Status overlay, pushed on top of the main game. Popping it resumes the
//! game exactly where it was.

use anyhow::Result;
use engine_core::{Scene, SceneBase};
use input::KeyCode;
use renderer::{SpriteBatch, TextureId};

use super::render_ui_frame;
use crate::context::GameContext;

pub struct StatusScene {
    base: SceneBase,
    panel: TextureId,
}

impl StatusScene {
    pub fn new() -> Self {
        Self {
            base: SceneBase::new("StatusScene"),
            panel: TextureId(0),
        }
    }
}

impl Default for StatusScene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene<GameContext> for StatusScene {
    fn base(&self) -> &SceneBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut SceneBase {
        &mut self.base
    }

    fn initialize(&mut self, ctx: &mut GameContext) -> Result<()> {
        self.panel = ctx.renderer.load_texture("assets/textures/status.png")?;
        Ok(())
    }

    fn process_input(&mut self, ctx: &mut GameContext) {
        if ctx.input.is_key_pressed(KeyCode::Tab)
            || ctx.input.is_key_pressed(KeyCode::Escape)
        {
            ctx.pop_scene();
        }
    }

    fn update(&mut self, _ctx: &mut GameContext, _dt: f32) {}

    fn render(&mut self, ctx: &mut GameContext) -> Result<()> {
        let (w, h) = ctx.screen_size();

        let mut dim = SpriteBatch::new(ctx.renderer.white_texture());
        dim.add_quad(0.0, 0.0, w, h, w, h, [0.0, 0.0, 0.0, 0.6]);

        let mut panel = SpriteBatch::new(self.panel);
        panel.add_quad(w * 0.25, h * 0.15, w * 0.5, h * 0.7, w, h, [1.0; 4]);

        render_ui_frame(ctx, [0.0, 0.0, 0.0], &[dim, panel])
    }

    fn finalize(&mut self, _ctx: &mut GameContext) {}
}
