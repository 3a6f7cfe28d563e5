//! Concrete game scenes: title, main game, status overlay, game over.

mod game_over;
mod main_game;
mod status;
mod title;

pub use game_over::GameOverScene;
pub use main_game::MainGameScene;
pub use status::StatusScene;
pub use title::TitleScene;

use anyhow::Result;
use renderer::SpriteBatch;

use crate::context::GameContext;

/// Render a UI-only frame: an empty (cleared) scene still runs the full
/// post chain so every screen goes through the same pipeline, then the
/// sprites composite over the untouched background.
pub(crate) fn render_ui_frame(
    ctx: &mut GameContext,
    clear: [f64; 3],
    sprites: &[SpriteBatch],
) -> Result<()> {
    let (output, mut encoder) = ctx.renderer.begin_frame()?;
    let output_view = output
        .texture
        .create_view(&wgpu::TextureViewDescriptor::default());

    ctx.renderer.clear_main_target(&mut encoder, clear);
    ctx.renderer.run_dof_pass(&mut encoder);
    ctx.renderer.run_bloom_passes(&mut encoder);
    ctx.renderer.composite_pass(&mut encoder, &output_view, sprites);

    ctx.renderer.end_frame(output, encoder);
    Ok(())
}
