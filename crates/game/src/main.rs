//! Onibi — a 3D action game about appeasing shrine guardians.
//!
//! The binary owns the window/event loop and drives the scene stack:
//! input → update → audio pump → render, then queued scene transitions.

mod config;
mod context;
mod player;
mod scenes;

use anyhow::Result;
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::{DeviceEvent, DeviceId, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::PhysicalKey,
    window::{Window, WindowId},
};

use audio::AudioSystem;
use engine_core::SceneStack;
use renderer::Renderer;

use config::GameConfig;
use context::GameContext;
use scenes::TitleScene;

struct Game {
    window: Arc<Window>,
    ctx: GameContext,
    stack: SceneStack<GameContext>,
}

impl Game {
    fn new(event_loop: &ActiveEventLoop, config: GameConfig) -> Result<Self> {
        let attributes = Window::default_attributes()
            .with_title("Onibi")
            .with_inner_size(winit::dpi::LogicalSize::new(
                config.window_width,
                config.window_height,
            ));
        let window = Arc::new(event_loop.create_window(attributes)?);

        let renderer = pollster::block_on(Renderer::new(window.clone(), config.vsync))?;
        let mut audio = AudioSystem::new()?;
        audio.set_master_volume(config.master_volume);

        let mut ctx = GameContext::new(renderer, audio, config);
        let mut stack = SceneStack::new();
        stack.push(&mut ctx, Box::new(TitleScene::new()))?;

        Ok(Self { window, ctx, stack })
    }

    /// Run one frame. Returns true when the game should exit.
    fn frame(&mut self) -> bool {
        self.ctx.time.update();
        let dt = self.ctx.time.delta_seconds();

        self.stack.process_input(&mut self.ctx);
        self.stack.update(&mut self.ctx, dt);
        self.ctx.audio.update();

        if let Err(e) = self.stack.render(&mut self.ctx) {
            match e.downcast_ref::<wgpu::SurfaceError>() {
                Some(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    let size = self.ctx.renderer.size;
                    self.ctx.renderer.resize(size);
                }
                Some(wgpu::SurfaceError::OutOfMemory) => {
                    log::error!("out of GPU memory, exiting");
                    return true;
                }
                _ => log::warn!("render error: {e}"),
            }
        }

        // Apply queued scene transitions. A failed initialize is fatal:
        // there is no recovery path for a half-initialized scene.
        let requests = std::mem::take(&mut self.ctx.requests);
        let quit = match self.stack.apply(&mut self.ctx, requests) {
            Ok(quit) => quit,
            Err(e) => {
                log::error!("scene initialization failed: {e:#}");
                true
            }
        };

        self.ctx.input.begin_frame();
        quit || self.ctx.quit || self.ctx.input.close_requested() || self.stack.is_empty()
    }

    fn shutdown(&mut self) {
        self.stack.clear(&mut self.ctx);
        self.ctx.audio.stop_all();
        self.ctx.config.save();
    }
}

#[derive(Default)]
struct App {
    game: Option<Game>,
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.game.is_none() {
            match Game::new(event_loop, GameConfig::load()) {
                Ok(game) => {
                    game.window.request_redraw();
                    self.game = Some(game);
                }
                Err(e) => {
                    log::error!("failed to start: {e:#}");
                    event_loop.exit();
                }
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(game) = self.game.as_mut() else { return };
        match event {
            WindowEvent::CloseRequested => game.ctx.input.request_close(),
            WindowEvent::Resized(size) => game.ctx.renderer.resize(size),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state,
                        ..
                    },
                ..
            } => game.ctx.input.process_keyboard(code, state),
            WindowEvent::MouseInput { button, state, .. } => {
                game.ctx.input.process_mouse_button(button, state);
            }
            WindowEvent::CursorMoved { position, .. } => {
                game.ctx.input.process_cursor_position((position.x, position.y));
            }
            WindowEvent::RedrawRequested => {
                if game.frame() {
                    event_loop.exit();
                } else {
                    game.window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn device_event(&mut self, _: &ActiveEventLoop, _: DeviceId, event: DeviceEvent) {
        if let DeviceEvent::MouseMotion { delta } = event {
            if let Some(game) = self.game.as_mut() {
                game.ctx.input.process_mouse_motion(delta);
            }
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(game) = self.game.as_mut() {
            game.shutdown();
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("Starting Onibi");

    let event_loop = EventLoop::new()?;
    // Poll continuously: the simulation renders every frame regardless of
    // incoming events.
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::default();
    event_loop.run_app(&mut app)?;
    Ok(())
}
