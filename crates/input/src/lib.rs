//! Polled keyboard and mouse state.
//!
//! The window driver feeds winit events in; scenes read the resulting
//! held/pressed/released sets once per frame. Per-frame sets are cleared by
//! `begin_frame` after the frame has consumed them.

use glam::Vec2;
use std::collections::HashSet;

/// Input state for the current frame.
#[derive(Debug, Default)]
pub struct InputState {
    keys_held: HashSet<KeyCode>,
    keys_pressed: HashSet<KeyCode>,
    keys_released: HashSet<KeyCode>,

    mouse_held: HashSet<MouseButton>,
    mouse_pressed: HashSet<MouseButton>,

    mouse_position: Vec2,
    mouse_delta: Vec2,
    accumulated_delta: Vec2,

    close_requested: bool,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear per-frame state. Call once the frame has been processed.
    pub fn begin_frame(&mut self) {
        self.keys_pressed.clear();
        self.keys_released.clear();
        self.mouse_pressed.clear();
        self.mouse_delta = self.accumulated_delta;
        self.accumulated_delta = Vec2::ZERO;
    }

    /// Feed a keyboard event.
    pub fn process_keyboard(&mut self, key: KeyCode, state: ElementState) {
        match state {
            ElementState::Pressed => {
                if !self.keys_held.contains(&key) {
                    self.keys_pressed.insert(key);
                }
                self.keys_held.insert(key);
            }
            ElementState::Released => {
                self.keys_held.remove(&key);
                self.keys_released.insert(key);
            }
        }
    }

    /// Feed a mouse button event.
    pub fn process_mouse_button(&mut self, button: MouseButton, state: ElementState) {
        match state {
            ElementState::Pressed => {
                if !self.mouse_held.contains(&button) {
                    self.mouse_pressed.insert(button);
                }
                self.mouse_held.insert(button);
            }
            ElementState::Released => {
                self.mouse_held.remove(&button);
            }
        }
    }

    /// Feed raw mouse motion.
    pub fn process_mouse_motion(&mut self, delta: (f64, f64)) {
        self.accumulated_delta.x += delta.0 as f32;
        self.accumulated_delta.y += delta.1 as f32;
    }

    /// Feed the cursor position.
    pub fn process_cursor_position(&mut self, position: (f64, f64)) {
        self.mouse_position = Vec2::new(position.0 as f32, position.1 as f32);
    }

    /// The window was asked to close.
    pub fn request_close(&mut self) {
        self.close_requested = true;
    }

    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    /// Check if a key is currently held.
    pub fn is_key_held(&self, key: KeyCode) -> bool {
        self.keys_held.contains(&key)
    }

    /// Check if a key went down this frame.
    pub fn is_key_pressed(&self, key: KeyCode) -> bool {
        self.keys_pressed.contains(&key)
    }

    /// Check if a key went up this frame.
    pub fn is_key_released(&self, key: KeyCode) -> bool {
        self.keys_released.contains(&key)
    }

    /// Any key at all went down this frame (title screens).
    pub fn any_key_pressed(&self) -> bool {
        !self.keys_pressed.is_empty()
    }

    pub fn is_mouse_held(&self, button: MouseButton) -> bool {
        self.mouse_held.contains(&button)
    }

    pub fn is_mouse_pressed(&self, button: MouseButton) -> bool {
        self.mouse_pressed.contains(&button)
    }

    pub fn mouse_position(&self) -> Vec2 {
        self.mouse_position
    }

    pub fn mouse_delta(&self) -> Vec2 {
        self.mouse_delta
    }

    /// Movement axis from WASD / arrow keys, normalized. `y` is forward.
    pub fn movement_axis(&self) -> Vec2 {
        let mut movement = Vec2::ZERO;
        if self.is_key_held(KeyCode::KeyW) || self.is_key_held(KeyCode::ArrowUp) {
            movement.y += 1.0;
        }
        if self.is_key_held(KeyCode::KeyS) || self.is_key_held(KeyCode::ArrowDown) {
            movement.y -= 1.0;
        }
        if self.is_key_held(KeyCode::KeyA) || self.is_key_held(KeyCode::ArrowLeft) {
            movement.x -= 1.0;
        }
        if self.is_key_held(KeyCode::KeyD) || self.is_key_held(KeyCode::ArrowRight) {
            movement.x += 1.0;
        }
        if movement.length_squared() > 0.0 {
            movement = movement.normalize();
        }
        movement
    }
}

// Re-export for convenience
pub use winit::event::{ElementState, MouseButton};
pub use winit::keyboard::KeyCode;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pressed_is_one_frame_only() {
        let mut input = InputState::new();
        input.process_keyboard(KeyCode::Space, ElementState::Pressed);
        assert!(input.is_key_pressed(KeyCode::Space));
        assert!(input.is_key_held(KeyCode::Space));

        input.begin_frame();
        assert!(!input.is_key_pressed(KeyCode::Space));
        assert!(input.is_key_held(KeyCode::Space), "held persists");
    }

    #[test]
    fn key_repeat_does_not_retrigger_pressed() {
        let mut input = InputState::new();
        input.process_keyboard(KeyCode::KeyW, ElementState::Pressed);
        input.begin_frame();
        // OS key repeat sends Pressed again while still held.
        input.process_keyboard(KeyCode::KeyW, ElementState::Pressed);
        assert!(!input.is_key_pressed(KeyCode::KeyW));
    }

    #[test]
    fn movement_axis_is_normalized() {
        let mut input = InputState::new();
        input.process_keyboard(KeyCode::KeyW, ElementState::Pressed);
        input.process_keyboard(KeyCode::KeyD, ElementState::Pressed);
        let axis = input.movement_axis();
        assert!((axis.length() - 1.0).abs() < 1e-6);
        assert!(axis.x > 0.0 && axis.y > 0.0);
    }
}
