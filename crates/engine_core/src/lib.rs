//! Core engine types for Onibi.
//!
//! This crate provides the simulation foundation used across all engine
//! systems:
//! - Transform and frame timing
//! - Collision shapes and intersection tests
//! - The actor arena, actor lists, and broad-phase collision dispatch
//! - The scene state machine (scene trait + scene stack)

pub mod actor;
pub mod collision;
pub mod scene;
pub mod time;
pub mod transform;

pub use actor::*;
pub use collision::*;
pub use scene::*;
pub use time::*;
pub use transform::*;

// Re-export commonly used types
pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
