//! Vertex types and layouts for rendering.

use bytemuck::{Pod, Zeroable};

use crate::assets::TextureId;
use crate::light::LightSelection;

/// Standard vertex with position, normal, and UV coordinates.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tex_coords: [f32; 2],
}

impl Vertex {
    pub fn new(position: [f32; 3], normal: [f32; 3], tex_coords: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            tex_coords,
        }
    }

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                // Position
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                // Normal
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x3,
                },
                // UV
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 6]>() as wgpu::BufferAddress,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x2,
                },
            ],
        }
    }
}

/// Instance data for instanced mesh rendering: model matrix, tint, and the
/// indices of the bound point/spot lights shading this object. Unused index
/// slots hold `u32::MAX` and are skipped by the shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct InstanceData {
    /// Model matrix (4x4).
    pub model: [[f32; 4]; 4],
    /// Color tint.
    pub color: [f32; 4],
    /// Point-light slots shading this instance.
    pub point_lights: [u32; 8],
    /// Spot-light slots shading this instance.
    pub spot_lights: [u32; 4],
}

impl InstanceData {
    /// Instance shaded by every bound light.
    pub fn new(model: [[f32; 4]; 4], color: [f32; 4]) -> Self {
        Self {
            model,
            color,
            point_lights: [0, 1, 2, 3, 4, 5, 6, 7],
            spot_lights: [0, 1, 2, 3],
        }
    }

    /// Instance shaded by an explicit nearby-light selection.
    pub fn with_lights(model: [[f32; 4]; 4], color: [f32; 4], lights: LightSelection) -> Self {
        Self {
            model,
            color,
            point_lights: lights.point,
            spot_lights: lights.spot,
        }
    }

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<InstanceData>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &[
                // Model matrix columns
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 3,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 4]>() as wgpu::BufferAddress,
                    shader_location: 4,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 8]>() as wgpu::BufferAddress,
                    shader_location: 5,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 12]>() as wgpu::BufferAddress,
                    shader_location: 6,
                    format: wgpu::VertexFormat::Float32x4,
                },
                // Color
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 16]>() as wgpu::BufferAddress,
                    shader_location: 7,
                    format: wgpu::VertexFormat::Float32x4,
                },
                // Point light slots (two uvec4)
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 20]>() as wgpu::BufferAddress,
                    shader_location: 8,
                    format: wgpu::VertexFormat::Uint32x4,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 24]>() as wgpu::BufferAddress,
                    shader_location: 9,
                    format: wgpu::VertexFormat::Uint32x4,
                },
                // Spot light slots
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 28]>() as wgpu::BufferAddress,
                    shader_location: 10,
                    format: wgpu::VertexFormat::Uint32x4,
                },
            ],
        }
    }
}

impl Default for InstanceData {
    fn default() -> Self {
        Self::new(glam::Mat4::IDENTITY.to_cols_array_2d(), [1.0, 1.0, 1.0, 1.0])
    }
}

/// Vertex for particle billboards: corners are expanded on the CPU in
/// view-aligned space, so the shader only transforms and textures them.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ParticleVertex {
    pub position: [f32; 3],
    pub tex_coords: [f32; 2],
    pub color: [f32; 4],
}

impl ParticleVertex {
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<ParticleVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 5]>() as wgpu::BufferAddress,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x4,
                },
            ],
        }
    }
}

/// Vertex for screen-space UI sprites, in normalized device coordinates.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SpriteVertex {
    pub position: [f32; 2],
    pub tex_coords: [f32; 2],
    pub color: [f32; 4],
}

impl SpriteVertex {
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<SpriteVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 4]>() as wgpu::BufferAddress,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x4,
                },
            ],
        }
    }
}

/// A batch of UI sprite quads sharing one texture, drawn during the
/// composite pass.
#[derive(Debug, Clone)]
pub struct SpriteBatch {
    pub texture: TextureId,
    pub vertices: Vec<SpriteVertex>,
    pub indices: Vec<u32>,
}

impl SpriteBatch {
    pub fn new(texture: TextureId) -> Self {
        Self {
            texture,
            vertices: Vec::new(),
            indices: Vec::new(),
        }
    }

    /// Add a quad in pixel coordinates, with (0,0) at the top left.
    pub fn add_quad(
        &mut self,
        x: f32,
        y: f32,
        w: f32,
        h: f32,
        screen_w: f32,
        screen_h: f32,
        color: [f32; 4],
    ) {
        let to_ndc = |px: f32, py: f32| {
            [
                (px / screen_w) * 2.0 - 1.0,
                1.0 - (py / screen_h) * 2.0,
            ]
        };
        let tl = to_ndc(x, y);
        let br = to_ndc(x + w, y + h);
        let base = self.vertices.len() as u32;
        self.vertices.push(SpriteVertex {
            position: tl,
            tex_coords: [0.0, 0.0],
            color,
        });
        self.vertices.push(SpriteVertex {
            position: [br[0], tl[1]],
            tex_coords: [1.0, 0.0],
            color,
        });
        self.vertices.push(SpriteVertex {
            position: br,
            tex_coords: [1.0, 1.0],
            color,
        });
        self.vertices.push(SpriteVertex {
            position: [tl[0], br[1]],
            tex_coords: [0.0, 1.0],
            color,
        });
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    /// Add a quad covering the whole screen.
    pub fn add_fullscreen(&mut self, color: [f32; 4]) {
        self.add_quad(0.0, 0.0, 1.0, 1.0, 1.0, 1.0, color);
    }
}
