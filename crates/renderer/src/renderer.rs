//! Main renderer managing wgpu state and the per-frame pass sequence.
//!
//! A frame runs through five strictly ordered stages, each against its own
//! target with its own depth/blend state:
//!
//! 1. shadow pass (depth-only, light-space ortho)
//! 2. main color pass (offscreen color+depth: terrain, water, actors,
//!    then particles)
//! 3. depth-of-field pass (full-screen, thin-lens defocus)
//! 4. bloom (bright extract, mip-chain downsample, separable blur,
//!    additive upsample)
//! 5. composite to the swapchain (UI sprites + defocused scene + bloom)
//!
//! Every pass binds the exact state it needs; nothing is assumed to
//! survive from the previous pass.

use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use std::path::Path;
use std::sync::Arc;
use wgpu::util::DeviceExt;
use winit::window::Window;

use engine_core::MeshId;

use crate::assets::{MeshStore, TextureId, TextureStore};
use crate::camera::{Camera, CameraUniform};
use crate::light::LightsUniform;
use crate::mesh::MeshData;
use crate::particles::{ParticleBlend, ParticleDrawData};
use crate::pipeline::*;
use crate::texture::Texture;
use crate::vertex::{InstanceData, ParticleVertex, SpriteBatch, SpriteVertex};

/// Shadow map resolution (square).
pub const SHADOW_MAP_SIZE: u32 = 4096;
/// Levels in the bloom mip chain.
pub const BLOOM_LEVELS: usize = 6;

const MAX_INSTANCES: u32 = 4096;
const MAX_PARTICLE_QUADS: u32 = 8192;
const MAX_SPRITE_QUADS: u32 = 1024;

/// Pixel dimensions of each bloom mip for a given source resolution: the
/// first mip is half the source, every following mip half the previous
/// (floor, clamped to 1x1).
pub fn bloom_mip_dimensions(width: u32, height: u32, levels: usize) -> Vec<(u32, u32)> {
    let mut dims = Vec::with_capacity(levels);
    let (mut w, mut h) = ((width / 2).max(1), (height / 2).max(1));
    for _ in 0..levels {
        dims.push((w, h));
        w = (w / 2).max(1);
        h = (h / 2).max(1);
    }
    dims
}

/// Shadow uniform (must match shadow.wgsl / mesh.wgsl `Shadow`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ShadowUniform {
    light_view_proj: [[f32; 4]; 4],
}

/// Lens uniform for the depth-of-field pass (must match dof.wgsl `Dof`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct DofUniform {
    focal_plane: f32,
    focal_length: f32,
    aperture: f32,
    sensor_size: f32,
    near: f32,
    far: f32,
    viewport: [f32; 2],
}

/// Parameters shared by all bloom stages (must match bloom.wgsl).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct BloomParams {
    threshold: f32,
    intensity: f32,
    direction: [f32; 2],
}

/// One level of the bloom chain with its ping-pong pair.
struct BloomMip {
    a_view: wgpu::TextureView,
    b_view: wgpu::TextureView,
}

/// Main renderer state.
pub struct Renderer {
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,
    pub size: winit::dpi::PhysicalSize<u32>,
    pub window: Arc<Window>,

    // Asset stores
    meshes: MeshStore,
    textures: TextureStore,

    // Pipelines
    mesh_pipeline: wgpu::RenderPipeline,
    terrain_pipeline: wgpu::RenderPipeline,
    water_pipeline: wgpu::RenderPipeline,
    terrain_shadow_pipeline: wgpu::RenderPipeline,
    mesh_shadow_pipeline: wgpu::RenderPipeline,
    particle_additive_pipeline: wgpu::RenderPipeline,
    particle_alpha_pipeline: wgpu::RenderPipeline,
    dof_pipeline: wgpu::RenderPipeline,
    bright_pipeline: wgpu::RenderPipeline,
    downsample_pipeline: wgpu::RenderPipeline,
    blur_pipeline: wgpu::RenderPipeline,
    upsample_pipeline: wgpu::RenderPipeline,
    scene_blit_pipeline: wgpu::RenderPipeline,
    bloom_add_pipeline: wgpu::RenderPipeline,
    sprite_pipeline: wgpu::RenderPipeline,

    // Layouts needed for per-frame bind groups
    dof_layout: wgpu::BindGroupLayout,
    post_layout: wgpu::BindGroupLayout,
    bloom_layout: wgpu::BindGroupLayout,

    // Uniforms
    camera_uniform: CameraUniform,
    camera_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
    lights_buffer: wgpu::Buffer,
    lights_bind_group: wgpu::BindGroup,
    shadow_buffer: wgpu::Buffer,
    shadow_pass_bind_group: wgpu::BindGroup,
    shadow_sample_bind_group: wgpu::BindGroup,
    dof_buffer: wgpu::Buffer,
    bright_params: wgpu::Buffer,
    downsample_params: wgpu::Buffer,
    blur_h_params: wgpu::Buffer,
    blur_v_params: wgpu::Buffer,
    upsample_params: wgpu::Buffer,

    // Offscreen targets
    shadow_map_view: wgpu::TextureView,
    scene_view: wgpu::TextureView,
    depth_texture: Texture,
    dof_view: wgpu::TextureView,
    bloom_mips: Vec<BloomMip>,
    post_sampler: wgpu::Sampler,

    // Geometry streams
    instance_buffer: wgpu::Buffer,
    shadow_instance_buffer: wgpu::Buffer,
    /// Write offset into `instance_buffer` for this frame. Each draw call
    /// gets a unique region so `queue.write_buffer` calls don't clobber
    /// each other (all writes land before the command buffer executes).
    frame_instance_offset: u32,
    particle_vertex_buffer: wgpu::Buffer,
    particle_index_buffer: wgpu::Buffer,
    sprite_vertex_buffer: wgpu::Buffer,
    sprite_index_buffer: wgpu::Buffer,
}

impl Renderer {
    /// Create a renderer for the given window.
    pub async fn new(window: Arc<Window>, vsync: bool) -> Result<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance.create_surface(window.clone())?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| anyhow::anyhow!("Failed to find suitable GPU adapter"))?;

        log::info!("Using GPU: {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Main Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        let present_mode = if vsync {
            wgpu::PresentMode::AutoVsync
        } else {
            wgpu::PresentMode::AutoNoVsync
        };

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        // Bind group layouts
        let camera_layout = create_camera_bind_group_layout(&device);
        let texture_layout = create_texture_bind_group_layout(&device);
        let lights_layout = create_lights_bind_group_layout(&device);
        let shadow_pass_layout = create_shadow_pass_bind_group_layout(&device);
        let shadow_sample_layout = create_shadow_sample_bind_group_layout(&device);
        let dof_layout = create_dof_bind_group_layout(&device);
        let post_layout = create_post_bind_group_layout(&device);
        let bloom_layout = create_bloom_bind_group_layout(&device);

        // Uniform buffers
        let camera_uniform = CameraUniform::new();
        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Camera Buffer"),
            contents: bytemuck::cast_slice(&[camera_uniform]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Camera Bind Group"),
            layout: &camera_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
        });

        let lights_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Lights Buffer"),
            contents: bytemuck::cast_slice(&[LightsUniform::default()]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let lights_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Lights Bind Group"),
            layout: &lights_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: lights_buffer.as_entire_binding(),
            }],
        });

        // Shadow map + comparison sampler
        let shadow_uniform = ShadowUniform {
            light_view_proj: glam::Mat4::IDENTITY.to_cols_array_2d(),
        };
        let shadow_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Shadow Uniform"),
            contents: bytemuck::cast_slice(&[shadow_uniform]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let shadow_map = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Shadow Map"),
            size: wgpu::Extent3d {
                width: SHADOW_MAP_SIZE,
                height: SHADOW_MAP_SIZE,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Texture::DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let shadow_map_view = shadow_map.create_view(&wgpu::TextureViewDescriptor::default());
        let shadow_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Shadow Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });
        let shadow_pass_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Shadow Pass Bind Group"),
            layout: &shadow_pass_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: shadow_buffer.as_entire_binding(),
            }],
        });
        let shadow_sample_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Shadow Sample Bind Group"),
            layout: &shadow_sample_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: shadow_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&shadow_map_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&shadow_sampler),
                },
            ],
        });

        // Post-process uniforms
        let dof_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("DoF Uniform"),
            contents: bytemuck::cast_slice(&[DofUniform {
                focal_plane: 10_000.0,
                focal_length: 50.0,
                aperture: 20.0,
                sensor_size: 36.0,
                near: 1.0,
                far: 500.0,
                viewport: [size.width as f32, size.height as f32],
            }]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let bloom_params_buffer = |label: &str, params: BloomParams| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(&[params]),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            })
        };
        let bright_params = bloom_params_buffer(
            "Bright Params",
            BloomParams {
                threshold: 0.75,
                intensity: 1.0,
                direction: [0.0, 0.0],
            },
        );
        let downsample_params = bloom_params_buffer(
            "Downsample Params",
            BloomParams {
                threshold: 0.0,
                intensity: 1.0,
                direction: [0.0, 0.0],
            },
        );
        let blur_h_params = bloom_params_buffer(
            "Blur H Params",
            BloomParams {
                threshold: 0.0,
                intensity: 1.0,
                direction: [1.0, 0.0],
            },
        );
        let blur_v_params = bloom_params_buffer(
            "Blur V Params",
            BloomParams {
                threshold: 0.0,
                intensity: 1.0,
                direction: [0.0, 1.0],
            },
        );
        let upsample_params = bloom_params_buffer(
            "Upsample Params",
            BloomParams {
                threshold: 0.0,
                intensity: 0.6,
                direction: [0.0, 0.0],
            },
        );

        // Offscreen targets
        let scene_view = create_color_target(&device, &config, "Scene Color");
        let depth_texture =
            Texture::create_depth_texture(&device, config.width, config.height, "Depth Texture");
        let dof_view = create_color_target(&device, &config, "DoF Color");
        let bloom_mips = create_bloom_chain(&device, &config);
        let post_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Post Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        // Pipelines
        let mesh_pipeline = create_mesh_pipeline(
            &device,
            config.format,
            &camera_layout,
            &texture_layout,
            &lights_layout,
            &shadow_sample_layout,
        );
        let terrain_pipeline = create_terrain_pipeline(
            &device,
            config.format,
            &camera_layout,
            &texture_layout,
            &lights_layout,
            &shadow_sample_layout,
        );
        let water_pipeline = create_water_pipeline(
            &device,
            config.format,
            &camera_layout,
            &texture_layout,
            &lights_layout,
        );
        let terrain_shadow_pipeline = create_terrain_shadow_pipeline(&device, &shadow_pass_layout);
        let mesh_shadow_pipeline = create_mesh_shadow_pipeline(&device, &shadow_pass_layout);
        let particle_additive_pipeline =
            create_particle_pipeline(&device, config.format, &camera_layout, &texture_layout, true);
        let particle_alpha_pipeline =
            create_particle_pipeline(&device, config.format, &camera_layout, &texture_layout, false);
        let dof_pipeline = create_dof_pipeline(&device, config.format, &dof_layout);
        let bright_pipeline = create_bright_pipeline(&device, config.format, &bloom_layout);
        let downsample_pipeline = create_downsample_pipeline(&device, config.format, &bloom_layout);
        let blur_pipeline = create_blur_pipeline(&device, config.format, &bloom_layout);
        let upsample_pipeline = create_upsample_pipeline(&device, config.format, &bloom_layout);
        let scene_blit_pipeline = create_scene_blit_pipeline(&device, config.format, &post_layout);
        let bloom_add_pipeline = create_bloom_add_pipeline(&device, config.format, &post_layout);
        let sprite_pipeline = create_sprite_pipeline(&device, config.format, &texture_layout);

        // Geometry streams
        let instance_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Instance Buffer"),
            size: (MAX_INSTANCES as usize * std::mem::size_of::<InstanceData>()) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let shadow_instance_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Shadow Instance Buffer"),
            size: (MAX_INSTANCES as usize * std::mem::size_of::<InstanceData>()) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let particle_vertex_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Particle Vertex Buffer"),
            size: (MAX_PARTICLE_QUADS as usize * 4 * std::mem::size_of::<ParticleVertex>()) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let particle_index_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Particle Index Buffer"),
            size: (MAX_PARTICLE_QUADS as usize * 6 * std::mem::size_of::<u32>()) as u64,
            usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let sprite_vertex_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Sprite Vertex Buffer"),
            size: (MAX_SPRITE_QUADS as usize * 4 * std::mem::size_of::<SpriteVertex>()) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let sprite_index_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Sprite Index Buffer"),
            size: (MAX_SPRITE_QUADS as usize * 6 * std::mem::size_of::<u32>()) as u64,
            usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let meshes = MeshStore::new();
        let textures = TextureStore::new(&device, &queue, texture_layout);

        Ok(Self {
            surface,
            device,
            queue,
            config,
            size,
            window,
            meshes,
            textures,
            mesh_pipeline,
            terrain_pipeline,
            water_pipeline,
            terrain_shadow_pipeline,
            mesh_shadow_pipeline,
            particle_additive_pipeline,
            particle_alpha_pipeline,
            dof_pipeline,
            bright_pipeline,
            downsample_pipeline,
            blur_pipeline,
            upsample_pipeline,
            scene_blit_pipeline,
            bloom_add_pipeline,
            sprite_pipeline,
            dof_layout,
            post_layout,
            bloom_layout,
            camera_uniform,
            camera_buffer,
            camera_bind_group,
            lights_buffer,
            lights_bind_group,
            shadow_buffer,
            shadow_pass_bind_group,
            shadow_sample_bind_group,
            dof_buffer,
            bright_params,
            downsample_params,
            blur_h_params,
            blur_v_params,
            upsample_params,
            shadow_map_view,
            scene_view,
            depth_texture,
            dof_view,
            bloom_mips,
            post_sampler,
            instance_buffer,
            shadow_instance_buffer,
            frame_instance_offset: 0,
            particle_vertex_buffer,
            particle_index_buffer,
            sprite_vertex_buffer,
            sprite_index_buffer,
        })
    }

    /// Handle window resize: the swapchain and every screen-sized target
    /// are rebuilt at the new dimensions.
    pub fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        self.size = new_size;
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(&self.device, &self.config);
        self.scene_view = create_color_target(&self.device, &self.config, "Scene Color");
        self.depth_texture = Texture::create_depth_texture(
            &self.device,
            self.config.width,
            self.config.height,
            "Depth Texture",
        );
        self.dof_view = create_color_target(&self.device, &self.config, "DoF Color");
        self.bloom_mips = create_bloom_chain(&self.device, &self.config);
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    // ── Assets ──────────────────────────────────────────────────────────

    /// Load a glTF mesh by path.
    pub fn load_mesh(&mut self, path: impl AsRef<Path>) -> Result<MeshId> {
        Ok(self.meshes.load(&self.device, path)?)
    }

    /// Register procedurally generated mesh data.
    pub fn add_mesh(&mut self, data: &MeshData) -> MeshId {
        self.meshes.insert(data.upload(&self.device))
    }

    /// Load a texture by path.
    pub fn load_texture(&mut self, path: impl AsRef<Path>) -> Result<TextureId> {
        Ok(self.textures.load(&self.device, &self.queue, path)?)
    }

    /// The built-in 1x1 white texture.
    pub fn white_texture(&self) -> TextureId {
        self.textures.white()
    }

    // ── Per-frame uniform updates ───────────────────────────────────────

    /// Upload the camera matrices. `time` feeds shader animation.
    pub fn update_camera(&mut self, camera: &Camera, time: f32) {
        self.camera_uniform.update(camera, time);
        self.queue.write_buffer(
            &self.camera_buffer,
            0,
            bytemuck::cast_slice(&[self.camera_uniform]),
        );
    }

    /// Upload the frame's light snapshot.
    pub fn update_lights(&mut self, lights: &LightsUniform) {
        self.queue
            .write_buffer(&self.lights_buffer, 0, bytemuck::cast_slice(&[*lights]));
    }

    /// Derive and upload the light-space matrix: an orthographic view down
    /// the directional light, centered on the camera's focus target.
    pub fn update_shadow(&mut self, light_dir: Vec3, focus: Vec3) {
        let dir = light_dir.normalize_or_zero();
        let eye = focus - dir * 150.0;
        let up = if dir.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
        let view = glam::Mat4::look_at_rh(eye, focus, up);
        let half = 100.0f32;
        let proj = glam::Mat4::orthographic_rh(-half, half, -half, half, 1.0, 400.0);
        let uniform = ShadowUniform {
            light_view_proj: (proj * view).to_cols_array_2d(),
        };
        self.queue
            .write_buffer(&self.shadow_buffer, 0, bytemuck::cast_slice(&[uniform]));
    }

    /// Upload the thin-lens parameters for this frame's depth-of-field.
    pub fn update_dof(&mut self, camera: &Camera) {
        let uniform = DofUniform {
            focal_plane: camera.focal_plane(),
            focal_length: camera.focal_length(),
            aperture: camera.aperture(),
            sensor_size: camera.sensor_size,
            near: camera.near,
            far: camera.far,
            viewport: [self.config.width as f32, self.config.height as f32],
        };
        self.queue
            .write_buffer(&self.dof_buffer, 0, bytemuck::cast_slice(&[uniform]));
    }

    // ── Frame lifecycle ─────────────────────────────────────────────────

    /// Begin a new frame: returns the swapchain texture and an encoder.
    pub fn begin_frame(&mut self) -> Result<(wgpu::SurfaceTexture, wgpu::CommandEncoder)> {
        self.frame_instance_offset = 0;
        let output = self.surface.get_current_texture()?;
        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });
        Ok((output, encoder))
    }

    /// Submit the frame and present.
    pub fn end_frame(&self, output: wgpu::SurfaceTexture, encoder: wgpu::CommandEncoder) {
        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
    }

    // ── Pass 1: shadow ──────────────────────────────────────────────────

    /// Run the depth-only shadow pass: clears the shadow map, binds the
    /// light-space uniform, then lets the closure record casters.
    pub fn with_shadow_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        f: impl FnOnce(&Self, &mut wgpu::RenderPass),
    ) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Shadow Pass"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &self.shadow_map_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_bind_group(0, &self.shadow_pass_bind_group, &[]);
        f(self, &mut pass);
    }

    /// Draw the terrain into the shadow map.
    pub fn draw_terrain_shadow(&self, pass: &mut wgpu::RenderPass, mesh: MeshId) {
        let Some(mesh) = self.meshes.get(mesh) else { return };
        pass.set_pipeline(&self.terrain_shadow_pipeline);
        pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
        pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..mesh.num_indices, 0, 0..1);
    }

    /// Draw instanced geometry into the shadow map. `base_offset` is the
    /// caller-tracked running instance count for this shadow pass.
    pub fn draw_mesh_shadow(
        &self,
        pass: &mut wgpu::RenderPass,
        mesh: MeshId,
        instances: &[InstanceData],
        base_offset: u32,
    ) {
        if instances.is_empty() {
            return;
        }
        let Some(mesh) = self.meshes.get(mesh) else { return };
        if base_offset + instances.len() as u32 > MAX_INSTANCES {
            log::warn!("shadow instance buffer overflow, skipping draw");
            return;
        }
        let offset = base_offset as u64 * std::mem::size_of::<InstanceData>() as u64;
        self.queue
            .write_buffer(&self.shadow_instance_buffer, offset, bytemuck::cast_slice(instances));
        pass.set_pipeline(&self.mesh_shadow_pipeline);
        pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
        pass.set_vertex_buffer(1, self.shadow_instance_buffer.slice(offset..));
        pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..mesh.num_indices, 0, 0..instances.len() as u32);
    }

    // ── Pass 2: main color ──────────────────────────────────────────────

    /// Clear the main offscreen target. Color alpha clears to zero so the
    /// composite can show UI behind uncovered pixels; depth clears to 1.
    pub fn clear_main_target(&self, encoder: &mut wgpu::CommandEncoder, color: [f64; 3]) {
        let _ = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Main Clear"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.scene_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: color[0],
                        g: color[1],
                        b: color[2],
                        a: 0.0,
                    }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &self.depth_texture.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
    }

    fn begin_main_pass<'a>(
        &'a self,
        encoder: &'a mut wgpu::CommandEncoder,
        label: &'static str,
    ) -> wgpu::RenderPass<'a> {
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.scene_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &self.depth_texture.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        })
    }

    /// Draw the terrain mesh in the main pass.
    pub fn draw_terrain(&self, encoder: &mut wgpu::CommandEncoder, mesh: MeshId, texture: TextureId) {
        let Some(mesh) = self.meshes.get(mesh) else { return };
        let Some(texture_bg) = self.textures.bind_group(texture) else { return };
        let mut pass = self.begin_main_pass(encoder, "Terrain Pass");
        pass.set_pipeline(&self.terrain_pipeline);
        pass.set_bind_group(0, &self.camera_bind_group, &[]);
        pass.set_bind_group(1, texture_bg, &[]);
        pass.set_bind_group(2, &self.lights_bind_group, &[]);
        pass.set_bind_group(3, &self.shadow_sample_bind_group, &[]);
        pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
        pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..mesh.num_indices, 0, 0..1);
    }

    /// Draw the water surface (blended) in the main pass.
    pub fn draw_water(&self, encoder: &mut wgpu::CommandEncoder, mesh: MeshId, texture: TextureId) {
        let Some(mesh) = self.meshes.get(mesh) else { return };
        let Some(texture_bg) = self.textures.bind_group(texture) else { return };
        let mut pass = self.begin_main_pass(encoder, "Water Pass");
        pass.set_pipeline(&self.water_pipeline);
        pass.set_bind_group(0, &self.camera_bind_group, &[]);
        pass.set_bind_group(1, texture_bg, &[]);
        pass.set_bind_group(2, &self.lights_bind_group, &[]);
        pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
        pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..mesh.num_indices, 0, 0..1);
    }

    /// Draw a batch of mesh instances in the main pass.
    pub fn draw_mesh_instanced(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        mesh: MeshId,
        texture: TextureId,
        instances: &[InstanceData],
    ) {
        if instances.is_empty() {
            return;
        }
        if self.frame_instance_offset + instances.len() as u32 > MAX_INSTANCES {
            log::warn!("instance buffer overflow, skipping draw");
            return;
        }
        let base = self.frame_instance_offset;
        self.frame_instance_offset += instances.len() as u32;
        let offset = base as u64 * std::mem::size_of::<InstanceData>() as u64;
        self.queue
            .write_buffer(&self.instance_buffer, offset, bytemuck::cast_slice(instances));

        let Some(mesh) = self.meshes.get(mesh) else { return };
        let Some(texture_bg) = self.textures.bind_group(texture) else { return };
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Mesh Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.scene_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &self.depth_texture.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.mesh_pipeline);
        pass.set_bind_group(0, &self.camera_bind_group, &[]);
        pass.set_bind_group(1, texture_bg, &[]);
        pass.set_bind_group(2, &self.lights_bind_group, &[]);
        pass.set_bind_group(3, &self.shadow_sample_bind_group, &[]);
        pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
        pass.set_vertex_buffer(1, self.instance_buffer.slice(offset..));
        pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..mesh.num_indices, 0, 0..instances.len() as u32);
    }

    /// Draw the frame's particles: depth-tested against the scene but never
    /// writing depth, one draw per emitter in the prepared back-to-front
    /// order, blend state per emitter.
    pub fn draw_particles(&self, encoder: &mut wgpu::CommandEncoder, data: &ParticleDrawData) {
        if data.batches.is_empty() {
            return;
        }
        let max_vertices = MAX_PARTICLE_QUADS as usize * 4;
        if data.vertices.len() > max_vertices {
            log::warn!(
                "particle buffer overflow ({} quads), dropping frame's particles",
                data.vertices.len() / 4
            );
            return;
        }
        self.queue.write_buffer(
            &self.particle_vertex_buffer,
            0,
            bytemuck::cast_slice(&data.vertices),
        );
        self.queue.write_buffer(
            &self.particle_index_buffer,
            0,
            bytemuck::cast_slice(&data.indices),
        );

        let mut pass = self.begin_main_pass(encoder, "Particle Pass");
        pass.set_bind_group(0, &self.camera_bind_group, &[]);
        pass.set_vertex_buffer(0, self.particle_vertex_buffer.slice(..));
        pass.set_index_buffer(self.particle_index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        for batch in &data.batches {
            let Some(texture_bg) = self.textures.bind_group(batch.texture) else {
                continue;
            };
            let pipeline = match batch.blend {
                ParticleBlend::Additive => &self.particle_additive_pipeline,
                ParticleBlend::Alpha => &self.particle_alpha_pipeline,
            };
            pass.set_pipeline(pipeline);
            pass.set_bind_group(1, texture_bg, &[]);
            pass.draw_indexed(batch.indices.clone(), 0, 0..1);
        }
    }

    // ── Pass 3: depth of field ──────────────────────────────────────────

    /// Full-screen defocus of the main target into the DoF target.
    pub fn run_dof_pass(&self, encoder: &mut wgpu::CommandEncoder) {
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("DoF Bind Group"),
            layout: &self.dof_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&self.scene_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.post_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&self.depth_texture.view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: self.dof_buffer.as_entire_binding(),
                },
            ],
        });
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("DoF Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.dof_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.dof_pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
    }

    // ── Pass 4: bloom ───────────────────────────────────────────────────

    fn bloom_step(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        label: &'static str,
        pipeline: &wgpu::RenderPipeline,
        input: &wgpu::TextureView,
        params: &wgpu::Buffer,
        target: &wgpu::TextureView,
        load: wgpu::LoadOp<wgpu::Color>,
    ) {
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.bloom_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(input),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.post_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params.as_entire_binding(),
                },
            ],
        });
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
    }

    /// Run the whole bloom chain against the DoF output: bright extract
    /// into mip 0, downsample to the smallest mip, blur each level
    /// (horizontal then vertical), then additively upsample back into
    /// mip 0, which the composite reads.
    pub fn run_bloom_passes(&self, encoder: &mut wgpu::CommandEncoder) {
        let clear = wgpu::LoadOp::Clear(wgpu::Color::BLACK);

        // Bright extraction: DoF output -> mip 0.
        self.bloom_step(
            encoder,
            "Bloom Bright",
            &self.bright_pipeline,
            &self.dof_view,
            &self.bright_params,
            &self.bloom_mips[0].a_view,
            clear,
        );

        // Downsample through the chain.
        for i in 1..self.bloom_mips.len() {
            self.bloom_step(
                encoder,
                "Bloom Downsample",
                &self.downsample_pipeline,
                &self.bloom_mips[i - 1].a_view,
                &self.downsample_params,
                &self.bloom_mips[i].a_view,
                clear,
            );
        }

        // Separable blur at every level (a -> b -> a).
        for mip in &self.bloom_mips {
            self.bloom_step(
                encoder,
                "Bloom Blur H",
                &self.blur_pipeline,
                &mip.a_view,
                &self.blur_h_params,
                &mip.b_view,
                clear,
            );
            self.bloom_step(
                encoder,
                "Bloom Blur V",
                &self.blur_pipeline,
                &mip.b_view,
                &self.blur_v_params,
                &mip.a_view,
                clear,
            );
        }

        // Additive upsample from the smallest mip back to the largest.
        for i in (0..self.bloom_mips.len() - 1).rev() {
            self.bloom_step(
                encoder,
                "Bloom Upsample",
                &self.upsample_pipeline,
                &self.bloom_mips[i + 1].a_view,
                &self.upsample_params,
                &self.bloom_mips[i].a_view,
                wgpu::LoadOp::Load,
            );
        }
    }

    // ── Pass 5: composite ───────────────────────────────────────────────

    /// Composite to the swapchain: UI sprites, then the defocused scene
    /// blended over them (uncovered scene pixels keep alpha zero), then
    /// the final bloom mip added on top.
    pub fn composite_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        output_view: &wgpu::TextureView,
        sprites: &[SpriteBatch],
    ) {
        // Concatenate sprite batches into the shared buffers.
        let mut vertices: Vec<SpriteVertex> = Vec::new();
        let mut indices: Vec<u32> = Vec::new();
        let mut ranges = Vec::new();
        for batch in sprites {
            let base = vertices.len() as u32;
            let start = indices.len() as u32;
            vertices.extend_from_slice(&batch.vertices);
            indices.extend(batch.indices.iter().map(|i| base + i));
            ranges.push((start..indices.len() as u32, batch.texture));
        }
        let max_vertices = MAX_SPRITE_QUADS as usize * 4;
        if vertices.len() > max_vertices {
            log::warn!("sprite buffer overflow, dropping frame's sprites");
            vertices.clear();
            indices.clear();
            ranges.clear();
        }
        if !vertices.is_empty() {
            self.queue
                .write_buffer(&self.sprite_vertex_buffer, 0, bytemuck::cast_slice(&vertices));
            self.queue
                .write_buffer(&self.sprite_index_buffer, 0, bytemuck::cast_slice(&indices));
        }

        let scene_bind = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Composite Scene Bind"),
            layout: &self.post_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&self.dof_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.post_sampler),
                },
            ],
        });
        let bloom_bind = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Composite Bloom Bind"),
            layout: &self.post_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&self.bloom_mips[0].a_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.post_sampler),
                },
            ],
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Composite Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: output_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        // UI sprites first; the scene is blended over them.
        if !ranges.is_empty() {
            pass.set_pipeline(&self.sprite_pipeline);
            pass.set_vertex_buffer(0, self.sprite_vertex_buffer.slice(..));
            pass.set_index_buffer(self.sprite_index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            for (range, texture) in &ranges {
                if let Some(texture_bg) = self.textures.bind_group(*texture) {
                    pass.set_bind_group(0, texture_bg, &[]);
                    pass.draw_indexed(range.clone(), 0, 0..1);
                }
            }
        }

        pass.set_pipeline(&self.scene_blit_pipeline);
        pass.set_bind_group(0, &scene_bind, &[]);
        pass.draw(0..3, 0..1);

        pass.set_pipeline(&self.bloom_add_pipeline);
        pass.set_bind_group(0, &bloom_bind, &[]);
        pass.draw(0..3, 0..1);
    }
}

fn create_color_target(
    device: &wgpu::Device,
    config: &wgpu::SurfaceConfiguration,
    label: &str,
) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: config.width.max(1),
            height: config.height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: config.format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

fn create_bloom_chain(device: &wgpu::Device, config: &wgpu::SurfaceConfiguration) -> Vec<BloomMip> {
    bloom_mip_dimensions(config.width, config.height, BLOOM_LEVELS)
        .into_iter()
        .map(|(width, height)| {
            let mut make = |suffix: &str| {
                let texture = device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(&format!("Bloom {width}x{height} {suffix}")),
                    size: wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: config.format,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                        | wgpu::TextureUsages::TEXTURE_BINDING,
                    view_formats: &[],
                });
                texture.create_view(&wgpu::TextureViewDescriptor::default())
            };
            BloomMip {
                a_view: make("A"),
                b_view: make("B"),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Each successive bloom mip is exactly half the previous (floored).
    #[test]
    fn bloom_mip_chain_halves_each_level() {
        let dims = bloom_mip_dimensions(1280, 720, BLOOM_LEVELS);
        assert_eq!(
            dims,
            vec![(640, 360), (320, 180), (160, 90), (80, 45), (40, 22), (20, 11)]
        );
        for pair in dims.windows(2) {
            assert_eq!(pair[1].0, (pair[0].0 / 2).max(1));
            assert_eq!(pair[1].1, (pair[0].1 / 2).max(1));
        }
    }

    #[test]
    fn bloom_mips_never_collapse_to_zero() {
        let dims = bloom_mip_dimensions(20, 8, 6);
        assert_eq!(dims.last(), Some(&(1, 1)));
        assert!(dims.iter().all(|&(w, h)| w >= 1 && h >= 1));
    }
}
