//! Mesh and texture stores: load by path, get back an opaque id.
//!
//! Scenes load their assets during initialize and treat a load failure as
//! fatal. Ids stay valid for the lifetime of the renderer; loading the same
//! path twice returns the existing id.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use engine_core::MeshId;
use thiserror::Error;

use crate::mesh::{Mesh, MeshData};
use crate::texture::Texture;
use crate::vertex::Vertex;

/// Handle to a texture owned by the [`TextureStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// Asset loading failures.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("failed to import mesh {path:?}: {source}")]
    Gltf {
        path: PathBuf,
        source: gltf::Error,
    },
    #[error("mesh file {0:?} contains no triangle data")]
    EmptyMesh(PathBuf),
    #[error("failed to load texture {path:?}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
}

/// All GPU meshes, keyed by [`MeshId`].
#[derive(Default)]
pub struct MeshStore {
    meshes: Vec<Mesh>,
    by_path: HashMap<PathBuf, MeshId>,
}

impl MeshStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Import a glTF file as one mesh (all primitives merged). Returns the
    /// existing id if the path was already loaded.
    pub fn load(&mut self, device: &wgpu::Device, path: impl AsRef<Path>) -> Result<MeshId, AssetError> {
        let path = path.as_ref();
        if let Some(&id) = self.by_path.get(path) {
            return Ok(id);
        }

        let (document, buffers, _images) =
            gltf::import(path).map_err(|source| AssetError::Gltf {
                path: path.to_path_buf(),
                source,
            })?;

        let mut data = MeshData::new();
        for mesh in document.meshes() {
            for primitive in mesh.primitives() {
                let reader = primitive.reader(|b| Some(&buffers[b.index()]));
                let Some(positions) = reader.read_positions() else {
                    continue;
                };
                let positions: Vec<[f32; 3]> = positions.collect();
                let normals: Vec<[f32; 3]> = reader
                    .read_normals()
                    .map(|n| n.collect())
                    .unwrap_or_else(|| vec![[0.0, 1.0, 0.0]; positions.len()]);
                let uvs: Vec<[f32; 2]> = reader
                    .read_tex_coords(0)
                    .map(|t| t.into_f32().collect())
                    .unwrap_or_else(|| vec![[0.0, 0.0]; positions.len()]);

                let base = data.vertices.len() as u32;
                for i in 0..positions.len() {
                    data.vertices.push(Vertex::new(positions[i], normals[i], uvs[i]));
                }
                match reader.read_indices() {
                    Some(indices) => data.indices.extend(indices.into_u32().map(|i| base + i)),
                    None => data.indices.extend(base..base + positions.len() as u32),
                }
            }
        }

        if data.indices.is_empty() {
            return Err(AssetError::EmptyMesh(path.to_path_buf()));
        }

        log::info!(
            "loaded mesh {:?}: {} vertices, {} indices",
            path,
            data.vertices.len(),
            data.indices.len()
        );
        let id = self.insert(data.upload(device));
        self.by_path.insert(path.to_path_buf(), id);
        Ok(id)
    }

    /// Register an already-built mesh (terrain, primitives).
    pub fn insert(&mut self, mesh: Mesh) -> MeshId {
        self.meshes.push(mesh);
        MeshId(self.meshes.len() as u32 - 1)
    }

    pub fn get(&self, id: MeshId) -> Option<&Mesh> {
        self.meshes.get(id.0 as usize)
    }
}

/// All GPU textures with their bind groups, keyed by [`TextureId`].
/// Index 0 is always a 1x1 white pixel for untextured draws.
pub struct TextureStore {
    textures: Vec<(Texture, wgpu::BindGroup)>,
    by_path: HashMap<PathBuf, TextureId>,
    layout: wgpu::BindGroupLayout,
}

impl TextureStore {
    /// Create the store with the shared texture bind group layout and the
    /// default white texture at id 0.
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        layout: wgpu::BindGroupLayout,
    ) -> Self {
        let mut store = Self {
            textures: Vec::new(),
            by_path: HashMap::new(),
            layout,
        };
        let white = Texture::white_pixel(device, queue);
        store.insert(device, white);
        store
    }

    /// The default 1x1 white texture.
    pub fn white(&self) -> TextureId {
        TextureId(0)
    }

    /// Load a texture from an image file. Returns the existing id if the
    /// path was already loaded.
    pub fn load(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        path: impl AsRef<Path>,
    ) -> Result<TextureId, AssetError> {
        let path = path.as_ref();
        if let Some(&id) = self.by_path.get(path) {
            return Ok(id);
        }
        let img = image::open(path).map_err(|source| AssetError::Image {
            path: path.to_path_buf(),
            source,
        })?;
        let texture = Texture::from_image(device, queue, &img, &path.to_string_lossy());
        let id = self.insert(device, texture);
        self.by_path.insert(path.to_path_buf(), id);
        log::info!("loaded texture {:?}", path);
        Ok(id)
    }

    fn insert(&mut self, device: &wgpu::Device, texture: Texture) -> TextureId {
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Texture Bind Group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&texture.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&texture.sampler),
                },
            ],
        });
        self.textures.push((texture, bind_group));
        TextureId(self.textures.len() as u32 - 1)
    }

    pub fn bind_group(&self, id: TextureId) -> Option<&wgpu::BindGroup> {
        self.textures.get(id.0 as usize).map(|(_, bg)| bg)
    }
}
