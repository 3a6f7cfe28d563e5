//! Heightmap terrain generation using noise functions.
//!
//! **Seed-based determinism:** all noise derives from `config.seed`, so the
//! same seed always produces the same terrain at every (x, z).
//!
//! The terrain spans `[0, size]` on X and Z with `resolution` vertices per
//! side. Actors are placed on it through [`Terrain::height`], a bilinear
//! sample of the generated heightmap.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use noise::{NoiseFn, Perlin};

/// Derive a deterministic u32 noise seed from a world seed and an offset.
#[inline]
fn noise_seed(seed: u64, offset: u64) -> u32 {
    ((seed.wrapping_add(offset))
        .wrapping_mul(0x9e37_79b9_7f4a_7c15_u64)
        .wrapping_add(offset.wrapping_mul(0x6c07_8965_u64))
        >> 32) as u32
}

/// Vertex for the terrain and water meshes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct TerrainVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

/// Configuration for terrain generation.
#[derive(Debug, Clone)]
pub struct TerrainConfig {
    /// Side length in world units.
    pub size: f32,
    /// Vertices per side.
    pub resolution: u32,
    /// Maximum terrain height.
    pub height_scale: f32,
    /// Base noise frequency (lower = smoother).
    pub frequency: f64,
    /// Octaves of fractal noise.
    pub octaves: u32,
    /// Frequency multiplier per octave.
    pub lacunarity: f64,
    /// Amplitude multiplier per octave.
    pub persistence: f64,
    /// World seed.
    pub seed: u64,
    /// World Y of the flat water surface, if any.
    pub water_level: Option<f32>,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            size: 200.0,
            resolution: 200,
            height_scale: 20.0,
            frequency: 0.015,
            octaves: 4,
            lacunarity: 2.0,
            persistence: 0.5,
            seed: 0,
            water_level: Some(4.0),
        }
    }
}

/// Generated terrain: mesh data plus the heightmap used for placement.
#[derive(Debug)]
pub struct Terrain {
    pub vertices: Vec<TerrainVertex>,
    pub indices: Vec<u32>,
    /// Row-major `resolution * resolution` heights.
    pub heightmap: Vec<f32>,
    pub config: TerrainConfig,
    /// Flat water surface at `water_level` (empty when disabled).
    pub water_vertices: Vec<TerrainVertex>,
    pub water_indices: Vec<u32>,
}

impl Terrain {
    /// Generate terrain from configuration.
    pub fn generate(config: TerrainConfig) -> Self {
        let res = config.resolution.max(2) as usize;
        let step = config.size / (res - 1) as f32;

        let perlin = Perlin::new(noise_seed(config.seed, 0));

        let mut heightmap = Vec::with_capacity(res * res);
        for z in 0..res {
            for x in 0..res {
                let wx = x as f32 * step;
                let wz = z as f32 * step;
                heightmap.push(fractal_noise(&perlin, &config, wx as f64, wz as f64));
            }
        }

        let mut vertices = Vec::with_capacity(res * res);
        for z in 0..res {
            for x in 0..res {
                let wx = x as f32 * step;
                let wz = z as f32 * step;
                vertices.push(TerrainVertex {
                    position: [wx, heightmap[z * res + x], wz],
                    normal: [0.0, 1.0, 0.0],
                    uv: [x as f32 / (res - 1) as f32, z as f32 / (res - 1) as f32],
                });
            }
        }

        let mut indices = Vec::with_capacity((res - 1) * (res - 1) * 6);
        for z in 0..res - 1 {
            for x in 0..res - 1 {
                let i = (z * res + x) as u32;
                let r = res as u32;
                indices.extend_from_slice(&[i, i + r, i + 1, i + 1, i + r, i + r + 1]);
            }
        }

        calculate_normals(&mut vertices, &indices);

        let (water_vertices, water_indices) = match config.water_level {
            Some(level) => water_mesh(config.size, level),
            None => (Vec::new(), Vec::new()),
        };

        log::info!(
            "generated terrain: {res}x{res} vertices, seed {}, water {:?}",
            config.seed,
            config.water_level
        );

        Self {
            vertices,
            indices,
            heightmap,
            config,
            water_vertices,
            water_indices,
        }
    }

    /// Terrain height at a world (x, z), bilinearly interpolated. Positions
    /// outside the terrain clamp to the border.
    pub fn height(&self, x: f32, z: f32) -> f32 {
        let res = self.config.resolution.max(2) as usize;
        let step = self.config.size / (res - 1) as f32;

        let fx = (x / step).clamp(0.0, (res - 1) as f32);
        let fz = (z / step).clamp(0.0, (res - 1) as f32);
        let x0 = (fx as usize).min(res - 2);
        let z0 = (fz as usize).min(res - 2);
        let tx = fx - x0 as f32;
        let tz = fz - z0 as f32;

        let h = |xi: usize, zi: usize| self.heightmap[zi * res + xi];
        let top = h(x0, z0) * (1.0 - tx) + h(x0 + 1, z0) * tx;
        let bottom = h(x0, z0 + 1) * (1.0 - tx) + h(x0 + 1, z0 + 1) * tx;
        top * (1.0 - tz) + bottom * tz
    }

    /// Place a world-space position on the terrain surface.
    pub fn place(&self, position: Vec3) -> Vec3 {
        Vec3::new(position.x, self.height(position.x, position.z), position.z)
    }

    /// Does the terrain contain the given (x, z)?
    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= 0.0 && p.x <= self.config.size && p.y >= 0.0 && p.y <= self.config.size
    }
}

fn fractal_noise(perlin: &Perlin, config: &TerrainConfig, x: f64, z: f64) -> f32 {
    let mut amplitude = 1.0_f64;
    let mut frequency = config.frequency;
    let mut sum = 0.0_f64;
    let mut norm = 0.0_f64;
    for _ in 0..config.octaves {
        sum += perlin.get([x * frequency, z * frequency]) * amplitude;
        norm += amplitude;
        amplitude *= config.persistence;
        frequency *= config.lacunarity;
    }
    // Normalize to 0..1 then scale.
    let n = (sum / norm * 0.5 + 0.5).clamp(0.0, 1.0);
    (n as f32) * config.height_scale
}

/// Accumulate area-weighted face normals, then normalize per vertex.
fn calculate_normals(vertices: &mut [TerrainVertex], indices: &[u32]) {
    let mut normals = vec![Vec3::ZERO; vertices.len()];
    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        let pa = Vec3::from(vertices[a].position);
        let pb = Vec3::from(vertices[b].position);
        let pc = Vec3::from(vertices[c].position);
        let n = (pb - pa).cross(pc - pa);
        normals[a] += n;
        normals[b] += n;
        normals[c] += n;
    }
    for (v, n) in vertices.iter_mut().zip(normals) {
        v.normal = n.normalize_or_zero().into();
    }
}

/// A single flat quad at `level` covering the whole terrain, UV-tiled so
/// the water shader can scroll its surface.
fn water_mesh(size: f32, level: f32) -> (Vec<TerrainVertex>, Vec<u32>) {
    let uv_tiles = size / 10.0;
    let v = |x: f32, z: f32| TerrainVertex {
        position: [x, level, z],
        normal: [0.0, 1.0, 0.0],
        uv: [x / size * uv_tiles, z / size * uv_tiles],
    };
    (
        vec![v(0.0, 0.0), v(size, 0.0), v(size, size), v(0.0, size)],
        vec![0, 2, 1, 0, 3, 2],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(seed: u64) -> TerrainConfig {
        TerrainConfig {
            size: 64.0,
            resolution: 24,
            height_scale: 15.0,
            seed,
            water_level: None,
            ..Default::default()
        }
    }

    /// Same seed and config must produce identical heightmaps.
    #[test]
    fn terrain_deterministic_same_seed() {
        let a = Terrain::generate(small_config(98765));
        let b = Terrain::generate(small_config(98765));
        assert_eq!(a.heightmap.len(), b.heightmap.len());
        for (i, (&ha, &hb)) in a.heightmap.iter().zip(b.heightmap.iter()).enumerate() {
            assert_eq!(ha, hb, "heightmap[{i}] should match for same seed");
        }
    }

    /// Different seeds must produce different terrain.
    #[test]
    fn terrain_different_seed_different_heights() {
        let a = Terrain::generate(small_config(11111));
        let b = Terrain::generate(small_config(22222));
        assert_ne!(a.heightmap, b.heightmap);
    }

    /// The bilinear sample matches the stored height exactly at grid points.
    #[test]
    fn height_matches_vertices_at_grid_points() {
        let terrain = Terrain::generate(small_config(7));
        let res = terrain.config.resolution as usize;
        let step = terrain.config.size / (res - 1) as f32;
        for z in [0usize, 5, res - 1] {
            for x in [0usize, 11, res - 1] {
                let expected = terrain.heightmap[z * res + x];
                let sampled = terrain.height(x as f32 * step, z as f32 * step);
                assert!(
                    (expected - sampled).abs() < 1e-4,
                    "grid ({x},{z}): {expected} vs {sampled}"
                );
            }
        }
    }

    #[test]
    fn height_clamps_outside_bounds() {
        let terrain = Terrain::generate(small_config(3));
        let inside = terrain.height(0.0, 0.0);
        let outside = terrain.height(-50.0, -50.0);
        assert_eq!(inside, outside);
    }
}
