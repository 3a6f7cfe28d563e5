//! Emitter-driven particle effects.
//!
//! Emitters spawn at a fixed rate using a fractional accumulator, so the
//! emission count depends only on simulated time, not on frame-size jitter
//! (a hitch catches up instead of dropping particles). Particles integrate
//! with semi-implicit Euler under a constant per-emitter gravity and die
//! when their lifetime runs out.
//!
//! Rendering expands each particle into a view-aligned textured quad; all
//! emitters share one vertex/index stream, with per-emitter draws ordered
//! back to front in view space so alpha blending composites correctly.

use glam::{Mat4, Vec3, Vec4};
use rand::Rng;
use std::f32::consts::TAU;
use std::ops::Range;

use crate::assets::TextureId;
use crate::vertex::ParticleVertex;

/// How an emitter's particles blend over the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticleBlend {
    /// Additive: fire, sparks, glow.
    Additive,
    /// Standard alpha: smoke, dust.
    Alpha,
}

/// Spawn configuration for one emitter.
#[derive(Debug, Clone)]
pub struct EmitterParams {
    /// Particles spawned per second.
    pub emissions_per_second: f32,
    /// Emission window in seconds.
    pub duration: f32,
    /// Restart the emission window when it elapses.
    pub looping: bool,
    /// Cone half-angle (radians) around +Y that spawn velocities fan into.
    pub angle: f32,
    /// Radius of the spawn disk.
    pub radius: f32,
    /// Constant downward acceleration, m/s^2.
    pub gravity: f32,
    /// Seconds each particle lives.
    pub lifetime: f32,
    /// Initial speed range, m/s.
    pub speed: (f32, f32),
    /// Billboard edge length range, metres.
    pub size: (f32, f32),
    /// Initial billboard rotation range, radians.
    pub rotation: (f32, f32),
    pub color: Vec4,
    /// Texture atlas tile grid; each particle samples one random tile.
    pub tiles: (u32, u32),
    pub blend: ParticleBlend,
    pub texture: TextureId,
}

impl Default for EmitterParams {
    fn default() -> Self {
        Self {
            emissions_per_second: 10.0,
            duration: 1.0,
            looping: true,
            angle: 15f32.to_radians(),
            radius: 0.5,
            gravity: 0.0,
            lifetime: 1.5,
            speed: (1.0, 2.0),
            size: (0.25, 0.5),
            rotation: (0.0, TAU),
            color: Vec4::ONE,
            tiles: (1, 1),
            blend: ParticleBlend::Alpha,
            texture: TextureId(0),
        }
    }
}

/// One live particle. Owned exclusively by its emitter.
#[derive(Debug, Clone, Copy)]
pub struct Particle {
    pub position: Vec3,
    pub velocity: Vec3,
    pub acceleration: Vec3,
    /// Seconds left; `<= 0` means dead.
    pub lifetime: f32,
    pub rotation: f32,
    pub size: f32,
    pub color: Vec4,
    /// Atlas sub-rect: x, y, width, height in UV space.
    pub uv_rect: [f32; 4],
}

impl Particle {
    pub fn is_dead(&self) -> bool {
        self.lifetime <= 0.0
    }
}

/// A particle source at a world position.
#[derive(Debug, Clone)]
pub struct ParticleEmitter {
    pub params: EmitterParams,
    pub position: Vec3,
    particles: Vec<Particle>,
    timer: f32,
    emission_acc: f32,
}

impl ParticleEmitter {
    pub fn new(params: EmitterParams, position: Vec3) -> Self {
        Self {
            params,
            position,
            particles: Vec::new(),
            timer: 0.0,
            emission_acc: 0.0,
        }
    }

    pub fn live_count(&self) -> usize {
        self.particles.len()
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// A one-shot emitter is finished once its window has elapsed and its
    /// last particle has died. Looping emitters never finish on their own.
    pub fn is_finished(&self) -> bool {
        !self.params.looping && self.timer >= self.params.duration && self.particles.is_empty()
    }

    /// Advance the emission window, spawn what the accumulator owes, and
    /// integrate every particle.
    pub fn update(&mut self, dt: f32, rng: &mut impl Rng) {
        self.timer += dt;
        if self.timer >= self.params.duration {
            if self.params.looping {
                self.timer -= self.params.duration;
                self.emission_acc -= self.params.duration;
            } else {
                self.timer = self.params.duration;
            }
        }

        if self.params.emissions_per_second > 0.0 {
            let interval = 1.0 / self.params.emissions_per_second;
            while self.timer - self.emission_acc >= interval {
                self.emission_acc += interval;
                let particle = self.spawn(rng);
                self.particles.push(particle);
            }
        }

        let gravity = Vec3::new(0.0, -self.params.gravity, 0.0);
        for p in &mut self.particles {
            let accel = p.acceleration + gravity;
            p.velocity += accel * dt;
            p.position += p.velocity * dt;
            p.lifetime -= dt;
        }
        self.particles.retain(|p| !p.is_dead());
    }

    fn spawn(&self, rng: &mut impl Rng) -> Particle {
        let p = &self.params;

        // Area-uniform offset within the spawn disk: sqrt keeps density flat.
        let r = p.radius * rng.gen::<f32>().sqrt();
        let phi = rng.gen::<f32>() * TAU;
        let offset = Vec3::new(phi.cos() * r, 0.0, phi.sin() * r);

        // Launch direction within the cone around +Y.
        let pitch = p.angle * rng.gen::<f32>();
        let yaw = rng.gen::<f32>() * TAU;
        let (sp, cp) = pitch.sin_cos();
        let direction = Vec3::new(sp * yaw.cos(), cp, sp * yaw.sin());
        let speed = lerp(p.speed.0, p.speed.1, rng.gen::<f32>());

        // Random tile of the texture atlas for visual variety.
        let (nx, ny) = (p.tiles.0.max(1), p.tiles.1.max(1));
        let tx = rng.gen_range(0..nx);
        let ty = rng.gen_range(0..ny);
        let uv_rect = [
            tx as f32 / nx as f32,
            ty as f32 / ny as f32,
            1.0 / nx as f32,
            1.0 / ny as f32,
        ];

        Particle {
            position: self.position + offset,
            velocity: direction * speed,
            acceleration: Vec3::ZERO,
            lifetime: p.lifetime,
            rotation: lerp(p.rotation.0, p.rotation.1, rng.gen::<f32>()),
            size: lerp(p.size.0, p.size.1, rng.gen::<f32>()),
            color: p.color,
            uv_rect,
        }
    }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// One emitter's slice of the shared index stream.
#[derive(Debug, Clone)]
pub struct ParticleBatch {
    pub indices: Range<u32>,
    pub blend: ParticleBlend,
    pub texture: TextureId,
}

/// Everything the particle pass needs for one frame.
#[derive(Debug, Default)]
pub struct ParticleDrawData {
    pub vertices: Vec<ParticleVertex>,
    pub indices: Vec<u32>,
    pub batches: Vec<ParticleBatch>,
}

/// Owns every emitter; dead emitters are dropped each update.
pub struct ParticleSystem {
    emitters: Vec<ParticleEmitter>,
    rng: rand::rngs::StdRng,
}

impl Default for ParticleSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl ParticleSystem {
    pub fn new() -> Self {
        use rand::SeedableRng;
        Self {
            emitters: Vec::new(),
            rng: rand::rngs::StdRng::from_entropy(),
        }
    }

    pub fn add(&mut self, emitter: ParticleEmitter) {
        self.emitters.push(emitter);
    }

    pub fn emitter_count(&self) -> usize {
        self.emitters.len()
    }

    pub fn live_particles(&self) -> usize {
        self.emitters.iter().map(ParticleEmitter::live_count).sum()
    }

    pub fn clear(&mut self) {
        self.emitters.clear();
    }

    /// Advance every emitter and drop the finished ones.
    pub fn update(&mut self, dt: f32) {
        for emitter in &mut self.emitters {
            emitter.update(dt, &mut self.rng);
        }
        self.emitters.retain(|e| !e.is_finished());
    }

    /// Expand all live particles into camera-facing quads, with emitters
    /// ordered back to front in view space.
    pub fn build_draw_data(&self, view: &Mat4) -> ParticleDrawData {
        // View-space right/up in world coordinates (rotation transpose rows).
        let right = Vec3::new(view.x_axis.x, view.y_axis.x, view.z_axis.x);
        let up = Vec3::new(view.x_axis.y, view.y_axis.y, view.z_axis.y);

        // Back to front: most negative view-space z first.
        let mut order: Vec<(f32, usize)> = self
            .emitters
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let vz = view.transform_point3(e.position).z;
                (vz, i)
            })
            .collect();
        order.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut data = ParticleDrawData::default();
        for (_, i) in order {
            let emitter = &self.emitters[i];
            if emitter.particles.is_empty() {
                continue;
            }
            let start = data.indices.len() as u32;
            for p in &emitter.particles {
                push_billboard(&mut data, p, right, up);
            }
            data.batches.push(ParticleBatch {
                indices: start..data.indices.len() as u32,
                blend: emitter.params.blend,
                texture: emitter.params.texture,
            });
        }
        data
    }
}

fn push_billboard(data: &mut ParticleDrawData, p: &Particle, right: Vec3, up: Vec3) {
    let half = p.size * 0.5;
    let (s, c) = p.rotation.sin_cos();
    let r = (right * c + up * s) * half;
    let u = (up * c - right * s) * half;

    let [ux, uy, uw, uh] = p.uv_rect;
    let color = p.color.to_array();
    let base = data.vertices.len() as u32;

    let corners = [
        (p.position - r - u, [ux, uy + uh]),
        (p.position + r - u, [ux + uw, uy + uh]),
        (p.position + r + u, [ux + uw, uy]),
        (p.position - r + u, [ux, uy]),
    ];
    for (pos, uv) in corners {
        data.vertices.push(ParticleVertex {
            position: pos.to_array(),
            tex_coords: uv,
            color,
        });
    }
    data.indices
        .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> rand::rngs::StdRng {
        rand::rngs::StdRng::seed_from_u64(42)
    }

    fn burst_params(eps: f32) -> EmitterParams {
        EmitterParams {
            emissions_per_second: eps,
            duration: 10.0,
            looping: false,
            lifetime: 100.0,
            gravity: 0.0,
            ..Default::default()
        }
    }

    /// 20 emissions/second over one simulated second in 1/60 steps spawns
    /// 20 particles (within one of the boundary).
    #[test]
    fn emission_rate_is_frame_rate_independent() {
        let mut rng = rng();
        let mut emitter = ParticleEmitter::new(burst_params(20.0), Vec3::ZERO);
        for _ in 0..60 {
            emitter.update(1.0 / 60.0, &mut rng);
        }
        let count = emitter.live_count() as i32;
        assert!((count - 20).abs() <= 1, "expected ~20 spawns, got {count}");

        // The same second in a single giant step catches up to the same count.
        let mut emitter = ParticleEmitter::new(burst_params(20.0), Vec3::ZERO);
        emitter.update(1.0, &mut rng);
        let burst = emitter.live_count() as i32;
        assert!((burst - 20).abs() <= 1, "hitch should catch up: {burst}");
    }

    #[test]
    fn particle_dies_at_lifetime() {
        let mut rng = rng();
        let params = EmitterParams {
            emissions_per_second: 60.0,
            duration: 0.1,
            looping: false,
            lifetime: 2.0,
            ..Default::default()
        };
        let mut emitter = ParticleEmitter::new(params, Vec3::ZERO);
        emitter.update(0.1, &mut rng);
        assert!(emitter.live_count() > 0);

        // Alive while total elapsed < 2.0s...
        for _ in 0..18 {
            emitter.update(0.1, &mut rng);
        }
        assert!(emitter.live_count() > 0);
        // ...dead once elapsed reaches 2.0s.
        emitter.update(0.15, &mut rng);
        assert_eq!(emitter.live_count(), 0);
        assert!(emitter.is_finished());
    }

    /// Wrapping the loop window must not burst-spawn: the accumulator wraps
    /// with the timer.
    #[test]
    fn looping_emitter_wraps_without_burst() {
        let mut rng = rng();
        let params = EmitterParams {
            emissions_per_second: 20.0,
            duration: 0.5,
            looping: true,
            lifetime: 0.05,
            ..Default::default()
        };
        let mut emitter = ParticleEmitter::new(params, Vec3::ZERO);
        let mut max_alive = 0;
        for _ in 0..240 {
            emitter.update(1.0 / 60.0, &mut rng);
            max_alive = max_alive.max(emitter.live_count());
        }
        // At 20/s with 0.05s lifetime, at most ~2 particles ever coexist.
        assert!(max_alive <= 3, "wrap burst detected: {max_alive} alive");
    }

    #[test]
    fn non_looping_emitter_stops_but_survivors_age() {
        let mut rng = rng();
        let params = EmitterParams {
            emissions_per_second: 10.0,
            duration: 1.0,
            looping: false,
            lifetime: 5.0,
            ..Default::default()
        };
        let mut emitter = ParticleEmitter::new(params, Vec3::ZERO);
        for _ in 0..90 {
            emitter.update(1.0 / 60.0, &mut rng);
        }
        let after_window = emitter.live_count() as i32;
        assert!(
            (after_window - 10).abs() <= 1,
            "spawning stops at the window edge, got {after_window}"
        );
        assert!(!emitter.is_finished(), "survivors keep simulating");
    }

    #[test]
    fn spawn_stays_within_disk_radius() {
        let mut rng = rng();
        let params = EmitterParams {
            emissions_per_second: 600.0,
            duration: 1.0,
            looping: false,
            radius: 2.0,
            speed: (0.0, 0.0),
            lifetime: 100.0,
            ..Default::default()
        };
        let origin = Vec3::new(10.0, 5.0, -3.0);
        let mut emitter = ParticleEmitter::new(params, origin);
        emitter.update(0.5, &mut rng);
        for p in emitter.particles() {
            let d = p.position - origin;
            assert!(d.y.abs() < 1e-6);
            assert!(d.length() <= 2.0 + 1e-4);
        }
    }

    #[test]
    fn gravity_is_constant_not_compounding() {
        let mut rng = rng();
        let params = EmitterParams {
            emissions_per_second: 60.0,
            duration: 0.05,
            looping: false,
            gravity: 10.0,
            speed: (0.0, 0.0),
            angle: 0.0,
            lifetime: 100.0,
            ..Default::default()
        };
        let mut emitter = ParticleEmitter::new(params, Vec3::ZERO);
        emitter.update(0.05, &mut rng);
        assert!((2..=3).contains(&emitter.live_count()));
        // After ~1s of free fall the velocity is ~g*t, not quadratic.
        for _ in 0..100 {
            emitter.update(0.01, &mut rng);
        }
        let v = emitter.particles()[0].velocity.y;
        assert!((v + 10.0).abs() < 0.8, "expected ~-10 m/s after 1s, got {v}");
    }

    #[test]
    fn draw_data_sorts_emitters_back_to_front() {
        let mut system = ParticleSystem::new();
        let near = EmitterParams {
            emissions_per_second: 60.0,
            texture: TextureId(1),
            ..Default::default()
        };
        let far = EmitterParams {
            emissions_per_second: 60.0,
            texture: TextureId(2),
            ..Default::default()
        };
        // Camera at origin looking down -Z: z=-50 is far, z=-5 is near.
        system.add(ParticleEmitter::new(near, Vec3::new(0.0, 0.0, -5.0)));
        system.add(ParticleEmitter::new(far, Vec3::new(0.0, 0.0, -50.0)));
        system.update(0.1);

        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0), Vec3::Y);
        let data = system.build_draw_data(&view);
        assert_eq!(data.batches.len(), 2);
        assert_eq!(data.batches[0].texture, TextureId(2), "far emitter draws first");
        assert_eq!(data.batches[1].texture, TextureId(1));
        assert_eq!(data.vertices.len() * 6, data.indices.len() * 4);
    }
}
