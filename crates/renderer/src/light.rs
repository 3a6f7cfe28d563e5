//! GPU-facing light data built from the light actor registry.
//!
//! Light actors live in an ordinary [`ActorList`]; every frame
//! [`LightBuffer::update`] rebuilds a fixed-capacity snapshot of the
//! lights that matter (ambient + 1 directional + the nearest
//! [`MAX_POINT_LIGHTS`] point and [`MAX_SPOT_LIGHTS`] spot lights to the
//! camera focus) and records each light's slot back onto its actor. Shaded
//! objects then pick their own nearby subset of those slots with
//! [`select_light_indices`].

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use engine_core::{ActorArena, ActorKey, ActorList, LightKind};

/// Point light slots in the bound uniform.
pub const MAX_POINT_LIGHTS: usize = 8;
/// Spot light slots in the bound uniform.
pub const MAX_SPOT_LIGHTS: usize = 4;
/// Point light slots one shaded object may reference.
pub const MAX_OBJECT_POINT_LIGHTS: usize = 8;
/// Spot light slots one shaded object may reference.
pub const MAX_OBJECT_SPOT_LIGHTS: usize = 4;

/// Slot value meaning "no light".
pub const NO_LIGHT: u32 = u32::MAX;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, Default)]
pub struct GpuPointLight {
    /// xyz = world position.
    pub position: [f32; 4],
    /// rgb = color/intensity.
    pub color: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, Default)]
pub struct GpuSpotLight {
    /// xyz = world position, w = cos(cone half-angle).
    pub position: [f32; 4],
    /// rgb = color, w = cos(falloff angle).
    pub color: [f32; 4],
    /// xyz = normalized direction.
    pub direction: [f32; 4],
}

/// Light uniform bound to every lit draw (must match the WGSL `Lights`
/// struct layout).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightsUniform {
    pub ambient: [f32; 4],
    /// xyz = direction toward the scene.
    pub directional_dir: [f32; 4],
    pub directional_color: [f32; 4],
    pub point: [GpuPointLight; MAX_POINT_LIGHTS],
    pub spot: [GpuSpotLight; MAX_SPOT_LIGHTS],
    /// x = live point count, y = live spot count.
    pub counts: [u32; 4],
}

impl Default for LightsUniform {
    fn default() -> Self {
        Self {
            ambient: [0.0; 4],
            directional_dir: [0.0, -1.0, 0.0, 0.0],
            directional_color: [0.0; 4],
            point: [GpuPointLight::default(); MAX_POINT_LIGHTS],
            spot: [GpuSpotLight::default(); MAX_SPOT_LIGHTS],
            counts: [0; 4],
        }
    }
}

/// The per-object selection of bound light slots.
#[derive(Debug, Clone, Copy)]
pub struct LightSelection {
    pub point: [u32; MAX_OBJECT_POINT_LIGHTS],
    pub spot: [u32; MAX_OBJECT_SPOT_LIGHTS],
}

impl Default for LightSelection {
    fn default() -> Self {
        Self {
            point: [NO_LIGHT; MAX_OBJECT_POINT_LIGHTS],
            spot: [NO_LIGHT; MAX_OBJECT_SPOT_LIGHTS],
        }
    }
}

/// CPU side of the light uniform. The renderer uploads [`Self::uniform`]
/// once per frame.
#[derive(Debug, Default)]
pub struct LightBuffer {
    uniform: LightsUniform,
}

impl LightBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uniform(&self) -> &LightsUniform {
        &self.uniform
    }

    /// Rebuild the snapshot from the current light actors. The nearest
    /// point/spot lights to `focus` win the limited slots; each bound
    /// light's slot is written back to its actor (`buffer_index`), and
    /// unbound lights are cleared.
    pub fn update(
        &mut self,
        arena: &mut ActorArena,
        lights: &ActorList,
        ambient: Vec3,
        focus: Vec3,
    ) {
        self.uniform = LightsUniform {
            ambient: [ambient.x, ambient.y, ambient.z, 1.0],
            ..Default::default()
        };

        let mut directional: Option<ActorKey> = None;
        let mut points: Vec<(f32, ActorKey)> = Vec::new();
        let mut spots: Vec<(f32, ActorKey)> = Vec::new();

        lights.visit_live(arena, |key, actor| {
            let Some(light) = actor.light() else { return };
            let dist = (actor.transform.position - focus).length_squared();
            match light.kind {
                LightKind::Directional { .. } => {
                    if directional.is_none() {
                        directional = Some(key);
                    }
                }
                LightKind::Point => points.push((dist, key)),
                LightKind::Spot { .. } => spots.push((dist, key)),
            }
        });

        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        spots.sort_by(|a, b| a.0.total_cmp(&b.0));

        // Everything loses its slot first; winners get theirs below.
        for key in lights.iter() {
            if let Some(light) = arena.get_mut(key).and_then(|a| a.light_mut()) {
                light.buffer_index = None;
            }
        }

        if let Some(light) = directional
            .and_then(|key| arena.get(key))
            .and_then(|actor| actor.light().copied())
        {
            if let LightKind::Directional { direction } = light.kind {
                self.uniform.directional_dir = [direction.x, direction.y, direction.z, 0.0];
                self.uniform.directional_color =
                    [light.color.x, light.color.y, light.color.z, 1.0];
            }
        }

        for (slot, &(_, key)) in points.iter().take(MAX_POINT_LIGHTS).enumerate() {
            let Some(actor) = arena.get_mut(key) else { continue };
            let p = actor.transform.position;
            let color = actor.light().map(|l| l.color).unwrap_or(Vec3::ZERO);
            self.uniform.point[slot] = GpuPointLight {
                position: [p.x, p.y, p.z, 1.0],
                color: [color.x, color.y, color.z, 1.0],
            };
            if let Some(light) = actor.light_mut() {
                light.buffer_index = Some(slot as u32);
            }
            self.uniform.counts[0] = slot as u32 + 1;
        }

        for (slot, &(_, key)) in spots.iter().take(MAX_SPOT_LIGHTS).enumerate() {
            let Some(actor) = arena.get_mut(key) else { continue };
            let p = actor.transform.position;
            let Some(light) = actor.light().copied() else { continue };
            let LightKind::Spot {
                direction,
                cone_angle,
                falloff_angle,
            } = light.kind
            else {
                continue;
            };
            self.uniform.spot[slot] = GpuSpotLight {
                position: [p.x, p.y, p.z, cone_angle.cos()],
                color: [light.color.x, light.color.y, light.color.z, falloff_angle.cos()],
                direction: [direction.x, direction.y, direction.z, 0.0],
            };
            if let Some(light) = actor.light_mut() {
                light.buffer_index = Some(slot as u32);
            }
            self.uniform.counts[1] = slot as u32 + 1;
        }
    }
}

/// Pick the bound light slots shading an object at `position`: the lights
/// within `radius`, nearest first, up to the per-object caps.
pub fn select_light_indices(
    arena: &ActorArena,
    lights: &ActorList,
    position: Vec3,
    radius: f32,
) -> LightSelection {
    let mut nearby: Vec<(f32, ActorKey)> = lights
        .find_nearby(arena, position, radius)
        .into_iter()
        .filter_map(|key| {
            let actor = arena.get(key)?;
            Some(((actor.transform.position - position).length_squared(), key))
        })
        .collect();
    nearby.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut selection = LightSelection::default();
    let (mut np, mut ns) = (0usize, 0usize);
    for (_, key) in nearby {
        let Some(light) = arena.get(key).and_then(|a| a.light()) else {
            continue;
        };
        let Some(index) = light.buffer_index else { continue };
        match light.kind {
            LightKind::Point if np < MAX_OBJECT_POINT_LIGHTS => {
                selection.point[np] = index;
                np += 1;
            }
            LightKind::Spot { .. } if ns < MAX_OBJECT_SPOT_LIGHTS => {
                selection.spot[ns] = index;
                ns += 1;
            }
            _ => {}
        }
    }
    selection
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::{Actor, ActorKind, Light};

    fn point_light(arena: &mut ActorArena, lights: &mut ActorList, pos: Vec3) -> ActorKey {
        let key = arena.insert(Actor::new(
            "light",
            ActorKind::Light(Light::point(Vec3::ONE)),
            1,
            pos,
        ));
        lights.add(key);
        key
    }

    #[test]
    fn nearest_lights_win_the_slots() {
        let mut arena = ActorArena::new();
        let mut lights = ActorList::new();
        // 12 point lights at increasing distance from the focus; only the
        // nearest 8 fit the uniform.
        let keys: Vec<ActorKey> = (0..12)
            .map(|i| point_light(&mut arena, &mut lights, Vec3::new(i as f32 + 1.0, 0.0, 0.0)))
            .collect();

        let mut buffer = LightBuffer::new();
        buffer.update(&mut arena, &lights, Vec3::splat(0.1), Vec3::ZERO);

        assert_eq!(buffer.uniform().counts[0], 8);
        for &key in &keys[..8] {
            assert!(
                arena.get(key).unwrap().light().unwrap().buffer_index.is_some(),
                "near light should be bound"
            );
        }
        for &key in &keys[8..] {
            assert!(
                arena.get(key).unwrap().light().unwrap().buffer_index.is_none(),
                "far light should be unbound"
            );
        }
    }

    #[test]
    fn directional_light_fills_the_directional_slot() {
        let mut arena = ActorArena::new();
        let mut lights = ActorList::new();
        let key = arena.insert(Actor::new(
            "sun",
            ActorKind::Light(Light::directional(
                Vec3::splat(0.8),
                Vec3::new(1.0, -2.0, -1.0),
            )),
            1,
            Vec3::ZERO,
        ));
        lights.add(key);

        let mut buffer = LightBuffer::new();
        buffer.update(&mut arena, &lights, Vec3::ZERO, Vec3::ZERO);
        let u = buffer.uniform();
        assert!(u.directional_color[0] > 0.0);
        let dir = Vec3::new(
            u.directional_dir[0],
            u.directional_dir[1],
            u.directional_dir[2],
        );
        assert!((dir.length() - 1.0).abs() < 1e-5, "direction is normalized");
    }

    #[test]
    fn selection_is_nearest_first_and_capped() {
        let mut arena = ActorArena::new();
        let mut lights = ActorList::new();
        for i in 0..10 {
            point_light(&mut arena, &mut lights, Vec3::new(i as f32, 0.0, 0.0));
        }
        let mut buffer = LightBuffer::new();
        buffer.update(&mut arena, &lights, Vec3::splat(0.1), Vec3::ZERO);

        // Shade an object near the far end: its nearest bound light is
        // slot 7 (position x=7), then 6, 5, ...
        let selection = select_light_indices(&arena, &lights, Vec3::new(7.0, 0.0, 0.0), 100.0);
        assert_eq!(selection.point[0], 7);
        assert_eq!(selection.point[1], 6);
        assert!(selection.point.iter().all(|&i| i == NO_LIGHT || i < 8));
    }

    #[test]
    fn dead_lights_are_ignored() {
        let mut arena = ActorArena::new();
        let mut lights = ActorList::new();
        let key = point_light(&mut arena, &mut lights, Vec3::ZERO);
        arena.get_mut(key).unwrap().health = 0;

        let mut buffer = LightBuffer::new();
        buffer.update(&mut arena, &lights, Vec3::ZERO, Vec3::ZERO);
        assert_eq!(buffer.uniform().counts[0], 0);
    }
}
