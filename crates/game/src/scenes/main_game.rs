//! The main game scene: terrain, player, guardian statues, oni waves,
//! lights, particles, and the full render pipeline.
//!
//! Touching a shrine guardian wakes a wave of oni around it; clearing the
//! wave marks that guardian as appeased. Per frame the scene updates every
//! actor list, resolves player collision against enemies/trees/objects,
//! applies the player's melee volume, refreshes the light snapshot and the
//! per-tree nearby-light selections, then drives the five render passes.

use std::collections::HashMap;
use std::f32::consts::TAU;

use anyhow::Result;
use engine_core::{
    detect_collision_list, resolve_overlap, Actor, ActorArena, ActorKey, ActorKind, ActorList,
    AnimationClip, AnimationState, Light, MeshId, Scene, SceneBase, Shape, Vec3,
};
use glam::Vec4;
use input::KeyCode;
use rand::{rngs::StdRng, Rng, SeedableRng};
use renderer::{
    select_light_indices, Camera, EmitterParams, InstanceData, LightBuffer, LightSelection,
    ParticleBlend, ParticleEmitter, ParticleSystem, SpriteBatch, TextureId, Vertex,
};
use procgen::{Terrain, TerrainConfig};

use super::{GameOverScene, StatusScene};
use crate::context::GameContext;
use crate::player::PlayerController;

const GUARDIAN_COUNT: usize = 4;
const TREE_COUNT: usize = 1000;
const POINT_LIGHT_COUNT: usize = 50;
const WAVE_ONI_COUNT: usize = 8;
/// Radius of the per-object nearby-light query.
const LIGHT_QUERY_RADIUS: f32 = 20.0;
const ONI_CHASE_SPEED: f32 = 2.2;
const ONI_TOUCH_DAMAGE: i32 = 4;

fn sun_direction() -> Vec3 {
    Vec3::new(1.0, -2.0, -1.0).normalize()
}

const AMBIENT: Vec3 = Vec3::new(0.1, 0.05, 0.15);

struct SceneMeshes {
    terrain: MeshId,
    water: MeshId,
    tree: MeshId,
    oni: MeshId,
    guardian: MeshId,
    wall: MeshId,
    player: MeshId,
}

struct SceneTextures {
    ground: TextureId,
    water: TextureId,
    fire: TextureId,
    hud: TextureId,
}

pub struct MainGameScene {
    base: SceneBase,
    arena: ActorArena,

    enemies: ActorList,
    trees: ActorList,
    objects: ActorList,
    lights: ActorList,

    guardian_keys: Vec<ActorKey>,
    wall_key: Option<ActorKey>,
    cleared: [bool; GUARDIAN_COUNT],
    active_guardian: Option<usize>,

    player: Option<PlayerController>,
    terrain: Option<Terrain>,
    meshes: Option<SceneMeshes>,
    textures: Option<SceneTextures>,

    light_buffer: LightBuffer,
    tree_lights: HashMap<ActorKey, LightSelection>,
    particles: ParticleSystem,
    camera: Camera,
    oni_touch_cooldown: f32,

    rng: StdRng,
    bgm: Option<audio::Playback>,
    hit_sound: Option<audio::SoundId>,
}

impl MainGameScene {
    pub fn new() -> Self {
        Self {
            base: SceneBase::new("MainGameScene"),
            arena: ActorArena::new(),
            enemies: ActorList::new(),
            trees: ActorList::with_capacity(TREE_COUNT),
            objects: ActorList::new(),
            lights: ActorList::new(),
            guardian_keys: Vec::new(),
            wall_key: None,
            cleared: [false; GUARDIAN_COUNT],
            active_guardian: None,
            player: None,
            terrain: None,
            meshes: None,
            textures: None,
            light_buffer: LightBuffer::new(),
            tree_lights: HashMap::new(),
            particles: ParticleSystem::new(),
            camera: Camera::new(),
            oni_touch_cooldown: 0.0,
            rng: StdRng::seed_from_u64(0),
            bgm: None,
            hit_sound: None,
        }
    }

    fn oni_clips() -> AnimationState {
        AnimationState::new(vec![
            AnimationClip {
                name: "Wait",
                duration: 1.5,
                looping: true,
            },
            AnimationClip {
                name: "Run",
                duration: 0.8,
                looping: true,
            },
            AnimationClip {
                name: "Hit",
                duration: 0.3,
                looping: false,
            },
            AnimationClip {
                name: "Down",
                duration: 1.0,
                looping: false,
            },
        ])
    }

    fn spawn_oni(&mut self, position: Vec3, yaw: f32) -> ActorKey {
        let mesh = self.meshes.as_ref().map(|m| m.oni).unwrap_or(MeshId(0));
        let mut actor = Actor::new(
            "oni",
            ActorKind::SkeletalMesh {
                mesh,
                animation: Self::oni_clips(),
            },
            13,
            position,
        )
        .with_yaw(yaw)
        .with_collision(Shape::capsule(
            Vec3::new(0.0, 0.5, 0.0),
            Vec3::new(0.0, 1.5, 0.0),
            0.5,
        ));
        if let Some(anim) = actor.animation_mut() {
            anim.play("Wait");
        }
        let key = self.arena.insert(actor);
        self.enemies.add(key);
        key
    }

    /// A touched guardian wakes its oni wave, once per guardian, one wave
    /// at a time.
    fn wake_guardian(&mut self, index: usize) {
        if self.active_guardian.is_some() || self.cleared[index] {
            return;
        }
        let Some(center) = self
            .guardian_keys
            .get(index)
            .and_then(|&k| self.arena.get(k))
            .map(|a| a.transform.position)
        else {
            return;
        };
        log::info!("guardian {index} woken, spawning {WAVE_ONI_COUNT} oni");
        let heights: Vec<(Vec3, f32)> = (0..WAVE_ONI_COUNT)
            .map(|_| {
                let mut p = center;
                p.x += self.rng.gen_range(-15.0..15.0);
                p.z += self.rng.gen_range(-15.0..15.0);
                if let Some(terrain) = &self.terrain {
                    p = terrain.place(p);
                }
                (p, self.rng.gen_range(0.0..TAU))
            })
            .collect();
        for (p, yaw) in heights {
            self.spawn_oni(p, yaw);
        }
        self.active_guardian = Some(index);
    }

    /// Apply the player's melee volume to the oni wave.
    fn resolve_player_attack(&mut self, ctx: &mut GameContext) {
        let Some(player) = self.player.as_mut() else { return };
        let Some(attack_key) = player.attack_volume(&self.arena) else {
            return;
        };
        let mut hit = false;
        let mut on_hit = |arena: &mut ActorArena, a: ActorKey, b: ActorKey, _p: Vec3| {
            // The attack volume's health doubles as its damage.
            if let Some([attack, enemy]) = arena.get2_mut(a, b) {
                enemy.health -= attack.health;
                if enemy.health <= 0 {
                    // Keep the corpse alive until the Down clip finishes,
                    // but stop it colliding immediately.
                    enemy.clear_collision();
                    enemy.health = 1;
                    enemy.velocity = Vec3::ZERO;
                    if let Some(anim) = enemy.animation_mut() {
                        anim.play("Down");
                    }
                } else if let Some(anim) = enemy.animation_mut() {
                    anim.play("Hit");
                }
            }
            hit = true;
        };
        detect_collision_list(&mut self.arena, attack_key, &self.enemies, &mut on_hit);
        if hit {
            player.consume_attack(&mut self.arena);
            if let Some(sound) = self.hit_sound {
                let _ = ctx.audio.play(sound);
            }
        }
    }

    /// Simple pursuit: live oni run at the player; finished one-shot clips
    /// fall back to Run; finished Down clips mark the oni for removal.
    fn update_enemies(&mut self, player_pos: Vec3) {
        let keys: Vec<ActorKey> = self.enemies.iter().collect();
        for key in keys {
            let Some(enemy) = self.arena.get_mut(key) else { continue };
            if enemy.is_dead() {
                continue;
            }
            let (clip, finished) = match enemy.animation_mut() {
                Some(anim) => (anim.current(), anim.is_finished()),
                None => continue,
            };
            match clip {
                Some("Down") => {
                    if finished {
                        enemy.health = 0;
                    }
                    continue;
                }
                Some("Hit") => {
                    if finished {
                        if let Some(anim) = enemy.animation_mut() {
                            anim.play("Run");
                        }
                    }
                    enemy.velocity = Vec3::ZERO;
                    continue;
                }
                _ => {}
            }

            let to_player = player_pos - enemy.transform.position;
            let flat = Vec3::new(to_player.x, 0.0, to_player.z);
            let dist = flat.length();
            if (1.5..40.0).contains(&dist) {
                if clip == Some("Wait") {
                    if let Some(anim) = enemy.animation_mut() {
                        anim.play("Run");
                    }
                }
                enemy.velocity = flat / dist * ONI_CHASE_SPEED;
                enemy.transform.rotation = glam::Quat::from_rotation_y(flat.x.atan2(flat.z));
            } else {
                enemy.velocity = Vec3::ZERO;
            }
        }

        // Keep the wave glued to the terrain.
        if let Some(terrain) = &self.terrain {
            for key in self.enemies.iter().collect::<Vec<_>>() {
                if let Some(enemy) = self.arena.get_mut(key) {
                    if !enemy.is_dead() {
                        let p = enemy.transform.position;
                        enemy.transform.position.y = terrain.height(p.x, p.z);
                        enemy.refresh_world_shape();
                    }
                }
            }
        }
    }

    /// Rebuild the per-tree nearest-light selections from this frame's
    /// bound light slots.
    fn refresh_tree_lights(&mut self) {
        self.tree_lights.clear();
        let arena = &self.arena;
        let lights = &self.lights;
        let tree_lights = &mut self.tree_lights;
        self.trees.visit_live(arena, |key, actor| {
            tree_lights.insert(
                key,
                select_light_indices(arena, lights, actor.transform.position, LIGHT_QUERY_RADIUS),
            );
        });
    }

    fn instances_for(&self, list: &ActorList, tint: impl Fn(&Actor) -> [f32; 4]) -> Vec<InstanceData> {
        let mut out = Vec::with_capacity(list.len());
        list.visit_live(&self.arena, |key, actor| {
            let model = actor.transform.to_matrix().to_cols_array_2d();
            let color = tint(actor);
            match self.tree_lights.get(&key) {
                Some(&selection) => out.push(InstanceData::with_lights(model, color, selection)),
                None => out.push(InstanceData::new(model, color)),
            }
        });
        out
    }
}

impl Default for MainGameScene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene<GameContext> for MainGameScene {
    fn base(&self) -> &SceneBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut SceneBase {
        &mut self.base
    }

    fn initialize(&mut self, ctx: &mut GameContext) -> Result<()> {
        // Assets. Any missing file is fatal to the scene, and therefore to
        // the game.
        let textures = SceneTextures {
            ground: ctx.renderer.load_texture("assets/textures/ground.png")?,
            water: ctx.renderer.load_texture("assets/textures/water.png")?,
            fire: ctx.renderer.load_texture("assets/textures/fire.png")?,
            hud: ctx.renderer.load_texture("assets/textures/hud.png")?,
        };
        let tree = ctx.renderer.load_mesh("assets/models/red_pine_tree.gltf")?;
        let oni = ctx.renderer.load_mesh("assets/models/oni_small.gltf")?;
        let guardian = ctx.renderer.load_mesh("assets/models/guardian_statue.gltf")?;
        let wall = ctx.renderer.load_mesh("assets/models/wall_stone.gltf")?;
        let player_mesh = ctx.renderer.load_mesh("assets/models/bikuni.gltf")?;

        // Terrain + water meshes.
        let terrain = Terrain::generate(TerrainConfig {
            seed: 0,
            ..Default::default()
        });
        let to_vertex = |v: &procgen::TerrainVertex| Vertex::new(v.position, v.normal, v.uv);
        let terrain_mesh = ctx.renderer.add_mesh(&renderer::MeshData {
            vertices: terrain.vertices.iter().map(to_vertex).collect(),
            indices: terrain.indices.clone(),
        });
        let water_mesh = ctx.renderer.add_mesh(&renderer::MeshData {
            vertices: terrain.water_vertices.iter().map(to_vertex).collect(),
            indices: terrain.water_indices.clone(),
        });

        // Player on the terrain.
        let start = terrain.place(Vec3::new(100.0, 0.0, 100.0));
        self.player = Some(PlayerController::spawn(&mut self.arena, player_mesh, start));
        self.camera.target = start;
        self.camera.position = start + Vec3::new(0.0, 50.0, 50.0);
        let (w, h) = ctx.renderer.dimensions();
        self.camera.set_aspect(w, h);

        // Lights: one sun, a field of warm point lights, and two spots
        // above the first guardians.
        let sun = self.arena.insert(Actor::new(
            "DirectionalLight",
            ActorKind::Light(Light::directional(Vec3::splat(0.8), sun_direction())),
            1,
            Vec3::ZERO,
        ));
        self.lights.add(sun);
        for _ in 0..POINT_LIGHT_COUNT {
            let mut p = Vec3::new(
                self.rng.gen_range(80.0..120.0),
                0.0,
                self.rng.gen_range(80.0..120.0),
            );
            p = terrain.place(p) + Vec3::Y;
            let key = self.arena.insert(Actor::new(
                "PointLight",
                ActorKind::Light(Light::point(Vec3::new(1.0, 0.8, 0.5))),
                1,
                p,
            ));
            self.lights.add(key);
        }

        // Guardian statues.
        for i in 0..GUARDIAN_COUNT {
            let mut p = Vec3::new(
                self.rng.gen_range(50.0..150.0),
                0.0,
                self.rng.gen_range(50.0..100.0),
            );
            p = terrain.place(p);
            let key = self.arena.insert(
                Actor::new(
                    format!("guardian{i}"),
                    ActorKind::StaticMesh { mesh: guardian },
                    100,
                    p,
                )
                .with_yaw(self.rng.gen_range(0.0..TAU))
                .with_scale(3.0)
                .with_collision(Shape::sphere(Vec3::new(0.0, 1.0, 0.0), 1.2)),
            );
            self.guardian_keys.push(key);
            self.objects.add(key);

            // Ward fire at every statue.
            self.particles.add(ParticleEmitter::new(
                EmitterParams {
                    emissions_per_second: 18.0,
                    duration: 2.0,
                    looping: true,
                    angle: 12f32.to_radians(),
                    radius: 0.5,
                    gravity: -2.0,
                    lifetime: 1.2,
                    speed: (0.8, 1.6),
                    size: (0.4, 0.8),
                    color: Vec4::new(1.0, 0.6, 0.25, 0.9),
                    tiles: (2, 2),
                    blend: ParticleBlend::Additive,
                    texture: textures.fire,
                    ..Default::default()
                },
                p + Vec3::new(0.0, 1.5, 0.0),
            ));
            if i < 2 {
                let spot = self.arena.insert(Actor::new(
                    "SpotLight",
                    ActorKind::Light(Light::spot(
                        Vec3::new(0.4, 0.7, 1.0),
                        Vec3::NEG_Y,
                        30f32.to_radians(),
                        20f32.to_radians(),
                    )),
                    1,
                    p + Vec3::new(0.0, 6.0, 0.0),
                ));
                self.lights.add(spot);
            }
        }

        // Stone wall near the start, blocking with an oriented box.
        {
            let p = terrain.place(start + Vec3::new(10.0, 0.0, 10.0));
            let key = self.arena.insert(
                Actor::new("StoneWall", ActorKind::StaticMesh { mesh: wall }, 100, p)
                    .with_collision(Shape::obb(
                        Vec3::new(0.0, 1.0, 0.0),
                        [Vec3::X, Vec3::Y, Vec3::NEG_Z],
                        Vec3::new(2.0, 2.0, 0.5),
                    )),
            );
            self.wall_key = Some(key);
            self.objects.add(key);
        }

        // A forest of collidable trees.
        for _ in 0..TREE_COUNT {
            let mut p = Vec3::new(
                self.rng.gen_range(50.0..150.0),
                0.0,
                self.rng.gen_range(50.0..150.0),
            );
            p = terrain.place(p);
            let key = self.arena.insert(
                Actor::new("tree", ActorKind::StaticMesh { mesh: tree }, 13, p)
                    .with_yaw(self.rng.gen_range(0.0..TAU))
                    .with_collision(Shape::capsule(
                        Vec3::new(0.0, 0.5, 0.0),
                        Vec3::new(0.0, 2.0, 0.0),
                        0.4,
                    )),
            );
            self.trees.add(key);
        }

        // Drifting mist over the water.
        self.particles.add(ParticleEmitter::new(
            EmitterParams {
                emissions_per_second: 6.0,
                duration: 4.0,
                looping: true,
                angle: 60f32.to_radians(),
                radius: 8.0,
                gravity: 0.0,
                lifetime: 3.5,
                speed: (0.1, 0.4),
                size: (2.0, 4.0),
                color: Vec4::new(0.8, 0.85, 0.9, 0.25),
                tiles: (1, 1),
                blend: ParticleBlend::Alpha,
                texture: textures.water,
                ..Default::default()
            },
            terrain.place(Vec3::new(90.0, 0.0, 90.0)) + Vec3::Y,
        ));

        self.bgm = match ctx.audio.prepare("assets/audio/field_bgm.ogg") {
            Ok(sound) => ctx.audio.play_looping(sound).ok(),
            Err(e) => {
                log::warn!("field bgm unavailable: {e}");
                None
            }
        };
        self.hit_sound = ctx.audio.prepare("assets/audio/hit.ogg").ok();

        self.meshes = Some(SceneMeshes {
            terrain: terrain_mesh,
            water: water_mesh,
            tree,
            oni,
            guardian,
            wall,
            player: player_mesh,
        });
        self.textures = Some(textures);
        self.terrain = Some(terrain);

        // Seed the light snapshot so the first frame is lit.
        self.light_buffer
            .update(&mut self.arena, &self.lights, AMBIENT, self.camera.target);
        self.refresh_tree_lights();
        Ok(())
    }

    fn process_input(&mut self, ctx: &mut GameContext) {
        if let Some(player) = self.player.as_mut() {
            player.process_input(&mut self.arena, &ctx.input);
        }
        if ctx.input.is_key_pressed(KeyCode::Tab) {
            ctx.push_scene(Box::new(StatusScene::new()));
        }
    }

    fn update(&mut self, ctx: &mut GameContext, dt: f32) {
        let Some(player_key) = self.player.as_ref().map(|p| p.actor) else {
            return;
        };
        self.oni_touch_cooldown = (self.oni_touch_cooldown - dt).max(0.0);

        // Simulation step for every collection, then the player's
        // post-integration fixes (gravity, terrain clamp, attack volume).
        if let Some(actor) = self.arena.get_mut(player_key) {
            actor.update(dt);
        }
        self.enemies.update(&mut self.arena, dt);
        self.trees.update(&mut self.arena, dt);
        self.objects.update(&mut self.arena, dt);
        self.lights.update(&mut self.arena, dt);
        if let (Some(player), Some(terrain)) = (self.player.as_mut(), self.terrain.as_ref()) {
            player.update(&mut self.arena, terrain, dt);
        }

        // Broad-phase collision: the player against enemies, trees, and
        // solid objects, resolved by pushing the player out.
        let mut oni_contacts: Vec<ActorKey> = Vec::new();
        let mut resolve_enemy =
            |arena: &mut ActorArena, a: ActorKey, b: ActorKey, p: Vec3| {
                resolve_overlap(arena, a, b, p, dt);
                oni_contacts.push(b);
            };
        detect_collision_list(&mut self.arena, player_key, &self.enemies, &mut resolve_enemy);

        let mut resolve = |arena: &mut ActorArena, a: ActorKey, b: ActorKey, p: Vec3| {
            resolve_overlap(arena, a, b, p, dt);
        };
        detect_collision_list(&mut self.arena, player_key, &self.trees, &mut resolve);

        let mut touched: Vec<ActorKey> = Vec::new();
        let mut resolve_object =
            |arena: &mut ActorArena, a: ActorKey, b: ActorKey, p: Vec3| {
                resolve_overlap(arena, a, b, p, dt);
                touched.push(b);
            };
        detect_collision_list(&mut self.arena, player_key, &self.objects, &mut resolve_object);

        // Touching a live oni costs health, with a grace period.
        if !oni_contacts.is_empty() && self.oni_touch_cooldown <= 0.0 {
            self.oni_touch_cooldown = 1.0;
            if let Some(player) = self.arena.get_mut(player_key) {
                player.health -= ONI_TOUCH_DAMAGE;
                log::debug!("player hit, health now {}", player.health);
            }
        }

        // Guardians touched this frame wake their wave.
        let indices: Vec<usize> = touched
            .iter()
            .filter_map(|key| self.guardian_keys.iter().position(|g| g == key))
            .collect();
        for index in indices {
            self.wake_guardian(index);
        }

        self.resolve_player_attack(ctx);

        let player_pos = self
            .player
            .as_ref()
            .map(|p| p.position(&self.arena))
            .unwrap_or(Vec3::ZERO);
        self.update_enemies(player_pos);

        // A cleared wave appeases its guardian.
        if let Some(active) = self.active_guardian {
            if self.enemies.live_count(&self.arena) == 0 {
                log::info!("guardian {active} appeased");
                self.cleared[active] = true;
                self.active_guardian = None;
            }
        }

        // Camera follows the player; lens parameters follow the camera.
        self.camera.target = player_pos + Vec3::Y;
        self.camera.position = self.camera.target + Vec3::new(0.0, 50.0, 50.0);
        let (w, h) = ctx.renderer.dimensions();
        self.camera.set_aspect(w, h);
        self.camera.update();

        // Light snapshot and per-tree selections for this frame.
        self.light_buffer
            .update(&mut self.arena, &self.lights, AMBIENT, self.camera.target);
        self.refresh_tree_lights();

        // Draw data runs strictly after all updates and collision fixes.
        if let Some(actor) = self.arena.get_mut(player_key) {
            actor.update_draw_data(dt);
        }
        self.enemies.update_draw_data(&mut self.arena, dt);
        self.trees.update_draw_data(&mut self.arena, dt);
        self.objects.update_draw_data(&mut self.arena, dt);
        self.lights.update_draw_data(&mut self.arena, dt);

        self.particles.update(dt);

        // Player death ends the scene.
        if self.player.as_ref().is_some_and(|p| p.is_dead(&self.arena)) {
            ctx.replace_scene(Box::new(GameOverScene::new()));
            return;
        }

        // Cleanup: dead actors leave the arena, lists shed stale keys.
        self.arena.sweep_dead();
        self.enemies.sweep(&self.arena);
        self.trees.sweep(&self.arena);
        self.objects.sweep(&self.arena);
        self.lights.sweep(&self.arena);
    }

    fn render(&mut self, ctx: &mut GameContext) -> Result<()> {
        let (Some(meshes), Some(textures)) = (self.meshes.as_ref(), self.textures.as_ref())
        else {
            return Ok(());
        };

        let (output, mut encoder) = ctx.renderer.begin_frame()?;
        let output_view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        ctx.renderer
            .update_camera(&self.camera, ctx.time.elapsed_seconds());
        ctx.renderer.update_lights(self.light_buffer.uniform());
        ctx.renderer.update_shadow(sun_direction(), self.camera.target);
        ctx.renderer.update_dof(&self.camera);

        // Instance batches, one per mesh kind.
        let tree_instances = self.instances_for(&self.trees, |_| [1.0; 4]);
        let enemy_instances = self.instances_for(&self.enemies, |actor| {
            let downed = matches!(&actor.kind,
                ActorKind::SkeletalMesh { animation, .. } if animation.current() == Some("Down"));
            if downed {
                [0.45, 0.4, 0.4, 1.0]
            } else {
                [1.0; 4]
            }
        });
        let mut guardian_instances = Vec::new();
        let mut wall_instances = Vec::new();
        let mut player_instances = Vec::new();
        self.objects.visit_live(&self.arena, |key, actor| {
            let instance =
                InstanceData::new(actor.transform.to_matrix().to_cols_array_2d(), [1.0; 4]);
            if Some(key) == self.wall_key {
                wall_instances.push(instance);
            } else {
                guardian_instances.push(instance);
            }
        });
        if let Some(player) = self.player.as_ref() {
            if let Some(actor) = self.arena.get(player.actor) {
                if !actor.is_dead() {
                    player_instances.push(InstanceData::new(
                        actor.transform.to_matrix().to_cols_array_2d(),
                        [1.0; 4],
                    ));
                }
            }
        }

        // Pass 1: shadow map.
        ctx.renderer.with_shadow_pass(&mut encoder, |r, pass| {
            r.draw_terrain_shadow(pass, meshes.terrain);
            let mut offset = 0u32;
            for (mesh, instances) in [
                (meshes.tree, &tree_instances),
                (meshes.oni, &enemy_instances),
                (meshes.guardian, &guardian_instances),
                (meshes.wall, &wall_instances),
                (meshes.player, &player_instances),
            ] {
                r.draw_mesh_shadow(pass, mesh, instances, offset);
                offset += instances.len() as u32;
            }
        });

        // Pass 2: main color.
        ctx.renderer
            .clear_main_target(&mut encoder, [0.25, 0.45, 0.65]);
        ctx.renderer
            .draw_terrain(&mut encoder, meshes.terrain, textures.ground);
        ctx.renderer
            .draw_water(&mut encoder, meshes.water, textures.water);
        ctx.renderer
            .draw_mesh_instanced(&mut encoder, meshes.tree, ctx.renderer.white_texture(), &tree_instances);
        ctx.renderer
            .draw_mesh_instanced(&mut encoder, meshes.oni, ctx.renderer.white_texture(), &enemy_instances);
        ctx.renderer.draw_mesh_instanced(
            &mut encoder,
            meshes.guardian,
            ctx.renderer.white_texture(),
            &guardian_instances,
        );
        ctx.renderer.draw_mesh_instanced(
            &mut encoder,
            meshes.wall,
            ctx.renderer.white_texture(),
            &wall_instances,
        );
        ctx.renderer.draw_mesh_instanced(
            &mut encoder,
            meshes.player,
            ctx.renderer.white_texture(),
            &player_instances,
        );
        let particle_data = self.particles.build_draw_data(&self.camera.view_matrix());
        ctx.renderer.draw_particles(&mut encoder, &particle_data);

        // Passes 3-5: defocus, bloom, composite with the HUD.
        ctx.renderer.run_dof_pass(&mut encoder);
        ctx.renderer.run_bloom_passes(&mut encoder);

        let (w, h) = ctx.screen_size();
        let mut hud = SpriteBatch::new(textures.hud);
        hud.add_quad(16.0, 16.0, 256.0, 64.0, w, h, [1.0, 1.0, 1.0, 0.9]);
        let mut markers = SpriteBatch::new(ctx.renderer.white_texture());
        for (i, &cleared) in self.cleared.iter().enumerate() {
            let color = if cleared {
                [0.3, 0.9, 0.4, 0.9]
            } else {
                [0.25, 0.25, 0.3, 0.7]
            };
            markers.add_quad(20.0 + i as f32 * 28.0, 88.0, 20.0, 20.0, w, h, color);
        }
        ctx.renderer
            .composite_pass(&mut encoder, &output_view, &[hud, markers]);

        ctx.renderer.end_frame(output, encoder);
        Ok(())
    }

    fn finalize(&mut self, ctx: &mut GameContext) {
        if let Some(bgm) = self.bgm.take() {
            ctx.audio.stop(bgm);
        }
    }
}
