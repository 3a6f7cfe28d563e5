//! Player controller: movement on the terrain, jumping, and the melee
//! attack volume.

use engine_core::{
    Actor, ActorArena, ActorKey, ActorKind, AnimationClip, AnimationState, MeshId, Shape, Vec3,
};
use input::{InputState, KeyCode};
use procgen::Terrain;

const MOVE_SPEED: f32 = 8.0;
const JUMP_SPEED: f32 = 6.5;
const GRAVITY: f32 = 14.0;
/// How long the melee volume stays live after an attack starts.
const ATTACK_ACTIVE: f32 = 0.25;
const ATTACK_COOLDOWN: f32 = 0.6;
const ATTACK_DAMAGE: i32 = 5;

/// Drives the player actor from input and keeps it on the terrain.
pub struct PlayerController {
    pub actor: ActorKey,
    on_ground: bool,
    facing: f32,
    attack_cooldown: f32,
    /// Live melee volume and its remaining active time.
    attack: Option<(ActorKey, f32)>,
}

impl PlayerController {
    /// Spawn the player actor on the terrain at `position`.
    pub fn spawn(arena: &mut ActorArena, mesh: MeshId, position: Vec3) -> Self {
        let animation = AnimationState::new(vec![
            AnimationClip {
                name: "Idle",
                duration: 1.2,
                looping: true,
            },
            AnimationClip {
                name: "Run",
                duration: 0.8,
                looping: true,
            },
            AnimationClip {
                name: "Attack",
                duration: 0.5,
                looping: false,
            },
        ]);
        let mut actor = Actor::new("player", ActorKind::Player { mesh, animation }, 20, position)
            .with_collision(Shape::sphere(Vec3::new(0.0, 0.7, 0.0), 0.5));
        if let Some(anim) = actor.animation_mut() {
            anim.play("Idle");
        }
        let actor = arena.insert(actor);
        Self {
            actor,
            on_ground: true,
            facing: 0.0,
            attack_cooldown: 0.0,
            attack: None,
        }
    }

    /// Apply movement/jump/attack input to the player actor's velocity and
    /// animation. Attack spawns the melee volume in front of the player.
    pub fn process_input(&mut self, arena: &mut ActorArena, input: &InputState) {
        let axis = input.movement_axis();
        let jump = input.is_key_pressed(KeyCode::Space) && self.on_ground;
        let attack = input.is_key_pressed(KeyCode::KeyJ) && self.attack_cooldown <= 0.0;

        let Some(actor) = arena.get_mut(self.actor) else { return };
        if actor.is_dead() {
            return;
        }

        actor.velocity.x = axis.x * MOVE_SPEED;
        actor.velocity.z = -axis.y * MOVE_SPEED;
        if jump {
            actor.velocity.y = JUMP_SPEED;
            self.on_ground = false;
        }

        let moving = axis.length_squared() > 0.0;
        if moving {
            // Face the direction of travel.
            self.facing = axis.x.atan2(axis.y);
            actor.transform.rotation = glam::Quat::from_rotation_y(-self.facing);
        }
        if let Some(anim) = actor.animation_mut() {
            let attacking = anim.current() == Some("Attack") && !anim.is_finished();
            if attack {
                anim.play("Attack");
            } else if !attacking {
                let want = if moving { "Run" } else { "Idle" };
                if anim.current() != Some(want) {
                    anim.play(want);
                }
            }
        }

        if attack {
            self.attack_cooldown = ATTACK_COOLDOWN;
            let position = actor.transform.position;
            let forward = actor.transform.forward();
            let volume = Actor::new(
                "player_attack",
                ActorKind::Volume,
                ATTACK_DAMAGE,
                position + forward * 1.2 + Vec3::new(0.0, 0.8, 0.0),
            )
            .with_collision(Shape::sphere(Vec3::ZERO, 0.6));
            self.attack = Some((arena.insert(volume), ATTACK_ACTIVE));
        }
    }

    /// Post-integration step: gravity, terrain clamp, and attack-volume
    /// bookkeeping. Call after the actor lists have updated.
    pub fn update(&mut self, arena: &mut ActorArena, terrain: &Terrain, dt: f32) {
        self.attack_cooldown = (self.attack_cooldown - dt).max(0.0);

        let mut player_position = None;
        if let Some(actor) = arena.get_mut(self.actor) {
            if !actor.is_dead() {
                actor.velocity.y -= GRAVITY * dt;

                let ground = terrain
                    .height(actor.transform.position.x, actor.transform.position.z);
                if actor.transform.position.y <= ground {
                    actor.transform.position.y = ground;
                    actor.velocity.y = actor.velocity.y.max(0.0);
                    self.on_ground = true;
                } else {
                    self.on_ground = false;
                }
                actor.refresh_world_shape();
                player_position = Some((actor.transform.position, actor.transform.forward()));
            }
        }

        // The melee volume rides along in front of the player, then expires.
        if let Some((key, time_left)) = &mut self.attack {
            *time_left -= dt;
            let expired = *time_left <= 0.0;
            let key = *key;
            if expired {
                if let Some(volume) = arena.get_mut(key) {
                    volume.health = 0;
                }
                self.attack = None;
            } else if let Some((position, forward)) = player_position {
                if let Some(volume) = arena.get_mut(key) {
                    volume.transform.position =
                        position + forward * 1.2 + Vec3::new(0.0, 0.8, 0.0);
                    volume.refresh_world_shape();
                }
            }
        }
    }

    /// The live melee volume, if an attack is active.
    pub fn attack_volume(&self, arena: &ActorArena) -> Option<ActorKey> {
        self.attack
            .map(|(key, _)| key)
            .filter(|&key| arena.is_live(key))
    }

    /// Kill the live melee volume (it already hit something).
    pub fn consume_attack(&mut self, arena: &mut ActorArena) {
        if let Some((key, _)) = self.attack.take() {
            if let Some(volume) = arena.get_mut(key) {
                volume.health = 0;
            }
        }
    }

    pub fn is_dead(&self, arena: &ActorArena) -> bool {
        !arena.is_live(self.actor)
    }

    pub fn position(&self, arena: &ActorArena) -> Vec3 {
        arena
            .get(self.actor)
            .map(|a| a.transform.position)
            .unwrap_or(Vec3::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procgen::TerrainConfig;

    fn flat_terrain() -> Terrain {
        Terrain::generate(TerrainConfig {
            size: 64.0,
            resolution: 8,
            height_scale: 0.0,
            water_level: None,
            ..Default::default()
        })
    }

    #[test]
    fn player_lands_on_terrain() {
        let mut arena = ActorArena::new();
        let terrain = flat_terrain();
        let mut player =
            PlayerController::spawn(&mut arena, MeshId(0), Vec3::new(10.0, 5.0, 10.0));

        for _ in 0..120 {
            arena.get_mut(player.actor).unwrap().update(1.0 / 60.0);
            player.update(&mut arena, &terrain, 1.0 / 60.0);
        }
        let y = player.position(&arena).y;
        assert!(y.abs() < 0.01, "player should rest on the ground, y={y}");
    }

    #[test]
    fn attack_volume_expires() {
        let mut arena = ActorArena::new();
        let terrain = flat_terrain();
        let mut player =
            PlayerController::spawn(&mut arena, MeshId(0), Vec3::new(10.0, 0.0, 10.0));

        let mut input = InputState::new();
        input.process_keyboard(KeyCode::KeyJ, input::ElementState::Pressed);
        player.process_input(&mut arena, &input);
        assert!(player.attack_volume(&arena).is_some());

        for _ in 0..30 {
            player.update(&mut arena, &terrain, 1.0 / 60.0);
        }
        arena.sweep_dead();
        assert!(player.attack_volume(&arena).is_none());
    }
}
