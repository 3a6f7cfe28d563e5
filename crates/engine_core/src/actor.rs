//! Actors, the actor arena, and broad-phase collision dispatch.
//!
//! Every simulated entity is an [`Actor`]: one struct with a transform,
//! health, velocity, an optional collision volume, and a closed
//! [`ActorKind`] payload. Actors live in a single [`ActorArena`]; lists and
//! registries hold [`ActorKey`] handles into it, so an actor can appear in
//! several lists (a light is both "an actor" and "a light") without any
//! ownership ambiguity.

use glam::Vec3;
use slotmap::SlotMap;

use crate::collision::{intersect, Shape};
use crate::transform::Transform;

slotmap::new_key_type! {
    /// Stable generational handle to an actor in the arena.
    pub struct ActorKey;
}

/// Handle to a mesh owned by the renderer's mesh store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshId(pub u32);

/// A named animation clip with a fixed length.
#[derive(Debug, Clone, Copy)]
pub struct AnimationClip {
    pub name: &'static str,
    pub duration: f32,
    pub looping: bool,
}

/// Clip playback state for skeletal actors. Gameplay drives off this
/// (e.g. removing an enemy once its death clip finishes).
#[derive(Debug, Clone, Default)]
pub struct AnimationState {
    clips: Vec<AnimationClip>,
    current: Option<usize>,
    time: f32,
    finished: bool,
}

impl AnimationState {
    pub fn new(clips: Vec<AnimationClip>) -> Self {
        Self {
            clips,
            current: None,
            time: 0.0,
            finished: false,
        }
    }

    /// Start playing the named clip from its beginning. Returns false (and
    /// leaves playback untouched) if the clip is unknown.
    pub fn play(&mut self, name: &str) -> bool {
        match self.clips.iter().position(|c| c.name == name) {
            Some(i) => {
                self.current = Some(i);
                self.time = 0.0;
                self.finished = false;
                true
            }
            None => {
                log::warn!("unknown animation clip '{name}'");
                false
            }
        }
    }

    /// Advance playback. Looping clips wrap; one-shot clips clamp at their
    /// end and report finished.
    pub fn advance(&mut self, dt: f32) {
        let Some(i) = self.current else { return };
        if self.finished {
            return;
        }
        let clip = self.clips[i];
        self.time += dt;
        if self.time >= clip.duration {
            if clip.looping {
                self.time %= clip.duration;
            } else {
                self.time = clip.duration;
                self.finished = true;
            }
        }
    }

    /// Name of the clip currently playing.
    pub fn current(&self) -> Option<&'static str> {
        self.current.map(|i| self.clips[i].name)
    }

    /// True once a one-shot clip has reached its end.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Playback position in seconds.
    pub fn time(&self) -> f32 {
        self.time
    }
}

/// What kind of light an actor emits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    Directional {
        direction: Vec3,
    },
    Point,
    Spot {
        direction: Vec3,
        /// Cone half-angle in radians.
        cone_angle: f32,
        /// Inner angle where falloff begins, radians.
        falloff_angle: f32,
    },
}

/// Light payload carried by light actors. The kind tag is switched on
/// directly wherever point and spot lights diverge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub color: Vec3,
    pub kind: LightKind,
    /// Slot in the bound light uniform this light occupied last frame, if
    /// any. Written by the renderer's light buffer each update.
    pub buffer_index: Option<u32>,
}

impl Light {
    pub fn directional(color: Vec3, direction: Vec3) -> Self {
        Self {
            color,
            kind: LightKind::Directional {
                direction: direction.normalize(),
            },
            buffer_index: None,
        }
    }

    pub fn point(color: Vec3) -> Self {
        Self {
            color,
            kind: LightKind::Point,
            buffer_index: None,
        }
    }

    pub fn spot(color: Vec3, direction: Vec3, cone_angle: f32, falloff_angle: f32) -> Self {
        Self {
            color,
            kind: LightKind::Spot {
                direction: direction.normalize(),
                cone_angle,
                falloff_angle,
            },
            buffer_index: None,
        }
    }
}

/// Closed set of actor variants. Update/draw behavior dispatches on this
/// tag instead of a class hierarchy.
#[derive(Debug, Clone)]
pub enum ActorKind {
    /// A prop drawn with a static mesh.
    StaticMesh { mesh: MeshId },
    /// A character drawn with a mesh and an animation clip machine.
    SkeletalMesh {
        mesh: MeshId,
        animation: AnimationState,
    },
    /// The player character.
    Player {
        mesh: MeshId,
        animation: AnimationState,
    },
    /// A light source. Lights are not drawn.
    Light(Light),
    /// An invisible gameplay volume (attack sweeps, triggers).
    Volume,
}

/// A simulated game entity.
#[derive(Debug, Clone)]
pub struct Actor {
    pub name: String,
    /// Hit points; `<= 0` means logically dead. Dead actors are skipped by
    /// update, draw-data preparation, and collision.
    pub health: i32,
    pub transform: Transform,
    pub velocity: Vec3,
    /// Collision volume in actor-local space.
    pub col_local: Option<Shape>,
    /// Collision volume translated to world space; refreshed every update.
    pub col_world: Option<Shape>,
    pub kind: ActorKind,
}

impl Actor {
    pub fn new(name: impl Into<String>, kind: ActorKind, health: i32, position: Vec3) -> Self {
        Self {
            name: name.into(),
            health,
            transform: Transform::from_position(position),
            velocity: Vec3::ZERO,
            col_local: None,
            col_world: None,
            kind,
        }
    }

    pub fn with_yaw(mut self, yaw: f32) -> Self {
        self.transform.rotate_y(yaw);
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.transform.scale = Vec3::splat(scale);
        self
    }

    pub fn with_collision(mut self, shape: Shape) -> Self {
        self.set_collision(shape);
        self
    }

    /// Install a local-space collision volume and derive its world form.
    pub fn set_collision(&mut self, shape: Shape) {
        self.col_world = Some(shape.translated(self.transform.position));
        self.col_local = Some(shape);
    }

    /// Remove the collision volume entirely.
    pub fn clear_collision(&mut self) {
        self.col_local = None;
        self.col_world = None;
    }

    pub fn is_dead(&self) -> bool {
        self.health <= 0
    }

    /// Re-derive the world collision volume from the current position.
    pub fn refresh_world_shape(&mut self) {
        self.col_world = self.col_local.map(|s| s.translated(self.transform.position));
    }

    /// Per-frame simulation step: integrate velocity and refresh the world
    /// collision volume. No-op for dead actors.
    pub fn update(&mut self, dt: f32) {
        if self.is_dead() {
            return;
        }
        self.transform.position += self.velocity * dt;
        self.refresh_world_shape();
    }

    /// Prepare derived render state. Runs strictly after every actor's
    /// `update` for the frame, so collision resolution is already baked into
    /// what gets drawn. No-op for dead actors.
    pub fn update_draw_data(&mut self, dt: f32) {
        if self.is_dead() {
            return;
        }
        match &mut self.kind {
            ActorKind::SkeletalMesh { animation, .. } | ActorKind::Player { animation, .. } => {
                animation.advance(dt);
            }
            ActorKind::StaticMesh { .. } | ActorKind::Light(_) | ActorKind::Volume => {}
        }
    }

    /// Animation state, for the kinds that carry one.
    pub fn animation_mut(&mut self) -> Option<&mut AnimationState> {
        match &mut self.kind {
            ActorKind::SkeletalMesh { animation, .. } | ActorKind::Player { animation, .. } => {
                Some(animation)
            }
            _ => None,
        }
    }

    /// Light payload, for light actors.
    pub fn light(&self) -> Option<&Light> {
        match &self.kind {
            ActorKind::Light(l) => Some(l),
            _ => None,
        }
    }

    pub fn light_mut(&mut self) -> Option<&mut Light> {
        match &mut self.kind {
            ActorKind::Light(l) => Some(l),
            _ => None,
        }
    }
}

/// Arena owning every actor. Lists refer to actors by [`ActorKey`].
#[derive(Debug, Default)]
pub struct ActorArena {
    actors: SlotMap<ActorKey, Actor>,
}

impl ActorArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, actor: Actor) -> ActorKey {
        self.actors.insert(actor)
    }

    pub fn remove(&mut self, key: ActorKey) -> Option<Actor> {
        self.actors.remove(key)
    }

    pub fn get(&self, key: ActorKey) -> Option<&Actor> {
        self.actors.get(key)
    }

    pub fn get_mut(&mut self, key: ActorKey) -> Option<&mut Actor> {
        self.actors.get_mut(key)
    }

    /// Mutable access to two distinct actors at once (collision handlers).
    pub fn get2_mut(&mut self, a: ActorKey, b: ActorKey) -> Option<[&mut Actor; 2]> {
        self.actors.get_disjoint_mut([a, b])
    }

    pub fn contains(&self, key: ActorKey) -> bool {
        self.actors.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ActorKey, &Actor)> {
        self.actors.iter()
    }

    /// True when the key refers to a live (present and health > 0) actor.
    pub fn is_live(&self, key: ActorKey) -> bool {
        self.actors.get(key).is_some_and(|a| !a.is_dead())
    }

    /// Drop every dead actor from the arena. Lists shed the stale keys on
    /// their next sweep.
    pub fn sweep_dead(&mut self) {
        self.actors.retain(|_, a| !a.is_dead());
    }
}

/// An ordered collection of actor handles with batched update/draw helpers.
/// Insertion order is preserved but carries no meaning.
#[derive(Debug, Default, Clone)]
pub struct ActorList {
    keys: Vec<ActorKey>,
}

impl ActorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            keys: Vec::with_capacity(cap),
        }
    }

    pub fn add(&mut self, key: ActorKey) {
        self.keys.push(key);
    }

    pub fn remove(&mut self, key: ActorKey) {
        self.keys.retain(|&k| k != key);
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ActorKey> + '_ {
        self.keys.iter().copied()
    }

    /// Number of live actors in the list.
    pub fn live_count(&self, arena: &ActorArena) -> usize {
        self.keys.iter().filter(|&&k| arena.is_live(k)).count()
    }

    /// Batched simulation step over live members.
    pub fn update(&self, arena: &mut ActorArena, dt: f32) {
        for &key in &self.keys {
            if let Some(actor) = arena.get_mut(key) {
                actor.update(dt);
            }
        }
    }

    /// Batched draw-data preparation over live members.
    pub fn update_draw_data(&self, arena: &mut ActorArena, dt: f32) {
        for &key in &self.keys {
            if let Some(actor) = arena.get_mut(key) {
                actor.update_draw_data(dt);
            }
        }
    }

    /// Visit each live member (draw-side iteration skips the dead).
    pub fn visit_live<'a>(&self, arena: &'a ActorArena, mut f: impl FnMut(ActorKey, &'a Actor)) {
        for &key in &self.keys {
            if let Some(actor) = arena.get(key) {
                if !actor.is_dead() {
                    f(key, actor);
                }
            }
        }
    }

    /// Drop keys whose actor is dead or no longer in the arena.
    pub fn sweep(&mut self, arena: &ActorArena) {
        self.keys.retain(|&k| arena.is_live(k));
    }

    /// Live members within `radius` of `position` (Euclidean, inclusive).
    pub fn find_nearby(&self, arena: &ActorArena, position: Vec3, radius: f32) -> Vec<ActorKey> {
        let r_sq = radius * radius;
        self.keys
            .iter()
            .copied()
            .filter(|&k| {
                arena.get(k).is_some_and(|a| {
                    !a.is_dead() && (a.transform.position - position).length_squared() <= r_sq
                })
            })
            .collect()
    }
}

/// Callback invoked for each detected contact: `(arena, a, b, contact)`.
/// The handler resolves interpenetration and/or applies gameplay effects.
pub trait CollisionHandler: FnMut(&mut ActorArena, ActorKey, ActorKey, Vec3) {}
impl<F: FnMut(&mut ActorArena, ActorKey, ActorKey, Vec3)> CollisionHandler for F {}

fn world_shape_of(arena: &ActorArena, key: ActorKey) -> Option<Shape> {
    let actor = arena.get(key)?;
    if actor.is_dead() {
        return None;
    }
    actor.col_world
}

/// Test one actor pair; the handler fires on contact. Dead or shapeless
/// participants are skipped.
pub fn detect_collision(
    arena: &mut ActorArena,
    a: ActorKey,
    b: ActorKey,
    handler: &mut impl CollisionHandler,
) {
    if a == b {
        return;
    }
    let (Some(sa), Some(sb)) = (world_shape_of(arena, a), world_shape_of(arena, b)) else {
        return;
    };
    if let Some(p) = intersect(&sa, &sb) {
        handler(arena, a, b, p);
    }
}

/// Test one actor against every member of a list. If the handler kills `a`
/// mid-pass, the remaining checks for `a` are skipped.
pub fn detect_collision_list(
    arena: &mut ActorArena,
    a: ActorKey,
    list: &ActorList,
    handler: &mut impl CollisionHandler,
) {
    for b in list.iter() {
        if !arena.is_live(a) {
            break;
        }
        detect_collision(arena, a, b, handler);
    }
}

/// Test every pair across two lists, with the same per-`a` early exit on
/// death as the single-vs-list form.
pub fn detect_collision_lists(
    arena: &mut ActorArena,
    list_a: &ActorList,
    list_b: &ActorList,
    handler: &mut impl CollisionHandler,
) {
    for a in list_a.iter() {
        detect_collision_list(arena, a, list_b, handler);
    }
}

/// Reference contact resolver: push `a` (a sphere collider) out of `b`
/// along the contact normal by the remaining penetration plus a small bias.
/// When the contact point coincides with the sphere center the normal is
/// undefined, so this frame's displacement is undone instead. A contact
/// from below that is steeper than 68 degrees also kills downward velocity,
/// so actors can stand on what they landed on.
pub fn resolve_overlap(arena: &mut ActorArena, a: ActorKey, b: ActorKey, contact: Vec3, dt: f32) {
    let radius_b = arena
        .get(b)
        .and_then(|actor| actor.col_world.as_ref().map(Shape::radius))
        .unwrap_or(0.0);
    let Some(actor) = arena.get_mut(a) else { return };
    let Some(Shape::Sphere(sphere)) = actor.col_world else {
        return;
    };

    let v = sphere.center - contact;
    if v.length_squared() > f32::EPSILON {
        let vn = v.normalize();
        let radius_sum = sphere.radius + radius_b;
        let push = radius_sum - v.length() + 0.01;
        actor.transform.position += vn * push;
        if actor.velocity.y < 0.0 && vn.y >= 68f32.to_radians().cos() {
            actor.velocity.y = 0.0;
        }
    } else {
        actor.transform.position -= actor.velocity * dt;
    }
    actor.refresh_world_shape();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sphere_actor(arena: &mut ActorArena, pos: Vec3, health: i32, radius: f32) -> ActorKey {
        let actor = Actor::new("test", ActorKind::Volume, health, pos)
            .with_collision(Shape::sphere(Vec3::ZERO, radius));
        arena.insert(actor)
    }

    #[test]
    fn dead_actor_update_is_a_noop() {
        let mut arena = ActorArena::new();
        let key = sphere_actor(&mut arena, Vec3::ZERO, 0, 1.0);
        arena.get_mut(key).unwrap().velocity = Vec3::new(10.0, 0.0, 0.0);
        arena.get_mut(key).unwrap().update(1.0);
        assert_eq!(arena.get(key).unwrap().transform.position, Vec3::ZERO);

        // Animation must not advance for a dead skeletal actor either.
        let mut anim = AnimationState::new(vec![AnimationClip {
            name: "Run",
            duration: 1.0,
            looping: true,
        }]);
        anim.play("Run");
        let mut dead = Actor::new(
            "oni",
            ActorKind::SkeletalMesh {
                mesh: MeshId(0),
                animation: anim,
            },
            0,
            Vec3::ZERO,
        );
        dead.update_draw_data(0.5);
        assert_eq!(dead.animation_mut().unwrap().time(), 0.0);
    }

    #[test]
    fn update_integrates_velocity_and_world_shape() {
        let mut arena = ActorArena::new();
        let key = sphere_actor(&mut arena, Vec3::ZERO, 10, 1.0);
        arena.get_mut(key).unwrap().velocity = Vec3::new(2.0, 0.0, 0.0);
        arena.get_mut(key).unwrap().update(0.5);
        let actor = arena.get(key).unwrap();
        assert_eq!(actor.transform.position, Vec3::new(1.0, 0.0, 0.0));
        match actor.col_world {
            Some(Shape::Sphere(s)) => assert_eq!(s.center, Vec3::new(1.0, 0.0, 0.0)),
            other => panic!("unexpected world shape {other:?}"),
        }
    }

    #[test]
    fn collision_skips_dead_participants() {
        let mut arena = ActorArena::new();
        let a = sphere_actor(&mut arena, Vec3::ZERO, 10, 1.0);
        let b = sphere_actor(&mut arena, Vec3::new(0.5, 0.0, 0.0), 0, 1.0);
        let mut hits = 0;
        detect_collision(&mut arena, a, b, &mut |_, _, _, _| hits += 1);
        assert_eq!(hits, 0, "dead actor must not collide");
    }

    #[test]
    fn list_check_short_circuits_when_a_dies() {
        let mut arena = ActorArena::new();
        let a = sphere_actor(&mut arena, Vec3::ZERO, 1, 1.0);
        let mut list = ActorList::new();
        for i in 0..5 {
            list.add(sphere_actor(
                &mut arena,
                Vec3::new(i as f32 * 0.1, 0.0, 0.0),
                10,
                1.0,
            ));
        }
        let mut hits = 0;
        detect_collision_list(&mut arena, a, &list, &mut |arena, a, _, _| {
            hits += 1;
            arena.get_mut(a).unwrap().health = 0;
        });
        assert_eq!(hits, 1, "checks for a must stop once a dies");
    }

    #[test]
    fn find_nearby_is_inclusive_and_exhaustive() {
        let mut arena = ActorArena::new();
        let mut lights = ActorList::new();
        for d in [5.0_f32, 10.0, 20.0] {
            let actor = Actor::new(
                "light",
                ActorKind::Light(Light::point(Vec3::ONE)),
                1,
                Vec3::new(d, 0.0, 0.0),
            );
            lights.add(arena.insert(actor));
        }
        let near = lights.find_nearby(&arena, Vec3::ZERO, 15.0);
        assert_eq!(near.len(), 2);
        // Inclusive boundary: a light at exactly the radius is returned.
        let boundary = lights.find_nearby(&arena, Vec3::ZERO, 10.0);
        assert_eq!(boundary.len(), 2);
    }

    #[test]
    fn sweep_drops_dead_from_list_and_arena() {
        let mut arena = ActorArena::new();
        let mut list = ActorList::new();
        let alive = sphere_actor(&mut arena, Vec3::ZERO, 5, 1.0);
        let dead = sphere_actor(&mut arena, Vec3::ONE, 0, 1.0);
        list.add(alive);
        list.add(dead);

        arena.sweep_dead();
        list.sweep(&arena);
        assert_eq!(list.len(), 1);
        assert!(arena.contains(alive));
        assert!(!arena.contains(dead));
    }

    #[test]
    fn resolve_overlap_pushes_out_along_normal() {
        let mut arena = ActorArena::new();
        let a = sphere_actor(&mut arena, Vec3::new(0.0, 0.0, 0.0), 10, 1.0);
        let b = sphere_actor(&mut arena, Vec3::new(1.5, 0.0, 0.0), 10, 1.0);
        let (sa, sb) = match (
            arena.get(a).unwrap().col_world.unwrap(),
            arena.get(b).unwrap().col_world.unwrap(),
        ) {
            (Shape::Sphere(x), Shape::Sphere(y)) => (x, y),
            _ => unreachable!(),
        };
        let contact = intersect(&Shape::Sphere(sa), &Shape::Sphere(sb)).unwrap();
        resolve_overlap(&mut arena, a, b, contact, 1.0 / 60.0);

        let pos = arena.get(a).unwrap().transform.position;
        let dist = (pos - Vec3::new(1.5, 0.0, 0.0)).length();
        assert!(
            dist >= 2.0,
            "spheres should no longer interpenetrate (dist {dist})"
        );
    }

    #[test]
    fn resolve_overlap_degenerate_undoes_motion() {
        let mut arena = ActorArena::new();
        let dt = 1.0 / 60.0;
        let a = sphere_actor(&mut arena, Vec3::ZERO, 10, 1.0);
        arena.get_mut(a).unwrap().velocity = Vec3::new(6.0, 0.0, 0.0);
        // Simulate the frame's integration, then a dead-center contact.
        arena.get_mut(a).unwrap().update(dt);
        let center = arena.get(a).unwrap().transform.position;
        let b = sphere_actor(&mut arena, center, 10, 1.0);
        resolve_overlap(&mut arena, a, b, center, dt);
        let pos = arena.get(a).unwrap().transform.position;
        assert!(
            pos.is_finite() && (pos - Vec3::ZERO).length() < 1e-5,
            "degenerate contact should undo the frame's displacement, got {pos}"
        );
    }

    #[test]
    fn one_shot_clip_finishes_and_looping_wraps() {
        let mut anim = AnimationState::new(vec![
            AnimationClip {
                name: "Down",
                duration: 1.0,
                looping: false,
            },
            AnimationClip {
                name: "Run",
                duration: 0.8,
                looping: true,
            },
        ]);
        anim.play("Down");
        anim.advance(0.6);
        assert!(!anim.is_finished());
        anim.advance(0.6);
        assert!(anim.is_finished());

        anim.play("Run");
        anim.advance(1.0);
        assert!(!anim.is_finished());
        assert!(anim.time() < 0.8);
    }
}
