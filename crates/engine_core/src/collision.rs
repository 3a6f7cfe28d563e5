//! Collision shapes and pairwise intersection tests.
//!
//! Shapes are authored in actor-local space and translated into world space
//! each frame from the owning actor's position. Rotation and scale are not
//! applied to shapes; volumes are sized generously enough that this holds up
//! for the characters and props in this game.

use glam::Vec3;

/// Sphere volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f32,
}

/// Capsule volume: a segment from `a` to `b` swept by `radius`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Capsule {
    pub a: Vec3,
    pub b: Vec3,
    pub radius: f32,
}

/// Oriented box: center, three orthonormal axes, and half-extents along them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Obb {
    pub center: Vec3,
    pub axes: [Vec3; 3],
    pub half_extents: Vec3,
}

/// A collision volume. The variant tag decides which test applies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    Sphere(Sphere),
    Capsule(Capsule),
    Obb(Obb),
}

impl Shape {
    /// Sphere at `center` with `radius`.
    pub fn sphere(center: Vec3, radius: f32) -> Self {
        Self::Sphere(Sphere { center, radius })
    }

    /// Capsule between segment endpoints `a` and `b` with `radius`.
    pub fn capsule(a: Vec3, b: Vec3, radius: f32) -> Self {
        Self::Capsule(Capsule { a, b, radius })
    }

    /// Oriented box from center, three orthonormal axes, and half-extents.
    pub fn obb(center: Vec3, axes: [Vec3; 3], half_extents: Vec3) -> Self {
        Self::Obb(Obb {
            center,
            axes,
            half_extents,
        })
    }

    /// The shape translated by `offset` (local shape -> world shape).
    pub fn translated(&self, offset: Vec3) -> Self {
        match *self {
            Self::Sphere(s) => Self::Sphere(Sphere {
                center: s.center + offset,
                ..s
            }),
            Self::Capsule(c) => Self::Capsule(Capsule {
                a: c.a + offset,
                b: c.b + offset,
                ..c
            }),
            Self::Obb(o) => Self::Obb(Obb {
                center: o.center + offset,
                ..o
            }),
        }
    }

    /// The swept/bounding radius of the shape, used by overlap resolution.
    pub fn radius(&self) -> f32 {
        match self {
            Self::Sphere(s) => s.radius,
            Self::Capsule(c) => c.radius,
            // Boxes resolve against their surface, not a radius.
            Self::Obb(_) => 0.0,
        }
    }
}

/// Closest point to `p` on the segment `a`..`b`.
pub fn closest_point_segment(a: Vec3, b: Vec3, p: Vec3) -> Vec3 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq <= f32::EPSILON {
        return a;
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    a + ab * t
}

/// Closest point to `p` on (or inside) the oriented box.
pub fn closest_point_obb(obb: &Obb, p: Vec3) -> Vec3 {
    let d = p - obb.center;
    let mut q = obb.center;
    for i in 0..3 {
        let e = obb.half_extents[i];
        let dist = d.dot(obb.axes[i]).clamp(-e, e);
        q += obb.axes[i] * dist;
    }
    q
}

/// Sphere-sphere test. Boundary contact (distance exactly equal to the sum
/// of radii) counts as colliding.
pub fn sphere_sphere(a: &Sphere, b: &Sphere) -> bool {
    let r = a.radius + b.radius;
    (a.center - b.center).length_squared() <= r * r
}

/// Sphere-capsule test.
pub fn sphere_capsule(s: &Sphere, c: &Capsule) -> bool {
    let p = closest_point_segment(c.a, c.b, s.center);
    let r = s.radius + c.radius;
    (s.center - p).length_squared() <= r * r
}

/// Sphere-oriented-box test.
pub fn sphere_obb(s: &Sphere, o: &Obb) -> bool {
    let p = closest_point_obb(o, s.center);
    (s.center - p).length_squared() <= s.radius * s.radius
}

/// Test two world-space shapes for intersection. Returns the contact point
/// (on the second shape's surface, or its closest feature) when they
/// overlap, `None` otherwise.
///
/// Only sphere-vs-* pairs are dispatched; every moving collider in the game
/// is a sphere, so capsule-capsule and box pairs never arise.
pub fn intersect(a: &Shape, b: &Shape) -> Option<Vec3> {
    match (a, b) {
        (Shape::Sphere(sa), Shape::Sphere(sb)) => {
            if sphere_sphere(sa, sb) {
                Some(surface_toward(sb.center, sb.radius, sa.center))
            } else {
                None
            }
        }
        (Shape::Sphere(s), Shape::Capsule(c)) => {
            if sphere_capsule(s, c) {
                let seg = closest_point_segment(c.a, c.b, s.center);
                Some(surface_toward(seg, c.radius, s.center))
            } else {
                None
            }
        }
        (Shape::Sphere(s), Shape::Obb(o)) => {
            if sphere_obb(s, o) {
                Some(closest_point_obb(o, s.center))
            } else {
                None
            }
        }
        // Symmetric pairs: reuse the sphere-first tests.
        (Shape::Capsule(_), Shape::Sphere(_)) | (Shape::Obb(_), Shape::Sphere(_)) => {
            intersect(b, a)
        }
        _ => None,
    }
}

/// Point on a sphere's surface at `center`/`radius`, in the direction of
/// `toward`. Falls back to the center itself when the two coincide.
fn surface_toward(center: Vec3, radius: f32, toward: Vec3) -> Vec3 {
    let v = toward - center;
    if v.length_squared() <= f32::EPSILON {
        center
    } else {
        center + v.normalize() * radius
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sphere_sphere_is_symmetric() {
        let a = Sphere {
            center: Vec3::new(0.0, 0.0, 0.0),
            radius: 1.0,
        };
        let b = Sphere {
            center: Vec3::new(1.5, 0.0, 0.0),
            radius: 1.0,
        };
        assert_eq!(sphere_sphere(&a, &b), sphere_sphere(&b, &a));
        assert!(sphere_sphere(&a, &b));
    }

    /// Exactly touching spheres (distance == radius sum) must collide.
    #[test]
    fn sphere_sphere_boundary_inclusive() {
        let a = Sphere {
            center: Vec3::ZERO,
            radius: 1.0,
        };
        let b = Sphere {
            center: Vec3::new(3.0, 0.0, 0.0),
            radius: 2.0,
        };
        assert!(sphere_sphere(&a, &b), "boundary contact should collide");
        let c = Sphere {
            center: Vec3::new(3.001, 0.0, 0.0),
            radius: 2.0,
        };
        assert!(!sphere_sphere(&a, &c));
    }

    #[test]
    fn sphere_capsule_hits_segment_interior() {
        let c = Capsule {
            a: Vec3::new(0.0, 0.0, 0.0),
            b: Vec3::new(0.0, 2.0, 0.0),
            radius: 0.5,
        };
        let s = Sphere {
            center: Vec3::new(0.8, 1.0, 0.0),
            radius: 0.5,
        };
        assert!(sphere_capsule(&s, &c));
        let far = Sphere {
            center: Vec3::new(2.0, 1.0, 0.0),
            radius: 0.5,
        };
        assert!(!sphere_capsule(&far, &c));
    }

    #[test]
    fn sphere_obb_face_contact() {
        let o = Obb {
            center: Vec3::ZERO,
            axes: [Vec3::X, Vec3::Y, Vec3::Z],
            half_extents: Vec3::new(1.0, 1.0, 1.0),
        };
        // Just touching the +X face.
        let touching = Sphere {
            center: Vec3::new(1.5, 0.0, 0.0),
            radius: 0.5,
        };
        assert!(sphere_obb(&touching, &o));
        // A hair beyond.
        let separated = Sphere {
            center: Vec3::new(1.51, 0.0, 0.0),
            radius: 0.5,
        };
        assert!(!sphere_obb(&separated, &o));
    }

    #[test]
    fn intersect_returns_contact_on_b() {
        let a = Shape::sphere(Vec3::new(0.0, 0.0, 0.0), 1.0);
        let b = Shape::sphere(Vec3::new(1.5, 0.0, 0.0), 1.0);
        let p = intersect(&a, &b).expect("overlapping spheres");
        // Contact lies on b's surface toward a.
        assert!((p - Vec3::new(0.5, 0.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn translated_moves_every_variant() {
        let off = Vec3::new(1.0, 2.0, 3.0);
        match Shape::sphere(Vec3::ZERO, 1.0).translated(off) {
            Shape::Sphere(s) => assert_eq!(s.center, off),
            _ => panic!("variant changed"),
        }
        match Shape::capsule(Vec3::ZERO, Vec3::Y, 0.5).translated(off) {
            Shape::Capsule(c) => {
                assert_eq!(c.a, off);
                assert_eq!(c.b, off + Vec3::Y);
            }
            _ => panic!("variant changed"),
        }
        match Shape::obb(Vec3::ZERO, [Vec3::X, Vec3::Y, Vec3::Z], Vec3::ONE).translated(off) {
            Shape::Obb(o) => assert_eq!(o.center, off),
            _ => panic!("variant changed"),
        }
    }
}
