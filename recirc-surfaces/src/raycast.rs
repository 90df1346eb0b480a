// Copyright 2020-2021 Kevin Reid under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Rays and axis-aligned boxes, and the intersection tests between them.

use cgmath::{InnerSpace as _, Point2, Point3, Vector3, Zero as _};

use crate::config;
use crate::math::FreeCoordinate;

/// Reflects a direction `d` at a surface with normal `n`.
#[inline]
pub fn reflect(d: Vector3<FreeCoordinate>, n: Vector3<FreeCoordinate>) -> Vector3<FreeCoordinate> {
    d - n * (2.0 * d.dot(n))
}

/// Refracts an incident direction at a surface with normal `n` and relative
/// index of refraction `ior`. Returns [`None`] on total internal reflection.
pub fn refract(
    incident: Vector3<FreeCoordinate>,
    n: Vector3<FreeCoordinate>,
    ior: FreeCoordinate,
) -> Option<Vector3<FreeCoordinate>> {
    let mut n = n.normalize();
    let mut cosi = incident.normalize().dot(n);
    let mut etai = 1.0;
    let mut etat = ior;
    if cosi < 0.0 {
        cosi = -cosi;
    } else {
        std::mem::swap(&mut etai, &mut etat);
        n = -n;
    }
    let eta = etai / etat;
    let k = 1.0 - eta * eta * (1.0 - cosi * cosi);
    if k < 0.0 {
        return None;
    }
    Some(incident * eta + n * (eta * cosi - k.sqrt()))
}

/// A ray with an origin and a unit direction.
///
/// Rays are used for intersection tests with the scene's renderables and for the
/// per-pixel recirculation search. The reflection count exists for the shading
/// of ordinary objects; the recirculation search never reflects.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    origin: Point3<FreeCoordinate>,
    direction: Vector3<FreeCoordinate>,
    reflections: usize,
}

impl Ray {
    pub fn new(origin: Point3<FreeCoordinate>, direction: Vector3<FreeCoordinate>) -> Self {
        Self {
            origin,
            direction: direction.normalize(),
            reflections: 0,
        }
    }

    #[inline]
    pub fn origin(&self) -> Point3<FreeCoordinate> {
        self.origin
    }

    #[inline]
    pub fn direction(&self) -> Vector3<FreeCoordinate> {
        self.direction
    }

    #[inline]
    pub fn reflections(&self) -> usize {
        self.reflections
    }

    /// Evaluate the ray at position `t`; `t = 1` returns origin + unit direction.
    #[inline]
    pub fn evaluate(&self, t: FreeCoordinate) -> Point3<FreeCoordinate> {
        self.origin + self.direction * t
    }

    /// Reflects the ray at `position` with surface normal `normal`, nudging the
    /// new origin off the surface.
    pub fn reflected(&self, position: Point3<FreeCoordinate>, normal: Vector3<FreeCoordinate>) -> Ray {
        let dir = reflect(self.direction, normal);
        Ray {
            origin: position + dir * 1e-4,
            direction: dir.normalize(),
            reflections: self.reflections + 1,
        }
    }
}

/// Result of a ray/box slab test: the parameters at which the ray enters and
/// leaves the box, and the axis whose slab produced the entry (ties resolved to
/// the lowest axis index).
///
/// `axis_in` is [`None`] only when the entry parameter was clipped by the
/// caller's `min_t` rather than by a slab, i.e. the ray already starts inside.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SlabHit {
    pub t_in: FreeCoordinate,
    pub t_out: FreeCoordinate,
    pub axis_in: Option<usize>,
}

/// An axis-aligned box spanned by two corner points.
///
/// The corners are swapped componentwise at construction so that
/// `lo[i] <= hi[i]` always holds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    lo: Point3<FreeCoordinate>,
    hi: Point3<FreeCoordinate>,
}

impl Aabb {
    pub fn new(v1: Point3<FreeCoordinate>, v2: Point3<FreeCoordinate>) -> Self {
        let mut lo = v1;
        let mut hi = v2;
        for i in 0..3 {
            if lo[i] > hi[i] {
                std::mem::swap(&mut lo[i], &mut hi[i]);
            }
        }
        Self { lo, hi }
    }

    #[inline]
    pub fn lo(&self) -> Point3<FreeCoordinate> {
        self.lo
    }

    #[inline]
    pub fn hi(&self) -> Point3<FreeCoordinate> {
        self.hi
    }

    /// Whether `v` lies inside the box (boundary included).
    pub fn contains(&self, v: Point3<FreeCoordinate>) -> bool {
        (0..3).all(|i| v[i] >= self.lo[i] && v[i] <= self.hi[i])
    }

    /// Classical slab test. Returns the entering and exiting ray parameters
    /// within `[min_t, max_t]`, or [`None`] if the ray misses the box (or the
    /// overlap of the per-axis intervals is empty).
    pub fn intersection_span(
        &self,
        ray: &Ray,
        min_t: FreeCoordinate,
        max_t: FreeCoordinate,
    ) -> Option<SlabHit> {
        let mut enter = [FreeCoordinate::NEG_INFINITY; 3];
        let mut exit = [FreeCoordinate::INFINITY; 3];
        for i in 0..3 {
            if ray.direction()[i].abs() < config::EPS {
                // Parallel to this slab: the origin must lie between the planes.
                if ray.origin()[i] < self.lo[i] || ray.origin()[i] > self.hi[i] {
                    return None;
                }
            } else {
                let mut t0 = (self.lo[i] - ray.origin()[i]) / ray.direction()[i];
                let mut t1 = (self.hi[i] - ray.origin()[i]) / ray.direction()[i];
                if t0 > t1 {
                    std::mem::swap(&mut t0, &mut t1);
                }
                enter[i] = t0;
                exit[i] = t1;
            }
        }
        let t_in = enter[0].max(enter[1]).max(enter[2]).max(min_t);
        let t_out = exit[0].min(exit[1]).min(exit[2]).min(max_t);
        if t_in >= t_out {
            return None;
        }
        let axis_in = (0..3).find(|&i| enter[i] == t_in);
        Some(SlabHit {
            t_in,
            t_out,
            axis_in,
        })
    }

    /// The entering intersection prepared for shading: position, outward normal
    /// of the face that was hit, and the position on that face in `[0,1]²`.
    ///
    /// If the ray already starts inside the box, the normal is the zero vector,
    /// so a box one is standing in renders with its ambient term only.
    pub fn surface_hit(&self, ray: &Ray, min_t: FreeCoordinate) -> Option<BoxHit> {
        if self.contains(ray.evaluate(min_t)) {
            return Some(BoxHit {
                t: min_t,
                position: ray.evaluate(min_t),
                normal: Vector3::zero(),
                uv: Point2::new(0.0, 0.0),
            });
        }

        let slab = self.intersection_span(ray, min_t, FreeCoordinate::MAX)?;
        let axis = slab
            .axis_in
            .expect("entry axis undefined after a confirmed intersection");
        let t = slab.t_in;
        let position = ray.evaluate(t);

        // If the ray direction is positive along the hit axis, the entry face is
        // the low one and the outward normal points negative.
        let mut normal = Vector3::zero();
        normal[axis] = if ray.direction()[axis] > 0.0 { -1.0 } else { 1.0 };

        let mut uv = Point2::new(0.0, 0.0);
        let mut uv_pos = 0;
        for i in 0..3 {
            if i != axis {
                uv[uv_pos] = (position[i] - self.lo[i]) / (self.hi[i] - self.lo[i]);
                uv_pos += 1;
            }
        }

        Some(BoxHit {
            t,
            position,
            normal,
            uv,
        })
    }
}

/// Raw result of [`Aabb::surface_hit`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxHit {
    pub t: FreeCoordinate,
    pub position: Point3<FreeCoordinate>,
    pub normal: Vector3<FreeCoordinate>,
    pub uv: Point2<FreeCoordinate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> Aabb {
        Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn corners_are_swapped() {
        let b = Aabb::new(Point3::new(1.0, -1.0, 5.0), Point3::new(0.0, 2.0, -5.0));
        assert_eq!(b.lo(), Point3::new(0.0, -1.0, -5.0));
        assert_eq!(b.hi(), Point3::new(1.0, 2.0, 5.0));
    }

    #[test]
    fn contains_boundary() {
        let b = unit_box();
        assert!(b.contains(Point3::new(0.0, 0.5, 1.0)));
        assert!(!b.contains(Point3::new(-0.001, 0.5, 0.5)));
    }

    /// For any hitting ray, the entry and exit points lie on the box surface and
    /// the midpoint is inside.
    #[test]
    fn span_round_trip() {
        let b = unit_box();
        let rays = [
            Ray::new(Point3::new(-1.0, 0.5, 0.5), Vector3::new(1.0, 0.0, 0.0)),
            Ray::new(Point3::new(2.0, 2.0, 2.0), Vector3::new(-1.0, -1.0, -1.0)),
            Ray::new(Point3::new(0.5, -3.0, 0.2), Vector3::new(0.1, 1.0, 0.3)),
        ];
        for ray in &rays {
            let slab = b.intersection_span(ray, 0.0, FreeCoordinate::MAX).unwrap();
            for &t in &[slab.t_in, slab.t_out] {
                let p = ray.evaluate(t);
                let on_face = (0..3).any(|i| {
                    (p[i] - b.lo()[i]).abs() < 1e-9 || (p[i] - b.hi()[i]).abs() < 1e-9
                });
                assert!(on_face, "{:?} not on surface", p);
            }
            assert!(b.contains(ray.evaluate((slab.t_in + slab.t_out) / 2.0)));
        }
    }

    #[test]
    fn span_miss() {
        let b = unit_box();
        let ray = Ray::new(Point3::new(-1.0, 2.0, 0.5), Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(b.intersection_span(&ray, 0.0, FreeCoordinate::MAX), None);
        // Pointing away
        let ray = Ray::new(Point3::new(-1.0, 0.5, 0.5), Vector3::new(-1.0, 0.0, 0.0));
        assert_eq!(b.intersection_span(&ray, 0.0, FreeCoordinate::MAX), None);
    }

    #[test]
    fn span_parallel_axis() {
        let b = unit_box();
        // Parallel to x and between the x slabs: hits.
        let ray = Ray::new(Point3::new(0.5, -1.0, 0.5), Vector3::new(0.0, 1.0, 0.0));
        let slab = b.intersection_span(&ray, 0.0, FreeCoordinate::MAX).unwrap();
        assert_eq!(slab.axis_in, Some(1));
        assert!((slab.t_in - 1.0).abs() < 1e-12);
        // Parallel to x and outside the x slabs: misses.
        let ray = Ray::new(Point3::new(1.5, -1.0, 0.5), Vector3::new(0.0, 1.0, 0.0));
        assert_eq!(b.intersection_span(&ray, 0.0, FreeCoordinate::MAX), None);
    }

    #[test]
    fn span_honors_max_t() {
        let b = unit_box();
        let ray = Ray::new(Point3::new(-1.0, 0.5, 0.5), Vector3::new(1.0, 0.0, 0.0));
        assert!(b.intersection_span(&ray, 0.0, 0.5).is_none());
        let clipped = b.intersection_span(&ray, 0.0, 1.5).unwrap();
        assert_eq!(clipped.t_out, 1.5);
    }

    #[test]
    fn span_entry_axis_tie_prefers_lowest() {
        let b = unit_box();
        // Enters exactly at the (0,0,0) corner: all three entries coincide.
        let ray = Ray::new(Point3::new(-1.0, -1.0, -1.0), Vector3::new(1.0, 1.0, 1.0));
        let slab = b.intersection_span(&ray, 0.0, FreeCoordinate::MAX).unwrap();
        assert_eq!(slab.axis_in, Some(0));
    }

    #[test]
    fn surface_hit_normal_and_uv() {
        let b = unit_box();
        let ray = Ray::new(Point3::new(-1.0, 0.25, 0.75), Vector3::new(1.0, 0.0, 0.0));
        let hit = b.surface_hit(&ray, 0.0).unwrap();
        assert_eq!(hit.normal, Vector3::new(-1.0, 0.0, 0.0));
        assert!((hit.uv.x - 0.25).abs() < 1e-12);
        assert!((hit.uv.y - 0.75).abs() < 1e-12);
    }

    #[test]
    fn surface_hit_from_inside() {
        let b = unit_box();
        let ray = Ray::new(Point3::new(0.5, 0.5, 0.5), Vector3::new(1.0, 0.0, 0.0));
        let hit = b.surface_hit(&ray, 0.0).unwrap();
        assert_eq!(hit.normal, Vector3::zero());
        assert_eq!(hit.t, 0.0);
    }

    #[test]
    fn reflected_rays_count_their_bounces() {
        let ray = Ray::new(Point3::new(0.0, 1.0, 0.0), Vector3::new(1.0, -1.0, 0.0));
        assert_eq!(ray.reflections(), 0);
        let bounced = ray.reflected(Point3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 1.0, 0.0));
        assert_eq!(bounced.reflections(), 1);
        assert!((bounced.direction() - Vector3::new(1.0, 1.0, 0.0).normalize()).magnitude() < 1e-12);
        // The origin is nudged off the surface along the new direction.
        assert!((bounced.origin() - Point3::new(1.0, 0.0, 0.0)).magnitude() > 0.0);
    }

    #[test]
    fn reflect_and_refract() {
        let d = Vector3::new(1.0, -1.0, 0.0).normalize();
        let n = Vector3::new(0.0, 1.0, 0.0);
        let r = reflect(d, n);
        assert!((r - Vector3::new(1.0, 1.0, 0.0).normalize()).magnitude() < 1e-12);

        // Total internal reflection at a grazing angle from the dense side.
        let grazing = Vector3::new(1.0, -0.05, 0.0).normalize();
        assert_eq!(refract(grazing, -n, 1.5), None);
        // Perpendicular incidence passes straight through.
        let straight = refract(Vector3::new(0.0, -1.0, 0.0), n, 1.5).unwrap();
        assert!((straight.normalize() - Vector3::new(0.0, -1.0, 0.0)).magnitude() < 1e-12);
    }
}
