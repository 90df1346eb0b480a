// Copyright 2020-2021 Kevin Reid under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Mathematical utilities shared by the geometry and search code.

use cgmath::{InnerSpace as _, Point2, Point3, Vector2, Vector3, Zero as _};

mod color;
pub use color::*;

/// Coordinate type for “real” world space (as opposed to pixel grids and cell
/// indices).
pub type FreeCoordinate = f64;

/// Normal of the triangle `(v1, v2, v3)`, or the zero vector if the triangle is
/// degenerate (collapsed edge or collinear vertices).
pub fn surface_normal(
    v1: Point3<FreeCoordinate>,
    v2: Point3<FreeCoordinate>,
    v3: Point3<FreeCoordinate>,
) -> Vector3<FreeCoordinate> {
    let d1 = v1 - v2;
    let d2 = v1 - v3;
    // ZERO rather than EPS: edges this short carry no direction information.
    if d1.magnitude() <= crate::config::ZERO || d2.magnitude() <= crate::config::ZERO {
        return Vector3::zero();
    }
    let result = d1.normalize().cross(d2.normalize());
    let len = result.magnitude();
    if len < f64::EPSILON {
        return Vector3::zero();
    }
    result / len
}

/// Angle between two vectors in radians; zero if either vector is (near) zero.
pub fn angle_between(a: Vector3<FreeCoordinate>, b: Vector3<FreeCoordinate>) -> FreeCoordinate {
    let denom = a.magnitude() * b.magnitude();
    if denom < f64::EPSILON {
        return 0.0;
    }
    (a.dot(b) / denom).clamp(-1.0, 1.0).acos()
}

/// A 2D segment from `p1` to `p2`, in continuous pixel coordinates.
///
/// Used to rasterize the screen-space projection of a ray segment so that the
/// pruned traversal can look up which previously computed pixels cover it.
#[derive(Clone, Copy, Debug)]
pub struct Line2 {
    pub p1: Point2<FreeCoordinate>,
    pub p2: Point2<FreeCoordinate>,
}

impl Line2 {
    pub fn new(p1: Point2<FreeCoordinate>, p2: Point2<FreeCoordinate>) -> Self {
        Self { p1, p2 }
    }

    /// Parameter in `[0, 1]` of the point on the segment nearest to `v`.
    pub fn nearest_position(&self, v: Point2<FreeCoordinate>) -> FreeCoordinate {
        let line_dir = self.p2 - self.p1;
        let line_len = line_dir.magnitude();
        if line_len < crate::config::ZERO {
            return 0.5;
        }
        let d = (line_dir / line_len).dot(v - self.p1) / line_len;
        d.clamp(0.0, 1.0)
    }

    /// The point on the segment nearest to `v`.
    pub fn nearest_point(&self, v: Point2<FreeCoordinate>) -> Point2<FreeCoordinate> {
        self.p1 + (self.p2 - self.p1) * self.nearest_position(v)
    }

    /// Distance from `v` to the segment.
    pub fn nearest_distance(&self, v: Point2<FreeCoordinate>) -> FreeCoordinate {
        (v - self.nearest_point(v)).magnitude()
    }

    /// All integer pixels within `thickness` of the segment.
    ///
    /// The default thickness used by callers is chosen so that every pixel whose
    /// center cell is crossed by the line is accepted.
    pub fn raster_points(&self, thickness: FreeCoordinate) -> Vec<Vector2<i64>> {
        let min = Vector2::new(
            (self.p1.x.min(self.p2.x) - thickness).floor() as i64,
            (self.p1.y.min(self.p2.y) - thickness).floor() as i64,
        );
        let max = Vector2::new(
            (self.p1.x.max(self.p2.x) + thickness).ceil() as i64,
            (self.p1.y.max(self.p2.y) + thickness).ceil() as i64,
        );
        let mut points = Vec::new();
        for y in min.y..=max.y {
            for x in min.x..=max.x {
                if self.nearest_distance(Point2::new(x as FreeCoordinate, y as FreeCoordinate))
                    <= thickness
                {
                    points.push(Vector2::new(x, y));
                }
            }
        }
        points
    }
}
