// Copyright 2020-2021 Kevin Reid under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! 5D search cells: the eight corner values of the flow-return field over one
//! cell of a hyper-line, and the operations the recursive root search needs.

use cgmath::{InnerSpace as _, Matrix3, SquareMatrix as _, Vector3};
use once_cell::sync::Lazy;

use crate::math::FreeCoordinate;

/// Relative corner coordinates of the unit cube, indexed by corner number: bit 0
/// selects the `s` (position-on-segment) axis, bit 1 the `t0` axis, bit 2 the
/// `tau` axis. These are the control coefficients of the trilinear (degree-1
/// Bernstein) interpolant.
static CORNER_COORDS: Lazy<[Vector3<FreeCoordinate>; 8]> = Lazy::new(|| {
    let mut corners = [Vector3::new(0.0, 0.0, 0.0); 8];
    for (i, corner) in corners.iter_mut().enumerate() {
        *corner = Vector3::new(
            (i & 1) as FreeCoordinate,
            ((i >> 1) & 1) as FreeCoordinate,
            ((i >> 2) & 1) as FreeCoordinate,
        );
    }
    corners
});

/// The flow-return vectors at the eight corners of a cell
/// `{s₀,s₁} × {t0₀,t0₁} × {tau₀,tau₁}` of a hyper-line, together with the cell's
/// position within the root cell it was subdivided from (in relative
/// coordinates, so the root cell is the unit cube).
///
/// Corner `i` corresponds to `CORNER_COORDS[i]`.
#[derive(Clone, Debug)]
pub struct VectorCuboid {
    vertices: [Vector3<FreeCoordinate>; 8],
    lo: Vector3<FreeCoordinate>,
    hi: Vector3<FreeCoordinate>,
}

impl VectorCuboid {
    /// A root cell: the given corner values, spanning the unit cube in relative
    /// coordinates.
    pub fn new(vertices: [Vector3<FreeCoordinate>; 8]) -> Self {
        Self {
            vertices,
            lo: Vector3::new(0.0, 0.0, 0.0),
            hi: Vector3::new(1.0, 1.0, 1.0),
        }
    }

    pub fn vertices(&self) -> &[Vector3<FreeCoordinate>; 8] {
        &self.vertices
    }

    pub fn lo(&self) -> Vector3<FreeCoordinate> {
        self.lo
    }

    pub fn hi(&self) -> Vector3<FreeCoordinate> {
        self.hi
    }

    /// Cell center in root-relative coordinates.
    pub fn center(&self) -> Vector3<FreeCoordinate> {
        (self.lo + self.hi) / 2.0
    }

    /// Length of the cell diagonal in root-relative coordinates.
    pub fn diagonal(&self) -> FreeCoordinate {
        (self.hi - self.lo).magnitude()
    }

    /// Longest edge of the cell in root-relative coordinates.
    pub fn max_edge(&self) -> FreeCoordinate {
        let e = self.hi - self.lo;
        e.x.max(e.y).max(e.z)
    }

    /// Whether some component of the field has the same sign at all eight
    /// corners. If so, that component cannot vanish inside the cell (under the
    /// trilinear model) and the cell contains no root.
    pub fn signs_uniform(&self) -> bool {
        for comp in 0..3 {
            let mut has_positive = false;
            let mut has_negative = false;
            for v in &self.vertices {
                if v[comp] > 0.0 {
                    has_positive = true;
                } else if v[comp] < 0.0 {
                    has_negative = true;
                }
            }
            if !(has_positive && has_negative) {
                return true;
            }
        }
        false
    }

    /// Trilinear interpolation of the corner values at a point given in
    /// root-relative coordinates (which must lie inside this cell).
    pub fn sample_relative(&self, at: Vector3<FreeCoordinate>) -> Vector3<FreeCoordinate> {
        let extent = self.hi - self.lo;
        let mut local = Vector3::new(0.0, 0.0, 0.0);
        for axis in 0..3 {
            local[axis] = if extent[axis] > 0.0 {
                ((at[axis] - self.lo[axis]) / extent[axis]).clamp(0.0, 1.0)
            } else {
                0.0
            };
        }
        let mut sum = Vector3::new(0.0, 0.0, 0.0);
        for (corner, coords) in self.vertices.iter().zip(CORNER_COORDS.iter()) {
            let mut weight = 1.0;
            for axis in 0..3 {
                weight *= if coords[axis] == 1.0 {
                    local[axis]
                } else {
                    1.0 - local[axis]
                };
            }
            sum += *corner * weight;
        }
        sum
    }

    /// Jacobian of the trilinear interpolant at the cell center, by central
    /// differences, in root-relative units. (For a multilinear function the
    /// central difference is exact for any probe spacing.)
    pub fn jacobian_at_center(&self) -> Matrix3<FreeCoordinate> {
        let center = self.center();
        let extent = self.hi - self.lo;
        let mut columns = [Vector3::new(0.0, 0.0, 0.0); 3];
        for (axis, column) in columns.iter_mut().enumerate() {
            let q = extent[axis] * 0.25;
            if q <= 0.0 {
                continue;
            }
            let mut offset = Vector3::new(0.0, 0.0, 0.0);
            offset[axis] = q;
            *column = (self.sample_relative(center + offset)
                - self.sample_relative(center - offset))
                / (2.0 * q);
        }
        Matrix3::from_cols(columns[0], columns[1], columns[2])
    }

    /// Determinant of [`Self::jacobian_at_center`].
    pub fn jacobian_determinant(&self) -> FreeCoordinate {
        self.jacobian_at_center().determinant()
    }

    /// Bisects all three axes, producing the eight child cells. Child corner
    /// values are interpolated from this cell's corners (the field model is
    /// trilinear; no re-integration happens here).
    pub fn subdivide(&self) -> [VectorCuboid; 8] {
        let mid = self.center();
        std::array::from_fn(|octant| {
            let mut lo = self.lo;
            let mut hi = self.hi;
            for axis in 0..3 {
                if (octant >> axis) & 1 == 1 {
                    lo[axis] = mid[axis];
                } else {
                    hi[axis] = mid[axis];
                }
            }
            let vertices = std::array::from_fn(|corner| {
                let mut at = Vector3::new(0.0, 0.0, 0.0);
                for axis in 0..3 {
                    at[axis] = if (corner >> axis) & 1 == 1 {
                        hi[axis]
                    } else {
                        lo[axis]
                    };
                }
                self.sample_relative(at)
            });
            VectorCuboid { vertices, lo, hi }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A linear field `F(r) = r - (0.5, 0.5, 0.5)` evaluated at the unit cube
    /// corners; its unique root is the cube center.
    fn centered_linear_cell() -> VectorCuboid {
        let vertices = std::array::from_fn(|i| CORNER_COORDS[i] - Vector3::new(0.5, 0.5, 0.5));
        VectorCuboid::new(vertices)
    }

    #[test]
    fn signs_uniform_detects_rootless_cells() {
        let shifted = VectorCuboid::new(std::array::from_fn(|i| {
            CORNER_COORDS[i] + Vector3::new(2.0, 0.0, 0.0)
        }));
        assert!(shifted.signs_uniform());
        assert!(!centered_linear_cell().signs_uniform());
    }

    #[test]
    fn sample_relative_reproduces_corners_and_center() {
        let cell = centered_linear_cell();
        for i in 0..8 {
            let v = cell.sample_relative(CORNER_COORDS[i]);
            assert!((v - cell.vertices()[i]).magnitude() < 1e-12);
        }
        let center = cell.sample_relative(Vector3::new(0.5, 0.5, 0.5));
        assert!(center.magnitude() < 1e-12);
    }

    #[test]
    fn subdivision_is_consistent_with_parent() {
        let cell = centered_linear_cell();
        let children = cell.subdivide();
        for child in &children {
            let at = child.center();
            let from_child = child.sample_relative(at);
            let from_parent = cell.sample_relative(at);
            assert!((from_child - from_parent).magnitude() < 1e-12);
            assert!((child.diagonal() - cell.diagonal() / 2.0).abs() < 1e-12);
        }
        // Exactly one child per octant.
        let mut seen = std::collections::BTreeSet::new();
        for child in &children {
            let c = child.center();
            seen.insert((c.x < 0.5, c.y < 0.5, c.z < 0.5));
        }
        assert_eq!(seen.len(), 8);
    }

    #[test]
    fn jacobian_of_linear_field_is_identity() {
        let jac = centered_linear_cell().jacobian_at_center();
        for col in 0..3 {
            for row in 0..3 {
                let expected = if col == row { 1.0 } else { 0.0 };
                assert!((jac[col][row] - expected).abs() < 1e-12);
            }
        }
        let det = centered_linear_cell().jacobian_determinant();
        assert!((det - 1.0).abs() < 1e-12);
    }

    #[test]
    fn jacobian_singular_for_constant_component() {
        // A field whose z component is identically zero: det = 0.
        let vertices = std::array::from_fn(|i| {
            let r = CORNER_COORDS[i] - Vector3::new(0.5, 0.5, 0.5);
            Vector3::new(r.x, r.y, 0.0)
        });
        let cell = VectorCuboid::new(vertices);
        assert!(cell.jacobian_determinant().abs() < 1e-12);
    }
}
