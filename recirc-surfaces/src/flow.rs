// Copyright 2020-2021 Kevin Reid under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Time-dependent velocity fields and their sampling.

use cgmath::{Point3, Vector3};

use crate::math::FreeCoordinate;
use crate::raycast::Aabb;

/// A continuous time-dependent velocity field `v(x, t)`.
///
/// Implementations are read-only after construction; the whole render pipeline
/// shares one flow across threads.
pub trait Flow: Send + Sync {
    /// The velocity at `position` and time `t`, or [`None`] if the field has no
    /// data there. Integration stops (and is treated as a fatal out-of-domain
    /// condition by the sampler) when this returns [`None`].
    fn velocity(
        &self,
        position: Point3<FreeCoordinate>,
        t: FreeCoordinate,
    ) -> Option<Vector3<FreeCoordinate>>;

    /// Whether `position` is inside the spatial region this flow is defined on.
    fn contains(&self, position: Point3<FreeCoordinate>) -> bool {
        self.spatial_extent().contains(position)
    }

    /// The spatial region this flow is defined on.
    fn spatial_extent(&self) -> Aabb;

    /// The time span this flow is defined on.
    fn time_range(&self) -> (FreeCoordinate, FreeCoordinate);
}

/// The unsteady double gyre, extended to three dimensions.
///
/// The horizontal components are the classic two-gyre pattern whose dividing
/// line oscillates with period `2π/omega`; the vertical component vanishes on
/// the mid-plane `z = 1/2` and on the top and bottom faces, so the box
/// `[0,2] × [0,1] × [0,1]` is invariant under the flow.
#[derive(Clone, Copy, Debug)]
pub struct DoubleGyre3 {
    pub amplitude: FreeCoordinate,
    pub epsilon: FreeCoordinate,
    pub omega: FreeCoordinate,
}

impl Default for DoubleGyre3 {
    fn default() -> Self {
        Self {
            amplitude: 0.1,
            epsilon: 0.25,
            omega: std::f64::consts::PI / 5.0,
        }
    }
}

impl Flow for DoubleGyre3 {
    fn velocity(
        &self,
        position: Point3<FreeCoordinate>,
        t: FreeCoordinate,
    ) -> Option<Vector3<FreeCoordinate>> {
        use std::f64::consts::PI;
        let a = self.epsilon * (self.omega * t).sin();
        let b = 1.0 - 2.0 * a;
        let f = a * position.x * position.x + b * position.x;
        let df = 2.0 * a * position.x + b;
        Some(Vector3::new(
            -PI * self.amplitude * (PI * f).sin() * (PI * position.y).cos(),
            PI * self.amplitude * (PI * f).cos() * (PI * position.y).sin() * df,
            0.1 * PI * (2.0 * PI * position.z).sin(),
        ))
    }

    fn spatial_extent(&self) -> Aabb {
        Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 1.0, 1.0))
    }

    fn time_range(&self) -> (FreeCoordinate, FreeCoordinate) {
        (FreeCoordinate::NEG_INFINITY, FreeCoordinate::INFINITY)
    }
}

/// A velocity field given as time slices of a regular spatial grid, sampled
/// with trilinear interpolation in space and linear interpolation in time.
///
/// Dataset decoding is a caller concern; a [`GridFlow`] is built from slices
/// already in memory.
#[derive(Clone, Debug)]
pub struct GridFlow {
    extent: Aabb,
    t_start: FreeCoordinate,
    t_step: FreeCoordinate,
    dims: [usize; 3],
    /// One `dims[0]·dims[1]·dims[2]` vector array per time slice, x-fastest.
    slices: Vec<Vec<Vector3<FreeCoordinate>>>,
}

impl GridFlow {
    /// Creates a grid flow. Panics if the dimensions do not match the data or if
    /// fewer than two grid points exist along any axis, or fewer than one slice.
    pub fn new(
        extent: Aabb,
        t_start: FreeCoordinate,
        t_step: FreeCoordinate,
        dims: [usize; 3],
        slices: Vec<Vec<Vector3<FreeCoordinate>>>,
    ) -> Self {
        assert!(dims.iter().all(|&d| d >= 2), "grid needs two points per axis");
        assert!(!slices.is_empty());
        let expected = dims[0] * dims[1] * dims[2];
        assert!(
            slices.iter().all(|s| s.len() == expected),
            "slice size does not match dimensions"
        );
        Self {
            extent,
            t_start,
            t_step,
            dims,
            slices,
        }
    }

    fn sample_slice(&self, slice: usize, position: Point3<FreeCoordinate>) -> Vector3<FreeCoordinate> {
        let data = &self.slices[slice];
        let lo = self.extent.lo();
        let hi = self.extent.hi();

        // Cell coordinates, clamped so boundary queries stay valid.
        let mut idx = [0usize; 3];
        let mut frac = [0.0; 3];
        for axis in 0..3 {
            let cells = (self.dims[axis] - 1) as FreeCoordinate;
            let rel = ((position[axis] - lo[axis]) / (hi[axis] - lo[axis]) * cells)
                .clamp(0.0, cells);
            let cell = (rel.floor() as usize).min(self.dims[axis] - 2);
            idx[axis] = cell;
            frac[axis] = rel - cell as FreeCoordinate;
        }

        let at = |dx: usize, dy: usize, dz: usize| {
            data[(idx[2] + dz) * self.dims[0] * self.dims[1]
                + (idx[1] + dy) * self.dims[0]
                + (idx[0] + dx)]
        };
        let lerp = |a: Vector3<FreeCoordinate>, b: Vector3<FreeCoordinate>, s: FreeCoordinate| {
            a * (1.0 - s) + b * s
        };

        let c00 = lerp(at(0, 0, 0), at(1, 0, 0), frac[0]);
        let c10 = lerp(at(0, 1, 0), at(1, 1, 0), frac[0]);
        let c01 = lerp(at(0, 0, 1), at(1, 0, 1), frac[0]);
        let c11 = lerp(at(0, 1, 1), at(1, 1, 1), frac[0]);
        let c0 = lerp(c00, c10, frac[1]);
        let c1 = lerp(c01, c11, frac[1]);
        lerp(c0, c1, frac[2])
    }
}

impl Flow for GridFlow {
    fn velocity(
        &self,
        position: Point3<FreeCoordinate>,
        t: FreeCoordinate,
    ) -> Option<Vector3<FreeCoordinate>> {
        if !self.extent.contains(position) {
            return None;
        }
        let (t_min, t_max) = self.time_range();
        if t < t_min || t > t_max {
            return None;
        }
        if self.slices.len() == 1 {
            return Some(self.sample_slice(0, position));
        }
        let rel = ((t - self.t_start) / self.t_step).clamp(0.0, (self.slices.len() - 1) as f64);
        let slice = (rel.floor() as usize).min(self.slices.len() - 2);
        let frac = rel - slice as FreeCoordinate;
        let v0 = self.sample_slice(slice, position);
        let v1 = self.sample_slice(slice + 1, position);
        Some(v0 * (1.0 - frac) + v1 * frac)
    }

    fn spatial_extent(&self) -> Aabb {
        self.extent
    }

    fn time_range(&self) -> (FreeCoordinate, FreeCoordinate) {
        (
            self.t_start,
            self.t_start + self.t_step * (self.slices.len() - 1) as FreeCoordinate,
        )
    }
}
