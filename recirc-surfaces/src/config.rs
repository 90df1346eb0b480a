// Copyright 2020-2021 Kevin Reid under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Process-independent numeric thresholds of the search and shading passes.
//!
//! The machine-epsilon-derived values are plain constants; everything a user
//! might want to vary per scene lives in [`Tunables`], which is threaded into
//! the constructors that need it rather than being global mutable state.

use crate::math::FreeCoordinate;

/// Smallest possible value difference.
pub const EPS: FreeCoordinate = f64::EPSILON;
/// Quasi-zero (very small).
pub const ZERO: FreeCoordinate = 1e3 * f64::EPSILON;
/// Small value, greater than [`ZERO`].
pub const SMALL: FreeCoordinate = 1e7 * f64::EPSILON;

/// Thresholds and offsets controlling the recirculation search, neighbor
/// classification and shading. One value of this type is shared by a scene's
/// [`RecSurface`](crate::surface::RecSurface) and everything downstream of it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tunables {
    /// Default spatial threshold for the recursive subdivision of ray segments
    /// and for flow-return verification; the per-job value lives in
    /// [`SearchParams::prec`](crate::surface::SearchParams::prec).
    pub search_prec: FreeCoordinate,

    /// Ray offset for searching before an estimated intersection during refinement.
    pub ray_back_offset_refinement: FreeCoordinate,
    /// Ray offset skipping the first part of a light ray, so that shadow tests do
    /// not rediscover the point they start from.
    pub ray_fore_offset_shadows: FreeCoordinate,

    /// Normal estimation: how far the sampling hyper-lines are placed from the
    /// recirculation point.
    pub normal_search_dis: FreeCoordinate,
    /// Normal estimation: maximum number of retries with halved distance.
    pub normal_max_steps: usize,

    /// Maximum angle (radians) between points considered screen-space neighbors.
    pub neighbor_space_angle: FreeCoordinate,
    /// Maximum `t0` difference per length unit for 5D neighborhood.
    pub neighbor_dif_t0_per_lu: FreeCoordinate,
    /// Maximum `tau` difference per length unit for 5D neighborhood.
    pub neighbor_dif_tau_per_lu: FreeCoordinate,

    /// Maximum distance at which two 3D points count as the same point.
    pub space_equal: FreeCoordinate,
    /// Maximum `t0` difference at which two recirculation points count as equal.
    pub t0_equal: FreeCoordinate,
    /// Maximum `tau` difference at which two recirculation points count as equal.
    pub tau_equal: FreeCoordinate,
    /// Minimal admissible `tau`; must not be 0 (a pathline of zero duration
    /// trivially “returns”).
    pub tau_min: FreeCoordinate,
    /// Determinant magnitude below which a Jacobian counts as singular.
    pub det_min: FreeCoordinate,
    /// Merge radius for reported recirculation points.
    pub rec_point_equal: FreeCoordinate,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            search_prec: 0.001,
            ray_back_offset_refinement: 0.015,
            ray_fore_offset_shadows: 0.005,
            normal_search_dis: 0.005,
            normal_max_steps: 3,
            neighbor_space_angle: 85.0 / 180.0 * std::f64::consts::PI,
            neighbor_dif_t0_per_lu: 60.0,
            neighbor_dif_tau_per_lu: 60.0,
            space_equal: 0.00005,
            t0_equal: 0.00005,
            tau_equal: 0.00005,
            tau_min: 0.001,
            det_min: 0.000001,
            rec_point_equal: 0.00005,
        }
    }
}
