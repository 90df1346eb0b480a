// Copyright 2020-2021 Kevin Reid under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! The recirculation surface itself: sweeping rays through the flow domain,
//! extracting recirculation points per segment, and estimating surface normals
//! by local re-sampling.

use std::sync::Arc;

use cgmath::{InnerSpace as _, Point3, Vector3, Zero as _};
use itertools::Itertools as _;

use crate::camera::PerspectiveCamera;
use crate::config::{self, Tunables};
use crate::extract::{CritExtractor, CritSearchParams};
use crate::flow::Flow;
use crate::hyper::{HyperLine, HyperPoint};
use crate::integrate::FlowSampler;
use crate::math::{angle_between, surface_normal, FreeCoordinate, Line2};
use crate::objects::Renderable;
use crate::progress::ProgressStore;
use crate::raycast::{Aabb, Ray};

/// A recirculation point: the pathline seeded at `pos` at time `t0` returns to
/// `pos` after `tau`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RecPoint {
    pub pos: Point3<FreeCoordinate>,
    pub t0: FreeCoordinate,
    pub tau: FreeCoordinate,
}

/// The per-pixel result of the recirculation search: the pixel, its ray, and,
/// if a recirculation point was found, the hit distance along the ray together
/// with the point. `hit` and `rp` are always both present or both absent.
///
/// Ordering compares `cam_index` only.
#[derive(Clone, Debug)]
pub struct RSIntersection {
    pub cam_index: usize,
    pub ray: Ray,
    pub hit: Option<FreeCoordinate>,
    pub rp: Option<RecPoint>,
}

impl RSIntersection {
    pub fn empty(cam_index: usize, ray: Ray) -> Self {
        Self {
            cam_index,
            ray,
            hit: None,
            rp: None,
        }
    }

    /// Whether the `t0`/`tau` values are near enough, relative to the spatial
    /// distance, for the two points to be surface neighbors.
    pub fn time_dims_compatible(&self, other: &RSIntersection, tunables: &Tunables) -> bool {
        let (rp1, rp2) = match (&self.rp, &other.rp) {
            (Some(a), Some(b)) => (a, b),
            _ => return false,
        };
        let dis = (rp1.pos - rp2.pos).magnitude();
        let dif_t0 = (rp1.t0 - rp2.t0).abs();
        let dif_tau = (rp1.tau - rp2.tau).abs();
        if dis < config::ZERO {
            return dif_t0 <= tunables.t0_equal && dif_tau <= tunables.tau_equal;
        }
        dif_t0 / dis <= tunables.neighbor_dif_t0_per_lu
            && dif_tau / dis <= tunables.neighbor_dif_tau_per_lu
    }

    /// Whether the two points lie at compatible depths: the angle at `self`
    /// between the other point and the point on the other ray at `self`'s depth
    /// stays below the neighbor threshold.
    pub fn angles_compatible(&self, other: &RSIntersection, tunables: &Tunables) -> bool {
        let (rp1, rp2) = match (&self.rp, &other.rp) {
            (Some(a), Some(b)) => (a, b),
            _ => return false,
        };
        let hit = match self.hit {
            Some(h) => h,
            None => return false,
        };
        let dif = rp2.pos - rp1.pos;
        let ideal = other.ray.evaluate(hit);
        angle_between(ideal - rp1.pos, dif) <= tunables.neighbor_space_angle
    }

    /// 5D neighborhood: time compatibility and the depth-angle test.
    pub fn is_neighboring(&self, other: &RSIntersection, tunables: &Tunables) -> bool {
        self.time_dims_compatible(other, tunables) && self.angles_compatible(other, tunables)
    }
}

impl PartialEq for RSIntersection {
    fn eq(&self, other: &Self) -> bool {
        self.cam_index == other.cam_index
    }
}
impl Eq for RSIntersection {}
impl PartialOrd for RSIntersection {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for RSIntersection {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.cam_index.cmp(&other.cam_index)
    }
}

/// Flow domain and ray-marching parameters.
#[derive(Clone, Copy, Debug)]
pub struct DataParams {
    pub domain: Aabb,
    pub step_size: FreeCoordinate,
}

impl DataParams {
    pub fn new(domain: Aabb, step_size: FreeCoordinate) -> Self {
        assert!(step_size > 0.0, "step size must be positive");
        Self { domain, step_size }
    }
}

/// Search ranges of the two time dimensions and their discretization.
#[derive(Clone, Copy, Debug)]
pub struct SearchParams {
    pub t0_min: FreeCoordinate,
    pub t0_max: FreeCoordinate,
    pub tau_min: FreeCoordinate,
    pub tau_max: FreeCoordinate,
    /// Cell size of the `(t0, tau)` grid.
    pub dt: FreeCoordinate,
    /// Spatial refinement threshold for ray segments, and the residual bound a
    /// candidate's true flow return must satisfy to be reported.
    pub prec: FreeCoordinate,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            t0_min: 0.0,
            t0_max: 14.8,
            tau_min: 0.2,
            tau_max: 15.0,
            dt: 0.2,
            prec: Tunables::default().search_prec,
        }
    }
}

/// The recirculation surface of one flow, with its search configuration.
///
/// All methods take `&self`; one `RecSurface` serves all render workers
/// concurrently.
pub struct RecSurface {
    flow: Arc<dyn Flow>,
    data: DataParams,
    search: SearchParams,
    tunables: Tunables,
    extractor: CritExtractor,
}

impl RecSurface {
    pub fn new(flow: Arc<dyn Flow>, data: DataParams, search: SearchParams) -> Self {
        Self::with_tunables(flow, data, search, Tunables::default())
    }

    pub fn with_tunables(
        flow: Arc<dyn Flow>,
        data: DataParams,
        search: SearchParams,
        tunables: Tunables,
    ) -> Self {
        let extractor = CritExtractor::new(CritSearchParams::default(), tunables.det_min);
        Self {
            flow,
            data,
            search,
            tunables,
            extractor,
        }
    }

    /// Replaces the extractor parameters (the defaults suit production
    /// renders; coarser settings help exploratory runs).
    pub fn with_crit_params(mut self, params: CritSearchParams) -> Self {
        self.extractor = CritExtractor::new(params, self.tunables.det_min);
        self
    }

    pub fn flow(&self) -> &Arc<dyn Flow> {
        &self.flow
    }

    pub fn data_params(&self) -> &DataParams {
        &self.data
    }

    pub fn search_params(&self) -> &SearchParams {
        &self.search
    }

    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    /// The ingoing and outgoing ray parameters of the domain box within
    /// `[begin_at, end_at]`.
    pub fn domain_intersections(
        &self,
        ray: &Ray,
        begin_at: FreeCoordinate,
        end_at: FreeCoordinate,
    ) -> Option<(FreeCoordinate, FreeCoordinate)> {
        self.data
            .domain
            .intersection_span(ray, begin_at, end_at)
            .map(|slab| (slab.t_in, slab.t_out))
    }

    /// Searches the nearest recirculation point on the ray within
    /// `[begin_at, end_at]`.
    ///
    /// Returns the intersection record (with `cam_index` unset; the caller
    /// assigns it) and whether the domain was intersected at all, i.e. whether
    /// any integration work could have happened.
    pub fn search_intersection(
        &self,
        ray: &Ray,
        begin_at: FreeCoordinate,
        end_at: FreeCoordinate,
    ) -> (RSIntersection, bool) {
        self.walk_ray(ray, begin_at, end_at, |_, _| true)
    }

    /// Like [`Self::search_intersection`], but consults already computed rays
    /// to skip segments that cannot contain new information.
    ///
    /// A segment *needs a test* if some previously computed pixel whose ray
    /// passes near it has its nearest hit not provably in front of the
    /// segment. With `invert_search` the complement is tested instead;
    /// shadow sharpening uses this to cover exactly the parts of a light ray
    /// that the first pruned pass skipped.
    #[allow(clippy::too_many_arguments)]
    pub fn search_intersection_pruned(
        &self,
        ray: &Ray,
        progress: &ProgressStore,
        cam: &PerspectiveCamera,
        objects: &[Renderable],
        begin_at: FreeCoordinate,
        end_at: FreeCoordinate,
        invert_search: bool,
    ) -> (RSIntersection, bool) {
        self.walk_ray(ray, begin_at, end_at, |a, b| {
            self.line_needs_test(a, b, cam, progress, objects) != invert_search
        })
    }

    /// Common ray-marching loop: sweeps `[begin_at, end_at] ∩ domain` in steps
    /// of `step_size`, building one hyper-line per step (sharing endpoints so
    /// pathlines carry over), and stops at the first segment that yields a
    /// recirculation point.
    fn walk_ray(
        &self,
        ray: &Ray,
        begin_at: FreeCoordinate,
        end_at: FreeCoordinate,
        mut segment_wanted: impl FnMut(Point3<FreeCoordinate>, Point3<FreeCoordinate>) -> bool,
    ) -> (RSIntersection, bool) {
        let mut result = RSIntersection::empty(usize::MAX, *ray);

        let (i_min, i_max) = match self.domain_intersections(ray, begin_at, end_at) {
            Some(span) => span,
            None => return (result, false),
        };

        let sampler = FlowSampler::new(self.flow.as_ref());
        let step = self.data.step_size;
        let mut hp_b = HyperPoint::shared(ray.evaluate(i_min));
        let mut t = i_min;
        while t < i_max {
            let t_next = (t + step).min(i_max);
            let hp_a = hp_b;
            hp_b = HyperPoint::shared(ray.evaluate(t_next));

            if self.flow.contains(hp_a.position())
                && self.flow.contains(hp_b.position())
                && segment_wanted(hp_a.position(), hp_b.position())
            {
                let hl = HyperLine::new(hp_a.clone(), hp_b.clone());
                if let Some(rp) = self.nearest_rec_point(&hl, &sampler, ray) {
                    result.hit = Some((ray.origin() - rp.pos).magnitude());
                    result.rp = Some(rp);
                    break;
                }
            }
            t = t_next;
        }
        (result, true)
    }

    /// Runs the extractor on one hyper-line and picks the point nearest to the
    /// ray origin (later points on the same segment are occluded).
    fn nearest_rec_point(
        &self,
        hl: &HyperLine,
        sampler: &FlowSampler<'_>,
        ray: &Ray,
    ) -> Option<RecPoint> {
        let found =
            hl.recirculation_points(sampler, &self.extractor, &self.search, &self.tunables, false);
        found.into_iter().min_by(|a, b| {
            let da = (a.pos - ray.origin()).magnitude();
            let db = (b.pos - ray.origin()).magnitude();
            da.partial_cmp(&db).expect("NaN distance")
        })
    }

    /// Whether the segment `[a, b]` may contain information that no previously
    /// computed neighboring ray already rules out.
    fn line_needs_test(
        &self,
        a: Point3<FreeCoordinate>,
        b: Point3<FreeCoordinate>,
        cam: &PerspectiveCamera,
        progress: &ProgressStore,
        objects: &[Renderable],
    ) -> bool {
        let segment_len = (b - a).magnitude();
        // Pixels covered by the projected segment, with margin for neighbors.
        let line = Line2::new(cam.project(a), cam.project(b));
        for pixel in line.raster_points(1.2) {
            // The nearest known hit of that pixel's ray, from the recirculation
            // search or from ordinary scene objects.
            let mut min_t = FreeCoordinate::MAX;
            if let Some(rsi) = progress.get(pixel.x, pixel.y) {
                min_t = min_t.min(rsi.hit.expect("stored intersection without hit"));
            } else if pixel.x >= 0 && pixel.y >= 0 {
                let cam_ray = cam.ray(pixel.x as FreeCoordinate, pixel.y as FreeCoordinate);
                for obj in objects {
                    if let Some(hit) = obj.surface_hit(&cam_ray, config::SMALL) {
                        min_t = min_t.min(hit.t);
                    }
                }
            }
            if min_t == FreeCoordinate::MAX {
                continue;
            }

            let cam_ray = cam.ray(pixel.x as FreeCoordinate, pixel.y as FreeCoordinate);
            let dis = (cam_ray.origin() - a)
                .magnitude()
                .max((cam_ray.origin() - b).magnitude());

            // The segment length serves as a safety margin.
            if min_t - segment_len <= dis {
                return true;
            }
        }
        false
    }

    /// Estimates the surface normal at a recirculation point by sampling
    /// nearby hyper-lines for further recirculation points and averaging the
    /// triangle normals they span with `rp`.
    ///
    /// Falls back from a cross layout to a cube layout, then to halved
    /// distances, before giving up with the zero vector.
    pub fn estimate_flow_normal(
        &self,
        rp: &RecPoint,
        ray: &Ray,
        offset_space: FreeCoordinate,
        max_retries: usize,
    ) -> Vector3<FreeCoordinate> {
        let sampler = FlowSampler::new(self.flow.as_ref());
        let mut points = Vec::new();

        self.add_neighborhood_by_cross(&sampler, rp, &mut points, offset_space);
        if points.len() < 2 {
            self.add_neighborhood_by_cube(&sampler, rp, &mut points, offset_space);
        }
        if points.len() < 2 {
            if max_retries > 0 {
                return self.estimate_flow_normal(rp, ray, offset_space / 2.0, max_retries - 1);
            }
            return Vector3::zero();
        }

        let mut normal = Vector3::zero();
        for (p1, p2) in points.iter().tuple_combinations() {
            let mut n = surface_normal(rp.pos, *p1, *p2);
            // Orient every triangle back toward the camera before averaging.
            if n.dot(ray.direction()) > 0.0 {
                n = -n;
            }
            normal += n;
        }
        if normal.is_zero() {
            return normal;
        }
        if ray.direction().dot(normal) > 0.0 {
            normal = -normal;
        }
        normal.normalize()
    }

    /// Collects the 3D positions of recirculation points on one hyper-line
    /// that qualify as neighbors of `rp`.
    fn add_hyperline_points(
        &self,
        sampler: &FlowSampler<'_>,
        hl: &HyperLine,
        rp: &RecPoint,
        points: &mut Vec<Point3<FreeCoordinate>>,
        search: &SearchParams,
    ) {
        if !self.flow.contains(hl.point_a().position()) || !self.flow.contains(hl.point_b().position())
        {
            return;
        }
        let found = hl.recirculation_points(sampler, &self.extractor, search, &self.tunables, false);
        for f in found {
            let dis = (f.pos - rp.pos).magnitude();
            // Time dimensions must stay compatible with the spatial distance…
            if (f.t0 - rp.t0).abs() > dis * self.tunables.neighbor_dif_t0_per_lu
                || (f.tau - rp.tau).abs() > dis * self.tunables.neighbor_dif_tau_per_lu
            {
                continue;
            }
            // …and coincident points add no triangle.
            if points
                .iter()
                .any(|&other| (f.pos - other).magnitude() <= self.tunables.space_equal)
            {
                continue;
            }
            points.push(f.pos);
        }
    }

    /// Restricted search ranges for the neighborhood probes: the time values of
    /// a neighbor cannot stray farther from `rp` than the layout diameter
    /// allows.
    fn neighborhood_search_params(&self, rp: &RecPoint, diameter_factor: FreeCoordinate) -> SearchParams {
        let dif_t0 = diameter_factor * self.tunables.neighbor_dif_t0_per_lu;
        let dif_tau = diameter_factor * self.tunables.neighbor_dif_tau_per_lu;
        SearchParams {
            t0_min: (rp.t0 - dif_t0).max(self.search.t0_min),
            t0_max: (rp.t0 + dif_t0).min(self.search.t0_max),
            tau_min: self.search.tau_min,
            tau_max: (rp.tau + dif_tau).min(self.search.tau_max),
            dt: self.search.dt,
            prec: self.search.prec,
        }
    }

    /// Cross layout: three axis-aligned squares around `rp`, twelve corners,
    /// twelve edges, with shared corner points.
    fn add_neighborhood_by_cross(
        &self,
        sampler: &FlowSampler<'_>,
        rp: &RecPoint,
        points: &mut Vec<Point3<FreeCoordinate>>,
        offset_space: FreeCoordinate,
    ) {
        let sp = self.neighborhood_search_params(rp, std::f64::consts::SQRT_2);
        let offsets = [
            // Square in the yz plane…
            Vector3::new(0.0, -1.0, -1.0),
            Vector3::new(0.0, 1.0, -1.0),
            Vector3::new(0.0, 1.0, 1.0),
            Vector3::new(0.0, -1.0, 1.0),
            // …the xz plane…
            Vector3::new(-1.0, 0.0, -1.0),
            Vector3::new(1.0, 0.0, -1.0),
            Vector3::new(1.0, 0.0, 1.0),
            Vector3::new(-1.0, 0.0, 1.0),
            // …and the xy plane.
            Vector3::new(-1.0, -1.0, 0.0),
            Vector3::new(1.0, -1.0, 0.0),
            Vector3::new(1.0, 1.0, 0.0),
            Vector3::new(-1.0, 1.0, 0.0),
        ];
        let corners: Vec<_> = offsets
            .iter()
            .map(|&o| HyperPoint::shared(rp.pos + o * offset_space))
            .collect();
        for square in corners.chunks(4) {
            for i in 0..4 {
                let hl = HyperLine::new(square[i].clone(), square[(i + 1) % 4].clone());
                self.add_hyperline_points(sampler, &hl, rp, points, &sp);
            }
        }
    }

    /// Cube layout: the eight corners at `±offset_space`, twelve edges, with
    /// shared corner points.
    fn add_neighborhood_by_cube(
        &self,
        sampler: &FlowSampler<'_>,
        rp: &RecPoint,
        points: &mut Vec<Point3<FreeCoordinate>>,
        offset_space: FreeCoordinate,
    ) {
        let sp = self.neighborhood_search_params(rp, 3.0f64.sqrt());
        let corners: Vec<_> = (0..8)
            .map(|i| {
                let offset = Vector3::new(
                    if i & 1 == 0 { -1.0 } else { 1.0 },
                    if i & 2 == 0 { -1.0 } else { 1.0 },
                    if i & 4 == 0 { -1.0 } else { 1.0 },
                );
                HyperPoint::shared(rp.pos + offset * offset_space)
            })
            .collect();
        const EDGES: [(usize, usize); 12] = [
            (0, 1),
            (2, 3),
            (4, 5),
            (6, 7),
            (0, 2),
            (1, 3),
            (4, 6),
            (5, 7),
            (0, 4),
            (1, 5),
            (2, 6),
            (3, 7),
        ];
        for &(a, b) in EDGES.iter() {
            let hl = HyperLine::new(corners[a].clone(), corners[b].clone());
            self.add_hyperline_points(sampler, &hl, rp, points, &sp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CamUp;
    use cgmath::EuclideanSpace as _;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Rotation around the `(1,1,1)/√3` axis; period `2π` everywhere.
    struct TiltedRotation;
    impl Flow for TiltedRotation {
        fn velocity(
            &self,
            p: Point3<FreeCoordinate>,
            _t: FreeCoordinate,
        ) -> Option<Vector3<FreeCoordinate>> {
            Some((Vector3::new(1.0, 1.0, 1.0) / 3.0f64.sqrt()).cross(p.to_vec()))
        }
        fn spatial_extent(&self) -> Aabb {
            Aabb::new(Point3::new(-10.0, -10.0, -10.0), Point3::new(10.0, 10.0, 10.0))
        }
        fn time_range(&self) -> (FreeCoordinate, FreeCoordinate) {
            (FreeCoordinate::NEG_INFINITY, FreeCoordinate::INFINITY)
        }
    }

    struct CountingFlow<F: Flow> {
        inner: F,
        calls: AtomicUsize,
    }
    impl<F: Flow> Flow for CountingFlow<F> {
        fn velocity(
            &self,
            p: Point3<FreeCoordinate>,
            t: FreeCoordinate,
        ) -> Option<Vector3<FreeCoordinate>> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.inner.velocity(p, t)
        }
        fn spatial_extent(&self) -> Aabb {
            self.inner.spatial_extent()
        }
        fn time_range(&self) -> (FreeCoordinate, FreeCoordinate) {
            self.inner.time_range()
        }
    }

    fn cheap_crit_params() -> CritSearchParams {
        CritSearchParams {
            search_precision: (2.0f64).powi(-20),
            jacobi_precision: (2.0f64).powi(-5),
            cluster_precision: (2.0f64).powi(-2),
            max_steps: 100_000,
            continue_past_structures: false,
        }
    }

    /// Domain and search ranges placing a thin slab around `(1, 2, 0)` with the
    /// `tau` window straddling the rotation period.
    fn rotation_surface(flow: Arc<dyn Flow>) -> RecSurface {
        let period = 2.0 * std::f64::consts::PI;
        let domain = Aabb::new(Point3::new(0.985, 1.9, -0.1), Point3::new(1.015, 2.1, 0.1));
        RecSurface::new(
            flow,
            DataParams::new(domain, 0.01),
            SearchParams {
                t0_min: 0.0,
                t0_max: 0.1,
                tau_min: period - 0.05,
                tau_max: period + 0.05,
                dt: 0.1,
                prec: 0.001,
            },
        )
        .with_crit_params(cheap_crit_params())
    }

    #[test]
    fn miss_skips_integration_entirely() {
        let flow = Arc::new(CountingFlow {
            inner: TiltedRotation,
            calls: AtomicUsize::new(0),
        });
        let surface = rotation_surface(flow.clone());
        // A ray pointing away from the domain.
        let ray = Ray::new(Point3::new(5.0, 5.0, 5.0), Vector3::new(1.0, 0.0, 0.0));
        let (rsi, domain_hit) = surface.search_intersection(&ray, 0.0, FreeCoordinate::MAX);
        assert!(!domain_hit);
        assert!(rsi.hit.is_none() && rsi.rp.is_none());
        assert_eq!(flow.calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn domain_intersections_honor_end_at() {
        let surface = rotation_surface(Arc::new(TiltedRotation));
        let ray = Ray::new(Point3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 1.0, 0.0));
        let full = surface
            .domain_intersections(&ray, 0.0, FreeCoordinate::MAX)
            .unwrap();
        assert!(full.1 > 2.0);
        // Clipped before the domain: no intersection at all.
        assert!(surface.domain_intersections(&ray, 0.0, 1.5).is_none());
        // Clipped inside the domain: the exit is clamped.
        let clipped = surface.domain_intersections(&ray, 0.0, 2.0).unwrap();
        assert_eq!(clipped.1, 2.0);
    }

    #[test]
    fn search_finds_recirculation_and_reports_camera_distance() {
        let surface = rotation_surface(Arc::new(TiltedRotation));
        let origin = Point3::new(1.0, -1.0, 0.0);
        let ray = Ray::new(origin, Vector3::new(0.0, 1.0, 0.0));
        let (rsi, domain_hit) = surface.search_intersection(&ray, 0.0, FreeCoordinate::MAX);
        assert!(domain_hit);
        let rp = rsi.rp.expect("no recirculation point found");
        let hit = rsi.hit.unwrap();
        assert!((hit - (rp.pos - origin).magnitude()).abs() < 1e-12);
        assert!(surface.data_params().domain.contains(rp.pos));
        assert!(rp.tau >= surface.tunables().tau_min);
    }

    #[test]
    fn pruned_search_inverts_cleanly() {
        let surface = rotation_surface(Arc::new(TiltedRotation));
        let cam = PerspectiveCamera::new(
            Point3::new(1.0, -1.0, 0.0),
            Point3::new(1.0, 2.0, 0.0),
            40.0,
            8,
            6,
            CamUp::Z,
        );
        let progress = ProgressStore::new(8, 6);
        let ray = cam.ray(4.0, 3.0);
        // With an empty progress store nothing is "behind" any known pixel, so
        // the normal pruned pass tests nothing…
        let (skipped, _) =
            surface.search_intersection_pruned(&ray, &progress, &cam, &[], 0.0, FreeCoordinate::MAX, false);
        assert!(skipped.rp.is_none());
        // …and the inverted pass tests everything.
        let (inverted, _) =
            surface.search_intersection_pruned(&ray, &progress, &cam, &[], 0.0, FreeCoordinate::MAX, true);
        let (plain, _) = surface.search_intersection(&ray, 0.0, FreeCoordinate::MAX);
        assert_eq!(inverted.rp.is_some(), plain.rp.is_some());
    }

    #[test]
    fn normal_estimation_gives_up_with_zero() {
        // A drifting flow has no recirculation anywhere, so no neighbors can be
        // collected no matter how often the search retries.
        struct Drift;
        impl Flow for Drift {
            fn velocity(
                &self,
                _p: Point3<FreeCoordinate>,
                _t: FreeCoordinate,
            ) -> Option<Vector3<FreeCoordinate>> {
                Some(Vector3::new(1.0, 0.0, 0.0))
            }
            fn spatial_extent(&self) -> Aabb {
                Aabb::new(
                    Point3::new(-100.0, -100.0, -100.0),
                    Point3::new(100.0, 100.0, 100.0),
                )
            }
            fn time_range(&self) -> (FreeCoordinate, FreeCoordinate) {
                (FreeCoordinate::NEG_INFINITY, FreeCoordinate::INFINITY)
            }
        }
        let surface = RecSurface::new(
            Arc::new(Drift),
            DataParams::new(
                Aabb::new(Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0)),
                0.1,
            ),
            SearchParams {
                t0_min: 0.0,
                t0_max: 0.4,
                tau_min: 0.0,
                tau_max: 1.0,
                dt: 0.2,
                prec: 0.001,
            },
        )
        .with_crit_params(cheap_crit_params());
        let rp = RecPoint {
            pos: Point3::new(0.0, 0.0, 0.0),
            t0: 0.2,
            tau: 0.5,
        };
        let ray = Ray::new(Point3::new(0.0, 0.0, 5.0), Vector3::new(0.0, 0.0, -1.0));
        let normal = surface.estimate_flow_normal(&rp, &ray, 0.005, 2);
        assert_eq!(normal, Vector3::zero());
    }

    #[test]
    fn search_params_defaults_tie_into_the_tunables() {
        let params = SearchParams::default();
        assert_eq!(params.t0_max, 14.8);
        assert_eq!(params.tau_min, 0.2);
        assert_eq!(params.dt, 0.2);
        assert_eq!(params.prec, Tunables::default().search_prec);
    }

    #[test]
    fn neighboring_classification() {
        let tunables = Tunables::default();
        let ray1 = Ray::new(Point3::new(0.0, 0.0, 5.0), Vector3::new(0.0, 0.0, -1.0));
        let ray2 = Ray::new(Point3::new(0.1, 0.0, 5.0), Vector3::new(0.0, 0.0, -1.0));
        let make = |ray: Ray, pos: Point3<FreeCoordinate>, t0: f64, tau: f64| RSIntersection {
            cam_index: 0,
            ray,
            hit: Some((pos - ray.origin()).magnitude()),
            rp: Some(RecPoint { pos, t0, tau }),
        };

        let a = make(ray1, Point3::new(0.0, 0.0, 0.0), 1.0, 2.0);
        // Same depth, close in time: neighbors.
        let b = make(ray2, Point3::new(0.1, 0.0, 0.0), 1.01, 2.01);
        assert!(a.is_neighboring(&b, &tunables));
        // Wildly different t0: the time dimensions are incompatible.
        let c = make(ray2, Point3::new(0.1, 0.0, 0.0), 9.0, 2.0);
        assert!(!a.is_neighboring(&c, &tunables));
        // Same rays but vastly different depth: the angle test rejects.
        let d = make(ray2, Point3::new(0.1, 0.0, -3.0), 1.0, 2.0);
        assert!(!a.is_neighboring(&d, &tunables));
        // Missing points are never neighbors.
        let e = RSIntersection::empty(1, ray2);
        assert!(!a.is_neighboring(&e, &tunables));
    }
}
