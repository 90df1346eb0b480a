// Copyright 2020-2021 Kevin Reid under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Hyper-points and hyper-lines: ray segments decorated with integrated
//! pathlines, and the recirculation-point search inside one segment.

use std::cell::RefCell;
use std::rc::Rc;

use cgmath::{InnerSpace as _, Point3, Vector3};

use crate::config::Tunables;
use crate::cuboid::VectorCuboid;
use crate::extract::CritExtractor;
use crate::integrate::{FlowSampler, IntegrationOutcome, PathlineSolution};
use crate::math::FreeCoordinate;
use crate::surface::{RecPoint, SearchParams};

struct CachedPathline {
    t0: FreeCoordinate,
    solution: PathlineSolution,
    /// Set when an extension attempt failed; the solution will never reach
    /// farther than it currently does.
    exhausted: bool,
}

/// A spatial point together with its integrated pathlines, grown lazily as
/// queries require them.
///
/// Consecutive hyper-lines along a ray share their common endpoint (via [`Rc`]),
/// so pathlines integrated for one segment are reused by the next. The cache is
/// keyed by the `t0` seed and append-only in `tau`.
pub struct HyperPoint {
    position: Point3<FreeCoordinate>,
    pathlines: RefCell<Vec<CachedPathline>>,
}

impl HyperPoint {
    pub fn new(position: Point3<FreeCoordinate>) -> Self {
        Self {
            position,
            pathlines: RefCell::new(Vec::new()),
        }
    }

    pub fn shared(position: Point3<FreeCoordinate>) -> Rc<Self> {
        Rc::new(Self::new(position))
    }

    pub fn position(&self) -> Point3<FreeCoordinate> {
        self.position
    }

    /// `Φ(p, t0; tau) − p`: where the pathline seeded here at `t0` has moved to
    /// after `tau`, relative to this point. [`None`] if the pathline could not
    /// be integrated that far.
    pub fn flow_return(
        &self,
        sampler: &FlowSampler<'_>,
        t0: FreeCoordinate,
        tau: FreeCoordinate,
    ) -> Option<Vector3<FreeCoordinate>> {
        let target = t0 + tau;
        let mut cache = self.pathlines.borrow_mut();
        let index = match cache.iter().position(|e| (e.t0 - t0).abs() < 1e-12) {
            Some(i) => i,
            None => {
                let (solution, _) = sampler.sample_flow(self.position, t0, 0.0, None);
                cache.push(CachedPathline {
                    t0,
                    solution,
                    exhausted: false,
                });
                cache.len() - 1
            }
        };
        let entry = &mut cache[index];
        if entry.solution.end_time() < target && !entry.exhausted {
            if sampler.extend(&mut entry.solution, target, None) != IntegrationOutcome::Ok {
                entry.exhausted = true;
            }
        }
        entry
            .solution
            .evaluate(target)
            .map(|phi| phi - self.position)
    }

    #[cfg(test)]
    fn cached_pathline_count(&self) -> usize {
        self.pathlines.borrow().len()
    }
}

impl std::fmt::Debug for HyperPoint {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("HyperPoint")
            .field("position", &self.position)
            .field("pathlines", &self.pathlines.borrow().len())
            .finish()
    }
}

/// A ray segment between two [`HyperPoint`]s, forming (together with the `t0`
/// and `tau` search ranges) the 5D region one recirculation search covers.
#[derive(Clone, Debug)]
pub struct HyperLine {
    a: Rc<HyperPoint>,
    b: Rc<HyperPoint>,
}

impl HyperLine {
    pub fn new(a: Rc<HyperPoint>, b: Rc<HyperPoint>) -> Self {
        debug_assert!(
            a.position() != b.position(),
            "degenerate hyper-line at {:?}",
            a.position()
        );
        Self { a, b }
    }

    pub fn from_positions(a: Point3<FreeCoordinate>, b: Point3<FreeCoordinate>) -> Self {
        Self::new(HyperPoint::shared(a), HyperPoint::shared(b))
    }

    pub fn point_a(&self) -> &Rc<HyperPoint> {
        &self.a
    }

    pub fn point_b(&self) -> &Rc<HyperPoint> {
        &self.b
    }

    pub fn length(&self) -> FreeCoordinate {
        (self.b.position() - self.a.position()).magnitude()
    }

    /// The flow-return field of the segment: linear interpolation between the
    /// endpoint returns at `s ∈ [0, 1]`.
    pub fn sample(
        &self,
        sampler: &FlowSampler<'_>,
        s: FreeCoordinate,
        t0: FreeCoordinate,
        tau: FreeCoordinate,
    ) -> Option<Vector3<FreeCoordinate>> {
        let ra = self.a.flow_return(sampler, t0, tau)?;
        let rb = self.b.flow_return(sampler, t0, tau)?;
        Some(ra * (1.0 - s) + rb * s)
    }

    /// All recirculation points on this segment within the configured `t0` and
    /// `tau` ranges.
    ///
    /// The `(t0, tau)` plane is covered in cells of `search.dt`; inside a cell
    /// the segment is bisected spatially (with fresh pathline integration at
    /// each split point) until it is shorter than `search.prec`, and the
    /// remaining cell is handed to the extractor, whose subdivision operates on
    /// the trilinear model of the eight corner returns. Every candidate the
    /// extractor reports is then verified against the true field: its
    /// flow-return residual must stay within `search.prec`, and cells with
    /// failing candidates are re-searched on halved time axes.
    pub fn recirculation_points(
        &self,
        sampler: &FlowSampler<'_>,
        extractor: &CritExtractor,
        search: &SearchParams,
        tunables: &Tunables,
        stop_at_first: bool,
    ) -> Vec<RecPoint> {
        let mut found = Vec::new();
        let tau_start = search.tau_min.max(tunables.tau_min);
        if search.t0_max <= search.t0_min || search.tau_max <= tau_start || search.dt <= 0.0 {
            return found;
        }

        let t0_cells = ((search.t0_max - search.t0_min) / search.dt).ceil() as usize;
        let tau_cells = ((search.tau_max - tau_start) / search.dt).ceil() as usize;
        'grid: for i in 0..t0_cells.max(1) {
            let t0_lo = search.t0_min + i as FreeCoordinate * search.dt;
            let t0_hi = (t0_lo + search.dt).min(search.t0_max);
            for j in 0..tau_cells.max(1) {
                let tau_lo = tau_start + j as FreeCoordinate * search.dt;
                let tau_hi = (tau_lo + search.dt).min(search.tau_max);
                let stop = self.search_cell(
                    sampler,
                    extractor,
                    search,
                    tunables,
                    &self.a,
                    &self.b,
                    (t0_lo, t0_hi),
                    (tau_lo, tau_hi),
                    0,
                    stop_at_first,
                    &mut found,
                );
                if stop {
                    break 'grid;
                }
            }
        }
        found
    }

    /// Searches one `(t0, tau)` cell of one (sub-)segment. Returns whether the
    /// caller should stop (`stop_at_first` satisfied).
    #[allow(clippy::too_many_arguments)]
    fn search_cell(
        &self,
        sampler: &FlowSampler<'_>,
        extractor: &CritExtractor,
        search: &SearchParams,
        tunables: &Tunables,
        a: &Rc<HyperPoint>,
        b: &Rc<HyperPoint>,
        (t0_lo, t0_hi): (FreeCoordinate, FreeCoordinate),
        (tau_lo, tau_hi): (FreeCoordinate, FreeCoordinate),
        time_depth: usize,
        stop_at_first: bool,
        found: &mut Vec<RecPoint>,
    ) -> bool {
        // Cap on time-axis bisections of a cell whose candidates keep failing
        // residual verification; at this depth only the verified candidates
        // are reported.
        const MAX_TIME_REFINEMENTS: usize = 6;

        // Corner i: bit 0 = endpoint (a/b), bit 1 = t0 (lo/hi), bit 2 = tau.
        let mut corners = [Vector3::new(0.0, 0.0, 0.0); 8];
        for (i, corner) in corners.iter_mut().enumerate() {
            let endpoint = if i & 1 == 0 { a } else { b };
            let t0 = if (i >> 1) & 1 == 0 { t0_lo } else { t0_hi };
            let tau = if (i >> 2) & 1 == 0 { tau_lo } else { tau_hi };
            match endpoint.flow_return(sampler, t0, tau) {
                Some(r) => *corner = r,
                // A pathline that cannot be integrated across the cell makes the
                // cell unusable; skip it.
                None => return false,
            }
        }
        let cuboid = VectorCuboid::new(corners);
        if cuboid.signs_uniform() {
            return false;
        }

        let segment = b.position() - a.position();
        let segment_len = segment.magnitude();
        if segment_len > search.prec {
            // Refine spatially with real integration before trusting the
            // trilinear model.
            let mid = HyperPoint::shared(a.position() + segment / 2.0);
            return self.search_cell(
                sampler,
                extractor,
                search,
                tunables,
                a,
                &mid,
                (t0_lo, t0_hi),
                (tau_lo, tau_hi),
                time_depth,
                stop_at_first,
                found,
            ) || self.search_cell(
                sampler,
                extractor,
                search,
                tunables,
                &mid,
                b,
                (t0_lo, t0_hi),
                (tau_lo, tau_hi),
                time_depth,
                stop_at_first,
                found,
            );
        }

        // Map the extractor's relative centers back to phase space, then check
        // each candidate against the true field: the trilinear model misplaces
        // roots (and can invent them) when the time cell is coarse relative to
        // the flow.
        let elements = extractor.crit_elements(&cuboid);
        let mut verified = Vec::new();
        let mut any_rejected = false;
        for center in elements.points.iter().chain(elements.structures.iter()) {
            let position = a.position() + segment * center.x;
            let t0 = t0_lo + center.y * (t0_hi - t0_lo);
            let tau = tau_lo + center.z * (tau_hi - tau_lo);
            if tau < tunables.tau_min {
                continue;
            }
            let residual = HyperPoint::new(position).flow_return(sampler, t0, tau);
            match residual {
                Some(r) if r.magnitude() <= search.prec => {
                    verified.push(RecPoint { pos: position, t0, tau });
                }
                _ => any_rejected = true,
            }
        }

        if any_rejected && time_depth < MAX_TIME_REFINEMENTS {
            // Halve both time axes and search again; candidates that verified
            // here are re-found (more accurately) at the finer level, so none
            // are reported twice.
            let t0_mid = (t0_lo + t0_hi) / 2.0;
            let tau_mid = (tau_lo + tau_hi) / 2.0;
            for &(t0_range, tau_range) in &[
                ((t0_lo, t0_mid), (tau_lo, tau_mid)),
                ((t0_mid, t0_hi), (tau_lo, tau_mid)),
                ((t0_lo, t0_mid), (tau_mid, tau_hi)),
                ((t0_mid, t0_hi), (tau_mid, tau_hi)),
            ] {
                let stop = self.search_cell(
                    sampler,
                    extractor,
                    search,
                    tunables,
                    a,
                    b,
                    t0_range,
                    tau_range,
                    time_depth + 1,
                    stop_at_first,
                    found,
                );
                if stop {
                    return true;
                }
            }
            return false;
        }

        for rp in verified {
            let duplicate = found.iter().any(|other: &RecPoint| {
                (other.pos - rp.pos).magnitude() <= tunables.rec_point_equal
                    && (other.t0 - rp.t0).abs() <= tunables.t0_equal
                    && (other.tau - rp.tau).abs() <= tunables.tau_equal
            });
            if duplicate {
                continue;
            }
            debug_assert!(rp.tau >= tunables.tau_min);
            found.push(rp);
            if stop_at_first {
                return true;
            }
        }
        false
    }
}
