// Copyright 2020-2021 Kevin Reid under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Pathline integration: an adaptive embedded Runge–Kutta scheme with dense
//! output, and the [`FlowSampler`] façade the search code talks to.

use cgmath::{EuclideanSpace as _, InnerSpace as _, Point3, Vector3};

use crate::flow::Flow;
use crate::math::FreeCoordinate;

/// Options of the adaptive integrator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IntegratorOptions {
    /// Maximum step size.
    pub hmax: FreeCoordinate,
    /// Minimum step size relative to the span being integrated; stepping below
    /// this aborts as unsuccessful.
    pub rsmin: FreeCoordinate,
    /// Absolute component of the error tolerance.
    pub abs_tol: FreeCoordinate,
    /// Relative component of the error tolerance.
    pub rel_tol: FreeCoordinate,
}

impl Default for IntegratorOptions {
    fn default() -> Self {
        Self {
            hmax: 0.01,
            rsmin: 0.00000005,
            abs_tol: 1e-9,
            rel_tol: 1e-7,
        }
    }
}

/// How an integration call ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IntegrationOutcome {
    /// The requested end time was reached.
    Ok,
    /// The flow had no data at a point the trajectory reached.
    OutOfDomain,
    /// The step cap was exhausted before the end time.
    StepsExceeded,
    /// The error control drove the step size below the minimum.
    Unsuccessful,
}

/// One accepted integration step: time, position, and the velocity there.
///
/// Storing the velocity makes cubic Hermite interpolation between knots
/// possible without re-evaluating the flow.
#[derive(Clone, Copy, Debug)]
pub struct Knot {
    pub t: FreeCoordinate,
    pub position: Point3<FreeCoordinate>,
    pub velocity: Vector3<FreeCoordinate>,
}

/// A dense pathline: the accepted steps of an integration, interpolated with a
/// cubic Hermite spline. Solutions only ever grow at the end (`tau` is
/// append-only for the callers in [`crate::hyper`]).
#[derive(Clone, Debug)]
pub struct PathlineSolution {
    knots: Vec<Knot>,
}

impl PathlineSolution {
    pub fn new(start: Knot) -> Self {
        Self { knots: vec![start] }
    }

    pub fn start_time(&self) -> FreeCoordinate {
        self.knots[0].t
    }

    pub fn end_time(&self) -> FreeCoordinate {
        self.knots[self.knots.len() - 1].t
    }

    pub fn end_knot(&self) -> Knot {
        self.knots[self.knots.len() - 1]
    }

    pub fn knot_count(&self) -> usize {
        self.knots.len()
    }

    fn push(&mut self, knot: Knot) {
        debug_assert!(knot.t > self.end_time());
        self.knots.push(knot);
    }

    /// The position at time `t`, or [`None`] outside the integrated span.
    pub fn evaluate(&self, t: FreeCoordinate) -> Option<Point3<FreeCoordinate>> {
        if t < self.start_time() || t > self.end_time() {
            return None;
        }
        // Index of the first knot with time > t; its predecessor starts the
        // containing interval.
        let after = self.knots.partition_point(|k| k.t <= t);
        if after == self.knots.len() {
            return Some(self.end_knot().position);
        }
        let k0 = self.knots[after - 1];
        let k1 = self.knots[after];
        let h = k1.t - k0.t;
        let s = (t - k0.t) / h;
        let s2 = s * s;
        let s3 = s2 * s;
        let p = k0.position.to_vec() * (2.0 * s3 - 3.0 * s2 + 1.0)
            + k0.velocity * (h * (s3 - 2.0 * s2 + s))
            + k1.position.to_vec() * (-2.0 * s3 + 3.0 * s2)
            + k1.velocity * (h * (s3 - s2));
        Some(Point3::from_vec(p))
    }
}

// Butcher tableau of the classic Fehlberg embedded pair: a fourth-order
// solution is propagated, the fifth-order companion provides the error
// estimate.
const A2: [FreeCoordinate; 1] = [1.0 / 4.0];
const A3: [FreeCoordinate; 2] = [3.0 / 32.0, 9.0 / 32.0];
const A4: [FreeCoordinate; 3] = [1932.0 / 2197.0, -7200.0 / 2197.0, 7296.0 / 2197.0];
const A5: [FreeCoordinate; 4] = [439.0 / 216.0, -8.0, 3680.0 / 513.0, -845.0 / 4104.0];
const A6: [FreeCoordinate; 5] = [
    -8.0 / 27.0,
    2.0,
    -3544.0 / 2565.0,
    1859.0 / 4104.0,
    -11.0 / 40.0,
];
const C: [FreeCoordinate; 6] = [0.0, 1.0 / 4.0, 3.0 / 8.0, 12.0 / 13.0, 1.0, 1.0 / 2.0];
const B4: [FreeCoordinate; 6] = [
    25.0 / 216.0,
    0.0,
    1408.0 / 2565.0,
    2197.0 / 4104.0,
    -1.0 / 5.0,
    0.0,
];
const B5: [FreeCoordinate; 6] = [
    16.0 / 135.0,
    0.0,
    6656.0 / 12825.0,
    28561.0 / 56430.0,
    -9.0 / 50.0,
    2.0 / 55.0,
];

/// Samples pathlines of a [`Flow`] by adaptive integration.
///
/// All integration performed by the search starts inside the flow's domain, so
/// an out-of-domain result is a logic error and asserted against.
pub struct FlowSampler<'a> {
    flow: &'a dyn Flow,
    options: IntegratorOptions,
}

impl<'a> FlowSampler<'a> {
    pub fn new(flow: &'a dyn Flow) -> Self {
        Self {
            flow,
            options: IntegratorOptions::default(),
        }
    }

    pub fn with_options(flow: &'a dyn Flow, options: IntegratorOptions) -> Self {
        Self { flow, options }
    }

    pub fn flow(&self) -> &dyn Flow {
        self.flow
    }

    /// Integrates the pathline seeded at `position` from `t0` for a duration of
    /// `tau`, producing a dense solution (possibly partial when the outcome is
    /// not [`IntegrationOutcome::Ok`]).
    pub fn sample_flow(
        &self,
        position: Point3<FreeCoordinate>,
        t0: FreeCoordinate,
        tau: FreeCoordinate,
        max_steps: Option<usize>,
    ) -> (PathlineSolution, IntegrationOutcome) {
        let velocity = self.flow.velocity(position, t0);
        assert!(
            velocity.is_some(),
            "integration seeded outside the flow domain"
        );
        let mut solution = PathlineSolution::new(Knot {
            t: t0,
            position,
            velocity: velocity.unwrap(),
        });
        let outcome = self.advance(&mut solution, t0 + tau, max_steps);
        assert_ne!(
            outcome,
            IntegrationOutcome::OutOfDomain,
            "integration left the flow domain although it started inside"
        );
        (solution, outcome)
    }

    /// Extends an existing solution up to `target_time` (a no-op if the
    /// solution already reaches it).
    pub fn extend(
        &self,
        solution: &mut PathlineSolution,
        target_time: FreeCoordinate,
        max_steps: Option<usize>,
    ) -> IntegrationOutcome {
        let outcome = self.advance(solution, target_time, max_steps);
        assert_ne!(
            outcome,
            IntegrationOutcome::OutOfDomain,
            "integration left the flow domain although it started inside"
        );
        outcome
    }

    fn advance(
        &self,
        solution: &mut PathlineSolution,
        t_end: FreeCoordinate,
        max_steps: Option<usize>,
    ) -> IntegrationOutcome {
        let opts = &self.options;
        let t_begin = solution.end_time();
        if t_end <= t_begin {
            return IntegrationOutcome::Ok;
        }
        let h_min = (t_end - solution.start_time()) * opts.rsmin;

        let mut t = t_begin;
        let mut y = solution.end_knot().position;
        let mut k1 = solution.end_knot().velocity;
        let mut h = opts.hmax.min(t_end - t);
        let mut steps = 0usize;

        loop {
            let last_step = t + h >= t_end;
            if last_step {
                h = t_end - t;
            }

            let eval = |ti: FreeCoordinate, yi: Point3<FreeCoordinate>| self.flow.velocity(yi, ti);
            let stages = (|| {
                let k2 = eval(t + C[1] * h, y + k1 * (A2[0] * h))?;
                let k3 = eval(t + C[2] * h, y + (k1 * A3[0] + k2 * A3[1]) * h)?;
                let k4 = eval(t + C[3] * h, y + (k1 * A4[0] + k2 * A4[1] + k3 * A4[2]) * h)?;
                let k5 = eval(
                    t + C[4] * h,
                    y + (k1 * A5[0] + k2 * A5[1] + k3 * A5[2] + k4 * A5[3]) * h,
                )?;
                let k6 = eval(
                    t + C[5] * h,
                    y + (k1 * A6[0] + k2 * A6[1] + k3 * A6[2] + k4 * A6[3] + k5 * A6[4]) * h,
                )?;
                Some([k2, k3, k4, k5, k6])
            })();
            // k2 does not appear in either solution; its weight is zero in both
            // rows of the tableau.
            let [_k2, k3, k4, k5, k6] = match stages {
                Some(v) => v,
                None => return IntegrationOutcome::OutOfDomain,
            };

            let y4 = y + (k1 * B4[0] + k3 * B4[2] + k4 * B4[3] + k5 * B4[4]) * h;
            let y5 = y + (k1 * B5[0] + k3 * B5[2] + k4 * B5[3] + k5 * B5[4] + k6 * B5[5]) * h;
            let err = (y5 - y4).magnitude();
            let scale = opts.abs_tol
                + opts.rel_tol * y.to_vec().magnitude().max(y4.to_vec().magnitude());

            if err <= scale {
                // Accept the step.
                t = if last_step { t_end } else { t + h };
                y = y4;
                k1 = match self.flow.velocity(y, t) {
                    Some(v) => v,
                    None => return IntegrationOutcome::OutOfDomain,
                };
                solution.push(Knot {
                    t,
                    position: y,
                    velocity: k1,
                });
                if last_step {
                    return IntegrationOutcome::Ok;
                }
            }

            // Standard fourth-order step-size controller.
            let factor = if err > 0.0 {
                (0.9 * (scale / err).powf(0.25)).clamp(0.2, 5.0)
            } else {
                5.0
            };
            h = (h * factor).min(opts.hmax);
            if h < h_min {
                return IntegrationOutcome::Unsuccessful;
            }

            steps += 1;
            if let Some(cap) = max_steps {
                if steps >= cap {
                    return IntegrationOutcome::StepsExceeded;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raycast::Aabb;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Solid-body rotation around the z axis: every pathline is a circle with
    /// period `2π/omega`.
    struct RotationFlow {
        omega: FreeCoordinate,
    }

    impl Flow for RotationFlow {
        fn velocity(
            &self,
            p: Point3<FreeCoordinate>,
            _t: FreeCoordinate,
        ) -> Option<Vector3<FreeCoordinate>> {
            Some(Vector3::new(-self.omega * p.y, self.omega * p.x, 0.0))
        }
        fn spatial_extent(&self) -> Aabb {
            Aabb::new(Point3::new(-10.0, -10.0, -10.0), Point3::new(10.0, 10.0, 10.0))
        }
        fn time_range(&self) -> (FreeCoordinate, FreeCoordinate) {
            (FreeCoordinate::NEG_INFINITY, FreeCoordinate::INFINITY)
        }
    }

    struct CountingFlow {
        inner: RotationFlow,
        calls: AtomicUsize,
    }

    impl Flow for CountingFlow {
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

    struct NowhereFlow;
    impl Flow for NowhereFlow {
        fn velocity(
            &self,
            _p: Point3<FreeCoordinate>,
            _t: FreeCoordinate,
        ) -> Option<Vector3<FreeCoordinate>> {
            None
        }
        fn spatial_extent(&self) -> Aabb {
            Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0))
        }
        fn time_range(&self) -> (FreeCoordinate, FreeCoordinate) {
            (0.0, 1.0)
        }
    }

    #[test]
    fn rotation_round_trip() {
        let flow = RotationFlow { omega: 1.0 };
        let sampler = FlowSampler::new(&flow);
        let start = Point3::new(1.0, 0.0, 0.0);
        let period = 2.0 * std::f64::consts::PI;
        let (solution, outcome) = sampler.sample_flow(start, 0.0, period, None);
        assert_eq!(outcome, IntegrationOutcome::Ok);
        let end = solution.evaluate(period).unwrap();
        assert!(
            (end - start).magnitude() < 1e-5,
            "did not close the circle: {:?}",
            end
        );
        // The quarter turn should be at (0, 1, 0).
        let quarter = solution.evaluate(period / 4.0).unwrap();
        assert!((quarter - Point3::new(0.0, 1.0, 0.0)).magnitude() < 1e-5);
    }

    #[test]
    fn hmax_is_respected() {
        let flow = RotationFlow { omega: 1.0 };
        let sampler = FlowSampler::new(&flow);
        let (solution, _) = sampler.sample_flow(Point3::new(1.0, 0.0, 0.0), 0.0, 0.1, None);
        assert!(solution.knot_count() >= 10);

        // A larger step bound produces a sparser solution over the same span.
        let coarse = FlowSampler::with_options(
            &flow,
            IntegratorOptions {
                hmax: 0.05,
                ..IntegratorOptions::default()
            },
        );
        let (sparse, _) = coarse.sample_flow(Point3::new(1.0, 0.0, 0.0), 0.0, 0.1, None);
        assert!(sparse.knot_count() < solution.knot_count());
    }

    #[test]
    fn extension_is_append_only_and_continuous() {
        let flow = RotationFlow { omega: 1.0 };
        let sampler = FlowSampler::new(&flow);
        let (mut solution, _) = sampler.sample_flow(Point3::new(1.0, 0.0, 0.0), 0.0, 0.5, None);
        let knots_before = solution.knot_count();
        let mid = solution.evaluate(0.3).unwrap();

        assert_eq!(
            sampler.extend(&mut solution, 1.0, None),
            IntegrationOutcome::Ok
        );
        assert!(solution.knot_count() > knots_before);
        assert!((solution.end_time() - 1.0).abs() < 1e-12);
        // The already-integrated part is untouched.
        assert_eq!(solution.evaluate(0.3).unwrap(), mid);
        // Extending to a time already covered is a no-op.
        assert_eq!(
            sampler.extend(&mut solution, 0.7, None),
            IntegrationOutcome::Ok
        );
    }

    #[test]
    fn step_cap() {
        let flow = RotationFlow { omega: 1.0 };
        let sampler = FlowSampler::new(&flow);
        let (solution, outcome) = sampler.sample_flow(Point3::new(1.0, 0.0, 0.0), 0.0, 10.0, Some(5));
        assert_eq!(outcome, IntegrationOutcome::StepsExceeded);
        assert!(solution.end_time() < 10.0);
    }

    #[test]
    fn evaluate_outside_span() {
        let flow = RotationFlow { omega: 1.0 };
        let sampler = FlowSampler::new(&flow);
        let (solution, _) = sampler.sample_flow(Point3::new(1.0, 0.0, 0.0), 1.0, 1.0, None);
        assert!(solution.evaluate(0.5).is_none());
        assert!(solution.evaluate(2.5).is_none());
        assert!(solution.evaluate(1.0).is_some());
    }

    #[test]
    fn integration_evaluates_the_flow() {
        let flow = CountingFlow {
            inner: RotationFlow { omega: 1.0 },
            calls: AtomicUsize::new(0),
        };
        let sampler = FlowSampler::new(&flow);
        let _ = sampler.sample_flow(Point3::new(1.0, 0.0, 0.0), 0.0, 0.1, None);
        assert!(flow.calls.load(Ordering::Relaxed) > 0);
    }

    #[test]
    #[should_panic]
    fn out_of_domain_seed_is_fatal() {
        let flow = NowhereFlow;
        let sampler = FlowSampler::new(&flow);
        let _ = sampler.sample_flow(Point3::new(0.5, 0.5, 0.5), 0.0, 0.5, None);
    }
}
