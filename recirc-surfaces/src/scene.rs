// Copyright 2020-2021 Kevin Reid under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! A scene: the recirculation surface, ordinary renderable objects, one
//! directional light, and the color encodings of the output textures.

use cgmath::{Point3, Vector3};

use crate::colormap;
use crate::math::{FreeCoordinate, Rgb};
use crate::objects::{Renderable, SurfaceHit};
use crate::raycast::Ray;
use crate::surface::{RSIntersection, RecSurface};

pub struct Scene {
    rec_surface: RecSurface,
    objects: Vec<Renderable>,
    light_direction: Vector3<FreeCoordinate>,
    background: Rgb,
}

impl Scene {
    pub fn new(rec_surface: RecSurface, light_direction: Vector3<FreeCoordinate>) -> Self {
        Self::with_background(rec_surface, light_direction, Rgb::ONE)
    }

    pub fn with_background(
        rec_surface: RecSurface,
        light_direction: Vector3<FreeCoordinate>,
        background: Rgb,
    ) -> Self {
        Self {
            rec_surface,
            objects: Vec::new(),
            light_direction,
            background,
        }
    }

    pub fn add_object(&mut self, object: Renderable) {
        self.objects.push(object);
    }

    pub fn rec_surface(&self) -> &RecSurface {
        &self.rec_surface
    }

    pub fn objects(&self) -> &[Renderable] {
        &self.objects
    }

    pub fn light_direction(&self) -> Vector3<FreeCoordinate> {
        self.light_direction
    }

    pub fn background(&self) -> Rgb {
        self.background
    }

    /// Color encoding of a `t0` value, scaled by the search range.
    pub fn t0_color(&self, t0: FreeCoordinate) -> Rgb {
        colormap::viridis(t0 / self.rec_surface.search_params().t0_max)
    }

    /// Color encoding of a `tau` value, scaled by the search range.
    pub fn tau_color(&self, tau: FreeCoordinate) -> Rgb {
        colormap::inferno(tau / self.rec_surface.search_params().tau_max)
    }

    /// The nearest intersection of the ray with any ordinary object.
    pub fn common_object_hit(
        &self,
        ray: &Ray,
        begin_at: FreeCoordinate,
    ) -> Option<(&Renderable, SurfaceHit)> {
        let mut result = None;
        let mut min_t = FreeCoordinate::MAX;
        for object in &self.objects {
            if let Some(hit) = object.surface_hit(ray, begin_at) {
                if hit.t < min_t {
                    min_t = hit.t;
                    result = Some((object, hit));
                }
            }
        }
        result
    }

    /// Colors the ray considering only ordinary objects (no recirculation
    /// search): object surface sample or background.
    pub fn raytrace_common_objects(&self, ray: &Ray, begin_at: FreeCoordinate) -> Rgb {
        match self.common_object_hit(ray, begin_at) {
            Some((object, hit)) => object.sample(hit.uv),
            None => self.background,
        }
    }

    /// Full raytracing of one ray: ordinary objects bound the search range,
    /// then the recirculation surface is queried. Fills `rsi` when a
    /// recirculation point is found and returns the `(t0, tau)` texture colors
    /// plus whether the flow domain was intersected at all.
    pub fn raytrace(
        &self,
        ray: &Ray,
        rsi: &mut RSIntersection,
        begin_at: FreeCoordinate,
        end_at: FreeCoordinate,
    ) -> ([Rgb; 2], bool) {
        let mut colors = [self.background, self.background];

        let mut search_end = end_at;
        if let Some((object, hit)) = self.common_object_hit(ray, begin_at) {
            let c = object.sample(hit.uv);
            colors = [c, c];
            search_end = search_end.min(hit.t);
        }

        let (found, domain_intersected) =
            self.rec_surface.search_intersection(ray, begin_at, search_end);
        if let Some(rp) = found.rp {
            rsi.hit = found.hit;
            colors = [self.t0_color(rp.t0), self.tau_color(rp.tau)];
            rsi.rp = Some(rp);
        }

        (colors, domain_intersected)
    }

    /// The 3D position the shadow pass has to test for a pixel: the
    /// recirculation point if one is stored, otherwise the nearest ordinary
    /// object hit.
    pub fn shadow_test_position(
        &self,
        stored: Option<&RSIntersection>,
        ray: &Ray,
    ) -> Option<Point3<FreeCoordinate>> {
        if let Some(rsi) = stored {
            if let Some(rp) = &rsi.rp {
                return Some(rp.pos);
            }
        }
        self.common_object_hit(ray, 0.0).map(|(_, hit)| hit.position)
    }
}
