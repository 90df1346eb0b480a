// Copyright 2020-2021 Kevin Reid under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Ordinary renderable scene objects and their reflectance model, as opposed to
//! the recirculation surface, which has its own search machinery.

use cgmath::{InnerSpace as _, Point2, Point3, Vector3, Zero as _};

use crate::math::{FreeCoordinate, Rgb};
use crate::raycast::{reflect, Aabb, Ray};
use crate::texture::Texture;

/// Where a renderable yields its surface color from.
#[derive(Clone, Debug)]
pub enum ColorSource {
    Constant(Rgb),
    Texture(Texture),
}

impl ColorSource {
    pub fn sample(&self, uv: Point2<FreeCoordinate>) -> Rgb {
        match self {
            ColorSource::Constant(c) => *c,
            ColorSource::Texture(t) => t.sample(uv.x, uv.y),
        }
    }
}

/// A directional light: parallel rays, constant spectral intensity.
#[derive(Clone, Debug)]
pub struct DirectionalLight {
    direction: Vector3<FreeCoordinate>,
    spectral_intensity: Rgb,
}

impl DirectionalLight {
    pub fn new(direction: Vector3<FreeCoordinate>) -> Self {
        Self::with_intensity(direction, Rgb::ONE)
    }

    pub fn with_intensity(direction: Vector3<FreeCoordinate>, spectral_intensity: Rgb) -> Self {
        Self {
            direction: direction.normalize(),
            spectral_intensity,
        }
    }

    /// The direction light travels toward `_pos` (independent of the position
    /// for a directional light).
    pub fn direction_to(&self, _pos: Point3<FreeCoordinate>) -> Vector3<FreeCoordinate> {
        self.direction
    }

    pub fn incident_radiance_at(&self, _pos: Point3<FreeCoordinate>) -> Rgb {
        self.spectral_intensity
    }

    pub fn spectral_intensity(&self) -> Rgb {
        self.spectral_intensity
    }
}

/// A ray/surface intersection record handed to shading.
#[derive(Clone, Copy, Debug)]
pub struct SurfaceHit {
    pub incident_ray: Ray,
    /// Position on the ray.
    pub t: FreeCoordinate,
    /// Position in space.
    pub position: Point3<FreeCoordinate>,
    pub normal: Vector3<FreeCoordinate>,
    /// Position on the renderable.
    pub uv: Point2<FreeCoordinate>,
}

/// Phong reflectance: ambient, diffuse and specular terms over a color source.
#[derive(Clone, Debug)]
pub struct Phong {
    albedo: ColorSource,
    k_ambient: FreeCoordinate,
    k_diffuse: FreeCoordinate,
    k_specular: FreeCoordinate,
    shininess: FreeCoordinate,
    ambient_light: Rgb,
}

impl Phong {
    pub fn new(
        albedo: ColorSource,
        k_ambient: FreeCoordinate,
        k_diffuse: FreeCoordinate,
        k_specular: FreeCoordinate,
        shininess: FreeCoordinate,
    ) -> Self {
        Self {
            albedo,
            k_ambient,
            k_diffuse,
            k_specular,
            shininess,
            ambient_light: Rgb::ONE,
        }
    }

    pub fn sample(&self, uv: Point2<FreeCoordinate>) -> Rgb {
        self.albedo.sample(uv)
    }

    /// Evaluates the reflectance for a hit. A zero normal yields the ambient
    /// term only (this is how shadows are rendered).
    pub fn shade(&self, light: &DirectionalLight, hit: &SurfaceHit) -> Rgb {
        let l = light.direction_to(hit.position).normalize();
        let n = hit.normal;
        let v = hit.incident_ray.direction();
        let r = reflect(l, n);
        let light_in = light.spectral_intensity();

        let i_ambient = self.ambient_light * self.k_ambient;

        let cos_nl = n.dot(-l).max(0.0);
        let i_diffuse = light_in * (self.k_diffuse * cos_nl);

        let cos_omega = (-v).dot(r).max(0.0);
        let spec_power = cos_omega.powf(self.shininess);
        let i_specular = light_in
            * (self.k_specular * (self.shininess + 2.0) / (2.0 * std::f64::consts::PI)
                * spec_power);

        self.albedo.sample(hit.uv) * (i_ambient + i_diffuse + i_specular)
    }
}

/// A renderable scene object. Currently the only kind is an axis-aligned box
/// (used as background geometry below the flow domain).
#[derive(Clone, Debug)]
pub enum Renderable {
    Box(BoxObject),
}

impl Renderable {
    pub fn surface_hit(&self, ray: &Ray, min_t: FreeCoordinate) -> Option<SurfaceHit> {
        match self {
            Renderable::Box(b) => b.surface_hit(ray, min_t),
        }
    }

    pub fn shade(&self, light: &DirectionalLight, hit: &SurfaceHit) -> Rgb {
        match self {
            Renderable::Box(b) => b.phong.shade(light, hit),
        }
    }

    pub fn sample(&self, uv: Point2<FreeCoordinate>) -> Rgb {
        match self {
            Renderable::Box(b) => b.phong.sample(uv),
        }
    }
}

/// A renderable axis-aligned box.
#[derive(Clone, Debug)]
pub struct BoxObject {
    aabb: Aabb,
    phong: Phong,
}

impl BoxObject {
    pub fn new(aabb: Aabb) -> Self {
        Self::with_phong(
            aabb,
            Phong::new(
                ColorSource::Constant(crate::rgb_const!(0.5, 0.5, 0.5)),
                0.8,
                0.4,
                0.3,
                3.0,
            ),
        )
    }

    pub fn with_phong(aabb: Aabb, phong: Phong) -> Self {
        Self { aabb, phong }
    }

    pub fn surface_hit(&self, ray: &Ray, min_t: FreeCoordinate) -> Option<SurfaceHit> {
        let hit = self.aabb.surface_hit(ray, min_t)?;
        Some(SurfaceHit {
            incident_ray: *ray,
            t: hit.t,
            position: hit.position,
            normal: hit.normal,
            uv: hit.uv,
        })
    }
}
