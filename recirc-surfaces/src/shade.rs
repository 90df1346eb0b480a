// Copyright 2020-2021 Kevin Reid under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Shading on top of a finished render pass: per-pixel normal estimation,
//! shadow tests along light rays (pruned by the already-computed primary
//! rays), iterative shadow sharpening, and the final texture composition.

use std::fs;
use std::io::{self, Write as _};
use std::iter::Sum;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};

use cgmath::{InnerSpace as _, Point2, Vector3, Zero as _};
use rayon::iter::{IntoParallelIterator as _, ParallelIterator as _};

use crate::config;
use crate::math::{surface_normal, FreeCoordinate, Rgb};
use crate::objects::{ColorSource, DirectionalLight, Phong, SurfaceHit};
use crate::raycast::Ray;
use crate::render::Raytracer;
use crate::texture::Texture;

/// How per-pixel surface normals are obtained.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display, strum::EnumIter)]
pub enum NormalStrategy {
    /// Triangles over the 5D-neighboring results of the four pixel neighbors.
    Neighbors,
    /// Fresh hyper-line sampling around the recirculation point.
    Sampling,
    /// Neighbors first, sampling where that fails.
    Hybrid,
    /// No normals; resets the shader.
    None,
}

impl NormalStrategy {
    fn suffix(self) -> Option<&'static str> {
        match self {
            NormalStrategy::Neighbors => Some("ne"),
            NormalStrategy::Sampling => Some("sa"),
            NormalStrategy::Hybrid => Some("hy"),
            NormalStrategy::None => None,
        }
    }
}

/// Counters of a shading pass.
#[derive(Clone, Copy, Debug, Default)]
struct PassInfo {
    attempted: usize,
    successful: usize,
}

impl AddAssign for PassInfo {
    fn add_assign(&mut self, other: Self) {
        self.attempted += other.attempted;
        self.successful += other.successful;
    }
}

impl Sum for PassInfo {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        let mut sum = Self::default();
        for part in iter {
            sum += part;
        }
        sum
    }
}

/// Computes shaded versions of a raytracer's output textures.
///
/// The shader only reads the raytracer (its progress store and textures); its
/// own state, normals and the shadow bitmap, can be persisted to sidecar
/// files to skip recomputation across runs.
pub struct Shader<'a> {
    rt: &'a Raytracer,
    save_dir: PathBuf,
    normals: Vec<Vector3<FreeCoordinate>>,
    in_shadow: Vec<bool>,
    normals_ready: bool,
    shadows_ready: bool,
    shadows_sharp: bool,
    phong_t0: Phong,
    phong_tau: Phong,
    light: DirectionalLight,
    background: Rgb,
    strategy: NormalStrategy,
}

impl<'a> Shader<'a> {
    pub fn new(rt: &'a Raytracer, save_dir: PathBuf) -> Self {
        Self::with_lighting(rt, save_dir, Rgb::ONE, 1.0)
    }

    pub fn with_lighting(
        rt: &'a Raytracer,
        save_dir: PathBuf,
        background: Rgb,
        intensity: FreeCoordinate,
    ) -> Self {
        let total = rt.camera().pixel_count();
        Self {
            rt,
            save_dir,
            normals: vec![Vector3::zero(); total],
            in_shadow: vec![false; total],
            normals_ready: false,
            shadows_ready: false,
            shadows_sharp: false,
            phong_t0: Phong::new(
                ColorSource::Texture(rt.texture_t0().clone()),
                0.6,
                0.5,
                0.2,
                5.0,
            ),
            phong_tau: Phong::new(
                ColorSource::Texture(rt.texture_tau().clone()),
                0.6,
                0.5,
                0.2,
                5.0,
            ),
            light: DirectionalLight::with_intensity(
                rt.scene().light_direction(),
                Rgb::ONE * intensity,
            ),
            background,
            strategy: NormalStrategy::None,
        }
    }

    pub fn normals_ready(&self) -> bool {
        self.normals_ready
    }

    pub fn shadows_ready(&self) -> bool {
        self.shadows_ready
    }

    pub fn shadows_sharp(&self) -> bool {
        self.shadows_sharp
    }

    pub fn strategy(&self) -> NormalStrategy {
        self.strategy
    }

    pub fn in_shadow(&self) -> &[bool] {
        &self.in_shadow
    }

    /// Computes per-pixel normals with the given strategy.
    /// [`NormalStrategy::None`] resets the shader instead.
    pub fn calc_normals(&mut self, strategy: NormalStrategy) {
        if strategy == NormalStrategy::None {
            log::info!("resetting normals");
            for n in self.normals.iter_mut() {
                *n = Vector3::zero();
            }
            self.normals_ready = false;
            self.strategy = NormalStrategy::None;
            return;
        }
        if strategy == self.strategy {
            log::info!("normals for {} already loaded", strategy);
            return;
        }

        let this = &*self;
        let total = this.rt.camera().pixel_count();
        let (normals, info): (Vec<_>, rayon_helper::ParExtSum<PassInfo>) = (0..total)
            .into_par_iter()
            .map(|cam_index| this.normal_for_pixel(cam_index, strategy))
            .unzip();
        let info = info.result();
        log::info!(
            "normals by {}: {} / {} successful",
            strategy,
            info.successful,
            info.attempted
        );

        self.normals = normals;
        self.normals_ready = true;
        self.strategy = strategy;
        if let Err(e) = self.save_normals() {
            log::warn!("saving normals failed: {}", e);
        }
    }

    fn normal_for_pixel(
        &self,
        cam_index: usize,
        strategy: NormalStrategy,
    ) -> (Vector3<FreeCoordinate>, PassInfo) {
        let rsi = match self.rt.progress().get_index(cam_index) {
            Some(rsi) => rsi,
            None => return (Vector3::zero(), PassInfo::default()),
        };
        let mut normal = Vector3::zero();
        if strategy != NormalStrategy::Sampling {
            normal = self.estimate_normal_from_neighbors(cam_index);
        }
        if strategy != NormalStrategy::Neighbors && normal.is_zero() {
            normal = self.rt.scene().rec_surface().estimate_flow_normal(
                rsi.rp.as_ref().expect("stored intersection without point"),
                &rsi.ray,
                self.rt.scene().rec_surface().tunables().normal_search_dis,
                self.rt.scene().rec_surface().tunables().normal_max_steps,
            );
        }
        (
            normal,
            PassInfo {
                attempted: 1,
                successful: usize::from(!normal.is_zero()),
            },
        )
    }

    /// Normal from the 5D-neighboring results of the four pixel neighbors:
    /// every consecutive pair of accepted neighbors spans a triangle with the
    /// center point, and the triangle normals are averaged.
    fn estimate_normal_from_neighbors(&self, cam_index: usize) -> Vector3<FreeCoordinate> {
        let progress = self.rt.progress();
        let (x, y) = self.rt.camera().position_for_index(cam_index);
        let (x, y) = (x as i64, y as i64);
        let rsi = match progress.get(x, y) {
            Some(rsi) => rsi,
            None => return Vector3::zero(),
        };
        let tunables = self.rt.scene().rec_surface().tunables();

        let neighbors = [
            progress.get(x, y - 1),
            progress.get(x - 1, y),
            progress.get(x, y + 1),
            progress.get(x + 1, y),
        ]
        .map(|n| n.filter(|n| rsi.is_neighboring(n, tunables)));

        let p0 = rsi.rp.as_ref().expect("stored intersection without point").pos;
        let mut normal = Vector3::zero();
        for i in 0..4 {
            if let (Some(n1), Some(n2)) = (neighbors[i], neighbors[(i + 1) % 4]) {
                let p1 = n1.rp.as_ref().unwrap().pos;
                let p2 = n2.rp.as_ref().unwrap().pos;
                let mut n = surface_normal(p0, p1, p2);
                if n.dot(rsi.ray.direction()) > 0.0 {
                    n = -n;
                }
                normal += n;
            }
        }
        if normal.is_zero() {
            return normal;
        }
        normal.normalize()
    }

    /// Computes the shadow bitmap: one light-ray test per pixel that has either
    /// a recirculation point or an ordinary object hit.
    pub fn calc_shadows(&mut self) {
        if self.shadows_ready {
            log::info!("shadows already available");
            return;
        }
        let this = &*self;
        let total = this.rt.camera().pixel_count();
        let (in_shadow, info): (Vec<_>, rayon_helper::ParExtSum<PassInfo>) = (0..total)
            .into_par_iter()
            .map(|cam_index| {
                let ray = this.rt.camera().ray_for_index(cam_index);
                let position = this
                    .rt
                    .scene()
                    .shadow_test_position(this.rt.progress().get_index(cam_index), &ray);
                match position {
                    Some(pos) => {
                        let result = this.is_in_shadow(pos);
                        (
                            result,
                            PassInfo {
                                attempted: 1,
                                successful: usize::from(result),
                            },
                        )
                    }
                    None => (false, PassInfo::default()),
                }
            })
            .unzip();
        let info = info.result();
        log::info!("shadows found: {} / {}", info.successful, info.attempted);

        self.in_shadow = in_shadow;
        self.shadows_ready = true;
        if let Err(e) = self.save_shadows() {
            log::warn!("saving shadows failed: {}", e);
        }
    }

    /// Whether the point lies in shadow: the light ray toward it hits an
    /// ordinary object, or a recirculation point on the parts of the ray that
    /// previously computed primary rays already cover.
    fn is_in_shadow(&self, point: cgmath::Point3<FreeCoordinate>) -> bool {
        let light_ray = Ray::new(point, -self.light.direction_to(point));

        for object in self.rt.scene().objects() {
            if object.surface_hit(&light_ray, config::SMALL).is_some() {
                return true;
            }
        }

        let tunables = self.rt.scene().rec_surface().tunables();
        let (rsi, _) = self.rt.scene().rec_surface().search_intersection_pruned(
            &light_ray,
            self.rt.progress(),
            self.rt.camera(),
            self.rt.scene().objects(),
            tunables.ray_fore_offset_shadows,
            FreeCoordinate::MAX,
            false,
        );
        rsi.rp.is_some()
    }

    /// Iteratively hardens the shadow boundary: a lit pixel next to a shadowed
    /// one retests its light ray with the search inverted, covering exactly the
    /// segments the pruned pass skipped. Stops when a pass adds no shadow.
    pub fn sharpen_shadows(&mut self) {
        if !self.shadows_ready {
            log::info!("cannot sharpen shadows before computing them");
            return;
        }
        if self.shadows_sharp {
            log::info!("shadows already sharpened");
            return;
        }
        let total = self.rt.camera().pixel_count();
        let width = self.rt.camera().width() as i64;
        let height = self.rt.camera().height() as i64;
        let mut completely_tested = vec![false; total];
        let mut iteration = 1usize;
        let mut found_total = 0usize;

        loop {
            let this = &*self;
            let tested = &completely_tested;
            let retested: Vec<(usize, bool)> = (0..total)
                .into_par_iter()
                .filter_map(|cam_index| {
                    if this.in_shadow[cam_index] || tested[cam_index] {
                        return None;
                    }
                    let (x, y) = this.rt.camera().position_for_index(cam_index);
                    let (x, y) = (x as i64, y as i64);
                    let shadowed = |nx: i64, ny: i64| {
                        nx >= 0
                            && ny >= 0
                            && nx < width
                            && ny < height
                            && this.in_shadow[(ny * width + nx) as usize]
                    };
                    if !(shadowed(x - 1, y)
                        || shadowed(x + 1, y)
                        || shadowed(x, y - 1)
                        || shadowed(x, y + 1))
                    {
                        return None;
                    }
                    let ray = this.rt.camera().ray_for_index(cam_index);
                    let position = this
                        .rt
                        .scene()
                        .shadow_test_position(this.rt.progress().get_index(cam_index), &ray)?;

                    // Ordinary objects were already tested exhaustively by the
                    // first pass; only the skipped parts of the recirculation
                    // search remain.
                    let tunables = this.rt.scene().rec_surface().tunables();
                    let light_ray = Ray::new(position, -this.light.direction_to(position));
                    let (rsi, _) = this.rt.scene().rec_surface().search_intersection_pruned(
                        &light_ray,
                        this.rt.progress(),
                        this.rt.camera(),
                        this.rt.scene().objects(),
                        tunables.ray_fore_offset_shadows,
                        FreeCoordinate::MAX,
                        true,
                    );
                    Some((cam_index, rsi.rp.is_some()))
                })
                .collect();
            // Every candidate was fully tested this round, shadowed or not.
            let mut found = 0usize;
            for (cam_index, shadowed) in retested {
                completely_tested[cam_index] = true;
                if shadowed {
                    self.in_shadow[cam_index] = true;
                    found += 1;
                }
            }
            log::info!(
                "shadow sharpening iteration {}: {} new shadows",
                iteration,
                found
            );
            found_total += found;
            iteration += 1;
            if found == 0 {
                break;
            }
        }
        log::info!("total shadows added by sharpening: {}", found_total);
        self.shadows_sharp = true;
        if let Err(e) = self.save_shadows() {
            log::warn!("saving shadows failed: {}", e);
        }
    }

    /// Composes and writes the output textures for the current combination of
    /// shading and shadows.
    pub fn create_textures(&self, do_shading: bool, do_shadows: bool) -> io::Result<()> {
        if !do_shading && !do_shadows {
            log::info!("texture composition needs shading or shadows enabled");
            return Ok(());
        }
        if do_shading && !self.normals_ready {
            log::info!("texture composition skipped (normals not available)");
            return Ok(());
        }
        if do_shadows && !self.shadows_ready {
            log::info!("texture composition skipped (shadows not available)");
            return Ok(());
        }

        let (width, height) = (self.rt.camera().width(), self.rt.camera().height());
        let pixels: Vec<[Rgb; 2]> = (0..width * height)
            .into_par_iter()
            .map(|cam_index| {
                if self.rt.progress().get_index(cam_index).is_some() {
                    self.shade_rec_surface(cam_index, do_shading, do_shadows)
                } else {
                    let c = self.shade_common_objects(cam_index, do_shading, do_shadows);
                    [c, c]
                }
            })
            .collect();

        let mut texture_t0 = Texture::new(width, height, self.background);
        let mut texture_tau = Texture::new(width, height, self.background);
        for (cam_index, colors) in pixels.iter().enumerate() {
            let (x, y) = self.rt.camera().position_for_index(cam_index);
            texture_t0.set_pixel(x, y, colors[0]);
            texture_tau.set_pixel(x, y, colors[1]);
        }
        let strategy = if do_shading {
            self.strategy
        } else {
            NormalStrategy::None
        };
        texture_t0.write_ppm(&self.texture_path("t0", strategy, do_shadows))?;
        texture_tau.write_ppm(&self.texture_path("tau", strategy, do_shadows))
    }

    fn shade_rec_surface(&self, cam_index: usize, do_shading: bool, do_shadows: bool) -> [Rgb; 2] {
        let (x, y) = self.rt.camera().position_for_index(cam_index);
        let (width, height) = (self.rt.camera().width(), self.rt.camera().height());
        let uv = Point2::new(
            x as FreeCoordinate / (width - 1) as FreeCoordinate,
            y as FreeCoordinate / (height - 1) as FreeCoordinate,
        );
        let rsi = match self.rt.progress().get_index(cam_index) {
            Some(rsi) => rsi,
            None => return [self.background, self.background],
        };
        if !do_shading && !do_shadows {
            return [self.phong_t0.sample(uv), self.phong_tau.sample(uv)];
        }

        let normal = self.normals[cam_index];
        if do_shading && normal.is_zero() {
            if !do_shadows {
                // Failed normals are marked for inspection in shading-only
                // renders.
                return [crate::rgb_const!(1.0, 0.0, 0.0), crate::rgb_const!(1.0, 0.0, 0.0)];
            } else if !self.in_shadow[cam_index] {
                return [self.phong_t0.sample(uv), self.phong_tau.sample(uv)];
            }
        }

        let mut hit = SurfaceHit {
            incident_ray: rsi.ray,
            t: rsi.hit.expect("stored intersection without hit"),
            position: rsi.rp.as_ref().expect("stored intersection without point").pos,
            normal,
            uv,
        };
        // Shadowed pixels are shaded with a zero normal, which reduces the
        // reflectance to the ambient term.
        if do_shadows && self.in_shadow[cam_index] {
            hit.normal = Vector3::zero();
        }
        [
            self.phong_t0.shade(&self.light, &hit),
            self.phong_tau.shade(&self.light, &hit),
        ]
    }

    fn shade_common_objects(&self, cam_index: usize, _do_shading: bool, do_shadows: bool) -> Rgb {
        let ray = self.rt.camera().ray_for_index(cam_index);
        let (object, mut hit) = match self.rt.scene().common_object_hit(&ray, 0.0) {
            Some(found) => found,
            None => return self.background,
        };
        if do_shadows && self.in_shadow[cam_index] {
            hit.normal = Vector3::zero();
        }
        object.shade(&self.light, &hit)
    }

    fn normals_path(&self, strategy: NormalStrategy) -> Option<PathBuf> {
        strategy
            .suffix()
            .map(|s| self.save_dir.join(format!("normals_{}.txt", s)))
    }

    fn shadows_path(&self) -> PathBuf {
        self.save_dir.join("in_shadow.txt")
    }

    fn texture_path(&self, base: &str, strategy: NormalStrategy, shadows: bool) -> PathBuf {
        let mut name = base.to_owned();
        if let Some(s) = strategy.suffix() {
            name.push('_');
            name.push_str(s);
        }
        if shadows {
            name.push_str(if self.shadows_sharp {
                "_shad_sharp"
            } else {
                "_shad"
            });
        }
        name.push_str(".ppm");
        self.save_dir.join(name)
    }

    fn save_normals(&self) -> io::Result<()> {
        let path = match self.normals_path(self.strategy) {
            Some(path) if self.normals_ready => path,
            _ => return Ok(()),
        };
        let mut file = io::BufWriter::new(fs::File::create(path)?);
        for n in &self.normals {
            writeln!(file, "{} {} {}", n.x, n.y, n.z)?;
        }
        file.flush()
    }

    /// Loads normals for `strategy` from the sidecar, if present and complete.
    /// Returns whether it succeeded; on failure the caller recomputes.
    pub fn load_normals(&mut self, strategy: NormalStrategy) -> bool {
        let path = match self.normals_path(strategy) {
            Some(path) => path,
            None => {
                log::info!("cannot load normals for strategy {}", strategy);
                return false;
            }
        };
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => return false,
        };
        let mut loaded = Vec::with_capacity(self.normals.len());
        let mut successful = 0usize;
        for line in content.lines() {
            let mut parts = line.split_whitespace();
            let vector = match (
                parts.next().and_then(|s| s.parse::<f64>().ok()),
                parts.next().and_then(|s| s.parse::<f64>().ok()),
                parts.next().and_then(|s| s.parse::<f64>().ok()),
            ) {
                (Some(x), Some(y), Some(z)) => Vector3::new(x, y, z),
                _ => {
                    log::warn!("unreadable normals sidecar {:?}; recomputing", path);
                    return false;
                }
            };
            if !vector.is_zero() {
                successful += 1;
            }
            loaded.push(vector);
        }
        if loaded.len() != self.normals.len() {
            log::warn!("normals sidecar {:?} has the wrong size; recomputing", path);
            return false;
        }
        log::info!(
            "loaded normals ({} successful of {} points)",
            successful,
            self.rt.progress().points_found()
        );
        self.normals = loaded;
        self.normals_ready = true;
        self.strategy = strategy;
        true
    }

    fn save_shadows(&self) -> io::Result<()> {
        if !self.shadows_ready {
            return Ok(());
        }
        let mut file = io::BufWriter::new(fs::File::create(self.shadows_path())?);
        for &b in &self.in_shadow {
            writeln!(file, "{}", u8::from(b))?;
        }
        file.flush()
    }

    /// Loads the shadow bitmap sidecar, if present and complete.
    pub fn load_shadows(&mut self) -> bool {
        let content = match fs::read_to_string(self.shadows_path()) {
            Ok(content) => content,
            Err(_) => return false,
        };
        let mut loaded = Vec::with_capacity(self.in_shadow.len());
        for token in content.split_whitespace() {
            match token {
                "0" => loaded.push(false),
                "1" => loaded.push(true),
                _ => {
                    log::warn!("unreadable shadow sidecar; recomputing");
                    return false;
                }
            }
        }
        if loaded.len() != self.in_shadow.len() {
            log::warn!("shadow sidecar has the wrong size; recomputing");
            return false;
        }
        self.in_shadow = loaded;
        self.shadows_ready = true;
        true
    }
}

mod rayon_helper {
    use rayon::iter::{IntoParallelIterator, ParallelExtend, ParallelIterator as _};
    use std::iter::{empty, once, Sum};

    /// Implements [`ParallelExtend`] to just sum things, so that
    /// [`rayon::iter::ParallelIterator::unzip`] can produce a sum.
    #[derive(Clone, Copy, Debug, Default)]
    pub(crate) struct ParExtSum<T>(Option<T>);

    impl<T: Sum> ParExtSum<T> {
        pub fn result(self) -> T {
            self.0.unwrap_or_else(|| empty().sum())
        }
    }

    impl<T: Sum + Send> ParallelExtend<T> for ParExtSum<T> {
        fn par_extend<I>(&mut self, par_iter: I)
        where
            I: IntoParallelIterator<Item = T>,
        {
            let new = par_iter.into_par_iter().sum();
            // The reason we use an `Option` at all is to make it possible to move
            // the current value.
            self.0 = Some(match self.0.take() {
                None => new,
                Some(previous) => once(previous).chain(once(new)).sum(),
            });
        }
    }
}
