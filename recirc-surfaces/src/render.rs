// Copyright 2020-2021 Kevin Reid under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! The render passes: the base raytracer over all pixels, and the refinement
//! raytracer that reuses a previous (coarser) pass to bound and prune its
//! searches, plus the edge-retesting post-process.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use itertools::iproduct;
use rayon::iter::{IntoParallelIterator as _, ParallelIterator as _};

use crate::camera::PerspectiveCamera;
use crate::math::FreeCoordinate;
use crate::objects::{BoxObject, DirectionalLight, Renderable};
use crate::progress::ProgressStore;
use crate::scene::Scene;
use crate::surface::RSIntersection;
use crate::texture::Texture;

/// Counters of one render pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RenderInfo {
    /// Rays whose domain test succeeded and that were searched this pass.
    pub rays_tested: usize,
    /// Total recirculation points known after the pass.
    pub points_found: usize,
}

/// State shared between the render workers: everything a worker writes when a
/// pixel finishes. The critical section only stores precomputed values, plus
/// the periodic sidecar flush.
struct WorkerShared {
    progress: ProgressStore,
    texture_t0: Texture,
    texture_tau: Texture,
    checked_domain_rays: usize,
}

fn save_all(
    dir: &Path,
    progress: &mut ProgressStore,
    texture_t0: &Texture,
    texture_tau: &Texture,
) -> io::Result<()> {
    progress.save(dir)?;
    texture_t0.write_ppm(&dir.join("t0.ppm"))?;
    texture_tau.write_ppm(&dir.join("tau.ppm"))
}

/// Renders a scene viewed from a camera into the `t0`/`tau` textures, feeding
/// a resumable [`ProgressStore`].
pub struct Raytracer {
    cam: Arc<PerspectiveCamera>,
    scene: Arc<Scene>,
    progress: ProgressStore,
    texture_t0: Texture,
    texture_tau: Texture,
    save_dir: PathBuf,
}

impl Raytracer {
    /// Creates a raytracer whose sidecar files live in `save_dir`, resuming
    /// from them if present.
    pub fn new(cam: Arc<PerspectiveCamera>, scene: Arc<Scene>, save_dir: PathBuf) -> Self {
        let (width, height) = (cam.width(), cam.height());
        let mut progress = ProgressStore::new(width, height);
        if let Err(e) = progress.load(&save_dir, &cam) {
            log::warn!(
                "discarding unreadable progress data in {:?}: {}",
                save_dir,
                e
            );
            progress = ProgressStore::new(width, height);
        }
        let background = scene.background();
        Self {
            cam,
            scene,
            progress,
            texture_t0: Texture::new(width, height, background),
            texture_tau: Texture::new(width, height, background),
            save_dir,
        }
    }

    pub fn camera(&self) -> &Arc<PerspectiveCamera> {
        &self.cam
    }

    pub fn scene(&self) -> &Arc<Scene> {
        &self.scene
    }

    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    pub fn texture_t0(&self) -> &Texture {
        &self.texture_t0
    }

    pub fn texture_tau(&self) -> &Texture {
        &self.texture_tau
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    /// Recreates the pixels already committed in an earlier run from the
    /// progress store (color mapping for recirculation points, object sampling
    /// for the rest).
    fn pre_render_from_progress(&mut self) {
        for index in 0..self.progress.start_index() {
            let (x, y) = self.cam.position_for_index(index);
            match self.progress.get_index(index).and_then(|rsi| rsi.rp) {
                Some(rp) => {
                    self.texture_t0.set_pixel(x, y, self.scene.t0_color(rp.t0));
                    self.texture_tau.set_pixel(x, y, self.scene.tau_color(rp.tau));
                }
                None => {
                    let color = self
                        .scene
                        .raytrace_common_objects(&self.cam.ray_for_index(index), 0.0);
                    self.texture_t0.set_pixel(x, y, color);
                    self.texture_tau.set_pixel(x, y, color);
                }
            }
        }
    }

    /// Counts the rays that intersect the flow domain, and how many of them
    /// were already finished by an earlier run.
    fn count_domain_rays(&self) -> (usize, usize) {
        let mut checked = 0;
        let mut total = 0;
        for index in 0..self.cam.pixel_count() {
            let ray = self.cam.ray_for_index(index);
            if self
                .scene
                .rec_surface()
                .domain_intersections(&ray, 0.0, FreeCoordinate::MAX)
                .is_some()
            {
                total += 1;
                if index < self.progress.start_index() {
                    checked += 1;
                }
            }
        }
        (checked, total)
    }

    /// The base pass: all pixels from the resume point, in parallel.
    pub fn render(&mut self) -> RenderInfo {
        self.pre_render_from_progress();

        let (checked, total_domain) = self.count_domain_rays();
        log::info!(
            "rays with domain intersection: {} / {}",
            total_domain,
            self.cam.pixel_count()
        );
        if checked > 0 {
            log::info!("rays restored from an earlier run: {}", checked);
        }

        let start_index = self.progress.start_index();
        let cam = self.cam.clone();
        let scene = self.scene.clone();
        let save_dir = self.save_dir.clone();
        let shared = Mutex::new(WorkerShared {
            progress: std::mem::replace(&mut self.progress, ProgressStore::new(0, 0)),
            texture_t0: std::mem::replace(&mut self.texture_t0, Texture::new(0, 0, scene.background())),
            texture_tau: std::mem::replace(&mut self.texture_tau, Texture::new(0, 0, scene.background())),
            checked_domain_rays: checked,
        });

        (start_index..cam.pixel_count())
            .into_par_iter()
            .for_each(|cam_index| {
                let (x, y) = cam.position_for_index(cam_index);
                let ray = cam.ray(x as FreeCoordinate, y as FreeCoordinate);
                let mut rsi = RSIntersection::empty(cam_index, ray);
                let (colors, domain_hit) =
                    scene.raytrace(&ray, &mut rsi, 0.0, FreeCoordinate::MAX);

                let mut guard = shared.lock().unwrap();
                guard.texture_t0.set_pixel(x, y, colors[0]);
                guard.texture_tau.set_pixel(x, y, colors[1]);
                guard.progress.update(rsi);
                if domain_hit {
                    guard.checked_domain_rays += 1;
                    if guard.checked_domain_rays % 120 == 0 {
                        let WorkerShared {
                            progress,
                            texture_t0,
                            texture_tau,
                            checked_domain_rays,
                        } = &mut *guard;
                        log::debug!(
                            "finished {} / {} domain rays, {} points",
                            checked_domain_rays,
                            total_domain,
                            progress.points_found()
                        );
                        if let Err(e) = save_all(&save_dir, progress, texture_t0, texture_tau) {
                            log::warn!("periodic save failed: {}", e);
                        }
                    }
                }
            });

        let shared = shared.into_inner().unwrap();
        self.progress = shared.progress;
        self.texture_t0 = shared.texture_t0;
        self.texture_tau = shared.texture_tau;

        if let Err(e) = save_all(
            &self.save_dir,
            &mut self.progress,
            &self.texture_t0,
            &self.texture_tau,
        ) {
            log::warn!("final save failed: {}", e);
        }
        log::info!(
            "total recirculation points found: {} / {}",
            self.progress.points_found(),
            total_domain
        );
        RenderInfo {
            rays_tested: total_domain,
            points_found: self.progress.points_found(),
        }
    }

    /// Renders a plain shaded view of the domain box to `space.ppm`, to check
    /// the camera placement before committing to the real computation.
    pub fn render_space(&self) -> io::Result<()> {
        let (width, height) = (self.cam.width(), self.cam.height());
        let mut texture = Texture::new(width, height, self.scene.background());

        let domain_box = BoxObject::new(self.scene.rec_surface().data_params().domain);
        let light = DirectionalLight::new(self.scene.light_direction());
        for (y, x) in iproduct!(0..height, 0..width) {
            let ray = self.cam.ray(x as FreeCoordinate, y as FreeCoordinate);
            if let Some(hit) = domain_box.surface_hit(&ray, 0.0) {
                let object = Renderable::Box(domain_box.clone());
                texture.set_pixel(x, y, object.shade(&light, &hit));
            }
        }
        texture.write_ppm(&self.save_dir.join("space.ppm"))
    }
}

/// Renders the same scene at `res_increase`-times the resolution of a previous
/// pass, using the previous results to adopt, bound, or skip each new ray.
///
/// The reference to the previous pass's progress is lookup-only; this type
/// never outlives the parent raytracer.
pub struct RefinementRaytracer<'a> {
    rt: Raytracer,
    res_increase: usize,
    old_progress: &'a ProgressStore,
}

impl<'a> RefinementRaytracer<'a> {
    pub fn new(parent: &'a Raytracer, res_increase: usize, save_dir: PathBuf) -> Self {
        let cam = Arc::new(parent.camera().with_increased_resolution(res_increase));
        Self {
            rt: Raytracer::new(cam, parent.scene().clone(), save_dir),
            res_increase,
            old_progress: parent.progress(),
        }
    }

    /// The underlying raytracer (shading and further refinement levels build
    /// on this).
    pub fn raytracer(&self) -> &Raytracer {
        &self.rt
    }

    /// Whether the previous pass computed this exact ray: for odd multipliers,
    /// the center subpixel of each parent pixel.
    fn can_adopt(&self, x: usize, y: usize) -> bool {
        self.res_increase % 2 == 1
            && x % self.res_increase == self.res_increase / 2
            && y % self.res_increase == self.res_increase / 2
    }

    /// The nearest hit distance among the parent pixel and its 4-neighbors, or
    /// [`None`] if none of them found anything, in which case no recirculation
    /// point can exist on this ray either.
    fn nearest_parent_hit(&self, x: usize, y: usize) -> Option<FreeCoordinate> {
        let px = (x / self.res_increase) as i64;
        let py = (y / self.res_increase) as i64;
        [
            (px, py),
            (px - 1, py),
            (px + 1, py),
            (px, py - 1),
            (px, py + 1),
        ]
        .iter()
        .filter_map(|&(nx, ny)| self.old_progress.get(nx, ny))
        .filter_map(|rsi| rsi.hit)
        .fold(None, |acc: Option<FreeCoordinate>, hit| {
            Some(acc.map_or(hit, |a| a.min(hit)))
        })
    }

    /// Counts the rays this pass will actually search.
    fn count_refinement_rays(&self) -> (usize, usize, usize) {
        let cam = self.rt.camera();
        let mut checked = 0;
        let mut total = 0;
        let mut adopted = 0;
        for index in 0..cam.pixel_count() {
            let (x, y) = cam.position_for_index(index);
            if self.can_adopt(x, y) {
                if self
                    .old_progress
                    .get((x / self.res_increase) as i64, (y / self.res_increase) as i64)
                    .is_some()
                {
                    adopted += 1;
                }
            } else if self.nearest_parent_hit(x, y).is_some()
                && self
                    .rt
                    .scene()
                    .rec_surface()
                    .domain_intersections(&cam.ray_for_index(index), 0.0, FreeCoordinate::MAX)
                    .is_some()
            {
                total += 1;
                if index < self.rt.progress().start_index() {
                    checked += 1;
                }
            }
        }
        (checked, total, adopted)
    }

    /// The refinement pass.
    pub fn render(&mut self) -> RenderInfo {
        self.rt.pre_render_from_progress();

        let (checked, total_domain, adopted) = self.count_refinement_rays();
        log::info!(
            "rays considered for search: {} / {}",
            total_domain,
            self.rt.camera().pixel_count()
        );
        if adopted > 0 {
            log::info!("rays adopted from the previous pass: {}", adopted);
        }
        if checked > 0 {
            log::info!("rays restored from an earlier run: {}", checked);
        }

        let start_index = self.rt.progress.start_index();
        let cam = self.rt.cam.clone();
        let scene = self.rt.scene.clone();
        let save_dir = self.rt.save_dir.clone();
        let back_offset = scene.rec_surface().tunables().ray_back_offset_refinement;
        let shared = Mutex::new(WorkerShared {
            progress: std::mem::replace(&mut self.rt.progress, ProgressStore::new(0, 0)),
            texture_t0: std::mem::replace(
                &mut self.rt.texture_t0,
                Texture::new(0, 0, scene.background()),
            ),
            texture_tau: std::mem::replace(
                &mut self.rt.texture_tau,
                Texture::new(0, 0, scene.background()),
            ),
            checked_domain_rays: checked,
        });
        let this = &*self;

        (start_index..cam.pixel_count())
            .into_par_iter()
            .for_each(|cam_index| {
                let (x, y) = cam.position_for_index(cam_index);
                let ray = cam.ray(x as FreeCoordinate, y as FreeCoordinate);
                let mut rsi = RSIntersection::empty(cam_index, ray);
                let mut domain_hit = false;
                let mut searched = false;

                let colors;
                if this.can_adopt(x, y) {
                    // The previous pass computed this exact ray; take its result
                    // unchanged.
                    match this.old_progress.get(
                        (x / this.res_increase) as i64,
                        (y / this.res_increase) as i64,
                    ) {
                        Some(old) => {
                            rsi.hit = old.hit;
                            rsi.rp = old.rp;
                            let rp = old.rp.as_ref().expect("stored intersection without point");
                            colors = [scene.t0_color(rp.t0), scene.tau_color(rp.tau)];
                        }
                        None => {
                            let c = scene.raytrace_common_objects(&ray, 0.0);
                            colors = [c, c];
                        }
                    }
                } else {
                    match this.nearest_parent_hit(x, y) {
                        Some(nearest) => {
                            // The refined hit lies near the parent's; start just
                            // in front of it and skip the empty foreground.
                            searched = true;
                            let (c, hit) = scene.raytrace(
                                &ray,
                                &mut rsi,
                                (nearest - back_offset).max(0.0),
                                FreeCoordinate::MAX,
                            );
                            colors = c;
                            domain_hit = hit;
                        }
                        None => {
                            // No parent neighbor found anything: skip the
                            // search entirely.
                            let c = scene.raytrace_common_objects(&ray, 0.0);
                            colors = [c, c];
                        }
                    }
                }

                let mut guard = shared.lock().unwrap();
                guard.texture_t0.set_pixel(x, y, colors[0]);
                guard.texture_tau.set_pixel(x, y, colors[1]);
                guard.progress.update(rsi);
                if domain_hit {
                    guard.checked_domain_rays += 1;
                }
                if searched && guard.checked_domain_rays % 1000 == 0 {
                    let WorkerShared {
                        progress,
                        texture_t0,
                        texture_tau,
                        checked_domain_rays,
                    } = &mut *guard;
                    log::debug!(
                        "finished {} / {} refinement rays, {} points",
                        checked_domain_rays,
                        total_domain,
                        progress.points_found()
                    );
                    if let Err(e) = save_all(&save_dir, progress, texture_t0, texture_tau) {
                        log::warn!("periodic save failed: {}", e);
                    }
                }
            });

        let shared = shared.into_inner().unwrap();
        self.rt.progress = shared.progress;
        self.rt.texture_t0 = shared.texture_t0;
        self.rt.texture_tau = shared.texture_tau;

        if let Err(e) = save_all(
            &self.rt.save_dir,
            &mut self.rt.progress,
            &self.rt.texture_t0,
            &self.rt.texture_tau,
        ) {
            log::warn!("final save failed: {}", e);
        }
        log::info!(
            "total recirculation points found: {} / {}",
            self.rt.progress.points_found(),
            total_domain
        );
        RenderInfo {
            rays_tested: total_domain,
            points_found: self.rt.progress.points_found(),
        }
    }

    /// Retests rays lying on 5D edges: pixels whose result is not
    /// 5D-neighboring some 4-neighbor that is nearer to the camera get searched
    /// again up to their previously known nearest hit. Iterates until a pass
    /// finds nothing new.
    pub fn post_process(&mut self) -> RenderInfo {
        let cam = self.rt.cam.clone();
        let scene = self.rt.scene.clone();
        let (width, height) = (cam.width(), cam.height());
        let tunables = *scene.rec_surface().tunables();
        let back_offset = tunables.ray_back_offset_refinement;

        let mut completely_tested = vec![false; width * height];
        let mut iteration = 1usize;
        let mut found_total = 0usize;
        let mut rays_tested_total = 0usize;
        loop {
            // Decide and search in parallel against an immutable snapshot of
            // the progress store, then merge sequentially.
            let results: Vec<_> = {
                let this = &*self;
                let tested = &completely_tested;
                (0..width * height)
                    .into_par_iter()
                    .filter_map(|cam_index| {
                        let (x, y) = cam.position_for_index(cam_index);
                        if tested[cam_index] {
                            return None;
                        }
                        let progress = this.rt.progress();
                        let rsi = progress.get(x as i64, y as i64);
                        let neighbors = [
                            progress.get(x as i64, y as i64 - 1),
                            progress.get(x as i64 - 1, y as i64),
                            progress.get(x as i64, y as i64 + 1),
                            progress.get(x as i64 + 1, y as i64),
                        ];
                        if neighbors.iter().all(|n| n.is_none()) {
                            return None;
                        }
                        if let Some(rsi) = rsi {
                            // Only test if some neighbor is nearer to the camera
                            // yet not a 5D neighbor (an edge in the 5D data).
                            let needs_test = neighbors.iter().flatten().any(|neighbor| {
                                neighbor.cam_index < rsi.cam_index
                                    && !rsi.is_neighboring(neighbor, &tunables)
                            });
                            if !needs_test {
                                return None;
                            }
                        }

                        let ray = cam.ray(x as FreeCoordinate, y as FreeCoordinate);
                        let mut test_result = RSIntersection::empty(cam_index, ray);
                        let end = this
                            .nearest_parent_hit(x, y)
                            .map(|nearest| nearest - back_offset)
                            .unwrap_or(FreeCoordinate::MAX);
                        let (colors, domain_hit) =
                            scene.raytrace(&ray, &mut test_result, 0.0, end);
                        Some((cam_index, test_result, colors, domain_hit))
                    })
                    .collect()
            };

            let mut new_found = 0usize;
            let mut rays_tested = 0usize;
            for (cam_index, test_result, colors, domain_hit) in results {
                let (x, y) = cam.position_for_index(cam_index);
                completely_tested[cam_index] = true;
                if domain_hit {
                    rays_tested += 1;
                }
                if test_result.rp.is_some() {
                    self.rt.texture_t0.set_pixel(x, y, colors[0]);
                    self.rt.texture_tau.set_pixel(x, y, colors[1]);
                    self.rt.progress.update(test_result);
                    new_found += 1;
                }
            }

            if let Err(e) = self.rt.progress.save(&self.rt.save_dir) {
                log::warn!("post-processing save failed: {}", e);
            }
            let _ = self
                .rt
                .texture_t0
                .write_ppm(&self.rt.save_dir.join("t0_postpr.ppm"));
            let _ = self
                .rt
                .texture_tau
                .write_ppm(&self.rt.save_dir.join("tau_postpr.ppm"));

            log::info!(
                "post-processing iteration {}: {} new points in {} retested rays",
                iteration,
                new_found,
                rays_tested
            );
            found_total += new_found;
            rays_tested_total += rays_tested;
            iteration += 1;
            if new_found == 0 {
                break;
            }
        }
        RenderInfo {
            rays_tested: rays_tested_total,
            points_found: found_total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CamUp;
    use crate::extract::CritSearchParams;
    use crate::flow::Flow;
    use crate::raycast::Aabb;
    use crate::surface::{DataParams, RecSurface, SearchParams};
    use cgmath::{EuclideanSpace as _, Point3, Vector3};
    use std::sync::Arc;

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

    fn test_scene() -> Arc<Scene> {
        let period = 2.0 * std::f64::consts::PI;
        let surface = RecSurface::new(
            Arc::new(TiltedRotation),
            DataParams::new(
                Aabb::new(Point3::new(0.985, 1.9, -0.1), Point3::new(1.015, 2.1, 0.1)),
                0.02,
            ),
            SearchParams {
                t0_min: 0.0,
                t0_max: 0.1,
                tau_min: period - 0.04,
                tau_max: period + 0.04,
                dt: 0.1,
                prec: 0.002,
            },
        )
        .with_crit_params(CritSearchParams {
            search_precision: (2.0f64).powi(-16),
            jacobi_precision: (2.0f64).powi(-4),
            cluster_precision: (2.0f64).powi(-2),
            max_steps: 50_000,
            continue_past_structures: false,
        });
        Arc::new(Scene::new(surface, Vector3::new(0.0, -0.2, -1.0)))
    }

    fn test_camera() -> Arc<PerspectiveCamera> {
        // A narrow view from below straight at the little domain slab.
        Arc::new(PerspectiveCamera::new(
            Point3::new(1.0, -1.0, 0.0),
            Point3::new(1.0, 2.0, 0.0),
            3.0,
            6,
            4,
            CamUp::Z,
        ))
    }

    #[test]
    fn base_pass_finds_points_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let scene = test_scene();
        let cam = test_camera();

        let mut rt = Raytracer::new(cam.clone(), scene.clone(), dir.path().to_path_buf());
        let info = rt.render();
        assert!(info.points_found > 0, "no recirculation points in the pass");
        assert!(dir.path().join("t0.ppm").exists());
        assert!(dir.path().join("tau.ppm").exists());
        assert!(dir.path().join("progress_points.txt").exists());

        // A second raytracer over the same directory resumes fully finished.
        let rt2 = Raytracer::new(cam, scene, dir.path().to_path_buf());
        assert_eq!(rt2.progress().start_index(), rt2.camera().pixel_count());
        assert_eq!(rt2.progress().points_found(), info.points_found);
    }

    #[test]
    fn refinement_adopts_parent_results_bit_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let refine_dir = tempfile::tempdir().unwrap();
        let scene = test_scene();
        let cam = test_camera();

        let mut base = Raytracer::new(cam, scene, dir.path().to_path_buf());
        base.render();

        let mut refined = RefinementRaytracer::new(&base, 3, refine_dir.path().to_path_buf());
        refined.render();

        let k = 3usize;
        for py in 0..base.camera().height() {
            for px in 0..base.camera().width() {
                let (cx, cy) = ((px * k + k / 2) as i64, (py * k + k / 2) as i64);
                let parent = base.progress().get(px as i64, py as i64);
                let child = refined.raytracer().progress().get(cx, cy);
                match (parent, child) {
                    (Some(p), Some(c)) => {
                        assert_eq!(p.hit, c.hit);
                        let (prp, crp) = (p.rp.unwrap(), c.rp.unwrap());
                        assert_eq!(prp.pos, crp.pos);
                        assert_eq!(prp.t0, crp.t0);
                        assert_eq!(prp.tau, crp.tau);
                    }
                    (None, None) => {}
                    other => panic!("adoption mismatch at ({}, {}): {:?}", px, py, other),
                }
            }
        }
    }

    #[test]
    fn refinement_skips_rays_without_parent_hits() {
        let dir = tempfile::tempdir().unwrap();
        let refine_dir = tempfile::tempdir().unwrap();
        let scene = test_scene();

        // A camera pointing away from the domain: the base pass finds nothing,
        // so the refinement must not search (or find) anything either.
        let cam = Arc::new(PerspectiveCamera::new(
            Point3::new(1.0, -1.0, 0.0),
            Point3::new(1.0, -4.0, 0.0),
            3.0,
            6,
            4,
            CamUp::Z,
        ));
        let mut base = Raytracer::new(cam, scene, dir.path().to_path_buf());
        let info = base.render();
        assert_eq!(info.points_found, 0);

        let mut refined = RefinementRaytracer::new(&base, 2, refine_dir.path().to_path_buf());
        let info = refined.render();
        assert_eq!(info.rays_tested, 0);
        assert_eq!(info.points_found, 0);
    }

    #[test]
    fn post_processing_terminates_and_keeps_results() {
        let dir = tempfile::tempdir().unwrap();
        let refine_dir = tempfile::tempdir().unwrap();
        let scene = test_scene();
        let cam = test_camera();

        let mut base = Raytracer::new(cam, scene, dir.path().to_path_buf());
        base.render();
        let mut refined = RefinementRaytracer::new(&base, 2, refine_dir.path().to_path_buf());
        refined.render();
        let before = refined.raytracer().progress().points_found();

        refined.post_process();
        assert!(refined.raytracer().progress().points_found() >= before);
        assert!(refine_dir.path().join("t0_postpr.ppm").exists());
    }

    #[test]
    fn render_space_draws_the_domain_box() {
        let dir = tempfile::tempdir().unwrap();
        let rt = Raytracer::new(test_camera(), test_scene(), dir.path().to_path_buf());
        rt.render_space().unwrap();
        let image = Texture::read_ppm(&dir.path().join("space.ppm")).unwrap();
        assert_eq!(image.width(), 6);
        // Some pixel differs from the white background (the box is visible).
        let mut any_box = false;
        for y in 0..image.height() {
            for x in 0..image.width() {
                if image.pixel(x, y) != crate::math::Rgb::ONE {
                    any_box = true;
                }
            }
        }
        assert!(any_box);
    }

    #[test]
    fn empty_miss_leaves_background_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let scene = test_scene();
        // Pointing away from the domain entirely.
        let cam = Arc::new(PerspectiveCamera::new(
            Point3::new(1.0, -1.0, 0.0),
            Point3::new(1.0, -4.0, 0.0),
            3.0,
            4,
            3,
            CamUp::Z,
        ));
        let mut rt = Raytracer::new(cam, scene.clone(), dir.path().to_path_buf());
        rt.render();
        for y in 0..3 {
            for x in 0..4 {
                assert_eq!(rt.texture_t0().pixel(x, y), scene.background());
                assert_eq!(rt.texture_tau().pixel(x, y), scene.background());
            }
        }
    }

    #[test]
    fn unreadable_progress_recovers_with_a_fresh_store() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("progress_points.txt"), "0 zzz 1 2\n").unwrap();
        let rt = Raytracer::new(test_camera(), test_scene(), dir.path().to_path_buf());
        assert_eq!(rt.progress().start_index(), 0);
        assert!(rt.progress().saved_points().is_empty());
    }
}
