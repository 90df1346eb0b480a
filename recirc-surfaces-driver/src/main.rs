// Copyright 2020-2021 Kevin Reid under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Fixed experiment sequence over the 3D double gyre: a base render at several
//! resolutions, refinement passes with post-processing, and the shading suite.
//! Takes no command-line arguments; all outputs land under `dg/`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use cgmath::{Point3, Vector3};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use strum::IntoEnumIterator as _;

use recirc_surfaces::camera::{CamUp, PerspectiveCamera};
use recirc_surfaces::flow::DoubleGyre3;
use recirc_surfaces::objects::{BoxObject, Renderable};
use recirc_surfaces::raycast::Aabb;
use recirc_surfaces::render::{Raytracer, RefinementRaytracer};
use recirc_surfaces::scene::Scene;
use recirc_surfaces::shade::{NormalStrategy, Shader};
use recirc_surfaces::surface::{DataParams, RecSurface, SearchParams};

fn double_gyre_scene(ray_step_size: f64, time_step_size: f64) -> Arc<Scene> {
    let flow = Arc::new(DoubleGyre3::default());
    let data = DataParams::new(
        Aabb::new(Point3::new(0.01, 0.01, 0.01), Point3::new(1.99, 0.99, 0.99)),
        ray_step_size,
    );
    let search = SearchParams {
        t0_min: 0.0,
        t0_max: 10.0,
        tau_min: 0.0,
        tau_max: 10.0,
        dt: time_step_size,
        ..SearchParams::default()
    };
    let mut scene = Scene::new(
        RecSurface::new(flow, data, search),
        Vector3::new(0.0, -0.2, -1.0),
    );
    // A floor box just below the flow domain, so the surface casts visible
    // shadows onto something.
    scene.add_object(Renderable::Box(BoxObject::new(Aabb::new(
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(2.0, 1.0, -0.1),
    ))));
    Arc::new(scene)
}

fn double_gyre_camera(res_multiplier: usize) -> Arc<PerspectiveCamera> {
    Arc::new(PerspectiveCamera::new(
        Point3::new(1.0, -1.0, 1.9),
        Point3::new(1.0, 2.0, -1.0),
        70.0,
        res_multiplier * 150,
        res_multiplier * 50,
        CamUp::Z,
    ))
}

fn basic_raytracing(scene: Arc<Scene>, cam: Arc<PerspectiveCamera>, save_dir: &str) -> Raytracer {
    std::fs::create_dir_all(save_dir).expect("cannot create output directory");
    let mut raytracer = Raytracer::new(cam, scene, PathBuf::from(save_dir));
    raytracer
        .render_space()
        .expect("cannot write the domain preview");

    log::info!("=== basic raytracing ({}) ===", save_dir);
    let started = Instant::now();
    raytracer.render();
    log::info!("basic raytracing took {:.1?}", started.elapsed());
    raytracer
}

fn refining_raytracing<'a>(
    parent: &'a Raytracer,
    res_multiplier: usize,
    save_dir: &str,
    do_postprocessing: bool,
) -> RefinementRaytracer<'a> {
    std::fs::create_dir_all(save_dir).expect("cannot create output directory");
    let mut raytracer = RefinementRaytracer::new(parent, res_multiplier, PathBuf::from(save_dir));

    log::info!("=== refinement x{} ({}) ===", res_multiplier, save_dir);
    let started = Instant::now();
    raytracer.render();
    log::info!("refinement took {:.1?}", started.elapsed());

    log::info!("=== post-processing ({}) ===", save_dir);
    if do_postprocessing {
        let started = Instant::now();
        raytracer.post_process();
        log::info!("post-processing took {:.1?}", started.elapsed());
    } else {
        log::info!("skipped");
    }
    raytracer
}

fn shading(raytracer: &Raytracer, save_dir: &str, do_shadow_sharpening: bool) {
    std::fs::create_dir_all(save_dir).expect("cannot create output directory");
    let mut shader = Shader::new(raytracer, PathBuf::from(save_dir));

    for strategy in NormalStrategy::iter().filter(|&s| s != NormalStrategy::None) {
        log::info!("=== shading ({}) - normals by {} ===", save_dir, strategy);
        if shader.load_normals(strategy) {
            log::info!("loaded normals from disk");
        } else {
            let started = Instant::now();
            shader.calc_normals(strategy);
            log::info!("normal calculation took {:.1?}", started.elapsed());
        }
        shader
            .create_textures(true, false)
            .expect("cannot write shaded textures");
    }

    log::info!("=== shadows ({}) ===", save_dir);
    if shader.load_shadows() {
        log::info!("loaded shadows from disk");
    } else {
        let started = Instant::now();
        shader.calc_shadows();
        log::info!("shadow calculation took {:.1?}", started.elapsed());
    }
    shader
        .create_textures(false, true)
        .expect("cannot write shadow textures");

    log::info!("=== shadow sharpening ({}) ===", save_dir);
    if do_shadow_sharpening {
        let started = Instant::now();
        shader.sharpen_shadows();
        log::info!("shadow sharpening took {:.1?}", started.elapsed());
    } else {
        log::info!("skipped");
    }
    shader
        .create_textures(false, true)
        .expect("cannot write shadow textures");
    shader
        .create_textures(true, true)
        .expect("cannot write final textures");
}

fn double_gyre_experiments() {
    let scene = double_gyre_scene(0.01, 0.2);
    {
        // Base raytracing at the smallest size, then refinements building on it.
        let dg_1 = basic_raytracing(scene.clone(), double_gyre_camera(1), "dg/1");
        {
            let dg_1_2 = refining_raytracing(&dg_1, 2, "dg/1-2", true);
            refining_raytracing(dg_1_2.raytracer(), 2, "dg/1-2-4", true);
        }
        refining_raytracing(&dg_1, 4, "dg/1-4", true);
    }
    {
        let dg_2 = basic_raytracing(scene.clone(), double_gyre_camera(2), "dg/2");
        refining_raytracing(&dg_2, 2, "dg/2-4", true);
    }
    {
        let dg_4 = basic_raytracing(scene, double_gyre_camera(4), "dg/4");
        shading(&dg_4, "dg/4", true);
    }
}

fn main() {
    TermLogger::init(
        LevelFilter::Info,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .expect("cannot initialize logging");

    double_gyre_experiments();
}
