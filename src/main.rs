use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;

use pbr_guide::GuidedRenderScheduler;
use pbr_guide::integrator::{GuidedIntegrator, IntegratorKind};
use pbr_guide::options::GuidingOptions;
use pbr_guide::scene::{SceneAccess, cornell_box};
use pbr_guide::scheduler::StderrProgress;

#[derive(Parser)]
struct Options {
    #[clap(short = 'W', long)]
    width: Option<u32>,
    #[clap(short = 'H', long)]
    height: Option<u32>,

    /// Samples per pixel of the first training pass.
    #[clap(long, default_value = "4")]
    k0: u32,
    /// Spatial subdivision constant.
    #[clap(long, default_value = "1000")]
    c: f32,
    /// Directional refinement constant.
    #[clap(long, default_value = "0.01")]
    rho: f32,
    #[clap(long, default_value = "3")]
    training_count: u32,
    #[clap(long, default_value = "10000")]
    batch_size: usize,
    /// Tile edge length in pixels.
    #[clap(long, default_value = "32")]
    grid_size: u32,
    /// Samples per pixel of the final pass.
    #[clap(long)]
    spp: Option<u32>,

    #[clap(long, value_enum, default_value_t = IntegratorKind::Mis)]
    integrator: IntegratorKind,
    /// Path depth at which Russian roulette starts.
    #[clap(long, default_value = "5")]
    min_depth: u32,
    #[clap(long, default_value = "20")]
    max_depth: u32,
    /// Russian roulette continuation probability.
    #[clap(long, default_value = "0.9")]
    cont_prob: f32,
    /// Sample one random light per vertex instead of all of them.
    #[clap(long)]
    one_light: bool,

    /// Worker threads, all cores when unset.
    #[clap(long)]
    threads: Option<usize>,

    #[clap(long, default_value = "1")]
    scale: f32,

    #[clap(short, long, default_value = "img.png")]
    output: PathBuf,

    /// Writes the learned directional distribution at the scene centre.
    #[clap(long)]
    dirtree: Option<PathBuf>,

    #[clap(long)]
    scene_stats: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let options = Options::parse();

    if let Some(threads) = options.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("failed to configure the worker pool")?;
    }

    let (mut render_options, scene) = cornell_box();
    if let Some(width) = options.width {
        render_options.width = width;
    }
    if let Some(height) = options.height {
        render_options.height = height;
    }

    let guiding = GuidingOptions {
        k0: options.k0,
        c: options.c,
        rho: options.rho,
        training_count: options.training_count,
        record_batch_size: options.batch_size,
        task_grid_size: options.grid_size,
        rendering_spp: options.spp,
    };

    if options.scene_stats {
        scene.print_stats();
    }

    let integrator = GuidedIntegrator {
        kind: options.integrator,
        min_depth: options.min_depth,
        max_depth: options.max_depth,
        cont_prob: options.cont_prob,
        sample_all_lights: !options.one_light,
    };
    let scheduler =
        GuidedRenderScheduler::new(&scene, render_options, guiding)?.with_integrator(integrator)?;

    let start = Instant::now();
    let output = scheduler.render(&StderrProgress);
    let took = start.elapsed();

    println!("Took {:.2} seconds", took.as_secs_f64());
    if let Some(last) = output.training.last() {
        println!("SD-tree spatial leaves: {}", last.leaves);
    }
    println!("Average radiance: {}", output.film.average());

    let is_exr = options
        .output
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("exr"));
    if is_exr {
        output.film.to_rgb32f()?.save(&options.output)?;
    } else {
        output.film.to_srgb(options.scale).save(&options.output)?;
    }

    if let Some(path) = &options.dirtree {
        let center = scene.bounds().center();
        let sampler = output
            .guider
            .direction_sampler(center)
            .context("guider has no sampler at the scene centre")?;
        sampler.tree().to_image().save(path)?;
    }

    Ok(())
}
