use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::bail;
use glam::Vec3;
use rayon::prelude::*;

use crate::film::Film;
use crate::guiding::{Guider, IterationStats, RecordBatchBuilder};
use crate::integrator::{GuidedIntegrator, PathGuide};
use crate::options::{GuidingOptions, RenderOptions};
use crate::sampler::{IndependentSampler, Sampler};
use crate::scene::{Camera, SceneAccess};

/// Fraction of the scene diagonal the guided volume extends past the scene.
const BOUNDS_PADDING: f32 = 0.1;

/// Half-open pixel rectangle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Tile {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Tile {
    pub fn pixel_count(&self) -> usize {
        ((self.x1 - self.x0) * (self.y1 - self.y0)) as usize
    }

    pub fn pixels(&self) -> impl Iterator<Item = (u32, u32)> + use<> {
        let (x0, x1) = (self.x0, self.x1);
        (self.y0..self.y1).flat_map(move |y| (x0..x1).map(move |x| (x, y)))
    }
}

/// Splits the image into `grid_size`-pixel square tiles in row-major order.
/// Tiles on the right and bottom edges may be smaller.
pub fn divide_grid(width: u32, height: u32, grid_size: u32) -> Vec<Tile> {
    let mut tiles = vec![];
    for y0 in (0..height).step_by(grid_size as usize) {
        for x0 in (0..width).step_by(grid_size as usize) {
            tiles.push(Tile {
                x0,
                y0,
                x1: (x0 + grid_size).min(width),
                y1: (y0 + grid_size).min(height),
            });
        }
    }
    tiles
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PassKind {
    Training,
    Final,
}

#[derive(Copy, Clone, Debug)]
pub struct PassInfo {
    pub kind: PassKind,
    /// Index among passes of the same kind.
    pub index: u32,
    pub spp: u32,
}

impl PassInfo {
    fn seed(&self, tile: usize) -> u64 {
        let pass = match self.kind {
            PassKind::Training => self.index as u64 + 1,
            PassKind::Final => 0,
        };
        (pass << 32) | tile as u64
    }
}

impl fmt::Display for PassInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PassKind::Training => write!(f, "training pass {} ({} spp)", self.index + 1, self.spp),
            PassKind::Final => write!(f, "final pass ({} spp)", self.spp),
        }
    }
}

pub trait ProgressReporter: Sync {
    fn begin_pass(&self, _pass: &PassInfo) {}

    /// Called from worker threads as tiles complete.
    fn progress(&self, pass: &PassInfo, percent: f32);

    fn end_pass(&self, _pass: &PassInfo, _elapsed: Duration) {}
}

/// Rewrites a single percentage line on stderr.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn progress(&self, pass: &PassInfo, percent: f32) {
        eprint!("\r{pass}: {percent:5.1}%         ");
        let _ = std::io::stderr().flush();
    }

    fn end_pass(&self, _pass: &PassInfo, _elapsed: Duration) {
        eprintln!();
    }
}

pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn progress(&self, _pass: &PassInfo, _percent: f32) {}
}

pub struct RenderOutput {
    /// Result of the final pass.
    pub film: Film,
    /// The trained, finalized guider.
    pub guider: Guider,
    /// One entry per training pass, in order.
    pub training: Vec<IterationStats>,
    pub final_spp: u32,
}

/// Alternates training passes with SD-tree iterations, then renders the image
/// with the frozen guider.
pub struct GuidedRenderScheduler<'a, S> {
    scene: &'a S,
    render: RenderOptions,
    guiding: GuidingOptions,
    integrator: GuidedIntegrator,
    camera: Camera,
}

impl<'a, S: SceneAccess> GuidedRenderScheduler<'a, S> {
    pub fn new(scene: &'a S, render: RenderOptions, guiding: GuidingOptions) -> anyhow::Result<Self> {
        render.validate()?;
        guiding.validate()?;
        if scene.bounds().is_empty() {
            bail!("scene has no geometry to guide");
        }

        Ok(GuidedRenderScheduler {
            scene,
            camera: Camera::new(&render.camera, render.aspect_ratio()),
            render,
            guiding,
            integrator: GuidedIntegrator::default(),
        })
    }

    pub fn with_integrator(mut self, integrator: GuidedIntegrator) -> anyhow::Result<Self> {
        integrator.validate()?;
        self.integrator = integrator;
        Ok(self)
    }

    pub fn render(&self, progress: &dyn ProgressReporter) -> RenderOutput {
        let bounds = self.scene.bounds().padded(BOUNDS_PADDING);
        log::debug!("guided volume: {bounds:?}");
        let guider = Guider::new(bounds);

        let mut training = vec![];
        let training_count = self.guiding.training_count;
        for (index, spp) in (0..).zip(self.guiding.training_spp()) {
            let pass = PassInfo {
                kind: PassKind::Training,
                index,
                spp,
            };
            self.run_pass(&pass, &guider, true, progress);

            let stats = if index + 1 < training_count {
                let threshold = self.guiding.record_count_threshold(spp);
                let stats = guider.iterate(self.guiding.rho, threshold);
                log::info!(
                    "SD-tree iteration {}: {} records, threshold {threshold}, {} leaves ({} new)",
                    index + 1,
                    stats.records,
                    stats.leaves,
                    stats.splits
                );
                stats
            } else {
                guider.iterate_end()
            };
            training.push(stats);
        }

        let pass = PassInfo {
            kind: PassKind::Final,
            index: 0,
            spp: self.guiding.final_spp(),
        };
        let tiles = self.run_pass(&pass, &guider, false, progress);

        let mut film = Film::new(self.render.width, self.render.height);
        for (tile, pixels) in &tiles {
            film.write_tile(tile, pixels);
        }

        RenderOutput {
            film,
            guider,
            training,
            final_spp: pass.spp,
        }
    }

    fn run_pass(
        &self,
        pass: &PassInfo,
        guider: &Guider,
        record: bool,
        progress: &dyn ProgressReporter,
    ) -> Vec<(Tile, Vec<Vec3>)> {
        let tiles = divide_grid(self.render.width, self.render.height, self.guiding.task_grid_size);
        let samplers = guider.sampler_index();
        let done = AtomicUsize::new(0);

        log::info!("starting {pass} over {} tiles", tiles.len());
        progress.begin_pass(pass);
        let start = Instant::now();

        let rendered = tiles
            .par_iter()
            .enumerate()
            .map(|(i, tile)| {
                let mut sampler = IndependentSampler::new(pass.seed(i));
                let mut recorder =
                    record.then(|| RecordBatchBuilder::new(guider, self.guiding.record_batch_size));
                let mut guide = PathGuide {
                    recorder: recorder.as_mut(),
                    samplers: samplers.as_deref(),
                };
                let pixels = self.render_tile(tile, pass.spp, &mut sampler, &mut guide);

                let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                progress.progress(pass, 100.0 * n as f32 / tiles.len() as f32);
                (*tile, pixels)
            })
            .collect();

        let elapsed = start.elapsed();
        progress.end_pass(pass, elapsed);
        log::info!("{pass} took {:.2} seconds", elapsed.as_secs_f64());

        rendered
    }

    fn render_tile(
        &self,
        tile: &Tile,
        spp: u32,
        sampler: &mut impl Sampler,
        guide: &mut PathGuide,
    ) -> Vec<Vec3> {
        let size = glam::Vec2::new(self.render.width as f32, self.render.height as f32);
        tile.pixels()
            .map(|(x, y)| {
                let mut sum = Vec3::ZERO;
                for _ in 0..spp {
                    let film = (glam::Vec2::new(x as f32, y as f32) + sampler.sample2()) / size;
                    let ray = self.camera.generate_ray(film.x, film.y);
                    let radiance = self.integrator.radiance(self.scene, &ray, sampler, guide);
                    if radiance.is_finite() {
                        sum += radiance;
                    }
                }
                sum / spp as f32
            })
            .collect()
    }
}
