use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use float_cmp::approx_eq;
use glam::{Vec2, Vec3, Vec4};
use pbr_guide::Bounds;
use pbr_guide::guiding::direction_map::{canonical_to_direction, direction_to_canonical};
use pbr_guide::guiding::{DirectionSampler, Guider, RecordBatchBuilder};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

fn unit_guider() -> Guider {
    Guider::new(Bounds::new(Vec3::ZERO, Vec3::ONE))
}

/// Direction whose canonical coordinate is uniform in `[0.2,0.3]x[0.7,0.8]`.
fn lobe_direction(rng: &mut SmallRng) -> Vec3 {
    let p = Vec2::new(0.2, 0.7) + 0.1 * Vec2::new(rng.random(), rng.random());
    canonical_to_direction(p)
}

fn record_concurrently(guider: &Guider, position: Vec3, seed: u64) {
    thread::scope(|s| {
        for worker in 0..4 {
            s.spawn(move || {
                let mut rng = SmallRng::seed_from_u64(seed * 10 + worker);
                let mut builder = RecordBatchBuilder::new(guider, 1000);
                for _ in 0..2500 {
                    builder.add(position, lobe_direction(&mut rng), 1.0);
                }
            });
        }
    });
}

/// Share of sampled directions whose canonical coordinate satisfies `inside`.
fn sampled_share(sampler: &DirectionSampler, inside: impl Fn(Vec2) -> bool) -> f32 {
    let mut rng = SmallRng::seed_from_u64(99);
    let n = 10_000;
    let hits = (0..n)
        .filter(|_| {
            let u = Vec4::new(rng.random(), rng.random(), rng.random(), rng.random());
            inside(direction_to_canonical(sampler.sample(u).0))
        })
        .count();
    hits as f32 / n as f32
}

/// Exact integral of the sampler's density over the sphere, leaf by leaf.
fn pdf_integral(sampler: &DirectionSampler) -> f32 {
    sampler
        .tree()
        .leaves()
        .iter()
        .map(|leaf| {
            let center = leaf.low + Vec2::splat(0.5 * leaf.extent);
            sampler.pdf(canonical_to_direction(center)) * 4.0 * PI * leaf.area()
        })
        .sum()
}

#[test]
fn concurrent_batches_are_applied_exactly_once() {
    let guider = unit_guider();
    let position = Vec3::splat(0.5);

    record_concurrently(&guider, position, 1);
    let stats = guider.iterate_end();
    assert_eq!(stats.records, 10_000);

    let sampler = guider.direction_sampler(position).unwrap();
    let share = sampled_share(&sampler, |p| p.x < 0.5 && p.y >= 0.5);
    assert!(share > 0.9, "{share}");
}

#[test]
fn refined_sampler_concentrates_on_lobe() {
    let guider = unit_guider();
    let position = Vec3::splat(0.5);

    record_concurrently(&guider, position, 2);
    let first = guider.iterate(0.01, u32::MAX);
    assert_eq!(first.records, 10_000);
    assert_eq!(first.leaves, 1);

    record_concurrently(&guider, position, 3);
    let last = guider.iterate_end();
    assert_eq!(last.records, 10_000);

    let sampler = guider.direction_sampler(position).unwrap();
    let window = |p: Vec2| (0.15..0.35).contains(&p.x) && (0.65..0.85).contains(&p.y);
    let share = sampled_share(&sampler, window);
    assert!(share > 0.9, "{share}");
    assert!(approx_eq!(f32, pdf_integral(&sampler), 1.0, epsilon = 1e-3));
}

#[test]
fn readers_never_see_partial_samplers() {
    let guider = unit_guider();
    let stop_producing = AtomicBool::new(false);
    let finalized = AtomicBool::new(false);

    let checked = thread::scope(|s| {
        let producer = s.spawn(|| {
            let mut rng = SmallRng::seed_from_u64(4);
            while !stop_producing.load(Ordering::Relaxed) {
                let position = Vec3::new(rng.random(), rng.random(), rng.random());
                guider.record(position, lobe_direction(&mut rng), rng.random());
            }
        });

        let reader = s.spawn(|| {
            let mut rng = SmallRng::seed_from_u64(5);
            let mut checked = 0;
            loop {
                let done = finalized.load(Ordering::Acquire);
                let position = Vec3::new(rng.random(), rng.random(), rng.random());
                if let Some(sampler) = guider.direction_sampler(position) {
                    let integral = pdf_integral(&sampler);
                    assert!(approx_eq!(f32, integral, 1.0, epsilon = 1e-3), "{integral}");

                    let u = Vec4::new(rng.random(), rng.random(), rng.random(), rng.random());
                    let (dir, pdf) = sampler.sample(u);
                    assert!(pdf > 0.0 && pdf.is_finite());
                    assert!(approx_eq!(f32, dir.length(), 1.0, epsilon = 1e-4));
                    checked += 1;
                }
                if done {
                    break checked;
                }
            }
        });

        for _ in 0..4 {
            thread::sleep(Duration::from_millis(20));
            guider.iterate(0.01, 2000);
        }
        stop_producing.store(true, Ordering::Relaxed);
        producer.join().unwrap();

        guider.iterate_end();
        finalized.store(true, Ordering::Release);
        reader.join().unwrap()
    });

    assert!(checked > 0);
    assert!(guider.is_finalized());
}
