use std::sync::Arc;

use glam::{Vec2, Vec3, Vec4};

use crate::guiding::alias_table::AliasTable;
use crate::guiding::direction_map::{SPHERE_AREA, canonical_to_direction, direction_to_canonical};
use crate::guiding::quad_tree::QuadTree;

#[derive(Copy, Clone, Debug)]
struct Region {
    low: Vec2,
    extent: f32,
    integral_ratio: f32,
}

/// Immutable piecewise-constant distribution over the sphere, harvested from
/// a trained [`QuadTree`].
///
/// A tree with no energy yields the uniform sphere distribution, so a sampler
/// is usable before any radiance has been observed.
#[derive(Debug)]
pub struct DirectionSampler {
    regions: Vec<Region>,
    alias: AliasTable,
    tree: QuadTree,
    total_integral: f32,
}

impl DirectionSampler {
    pub fn new(tree: QuadTree) -> Self {
        let total_integral = tree.total_integral();
        if !(total_integral > 0.0 && total_integral.is_finite()) {
            return Self::uniform_with(tree);
        }

        let (regions, integrals): (Vec<_>, Vec<_>) = tree
            .leaves()
            .into_iter()
            .filter_map(|leaf| {
                let integral = leaf.area() * leaf.value;
                (integral > 0.0).then_some((
                    Region {
                        low: leaf.low,
                        extent: leaf.extent,
                        integral_ratio: integral / total_integral,
                    },
                    integral,
                ))
            })
            .unzip();

        DirectionSampler {
            regions,
            alias: AliasTable::new(&integrals),
            tree,
            total_integral,
        }
    }

    pub fn uniform() -> Self {
        Self::uniform_with(QuadTree::new())
    }

    fn uniform_with(tree: QuadTree) -> Self {
        DirectionSampler {
            regions: vec![Region {
                low: Vec2::ZERO,
                extent: 1.0,
                integral_ratio: 1.0,
            }],
            alias: AliasTable::new(&[1.0]),
            tree,
            total_integral: 0.0,
        }
    }

    pub fn is_uniform(&self) -> bool {
        self.total_integral == 0.0
    }

    pub fn total_integral(&self) -> f32 {
        self.total_integral
    }

    pub fn tree(&self) -> &QuadTree {
        &self.tree
    }

    /// Picks a region with `u.xy`, a point inside it with `u.zw`, and returns
    /// the direction with its solid-angle density.
    pub fn sample(&self, u: Vec4) -> (Vec3, f32) {
        let region = &self.regions[self.alias.sample(u.x, u.y)];
        let p = region.low + region.extent * Vec2::new(u.z, u.w);
        let pdf = region.integral_ratio / (SPHERE_AREA * region.extent * region.extent);
        (canonical_to_direction(p), pdf)
    }

    pub fn pdf(&self, dir: Vec3) -> f32 {
        if self.is_uniform() {
            return 1.0 / SPHERE_AREA;
        }

        let (_, value) = self.tree.leaf_area_and_value(direction_to_canonical(dir));
        value / (SPHERE_AREA * self.total_integral)
    }
}

/// Accumulates radiance observations for one spatial region and turns them
/// into a fresh [`DirectionSampler`] at the end of every training round.
#[derive(Clone, Debug, Default)]
pub struct DirectionTrainer {
    tree: QuadTree,
}

impl DirectionTrainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, dir: Vec3, value: f32) {
        self.tree.record(direction_to_canonical(dir), value);
    }

    /// Refines the tree against `rho` times its total energy, harvests it into
    /// a sampler and restarts training on the refined structure.
    pub fn iterate(&mut self, rho: f32) -> Arc<DirectionSampler> {
        let threshold = rho * self.tree.total_integral();
        self.tree.refine(threshold);
        self.harvest()
    }

    /// Harvests the current statistics as they are and restarts training on
    /// the same structure.
    pub fn harvest(&mut self) -> Arc<DirectionSampler> {
        let mut next = QuadTree::new();
        next.copy_structure_from(&self.tree);
        let trained = std::mem::replace(&mut self.tree, next);
        Arc::new(DirectionSampler::new(trained))
    }

    pub fn tree(&self) -> &QuadTree {
        &self.tree
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use float_cmp::approx_eq;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn random_vec4(rng: &mut SmallRng) -> Vec4 {
        Vec4::new(rng.random(), rng.random(), rng.random(), rng.random())
    }

    fn random_direction(rng: &mut SmallRng) -> Vec3 {
        canonical_to_direction(Vec2::new(rng.random(), rng.random()))
    }

    /// Records a lobe around `axis` plus a weak uniform floor.
    fn feed_lobe(trainer: &mut DirectionTrainer, axis: Vec3, samples: usize, seed: u64) {
        let mut rng = SmallRng::seed_from_u64(seed);
        for _ in 0..samples {
            let dir = random_direction(&mut rng);
            let value = 0.05 + dir.dot(axis).max(0.0).powi(8);
            trainer.record(dir, value);
        }
    }

    fn lobe_trainer(axis: Vec3, samples: usize) -> DirectionTrainer {
        let mut trainer = DirectionTrainer::new();
        feed_lobe(&mut trainer, axis, samples, 11);
        trainer
    }

    #[test]
    fn sample_pdf_matches_pdf_lookup() {
        let mut trainer = lobe_trainer(Vec3::new(0.3, -0.5, 0.8).normalize(), 20_000);
        let sampler = trainer.iterate(0.01);

        let mut rng = SmallRng::seed_from_u64(1);
        let mut mismatches = 0;
        for _ in 0..1_000 {
            let (dir, pdf) = sampler.sample(random_vec4(&mut rng));
            assert!(approx_eq!(f32, dir.length(), 1.0, epsilon = 1e-4));
            let lookup = sampler.pdf(dir);
            // points right on a leaf border may round into the neighbour
            if (pdf - lookup).abs() > 1e-3 * pdf.max(lookup) {
                mismatches += 1;
            }
        }
        assert!(mismatches < 10, "{mismatches}");
    }

    #[test]
    fn pdf_integrates_to_one() {
        let mut trainer = lobe_trainer(Vec3::Y, 20_000);
        let sampler = trainer.iterate(0.01);

        // uniform sphere estimator of the integral of pdf
        let mut rng = SmallRng::seed_from_u64(2);
        let n = 200_000;
        let integral = (0..n)
            .map(|_| (sampler.pdf(random_direction(&mut rng)) * 4.0 * PI) as f64)
            .sum::<f64>()
            / n as f64;
        assert!((integral - 1.0).abs() < 0.02, "{integral}");
    }

    #[test]
    fn empty_tree_degrades_to_uniform() {
        let sampler = DirectionTrainer::new().iterate(0.01);
        assert!(sampler.is_uniform());

        let mut rng = SmallRng::seed_from_u64(3);
        let mut mean = Vec3::ZERO;
        let n = 50_000;
        for _ in 0..n {
            let (dir, pdf) = sampler.sample(random_vec4(&mut rng));
            assert_eq!(pdf, 1.0 / (4.0 * PI));
            assert_eq!(sampler.pdf(dir), 1.0 / (4.0 * PI));
            mean += dir;
        }
        // the first moment of a uniform sphere distribution vanishes
        assert!((mean / n as f32).length() < 0.02);

        let mut upper = 0;
        for _ in 0..n {
            if sampler.sample(random_vec4(&mut rng)).0.z > 0.0 {
                upper += 1;
            }
        }
        assert!((upper as f32 / n as f32 - 0.5).abs() < 0.01);
    }

    #[test]
    fn zero_valued_records_still_degrade_to_uniform() {
        let mut trainer = DirectionTrainer::new();
        trainer.record(Vec3::X, 0.0);
        trainer.record(Vec3::Z, 0.0);
        assert!(trainer.iterate(0.5).is_uniform());
    }

    #[test]
    fn samples_concentrate_around_lobe() {
        let axis = Vec3::new(-0.6, 0.0, 0.8);
        let mut trainer = lobe_trainer(axis, 50_000);
        trainer.iterate(0.01);

        // the refined leaves only carry their parents' means until a round of
        // records lands on them, so the first sampler is still coarse
        feed_lobe(&mut trainer, axis, 50_000, 12);
        let sampler = trainer.iterate(0.01);

        let mut rng = SmallRng::seed_from_u64(4);
        let n = 10_000;
        let near = (0..n)
            .filter(|_| sampler.sample(random_vec4(&mut rng)).0.dot(axis) > 0.7)
            .count();
        // a uniform sampler would land there about 15% of the time
        assert!(near as f32 / n as f32 > 0.4, "{near}");
    }

    #[test]
    fn iterate_restarts_on_refined_structure() {
        let mut trainer = lobe_trainer(Vec3::Z, 20_000);
        let sampler = trainer.iterate(0.01);

        assert_eq!(trainer.tree().total_integral(), 0.0);
        assert_eq!(trainer.tree().leaves().len(), sampler.tree().leaves().len());
        assert!(sampler.tree().leaves().len() > 4);
    }

    #[test]
    fn clone_continues_independently() {
        let mut a = lobe_trainer(Vec3::X, 1_000);
        let mut b = a.clone();
        assert_eq!(a.tree().leaves(), b.tree().leaves());

        b.record(Vec3::NEG_X, 100.0);
        assert!(b.tree().total_integral() > a.tree().total_integral());

        let sa = a.iterate(0.1);
        let sb = b.iterate(0.1);
        assert!(sb.pdf(Vec3::NEG_X) > sa.pdf(Vec3::NEG_X));
    }
}
