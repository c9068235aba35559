use glam::{Vec2, Vec3, Vec4};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Source of uniform samples in `[0,1)`.
pub trait Sampler {
    fn sample1(&mut self) -> f32;

    fn sample2(&mut self) -> Vec2 {
        Vec2::new(self.sample1(), self.sample1())
    }

    fn sample3(&mut self) -> Vec3 {
        Vec3::new(self.sample1(), self.sample1(), self.sample1())
    }

    fn sample4(&mut self) -> Vec4 {
        Vec4::new(self.sample1(), self.sample1(), self.sample1(), self.sample1())
    }

    fn sample5(&mut self) -> [f32; 5] {
        std::array::from_fn(|_| self.sample1())
    }
}

pub struct IndependentSampler {
    rng: SmallRng,
}

impl IndependentSampler {
    pub fn new(seed: u64) -> Self {
        IndependentSampler {
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl Sampler for IndependentSampler {
    fn sample1(&mut self) -> f32 {
        self.rng.random()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_stay_in_unit_interval() {
        let mut sampler = IndependentSampler::new(5);
        for _ in 0..10_000 {
            let u = sampler.sample4();
            assert!(u.cmpge(Vec4::ZERO).all() && u.cmplt(Vec4::ONE).all());
        }
    }

    #[test]
    fn seeds_are_reproducible() {
        let mut a = IndependentSampler::new(17);
        let mut b = IndependentSampler::new(17);
        assert_eq!(a.sample5(), b.sample5());
        assert_ne!(a.sample2(), IndependentSampler::new(18).sample2());
    }
}
