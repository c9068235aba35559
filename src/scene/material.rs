use std::f32::consts::{FRAC_1_PI, TAU};

use glam::{Vec2, Vec3};

use crate::scene::Scene;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MaterialId(u32);

impl Scene {
    pub fn add_material(&mut self, material: Material) -> MaterialId {
        let id = MaterialId(self.materials.len() as u32);
        self.materials.push(material);
        id
    }

    pub fn material(&self, id: MaterialId) -> &Material {
        &self.materials[id.0 as usize]
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Material {
    pub bsdf: Bsdf,
    /// Radiance leaving the front face.
    pub emission: Vec3,
}

impl Material {
    pub fn diffuse(albedo: Vec3) -> Self {
        Material {
            bsdf: Bsdf::Diffuse { albedo },
            emission: Vec3::ZERO,
        }
    }

    pub fn mirror(reflectance: Vec3) -> Self {
        Material {
            bsdf: Bsdf::Mirror { reflectance },
            emission: Vec3::ZERO,
        }
    }

    pub fn emitter(emission: Vec3) -> Self {
        Material {
            bsdf: Bsdf::Diffuse { albedo: Vec3::ZERO },
            emission,
        }
    }

    pub fn emitted(&self, normal: Vec3, wo: Vec3) -> Vec3 {
        if normal.dot(wo) > 0.0 {
            self.emission
        } else {
            Vec3::ZERO
        }
    }
}

/// Outcome of importance sampling a [`Bsdf`].
#[derive(Copy, Clone, Debug)]
pub struct BsdfSample {
    pub wi: Vec3,
    /// BSDF value times `|cos θi|`.
    pub f_cos: Vec3,
    pub pdf: f32,
    pub is_delta: bool,
}

/// Two-sided scattering functions. Directions point away from the surface;
/// `n` is the geometric normal on either side.
#[derive(Copy, Clone, Debug)]
pub enum Bsdf {
    Diffuse { albedo: Vec3 },
    Mirror { reflectance: Vec3 },
}

impl Bsdf {
    pub fn is_delta(&self) -> bool {
        matches!(self, Bsdf::Mirror { .. })
    }

    pub fn eval(&self, n: Vec3, wo: Vec3, wi: Vec3) -> Vec3 {
        match *self {
            Bsdf::Diffuse { albedo } if same_hemisphere(n, wo, wi) => albedo * FRAC_1_PI,
            _ => Vec3::ZERO,
        }
    }

    pub fn pdf(&self, n: Vec3, wo: Vec3, wi: Vec3) -> f32 {
        match self {
            Bsdf::Diffuse { .. } if same_hemisphere(n, wo, wi) => wi.dot(n).abs() * FRAC_1_PI,
            _ => 0.0,
        }
    }

    pub fn sample(&self, n: Vec3, wo: Vec3, u: Vec2) -> Option<BsdfSample> {
        let n = if n.dot(wo) < 0.0 { -n } else { n };
        match *self {
            Bsdf::Diffuse { albedo } => {
                let wi = to_world(sample_cosine_hemisphere(u), n);
                let cos = wi.dot(n);
                if cos <= 0.0 {
                    return None;
                }
                Some(BsdfSample {
                    wi,
                    f_cos: albedo * FRAC_1_PI * cos,
                    pdf: cos * FRAC_1_PI,
                    is_delta: false,
                })
            }
            Bsdf::Mirror { reflectance } => Some(BsdfSample {
                wi: (2.0 * n.dot(wo) * n - wo).normalize(),
                f_cos: reflectance,
                pdf: 1.0,
                is_delta: true,
            }),
        }
    }
}

fn same_hemisphere(n: Vec3, wo: Vec3, wi: Vec3) -> bool {
    n.dot(wo) * n.dot(wi) > 0.0
}

fn sample_cosine_hemisphere(u: Vec2) -> Vec3 {
    let r = u.x.sqrt();
    let phi = TAU * u.y;
    Vec3::new(r * phi.cos(), r * phi.sin(), (1.0 - u.x).max(0.0).sqrt())
}

fn to_world(local: Vec3, n: Vec3) -> Vec3 {
    let (t, b) = n.any_orthonormal_pair();
    t * local.x + b * local.y + n * local.z
}

#[cfg(test)]
mod tests {
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    #[test]
    fn diffuse_samples_match_eval_and_pdf() {
        let bsdf = Bsdf::Diffuse {
            albedo: Vec3::splat(0.5),
        };
        let n = Vec3::new(0.0, 0.6, 0.8);
        let wo = Vec3::new(0.3, 0.3, 0.9).normalize();

        let mut rng = SmallRng::seed_from_u64(9);
        for _ in 0..1000 {
            let s = bsdf.sample(n, wo, Vec2::new(rng.random(), rng.random())).unwrap();
            assert!(s.wi.dot(n) > 0.0);
            assert!((s.pdf - bsdf.pdf(n, wo, s.wi)).abs() < 1e-5);
            let expected = bsdf.eval(n, wo, s.wi) * s.wi.dot(n);
            assert!((s.f_cos - expected).abs().max_element() < 1e-5);
        }
    }

    #[test]
    fn diffuse_is_two_sided() {
        let bsdf = Bsdf::Diffuse { albedo: Vec3::ONE };
        let s = bsdf.sample(Vec3::Z, Vec3::NEG_Z, Vec2::splat(0.3)).unwrap();
        assert!(s.wi.z < 0.0);
        assert_eq!(bsdf.eval(Vec3::Z, Vec3::NEG_Z, Vec3::Z), Vec3::ZERO);
        assert_eq!(bsdf.pdf(Vec3::Z, Vec3::NEG_Z, Vec3::Z), 0.0);
    }

    #[test]
    fn mirror_reflects_about_normal() {
        let bsdf = Bsdf::Mirror {
            reflectance: Vec3::splat(0.9),
        };
        let wo = Vec3::new(1.0, 0.0, 1.0).normalize();
        let s = bsdf.sample(Vec3::Z, wo, Vec2::ZERO).unwrap();
        assert!(s.is_delta);
        assert!((s.wi - Vec3::new(-1.0, 0.0, 1.0).normalize()).length() < 1e-5);
        assert_eq!(bsdf.pdf(Vec3::Z, wo, s.wi), 0.0);
    }

    #[test]
    fn emission_only_from_front() {
        let light = Material::emitter(Vec3::splat(4.0));
        assert_eq!(light.emitted(Vec3::NEG_Y, Vec3::NEG_Y), Vec3::splat(4.0));
        assert_eq!(light.emitted(Vec3::NEG_Y, Vec3::Y), Vec3::ZERO);
    }
}
