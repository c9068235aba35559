use anyhow::bail;
use glam::{Vec2, Vec3};

use crate::guiding::{RecordBatchBuilder, SamplerIndex};
use crate::sampler::Sampler;
use crate::scene::{Bsdf, BsdfSample, HitData, Ray, SceneAccess};

/// Probability of sampling the learned distribution instead of the BSDF at a
/// non-delta vertex with a trained sampler.
const GUIDER_SELECT_PROB: f32 = 0.5;

pub fn luminance(rgb: Vec3) -> f32 {
    rgb.dot(Vec3::new(0.2126, 0.7152, 0.0722))
}

/// Connection of one path to the guider.
pub struct PathGuide<'a, 'g> {
    /// Receives the radiance arriving at every scattering vertex.
    pub recorder: Option<&'a mut RecordBatchBuilder<'g>>,
    /// Learned distributions to sample from.
    pub samplers: Option<&'a SamplerIndex>,
}

impl PathGuide<'_, '_> {
    pub fn none() -> Self {
        PathGuide {
            recorder: None,
            samplers: None,
        }
    }
}

/// Strategy used to estimate the radiance at each vertex.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum IntegratorKind {
    /// Only scattering directions are sampled. Emission is picked up when a
    /// path happens to hit a light.
    Native,
    /// Lights are also sampled directly and combined with BSDF sampling by
    /// the balance heuristic. Records exclude the emission of the vertex they
    /// point at.
    #[default]
    Mis,
}

/// Unidirectional path tracer that mixes BSDF sampling with the learned
/// directional distributions using the balance heuristic.
#[derive(Copy, Clone, Debug)]
pub struct GuidedIntegrator {
    pub kind: IntegratorKind,
    pub min_depth: u32,
    pub max_depth: u32,
    /// Russian roulette continuation probability past `min_depth`.
    pub cont_prob: f32,
    /// Sample every light at each vertex instead of one picked at random.
    pub sample_all_lights: bool,
}

impl Default for GuidedIntegrator {
    fn default() -> Self {
        GuidedIntegrator {
            kind: IntegratorKind::default(),
            min_depth: 5,
            max_depth: 20,
            cont_prob: 0.9,
            sample_all_lights: true,
        }
    }
}

/// Scattering direction chosen at a vertex with the weight applied to the
/// radiance arriving along it.
struct Continuation {
    wi: Vec3,
    weight: Vec3,
    from_guider: bool,
}

impl GuidedIntegrator {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.min_depth < 1 {
            bail!("invalid min depth value: {}", self.min_depth);
        }
        if self.max_depth < self.min_depth {
            bail!("invalid max depth value: {}", self.max_depth);
        }
        if !(0.0..=1.0).contains(&self.cont_prob) {
            bail!("invalid continue prob value: {}", self.cont_prob);
        }
        Ok(())
    }

    /// Radiance arriving at the camera along `ray`.
    pub fn radiance<S: SceneAccess>(
        &self,
        scene: &S,
        ray: &Ray,
        sampler: &mut impl Sampler,
        guide: &mut PathGuide,
    ) -> Vec3 {
        match self.kind {
            IntegratorKind::Native => self.incoming(scene, ray, sampler, guide, 1),
            IntegratorKind::Mis => {
                let Some(hit) = scene.hit(ray) else {
                    return scene.environment(ray.direction);
                };
                let wo = -ray.direction;
                let emitted = scene.material(hit.material).emitted(hit.normal, wo);
                emitted + self.excluding_source(scene, &hit, wo, sampler, guide, 1)
            }
        }
    }

    fn incoming<S: SceneAccess>(
        &self,
        scene: &S,
        ray: &Ray,
        sampler: &mut impl Sampler,
        guide: &mut PathGuide,
        depth: u32,
    ) -> Vec3 {
        let Some(hit) = scene.hit(ray) else {
            return scene.environment(ray.direction);
        };

        let wo = -ray.direction;
        let emitted = scene.material(hit.material).emitted(hit.normal, wo);
        emitted + self.scattered(scene, &hit, wo, sampler, guide, depth)
    }

    /// Russian roulette factor for a vertex at `depth`, `None` if the path
    /// ends there.
    fn roulette(&self, depth: u32, sampler: &mut impl Sampler) -> Option<f32> {
        if depth < self.min_depth {
            return Some(1.0);
        }
        if depth > self.max_depth || sampler.sample1() > self.cont_prob {
            return None;
        }
        Some(1.0 / self.cont_prob)
    }

    /// Radiance scattered at `hit` towards `wo`, emission excluded.
    fn scattered<S: SceneAccess>(
        &self,
        scene: &S,
        hit: &HitData,
        wo: Vec3,
        sampler: &mut impl Sampler,
        guide: &mut PathGuide,
        depth: u32,
    ) -> Vec3 {
        let Some(rr_factor) = self.roulette(depth, sampler) else {
            return Vec3::ZERO;
        };

        let bsdf = scene.material(hit.material).bsdf;
        let bsdf_sample = bsdf.sample(hit.normal, wo, sampler.sample2());
        let Some(next) = continuation(hit, wo, &bsdf, bsdf_sample, sampler, guide) else {
            return Vec3::ZERO;
        };

        let ray = Ray::new(hit.position, next.wi);
        let incoming = self.incoming(scene, &ray, sampler, guide, depth + 1);

        if let Some(recorder) = guide.recorder.as_deref_mut() {
            recorder.add(hit.position, next.wi, luminance(incoming));
        }

        rr_factor * next.weight * incoming
    }

    /// Radiance leaving `hit` towards `wo` minus the emission of `hit`. Direct
    /// lighting is estimated by light and BSDF sampling; the path continues
    /// along a guided or BSDF direction that no longer counts emission.
    fn excluding_source<S: SceneAccess>(
        &self,
        scene: &S,
        hit: &HitData,
        wo: Vec3,
        sampler: &mut impl Sampler,
        guide: &mut PathGuide,
        depth: u32,
    ) -> Vec3 {
        let Some(rr_factor) = self.roulette(depth, sampler) else {
            return Vec3::ZERO;
        };

        let bsdf = scene.material(hit.material).bsdf;
        let mut radiance = Vec3::ZERO;

        if !bsdf.is_delta() {
            radiance += self.sample_lights(scene, hit, wo, &bsdf, sampler);
        }

        let bsdf_sample = bsdf
            .sample(hit.normal, wo, sampler.sample2())
            .filter(|s| s.f_cos != Vec3::ZERO && s.pdf > 0.0);
        let mut bsdf_hit = None;
        if let Some(sample) = bsdf_sample {
            let next = scene.hit(&Ray::new(hit.position, sample.wi));
            radiance += direct_from_bsdf(scene, hit, &sample, next.as_ref());
            bsdf_hit = Some(next);
        }

        let Some(next) = continuation(hit, wo, &bsdf, bsdf_sample, sampler, guide) else {
            return rr_factor * radiance;
        };

        // a BSDF continuation reuses the ray traced for direct lighting
        let next_hit = match bsdf_hit {
            Some(next_hit) if !next.from_guider => next_hit,
            _ => scene.hit(&Ray::new(hit.position, next.wi)),
        };

        if let Some(next_hit) = next_hit {
            let incoming = self.excluding_source(scene, &next_hit, -next.wi, sampler, guide, depth + 1);
            if let Some(recorder) = guide.recorder.as_deref_mut() {
                recorder.add(hit.position, next.wi, luminance(incoming));
            }
            radiance += next.weight * incoming;
        }

        rr_factor * radiance
    }

    fn sample_lights<S: SceneAccess>(
        &self,
        scene: &S,
        hit: &HitData,
        wo: Vec3,
        bsdf: &Bsdf,
        sampler: &mut impl Sampler,
    ) -> Vec3 {
        let count = scene.light_count();
        if count == 0 {
            return Vec3::ZERO;
        }

        if self.sample_all_lights {
            (0..count)
                .map(|light| direct_from_light(scene, light, hit, wo, bsdf, sampler.sample2()))
                .sum()
        } else {
            let light = ((sampler.sample1() * count as f32) as usize).min(count - 1);
            count as f32 * direct_from_light(scene, light, hit, wo, bsdf, sampler.sample2())
        }
    }
}

/// Picks the next direction at a non-emitting vertex. With a trained sampler
/// at the vertex the guider and the BSDF are each chosen half of the time and
/// weighted by the balance heuristic over both densities.
fn continuation(
    hit: &HitData,
    wo: Vec3,
    bsdf: &Bsdf,
    bsdf_sample: Option<BsdfSample>,
    sampler: &mut impl Sampler,
    guide: &PathGuide,
) -> Option<Continuation> {
    let n = hit.normal;
    let directional = match guide.samplers {
        Some(index) if !bsdf.is_delta() => index.sampler(hit.position),
        _ => None,
    };
    let guider_prob = if directional.is_some() {
        GUIDER_SELECT_PROB
    } else {
        0.0
    };
    let bsdf_prob = 1.0 - guider_prob;

    match directional {
        Some(directional) if sampler.sample1() < guider_prob => {
            let (wi, guider_pdf) = directional.sample(sampler.sample4());
            let f_cos = bsdf.eval(n, wo, wi) * wi.dot(n).abs();
            if f_cos == Vec3::ZERO {
                return None;
            }
            let bsdf_pdf = bsdf.pdf(n, wo, wi);
            Some(Continuation {
                wi,
                weight: f_cos / ((bsdf_pdf + guider_pdf) * guider_prob),
                from_guider: true,
            })
        }
        _ => {
            let sample = bsdf_sample?;
            if sample.f_cos == Vec3::ZERO || !(sample.pdf > 0.0) {
                return None;
            }
            let guider_pdf = match directional {
                Some(directional) if !sample.is_delta => directional.pdf(sample.wi),
                _ => 0.0,
            };
            Some(Continuation {
                wi: sample.wi,
                weight: sample.f_cos / ((sample.pdf + guider_pdf) * bsdf_prob),
                from_guider: false,
            })
        }
    }
}

/// Light sampling half of the direct lighting estimate.
fn direct_from_light<S: SceneAccess>(
    scene: &S,
    light: usize,
    hit: &HitData,
    wo: Vec3,
    bsdf: &Bsdf,
    u: Vec2,
) -> Vec3 {
    let Some(sample) = scene.sample_light(light, hit.position, u) else {
        return Vec3::ZERO;
    };
    if !(sample.pdf > 0.0) || !scene.visible(hit.position, sample.position) {
        return Vec3::ZERO;
    }

    let f = bsdf.eval(hit.normal, wo, sample.wi);
    if f == Vec3::ZERO {
        return Vec3::ZERO;
    }
    let bsdf_pdf = bsdf.pdf(hit.normal, wo, sample.wi);
    sample.radiance * f * sample.wi.dot(hit.normal).abs() / (sample.pdf + bsdf_pdf)
}

/// BSDF sampling half of the direct lighting estimate. Rays escaping the
/// scene see the environment, which is never light sampled.
fn direct_from_bsdf<S: SceneAccess>(
    scene: &S,
    hit: &HitData,
    sample: &BsdfSample,
    next: Option<&HitData>,
) -> Vec3 {
    let Some(next) = next else {
        return scene.environment(sample.wi) * sample.f_cos / sample.pdf;
    };

    let emitted = scene.material(next.material).emitted(next.normal, -sample.wi);
    if emitted == Vec3::ZERO {
        return Vec3::ZERO;
    }
    if sample.is_delta {
        return emitted * sample.f_cos / sample.pdf;
    }
    let light_pdf = scene.light_pdf(hit.position, next);
    emitted * sample.f_cos / (sample.pdf + light_pdf)
}

#[cfg(test)]
mod tests {
    use crate::bounds::Bounds;
    use crate::guiding::Guider;
    use crate::guiding::direction_map::canonical_to_direction;
    use crate::sampler::IndependentSampler;
    use crate::scene::{Material, Quad, Scene};

    use super::*;

    /// Closed box with uniform emission `e` and albedo `a`, where radiance is
    /// `e / (1 - a)` everywhere. With `lights` every wall is also registered
    /// for light sampling.
    fn furnace(albedo: f32, emission: f32, lights: bool) -> Scene {
        let mut scene = Scene::new(Vec3::ZERO);
        let wall = scene.add_material(Material {
            emission: Vec3::splat(emission),
            ..Material::diffuse(Vec3::splat(albedo))
        });
        let (x, y, z) = (Vec3::X * 2.0, Vec3::Y * 2.0, Vec3::Z * 2.0);
        let (low, high) = (Vec3::splat(-1.0), Vec3::ONE);
        // every face points inwards
        for (corner, u, v) in [
            (low, z, x),
            (high, -x, -z),
            (low, x, y),
            (high, -y, -x),
            (low, y, z),
            (high, -z, -y),
        ] {
            let quad = scene.add_quad(Quad {
                corner,
                edge_u: u,
                edge_v: v,
                material: wall,
            });
            if lights {
                scene.add_area_light(quad);
            }
        }
        scene
    }

    fn integrator(kind: IntegratorKind) -> GuidedIntegrator {
        GuidedIntegrator {
            kind,
            max_depth: 60,
            ..GuidedIntegrator::default()
        }
    }

    fn mean_radiance(
        scene: &Scene,
        integrator: &GuidedIntegrator,
        guide: &mut PathGuide,
        samples: usize,
    ) -> f32 {
        let mut sampler = IndependentSampler::new(21);
        let total: f32 = (0..samples)
            .map(|i| {
                let dir = canonical_to_direction(Vec2::new(
                    (i as f32 * 0.618_034).fract(),
                    (i as f32 * 0.754_877_7).fract(),
                ));
                let ray = Ray::new(Vec3::ZERO, dir);
                luminance(integrator.radiance(scene, &ray, &mut sampler, guide))
            })
            .sum();
        total / samples as f32
    }

    /// Trains a guider inside `scene` and returns it finalized.
    fn trained_guider(scene: &Scene, integrator: &GuidedIntegrator) -> Guider {
        let guider = Guider::new(Bounds::new(Vec3::splat(-1.1), Vec3::splat(1.1)));
        {
            let mut recorder = RecordBatchBuilder::new(&guider, 256);
            let mut guide = PathGuide {
                recorder: Some(&mut recorder),
                samplers: None,
            };
            mean_radiance(scene, integrator, &mut guide, 2_000);
        }
        let stats = guider.iterate_end();
        assert!(stats.records > 2_000);
        guider
    }

    #[test]
    fn furnace_converges_without_guide() {
        let cases = [
            (IntegratorKind::Native, false),
            (IntegratorKind::Mis, false),
            (IntegratorKind::Mis, true),
        ];
        for (kind, lights) in cases {
            let scene = furnace(0.5, 1.0, lights);
            let mean = mean_radiance(&scene, &integrator(kind), &mut PathGuide::none(), 20_000);
            assert!((mean - 2.0).abs() < 0.1, "{kind:?} lights {lights}: {mean}");
        }
    }

    #[test]
    fn single_light_selection_converges() {
        let scene = furnace(0.5, 1.0, true);
        let integrator = GuidedIntegrator {
            sample_all_lights: false,
            ..integrator(IntegratorKind::Mis)
        };
        let mean = mean_radiance(&scene, &integrator, &mut PathGuide::none(), 20_000);
        assert!((mean - 2.0).abs() < 0.1, "{mean}");
    }

    #[test]
    fn furnace_stays_unbiased_with_guide() {
        for kind in [IntegratorKind::Native, IntegratorKind::Mis] {
            let scene = furnace(0.5, 1.0, true);
            let integrator = integrator(kind);
            let guider = trained_guider(&scene, &integrator);

            let index = guider.sampler_index().unwrap();
            let mut guide = PathGuide {
                recorder: None,
                samplers: Some(&*index),
            };
            let mean = mean_radiance(&scene, &integrator, &mut guide, 20_000);
            assert!((mean - 2.0).abs() < 0.1, "{kind:?}: {mean}");
        }
    }

    #[test]
    fn mis_records_exclude_emission_at_the_next_vertex() {
        // every wall emits 1 and the total radiance is 2 everywhere
        let scene = furnace(0.5, 1.0, true);
        let learned = |kind| {
            let guider = trained_guider(&scene, &integrator(kind));
            let sampler = guider.direction_sampler(Vec3::ZERO).unwrap();
            sampler.total_integral()
        };

        let native = learned(IntegratorKind::Native);
        assert!((native - 2.0).abs() < 0.15, "{native}");
        let mis = learned(IntegratorKind::Mis);
        assert!((mis - 1.0).abs() < 0.15, "{mis}");
    }

    #[test]
    fn escaping_rays_see_environment() {
        let scene = Scene::new(Vec3::new(0.5, 1.0, 2.0));
        for kind in [IntegratorKind::Native, IntegratorKind::Mis] {
            let mut sampler = IndependentSampler::new(1);
            let radiance = integrator(kind).radiance(
                &scene,
                &Ray::new(Vec3::ZERO, Vec3::X),
                &mut sampler,
                &mut PathGuide::none(),
            );
            assert_eq!(radiance, Vec3::new(0.5, 1.0, 2.0));
        }
    }

    #[test]
    fn camera_rays_are_not_recorded() {
        let scene = Scene::new(Vec3::ONE);
        let guider = Guider::new(Bounds::new(Vec3::splat(-1.0), Vec3::ONE));
        {
            let mut recorder = RecordBatchBuilder::new(&guider, 16);
            let mut guide = PathGuide {
                recorder: Some(&mut recorder),
                samplers: None,
            };
            let mut sampler = IndependentSampler::new(2);
            GuidedIntegrator::default().radiance(
                &scene,
                &Ray::new(Vec3::ZERO, Vec3::Y),
                &mut sampler,
                &mut guide,
            );
        }
        assert_eq!(guider.iterate_end().records, 0);
    }

    #[test]
    fn depth_settings_are_validated() {
        assert!(GuidedIntegrator::default().validate().is_ok());

        let err = |integrator: GuidedIntegrator| integrator.validate().unwrap_err().to_string();
        let base = GuidedIntegrator::default();
        assert_eq!(
            err(GuidedIntegrator {
                min_depth: 0,
                ..base
            }),
            "invalid min depth value: 0"
        );
        assert_eq!(
            err(GuidedIntegrator {
                min_depth: 8,
                max_depth: 7,
                ..base
            }),
            "invalid max depth value: 7"
        );
        assert_eq!(
            err(GuidedIntegrator {
                cont_prob: 1.5,
                ..base
            }),
            "invalid continue prob value: 1.5"
        );
        assert!(
            GuidedIntegrator {
                cont_prob: f32::NAN,
                ..base
            }
            .validate()
            .is_err()
        );
    }
}
