use glam::{Vec2, Vec3};

use crate::scene::shapes::{Quad, ShapeType};
use crate::scene::{HitData, Scene, ShapeId};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LightId(u32);

impl LightId {
    pub(crate) fn from_idx(idx: usize) -> Self {
        LightId(idx as u32)
    }

    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

impl Scene {
    /// Registers an emissive quad for explicit light sampling. Its radiance
    /// is the emission of the quad's material.
    pub fn add_area_light(&mut self, shape: ShapeId) -> LightId {
        assert_eq!(shape.ty(), ShapeType::Quad, "area lights must be quads");
        let id = LightId::from_idx(self.area_lights.len());
        self.area_lights.push(AreaLight { shape });
        id
    }

    pub fn area_light(&self, light: LightId) -> &AreaLight {
        &self.area_lights[light.idx()]
    }

    fn light_quad(&self, light: &AreaLight) -> &Quad {
        &self.quads[light.shape.idx()]
    }

    /// Samples a point on `light` uniformly by area, as seen from `from`.
    pub fn sample_area_light(&self, light: LightId, from: Vec3, u: Vec2) -> Option<LightSample> {
        let quad = self.light_quad(self.area_light(light));
        let position = quad.corner + u.x * quad.edge_u + u.y * quad.edge_v;
        let normal = quad.normal();

        let to_light = position - from;
        let dist2 = to_light.length_squared();
        if !(dist2 > 0.0) {
            return None;
        }
        let wi = to_light / dist2.sqrt();

        let radiance = self.material(quad.material).emitted(normal, -wi);
        let cos_light = normal.dot(-wi).abs();
        if radiance == Vec3::ZERO || !(cos_light > 0.0) {
            return None;
        }

        Some(LightSample {
            position,
            wi,
            radiance,
            pdf: dist2 / (cos_light * quad.area()),
        })
    }

    /// Solid-angle density with which `sample_area_light` would have produced
    /// `hit` from `from`, or zero if the hit shape is not a registered light.
    pub fn area_light_pdf(&self, from: Vec3, hit: &HitData) -> f32 {
        let Some(light) = self.area_lights.iter().find(|light| light.shape == hit.shape) else {
            return 0.0;
        };
        let quad = self.light_quad(light);

        let to_light = hit.position - from;
        let dist2 = to_light.length_squared();
        let cos_light = hit.normal.dot(to_light).abs() / dist2.sqrt();
        if !(cos_light > 0.0) {
            return 0.0;
        }
        dist2 / (cos_light * quad.area())
    }
}

#[derive(Copy, Clone, Debug)]
pub struct AreaLight {
    pub shape: ShapeId,
}

/// Point sampled on a light.
#[derive(Copy, Clone, Debug)]
pub struct LightSample {
    pub position: Vec3,
    /// Unit direction from the shading point towards `position`.
    pub wi: Vec3,
    pub radiance: Vec3,
    /// Solid-angle density of `wi`.
    pub pdf: f32,
}
