use glam::Vec3;
use ordered_float::OrderedFloat;

use crate::bounds::Bounds;
use crate::scene::material::MaterialId;
use crate::scene::{HitData, Ray, Scene};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShapeId(u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ShapeType {
    Sphere = 0 << ShapeId::TAG_SHIFT,
    Quad = 1 << ShapeId::TAG_SHIFT,
}

impl ShapeId {
    const TAG_BITS: u32 = 1;
    const TAG_SHIFT: u32 = 32 - Self::TAG_BITS;
    const IDX_MASK: u32 = (1 << Self::TAG_SHIFT) - 1;
    const TAG_MASK: u32 = !Self::IDX_MASK;

    fn new(ty: ShapeType, idx: usize) -> Self {
        assert!(
            idx <= Self::IDX_MASK as usize,
            "cannot exceed {} {ty:?} shapes",
            Self::IDX_MASK
        );
        ShapeId(idx as u32 | ty as u32)
    }

    pub fn ty(self) -> ShapeType {
        if self.0 & Self::TAG_MASK == ShapeType::Quad as u32 {
            ShapeType::Quad
        } else {
            ShapeType::Sphere
        }
    }

    pub fn idx(self) -> usize {
        (self.0 & Self::IDX_MASK) as usize
    }
}

impl Scene {
    pub fn shape_bounds(&self, shape: ShapeId) -> Bounds {
        match shape.ty() {
            ShapeType::Sphere => self.spheres[shape.idx()].bounds(),
            ShapeType::Quad => self.quads[shape.idx()].bounds(),
        }
    }

    pub fn world_bounds(&self) -> Bounds {
        let spheres = (0..self.spheres.len()).map(|i| ShapeId::new(ShapeType::Sphere, i));
        let quads = (0..self.quads.len()).map(|i| ShapeId::new(ShapeType::Quad, i));
        spheres
            .chain(quads)
            .map(|shape| self.shape_bounds(shape))
            .fold(Bounds::EMPTY, Bounds::union)
    }

    pub fn add_sphere(&mut self, sphere: Sphere) -> ShapeId {
        let id = ShapeId::new(ShapeType::Sphere, self.spheres.len());
        self.spheres.push(sphere);
        id
    }

    pub fn add_quad(&mut self, quad: Quad) -> ShapeId {
        let id = ShapeId::new(ShapeType::Quad, self.quads.len());
        self.quads.push(quad);
        id
    }

    /// Closest intersection by testing every shape.
    pub fn intersect(&self, ray: &Ray) -> Option<HitData> {
        let spheres = self.spheres.iter().enumerate().filter_map(|(i, sphere)| {
            let (t, normal) = sphere.intersect(ray)?;
            Some((t, normal, ShapeId::new(ShapeType::Sphere, i), sphere.material))
        });
        let quads = self.quads.iter().enumerate().filter_map(|(i, quad)| {
            let (t, normal) = quad.intersect(ray)?;
            Some((t, normal, ShapeId::new(ShapeType::Quad, i), quad.material))
        });

        spheres
            .chain(quads)
            .min_by_key(|&(t, ..)| OrderedFloat(t))
            .map(|(t, normal, shape, material)| HitData {
                t,
                position: ray.at(t),
                normal,
                material,
                shape,
            })
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f32,
    pub material: MaterialId,
}

impl Sphere {
    fn bounds(&self) -> Bounds {
        Bounds::new(self.center - self.radius, self.center + self.radius)
    }

    /// Nearest `t` within the ray's range with the outward normal there.
    fn intersect(&self, ray: &Ray) -> Option<(f32, Vec3)> {
        let oc = ray.origin - self.center;
        let a = ray.direction.length_squared();
        let half_b = oc.dot(ray.direction);
        let c = oc.length_squared() - self.radius * self.radius;

        let discriminant = half_b * half_b - a * c;
        if discriminant < 0.0 {
            return None;
        }
        let sqrt_d = discriminant.sqrt();

        [(-half_b - sqrt_d) / a, (-half_b + sqrt_d) / a]
            .into_iter()
            .find(|&t| t > ray.t_min && t < ray.t_max)
            .map(|t| (t, (ray.at(t) - self.center) / self.radius))
    }
}

/// Parallelogram spanned by `edge_u` and `edge_v` from `corner`. Its normal is
/// `edge_u × edge_v`.
#[derive(Copy, Clone, Debug)]
pub struct Quad {
    pub corner: Vec3,
    pub edge_u: Vec3,
    pub edge_v: Vec3,
    pub material: MaterialId,
}

impl Quad {
    fn bounds(&self) -> Bounds {
        Bounds::from_points([
            self.corner,
            self.corner + self.edge_u,
            self.corner + self.edge_v,
            self.corner + self.edge_u + self.edge_v,
        ])
    }

    pub fn normal(&self) -> Vec3 {
        self.edge_u.cross(self.edge_v).normalize()
    }

    pub fn area(&self) -> f32 {
        self.edge_u.cross(self.edge_v).length()
    }

    fn intersect(&self, ray: &Ray) -> Option<(f32, Vec3)> {
        let n = self.edge_u.cross(self.edge_v);
        let denom = n.dot(ray.direction);
        if denom.abs() < 1e-9 {
            return None;
        }

        let t = n.dot(self.corner - ray.origin) / denom;
        if !(t > ray.t_min && t < ray.t_max) {
            return None;
        }

        let w = n / n.length_squared();
        let planar = ray.at(t) - self.corner;
        let alpha = w.dot(planar.cross(self.edge_v));
        let beta = w.dot(self.edge_u.cross(planar));
        if !(0.0..=1.0).contains(&alpha) || !(0.0..=1.0).contains(&beta) {
            return None;
        }

        Some((t, n.normalize()))
    }
}
