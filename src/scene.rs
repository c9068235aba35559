use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::bounds::Bounds;
use crate::options::{CameraSettings, RenderOptions};

pub mod light;
pub mod material;
pub mod shapes;

pub use light::{AreaLight, LightId, LightSample};
pub use material::{Bsdf, BsdfSample, Material, MaterialId};
pub use shapes::{Quad, ShapeId, ShapeType, Sphere};

pub const RAY_EPSILON: f32 = 1e-4;

#[derive(Copy, Clone, Debug)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    pub t_min: f32,
    pub t_max: f32,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Ray {
            origin,
            direction,
            t_min: RAY_EPSILON,
            t_max: f32::INFINITY,
        }
    }

    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + t * self.direction
    }
}

#[derive(Copy, Clone, Debug)]
pub struct HitData {
    pub t: f32,
    pub position: Vec3,
    /// Outward geometric normal.
    pub normal: Vec3,
    pub material: MaterialId,
    pub shape: ShapeId,
}

/// What the integrator needs from a scene.
pub trait SceneAccess: Sync {
    fn hit(&self, ray: &Ray) -> Option<HitData>;
    fn material(&self, id: MaterialId) -> &Material;
    /// Radiance arriving along escaping rays travelling in `direction`.
    fn environment(&self, direction: Vec3) -> Vec3;
    fn bounds(&self) -> Bounds;

    /// Lights available for explicit sampling.
    fn light_count(&self) -> usize {
        0
    }

    fn sample_light(&self, _light: usize, _from: Vec3, _u: Vec2) -> Option<LightSample> {
        None
    }

    /// Density with which some light would have sampled `hit` from `from`.
    fn light_pdf(&self, _from: Vec3, _hit: &HitData) -> f32 {
        0.0
    }

    /// Whether nothing blocks the segment between `from` and `to`.
    fn visible(&self, from: Vec3, to: Vec3) -> bool {
        let delta = to - from;
        let dist = delta.length();
        let ray = Ray {
            t_max: dist - RAY_EPSILON,
            ..Ray::new(from, delta / dist)
        };
        ray.t_max <= ray.t_min || self.hit(&ray).is_none()
    }
}

pub struct Scene {
    pub spheres: Vec<Sphere>,
    pub quads: Vec<Quad>,
    pub materials: Vec<Material>,
    pub area_lights: Vec<AreaLight>,
    pub environment: Vec3,
}

impl Scene {
    pub fn new(environment: Vec3) -> Self {
        Scene {
            spheres: vec![],
            quads: vec![],
            materials: vec![],
            area_lights: vec![],
            environment,
        }
    }

    pub fn print_stats(&self) {
        log::info!("Spheres: {}", self.spheres.len());
        log::info!("Quads: {}", self.quads.len());
        log::info!("Materials: {}", self.materials.len());
        log::info!("Area lights: {}", self.area_lights.len());
        log::info!("Bounds: {:?}", self.world_bounds());
    }
}

impl SceneAccess for Scene {
    fn hit(&self, ray: &Ray) -> Option<HitData> {
        self.intersect(ray)
    }

    fn material(&self, id: MaterialId) -> &Material {
        Scene::material(self, id)
    }

    fn environment(&self, _direction: Vec3) -> Vec3 {
        self.environment
    }

    fn bounds(&self) -> Bounds {
        self.world_bounds()
    }

    fn light_count(&self) -> usize {
        self.area_lights.len()
    }

    fn sample_light(&self, light: usize, from: Vec3, u: Vec2) -> Option<LightSample> {
        self.sample_area_light(LightId::from_idx(light), from, u)
    }

    fn light_pdf(&self, from: Vec3, hit: &HitData) -> f32 {
        self.area_light_pdf(from, hit)
    }
}

/// Pinhole camera mapping `[0,1]²` film coordinates (y down) to world rays.
#[derive(Copy, Clone, Debug)]
pub struct Camera {
    position: Vec3,
    ndc_to_world: Mat4,
}

impl Camera {
    pub fn new(settings: &CameraSettings, aspect_ratio: f32) -> Self {
        let view = Mat4::look_at_rh(settings.position, settings.target, settings.up);
        let projection = Mat4::perspective_rh(settings.fov.to_radians(), aspect_ratio, 0.01, 100.0);
        Camera {
            position: settings.position,
            ndc_to_world: (projection * view).inverse(),
        }
    }

    pub fn generate_ray(&self, u: f32, v: f32) -> Ray {
        let ndc = Vec4::new(2.0 * u - 1.0, 1.0 - 2.0 * v, 1.0, 1.0);
        let far = self.ndc_to_world * ndc;
        let direction = (far.truncate() / far.w - self.position).normalize();
        Ray::new(self.position, direction)
    }
}

/// Closed box with coloured side walls, a ceiling light, a diffuse sphere and
/// a mirror sphere. The front side is open.
pub fn cornell_box() -> (RenderOptions, Scene) {
    let mut scene = Scene::new(Vec3::ZERO);

    let white = scene.add_material(Material::diffuse(Vec3::splat(0.73)));
    let red = scene.add_material(Material::diffuse(Vec3::new(0.65, 0.05, 0.05)));
    let green = scene.add_material(Material::diffuse(Vec3::new(0.12, 0.45, 0.15)));
    let mirror = scene.add_material(Material::mirror(Vec3::splat(0.95)));
    let light = scene.add_material(Material::emitter(Vec3::splat(20.0)));

    let wall = |corner: Vec3, edge_u: Vec3, edge_v: Vec3, material| Quad {
        corner,
        edge_u,
        edge_v,
        material,
    };
    let (x, y, z) = (Vec3::X * 2.0, Vec3::Y * 2.0, Vec3::Z * 2.0);
    let low = Vec3::splat(-1.0);
    let high = Vec3::ONE;

    scene.add_quad(wall(low, x, z, white));
    scene.add_quad(wall(high, -x, -z, white));
    scene.add_quad(wall(low, x, y, white));
    scene.add_quad(wall(low, y, z, red));
    scene.add_quad(wall(high, -y, -z, green));

    // faces down
    let ceiling_light = scene.add_quad(wall(
        Vec3::new(-0.25, 0.999, -0.25),
        Vec3::X * 0.5,
        Vec3::Z * 0.5,
        light,
    ));
    scene.add_area_light(ceiling_light);

    scene.add_sphere(Sphere {
        center: Vec3::new(-0.45, -0.6, -0.35),
        radius: 0.4,
        material: white,
    });
    scene.add_sphere(Sphere {
        center: Vec3::new(0.45, -0.6, 0.3),
        radius: 0.4,
        material: mirror,
    });

    let options = RenderOptions {
        camera: CameraSettings {
            position: Vec3::new(0.0, 0.0, 3.9),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov: 40.0,
        },
        ..RenderOptions::default()
    };

    (options, scene)
}
