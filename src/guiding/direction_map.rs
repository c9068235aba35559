//! Cylindrical equal-area mapping between the unit sphere and `[0,1]²`.
//!
//! `u` is the azimuth around +Z and `v` is `(cos θ + 1) / 2`, so every region
//! of the square covers `4π` times its area on the sphere.

use std::f32::consts::{PI, TAU};

use glam::{Vec2, Vec3};

/// Solid angle covered by the whole canonical square.
pub const SPHERE_AREA: f32 = 4.0 * PI;

pub fn direction_to_canonical(dir: Vec3) -> Vec2 {
    let dir = dir.normalize_or_zero();
    let mut phi = dir.y.atan2(dir.x);
    if phi < 0.0 {
        phi += TAU;
    }

    let u = (phi / TAU).clamp(0.0, 1.0);
    let v = ((dir.z + 1.0) * 0.5).clamp(0.0, 1.0);
    Vec2::new(u, v)
}

pub fn canonical_to_direction(p: Vec2) -> Vec3 {
    let phi = TAU * p.x;
    let cos_theta = (2.0 * p.y - 1.0).clamp(-1.0, 1.0);
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
    let (sin_phi, cos_phi) = phi.sin_cos();

    Vec3::new(cos_phi * sin_theta, sin_phi * sin_theta, cos_theta)
}

pub fn in_canonical(p: Vec2) -> bool {
    p.cmpge(Vec2::ZERO).all() && p.cmple(Vec2::ONE).all()
}
