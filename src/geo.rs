//! Small vector/rotation helpers shared across the presence components.
//!
//! The region coordinate system is z-up; x/y span the region surface.

use nalgebra::{UnitQuaternion, Vector3, Vector4};

pub type Vec3 = Vector3<f32>;
pub type Quat = UnitQuaternion<f32>;

/// Plane equation `(normal.x, normal.y, normal.z, offset)` as consumed by
/// clients for camera constraints and avatar surface clamping.
pub type Plane = Vector4<f32>;

pub fn default_plane() -> Plane {
    Vector4::new(0.0, 0.0, 0.0, 1.0)
}

pub fn is_finite(v: &Vec3) -> bool {
    v.x.is_finite() && v.y.is_finite() && v.z.is_finite()
}

/// Projection onto the region surface (z zeroed).
pub fn horizontal(v: &Vec3) -> Vec3 {
    Vec3::new(v.x, v.y, 0.0)
}

/// Normalise, falling back to `fallback` for degenerate input.
pub fn normalize_or(v: &Vec3, fallback: Vec3) -> Vec3 {
    let len = v.norm();
    if len > f32::EPSILON && len.is_finite() {
        v / len
    } else {
        fallback
    }
}

/// The yaw-only component of a rotation, i.e. the rotation projected onto
/// the region surface plane.
pub fn z_plane_rotation(q: &Quat) -> Quat {
    let (_, _, yaw) = q.euler_angles();
    Quat::from_euler_angles(0.0, 0.0, yaw)
}

/// Clamp a point into the region interior, half a meter off each border.
pub fn clamp_into_region(pos: Vec3, size_x: u32, size_y: u32) -> Vec3 {
    Vec3::new(
        pos.x.clamp(0.5, size_x as f32 - 0.5),
        pos.y.clamp(0.5, size_y as f32 - 0.5),
        pos.z,
    )
}

pub fn round_to_decimals(value: f32, decimals: u32) -> f32 {
    let factor = 10_f32.powi(decimals as i32);
    (value * factor).round() / factor
}

pub fn round_vec(v: &Vec3, decimals: u32) -> Vec3 {
    Vec3::new(
        round_to_decimals(v.x, decimals),
        round_to_decimals(v.y, decimals),
        round_to_decimals(v.z, decimals),
    )
}
