//! Local light shadow matrices
//!
//! Spot lights render one perspective map along their cone. Point lights
//! render six 90 degree faces into a cube; the shared face projection is what
//! gets published for their slot.

use std::f32::consts::FRAC_PI_2;

use glam::{Mat4, Vec3};
use tracing::warn;

use crate::renderer::light::{PointLight, SpotLight};

use super::ShadowConfig;

/// Widest spot shadow field of view, just short of 180 degrees.
pub const MAX_SPOT_FOV: f32 = 179.0 * std::f32::consts::PI / 180.0;

const MIN_SPOT_FOV: f32 = 1e-3;

/// Cube face look directions and up vectors, in `+X, -X, +Y, -Y, +Z, -Z` order.
pub const CUBE_FACES: [(Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::NEG_Y),
    (Vec3::NEG_X, Vec3::NEG_Y),
    (Vec3::Y, Vec3::Z),
    (Vec3::NEG_Y, Vec3::NEG_Z),
    (Vec3::Z, Vec3::NEG_Y),
    (Vec3::NEG_Z, Vec3::NEG_Y),
];

/// Shadow matrices for one spot light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotShadowMatrices {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub near: f32,
    pub far: f32,
}

/// Shadow matrices for the six faces of one point light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointShadowFaces {
    pub position: Vec3,
    /// Shared 90 degree projection.
    pub projection: Mat4,
    /// Per-face view-projection in [`CUBE_FACES`] order.
    pub view_projections: [Mat4; 6],
    pub near: f32,
    pub far: f32,
}

/// Near and far planes for a light with the given attenuation radius.
///
/// Far is the radius itself; near is a configured fraction of it, clamped
/// from below and never more than half the radius.
pub fn local_depth_range(attenuation_radius: f32, config: &ShadowConfig) -> (f32, f32) {
    let far = attenuation_radius.max(config.min_local_near * 2.0);
    let near = (far * config.local_near_fraction)
        .max(config.min_local_near)
        .min(far * 0.5);
    (near, far)
}

/// Perspective shadow matrices covering a spot light's outer cone.
pub fn spot_shadow(light: &SpotLight, config: &ShadowConfig) -> SpotShadowMatrices {
    let direction = match light.direction.try_normalize() {
        Some(dir) => dir,
        None => {
            warn!(position = ?light.position, "spot light without direction, using -Y");
            Vec3::NEG_Y
        }
    };
    let up = if direction.dot(Vec3::Y).abs() > 0.99 {
        Vec3::Z
    } else {
        Vec3::Y
    };

    let (near, far) = local_depth_range(light.attenuation_radius, config);
    let fov = (light.outer_angle * 2.0).clamp(MIN_SPOT_FOV, MAX_SPOT_FOV);

    let view = Mat4::look_at_rh(light.position, light.position + direction, up);
    let projection = Mat4::perspective_rh(fov, 1.0, near, far);

    SpotShadowMatrices {
        view,
        projection,
        view_projection: projection * view,
        near,
        far,
    }
}

/// View matrices for the six cube faces around `position`.
pub fn cube_face_views(position: Vec3) -> [Mat4; 6] {
    CUBE_FACES.map(|(dir, up)| Mat4::look_to_rh(position, dir, up))
}

/// 90 degree face matrices for a point light.
pub fn point_shadow(light: &PointLight, config: &ShadowConfig) -> PointShadowFaces {
    let (near, far) = local_depth_range(light.attenuation_radius, config);
    let projection = Mat4::perspective_rh(FRAC_PI_2, 1.0, near, far);

    PointShadowFaces {
        position: light.position,
        projection,
        view_projections: cube_face_views(light.position).map(|view| projection * view),
        near,
        far,
    }
}
