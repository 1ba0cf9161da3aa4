//! Perspective-warped directional shadow
//!
//! Light-space perspective shadow mapping: a perspective warp along the
//! camera's viewing direction (projected into the light's image plane) gives
//! texels near the camera more area than far ones. The warp strength follows
//! the angle between view and light; as they align the warp collapses to a
//! plain orthographic fit.

use glam::{Mat4, Vec2, Vec3, Vec4};
use tracing::{debug, warn};

use crate::renderer::geometry::Aabb;
use crate::renderer::viewer::SceneView;

use super::directional::{
    fit_cascade, frustum_corners, light_up_vector, safe_light_direction, CascadeFrustum,
    DirectionalShadowFrame, CLIP_TO_TEXTURE,
};
use super::ShadowConfig;

/// Smallest near plane used for the warp distance.
const MIN_WARP_NEAR: f32 = 1e-3;

/// Perspective along light-space +Y: maps `y in [n, f]` to `[-1, 1]` with `w = y`.
fn warp_matrix(n: f32, f: f32) -> Mat4 {
    let a = (f + n) / (f - n);
    let b = -2.0 * f * n / (f - n);
    Mat4::from_cols(
        Vec4::new(1.0, 0.0, 0.0, 0.0),
        Vec4::new(0.0, a, 0.0, 1.0),
        Vec4::new(0.0, 0.0, 1.0, 0.0),
        Vec4::new(0.0, b, 0.0, 0.0),
    )
}

/// Build the single perspective-warped directional shadow map.
///
/// Falls back to an orthographic fit of the whole view when the warp cannot
/// be expressed with finite matrices.
pub fn build_warped(
    direction: Vec3,
    scene: &SceneView<'_>,
    config: &ShadowConfig,
) -> DirectionalShadowFrame {
    if !scene.is_valid() {
        warn!(?scene, "invalid camera, directional shadows disabled this frame");
        return DirectionalShadowFrame::disabled();
    }
    let viewer = scene.viewer;
    let direction = safe_light_direction(direction);
    let (near, far) = (viewer.near(), viewer.far());
    let body = frustum_corners(viewer.view_projection_matrix().inverse());

    let cascade = match warped_frustum(direction, scene, &body, config) {
        Some(cascade) => cascade,
        None => {
            warn!("perspective warp degenerate, falling back to orthographic fit");
            fit_cascade(
                direction,
                &body,
                scene.scene_bounds.as_ref(),
                config.directional_resolution,
                config.filter_texel_padding,
                near,
                far,
            )
        }
    };

    DirectionalShadowFrame {
        splits: vec![near, far],
        cascades: vec![cascade],
        warped: true,
    }
}

fn warped_frustum(
    direction: Vec3,
    scene: &SceneView<'_>,
    body: &[Vec3; 8],
    config: &ShadowConfig,
) -> Option<CascadeFrustum> {
    let viewer = scene.viewer;
    let view_dir = viewer.forward();

    let cos_gamma = view_dir.dot(direction);
    let sin_gamma = (1.0 - cos_gamma * cos_gamma)
        .max(0.0)
        .sqrt()
        .max(config.min_sin_gamma);

    // Light-space up is the view direction projected into the light's image plane.
    let up = (view_dir - direction * cos_gamma)
        .try_normalize()
        .unwrap_or_else(|| light_up_vector(direction));
    let light_space = Mat4::look_to_rh(Vec3::ZERO, direction, up);

    let body_ls = Aabb::from_points(body.iter().map(|p| light_space.transform_point3(*p)));
    let z_near = viewer.near().max(MIN_WARP_NEAR);
    let z_far = viewer.far();
    let n = (z_near + (z_near * z_far).sqrt()) / sin_gamma;
    let depth = body_ls.size().y.max(MIN_WARP_NEAR);
    let f = n + depth;

    let eye_ls = light_space.transform_point3(viewer.position());
    let projection_center = Vec3::new(eye_ls.x, body_ls.min.y - n, eye_ls.z);
    let view = warp_matrix(n, f) * Mat4::from_translation(-projection_center) * light_space;

    let warped_body = Aabb::from_points(body.iter().map(|p| view.project_point3(*p)));

    // Casters outside the view only extend the depth range. Clamping them into
    // the body's Y range keeps them in front of the warp's center of projection.
    let mut min_z = warped_body.min.z;
    let mut max_z = warped_body.max.z;
    if let Some(bounds) = &scene.scene_bounds {
        let warp = view * light_space.inverse();
        for corner in bounds.corners() {
            let mut p = light_space.transform_point3(corner);
            p.y = p.y.clamp(body_ls.min.y, body_ls.max.y);
            let z = warp.project_point3(p).z;
            min_z = min_z.min(z);
            max_z = max_z.max(z);
        }
    }

    let min = warped_body.min.truncate();
    let max = warped_body.max.truncate().max(min + Vec2::splat(MIN_WARP_NEAR));
    let z_near_ortho = -max_z;
    let z_far_ortho = (-min_z).max(z_near_ortho + MIN_WARP_NEAR);
    let projection = Mat4::orthographic_rh(min.x, max.x, min.y, max.y, z_near_ortho, z_far_ortho);
    let view_projection = projection * view;

    if !view_projection.is_finite() {
        return None;
    }

    debug!(sin_gamma, n, f, "perspective-warped directional shadow built");

    Some(CascadeFrustum {
        view,
        projection,
        view_projection,
        texture_transform: CLIP_TO_TEXTURE * view_projection,
        uv_derivative_scale: Vec2::ONE,
        world_extent: body_ls.size().truncate(),
        eye: light_space.inverse().transform_point3(projection_center),
        split_near: viewer.near(),
        split_far: viewer.far(),
    })
}
