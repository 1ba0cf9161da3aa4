//! Directional light shadow mapping
//!
//! Cascaded fitting: the camera's depth range is split into cascades and
//! each cascade gets a texel-snapped orthographic light projection fitted to
//! its slice of the view frustum.

use glam::{Mat4, Vec2, Vec3, Vec4};
use tracing::{debug, warn};

use crate::error::{ShadowError, ShadowResult};
use crate::renderer::geometry::Aabb;
use crate::renderer::viewer::SceneView;

use super::{ShadowConfig, MAX_CASCADES};

/// Cosine above which the light direction is treated as parallel to world up.
const UP_PARALLEL_COS: f32 = 0.99;

/// Smallest light-space extent a cascade is allowed to collapse to.
const MIN_EXTENT: f32 = 1e-3;

/// Maps clip-space XY `[-1, 1]` to texture UV `[0, 1]` (V pointing down).
pub const CLIP_TO_TEXTURE: Mat4 = Mat4::from_cols(
    Vec4::new(0.5, 0.0, 0.0, 0.0),
    Vec4::new(0.0, -0.5, 0.0, 0.0),
    Vec4::new(0.0, 0.0, 1.0, 0.0),
    Vec4::new(0.5, 0.5, 0.0, 1.0),
);

/// Cascade split depths in camera view space.
///
/// Holds `count + 1` strictly increasing depths; the first is the camera near
/// plane and the last the camera far plane.
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeSplits {
    depths: Vec<f32>,
}

impl CascadeSplits {
    /// Practical split scheme: `lerp(linear(i), log(i), lambda)`.
    ///
    /// `lambda = 0` gives the uniform partition, `lambda = 1` the logarithmic
    /// one. The logarithmic term needs a positive near plane; a zero near
    /// plane is nudged to a small fraction of `far` for that term only.
    pub fn compute(count: u32, near: f32, far: f32, lambda: f32) -> ShadowResult<Self> {
        if count == 0 || count as usize > MAX_CASCADES {
            return Err(ShadowError::InvalidCascadeCount(count));
        }
        if !(near.is_finite() && far.is_finite() && near >= 0.0 && far > near) {
            return Err(ShadowError::InvalidDepthRange { near, far });
        }
        let lambda = lambda.clamp(0.0, 1.0);
        let log_near = near.max(far * 1e-6);

        let n = count as f32;
        let mut depths = Vec::with_capacity(count as usize + 1);
        depths.push(near);
        for i in 1..count {
            let p = i as f32 / n;
            let linear = near + (far - near) * p;
            let log = if lambda > 0.0 {
                log_near * (far / log_near).powf(p)
            } else {
                linear
            };
            depths.push(linear * (1.0 - lambda) + log * lambda);
        }
        depths.push(far);

        Ok(Self { depths })
    }

    /// All `count + 1` split depths.
    pub fn depths(&self) -> &[f32] {
        &self.depths
    }

    /// Number of cascades.
    pub fn count(&self) -> usize {
        self.depths.len() - 1
    }

    /// Near and far depth of cascade `index`.
    pub fn range(&self, index: usize) -> (f32, f32) {
        (self.depths[index], self.depths[index + 1])
    }
}

/// Matrices for one directional shadow map (a cascade or the warped map).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeFrustum {
    /// World to light view space.
    pub view: Mat4,
    /// Light view to clip space.
    pub projection: Mat4,
    /// `projection * view`.
    pub view_projection: Mat4,
    /// World to shadow texture space (UV in xy, depth in z).
    pub texture_transform: Mat4,
    /// Scale applied to UV derivatives when sampling this cascade,
    /// relative to the first cascade.
    pub uv_derivative_scale: Vec2,
    /// World-space extent covered by the map on X and Y.
    pub world_extent: Vec2,
    /// Eye position the light view was built from.
    pub eye: Vec3,
    /// View-space depth where the cascade starts.
    pub split_near: f32,
    /// View-space depth where the cascade ends.
    pub split_far: f32,
}

impl CascadeFrustum {
    /// Identity view with a zero-extent projection; samples nothing.
    pub fn disabled() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::ZERO,
            view_projection: Mat4::ZERO,
            texture_transform: Mat4::ZERO,
            uv_derivative_scale: Vec2::ONE,
            world_extent: Vec2::ZERO,
            eye: Vec3::ZERO,
            split_near: 0.0,
            split_far: 0.0,
        }
    }

    /// Whether this frustum covers any area.
    pub fn is_enabled(&self) -> bool {
        self.projection != Mat4::ZERO
    }

    /// Get the cascade uniform data for shaders.
    pub fn uniform(&self) -> CascadeUniform {
        CascadeUniform {
            view_projection: self.view_projection.to_cols_array_2d(),
            texture_transform: self.texture_transform.to_cols_array_2d(),
            uv_derivative_scale: self.uv_derivative_scale.to_array(),
            split_near: self.split_near,
            split_far: self.split_far,
        }
    }
}

/// Cascade uniform data for GPU.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CascadeUniform {
    pub view_projection: [[f32; 4]; 4],
    pub texture_transform: [[f32; 4]; 4],
    pub uv_derivative_scale: [f32; 2],
    pub split_near: f32,
    pub split_far: f32,
}

/// The directional light's shadow for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionalShadowFrame {
    /// Split depths; empty unless cascaded.
    pub splits: Vec<f32>,
    /// One entry per cascade, or a single warped map.
    pub cascades: Vec<CascadeFrustum>,
    /// True when the single map is perspective-warped.
    pub warped: bool,
}

impl DirectionalShadowFrame {
    /// Frame with directional shadows switched off.
    pub fn disabled() -> Self {
        Self {
            splits: Vec::new(),
            cascades: vec![CascadeFrustum::disabled()],
            warped: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.cascades.iter().any(CascadeFrustum::is_enabled)
    }

    /// Cascade uniforms padded to [`MAX_CASCADES`].
    pub fn uniforms(&self) -> [CascadeUniform; MAX_CASCADES] {
        let mut out = [bytemuck::Zeroable::zeroed(); MAX_CASCADES];
        for (dst, cascade) in out.iter_mut().zip(&self.cascades) {
            *dst = cascade.uniform();
        }
        out
    }
}

/// Light direction with zero-length or non-finite input replaced by straight down.
pub fn safe_light_direction(direction: Vec3) -> Vec3 {
    match direction.try_normalize() {
        Some(dir) => dir,
        None => {
            warn!(?direction, "degenerate light direction, using -Y");
            Vec3::NEG_Y
        }
    }
}

/// Up vector for a light view: world up unless the light is nearly vertical.
pub fn light_up_vector(direction: Vec3) -> Vec3 {
    if direction.dot(Vec3::Y).abs() > UP_PARALLEL_COS {
        Vec3::Z
    } else {
        Vec3::Y
    }
}

/// World-space corners of the whole view frustum.
///
/// The first four are on the near plane, the last four on the far plane,
/// in matching order.
pub fn frustum_corners(inverse_view_projection: Mat4) -> [Vec3; 8] {
    const NDC: [(f32, f32); 4] = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
    let mut corners = [Vec3::ZERO; 8];
    for (i, (x, y)) in NDC.iter().enumerate() {
        corners[i] = inverse_view_projection.project_point3(Vec3::new(*x, *y, 0.0));
        corners[i + 4] = inverse_view_projection.project_point3(Vec3::new(*x, *y, 1.0));
    }
    corners
}

/// Corners of the sub-frustum between two view depths.
///
/// Interpolates along each near-to-far frustum edge by depth ratio.
pub fn sub_frustum_corners(
    full: &[Vec3; 8],
    near: f32,
    far: f32,
    split_near: f32,
    split_far: f32,
) -> [Vec3; 8] {
    let range = far - near;
    let t_near = (split_near - near) / range;
    let t_far = (split_far - near) / range;

    let mut corners = [Vec3::ZERO; 8];
    for i in 0..4 {
        corners[i] = full[i].lerp(full[i + 4], t_near);
        corners[i + 4] = full[i].lerp(full[i + 4], t_far);
    }
    corners
}

/// Fit a texel-snapped orthographic projection around a frustum slice.
///
/// X/Y bounds are the slice's own light-space bounds. Depth and the lower Y
/// bound are widened to include `scene_bounds` so casters outside the view
/// still land in the map. Snapping happens in a rotation-only light space
/// anchored at the world origin, which keeps the texel grid fixed while the
/// camera translates.
pub fn fit_cascade(
    direction: Vec3,
    corners: &[Vec3; 8],
    scene_bounds: Option<&Aabb>,
    resolution: u32,
    texel_padding: u32,
    split_near: f32,
    split_far: f32,
) -> CascadeFrustum {
    let up = light_up_vector(direction);
    let rotation = Mat4::look_to_rh(Vec3::ZERO, direction, up);

    let mut bounds = Aabb::from_points(corners.iter().map(|c| rotation.transform_point3(*c)));
    if let Some(scene) = scene_bounds {
        let scene_ls = scene.transformed(rotation);
        bounds.min.y = bounds.min.y.min(scene_ls.min.y);
        bounds.min.z = bounds.min.z.min(scene_ls.min.z);
        bounds.max.z = bounds.max.z.max(scene_ls.max.z);
    }

    let usable = resolution.saturating_sub(2 * texel_padding).max(1) as f32;
    let extent = bounds.size().truncate().max(Vec2::splat(MIN_EXTENT));
    let texel = extent / usable;
    let center = bounds.center().truncate();
    let snapped = (center / texel).round() * texel;
    let half = texel * (resolution as f32 * 0.5);

    let centroid = corners.iter().copied().sum::<Vec3>() / 8.0;
    let eye = centroid - direction * 1.5 * (split_far - split_near);
    let view = Mat4::look_at_rh(eye, centroid, up);

    // View space differs from the rotation-only space by the eye offset.
    let eye_ls = rotation.transform_point3(eye);
    let min = snapped - half - eye_ls.truncate();
    let max = snapped + half - eye_ls.truncate();
    let z_near = -(bounds.max.z - eye_ls.z);
    let z_far = (-(bounds.min.z - eye_ls.z)).max(z_near + MIN_EXTENT);

    let projection = Mat4::orthographic_rh(min.x, max.x, min.y, max.y, z_near, z_far);
    let view_projection = projection * view;

    CascadeFrustum {
        view,
        projection,
        view_projection,
        texture_transform: CLIP_TO_TEXTURE * view_projection,
        uv_derivative_scale: Vec2::ONE,
        world_extent: half * 2.0,
        eye,
        split_near,
        split_far,
    }
}

/// Build every cascade for the directional light.
///
/// An invalid camera disables directional shadows for the frame.
pub fn build_cascades(
    direction: Vec3,
    scene: &SceneView<'_>,
    config: &ShadowConfig,
) -> DirectionalShadowFrame {
    if !scene.is_valid() {
        warn!(?scene, "invalid camera, directional shadows disabled this frame");
        return DirectionalShadowFrame::disabled();
    }
    let viewer = scene.viewer;
    let (near, far) = (viewer.near(), viewer.far());

    let splits = match CascadeSplits::compute(config.cascade_count, near, far, config.split_lambda)
    {
        Ok(splits) => splits,
        Err(err) => {
            warn!("{err}, directional shadows disabled this frame");
            return DirectionalShadowFrame::disabled();
        }
    };

    let direction = safe_light_direction(direction);
    let full = frustum_corners(viewer.view_projection_matrix().inverse());

    let mut cascades: Vec<CascadeFrustum> = (0..splits.count())
        .map(|i| {
            let (split_near, split_far) = splits.range(i);
            let corners = sub_frustum_corners(&full, near, far, split_near, split_far);
            fit_cascade(
                direction,
                &corners,
                scene.scene_bounds.as_ref(),
                config.directional_resolution,
                config.filter_texel_padding,
                split_near,
                split_far,
            )
        })
        .collect();

    let base = cascades[0].world_extent;
    for cascade in &mut cascades {
        cascade.uv_derivative_scale = base / cascade.world_extent;
    }

    debug!(
        cascades = cascades.len(),
        splits = ?splits.depths(),
        "directional cascades built"
    );

    DirectionalShadowFrame {
        splits: splits.depths().to_vec(),
        cascades,
        warped: false,
    }
}
