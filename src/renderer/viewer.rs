//! Camera and viewer abstractions
//!
//! The scene/view provider the shadow system fits its shadow maps to.

use glam::{Mat4, Vec3};

use super::geometry::Aabb;

/// Projection mode for a camera.
#[derive(Debug, Clone, Copy)]
pub enum Projection {
    /// Perspective projection.
    Perspective {
        /// Field of view in radians.
        fov: f32,
        /// Aspect ratio (width / height).
        aspect: f32,
        /// Near clipping plane.
        near: f32,
        /// Far clipping plane.
        far: f32,
    },
    /// Orthographic projection.
    Orthographic {
        /// Width of the view.
        width: f32,
        /// Height of the view.
        height: f32,
        /// Near clipping plane.
        near: f32,
        /// Far clipping plane.
        far: f32,
    },
}

impl Projection {
    /// Create a perspective projection.
    pub fn perspective(fov_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self::Perspective {
            fov: fov_degrees.to_radians(),
            aspect,
            near,
            far,
        }
    }

    /// Create an orthographic projection.
    pub fn orthographic(width: f32, height: f32, near: f32, far: f32) -> Self {
        Self::Orthographic {
            width,
            height,
            near,
            far,
        }
    }

    /// Get the projection matrix.
    pub fn matrix(&self) -> Mat4 {
        match *self {
            Projection::Perspective {
                fov,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh(fov, aspect, near, far),
            Projection::Orthographic {
                width,
                height,
                near,
                far,
            } => Mat4::orthographic_rh(
                -width / 2.0,
                width / 2.0,
                -height / 2.0,
                height / 2.0,
                near,
                far,
            ),
        }
    }

    /// Near clipping distance.
    pub fn near(&self) -> f32 {
        match *self {
            Projection::Perspective { near, .. } | Projection::Orthographic { near, .. } => near,
        }
    }

    /// Far clipping distance.
    pub fn far(&self) -> f32 {
        match *self {
            Projection::Perspective { far, .. } | Projection::Orthographic { far, .. } => far,
        }
    }

    /// Update the aspect ratio.
    pub fn set_aspect(&mut self, aspect: f32) {
        if let Projection::Perspective { aspect: a, .. } = self {
            *a = aspect;
        }
    }
}

/// Trait for objects that can view a scene.
pub trait Viewer {
    /// Get the camera position.
    fn position(&self) -> Vec3;

    /// Get the view matrix.
    fn view_matrix(&self) -> Mat4;

    /// Get the projection matrix (`[0, 1]` clip depth).
    fn projection_matrix(&self) -> Mat4;

    /// Near clipping distance in view space.
    fn near(&self) -> f32;

    /// Far clipping distance in view space.
    fn far(&self) -> f32;

    /// Get the combined view-projection matrix.
    fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// World-space viewing direction.
    fn forward(&self) -> Vec3 {
        self.view_matrix()
            .inverse()
            .transform_vector3(Vec3::NEG_Z)
            .normalize_or_zero()
    }
}

/// A 3D camera.
#[derive(Debug, Clone)]
pub struct Camera {
    /// Camera position.
    pub position: Vec3,
    /// Point the camera is looking at.
    pub target: Vec3,
    /// Up vector.
    pub up: Vec3,
    /// Projection mode.
    pub projection: Projection,
}

impl Camera {
    /// Create a new perspective camera.
    pub fn new_perspective(
        position: Vec3,
        target: Vec3,
        up: Vec3,
        fov_degrees: f32,
        aspect: f32,
        near: f32,
        far: f32,
    ) -> Self {
        Self {
            position,
            target,
            up,
            projection: Projection::perspective(fov_degrees, aspect, near, far),
        }
    }

    /// Create a new orthographic camera.
    pub fn new_orthographic(
        position: Vec3,
        target: Vec3,
        up: Vec3,
        width: f32,
        height: f32,
        near: f32,
        far: f32,
    ) -> Self {
        Self {
            position,
            target,
            up,
            projection: Projection::orthographic(width, height, near, far),
        }
    }

    /// Get the right direction.
    pub fn right(&self) -> Vec3 {
        self.forward().cross(self.up).normalize()
    }
}

impl Viewer for Camera {
    fn position(&self) -> Vec3 {
        self.position
    }

    fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    fn projection_matrix(&self) -> Mat4 {
        self.projection.matrix()
    }

    fn near(&self) -> f32 {
        self.projection.near()
    }

    fn far(&self) -> f32 {
        self.projection.far()
    }

    fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize_or_zero()
    }
}

/// What the shadow system is given about the scene each frame.
#[derive(Clone, Copy)]
pub struct SceneView<'a> {
    /// Active camera.
    pub viewer: &'a dyn Viewer,
    /// World-space bounds of every shadow caster, if known.
    ///
    /// Without it, directional fitting falls back to the camera frustum alone
    /// and casters outside the view may be clipped.
    pub scene_bounds: Option<Aabb>,
}

impl<'a> SceneView<'a> {
    pub fn new(viewer: &'a dyn Viewer, scene_bounds: Option<Aabb>) -> Self {
        Self {
            viewer,
            scene_bounds: scene_bounds.filter(Aabb::is_valid),
        }
    }

    /// Check that the camera can be fitted against at all.
    pub fn is_valid(&self) -> bool {
        let near = self.viewer.near();
        let far = self.viewer.far();
        let vp = self.viewer.view_projection_matrix();
        near.is_finite()
            && far.is_finite()
            && near >= 0.0
            && far > near
            && vp.is_finite()
            && vp.determinant().abs() > f32::EPSILON * f32::EPSILON
            && self.viewer.forward() != Vec3::ZERO
    }
}

impl std::fmt::Debug for SceneView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneView")
            .field("position", &self.viewer.position())
            .field("near", &self.viewer.near())
            .field("far", &self.viewer.far())
            .field("scene_bounds", &self.scene_bounds)
            .finish()
    }
}
