//! Frustum culling for shadow candidate selection
//!
//! Provides frustum extraction from view-projection matrices and
//! bounding-sphere tests against the six frustum half-spaces.

use glam::{Mat4, Vec3, Vec4};

/// A plane in 3D space defined by the equation ax + by + cz + d = 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Normal vector (a, b, c) - not necessarily normalized.
    pub normal: Vec3,
    /// Distance from origin (d).
    pub distance: f32,
}

impl Plane {
    /// Create a new plane from normal and distance.
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal, distance }
    }

    /// Create a plane from a Vec4 (xyz = normal, w = distance).
    pub fn from_vec4(v: Vec4) -> Self {
        Self {
            normal: v.truncate(),
            distance: v.w,
        }
    }

    /// Normalize the plane equation.
    pub fn normalize(&self) -> Self {
        let len = self.normal.length();
        if len > 0.0 {
            Self {
                normal: self.normal / len,
                distance: self.distance / len,
            }
        } else {
            *self
        }
    }

    /// Get the signed distance from a point to the plane.
    /// Positive = in front (same side as normal), Negative = behind.
    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }
}

/// Result of a frustum intersection test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intersection {
    /// Completely outside the frustum.
    Outside,
    /// Completely inside the frustum.
    Inside,
    /// Partially inside (intersecting a plane).
    Intersecting,
}

/// View frustum defined by 6 planes.
///
/// The planes are oriented so that their normals point inward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    /// Left, Right, Bottom, Top, Near, Far planes.
    pub planes: [Plane; 6],
}

impl Frustum {
    pub const LEFT: usize = 0;
    pub const RIGHT: usize = 1;
    pub const BOTTOM: usize = 2;
    pub const TOP: usize = 3;
    pub const NEAR: usize = 4;
    pub const FAR: usize = 5;

    /// Build a frustum from six inward-facing half-spaces.
    pub fn from_planes(planes: [Plane; 6]) -> Self {
        Self {
            planes: planes.map(|p| p.normalize()),
        }
    }

    /// Extract frustum planes from a view-projection matrix.
    ///
    /// Gribb/Hartmann extraction for a `[0, 1]` clip depth range, which is
    /// what `Mat4::perspective_rh` and `Mat4::orthographic_rh` produce.
    pub fn from_view_projection(vp: Mat4) -> Self {
        let row0 = vp.row(0);
        let row1 = vp.row(1);
        let row2 = vp.row(2);
        let row3 = vp.row(3);

        Self::from_planes([
            Plane::from_vec4(row3 + row0),
            Plane::from_vec4(row3 - row0),
            Plane::from_vec4(row3 + row1),
            Plane::from_vec4(row3 - row1),
            Plane::from_vec4(row2),
            Plane::from_vec4(row3 - row2),
        ])
    }

    /// Test if a point is inside the frustum.
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.signed_distance(point) >= 0.0)
    }

    /// Classify a sphere against all six planes.
    pub fn test_sphere(&self, center: Vec3, radius: f32) -> Intersection {
        let mut result = Intersection::Inside;

        for plane in &self.planes {
            let distance = plane.signed_distance(center);
            if distance < -radius {
                return Intersection::Outside;
            }
            if distance < radius {
                result = Intersection::Intersecting;
            }
        }

        result
    }

    /// Test if a sphere is at least partially inside the frustum.
    pub fn contains_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.test_sphere(center, radius) != Intersection::Outside
    }

    /// Test whether a light's influence sphere can reach anything in view.
    ///
    /// Same as [`Frustum::contains_sphere`] except the near plane is not
    /// tested: the volume between the eye and the near plane is never drawn,
    /// but a light sitting there still illuminates visible receivers.
    pub fn reaches_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != Self::NEAR)
            .all(|(_, plane)| plane.signed_distance(center) >= -radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera_frustum(eye: Vec3, target: Vec3) -> Frustum {
        let view = Mat4::look_at_rh(eye, target, Vec3::Y);
        let proj = Mat4::perspective_rh(60f32.to_radians(), 16.0 / 9.0, 0.5, 200.0);
        Frustum::from_view_projection(proj * view)
    }

    #[test]
    fn test_plane_signed_distance() {
        // Plane at z=0, normal pointing in +Z direction
        let plane = Plane::new(Vec3::Z, 0.0);

        assert!(plane.signed_distance(Vec3::new(0.0, 0.0, 1.0)) > 0.0);
        assert!(plane.signed_distance(Vec3::new(0.0, 0.0, -1.0)) < 0.0);
        assert!((plane.signed_distance(Vec3::ZERO)).abs() < 0.0001);
    }

    #[test]
    fn test_frustum_contains_point() {
        let vp = Mat4::orthographic_rh(-10.0, 10.0, -10.0, 10.0, 0.1, 100.0);
        let frustum = Frustum::from_view_projection(vp);

        assert!(frustum.contains_point(Vec3::new(0.0, 0.0, -50.0)));
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, -150.0)));
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, 1.0)));
        assert!(!frustum.contains_point(Vec3::new(20.0, 0.0, -50.0)));
    }

    #[test]
    fn test_sphere_classification() {
        let frustum = camera_frustum(Vec3::ZERO, Vec3::NEG_Z);

        assert_eq!(
            frustum.test_sphere(Vec3::new(0.0, 0.0, -50.0), 1.0),
            Intersection::Inside
        );
        assert_eq!(
            frustum.test_sphere(Vec3::new(0.0, 0.0, -200.0), 5.0),
            Intersection::Intersecting
        );
        assert_eq!(
            frustum.test_sphere(Vec3::new(0.0, 0.0, 50.0), 5.0),
            Intersection::Outside
        );
    }

    #[test]
    fn test_light_at_eye_always_reaches() {
        let eye = Vec3::new(3.0, 2.0, -7.0);
        let targets = [
            Vec3::new(3.0, 2.0, -20.0),
            Vec3::new(10.0, 2.0, -7.0),
            Vec3::new(3.0, -9.0, -6.0),
            Vec3::new(-4.0, 8.0, 1.0),
        ];
        for target in targets {
            let frustum = camera_frustum(eye, target);
            assert!(frustum.reaches_sphere(eye, 0.001));
            // Tiny spheres at the eye fail the full test: the near plane is 0.5 away.
            assert!(!frustum.contains_sphere(eye, 0.001));
        }
    }
}
