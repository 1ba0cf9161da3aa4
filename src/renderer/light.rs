//! Light types
//!
//! The light registry as the shadow system sees it: ordered point and spot
//! lists plus at most one directional light. Everything here is read-only to
//! the shadow system except the shadow index written back each frame.

use glam::Vec3;

use crate::core::backend::ShadowLightKind;
use crate::renderer::shadow::ShadowSlot;

/// Default falloff exponent for local lights.
pub const DEFAULT_FALLOFF_EXPONENT: f32 = 8.0;

/// Read access to a shadow-casting light plus the shadow index write-back.
pub trait ShadowCaster {
    /// Kind of shadow resources this light needs.
    fn kind(&self) -> ShadowLightKind;

    /// World-space position.
    fn position(&self) -> Vec3;

    /// Distance at which the light's contribution reaches zero.
    fn attenuation_radius(&self) -> f32;

    /// Brightest color channel scaled by intensity.
    fn color_intensity(&self) -> f32;

    /// Exponent of the distance falloff curve.
    fn falloff_exponent(&self) -> f32;

    /// Whether the light wants a shadow at all.
    fn casts_shadow(&self) -> bool;

    /// Slot assigned for the current frame.
    fn shadow_index(&self) -> Option<ShadowSlot>;

    /// Write back the slot assigned for the current frame.
    fn set_shadow_index(&mut self, slot: Option<ShadowSlot>);
}

/// Directional light that illuminates from a direction.
#[derive(Debug, Clone)]
pub struct DirectionalLight {
    /// Light intensity (0.0 - 1.0+).
    pub intensity: f32,
    /// Light color (RGB).
    pub color: [f32; 3],
    /// Direction the light travels (normalized).
    pub direction: Vec3,
    /// Whether the light casts shadows.
    pub cast_shadow: bool,
    /// Slot assigned by the shadow system this frame.
    pub shadow_index: Option<ShadowSlot>,
}

impl DirectionalLight {
    /// Create a new shadow-casting directional light.
    pub fn new(intensity: f32, color: [f32; 3], direction: Vec3) -> Self {
        Self {
            intensity,
            color,
            direction: direction.normalize_or_zero(),
            cast_shadow: true,
            shadow_index: None,
        }
    }

    /// Create a white directional light.
    pub fn white(intensity: f32, direction: Vec3) -> Self {
        Self::new(intensity, [1.0, 1.0, 1.0], direction)
    }
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self::white(1.0, Vec3::new(-0.3, -1.0, -0.5))
    }
}

/// Point light that illuminates from a position with attenuation.
#[derive(Debug, Clone)]
pub struct PointLight {
    /// Light intensity.
    pub intensity: f32,
    /// Light color (RGB).
    pub color: [f32; 3],
    /// Light position.
    pub position: Vec3,
    /// Radius of influence.
    pub attenuation_radius: f32,
    /// Distance falloff exponent.
    pub falloff_exponent: f32,
    /// Whether the light casts shadows.
    pub cast_shadow: bool,
    /// Slot assigned by the shadow system this frame.
    pub shadow_index: Option<ShadowSlot>,
}

impl PointLight {
    /// Create a new shadow-casting point light.
    pub fn new(intensity: f32, color: [f32; 3], position: Vec3, attenuation_radius: f32) -> Self {
        Self {
            intensity,
            color,
            position,
            attenuation_radius,
            falloff_exponent: DEFAULT_FALLOFF_EXPONENT,
            cast_shadow: true,
            shadow_index: None,
        }
    }

    /// Create a white point light.
    pub fn white(intensity: f32, position: Vec3, attenuation_radius: f32) -> Self {
        Self::new(intensity, [1.0, 1.0, 1.0], position, attenuation_radius)
    }
}

impl Default for PointLight {
    fn default() -> Self {
        Self::white(1.0, Vec3::new(0.0, 2.0, 0.0), 50.0)
    }
}

impl ShadowCaster for PointLight {
    fn kind(&self) -> ShadowLightKind {
        ShadowLightKind::Point
    }

    fn position(&self) -> Vec3 {
        self.position
    }

    fn attenuation_radius(&self) -> f32 {
        self.attenuation_radius
    }

    fn color_intensity(&self) -> f32 {
        color_intensity(self.color, self.intensity)
    }

    fn falloff_exponent(&self) -> f32 {
        self.falloff_exponent
    }

    fn casts_shadow(&self) -> bool {
        self.cast_shadow
    }

    fn shadow_index(&self) -> Option<ShadowSlot> {
        self.shadow_index
    }

    fn set_shadow_index(&mut self, slot: Option<ShadowSlot>) {
        self.shadow_index = slot;
    }
}

/// Spot light with cone-shaped illumination.
#[derive(Debug, Clone)]
pub struct SpotLight {
    /// Light intensity.
    pub intensity: f32,
    /// Light color (RGB).
    pub color: [f32; 3],
    /// Light position.
    pub position: Vec3,
    /// Light direction (normalized).
    pub direction: Vec3,
    /// Inner cone angle (radians) - full intensity within this cone.
    pub inner_angle: f32,
    /// Outer cone angle (radians) - light fades to zero at this angle.
    pub outer_angle: f32,
    /// Radius of influence.
    pub attenuation_radius: f32,
    /// Distance falloff exponent.
    pub falloff_exponent: f32,
    /// Whether the light casts shadows.
    pub cast_shadow: bool,
    /// Slot assigned by the shadow system this frame.
    pub shadow_index: Option<ShadowSlot>,
}

impl SpotLight {
    /// Create a new shadow-casting spot light.
    pub fn new(
        intensity: f32,
        color: [f32; 3],
        position: Vec3,
        direction: Vec3,
        inner_angle: f32,
        outer_angle: f32,
        attenuation_radius: f32,
    ) -> Self {
        Self {
            intensity,
            color,
            position,
            direction: direction.normalize_or_zero(),
            inner_angle,
            outer_angle,
            attenuation_radius,
            falloff_exponent: DEFAULT_FALLOFF_EXPONENT,
            cast_shadow: true,
            shadow_index: None,
        }
    }

    /// Create a white spot light with 30/45 degree cones.
    pub fn white(intensity: f32, position: Vec3, direction: Vec3, attenuation_radius: f32) -> Self {
        Self::new(
            intensity,
            [1.0, 1.0, 1.0],
            position,
            direction,
            std::f32::consts::PI / 6.0,
            std::f32::consts::PI / 4.0,
            attenuation_radius,
        )
    }
}

impl Default for SpotLight {
    fn default() -> Self {
        Self::white(1.0, Vec3::new(0.0, 5.0, 0.0), Vec3::NEG_Y, 20.0)
    }
}

impl ShadowCaster for SpotLight {
    fn kind(&self) -> ShadowLightKind {
        ShadowLightKind::Spot
    }

    fn position(&self) -> Vec3 {
        self.position
    }

    fn attenuation_radius(&self) -> f32 {
        self.attenuation_radius
    }

    fn color_intensity(&self) -> f32 {
        color_intensity(self.color, self.intensity)
    }

    fn falloff_exponent(&self) -> f32 {
        self.falloff_exponent
    }

    fn casts_shadow(&self) -> bool {
        self.cast_shadow
    }

    fn shadow_index(&self) -> Option<ShadowSlot> {
        self.shadow_index
    }

    fn set_shadow_index(&mut self, slot: Option<ShadowSlot>) {
        self.shadow_index = slot;
    }
}

fn color_intensity(color: [f32; 3], intensity: f32) -> f32 {
    color[0].max(color[1]).max(color[2]) * intensity
}

/// Ordered light lists owned by the scene.
#[derive(Debug, Clone, Default)]
pub struct LightRegistry {
    pub points: Vec<PointLight>,
    pub spots: Vec<SpotLight>,
    pub directional: Option<DirectionalLight>,
}

impl LightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset every shadow index to "no shadow".
    pub fn clear_shadow_indices(&mut self) {
        for light in &mut self.points {
            light.shadow_index = None;
        }
        for light in &mut self.spots {
            light.shadow_index = None;
        }
        if let Some(light) = &mut self.directional {
            light.shadow_index = None;
        }
    }

    /// Slots currently held by any light, in registry order.
    pub fn held_slots(&self) -> Vec<ShadowSlot> {
        self.points
            .iter()
            .filter_map(|l| l.shadow_index)
            .chain(self.spots.iter().filter_map(|l| l.shadow_index))
            .chain(self.directional.iter().filter_map(|l| l.shadow_index))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_intensity_uses_brightest_channel() {
        let light = PointLight::new(2.0, [0.2, 0.9, 0.5], Vec3::ZERO, 10.0);
        assert!((light.color_intensity() - 1.8).abs() < 1e-6);
    }

    #[test]
    fn test_registry_clear_shadow_indices() {
        let mut registry = LightRegistry::new();
        let mut point = PointLight::default();
        point.shadow_index = Some(ShadowSlot(0));
        registry.points.push(point);
        let mut sun = DirectionalLight::default();
        sun.shadow_index = Some(ShadowSlot(1));
        registry.directional = Some(sun);

        assert_eq!(registry.held_slots(), vec![ShadowSlot(0), ShadowSlot(1)]);
        registry.clear_shadow_indices();
        assert!(registry.held_slots().is_empty());
    }
}
