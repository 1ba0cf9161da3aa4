//! Shadow mapping module
//!
//! Decides every frame which lights cast shadows, computes the matrices
//! needed to render and sample their shadow maps, and owns the lifetime
//! policy of the shadow GPU resources.
//!
//! # Frame flow
//!
//! 1. [`selector`] culls and ranks point/spot lights and assigns slots
//! 2. [`local`] builds spot and cube-face matrices for the kept lights
//! 3. [`directional`] (or [`warp`]) fits the directional shadow
//! 4. [`atlas`] places atlas-packed spot maps, when configured
//! 5. [`system`] publishes the result to the render backend
//!
//! [`cache`] is consulted only when a resolution change is requested.

pub mod atlas;
pub mod cache;
pub mod directional;
pub mod local;
pub mod ranking;
pub mod selector;
pub mod slots;
pub mod system;
pub mod warp;

pub use atlas::{ShadowAtlas, ShadowAtlasRegion};
pub use cache::ShadowResourceCache;
pub use directional::{CascadeFrustum, CascadeSplits, DirectionalShadowFrame};
pub use ranking::{CandidateRanking, ListOrderRanking, RankingPolicy, WeightedRanking};
pub use selector::{SelectionStats, ShadowCandidate};
pub use slots::{PublishedShadows, ShadowSlot, SlotArena};
pub use system::{FramePhase, FrameShadows, FrameStats, ShadowSystem};

use glam::{Mat4, Vec3};

use crate::error::{ShadowError, ShadowResult};

/// Capacity of the published per-slot shadow array.
pub const MAX_LIGHTS: usize = 100;

/// Upper bound on directional cascades.
pub const MAX_CASCADES: usize = 8;

/// How the directional light's shadow is fitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectionalShadowMode {
    /// One orthographic map per view-depth cascade.
    #[default]
    Cascaded,
    /// One perspective-warped map covering the whole view.
    PerspectiveWarp,
}

/// Depth bias parameters consumed by the depth and filtering passes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowBias {
    /// Constant depth bias.
    pub constant: f32,
    /// Slope-scaled depth bias.
    pub slope: f32,
    /// Clamp for the slope-scaled term.
    pub max_slope: f32,
}

impl ShadowBias {
    pub fn new(constant: f32, slope: f32, max_slope: f32) -> Self {
        Self {
            constant,
            slope,
            max_slope,
        }
    }
}

impl Default for ShadowBias {
    fn default() -> Self {
        Self::new(0.005, 1.0, 0.02)
    }
}

/// Atlas packing for spot light shadow maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpotAtlasConfig {
    /// Atlas width and height in texels.
    pub size: u32,
}

/// Shadow system configuration.
#[derive(Debug, Clone)]
pub struct ShadowConfig {
    /// Capacity of the published slot array. Default: [`MAX_LIGHTS`].
    pub max_lights: usize,
    /// Simultaneously shadowed point lights. Default: 16.
    pub max_point_shadows: usize,
    /// Simultaneously shadowed spot lights. Default: 32.
    pub max_spot_shadows: usize,
    /// Shrink factor for the culling sphere radius. Default: 0.8.
    pub padding_scale: f32,
    /// Which candidates survive when more pass culling than fit.
    pub ranking: RankingPolicy,
    /// Directional fitting mode. Default: cascaded.
    pub directional_mode: DirectionalShadowMode,
    /// Number of directional cascades. Default: 4.
    pub cascade_count: u32,
    /// Blend between linear (0) and logarithmic (1) splits. Default: 0.75.
    pub split_lambda: f32,
    /// Directional shadow map resolution. Default: 2048.
    pub directional_resolution: u32,
    /// Initial point light cube face resolution. Default: 512.
    pub point_resolution: u32,
    /// Initial spot light shadow map resolution. Default: 1024.
    pub spot_resolution: u32,
    /// Texels of padding around each cascade for the filter kernel. Default: 2.
    pub filter_texel_padding: u32,
    /// Lower clamp for sin(gamma) in the perspective warp. Default: 0.01.
    pub min_sin_gamma: f32,
    /// Pack spot maps into a shared atlas instead of array layers.
    pub spot_atlas: Option<SpotAtlasConfig>,
    /// Allocate variance-moment arrays next to the depth arrays.
    pub variance_moments: bool,
    /// Local light near plane as a fraction of the attenuation radius. Default: 0.01.
    pub local_near_fraction: f32,
    /// Smallest local light near plane. Default: 0.01.
    pub min_local_near: f32,
    /// Bias for point light shadows.
    pub point_bias: ShadowBias,
    /// Bias for spot light shadows.
    pub spot_bias: ShadowBias,
    /// Bias for the directional shadow.
    pub directional_bias: ShadowBias,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            max_lights: MAX_LIGHTS,
            max_point_shadows: 16,
            max_spot_shadows: 32,
            padding_scale: 0.8,
            ranking: RankingPolicy::ListOrder,
            directional_mode: DirectionalShadowMode::Cascaded,
            cascade_count: 4,
            split_lambda: 0.75,
            directional_resolution: 2048,
            point_resolution: 512,
            spot_resolution: 1024,
            filter_texel_padding: 2,
            min_sin_gamma: 0.01,
            spot_atlas: None,
            variance_moments: false,
            local_near_fraction: 0.01,
            min_local_near: 0.01,
            point_bias: ShadowBias::new(0.02, 1.5, 0.05),
            spot_bias: ShadowBias::new(0.0005, 1.0, 0.01),
            directional_bias: ShadowBias::default(),
        }
    }
}

impl ShadowConfig {
    /// Check the configuration for values the shadow system cannot honor.
    pub fn validate(&self) -> ShadowResult<()> {
        let invalid = |msg: String| Err(ShadowError::InvalidConfig(msg));

        if self.max_lights > MAX_LIGHTS {
            return invalid(format!(
                "max_lights {} exceeds {MAX_LIGHTS}",
                self.max_lights
            ));
        }
        if self.max_point_shadows + self.max_spot_shadows + 1 > self.max_lights {
            return invalid(format!(
                "{} point + {} spot + 1 directional slots exceed max_lights {}",
                self.max_point_shadows, self.max_spot_shadows, self.max_lights
            ));
        }
        if self.cascade_count == 0 || self.cascade_count as usize > MAX_CASCADES {
            return Err(ShadowError::InvalidCascadeCount(self.cascade_count));
        }
        if !(0.0..=1.0).contains(&self.split_lambda) {
            return invalid(format!("split_lambda {} is outside [0, 1]", self.split_lambda));
        }
        if !(self.padding_scale > 0.0) {
            return invalid(format!("padding_scale {} must be positive", self.padding_scale));
        }
        if !(self.min_sin_gamma > 0.0 && self.min_sin_gamma < 1.0) {
            return invalid(format!("min_sin_gamma {} is outside (0, 1)", self.min_sin_gamma));
        }
        let min_resolution = 2 * self.filter_texel_padding;
        for (name, resolution) in [
            ("directional", self.directional_resolution),
            ("point", self.point_resolution),
            ("spot", self.spot_resolution),
        ] {
            if resolution <= min_resolution {
                return invalid(format!(
                    "{name} resolution {resolution} must exceed twice the texel padding"
                ));
            }
        }
        if let Some(atlas) = self.spot_atlas {
            if atlas.size < self.spot_resolution {
                return invalid(format!(
                    "spot atlas {} cannot hold one {}px map",
                    atlas.size, self.spot_resolution
                ));
            }
        }
        Ok(())
    }
}

/// Per-slot shadow data published to the render backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PublishedShadowInfo {
    /// World to light clip space.
    ///
    /// Point lights publish their +X cube face here; the other five faces
    /// are in [`FrameShadows::point_faces`]. Directional lights publish the
    /// first cascade.
    pub view_projection: Mat4,
    /// Light position (or the directional fit eye).
    pub light_position: Vec3,
    /// Near clipping distance of the shadow projection.
    pub near: f32,
    /// Far clipping distance of the shadow projection.
    pub far: f32,
    /// Bias parameters.
    pub bias: ShadowBias,
}

impl PublishedShadowInfo {
    /// Get the shadow uniform data for shaders.
    pub fn uniform(&self) -> ShadowInfoUniform {
        ShadowInfoUniform {
            view_projection: self.view_projection.to_cols_array_2d(),
            light_position: self.light_position.extend(1.0).to_array(),
            near: self.near,
            far: self.far,
            bias: self.bias.constant,
            slope_bias: self.bias.slope,
            max_slope_depth_bias: self.bias.max_slope,
            _padding: [0.0; 3],
        }
    }
}

/// Shadow info uniform data for GPU.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ShadowInfoUniform {
    /// World to light clip space.
    pub view_projection: [[f32; 4]; 4],
    /// Light position (w = 1).
    pub light_position: [f32; 4],
    pub near: f32,
    pub far: f32,
    /// Constant depth bias.
    pub bias: f32,
    /// Slope-scaled depth bias.
    pub slope_bias: f32,
    /// Clamp for the slope-scaled term.
    pub max_slope_depth_bias: f32,
    pub _padding: [f32; 3],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadow_config_default() {
        let config = ShadowConfig::default();
        assert_eq!(config.max_lights, 100);
        assert!((config.padding_scale - 0.8).abs() < 1e-6);
        assert_eq!(config.ranking, RankingPolicy::ListOrder);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_shadow_config_rejects_slot_overflow() {
        let config = ShadowConfig {
            max_point_shadows: 60,
            max_spot_shadows: 40,
            ..ShadowConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ShadowError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_shadow_config_rejects_cascade_count() {
        let config = ShadowConfig {
            cascade_count: 9,
            ..ShadowConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ShadowError::InvalidCascadeCount(9))
        ));
    }

    #[test]
    fn test_uniform_layout() {
        assert_eq!(std::mem::size_of::<ShadowInfoUniform>(), 112);
        let info = PublishedShadowInfo {
            view_projection: Mat4::IDENTITY,
            light_position: Vec3::new(1.0, 2.0, 3.0),
            near: 0.1,
            far: 10.0,
            bias: ShadowBias::default(),
        };
        let uniform = info.uniform();
        assert_eq!(uniform.light_position, [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(uniform.far, 10.0);
    }
}
