//! Rein shadow system
//!
//! Per-frame shadow planning for a real-time renderer: which lights cast
//! shadows, where their shadow maps live, and the matrices needed to render
//! and sample them.
//!
//! # Architecture
//!
//! The library is organized into layers:
//!
//! 1. **context** - wgpu device and queue wrapper (feature = "gpu")
//! 2. **core** - the render backend seam and its wgpu implementation
//! 3. **renderer** - cameras, lights, culling and the shadow system
//!
//! Nothing above `core` touches a graphics API, so the shadow logic runs and
//! tests without a GPU.

#[cfg(feature = "gpu")]
pub mod context;
pub mod core;
pub mod error;
pub mod renderer;

#[cfg(feature = "gpu")]
pub use context::WgpuContext;

pub use core::{RenderBackend, ResourceSetDescriptor, ResourceSetId, ShadowLightKind};
#[cfg(feature = "gpu")]
pub use core::{ShadowTextureArray, ShadowTextureSet, WgpuShadowBackend};

pub use error::{ShadowError, ShadowResult};

pub use renderer::{
    Aabb, Camera, DirectionalLight, DirectionalShadowMode, FramePhase, FrameShadows, Frustum,
    Intersection, LightRegistry, Plane, PointLight, Projection, SceneView, ShadowAtlas,
    ShadowAtlasRegion, ShadowBias, ShadowCaster, ShadowConfig, ShadowResourceCache, ShadowSlot,
    ShadowSystem, SpotLight, Viewer,
};

// Re-export glam for convenience
pub use glam;
