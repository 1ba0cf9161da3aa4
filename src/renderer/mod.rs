//! Scene-side inputs and the shadow system
//!
//! Cameras, lights and bounds describe the scene; [`shadow`] turns them into
//! per-frame shadow data.

pub mod culling;
pub mod geometry;
pub mod light;
pub mod shadow;
pub mod viewer;

pub use culling::{Frustum, Intersection, Plane};
pub use geometry::Aabb;
pub use light::{DirectionalLight, LightRegistry, PointLight, ShadowCaster, SpotLight};
pub use shadow::{
    DirectionalShadowMode, FramePhase, FrameShadows, ShadowAtlas, ShadowAtlasRegion, ShadowBias,
    ShadowConfig, ShadowResourceCache, ShadowSlot, ShadowSystem, SpotAtlasConfig,
};
pub use viewer::{Camera, Projection, SceneView, Viewer};
