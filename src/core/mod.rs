//! Core rendering abstractions
//!
//! The [`backend`] seam is always available; the wgpu implementation of it
//! lives in [`texture`] behind the `gpu` feature.

pub mod backend;
#[cfg(feature = "gpu")]
pub mod texture;

pub use backend::{RenderBackend, ResourceSetDescriptor, ResourceSetId, ShadowLightKind};
#[cfg(feature = "gpu")]
pub use texture::{ShadowTextureArray, ShadowTextureSet, WgpuShadowBackend};
