//! Render backend seam
//!
//! The shadow system never talks to a graphics API directly. Everything that
//! touches GPU memory goes through [`RenderBackend`].

use std::fmt;

use crate::renderer::shadow::FrameShadows;

/// Light kinds that own shadow resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShadowLightKind {
    Point,
    Spot,
    Directional,
}

impl ShadowLightKind {
    /// Array layers one light of this kind occupies in its resource set.
    pub fn layers_per_light(&self) -> u32 {
        match self {
            ShadowLightKind::Point => 6,
            ShadowLightKind::Spot | ShadowLightKind::Directional => 1,
        }
    }
}

impl fmt::Display for ShadowLightKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShadowLightKind::Point => "point",
            ShadowLightKind::Spot => "spot",
            ShadowLightKind::Directional => "directional",
        };
        f.write_str(name)
    }
}

/// Identity of a resource set handed out by the resolution cache.
///
/// Two lookups that return the same id refer to the same backend resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceSetId(pub u64);

/// Everything a backend needs to build one resolution-keyed resource set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceSetDescriptor {
    /// Light kind the set serves.
    pub kind: ShadowLightKind,
    /// Width and height of every layer, in texels.
    pub resolution: u32,
    /// Number of depth array layers.
    pub layers: u32,
    /// Also allocate a variance-moment array with the same shape.
    pub variance_moments: bool,
}

impl ResourceSetDescriptor {
    /// Debug label for backend objects built from this descriptor.
    pub fn label(&self) -> String {
        format!("{} shadow {}px x{}", self.kind, self.resolution, self.layers)
    }
}

/// The rendering backend the shadow system publishes to.
///
/// Implementations own all GPU allocation and destruction. Resource sets
/// release their GPU memory when dropped.
pub trait RenderBackend {
    /// Opaque bundle of GPU resources for one `(kind, resolution)` key.
    type ResourceSet;

    /// Build a new resource set. Called at most once per cache key.
    fn build_resource_set(
        &mut self,
        desc: &ResourceSetDescriptor,
    ) -> anyhow::Result<Self::ResourceSet>;

    /// Clear the given depth layers of a resource set before the depth pass.
    fn clear_layers(&mut self, set: &Self::ResourceSet, layers: &[u32]);

    /// Receive the per-frame shadow data.
    fn publish(&mut self, frame: &FrameShadows);
}
