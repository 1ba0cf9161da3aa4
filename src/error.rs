//! Error types for the shadow system.

use crate::core::backend::ShadowLightKind;

/// Result alias used throughout the crate.
pub type ShadowResult<T> = Result<T, ShadowError>;

/// Errors reported by the shadow system.
///
/// Every error is local to a single light or light kind; none of them abort
/// the frame for unrelated lights.
#[derive(Debug, thiserror::Error)]
pub enum ShadowError {
    #[error("invalid shadow configuration: {0}")]
    InvalidConfig(String),

    #[error("no free {kind} shadow slot (capacity {capacity})")]
    SlotCapacityExceeded {
        kind: ShadowLightKind,
        capacity: usize,
    },

    #[error("invalid depth range: near = {near}, far = {far}")]
    InvalidDepthRange { near: f32, far: f32 },

    #[error("cascade count {0} is outside 1..={max}", max = crate::renderer::shadow::MAX_CASCADES)]
    InvalidCascadeCount(u32),

    #[error("shadow atlas has no free rectangle for a {width}x{height} region")]
    AtlasAllocationFailed { width: u32, height: u32 },

    #[error("failed to build {kind} shadow resources at {resolution}px")]
    ShadowResourceInit {
        kind: ShadowLightKind,
        resolution: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("{0} shadows are disabled for this session")]
    ShadowsDisabled(ShadowLightKind),

    #[error("shadow resolution cannot change while the depth pass is running")]
    ResolutionChangeDuringDepthPass,

    #[error("frame phase is {actual}, expected {expected}")]
    FramePhase {
        expected: crate::renderer::shadow::FramePhase,
        actual: crate::renderer::shadow::FramePhase,
    },
}
