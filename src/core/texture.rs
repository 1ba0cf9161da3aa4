//! Shadow map textures and the wgpu render backend
//!
//! Every resolution-keyed resource set is a [`ShadowTextureSet`]: a depth
//! array with one view per layer, an optional variance-moment array of the
//! same shape, and a single-layer debug snapshot. Dropping the set releases
//! all of them.

use anyhow::bail;
use tracing::{debug, warn};

use crate::context::WgpuContext;
use crate::core::backend::{RenderBackend, ResourceSetDescriptor};
use crate::renderer::shadow::directional::CascadeUniform;
use crate::renderer::shadow::{FrameShadows, ShadowInfoUniform, MAX_CASCADES};

/// A 2D texture array with per-layer views, for layered shadow rendering.
pub struct ShadowTextureArray {
    pub(crate) texture: wgpu::Texture,
    pub(crate) view: wgpu::TextureView,
    pub(crate) layer_views: Vec<wgpu::TextureView>,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) layers: u32,
    pub(crate) format: wgpu::TextureFormat,
}

impl ShadowTextureArray {
    /// Create a new texture array.
    pub fn new(
        ctx: &WgpuContext,
        width: u32,
        height: u32,
        layers: u32,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
        label: Option<&str>,
    ) -> Self {
        let extent = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: layers,
        };

        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label,
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            ..Default::default()
        });

        // One view per layer for render attachments.
        let layer_views: Vec<_> = (0..layers)
            .map(|i| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    dimension: Some(wgpu::TextureViewDimension::D2),
                    base_array_layer: i,
                    array_layer_count: Some(1),
                    ..Default::default()
                })
            })
            .collect();

        Self {
            texture,
            view,
            layer_views,
            width,
            height,
            layers,
            format,
        }
    }

    /// Get the raw wgpu texture.
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    /// Get the array view (all layers).
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    /// Get a specific layer's view.
    pub fn layer_view(&self, layer: u32) -> Option<&wgpu::TextureView> {
        self.layer_views.get(layer as usize)
    }

    /// Get the texture dimensions.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn layers(&self) -> u32 {
        self.layers
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }
}

/// GPU resources for one `(kind, resolution)` cache key.
pub struct ShadowTextureSet {
    descriptor: ResourceSetDescriptor,
    depth: ShadowTextureArray,
    moments: Option<ShadowTextureArray>,
    snapshot: wgpu::Texture,
    snapshot_view: wgpu::TextureView,
}

impl ShadowTextureSet {
    pub fn descriptor(&self) -> &ResourceSetDescriptor {
        &self.descriptor
    }

    /// Depth array rendered by the shadow depth pass.
    pub fn depth(&self) -> &ShadowTextureArray {
        &self.depth
    }

    /// Variance moments, when enabled.
    pub fn moments(&self) -> Option<&ShadowTextureArray> {
        self.moments.as_ref()
    }

    /// Single-layer copy target for inspecting a shadow map.
    pub fn snapshot(&self) -> &wgpu::Texture {
        &self.snapshot
    }

    pub fn snapshot_view(&self) -> &wgpu::TextureView {
        &self.snapshot_view
    }
}

/// Reject descriptors the device cannot allocate.
pub fn check_limits(limits: &wgpu::Limits, desc: &ResourceSetDescriptor) -> anyhow::Result<()> {
    if desc.resolution == 0 || desc.layers == 0 {
        bail!("{}: empty shadow texture", desc.label());
    }
    if desc.resolution > limits.max_texture_dimension_2d {
        bail!(
            "{}: resolution exceeds device limit {}",
            desc.label(),
            limits.max_texture_dimension_2d
        );
    }
    if desc.layers > limits.max_texture_array_layers {
        bail!(
            "{}: layer count exceeds device limit {}",
            desc.label(),
            limits.max_texture_array_layers
        );
    }
    Ok(())
}

/// [`RenderBackend`] on a wgpu device.
///
/// Published shadow info goes to a storage buffer (one
/// [`ShadowInfoUniform`] per slot); cascade matrices go to a uniform buffer.
pub struct WgpuShadowBackend {
    ctx: WgpuContext,
    info_buffer: wgpu::Buffer,
    cascade_buffer: wgpu::Buffer,
    comparison_sampler: wgpu::Sampler,
}

impl WgpuShadowBackend {
    pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
    pub const MOMENT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rg32Float;
    pub const SNAPSHOT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;

    /// Create the backend with room for `max_lights` published slots.
    pub fn new(ctx: WgpuContext, max_lights: usize) -> Self {
        let info_size = (max_lights.max(1) * std::mem::size_of::<ShadowInfoUniform>()) as u64;
        let info_buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("shadow info buffer"),
            size: info_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let cascade_size = (MAX_CASCADES * std::mem::size_of::<CascadeUniform>()) as u64;
        let cascade_buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("shadow cascade buffer"),
            size: cascade_size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let comparison_sampler = ctx.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("shadow comparison sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Nearest,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });

        Self {
            ctx,
            info_buffer,
            cascade_buffer,
            comparison_sampler,
        }
    }

    /// Storage buffer holding the published per-slot shadow info.
    pub fn info_buffer(&self) -> &wgpu::Buffer {
        &self.info_buffer
    }

    /// Uniform buffer holding the directional cascades.
    pub fn cascade_buffer(&self) -> &wgpu::Buffer {
        &self.cascade_buffer
    }

    /// Depth comparison sampler for shadow lookups.
    pub fn comparison_sampler(&self) -> &wgpu::Sampler {
        &self.comparison_sampler
    }

    pub fn context(&self) -> &WgpuContext {
        &self.ctx
    }
}

impl RenderBackend for WgpuShadowBackend {
    type ResourceSet = ShadowTextureSet;

    fn build_resource_set(
        &mut self,
        desc: &ResourceSetDescriptor,
    ) -> anyhow::Result<Self::ResourceSet> {
        check_limits(&self.ctx.device.limits(), desc)?;
        let label = desc.label();

        let depth = ShadowTextureArray::new(
            &self.ctx,
            desc.resolution,
            desc.resolution,
            desc.layers,
            Self::DEPTH_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            Some(&label),
        );

        let moments = desc.variance_moments.then(|| {
            ShadowTextureArray::new(
                &self.ctx,
                desc.resolution,
                desc.resolution,
                desc.layers,
                Self::MOMENT_FORMAT,
                wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
                Some(&format!("{label} moments")),
            )
        });

        let snapshot = self.ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&format!("{label} snapshot")),
            size: wgpu::Extent3d {
                width: desc.resolution,
                height: desc.resolution,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::SNAPSHOT_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let snapshot_view = snapshot.create_view(&wgpu::TextureViewDescriptor::default());

        debug!(%label, "shadow texture set created");
        Ok(ShadowTextureSet {
            descriptor: *desc,
            depth,
            moments,
            snapshot,
            snapshot_view,
        })
    }

    fn clear_layers(&mut self, set: &Self::ResourceSet, layers: &[u32]) {
        let mut encoder = self.ctx.create_encoder(Some("shadow clear encoder"));
        for &layer in layers {
            let Some(view) = set.depth.layer_view(layer) else {
                warn!(layer, layers = set.depth.layers(), "shadow layer out of range");
                continue;
            };
            let moments_attachment = set
                .moments
                .as_ref()
                .and_then(|moments| moments.layer_view(layer))
                .map(|view| wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: 1.0,
                            g: 1.0,
                            b: 0.0,
                            a: 0.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                });

            // Load-op clears; the pass records no draws.
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("shadow clear pass"),
                color_attachments: &[moments_attachment],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
        }
        self.ctx.submit(std::iter::once(encoder.finish()));
    }

    fn publish(&mut self, frame: &FrameShadows) {
        let bytes = frame.published.as_bytes();
        let capacity = self.info_buffer.size() as usize;
        if bytes.len() > capacity {
            warn!(
                published = bytes.len(),
                capacity, "shadow info truncated to buffer size"
            );
        }
        self.ctx
            .queue
            .write_buffer(&self.info_buffer, 0, &bytes[..bytes.len().min(capacity)]);

        let cascades = frame.directional.uniforms();
        self.ctx
            .queue
            .write_buffer(&self.cascade_buffer, 0, bytemuck::cast_slice(&cascades));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::ShadowLightKind;

    fn desc(resolution: u32, layers: u32) -> ResourceSetDescriptor {
        ResourceSetDescriptor {
            kind: ShadowLightKind::Spot,
            resolution,
            layers,
            variance_moments: false,
        }
    }

    #[test]
    fn test_limits_accept_default_shadow_sets() {
        let limits = wgpu::Limits::default();
        assert!(check_limits(&limits, &desc(2048, 32)).is_ok());
        assert!(check_limits(&limits, &desc(512, 96)).is_ok());
    }

    #[test]
    fn test_limits_reject_oversized_sets() {
        let limits = wgpu::Limits::default();
        let too_wide = desc(limits.max_texture_dimension_2d + 1, 1);
        let too_deep = desc(1024, limits.max_texture_array_layers + 1);

        assert!(check_limits(&limits, &too_wide).is_err());
        assert!(check_limits(&limits, &too_deep).is_err());
        assert!(check_limits(&limits, &desc(0, 4)).is_err());
    }

    #[test]
    fn test_uniform_sizes_are_16_byte_aligned() {
        assert_eq!(std::mem::size_of::<ShadowInfoUniform>() % 16, 0);
        assert_eq!(std::mem::size_of::<CascadeUniform>() % 16, 0);
    }
}
