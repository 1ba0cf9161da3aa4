//! Frame orchestrator
//!
//! [`ShadowSystem`] runs once per frame before the shadow depth pass. It
//! clears the depth layers of lights that held a slot, selects point and
//! spot candidates, computes their matrices, fits the directional shadow and
//! publishes the result to the render backend.

use std::fmt;

use tracing::{debug, warn};

use crate::core::backend::{RenderBackend, ResourceSetId, ShadowLightKind};
use crate::error::{ShadowError, ShadowResult};
use crate::renderer::culling::Frustum;
use crate::renderer::light::{LightRegistry, ShadowCaster, SpotLight};
use crate::renderer::viewer::SceneView;

use super::atlas::{ShadowAtlas, ShadowAtlasRegion};
use super::cache::ShadowResourceCache;
use super::directional::{build_cascades, DirectionalShadowFrame};
use super::local::{point_shadow, spot_shadow, PointShadowFaces, SpotShadowMatrices};
use super::ranking::CandidateRanking;
use super::selector::{
    assign_slots, reject_all, select_candidates, SelectionStats, ShadowCandidate,
};
use super::slots::{PublishedShadows, ShadowSlot, SlotArena};
use super::warp::build_warped;
use super::{DirectionalShadowMode, PublishedShadowInfo, ShadowConfig};

/// Where the system is within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramePhase {
    /// Between frames.
    #[default]
    Idle,
    /// Shadow data published, depth pass not started.
    Prepared,
    /// Depth pass running; resources must not change.
    DepthPass,
}

impl fmt::Display for FramePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FramePhase::Idle => "idle",
            FramePhase::Prepared => "prepared",
            FramePhase::DepthPass => "depth pass",
        };
        f.write_str(name)
    }
}

/// Per-frame counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub point: SelectionStats,
    pub spot: SelectionStats,
    /// Point lights that received a slot.
    pub point_shadows: usize,
    /// Spot lights that received a slot.
    pub spot_shadows: usize,
    /// Whether the directional light published a shadow.
    pub directional: bool,
    /// Spot candidates dropped because the atlas was full.
    pub atlas_dropped: usize,
}

/// Everything the shadow system produced for one frame.
#[derive(Debug, Clone)]
pub struct FrameShadows {
    /// Per-slot shadow info.
    pub published: PublishedShadows,
    /// Cube face matrices for every shadowed point light.
    pub point_faces: Vec<(ShadowSlot, PointShadowFaces)>,
    /// Matrices for every shadowed spot light.
    pub spot_matrices: Vec<(ShadowSlot, SpotShadowMatrices)>,
    /// Directional cascades or warped map.
    pub directional: DirectionalShadowFrame,
    /// Atlas placement of spot maps, when atlas packing is enabled.
    pub atlas_regions: Vec<(ShadowSlot, ShadowAtlasRegion)>,
    /// First spot slot; equals the number of shadowed point lights.
    pub spot_slot_base: u32,
    /// Slot of the directional light, right after the spot range.
    pub directional_slot: Option<ShadowSlot>,
    pub stats: FrameStats,
}

impl FrameShadows {
    fn new(capacity: usize) -> Self {
        Self {
            published: PublishedShadows::new(capacity),
            point_faces: Vec::new(),
            spot_matrices: Vec::new(),
            directional: DirectionalShadowFrame::disabled(),
            atlas_regions: Vec::new(),
            spot_slot_base: 0,
            directional_slot: None,
            stats: FrameStats::default(),
        }
    }

    fn clear(&mut self) {
        self.published.clear();
        self.point_faces.clear();
        self.spot_matrices.clear();
        self.directional = DirectionalShadowFrame::disabled();
        self.atlas_regions.clear();
        self.spot_slot_base = 0;
        self.directional_slot = None;
        self.stats = FrameStats::default();
    }

    /// Atlas region of a spot slot.
    pub fn atlas_region(&self, slot: ShadowSlot) -> Option<ShadowAtlasRegion> {
        self.atlas_regions
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, region)| *region)
    }

    /// First array layer of `slot` inside its kind's resource set.
    ///
    /// Published slots shift with the number of lights shadowed each frame;
    /// layers are counted from the start of the kind's own range.
    pub fn layer(&self, kind: ShadowLightKind, slot: ShadowSlot) -> Option<u32> {
        match kind {
            ShadowLightKind::Point => ((slot.0 as usize) < self.point_faces.len())
                .then(|| slot.0 * kind.layers_per_light()),
            ShadowLightKind::Spot if !self.atlas_regions.is_empty() => {
                self.atlas_region(slot).map(|_| 0)
            }
            ShadowLightKind::Spot => {
                let local = slot.0.checked_sub(self.spot_slot_base)?;
                ((local as usize) < self.spot_matrices.len()).then_some(local)
            }
            ShadowLightKind::Directional => (self.directional_slot == Some(slot)).then_some(0),
        }
    }
}

/// Per-frame shadow orchestrator.
pub struct ShadowSystem<B: RenderBackend> {
    config: ShadowConfig,
    ranking: Box<dyn CandidateRanking>,
    cache: ShadowResourceCache<B::ResourceSet>,
    point_slots: SlotArena<usize>,
    spot_slots: SlotArena<usize>,
    atlas: Option<ShadowAtlas>,
    frame: FrameShadows,
    phase: FramePhase,
    frame_count: u64,
}

impl<B: RenderBackend> ShadowSystem<B> {
    /// Create the system and build the initial resource set for every kind.
    ///
    /// Only an invalid configuration fails. A kind whose resources cannot be
    /// built is disabled and the others keep working.
    pub fn new(config: ShadowConfig, backend: &mut B) -> ShadowResult<Self> {
        config.validate()?;

        let mut system = Self {
            ranking: config.ranking.ranking(),
            cache: ShadowResourceCache::new(),
            point_slots: SlotArena::new(ShadowLightKind::Point, 0, config.max_point_shadows),
            spot_slots: SlotArena::new(ShadowLightKind::Spot, 0, config.max_spot_shadows),
            atlas: config.spot_atlas.map(|atlas| ShadowAtlas::new(atlas.size)),
            frame: FrameShadows::new(config.max_lights),
            phase: FramePhase::Idle,
            frame_count: 0,
            config,
        };

        for kind in [
            ShadowLightKind::Point,
            ShadowLightKind::Spot,
            ShadowLightKind::Directional,
        ] {
            if system.layers(kind) == 0 {
                continue;
            }
            let resolution = system.texture_resolution(kind);
            if let Err(err) = system.build(backend, kind, resolution) {
                debug!(%kind, %err, "continuing without these shadows");
            }
        }

        Ok(system)
    }

    /// Array layers in the resource set of a kind.
    fn layers(&self, kind: ShadowLightKind) -> u32 {
        match kind {
            ShadowLightKind::Point => {
                self.config.max_point_shadows as u32 * kind.layers_per_light()
            }
            ShadowLightKind::Spot if self.atlas.is_some() => 1,
            ShadowLightKind::Spot => self.config.max_spot_shadows as u32,
            ShadowLightKind::Directional => match self.config.directional_mode {
                DirectionalShadowMode::Cascaded => self.config.cascade_count,
                DirectionalShadowMode::PerspectiveWarp => 1,
            },
        }
    }

    /// Texture size of the resource set of a kind.
    fn texture_resolution(&self, kind: ShadowLightKind) -> u32 {
        match kind {
            ShadowLightKind::Point => self.config.point_resolution,
            ShadowLightKind::Spot => match self.config.spot_atlas {
                Some(atlas) => atlas.size,
                None => self.config.spot_resolution,
            },
            ShadowLightKind::Directional => self.config.directional_resolution,
        }
    }

    fn build(
        &mut self,
        backend: &mut B,
        kind: ShadowLightKind,
        resolution: u32,
    ) -> ShadowResult<ResourceSetId> {
        let layers = self.layers(kind);
        let moments = self.config.variance_moments;
        self.cache
            .set_resolution(backend, kind, resolution, layers, moments)
    }

    /// Change the shadow map resolution of a light kind.
    ///
    /// Acts as a pipeline barrier: refused while the depth pass is running.
    /// With atlas packing, a spot resolution change only resizes the atlas
    /// regions; the atlas texture itself keeps its size.
    pub fn set_resolution(
        &mut self,
        backend: &mut B,
        kind: ShadowLightKind,
        resolution: u32,
    ) -> ShadowResult<ResourceSetId> {
        if self.phase == FramePhase::DepthPass {
            return Err(ShadowError::ResolutionChangeDuringDepthPass);
        }
        if resolution <= 2 * self.config.filter_texel_padding {
            return Err(ShadowError::InvalidConfig(format!(
                "{kind} resolution {resolution} must exceed twice the texel padding"
            )));
        }

        if kind == ShadowLightKind::Spot {
            if let Some(atlas) = self.config.spot_atlas {
                if resolution > atlas.size {
                    return Err(ShadowError::InvalidConfig(format!(
                        "spot atlas {} cannot hold one {resolution}px map",
                        atlas.size
                    )));
                }
                if self.cache.is_disabled(kind) {
                    return Err(ShadowError::ShadowsDisabled(kind));
                }
                let id = self
                    .cache
                    .active_id(kind)
                    .ok_or(ShadowError::ShadowsDisabled(kind))?;
                self.config.spot_resolution = resolution;
                return Ok(id);
            }
        }

        let id = self.build(backend, kind, resolution)?;
        match kind {
            ShadowLightKind::Point => self.config.point_resolution = resolution,
            ShadowLightKind::Spot => self.config.spot_resolution = resolution,
            ShadowLightKind::Directional => self.config.directional_resolution = resolution,
        }
        Ok(id)
    }

    /// Replace the over-capacity ranking strategy.
    pub fn set_ranking(&mut self, ranking: Box<dyn CandidateRanking>) {
        debug!(?ranking, "shadow ranking changed");
        self.ranking = ranking;
    }

    /// Compute and publish this frame's shadows.
    ///
    /// Without a scene view every light is written back with no slot and the
    /// directional shadow is disabled.
    pub fn prepare_frame(
        &mut self,
        backend: &mut B,
        lights: &mut LightRegistry,
        view: Option<&SceneView<'_>>,
    ) -> ShadowResult<&FrameShadows> {
        if self.phase == FramePhase::DepthPass {
            return Err(ShadowError::FramePhase {
                expected: FramePhase::Idle,
                actual: self.phase,
            });
        }

        self.clear_held_targets(backend, lights);
        self.frame.clear();
        self.point_slots.reset(0);
        self.spot_slots.reset(0);

        match view {
            Some(view) => {
                let frustum = Frustum::from_view_projection(view.viewer.view_projection_matrix());
                self.prepare_points(lights, &frustum, view);
                self.prepare_spots(lights, &frustum, view);
            }
            None => {
                reject_all(&mut lights.points);
                reject_all(&mut lights.spots);
            }
        }
        self.prepare_directional(lights, view);

        self.frame_count += 1;
        debug!(
            frame = self.frame_count,
            points = self.frame.stats.point_shadows,
            spots = self.frame.stats.spot_shadows,
            directional = self.frame.stats.directional,
            "shadow frame prepared"
        );

        backend.publish(&self.frame);
        self.phase = FramePhase::Prepared;
        Ok(&self.frame)
    }

    /// Clear the depth layers of every light that holds a slot from last frame.
    ///
    /// Runs before the arenas are reset, so held slots are mapped to layers
    /// with last frame's range bases.
    fn clear_held_targets(&self, backend: &mut B, lights: &LightRegistry) {
        let point_layers: Vec<u32> = lights
            .points
            .iter()
            .filter_map(|l| l.shadow_index)
            .filter_map(|slot| self.point_slots.local_index(slot))
            .flat_map(|local| {
                let per_light = ShadowLightKind::Point.layers_per_light();
                local * per_light..(local + 1) * per_light
            })
            .collect();

        let held_spots = lights
            .spots
            .iter()
            .filter_map(|l| l.shadow_index)
            .filter_map(|slot| self.spot_slots.local_index(slot));
        let spot_layers: Vec<u32> = if self.atlas.is_some() {
            // Atlas regions all live in layer 0.
            held_spots.take(1).map(|_| 0).collect()
        } else {
            held_spots.collect()
        };

        let directional_layers: Vec<u32> = match &lights.directional {
            Some(light) if light.shadow_index.is_some() => {
                (0..self.layers(ShadowLightKind::Directional)).collect()
            }
            _ => Vec::new(),
        };

        for (kind, layers) in [
            (ShadowLightKind::Point, point_layers),
            (ShadowLightKind::Spot, spot_layers),
            (ShadowLightKind::Directional, directional_layers),
        ] {
            if layers.is_empty() {
                continue;
            }
            if let Some(set) = self.cache.active(kind) {
                backend.clear_layers(set, &layers);
            }
        }
    }

    fn kind_available(&self, kind: ShadowLightKind) -> bool {
        !self.cache.is_disabled(kind) && self.cache.active(kind).is_some()
    }

    fn prepare_points(
        &mut self,
        lights: &mut LightRegistry,
        frustum: &Frustum,
        view: &SceneView<'_>,
    ) {
        if !self.kind_available(ShadowLightKind::Point) {
            reject_all(&mut lights.points);
            return;
        }

        let (kept, stats) = select_candidates(
            &mut lights.points,
            frustum,
            view.viewer,
            self.config.padding_scale,
            self.config.max_point_shadows,
            self.ranking.as_ref(),
        );
        self.frame.stats.point = stats;
        self.frame.stats.point_shadows =
            assign_slots(&mut lights.points, &kept, &mut self.point_slots);

        for (slot, &index) in self.point_slots.iter() {
            let faces = point_shadow(&lights.points[index], &self.config);
            let info = PublishedShadowInfo {
                view_projection: faces.view_projections[0],
                light_position: faces.position,
                near: faces.near,
                far: faces.far,
                bias: self.config.point_bias,
            };
            publish(&mut self.frame.published, ShadowLightKind::Point, slot, info);
            self.frame.point_faces.push((slot, faces));
        }
    }

    fn prepare_spots(
        &mut self,
        lights: &mut LightRegistry,
        frustum: &Frustum,
        view: &SceneView<'_>,
    ) {
        // The spot range starts right after this frame's point range.
        let base = self.point_slots.len() as u32;
        self.spot_slots.reset(base);
        self.frame.spot_slot_base = base;

        if !self.kind_available(ShadowLightKind::Spot) {
            reject_all(&mut lights.spots);
            return;
        }

        let (mut kept, stats) = select_candidates(
            &mut lights.spots,
            frustum,
            view.viewer,
            self.config.padding_scale,
            self.config.max_spot_shadows,
            self.ranking.as_ref(),
        );
        self.frame.stats.spot = stats;

        let regions = self.pack_spot_atlas(&mut kept, &mut lights.spots);
        self.frame.stats.spot_shadows =
            assign_slots(&mut lights.spots, &kept, &mut self.spot_slots);

        // Slots follow `kept` order, so regions line up with arena order.
        for (i, (slot, &index)) in self.spot_slots.iter().enumerate() {
            let matrices = spot_shadow(&lights.spots[index], &self.config);
            let info = PublishedShadowInfo {
                view_projection: matrices.view_projection,
                light_position: lights.spots[index].position,
                near: matrices.near,
                far: matrices.far,
                bias: self.config.spot_bias,
            };
            publish(&mut self.frame.published, ShadowLightKind::Spot, slot, info);
            self.frame.spot_matrices.push((slot, matrices));
            if let Some(region) = regions.get(i) {
                self.frame.atlas_regions.push((slot, *region));
            }
        }
    }

    /// Place every kept spot map in the atlas.
    ///
    /// When the atlas runs out of room, the lowest-priority candidate is
    /// dropped and packing starts over.
    fn pack_spot_atlas(
        &mut self,
        kept: &mut Vec<ShadowCandidate>,
        spots: &mut [SpotLight],
    ) -> Vec<ShadowAtlasRegion> {
        let Some(atlas) = self.atlas.as_mut() else {
            return Vec::new();
        };
        let size = self.config.spot_resolution;

        loop {
            atlas.reset();
            let packed: ShadowResult<Vec<_>> =
                kept.iter().map(|_| atlas.allocate(size, size)).collect();
            match packed {
                Ok(regions) => return regions,
                Err(err) => {
                    let Some(dropped) = kept.pop() else {
                        return Vec::new();
                    };
                    warn!(index = dropped.index, "{err}, dropping spot shadow");
                    if let Some(light) = spots.get_mut(dropped.index) {
                        light.set_shadow_index(None);
                    }
                    self.frame.stats.atlas_dropped += 1;
                }
            }
        }
    }

    fn prepare_directional(
        &mut self,
        lights: &mut LightRegistry,
        view: Option<&SceneView<'_>>,
    ) {
        let Some(light) = lights.directional.as_mut() else {
            return;
        };
        light.shadow_index = None;

        let Some(view) = view else {
            return;
        };
        if !light.cast_shadow || !self.kind_available(ShadowLightKind::Directional) {
            return;
        }

        let frame = match self.config.directional_mode {
            DirectionalShadowMode::Cascaded => build_cascades(light.direction, view, &self.config),
            DirectionalShadowMode::PerspectiveWarp => {
                build_warped(light.direction, view, &self.config)
            }
        };

        if frame.is_enabled() {
            let first = frame.cascades[0];
            let slot = ShadowSlot((self.point_slots.len() + self.spot_slots.len()) as u32);
            let info = PublishedShadowInfo {
                view_projection: first.view_projection,
                light_position: first.eye,
                near: frame.splits.first().copied().unwrap_or(first.split_near),
                far: frame.splits.last().copied().unwrap_or(first.split_far),
                bias: self.config.directional_bias,
            };
            if publish(&mut self.frame.published, ShadowLightKind::Directional, slot, info) {
                light.shadow_index = Some(slot);
                self.frame.directional_slot = Some(slot);
                self.frame.stats.directional = true;
            }
        }
        self.frame.directional = frame;
    }

    /// Mark the start of the shadow depth pass.
    pub fn begin_depth_pass(&mut self) -> ShadowResult<()> {
        if self.phase != FramePhase::Prepared {
            return Err(ShadowError::FramePhase {
                expected: FramePhase::Prepared,
                actual: self.phase,
            });
        }
        self.phase = FramePhase::DepthPass;
        Ok(())
    }

    /// Finish the frame; resolution changes are allowed again.
    pub fn end_frame(&mut self) {
        self.phase = FramePhase::Idle;
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn config(&self) -> &ShadowConfig {
        &self.config
    }

    /// Last prepared frame.
    pub fn frame(&self) -> &FrameShadows {
        &self.frame
    }

    pub fn cache(&self) -> &ShadowResourceCache<B::ResourceSet> {
        &self.cache
    }

    /// Active resource set of a kind, for binding by the backend.
    pub fn active_set(&self, kind: ShadowLightKind) -> Option<&B::ResourceSet> {
        self.cache.active(kind)
    }

    /// Frames prepared so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

fn publish(
    published: &mut PublishedShadows,
    kind: ShadowLightKind,
    slot: ShadowSlot,
    info: PublishedShadowInfo,
) -> bool {
    match published.insert(kind, slot, info) {
        Ok(()) => true,
        Err(err) => {
            warn!(slot = slot.0, "{err}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::testing::RecordingBackend;
    use crate::renderer::geometry::Aabb;
    use crate::renderer::light::{DirectionalLight, PointLight};
    use crate::renderer::shadow::SpotAtlasConfig;
    use crate::renderer::viewer::Camera;
    use glam::{Mat4, Vec3};

    fn camera() -> Camera {
        Camera::new_perspective(
            Vec3::new(0.0, 2.0, 10.0),
            Vec3::new(0.0, 0.0, -10.0),
            Vec3::Y,
            60.0,
            16.0 / 9.0,
            0.1,
            100.0,
        )
    }

    fn registry() -> LightRegistry {
        let mut lights = LightRegistry::new();
        lights.points = (0..3)
            .map(|i| PointLight::white(1.0, Vec3::new(i as f32 * 2.0, 1.0, -5.0), 8.0))
            .collect();
        lights.spots = (0..2)
            .map(|i| SpotLight::white(1.0, Vec3::new(i as f32, 4.0, -8.0), Vec3::NEG_Y, 10.0))
            .collect();
        lights.directional = Some(DirectionalLight::white(1.0, Vec3::new(-0.3, -1.0, -0.2)));
        lights
    }

    fn system(
        config: ShadowConfig,
        backend: &mut RecordingBackend,
    ) -> ShadowSystem<RecordingBackend> {
        ShadowSystem::new(config, backend).unwrap()
    }

    fn sorted_held(lights: &LightRegistry) -> Vec<ShadowSlot> {
        let mut held = lights.held_slots();
        held.sort();
        held
    }

    fn slot_range(n: u32) -> Vec<ShadowSlot> {
        (0..n).map(ShadowSlot).collect()
    }

    #[test]
    fn test_new_builds_initial_sets() {
        let mut backend = RecordingBackend::new();
        let system = system(ShadowConfig::default(), &mut backend);

        let kinds: Vec<_> = backend.builds.iter().map(|d| (d.kind, d.layers)).collect();
        assert_eq!(
            kinds,
            vec![
                (ShadowLightKind::Point, 16 * 6),
                (ShadowLightKind::Spot, 32),
                (ShadowLightKind::Directional, 4),
            ]
        );
        assert_eq!(system.phase(), FramePhase::Idle);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut backend = RecordingBackend::new();
        let config = ShadowConfig {
            max_point_shadows: 80,
            max_spot_shadows: 40,
            ..ShadowConfig::default()
        };
        assert!(ShadowSystem::new(config, &mut backend).is_err());
        assert!(backend.builds.is_empty());
    }

    #[test]
    fn test_slots_are_contiguous_and_unique() {
        let mut backend = RecordingBackend::new();
        let mut system = system(ShadowConfig::default(), &mut backend);
        let mut lights = registry();
        let camera = camera();
        let view = SceneView::new(&camera, None);

        let frame = system
            .prepare_frame(&mut backend, &mut lights, Some(&view))
            .unwrap();
        assert_eq!(frame.stats.point_shadows, 3);
        assert_eq!(frame.stats.spot_shadows, 2);
        assert!(frame.stats.directional);
        assert_eq!(frame.point_faces.len(), 3);
        assert_eq!(frame.spot_matrices.len(), 2);

        let points: Vec<_> = lights.points.iter().map(|l| l.shadow_index).collect();
        let spots: Vec<_> = lights.spots.iter().map(|l| l.shadow_index).collect();
        assert_eq!(
            points,
            vec![Some(ShadowSlot(0)), Some(ShadowSlot(1)), Some(ShadowSlot(2))]
        );
        assert_eq!(spots, vec![Some(ShadowSlot(3)), Some(ShadowSlot(4))]);
        assert_eq!(
            lights.directional.as_ref().and_then(|l| l.shadow_index),
            Some(ShadowSlot(5))
        );

        let published: Vec<_> = system
            .frame()
            .published
            .assigned()
            .map(|(slot, _)| slot)
            .collect();
        let held = sorted_held(&lights);
        assert_eq!(held, slot_range(6));
        assert_eq!(published, held);
        assert_eq!(backend.published.len(), 1);
    }

    #[test]
    fn test_spot_range_follows_kept_points() {
        let mut backend = RecordingBackend::new();
        let mut system = system(ShadowConfig::default(), &mut backend);
        let mut lights = registry();
        // Far behind the camera.
        lights.points[1].position = Vec3::new(0.0, 0.0, 500.0);
        let camera = camera();
        let view = SceneView::new(&camera, None);

        let frame = system
            .prepare_frame(&mut backend, &mut lights, Some(&view))
            .unwrap();
        assert_eq!(frame.stats.point.culled, 1);
        assert_eq!(frame.spot_slot_base, 2);
        assert_eq!(frame.directional_slot, Some(ShadowSlot(4)));
        assert_eq!(frame.layer(ShadowLightKind::Point, ShadowSlot(1)), Some(6));
        assert_eq!(frame.layer(ShadowLightKind::Spot, ShadowSlot(2)), Some(0));
        assert_eq!(frame.layer(ShadowLightKind::Spot, ShadowSlot(4)), None);

        let points: Vec<_> = lights.points.iter().map(|l| l.shadow_index).collect();
        assert_eq!(points, vec![Some(ShadowSlot(0)), None, Some(ShadowSlot(1))]);
        let spots: Vec<_> = lights.spots.iter().map(|l| l.shadow_index).collect();
        assert_eq!(spots, vec![Some(ShadowSlot(2)), Some(ShadowSlot(3))]);
        assert_eq!(sorted_held(&lights), slot_range(5));
    }

    #[test]
    fn test_point_info_is_world_to_clip() {
        let mut backend = RecordingBackend::new();
        let mut system = system(ShadowConfig::default(), &mut backend);
        let mut lights = registry();
        let camera = camera();
        let view = SceneView::new(&camera, None);

        let frame = system
            .prepare_frame(&mut backend, &mut lights, Some(&view))
            .unwrap();
        let (slot, faces) = frame.point_faces[0];
        let info = frame.published.get(slot).unwrap();
        assert_eq!(info.view_projection, faces.view_projections[0]);

        // A point on the +X axis of the light lands inside the +X face.
        let clip = info.view_projection * (faces.position + Vec3::X * 2.0).extend(1.0);
        assert!(clip.w > 0.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-3 && ndc.y.abs() < 1e-3);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn test_point_capacity_is_enforced() {
        let mut backend = RecordingBackend::new();
        let config = ShadowConfig {
            max_point_shadows: 2,
            ..ShadowConfig::default()
        };
        let mut system = system(config, &mut backend);
        let mut lights = registry();
        let camera = camera();
        let view = SceneView::new(&camera, None);

        let frame = system
            .prepare_frame(&mut backend, &mut lights, Some(&view))
            .unwrap();
        assert_eq!(frame.stats.point_shadows, 2);
        assert_eq!(frame.stats.point.over_capacity, 1);
        assert_eq!(lights.points[2].shadow_index, None);
        // Spot slots start right after the point range.
        assert_eq!(lights.spots[0].shadow_index, Some(ShadowSlot(2)));
        assert_eq!(
            lights.directional.as_ref().and_then(|l| l.shadow_index),
            Some(ShadowSlot(4))
        );
        assert_eq!(sorted_held(&lights), slot_range(5));
    }

    #[test]
    fn test_culled_point_light_is_not_published() {
        let mut backend = RecordingBackend::new();
        let mut system = system(ShadowConfig::default(), &mut backend);
        let mut lights = LightRegistry::new();
        lights.points.push(PointLight::white(1.0, Vec3::ZERO, 50.0));
        lights.points[0].shadow_index = Some(ShadowSlot(0));

        let camera = Camera::new_perspective(
            Vec3::new(0.0, 0.0, -200.0),
            Vec3::new(0.0, 0.0, -300.0),
            Vec3::Y,
            60.0,
            1.0,
            0.1,
            100.0,
        );
        let view = SceneView::new(&camera, None);
        let frame = system
            .prepare_frame(&mut backend, &mut lights, Some(&view))
            .unwrap();

        assert_eq!(lights.points[0].shadow_index, None);
        assert_eq!(ShadowSlot::gpu_index(lights.points[0].shadow_index), -1);
        assert_eq!(frame.published.assigned_count(), 0);
    }

    #[test]
    fn test_no_view_disables_everything() {
        let mut backend = RecordingBackend::new();
        let mut system = system(ShadowConfig::default(), &mut backend);
        let mut lights = registry();
        let camera = camera();
        let view = SceneView::new(&camera, None);
        system
            .prepare_frame(&mut backend, &mut lights, Some(&view))
            .unwrap();
        system.end_frame();

        let frame = system.prepare_frame(&mut backend, &mut lights, None).unwrap();
        assert_eq!(frame.published.assigned_count(), 0);
        assert!(!frame.directional.is_enabled());
        assert_eq!(frame.directional.cascades[0].projection, Mat4::ZERO);
        assert!(lights.held_slots().is_empty());
    }

    #[test]
    fn test_held_slots_are_cleared_next_frame() {
        let mut backend = RecordingBackend::new();
        let mut system = system(ShadowConfig::default(), &mut backend);
        let mut lights = registry();
        let camera = camera();
        let view = SceneView::new(&camera, None);

        system
            .prepare_frame(&mut backend, &mut lights, Some(&view))
            .unwrap();
        assert!(backend.cleared.is_empty());
        system.end_frame();

        system
            .prepare_frame(&mut backend, &mut lights, Some(&view))
            .unwrap();
        let cleared: Vec<_> = backend
            .cleared
            .iter()
            .map(|(set, layers)| (set.kind, layers.len()))
            .collect();
        assert_eq!(
            cleared,
            vec![
                (ShadowLightKind::Point, 18),
                (ShadowLightKind::Spot, 2),
                (ShadowLightKind::Directional, 4),
            ]
        );
        assert_eq!(backend.cleared[0].1, (0..18).collect::<Vec<u32>>());
        assert_eq!(backend.cleared[1].1, vec![0, 1]);
    }

    #[test]
    fn test_clear_uses_previous_frame_ranges() {
        let mut backend = RecordingBackend::new();
        let mut system = system(ShadowConfig::default(), &mut backend);
        let mut lights = registry();
        let camera = camera();
        let view = SceneView::new(&camera, None);

        system
            .prepare_frame(&mut backend, &mut lights, Some(&view))
            .unwrap();
        system.end_frame();
        assert_eq!(lights.spots[0].shadow_index, Some(ShadowSlot(3)));

        // Without point lights the spot range moves down to 0.
        lights.points.clear();
        system
            .prepare_frame(&mut backend, &mut lights, Some(&view))
            .unwrap();
        system.end_frame();
        assert_eq!(lights.spots[0].shadow_index, Some(ShadowSlot(0)));
        assert_eq!(sorted_held(&lights), slot_range(3));

        system
            .prepare_frame(&mut backend, &mut lights, Some(&view))
            .unwrap();
        let spot_clears: Vec<_> = backend
            .cleared
            .iter()
            .filter(|(set, _)| set.kind == ShadowLightKind::Spot)
            .map(|(_, layers)| layers.clone())
            .collect();
        // Slots 3, 4 then 0, 1 are the same two layers.
        assert_eq!(spot_clears, vec![vec![0, 1], vec![0, 1]]);
    }

    #[test]
    fn test_frame_phase_barrier() {
        let mut backend = RecordingBackend::new();
        let mut system = system(ShadowConfig::default(), &mut backend);
        let mut lights = registry();
        let camera = camera();
        let view = SceneView::new(&camera, None);

        assert!(matches!(
            system.begin_depth_pass(),
            Err(ShadowError::FramePhase {
                expected: FramePhase::Prepared,
                actual: FramePhase::Idle
            })
        ));

        system
            .prepare_frame(&mut backend, &mut lights, Some(&view))
            .unwrap();
        system.begin_depth_pass().unwrap();
        assert!(matches!(
            system.set_resolution(&mut backend, ShadowLightKind::Spot, 512),
            Err(ShadowError::ResolutionChangeDuringDepthPass)
        ));
        assert!(system
            .prepare_frame(&mut backend, &mut lights, Some(&view))
            .is_err());

        system.end_frame();
        assert!(system
            .set_resolution(&mut backend, ShadowLightKind::Spot, 512)
            .is_ok());
        assert_eq!(system.config().spot_resolution, 512);
    }

    #[test]
    fn test_set_resolution_reuses_cache() {
        let mut backend = RecordingBackend::new();
        let mut system = system(ShadowConfig::default(), &mut backend);
        let initial = backend.builds.len();

        let original = system.cache().active_id(ShadowLightKind::Point).unwrap();
        let high = system
            .set_resolution(&mut backend, ShadowLightKind::Point, 1024)
            .unwrap();
        let back = system
            .set_resolution(&mut backend, ShadowLightKind::Point, 512)
            .unwrap();

        assert_ne!(original, high);
        assert_eq!(original, back);
        assert_eq!(backend.builds.len(), initial + 1);
    }

    #[test]
    fn test_failed_kind_does_not_affect_others() {
        let mut backend = RecordingBackend::failing(ShadowLightKind::Spot);
        let mut system = system(ShadowConfig::default(), &mut backend);
        let mut lights = registry();
        lights.spots[0].shadow_index = Some(ShadowSlot(3));
        let camera = camera();
        let view = SceneView::new(&camera, None);

        let frame = system
            .prepare_frame(&mut backend, &mut lights, Some(&view))
            .unwrap();
        assert_eq!(frame.stats.spot_shadows, 0);
        assert_eq!(frame.stats.point_shadows, 3);
        assert!(lights.spots.iter().all(|l| l.shadow_index.is_none()));
        assert_eq!(frame.directional_slot, Some(ShadowSlot(3)));
        assert!(matches!(
            system.set_resolution(&mut backend, ShadowLightKind::Spot, 512),
            Err(ShadowError::ShadowsDisabled(ShadowLightKind::Spot))
        ));
    }

    #[test]
    fn test_atlas_drops_lowest_priority_spot() {
        let mut backend = RecordingBackend::new();
        let config = ShadowConfig {
            spot_resolution: 512,
            spot_atlas: Some(SpotAtlasConfig { size: 1024 }),
            ..ShadowConfig::default()
        };
        let mut system = system(config, &mut backend);
        let mut lights = LightRegistry::new();
        lights.spots = (0..5)
            .map(|i| SpotLight::white(1.0, Vec3::new(i as f32, 3.0, -6.0), Vec3::NEG_Y, 10.0))
            .collect();
        let camera = camera();
        let bounds = Aabb::new(Vec3::splat(-20.0), Vec3::splat(20.0));
        let view = SceneView::new(&camera, Some(bounds));

        let frame = system
            .prepare_frame(&mut backend, &mut lights, Some(&view))
            .unwrap();

        assert_eq!(frame.stats.spot_shadows, 4);
        assert_eq!(frame.stats.atlas_dropped, 1);
        assert_eq!(frame.atlas_regions.len(), 4);
        assert_eq!(lights.spots[4].shadow_index, None);
        for pair in frame.atlas_regions.windows(2) {
            assert!(!pair[0].1.intersects(&pair[1].1));
        }
        assert_eq!(
            frame.atlas_region(ShadowSlot(0)),
            Some(ShadowAtlasRegion::new(0, 0, 512, 512))
        );
        assert_eq!(frame.layer(ShadowLightKind::Spot, ShadowSlot(3)), Some(0));
        assert_eq!(frame.layer(ShadowLightKind::Spot, ShadowSlot(4)), None);
    }

    #[test]
    fn test_warp_mode_publishes_single_map() {
        let mut backend = RecordingBackend::new();
        let config = ShadowConfig {
            directional_mode: DirectionalShadowMode::PerspectiveWarp,
            ..ShadowConfig::default()
        };
        let mut system = system(config, &mut backend);
        let mut lights = registry();
        let camera = camera();
        let view = SceneView::new(&camera, None);

        let frame = system
            .prepare_frame(&mut backend, &mut lights, Some(&view))
            .unwrap();
        assert!(frame.directional.warped);
        assert_eq!(frame.directional.cascades.len(), 1);
        assert!(frame.stats.directional);
    }
}
