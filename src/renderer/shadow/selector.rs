//! Light candidate selection
//!
//! Culls point and spot lights against the view frustum using a shrunken
//! bounding sphere, ranks the survivors, and writes contiguous shadow slots
//! back to the kept lights. Every other light is written back with no slot.

use tracing::{trace, warn};

use crate::renderer::culling::Frustum;
use crate::renderer::light::ShadowCaster;
use crate::renderer::viewer::Viewer;

use super::ranking::{light_weight, screen_space_radius, CandidateRanking};
use super::slots::SlotArena;

/// A light that passed culling, identified by its registry index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowCandidate {
    /// Index into the registry's list for this light kind.
    pub index: usize,
    /// Ranking weight.
    pub weight: f32,
}

/// Per-frame selection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionStats {
    /// Lights with shadows enabled that were tested.
    pub considered: usize,
    /// Lights whose padded sphere was outside the frustum.
    pub culled: usize,
    /// Lights that passed culling but lost to the ranking policy.
    pub over_capacity: usize,
}

impl SelectionStats {
    pub fn merge(&mut self, other: SelectionStats) {
        self.considered += other.considered;
        self.culled += other.culled;
        self.over_capacity += other.over_capacity;
    }
}

/// Cull and rank one light list.
///
/// Returns the kept candidates highest priority first. Every light that is
/// not kept has its shadow index cleared; kept lights are untouched until
/// [`assign_slots`].
pub fn select_candidates<L: ShadowCaster>(
    lights: &mut [L],
    frustum: &Frustum,
    viewer: &dyn Viewer,
    padding_scale: f32,
    capacity: usize,
    ranking: &dyn CandidateRanking,
) -> (Vec<ShadowCandidate>, SelectionStats) {
    let mut stats = SelectionStats::default();
    let mut candidates = Vec::new();
    let eye = viewer.position();
    let projection = viewer.projection_matrix();

    for (index, light) in lights.iter_mut().enumerate() {
        if !light.casts_shadow() {
            light.set_shadow_index(None);
            continue;
        }
        stats.considered += 1;

        let center = light.position();
        let radius = light.attenuation_radius().max(0.0) * padding_scale;
        if !frustum.reaches_sphere(center, radius) {
            trace!(kind = %light.kind(), index, "shadow candidate culled");
            stats.culled += 1;
            light.set_shadow_index(None);
            continue;
        }

        let screen_radius = screen_space_radius(center, radius, eye, projection);
        let weight = light_weight(
            light.color_intensity(),
            screen_radius,
            light.falloff_exponent(),
        );
        candidates.push(ShadowCandidate { index, weight });
    }

    let passed = candidates.len();
    ranking.rank(&mut candidates, capacity);
    stats.over_capacity = passed - candidates.len();

    if stats.over_capacity > 0 {
        let mut kept = vec![false; lights.len()];
        for candidate in &candidates {
            kept[candidate.index] = true;
        }
        for (light, _) in lights.iter_mut().zip(&kept).filter(|(_, kept)| !**kept) {
            light.set_shadow_index(None);
        }
    }

    (candidates, stats)
}

/// Give each kept candidate the next slot of `arena`, in priority order.
///
/// Returns how many lights received a slot. A candidate that does not fit is
/// written back with no slot.
pub fn assign_slots<L: ShadowCaster>(
    lights: &mut [L],
    kept: &[ShadowCandidate],
    arena: &mut SlotArena<usize>,
) -> usize {
    let mut assigned = 0;
    for candidate in kept {
        let Some(light) = lights.get_mut(candidate.index) else {
            continue;
        };
        match arena.try_insert(candidate.index) {
            Ok(slot) => {
                light.set_shadow_index(Some(slot));
                assigned += 1;
            }
            Err(err) => {
                warn!(index = candidate.index, "{err}");
                light.set_shadow_index(None);
            }
        }
    }
    assigned
}

/// Clear the shadow index of every light in the list.
pub fn reject_all<L: ShadowCaster>(lights: &mut [L]) {
    for light in lights {
        light.set_shadow_index(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::ShadowLightKind;
    use crate::renderer::light::{PointLight, SpotLight};
    use crate::renderer::shadow::ranking::RankingPolicy;
    use crate::renderer::shadow::ShadowSlot;
    use crate::renderer::viewer::Camera;
    use glam::Vec3;

    fn camera() -> Camera {
        Camera::new_perspective(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y, 60.0, 1.0, 0.1, 100.0)
    }

    fn frustum(camera: &Camera) -> Frustum {
        Frustum::from_view_projection(camera.view_projection_matrix())
    }

    #[test]
    fn test_light_outside_frustum_gets_no_slot() {
        // Camera at z=200 looking further down -Z; the origin is behind it.
        let camera = Camera::new_perspective(
            Vec3::new(0.0, 0.0, -200.0),
            Vec3::new(0.0, 0.0, -300.0),
            Vec3::Y,
            60.0,
            1.0,
            0.1,
            100.0,
        );
        let mut lights = vec![PointLight::white(1.0, Vec3::ZERO, 50.0)];
        lights[0].shadow_index = Some(ShadowSlot(3));

        let (kept, stats) = select_candidates(
            &mut lights,
            &frustum(&camera),
            &camera,
            0.8,
            4,
            &RankingPolicy::ListOrder,
        );

        assert!(kept.is_empty());
        assert_eq!(stats.culled, 1);
        assert_eq!(lights[0].shadow_index, None);
    }

    #[test]
    fn test_light_at_eye_is_never_culled() {
        let directions = [Vec3::NEG_Z, Vec3::X, Vec3::new(0.3, -0.9, 0.1), Vec3::Z];
        for dir in directions {
            let camera = Camera::new_perspective(
                Vec3::new(4.0, 1.0, 2.0),
                Vec3::new(4.0, 1.0, 2.0) + dir,
                Vec3::Y,
                45.0,
                1.7,
                0.5,
                80.0,
            );
            let mut lights = vec![PointLight::white(1.0, camera.position, 0.01)];
            let (kept, _) = select_candidates(
                &mut lights,
                &frustum(&camera),
                &camera,
                0.8,
                1,
                &RankingPolicy::ListOrder,
            );
            assert_eq!(kept.len(), 1, "culled when looking along {dir:?}");
        }
    }

    #[test]
    fn test_disabled_lights_are_skipped() {
        let camera = camera();
        let mut lights = vec![SpotLight::default(), SpotLight::default()];
        lights[0].position = Vec3::new(0.0, 0.0, -10.0);
        lights[0].cast_shadow = false;
        lights[0].shadow_index = Some(ShadowSlot(0));
        lights[1].position = Vec3::new(0.0, 0.0, -10.0);

        let (kept, stats) = select_candidates(
            &mut lights,
            &frustum(&camera),
            &camera,
            0.8,
            4,
            &RankingPolicy::ListOrder,
        );

        assert_eq!(stats.considered, 1);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].index, 1);
        assert_eq!(lights[0].shadow_index, None);
    }

    #[test]
    fn test_over_capacity_uses_ranking() {
        let camera = camera();
        let mut lights: Vec<PointLight> = (0..4)
            .map(|i| PointLight::white(1.0 + i as f32, Vec3::new(0.0, 0.0, -20.0), 5.0))
            .collect();
        for light in &mut lights {
            light.shadow_index = Some(ShadowSlot(9));
        }

        let (kept, stats) = select_candidates(
            &mut lights,
            &frustum(&camera),
            &camera,
            0.8,
            2,
            &RankingPolicy::Weighted,
        );

        assert_eq!(stats.over_capacity, 2);
        assert_eq!(kept.iter().map(|c| c.index).collect::<Vec<_>>(), vec![3, 2]);
        assert_eq!(lights[0].shadow_index, None);
        assert_eq!(lights[1].shadow_index, None);
    }

    #[test]
    fn test_assign_slots_is_contiguous() {
        let camera = camera();
        let mut lights: Vec<SpotLight> = (0..3)
            .map(|i| {
                SpotLight::white(1.0, Vec3::new(i as f32, 0.0, -10.0), Vec3::NEG_Z, 5.0)
            })
            .collect();
        let (kept, _) = select_candidates(
            &mut lights,
            &frustum(&camera),
            &camera,
            0.8,
            8,
            &RankingPolicy::ListOrder,
        );

        let mut arena = SlotArena::new(ShadowLightKind::Spot, 16, 8);
        assert_eq!(assign_slots(&mut lights, &kept, &mut arena), 3);
        let slots: Vec<_> = lights.iter().map(|l| l.shadow_index).collect();
        assert_eq!(
            slots,
            vec![Some(ShadowSlot(16)), Some(ShadowSlot(17)), Some(ShadowSlot(18))]
        );
    }
}
