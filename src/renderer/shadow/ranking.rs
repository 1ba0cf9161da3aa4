//! Candidate ranking policies
//!
//! When more lights pass culling than a kind has shadow slots, a ranking
//! policy decides which ones keep their shadow.

use std::fmt;

use glam::{Mat4, Vec3};

use super::selector::ShadowCandidate;

/// Largest screen-space radius a light is credited with (NDC units).
pub const MAX_SCREEN_RADIUS: f32 = 1.0;

const MIN_FALLOFF_EXPONENT: f32 = 1e-3;

/// Orders candidates by keep priority and truncates them to capacity.
pub trait CandidateRanking: fmt::Debug {
    /// Reorder `candidates` highest priority first, keeping at most `capacity`.
    fn rank(&self, candidates: &mut Vec<ShadowCandidate>, capacity: usize);
}

/// First candidates in registry order win.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOrderRanking;

impl CandidateRanking for ListOrderRanking {
    fn rank(&self, candidates: &mut Vec<ShadowCandidate>, capacity: usize) {
        candidates.sort_by_key(|c| c.index);
        candidates.truncate(capacity);
    }
}

/// Highest `color_intensity * screen_radius / falloff_exponent` wins.
///
/// Ties keep registry order.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedRanking;

impl CandidateRanking for WeightedRanking {
    fn rank(&self, candidates: &mut Vec<ShadowCandidate>, capacity: usize) {
        candidates.sort_by(|a, b| b.weight.total_cmp(&a.weight).then(a.index.cmp(&b.index)));
        candidates.truncate(capacity);
    }
}

/// Built-in ranking policies, selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RankingPolicy {
    /// [`ListOrderRanking`].
    #[default]
    ListOrder,
    /// [`WeightedRanking`].
    Weighted,
}

impl RankingPolicy {
    /// Strategy object for this policy.
    pub fn ranking(self) -> Box<dyn CandidateRanking> {
        match self {
            RankingPolicy::ListOrder => Box::new(ListOrderRanking),
            RankingPolicy::Weighted => Box::new(WeightedRanking),
        }
    }
}

impl CandidateRanking for RankingPolicy {
    fn rank(&self, candidates: &mut Vec<ShadowCandidate>, capacity: usize) {
        match self {
            RankingPolicy::ListOrder => ListOrderRanking.rank(candidates, capacity),
            RankingPolicy::Weighted => WeightedRanking.rank(candidates, capacity),
        }
    }
}

/// Projected radius of a sphere in NDC units, capped at [`MAX_SCREEN_RADIUS`].
pub fn screen_space_radius(center: Vec3, radius: f32, eye: Vec3, projection: Mat4) -> f32 {
    let scale = projection.y_axis.y.abs();

    // Orthographic projections keep w = 1.
    if projection.w_axis.w != 0.0 {
        return (radius * scale).min(MAX_SCREEN_RADIUS);
    }

    let distance_sq = center.distance_squared(eye);
    let radius_sq = radius * radius;
    if distance_sq <= radius_sq {
        return MAX_SCREEN_RADIUS;
    }
    (scale * radius / (distance_sq - radius_sq).sqrt()).min(MAX_SCREEN_RADIUS)
}

/// Ranking weight for a light.
pub fn light_weight(color_intensity: f32, screen_radius: f32, falloff_exponent: f32) -> f32 {
    color_intensity * screen_radius / falloff_exponent.max(MIN_FALLOFF_EXPONENT)
}
