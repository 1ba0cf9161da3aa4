//! Shadow atlas allocator
//!
//! Guillotine bin packing of shadow map regions into one fixed-size texture.
//! The free list always partitions the unallocated area; adjacent free
//! rectangles are never merged, so fragmentation only resets with
//! [`ShadowAtlas::reset`].

use glam::Vec4;
use tracing::trace;

use crate::error::{ShadowError, ShadowResult};

/// A placed region inside the atlas, in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShadowAtlasRegion {
    pub offset_x: u32,
    pub offset_y: u32,
    pub size_x: u32,
    pub size_y: u32,
}

impl ShadowAtlasRegion {
    pub fn new(offset_x: u32, offset_y: u32, size_x: u32, size_y: u32) -> Self {
        Self {
            offset_x,
            offset_y,
            size_x,
            size_y,
        }
    }

    pub fn area(&self) -> u64 {
        self.size_x as u64 * self.size_y as u64
    }

    fn is_degenerate(&self) -> bool {
        self.size_x == 0 || self.size_y == 0
    }

    /// Whether the two regions share any texel.
    pub fn intersects(&self, other: &ShadowAtlasRegion) -> bool {
        self.offset_x < other.offset_x + other.size_x
            && other.offset_x < self.offset_x + self.size_x
            && self.offset_y < other.offset_y + other.size_y
            && other.offset_y < self.offset_y + self.size_y
    }

    /// Normalized `(u, v, width, height)` of this region in an atlas of the given size.
    pub fn uv_rect(&self, atlas_width: u32, atlas_height: u32) -> Vec4 {
        let w = atlas_width as f32;
        let h = atlas_height as f32;
        Vec4::new(
            self.offset_x as f32 / w,
            self.offset_y as f32 / h,
            self.size_x as f32 / w,
            self.size_y as f32 / h,
        )
    }

    /// `1 - min/max` of the sides; 0 for squares and for empty leftovers.
    fn badness(&self) -> f32 {
        if self.is_degenerate() {
            return 0.0;
        }
        let min = self.size_x.min(self.size_y) as f32;
        let max = self.size_x.max(self.size_y) as f32;
        1.0 - min / max
    }
}

/// The two leftover rectangles of placing `width x height` at the corner of `free`.
fn split(free: &ShadowAtlasRegion, width: u32, height: u32) -> [ShadowAtlasRegion; 2] {
    let horizontal = [
        ShadowAtlasRegion::new(free.offset_x + width, free.offset_y, free.size_x - width, height),
        ShadowAtlasRegion::new(
            free.offset_x,
            free.offset_y + height,
            free.size_x,
            free.size_y - height,
        ),
    ];
    let vertical = [
        ShadowAtlasRegion::new(
            free.offset_x,
            free.offset_y + height,
            width,
            free.size_y - height,
        ),
        ShadowAtlasRegion::new(
            free.offset_x + width,
            free.offset_y,
            free.size_x - width,
            free.size_y,
        ),
    ];

    if max_badness(&vertical) < max_badness(&horizontal) {
        vertical
    } else {
        horizontal
    }
}

fn max_badness(pair: &[ShadowAtlasRegion; 2]) -> f32 {
    pair[0].badness().max(pair[1].badness())
}

/// Fixed-size shadow atlas with a guillotine free list.
#[derive(Debug, Clone)]
pub struct ShadowAtlas {
    width: u32,
    height: u32,
    free: Vec<ShadowAtlasRegion>,
    allocated: Vec<ShadowAtlasRegion>,
}

impl ShadowAtlas {
    /// Create an empty square atlas.
    pub fn new(size: u32) -> Self {
        Self::with_size(size, size)
    }

    /// Create an empty atlas.
    pub fn with_size(width: u32, height: u32) -> Self {
        let mut atlas = Self {
            width,
            height,
            free: Vec::new(),
            allocated: Vec::new(),
        };
        atlas.reset();
        atlas
    }

    /// Release every region.
    pub fn reset(&mut self) {
        self.free.clear();
        self.allocated.clear();
        let whole = ShadowAtlasRegion::new(0, 0, self.width, self.height);
        if !whole.is_degenerate() {
            self.free.push(whole);
        }
    }

    /// Place a `width x height` region.
    ///
    /// Picks the free rectangle with the least leftover area, preferring the
    /// one whose split leaves the squarest pieces, then the earliest in the
    /// free list.
    pub fn allocate(&mut self, width: u32, height: u32) -> ShadowResult<ShadowAtlasRegion> {
        if width == 0 || height == 0 {
            return Err(ShadowError::AtlasAllocationFailed { width, height });
        }

        let mut best: Option<(usize, u64, f32, [ShadowAtlasRegion; 2])> = None;
        for (index, free) in self.free.iter().enumerate() {
            if free.size_x < width || free.size_y < height {
                continue;
            }
            let leftover = width as u64 * (free.size_y - height) as u64
                + height as u64 * (free.size_x - width) as u64;
            let pieces = split(free, width, height);
            let badness = max_badness(&pieces);

            let better = match &best {
                None => true,
                Some((_, best_leftover, best_badness, _)) => {
                    leftover < *best_leftover
                        || (leftover == *best_leftover && badness < *best_badness)
                }
            };
            if better {
                best = Some((index, leftover, badness, pieces));
            }
        }

        let Some((index, _, _, pieces)) = best else {
            return Err(ShadowError::AtlasAllocationFailed { width, height });
        };

        let free = self.free.remove(index);
        let region = ShadowAtlasRegion::new(free.offset_x, free.offset_y, width, height);
        self.free
            .extend(pieces.into_iter().filter(|piece| !piece.is_degenerate()));
        self.allocated.push(region);

        trace!(?region, free_rects = self.free.len(), "atlas region allocated");
        Ok(region)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Regions handed out since the last reset, in allocation order.
    pub fn allocated(&self) -> &[ShadowAtlasRegion] {
        &self.allocated
    }

    /// Current free list.
    pub fn free_rects(&self) -> &[ShadowAtlasRegion] {
        &self.free
    }

    /// Total free area in texels.
    pub fn free_area(&self) -> u64 {
        self.free.iter().map(ShadowAtlasRegion::area).sum()
    }
}
