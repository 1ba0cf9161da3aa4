//! Shadow slots
//!
//! Slots index the fixed-capacity published array. Every frame they are
//! handed out in contiguous per-kind ranges: `[0, P)` point, `[P, P + S)`
//! spot, then the directional slot at `P + S`, where `P` and `S` are the
//! number of point and spot lights shadowed that frame.

use crate::core::backend::ShadowLightKind;
use crate::error::{ShadowError, ShadowResult};

use super::{PublishedShadowInfo, ShadowInfoUniform};

/// Index into the published shadow array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShadowSlot(pub u32);

impl ShadowSlot {
    /// GPU-side value for "no shadow".
    pub const NONE_INDEX: i32 = -1;

    /// Slot as an array index.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Signed shader index for an optional slot, `-1` when absent.
    pub fn gpu_index(slot: Option<ShadowSlot>) -> i32 {
        slot.map_or(Self::NONE_INDEX, |s| s.0 as i32)
    }
}

/// Bounded arena handing out contiguous slots for one light kind.
///
/// Inserting past capacity fails instead of aliasing another kind's slots.
#[derive(Debug, Clone)]
pub struct SlotArena<T> {
    kind: ShadowLightKind,
    base: u32,
    capacity: usize,
    entries: Vec<T>,
}

impl<T> SlotArena<T> {
    /// Create an arena whose first slot is `base`.
    pub fn new(kind: ShadowLightKind, base: u32, capacity: usize) -> Self {
        Self {
            kind,
            base,
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Insert a value and return its slot.
    pub fn try_insert(&mut self, value: T) -> ShadowResult<ShadowSlot> {
        if self.entries.len() >= self.capacity {
            return Err(ShadowError::SlotCapacityExceeded {
                kind: self.kind,
                capacity: self.capacity,
            });
        }
        let slot = ShadowSlot(self.base + self.entries.len() as u32);
        self.entries.push(value);
        Ok(slot)
    }

    /// Look up the value stored for `slot`.
    pub fn get(&self, slot: ShadowSlot) -> Option<&T> {
        let local = slot.0.checked_sub(self.base)? as usize;
        self.entries.get(local)
    }

    /// Position of `slot` among the slots handed out since the last reset.
    ///
    /// This is the light's index inside its kind's resource set, independent
    /// of where the kind's range starts in the published array.
    pub fn local_index(&self, slot: ShadowSlot) -> Option<u32> {
        let local = slot.0.checked_sub(self.base)?;
        ((local as usize) < self.entries.len()).then_some(local)
    }

    /// Iterate over occupied slots in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ShadowSlot, &T)> {
        self.entries
            .iter()
            .enumerate()
            .map(move |(i, v)| (ShadowSlot(self.base + i as u32), v))
    }

    pub fn kind(&self) -> ShadowLightKind {
        self.kind
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Empty the arena and start handing out slots from `base`.
    pub fn reset(&mut self, base: u32) {
        self.entries.clear();
        self.base = base;
    }
}

/// Fixed-capacity published shadow array, rebuilt every frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedShadows {
    infos: Vec<Option<PublishedShadowInfo>>,
    uniforms: Vec<ShadowInfoUniform>,
}

impl PublishedShadows {
    /// Create an empty array with `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            infos: vec![None; capacity],
            uniforms: vec![bytemuck::Zeroable::zeroed(); capacity],
        }
    }

    /// Store the info for `slot`.
    pub fn insert(
        &mut self,
        kind: ShadowLightKind,
        slot: ShadowSlot,
        info: PublishedShadowInfo,
    ) -> ShadowResult<()> {
        let capacity = self.infos.len();
        let (Some(entry), Some(uniform)) = (
            self.infos.get_mut(slot.index()),
            self.uniforms.get_mut(slot.index()),
        ) else {
            return Err(ShadowError::SlotCapacityExceeded { kind, capacity });
        };
        *uniform = info.uniform();
        *entry = Some(info);
        Ok(())
    }

    /// Info published for `slot`, if any.
    pub fn get(&self, slot: ShadowSlot) -> Option<&PublishedShadowInfo> {
        self.infos.get(slot.index())?.as_ref()
    }

    /// Iterate over assigned slots in slot order.
    pub fn assigned(&self) -> impl Iterator<Item = (ShadowSlot, &PublishedShadowInfo)> {
        self.infos
            .iter()
            .enumerate()
            .filter_map(|(i, info)| info.as_ref().map(|info| (ShadowSlot(i as u32), info)))
    }

    /// Number of assigned slots.
    pub fn assigned_count(&self) -> usize {
        self.infos.iter().filter(|info| info.is_some()).count()
    }

    pub fn capacity(&self) -> usize {
        self.infos.len()
    }

    /// Reset every slot to empty.
    pub fn clear(&mut self) {
        self.infos.fill(None);
        self.uniforms.fill(bytemuck::Zeroable::zeroed());
    }

    /// GPU uniforms for the whole array, empty slots zeroed.
    pub fn uniforms(&self) -> &[ShadowInfoUniform] {
        &self.uniforms
    }

    /// Raw bytes of [`PublishedShadows::uniforms`] for upload.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.uniforms)
    }
}
