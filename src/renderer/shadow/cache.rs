//! Resolution-keyed shadow resource cache
//!
//! Point and spot shadow resources are built lazily per resolution and kept
//! for the rest of the session, so switching back to a resolution that was
//! used before costs nothing. The directional set is a single resource that
//! is rebuilt in place.

use std::collections::{btree_map::Entry, BTreeMap};

use tracing::{debug, error, info};

use crate::core::backend::{
    RenderBackend, ResourceSetDescriptor, ResourceSetId, ShadowLightKind,
};
use crate::error::{ShadowError, ShadowResult};

struct CachedSet<R> {
    id: ResourceSetId,
    set: R,
}

struct KindCache<R> {
    sets: BTreeMap<u32, CachedSet<R>>,
    active: Option<u32>,
    disabled: bool,
}

impl<R> KindCache<R> {
    fn new() -> Self {
        Self {
            sets: BTreeMap::new(),
            active: None,
            disabled: false,
        }
    }
}

/// Per-kind resource sets keyed by resolution.
///
/// Only the cache mutates its map; callers get read access to the active set.
pub struct ShadowResourceCache<R> {
    point: KindCache<R>,
    spot: KindCache<R>,
    directional: Option<CachedSet<R>>,
    directional_resolution: Option<u32>,
    directional_disabled: bool,
    next_id: u64,
    builds: usize,
}

impl<R> Default for ShadowResourceCache<R> {
    fn default() -> Self {
        Self {
            point: KindCache::new(),
            spot: KindCache::new(),
            directional: None,
            directional_resolution: None,
            directional_disabled: false,
            next_id: 0,
            builds: 0,
        }
    }
}

impl<R> ShadowResourceCache<R> {
    pub fn new() -> Self {
        Self::default()
    }

    fn kind_cache(&self, kind: ShadowLightKind) -> Option<&KindCache<R>> {
        match kind {
            ShadowLightKind::Point => Some(&self.point),
            ShadowLightKind::Spot => Some(&self.spot),
            ShadowLightKind::Directional => None,
        }
    }

    fn next_id(&mut self) -> ResourceSetId {
        let id = ResourceSetId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Make `resolution` the active resolution for a point or spot kind.
    ///
    /// A no-op when it is already active. Otherwise the cached set is reused,
    /// or built through the backend the first time that resolution is seen.
    /// A failed build disables the kind for the rest of the session.
    pub fn set_resolution<B>(
        &mut self,
        backend: &mut B,
        kind: ShadowLightKind,
        resolution: u32,
        layers: u32,
        variance_moments: bool,
    ) -> ShadowResult<ResourceSetId>
    where
        B: RenderBackend<ResourceSet = R>,
    {
        if kind == ShadowLightKind::Directional {
            return self.set_directional_resolution(backend, resolution, layers, variance_moments);
        }

        let next_id = ResourceSetId(self.next_id);
        let cache = match kind {
            ShadowLightKind::Point => &mut self.point,
            _ => &mut self.spot,
        };
        if cache.disabled {
            return Err(ShadowError::ShadowsDisabled(kind));
        }

        if cache.active == Some(resolution) {
            if let Some(cached) = cache.sets.get(&resolution) {
                return Ok(cached.id);
            }
        }

        let (id, built) = match cache.sets.entry(resolution) {
            Entry::Occupied(entry) => {
                debug!(%kind, resolution, "reusing cached shadow resources");
                (entry.get().id, false)
            }
            Entry::Vacant(entry) => {
                let desc = ResourceSetDescriptor {
                    kind,
                    resolution,
                    layers,
                    variance_moments,
                };
                match backend.build_resource_set(&desc) {
                    Ok(set) => {
                        entry.insert(CachedSet { id: next_id, set });
                        (next_id, true)
                    }
                    Err(source) => {
                        cache.disabled = true;
                        cache.active = None;
                        let err = ShadowError::ShadowResourceInit {
                            kind,
                            resolution,
                            source,
                        };
                        error!("{err}, {kind} shadows disabled");
                        return Err(err);
                    }
                }
            }
        };
        cache.active = Some(resolution);

        if built {
            self.next_id += 1;
            self.builds += 1;
            info!(%kind, resolution, layers, id = id.0, "shadow resources built");
        }
        Ok(id)
    }

    /// Rebuild the single directional resource set at a new resolution.
    ///
    /// The previous set is dropped, so the caller must have unbound it first.
    pub fn set_directional_resolution<B>(
        &mut self,
        backend: &mut B,
        resolution: u32,
        layers: u32,
        variance_moments: bool,
    ) -> ShadowResult<ResourceSetId>
    where
        B: RenderBackend<ResourceSet = R>,
    {
        let kind = ShadowLightKind::Directional;
        if self.directional_disabled {
            return Err(ShadowError::ShadowsDisabled(kind));
        }
        if self.directional_resolution == Some(resolution) {
            if let Some(current) = &self.directional {
                return Ok(current.id);
            }
        }

        let desc = ResourceSetDescriptor {
            kind,
            resolution,
            layers,
            variance_moments,
        };
        // Release the outgoing set before building its replacement.
        self.directional = None;
        self.directional_resolution = None;
        match backend.build_resource_set(&desc) {
            Ok(set) => {
                let id = self.next_id();
                self.builds += 1;
                self.directional = Some(CachedSet { id, set });
                self.directional_resolution = Some(resolution);
                info!(resolution, id = id.0, "directional shadow resources rebuilt");
                Ok(id)
            }
            Err(source) => {
                self.directional_disabled = true;
                let err = ShadowError::ShadowResourceInit {
                    kind,
                    resolution,
                    source,
                };
                error!("{err}, directional shadows disabled");
                Err(err)
            }
        }
    }

    /// Active resource set of a kind.
    pub fn active(&self, kind: ShadowLightKind) -> Option<&R> {
        match self.kind_cache(kind) {
            Some(cache) => cache
                .active
                .and_then(|res| cache.sets.get(&res))
                .map(|c| &c.set),
            None => self.directional.as_ref().map(|c| &c.set),
        }
    }

    /// Identity of the active resource set of a kind.
    pub fn active_id(&self, kind: ShadowLightKind) -> Option<ResourceSetId> {
        match self.kind_cache(kind) {
            Some(cache) => cache
                .active
                .and_then(|res| cache.sets.get(&res))
                .map(|c| c.id),
            None => self.directional.as_ref().map(|c| c.id),
        }
    }

    pub fn active_resolution(&self, kind: ShadowLightKind) -> Option<u32> {
        match self.kind_cache(kind) {
            Some(cache) => cache.active,
            None => self.directional_resolution,
        }
    }

    /// Every resolution with a live resource set for `kind`, ascending.
    pub fn cached_resolutions(&self, kind: ShadowLightKind) -> Vec<u32> {
        match self.kind_cache(kind) {
            Some(cache) => cache.sets.keys().copied().collect(),
            None => self.directional_resolution.into_iter().collect(),
        }
    }

    /// Whether a build failure switched this kind off.
    pub fn is_disabled(&self, kind: ShadowLightKind) -> bool {
        match self.kind_cache(kind) {
            Some(cache) => cache.disabled,
            None => self.directional_disabled,
        }
    }

    /// Backend builds performed so far.
    pub fn build_count(&self) -> usize {
        self.builds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::testing::RecordingBackend;

    type Cache = ShadowResourceCache<ResourceSetDescriptor>;

    #[test]
    fn test_same_resolution_builds_once() {
        let mut backend = RecordingBackend::new();
        let mut cache = Cache::new();

        let first = cache
            .set_resolution(&mut backend, ShadowLightKind::Spot, 1024, 32, false)
            .unwrap();
        let second = cache
            .set_resolution(&mut backend, ShadowLightKind::Spot, 1024, 32, false)
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(backend.builds.len(), 1);
        assert_eq!(cache.build_count(), 1);
        assert_eq!(cache.active_resolution(ShadowLightKind::Spot), Some(1024));
    }

    #[test]
    fn test_toggling_back_reuses_cached_set() {
        let mut backend = RecordingBackend::new();
        let mut cache = Cache::new();
        let kind = ShadowLightKind::Point;

        let low = cache.set_resolution(&mut backend, kind, 512, 96, false).unwrap();
        let high = cache.set_resolution(&mut backend, kind, 2048, 96, false).unwrap();
        let low_again = cache.set_resolution(&mut backend, kind, 512, 96, false).unwrap();

        assert_ne!(low, high);
        assert_eq!(low, low_again);
        assert_eq!(backend.builds.len(), 2);
        assert_eq!(cache.cached_resolutions(kind), vec![512, 2048]);
        assert_eq!(cache.active(kind).map(|set| set.resolution), Some(512));
        assert_eq!(cache.active_id(kind), Some(low));
    }

    #[test]
    fn test_kinds_are_cached_separately() {
        let mut backend = RecordingBackend::new();
        let mut cache = Cache::new();

        let point = cache
            .set_resolution(&mut backend, ShadowLightKind::Point, 512, 6, false)
            .unwrap();
        let spot = cache
            .set_resolution(&mut backend, ShadowLightKind::Spot, 512, 1, false)
            .unwrap();

        assert_ne!(point, spot);
        assert_eq!(backend.builds.len(), 2);
    }

    #[test]
    fn test_build_failure_disables_kind() {
        let mut backend = RecordingBackend::failing(ShadowLightKind::Spot);
        let mut cache = Cache::new();

        let err = cache
            .set_resolution(&mut backend, ShadowLightKind::Spot, 1024, 32, false)
            .unwrap_err();
        assert!(matches!(err, ShadowError::ShadowResourceInit { .. }));
        assert!(cache.is_disabled(ShadowLightKind::Spot));

        // No retry on later requests.
        let err = cache
            .set_resolution(&mut backend, ShadowLightKind::Spot, 512, 32, false)
            .unwrap_err();
        assert!(matches!(err, ShadowError::ShadowsDisabled(ShadowLightKind::Spot)));
        assert!(backend.builds.is_empty());

        // Other kinds are unaffected.
        assert!(cache
            .set_resolution(&mut backend, ShadowLightKind::Point, 512, 6, false)
            .is_ok());
    }

    #[test]
    fn test_directional_rebuilds_in_place() {
        let mut backend = RecordingBackend::new();
        let mut cache = Cache::new();

        let a = cache
            .set_directional_resolution(&mut backend, 2048, 4, false)
            .unwrap();
        let same = cache
            .set_directional_resolution(&mut backend, 2048, 4, false)
            .unwrap();
        let b = cache
            .set_directional_resolution(&mut backend, 1024, 4, false)
            .unwrap();

        assert_eq!(a, same);
        assert_ne!(a, b);
        assert_eq!(backend.builds.len(), 2);
        assert_eq!(cache.cached_resolutions(ShadowLightKind::Directional), vec![1024]);
    }
}
