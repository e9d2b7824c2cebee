//! Baked light maps: the per-probe cache and nearest-map selection.

use std::collections::BTreeMap;
use std::fmt;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::renderer::backend::{CubeMapId, GpuBackend};
use crate::renderer::error::RenderError;
use crate::renderer::geometry::Aabb;

/// Shader array size for the composite pass.
pub const MAX_DEFERRED_LIGHT_MAPS: usize = 4;
/// Shader array size for each forward draw.
pub const MAX_FORWARD_LIGHT_MAPS: usize = 2;

/// Stable identity of a light probe across frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProbeId(pub u64);

impl fmt::Display for ProbeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "probe#{}", self.0)
    }
}

/// A probe as submitted this frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightProbe {
    pub enabled: bool,
    pub origin: Vec3,
    pub bounds: Aabb,
    pub ambient_color: Vec3,
    pub ambient_brightness: f32,
    /// Set by the owner when the surroundings changed and a re-bake is due.
    pub stale: bool,
}

/// The three cube maps produced by one bake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LightMapTextures {
    pub reflection: CubeMapId,
    pub irradiance: CubeMapId,
    pub environment_filter: CubeMapId,
}

impl LightMapTextures {
    pub fn release(self, backend: &mut dyn GpuBackend) {
        backend.destroy_cube_map(self.reflection);
        backend.destroy_cube_map(self.irradiance);
        backend.destroy_cube_map(self.environment_filter);
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightMap {
    pub probe: ProbeId,
    pub enabled: bool,
    pub origin: Vec3,
    pub bounds: Aabb,
    pub ambient_color: Vec3,
    pub ambient_brightness: f32,
    pub textures: LightMapTextures,
    stale: bool,
}

impl LightMap {
    fn new(probe: ProbeId, state: &LightProbe, textures: LightMapTextures) -> Self {
        Self {
            probe,
            enabled: state.enabled,
            origin: state.origin,
            bounds: state.bounds,
            ambient_color: state.ambient_color,
            ambient_brightness: state.ambient_brightness,
            textures,
            stale: false,
        }
    }

    fn refresh(&mut self, state: &LightProbe) {
        self.enabled = state.enabled;
        self.origin = state.origin;
        self.bounds = state.bounds;
        self.ambient_color = state.ambient_color;
        self.ambient_brightness = state.ambient_brightness;
    }
}

/// Produces the cube maps for one probe.
pub trait LightMapBaker {
    fn bake(&mut self, id: ProbeId, probe: &LightProbe) -> Result<LightMapTextures, RenderError>;
    fn release(&mut self, textures: LightMapTextures);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LightMapState {
    Absent,
    Cached,
    /// Cached, but due for a re-bake; still used until one succeeds.
    Stale,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub baked: usize,
    pub refreshed: usize,
    pub evicted: usize,
    pub failed: usize,
}

/// At most one baked light map per probe id.
#[derive(Debug, Default)]
pub struct LightMapCache {
    entries: BTreeMap<ProbeId, LightMap>,
}

impl LightMapCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Brings the cache in line with this frame's probes.
    ///
    /// Absent probes are evicted, missing or stale ones are baked, and fresh
    /// ones only get their scalar fields refreshed. A failed bake leaves any
    /// previous entry in place, marked stale, so it is retried next frame.
    pub fn sync_probes(
        &mut self,
        probes: &BTreeMap<ProbeId, LightProbe>,
        baker: &mut dyn LightMapBaker,
    ) -> SyncReport {
        let mut report = SyncReport::default();

        let gone: Vec<ProbeId> = self
            .entries
            .keys()
            .filter(|id| !probes.contains_key(id))
            .copied()
            .collect();
        for id in gone {
            if let Some(entry) = self.entries.remove(&id) {
                baker.release(entry.textures);
                report.evicted += 1;
            }
        }

        for (id, probe) in probes {
            let needs_bake = match self.entries.get_mut(id) {
                Some(entry) if !probe.stale && !entry.stale => {
                    entry.refresh(probe);
                    report.refreshed += 1;
                    false
                }
                _ => true,
            };
            if !needs_bake {
                continue;
            }

            match baker.bake(*id, probe) {
                Ok(textures) => {
                    if let Some(previous) = self.entries.remove(id) {
                        baker.release(previous.textures);
                    }
                    self.entries.insert(*id, LightMap::new(*id, probe, textures));
                    report.baked += 1;
                }
                Err(err) => {
                    log::warn!("Light map bake for {} failed ({}); retrying next frame", id, err);
                    if let Some(entry) = self.entries.get_mut(id) {
                        entry.refresh(probe);
                        entry.stale = true;
                    }
                    report.failed += 1;
                }
            }
        }

        report
    }

    pub fn state(&self, id: ProbeId) -> LightMapState {
        match self.entries.get(&id) {
            None => LightMapState::Absent,
            Some(entry) if entry.stale => LightMapState::Stale,
            Some(_) => LightMapState::Cached,
        }
    }

    pub fn get(&self, id: ProbeId) -> Option<&LightMap> {
        self.entries.get(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = ProbeId> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Enabled light maps, ready for selection.
    pub fn sortable_light_maps(&self) -> Vec<SortableLightMap> {
        self.entries
            .values()
            .filter(|entry| entry.enabled)
            .enumerate()
            .map(|(order, entry)| SortableLightMap::new(*entry, order))
            .collect()
    }

    /// Empties the cache, handing back every owned cube map triple.
    pub fn drain(&mut self) -> Vec<LightMapTextures> {
        std::mem::take(&mut self.entries)
            .into_values()
            .map(|entry| entry.textures)
            .collect()
    }
}

/// A light map plus selection scratch; see [`crate::renderer::lights::SortableLight`].
#[derive(Clone, Copy, Debug)]
pub struct SortableLightMap {
    pub light_map: LightMap,
    pub order: usize,
    distance_squared: f32,
}

impl SortableLightMap {
    pub fn new(light_map: LightMap, order: usize) -> Self {
        Self {
            light_map,
            order,
            distance_squared: f32::MAX,
        }
    }
}

impl PartialEq for SortableLightMap {
    fn eq(&self, other: &Self) -> bool {
        self.light_map == other.light_map && self.order == other.order
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LightMapArrays {
    pub enableds: Vec<bool>,
    pub origins: Vec<[f32; 3]>,
    pub mins: Vec<[f32; 3]>,
    pub sizes: Vec<[f32; 3]>,
    pub ambient_colors: Vec<[f32; 3]>,
    pub ambient_brightnesses: Vec<f32>,
    pub irradiance_maps: Vec<Option<CubeMapId>>,
    pub environment_filter_maps: Vec<Option<CubeMapId>>,
}

impl LightMapArrays {
    pub fn disabled(len: usize) -> Self {
        Self {
            enableds: vec![false; len],
            origins: vec![[0.0; 3]; len],
            mins: vec![[0.0; 3]; len],
            sizes: vec![[0.0; 3]; len],
            ambient_colors: vec![[0.0; 3]; len],
            ambient_brightnesses: vec![0.0; len],
            irradiance_maps: vec![None; len],
            environment_filter_maps: vec![None; len],
        }
    }

    pub fn len(&self) -> usize {
        self.enableds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.enableds.is_empty()
    }

    pub fn enabled_count(&self) -> usize {
        self.enableds.iter().filter(|e| **e).count()
    }
}

/// Picks the `max_count` enabled light maps closest to `reference`.
pub fn select_light_maps(
    max_count: usize,
    reference: Vec3,
    light_maps: &mut [SortableLightMap],
) -> LightMapArrays {
    for sortable in light_maps.iter_mut() {
        sortable.distance_squared = sortable.light_map.origin.distance_squared(reference);
    }
    light_maps.sort_by(|a, b| {
        a.distance_squared
            .total_cmp(&b.distance_squared)
            .then(a.order.cmp(&b.order))
    });

    let mut arrays = LightMapArrays::disabled(max_count);
    let enabled = light_maps.iter().filter(|s| s.light_map.enabled);
    for (slot, sortable) in enabled.take(max_count).enumerate() {
        let map = &sortable.light_map;
        arrays.enableds[slot] = true;
        arrays.origins[slot] = map.origin.to_array();
        arrays.mins[slot] = map.bounds.min.to_array();
        arrays.sizes[slot] = map.bounds.size().to_array();
        arrays.ambient_colors[slot] = map.ambient_color.to_array();
        arrays.ambient_brightnesses[slot] = map.ambient_brightness;
        arrays.irradiance_maps[slot] = Some(map.textures.irradiance);
        arrays.environment_filter_maps[slot] = Some(map.textures.environment_filter);
    }
    arrays
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct LightMapRaw {
    pub origin_enabled: [f32; 4],
    pub min: [f32; 4],
    pub size: [f32; 4],
    pub ambient: [f32; 4],
}

impl LightMapRaw {
    pub fn from_arrays(arrays: &LightMapArrays, slot: usize) -> Self {
        let [ox, oy, oz] = arrays.origins[slot];
        let [mx, my, mz] = arrays.mins[slot];
        let [sx, sy, sz] = arrays.sizes[slot];
        let [r, g, b] = arrays.ambient_colors[slot];
        let enabled = if arrays.enableds[slot] { 1.0 } else { 0.0 };
        Self {
            origin_enabled: [ox, oy, oz, enabled],
            min: [mx, my, mz, 0.0],
            size: [sx, sy, sz, 0.0],
            ambient: [r, g, b, arrays.ambient_brightnesses[slot]],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingBaker {
        next: u64,
        bakes: usize,
        released: Vec<LightMapTextures>,
        fail: bool,
    }

    impl LightMapBaker for CountingBaker {
        fn bake(&mut self, _id: ProbeId, _probe: &LightProbe) -> Result<LightMapTextures, RenderError> {
            if self.fail {
                return Err(RenderError::UnknownResource("capture target".into()));
            }
            self.bakes += 1;
            let mut next = || {
                self.next += 1;
                CubeMapId(self.next)
            };
            Ok(LightMapTextures {
                reflection: next(),
                irradiance: next(),
                environment_filter: next(),
            })
        }

        fn release(&mut self, textures: LightMapTextures) {
            self.released.push(textures);
        }
    }

    fn probe(x: f32) -> LightProbe {
        LightProbe {
            enabled: true,
            origin: Vec3::new(x, 0.0, 0.0),
            bounds: Aabb::UNIT,
            ambient_color: Vec3::ONE,
            ambient_brightness: 0.5,
            stale: false,
        }
    }

    fn probes(entries: &[(u64, LightProbe)]) -> BTreeMap<ProbeId, LightProbe> {
        entries.iter().map(|(id, p)| (ProbeId(*id), *p)).collect()
    }

    #[test]
    fn key_set_tracks_probe_set() {
        let mut cache = LightMapCache::new();
        let mut baker = CountingBaker::default();

        cache.sync_probes(&probes(&[(1, probe(0.0)), (2, probe(5.0))]), &mut baker);
        assert_eq!(cache.ids().collect::<Vec<_>>(), vec![ProbeId(1), ProbeId(2)]);

        let report = cache.sync_probes(&probes(&[(2, probe(5.0))]), &mut baker);
        assert_eq!(cache.ids().collect::<Vec<_>>(), vec![ProbeId(2)]);
        assert_eq!(report.evicted, 1);
        assert_eq!(baker.released.len(), 1);
    }

    #[test]
    fn fresh_probes_are_not_rebaked() {
        let mut cache = LightMapCache::new();
        let mut baker = CountingBaker::default();
        let set = probes(&[(7, probe(0.0))]);

        cache.sync_probes(&set, &mut baker);
        let report = cache.sync_probes(&set, &mut baker);

        assert_eq!(baker.bakes, 1);
        assert_eq!(report.baked, 0);
        assert_eq!(report.refreshed, 1);
    }

    #[test]
    fn scalar_fields_refresh_in_place() {
        let mut cache = LightMapCache::new();
        let mut baker = CountingBaker::default();
        cache.sync_probes(&probes(&[(1, probe(0.0))]), &mut baker);

        let mut moved = probe(3.0);
        moved.enabled = false;
        cache.sync_probes(&probes(&[(1, moved)]), &mut baker);

        let entry = cache.get(ProbeId(1)).unwrap();
        assert_eq!(entry.origin, Vec3::new(3.0, 0.0, 0.0));
        assert!(!entry.enabled);
        assert_eq!(baker.bakes, 1);
        assert!(cache.sortable_light_maps().is_empty());
    }

    #[test]
    fn stale_probe_rebakes_and_frees_previous_maps_first() {
        let mut cache = LightMapCache::new();
        let mut baker = CountingBaker::default();
        cache.sync_probes(&probes(&[(1, probe(0.0))]), &mut baker);
        let first = cache.get(ProbeId(1)).unwrap().textures;

        let mut stale = probe(0.0);
        stale.stale = true;
        cache.sync_probes(&probes(&[(1, stale)]), &mut baker);

        assert_eq!(baker.bakes, 2);
        assert_eq!(baker.released, vec![first]);
        assert_ne!(cache.get(ProbeId(1)).unwrap().textures, first);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn failed_rebake_keeps_stale_entry_and_retries() {
        let mut cache = LightMapCache::new();
        let mut baker = CountingBaker::default();
        cache.sync_probes(&probes(&[(1, probe(0.0))]), &mut baker);

        let mut stale = probe(0.0);
        stale.stale = true;
        baker.fail = true;
        let report = cache.sync_probes(&probes(&[(1, stale)]), &mut baker);
        assert_eq!(report.failed, 1);
        assert_eq!(cache.state(ProbeId(1)), LightMapState::Stale);
        assert_eq!(cache.sortable_light_maps().len(), 1);

        // The owner cleared its flag, but the entry still needs a bake.
        baker.fail = false;
        let report = cache.sync_probes(&probes(&[(1, probe(0.0))]), &mut baker);
        assert_eq!(report.baked, 1);
        assert_eq!(cache.state(ProbeId(1)), LightMapState::Cached);
    }

    #[test]
    fn selection_skips_disabled_and_pads() {
        let textures = LightMapTextures {
            reflection: CubeMapId(1),
            irradiance: CubeMapId(2),
            environment_filter: CubeMapId(3),
        };
        let mut near = LightMap::new(ProbeId(1), &probe(1.0), textures);
        near.enabled = false;
        let far = LightMap::new(ProbeId(2), &probe(9.0), textures);
        let mut maps = vec![SortableLightMap::new(near, 0), SortableLightMap::new(far, 1)];

        let arrays = select_light_maps(MAX_DEFERRED_LIGHT_MAPS, Vec3::ZERO, &mut maps);
        assert_eq!(arrays.len(), MAX_DEFERRED_LIGHT_MAPS);
        assert_eq!(arrays.enabled_count(), 1);
        assert_eq!(arrays.origins[0], [9.0, 0.0, 0.0]);
        assert_eq!(arrays.irradiance_maps[1], None);
    }

    #[test]
    fn selection_orders_by_distance_without_containment() {
        let textures = LightMapTextures {
            reflection: CubeMapId(1),
            irradiance: CubeMapId(2),
            environment_filter: CubeMapId(3),
        };
        let maps = [(1, -4.0), (2, 30.0), (3, 12.0)];
        let mut maps: Vec<_> = maps
            .iter()
            .enumerate()
            .map(|(order, (id, x))| {
                SortableLightMap::new(LightMap::new(ProbeId(*id), &probe(*x), textures), order)
            })
            .collect();

        // The reference point lies outside every map's bounds.
        let arrays = select_light_maps(2, Vec3::new(50.0, 0.0, 0.0), &mut maps);
        assert_eq!(arrays.enabled_count(), 2);
        assert_eq!(arrays.origins[0], [30.0, 0.0, 0.0]);
        assert_eq!(arrays.origins[1], [12.0, 0.0, 0.0]);
    }
}
