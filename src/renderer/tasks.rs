use std::collections::{BTreeMap, HashMap};

use glam::{Mat4, Vec3, Vec4};

use crate::renderer::backend::CubeMapId;
use crate::renderer::light_maps::{LightProbe, ProbeId, SortableLightMap};
use crate::renderer::lights::SortableLight;
use crate::renderer::material::MaterialProperties;
use crate::renderer::surface::Surface;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeferredInstance {
    pub model: Mat4,
    pub tex_coords_offset: Vec4,
    pub properties: MaterialProperties,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForwardInstance {
    pub sort: f32,
    pub subsort: f32,
    pub model: Mat4,
    pub tex_coords_offset: Vec4,
    pub properties: MaterialProperties,
    pub surface: Surface,
}

impl ForwardInstance {
    pub fn position(&self) -> Vec3 {
        self.model.w_axis.truncate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyBox {
    pub color: Vec3,
    pub brightness: f32,
    pub ambient_color: Vec3,
    pub ambient_brightness: f32,
    pub cube_map: CubeMapId,
}

/// Frame-scoped accumulation of everything the categorizer sorted out.
///
/// Surfaces are copied handles into the asset cache; nothing here owns GPU
/// resources. Cleared at the end of every frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderTasks {
    pub deferred_relative: HashMap<Surface, Vec<DeferredInstance>>,
    pub deferred_absolute: HashMap<Surface, Vec<DeferredInstance>>,
    pub forward_relative: Vec<ForwardInstance>,
    pub forward_absolute: Vec<ForwardInstance>,
    pub lights: Vec<SortableLight>,
    pub light_probes: BTreeMap<ProbeId, LightProbe>,
    pub light_maps: Vec<SortableLightMap>,
    pub sky_boxes: Vec<SkyBox>,
}

impl RenderTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.deferred_relative.clear();
        self.deferred_absolute.clear();
        self.forward_relative.clear();
        self.forward_absolute.clear();
        self.lights.clear();
        self.light_probes.clear();
        self.light_maps.clear();
        self.sky_boxes.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.deferred_relative.is_empty()
            && self.deferred_absolute.is_empty()
            && self.forward_relative.is_empty()
            && self.forward_absolute.is_empty()
            && self.lights.is_empty()
            && self.light_probes.is_empty()
            && self.light_maps.is_empty()
            && self.sky_boxes.is_empty()
    }

    /// The most recently submitted sky box wins.
    pub fn sky_box(&self) -> Option<&SkyBox> {
        self.sky_boxes.last()
    }

    pub fn deferred_instance_count(&self) -> usize {
        self.deferred_relative
            .values()
            .chain(self.deferred_absolute.values())
            .map(Vec::len)
            .sum()
    }

    pub fn add_deferred(&mut self, absolute: bool, surface: Surface, instance: DeferredInstance) {
        let batches = if absolute {
            &mut self.deferred_absolute
        } else {
            &mut self.deferred_relative
        };
        batches.entry(surface).or_default().push(instance);
    }

    pub fn add_forward(&mut self, absolute: bool, instance: ForwardInstance) {
        if absolute {
            self.forward_absolute.push(instance);
        } else {
            self.forward_relative.push(instance);
        }
    }
}
